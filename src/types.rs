use serde::{Deserialize, Serialize};

/// One closed kline, ascending by `open_time`. Timestamps are Unix millis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }
}

/// A pair of consecutive price swing-highs where price rose but RSI fell.
#[derive(Clone, Debug)]
pub struct BearishDivergence {
    pub start_idx: usize,
    pub start_time: i64,
    pub start_price: f64,
    pub start_rsi: f64,
    pub end_idx: usize,
    pub end_time: i64,
    pub end_price: f64,
    pub end_rsi: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DivergenceStrength {
    Weak,
    Medium,
    Strong,
}

/// Local extreme under an asymmetric left/right lookback, annotated with the
/// ATR at that bar and the derived zone band.
#[derive(Clone, Debug)]
pub struct PivotPoint {
    pub index: usize,
    pub price: f64,
    pub time: i64,
    pub is_high: bool,
    pub atr: f64,
    pub zone_top: f64,
    pub zone_bot: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneKind {
    Support,
    Resistance,
}

#[derive(Clone, Debug)]
pub struct SrZone {
    pub level: f64,
    pub zone_top: f64,
    pub zone_bot: f64,
    pub strength: u32,
    pub kind: ZoneKind,
    pub first_touch: i64,
    pub last_touch: i64,
    pub pivot_count: u32,
    pub avg_atr: f64,
}

impl SrZone {
    pub fn range(&self) -> f64 {
        self.zone_top - self.zone_bot
    }
}

/// A composed short setup. `risk_reward` is (entry − target) / (stop − entry);
/// the caller gates on the configured minimum before acting.
#[derive(Clone, Debug)]
pub struct TradeSignal {
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward: f64,
    pub recent_divergences: usize,
    pub rsi: f64,
    pub timestamp: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TradeStatus {
    Open,
    ClosedTakeProfit,
    ClosedStopLoss,
    ClosedStopLossWin,
    ClosedWin,
    ClosedLoss,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::ClosedTakeProfit => "CLOSED_TP",
            TradeStatus::ClosedStopLoss => "CLOSED_SL",
            TradeStatus::ClosedStopLossWin => "CLOSED_SL_WIN",
            TradeStatus::ClosedWin => "CLOSED_WIN",
            TradeStatus::ClosedLoss => "CLOSED_LOSS",
        }
    }
}

/// One simulated ledger row. Times are Unix seconds.
#[derive(Clone, Debug)]
pub struct PaperTrade {
    pub id: u64,
    pub symbol: String,
    pub interval: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
    pub status: TradeStatus,
    pub exit_price: f64,
    pub exit_time: i64,
    pub profit_loss: f64,
    pub profit_loss_pct: f64,
    pub risk_reward: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub max_profit: f64,
    pub max_profit_pct: f64,
}

impl PaperTrade {
    /// Peak unrealized profit minus what was actually realized at close.
    pub fn give_back(&self) -> f64 {
        self.max_profit - self.profit_loss
    }

    pub fn give_back_pct(&self) -> f64 {
        self.max_profit_pct - self.profit_loss_pct
    }
}

/// Per-symbol outcome of one scan cycle. `error` carries the fetch failure
/// for this symbol only; the batch always completes.
#[derive(Clone, Debug)]
pub struct SymbolReport {
    pub symbol: String,
    pub divergences: usize,
    pub zones: usize,
    pub current_rsi: f64,
    pub last_close: f64,
    pub signal: Option<TradeSignal>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl SymbolReport {
    pub fn has_signal(&self) -> bool {
        self.signal.is_some()
    }
}
