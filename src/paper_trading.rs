use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TierConfig;
use crate::trade_logger::TradeLogger;
use crate::trade_manager::{Manager, RiskLedger};
use crate::types::{PaperTrade, Side, TradeStatus};

/// The concurrent-safe position map. All access goes through atomic
/// get/put/remove/update-with-callback operations; callers never iterate the
/// map itself while another task might mutate it.
pub struct PositionBook {
    inner: Mutex<HashMap<String, PaperTrade>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum OpenRejected {
    AlreadyOpen,
    MaxPositions,
}

impl PositionBook {
    fn new() -> Self {
        PositionBook { inner: Mutex::new(HashMap::new()) }
    }

    /// Insert under the capacity and one-position-per-symbol rules, as one
    /// atomic check-and-put.
    pub fn try_open(&self, trade: PaperTrade, max_positions: usize) -> Result<(), OpenRejected> {
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(&trade.symbol) {
            return Err(OpenRejected::AlreadyOpen);
        }
        if map.len() >= max_positions {
            return Err(OpenRejected::MaxPositions);
        }
        map.insert(trade.symbol.clone(), trade);
        Ok(())
    }

    pub fn remove(&self, symbol: &str) -> Option<PaperTrade> {
        self.inner.lock().unwrap().remove(symbol)
    }

    /// Run `f` on the trade under the lock; the single read-modify-write
    /// primitive every mutation uses.
    pub fn with_trade<T>(&self, symbol: &str, f: impl FnOnce(&mut PaperTrade) -> T) -> Option<T> {
        self.inner.lock().unwrap().get_mut(symbol).map(f)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.inner.lock().unwrap().contains_key(symbol)
    }

    /// Snapshot of the open symbols, taken under the lock and released before
    /// the caller acts on it.
    pub fn symbols(&self) -> Vec<String> {
        self.inner.lock().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Realized results and counters for the whole simulated account.
#[derive(Clone, Debug)]
pub struct Portfolio {
    pub starting_balance: f64,
    pub current_balance: f64,
    pub win_count: u32,
    pub loss_count: u32,
    pub total_profit: f64,
    pub total_loss: f64,
    pub closed_trades: Vec<PaperTrade>,
}

impl Portfolio {
    fn new(starting_balance: f64) -> Self {
        Portfolio {
            starting_balance,
            current_balance: starting_balance,
            win_count: 0,
            loss_count: 0,
            total_profit: 0.0,
            total_loss: 0.0,
            closed_trades: Vec::new(),
        }
    }

    pub fn win_rate(&self) -> f64 {
        let total = self.win_count + self.loss_count;
        if total == 0 {
            return 0.0;
        }
        self.win_count as f64 / total as f64 * 100.0
    }

    pub fn profit_factor(&self) -> f64 {
        if self.total_loss == 0.0 {
            return 0.0;
        }
        self.total_profit / -self.total_loss
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::StopLoss => "STOP_LOSS",
            CloseReason::TakeProfit => "TAKE_PROFIT",
        }
    }
}

/// `RiskLedger` adapter the tier manager drives: stop updates rewrite the
/// booked trade, partial exits shrink it and credit the realized slice.
struct BookLedger {
    book: Arc<PositionBook>,
    portfolio: Arc<Mutex<Portfolio>>,
}

impl RiskLedger for BookLedger {
    fn update_stop(&self, symbol: &str, new_stop: f64) -> Result<(), String> {
        self.book
            .with_trade(symbol, |t| t.stop_loss = new_stop)
            .ok_or_else(|| format!("no active trade for {}", symbol))
    }

    fn partial_exit(&self, symbol: &str, exit_percent: f64, price: f64) -> Result<f64, String> {
        let profit = self
            .book
            .with_trade(symbol, |t| {
                let exit_size = t.size * (exit_percent / 100.0);
                let profit = match t.side {
                    Side::Short => (t.entry_price - price) * (exit_size / t.entry_price),
                    Side::Long => (price - t.entry_price) * (exit_size / t.entry_price),
                };
                t.size -= exit_size;
                profit
            })
            .ok_or_else(|| format!("no active trade for {}", symbol))?;

        self.portfolio.lock().unwrap().current_balance += profit;
        log::info!(
            "[{}] partial exit {:.0}% @ {:.4} | realized {:+.4}",
            symbol,
            exit_percent,
            price,
            profit
        );
        Ok(profit)
    }
}

/// Multi-symbol simulated portfolio with tier-managed protection. Never
/// touches an exchange.
pub struct PaperEngine {
    interval: String,
    max_positions: usize,
    book: Arc<PositionBook>,
    portfolio: Arc<Mutex<Portfolio>>,
    manager: Manager,
    logger: Option<Mutex<TradeLogger>>,
    trade_counter: AtomicU64,
}

impl PaperEngine {
    pub fn new(
        interval: &str,
        starting_balance: f64,
        max_positions: usize,
        tier_config: TierConfig,
        logger: Option<TradeLogger>,
    ) -> Self {
        let book = Arc::new(PositionBook::new());
        let portfolio = Arc::new(Mutex::new(Portfolio::new(starting_balance)));
        let ledger = Arc::new(BookLedger { book: book.clone(), portfolio: portfolio.clone() });

        PaperEngine {
            interval: interval.to_string(),
            max_positions: max_positions.max(1),
            book,
            portfolio,
            manager: Manager::new(tier_config, ledger),
            logger: logger.map(Mutex::new),
            trade_counter: AtomicU64::new(0),
        }
    }

    /// Equal fixed allocation per slot (1x leverage, no compounding).
    pub fn position_size(&self) -> f64 {
        self.portfolio.lock().unwrap().starting_balance / self.max_positions as f64
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.book.contains(symbol)
    }

    pub fn open_positions(&self) -> usize {
        self.book.len()
    }

    pub fn portfolio(&self) -> Portfolio {
        self.portfolio.lock().unwrap().clone()
    }

    /// Open a simulated trade and hand it to the tier manager in adaptive
    /// mode. Returns false when the symbol already has a position or the
    /// position cap is reached.
    pub fn open_trade(
        &self,
        symbol: &str,
        side: Side,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        size: f64,
    ) -> bool {
        let risk = match side {
            Side::Short => stop_loss - entry_price,
            Side::Long => entry_price - stop_loss,
        };
        let reward = match side {
            Side::Short => entry_price - take_profit,
            Side::Long => take_profit - entry_price,
        };
        let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

        let id = self.trade_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = chrono::Utc::now().timestamp();
        let trade = PaperTrade {
            id,
            symbol: symbol.to_string(),
            interval: self.interval.clone(),
            side,
            entry_price,
            entry_time: now,
            stop_loss,
            take_profit,
            size,
            status: TradeStatus::Open,
            exit_price: 0.0,
            exit_time: 0,
            profit_loss: 0.0,
            profit_loss_pct: 0.0,
            risk_reward,
            highest_price: entry_price,
            lowest_price: entry_price,
            max_profit: 0.0,
            max_profit_pct: 0.0,
        };

        match self.book.try_open(trade, self.max_positions) {
            Ok(()) => {}
            Err(OpenRejected::AlreadyOpen) => {
                log::debug!("[{}] already has an open trade", symbol);
                return false;
            }
            Err(OpenRejected::MaxPositions) => {
                log::info!("[{}] max positions reached ({}), skipping", symbol, self.max_positions);
                return false;
            }
        }

        self.manager
            .add_position_adaptive(id, symbol, side, entry_price, stop_loss, take_profit, size, now);

        log::info!(
            "[{}] {} OPENED @ {:.4} | SL {:.4} | TP {:.4} | size {:.2} | R/R {:.2} ({}/{} slots)",
            symbol,
            side.as_str(),
            entry_price,
            stop_loss,
            take_profit,
            size,
            risk_reward,
            self.book.len(),
            self.max_positions
        );
        true
    }

    /// One management pass over every open position: tier evaluation first
    /// (it may tighten the stop that the hit-check below then compares
    /// against), then extremes/max-profit tracking, then SL/TP detection.
    pub fn check_positions(&self, prices: &HashMap<String, f64>) {
        for symbol in self.book.symbols() {
            let Some(&price) = prices.get(&symbol) else { continue };

            if let Err(e) = self.manager.update_price(&symbol, price) {
                log::warn!("[{}] tier update failed: {}", symbol, e);
            }

            let close_reason = self
                .book
                .with_trade(&symbol, |t| {
                    if price > t.highest_price {
                        t.highest_price = price;
                    }
                    if price < t.lowest_price {
                        t.lowest_price = price;
                    }

                    let profit = unrealized(t, price);
                    if profit > t.max_profit && t.size > 0.0 {
                        t.max_profit = profit;
                        t.max_profit_pct = profit / t.size * 100.0;
                    }

                    match t.side {
                        Side::Short => {
                            if price >= t.stop_loss {
                                Some(CloseReason::StopLoss)
                            } else if price <= t.take_profit {
                                Some(CloseReason::TakeProfit)
                            } else {
                                None
                            }
                        }
                        Side::Long => {
                            if price <= t.stop_loss {
                                Some(CloseReason::StopLoss)
                            } else if price >= t.take_profit {
                                Some(CloseReason::TakeProfit)
                            } else {
                                None
                            }
                        }
                    }
                })
                .flatten();

            if let Some(reason) = close_reason {
                self.close_trade(&symbol, price, reason);
            }
        }
    }

    pub fn close_trade(&self, symbol: &str, exit_price: f64, reason: CloseReason) {
        let Some(mut trade) = self.book.remove(symbol) else { return };

        trade.exit_price = exit_price;
        trade.exit_time = chrono::Utc::now().timestamp();
        trade.profit_loss = unrealized(&trade, exit_price);
        trade.profit_loss_pct =
            if trade.size > 0.0 { trade.profit_loss / trade.size * 100.0 } else { 0.0 };

        trade.status = if trade.profit_loss > 0.0 {
            match reason {
                CloseReason::StopLoss => TradeStatus::ClosedStopLossWin,
                CloseReason::TakeProfit => TradeStatus::ClosedTakeProfit,
            }
        } else {
            match reason {
                CloseReason::StopLoss => TradeStatus::ClosedStopLoss,
                CloseReason::TakeProfit => TradeStatus::ClosedLoss,
            }
        };

        let balance = {
            let mut p = self.portfolio.lock().unwrap();
            if trade.profit_loss > 0.0 {
                p.win_count += 1;
                p.total_profit += trade.profit_loss;
            } else {
                p.loss_count += 1;
                p.total_loss += trade.profit_loss;
            }
            p.current_balance += trade.profit_loss;
            p.closed_trades.push(trade.clone());
            p.current_balance
        };

        let give_back = trade.give_back();
        log::info!(
            "[{}] {} CLOSED @ {:.4} | {} | P/L {:+.2} ({:+.2}%) | balance {:.2}",
            symbol,
            trade.side.as_str(),
            exit_price,
            reason.as_str(),
            trade.profit_loss,
            trade.profit_loss_pct,
            balance
        );
        if give_back > 0.0 {
            log::info!(
                "[{}] max profit {:+.2} ({:+.2}%) | give back {:.2}",
                symbol,
                trade.max_profit,
                trade.max_profit_pct,
                give_back
            );
        }

        if let Some(logger) = &self.logger {
            if let Err(e) = logger.lock().unwrap().log_trade(&trade) {
                log::warn!("Failed to log trade to CSV: {}", e);
            }
        }

        self.manager.remove_position(symbol);
    }

    pub fn unrealized_total(&self, prices: &HashMap<String, f64>) -> f64 {
        let mut total = 0.0;
        for symbol in self.book.symbols() {
            let Some(&price) = prices.get(&symbol) else { continue };
            if let Some(pnl) = self.book.with_trade(&symbol, |t| unrealized(t, price)) {
                total += pnl;
            }
        }
        total
    }

    /// One portfolio summary line per cycle, plus per-position tier status.
    pub fn log_summary(&self, prices: &HashMap<String, f64>) {
        self.manager.log_status();
        let unrealized = if self.book.is_empty() { 0.0 } else { self.unrealized_total(prices) };
        let p = self.portfolio.lock().unwrap();
        let total_pl = p.current_balance - p.starting_balance;
        log::info!(
            "Portfolio: {:.2} ({:+.2} realized, {:+.2} unrealized) | open {}/{} | trades {} | WR {:.1}% | PF {:.2}",
            p.current_balance,
            total_pl,
            unrealized,
            self.book.len(),
            self.max_positions,
            p.closed_trades.len(),
            p.win_rate(),
            p.profit_factor()
        );
    }
}

fn unrealized(trade: &PaperTrade, price: f64) -> f64 {
    match trade.side {
        Side::Short => (trade.entry_price - price) * (trade.size / trade.entry_price),
        Side::Long => (price - trade.entry_price) * (trade.size / trade.entry_price),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PaperEngine {
        PaperEngine::new("4h", 10_000.0, 5, TierConfig::default(), None)
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[test]
    fn one_position_per_symbol_and_capacity_cap() {
        let engine = PaperEngine::new("4h", 10_000.0, 2, TierConfig::default(), None);
        assert!(engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 5_000.0));
        assert!(!engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 5_000.0));
        assert!(engine.open_trade("BUSDT", Side::Short, 50.0, 51.5, 47.0, 5_000.0));
        assert!(!engine.open_trade("CUSDT", Side::Short, 10.0, 10.3, 9.4, 5_000.0));
        assert_eq!(engine.open_positions(), 2);
    }

    #[test]
    fn equal_allocation_per_slot() {
        let engine = engine();
        assert!((engine.position_size() - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn take_profit_close_updates_portfolio() {
        let engine = engine();
        engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0);

        engine.check_positions(&prices(&[("AUSDT", 93.5)]));

        assert_eq!(engine.open_positions(), 0);
        let p = engine.portfolio();
        assert_eq!(p.win_count, 1);
        assert_eq!(p.closed_trades.len(), 1);
        let trade = &p.closed_trades[0];
        assert_eq!(trade.status, TradeStatus::ClosedTakeProfit);
        // One update fires at most one tier: this pass spends its action on
        // Tier 1, then the TP check closes the full size.
        // Short 1000 @ 100 → 93.5: (100 − 93.5) · 10 = 65.
        assert!((trade.profit_loss - 65.0).abs() < 1e-9);
        assert!((p.current_balance - 10_065.0).abs() < 1e-9);
    }

    #[test]
    fn stop_loss_close_counts_a_loss() {
        let engine = engine();
        engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0);

        engine.check_positions(&prices(&[("AUSDT", 103.4)]));

        let p = engine.portfolio();
        assert_eq!(p.loss_count, 1);
        assert_eq!(p.closed_trades[0].status, TradeStatus::ClosedStopLoss);
        // Short stopped above entry: (100 − 103.4) · 10 = −34.
        assert!((p.current_balance - (10_000.0 - 34.0)).abs() < 1e-9);
        assert!(p.win_rate() < 1e-9);
    }

    #[test]
    fn breakeven_then_retrace_exits_flat_with_give_back() {
        let engine = engine();
        engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0);

        // +1.5 %: adaptive Tier 1 (1.2 % of the 3 % stop distance) fires and
        // moves the stop to entry.
        engine.check_positions(&prices(&[("AUSDT", 98.5)]));
        assert_eq!(engine.open_positions(), 1);
        let stop = engine.book.with_trade("AUSDT", |t| t.stop_loss).unwrap();
        assert_eq!(stop, 100.0);

        // Retrace to entry hits the tightened stop; the trade ends flat and
        // the peak profit shows up as give-back.
        engine.check_positions(&prices(&[("AUSDT", 100.0)]));
        assert_eq!(engine.open_positions(), 0);
        let p = engine.portfolio();
        let trade = &p.closed_trades[0];
        assert_eq!(trade.status, TradeStatus::ClosedStopLoss);
        assert!((trade.profit_loss).abs() < 1e-9);
        assert!(trade.give_back() > 0.0);
        assert!((p.current_balance - p.starting_balance).abs() < 1e-9);
    }

    #[test]
    fn partial_exit_credits_balance_and_shrinks_trade() {
        let engine = engine();
        engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0);

        // +2.2 % clears adaptive Tier 1 (1.2 %) and Tier 2 (2.1 %); Tier 2
        // needs a second observation because one update fires one tier.
        engine.check_positions(&prices(&[("AUSDT", 97.8)]));
        engine.check_positions(&prices(&[("AUSDT", 97.8)]));

        let size = engine.book.with_trade("AUSDT", |t| t.size).unwrap();
        assert!((size - 500.0).abs() < 1e-9);
        let p = engine.portfolio();
        // Realized half: (100 − 97.8) · (500 / 100) = 11.
        assert!((p.current_balance - 10_011.0).abs() < 1e-9);
        assert_eq!(p.closed_trades.len(), 0); // still open
    }

    #[test]
    fn missing_price_leaves_position_untouched() {
        let engine = engine();
        engine.open_trade("AUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0);
        engine.check_positions(&prices(&[("OTHERUSDT", 1.0)]));
        assert_eq!(engine.open_positions(), 1);
    }
}
