// ─── Market data ──────────────────────────────────────────────────────────────
pub const BINANCE_SPOT_URL: &str = "https://api.binance.com";
pub const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com";

pub const DEFAULT_INTERVAL: &str = "4h";
pub const DEFAULT_LIMIT: usize = 1000;

/// Fallback universe when symbol discovery fails at startup.
pub const TRADING_PAIRS: &[&str] = &["BTCUSDT", "ETHUSDT", "BNBUSDT", "XRPUSDT", "SOLUSDT"];

// ─── Strategy ─────────────────────────────────────────────────────────────────
pub const RSI_PERIOD: usize = 14;
pub const SWING_LOOKBACK: usize = 2; // candles on each side of a swing high

pub const STARTING_BALANCE: f64 = 10_000.0;
pub const MAX_OPEN_POSITIONS: usize = 5;

// ─── Scheduler ────────────────────────────────────────────────────────────────
pub const NUM_WORKERS: usize = 8; // concurrent fetches (upstream rate limit)
pub const TOP_SYMBOLS: usize = 50; // top-N by 24 h quote volume

/// Support/resistance zone detection, Bjorgum key-levels parameterisation.
#[derive(Clone, Debug)]
pub struct SrConfig {
    pub look_left: usize,
    pub look_right: usize,
    pub atr_length: usize,
    pub atr_multiplier: f64,
    pub max_zone_percent: f64,
    pub align_zones: bool,
    pub min_strength: u32,
    pub max_zones: usize,
}

impl Default for SrConfig {
    fn default() -> Self {
        SrConfig {
            look_left: 20,
            look_right: 15,
            atr_length: 30,
            atr_multiplier: 0.5,
            max_zone_percent: 5.0,
            align_zones: true,
            min_strength: 1,
            max_zones: 20,
        }
    }
}

/// Short-setup composition thresholds.
#[derive(Clone, Debug)]
pub struct SignalConfig {
    pub min_divergences: usize,
    pub overbought_rsi: f64,
    pub divergence_window_hours: i64,
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
    pub min_risk_reward: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            min_divergences: 1,
            overbought_rsi: 70.0,
            divergence_window_hours: 72,
            stop_loss_percent: 3.0,
            take_profit_percent: 6.0,
            min_risk_reward: 2.0,
        }
    }
}

/// Three-tier position protection thresholds. Profit thresholds are percent
/// of remaining position size, the time threshold is seconds in profit.
#[derive(Clone, Debug)]
pub struct TierConfig {
    pub tier1_breakeven_threshold: f64,
    pub tier2_partial_exit_threshold: f64,
    pub tier2_partial_exit_percent: f64,
    pub tier3_time_threshold_secs: i64,
    pub tier3_min_profit_threshold: f64,
    pub tier3_profit_lock_percent: f64,
    pub enabled: bool,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            tier1_breakeven_threshold: 0.3,
            tier2_partial_exit_threshold: 0.6,
            tier2_partial_exit_percent: 50.0,
            tier3_time_threshold_secs: 180,
            tier3_min_profit_threshold: 0.4,
            tier3_profit_lock_percent: 60.0,
            enabled: true,
        }
    }
}

impl TierConfig {
    /// Derive profit thresholds from the position's actual stop distance so
    /// tier spacing scales with how tight the stop is: Tier 1 at 40 %,
    /// Tier 2 at 70 % and Tier 3 minimum at 30 % of the SL distance.
    pub fn adaptive(&self, sl_distance_pct: f64) -> TierConfig {
        TierConfig {
            tier1_breakeven_threshold: sl_distance_pct * 0.4,
            tier2_partial_exit_threshold: sl_distance_pct * 0.7,
            tier2_partial_exit_percent: self.tier2_partial_exit_percent,
            tier3_time_threshold_secs: self.tier3_time_threshold_secs,
            tier3_min_profit_threshold: sl_distance_pct * 0.3,
            tier3_profit_lock_percent: self.tier3_profit_lock_percent,
            enabled: true,
        }
    }
}

/// Everything one scan cycle needs, assembled in `main` and passed down.
/// No process-global mode flags; verbosity is the log level.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub interval: String,
    pub limit: usize,
    pub num_workers: usize,
    pub rsi_period: usize,
    pub swing_lookback: usize,
    pub sr: SrConfig,
    pub signal: SignalConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            interval: DEFAULT_INTERVAL.to_string(),
            limit: DEFAULT_LIMIT,
            num_workers: NUM_WORKERS,
            rsi_period: RSI_PERIOD,
            swing_lookback: SWING_LOOKBACK,
            sr: SrConfig::default(),
            signal: SignalConfig::default(),
        }
    }
}
