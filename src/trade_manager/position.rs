use crate::config::TierConfig;
use crate::types::Side;

/// Mutable risk state for one open position. All mutation happens under the
/// manager's lock; tier flags only ever go from false to true.
#[derive(Clone, Debug)]
pub struct ManagedPosition {
    pub id: u64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub entry_time: i64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub original_size: f64,
    pub remaining_size: f64,

    pub current_price: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub max_profit: f64,
    pub max_profit_pct: f64,

    pub tier1_activated: bool,
    pub tier1_activation_price: f64,
    pub tier1_activation_time: i64,

    pub tier2_activated: bool,
    pub tier2_activation_price: f64,
    pub tier2_activation_time: i64,
    pub tier2_exited_size: f64,
    pub tier2_exited_profit: f64,

    pub tier3_activated: bool,
    pub tier3_activation_price: f64,
    pub tier3_activation_time: i64,
    pub tier3_locked_profit: f64,

    pub first_profitable_time: Option<i64>,
    pub time_in_profit_secs: f64,

    /// Per-position thresholds; adaptive mode derives them from the actual
    /// stop distance at entry.
    pub config: TierConfig,
}

impl ManagedPosition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        symbol: &str,
        side: Side,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        size: f64,
        entry_time: i64,
        config: TierConfig,
    ) -> Self {
        ManagedPosition {
            id,
            symbol: symbol.to_string(),
            side,
            entry_price,
            entry_time,
            stop_loss,
            take_profit,
            original_size: size,
            remaining_size: size,
            current_price: entry_price,
            highest_price: entry_price,
            lowest_price: entry_price,
            max_profit: 0.0,
            max_profit_pct: 0.0,
            tier1_activated: false,
            tier1_activation_price: 0.0,
            tier1_activation_time: 0,
            tier2_activated: false,
            tier2_activation_price: 0.0,
            tier2_activation_time: 0,
            tier2_exited_size: 0.0,
            tier2_exited_profit: 0.0,
            tier3_activated: false,
            tier3_activation_price: 0.0,
            tier3_activation_time: 0,
            tier3_locked_profit: 0.0,
            first_profitable_time: None,
            time_in_profit_secs: 0.0,
            config,
        }
    }

    /// Track the new price: extremes, max profit, and the profit clock.
    /// `now` is Unix seconds.
    pub fn update_price(&mut self, price: f64, now: i64) {
        self.current_price = price;

        if price > self.highest_price {
            self.highest_price = price;
        }
        if price < self.lowest_price {
            self.lowest_price = price;
        }

        let (profit, profit_pct) = self.current_profit();
        if profit > self.max_profit {
            self.max_profit = profit;
            self.max_profit_pct = profit_pct;
        }

        // The profit clock starts the first time the position is profitable
        // and is only sampled while profitable; a dip into loss pauses the
        // sampling but does not reset the start.
        if profit > 0.0 {
            let first = *self.first_profitable_time.get_or_insert(now);
            self.time_in_profit_secs = (now - first) as f64;
        }
    }

    /// Unrealized profit of the remaining size, in dollars and percent.
    pub fn current_profit(&self) -> (f64, f64) {
        if self.remaining_size <= 0.0 {
            return (0.0, 0.0);
        }
        let profit = match self.side {
            Side::Short => {
                (self.entry_price - self.current_price) * (self.remaining_size / self.entry_price)
            }
            Side::Long => {
                (self.current_price - self.entry_price) * (self.remaining_size / self.entry_price)
            }
        };
        let profit_pct = profit / self.remaining_size * 100.0;
        (profit, profit_pct)
    }

    pub fn current_profit_pct(&self) -> f64 {
        self.current_profit().1
    }

    /// Reduce the remaining size by `exit_percent` of itself and record the
    /// Tier 2 bookkeeping. Returns the profit of the exited slice.
    pub fn apply_partial_exit(&mut self, exit_percent: f64, exit_price: f64, now: i64) -> f64 {
        let exit_size = self.remaining_size * (exit_percent / 100.0);
        let exit_profit = match self.side {
            Side::Short => (self.entry_price - exit_price) * (exit_size / self.entry_price),
            Side::Long => (exit_price - self.entry_price) * (exit_size / self.entry_price),
        };

        self.remaining_size -= exit_size;
        self.tier2_exited_size = exit_size;
        self.tier2_exited_profit = exit_profit;
        self.tier2_activated = true;
        self.tier2_activation_time = now;
        self.tier2_activation_price = exit_price;

        exit_profit
    }

    /// Combined realized (Tier 2) and current unrealized profit.
    pub fn total_profit(&self) -> f64 {
        self.tier2_exited_profit + self.current_profit().0
    }
}
