//! Three-tier position protection.
//!
//! Tier 1 moves the stop to breakeven, Tier 2 harvests a partial exit,
//! Tier 3 trails a time-gated profit lock. Transitions are irreversible and
//! evaluated in strict order on every price update; side effects go through
//! the [`RiskLedger`] strategy so the manager never touches the portfolio
//! itself.

pub mod position;
pub mod tiers;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::TierConfig;
use crate::types::Side;

pub use position::ManagedPosition;
pub use tiers::{evaluate, TierAction};

/// The three capabilities the manager delegates to: moving a protective
/// stop, realizing a partial exit, and (optionally) closing a position.
pub trait RiskLedger: Send + Sync {
    fn update_stop(&self, symbol: &str, new_stop: f64) -> Result<(), String>;

    /// Returns the realized profit of the exited slice.
    fn partial_exit(&self, symbol: &str, exit_percent: f64, price: f64) -> Result<f64, String>;

    fn close_position(&self, symbol: &str, reason: &str) -> Result<(), String> {
        let _ = (symbol, reason);
        Ok(())
    }
}

#[derive(Debug)]
pub enum TradeError {
    NoPosition(String),
    StopUpdate { symbol: String, reason: String },
    PartialExit { symbol: String, reason: String },
}

impl std::fmt::Display for TradeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeError::NoPosition(symbol) => write!(f, "no active position for {}", symbol),
            TradeError::StopUpdate { symbol, reason } => {
                write!(f, "failed to update stop for {}: {}", symbol, reason)
            }
            TradeError::PartialExit { symbol, reason } => {
                write!(f, "failed to execute partial exit for {}: {}", symbol, reason)
            }
        }
    }
}

impl std::error::Error for TradeError {}

/// Per-symbol position table behind a single lock. The lock is held for one
/// read-modify-write (including the synchronous ledger callback), never
/// across a fetch or sleep, so tier evaluations for a symbol are strictly
/// sequential.
pub struct Manager {
    base_config: TierConfig,
    positions: Mutex<HashMap<String, ManagedPosition>>,
    ledger: Arc<dyn RiskLedger>,
}

impl Manager {
    pub fn new(base_config: TierConfig, ledger: Arc<dyn RiskLedger>) -> Self {
        Manager {
            base_config,
            positions: Mutex::new(HashMap::new()),
            ledger,
        }
    }

    /// Register a position with the base thresholds.
    #[allow(clippy::too_many_arguments)]
    pub fn add_position(
        &self,
        id: u64,
        symbol: &str,
        side: Side,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        size: f64,
        entry_time: i64,
    ) {
        self.insert(ManagedPosition::new(
            id,
            symbol,
            side,
            entry_price,
            stop_loss,
            take_profit,
            size,
            entry_time,
            self.base_config.clone(),
        ));
    }

    /// Register a position with thresholds derived from its actual stop
    /// distance, so tier spacing scales with how tight the stop is.
    #[allow(clippy::too_many_arguments)]
    pub fn add_position_adaptive(
        &self,
        id: u64,
        symbol: &str,
        side: Side,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        size: f64,
        entry_time: i64,
    ) {
        let sl_distance_pct = match side {
            Side::Short => (stop_loss - entry_price) / entry_price * 100.0,
            Side::Long => (entry_price - stop_loss) / entry_price * 100.0,
        };
        let config = self.base_config.adaptive(sl_distance_pct);
        log::info!(
            "[{}] adaptive tiers: BE {:.2}% | partial {:.2}% | min {:.2}% + {}s trail",
            symbol,
            config.tier1_breakeven_threshold,
            config.tier2_partial_exit_threshold,
            config.tier3_min_profit_threshold,
            config.tier3_time_threshold_secs
        );
        self.insert(ManagedPosition::new(
            id, symbol, side, entry_price, stop_loss, take_profit, size, entry_time, config,
        ));
    }

    fn insert(&self, pos: ManagedPosition) {
        let mut positions = self.positions.lock().unwrap();
        log::info!(
            "[{}] managing position #{} {} entry={:.4} sl={:.4} tp={:.4}",
            pos.symbol,
            pos.id,
            pos.side.as_str(),
            pos.entry_price,
            pos.stop_loss,
            pos.take_profit
        );
        positions.insert(pos.symbol.clone(), pos);
    }

    /// Feed a price update and execute at most one tier transition.
    ///
    /// Callbacks run before any bookkeeping mutates: on a callback error the
    /// stop, size and tier flags are untouched and the transition stays
    /// eligible for the next update.
    pub fn update_price(&self, symbol: &str, price: f64) -> Result<(), TradeError> {
        self.update_price_at(symbol, price, chrono::Utc::now().timestamp())
    }

    /// Clock-explicit variant of [`Manager::update_price`].
    pub fn update_price_at(&self, symbol: &str, price: f64, now: i64) -> Result<(), TradeError> {
        let mut positions = self.positions.lock().unwrap();
        let pos = positions
            .get_mut(symbol)
            .ok_or_else(|| TradeError::NoPosition(symbol.to_string()))?;

        pos.update_price(price, now);

        match tiers::evaluate(pos) {
            TierAction::MoveStop { new_stop, reason, tier } => {
                self.ledger
                    .update_stop(symbol, new_stop)
                    .map_err(|reason| TradeError::StopUpdate { symbol: symbol.to_string(), reason })?;

                let old_stop = pos.stop_loss;
                pos.stop_loss = new_stop;
                match tier {
                    1 => {
                        pos.tier1_activated = true;
                        pos.tier1_activation_price = pos.current_price;
                        pos.tier1_activation_time = now;
                    }
                    3 if !pos.tier3_activated => {
                        pos.tier3_activated = true;
                        pos.tier3_activation_price = pos.current_price;
                        pos.tier3_activation_time = now;
                        pos.tier3_locked_profit = pos.max_profit;
                    }
                    _ => {}
                }
                log::info!("[{}] {} | stop {:.4} -> {:.4}", symbol, reason, old_stop, new_stop);
            }
            TierAction::PartialExit { percent, new_stop, reason, tier: _ } => {
                let realized = self
                    .ledger
                    .partial_exit(symbol, percent, pos.current_price)
                    .map_err(|reason| TradeError::PartialExit { symbol: symbol.to_string(), reason })?;

                let price_now = pos.current_price;
                pos.apply_partial_exit(percent, price_now, now);
                pos.tier2_exited_profit = realized;

                self.ledger
                    .update_stop(symbol, new_stop)
                    .map_err(|reason| TradeError::StopUpdate { symbol: symbol.to_string(), reason })?;
                pos.stop_loss = new_stop;

                log::info!(
                    "[{}] {} | realized {:.4}, total {:+.4}, remaining size {:.2}",
                    symbol,
                    reason,
                    realized,
                    pos.total_profit(),
                    pos.remaining_size
                );
            }
            TierAction::None => {}
        }

        Ok(())
    }

    /// Drop a position from management (after it closes).
    pub fn remove_position(&self, symbol: &str) {
        let mut positions = self.positions.lock().unwrap();
        if positions.remove(symbol).is_some() {
            log::info!("[{}] removed from tier management", symbol);
        }
    }

    pub fn position(&self, symbol: &str) -> Option<ManagedPosition> {
        self.positions.lock().unwrap().get(symbol).cloned()
    }

    pub fn position_count(&self) -> usize {
        self.positions.lock().unwrap().len()
    }

    /// One status line per managed position.
    pub fn log_status(&self) {
        let positions = self.positions.lock().unwrap();
        let now = chrono::Utc::now().timestamp();
        for pos in positions.values() {
            let (profit, profit_pct) = pos.current_profit();
            log::info!(
                "[{}] #{} {} | open {:.0}m | P/L {:+.2} ({:+.2}%) | max {:+.2} ({:+.2}%) | tiers {}{}{} | in-profit {:.0}s",
                pos.symbol,
                pos.id,
                pos.side.as_str(),
                (now - pos.entry_time) as f64 / 60.0,
                profit,
                profit_pct,
                pos.max_profit,
                pos.max_profit_pct,
                if pos.tier1_activated { '1' } else { '-' },
                if pos.tier2_activated { '2' } else { '-' },
                if pos.tier3_activated { '3' } else { '-' },
                pos.time_in_profit_secs
            );
            if pos.tier1_activated {
                log::debug!(
                    "[{}] tier 1 locked breakeven @ {:.4} (t={})",
                    pos.symbol,
                    pos.tier1_activation_price,
                    pos.tier1_activation_time
                );
            }
            if pos.tier2_activated {
                log::debug!(
                    "[{}] tier 2 exited {:.2} of {:.2} @ {:.4} for {:+.4}",
                    pos.symbol,
                    pos.tier2_exited_size,
                    pos.original_size,
                    pos.tier2_activation_price,
                    pos.tier2_exited_profit
                );
            }
            if pos.tier3_activated {
                log::debug!(
                    "[{}] tier 3 locked {:+.2} since t={} (from {:.4})",
                    pos.symbol,
                    pos.tier3_locked_profit,
                    pos.tier3_activation_time,
                    pos.tier3_activation_price
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ledger that records calls and can be told to fail.
    #[derive(Default)]
    struct RecordingLedger {
        stops: Mutex<Vec<(String, f64)>>,
        exits: Mutex<Vec<(String, f64, f64)>>,
        fail_stops: std::sync::atomic::AtomicBool,
        fail_exits: std::sync::atomic::AtomicBool,
    }

    impl RiskLedger for RecordingLedger {
        fn update_stop(&self, symbol: &str, new_stop: f64) -> Result<(), String> {
            if self.fail_stops.load(std::sync::atomic::Ordering::SeqCst) {
                return Err("simulated exchange reject".into());
            }
            self.stops.lock().unwrap().push((symbol.to_string(), new_stop));
            Ok(())
        }

        fn partial_exit(&self, symbol: &str, exit_percent: f64, price: f64) -> Result<f64, String> {
            if self.fail_exits.load(std::sync::atomic::Ordering::SeqCst) {
                return Err("simulated exchange reject".into());
            }
            self.exits.lock().unwrap().push((symbol.to_string(), exit_percent, price));
            Ok(3.0)
        }
    }

    fn manager_with(config: TierConfig) -> (Manager, Arc<RecordingLedger>) {
        let ledger = Arc::new(RecordingLedger::default());
        (Manager::new(config, ledger.clone()), ledger)
    }

    #[test]
    fn breakeven_scenario_moves_stop_to_exactly_entry() {
        let (manager, ledger) = manager_with(TierConfig {
            tier1_breakeven_threshold: 0.5,
            ..TierConfig::default()
        });
        manager.add_position(1, "BTCUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0, 0);

        manager.update_price_at("BTCUSDT", 99.4, 10).unwrap(); // +0.6 %

        let pos = manager.position("BTCUSDT").unwrap();
        assert!(pos.tier1_activated);
        assert_eq!(pos.stop_loss, 100.0);
        assert_eq!(ledger.stops.lock().unwrap().as_slice(), &[("BTCUSDT".to_string(), 100.0)]);
    }

    #[test]
    fn tier_flags_stay_set_for_position_lifetime() {
        let (manager, _ledger) = manager_with(TierConfig {
            tier1_breakeven_threshold: 0.5,
            tier2_partial_exit_threshold: 50.0,
            ..TierConfig::default()
        });
        manager.add_position(1, "BTCUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0, 0);

        manager.update_price_at("BTCUSDT", 99.4, 10).unwrap();
        assert!(manager.position("BTCUSDT").unwrap().tier1_activated);

        // Profit evaporates; the flag must not.
        for (i, price) in [100.5, 101.0, 102.9].iter().enumerate() {
            manager.update_price_at("BTCUSDT", *price, 20 + i as i64).unwrap();
            assert!(manager.position("BTCUSDT").unwrap().tier1_activated);
        }
    }

    #[test]
    fn tier2_fires_once_and_reduces_size() {
        let (manager, ledger) = manager_with(TierConfig {
            tier1_breakeven_threshold: 0.3,
            tier2_partial_exit_threshold: 0.6,
            tier2_partial_exit_percent: 50.0,
            ..TierConfig::default()
        });
        manager.add_position(1, "ETHUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0, 0);

        manager.update_price_at("ETHUSDT", 99.6, 10).unwrap(); // tier 1
        manager.update_price_at("ETHUSDT", 99.2, 20).unwrap(); // tier 2

        let pos = manager.position("ETHUSDT").unwrap();
        assert!(pos.tier2_activated);
        assert!((pos.remaining_size - 500.0).abs() < 1e-9);
        assert_eq!(pos.tier2_exited_profit, 3.0); // the ledger's figure
        assert_eq!(ledger.exits.lock().unwrap().len(), 1);

        // Still above the threshold later: no second exit.
        manager.update_price_at("ETHUSDT", 99.0, 30).unwrap();
        assert_eq!(ledger.exits.lock().unwrap().len(), 1);
        let pos = manager.position("ETHUSDT").unwrap();
        assert!((pos.remaining_size - 500.0).abs() < 1e-9);
    }

    #[test]
    fn failed_stop_callback_leaves_state_untouched() {
        let (manager, ledger) = manager_with(TierConfig {
            tier1_breakeven_threshold: 0.5,
            ..TierConfig::default()
        });
        manager.add_position(1, "SOLUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0, 0);

        ledger.fail_stops.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = manager.update_price_at("SOLUSDT", 99.4, 10).unwrap_err();
        assert!(matches!(err, TradeError::StopUpdate { .. }));

        let pos = manager.position("SOLUSDT").unwrap();
        assert!(!pos.tier1_activated);
        assert_eq!(pos.stop_loss, 103.0);

        // Once the ledger recovers the same transition fires again.
        ledger.fail_stops.store(false, std::sync::atomic::Ordering::SeqCst);
        manager.update_price_at("SOLUSDT", 99.4, 20).unwrap();
        let pos = manager.position("SOLUSDT").unwrap();
        assert!(pos.tier1_activated);
        assert_eq!(pos.stop_loss, 100.0);
    }

    #[test]
    fn failed_partial_exit_keeps_size_and_flag() {
        let (manager, ledger) = manager_with(TierConfig {
            tier1_breakeven_threshold: 0.3,
            tier2_partial_exit_threshold: 0.6,
            ..TierConfig::default()
        });
        manager.add_position(1, "XRPUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0, 0);
        manager.update_price_at("XRPUSDT", 99.6, 10).unwrap(); // tier 1

        ledger.fail_exits.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = manager.update_price_at("XRPUSDT", 99.2, 20).unwrap_err();
        assert!(matches!(err, TradeError::PartialExit { .. }));

        let pos = manager.position("XRPUSDT").unwrap();
        assert!(!pos.tier2_activated);
        assert!((pos.remaining_size - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_symbol_is_an_error() {
        let (manager, _ledger) = manager_with(TierConfig::default());
        let err = manager.update_price_at("NOPEUSDT", 1.0, 0).unwrap_err();
        assert!(matches!(err, TradeError::NoPosition(_)));
    }

    #[test]
    fn adaptive_thresholds_follow_stop_distance() {
        let (manager, _ledger) = manager_with(TierConfig::default());
        // 3 % stop distance → tiers at 1.2 / 2.1 / 0.9 %.
        manager.add_position_adaptive(1, "BNBUSDT", Side::Short, 100.0, 103.0, 94.0, 1_000.0, 0);
        let pos = manager.position("BNBUSDT").unwrap();
        assert!((pos.config.tier1_breakeven_threshold - 1.2).abs() < 1e-9);
        assert!((pos.config.tier2_partial_exit_threshold - 2.1).abs() < 1e-9);
        assert!((pos.config.tier3_min_profit_threshold - 0.9).abs() < 1e-9);

        // +0.6 % is no longer enough to reach breakeven in adaptive mode.
        manager.update_price_at("BNBUSDT", 99.4, 10).unwrap();
        assert!(!manager.position("BNBUSDT").unwrap().tier1_activated);

        // +1.3 % is.
        manager.update_price_at("BNBUSDT", 98.7, 20).unwrap();
        assert!(manager.position("BNBUSDT").unwrap().tier1_activated);
    }
}
