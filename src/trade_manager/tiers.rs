use crate::types::Side;

use super::position::ManagedPosition;

/// Next required transition for a position, recomputed from a snapshot on
/// every price update and never stored.
#[derive(Clone, Debug, PartialEq)]
pub enum TierAction {
    MoveStop { new_stop: f64, reason: String, tier: u8 },
    PartialExit { percent: f64, new_stop: f64, reason: String, tier: u8 },
    None,
}

/// Evaluate the tiers in strict 1 → 2 → 3 order and return the first action
/// that fires. An earlier tier firing short-circuits the later checks within
/// the same call.
pub fn evaluate(pos: &ManagedPosition) -> TierAction {
    if !pos.config.enabled {
        return TierAction::None;
    }

    if !pos.tier1_activated {
        if let Some(action) = check_tier1(pos) {
            return action;
        }
    }

    if pos.tier1_activated && !pos.tier2_activated {
        if let Some(action) = check_tier2(pos) {
            return action;
        }
    }

    if pos.tier1_activated && !pos.tier3_activated {
        if let Some(action) = check_tier3(pos) {
            return action;
        }
    }

    if pos.tier3_activated {
        if let Some(action) = trail_tier3(pos) {
            return action;
        }
    }

    TierAction::None
}

/// Tier 1: move the stop to entry once profit reaches the threshold.
fn check_tier1(pos: &ManagedPosition) -> Option<TierAction> {
    let profit_pct = pos.current_profit_pct();
    if profit_pct >= pos.config.tier1_breakeven_threshold {
        return Some(TierAction::MoveStop {
            new_stop: pos.entry_price,
            reason: format!("Tier 1: breakeven lock at +{:.2}%", profit_pct),
            tier: 1,
        });
    }
    None
}

/// Tier 2: close a slice of the position, stop stays at breakeven. Only the
/// instantaneous observation crossing the threshold matters.
fn check_tier2(pos: &ManagedPosition) -> Option<TierAction> {
    let profit_pct = pos.current_profit_pct();
    if profit_pct >= pos.config.tier2_partial_exit_threshold {
        return Some(TierAction::PartialExit {
            percent: pos.config.tier2_partial_exit_percent,
            new_stop: pos.entry_price,
            reason: format!(
                "Tier 2: partial exit {:.0}% at +{:.2}%",
                pos.config.tier2_partial_exit_percent, profit_pct
            ),
            tier: 2,
        });
    }
    None
}

/// Tier 3 activation: enough profit for long enough moves the stop to the
/// lock price.
fn check_tier3(pos: &ManagedPosition) -> Option<TierAction> {
    let profit_pct = pos.current_profit_pct();
    if profit_pct >= pos.config.tier3_min_profit_threshold
        && pos.time_in_profit_secs >= pos.config.tier3_time_threshold_secs as f64
    {
        return Some(TierAction::MoveStop {
            new_stop: lock_price(pos),
            reason: format!(
                "Tier 3: time lock ({:.0}s in profit, locking {:.0}% of max {:.2}%)",
                pos.time_in_profit_secs,
                pos.config.tier3_profit_lock_percent,
                pos.max_profit_pct
            ),
            tier: 3,
        });
    }
    None
}

/// Tier 3 trailing: recompute the lock from the running best excursion and
/// move the stop only if strictly more protective than the current one.
fn trail_tier3(pos: &ManagedPosition) -> Option<TierAction> {
    let new_lock = lock_price(pos);
    let tightens = match pos.side {
        Side::Short => new_lock < pos.stop_loss,
        Side::Long => new_lock > pos.stop_loss,
    };
    if tightens {
        return Some(TierAction::MoveStop {
            new_stop: new_lock,
            reason: format!(
                "Tier 3: trail update (locking {:.0}% of max {:.2}%)",
                pos.config.tier3_profit_lock_percent, pos.max_profit_pct
            ),
            tier: 3,
        });
    }
    None
}

/// Stop price that locks in the configured share of the favorable excursion
/// since entry.
fn lock_price(pos: &ManagedPosition) -> f64 {
    let lock = pos.config.tier3_profit_lock_percent / 100.0;
    match pos.side {
        Side::Short => {
            let max_move = pos.entry_price - pos.lowest_price;
            pos.entry_price - max_move * lock
        }
        Side::Long => {
            let max_move = pos.highest_price - pos.entry_price;
            pos.entry_price + max_move * lock
        }
    }
}
