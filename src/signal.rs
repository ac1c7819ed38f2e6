use crate::config::SignalConfig;
use crate::divergence;
use crate::types::{BearishDivergence, SrZone, TradeSignal};

/// Compose a short setup from the latest close, the latest RSI, the zone set
/// and the trailing divergence count. Returns `None` when the entry gates
/// (recent divergences + overbought RSI) are not met; the returned signal
/// still has to pass the caller's risk/reward gate before it is acted on.
pub fn compose_short_signal(
    current_price: f64,
    current_rsi: f64,
    zones: &[SrZone],
    divergences: &[BearishDivergence],
    now_ms: i64,
    config: &SignalConfig,
) -> Option<TradeSignal> {
    let recent = divergence::recent_count(divergences, now_ms, config.divergence_window_hours);
    if recent < config.min_divergences || current_rsi <= config.overbought_rsi {
        return None;
    }

    let fallback_stop = current_price * (1.0 + config.stop_loss_percent / 100.0);
    let fallback_target = current_price * (1.0 - config.take_profit_percent / 100.0);

    let mut stop_loss = match nearest_resistance(zones, current_price) {
        Some(zone) => zone.zone_top,
        None => fallback_stop,
    };
    let mut take_profit = match nearest_support(zones, current_price) {
        Some(zone) => zone.zone_bot,
        None => fallback_target,
    };

    // A zone-derived level on the wrong side of entry would invert the trade;
    // fall back to the fixed-percent level instead.
    if stop_loss <= current_price {
        log::warn!(
            "stop {:.4} at or below entry {:.4} for a short, using fixed fallback",
            stop_loss,
            current_price
        );
        stop_loss = fallback_stop;
    }
    if take_profit >= current_price {
        log::warn!(
            "target {:.4} at or above entry {:.4} for a short, using fixed fallback",
            take_profit,
            current_price
        );
        take_profit = fallback_target;
    }

    let risk = stop_loss - current_price;
    let reward = current_price - take_profit;
    let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

    Some(TradeSignal {
        entry_price: current_price,
        stop_loss,
        take_profit,
        risk_reward,
        recent_divergences: recent,
        rsi: current_rsi,
        timestamp: now_ms,
    })
}

/// Closest zone whose level sits above the current price.
pub fn nearest_resistance<'a>(zones: &'a [SrZone], price: f64) -> Option<&'a SrZone> {
    zones
        .iter()
        .filter(|z| z.level > price)
        .min_by(|a, b| {
            (a.level - price)
                .partial_cmp(&(b.level - price))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Closest zone whose level sits below the current price.
pub fn nearest_support<'a>(zones: &'a [SrZone], price: f64) -> Option<&'a SrZone> {
    zones
        .iter()
        .filter(|z| z.level < price)
        .min_by(|a, b| {
            (price - a.level)
                .partial_cmp(&(price - b.level))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
