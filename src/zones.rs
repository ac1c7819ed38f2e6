use crate::config::SrConfig;
use crate::types::{Candle, PivotPoint, SrZone, ZoneKind};

/// Full zone pipeline: pivots → one-touch zones → merge → strength filter →
/// polarity from the current close → ranked limit.
///
/// `atr` must be the Wilder ATR series aligned with `candles` (warm-up
/// entries sentinel-negative); pivots inside the warm-up are skipped.
pub fn find_zones(candles: &[Candle], atr: &[f64], config: &SrConfig) -> Vec<SrZone> {
    let pivot_highs = find_pivot_highs(candles, atr, config);
    let pivot_lows = find_pivot_lows(candles, atr, config);

    let mut zones: Vec<SrZone> = Vec::with_capacity(pivot_highs.len() + pivot_lows.len());
    for pivot in pivot_highs.iter().chain(pivot_lows.iter()) {
        zones.push(zone_from_pivot(pivot));
    }

    let merged = merge_zones(zones, config.align_zones);

    let mut significant: Vec<SrZone> = merged
        .into_iter()
        .filter(|z| z.strength >= config.min_strength)
        .collect();

    if let Some(last) = candles.last() {
        update_polarity(&mut significant, last.close);
        if config.max_zones > 0 && significant.len() > config.max_zones {
            significant = filter_top_zones(significant, last.close, config.max_zones);
        }
    }

    for zone in &significant {
        log::debug!(
            "zone {:?} level {:.4} [{:.4} - {:.4}] width {:.4} strength {} pivots {}",
            zone.kind,
            zone.level,
            zone.zone_bot,
            zone.zone_top,
            zone.range(),
            zone.strength,
            zone.pivot_count
        );
    }

    significant
}

/// Pivot high: `look_left` bars strictly before and `look_right` bars
/// strictly after must all have a strictly lower high. Requires a valid ATR
/// at the pivot bar to size the band.
pub fn find_pivot_highs(candles: &[Candle], atr: &[f64], config: &SrConfig) -> Vec<PivotPoint> {
    let mut pivots = Vec::new();
    if candles.len() <= config.look_left + config.look_right {
        return pivots;
    }

    for i in config.look_left..(candles.len() - config.look_right) {
        let high = candles[i].high;
        let left_ok = candles[i - config.look_left..i].iter().all(|c| c.high < high);
        if !left_ok {
            continue;
        }
        let right_ok = candles[i + 1..=i + config.look_right].iter().all(|c| c.high < high);
        if right_ok && atr[i] > 0.0 {
            pivots.push(make_pivot(candles, atr, i, high, true, config));
        }
    }
    pivots
}

/// Mirror of `find_pivot_highs` on lows.
pub fn find_pivot_lows(candles: &[Candle], atr: &[f64], config: &SrConfig) -> Vec<PivotPoint> {
    let mut pivots = Vec::new();
    if candles.len() <= config.look_left + config.look_right {
        return pivots;
    }

    for i in config.look_left..(candles.len() - config.look_right) {
        let low = candles[i].low;
        let left_ok = candles[i - config.look_left..i].iter().all(|c| c.low > low);
        if !left_ok {
            continue;
        }
        let right_ok = candles[i + 1..=i + config.look_right].iter().all(|c| c.low > low);
        if right_ok && atr[i] > 0.0 {
            pivots.push(make_pivot(candles, atr, i, low, false, config));
        }
    }
    pivots
}

fn make_pivot(
    candles: &[Candle],
    atr: &[f64],
    i: usize,
    price: f64,
    is_high: bool,
    config: &SrConfig,
) -> PivotPoint {
    // Band half-width from volatility, capped at a fraction of price so one
    // violent bar cannot blow the zone up.
    let max_zone_width = price * (config.max_zone_percent / 100.0);
    let band = (atr[i] * config.atr_multiplier).min(max_zone_width) / 2.0;

    PivotPoint {
        index: i,
        price,
        time: candles[i].open_time,
        is_high,
        atr: atr[i],
        zone_top: price + band,
        zone_bot: price - band,
    }
}

fn zone_from_pivot(pivot: &PivotPoint) -> SrZone {
    SrZone {
        level: pivot.price,
        zone_top: pivot.zone_top,
        zone_bot: pivot.zone_bot,
        strength: 1,
        kind: if pivot.is_high { ZoneKind::Resistance } else { ZoneKind::Support },
        first_touch: pivot.time,
        last_touch: pivot.time,
        pivot_count: 1,
        avg_atr: pivot.atr,
    }
}

/// Two zones overlap when either band edge falls strictly inside the other
/// band, checked symmetrically in both directions.
fn zones_overlap(a_top: f64, a_bot: f64, b_top: f64, b_bot: f64) -> bool {
    (b_top > a_bot && b_top < a_top)
        || (b_bot < a_top && b_bot > a_bot)
        || (b_top > a_top && b_bot < a_bot)
        || (b_bot > a_bot && b_top < a_top)
}

/// Destructive merge in detection order: each unconsumed zone becomes a base
/// and repeatedly absorbs every later overlapping zone; absorbed zones are
/// consumed and never act as a base themselves.
pub fn merge_zones(zones: Vec<SrZone>, align_zones: bool) -> Vec<SrZone> {
    if !align_zones || zones.is_empty() {
        return zones;
    }

    let mut merged: Vec<SrZone> = Vec::with_capacity(zones.len());
    let mut used = vec![false; zones.len()];

    for i in 0..zones.len() {
        if used[i] {
            continue;
        }
        let mut current = zones[i].clone();
        used[i] = true;

        for j in (i + 1)..zones.len() {
            if used[j] {
                continue;
            }
            let other = &zones[j];
            if zones_overlap(current.zone_top, current.zone_bot, other.zone_top, other.zone_bot) {
                absorb(&mut current, other);
                used[j] = true;
            }
        }

        merged.push(current);
    }

    merged
}

fn absorb(base: &mut SrZone, other: &SrZone) {
    let new_top = base.zone_top.max(other.zone_top);
    let new_bot = base.zone_bot.min(other.zone_bot);

    // Touch-count-weighted ATR mean, weighted by the pre-merge strengths.
    let total = (base.strength + other.strength) as f64;
    base.avg_atr =
        (base.avg_atr * base.strength as f64 + other.avg_atr * other.strength as f64) / total;

    base.zone_top = new_top;
    base.zone_bot = new_bot;
    base.level = (new_top + new_bot) / 2.0;
    base.strength += other.strength;
    base.pivot_count += other.pivot_count;
    base.first_touch = base.first_touch.min(other.first_touch);
    base.last_touch = base.last_touch.max(other.last_touch);
}

/// Reassign polarity from where price sits now: a zone entirely below price
/// acts as support, entirely above as resistance. A straddled zone keeps its
/// prior polarity.
pub fn update_polarity(zones: &mut [SrZone], current_price: f64) {
    for zone in zones {
        if current_price > zone.zone_top {
            zone.kind = ZoneKind::Support;
        } else if current_price < zone.zone_bot {
            zone.kind = ZoneKind::Resistance;
        }
    }
}

/// Keep the `max_zones` best by `strength*10 + max(0, 100 − distance %)`.
pub fn filter_top_zones(zones: Vec<SrZone>, current_price: f64, max_zones: usize) -> Vec<SrZone> {
    let mut scored: Vec<(f64, SrZone)> = zones
        .into_iter()
        .map(|zone| {
            let distance_pct = (zone.level - current_price).abs() / current_price * 100.0;
            let score = zone.strength as f64 * 10.0 + (100.0 - distance_pct).max(0.0);
            (score, zone)
        })
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(max_zones).map(|(_, z)| z).collect()
}
