use crate::types::{BearishDivergence, Candle, DivergenceStrength};

const STRENGTH_HIGH: f64 = 10.0; // RSI drop % for a strong divergence
const STRENGTH_MEDIUM: f64 = 5.0;

/// A swing high at `i` requires the high to be the strict maximum across the
/// symmetric window `[i - lookback, i + lookback]`. Indices within `lookback`
/// of either boundary can never qualify.
fn is_swing_high(candles: &[Candle], i: usize, lookback: usize) -> bool {
    if i < lookback || i + lookback >= candles.len() {
        return false;
    }
    let high = candles[i].high;
    for b in (i - lookback)..=(i + lookback) {
        if b != i && candles[b].high >= high {
            return false;
        }
    }
    true
}

/// Walk the ordered swing highs (those with a valid RSI) and compare each
/// consecutive pair only: price higher but RSI lower emits a divergence.
pub fn find_bearish_divergences(
    candles: &[Candle],
    rsi: &[f64],
    swing_lookback: usize,
) -> Vec<BearishDivergence> {
    struct Swing {
        idx: usize,
        high: f64,
        rsi: f64,
    }

    let mut swings: Vec<Swing> = Vec::new();
    for i in 0..candles.len() {
        if is_swing_high(candles, i, swing_lookback) && rsi[i] > 0.0 {
            swings.push(Swing {
                idx: i,
                high: candles[i].high,
                rsi: rsi[i],
            });
        }
    }

    let mut divergences = Vec::new();
    for pair in swings.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.high > prev.high && cur.rsi < prev.rsi {
            divergences.push(BearishDivergence {
                start_idx: prev.idx,
                start_time: candles[prev.idx].open_time,
                start_price: prev.high,
                start_rsi: prev.rsi,
                end_idx: cur.idx,
                end_time: candles[cur.idx].open_time,
                end_price: cur.high,
                end_rsi: cur.rsi,
            });
        }
    }
    divergences
}

/// Display bucket from the percentage RSI drop between the two swing points.
/// Not used for signal gating.
pub fn strength(div: &BearishDivergence) -> DivergenceStrength {
    let rsi_drop_pct = (div.start_rsi - div.end_rsi) / div.start_rsi * 100.0;
    if rsi_drop_pct >= STRENGTH_HIGH {
        DivergenceStrength::Strong
    } else if rsi_drop_pct >= STRENGTH_MEDIUM {
        DivergenceStrength::Medium
    } else {
        DivergenceStrength::Weak
    }
}

/// Count divergences whose end swing falls inside the trailing window.
pub fn recent_count(divergences: &[BearishDivergence], now_ms: i64, window_hours: i64) -> usize {
    let window_ms = window_hours * 3_600_000;
    divergences
        .iter()
        .filter(|d| now_ms - d.end_time < window_ms)
        .count()
}
