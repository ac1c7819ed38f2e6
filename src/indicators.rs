use crate::types::Candle;

/// Warm-up sentinel. Entries before an indicator has enough history carry
/// this value, never a computed zero.
pub const INVALID: f64 = -1.0;

/// Wilder's RSI over close prices. The output is aligned 1:1 with the input;
/// indices below `period` are `INVALID`. Inputs shorter than `period + 1`
/// yield an all-sentinel series of the same length.
pub fn calc_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period + 1 {
        return vec![INVALID; closes.len()];
    }

    let mut rsi = vec![INVALID; closes.len()];

    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;
    for i in 1..=period {
        let diff = closes[i] - closes[i - 1];
        if diff > 0.0 {
            gain_sum += diff;
        } else {
            loss_sum -= diff;
        }
    }
    let mut avg_gain = gain_sum / period as f64;
    let mut avg_loss = loss_sum / period as f64;
    rsi[period] = rsi_value(avg_gain, avg_loss);

    for i in (period + 1)..closes.len() {
        let diff = closes[i] - closes[i - 1];
        let (gain, loss) = if diff > 0.0 { (diff, 0.0) } else { (0.0, -diff) };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        rsi[i] = rsi_value(avg_gain, avg_loss);
    }

    rsi
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Wilder's Average True Range. Same alignment and sentinel policy as
/// `calc_rsi`: the first valid value (a simple mean of the first `period`
/// true ranges) lands at index `period`.
pub fn calc_atr(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return vec![INVALID; candles.len()];
    }

    let mut atr = vec![INVALID; candles.len()];

    let mut true_ranges = vec![0.0; candles.len()];
    for i in 1..candles.len() {
        let c = &candles[i];
        let prev_close = candles[i - 1].close;
        true_ranges[i] = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
    }

    let seed: f64 = true_ranges[1..=period].iter().sum();
    atr[period] = seed / period as f64;

    for i in (period + 1)..candles.len() {
        atr[i] = (atr[i - 1] * (period - 1) as f64 + true_ranges[i]) / period as f64;
    }

    atr
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candles(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                open_time: i as i64 * 60_000,
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 100.0,
                close_time: (i + 1) as i64 * 60_000 - 1,
            })
            .collect()
    }

    #[test]
    fn rsi_length_matches_input_and_warmup_is_sentinel() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i % 7) as f64).collect();
        let rsi = calc_rsi(&closes, 14);
        assert_eq!(rsi.len(), closes.len());
        for value in &rsi[..14] {
            assert_eq!(*value, INVALID);
        }
        for value in &rsi[14..] {
            assert!(*value >= 0.0 && *value <= 100.0);
        }
    }

    #[test]
    fn rsi_short_input_is_all_sentinel() {
        // 5 closes with period 14: not enough history anywhere.
        let closes = [10.0, 10.5, 10.2, 10.8, 10.3];
        let rsi = calc_rsi(&closes, 14);
        assert_eq!(rsi.len(), 5);
        assert!(rsi.iter().all(|&v| v == INVALID));
    }

    #[test]
    fn rsi_zero_period_is_all_sentinel() {
        let closes = [10.0, 11.0, 12.0];
        assert!(calc_rsi(&closes, 0).iter().all(|&v| v == INVALID));
    }

    #[test]
    fn rsi_monotonic_rise_saturates_at_100() {
        // Strictly increasing closes: average loss is exactly zero at every
        // step, which must map to 100 rather than divide by zero.
        let closes: Vec<f64> = (0..50).map(|i| 100.0 + i as f64).collect();
        let rsi = calc_rsi(&closes, 14);
        for value in &rsi[14..] {
            assert_eq!(*value, 100.0);
        }
    }

    #[test]
    fn atr_valid_entries_are_non_negative() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 + ((i * 13) % 11) as f64).collect();
        let candles = make_candles(&closes);
        let atr = calc_atr(&candles, 30);
        assert_eq!(atr.len(), candles.len());
        for value in &atr[..30] {
            assert_eq!(*value, INVALID);
        }
        for value in &atr[30..] {
            assert!(*value >= 0.0);
        }
    }

    #[test]
    fn atr_seed_is_simple_mean_of_true_ranges() {
        // Flat closes with high-low spread 2.0 and no gaps: every TR is 2.0,
        // so the seed and all smoothed values are exactly 2.0.
        let candles = make_candles(&[50.0; 20]);
        let atr = calc_atr(&candles, 5);
        for value in &atr[5..] {
            assert!((value - 2.0).abs() < 1e-12);
        }
    }
}
