use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Semaphore};

use crate::binance_api::{CandleSource, FetchError};
use crate::config::ScanConfig;
use crate::divergence;
use crate::indicators::{calc_atr, calc_rsi, INVALID};
use crate::signal;
use crate::types::{SymbolReport, TradeSignal};
use crate::zones;

struct Analysis {
    divergences: usize,
    zones: usize,
    current_rsi: f64,
    last_close: f64,
    signal: Option<TradeSignal>,
}

/// Fan one analysis task out per symbol, bounded by a counting admission
/// gate, and fan the reports back in over a channel that closes only after
/// every task has finished. A single symbol's failure becomes a per-report
/// error; the batch always completes. Report order is not meaningful.
pub async fn scan_symbols(
    source: Arc<dyn CandleSource>,
    symbols: &[String],
    config: &ScanConfig,
) -> Vec<SymbolReport> {
    let sem = Arc::new(Semaphore::new(config.num_workers));
    let (tx, mut rx) = mpsc::channel::<SymbolReport>(symbols.len().max(1));
    let now_ms = chrono::Utc::now().timestamp_millis();
    let started = Instant::now();

    let handles: Vec<_> = symbols
        .iter()
        .cloned()
        .map(|symbol| {
            let sem = sem.clone();
            let source = source.clone();
            let config = config.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                // Admission gate: bounds concurrent fetches against the
                // upstream rate limit.
                let _permit = sem.acquire().await.unwrap();
                let start = Instant::now();
                let report = match analyze_symbol(source.as_ref(), &symbol, &config, now_ms).await {
                    Ok(a) => SymbolReport {
                        symbol,
                        divergences: a.divergences,
                        zones: a.zones,
                        current_rsi: a.current_rsi,
                        last_close: a.last_close,
                        signal: a.signal,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        error: None,
                    },
                    Err(e) => SymbolReport {
                        symbol,
                        divergences: 0,
                        zones: 0,
                        current_rsi: INVALID,
                        last_close: 0.0,
                        signal: None,
                        elapsed_ms: start.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                    },
                };
                let _ = tx.send(report).await;
            })
        })
        .collect();

    // Every task owns a clone; once the last one finishes the channel closes
    // and the drain below terminates.
    drop(tx);

    let mut reports = Vec::with_capacity(symbols.len());
    while let Some(report) = rx.recv().await {
        match &report.error {
            Some(e) => log::warn!("[{}] scan failed: {}", report.symbol, e),
            None => log::debug!(
                "[{}] rsi={:.2} div={} zones={} ({} ms)",
                report.symbol,
                report.current_rsi,
                report.divergences,
                report.zones,
                report.elapsed_ms
            ),
        }
        reports.push(report);
    }
    join_all(handles).await;

    log::info!(
        "Scanned {} symbols in {:.2}s ({} with errors)",
        reports.len(),
        started.elapsed().as_secs_f64(),
        reports.iter().filter(|r| r.error.is_some()).count()
    );

    reports
}

/// Single-symbol pipeline: fetch → (RSI ∥ ATR) → (divergences ∥ zones) →
/// signal. The joins are the dependency fences: divergence detection waits
/// only on RSI, zone detection only on ATR.
async fn analyze_symbol(
    source: &dyn CandleSource,
    symbol: &str,
    config: &ScanConfig,
    now_ms: i64,
) -> Result<Analysis, FetchError> {
    let candles = source.fetch(symbol, &config.interval, config.limit).await?;
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    let (rsi, atr) = tokio::join!(
        async { calc_rsi(&closes, config.rsi_period) },
        async { calc_atr(&candles, config.sr.atr_length) },
    );

    let (divergences, sr_zones) = tokio::join!(
        async { divergence::find_bearish_divergences(&candles, &rsi, config.swing_lookback) },
        async { zones::find_zones(&candles, &atr, &config.sr) },
    );

    for div in &divergences {
        log::debug!(
            "[{}] {:?} divergence: price {:.2} -> {:.2} but rsi {:.2} -> {:.2}",
            symbol,
            divergence::strength(div),
            div.start_price,
            div.end_price,
            div.start_rsi,
            div.end_rsi
        );
    }

    let last_close = candles.last().map(|c| c.close).unwrap_or(0.0);
    let current_rsi = rsi.last().copied().unwrap_or(INVALID);

    // A sentinel RSI means not enough history; never feed it downstream.
    let signal = if current_rsi > 0.0 {
        signal::compose_short_signal(
            last_close,
            current_rsi,
            &sr_zones,
            &divergences,
            now_ms,
            &config.signal,
        )
    } else {
        None
    };

    Ok(Analysis {
        divergences: divergences.len(),
        zones: sr_zones.len(),
        current_rsi,
        last_close,
        signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Source that tracks how many fetches are in flight at once.
    struct CountingSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Self {
            CountingSource { in_flight: AtomicUsize::new(0), max_in_flight: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl CandleSource for CountingSource {
        async fn fetch(
            &self,
            symbol: &str,
            _interval: &str,
            _limit: usize,
        ) -> Result<Vec<Candle>, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if symbol.starts_with("BAD") {
                return Err(FetchError::Permanent("unknown symbol".into()));
            }

            let candles = (0..10)
                .map(|i| Candle {
                    open_time: i * 3_600_000,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0,
                    volume: 1.0,
                    close_time: (i + 1) * 3_600_000 - 1,
                })
                .collect();
            Ok(candles)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_fan_out_reports_every_symbol() {
        let source = Arc::new(CountingSource::new());
        let symbols: Vec<String> = (0..50)
            .map(|i| if i % 10 == 0 { format!("BAD{}", i) } else { format!("SYM{}USDT", i) })
            .collect();
        let config = ScanConfig { num_workers: 8, ..ScanConfig::default() };

        let reports = scan_symbols(source.clone(), &symbols, &config).await;

        assert_eq!(reports.len(), 50);
        assert!(source.max_in_flight.load(Ordering::SeqCst) <= 8);

        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        assert_eq!(failed, 5);
        // Failed symbols still carry their identity and an inert payload.
        for report in reports.iter().filter(|r| r.error.is_some()) {
            assert!(report.symbol.starts_with("BAD"));
            assert_eq!(report.divergences, 0);
            assert!(!report.has_signal());
        }
    }

    #[tokio::test]
    async fn short_history_yields_sentinel_rsi_and_no_signal() {
        let source = Arc::new(CountingSource::new());
        let symbols = vec!["SYM1USDT".to_string()];
        let config = ScanConfig { num_workers: 2, ..ScanConfig::default() };

        let reports = scan_symbols(source, &symbols, &config).await;
        assert_eq!(reports.len(), 1);
        // 10 candles with RSI period 14: warm-up never completes.
        assert_eq!(reports[0].current_rsi, INVALID);
        assert!(reports[0].signal.is_none());
        assert_eq!(reports[0].last_close, 100.0);
    }
}
