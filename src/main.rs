mod binance_api;
mod config;
mod divergence;
mod indicators;
mod paper_trading;
mod scheduler;
mod signal;
mod trade_logger;
mod trade_manager;
mod types;
mod zones;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use binance_api::{BinanceClient, CandleSource};
use config::{
    ScanConfig, TierConfig, DEFAULT_INTERVAL, MAX_OPEN_POSITIONS, STARTING_BALANCE, TOP_SYMBOLS,
    TRADING_PAIRS,
};
use paper_trading::PaperEngine;
use trade_logger::TradeLogger;
use types::{Side, SymbolReport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let interval = std::env::var("SCAN_INTERVAL").unwrap_or_else(|_| DEFAULT_INTERVAL.to_string());
    let use_futures = env_flag("USE_FUTURES");
    let all_symbols = env_flag("ALL_SYMBOLS");

    let scan_config = ScanConfig { interval: interval.clone(), ..ScanConfig::default() };
    let client = BinanceClient::new(use_futures);

    // ── Determine the symbol universe ─────────────────────────────────────────
    let discovered = if all_symbols {
        client.exchange_symbols().await
    } else {
        client.top_symbols_by_volume(TOP_SYMBOLS).await
    };
    let symbols: Vec<String> = match discovered {
        Ok(list) if !list.is_empty() => {
            log::info!("Scanning {} USDT symbols", list.len());
            list
        }
        Ok(_) => {
            log::warn!("Symbol discovery returned nothing — falling back to default pairs");
            TRADING_PAIRS.iter().map(|s| s.to_string()).collect()
        }
        Err(e) => {
            log::warn!("Symbol discovery failed: {} — falling back to default pairs", e);
            TRADING_PAIRS.iter().map(|s| s.to_string()).collect()
        }
    };

    let logger = match TradeLogger::create(Path::new("logs/trade_logs"), "trades_all_symbols.csv") {
        Ok(l) => Some(l),
        Err(e) => {
            log::warn!("Failed to create trade logger: {} — trades will not persist", e);
            None
        }
    };

    let engine = PaperEngine::new(
        &interval,
        STARTING_BALANCE,
        MAX_OPEN_POSITIONS,
        TierConfig::default(),
        logger,
    );
    let source: Arc<dyn CandleSource> = Arc::new(client);

    log::info!(
        "divergence trader started — {} symbols | {} | balance {:.0} | {} position slots",
        symbols.len(),
        interval,
        STARTING_BALANCE,
        MAX_OPEN_POSITIONS
    );

    // ── Main loop: one scan per confirmed candle close ───────────────────────
    let mut scan_count: u64 = 0;
    loop {
        wait_for_candle_close(&interval).await;
        scan_count += 1;
        log::info!("Candle closed — scan #{}", scan_count);

        let reports = scheduler::scan_symbols(source.clone(), &symbols, &scan_config).await;

        // Current prices fall out of the scan itself; no second fetch pass.
        let prices: HashMap<String, f64> = reports
            .iter()
            .filter(|r| r.error.is_none() && r.last_close > 0.0)
            .map(|r| (r.symbol.clone(), r.last_close))
            .collect();

        engine.check_positions(&prices);

        let opened = open_from_signals(&engine, &reports, &scan_config);
        if opened > 0 {
            log::info!("Opened {} new position(s)", opened);
        }

        engine.log_summary(&prices);
    }
}

/// Act on the scan's composed signals: skip symbols that already carry a
/// position, enforce the risk/reward floor, one short per actionable report.
fn open_from_signals(engine: &PaperEngine, reports: &[SymbolReport], config: &ScanConfig) -> usize {
    let mut opened = 0;
    for report in reports {
        let Some(sig) = &report.signal else { continue };
        if engine.has_position(&report.symbol) {
            continue;
        }
        if sig.risk_reward < config.signal.min_risk_reward {
            log::info!(
                "[{}] signal skipped: R/R {:.2} below minimum {:.1}",
                report.symbol,
                sig.risk_reward,
                config.signal.min_risk_reward
            );
            continue;
        }

        log::info!(
            "[{}] SHORT signal: RSI {:.2}, {} divergence(s), R/R {:.2}",
            report.symbol,
            sig.rsi,
            sig.recent_divergences,
            sig.risk_reward
        );
        if engine.open_trade(
            &report.symbol,
            Side::Short,
            sig.entry_price,
            sig.stop_loss,
            sig.take_profit,
            engine.position_size(),
        ) {
            opened += 1;
        }
    }
    opened
}

/// Sleep until the current candle closes (UTC-aligned buckets), plus a small
/// grace so the closed candle is already queryable upstream.
async fn wait_for_candle_close(interval: &str) {
    let duration_ms = candle_duration(interval).as_millis() as i64;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let wait_ms = ms_until_next_close(now_ms, duration_ms) + 2_000;
    log::info!("Next {} candle closes in {:.1} min", interval, wait_ms as f64 / 60_000.0);
    tokio::time::sleep(Duration::from_millis(wait_ms as u64)).await;
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1" || v == "true").unwrap_or(false)
}

fn ms_until_next_close(now_ms: i64, duration_ms: i64) -> i64 {
    let next_close = (now_ms / duration_ms + 1) * duration_ms;
    next_close - now_ms
}

fn candle_duration(interval: &str) -> Duration {
    let secs: u64 = match interval {
        "1m" => 60,
        "3m" => 3 * 60,
        "5m" => 5 * 60,
        "15m" => 15 * 60,
        "30m" => 30 * 60,
        "1h" => 3_600,
        "2h" => 2 * 3_600,
        "4h" => 4 * 3_600,
        "6h" => 6 * 3_600,
        "8h" => 8 * 3_600,
        "12h" => 12 * 3_600,
        "1d" => 24 * 3_600,
        "3d" => 3 * 24 * 3_600,
        "1w" => 7 * 24 * 3_600,
        _ => 4 * 3_600,
    };
    Duration::from_secs(secs)
}
