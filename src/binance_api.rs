use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BINANCE_FUTURES_URL, BINANCE_SPOT_URL};
use crate::types::Candle;

// ── Error types ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum FetchError {
    /// Rate limited (HTTP 429, or 418 after repeated abuse). retry_after in seconds.
    RateLimit { retry_after: u64 },
    /// Transient error: network, timeout, HTTP 5xx.
    Transient(String),
    /// Permanent error: bad symbol/params, HTTP 4xx.
    Permanent(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::RateLimit { retry_after } => {
                write!(f, "rate limited (retry after {}s)", retry_after)
            }
            FetchError::Transient(msg) => write!(f, "transient error: {}", msg),
            FetchError::Permanent(msg) => write!(f, "permanent error: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

fn classify_status(status: u16, body: &str) -> FetchError {
    match status {
        429 | 418 => FetchError::RateLimit { retry_after: 10 },
        500..=599 => FetchError::Transient(format!("HTTP {}: {}", status, body)),
        _ => FetchError::Permanent(format!("HTTP {}: {}", status, body)),
    }
}

/// Generic retry wrapper with exponential backoff for transient failures and
/// fixed waits for rate limits. Permanent errors surface immediately.
async fn with_retry<F, Fut, T>(operation: F, max_retries: u32) -> Result<T, FetchError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut retries = 0;
    let mut delay: u64 = 1;
    loop {
        match operation().await {
            Ok(r) => return Ok(r),
            Err(FetchError::RateLimit { retry_after }) => {
                if retries >= max_retries {
                    return Err(FetchError::RateLimit { retry_after });
                }
                log::warn!(
                    "Rate limited — sleeping {}s (attempt {}/{})",
                    retry_after,
                    retries + 1,
                    max_retries
                );
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                retries += 1;
            }
            Err(FetchError::Transient(msg)) => {
                if retries >= max_retries {
                    return Err(FetchError::Transient(msg));
                }
                log::warn!(
                    "Transient error: {} — retry in {}s ({}/{})",
                    msg,
                    delay,
                    retries + 1,
                    max_retries
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
                delay = (delay * 2).min(60);
                retries += 1;
            }
            Err(e @ FetchError::Permanent(_)) => return Err(e),
        }
    }
}

// ── Candle source seam ────────────────────────────────────────────────────────

/// Market-data boundary the scheduler fans out over. Candles come back
/// ascending by open time; the caller checks length before indicator use.
#[async_trait]
pub trait CandleSource: Send + Sync {
    async fn fetch(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Candle>, FetchError>;
}

// ── Client ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    use_futures: bool,
}

impl BinanceClient {
    pub fn new(use_futures: bool) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("HTTP client build failed");

        let base_url = if use_futures { BINANCE_FUTURES_URL } else { BINANCE_SPOT_URL };
        BinanceClient { client, base_url: base_url.to_string(), use_futures }
    }

    fn klines_endpoint(&self) -> &'static str {
        if self.use_futures {
            "/fapi/v1/klines"
        } else {
            "/api/v3/klines"
        }
    }

    fn exchange_info_endpoint(&self) -> &'static str {
        if self.use_futures {
            "/fapi/v1/exchangeInfo"
        } else {
            "/api/v3/exchangeInfo"
        }
    }

    fn ticker_endpoint(&self) -> &'static str {
        if self.use_futures {
            "/fapi/v1/ticker/24hr"
        } else {
            "/api/v3/ticker/24hr"
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("HTTP error: {}", e)))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        resp.json()
            .await
            .map_err(|e| FetchError::Transient(format!("Parse error: {}", e)))
    }

    async fn fetch_klines_raw(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let url = format!(
            "{}{}?symbol={}&interval={}&limit={}",
            self.base_url,
            self.klines_endpoint(),
            symbol,
            interval,
            limit
        );
        let json = self.get_json(&url).await?;

        let rows = json
            .as_array()
            .ok_or_else(|| FetchError::Transient("klines: expected array payload".into()))?;

        // Rows are [openTime, open, high, low, close, volume, closeTime, …]
        // with prices as strings; already oldest-first.
        let candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| {
                let arr = row.as_array()?;
                if arr.len() < 7 {
                    return None;
                }
                let parse = |v: &serde_json::Value| v.as_str()?.parse::<f64>().ok();
                Some(Candle {
                    open_time: arr[0].as_i64()?,
                    open: parse(&arr[1])?,
                    high: parse(&arr[2])?,
                    low: parse(&arr[3])?,
                    close: parse(&arr[4])?,
                    volume: parse(&arr[5])?,
                    close_time: arr[6].as_i64()?,
                })
            })
            .collect();

        Ok(candles)
    }

    /// Fetch the last `limit` klines for a symbol, with retry.
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let s = self.clone();
        let sym = symbol.to_string();
        let iv = interval.to_string();
        with_retry(
            || {
                let s = s.clone();
                let sym = sym.clone();
                let iv = iv.clone();
                async move { s.fetch_klines_raw(&sym, &iv, limit).await }
            },
            3,
        )
        .await
    }

    /// All actively trading USDT-quoted symbols, sorted alphabetically.
    pub async fn exchange_symbols(&self) -> Result<Vec<String>, FetchError> {
        let url = format!("{}{}", self.base_url, self.exchange_info_endpoint());
        let json = self.get_json(&url).await?;

        let list = json["symbols"]
            .as_array()
            .ok_or_else(|| FetchError::Permanent("exchangeInfo: missing symbols".into()))?;

        let mut symbols: Vec<String> = list
            .iter()
            .filter_map(|item| {
                let symbol = item["symbol"].as_str()?;
                let status = item["status"].as_str()?;
                let quote = item["quoteAsset"].as_str()?;
                if status == "TRADING" && quote == "USDT" {
                    Some(symbol.to_string())
                } else {
                    None
                }
            })
            .collect();
        symbols.sort();
        Ok(symbols)
    }

    /// Top `limit` USDT symbols ranked by 24 h quote volume.
    pub async fn top_symbols_by_volume(&self, limit: usize) -> Result<Vec<String>, FetchError> {
        let url = format!("{}{}", self.base_url, self.ticker_endpoint());
        let json = self.get_json(&url).await?;

        let tickers = json
            .as_array()
            .ok_or_else(|| FetchError::Permanent("ticker/24hr: expected array".into()))?;

        let mut ranked: Vec<(String, f64)> = tickers
            .iter()
            .filter_map(|t| {
                let symbol = t["symbol"].as_str()?;
                if !symbol.ends_with("USDT") {
                    return None;
                }
                let volume: f64 = t["quoteVolume"].as_str()?.parse().ok()?;
                Some((symbol.to_string(), volume))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked.into_iter().take(limit).map(|(s, _)| s).collect())
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.fetch_klines(symbol, interval, limit).await
    }
}
