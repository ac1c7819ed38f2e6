use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};

use crate::types::PaperTrade;

const HEADERS: &[&str] = &[
    "Trade_ID",
    "Symbol",
    "Interval",
    "Side",
    "Entry_Time",
    "Entry_Price",
    "Exit_Time",
    "Exit_Price",
    "Stop_Loss",
    "Take_Profit",
    "Position_Size",
    "Status",
    "Profit_Loss",
    "Profit_Loss_Pct",
    "Risk_Reward",
    "Highest_Price",
    "Lowest_Price",
    "Max_Profit",
    "Max_Profit_Pct",
    "Give_Back",
    "Give_Back_Pct",
    "Duration_Minutes",
    "Logged_At",
];

/// Append-mode CSV sink for closed trades. One file for the whole symbol
/// universe; the header row is written only when the file is created.
pub struct TradeLogger {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl TradeLogger {
    pub fn create(dir: &Path, filename: &str) -> Result<Self, Box<dyn std::error::Error>> {
        fs::create_dir_all(dir)?;
        let path = dir.join(filename);
        let existed = path.exists();

        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if existed {
            log::info!("Appending to existing trade log: {}", path.display());
        } else {
            writer.write_record(HEADERS)?;
            writer.flush()?;
            log::info!("Created new trade log: {}", path.display());
        }

        Ok(TradeLogger { path, writer })
    }

    pub fn log_trade(&mut self, trade: &PaperTrade) -> Result<(), Box<dyn std::error::Error>> {
        let duration_minutes = (trade.exit_time - trade.entry_time) as f64 / 60.0;

        self.writer.write_record(&[
            trade.id.to_string(),
            trade.symbol.clone(),
            trade.interval.clone(),
            trade.side.as_str().to_string(),
            format_time(trade.entry_time),
            format!("{:.2}", trade.entry_price),
            format_time(trade.exit_time),
            format!("{:.2}", trade.exit_price),
            format!("{:.2}", trade.stop_loss),
            format!("{:.2}", trade.take_profit),
            format!("{:.2}", trade.size),
            trade.status.as_str().to_string(),
            format!("{:.2}", trade.profit_loss),
            format!("{:.2}", trade.profit_loss_pct),
            format!("{:.2}", trade.risk_reward),
            format!("{:.2}", trade.highest_price),
            format!("{:.2}", trade.lowest_price),
            format!("{:.2}", trade.max_profit),
            format!("{:.2}", trade.max_profit_pct),
            format!("{:.2}", trade.give_back()),
            format!("{:.2}", trade.give_back_pct()),
            format!("{:.2}", duration_minutes),
            format_time(Utc::now().timestamp()),
        ])?;

        // Flush per trade so a crash never loses a closed trade.
        self.writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn format_time(unix_secs: i64) -> String {
    match Utc.timestamp_opt(unix_secs, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => unix_secs.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, TradeStatus};

    fn sample_trade() -> PaperTrade {
        PaperTrade {
            id: 7,
            symbol: "BTCUSDT".to_string(),
            interval: "4h".to_string(),
            side: Side::Short,
            entry_price: 100.0,
            entry_time: 1_700_000_000,
            stop_loss: 103.0,
            take_profit: 94.0,
            size: 1_000.0,
            status: TradeStatus::ClosedTakeProfit,
            exit_price: 94.0,
            exit_time: 1_700_007_200,
            profit_loss: 60.0,
            profit_loss_pct: 6.0,
            risk_reward: 2.0,
            highest_price: 100.5,
            lowest_price: 93.8,
            max_profit: 62.0,
            max_profit_pct: 6.2,
        }
    }

    #[test]
    fn header_written_once_and_rows_append() {
        let dir = std::env::temp_dir().join(format!("dt_logger_test_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);

        {
            let mut logger = TradeLogger::create(&dir, "trades.csv").unwrap();
            logger.log_trade(&sample_trade()).unwrap();
        }
        {
            let mut logger = TradeLogger::create(&dir, "trades.csv").unwrap();
            logger.log_trade(&sample_trade()).unwrap();
        }

        let content = fs::read_to_string(dir.join("trades.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3); // one header + two trades
        assert!(lines[0].starts_with("Trade_ID,Symbol"));
        assert!(lines[1].contains("BTCUSDT"));
        assert!(lines[1].contains("CLOSED_TP"));
        // give back = 62 − 60
        assert!(lines[1].contains("2.00"));

        let _ = fs::remove_dir_all(&dir);
    }
}
