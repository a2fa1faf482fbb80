//! Score-board CSV writer: one row per competitor tick, breach, or
//! disconnect.
//!
//! Mirrors the channel and writer-thread structure used by
//! [`crate::engine::match_events`].

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tracing::info;

use crate::engine::account::CompetitorAccount;
use crate::engine::error::StartupError;

#[derive(Debug, Clone)]
pub struct ScoreRecord {
    pub time: f64,
    pub team: String,
    pub operation: &'static str,
    pub buy_volume: u64,
    pub sell_volume: u64,
    pub etf_position: i64,
    pub future_position: i64,
    pub etf_price: Option<u64>,
    pub future_price: Option<u64>,
    pub total_fees: i64,
    pub balance: i64,
    pub profit_loss: i64,
    pub status: Option<String>,
}

impl ScoreRecord {
    fn as_row(&self) -> [String; 13] {
        [
            format!("{:.6}", self.time),
            self.team.clone(),
            self.operation.to_string(),
            self.buy_volume.to_string(),
            self.sell_volume.to_string(),
            self.etf_position.to_string(),
            self.future_position.to_string(),
            self.etf_price.map(|p| p.to_string()).unwrap_or_default(),
            self.future_price.map(|p| p.to_string()).unwrap_or_default(),
            self.total_fees.to_string(),
            self.balance.to_string(),
            self.profit_loss.to_string(),
            self.status.clone().unwrap_or_default(),
        ]
    }
}

#[derive(Clone)]
pub struct ScoreBoardWriter {
    sender: std_mpsc::Sender<ScoreRecord>,
}

impl ScoreBoardWriter {
    fn record(
        &self,
        time: f64,
        name: &str,
        operation: &'static str,
        account: &CompetitorAccount,
        etf_price: Option<u64>,
        future_price: Option<u64>,
        status: Option<String>,
    ) {
        let _ = self.sender.send(ScoreRecord {
            time,
            team: name.to_string(),
            operation,
            buy_volume: account.buy_volume,
            sell_volume: account.sell_volume,
            etf_position: account.etf_position,
            future_position: account.future_position,
            etf_price,
            future_price,
            total_fees: account.total_fees,
            balance: account.account_balance,
            profit_loss: account.profit_or_loss,
            status,
        });
    }

    pub fn breach(&self, now: f64, name: &str, account: &CompetitorAccount, etf_price: Option<u64>, future_price: Option<u64>) {
        self.record(now, name, "Breach", account, etf_price, future_price, None);
    }

    pub fn disconnect(&self, now: f64, name: &str, account: &CompetitorAccount, etf_price: Option<u64>, future_price: Option<u64>) {
        self.record(now, name, "Disconnect", account, etf_price, future_price, None);
    }

    pub fn tick(
        &self,
        now: f64,
        name: &str,
        account: &CompetitorAccount,
        etf_price: Option<u64>,
        future_price: Option<u64>,
        status: Option<String>,
    ) {
        self.record(now, name, "Tick", account, etf_price, future_price, status);
    }
}

pub struct ScoreBoardWriterHandle {
    handle: Option<JoinHandle<usize>>,
}

impl ScoreBoardWriterHandle {
    pub fn start(path: PathBuf) -> Result<(ScoreBoardWriter, ScoreBoardWriterHandle), StartupError> {
        let file = std::fs::File::create(&path).map_err(StartupError::OutputPath)?;
        let (sender, receiver) = std_mpsc::channel::<ScoreRecord>();

        let handle = std::thread::Builder::new()
            .name("score_board".into())
            .spawn(move || {
                let mut writer = csv::Writer::from_writer(file);
                writer
                    .write_record([
                        "Time",
                        "Team",
                        "Operation",
                        "BuyVolume",
                        "SellVolume",
                        "EtfPosition",
                        "FuturePosition",
                        "EtfPrice",
                        "FuturePrice",
                        "TotalFees",
                        "AccountBalance",
                        "ProfitOrLoss",
                        "Status",
                    ])
                    .expect("write score board header");

                let mut count = 0usize;
                while let Ok(record) = receiver.recv() {
                    writer.write_record(record.as_row()).expect("write score record row");
                    count += 1;
                }
                writer.flush().expect("flush score board file");
                count
            })
            .expect("spawn score_board writer thread");

        Ok((ScoreBoardWriter { sender }, ScoreBoardWriterHandle { handle: Some(handle) }))
    }

    pub fn join(&mut self) -> usize {
        if let Some(handle) = self.handle.take() {
            let count = handle.join().expect("score_board writer thread panicked");
            info!(target: "score_board", count, "writer thread complete");
            count
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_flushes_tick_records_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("score_board.csv");

        let (writer, mut handle) = ScoreBoardWriterHandle::start(path.clone()).unwrap();
        let account = CompetitorAccount::new(0.01, 0.002);
        writer.tick(1.0, "Alice", &account, Some(100), Some(100), Some("OK".into()));
        drop(writer);
        let count = handle.join();
        assert_eq!(count, 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Alice"));
        assert!(contents.contains("Tick"));
    }
}
