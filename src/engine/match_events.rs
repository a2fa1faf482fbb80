//! The match-event bus and its CSV writer thread.
//!
//! Events fan out over a single `tokio::sync::mpsc::UnboundedSender` since
//! the engine has exactly one subscriber, the CSV writer: a plain
//! `std::thread` drains a second, OS-thread-local queue and writes rows
//! with the `csv` crate, keeping disk I/O off the event loop.

use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tracing::info;

use crate::engine::error::StartupError;
use crate::engine::types::{Instrument, Lifespan, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchEventOperation {
    Amend,
    Cancel,
    Insert,
    Hedge,
    Trade,
}

impl MatchEventOperation {
    fn name(self) -> &'static str {
        match self {
            MatchEventOperation::Amend => "Amend",
            MatchEventOperation::Cancel => "Cancel",
            MatchEventOperation::Insert => "Insert",
            MatchEventOperation::Hedge => "Hedge",
            MatchEventOperation::Trade => "Trade",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub time: f64,
    pub competitor: String,
    pub operation: MatchEventOperation,
    pub order_id: u32,
    pub instrument: Option<Instrument>,
    pub side: Option<Side>,
    pub volume: i64,
    pub price: Option<f64>,
    pub lifespan: Option<Lifespan>,
    pub fee: Option<i64>,
}

impl MatchEvent {
    fn as_row(&self) -> [String; 10] {
        [
            format!("{:.6}", self.time),
            self.competitor.clone(),
            self.operation.name().to_string(),
            self.order_id.to_string(),
            self.instrument.map(|i| i.as_u8().to_string()).unwrap_or_default(),
            self.side.map(|s| s.as_ab().to_string()).unwrap_or_default(),
            self.volume.to_string(),
            self.price.map(|p| format!("{p}")).unwrap_or_default(),
            self.lifespan.map(|l| l.as_fg().to_string()).unwrap_or_default(),
            self.fee.map(|f| f.to_string()).unwrap_or_default(),
        ]
    }

    pub fn amend(now: f64, name: &str, order_id: u32, diff: i64) -> Self {
        MatchEvent {
            time: now,
            competitor: name.to_string(),
            operation: MatchEventOperation::Amend,
            order_id,
            instrument: None,
            side: None,
            volume: diff,
            price: None,
            lifespan: None,
            fee: None,
        }
    }

    pub fn cancel(now: f64, name: &str, order_id: u32, diff: i64) -> Self {
        MatchEvent {
            operation: MatchEventOperation::Cancel,
            ..MatchEvent::amend(now, name, order_id, diff)
        }
    }

    pub fn fill(
        now: f64,
        name: &str,
        order_id: u32,
        instrument: Instrument,
        side: Side,
        price: u64,
        volume: u64,
        fee: i64,
    ) -> Self {
        MatchEvent {
            time: now,
            competitor: name.to_string(),
            operation: MatchEventOperation::Trade,
            order_id,
            instrument: Some(instrument),
            side: Some(side),
            volume: volume as i64,
            price: Some(price as f64),
            lifespan: None,
            fee: Some(fee),
        }
    }

    pub fn hedge(now: f64, name: &str, order_id: u32, instrument: Instrument, side: Side, price: f64, volume: u64) -> Self {
        MatchEvent {
            time: now,
            competitor: name.to_string(),
            operation: MatchEventOperation::Hedge,
            order_id,
            instrument: Some(instrument),
            side: Some(side),
            volume: volume as i64,
            price: Some(price),
            lifespan: None,
            fee: None,
        }
    }

    pub fn insert(
        now: f64,
        name: &str,
        order_id: u32,
        instrument: Instrument,
        side: Side,
        volume: u64,
        price: u64,
        lifespan: Lifespan,
    ) -> Self {
        MatchEvent {
            time: now,
            competitor: name.to_string(),
            operation: MatchEventOperation::Insert,
            order_id,
            instrument: Some(instrument),
            side: Some(side),
            volume: volume as i64,
            price: Some(price as f64),
            lifespan: Some(lifespan),
            fee: None,
        }
    }
}

/// A clearing house of match events: whoever generates events calls
/// `publish`, and the writer thread receives a clone over a
/// `std::sync::mpsc` channel.
#[derive(Clone)]
pub struct MatchEvents {
    sender: std_mpsc::Sender<MatchEvent>,
}

impl MatchEvents {
    pub fn publish(&self, event: MatchEvent) {
        let _ = self.sender.send(event);
    }
}

pub struct MatchEventsWriter {
    handle: Option<JoinHandle<usize>>,
}

impl MatchEventsWriter {
    /// Open `path` for writing and start the background writer thread.
    /// Returns the bus producers should publish to, plus the writer
    /// handle used to join on shutdown.
    pub fn start(path: PathBuf) -> Result<(MatchEvents, MatchEventsWriter), StartupError> {
        let file = std::fs::File::create(&path).map_err(StartupError::OutputPath)?;
        let (sender, receiver) = std_mpsc::channel::<MatchEvent>();

        let handle = std::thread::Builder::new()
            .name("match_events".into())
            .spawn(move || {
                let mut writer = csv::Writer::from_writer(file);
                writer
                    .write_record([
                        "Time", "Competitor", "Operation", "OrderId", "Instrument", "Side", "Volume", "Price",
                        "Lifespan", "Fee",
                    ])
                    .expect("write match events header");

                let mut count = 0usize;
                while let Ok(event) = receiver.recv() {
                    writer.write_record(event.as_row()).expect("write match event row");
                    count += 1;
                }
                writer.flush().expect("flush match events file");
                count
            })
            .expect("spawn match_events writer thread");

        Ok((MatchEvents { sender }, MatchEventsWriter { handle: Some(handle) }))
    }

    /// Block until the writer thread has drained and flushed, returning
    /// the number of events it processed. The bus must already have been
    /// dropped (or all senders dropped) so the channel closes.
    pub fn join(&mut self) -> usize {
        if let Some(handle) = self.handle.take() {
            let count = handle.join().expect("match_events writer thread panicked");
            info!(target: "match_events", count, "writer thread complete");
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
    fn writer_flushes_published_events_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("match_events.csv");

        let (bus, mut writer) = MatchEventsWriter::start(path.clone()).unwrap();
        bus.publish(MatchEvent::insert(1.0, "Alice", 1, Instrument::Etf, Side::Buy, 10, 100, Lifespan::GoodForDay));
        drop(bus);
        let count = writer.join();
        assert_eq!(count, 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Alice"));
        assert!(contents.contains("Insert"));
    }
}
