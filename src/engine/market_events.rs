//! Scripted market activity: a CSV file of pre-recorded order events for
//! both books, replayed against virtual time by a background reader
//! thread and applied to the books from the event loop.
//!
//! The reader thread blocks on a bounded `std::sync::mpsc::sync_channel`
//! (capacity 1024) so a slow consumer applies backpressure to the file
//! read instead of buffering the whole file in memory. Prices in the file
//! are given in dollars and scaled to integer cents on read.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use tracing::info;

use crate::engine::book::{OrderBook, OrderHandle, RestingOrder};
use crate::engine::error::StartupError;
use crate::engine::match_events::{MatchEvent, MatchEvents};
use crate::engine::order::{Order, OrderListener};
use crate::engine::types::{Instrument, Lifespan, Side};

pub const MARKET_EVENT_QUEUE_SIZE: usize = 1024;
pub const INPUT_SCALING: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketEventOperation {
    Amend,
    Cancel,
    Insert,
}

#[derive(Debug, Clone)]
pub struct MarketEvent {
    pub time: f64,
    pub instrument: Instrument,
    pub operation: MarketEventOperation,
    pub order_id: u32,
    pub side: Option<Side>,
    pub volume: i64,
    pub price: u64,
    pub lifespan: Option<Lifespan>,
}

fn parse_instrument(field: &str) -> Option<Instrument> {
    match field.trim() {
        "0" => Some(Instrument::Future),
        "1" => Some(Instrument::Etf),
        _ => None,
    }
}

fn parse_side(field: &str) -> Option<Side> {
    match field.trim() {
        "BUY" | "BID" => Some(Side::Buy),
        "SELL" | "ASK" => Some(Side::Sell),
        _ => None,
    }
}

fn parse_lifespan(field: &str) -> Option<Lifespan> {
    match field.trim() {
        "FILL_AND_KILL" => Some(Lifespan::FillAndKill),
        "GOOD_FOR_DAY" => Some(Lifespan::GoodForDay),
        _ => None,
    }
}

fn parse_operation(field: &str) -> Option<MarketEventOperation> {
    match field.trim() {
        "AMEND" => Some(MarketEventOperation::Amend),
        "CANCEL" => Some(MarketEventOperation::Cancel),
        "INSERT" => Some(MarketEventOperation::Insert),
        _ => None,
    }
}

fn parse_row(record: &csv::StringRecord) -> Option<MarketEvent> {
    let time: f64 = record.get(0)?.parse().ok()?;
    let instrument = parse_instrument(record.get(1)?)?;
    let operation = parse_operation(record.get(2)?)?;
    let order_id: u32 = record.get(3)?.parse().ok()?;
    let side_field = record.get(4).unwrap_or("");
    let side = if side_field.is_empty() { None } else { parse_side(side_field) };
    let volume_field = record.get(5).unwrap_or("");
    let volume: i64 = if volume_field.is_empty() {
        0
    } else {
        volume_field.parse::<f64>().ok()? as i64
    };
    let price_field = record.get(6).unwrap_or("");
    let price: u64 = if price_field.is_empty() {
        0
    } else {
        (price_field.parse::<f64>().ok()? * INPUT_SCALING) as u64
    };
    let lifespan_field = record.get(7).unwrap_or("");
    let lifespan = if lifespan_field.is_empty() { None } else { parse_lifespan(lifespan_field) };

    Some(MarketEvent {
        time,
        instrument,
        operation,
        order_id,
        side,
        volume,
        price,
        lifespan,
    })
}

/// Replays scripted market events against the future and ETF books as
/// virtual time advances. Lives on the event loop thread; owns its own
/// map of resting order handles so amends/cancels addressed by order id
/// can find the right `OrderHandle`.
pub struct MarketEventsReader {
    receiver: std_mpsc::Receiver<Option<MarketEvent>>,
    next_event: Option<MarketEvent>,
    future_orders: HashMap<u32, OrderHandle>,
    etf_orders: HashMap<u32, OrderHandle>,
    match_events: MatchEvents,
    done: bool,
    reader_thread: Option<JoinHandle<usize>>,
}

impl MarketEventsReader {
    pub fn start(path: PathBuf, match_events: MatchEvents) -> Result<Rc<RefCell<MarketEventsReader>>, StartupError> {
        let file = std::fs::File::open(&path).map_err(StartupError::MarketData)?;
        let (sender, receiver) = std_mpsc::sync_channel::<Option<MarketEvent>>(MARKET_EVENT_QUEUE_SIZE);

        let reader_thread = std::thread::Builder::new()
            .name("reader".into())
            .spawn(move || {
                let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
                let mut count = 0usize;
                for result in csv_reader.records() {
                    let record = match result {
                        Ok(record) => record,
                        Err(_) => continue,
                    };
                    if let Some(event) = parse_row(&record) {
                        if sender.send(Some(event)).is_err() {
                            break;
                        }
                        count += 1;
                    }
                }
                let _ = sender.send(None);
                count
            })
            .expect("spawn market_events reader thread");

        Ok(Rc::new(RefCell::new(MarketEventsReader {
            receiver,
            next_event: Some(MarketEvent {
                time: 0.0,
                instrument: Instrument::Future,
                operation: MarketEventOperation::Cancel,
                order_id: 0,
                side: Some(Side::Buy),
                volume: 0,
                price: 0,
                lifespan: Some(Lifespan::FillAndKill),
            }),
            future_orders: HashMap::new(),
            etf_orders: HashMap::new(),
            match_events,
            done: false,
            reader_thread: Some(reader_thread),
        })))
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn join(&mut self) -> usize {
        self.reader_thread.take().map(|h| h.join().unwrap_or(0)).unwrap_or(0)
    }

    /// Apply every scripted event whose time has come, given the current
    /// virtual elapsed time. Must run on the event-loop thread since it
    /// mutates the books directly.
    pub fn process_market_events(
        self_rc: &Rc<RefCell<MarketEventsReader>>,
        elapsed_time: f64,
        future_book: &mut OrderBook,
        etf_book: &mut OrderBook,
    ) {
        loop {
            let event = {
                let reader = self_rc.borrow();
                match &reader.next_event {
                    Some(evt) if evt.time < elapsed_time => evt.clone(),
                    _ => break,
                }
            };

            let book = if event.instrument == Instrument::Future { &mut *future_book } else { &mut *etf_book };

            match event.operation {
                MarketEventOperation::Insert => {
                    let side = event.side.expect("insert event missing side");
                    let lifespan = event.lifespan.expect("insert event missing lifespan");
                    let volume = event.volume.unsigned_abs();
                    let order = Order::new(event.order_id, event.instrument, lifespan, side, event.price, volume);
                    {
                        let reader = self_rc.borrow();
                        reader.match_events.publish(MatchEvent::insert(
                            event.time,
                            "",
                            event.order_id,
                            event.instrument,
                            side,
                            volume,
                            event.price,
                            lifespan,
                        ));
                    }
                    let handle: OrderHandle = Rc::new(RefCell::new(RestingOrder {
                        order,
                        listener: Rc::downgrade(&(self_rc.clone() as Rc<RefCell<dyn OrderListener>>)),
                    }));
                    {
                        let mut reader = self_rc.borrow_mut();
                        match event.instrument {
                            Instrument::Future => reader.future_orders.insert(event.order_id, handle.clone()),
                            Instrument::Etf => reader.etf_orders.insert(event.order_id, handle.clone()),
                        };
                    }
                    book.insert(event.time, handle);
                }
                MarketEventOperation::Cancel => {
                    let handle = self_rc.borrow().order_handle(event.instrument, event.order_id);
                    if let Some(handle) = handle {
                        book.cancel(event.time, &handle);
                    }
                }
                MarketEventOperation::Amend => {
                    if event.volume < 0 {
                        let handle = self_rc.borrow().order_handle(event.instrument, event.order_id);
                        if let Some(handle) = handle {
                            let current_volume = handle.borrow().order.volume;
                            let new_volume = (current_volume as i64 + event.volume).max(0) as u64;
                            book.amend(event.time, &handle, new_volume);
                        }
                    }
                }
            }

            let mut reader = self_rc.borrow_mut();
            reader.next_event = reader.receiver.try_recv().ok().flatten().or_else(|| reader.receiver.recv().ok().flatten());
            if reader.next_event.is_none() {
                reader.done = true;
                info!(target: "market_events", "reader thread complete");
                break;
            }
        }
    }
}

impl MarketEventsReader {
    fn order_handle(&self, instrument: Instrument, order_id: u32) -> Option<OrderHandle> {
        match instrument {
            Instrument::Future => self.future_orders.get(&order_id).cloned(),
            Instrument::Etf => self.etf_orders.get(&order_id).cloned(),
        }
    }
}

impl OrderListener for MarketEventsReader {
    fn on_order_placed(&mut self, _now: f64, order: &Order) {
        // Registered separately below since we only have `&Order`, not the handle.
        let _ = order;
    }

    fn on_order_amended(&mut self, now: f64, order: &Order, volume_removed: u64) {
        self.match_events
            .publish(MatchEvent::amend(now, "", order.client_order_id, -(volume_removed as i64)));
        if order.remaining_volume == 0 {
            match order.instrument {
                Instrument::Future => self.future_orders.remove(&order.client_order_id),
                Instrument::Etf => self.etf_orders.remove(&order.client_order_id),
            };
        }
    }

    fn on_order_cancelled(&mut self, now: f64, order: &Order, volume_removed: u64) {
        self.match_events
            .publish(MatchEvent::cancel(now, "", order.client_order_id, -(volume_removed as i64)));
        match order.instrument {
            Instrument::Future => self.future_orders.remove(&order.client_order_id),
            Instrument::Etf => self.etf_orders.remove(&order.client_order_id),
        };
    }

    fn on_order_filled(&mut self, _now: f64, order: &Order, _price: u64, _volume: u64, _fee: i64) {
        if order.remaining_volume == 0 {
            match order.instrument {
                Instrument::Future => self.future_orders.remove(&order.client_order_id),
                Instrument::Etf => self.etf_orders.remove(&order.client_order_id),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert_row_scaling_price_to_cents() {
        let record = csv::StringRecord::from(vec!["1.5", "1", "INSERT", "7", "BUY", "10", "1.23", "GOOD_FOR_DAY"]);
        let event = parse_row(&record).unwrap();
        assert_eq!(event.instrument, Instrument::Etf);
        assert_eq!(event.price, 123);
        assert_eq!(event.volume, 10);
    }

    #[test]
    fn parses_cancel_row_with_empty_optional_fields() {
        let record = csv::StringRecord::from(vec!["2.0", "0", "CANCEL", "3", "", "", "", ""]);
        let event = parse_row(&record).unwrap();
        assert_eq!(event.operation, MarketEventOperation::Cancel);
        assert_eq!(event.side, None);
    }
}
