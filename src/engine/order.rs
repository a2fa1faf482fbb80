//! A single resting or transient order, and the callback trait the book
//! uses to notify its owner of fills, amends, cancels and placement.

use crate::engine::types::{Instrument, Lifespan, Side};

/// Callback interface implemented by whoever owns an order (normally a
/// competitor) so the book can report back what happened to it.
///
/// Default (no-op) methods let implementers override only the events
/// they care about.
pub trait OrderListener {
    fn on_order_placed(&mut self, _now: f64, _order: &Order) {}
    fn on_order_amended(&mut self, _now: f64, _order: &Order, _volume_removed: u64) {}
    fn on_order_cancelled(&mut self, _now: f64, _order: &Order, _volume_removed: u64) {}
    fn on_order_filled(&mut self, _now: f64, _order: &Order, _price: u64, _volume: u64, _fee: i64) {}
}

#[derive(Debug, Clone)]
pub struct Order {
    pub client_order_id: u32,
    pub instrument: Instrument,
    pub lifespan: Lifespan,
    pub side: Side,
    pub price: u64,
    pub volume: u64,
    pub remaining_volume: u64,
    pub total_fees: i64,
}

impl Order {
    pub fn new(
        client_order_id: u32,
        instrument: Instrument,
        lifespan: Lifespan,
        side: Side,
        price: u64,
        volume: u64,
    ) -> Self {
        Order {
            client_order_id,
            instrument,
            lifespan,
            side,
            price,
            volume,
            remaining_volume: volume,
            total_fees: 0,
        }
    }

    pub fn fill_volume(&self) -> u64 {
        self.volume - self.remaining_volume
    }

    pub fn is_active(&self) -> bool {
        self.remaining_volume > 0
    }
}
