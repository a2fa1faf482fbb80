//! Price-time priority limit order book for a single instrument.
//!
//! The whole book runs on one cooperative event loop thread, so price
//! levels live in an ordinary `BTreeMap<u64, PriceLevel>` rather than a
//! concurrent map: it gives ordered-by-price iteration for top-of-book
//! with no locking overhead, since there's never more than one caller.
//! Resting orders are shared via `Rc<RefCell<Order>>` between the level's
//! queue and whoever needs to amend or cancel them by client order id.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::{Rc, Weak};

use crate::engine::order::{Order, OrderListener};
use crate::engine::types::{Instrument, Lifespan, Side, TOP_LEVEL_COUNT};

/// A resting order plus a weak handle back to whoever should be told
/// about fills, amends and cancels that happen to it.
pub struct RestingOrder {
    pub order: Order,
    pub listener: Weak<RefCell<dyn OrderListener>>,
}

pub type OrderHandle = Rc<RefCell<RestingOrder>>;

/// All resting orders at a single price, in time priority.
pub struct PriceLevel {
    orders: VecDeque<OrderHandle>,
    total_volume: u64,
}

impl PriceLevel {
    fn new() -> Self {
        PriceLevel {
            orders: VecDeque::new(),
            total_volume: 0,
        }
    }
}

/// Top-of-book snapshot: five price/volume pairs per side, zero-filled
/// past the available depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookLevels {
    pub ask_prices: [u64; TOP_LEVEL_COUNT],
    pub ask_volumes: [u64; TOP_LEVEL_COUNT],
    pub bid_prices: [u64; TOP_LEVEL_COUNT],
    pub bid_volumes: [u64; TOP_LEVEL_COUNT],
}

pub struct OrderBook {
    pub instrument: Instrument,
    pub maker_fee: f64,
    pub taker_fee: f64,

    asks: BTreeMap<u64, PriceLevel>,
    bids: BTreeMap<u64, PriceLevel>,
    ask_ticks: BTreeMap<u64, u64>,
    bid_ticks: BTreeMap<u64, u64>,
    last_traded_price: Option<u64>,
}

impl OrderBook {
    pub fn new(instrument: Instrument, maker_fee: f64, taker_fee: f64) -> Self {
        OrderBook {
            instrument,
            maker_fee,
            taker_fee,
            asks: BTreeMap::new(),
            bids: BTreeMap::new(),
            ask_ticks: BTreeMap::new(),
            bid_ticks: BTreeMap::new(),
            last_traded_price: None,
        }
    }

    pub fn last_traded_price(&self) -> Option<u64> {
        self.last_traded_price
    }

    pub fn midpoint_price(&self) -> Option<f64> {
        let best_bid = self.bids.keys().next_back()?;
        let best_ask = self.asks.keys().next()?;
        Some((*best_bid as f64 + *best_ask as f64) / 2.0)
    }

    pub fn best_bid(&self) -> Option<u64> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<u64> {
        self.asks.keys().next().copied()
    }

    /// Insert a new order, matching it against the opposite side first.
    /// A fill-and-kill order with volume left over after matching is
    /// cancelled rather than placed.
    pub fn insert(&mut self, now: f64, handle: OrderHandle) {
        let (side, price) = {
            let resting = handle.borrow();
            (resting.order.side, resting.order.price)
        };

        match side {
            Side::Sell => {
                if let Some(&best_bid) = self.bids.keys().next_back() {
                    if price <= best_bid {
                        self.trade_ask(now, &handle);
                    }
                }
            }
            Side::Buy => {
                if let Some(&best_ask) = self.asks.keys().next() {
                    if price >= best_ask {
                        self.trade_bid(now, &handle);
                    }
                }
            }
        }

        let (remaining, lifespan) = {
            let resting = handle.borrow();
            (resting.order.remaining_volume, resting.order.lifespan)
        };

        if remaining > 0 {
            if lifespan == Lifespan::FillAndKill {
                let mut resting = handle.borrow_mut();
                let removed = resting.order.remaining_volume;
                resting.order.remaining_volume = 0;
                if let Some(listener) = resting.listener.upgrade() {
                    listener.borrow_mut().on_order_cancelled(now, &resting.order, removed);
                }
            } else {
                self.place(now, handle.clone());
            }
        }
    }

    fn place(&mut self, now: f64, handle: OrderHandle) {
        let (price, side, volume) = {
            let resting = handle.borrow();
            (resting.order.price, resting.order.side, resting.order.remaining_volume)
        };

        let book_side = match side {
            Side::Sell => &mut self.asks,
            Side::Buy => &mut self.bids,
        };
        let level = book_side.entry(price).or_insert_with(PriceLevel::new);
        level.orders.push_back(handle.clone());
        level.total_volume += volume;

        let resting = handle.borrow();
        if let Some(listener) = resting.listener.upgrade() {
            listener.borrow_mut().on_order_placed(now, &resting.order);
        }
    }

    /// Decrease a resting order's volume. `new_volume` below the already
    /// filled volume is clamped up to the filled volume (an amend can
    /// never increase remaining volume or erase a fill).
    pub fn amend(&mut self, now: f64, handle: &OrderHandle, new_volume: u64) {
        let remaining = handle.borrow().order.remaining_volume;
        if remaining == 0 {
            return;
        }

        let (price, side, volume, fill_volume) = {
            let resting = handle.borrow();
            (
                resting.order.price,
                resting.order.side,
                resting.order.volume,
                resting.order.fill_volume(),
            )
        };
        let floor = fill_volume;
        let clamped_new_volume = if new_volume < floor { floor } else { new_volume };
        let diff = volume - clamped_new_volume;
        if diff == 0 {
            return;
        }

        self.remove_volume_from_level(price, diff, side);

        let mut resting = handle.borrow_mut();
        resting.order.volume -= diff;
        resting.order.remaining_volume -= diff;
        if let Some(listener) = resting.listener.upgrade() {
            listener.borrow_mut().on_order_amended(now, &resting.order, diff);
        }
    }

    pub fn cancel(&mut self, now: f64, handle: &OrderHandle) {
        let remaining = handle.borrow().order.remaining_volume;
        if remaining == 0 {
            return;
        }

        let (price, side) = {
            let resting = handle.borrow();
            (resting.order.price, resting.order.side)
        };
        self.remove_volume_from_level(price, remaining, side);

        let mut resting = handle.borrow_mut();
        resting.order.remaining_volume = 0;
        if let Some(listener) = resting.listener.upgrade() {
            listener.borrow_mut().on_order_cancelled(now, &resting.order, remaining);
        }
    }

    fn remove_volume_from_level(&mut self, price: u64, volume: u64, side: Side) {
        let book_side = match side {
            Side::Sell => &mut self.asks,
            Side::Buy => &mut self.bids,
        };
        let remove_level = match book_side.get_mut(&price) {
            Some(level) => {
                level.total_volume -= volume;
                level.total_volume == 0
            }
            None => return,
        };
        if remove_level {
            book_side.remove(&price);
        }
    }

    fn trade_ask(&mut self, now: f64, handle: &OrderHandle) {
        loop {
            let remaining = handle.borrow().order.remaining_volume;
            let price = handle.borrow().order.price;
            let best_bid = match self.bids.keys().next_back().copied() {
                Some(p) => p,
                None => break,
            };
            let level_volume = self.bids.get(&best_bid).map(|l| l.total_volume).unwrap_or(0);
            if remaining == 0 || best_bid < price || level_volume == 0 {
                break;
            }
            self.trade_level(now, handle, best_bid);
            let level_empty = self.bids.get(&best_bid).map(|l| l.total_volume == 0).unwrap_or(true);
            if level_empty {
                self.bids.remove(&best_bid);
            }
        }
    }

    fn trade_bid(&mut self, now: f64, handle: &OrderHandle) {
        loop {
            let remaining = handle.borrow().order.remaining_volume;
            let price = handle.borrow().order.price;
            let best_ask = match self.asks.keys().next().copied() {
                Some(p) => p,
                None => break,
            };
            let level_volume = self.asks.get(&best_ask).map(|l| l.total_volume).unwrap_or(0);
            if remaining == 0 || best_ask > price || level_volume == 0 {
                break;
            }
            self.trade_level(now, handle, best_ask);
            let level_empty = self.asks.get(&best_ask).map(|l| l.total_volume == 0).unwrap_or(true);
            if level_empty {
                self.asks.remove(&best_ask);
            }
        }
    }

    /// Match `handle` against resting orders at `best_price`, filling
    /// passive (resting) orders at the maker fee and the aggressor at the
    /// taker fee.
    fn trade_level(&mut self, now: f64, handle: &OrderHandle, best_price: u64) {
        let side = handle.borrow().order.side;
        let book_side = match side {
            Side::Buy => &mut self.asks,
            Side::Sell => &mut self.bids,
        };
        let level = match book_side.get_mut(&best_price) {
            Some(level) => level,
            None => return,
        };

        let mut remaining = handle.borrow().order.remaining_volume;
        let mut total_volume = level.total_volume;
        let starting_remaining = remaining;

        while remaining > 0 && total_volume > 0 {
            while level.orders.front().map(|o| o.borrow().order.remaining_volume == 0).unwrap_or(false) {
                level.orders.pop_front();
            }
            let passive = match level.orders.front() {
                Some(order) => order.clone(),
                None => break,
            };

            let passive_remaining = passive.borrow().order.remaining_volume;
            let volume = if remaining < passive_remaining { remaining } else { passive_remaining };
            let fee = (best_price as f64 * volume as f64 * self.maker_fee).round() as i64;

            total_volume -= volume;
            remaining -= volume;

            let mut passive_mut = passive.borrow_mut();
            passive_mut.order.remaining_volume -= volume;
            passive_mut.order.total_fees += fee;
            if let Some(listener) = passive_mut.listener.upgrade() {
                listener.borrow_mut().on_order_filled(now, &passive_mut.order, best_price, volume, fee);
            }
        }

        level.total_volume = total_volume;
        let traded_volume_at_this_level = starting_remaining - remaining;

        match side {
            Side::Buy => *self.ask_ticks.entry(best_price).or_insert(0) += traded_volume_at_this_level,
            Side::Sell => *self.bid_ticks.entry(best_price).or_insert(0) += traded_volume_at_this_level,
        }

        let fee = (best_price as f64 * traded_volume_at_this_level as f64 * self.taker_fee).round() as i64;
        let mut resting = handle.borrow_mut();
        resting.order.remaining_volume = remaining;
        resting.order.total_fees += fee;
        if let Some(listener) = resting.listener.upgrade() {
            listener.borrow_mut().on_order_filled(now, &resting.order, best_price, traded_volume_at_this_level, fee);
        }

        self.last_traded_price = Some(best_price);
    }

    /// Populate a top-of-book snapshot. Asks are nearest-first ascending,
    /// bids are nearest-first descending, matching `top_levels`.
    pub fn top_levels(&self) -> BookLevels {
        let mut out = BookLevels::default();

        for (i, (&price, level)) in self.asks.iter().take(TOP_LEVEL_COUNT).enumerate() {
            out.ask_prices[i] = price;
            out.ask_volumes[i] = level.total_volume;
        }
        for (i, (&price, level)) in self.bids.iter().rev().take(TOP_LEVEL_COUNT).enumerate() {
            out.bid_prices[i] = price;
            out.bid_volumes[i] = level.total_volume;
        }

        out
    }

    /// Return `true` and the accumulated trade ticks since the last call,
    /// clearing the accumulator, or `false` if nothing traded.
    pub fn trade_ticks(&mut self) -> Option<BookLevels> {
        if self.ask_ticks.is_empty() && self.bid_ticks.is_empty() {
            return None;
        }

        let mut out = BookLevels::default();
        for (i, (&price, &volume)) in self.ask_ticks.iter().take(TOP_LEVEL_COUNT).enumerate() {
            out.ask_prices[i] = price;
            out.ask_volumes[i] = volume;
        }
        for (i, (&price, &volume)) in self.bid_ticks.iter().rev().take(TOP_LEVEL_COUNT).enumerate() {
            out.bid_prices[i] = price;
            out.bid_volumes[i] = volume;
        }

        self.ask_ticks.clear();
        self.bid_ticks.clear();
        Some(out)
    }

    /// Return the volume that would trade and its floor-divided average
    /// price per lot for a hedge request, without mutating the book.
    /// `side` is the side of the requested trade (`Sell` walks bids,
    /// `Buy` walks asks), matching `try_trade`.
    pub fn try_trade(&self, side: Side, limit_price: u64, volume: u64) -> (u64, u64) {
        let mut total_volume = 0u64;
        let mut total_value = 0u64;

        match side {
            Side::Sell => {
                for (&price, level) in self.bids.iter().rev() {
                    if total_volume >= volume || price < limit_price {
                        break;
                    }
                    let available = level.total_volume;
                    let required = volume - total_volume;
                    let weight = if required <= available { required } else { available };
                    total_volume += weight;
                    total_value += weight * price;
                }
            }
            Side::Buy => {
                for (&price, level) in self.asks.iter() {
                    if total_volume >= volume || price > limit_price {
                        break;
                    }
                    let available = level.total_volume;
                    let required = volume - total_volume;
                    let weight = if required <= available { required } else { available };
                    total_volume += weight;
                    total_value += weight * price;
                }
            }
        }

        let average_price = if total_volume > 0 { total_value / total_volume } else { 0 };
        (total_volume, average_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Lifespan;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct RecordingListener {
        fills: Vec<(u64, u64, i64)>,
        placed: u32,
        cancelled: Vec<u64>,
    }

    impl OrderListener for RecordingListener {
        fn on_order_placed(&mut self, _now: f64, _order: &Order) {
            self.placed += 1;
        }
        fn on_order_cancelled(&mut self, _now: f64, _order: &Order, volume_removed: u64) {
            self.cancelled.push(volume_removed);
        }
        fn on_order_filled(&mut self, _now: f64, _order: &Order, price: u64, volume: u64, fee: i64) {
            self.fills.push((price, volume, fee));
        }
    }

    fn handle(
        id: u32,
        side: Side,
        price: u64,
        volume: u64,
        lifespan: Lifespan,
        listener: &Rc<RefCell<RecordingListener>>,
    ) -> OrderHandle {
        Rc::new(RefCell::new(RestingOrder {
            order: Order::new(id, Instrument::Etf, lifespan, side, price, volume),
            listener: Rc::downgrade(&(listener.clone() as Rc<RefCell<dyn OrderListener>>)),
        }))
    }

    #[test]
    fn resting_order_fills_against_crossing_aggressor() {
        let mut book = OrderBook::new(Instrument::Etf, 0.0, 0.0);
        let passive_listener = Rc::new(RefCell::new(RecordingListener::default()));
        let passive = handle(1, Side::Buy, 100, 10, Lifespan::GoodForDay, &passive_listener);
        book.insert(0.0, passive);

        let aggressor_listener = Rc::new(RefCell::new(RecordingListener::default()));
        let aggressor = handle(2, Side::Sell, 100, 4, Lifespan::FillAndKill, &aggressor_listener);
        book.insert(1.0, aggressor);

        assert_eq!(passive_listener.borrow().fills, vec![(100, 4, 0)]);
        assert_eq!(aggressor_listener.borrow().fills, vec![(100, 4, 0)]);
        assert_eq!(book.last_traded_price(), Some(100));
    }

    #[test]
    fn fill_and_kill_cancels_unfilled_remainder() {
        let mut book = OrderBook::new(Instrument::Etf, 0.0, 0.0);
        let listener = Rc::new(RefCell::new(RecordingListener::default()));
        let order = handle(1, Side::Buy, 100, 10, Lifespan::FillAndKill, &listener);
        book.insert(0.0, order);

        assert_eq!(listener.borrow().cancelled, vec![10]);
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn top_levels_reports_nearest_first_each_side() {
        let mut book = OrderBook::new(Instrument::Etf, 0.0, 0.0);
        let listener = Rc::new(RefCell::new(RecordingListener::default()));
        book.insert(0.0, handle(1, Side::Buy, 99, 5, Lifespan::GoodForDay, &listener));
        book.insert(0.0, handle(2, Side::Buy, 100, 5, Lifespan::GoodForDay, &listener));
        book.insert(0.0, handle(3, Side::Sell, 101, 5, Lifespan::GoodForDay, &listener));

        let levels = book.top_levels();
        assert_eq!(levels.bid_prices[0], 100);
        assert_eq!(levels.bid_prices[1], 99);
        assert_eq!(levels.ask_prices[0], 101);
    }

    #[test]
    fn try_trade_floor_divides_average_price() {
        let mut book = OrderBook::new(Instrument::Etf, 0.0, 0.0);
        let listener = Rc::new(RefCell::new(RecordingListener::default()));
        book.insert(0.0, handle(1, Side::Sell, 101, 5, Lifespan::GoodForDay, &listener));
        book.insert(0.0, handle(2, Side::Sell, 103, 5, Lifespan::GoodForDay, &listener));

        let (volume, average_price) = book.try_trade(Side::Buy, 110, 6);
        assert_eq!(volume, 6);
        assert_eq!(average_price, (5 * 101 + 1 * 103) / 6);
    }

    #[test]
    fn amend_clamps_new_volume_to_already_filled_volume() {
        let mut book = OrderBook::new(Instrument::Etf, 0.0, 0.0);
        let resting_listener = Rc::new(RefCell::new(RecordingListener::default()));
        let resting = handle(1, Side::Buy, 100, 10, Lifespan::GoodForDay, &resting_listener);
        book.insert(0.0, resting.clone());

        let aggressor_listener = Rc::new(RefCell::new(RecordingListener::default()));
        book.insert(
            1.0,
            handle(2, Side::Sell, 100, 4, Lifespan::FillAndKill, &aggressor_listener),
        );
        assert_eq!(resting.borrow().order.fill_volume(), 4);

        book.amend(2.0, &resting, 1);
        assert_eq!(resting.borrow().order.volume, 4);
        assert_eq!(resting.borrow().order.remaining_volume, 0);
    }
}
