//! A competitor's live order book state machine: validates incoming
//! requests, tracks active orders/volume/position, and reacts to fills.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::info;

use crate::engine::account::{AccountFactory, CompetitorAccount};
use crate::engine::book::{OrderBook, OrderHandle, RestingOrder};
use crate::engine::config::LimitsConfig;
use crate::engine::error::{HardBreach, ValidationError};
use crate::engine::match_events::{MatchEvent, MatchEvents};
use crate::engine::order::{Order, OrderListener};
use crate::engine::score_board::ScoreBoardWriter;
use crate::engine::types::{Instrument, Lifespan, Side};
use crate::engine::unhedged_lots::UnhedgedLots;

/// What the competitor's execution connection needs to expose so
/// `Competitor` can reply to the auto-trader without depending on a
/// concrete transport. Implemented by the TCP connection wrapper in
/// [`crate::engine::execution`].
pub trait ExecutionSink {
    fn send_error(&mut self, client_order_id: u32, message: &str);
    fn send_hedge_filled(&mut self, client_order_id: u32, average_price: u64, volume: u64);
    fn send_order_filled(&mut self, client_order_id: u32, price: u64, volume: u64);
    fn send_order_status(&mut self, client_order_id: u32, fill_volume: u64, remaining_volume: u64, fees: i64);
    fn close(&mut self);
}

pub struct Competitor {
    pub name: String,
    pub account: CompetitorAccount,
    pub status: CompetitorStatus,
    active_volume: u64,
    active_volume_limit: u64,
    order_count_limit: u32,
    position_limit: i64,
    tick_size: i64,
    last_client_order_id: i64,
    orders: HashMap<u32, OrderHandle>,
    buy_prices: BTreeMap<u64, u32>,
    sell_prices: BTreeMap<u64, u32>,
    unhedged_etf_lots: UnhedgedLots,
    exec_connection: Option<Box<dyn ExecutionSink>>,
    match_events: MatchEvents,
    score_board: ScoreBoardWriter,
    /// Latest future-book mark (last traded price, refreshed on every
    /// timer tick and hedge), shared with every other competitor so that
    /// `on_order_filled` — a callback with no book reference of its own —
    /// can mark ETF fills to market the same way `on_hedge_message` does.
    future_mark: Rc<Cell<Option<u64>>>,
    /// Set once, right after construction, so the unhedged-lots breach
    /// timer (armed from inside a `&mut self` callback with no access to
    /// the owning `Rc`) can look itself back up when it fires.
    self_weak: std::rc::Weak<RefCell<Competitor>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompetitorStatus {
    Ok,
    Breach,
}

impl CompetitorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompetitorStatus::Ok => "OK",
            CompetitorStatus::Breach => "BREACH",
        }
    }
}

impl Competitor {
    pub fn new(
        name: String,
        account_factory: &AccountFactory,
        limits: &LimitsConfig,
        tick_size: f64,
        match_events: MatchEvents,
        score_board: ScoreBoardWriter,
        exec_connection: Box<dyn ExecutionSink>,
        future_mark: Rc<Cell<Option<u64>>>,
    ) -> Self {
        Competitor {
            name,
            account: account_factory.create(),
            status: CompetitorStatus::Ok,
            active_volume: 0,
            active_volume_limit: limits.active_volume_limit,
            order_count_limit: limits.active_order_count_limit,
            position_limit: limits.position_limit,
            tick_size: (tick_size * 100.0) as i64,
            last_client_order_id: -1,
            orders: HashMap::new(),
            buy_prices: BTreeMap::new(),
            sell_prices: BTreeMap::new(),
            unhedged_etf_lots: UnhedgedLots::new(),
            exec_connection: Some(exec_connection),
            match_events,
            score_board,
            future_mark,
            self_weak: std::rc::Weak::new(),
        }
    }

    fn send_error(&mut self, now: f64, client_order_id: u32, error: impl std::fmt::Display) {
        let message = error.to_string();
        if let Some(conn) = self.exec_connection.as_mut() {
            conn.send_error(client_order_id, &message);
        }
        info!(target: "competitor", name = %self.name, now, client_order_id, %message, "sent error message");
    }

    pub fn hard_breach(&mut self, now: f64, client_order_id: u32, breach: HardBreach, etf_price: Option<u64>, future_price: Option<u64>) {
        self.status = CompetitorStatus::Breach;
        self.send_error(now, client_order_id, breach);
        if let Some(conn) = self.exec_connection.as_mut() {
            conn.close();
        }
        self.score_board.breach(now, &self.name, &self.account, etf_price, future_price);
    }

    pub fn on_connection_lost(&mut self, now: f64, etf_book: &mut OrderBook, etf_price: Option<u64>, future_price: Option<u64>) {
        self.exec_connection = None;
        self.score_board.disconnect(now, &self.name, &self.account, etf_price, future_price);
        let handles: Vec<OrderHandle> = self.orders.values().cloned().collect();
        for handle in handles {
            etf_book.cancel(now, &handle);
        }
    }

    pub fn disconnect(&mut self, now: f64) {
        if let Some(conn) = self.exec_connection.as_mut() {
            info!(target: "competitor", name = %self.name, now, "closing execution channel");
            conn.close();
        }
    }

    fn remove_price(tree: &mut BTreeMap<u64, u32>, price: u64) {
        if let Some(count) = tree.get_mut(&price) {
            *count -= 1;
            if *count == 0 {
                tree.remove(&price);
            }
        }
    }

    fn forget_order(&mut self, client_order_id: u32, side: Side, price: u64) {
        self.orders.remove(&client_order_id);
        match side {
            Side::Buy => Self::remove_price(&mut self.buy_prices, price),
            Side::Sell => Self::remove_price(&mut self.sell_prices, price),
        }
    }

    /// Feed a position delta (ETF fill or future hedge) into the unhedged
    /// lots tracker, arming a breach timer if it pushes the competitor
    /// outside the hedged band. If the timer fires before being cancelled,
    /// it looks the competitor back up through `self_weak` and hard-breaches
    /// it directly.
    fn note_unhedged_delta(&mut self, delta: i64) {
        let name = self.name.clone();
        let self_weak = self.self_weak.clone();
        let relative_after = self.unhedged_etf_lots.relative_position() + delta;
        self.unhedged_etf_lots.apply_position_delta(delta, || {
            tokio::task::spawn_local(async move {
                tokio::time::sleep(crate::engine::unhedged_lots::UNHEDGED_LOTS_TIME_LIMIT).await;
                if let Some(competitor) = self_weak.upgrade() {
                    info!(target: "competitor", name = %name, "unhedged lots limit breach timer expired");
                    let mut this = competitor.borrow_mut();
                    this.hard_breach(
                        0.0,
                        0,
                        HardBreach::UnhedgedLotsLimitBreached {
                            unhedged: relative_after,
                            limit: crate::engine::unhedged_lots::MAX_UNHEDGED_LOTS,
                        },
                        None,
                        None,
                    );
                }
            })
        });
    }

    pub fn on_amend_message(&mut self, now: f64, client_order_id: u32, volume: u32, etf_book: &mut OrderBook) {
        if client_order_id as i64 > self.last_client_order_id {
            self.send_error(now, client_order_id, ValidationError::UnknownOrder { client_order_id });
            return;
        }

        if let Some(handle) = self.orders.get(&client_order_id).cloned() {
            let order_volume = handle.borrow().order.volume;
            if volume as u64 > order_volume {
                self.send_error(now, client_order_id, ValidationError::AmendVolumeIncrease { client_order_id });
            } else {
                etf_book.amend(now, &handle, volume as u64);
            }
        }
    }

    pub fn on_cancel_message(&mut self, now: f64, client_order_id: u32, etf_book: &mut OrderBook) {
        if client_order_id as i64 > self.last_client_order_id {
            self.send_error(now, client_order_id, ValidationError::UnknownOrder { client_order_id });
            return;
        }

        if let Some(handle) = self.orders.get(&client_order_id).cloned() {
            etf_book.cancel(now, &handle);
        }
    }

    pub fn on_hedge_message(
        &mut self,
        now: f64,
        client_order_id: u32,
        side: u8,
        price: u64,
        volume: u64,
        future_book: &OrderBook,
        etf_book: &OrderBook,
    ) {
        if client_order_id as i64 <= self.last_client_order_id {
            self.send_error(
                now,
                client_order_id,
                ValidationError::ClientOrderIdTooSmall { client_order_id, last_seen: self.last_client_order_id.max(0) as u32 },
            );
            return;
        }
        self.last_client_order_id = client_order_id as i64;

        let side = match Side::from_u8(side) {
            Some(side) => side,
            None => {
                self.send_error(now, client_order_id, format!("{side} is not a valid side"));
                return;
            }
        };

        if self.tick_size != 0 && price % self.tick_size as u64 != 0 {
            self.send_error(now, client_order_id, ValidationError::PriceNotOnTickSize { price, tick_size: self.tick_size as u64 });
            return;
        }
        if volume < 1 {
            self.send_error(now, client_order_id, ValidationError::VolumeZero);
            return;
        }
        if now == 0.0 {
            self.send_error(now, client_order_id, "order rejected: market not yet open");
            return;
        }

        let (volume_traded, average_price) = future_book.try_trade(side, price, volume);
        if volume_traded > 0 {
            let delta = if side == Side::Buy { volume_traded as i64 } else { -(volume_traded as i64) };
            self.note_unhedged_delta(delta);

            self.match_events.publish(MatchEvent::hedge(
                now,
                &self.name,
                client_order_id,
                Instrument::Future,
                side,
                average_price as f64,
                volume_traded,
            ));
            self.account.transact(Instrument::Future, side, average_price as f64, volume_traded, 0);
            let future_mark = future_book.last_traded_price().or_else(|| future_book.midpoint_price().map(|p| p.round() as u64));
            let etf_mark = etf_book.last_traded_price().or_else(|| etf_book.midpoint_price().map(|p| p.round() as u64));
            if let Some(mark) = future_mark {
                self.future_mark.set(Some(mark));
            }
            self.account.update(future_mark.unwrap_or(0) as i64, etf_mark.unwrap_or(0) as i64);
        }

        let future_position = self.account.future_position;
        if let Some(conn) = self.exec_connection.as_mut() {
            conn.send_hedge_filled(client_order_id, average_price, volume_traded);
            if !(-self.position_limit <= future_position && future_position <= self.position_limit) {
                self.hard_breach(
                    now,
                    client_order_id,
                    HardBreach::PositionLimitExceeded { position: future_position, limit: self.position_limit },
                    etf_book.last_traded_price(),
                    future_book.last_traded_price(),
                );
            }
        }
    }

    pub fn on_insert_message(
        self_rc: &Rc<RefCell<Competitor>>,
        now: f64,
        client_order_id: u32,
        side: u8,
        price: u64,
        volume: u64,
        lifespan: u8,
        etf_book: &mut OrderBook,
    ) {
        let mut this = self_rc.borrow_mut();

        if client_order_id as i64 <= this.last_client_order_id {
            this.send_error(
                now,
                client_order_id,
                ValidationError::ClientOrderIdTooSmall { client_order_id, last_seen: this.last_client_order_id.max(0) as u32 },
            );
            return;
        }
        this.last_client_order_id = client_order_id as i64;

        let side = match Side::from_u8(side) {
            Some(side) => side,
            None => {
                this.send_error(now, client_order_id, format!("{side} is not a valid side"));
                return;
            }
        };
        let lifespan = match Lifespan::from_u8(lifespan) {
            Some(lifespan) => lifespan,
            None => {
                this.send_error(now, client_order_id, format!("{lifespan} is not a valid lifespan"));
                return;
            }
        };
        if this.tick_size != 0 && price % this.tick_size as u64 != 0 {
            this.send_error(now, client_order_id, ValidationError::PriceNotOnTickSize { price, tick_size: this.tick_size as u64 });
            return;
        }
        if this.orders.len() as u32 == this.order_count_limit {
            this.send_error(now, client_order_id, "order rejected: active order count limit breached");
            return;
        }
        if volume < 1 {
            this.send_error(now, client_order_id, ValidationError::VolumeZero);
            return;
        }
        if this.active_volume + volume > this.active_volume_limit {
            this.send_error(now, client_order_id, "order rejected: active order volume limit breached");
            return;
        }
        if now == 0.0 {
            this.send_error(now, client_order_id, "order rejected: market not yet open");
            return;
        }

        let crosses = match side {
            Side::Buy => this.sell_prices.keys().next().map(|&min_sell| price >= min_sell).unwrap_or(false),
            Side::Sell => this.buy_prices.keys().next_back().map(|&max_buy| price <= max_buy).unwrap_or(false),
        };
        if crosses {
            this.send_error(now, client_order_id, "order rejected: in cross with an existing order");
            return;
        }

        let order = Order::new(client_order_id, Instrument::Etf, lifespan, side, price, volume);
        let handle: OrderHandle = Rc::new(RefCell::new(RestingOrder {
            order,
            listener: Rc::downgrade(&(self_rc.clone() as Rc<RefCell<dyn OrderListener>>)),
        }));
        this.orders.insert(client_order_id, handle.clone());
        match side {
            Side::Buy => *this.buy_prices.entry(price).or_insert(0) += 1,
            Side::Sell => *this.sell_prices.entry(price).or_insert(0) += 1,
        }
        this.match_events.publish(MatchEvent::insert(now, &this.name, client_order_id, Instrument::Etf, side, volume, price, lifespan));
        this.active_volume += volume;
        drop(this);

        etf_book.insert(now, handle);
    }

    pub fn on_timer_tick(&mut self, now: f64, future_price: Option<u64>, etf_price: Option<u64>) {
        self.account.update(future_price.unwrap_or(0) as i64, etf_price.unwrap_or(0) as i64);
        self.score_board.tick(now, &self.name, &self.account, etf_price, future_price, Some(self.status.as_str().to_string()));
    }
}

/// Owns every logged-in competitor, keyed by team name, and handles the
/// login handshake against the configured trader secrets.
pub struct CompetitorManager {
    account_factory: AccountFactory,
    limits: LimitsConfig,
    tick_size: f64,
    match_events: MatchEvents,
    score_board: ScoreBoardWriter,
    traders: HashMap<String, String>,
    competitors: HashMap<String, Rc<RefCell<Competitor>>>,
    future_mark: Rc<Cell<Option<u64>>>,
}

impl CompetitorManager {
    pub fn new(
        traders: HashMap<String, String>,
        account_factory: AccountFactory,
        limits: LimitsConfig,
        tick_size: f64,
        match_events: MatchEvents,
        score_board: ScoreBoardWriter,
    ) -> Self {
        CompetitorManager {
            account_factory,
            limits,
            tick_size,
            match_events,
            score_board,
            traders,
            competitors: HashMap::new(),
            future_mark: Rc::new(Cell::new(None)),
        }
    }

    /// Validate a login attempt's name/secret pair and, if it succeeds,
    /// construct and register a new `Competitor`. A name already logged in
    /// is rejected the same as an unknown one.
    pub fn login_competitor(&mut self, name: &str, secret: &str, exec_connection: Box<dyn ExecutionSink>) -> Option<Rc<RefCell<Competitor>>> {
        if self.competitors.contains_key(name) {
            return None;
        }
        match self.traders.get(name) {
            Some(expected_secret) if expected_secret == secret => {
                let competitor = Rc::new(RefCell::new(Competitor::new(
                    name.to_string(),
                    &self.account_factory,
                    &self.limits,
                    self.tick_size,
                    self.match_events.clone(),
                    self.score_board.clone(),
                    exec_connection,
                    self.future_mark.clone(),
                )));
                competitor.borrow_mut().self_weak = Rc::downgrade(&competitor);
                self.competitors.insert(name.to_string(), competitor.clone());
                Some(competitor)
            }
            _ => None,
        }
    }

    pub fn on_competitor_disconnect(&mut self, name: &str, now: f64, etf_book: &mut OrderBook, etf_price: Option<u64>, future_price: Option<u64>) {
        if let Some(competitor) = self.competitors.get(name) {
            competitor.borrow_mut().on_connection_lost(now, etf_book, etf_price, future_price);
        }
    }

    pub fn on_timer_tick(&mut self, now: f64, future_price: Option<u64>, etf_price: Option<u64>) {
        if let Some(mark) = future_price {
            self.future_mark.set(Some(mark));
        }
        for competitor in self.competitors.values() {
            competitor.borrow_mut().on_timer_tick(now, future_price, etf_price);
        }
    }

    pub fn get_competitors(&self) -> impl Iterator<Item = &Rc<RefCell<Competitor>>> {
        self.competitors.values()
    }

    pub fn get(&self, name: &str) -> Option<Rc<RefCell<Competitor>>> {
        self.competitors.get(name).cloned()
    }
}

impl OrderListener for Competitor {
    fn on_order_amended(&mut self, now: f64, order: &Order, volume_removed: u64) {
        if let Some(conn) = self.exec_connection.as_mut() {
            conn.send_order_status(order.client_order_id, order.fill_volume(), order.remaining_volume, order.total_fees);
        }
        self.match_events
            .publish(MatchEvent::amend(now, &self.name, order.client_order_id, -(volume_removed as i64)));
        self.active_volume -= volume_removed;

        if order.remaining_volume == 0 {
            self.forget_order(order.client_order_id, order.side, order.price);
        }
    }

    fn on_order_cancelled(&mut self, now: f64, order: &Order, volume_removed: u64) {
        if let Some(conn) = self.exec_connection.as_mut() {
            conn.send_order_status(order.client_order_id, order.volume - volume_removed, order.remaining_volume, order.total_fees);
        }
        self.match_events
            .publish(MatchEvent::cancel(now, &self.name, order.client_order_id, -(volume_removed as i64)));
        self.active_volume -= volume_removed;
        self.forget_order(order.client_order_id, order.side, order.price);
    }

    fn on_order_placed(&mut self, _now: f64, order: &Order) {
        if order.volume == order.remaining_volume {
            if let Some(conn) = self.exec_connection.as_mut() {
                conn.send_order_status(order.client_order_id, 0, order.remaining_volume, order.total_fees);
            }
        }
    }

    fn on_order_filled(&mut self, now: f64, order: &Order, price: u64, volume: u64, fee: i64) {
        self.active_volume -= volume;

        if order.remaining_volume == 0 {
            self.forget_order(order.client_order_id, order.side, order.price);
        }

        let delta = if order.side == Side::Buy { volume as i64 } else { -(volume as i64) };
        self.note_unhedged_delta(delta);

        self.match_events
            .publish(MatchEvent::fill(now, &self.name, order.client_order_id, order.instrument, order.side, price, volume, fee));

        self.account.transact(Instrument::Etf, order.side, price as f64, volume, fee);
        let future_mark = self.future_mark.get().unwrap_or(0) as i64;
        self.account.update(future_mark, price as i64);

        if let Some(conn) = self.exec_connection.as_mut() {
            conn.send_order_filled(order.client_order_id, price, volume);
            conn.send_order_status(order.client_order_id, order.fill_volume(), order.remaining_volume, order.total_fees);
        }

        let etf_position = self.account.etf_position;
        if !(-self.position_limit <= etf_position && etf_position <= self.position_limit) {
            self.hard_breach(
                now,
                order.client_order_id,
                HardBreach::PositionLimitExceeded { position: etf_position, limit: self.position_limit },
                Some(price),
                None,
            );
        }
    }
}
