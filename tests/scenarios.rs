//! End-to-end scenarios exercising the competitor state machine and the
//! order books together, the way a real match would drive them.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use exchange_core::engine::book::{OrderBook, OrderHandle, RestingOrder};
use exchange_core::engine::competitor::{Competitor, CompetitorManager, ExecutionSink};
use exchange_core::engine::config::LimitsConfig;
use exchange_core::engine::match_events::MatchEventsWriter;
use exchange_core::engine::order::{Order, OrderListener};
use exchange_core::engine::score_board::ScoreBoardWriterHandle;
use exchange_core::{AccountFactory, Instrument, Lifespan, Side};

#[derive(Default)]
struct RecordingSinkInner {
    errors: Vec<(u32, String)>,
    order_filled: Vec<(u32, u64, u64)>,
    hedge_filled: Vec<(u32, u64, u64)>,
    closed: bool,
}

#[derive(Clone)]
struct RecordingSink(Rc<RefCell<RecordingSinkInner>>);

impl RecordingSink {
    fn new() -> Self {
        RecordingSink(Rc::new(RefCell::new(RecordingSinkInner::default())))
    }
}

impl ExecutionSink for RecordingSink {
    fn send_error(&mut self, client_order_id: u32, message: &str) {
        self.0.borrow_mut().errors.push((client_order_id, message.to_string()));
    }
    fn send_hedge_filled(&mut self, client_order_id: u32, average_price: u64, volume: u64) {
        self.0.borrow_mut().hedge_filled.push((client_order_id, average_price, volume));
    }
    fn send_order_filled(&mut self, client_order_id: u32, price: u64, volume: u64) {
        self.0.borrow_mut().order_filled.push((client_order_id, price, volume));
    }
    fn send_order_status(&mut self, _client_order_id: u32, _fill_volume: u64, _remaining_volume: u64, _fees: i64) {}
    fn close(&mut self) {
        self.0.borrow_mut().closed = true;
    }
}

struct NoopListener;
impl OrderListener for NoopListener {}

fn sample_limits() -> LimitsConfig {
    LimitsConfig {
        active_order_count_limit: 100,
        active_volume_limit: 10_000,
        message_frequency_interval: 1.0,
        message_frequency_limit: 50,
        position_limit: 100,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    manager: CompetitorManager,
    _match_events_writer: MatchEventsWriter,
    _score_board_writer: ScoreBoardWriterHandle,
}

impl Harness {
    fn new(limits: LimitsConfig, traders: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (match_events, match_events_writer) = MatchEventsWriter::start(dir.path().join("match_events.csv")).unwrap();
        let (score_board, score_board_writer) = ScoreBoardWriterHandle::start(dir.path().join("score_board.csv")).unwrap();

        let mut trader_secrets = HashMap::new();
        for name in traders {
            trader_secrets.insert(name.to_string(), "secret".to_string());
        }

        let manager = CompetitorManager::new(trader_secrets, AccountFactory::new(0.002, 0.01), limits, 0.01, match_events, score_board);

        Harness {
            _dir: dir,
            manager,
            _match_events_writer: match_events_writer,
            _score_board_writer: score_board_writer,
        }
    }

    fn login(&mut self, name: &str) -> (Rc<RefCell<Competitor>>, Rc<RefCell<RecordingSinkInner>>) {
        let sink = RecordingSink::new();
        let inner = sink.0.clone();
        let competitor = self.manager.login_competitor(name, "secret", Box::new(sink)).expect("login should succeed");
        (competitor, inner)
    }
}

fn insert_plain_order(book: &mut OrderBook, now: f64, id: u32, side: Side, price: u64, volume: u64) {
    let handle: OrderHandle = Rc::new(RefCell::new(RestingOrder {
        order: Order::new(id, book.instrument, Lifespan::GoodForDay, side, price, volume),
        listener: Rc::downgrade(&(Rc::new(RefCell::new(NoopListener)) as Rc<RefCell<dyn OrderListener>>)),
    }));
    book.insert(now, handle);
}

#[test]
fn s1_simple_cross_trades_at_maker_price() {
    let mut book = OrderBook::new(Instrument::Etf, 0.0002, 0.0002);

    let buy: OrderHandle = Rc::new(RefCell::new(RestingOrder {
        order: Order::new(1, Instrument::Etf, Lifespan::GoodForDay, Side::Buy, 10_000, 5),
        listener: Rc::downgrade(&(Rc::new(RefCell::new(NoopListener)) as Rc<RefCell<dyn OrderListener>>)),
    }));
    book.insert(1.0, buy.clone());

    insert_plain_order(&mut book, 2.0, 2, Side::Sell, 9_900, 3);

    assert_eq!(book.last_traded_price(), Some(10_000));
    assert_eq!(buy.borrow().order.remaining_volume, 2);
}

#[test]
fn s3_self_cross_is_rejected_without_touching_the_book() {
    let mut harness = Harness::new(sample_limits(), &["Alice"]);
    let (alice, sink) = harness.login("Alice");
    let mut etf_book = OrderBook::new(Instrument::Etf, 0.0002, 0.0002);

    Competitor::on_insert_message(&alice, 1.0, 1, Side::Buy.as_u8(), 10_000, 5, Lifespan::GoodForDay.as_u8(), &mut etf_book);
    Competitor::on_insert_message(&alice, 2.0, 2, Side::Sell.as_u8(), 10_000, 5, Lifespan::GoodForDay.as_u8(), &mut etf_book);

    assert!(sink.borrow().errors.iter().any(|(id, msg)| *id == 2 && msg.contains("in cross")));
    assert_eq!(etf_book.best_ask(), None);
    assert_eq!(etf_book.best_bid(), Some(10_000));
}

#[test]
fn s2_fill_and_kill_trades_available_volume_and_cancels_the_residual() {
    let mut harness = Harness::new(sample_limits(), &["Alice", "Bob"]);
    let (alice, alice_sink) = harness.login("Alice");
    let (bob, _bob_sink) = harness.login("Bob");
    let mut etf_book = OrderBook::new(Instrument::Etf, 0.0, 0.0);

    Competitor::on_insert_message(&bob, 1.0, 1, Side::Sell.as_u8(), 10_100, 2, Lifespan::GoodForDay.as_u8(), &mut etf_book);
    Competitor::on_insert_message(&alice, 2.0, 1, Side::Buy.as_u8(), 10_100, 5, Lifespan::FillAndKill.as_u8(), &mut etf_book);

    assert_eq!(alice_sink.borrow().order_filled, vec![(1, 10_100, 2)]);
    assert_eq!(alice.borrow().account.etf_position, 2);
    assert_eq!(etf_book.best_bid(), None);
    assert_eq!(etf_book.best_ask(), None);
}

#[tokio::test(flavor = "current_thread")]
async fn s4_hedge_dry_run_prices_by_floor_divided_average() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let mut harness = Harness::new(sample_limits(), &["Alice"]);
            let (alice, sink) = harness.login("Alice");

            let mut future_book = OrderBook::new(Instrument::Future, 0.0, 0.0);
            insert_plain_order(&mut future_book, 0.0, 1, Side::Sell, 10_000, 10);
            insert_plain_order(&mut future_book, 0.0, 2, Side::Sell, 10_100, 5);
            let etf_book = OrderBook::new(Instrument::Etf, 0.0002, 0.0002);

            alice.borrow_mut().on_hedge_message(1.0, 1, Side::Buy.as_u8(), 10_200, 12, &future_book, &etf_book);

            let hedge = sink.borrow().hedge_filled.clone();
            assert_eq!(hedge, vec![(1, (10 * 10_000 + 2 * 10_100) / 12, 12)]);
            assert_eq!(alice.borrow().account.future_position, 12);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn s6_position_limit_breach_closes_connection_after_the_fill() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let limits = LimitsConfig { position_limit: 100, ..sample_limits() };
            let mut harness = Harness::new(limits, &["Alice", "Bob", "Carol"]);
            let (alice, alice_sink) = harness.login("Alice");
            let (bob, _bob_sink) = harness.login("Bob");
            let (carol, _carol_sink) = harness.login("Carol");

            let mut etf_book = OrderBook::new(Instrument::Etf, 0.0, 0.0);

            Competitor::on_insert_message(&bob, 1.0, 1, Side::Sell.as_u8(), 100, 98, Lifespan::GoodForDay.as_u8(), &mut etf_book);
            Competitor::on_insert_message(&alice, 2.0, 1, Side::Buy.as_u8(), 100, 98, Lifespan::GoodForDay.as_u8(), &mut etf_book);
            assert_eq!(alice.borrow().account.etf_position, 98);
            assert!(!alice_sink.borrow().closed);

            Competitor::on_insert_message(&carol, 3.0, 1, Side::Sell.as_u8(), 100, 5, Lifespan::GoodForDay.as_u8(), &mut etf_book);
            Competitor::on_insert_message(&alice, 4.0, 2, Side::Buy.as_u8(), 100, 5, Lifespan::GoodForDay.as_u8(), &mut etf_book);

            assert_eq!(alice.borrow().account.etf_position, 103);
            assert!(alice_sink.borrow().closed);
            assert!(alice_sink.borrow().errors.iter().any(|(_, msg)| msg.contains("exceeds limit")));
        })
        .await;
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn s5_unhedged_position_breaches_after_the_time_limit() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let limits = LimitsConfig { position_limit: 1_000, ..sample_limits() };
            let mut harness = Harness::new(limits, &["Alice", "Bob"]);
            let (alice, alice_sink) = harness.login("Alice");
            let (bob, _bob_sink) = harness.login("Bob");

            let mut etf_book = OrderBook::new(Instrument::Etf, 0.0, 0.0);
            Competitor::on_insert_message(&bob, 1.0, 1, Side::Sell.as_u8(), 100, 15, Lifespan::GoodForDay.as_u8(), &mut etf_book);
            Competitor::on_insert_message(&alice, 2.0, 1, Side::Buy.as_u8(), 100, 15, Lifespan::GoodForDay.as_u8(), &mut etf_book);

            assert_eq!(alice.borrow().account.etf_position, 15);
            assert!(!alice_sink.borrow().closed);

            tokio::time::advance(Duration::from_secs(61)).await;
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }

            assert!(alice_sink.borrow().closed);
            assert!(alice_sink.borrow().errors.iter().any(|(_, msg)| msg.contains("breached limit")));
        })
        .await;
}
