//! Top-level orchestration: wires the books, competitors, timers, and
//! background threads together and drives the match from open to close.
//!
//! Everything runs as a single async task on a current-thread runtime
//! with a `LocalSet`, using `tokio::time::sleep` and `Timer::resolve_tick`'s
//! fast-forward math to stay on schedule even if the loop falls behind.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::info;

use crate::engine::book::OrderBook;
use crate::engine::competitor::CompetitorManager;
use crate::engine::config::Config;
use crate::engine::error::StartupError;
use crate::engine::execution::{self, ExecutionServer, IncomingMessage};
use crate::engine::information::InformationPublisher;
use crate::engine::limiter::FrequencyLimiterFactory;
use crate::engine::market_events::MarketEventsReader;
use crate::engine::match_events::MatchEventsWriter;
use crate::engine::score_board::ScoreBoardWriterHandle;
use crate::engine::timer::Timer;
use crate::engine::types::Instrument;

pub struct Controller {
    config: Config,
    future_book: OrderBook,
    etf_book: OrderBook,
    competitor_manager: Rc<RefCell<CompetitorManager>>,
    market_events_reader: Rc<RefCell<MarketEventsReader>>,
    match_events_writer: MatchEventsWriter,
    score_board_writer: ScoreBoardWriterHandle,
    information_publisher: InformationPublisher,
    market_timer: Timer,
    tick_timer: Timer,
}

impl Controller {
    /// Build every piece the match needs: the two books, the competitor
    /// registry, the market-event replay reader, the CSV writer threads,
    /// and the UDP information publisher.
    pub async fn build(config: Config, base_dir: &std::path::Path) -> Result<Self, StartupError> {
        let (match_events, match_events_writer) = MatchEventsWriter::start(base_dir.join(&config.engine.match_events_file))?;
        let (score_board, score_board_writer) = ScoreBoardWriterHandle::start(base_dir.join(&config.engine.score_board_file))?;

        let future_book = OrderBook::new(Instrument::Future, config.fees.maker, config.fees.taker);
        let etf_book = OrderBook::new(Instrument::Etf, config.fees.maker, config.fees.taker);

        let market_events_reader = MarketEventsReader::start(base_dir.join(&config.engine.market_data_file), match_events.clone())?;

        let account_factory = crate::engine::account::AccountFactory::new(config.instrument.etf_clamp, config.instrument.tick_size);
        let competitor_manager = Rc::new(RefCell::new(CompetitorManager::new(
            config.traders.clone(),
            account_factory,
            config.limits.clone(),
            config.instrument.tick_size,
            match_events,
            score_board,
        )));

        let information_publisher = InformationPublisher::start(&config.information).await?;

        let market_timer = Timer::new(config.engine.market_event_interval, config.engine.speed);
        let tick_timer = Timer::new(config.engine.tick_interval, config.engine.speed);

        Ok(Controller {
            config,
            future_book,
            etf_book,
            competitor_manager,
            market_events_reader,
            match_events_writer,
            score_board_writer,
            information_publisher,
            market_timer,
            tick_timer,
        })
    }

    /// Run the match to completion: start accepting execution
    /// connections, wait out `Engine.MarketOpenDelay`, then drive the
    /// market-event replay and tick timers until the replay file is
    /// exhausted, finally joining the writer threads. Mirrors
    /// `Controller.start`/`Controller.cleanup`.
    pub async fn run(mut self) -> Result<(), StartupError> {
        let execution_server = ExecutionServer::bind(&self.config.execution).await?;
        let limiter_factory = FrequencyLimiterFactory::new(self.config.limits.message_frequency_interval, self.config.limits.message_frequency_limit);
        let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<IncomingMessage>();

        let competitor_manager_for_server = self.competitor_manager.clone();
        tokio::task::spawn_local(execution_server.serve(competitor_manager_for_server, limiter_factory, dispatch_tx));

        info!(target: "controller", delay = self.config.engine.market_open_delay, "waiting for market open");
        tokio::time::sleep(std::time::Duration::from_secs_f64(self.config.engine.market_open_delay)).await;

        self.market_timer.start();
        self.tick_timer.start();
        let mut next_market_tick_time = 0.0;
        let mut next_market_tick_number = 0u64;
        let mut next_tick_time = 0.0;
        let mut next_tick_number = 0u64;

        loop {
            self.drain_dispatch_queue(&mut dispatch_rx);

            let elapsed = self.market_timer.advance();
            let (market_event, next_market_deadline) = self.market_timer.resolve_tick(next_market_tick_time, next_market_tick_number);
            next_market_tick_time = market_event.now;
            next_market_tick_number = market_event.tick_number;

            MarketEventsReader::process_market_events(&self.market_events_reader, elapsed, &mut self.future_book, &mut self.etf_book);

            let (tick_event, next_tick_deadline) = self.tick_timer.resolve_tick(next_tick_time, next_tick_number);
            next_tick_time = tick_event.now;
            next_tick_number = tick_event.tick_number;

            self.information_publisher.publish_book_update(&self.future_book, &self.etf_book).await;
            self.information_publisher.publish_trade_ticks(&mut self.future_book, &mut self.etf_book).await;

            self.competitor_manager.borrow_mut().on_timer_tick(
                tick_event.now,
                self.future_book.last_traded_price(),
                self.etf_book.last_traded_price(),
            );

            if self.market_events_reader.borrow().is_done() {
                self.market_timer.shutdown(elapsed, "market data replay complete");
                break;
            }

            let next_deadline = next_market_deadline.min(next_tick_deadline);
            tokio::time::sleep_until(next_deadline.into()).await;
        }

        self.cleanup()
    }

    fn drain_dispatch_queue(&mut self, dispatch_rx: &mut UnboundedReceiver<IncomingMessage>) {
        let now = self.tick_timer.advance();
        while let Ok(message) = dispatch_rx.try_recv() {
            execution::apply_incoming_message(message, now, &mut self.etf_book, &self.future_book);
        }
    }

    fn cleanup(mut self) -> Result<(), StartupError> {
        info!(target: "controller", "shutting down");
        self.market_events_reader.borrow_mut().join();
        let match_events_count = self.match_events_writer.join();
        let score_board_count = self.score_board_writer.join();
        info!(
            target: "controller",
            match_events_count,
            score_board_count,
            "writer threads joined"
        );
        Ok(())
    }
}

/// Resolve the directory match data files are relative to: the directory
/// containing the config file itself.
pub fn base_dir_for_config(config_path: &std::path::Path) -> PathBuf {
    config_path.parent().map(|p| p.to_path_buf()).unwrap_or_else(|| PathBuf::from("."))
}
