//! # Exchange Core
//!
//! The core matching engine and market session controller for a
//! two-instrument trading-competition exchange. Auto-trader clients
//! connect over a framed TCP protocol, submit limit orders against a
//! continuously-updated ETF order book, and hedge exposure via simulated
//! trades against a synthetic Future book driven from a recorded
//! market-data file.
//!
//! ## Key Features
//!
//! - **Price-time priority matching**: two independent limit order books
//!   (ETF, Future), each with level-aggregated depth and maker/taker fee
//!   accrual.
//! - **Per-competitor risk state machine**: active-order-count,
//!   active-volume, message-frequency, and position limits, plus an
//!   unhedged-lots timer that disconnects a competitor whose ETF and
//!   Future positions drift apart for too long.
//! - **Two wire protocols**: a framed TCP execution channel for orders and
//!   replies, and a UDP information feed broadcasting top-5 book depth and
//!   trade ticks.
//! - **Virtual clock**: a wall-clock-times-speed-factor timer drives both
//!   the periodic tick (snapshots, score rows) and the scripted
//!   market-event replay, catching up automatically if the event loop
//!   falls behind schedule.
//! - **Background file I/O**: a market-event reader thread and two CSV
//!   writer threads (match events, score board) hand data to the
//!   single-threaded event loop over channels, so matching and validation
//!   never block on disk.
//!
//! ## Use Cases
//!
//! - Hosting a trading-competition match between auto-trader clients.
//! - Replaying a recorded market-data file to audit match outcomes from
//!   the match-events and score-board CSV outputs.
//!
//! ## Status
//!
//! This crate implements one match per process: it loads a JSON
//! configuration, runs the match to completion (market-event stream
//! exhausted, both writer threads flushed), and exits. It does not persist
//! state across matches or support multiple concurrent sessions.

pub mod engine;

pub use engine::account::{AccountFactory, CompetitorAccount};
pub use engine::book::{BookLevels, OrderBook};
pub use engine::competitor::{Competitor, CompetitorManager, CompetitorStatus};
pub use engine::config::Config;
pub use engine::controller::Controller;
pub use engine::error::{HardBreach, ProtocolError, StartupError, ValidationError};
pub use engine::order::{Order, OrderListener};
pub use engine::types::{Instrument, Lifespan, Side};
