//! Hand-written error enums for each failing subsystem.
//!
//! Each subsystem gets its own `#[non_exhaustive]` enum with a manual
//! `Display` impl and a blanket `Error` impl, rather than a `thiserror`
//! derive.

use std::fmt;

/// A validation failure a competitor can recover from: the order is
/// rejected, an `ERROR` message is sent back, trading continues.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    ClientOrderIdTooSmall { client_order_id: u32, last_seen: u32 },
    ClientOrderIdReused { client_order_id: u32 },
    PriceOutOfRange { price: u64 },
    PriceNotOnTickSize { price: u64, tick_size: u64 },
    VolumeZero,
    UnknownOrder { client_order_id: u32 },
    OrderAlreadyInactive { client_order_id: u32 },
    AmendVolumeIncrease { client_order_id: u32 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ClientOrderIdTooSmall { client_order_id, last_seen } => write!(
                f,
                "client order id {client_order_id} must be greater than the last one seen ({last_seen})"
            ),
            ValidationError::ClientOrderIdReused { client_order_id } => {
                write!(f, "client order id {client_order_id} has already been used")
            }
            ValidationError::PriceOutOfRange { price } => write!(f, "price {price} is out of range"),
            ValidationError::PriceNotOnTickSize { price, tick_size } => {
                write!(f, "price {price} is not a multiple of the tick size {tick_size}")
            }
            ValidationError::VolumeZero => write!(f, "order volume must be greater than zero"),
            ValidationError::UnknownOrder { client_order_id } => {
                write!(f, "client order id {client_order_id} is unknown")
            }
            ValidationError::OrderAlreadyInactive { client_order_id } => {
                write!(f, "client order id {client_order_id} is no longer active")
            }
            ValidationError::AmendVolumeIncrease { client_order_id } => write!(
                f,
                "amend of client order id {client_order_id} may not increase the remaining volume"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A breach severe enough to end a competitor's participation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HardBreach {
    ActiveOrderCountExceeded { count: u32, limit: u32 },
    ActiveVolumeExceeded { volume: u64, limit: u64 },
    PositionLimitExceeded { position: i64, limit: i64 },
    SelfCrossed { client_order_id: u32 },
    MessageFrequencyLimitBreached,
    UnhedgedLotsLimitBreached { unhedged: i64, limit: i64 },
}

impl fmt::Display for HardBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HardBreach::ActiveOrderCountExceeded { count, limit } => {
                write!(f, "active order count {count} exceeds limit {limit}")
            }
            HardBreach::ActiveVolumeExceeded { volume, limit } => {
                write!(f, "active volume {volume} exceeds limit {limit}")
            }
            HardBreach::PositionLimitExceeded { position, limit } => {
                write!(f, "position {position} exceeds limit {limit}")
            }
            HardBreach::SelfCrossed { client_order_id } => {
                write!(f, "order {client_order_id} would trade against the competitor's own order")
            }
            HardBreach::MessageFrequencyLimitBreached => write!(f, "message frequency limit breached"),
            HardBreach::UnhedgedLotsLimitBreached { unhedged, limit } => {
                write!(f, "unhedged lots {unhedged} breached limit {limit} for too long")
            }
        }
    }
}

impl std::error::Error for HardBreach {}

/// A framing or handshake failure fatal to one connection, but not logged
/// as a competitor breach (no score-board row).
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    FirstMessageNotLogin,
    SecondLoginMessage { name: String },
    UnknownMessageType { message_type: u8, length: u16 },
    LengthMismatch { expected: u16, actual: u16 },
    LoginFailed { name: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::FirstMessageNotLogin => write!(f, "first message received was not a login"),
            ProtocolError::SecondLoginMessage { name } => {
                write!(f, "received second login message from '{name}'")
            }
            ProtocolError::UnknownMessageType { message_type, length } => {
                write!(f, "received invalid message: type={message_type} length={length}")
            }
            ProtocolError::LengthMismatch { expected, actual } => {
                write!(f, "message length mismatch: expected={expected} actual={actual}")
            }
            ProtocolError::LoginFailed { name } => write!(f, "login failed: name='{name}'"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A failure that prevents the process from starting at all.
#[derive(Debug)]
#[non_exhaustive]
pub enum StartupError {
    Config(String),
    MarketData(std::io::Error),
    OutputPath(std::io::Error),
    Bind(std::io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            StartupError::MarketData(err) => write!(f, "failed to open market data file: {err}"),
            StartupError::OutputPath(err) => write!(f, "failed to open output path: {err}"),
            StartupError::Bind(err) => write!(f, "failed to bind network socket: {err}"),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::MarketData(err) | StartupError::OutputPath(err) | StartupError::Bind(err) => Some(err),
            StartupError::Config(_) => None,
        }
    }
}
