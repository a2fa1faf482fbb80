//! Core enumerations shared across every wire message, order, and trade.

use std::fmt;

/// The two traded instruments. ETF is the primary, order-driven book;
/// Future is background liquidity driven by the market-events replay and
/// the target of hedge requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Instrument {
    Future = 0,
    Etf = 1,
}

impl Instrument {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Instrument::Future),
            1 => Some(Instrument::Etf),
            _ => None,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Future => write!(f, "FUTURE"),
            Instrument::Etf => write!(f, "ETF"),
        }
    }
}

/// Buy vs sell. The wire protocol also recognises `BID`/`ASK` aliases for
/// `BUY`/`SELL`; those collapse to this one canonical two-variant enum
/// rather than carrying four names through the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Side {
    Sell = 0,
    Buy = 1,
}

impl Side {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Side::Sell),
            1 => Some(Side::Buy),
            _ => None,
        }
    }

    /// Returns the opposite side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// `"A"` for ask/sell, `"B"` for bid/buy — the one-letter CSV encoding
    /// used in the match-event log.
    pub fn as_ab(self) -> &'static str {
        match self {
            Side::Sell => "A",
            Side::Buy => "B",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Good-for-day (rests in the book) vs fill-and-kill (match-or-cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Lifespan {
    FillAndKill = 0,
    GoodForDay = 1,
}

impl Lifespan {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Lifespan::FillAndKill),
            1 => Some(Lifespan::GoodForDay),
            _ => None,
        }
    }

    /// `"F"` for fill-and-kill, `"G"` for good-for-day — the one-letter
    /// CSV encoding used in the match-event log.
    pub fn as_fg(self) -> &'static str {
        match self {
            Lifespan::FillAndKill => "F",
            Lifespan::GoodForDay => "G",
        }
    }
}

impl fmt::Display for Lifespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lifespan::FillAndKill => write!(f, "FILL_AND_KILL"),
            Lifespan::GoodForDay => write!(f, "GOOD_FOR_DAY"),
        }
    }
}

/// Smallest representable bid.
pub const MINIMUM_BID: u64 = 0;
/// Largest representable ask: `2**32 - 1`, the ceiling imposed by the
/// `uint32` wire encoding of prices.
pub const MAXIMUM_ASK: u64 = u32::MAX as u64;
/// Number of price levels reported in a book snapshot / trade-ticks
/// message.
pub const TOP_LEVEL_COUNT: usize = 5;
