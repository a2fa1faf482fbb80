//! Wire protocol: message framing and the fixed binary layouts for every
//! execution, information and (reserved) HUD message.
//!
//! Field layouts are big-endian and packed/unpacked by hand rather than
//! through a serialization crate — the layouts are small and fixed enough
//! that a crate would add a translation layer without simplifying anything.

use crate::engine::types::{Instrument, TOP_LEVEL_COUNT};

pub const HEADER_SIZE: usize = 3;

/// Message type discriminants for every execution, information, and
/// (reserved) HUD message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    AmendOrder = 1,
    CancelOrder = 2,
    Error = 3,
    HedgeFilled = 4,
    HedgeOrder = 5,
    InsertOrder = 6,
    Login = 7,
    OrderFilled = 8,
    OrderStatus = 9,
    OrderBookUpdate = 10,
    TradeTicks = 11,
    // Heads-up display message types: reserved, not implemented. The HUD
    // is an external collaborator out of scope for this engine, but the
    // discriminants are kept reserved so this enum stays a faithful
    // superset of the wire protocol.
    // AmendEvent = 100, CancelEvent = 101, InsertEvent = 102,
    // HedgeEvent = 103, LoginEvent = 104, TradeEvent = 105
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<MessageType> {
        use MessageType::*;
        Some(match value {
            1 => AmendOrder,
            2 => CancelOrder,
            3 => Error,
            4 => HedgeFilled,
            5 => HedgeOrder,
            6 => InsertOrder,
            7 => Login,
            8 => OrderFilled,
            9 => OrderStatus,
            10 => OrderBookUpdate,
            11 => TradeTicks,
            _ => return None,
        })
    }
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}
fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}
fn put_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}
fn put_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

fn get_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}
fn get_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
fn get_i32(data: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
fn get_u8(data: &[u8], at: usize) -> u8 {
    data[at]
}

fn header(length: usize, message_type: MessageType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    put_u16(&mut buf, length as u16);
    put_u8(&mut buf, message_type as u8);
    buf
}

/// Client -> exchange: amend an order's volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmendOrderMessage {
    pub client_order_id: u32,
    pub volume: u32,
}
pub const AMEND_MESSAGE_SIZE: usize = HEADER_SIZE + 8;

impl AmendOrderMessage {
    pub fn decode(data: &[u8], at: usize) -> Self {
        AmendOrderMessage {
            client_order_id: get_u32(data, at),
            volume: get_u32(data, at + 4),
        }
    }
}

/// Client -> exchange: cancel an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOrderMessage {
    pub client_order_id: u32,
}
pub const CANCEL_MESSAGE_SIZE: usize = HEADER_SIZE + 4;

impl CancelOrderMessage {
    pub fn decode(data: &[u8], at: usize) -> Self {
        CancelOrderMessage {
            client_order_id: get_u32(data, at),
        }
    }
}

/// Client -> exchange: request a hedge against the future. `side` is the
/// raw wire byte, unvalidated here — the competitor-level handler is the
/// one that decides whether it names a real side and sends `ERROR` if not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HedgeOrderMessage {
    pub client_order_id: u32,
    pub side: u8,
    pub price: u32,
    pub volume: u32,
}
pub const HEDGE_MESSAGE_SIZE: usize = HEADER_SIZE + 13;

impl HedgeOrderMessage {
    pub fn decode(data: &[u8], at: usize) -> Self {
        HedgeOrderMessage {
            client_order_id: get_u32(data, at),
            side: get_u8(data, at + 4),
            price: get_u32(data, at + 5),
            volume: get_u32(data, at + 9),
        }
    }
}

/// Client -> exchange: insert a new order. `side`/`lifespan` are raw wire
/// bytes, unvalidated here for the same reason as `HedgeOrderMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOrderMessage {
    pub client_order_id: u32,
    pub side: u8,
    pub price: u32,
    pub volume: u32,
    pub lifespan: u8,
}
pub const INSERT_MESSAGE_SIZE: usize = HEADER_SIZE + 14;

impl InsertOrderMessage {
    pub fn decode(data: &[u8], at: usize) -> Self {
        InsertOrderMessage {
            client_order_id: get_u32(data, at),
            side: get_u8(data, at + 4),
            price: get_u32(data, at + 5),
            volume: get_u32(data, at + 9),
            lifespan: get_u8(data, at + 13),
        }
    }
}

/// Client -> exchange: login handshake. Names and secrets are fixed
/// 50-byte, NUL-padded ASCII fields on the wire.
pub const LOGIN_NAME_FIELD_SIZE: usize = 50;
pub const LOGIN_MESSAGE_SIZE: usize = HEADER_SIZE + LOGIN_NAME_FIELD_SIZE * 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginMessage {
    pub name: String,
    pub secret: String,
}

impl LoginMessage {
    pub fn decode(data: &[u8], at: usize) -> Self {
        let name = decode_fixed_str(&data[at..at + LOGIN_NAME_FIELD_SIZE]);
        let secret = decode_fixed_str(&data[at + LOGIN_NAME_FIELD_SIZE..at + LOGIN_NAME_FIELD_SIZE * 2]);
        LoginMessage { name, secret }
    }
}

fn decode_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Exchange -> client: error message.
pub const ERROR_MESSAGE_TEXT_SIZE: usize = 50;
pub const ERROR_MESSAGE_SIZE: usize = HEADER_SIZE + 4 + ERROR_MESSAGE_TEXT_SIZE;

pub fn encode_error(client_order_id: u32, text: &str) -> Vec<u8> {
    let mut buf = header(ERROR_MESSAGE_SIZE, MessageType::Error);
    put_u32(&mut buf, client_order_id);
    let mut field = [0u8; ERROR_MESSAGE_TEXT_SIZE];
    let bytes = text.as_bytes();
    let n = bytes.len().min(ERROR_MESSAGE_TEXT_SIZE);
    field[..n].copy_from_slice(&bytes[..n]);
    buf.extend_from_slice(&field);
    buf
}

pub const HEDGE_FILLED_MESSAGE_SIZE: usize = HEADER_SIZE + 12;

pub fn encode_hedge_filled(client_order_id: u32, average_price: u32, volume: u32) -> Vec<u8> {
    let mut buf = header(HEDGE_FILLED_MESSAGE_SIZE, MessageType::HedgeFilled);
    put_u32(&mut buf, client_order_id);
    put_u32(&mut buf, average_price);
    put_u32(&mut buf, volume);
    buf
}

pub const ORDER_FILLED_MESSAGE_SIZE: usize = HEADER_SIZE + 12;

pub fn encode_order_filled(client_order_id: u32, price: u32, volume: u32) -> Vec<u8> {
    let mut buf = header(ORDER_FILLED_MESSAGE_SIZE, MessageType::OrderFilled);
    put_u32(&mut buf, client_order_id);
    put_u32(&mut buf, price);
    put_u32(&mut buf, volume);
    buf
}

pub const ORDER_STATUS_MESSAGE_SIZE: usize = HEADER_SIZE + 16;

pub fn encode_order_status(client_order_id: u32, fill_volume: u32, remaining_volume: u32, fees: i32) -> Vec<u8> {
    let mut buf = header(ORDER_STATUS_MESSAGE_SIZE, MessageType::OrderStatus);
    put_u32(&mut buf, client_order_id);
    put_u32(&mut buf, fill_volume);
    put_u32(&mut buf, remaining_volume);
    put_i32(&mut buf, fees);
    buf
}

/// Exchange -> subscribers: order book depth snapshot and trade ticks.
/// Both datagrams share layout: a 1-byte instrument, a 4-byte sequence
/// number, then four arrays of `TOP_LEVEL_COUNT` u32s (ask prices, ask
/// volumes, bid prices, bid volumes).
pub const BOOK_HEADER_SIZE: usize = HEADER_SIZE + 5;
pub const BOOK_MESSAGE_SIZE: usize = BOOK_HEADER_SIZE + 4 * TOP_LEVEL_COUNT * 4;

fn encode_book_datagram(message_type: MessageType, instrument: Instrument, sequence_number: u32, levels: &crate::engine::book::BookLevels) -> Vec<u8> {
    let mut buf = header(BOOK_MESSAGE_SIZE, message_type);
    put_u8(&mut buf, instrument.as_u8());
    put_u32(&mut buf, sequence_number);
    for &p in &levels.ask_prices {
        put_u32(&mut buf, p as u32);
    }
    for &v in &levels.ask_volumes {
        put_u32(&mut buf, v as u32);
    }
    for &p in &levels.bid_prices {
        put_u32(&mut buf, p as u32);
    }
    for &v in &levels.bid_volumes {
        put_u32(&mut buf, v as u32);
    }
    buf
}

pub fn encode_order_book_update(instrument: Instrument, sequence_number: u32, levels: &crate::engine::book::BookLevels) -> Vec<u8> {
    encode_book_datagram(MessageType::OrderBookUpdate, instrument, sequence_number, levels)
}

pub fn encode_trade_ticks(instrument: Instrument, sequence_number: u32, levels: &crate::engine::book::BookLevels) -> Vec<u8> {
    encode_book_datagram(MessageType::TradeTicks, instrument, sequence_number, levels)
}

/// Frame a full received buffer, calling `on_message` for each complete
/// frame, and returning the index the caller should retain unconsumed
/// bytes from. Mirrors `Connection.data_received`'s buffering loop.
pub fn drain_frames<F>(buffer: &[u8], mut on_message: F) -> usize
where
    F: FnMut(u8, &[u8], usize, u16),
{
    let mut upto = 0usize;
    let data_length = buffer.len();

    while upto + HEADER_SIZE <= data_length {
        let length = get_u16(buffer, upto) as usize;
        let message_type = get_u8(buffer, upto + 2);
        if upto + length > data_length {
            break;
        }
        on_message(message_type, buffer, upto + HEADER_SIZE, length as u16);
        upto += length;
    }

    upto
}

/// Validate and unwrap a received datagram's header. Mirrors
/// `Subscription.datagram_received`'s length checks.
pub fn decode_datagram_header(data: &[u8]) -> Option<(u8, u16)> {
    if data.len() < HEADER_SIZE {
        return None;
    }
    let length = get_u16(data, 0);
    if length as usize != data.len() {
        return None;
    }
    let message_type = get_u8(data, 2);
    Some((message_type, length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_round_trips_header_and_client_order_id() {
        let buf = encode_error(42, "boom");
        assert_eq!(buf.len(), ERROR_MESSAGE_SIZE);
        assert_eq!(get_u16(&buf, 0), ERROR_MESSAGE_SIZE as u16);
        assert_eq!(MessageType::from_u8(buf[2]), Some(MessageType::Error));
        assert_eq!(get_u32(&buf, HEADER_SIZE), 42);
    }

    #[test]
    fn drain_frames_handles_multiple_frames_in_one_read() {
        let first = encode_error(1, "a");
        let second = encode_error(2, "b");
        let mut combined = first.clone();
        combined.extend_from_slice(&second);

        let mut seen = Vec::new();
        let consumed = drain_frames(&combined, |typ, data, start, length| {
            seen.push((typ, get_u32(data, start), length));
        });

        assert_eq!(consumed, combined.len());
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, 1);
        assert_eq!(seen[1].1, 2);
    }

    #[test]
    fn drain_frames_stops_at_partial_trailing_frame() {
        let full = encode_error(1, "a");
        let mut combined = full.clone();
        combined.extend_from_slice(&[0u8; 2]);

        let mut count = 0;
        let consumed = drain_frames(&combined, |_, _, _, _| count += 1);
        assert_eq!(count, 1);
        assert_eq!(consumed, full.len());
    }

    #[test]
    fn datagram_header_rejects_length_mismatch() {
        let mut buf = encode_error(1, "a");
        buf.truncate(buf.len() - 1);
        assert!(decode_datagram_header(&buf).is_none());
    }
}
