//! UDP broadcaster of order-book depth snapshots and trade ticks.
//!
//! Uses a `tokio::net::UdpSocket` joined to the multicast address from the
//! `Information.Name` config field, with `connect()` used so subsequent
//! `send()` calls don't need to repeat the destination.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::engine::book::OrderBook;
use crate::engine::config::InformationConfig;
use crate::engine::error::StartupError;
use crate::engine::messages::{encode_order_book_update, encode_trade_ticks};

/// The port the information feed is broadcast on. Not configurable: only
/// the multicast group address (`Information.Name`) varies between
/// matches.
pub const INFORMATION_PORT: u16 = 10101;

pub struct InformationPublisher {
    socket: UdpSocket,
    sequence_number: u32,
}

impl InformationPublisher {
    /// Bind an ephemeral local socket and join the multicast group named
    /// by `Information.Name`.
    pub async fn start(config: &InformationConfig) -> Result<Self, StartupError> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await.map_err(StartupError::Bind)?;

        if let Ok(group) = config.name.parse::<Ipv4Addr>() {
            if group.is_multicast() {
                socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED).map_err(StartupError::Bind)?;
            }
        }

        let destination: SocketAddr = format!("{}:{}", config.name, INFORMATION_PORT)
            .parse()
            .map_err(|_| StartupError::Config(format!("Information.Name '{}' is not a valid multicast address", config.name)))?;
        socket.connect(destination).await.map_err(StartupError::Bind)?;

        info!(target: "information", destination = %destination, "information publisher ready");
        Ok(InformationPublisher { socket, sequence_number: 0 })
    }

    /// Publish the current top-of-book depth for both instruments.
    pub async fn publish_book_update(&mut self, future_book: &OrderBook, etf_book: &OrderBook) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        for book in [future_book, etf_book] {
            let datagram = encode_order_book_update(book.instrument, self.sequence_number, &book.top_levels());
            if let Err(err) = self.socket.send(&datagram).await {
                warn!(target: "information", error = %err, "failed to send order book update");
            }
        }
    }

    /// Publish trade ticks accumulated since the last tick, for whichever
    /// books actually traded.
    pub async fn publish_trade_ticks(&mut self, future_book: &mut OrderBook, etf_book: &mut OrderBook) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        for book in [future_book, etf_book] {
            if let Some(ticks) = book.trade_ticks() {
                let datagram = encode_trade_ticks(book.instrument, self.sequence_number, &ticks);
                if let Err(err) = self.socket.send(&datagram).await {
                    warn!(target: "information", error = %err, "failed to send trade ticks");
                }
            }
        }
    }
}
