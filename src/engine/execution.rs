//! The execution connection: the TCP half of the protocol that accepts
//! auto-trader logins and dispatches their order messages.
//!
//! One `tokio::task::spawn_local` per connection does both the read loop and
//! the write loop (splitting the stream so reads and queued writes don't
//! block each other), with an `UnboundedSender<Vec<u8>>` standing in for
//! the transport's write buffer.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};

use crate::engine::book::OrderBook;
use crate::engine::competitor::{Competitor, CompetitorManager, ExecutionSink};
use crate::engine::config::ExecutionConfig;
use crate::engine::error::StartupError;
use crate::engine::limiter::FrequencyLimiterFactory;
use crate::engine::messages::{
    self, AmendOrderMessage, CancelOrderMessage, HedgeOrderMessage, InsertOrderMessage, LoginMessage, MessageType,
    AMEND_MESSAGE_SIZE, CANCEL_MESSAGE_SIZE, HEDGE_MESSAGE_SIZE, INSERT_MESSAGE_SIZE, LOGIN_MESSAGE_SIZE,
};

/// How long a freshly-accepted connection is given to send its login
/// message before the connection is dropped.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends encoded frames over an `UnboundedSender` feeding a connection's
/// dedicated write loop. Cheap to clone; every `Competitor` owns one.
struct TcpExecutionSink {
    name: String,
    writer: UnboundedSender<Vec<u8>>,
    closed: Rc<RefCell<bool>>,
}

impl ExecutionSink for TcpExecutionSink {
    fn send_error(&mut self, client_order_id: u32, message: &str) {
        let _ = self.writer.send(messages::encode_error(client_order_id, message));
    }

    fn send_hedge_filled(&mut self, client_order_id: u32, average_price: u64, volume: u64) {
        let _ = self
            .writer
            .send(messages::encode_hedge_filled(client_order_id, average_price as u32, volume as u32));
    }

    fn send_order_filled(&mut self, client_order_id: u32, price: u64, volume: u64) {
        let _ = self
            .writer
            .send(messages::encode_order_filled(client_order_id, price as u32, volume as u32));
    }

    fn send_order_status(&mut self, client_order_id: u32, fill_volume: u64, remaining_volume: u64, fees: i64) {
        let _ = self.writer.send(messages::encode_order_status(
            client_order_id,
            fill_volume as u32,
            remaining_volume as u32,
            fees as i32,
        ));
    }

    fn close(&mut self) {
        info!(target: "execution", name = %self.name, "closing connection");
        *self.closed.borrow_mut() = true;
    }
}

/// A message decoded off the wire, paired with the competitor that sent
/// it, ready for the engine loop to apply against the books.
pub enum IncomingMessage {
    Amend { competitor: Rc<RefCell<Competitor>>, message: AmendOrderMessage },
    Cancel { competitor: Rc<RefCell<Competitor>>, message: CancelOrderMessage },
    Hedge { competitor: Rc<RefCell<Competitor>>, message: HedgeOrderMessage },
    Insert { competitor: Rc<RefCell<Competitor>>, message: InsertOrderMessage },
}

pub struct ExecutionServer {
    listener: TcpListener,
}

impl ExecutionServer {
    pub async fn bind(config: &ExecutionConfig) -> Result<Self, StartupError> {
        let address = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&address).await.map_err(StartupError::Bind)?;
        info!(target: "execution", address = %address, "execution server listening");
        Ok(ExecutionServer { listener })
    }

    /// Accept connections forever, handing each one to its own
    /// `spawn_local` task. Messages for already-logged-in competitors are
    /// sent on `dispatch`, where the single-threaded engine loop applies
    /// them against the books.
    pub async fn serve(
        self,
        competitor_manager: Rc<RefCell<CompetitorManager>>,
        limiter_factory: FrequencyLimiterFactory,
        dispatch: UnboundedSender<IncomingMessage>,
    ) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(target: "execution", error = %err, "accept failed");
                    continue;
                }
            };
            info!(target: "execution", %peer, "accepted connection");
            tokio::task::spawn_local(handle_connection(
                stream,
                competitor_manager.clone(),
                limiter_factory.clone(),
                dispatch.clone(),
            ));
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    competitor_manager: Rc<RefCell<CompetitorManager>>,
    limiter_factory: FrequencyLimiterFactory,
    dispatch: UnboundedSender<IncomingMessage>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    tokio::task::spawn_local(async move {
        while let Some(frame) = writer_rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let login = match tokio::time::timeout(LOGIN_TIMEOUT, read_login(&mut read_half)).await {
        Ok(Some(login)) => login,
        _ => {
            warn!(target: "execution", "connection dropped before a valid login arrived");
            return;
        }
    };

    let closed = Rc::new(RefCell::new(false));
    let sink = Box::new(TcpExecutionSink {
        name: login.name.clone(),
        writer: writer_tx.clone(),
        closed: closed.clone(),
    });

    let competitor = competitor_manager.borrow_mut().login_competitor(&login.name, &login.secret, sink);
    let Some(competitor) = competitor else {
        warn!(target: "execution", name = %login.name, "login rejected");
        return;
    };
    info!(target: "execution", name = %login.name, "competitor logged in");

    let mut limiter = limiter_factory.create();
    let mut buffer = Vec::new();
    let mut read_buf = [0u8; 4096];

    loop {
        if *closed.borrow() {
            break;
        }
        let n = match read_half.read(&mut read_buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(_) => break,
        };
        buffer.extend_from_slice(&read_buf[..n]);

        let mut messages = Vec::new();
        let consumed = messages::drain_frames(&buffer, |message_type, data, start, length| {
            messages.push((message_type, data[start..start + length as usize - crate::engine::messages::HEADER_SIZE].to_vec()));
        });
        buffer.drain(..consumed);

        for (message_type, body) in messages {
            dispatch_message(message_type, &body, &dispatch, &mut limiter, &competitor, &login.name);
        }
    }
}

fn dispatch_message(
    message_type: u8,
    body: &[u8],
    dispatch: &UnboundedSender<IncomingMessage>,
    limiter: &mut crate::engine::limiter::FrequencyLimiter,
    competitor: &Rc<RefCell<Competitor>>,
    name: &str,
) {
    // The connection task has no access to the shared virtual clock, so
    // the frequency window is measured in wall-clock seconds rather than
    // market time; fine since the limit is about message rate, not
    // anything market-time-dependent.
    let wall_now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs_f64();
    let breach = limiter.check_event(wall_now);
    if breach {
        competitor.borrow_mut().hard_breach(
            0.0,
            0,
            crate::engine::error::HardBreach::MessageFrequencyLimitBreached,
            None,
            None,
        );
        return;
    }

    let incoming = match MessageType::from_u8(message_type) {
        Some(MessageType::AmendOrder) if body.len() + messages::HEADER_SIZE >= AMEND_MESSAGE_SIZE => Some(IncomingMessage::Amend {
            competitor: competitor.clone(),
            message: AmendOrderMessage::decode(body, 0),
        }),
        Some(MessageType::CancelOrder) if body.len() + messages::HEADER_SIZE >= CANCEL_MESSAGE_SIZE => Some(IncomingMessage::Cancel {
            competitor: competitor.clone(),
            message: CancelOrderMessage::decode(body, 0),
        }),
        Some(MessageType::HedgeOrder) if body.len() + messages::HEADER_SIZE >= HEDGE_MESSAGE_SIZE => Some(IncomingMessage::Hedge {
            competitor: competitor.clone(),
            message: HedgeOrderMessage::decode(body, 0),
        }),
        Some(MessageType::InsertOrder) if body.len() + messages::HEADER_SIZE >= INSERT_MESSAGE_SIZE => Some(IncomingMessage::Insert {
            competitor: competitor.clone(),
            message: InsertOrderMessage::decode(body, 0),
        }),
        _ => {
            warn!(target: "execution", name, message_type, "received invalid message");
            None
        }
    };

    if let Some(incoming) = incoming {
        let _ = dispatch.send(incoming);
    }
}

async fn read_login(stream: &mut tokio::net::tcp::OwnedReadHalf) -> Option<LoginMessage> {
    let mut buffer = vec![0u8; LOGIN_MESSAGE_SIZE];
    stream.read_exact(&mut buffer).await.ok()?;
    let length = u16::from_be_bytes([buffer[0], buffer[1]]) as usize;
    let message_type = buffer[2];
    if length != LOGIN_MESSAGE_SIZE || MessageType::from_u8(message_type) != Some(MessageType::Login) {
        return None;
    }
    Some(LoginMessage::decode(&buffer, messages::HEADER_SIZE))
}

/// Apply a single dispatched message against the books. Runs on the
/// engine-loop side, where `OrderBook` and `Competitor` state live.
pub fn apply_incoming_message(message: IncomingMessage, now: f64, etf_book: &mut OrderBook, future_book: &OrderBook) {
    match message {
        IncomingMessage::Amend { competitor, message } => {
            competitor.borrow_mut().on_amend_message(now, message.client_order_id, message.volume, etf_book);
        }
        IncomingMessage::Cancel { competitor, message } => {
            competitor.borrow_mut().on_cancel_message(now, message.client_order_id, etf_book);
        }
        IncomingMessage::Hedge { competitor, message } => {
            competitor.borrow_mut().on_hedge_message(
                now,
                message.client_order_id,
                message.side,
                message.price as u64,
                message.volume as u64,
                future_book,
                etf_book,
            );
        }
        IncomingMessage::Insert { competitor, message } => {
            Competitor::on_insert_message(
                &competitor,
                now,
                message.client_order_id,
                message.side,
                message.price as u64,
                message.volume as u64,
                message.lifespan,
                etf_book,
            );
        }
    }
}
