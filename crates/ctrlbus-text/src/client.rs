use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ctrlbus_frame::{DelimitedCodec, FrameConfig, FrameError};
use ctrlbus_transport::config::opt_millis;
use ctrlbus_transport::{connect, write_bounded, ConnectConfig};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TextError};
use crate::message::{Ack, Command, Event, Message};

/// Default bound on waiting for an acknowledge.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on flushing one command.
pub const DEFAULT_COMMAND_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect: ConnectConfig,
    pub frame: FrameConfig,
    /// How long a command may wait for its acknowledge. `None` waits forever.
    #[serde(with = "opt_millis")]
    pub ack_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect: ConnectConfig::default().with_write_timeout(DEFAULT_COMMAND_WRITE_TIMEOUT),
            frame: FrameConfig::default(),
            ack_timeout: Some(DEFAULT_ACK_TIMEOUT),
        }
    }
}

/// Notifications delivered to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection to the server came up (`true`) or went down.
    Connected(bool),
    /// An event frame broadcast by the server.
    Event(Event),
}

/// Receiver for [`ClientEvent`]s, in arrival order.
pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

/// Snapshot of the client connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatus {
    pub connected: bool,
    /// Sequence number of the command in flight, if any.
    pub in_flight: Option<u16>,
    /// The most recently accepted acknowledge. Cleared on disconnect.
    pub last_ack: Option<Ack>,
}

enum Request {
    Command {
        name: String,
        params: Vec<String>,
        reply: oneshot::Sender<Result<Ack>>,
    },
    Shutdown,
}

/// Application-side text protocol client.
///
/// Cheap to clone; all clones share one connection task. The task keeps
/// reconnecting at a fixed interval until [`CommandClient::shutdown`] is
/// called or every clone is dropped.
#[derive(Clone)]
pub struct CommandClient {
    addr: SocketAddr,
    requests: mpsc::UnboundedSender<Request>,
    status: watch::Receiver<ClientStatus>,
}

impl CommandClient {
    /// Spawn the connection task for `addr`.
    pub fn connect(addr: SocketAddr, config: ClientConfig) -> (Self, ClientEvents) {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());

        let task = ClientTask {
            addr,
            config,
            events: events_tx,
            status: status_tx,
            txseq: 0,
            pending: None,
        };
        tokio::spawn(task.run(requests_rx));

        let client = Self {
            addr,
            requests: requests_tx,
            status: status_rx,
        };
        (client, events_rx)
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Send a command and wait for its acknowledge.
    ///
    /// Fails immediately with [`TextError::Busy`] if another command is still
    /// waiting, or [`TextError::NotConnected`] without a connection.
    pub async fn request(&self, name: &str, params: &[String]) -> Result<Ack> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Request::Command {
                name: name.to_string(),
                params: params.to_vec(),
                reply,
            })
            .map_err(|_| TextError::Closed)?;
        response.await.map_err(|_| TextError::Closed)?
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    /// Last accepted acknowledge, including its full parameter list.
    pub fn last_ack(&self) -> Option<Ack> {
        self.status.borrow().last_ack.clone()
    }

    /// Wait until the connection is established.
    pub async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.status.clone();
        rx.wait_for(|s| s.connected)
            .await
            .map_err(|_| TextError::Closed)?;
        Ok(())
    }

    /// Stop the connection task.
    pub fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
    }
}

struct Connection {
    frames: FramedRead<OwnedReadHalf, DelimitedCodec>,
    write: OwnedWriteHalf,
}

struct Pending {
    seq: u16,
    name: String,
    reply: oneshot::Sender<Result<Ack>>,
    deadline: Option<Instant>,
}

struct ClientTask {
    addr: SocketAddr,
    config: ClientConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
    status: watch::Sender<ClientStatus>,
    txseq: u16,
    pending: Option<Pending>,
}

impl ClientTask {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        let mut conn: Option<Connection> = None;
        let mut retry_at = Instant::now();

        loop {
            let deadline = self.pending.as_ref().and_then(|p| p.deadline);
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Request::Command { name, params, reply }) => {
                        if let Err(err) = self.begin(&mut conn, name, params, reply).await {
                            debug!(addr = %self.addr, error = %err, "command write failed");
                            self.disconnected(&mut conn);
                            retry_at = Instant::now();
                        }
                    }
                    Some(Request::Shutdown) | None => break,
                },
                frame = next_frame(&mut conn) => match frame {
                    Some(Ok(frame)) => self.on_frame(&frame),
                    Some(Err(err)) => {
                        debug!(addr = %self.addr, error = %err, "read failed");
                        self.disconnected(&mut conn);
                        retry_at = Instant::now();
                    }
                    None => {
                        self.disconnected(&mut conn);
                        retry_at = Instant::now();
                    }
                },
                _ = tokio::time::sleep_until(retry_at), if conn.is_none() => {
                    match connect(self.addr, &self.config.connect).await {
                        Ok(stream) => {
                            let (read, write) = stream.into_split();
                            conn = Some(Connection {
                                frames: FramedRead::new(
                                    read,
                                    DelimitedCodec::new(self.config.frame.clone()),
                                ),
                                write,
                            });
                            self.connected();
                        }
                        Err(err) => {
                            trace!(addr = %self.addr, error = %err, "connect attempt failed");
                            retry_at = Instant::now() + self.config.connect.reconnect_interval;
                        }
                    }
                },
                _ = sleep_until_opt(deadline) => self.on_timeout(),
            }
        }

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(TextError::Closed));
        }
        debug!(addr = %self.addr, "command client stopped");
    }

    fn next_seq(&mut self) -> u16 {
        self.txseq = self.txseq.wrapping_add(1);
        if self.txseq == 0 {
            self.txseq = 1;
        }
        self.txseq
    }

    /// Send a command. An `Err` means the connection is broken; caller-level
    /// failures are reported through `reply`.
    async fn begin(
        &mut self,
        conn: &mut Option<Connection>,
        name: String,
        params: Vec<String>,
        reply: oneshot::Sender<Result<Ack>>,
    ) -> std::result::Result<(), TextError> {
        if let Some(pending) = &self.pending {
            let _ = reply.send(Err(TextError::Busy { seq: pending.seq }));
            return Ok(());
        }
        let Some(connection) = conn.as_mut() else {
            let _ = reply.send(Err(TextError::NotConnected));
            return Ok(());
        };

        let seq = self.next_seq();
        let command = Message::Command(Command {
            seq,
            name: name.clone(),
            params,
        });
        let mut buf = BytesMut::new();
        if let Err(err) = command.encode(&mut buf) {
            let _ = reply.send(Err(err));
            return Ok(());
        }

        match write_bounded(&mut connection.write, &buf, self.config.connect.write_timeout).await {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                warn!(addr = %self.addr, seq, error = %err, "command not flushed in time");
            }
            Err(err) => {
                let _ = reply.send(Err(TextError::Disconnected));
                return Err(err.into());
            }
        }

        trace!(addr = %self.addr, seq, name = %name, "command sent");
        self.pending = Some(Pending {
            seq,
            name,
            reply,
            deadline: self.config.ack_timeout.map(|t| Instant::now() + t),
        });
        self.status.send_modify(|s| s.in_flight = Some(seq));
        Ok(())
    }

    fn on_frame(&mut self, frame: &Bytes) {
        match Message::parse(frame) {
            Ok(Message::Ack(ack)) => self.on_ack(ack),
            Ok(Message::Event(event)) => {
                let _ = self.events.send(ClientEvent::Event(event));
            }
            Ok(Message::Command(command)) => {
                debug!(addr = %self.addr, seq = command.seq, "ignoring command from server");
            }
            Err(err) => debug!(addr = %self.addr, error = %err, "dropping malformed frame"),
        }
    }

    fn on_ack(&mut self, ack: Ack) {
        let matches = self.pending.as_ref().is_some_and(|p| p.seq == ack.seq);
        if !matches {
            debug!(addr = %self.addr, seq = ack.seq, "dropping unexpected acknowledge");
            return;
        }
        let Some(pending) = self.pending.take() else {
            return;
        };
        if pending.name != ack.name {
            debug!(seq = ack.seq, sent = %pending.name, acked = %ack.name, "acknowledge names a different command");
        }
        self.status.send_modify(|s| {
            s.in_flight = None;
            s.last_ack = Some(ack.clone());
        });
        let _ = pending.reply.send(Ok(ack));
    }

    fn on_timeout(&mut self) {
        let expired = self
            .pending
            .as_ref()
            .and_then(|p| p.deadline)
            .is_some_and(|d| Instant::now() >= d);
        if !expired {
            return;
        }
        if let Some(pending) = self.pending.take() {
            let timeout = self.config.ack_timeout.unwrap_or_default();
            warn!(addr = %self.addr, seq = pending.seq, name = %pending.name, "acknowledge timed out");
            self.status.send_modify(|s| s.in_flight = None);
            let _ = pending.reply.send(Err(TextError::Timeout(timeout)));
        }
    }

    fn connected(&mut self) {
        info!(addr = %self.addr, "connected to command server");
        self.status.send_modify(|s| s.connected = true);
        let _ = self.events.send(ClientEvent::Connected(true));
    }

    fn disconnected(&mut self, conn: &mut Option<Connection>) {
        if conn.take().is_none() {
            return;
        }
        info!(addr = %self.addr, "connection to command server lost");
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(TextError::Disconnected));
        }
        self.status.send_modify(|s| {
            s.connected = false;
            s.in_flight = None;
            s.last_ack = None;
        });
        let _ = self.events.send(ClientEvent::Connected(false));
    }
}

async fn next_frame(conn: &mut Option<Connection>) -> Option<std::result::Result<Bytes, FrameError>> {
    match conn {
        Some(connection) => connection.frames.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
