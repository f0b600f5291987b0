use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ctrlbus_frame::{DelimitedCodec, FrameConfig};
use ctrlbus_transport::config::{millis, DEFAULT_WRITE_TIMEOUT};
use ctrlbus_transport::{write_bounded, TcpServerSocket};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, TextError};
use crate::message::{Ack, Command, Event, Message};

/// Identifier of one accepted connection.
///
/// Assigned from a counter owned by the server; never reused while the
/// server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint-{}", self.0)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Limits applied to inbound frames.
    pub frame: FrameConfig,
    /// Bound on each write to an endpoint. Default: 100 ms.
    #[serde(with = "millis")]
    pub write_timeout: Duration,
    /// Event sent to each newly accepted endpoint.
    #[serde(skip)]
    pub welcome_event: Option<Event>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            welcome_event: None,
        }
    }
}

/// Result of handling one command: `OK` iff `code == 0`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReply {
    pub code: u32,
    pub params: Vec<String>,
}

impl CommandReply {
    pub fn ok(params: Vec<String>) -> Self {
        Self { code: 0, params }
    }

    pub fn error(code: u32) -> Self {
        Self {
            code,
            params: Vec::new(),
        }
    }
}

/// Application logic behind a [`CommandServer`].
///
/// Called on the server task for every well-formed command, in arrival
/// order. Implemented for any `FnMut(&str, &[String]) -> CommandReply`.
pub trait CommandHandler: Send + 'static {
    fn handle_command(&mut self, name: &str, params: &[String]) -> CommandReply;
}

impl<F> CommandHandler for F
where
    F: FnMut(&str, &[String]) -> CommandReply + Send + 'static,
{
    fn handle_command(&mut self, name: &str, params: &[String]) -> CommandReply {
        self(name, params)
    }
}

enum Control {
    Event(Event),
    Shutdown,
}

enum Inbound {
    Frame { endpoint: EndpointId, frame: Bytes },
    Closed(EndpointId),
}

struct Endpoint {
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

/// Driver-side text protocol server.
pub struct CommandServer {
    socket: TcpServerSocket,
    config: ServerConfig,
}

impl CommandServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> Result<Self> {
        let socket = TcpServerSocket::bind(addr).await?;
        Ok(Self { socket, config })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// Start serving on a background task.
    pub fn serve<H: CommandHandler>(self, handler: H) -> ServerHandle {
        let local_addr = self.socket.local_addr();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (count_tx, count_rx) = watch::channel(0);

        let task = ServerTask {
            socket: self.socket,
            config: self.config,
            handler,
            endpoints: BTreeMap::new(),
            next_endpoint_id: 1,
            inbound_tx,
            count_tx,
        };
        let task = tokio::spawn(task.run(control_rx, inbound_rx));

        ServerHandle {
            local_addr,
            control: control_tx,
            endpoints: count_rx,
            task,
        }
    }
}

/// Handle to a running [`CommandServer`].
///
/// Dropping every handle and [`EventSender`] stops the server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    control: mpsc::UnboundedSender<Control>,
    endpoints: watch::Receiver<usize>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Broadcast an event to every connected endpoint.
    pub fn send_event(&self, name: &str, params: Vec<String>) -> Result<()> {
        self.control
            .send(Control::Event(Event::new(name, params)))
            .map_err(|_| TextError::Closed)
    }

    /// Cloneable sender for broadcasting events from other tasks.
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            control: self.control.clone(),
        }
    }

    /// Number of currently connected endpoints.
    pub fn endpoint_count(&self) -> usize {
        *self.endpoints.borrow()
    }

    /// Wait until exactly `count` endpoints are connected.
    pub async fn wait_for_endpoints(&self, count: usize) -> Result<()> {
        let mut rx = self.endpoints.clone();
        rx.wait_for(|&n| n == count)
            .await
            .map_err(|_| TextError::Closed)?;
        Ok(())
    }

    /// Close every endpoint and stop accepting.
    pub async fn shutdown(self) {
        let _ = self.control.send(Control::Shutdown);
        if let Err(err) = self.task.await {
            warn!(error = %err, "server task ended abnormally");
        }
    }
}

/// Broadcasts events through a running server.
#[derive(Clone)]
pub struct EventSender {
    control: mpsc::UnboundedSender<Control>,
}

impl EventSender {
    pub fn send_event(&self, name: &str, params: Vec<String>) -> Result<()> {
        self.control
            .send(Control::Event(Event::new(name, params)))
            .map_err(|_| TextError::Closed)
    }
}

struct ServerTask<H> {
    socket: TcpServerSocket,
    config: ServerConfig,
    handler: H,
    endpoints: BTreeMap<EndpointId, Endpoint>,
    next_endpoint_id: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    count_tx: watch::Sender<usize>,
}

impl<H: CommandHandler> ServerTask<H> {
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) {
        loop {
            tokio::select! {
                accepted = self.socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let (read, write) = stream.into_split();
                        self.register(read, write, peer);
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(input) = inbound.recv() => match input {
                    Inbound::Frame { endpoint, frame } => self.on_frame(endpoint, &frame),
                    Inbound::Closed(endpoint) => self.remove(endpoint),
                },
                ctl = control.recv() => match ctl {
                    Some(Control::Event(event)) => self.broadcast(&Message::Event(event)),
                    Some(Control::Shutdown) | None => break,
                },
            }
        }

        let ids: Vec<EndpointId> = self.endpoints.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
        info!(local_addr = %self.socket.local_addr(), "command server stopped");
    }

    fn register(&mut self, read: OwnedReadHalf, write: OwnedWriteHalf, peer: SocketAddr) {
        let id = EndpointId(self.next_endpoint_id);
        self.next_endpoint_id += 1;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(
            id,
            write,
            outbound_rx,
            self.config.write_timeout,
            self.inbound_tx.clone(),
        ));
        let reader = tokio::spawn(read_loop(
            id,
            FramedRead::new(read, DelimitedCodec::new(self.config.frame.clone())),
            self.inbound_tx.clone(),
        ));

        info!(endpoint = %id, %peer, "endpoint connected");
        self.endpoints.insert(
            id,
            Endpoint {
                peer,
                outbound,
                reader,
            },
        );
        self.count_tx.send_replace(self.endpoints.len());

        if let Some(welcome) = self.config.welcome_event.clone() {
            self.send_to(id, &Message::Event(welcome));
        }
    }

    fn remove(&mut self, id: EndpointId) {
        if let Some(endpoint) = self.endpoints.remove(&id) {
            endpoint.reader.abort();
            // Dropping `outbound` ends the writer task, which closes the socket.
            info!(endpoint = %id, peer = %endpoint.peer, "endpoint disconnected");
            self.count_tx.send_replace(self.endpoints.len());
        }
    }

    fn on_frame(&mut self, id: EndpointId, frame: &[u8]) {
        let command = match Message::parse(frame) {
            Ok(Message::Command(command)) => command,
            Ok(other) => {
                debug!(endpoint = %id, frame = %other, "ignoring non-command frame");
                return;
            }
            Err(err) => {
                debug!(endpoint = %id, error = %err, "dropping malformed frame");
                return;
            }
        };

        trace!(endpoint = %id, seq = command.seq, name = %command.name, "command received");
        let reply = self.handler.handle_command(&command.name, &command.params);
        let ack = Ack::reply_to(&command, reply.code, reply.params);
        self.send_to(id, &Message::Ack(ack));
    }

    fn send_to(&mut self, id: EndpointId, message: &Message) {
        let Some(bytes) = encode(message) else {
            return;
        };
        if let Some(endpoint) = self.endpoints.get(&id) {
            if endpoint.outbound.send(bytes).is_err() {
                self.remove(id);
            }
        }
    }

    fn broadcast(&mut self, message: &Message) {
        let Some(bytes) = encode(message) else {
            return;
        };
        let closed: Vec<EndpointId> = self
            .endpoints
            .iter()
            .filter(|(_, endpoint)| endpoint.outbound.send(bytes.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        for id in closed {
            self.remove(id);
        }
    }
}

fn encode(message: &Message) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    match message.encode(&mut buf) {
        Ok(()) => Some(buf.freeze()),
        Err(err) => {
            warn!(error = %err, "cannot encode outgoing frame");
            None
        }
    }
}

async fn read_loop(
    id: EndpointId,
    mut frames: FramedRead<OwnedReadHalf, DelimitedCodec>,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    while let Some(next) = frames.next().await {
        match next {
            Ok(frame) => {
                if inbound.send(Inbound::Frame { endpoint: id, frame }).is_err() {
                    return;
                }
            }
            Err(err) => {
                debug!(endpoint = %id, error = %err, "read failed");
                break;
            }
        }
    }
    let _ = inbound.send(Inbound::Closed(id));
}

async fn write_loop(
    id: EndpointId,
    mut write: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    timeout: Duration,
    inbound: mpsc::UnboundedSender<Inbound>,
) {
    while let Some(bytes) = outbound.recv().await {
        match write_bounded(&mut write, &bytes, timeout).await {
            Ok(()) => {}
            Err(err) if err.is_recoverable() => {
                warn!(endpoint = %id, error = %err, "write not flushed in time");
            }
            Err(err) => {
                debug!(endpoint = %id, error = %err, "write failed");
                let _ = inbound.send(Inbound::Closed(id));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    async fn read_frames(stream: &mut TcpStream, count: usize) -> Vec<String> {
        let mut frames = FramedRead::new(stream, DelimitedCodec::default());
        let mut out = Vec::new();
        while out.len() < count {
            let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
                .await
                .expect("frame should arrive")
                .expect("stream should stay open")
                .unwrap();
            out.push(String::from_utf8(frame.to_vec()).unwrap());
        }
        out
    }

    fn revision_handler() -> impl CommandHandler {
        |name: &str, _params: &[String]| match name {
            "GetRevision" => CommandReply::ok(vec!["2".into(), "5".into(), "1".into()]),
            _ => CommandReply::error(3),
        }
    }

    #[test]
    fn endpoint_id_display() {
        assert_eq!(EndpointId(4).to_string(), "endpoint-4");
    }

    #[tokio::test]
    async fn command_is_acknowledged() {
        let server = CommandServer::bind(loopback(), ServerConfig::default())
            .await
            .unwrap();
        let handle = server.serve(revision_handler());

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream.write_all(b"<C 1 GetRevision>").await.unwrap();

        let frames = read_frames(&mut stream, 1).await;
        assert_eq!(frames, vec!["A 1 GetRevision OK 0 2 5 1"]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ack_carries_trailer_and_nok_code() {
        let server = CommandServer::bind(loopback(), ServerConfig::default())
            .await
            .unwrap();
        let handle = server.serve(revision_handler());

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream.write_all(b"<C 4 Explode now>").await.unwrap();

        let expected = b"<A 4 Explode NOK 3>\n\r";
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, expected);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let server = CommandServer::bind(loopback(), ServerConfig::default())
            .await
            .unwrap();
        let handle = server.serve(revision_handler());

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        stream
            .write_all(b"<C 1><X 2 Foo><E Hello><C x GetRevision><C 2 GetRevision>")
            .await
            .unwrap();

        let frames = read_frames(&mut stream, 1).await;
        assert_eq!(frames, vec!["A 2 GetRevision OK 0 2 5 1"]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn ack_goes_only_to_originating_endpoint() {
        let server = CommandServer::bind(loopback(), ServerConfig::default())
            .await
            .unwrap();
        let handle = server.serve(revision_handler());

        let mut first = TcpStream::connect(handle.local_addr()).await.unwrap();
        let mut second = TcpStream::connect(handle.local_addr()).await.unwrap();
        handle.wait_for_endpoints(2).await.unwrap();

        second.write_all(b"<C 9 GetRevision>").await.unwrap();
        assert_eq!(
            read_frames(&mut second, 1).await,
            vec!["A 9 GetRevision OK 0 2 5 1"]
        );

        // The next frame `first` sees must be the broadcast, not the ack.
        handle.send_event("Status", vec!["idle".into()]).unwrap();
        assert_eq!(read_frames(&mut first, 1).await, vec!["E Status idle"]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn events_are_broadcast_to_all_endpoints() {
        let server = CommandServer::bind(loopback(), ServerConfig::default())
            .await
            .unwrap();
        let handle = server.serve(revision_handler());

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(handle.local_addr()).await.unwrap());
        }
        handle.wait_for_endpoints(3).await.unwrap();

        handle
            .event_sender()
            .send_event("Alarm", vec!["7".into()])
            .unwrap();
        for client in &mut clients {
            assert_eq!(read_frames(client, 1).await, vec!["E Alarm 7"]);
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn welcome_event_sent_on_connect() {
        let config = ServerConfig {
            welcome_event: Some(Event::new("Ready", vec!["1".into()])),
            ..ServerConfig::default()
        };
        let server = CommandServer::bind(loopback(), config).await.unwrap();
        let handle = server.serve(revision_handler());

        let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        assert_eq!(read_frames(&mut stream, 1).await, vec!["E Ready 1"]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_removes_endpoint() {
        let server = CommandServer::bind(loopback(), ServerConfig::default())
            .await
            .unwrap();
        let handle = server.serve(revision_handler());

        let stream = TcpStream::connect(handle.local_addr()).await.unwrap();
        handle.wait_for_endpoints(1).await.unwrap();
        drop(stream);
        tokio::time::timeout(Duration::from_secs(2), handle.wait_for_endpoints(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.endpoint_count(), 0);
        handle.shutdown().await;
    }
}
