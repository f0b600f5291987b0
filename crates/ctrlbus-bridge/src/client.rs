use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use ctrlbus_frame::{DelimitedCodec, FrameConfig, FrameError};
use ctrlbus_transport::config::millis;
use ctrlbus_transport::{connect, write_bounded, ConnectConfig, TransportError};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use crate::error::{BridgeError, Result};
use crate::filter::AcceptanceFilter;
use crate::wire::{BridgeMessage, BusFrame};

/// Default pause between filter registration attempts.
pub const DEFAULT_FILTER_INTERVAL: Duration = Duration::from_millis(50);

/// Default bound on flushing one frame to the bridge.
pub const DEFAULT_BRIDGE_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bridge client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub connect: ConnectConfig,
    pub frame: FrameConfig,
    /// Filter registered with the bridge on every connect.
    pub filter: AcceptanceFilter,
    /// Pause between filter registrations until the bridge echoes one.
    #[serde(with = "millis")]
    pub filter_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            connect: ConnectConfig::default().with_write_timeout(DEFAULT_BRIDGE_WRITE_TIMEOUT),
            frame: FrameConfig::default(),
            filter: AcceptanceFilter::default(),
            filter_interval: DEFAULT_FILTER_INTERVAL,
        }
    }
}

impl BridgeConfig {
    /// Same configuration with a different acceptance filter.
    pub fn with_filter(mut self, filter: AcceptanceFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Notifications from a bridge client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// The connection came up (`true`) or went down.
    Connected(bool),
    /// The bridge echoed the acceptance filter.
    FilterOpen,
    /// A data frame that passed the acceptance filter.
    Frame(BusFrame),
}

/// Receiver for [`BridgeEvent`]s, in arrival order.
pub type BridgeEvents = mpsc::UnboundedReceiver<BridgeEvent>;

/// Snapshot of the bridge connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStatus {
    pub connected: bool,
    pub filter_open: bool,
}

enum Outbound {
    Data(BusFrame),
    Shutdown,
}

/// Starts bridge connection tasks.
pub struct BridgeClient;

impl BridgeClient {
    /// Spawn a connection task for the bridge at `addr`.
    pub fn spawn(addr: SocketAddr, config: BridgeConfig) -> (BridgeHandle, BridgeEvents) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(BridgeStatus::default());
        let filter = config.filter;

        let task = BridgeTask {
            addr,
            config,
            events: events_tx,
            status: status_tx,
        };
        tokio::spawn(task.run(outbound_rx));

        let handle = BridgeHandle {
            filter,
            outbound: outbound_tx,
            status: status_rx,
        };
        (handle, events_rx)
    }
}

/// Handle to a running bridge client. Cheap to clone.
#[derive(Clone)]
pub struct BridgeHandle {
    filter: AcceptanceFilter,
    outbound: mpsc::UnboundedSender<Outbound>,
    status: watch::Receiver<BridgeStatus>,
}

impl BridgeHandle {
    /// Queue a data frame for the bus.
    ///
    /// Delivery is not confirmed. Fails without a connection or when the
    /// payload exceeds 8 bytes.
    pub fn send(&self, address: u16, payload: &[u8]) -> Result<()> {
        let frame = BusFrame::new(address, payload)?;
        if !self.status.borrow().connected {
            return Err(BridgeError::NotConnected);
        }
        self.outbound
            .send(Outbound::Data(frame))
            .map_err(|_| BridgeError::Closed)
    }

    pub fn status(&self) -> BridgeStatus {
        *self.status.borrow()
    }

    pub fn filter(&self) -> AcceptanceFilter {
        self.filter
    }

    /// Wait until the bridge has echoed the acceptance filter.
    pub async fn wait_filter_open(&self) -> Result<()> {
        let mut rx = self.status.clone();
        rx.wait_for(|s| s.filter_open)
            .await
            .map_err(|_| BridgeError::Closed)?;
        Ok(())
    }

    /// Stop the connection task.
    pub fn shutdown(&self) {
        let _ = self.outbound.send(Outbound::Shutdown);
    }
}

struct Connection {
    frames: FramedRead<OwnedReadHalf, DelimitedCodec>,
    write: OwnedWriteHalf,
    filter_open: bool,
    next_filter_at: Instant,
}

struct BridgeTask {
    addr: SocketAddr,
    config: BridgeConfig,
    events: mpsc::UnboundedSender<BridgeEvent>,
    status: watch::Sender<BridgeStatus>,
}

impl BridgeTask {
    async fn run(mut self, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
        let mut conn: Option<Connection> = None;
        let mut retry_at = Instant::now();

        loop {
            let filter_at = conn
                .as_ref()
                .filter(|c| !c.filter_open)
                .map(|c| c.next_filter_at);
            tokio::select! {
                item = outbound.recv() => match item {
                    Some(Outbound::Data(frame)) => {
                        if let Err(err) = self.send_data(&mut conn, frame).await {
                            debug!(addr = %self.addr, error = %err, "bridge write failed");
                            self.disconnected(&mut conn);
                            retry_at = Instant::now();
                        }
                    }
                    Some(Outbound::Shutdown) | None => break,
                },
                frame = next_frame(&mut conn) => match frame {
                    Some(Ok(frame)) => self.on_frame(&mut conn, &frame),
                    Some(Err(err)) => {
                        debug!(addr = %self.addr, error = %err, "bridge read failed");
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
                                filter_open: false,
                                next_filter_at: Instant::now(),
                            });
                            info!(addr = %self.addr, filter = %self.config.filter, "connected to bridge");
                            self.status.send_replace(BridgeStatus {
                                connected: true,
                                filter_open: false,
                            });
                            let _ = self.events.send(BridgeEvent::Connected(true));
                        }
                        Err(err) => {
                            trace!(addr = %self.addr, error = %err, "bridge connect attempt failed");
                            retry_at = Instant::now() + self.config.connect.reconnect_interval;
                        }
                    }
                },
                _ = sleep_until_opt(filter_at) => {
                    if let Err(err) = self.register_filter(&mut conn).await {
                        debug!(addr = %self.addr, error = %err, "filter registration failed");
                        self.disconnected(&mut conn);
                        retry_at = Instant::now();
                    }
                },
            }
        }
        debug!(addr = %self.addr, "bridge client stopped");
    }

    async fn register_filter(
        &mut self,
        conn: &mut Option<Connection>,
    ) -> std::result::Result<(), TransportError> {
        let Some(connection) = conn.as_mut() else {
            return Ok(());
        };
        connection.next_filter_at = Instant::now() + self.config.filter_interval;
        trace!(addr = %self.addr, filter = %self.config.filter, "registering acceptance filter");
        self.write(connection, &BridgeMessage::Filter(self.config.filter))
            .await
    }

    async fn send_data(
        &mut self,
        conn: &mut Option<Connection>,
        frame: BusFrame,
    ) -> std::result::Result<(), TransportError> {
        let Some(connection) = conn.as_mut() else {
            debug!(addr = %self.addr, address = frame.address, "dropping frame queued before disconnect");
            return Ok(());
        };
        self.write(connection, &BridgeMessage::Data(frame)).await
    }

    /// Write one frame. Only a broken connection is reported as an error.
    async fn write(
        &self,
        connection: &mut Connection,
        message: &BridgeMessage,
    ) -> std::result::Result<(), TransportError> {
        let mut buf = BytesMut::new();
        if let Err(err) = message.encode(&mut buf) {
            warn!(addr = %self.addr, error = %err, "cannot encode bridge frame");
            return Ok(());
        }
        match write_bounded(&mut connection.write, &buf, self.config.connect.write_timeout).await {
            Err(err) if err.is_recoverable() => {
                warn!(addr = %self.addr, error = %err, "bridge frame not flushed in time");
                Ok(())
            }
            other => other,
        }
    }

    fn on_frame(&mut self, conn: &mut Option<Connection>, frame: &Bytes) {
        let Some(connection) = conn.as_mut() else {
            return;
        };
        match BridgeMessage::parse(frame) {
            Ok(BridgeMessage::Filter(echo)) => {
                if echo != self.config.filter {
                    debug!(addr = %self.addr, echo = %echo, "ignoring foreign filter echo");
                    return;
                }
                if !connection.filter_open {
                    connection.filter_open = true;
                    info!(addr = %self.addr, filter = %echo, "acceptance filter open");
                    self.status.send_modify(|s| s.filter_open = true);
                    let _ = self.events.send(BridgeEvent::FilterOpen);
                }
            }
            Ok(BridgeMessage::Data(data)) => {
                if !self.config.filter.accepts(data.address) {
                    trace!(addr = %self.addr, address = data.address, "frame outside acceptance filter");
                    return;
                }
                let _ = self.events.send(BridgeEvent::Frame(data));
            }
            Err(err) => trace!(addr = %self.addr, error = %err, "dropping bridge frame"),
        }
    }

    fn disconnected(&mut self, conn: &mut Option<Connection>) {
        if conn.take().is_none() {
            return;
        }
        info!(addr = %self.addr, "connection to bridge lost");
        self.status.send_replace(BridgeStatus::default());
        let _ = self.events.send(BridgeEvent::Connected(false));
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

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    fn loopback() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
    }

    fn config(address: u16) -> BridgeConfig {
        BridgeConfig {
            connect: ConnectConfig {
                reconnect_interval: Duration::from_millis(20),
                ..ConnectConfig::default()
            },
            ..BridgeConfig::default()
        }
        .with_filter(AcceptanceFilter::exact(address))
    }

    async fn read_frame(stream: &mut TcpStream) -> String {
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            match byte[0] {
                b'<' => frame.clear(),
                b'>' => return String::from_utf8(frame).unwrap(),
                other => frame.push(other),
            }
        }
    }

    async fn next_event(events: &mut BridgeEvents) -> BridgeEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event should arrive")
            .expect("event channel open")
    }

    #[tokio::test]
    async fn filter_is_repeated_until_echoed() {
        let listener = TcpListener::bind(loopback()).await.unwrap();
        let (handle, mut events) = BridgeClient::spawn(listener.local_addr().unwrap(), config(256));
        let (mut bridge, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::Connected(true));

        let started = Instant::now();
        for _ in 0..3 {
            assert_eq!(read_frame(&mut bridge).await, "F 4095 256");
        }
        // Three registrations are at least two intervals apart.
        assert!(started.elapsed() >= Duration::from_millis(90));
        assert!(!handle.status().filter_open);

        bridge.write_all(b"<F 4095 256>").await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::FilterOpen);
        assert!(handle.status().filter_open);

        // Registrations stop once the filter is open. Anything still in
        // flight from before the echo is drained first.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let mut pending = vec![0u8; 256];
        let _ = tokio::time::timeout(Duration::from_millis(10), bridge.read(&mut pending)).await;
        let quiet = tokio::time::timeout(Duration::from_millis(150), bridge.read(&mut pending)).await;
        assert!(quiet.is_err(), "no registration expected after the echo");
        handle.shutdown();
    }

    #[tokio::test]
    async fn frames_outside_filter_are_not_delivered() {
        let listener = TcpListener::bind(loopback()).await.unwrap();
        let (handle, mut events) = BridgeClient::spawn(listener.local_addr().unwrap(), config(256));
        let (mut bridge, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::Connected(true));

        bridge
            .write_all(b"<F 4095 256><D 300 1 2><D 256><D 256 9 8>")
            .await
            .unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::FilterOpen);
        assert_eq!(
            next_event(&mut events).await,
            BridgeEvent::Frame(BusFrame {
                address: 256,
                payload: vec![9, 8],
            })
        );
        handle.shutdown();
    }

    #[tokio::test]
    async fn send_writes_decimal_data_frame() {
        let listener = TcpListener::bind(loopback()).await.unwrap();
        let (handle, mut events) = BridgeClient::spawn(listener.local_addr().unwrap(), config(0x201));
        let (mut bridge, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::Connected(true));
        assert_eq!(read_frame(&mut bridge).await, "F 4095 513");
        bridge.write_all(b"<F 4095 513>").await.unwrap();
        handle.wait_filter_open().await.unwrap();

        handle.send(0x201, &[1, 2, 255]).unwrap();
        assert_eq!(read_frame(&mut bridge).await, "D 513 1 2 255");

        let err = handle.send(0x201, &[0; 9]).unwrap_err();
        assert!(matches!(err, BridgeError::PayloadTooLong { len: 9 }));
        handle.shutdown();
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let addr = {
            let listener = TcpListener::bind(loopback()).await.unwrap();
            listener.local_addr().unwrap()
        };
        let (handle, _events) = BridgeClient::spawn(addr, config(256));
        assert!(matches!(
            handle.send(256, &[1]),
            Err(BridgeError::NotConnected)
        ));
        handle.shutdown();
    }

    #[tokio::test]
    async fn reconnects_and_reregisters_filter() {
        let listener = TcpListener::bind(loopback()).await.unwrap();
        let (handle, mut events) = BridgeClient::spawn(listener.local_addr().unwrap(), config(256));

        let (mut bridge, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::Connected(true));
        bridge.write_all(b"<F 4095 256>").await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::FilterOpen);

        drop(bridge);
        assert_eq!(next_event(&mut events).await, BridgeEvent::Connected(false));
        assert_eq!(handle.status(), BridgeStatus::default());

        let (mut bridge, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut events).await, BridgeEvent::Connected(true));
        assert_eq!(read_frame(&mut bridge).await, "F 4095 256");
        handle.shutdown();
    }
}
