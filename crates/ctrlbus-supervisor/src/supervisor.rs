use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use ctrlbus_text::{ClientConfig, ClientEvent, ClientEvents, CommandClient, Event, TextError};
use ctrlbus_transport::config::millis;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, SupervisorError};
use crate::process::ProcessControl;
use crate::revision::Revision;
use crate::sink::LogSink;

/// Default bound on waiting for a started process to report running.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Command that returns the driver's package revision.
pub const REVISION_COMMAND: &str = "GetRevision";

/// Command that initializes the board and returns its application revision.
pub const BOARD_INIT_COMMAND: &str = "BoardInitialize";

const PROCESS_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Supervisor configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Label used in log records.
    pub name: String,
    #[serde(with = "millis")]
    pub startup_timeout: Duration,
    /// Revision the driver process must report.
    pub expected_revision: Revision,
    /// Revision the board firmware must report.
    pub expected_board_revision: Revision,
    pub client: ClientConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            name: "driver".to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            expected_revision: Revision::default(),
            expected_board_revision: Revision::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Connection and revision state of one driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    pub connected: bool,
    pub revision: Option<Revision>,
    pub revision_valid: bool,
    pub board_revision: Option<Revision>,
    pub board_revision_valid: bool,
}

impl SupervisorStatus {
    /// Both the driver and the board report a compatible revision.
    pub fn is_ready(&self) -> bool {
        self.revision_valid && self.board_revision_valid
    }
}

/// Notifications from [`Supervisor::next_event`].
#[derive(Debug)]
pub enum SupervisorEvent {
    Connected(bool),
    /// The driver answered the revision request.
    Revision { revision: Revision, valid: bool },
    /// The board answered the initialization request.
    BoardRevision { revision: Revision, valid: bool },
    /// A handshake command failed; the gate stays closed until the next
    /// connection.
    HandshakeFailed {
        command: &'static str,
        error: SupervisorError,
    },
    /// An event broadcast by the driver.
    Event(Event),
}

/// Keeps a driver process running and gates readiness on its revisions.
///
/// After [`start`](Self::start), the owner drives the supervisor by calling
/// [`next_event`](Self::next_event) in a loop. Every new connection runs the
/// revision handshake; a lost connection closes the gate until the next one.
pub struct Supervisor<P> {
    addr: SocketAddr,
    config: SupervisorConfig,
    process: P,
    sink: Option<Box<dyn LogSink>>,
    client: Option<CommandClient>,
    events: Option<ClientEvents>,
    status: SupervisorStatus,
    queued: VecDeque<SupervisorEvent>,
}

impl<P: ProcessControl> Supervisor<P> {
    /// Supervise `process`, which serves the text protocol on `addr`.
    pub fn new(addr: SocketAddr, process: P, config: SupervisorConfig) -> Self {
        Self {
            addr,
            config,
            process,
            sink: None,
            client: None,
            events: None,
            status: SupervisorStatus::default(),
            queued: VecDeque::new(),
        }
    }

    /// Record state transitions to `sink`.
    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn status(&self) -> SupervisorStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }

    /// Text client for application commands, once started.
    pub fn client(&self) -> Option<&CommandClient> {
        self.client.as_ref()
    }

    /// Launch the process unless it already runs, wait for it to come up,
    /// then start connecting to it.
    pub async fn start(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        if self.process.is_running() {
            info!(driver = %self.config.name, "driver process already running");
        } else {
            self.process.start()?;
            self.record("process started");
        }

        let timeout = self.config.startup_timeout;
        let deadline = Instant::now() + timeout;
        while !self.process.is_running() {
            if Instant::now() >= deadline {
                warn!(driver = %self.config.name, ?timeout, "driver process failed to start");
                self.record("process failed to start");
                return Err(SupervisorError::StartupFailed(timeout));
            }
            tokio::time::sleep(PROCESS_POLL_INTERVAL).await;
        }

        let (client, events) = CommandClient::connect(self.addr, self.config.client.clone());
        self.client = Some(client);
        self.events = Some(events);
        info!(driver = %self.config.name, addr = %self.addr, "supervisor started");
        Ok(())
    }

    /// Wait for the next supervisor notification.
    ///
    /// The revision handshake runs once per connection. A command that fails
    /// is reported as [`SupervisorEvent::HandshakeFailed`] and is not retried
    /// until the link reconnects or the caller invokes
    /// [`retry_handshake`](Self::retry_handshake).
    ///
    /// Returns `None` before [`start`](Self::start) or after the client task
    /// has stopped.
    pub async fn next_event(&mut self) -> Option<SupervisorEvent> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Some(event);
            }
            match self.events.as_mut()?.recv().await? {
                ClientEvent::Connected(true) => {
                    self.status.connected = true;
                    info!(driver = %self.config.name, "driver connected");
                    self.record("connected");
                    self.queued.push_back(SupervisorEvent::Connected(true));
                    self.handshake().await;
                }
                ClientEvent::Connected(false) => {
                    self.status = SupervisorStatus::default();
                    warn!(driver = %self.config.name, "driver disconnected");
                    self.record("disconnected");
                    return Some(SupervisorEvent::Connected(false));
                }
                ClientEvent::Event(event) => return Some(SupervisorEvent::Event(event)),
            }
        }
    }

    /// Run the revision handshake again on the current connection. Results
    /// are delivered through [`next_event`](Self::next_event).
    pub async fn retry_handshake(&mut self) -> Result<()> {
        if !self.status.connected {
            return Err(TextError::NotConnected.into());
        }
        self.handshake().await;
        Ok(())
    }

    /// Stop the client and the process.
    pub fn shutdown(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.shutdown();
        }
        self.events = None;
        self.queued.clear();
        self.status = SupervisorStatus::default();
        self.process.stop()?;
        self.record("process stopped");
        Ok(())
    }

    async fn handshake(&mut self) {
        let Some(client) = self.client.clone() else {
            return;
        };

        match query_revision(&client, REVISION_COMMAND).await {
            Ok(revision) => {
                let valid = revision.is_compatible_with(&self.config.expected_revision);
                self.status.revision = Some(revision);
                self.status.revision_valid = valid;
                self.report("driver", revision, self.config.expected_revision, valid);
                self.queued
                    .push_back(SupervisorEvent::Revision { revision, valid });
            }
            Err(error) => self.handshake_failed(REVISION_COMMAND, error),
        }

        match query_revision(&client, BOARD_INIT_COMMAND).await {
            Ok(revision) => {
                let valid = revision.is_compatible_with(&self.config.expected_board_revision);
                self.status.board_revision = Some(revision);
                self.status.board_revision_valid = valid;
                self.report("board", revision, self.config.expected_board_revision, valid);
                self.queued
                    .push_back(SupervisorEvent::BoardRevision { revision, valid });
            }
            Err(error) => self.handshake_failed(BOARD_INIT_COMMAND, error),
        }
    }

    fn report(&mut self, what: &str, revision: Revision, expected: Revision, valid: bool) {
        if valid {
            info!(driver = %self.config.name, %revision, "{what} revision accepted");
            self.record(&format!("{what} revision {revision} valid"));
        } else {
            warn!(
                driver = %self.config.name,
                %revision,
                %expected,
                "{what} revision mismatch"
            );
            self.record(&format!(
                "{what} revision {revision} mismatch, expected {}.{}.x",
                expected.major, expected.minor
            ));
        }
    }

    fn handshake_failed(&mut self, command: &'static str, error: SupervisorError) {
        warn!(driver = %self.config.name, command, error = %error, "handshake command failed");
        self.record(&format!("{command} failed: {error}"));
        self.queued
            .push_back(SupervisorEvent::HandshakeFailed { command, error });
    }

    fn record(&mut self, message: &str) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Err(err) = sink.append(&format!("{}: {}", self.config.name, message)) {
            debug!(error = %err, "log sink write failed");
        }
    }
}

async fn query_revision(client: &CommandClient, command: &str) -> Result<Revision> {
    let ack = client.request(command, &[]).await?;
    if !ack.is_ok() {
        return Err(SupervisorError::Rejected {
            command: command.to_string(),
            code: ack.code,
        });
    }
    Revision::from_params(&ack.params)
}
