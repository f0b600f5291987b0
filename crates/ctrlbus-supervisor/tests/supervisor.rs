//! Supervisor handshake against a loopback command server.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ctrlbus_supervisor::{
    LogSink, ProcessControl, Revision, Supervisor, SupervisorConfig, SupervisorError,
    SupervisorEvent,
};
use ctrlbus_text::{ClientConfig, CommandReply, CommandServer, ServerConfig, ServerHandle};
use ctrlbus_transport::ConnectConfig;

#[derive(Clone, Default)]
struct FakeProcess {
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
    stays_down: bool,
}

impl ProcessControl for FakeProcess {
    fn is_running(&mut self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn start(&mut self) -> io::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if !self.stays_down {
            self.running.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn stop(&mut self) -> io::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct MemorySink(Arc<Mutex<Vec<String>>>);

impl MemorySink {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl LogSink for MemorySink {
    fn append(&mut self, line: &str) -> io::Result<()> {
        self.0.lock().unwrap().push(line.to_string());
        Ok(())
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

async fn driver(revision: &'static [&'static str], board: Option<&'static [&'static str]>) -> ServerHandle {
    let server = CommandServer::bind("127.0.0.1:0".parse().unwrap(), ServerConfig::default())
        .await
        .unwrap();
    server.serve(move |name: &str, _params: &[String]| match (name, board) {
        ("GetRevision", _) => CommandReply::ok(strings(revision)),
        ("BoardInitialize", Some(board)) => CommandReply::ok(strings(board)),
        _ => CommandReply::error(3),
    })
}

fn config(expected: Revision, expected_board: Revision) -> SupervisorConfig {
    SupervisorConfig {
        name: "candriver".to_string(),
        startup_timeout: Duration::from_millis(200),
        expected_revision: expected,
        expected_board_revision: expected_board,
        client: ClientConfig {
            connect: ConnectConfig {
                reconnect_interval: Duration::from_millis(20),
                ..ConnectConfig::default()
            },
            ack_timeout: Some(Duration::from_secs(1)),
            ..ClientConfig::default()
        },
    }
}

async fn next(supervisor: &mut Supervisor<FakeProcess>) -> SupervisorEvent {
    tokio::time::timeout(Duration::from_secs(2), supervisor.next_event())
        .await
        .expect("supervisor event")
        .expect("supervisor still running")
}

fn unused_addr() -> SocketAddr {
    "127.0.0.1:9".parse().unwrap()
}

#[tokio::test]
async fn start_launches_stopped_process() {
    let process = FakeProcess::default();
    let mut supervisor = Supervisor::new(
        unused_addr(),
        process.clone(),
        config(Revision::default(), Revision::default()),
    );
    supervisor.start().await.unwrap();
    assert_eq!(process.starts.load(Ordering::SeqCst), 1);
    assert!(supervisor.client().is_some());

    supervisor.shutdown().unwrap();
    assert_eq!(process.stops.load(Ordering::SeqCst), 1);
    assert!(supervisor.client().is_none());
}

#[tokio::test]
async fn start_leaves_running_process_alone() {
    let process = FakeProcess::default();
    process.running.store(true, Ordering::SeqCst);
    let mut supervisor = Supervisor::new(
        unused_addr(),
        process.clone(),
        config(Revision::default(), Revision::default()),
    );
    supervisor.start().await.unwrap();
    assert_eq!(process.starts.load(Ordering::SeqCst), 0);
    supervisor.shutdown().unwrap();
}

#[tokio::test]
async fn start_fails_when_process_never_runs() {
    let process = FakeProcess {
        stays_down: true,
        ..FakeProcess::default()
    };
    let sink = MemorySink::default();
    let mut supervisor = Supervisor::new(
        unused_addr(),
        process,
        config(Revision::default(), Revision::default()),
    )
    .with_sink(sink.clone());

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::StartupFailed(_)));
    assert!(supervisor.client().is_none());
    assert!(supervisor.next_event().await.is_none());
    assert_eq!(
        sink.lines(),
        vec!["candriver: process started", "candriver: process failed to start"]
    );
}

#[tokio::test]
async fn matching_revisions_open_the_gate() {
    let server = driver(&["2", "5", "7"], Some(&["1", "3", "0"][..])).await;
    let sink = MemorySink::default();
    let mut supervisor = Supervisor::new(
        server.local_addr(),
        FakeProcess::default(),
        config(Revision::new(2, 5, 0), Revision::new(1, 3, 9)),
    )
    .with_sink(sink.clone());
    supervisor.start().await.unwrap();

    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Connected(true)));
    assert!(matches!(
        next(&mut supervisor).await,
        SupervisorEvent::Revision { revision, valid: true } if revision == Revision::new(2, 5, 7)
    ));
    assert!(matches!(
        next(&mut supervisor).await,
        SupervisorEvent::BoardRevision { revision, valid: true } if revision == Revision::new(1, 3, 0)
    ));

    assert!(supervisor.is_ready());
    let status = supervisor.status();
    assert!(status.connected);
    assert_eq!(status.revision, Some(Revision::new(2, 5, 7)));
    assert!(sink
        .lines()
        .contains(&"candriver: driver revision 2.5.7 valid".to_string()));

    supervisor.shutdown().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn minor_mismatch_keeps_gate_closed() {
    let server = driver(&["2", "5", "7"], Some(&["1", "3", "0"][..])).await;
    let sink = MemorySink::default();
    let mut supervisor = Supervisor::new(
        server.local_addr(),
        FakeProcess::default(),
        config(Revision::new(2, 4, 7), Revision::new(1, 3, 0)),
    )
    .with_sink(sink.clone());
    supervisor.start().await.unwrap();

    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Connected(true)));
    assert!(matches!(
        next(&mut supervisor).await,
        SupervisorEvent::Revision { valid: false, .. }
    ));
    assert!(matches!(
        next(&mut supervisor).await,
        SupervisorEvent::BoardRevision { valid: true, .. }
    ));
    assert!(!supervisor.is_ready());
    assert!(sink
        .lines()
        .contains(&"candriver: driver revision 2.5.7 mismatch, expected 2.4.x".to_string()));

    supervisor.shutdown().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn rejected_board_initialize_is_reported() {
    let server = driver(&["2", "5", "7"], None).await;
    let mut supervisor = Supervisor::new(
        server.local_addr(),
        FakeProcess::default(),
        config(Revision::new(2, 5, 0), Revision::new(1, 3, 0)),
    );
    supervisor.start().await.unwrap();

    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Connected(true)));
    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Revision { valid: true, .. }));
    match next(&mut supervisor).await {
        SupervisorEvent::HandshakeFailed { command, error } => {
            assert_eq!(command, "BoardInitialize");
            assert!(matches!(error, SupervisorError::Rejected { code: 3, .. }));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(supervisor.status().revision_valid);
    assert!(!supervisor.is_ready());

    supervisor.shutdown().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn handshake_retry_opens_gate_after_refusal() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let server = CommandServer::bind("127.0.0.1:0".parse().unwrap(), ServerConfig::default())
        .await
        .unwrap()
        .serve({
            let attempts = attempts.clone();
            move |name: &str, _params: &[String]| match name {
                "GetRevision" => CommandReply::ok(strings(&["2", "5", "7"])),
                "BoardInitialize" if attempts.fetch_add(1, Ordering::SeqCst) == 0 => {
                    CommandReply::error(4)
                }
                "BoardInitialize" => CommandReply::ok(strings(&["1", "3", "2"])),
                _ => CommandReply::error(1),
            }
        });
    let mut supervisor = Supervisor::new(
        server.local_addr(),
        FakeProcess::default(),
        config(Revision::new(2, 5, 0), Revision::new(1, 3, 0)),
    );

    let err = supervisor.retry_handshake().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Text(_)));

    supervisor.start().await.unwrap();
    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Connected(true)));
    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Revision { valid: true, .. }));
    assert!(matches!(
        next(&mut supervisor).await,
        SupervisorEvent::HandshakeFailed { command: "BoardInitialize", .. }
    ));
    assert!(!supervisor.is_ready());

    supervisor.retry_handshake().await.unwrap();
    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Revision { valid: true, .. }));
    match next(&mut supervisor).await {
        SupervisorEvent::BoardRevision { revision, valid } => {
            assert_eq!(revision, Revision::new(1, 3, 2));
            assert!(valid);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(supervisor.is_ready());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    supervisor.shutdown().unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn disconnect_resets_revision_state() {
    let server = driver(&["2", "5", "7"], Some(&["1", "3", "0"][..])).await;
    let mut supervisor = Supervisor::new(
        server.local_addr(),
        FakeProcess::default(),
        config(Revision::new(2, 5, 0), Revision::new(1, 3, 0)),
    );
    supervisor.start().await.unwrap();
    for _ in 0..3 {
        next(&mut supervisor).await;
    }
    assert!(supervisor.is_ready());

    server.shutdown().await;
    assert!(matches!(next(&mut supervisor).await, SupervisorEvent::Connected(false)));
    let status = supervisor.status();
    assert!(!status.connected);
    assert_eq!(status.revision, None);
    assert!(!status.revision_valid);
    assert!(!status.board_revision_valid);
    assert!(!supervisor.is_ready());

    supervisor.shutdown().unwrap();
}

#[tokio::test]
async fn driver_events_are_forwarded() {
    let server = driver(&["2", "5", "7"], Some(&["1", "3", "0"][..])).await;
    let mut supervisor = Supervisor::new(
        server.local_addr(),
        FakeProcess::default(),
        config(Revision::new(2, 5, 0), Revision::new(1, 3, 0)),
    );
    supervisor.start().await.unwrap();
    for _ in 0..3 {
        next(&mut supervisor).await;
    }

    server
        .send_event("DoorStatus", vec!["OPEN".to_string()])
        .unwrap();
    match next(&mut supervisor).await {
        SupervisorEvent::Event(event) => {
            assert_eq!(event.name, "DoorStatus");
            assert_eq!(event.params, vec!["OPEN"]);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    supervisor.shutdown().unwrap();
    server.shutdown().await;
}
