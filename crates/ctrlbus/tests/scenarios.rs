//! End-to-end scenarios across the protocol layers, through the umbrella crate.

use std::net::SocketAddr;
use std::time::Duration;

use ctrlbus::bridge::{AcceptanceFilter, BridgeClient, BridgeConfig, BridgeEvent};
use ctrlbus::frame::DelimitedCodec;
use ctrlbus::register::{DeviceConfig, DeviceProtocol, FrameErrorCause, RegisterError, RegisterLayout};
use ctrlbus::supervisor::{Revision, Supervisor, SupervisorConfig, SupervisorEvent};
use ctrlbus::text::{ClientConfig, CommandClient, CommandReply, CommandServer, ServerConfig};
use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

async fn revision_server() -> ctrlbus::text::ServerHandle {
    CommandServer::bind(loopback(), ServerConfig::default())
        .await
        .unwrap()
        .serve(|name: &str, _params: &[String]| match name {
            "GetRevision" => CommandReply::ok(vec!["2".into(), "5".into(), "1".into()]),
            "BoardInitialize" => CommandReply::ok(vec!["1".into(), "0".into(), "3".into()]),
            _ => CommandReply::error(1),
        })
}

#[tokio::test]
async fn get_revision_ack_on_the_wire() {
    let server = revision_server().await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.write_all(b"<C 1 GetRevision>").await.unwrap();

    let expected = b"<A 1 GetRevision OK 0 2 5 1>\n\r";
    let mut buf = vec![0u8; expected.len()];
    tokio::time::timeout(Duration::from_secs(2), stream.read_exact(&mut buf))
        .await
        .expect("ack should arrive")
        .unwrap();
    assert_eq!(&buf, expected);
    server.shutdown().await;
}

#[tokio::test]
async fn get_revision_through_client() {
    let server = revision_server().await;
    let (client, _events) = CommandClient::connect(server.local_addr(), ClientConfig::default());
    client.wait_connected().await.unwrap();

    let ack = client.request("GetRevision", &[]).await.unwrap();
    assert!(ack.is_ok());
    assert_eq!(ack.seq, 1);
    assert_eq!(ack.params, vec!["2", "5", "1"]);

    client.shutdown();
    server.shutdown().await;
}

/// A bridge that echoes filter registrations and never answers data.
async fn silent_bridge() -> SocketAddr {
    let listener = TcpListener::bind(loopback()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut frames = FramedRead::new(read, DelimitedCodec::default());
                while let Some(Ok(frame)) = frames.next().await {
                    if frame.starts_with(b"F") {
                        let mut echo = b"<".to_vec();
                        echo.extend_from_slice(&frame);
                        echo.push(b'>');
                        if write.write_all(&echo).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    addr
}

#[tokio::test]
async fn read_status_without_response_times_out() {
    let addr = silent_bridge().await;
    let config = DeviceConfig {
        device_id: 1,
        layout: RegisterLayout::new(2, 0, 0),
        response_timeout: Duration::from_millis(100),
        ..DeviceConfig::default()
    };
    let mut device = DeviceProtocol::connect(addr, &config);
    tokio::time::timeout(Duration::from_secs(2), device.bridge().wait_filter_open())
        .await
        .expect("filter should open")
        .unwrap();

    let before = *device.registers().status(1).unwrap();
    tokio::time::pause();
    let started = tokio::time::Instant::now();
    let err = device.read_status(1).await.unwrap_err();
    assert!(matches!(err, RegisterError::Failed(FrameErrorCause::Timeout)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(*device.registers().status(1).unwrap(), before);
    assert!(!device.is_busy());
    device.shutdown();
}

#[tokio::test]
async fn data_outside_filter_is_not_delivered() {
    let listener = TcpListener::bind(loopback()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = BridgeConfig::default().with_filter(AcceptanceFilter::new(0xFFF, 256));
    let (bridge, mut events) = BridgeClient::spawn(addr, config);

    let (mut stream, _) = listener.accept().await.unwrap();
    stream.write_all(b"<F 4095 256>").await.unwrap();
    stream.write_all(b"<D 300 1 2 3>").await.unwrap();
    stream.write_all(b"<D 256 4 5 6>").await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(BridgeEvent::Frame(frame)) => break frame,
                Some(_) => continue,
                None => panic!("bridge task stopped"),
            }
        }
    })
    .await
    .expect("in-filter frame should arrive");
    assert_eq!(frame.address, 256);
    assert_eq!(frame.payload, vec![4, 5, 6]);
    bridge.shutdown();
}

#[tokio::test]
async fn supervisor_reaches_ready_against_driver() {
    let server = revision_server().await;
    let config = SupervisorConfig {
        expected_revision: Revision::new(2, 5, 0),
        expected_board_revision: Revision::new(1, 0, 0),
        ..SupervisorConfig::default()
    };
    let mut supervisor = Supervisor::new(server.local_addr(), AlwaysRunning, config);
    supervisor.start().await.unwrap();

    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match supervisor.next_event().await {
                Some(SupervisorEvent::BoardRevision { .. }) => break,
                Some(_) => continue,
                None => panic!("supervisor stopped"),
            }
        }
    })
    .await
    .expect("handshake should complete");
    assert!(supervisor.is_ready());

    supervisor.shutdown().unwrap();
    server.shutdown().await;
}

struct AlwaysRunning;

impl ctrlbus::supervisor::ProcessControl for AlwaysRunning {
    fn is_running(&mut self) -> bool {
        true
    }

    fn start(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
