//! Register and bootloader protocols against an in-process fake bridge.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use ctrlbus_bridge::{BridgeConfig, BridgeMessage, BusFrame};
use ctrlbus_frame::DelimitedCodec;
use ctrlbus_register::{
    BootloaderStatus, CommandStatus, DeviceConfig, DEFAULT_RESPONSE_TIMEOUT, DeviceEvent, DeviceProtocol, FrameErrorCause,
    FrameType, RegisterAccess, RegisterClass, RegisterError, RegisterFrame, RegisterLayout, Revision,
};
use ctrlbus_transport::ConnectConfig;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::FramedRead;

type Responder = Arc<dyn Fn(u16, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Echoes filter registrations and answers data frames through `responder`.
async fn fake_bridge(responder: Responder) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, responder.clone()));
        }
    });
    addr
}

async fn serve_connection(stream: TcpStream, responder: Responder) {
    let (read, mut write) = stream.into_split();
    let mut frames = FramedRead::new(read, DelimitedCodec::default());
    while let Some(Ok(frame)) = frames.next().await {
        let reply = match BridgeMessage::parse(&frame) {
            Ok(BridgeMessage::Filter(filter)) => Some(BridgeMessage::Filter(filter)),
            Ok(BridgeMessage::Data(data)) => responder(data.address, &data.payload).map(|payload| {
                BridgeMessage::Data(BusFrame {
                    address: data.address,
                    payload,
                })
            }),
            Err(_) => None,
        };
        if let Some(reply) = reply {
            let mut buf = BytesMut::new();
            reply.encode(&mut buf).unwrap();
            if write.write_all(&buf).await.is_err() {
                return;
            }
        }
    }
}

fn config(device_id: u8) -> DeviceConfig {
    DeviceConfig {
        device_id,
        layout: RegisterLayout::new(4, 2, 2),
        bridge: BridgeConfig {
            connect: ConnectConfig {
                reconnect_interval: Duration::from_millis(20),
                ..ConnectConfig::default()
            },
            ..BridgeConfig::default()
        },
        ..DeviceConfig::default()
    }
}

async fn ready(device: &mut DeviceProtocol) {
    tokio::time::timeout(Duration::from_secs(2), async {
        device.bridge().wait_filter_open().await.unwrap();
        device.bootloader().bridge().wait_filter_open().await.unwrap();
    })
    .await
    .expect("both filters should open");
}

/// Answers every register request by echoing it with fixed content.
fn echo_with(content: [u8; 4]) -> Responder {
    Arc::new(move |address, payload| {
        if address < 0x200 {
            return None;
        }
        let request = RegisterFrame::decode(payload);
        Some(
            RegisterFrame {
                data: content,
                ..request
            }
            .encode()
            .to_vec(),
        )
    })
}

#[tokio::test]
async fn read_status_round_trip() {
    let addr = fake_bridge(echo_with([10, 20, 30, 40])).await;
    let mut device = DeviceProtocol::connect(addr, &config(3));
    ready(&mut device).await;
    assert_eq!(device.engine().address(), 0x203);

    let reg = device.read_status(1).await.unwrap();
    assert!(reg.is_valid());
    assert!(reg.is_changed());
    assert_eq!(reg.data(), [10, 20, 30, 40]);

    // A second identical read leaves the content unchanged.
    let reg = device.read_status(1).await.unwrap();
    assert!(!reg.is_changed());
    device.shutdown();
}

#[tokio::test]
async fn consumer_takes_change_flag() {
    let addr = fake_bridge(echo_with([5, 6, 7, 8])).await;
    let mut device = DeviceProtocol::connect(addr, &config(7));
    ready(&mut device).await;

    device.read_data(1).await.unwrap();
    let reg = &mut device.registers_mut().list_mut(RegisterClass::Data)[1];
    assert_eq!(reg.take(), ([5, 6, 7, 8], true));
    assert_eq!(reg.take(), ([5, 6, 7, 8], false));
    assert!(!device.registers().data(1).unwrap().is_changed());
    device.shutdown();
}

#[tokio::test]
async fn missing_response_times_out_without_mutation() {
    let silent: Responder = Arc::new(|_, _| None);
    let addr = fake_bridge(silent).await;
    let mut device = DeviceProtocol::connect(addr, &config(1));
    ready(&mut device).await;

    // The deadline follows the runtime clock, so the wait is simulated.
    tokio::time::pause();
    let started = tokio::time::Instant::now();
    let err = device.read_status(1).await.unwrap_err();
    assert!(matches!(err, RegisterError::Failed(FrameErrorCause::Timeout)));
    assert!(started.elapsed() >= DEFAULT_RESPONSE_TIMEOUT);

    let reg = device.registers().status(1).unwrap();
    assert!(!reg.is_valid());
    assert_eq!(reg.data(), [0; 4]);
    assert!(!device.is_busy());
    device.shutdown();
}

#[tokio::test]
async fn second_request_while_waiting_is_busy() {
    let addr = fake_bridge(echo_with([1, 0, 0, 0])).await;
    let mut device = DeviceProtocol::connect(addr, &config(2));
    ready(&mut device).await;

    device.request(RegisterAccess::ReadData(0)).unwrap();
    assert!(matches!(
        device.request(RegisterAccess::ReadErrors),
        Err(RegisterError::Busy)
    ));

    let done = loop {
        match device.next_event().await.unwrap() {
            DeviceEvent::Completed(done) => break done,
            _ => continue,
        }
    };
    assert_eq!(done.frame_type(), FrameType::ReadData);
    assert!(done.is_ok());
    assert_eq!(device.registers().data(0).unwrap().data(), [1, 0, 0, 0]);
    device.shutdown();
}

#[tokio::test]
async fn response_with_wrong_sequence_is_rejected() {
    let skewed: Responder = Arc::new(|address, payload| {
        if address < 0x200 {
            return None;
        }
        let request = RegisterFrame::decode(payload);
        Some(
            RegisterFrame {
                seq: request.seq.wrapping_add(1).max(1),
                data: [9, 9, 9, 9],
                ..request
            }
            .encode()
            .to_vec(),
        )
    });
    let addr = fake_bridge(skewed).await;
    let mut device = DeviceProtocol::connect(addr, &config(4));
    ready(&mut device).await;

    let err = device.read_param(0).await.unwrap_err();
    assert!(matches!(
        err,
        RegisterError::Failed(FrameErrorCause::SequenceMismatch { expected: 1, received: 2 })
    ));
    assert!(!device.registers().param(0).unwrap().is_valid());
    device.shutdown();
}

#[tokio::test]
async fn exec_command_reports_command_register() {
    let addr = fake_bridge(echo_with([2, 0x12, 0x34, 0])).await;
    let mut device = DeviceProtocol::connect(addr, &config(5));
    ready(&mut device).await;

    let cmd = device.exec_command(7, [1, 2, 3, 4]).await.unwrap();
    assert_eq!(cmd.command, 7);
    assert_eq!(cmd.status(), Ok(CommandStatus::Executed));
    assert_eq!((cmd.b0, cmd.b1), (0x12, 0x34));

    let cmd = device.abort_command().await.unwrap();
    assert_eq!(cmd.command, 0);
    device.shutdown();
}

#[tokio::test]
async fn bootloader_get_info_over_its_own_address() {
    let responder: Responder = Arc::new(|address, payload| {
        if address == 0x106 && payload.first() == Some(&1) {
            Some(vec![1, 1, 1, 0, 2, 2, 5, 1])
        } else {
            None
        }
    });
    let addr = fake_bridge(responder).await;
    let mut device = DeviceProtocol::connect(addr, &config(6));
    ready(&mut device).await;

    let info = device.bootloader().get_info().await.unwrap();
    assert_eq!(info.status, BootloaderStatus::NotRunning);
    assert_eq!(info.boot, Revision::new(1, 0, 2));
    assert_eq!(info.app, Revision::new(2, 5, 1));
    assert_eq!(device.bootloader().info(), Some(info));
    device.shutdown();
}
