//! Integration tests for the OSC messenger

use bridge_messenger::{MessengerError, OscArg, OscMessage, OutboundMessenger, DIALOGUE_ADDRESS};
use bytes::Bytes;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn receiver() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_message(socket: &UdpSocket) -> OscMessage {
    let mut buf = vec![0u8; 65_536];
    let (n, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no datagram received")
        .unwrap();
    OscMessage::decode(Bytes::copy_from_slice(&buf[..n])).unwrap()
}

#[tokio::test]
async fn test_send_dialogue_line() {
    let sim = receiver().await;
    let messenger = OutboundMessenger::connect(sim.local_addr().unwrap())
        .await
        .unwrap();

    messenger
        .send(DIALOGUE_ADDRESS, "Hey, do you like my fedora?")
        .await
        .unwrap();

    let msg = recv_message(&sim).await;
    assert_eq!(msg.address, "/dialogue");
    assert_eq!(
        msg.args,
        vec![OscArg::Str("Hey, do you like my fedora?".to_string())]
    );
}

#[tokio::test]
async fn test_messages_arrive_as_separate_datagrams() {
    let sim = receiver().await;
    let messenger = OutboundMessenger::connect(sim.local_addr().unwrap())
        .await
        .unwrap();

    messenger.send("/dialogue", "one").await.unwrap();
    messenger.send("/dialogue", "two").await.unwrap();

    assert_eq!(recv_message(&sim).await.args, vec![OscArg::from("one")]);
    assert_eq!(recv_message(&sim).await.args, vec![OscArg::from("two")]);
}

#[tokio::test]
async fn test_oversize_payload_is_caller_error() {
    let sim = receiver().await;
    let messenger = OutboundMessenger::connect(sim.local_addr().unwrap())
        .await
        .unwrap();

    let huge = "x".repeat(70_000);
    let err = messenger.send("/dialogue", &huge).await.unwrap_err();
    assert!(matches!(err, MessengerError::PayloadTooLarge { .. }));
}

#[tokio::test]
async fn test_invalid_address_is_reported() {
    let sim = receiver().await;
    let messenger = OutboundMessenger::connect(sim.local_addr().unwrap())
        .await
        .unwrap();

    let err = messenger.send("dialogue", "hi").await.unwrap_err();
    assert!(matches!(err, MessengerError::InvalidMessage(_)));
}

#[tokio::test]
async fn test_unroutable_target_reports_send_error() {
    // Port 0 is not a valid destination; the OS rejects the send
    let messenger = OutboundMessenger::connect("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let err = messenger.send("/dialogue", "hi").await.unwrap_err();
    assert!(matches!(err, MessengerError::Send { .. }), "{:?}", err);
}
