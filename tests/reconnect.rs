// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use std::time::Duration;

use codec::{
    ConnectAckPacket, ConnectReturnCode, Packet, PacketId, ProtocolVersion, PublishAckPacket, QoS,
};
use luo::{AsyncClient, ConnectOptions, ErrorKind};
use tokio::net::TcpListener;

use common::PacketStream;

/// Reconnect replay: a QoS 1 publish whose PUBACK never arrived is resent
/// with DUP set, the same id and an unchanged payload once the session is
/// resumed.
#[tokio::test]
async fn test_reconnect_replays_unacked_publish() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let broker = tokio::spawn(async move {
        // First connection: accept, swallow the publish, drop the transport.
        let (socket, _addr) = listener.accept().await.unwrap();
        let mut broker = PacketStream::new(socket, ProtocolVersion::V311);
        let connect = broker.accept_connect(false).await;
        assert!(!connect.clean_session());

        let packet = broker.read_packet().await;
        let Packet::Publish(first) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        assert_eq!(first.packet_id(), PacketId::new(1));
        assert!(!first.dup());
        drop(broker);

        // Second connection: resume the session and expect the replay.
        let (socket, _addr) = listener.accept().await.unwrap();
        let mut broker = PacketStream::new(socket, ProtocolVersion::V311);
        let connect = broker.read_packet().await;
        let Packet::Connect(connect) = connect else {
            panic!("expected CONNECT, got {connect:?}");
        };
        assert!(!connect.clean_session());
        broker
            .write_packet(&Packet::ConnectAck(ConnectAckPacket::new_v3(
                true,
                ConnectReturnCode::Accepted,
            )))
            .await;

        let packet = broker.read_packet().await;
        let Packet::Publish(replayed) = packet else {
            panic!("expected replayed PUBLISH, got {packet:?}");
        };
        assert!(replayed.dup(), "replay must set the DUP flag");
        assert_eq!(replayed.packet_id(), PacketId::new(1));
        assert_eq!(replayed.message(), b"m1");
        broker
            .write_packet(&Packet::PublishAck(PublishAckPacket::new(
                replayed.packet_id(),
            )))
            .await;
    });

    let mut options = ConnectOptions::new(address).unwrap();
    options
        .set_version(ProtocolVersion::V311)
        .set_client_id("replay01")
        .set_clean_session(false)
        .set_keep_alive(Duration::ZERO)
        .set_max_reconnect_attempts(3);
    let client = AsyncClient::connect(options).await.unwrap();

    // Completes only after the replay is acknowledged on the second
    // connection.
    let result = client.publish("q/replay", QoS::AtLeastOnce, b"m1").await;
    assert!(result.unwrap().is_none());

    broker.await.unwrap();
}

/// Without a session to resume, pending operations fail with `SessionReset`.
#[tokio::test]
async fn test_reconnect_without_session_fails_waiters() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let broker = tokio::spawn(async move {
        let (socket, _addr) = listener.accept().await.unwrap();
        let mut broker = PacketStream::new(socket, ProtocolVersion::V311);
        let _connect = broker.accept_connect(false).await;
        let packet = broker.read_packet().await;
        assert!(matches!(packet, Packet::Publish(_)));
        drop(broker);

        // The server lost the session: Session Present = 0.
        let (socket, _addr) = listener.accept().await.unwrap();
        let mut broker = PacketStream::new(socket, ProtocolVersion::V311);
        let _connect = broker.accept_connect(false).await;
        broker
    });

    let mut options = ConnectOptions::new(address).unwrap();
    options
        .set_version(ProtocolVersion::V311)
        .set_client_id("reset01")
        .set_clean_session(false)
        .set_keep_alive(Duration::ZERO)
        .set_max_reconnect_attempts(3);
    let client = AsyncClient::connect(options).await.unwrap();

    let err = client
        .publish("q/reset", QoS::AtLeastOnce, b"m1")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SessionReset);

    let _broker = broker.await.unwrap();
}
