// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use std::time::Duration;

use codec::{
    Packet, PacketId, ProtocolVersion, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, QoS, ReasonCode, SubscribeAckPacket,
};
use luo::ErrorKind;

use common::{base_options, connect_scripted};

#[tokio::test]
async fn test_subscribe_and_inbound_qos1_publish() {
    let (client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;
    let mut listener = client.listener("all", None).await.unwrap();

    let subscribe_fut = client.subscribe("t/#", QoS::AtLeastOnce);
    let broker_fut = async {
        let packet = broker.read_packet().await;
        let Packet::Subscribe(subscribe) = packet else {
            panic!("expected SUBSCRIBE, got {packet:?}");
        };
        assert_eq!(subscribe.topics()[0].topic(), "t/#");
        let ack = SubscribeAckPacket::new(subscribe.packet_id(), ReasonCode::GrantedQoS1);
        broker.write_packet(&Packet::SubscribeAck(ack)).await;
    };
    let (reasons, ()) = tokio::join!(subscribe_fut, broker_fut);
    assert_eq!(reasons.unwrap(), vec![ReasonCode::GrantedQoS1]);

    // The peer publishes t/a with payload "x" at QoS 1.
    let mut publish = PublishPacket::new("t/a", QoS::AtLeastOnce, b"x").unwrap();
    publish.set_packet_id(PacketId::new(11));
    broker.write_packet(&Packet::Publish(publish)).await;

    let msg = listener.recv().await.unwrap();
    assert_eq!(msg.topic, "t/a");
    assert_eq!(msg.payload, b"x");

    let packet = broker.read_packet().await;
    let Packet::PublishAck(ack) = packet else {
        panic!("expected PUBACK, got {packet:?}");
    };
    assert_eq!(ack.packet_id(), PacketId::new(11));
}

#[tokio::test]
async fn test_outbound_qos1_publish() {
    let (client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;

    let publish_fut = client.publish("sensors/cpu", QoS::AtLeastOnce, b"42");
    let broker_fut = async {
        let packet = broker.read_packet().await;
        let Packet::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        assert_eq!(publish.topic(), "sensors/cpu");
        assert_eq!(publish.qos(), QoS::AtLeastOnce);
        assert!(!publish.dup());
        let ack = PublishAckPacket::new(publish.packet_id());
        broker.write_packet(&Packet::PublishAck(ack)).await;
    };
    let (result, ()) = tokio::join!(publish_fut, broker_fut);
    assert_eq!(result.unwrap(), None);
}

#[tokio::test]
async fn test_outbound_qos2_publish() {
    let (client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;

    let publish_fut = client.publish("exact/once", QoS::ExactOnce, b"p");
    let broker_fut = async {
        let packet = broker.read_packet().await;
        let Packet::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        let packet_id = publish.packet_id();
        broker
            .write_packet(&Packet::PublishReceived(PublishReceivedPacket::new(
                packet_id,
            )))
            .await;

        let packet = broker.read_packet().await;
        let Packet::PublishRelease(release) = packet else {
            panic!("expected PUBREL, got {packet:?}");
        };
        assert_eq!(release.packet_id(), packet_id);
        broker
            .write_packet(&Packet::PublishComplete(PublishCompletePacket::new(
                packet_id,
            )))
            .await;
    };
    let (result, ()) = tokio::join!(publish_fut, broker_fut);
    assert!(result.unwrap().is_none());
}

#[tokio::test]
async fn test_inbound_qos2_idempotence() {
    let (client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;
    let mut listener = client.listener("all", None).await.unwrap();

    let mut publish = PublishPacket::new("dup/test", QoS::ExactOnce, b"once").unwrap();
    publish.set_packet_id(PacketId::new(5));
    broker.write_packet(&Packet::Publish(publish.clone())).await;

    let packet = broker.read_packet().await;
    let Packet::PublishReceived(rec) = packet else {
        panic!("expected PUBREC, got {packet:?}");
    };
    assert_eq!(rec.packet_id(), PacketId::new(5));

    // Duplicate delivery before PUBREL: acknowledged again, delivered once.
    publish.set_dup(true).unwrap();
    broker.write_packet(&Packet::Publish(publish)).await;
    let packet = broker.read_packet().await;
    assert!(matches!(packet, Packet::PublishReceived(_)));

    broker
        .write_packet(&Packet::PublishRelease(PublishReleasePacket::new(
            PacketId::new(5),
        )))
        .await;
    let packet = broker.read_packet().await;
    let Packet::PublishComplete(comp) = packet else {
        panic!("expected PUBCOMP, got {packet:?}");
    };
    assert_eq!(comp.packet_id(), PacketId::new(5));

    let msg = listener.recv().await.unwrap();
    assert_eq!(msg.payload, b"once");
    assert!(listener.try_recv().is_err(), "payload delivered twice");
}

#[tokio::test]
async fn test_unknown_pubrel_answers_pubcomp() {
    let (_client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;

    broker
        .write_packet(&Packet::PublishRelease(PublishReleasePacket::new(
            PacketId::new(99),
        )))
        .await;
    let packet = broker.read_packet().await;
    let Packet::PublishComplete(comp) = packet else {
        panic!("expected PUBCOMP, got {packet:?}");
    };
    assert_eq!(comp.packet_id(), PacketId::new(99));
    assert_eq!(comp.reason_code(), None);
}

#[tokio::test]
async fn test_graceful_disconnect() {
    let (client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;

    let disconnect_fut = client.disconnect();
    let broker_fut = async {
        let packet = broker.read_packet().await;
        assert!(matches!(packet, Packet::Disconnect(_)));
    };
    let (result, ()) = tokio::join!(disconnect_fut, broker_fut);
    result.unwrap();

    // The engine refuses new work after closing.
    let err = client
        .publish("t", QoS::AtMostOnce, b"late")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientClosed);
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_ping_and_timeout() {
    let mut options = base_options(ProtocolVersion::V311);
    options
        .set_keep_alive(Duration::from_secs(10))
        .set_ping_timeout(Duration::from_secs(5));
    let (client, mut broker) = common::connect_scripted_with(&mut options, None).await;

    // With no outbound traffic a PINGREQ must appear around the keep alive
    // interval.
    let started = tokio::time::Instant::now();
    let packet = broker.read_packet().await;
    assert!(matches!(packet, Packet::PingRequest(_)));
    let elapsed = started.elapsed();
    assert!(
        elapsed >= Duration::from_secs(9) && elapsed <= Duration::from_secs(11),
        "PINGREQ after {elapsed:?}"
    );

    // No PINGRESP: the connection dies within the ping timeout.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let err = client
        .publish("t", QoS::AtMostOnce, b"x")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ClientClosed);
}

#[tokio::test]
async fn test_server_disconnect_fails_new_operations() {
    let (client, mut broker) = connect_scripted(base_options(ProtocolVersion::V311)).await;

    broker
        .write_packet(&Packet::Disconnect(codec::DisconnectPacket::new()))
        .await;

    // The engine transitions to closed; operations are refused.
    let mut err = None;
    for _ in 0..50 {
        match client.publish("t", QoS::AtMostOnce, b"x").await {
            Ok(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            Err(e) => {
                err = Some(e);
                break;
            }
        }
    }
    assert_eq!(err.expect("engine never closed").kind(), ErrorKind::ClientClosed);
}
