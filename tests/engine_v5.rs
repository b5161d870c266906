// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use std::time::Duration;

use codec::{
    ConnectAckPacket, Packet, PacketId, Properties, Property, ProtocolVersion, PublishAckPacket,
    PublishPacket, PublishReceivedPacket, QoS, ReasonCode, StringData, U16Data,
};
use luo::{AuthStep, ErrorKind};

use common::{base_options, connect_scripted_with, PacketStream};

#[tokio::test(start_paused = true)]
async fn test_flow_control_receive_maximum() {
    let mut options = base_options(ProtocolVersion::V5);
    let mut connack = ConnectAckPacket::new_v5(false, ReasonCode::Success);
    connack
        .properties_mut()
        .push(Property::ReceiveMaximum(U16Data::new(1)))
        .unwrap();
    let (client, mut broker) = connect_scripted_with(&mut options, Some(connack)).await;

    let client_a = client.clone();
    let handle_a =
        tokio::spawn(async move { client_a.publish("a", QoS::AtLeastOnce, b"1").await });

    // First publish is admitted immediately.
    let packet = broker.read_packet().await;
    let Packet::Publish(publish_a) = packet else {
        panic!("expected PUBLISH, got {packet:?}");
    };
    assert_eq!(publish_a.topic(), "a");

    // Second publish stays queued while the window is full.
    let client_b = client.clone();
    let handle_b =
        tokio::spawn(async move { client_b.publish("b", QoS::AtLeastOnce, b"2").await });
    let quiet = tokio::time::timeout(Duration::from_millis(200), broker.read_packet()).await;
    assert!(quiet.is_err(), "publish b hit the wire inside the window");

    // Acknowledging a admits b.
    broker
        .write_packet(&Packet::PublishAck(PublishAckPacket::new_v5(
            publish_a.packet_id(),
            ReasonCode::Success,
        )))
        .await;
    let packet = broker.read_packet().await;
    let Packet::Publish(publish_b) = packet else {
        panic!("expected PUBLISH, got {packet:?}");
    };
    assert_eq!(publish_b.topic(), "b");
    broker
        .write_packet(&Packet::PublishAck(PublishAckPacket::new_v5(
            publish_b.packet_id(),
            ReasonCode::Success,
        )))
        .await;

    assert!(handle_a.await.unwrap().is_ok());
    assert!(handle_b.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_qos2_failed_pubrec_ends_flow() {
    let mut options = base_options(ProtocolVersion::V5);
    let (client, mut broker) = connect_scripted_with(&mut options, None).await;

    let publish_fut = client.publish("denied", QoS::ExactOnce, b"p");
    let broker_fut = async {
        let packet = broker.read_packet().await;
        let Packet::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        broker
            .write_packet(&Packet::PublishReceived(PublishReceivedPacket::new_v5(
                publish.packet_id(),
                ReasonCode::NotAuthorized,
            )))
            .await;
        publish.packet_id()
    };
    let (result, packet_id) = tokio::join!(publish_fut, broker_fut);
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperationFailed);
    assert_eq!(packet_id, PacketId::new(1));

    // No PUBREL follows and the id is free again: the next flow reuses the
    // wire without stalling.
    let publish_fut = client.publish("granted", QoS::AtLeastOnce, b"p");
    let broker_fut = async {
        let packet = broker.read_packet().await;
        let Packet::Publish(publish) = packet else {
            panic!("expected PUBLISH, got {packet:?}");
        };
        broker
            .write_packet(&Packet::PublishAck(PublishAckPacket::new_v5(
                publish.packet_id(),
                ReasonCode::Success,
            )))
            .await;
    };
    let (result, ()) = tokio::join!(publish_fut, broker_fut);
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_auth_exchange() {
    let mut options = base_options(ProtocolVersion::V5);
    options
        .set_auth_method(Some("SCRAM"))
        .set_auth_data(Some(b"client-first"));

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut broker = PacketStream::new(server_io, ProtocolVersion::V5);

    let workflow: luo::AuthWorkflow = Box::new(|challenge: &luo::AuthChallenge| {
        assert_eq!(challenge.method, "SCRAM");
        assert_eq!(challenge.data.as_deref(), Some(&b"server-first"[..]));
        AuthStep::Continue {
            data: Some(b"client-final".to_vec()),
        }
    });
    let client_fut = luo::AsyncClient::connect_with_stream(
        options.clone(),
        luo::Stream::from_duplex(client_io),
        Some(workflow),
    );

    let broker_fut = async {
        let packet = broker.read_packet().await;
        let Packet::Connect(connect) = packet else {
            panic!("expected CONNECT, got {packet:?}");
        };
        assert_eq!(connect.properties().authentication_method(), Some("SCRAM"));

        // Continue the exchange through CONNACK reason 0x18.
        let mut connack = ConnectAckPacket::new_v5(false, ReasonCode::ContinueAuthentication);
        connack
            .properties_mut()
            .push(Property::AuthenticationMethod(
                StringData::from("SCRAM").unwrap(),
            ))
            .unwrap();
        connack
            .properties_mut()
            .push(Property::AuthenticationData(
                codec::BinaryData::from_slice(b"server-first").unwrap(),
            ))
            .unwrap();
        broker.write_packet(&Packet::ConnectAck(connack)).await;

        let packet = broker.read_packet().await;
        let Packet::Auth(auth) = packet else {
            panic!("expected AUTH, got {packet:?}");
        };
        assert_eq!(auth.reason_code(), ReasonCode::ContinueAuthentication);
        assert_eq!(
            auth.properties().authentication_data(),
            Some(&b"client-final"[..])
        );

        let connack = ConnectAckPacket::new_v5(false, ReasonCode::Success);
        broker.write_packet(&Packet::ConnectAck(connack)).await;
    };

    let (client, ()) = tokio::join!(client_fut, broker_fut);
    let client = client.unwrap();
    assert_eq!(client.client_id(), "scripted01");
}

#[tokio::test]
async fn test_unknown_inbound_topic_alias_closes() {
    let mut options = base_options(ProtocolVersion::V5);
    let (_client, mut broker) = connect_scripted_with(&mut options, None).await;

    // Alias 2 was never established; the topic is empty.
    let mut publish = PublishPacket::new("t", QoS::AtMostOnce, b"x").unwrap();
    publish.clear_topic();
    publish
        .properties_mut()
        .push(Property::TopicAlias(U16Data::new(2)))
        .unwrap();
    broker.write_packet(&Packet::Publish(publish)).await;

    let packet = broker.read_packet().await;
    let Packet::Disconnect(disconnect) = packet else {
        panic!("expected DISCONNECT, got {packet:?}");
    };
    assert_eq!(
        disconnect.reason_code(),
        Some(ReasonCode::TopicAliasInvalid)
    );
}

#[tokio::test]
async fn test_assigned_client_identifier_is_adopted() {
    let mut options = base_options(ProtocolVersion::V5);
    let mut connack = ConnectAckPacket::new_v5(false, ReasonCode::Success);
    connack
        .properties_mut()
        .push(Property::AssignedClientIdentifier(
            StringData::from("srvAssigned42").unwrap(),
        ))
        .unwrap();
    let (client, _broker) = connect_scripted_with(&mut options, Some(connack)).await;

    assert_eq!(client.client_id(), "srvAssigned42");
}

#[tokio::test]
async fn test_outbound_topic_alias() {
    let mut options = base_options(ProtocolVersion::V5);
    let mut connack = ConnectAckPacket::new_v5(false, ReasonCode::Success);
    connack
        .properties_mut()
        .push(Property::TopicAliasMaximum(U16Data::new(8)))
        .unwrap();
    let (client, mut broker) = connect_scripted_with(&mut options, Some(connack)).await;

    // First publish carries topic and alias, the second elides the topic.
    client
        .publish("devices/1/state", QoS::AtMostOnce, b"on")
        .await
        .unwrap();
    let packet = broker.read_packet().await;
    let Packet::Publish(first) = packet else {
        panic!("expected PUBLISH, got {packet:?}");
    };
    assert_eq!(first.topic(), "devices/1/state");
    assert_eq!(first.properties().topic_alias(), Some(1));

    client
        .publish("devices/1/state", QoS::AtMostOnce, b"off")
        .await
        .unwrap();
    let packet = broker.read_packet().await;
    let Packet::Publish(second) = packet else {
        panic!("expected PUBLISH, got {packet:?}");
    };
    assert_eq!(second.topic(), "");
    assert_eq!(second.properties().topic_alias(), Some(1));
}

#[tokio::test]
async fn test_inbound_subscription_identifier_filter() {
    let mut options = base_options(ProtocolVersion::V5);
    let (client, mut broker) = connect_scripted_with(&mut options, None).await;
    let mut chatty = client
        .listener("chatty", Some(std::collections::HashSet::from([7])))
        .await
        .unwrap();
    let mut quiet = client
        .listener("quiet", Some(std::collections::HashSet::from([9])))
        .await
        .unwrap();

    let mut properties = Properties::new();
    properties
        .push(Property::SubscriptionIdentifier(
            codec::VarInt::from(7).unwrap(),
        ))
        .unwrap();
    let mut publish = PublishPacket::new("t/a", QoS::AtMostOnce, b"x").unwrap();
    *publish.properties_mut() = properties;
    broker.write_packet(&Packet::Publish(publish)).await;

    let msg = chatty.recv().await.unwrap();
    assert_eq!(msg.topic, "t/a");
    assert!(quiet.try_recv().is_err());
}
