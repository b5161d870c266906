// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    AuthPacket, ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket,
    DisconnectPacket, EncodeError, FixedHeader, PacketType, PingRequestPacket, PingResponsePacket,
    ProtocolVersion,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket,
    UnsubscribePacket,
};

/// Tagged variant over the fifteen MQTT control packet types.
///
/// Dispatch on incoming packets is a match on this tag. v5-only members of
/// the inner packet structs are `None` or empty when the negotiated version
/// is v3.1.1.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    /// Get type of inner packet.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(packet) => PacketType::Publish {
                dup: packet.dup(),
                qos: packet.qos(),
                retain: packet.retain(),
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
            Self::Auth(_) => PacketType::Auth,
        }
    }

    /// Serialize packet to byte stream for the negotiated `version`.
    ///
    /// # Errors
    ///
    /// Returns error if packet carries v5-only fields under v3.1.1.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(packet) => packet.encode(buf, version),
            Self::ConnectAck(packet) => packet.encode(buf, version),
            Self::Publish(packet) => packet.encode(buf, version),
            Self::PublishAck(packet) => packet.encode(buf, version),
            Self::PublishReceived(packet) => packet.encode(buf, version),
            Self::PublishRelease(packet) => packet.encode(buf, version),
            Self::PublishComplete(packet) => packet.encode(buf, version),
            Self::Subscribe(packet) => packet.encode(buf, version),
            Self::SubscribeAck(packet) => packet.encode(buf, version),
            Self::Unsubscribe(packet) => packet.encode(buf, version),
            Self::UnsubscribeAck(packet) => packet.encode(buf, version),
            Self::PingRequest(packet) => packet.encode(buf, version),
            Self::PingResponse(packet) => packet.encode(buf, version),
            Self::Disconnect(packet) => packet.encode(buf, version),
            Self::Auth(packet) => packet.encode(buf, version),
        }
    }

    /// Parse one packet from a framed byte stream.
    ///
    /// # Errors
    ///
    /// Returns error if byte stream is malformed.
    pub fn decode(ba: &mut ByteArray, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.remaining_length() > ba.remaining_bytes() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        match fixed_header.packet_type() {
            PacketType::Connect => {
                ConnectPacket::decode_body(&fixed_header, ba, version).map(Self::Connect)
            }
            PacketType::ConnectAck => {
                ConnectAckPacket::decode_body(&fixed_header, ba, version).map(Self::ConnectAck)
            }
            PacketType::Publish { .. } => {
                PublishPacket::decode_body(&fixed_header, ba, version).map(Self::Publish)
            }
            PacketType::PublishAck => {
                PublishAckPacket::decode_body(&fixed_header, ba, version).map(Self::PublishAck)
            }
            PacketType::PublishReceived => {
                PublishReceivedPacket::decode_body(&fixed_header, ba, version)
                    .map(Self::PublishReceived)
            }
            PacketType::PublishRelease => {
                PublishReleasePacket::decode_body(&fixed_header, ba, version)
                    .map(Self::PublishRelease)
            }
            PacketType::PublishComplete => {
                PublishCompletePacket::decode_body(&fixed_header, ba, version)
                    .map(Self::PublishComplete)
            }
            PacketType::Subscribe => {
                SubscribePacket::decode_body(&fixed_header, ba, version).map(Self::Subscribe)
            }
            PacketType::SubscribeAck => {
                SubscribeAckPacket::decode_body(&fixed_header, ba, version).map(Self::SubscribeAck)
            }
            PacketType::Unsubscribe => {
                UnsubscribePacket::decode_body(&fixed_header, ba, version).map(Self::Unsubscribe)
            }
            PacketType::UnsubscribeAck => {
                UnsubscribeAckPacket::decode_body(&fixed_header, ba, version)
                    .map(Self::UnsubscribeAck)
            }
            PacketType::PingRequest => {
                PingRequestPacket::decode_body(&fixed_header, ba, version).map(Self::PingRequest)
            }
            PacketType::PingResponse => {
                PingResponsePacket::decode_body(&fixed_header, ba, version).map(Self::PingResponse)
            }
            PacketType::Disconnect => {
                DisconnectPacket::decode_body(&fixed_header, ba, version).map(Self::Disconnect)
            }
            PacketType::Auth => {
                AuthPacket::decode_body(&fixed_header, ba, version).map(Self::Auth)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_packet_decode_dispatch() {
        let publish = PublishPacket::new("t/a", QoS::AtMostOnce, b"x").unwrap();
        let mut buf = Vec::new();
        publish.encode(&mut buf, ProtocolVersion::V311).unwrap();

        let mut ba = ByteArray::new(&buf);
        let packet = Packet::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(packet, Packet::Publish(publish));
    }

    #[test]
    fn test_packet_round_trip_all_types() {
        let packets = vec![
            Packet::Connect(ConnectPacket::new("c1").unwrap()),
            Packet::ConnectAck(ConnectAckPacket::new_v3(
                false,
                crate::ConnectReturnCode::Accepted,
            )),
            Packet::Publish(PublishPacket::new("t/a", QoS::AtMostOnce, b"x").unwrap()),
            Packet::PublishAck(PublishAckPacket::new(PacketId::new(1))),
            Packet::PublishReceived(PublishReceivedPacket::new(PacketId::new(1))),
            Packet::PublishRelease(PublishReleasePacket::new(PacketId::new(1))),
            Packet::PublishComplete(PublishCompletePacket::new(PacketId::new(1))),
            Packet::Subscribe(
                SubscribePacket::new("t/#", QoS::AtLeastOnce, PacketId::new(2)).unwrap(),
            ),
            Packet::SubscribeAck(SubscribeAckPacket::new(
                PacketId::new(2),
                crate::ReasonCode::GrantedQoS1,
            )),
            Packet::Unsubscribe(UnsubscribePacket::new("t/#", PacketId::new(3)).unwrap()),
            Packet::UnsubscribeAck(UnsubscribeAckPacket::new(PacketId::new(3))),
            Packet::PingRequest(PingRequestPacket::new()),
            Packet::PingResponse(PingResponsePacket::new()),
            Packet::Disconnect(DisconnectPacket::new()),
        ];

        for packet in packets {
            let mut buf = Vec::new();
            packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
            let mut ba = ByteArray::new(&buf);
            let parsed = Packet::decode(&mut ba, ProtocolVersion::V311).unwrap();
            assert_eq!(parsed, packet);
        }
    }

    #[test]
    fn test_packet_round_trip_all_types_v5() {
        use crate::{
            BinaryData, LastWill, Property, ReasonCode, StringData, StringPairData, U16Data,
            U32Data, VarInt,
        };

        let mut connect = ConnectPacket::new("c5").unwrap();
        connect.set_will(Some(
            LastWill::new("will/t", b"bye", QoS::AtLeastOnce, false).unwrap(),
        ));
        connect
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(300)))
            .unwrap();

        let mut publish = PublishPacket::new("t/a", QoS::ExactOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(4));

        let mut auth = AuthPacket::new(ReasonCode::ContinueAuthentication);
        auth.properties_mut()
            .push(Property::AuthenticationMethod(
                StringData::from("PLAIN").unwrap(),
            ))
            .unwrap();

        let packets = vec![
            Packet::Connect(connect),
            Packet::ConnectAck(crate::ConnectAckPacket::new_v5(true, ReasonCode::Success)),
            Packet::Publish(publish),
            Packet::PublishAck(PublishAckPacket::new_v5(
                PacketId::new(4),
                ReasonCode::NoMatchingSubscribers,
            )),
            Packet::PublishReceived(PublishReceivedPacket::new_v5(
                PacketId::new(4),
                ReasonCode::Success,
            )),
            Packet::PublishRelease(PublishReleasePacket::new_v5(
                PacketId::new(4),
                ReasonCode::PacketIdentifierNotFound,
            )),
            Packet::PublishComplete(PublishCompletePacket::new_v5(
                PacketId::new(4),
                ReasonCode::Success,
            )),
            Packet::Subscribe(
                SubscribePacket::new("t/#", QoS::ExactOnce, PacketId::new(5)).unwrap(),
            ),
            Packet::SubscribeAck(SubscribeAckPacket::new(
                PacketId::new(5),
                ReasonCode::GrantedQoS2,
            )),
            Packet::Unsubscribe(UnsubscribePacket::new("t/#", PacketId::new(6)).unwrap()),
            Packet::UnsubscribeAck(UnsubscribeAckPacket::with_reasons(
                PacketId::new(6),
                vec![ReasonCode::NoSubscriptionExisted],
            )),
            Packet::PingRequest(PingRequestPacket::new()),
            Packet::PingResponse(PingResponsePacket::new()),
            Packet::Disconnect(DisconnectPacket::new_v5(ReasonCode::ServerShuttingDown)),
            Packet::Auth(auth),
        ];

        for packet in packets {
            let mut buf = Vec::new();
            packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
            let mut ba = ByteArray::new(&buf);
            let parsed = Packet::decode(&mut ba, ProtocolVersion::V5).unwrap();
            assert_eq!(parsed, packet);
        }

        // Every CONNACK property exactly once, plus two user properties.
        let mut ack = crate::ConnectAckPacket::new_v5(false, ReasonCode::Success);
        let props = ack.properties_mut();
        props
            .push(Property::SessionExpiryInterval(U32Data::new(60)))
            .unwrap();
        props.push(Property::ReceiveMaximum(U16Data::new(20))).unwrap();
        props
            .push(Property::MaximumQoS(QoS::AtLeastOnce))
            .unwrap();
        props
            .push(Property::RetainAvailable(crate::BoolData::new(true)))
            .unwrap();
        props
            .push(Property::MaximumPacketSize(U32Data::new(4096)))
            .unwrap();
        props
            .push(Property::AssignedClientIdentifier(
                StringData::from("assigned").unwrap(),
            ))
            .unwrap();
        props
            .push(Property::TopicAliasMaximum(U16Data::new(16)))
            .unwrap();
        props
            .push(Property::ReasonString(StringData::from("welcome").unwrap()))
            .unwrap();
        props
            .push(Property::WildcardSubscriptionAvailable(crate::BoolData::new(
                true,
            )))
            .unwrap();
        props
            .push(Property::SubscriptionIdentifierAvailable(
                crate::BoolData::new(false),
            ))
            .unwrap();
        props
            .push(Property::SharedSubscriptionAvailable(crate::BoolData::new(
                false,
            )))
            .unwrap();
        props
            .push(Property::ServerKeepAlive(U16Data::new(30)))
            .unwrap();
        props
            .push(Property::ResponseInformation(
                StringData::from("response/base").unwrap(),
            ))
            .unwrap();
        props
            .push(Property::ServerReference(
                StringData::from("other.server").unwrap(),
            ))
            .unwrap();
        props
            .push(Property::AuthenticationMethod(
                StringData::from("PLAIN").unwrap(),
            ))
            .unwrap();
        props
            .push(Property::AuthenticationData(
                BinaryData::from_slice(b"token").unwrap(),
            ))
            .unwrap();
        props
            .push(Property::UserProperty(
                StringPairData::new("origin", "unit").unwrap(),
            ))
            .unwrap();
        props
            .push(Property::UserProperty(
                StringPairData::new("origin", "test").unwrap(),
            ))
            .unwrap();

        let packet = Packet::ConnectAck(ack);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let parsed = Packet::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);

        // Subscription identifiers are varints in publish properties.
        let mut publish = PublishPacket::new("t/b", QoS::AtMostOnce, b"z").unwrap();
        publish
            .properties_mut()
            .push(Property::SubscriptionIdentifier(VarInt::from(268_435_455).unwrap()))
            .unwrap();
        let packet = Packet::Publish(publish);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let parsed = Packet::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_packet_decode_garbage() {
        // Random bytes either parse or produce an error, but never panic.
        let buf = [0x13, 0x37, 0xde, 0xad, 0xbe, 0xef];
        let mut ba = ByteArray::new(&buf);
        assert!(Packet::decode(&mut ba, ProtocolVersion::V311).is_err());
    }
}
