// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, PubTopic, QoS,
};

/// Properties available in PUBLISH packets.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    // A PUBLISH packet sent from a Client to a Server MUST NOT contain a
    // Subscription Identifier [MQTT-3.3.4-6]. Packets forwarded by the Server
    // carry the identifiers of all matching subscriptions.
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// `PublishPacket` is used to transport application messages from the Client
/// to the Server, or from the Server to the Client.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet Identifier     |
/// |                       |
/// +-----------------------+
/// | Properties (v5) ...   |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// Note that `packet_id` only appears in `QoS` 1 and `QoS` 2 packets.
///
/// Response of `PublishPacket`:
/// - `QoS` 0, no response
/// - `QoS` 1, `PublishAckPacket`
/// - `QoS` 2, `PublishReceivedPacket`
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    /// If the DUP flag is set to 0, it indicates that this is the first
    /// occasion that the Client or Server has attempted to send this packet.
    /// If it is set to 1, it indicates that this might be re-delivery of an
    /// earlier attempt.
    ///
    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    /// This field indicates the level of assurance for delivery of an
    /// application message.
    qos: QoS,

    /// If the RETAIN flag is set to 1 in a PUBLISH packet sent by a Client to
    /// a Server, the Server MUST replace any existing retained message for
    /// this topic with this application message [MQTT-3.3.1-5].
    retain: bool,

    /// The Topic Name identifies the information channel to which payload
    /// data is published.
    ///
    /// In v5, it is a Protocol Error if the Topic Name is zero length and
    /// there is no Topic Alias property.
    topic: PubTopic,

    /// Only present in QoS 1 and QoS 2 packets.
    packet_id: PacketId,

    /// v5 only.
    properties: Properties,

    /// Payload contains `msg` field.
    msg: Vec<u8>,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: &[u8]) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            dup: false,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            properties: Properties::new(),
            msg: msg.to_vec(),
        })
    }

    /// Update `retain` flag.
    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    /// Get current `retain` flag.
    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` flag is set in `QoS` 0 packet.
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    /// Get current `dup` flag.
    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    /// Update `qos` value.
    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
        }
        self.qos = qos;
        self
    }

    /// Get current `qos` value.
    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Update packet id.
    ///
    /// The packet id field is only present in publish packets where the
    /// `QoS` level is 1 or 2.
    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update topic value.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        self.topic = PubTopic::new(topic)?;
        Ok(self)
    }

    /// Replace topic with the empty string, for packets which carry a
    /// Topic Alias property instead.
    pub fn clear_topic(&mut self) -> &mut Self {
        self.topic = PubTopic::empty();
        self
    }

    /// Get current topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get a mutable reference to property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a reference to message payload.
    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.msg
    }

    /// Serialize packet to byte stream for the negotiated `version`.
    ///
    /// # Errors
    ///
    /// Returns error if packet carries v5-only fields under v3.1.1, or flag
    /// combination breaks protocol rules.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        if version == ProtocolVersion::V311 && !self.properties.is_empty() {
            return Err(EncodeError::InvalidVersion);
        }
        if self.dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        // It is a Protocol Error if the Topic Name is zero length and there
        // is no Topic Alias.
        if self.topic.is_empty() && self.properties.topic_alias().is_none() {
            return Err(EncodeError::InvalidData);
        }

        let mut body = Vec::new();
        self.topic.encode(&mut body)?;
        if self.qos != QoS::AtMostOnce {
            if self.packet_id.value() == 0 {
                return Err(EncodeError::InvalidData);
            }
            self.packet_id.encode(&mut body)?;
        }
        if version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        body.write_all(&self.msg)?;

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, body.len())?;
        let header_bytes = fixed_header.encode(buf)?;
        buf.write_all(&body)?;
        Ok(header_bytes + body.len())
    }

    /// Parse packet from byte stream.
    ///
    /// # Errors
    ///
    /// Returns error if byte stream is malformed.
    pub fn decode(ba: &mut ByteArray, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        Self::decode_body(&fixed_header, ba, version)
    }

    pub(crate) fn decode_body(
        fixed_header: &FixedHeader,
        ba: &mut ByteArray,
        version: ProtocolVersion,
    ) -> Result<Self, DecodeError> {
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        let body_start = ba.offset();
        let topic = PubTopic::decode(ba)?;
        if topic.is_empty() && version == ProtocolVersion::V311 {
            return Err(DecodeError::InvalidTopic);
        }

        // A PUBLISH packet MUST NOT contain a Packet Identifier if its QoS
        // value is set to 0 [MQTT-2.2.1-2].
        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = if version.is_v5() {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
            {
                log::error!(
                    "PublishPacket: property type {property_type:?} cannot be used in properties!"
                );
                return Err(DecodeError::InvalidProperties);
            }
            properties
        } else {
            Properties::new()
        };

        // It is valid for a PUBLISH packet to contain a zero length payload.
        let consumed = ba.offset() - body_start;
        let msg_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;
        let msg = ba.read_bytes(msg_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U16Data};

    #[test]
    fn test_publish_round_trip_qos0() {
        let packet = PublishPacket::new("t/a", QoS::AtMostOnce, b"x").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0x30, 0x06, 0x00, 0x03, b't', b'/', b'a', b'x']);

        let mut ba = ByteArray::new(&buf);
        let parsed = PublishPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_publish_round_trip_qos2_v5() {
        let mut packet = PublishPacket::new("sensors/soc", QoS::ExactOnce, b"47%").unwrap();
        packet.set_packet_id(PacketId::new(11)).set_retain(true);
        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(2)))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();

        let mut ba = ByteArray::new(&buf);
        let parsed = PublishPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.properties().topic_alias(), Some(2));
    }

    #[test]
    fn test_publish_qos1_requires_packet_id() {
        let buf = [0x32, 0x05, 0x00, 0x03, b't', b'/', b'a'];
        let mut ba = ByteArray::new(&buf);
        assert!(PublishPacket::decode(&mut ba, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn test_publish_empty_topic_requires_alias() {
        let mut packet = PublishPacket::new("t", QoS::AtMostOnce, b"x").unwrap();
        packet.clear_topic();
        let mut buf = Vec::new();
        assert_eq!(
            packet.encode(&mut buf, ProtocolVersion::V5),
            Err(EncodeError::InvalidData)
        );

        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(4)))
            .unwrap();
        assert!(packet.encode(&mut buf, ProtocolVersion::V5).is_ok());
    }

    #[test]
    fn test_publish_dup_retransmission() {
        let mut packet = PublishPacket::new("t/a", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(1));
        packet.set_dup(true).unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(buf[0], 0x3a);

        let mut ba = ByteArray::new(&buf);
        let parsed = PublishPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert!(parsed.dup());
    }
}
