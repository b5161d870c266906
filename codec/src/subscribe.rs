// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, QoS, SubTopic,
};

/// Properties available in SUBSCRIBE packets.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

/// Option to control how retained messages are sent when a subscription
/// is established. v5 only.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    SendAtSubscribe = 0,

    /// Send retained messages at subscribe only if the subscription does
    /// not currently exist.
    SendAtNewSubscribe = 1,

    /// Do not send retained messages at the time of the subscribe.
    DoNotSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::SendAtSubscribe),
            1 => Ok(Self::SendAtNewSubscribe),
            2 => Ok(Self::DoNotSend),
            _ => Err(DecodeError::InvalidPacketFlags),
        }
    }
}

/// Topic filter and subscription options pair in SUBSCRIBE packet payload.
///
/// In v3.1.1 the options byte carries only the maximum QoS; the v5 options
/// byte adds No Local, Retain As Published and Retain Handling.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeTopic {
    topic: SubTopic,
    qos: QoS,

    /// If true, application messages MUST NOT be forwarded to a connection
    /// with a ClientID equal to the ClientID of the publishing
    /// connection [MQTT-3.8.3-3]. v5 only.
    no_local: bool,

    /// If true, application messages forwarded using this subscription keep
    /// the RETAIN flag they were published with. v5 only.
    retain_as_published: bool,

    /// v5 only.
    retain_handling: RetainHandling,
}

impl SubscribeTopic {
    /// Create a new subscribe topic with maximum `qos`.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid filter.
    pub fn new(topic: &str, qos: QoS) -> Result<Self, EncodeError> {
        let topic = SubTopic::new(topic)?;
        Ok(Self {
            topic,
            qos,
            ..Self::default()
        })
    }

    /// Get current topic filter.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get current maximum qos.
    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Update no-local flag.
    pub fn set_no_local(&mut self, no_local: bool) -> &mut Self {
        self.no_local = no_local;
        self
    }

    /// Get current no-local flag.
    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    /// Update retain-as-published flag.
    pub fn set_retain_as_published(&mut self, retain_as_published: bool) -> &mut Self {
        self.retain_as_published = retain_as_published;
        self
    }

    /// Get current retain-as-published flag.
    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    /// Update retain-handling option.
    pub fn set_retain_handling(&mut self, retain_handling: RetainHandling) -> &mut Self {
        self.retain_handling = retain_handling;
        self
    }

    /// Get current retain-handling option.
    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    fn options_byte(&self, version: ProtocolVersion) -> Result<u8, EncodeError> {
        let mut byte = self.qos as u8;
        match version {
            ProtocolVersion::V311 => {
                if self.no_local
                    || self.retain_as_published
                    || self.retain_handling != RetainHandling::SendAtSubscribe
                {
                    return Err(EncodeError::InvalidVersion);
                }
            }
            ProtocolVersion::V5 => {
                if self.no_local {
                    byte |= 0b0000_0100;
                }
                if self.retain_as_published {
                    byte |= 0b0000_1000;
                }
                byte |= (self.retain_handling as u8) << 4;
            }
        }
        Ok(byte)
    }

    fn decode(ba: &mut ByteArray, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let topic = SubTopic::decode(ba)?;
        let options = ba.read_byte()?;
        let qos = QoS::try_from(options & 0b0000_0011)?;
        match version {
            ProtocolVersion::V311 => {
                // Bits 2-7 are reserved [MQTT-3.8.3-4].
                if options & 0b1111_1100 != 0 {
                    return Err(DecodeError::InvalidPacketFlags);
                }
                Ok(Self {
                    topic,
                    qos,
                    ..Self::default()
                })
            }
            ProtocolVersion::V5 => {
                // Bits 6 and 7 are reserved [MQTT-3.8.3-5].
                if options & 0b1100_0000 != 0 {
                    return Err(DecodeError::InvalidPacketFlags);
                }
                let no_local = options & 0b0000_0100 != 0;
                let retain_as_published = options & 0b0000_1000 != 0;
                let retain_handling = RetainHandling::try_from((options & 0b0011_0000) >> 4)?;
                Ok(Self {
                    topic,
                    qos,
                    no_local,
                    retain_as_published,
                    retain_handling,
                })
            }
        }
    }
}

/// The SUBSCRIBE packet is sent from the Client to the Server to create one
/// or more subscriptions.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Packet id             |
/// |                       |
/// +-----------------------+
/// | Properties (v5) ...   |
/// +-----------------------+
/// | Topic 0 length        |
/// |                       |
/// +-----------------------+
/// | Topic 0 ...           |
/// +-----------------------+
/// | Topic 0 options       |
/// +-----------------------+
/// | Topic 1 length        |
/// |                       |
/// +-----------------------+
/// | Topic 1 ...           |
/// +-----------------------+
/// | Topic 1 options       |
/// +-----------------------+
/// | ...                   |
/// +-----------------------+
/// ```
///
/// Each subscription registers a Client's interest in one or more topics.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    packet_id: PacketId,

    /// v5 only.
    properties: Properties,

    /// A list of topic filter and subscription options pairs.
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// Create a subscribe packet for a single `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not a valid filter.
    pub fn new(topic: &str, qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = SubscribeTopic::new(topic, qos)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a subscribe packet with a list of `topics`.
    #[must_use]
    pub fn with_topics(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            topics,
        }
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
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

    /// Get a reference to topic list.
    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }

    /// Serialize packet to byte stream for the negotiated `version`.
    ///
    /// # Errors
    ///
    /// Returns error if packet carries no topic or carries v5-only fields
    /// under v3.1.1.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        // The payload MUST contain at least one Topic Filter and Subscription
        // Options pair [MQTT-3.8.3-2].
        if self.topics.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        if version == ProtocolVersion::V311 && !self.properties.is_empty() {
            return Err(EncodeError::InvalidVersion);
        }
        if self.packet_id.value() == 0 {
            return Err(EncodeError::InvalidData);
        }

        let mut body = Vec::new();
        self.packet_id.encode(&mut body)?;
        if version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        for topic in &self.topics {
            topic.topic.encode(&mut body)?;
            body.push(topic.options_byte(version)?);
        }

        let fixed_header = FixedHeader::new(PacketType::Subscribe, body.len())?;
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
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }

        let body_start = ba.offset();
        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = if version.is_v5() {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), SUBSCRIBE_PROPERTIES)
            {
                log::error!(
                    "SubscribePacket: property type {property_type:?} cannot be used in properties!"
                );
                return Err(DecodeError::InvalidProperties);
            }
            // A SUBSCRIBE packet carries at most one Subscription Identifier.
            if properties.subscription_identifiers().len() > 1 {
                return Err(DecodeError::InvalidProperties);
            }
            properties
        } else {
            Properties::new()
        };

        let mut topics = Vec::new();
        while ba.offset() - body_start < fixed_header.remaining_length() {
            let topic = SubscribeTopic::decode(ba, version)?;
            topics.push(topic);
        }
        if topics.is_empty() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, VarInt};

    #[test]
    fn test_subscribe_round_trip_v3() {
        let packet = SubscribePacket::new("t/#", QoS::AtLeastOnce, PacketId::new(3)).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0x82, 0x08, 0x00, 0x03, 0x00, 0x03, b't', b'/', b'#', 0x01]);

        let mut ba = ByteArray::new(&buf);
        let parsed = SubscribePacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_subscribe_round_trip_v5() {
        let mut topic = SubscribeTopic::new("sensors/+/state", QoS::ExactOnce).unwrap();
        topic
            .set_no_local(true)
            .set_retain_handling(RetainHandling::DoNotSend);
        let mut packet = SubscribePacket::with_topics(PacketId::new(9), vec![topic]);
        packet
            .properties_mut()
            .push(Property::SubscriptionIdentifier(VarInt::from(17).unwrap()))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();

        let mut ba = ByteArray::new(&buf);
        let parsed = SubscribePacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.properties().subscription_identifiers(), vec![17]);
    }

    #[test]
    fn test_subscribe_reserved_option_bits() {
        let buf = [0x82, 0x08, 0x00, 0x03, 0x00, 0x03, b't', b'/', b'#', 0x41];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribePacket::decode(&mut ba, ProtocolVersion::V311),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
