// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Reason codes allowed in v5 SUBACK packets, one per topic filter.
pub const SUBSCRIBE_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::GrantedQoS1,
    ReasonCode::GrantedQoS2,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::SharedSubscriptionsNotSupported,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

/// Return codes allowed in v3.1.1 SUBACK packets.
const SUBSCRIBE_ACK_REASONS_V3: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::GrantedQoS1,
    ReasonCode::GrantedQoS2,
    ReasonCode::UnspecifiedError,
];

/// Properties available in SUBACK packets.
pub const SUBSCRIBE_ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// A SUBACK packet is sent by the Server to the Client to confirm receipt and
/// processing of a SUBSCRIBE packet.
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
/// | Reasons ...           |
/// +-----------------------+
/// ```
///
/// The SUBACK packet MUST contain a reason code for each Topic Filter/
/// Subscription Option pair, in the same order as in the SUBSCRIBE
/// packet [MQTT-3.9.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,

    /// v5 only.
    properties: Properties,

    /// One reason code per topic filter.
    reasons: Vec<ReasonCode>,
}

impl SubscribeAckPacket {
    /// Create a new subscribe ack packet with a single `reason`.
    #[must_use]
    pub fn new(packet_id: PacketId, reason: ReasonCode) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons: vec![reason],
        }
    }

    /// Create a new subscribe ack packet with a list of `reasons`.
    #[must_use]
    pub fn with_reasons(packet_id: PacketId, reasons: Vec<ReasonCode>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons,
        }
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Get a reference to property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Get a reference to reason code list.
    #[must_use]
    pub fn reasons(&self) -> &[ReasonCode] {
        &self.reasons
    }

    /// Serialize packet to byte stream for the negotiated `version`.
    ///
    /// # Errors
    ///
    /// Returns error if packet carries v5-only fields under v3.1.1.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        if version == ProtocolVersion::V311 && !self.properties.is_empty() {
            return Err(EncodeError::InvalidVersion);
        }
        if self.reasons.is_empty() {
            return Err(EncodeError::InvalidData);
        }

        let mut body = Vec::new();
        self.packet_id.encode(&mut body)?;
        if version.is_v5() {
            self.properties.encode(&mut body)?;
        }
        for reason in &self.reasons {
            reason.encode(&mut body)?;
        }

        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, body.len())?;
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
        if fixed_header.packet_type() != PacketType::SubscribeAck {
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
                check_property_type_list(properties.props(), SUBSCRIBE_ACK_PROPERTIES)
            {
                log::error!(
                    "SubscribeAckPacket: property type {property_type:?} cannot be used in properties!"
                );
                return Err(DecodeError::InvalidProperties);
            }
            properties
        } else {
            Properties::new()
        };

        let allowed_reasons = if version.is_v5() {
            SUBSCRIBE_ACK_REASONS
        } else {
            SUBSCRIBE_ACK_REASONS_V3
        };
        let mut reasons = Vec::new();
        while ba.offset() - body_start < fixed_header.remaining_length() {
            let reason = ReasonCode::try_from(ba.read_byte()?)?;
            if !allowed_reasons.contains(&reason) {
                log::error!("SubscribeAckPacket: invalid reason code: {reason:?}");
                return Err(DecodeError::InvalidReasonCode);
            }
            reasons.push(reason);
        }
        if reasons.is_empty() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            packet_id,
            properties,
            reasons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_ack_round_trip_v3() {
        let packet = SubscribeAckPacket::with_reasons(
            PacketId::new(3),
            vec![ReasonCode::GrantedQoS1, ReasonCode::UnspecifiedError],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0x90, 0x04, 0x00, 0x03, 0x01, 0x80]);

        let mut ba = ByteArray::new(&buf);
        let parsed = SubscribeAckPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_subscribe_ack_round_trip_v5() {
        let packet = SubscribeAckPacket::new(PacketId::new(9), ReasonCode::GrantedQoS2);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(&buf, &[0x90, 0x04, 0x00, 0x09, 0x00, 0x02]);

        let mut ba = ByteArray::new(&buf);
        let parsed = SubscribeAckPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }
}
