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

/// Reason codes allowed in v5 UNSUBACK packets, one per topic filter.
pub const UNSUBSCRIBE_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoSubscriptionExisted,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
];

/// Properties available in UNSUBACK packets.
pub const UNSUBSCRIBE_ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// An UNSUBACK packet is sent by the Server to the Client to confirm receipt
/// of an UNSUBSCRIBE packet.
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
/// | Reasons (v5) ...      |
/// +-----------------------+
/// ```
///
/// The v3.1.1 packet has no payload; in v5 the payload contains one reason
/// code per topic filter, in the order of the UNSUBSCRIBE packet [MQTT-3.11.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnsubscribeAckPacket {
    packet_id: PacketId,

    /// v5 only.
    properties: Properties,

    /// v5 only.
    reasons: Vec<ReasonCode>,
}

impl UnsubscribeAckPacket {
    /// Create a new unsubscribe ack packet with `packet_id`.
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    /// Create a new v5 unsubscribe ack packet with a list of `reasons`.
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
        let mut body = Vec::new();
        self.packet_id.encode(&mut body)?;
        match version {
            ProtocolVersion::V311 => {
                if !self.properties.is_empty() || !self.reasons.is_empty() {
                    return Err(EncodeError::InvalidVersion);
                }
            }
            ProtocolVersion::V5 => {
                if self.reasons.is_empty() {
                    return Err(EncodeError::InvalidData);
                }
                self.properties.encode(&mut body)?;
                for reason in &self.reasons {
                    reason.encode(&mut body)?;
                }
            }
        }

        let fixed_header = FixedHeader::new(PacketType::UnsubscribeAck, body.len())?;
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
        if fixed_header.packet_type() != PacketType::UnsubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let body_start = ba.offset();
        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        match version {
            ProtocolVersion::V311 => {
                if fixed_header.remaining_length() != PacketId::bytes() {
                    return Err(DecodeError::InvalidRemainingLength);
                }
                Ok(Self {
                    packet_id,
                    properties: Properties::new(),
                    reasons: Vec::new(),
                })
            }
            ProtocolVersion::V5 => {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), UNSUBSCRIBE_ACK_PROPERTIES)
                {
                    log::error!(
                        "UnsubscribeAckPacket: property type {property_type:?} cannot be used in properties!"
                    );
                    return Err(DecodeError::InvalidProperties);
                }

                let mut reasons = Vec::new();
                while ba.offset() - body_start < fixed_header.remaining_length() {
                    let reason = ReasonCode::try_from(ba.read_byte()?)?;
                    if !UNSUBSCRIBE_ACK_REASONS.contains(&reason) {
                        log::error!("UnsubscribeAckPacket: invalid reason code: {reason:?}");
                        return Err(DecodeError::InvalidReasonCode);
                    }
                    reasons.push(reason);
                }

                Ok(Self {
                    packet_id,
                    properties,
                    reasons,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_ack_round_trip_v3() {
        let packet = UnsubscribeAckPacket::new(PacketId::new(4));
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0xb0, 0x02, 0x00, 0x04]);

        let mut ba = ByteArray::new(&buf);
        let parsed = UnsubscribeAckPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_unsubscribe_ack_round_trip_v5() {
        let packet = UnsubscribeAckPacket::with_reasons(
            PacketId::new(4),
            vec![ReasonCode::Success, ReasonCode::NoSubscriptionExisted],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(&buf, &[0xb0, 0x05, 0x00, 0x04, 0x00, 0x00, 0x11]);

        let mut ba = ByteArray::new(&buf);
        let parsed = UnsubscribeAckPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }
}
