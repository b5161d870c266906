// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// The Client or Server sending the PUBACK packet MUST use one of the PUBACK
/// Reason Codes [MQTT-3.4.2-1].
pub const PUBLISH_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoMatchingSubscribers,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
];

/// Properties available in PUBACK packets.
pub const PUBLISH_ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// Acknowledge packet for Publish message in `QoS` 1.
///
/// Basic packet structure:
/// ```txt
///  7                  0
/// +--------------------+
/// | Fixed header       |
/// |                    |
/// +--------------------+
/// | Packet id          |
/// |                    |
/// +--------------------+
/// | Reason Code (v5)   |
/// +--------------------+
/// | Properties (v5) .. |
/// +--------------------+
/// ```
///
/// This type of packet does not contain payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishAckPacket {
    packet_id: PacketId,

    /// v5 only. If the remaining length is 2, there is no Reason Code and the
    /// value of 0x00 (Success) is used.
    reason_code: Option<ReasonCode>,

    /// v5 only.
    properties: Properties,
}

impl PublishAckPacket {
    /// Create a new v3.1.1 publish ack packet with `packet_id`.
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    /// Create a new v5 publish ack packet with `packet_id` and `reason_code`.
    #[must_use]
    pub fn new_v5(packet_id: PacketId, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code: Some(reason_code),
            properties: Properties::new(),
        }
    }

    /// Get current packet id.
    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Get current reason code.
    #[must_use]
    pub const fn reason_code(&self) -> Option<ReasonCode> {
        self.reason_code
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

    /// Serialize packet to byte stream for the negotiated `version`.
    ///
    /// # Errors
    ///
    /// Returns error if packet carries v5-only fields under v3.1.1.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        encode_ack(
            PacketType::PublishAck,
            self.packet_id,
            self.reason_code,
            &self.properties,
            buf,
            version,
        )
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
        let (packet_id, reason_code, properties) = decode_ack(
            PacketType::PublishAck,
            PUBLISH_ACK_REASONS,
            PUBLISH_ACK_PROPERTIES,
            fixed_header,
            ba,
            version,
        )?;
        Ok(Self {
            packet_id,
            reason_code,
            properties,
        })
    }
}

/// Shared variable-header layout of the PUBACK, PUBREC, PUBREL and PUBCOMP
/// packets.
pub(crate) fn encode_ack(
    packet_type: PacketType,
    packet_id: PacketId,
    reason_code: Option<ReasonCode>,
    properties: &Properties,
    buf: &mut Vec<u8>,
    version: ProtocolVersion,
) -> Result<usize, EncodeError> {
    let mut body = Vec::new();
    packet_id.encode(&mut body)?;
    match version {
        ProtocolVersion::V311 => {
            if reason_code.is_some() || !properties.is_empty() {
                return Err(EncodeError::InvalidVersion);
            }
        }
        ProtocolVersion::V5 => {
            let reason_code = reason_code.unwrap_or_default();
            // The Reason Code and Property Length can be omitted if the
            // Reason Code is 0x00 (Success) and there are no Properties.
            if reason_code != ReasonCode::Success || !properties.is_empty() {
                reason_code.encode(&mut body)?;
            }
            if !properties.is_empty() {
                properties.encode(&mut body)?;
            }
        }
    }

    let fixed_header = FixedHeader::new(packet_type, body.len())?;
    let header_bytes = fixed_header.encode(buf)?;
    buf.write_all(&body)?;
    Ok(header_bytes + body.len())
}

pub(crate) fn decode_ack(
    packet_type: PacketType,
    allowed_reasons: &[ReasonCode],
    allowed_properties: &[PropertyType],
    fixed_header: &FixedHeader,
    ba: &mut ByteArray,
    version: ProtocolVersion,
) -> Result<(PacketId, Option<ReasonCode>, Properties), DecodeError> {
    if fixed_header.packet_type() != packet_type {
        return Err(DecodeError::InvalidPacketType);
    }
    if fixed_header.remaining_length() < PacketId::bytes() {
        return Err(DecodeError::InvalidRemainingLength);
    }
    let packet_id = PacketId::decode(ba)?;
    if packet_id.value() == 0 {
        return Err(DecodeError::InvalidPacketId);
    }
    let remaining = fixed_header.remaining_length() - PacketId::bytes();

    match version {
        ProtocolVersion::V311 => {
            if remaining != 0 {
                return Err(DecodeError::InvalidRemainingLength);
            }
            Ok((packet_id, None, Properties::new()))
        }
        ProtocolVersion::V5 => {
            let reason_code = if remaining >= ReasonCode::bytes() {
                ReasonCode::decode(ba)?
            } else {
                ReasonCode::default()
            };
            if !allowed_reasons.contains(&reason_code) {
                log::error!("{packet_type:?}: invalid reason code: {reason_code:?}");
                return Err(DecodeError::InvalidReasonCode);
            }

            let properties = if remaining > ReasonCode::bytes() {
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), allowed_properties)
                {
                    log::error!(
                        "{packet_type:?}: property type {property_type:?} cannot be used in properties!"
                    );
                    return Err(DecodeError::InvalidProperties);
                }
                properties
            } else {
                Properties::new()
            };
            Ok((packet_id, Some(reason_code), properties))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_ack_round_trip_v3() {
        let packet = PublishAckPacket::new(PacketId::new(7));
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0x40, 0x02, 0x00, 0x07]);

        let mut ba = ByteArray::new(&buf);
        let parsed = PublishAckPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_publish_ack_short_v5_defaults_to_success() {
        let buf = [0x40, 0x02, 0x00, 0x07];
        let mut ba = ByteArray::new(&buf);
        let parsed = PublishAckPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed.reason_code(), Some(ReasonCode::Success));
    }

    #[test]
    fn test_publish_ack_round_trip_v5() {
        let packet = PublishAckPacket::new_v5(PacketId::new(7), ReasonCode::QuotaExceeded);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(&buf, &[0x40, 0x03, 0x00, 0x07, 0x97]);

        let mut ba = ByteArray::new(&buf);
        let parsed = PublishAckPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_publish_ack_invalid_reason() {
        // 0x92 Packet Identifier not found is not a PUBACK reason code.
        let buf = [0x40, 0x03, 0x00, 0x07, 0x92];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishAckPacket::decode(&mut ba, ProtocolVersion::V5),
            Err(DecodeError::InvalidReasonCode)
        );
    }

    #[test]
    fn test_publish_ack_zero_packet_id() {
        let buf = [0x40, 0x02, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishAckPacket::decode(&mut ba, ProtocolVersion::V311),
            Err(DecodeError::InvalidPacketId)
        );
    }
}
