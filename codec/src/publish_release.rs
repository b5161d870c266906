// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::publish_ack::{decode_ack, encode_ack};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, FixedHeader, PacketId, PacketType,
    Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Reason codes allowed in v5 PUBREL packets.
pub const PUBLISH_RELEASE_REASONS: &[ReasonCode] =
    &[ReasonCode::Success, ReasonCode::PacketIdentifierNotFound];

/// Properties available in PUBREL packets.
pub const PUBLISH_RELEASE_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// A PUBREL packet is the response to a PUBREC packet.
///
/// It is the third packet of the `QoS` 2 protocol exchange.
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
/// Bits 3,2,1 and 0 of the Fixed Header in the PUBREL packet are reserved and
/// MUST be set to 0,0,1 and 0 respectively [MQTT-3.6.1-1].
///
/// This type of packet does not contain payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReleasePacket {
    packet_id: PacketId,

    /// v5 only.
    reason_code: Option<ReasonCode>,

    /// v5 only.
    properties: Properties,
}

impl PublishReleasePacket {
    /// Create a new v3.1.1 publish release packet with `packet_id`.
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            ..Self::default()
        }
    }

    /// Create a new v5 publish release packet with `packet_id` and `reason_code`.
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
            PacketType::PublishRelease,
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
            PacketType::PublishRelease,
            PUBLISH_RELEASE_REASONS,
            PUBLISH_RELEASE_PROPERTIES,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_release_round_trip_v3() {
        let packet = PublishReleasePacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0x62, 0x02, 0x00, 0x05]);

        let mut ba = ByteArray::new(&buf);
        let parsed = PublishReleasePacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_publish_release_unknown_id_v5() {
        let packet =
            PublishReleasePacket::new_v5(PacketId::new(5), ReasonCode::PacketIdentifierNotFound);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(&buf, &[0x62, 0x03, 0x00, 0x05, 0x92]);
    }
}
