// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Reason codes allowed in AUTH packets.
pub const AUTH_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::ContinueAuthentication,
    ReasonCode::ReAuthenticate,
];

/// Properties available in AUTH packets.
pub const AUTH_PROPERTIES: &[PropertyType] = &[
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
];

/// An AUTH packet is sent from Client to Server or Server to Client as part
/// of an extended authentication exchange, such as challenge / response
/// authentication.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Reason Code           |
/// +-----------------------+
/// | Properties ...        |
/// +-----------------------+
/// ```
///
/// It is a Protocol Error for the Client or Server to send an AUTH packet if
/// the CONNECT packet did not contain the same Authentication
/// Method [MQTT-3.15.0-1]. This packet only exists in v5.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuthPacket {
    reason_code: ReasonCode,

    properties: Properties,
}

impl AuthPacket {
    /// Create a new auth packet with `reason_code`.
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::new(),
        }
    }

    /// Get current reason code.
    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
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
    /// Returns error if `version` is not v5.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        if !version.is_v5() {
            return Err(EncodeError::InvalidVersion);
        }

        let mut body = Vec::new();
        // The Reason Code and Property Length can be omitted if the Reason
        // Code is 0x00 (Success) and there are no Properties.
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            self.reason_code.encode(&mut body)?;
            self.properties.encode(&mut body)?;
        }

        let fixed_header = FixedHeader::new(PacketType::Auth, body.len())?;
        let header_bytes = fixed_header.encode(buf)?;
        buf.write_all(&body)?;
        Ok(header_bytes + body.len())
    }

    /// Parse packet from byte stream.
    ///
    /// # Errors
    ///
    /// Returns error if byte stream is malformed or `version` is not v5.
    pub fn decode(ba: &mut ByteArray, version: ProtocolVersion) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        Self::decode_body(&fixed_header, ba, version)
    }

    pub(crate) fn decode_body(
        fixed_header: &FixedHeader,
        ba: &mut ByteArray,
        version: ProtocolVersion,
    ) -> Result<Self, DecodeError> {
        if fixed_header.packet_type() != PacketType::Auth {
            return Err(DecodeError::InvalidPacketType);
        }
        if !version.is_v5() {
            return Err(DecodeError::InvalidVersion);
        }

        if fixed_header.remaining_length() == 0 {
            return Ok(Self::default());
        }

        let reason_code = ReasonCode::decode(ba)?;
        if !AUTH_REASONS.contains(&reason_code) {
            log::error!("AuthPacket: invalid reason code: {reason_code:?}");
            return Err(DecodeError::InvalidReasonCode);
        }

        let properties = if fixed_header.remaining_length() > ReasonCode::bytes() {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) = check_property_type_list(properties.props(), AUTH_PROPERTIES)
            {
                log::error!(
                    "AuthPacket: property type {property_type:?} cannot be used in properties!"
                );
                return Err(DecodeError::InvalidProperties);
            }
            properties
        } else {
            Properties::new()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryData, Property, StringData};

    #[test]
    fn test_auth_round_trip() {
        let mut packet = AuthPacket::new(ReasonCode::ContinueAuthentication);
        packet
            .properties_mut()
            .push(Property::AuthenticationMethod(
                StringData::from("SCRAM-SHA-1").unwrap(),
            ))
            .unwrap();
        packet
            .properties_mut()
            .push(Property::AuthenticationData(
                BinaryData::from_slice(b"client-first").unwrap(),
            ))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(buf[0], 0xf0);
        assert_eq!(buf[2], 0x18);

        let mut ba = ByteArray::new(&buf);
        let parsed = AuthPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_auth_rejected_in_v3() {
        let buf = [0xf0, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            AuthPacket::decode(&mut ba, ProtocolVersion::V311),
            Err(DecodeError::InvalidVersion)
        );
    }
}
