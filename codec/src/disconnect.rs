// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Reason codes allowed in v5 DISCONNECT packets.
pub const DISCONNECT_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::DisconnectWithWillMessage,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerBusy,
    ReasonCode::ServerShuttingDown,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::KeepAliveTimeout,
    ReasonCode::SessionTakenOver,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::TopicNameInvalid,
    ReasonCode::ReceiveMaximumExceeded,
    ReasonCode::TopicAliasInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::MessageRateTooHigh,
    ReasonCode::QuotaExceeded,
    ReasonCode::AdministrativeAction,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::SharedSubscriptionsNotSupported,
    ReasonCode::ConnectionRateExceeded,
    ReasonCode::MaximumConnectTime,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

/// Properties available in DISCONNECT packets.
pub const DISCONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
    PropertyType::ServerReference,
];

/// The DISCONNECT packet is the final packet sent to the other side of the
/// connection. It indicates the reason why the network connection is closed.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Reason Code (v5)      |
/// +-----------------------+
/// | Properties (v5) ...   |
/// +-----------------------+
/// ```
///
/// In v3.1.1 this packet has no variable header and no payload. In v5 the
/// Reason Code and Property Length can be omitted if the Reason Code is 0x00
/// (Normal disconnection) and there are no Properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    /// v5 only.
    reason_code: Option<ReasonCode>,

    /// v5 only.
    properties: Properties,
}

impl DisconnectPacket {
    /// Create a new v3.1.1 disconnect packet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new v5 disconnect packet with `reason_code`.
    #[must_use]
    pub fn new_v5(reason_code: ReasonCode) -> Self {
        Self {
            reason_code: Some(reason_code),
            properties: Properties::new(),
        }
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
        let mut body = Vec::new();
        match version {
            ProtocolVersion::V311 => {
                if self.reason_code.is_some() || !self.properties.is_empty() {
                    return Err(EncodeError::InvalidVersion);
                }
            }
            ProtocolVersion::V5 => {
                let reason_code = self.reason_code.unwrap_or_default();
                if reason_code != ReasonCode::Success || !self.properties.is_empty() {
                    reason_code.encode(&mut body)?;
                }
                if !self.properties.is_empty() {
                    self.properties.encode(&mut body)?;
                }
            }
        }

        let fixed_header = FixedHeader::new(PacketType::Disconnect, body.len())?;
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
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }

        match version {
            ProtocolVersion::V311 => {
                if fixed_header.remaining_length() != 0 {
                    return Err(DecodeError::InvalidRemainingLength);
                }
                Ok(Self::default())
            }
            ProtocolVersion::V5 => {
                let remaining = fixed_header.remaining_length();
                let reason_code = if remaining >= ReasonCode::bytes() {
                    ReasonCode::decode(ba)?
                } else {
                    ReasonCode::default()
                };
                if !DISCONNECT_REASONS.contains(&reason_code) {
                    log::error!("DisconnectPacket: invalid reason code: {reason_code:?}");
                    return Err(DecodeError::InvalidReasonCode);
                }

                let properties = if remaining > ReasonCode::bytes() {
                    let properties = Properties::decode(ba)?;
                    if let Err(property_type) =
                        check_property_type_list(properties.props(), DISCONNECT_PROPERTIES)
                    {
                        log::error!(
                            "DisconnectPacket: property type {property_type:?} cannot be used in properties!"
                        );
                        return Err(DecodeError::InvalidProperties);
                    }
                    properties
                } else {
                    Properties::new()
                };

                Ok(Self {
                    reason_code: Some(reason_code),
                    properties,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U32Data};

    #[test]
    fn test_disconnect_layout_v3() {
        let packet = DisconnectPacket::new();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0xe0, 0x00]);
    }

    #[test]
    fn test_disconnect_with_will_and_session_expiry() {
        let mut packet = DisconnectPacket::new_v5(ReasonCode::DisconnectWithWillMessage);
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(30)))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(
            &buf,
            &[0xe0, 0x07, 0x04, 0x05, 0x11, 0x00, 0x00, 0x00, 0x1e]
        );

        let mut ba = ByteArray::new(&buf);
        let parsed = DisconnectPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_disconnect_empty_v5_is_normal() {
        let buf = [0xe0, 0x00];
        let mut ba = ByteArray::new(&buf);
        let parsed = DisconnectPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed.reason_code(), Some(ReasonCode::Success));
    }
}
