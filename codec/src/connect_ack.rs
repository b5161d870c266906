// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::io::Write;

use crate::property::check_property_type_list;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, PropertyType, ProtocolVersion, ReasonCode,
};

/// Reason codes allowed in v5 CONNACK packets.
pub const CONNECT_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::UnsupportedProtocolVersion,
    ReasonCode::ClientIdentifierNotValid,
    ReasonCode::BadUserNameOrPassword,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerUnavailable,
    ReasonCode::ServerBusy,
    ReasonCode::Banned,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::ConnectionRateExceeded,
    // The server replies 0x18 to request extended authentication steps.
    ReasonCode::ContinueAuthentication,
];

/// Properties available in CONNACK packets.
pub const CONNECT_ACK_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumQoS,
    PropertyType::RetainAvailable,
    PropertyType::MaximumPacketSize,
    PropertyType::AssignedClientIdentifier,
    PropertyType::TopicAliasMaximum,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
    PropertyType::WildcardSubscriptionAvailable,
    PropertyType::SubscriptionIdentifierAvailable,
    PropertyType::SharedSubscriptionAvailable,
    PropertyType::ServerKeepAlive,
    PropertyType::ResponseInformation,
    PropertyType::ServerReference,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Return code in v3.1.1 CONNACK packets.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    #[default]
    Accepted = 0,

    /// The Server does not support the level of the MQTT protocol requested
    /// by the Client.
    UnacceptableProtocolVersion = 1,

    /// The Client identifier is correct UTF-8 but not allowed by the Server.
    IdentifierRejected = 2,

    /// The Network Connection has been made but the MQTT service is unavailable.
    ServerUnavailable = 3,

    /// The data in the user name or password is malformed.
    BadUserNameOrPassword = 4,

    /// The Client is not authorized to connect.
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptableProtocolVersion),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadUserNameOrPassword),
            5 => Ok(Self::NotAuthorized),
            _ => Err(DecodeError::InvalidConnectReturnCode),
        }
    }
}

/// `ConnectAckPacket` is the packet sent by the Server in response to a
/// CONNECT packet received from a Client.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Ack flags             |
/// +-----------------------+
/// | Return / Reason code  |
/// +-----------------------+
/// | Properties (v5) ...   |
/// +-----------------------+
/// ```
///
/// The first packet sent from the Server to the Client MUST be a CONNACK
/// packet [MQTT-3.2.0-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectAckPacket {
    /// The Session Present flag informs the Client whether the Server is
    /// using Session State from a previous connection for this client id.
    session_present: bool,

    /// v3.1.1 only.
    return_code: Option<ConnectReturnCode>,

    /// v5 only.
    reason_code: Option<ReasonCode>,

    /// v5 only.
    properties: Properties,
}

impl ConnectAckPacket {
    /// Create a new v3.1.1 connect ack packet.
    #[must_use]
    pub fn new_v3(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self {
            // If a server sends a CONNACK packet containing a non-zero return
            // code it MUST set Session Present to 0 [MQTT-3.2.2-4].
            session_present: session_present && return_code == ConnectReturnCode::Accepted,
            return_code: Some(return_code),
            reason_code: None,
            properties: Properties::new(),
        }
    }

    /// Create a new v5 connect ack packet.
    #[must_use]
    pub fn new_v5(session_present: bool, reason_code: ReasonCode) -> Self {
        Self {
            session_present: session_present && reason_code == ReasonCode::Success,
            return_code: None,
            reason_code: Some(reason_code),
            properties: Properties::new(),
        }
    }

    /// Get current session present flag.
    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    /// Get current v3.1.1 return code.
    #[must_use]
    pub const fn return_code(&self) -> Option<ConnectReturnCode> {
        self.return_code
    }

    /// Get current v5 reason code.
    #[must_use]
    pub const fn reason_code(&self) -> Option<ReasonCode> {
        self.reason_code
    }

    /// Returns true if the server accepted the connection.
    #[must_use]
    pub fn accepted(&self) -> bool {
        match (self.return_code, self.reason_code) {
            (Some(return_code), _) => return_code == ConnectReturnCode::Accepted,
            (_, Some(reason_code)) => reason_code == ReasonCode::Success,
            _ => false,
        }
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
    /// Returns error if the code field does not match `version`.
    pub fn encode(&self, buf: &mut Vec<u8>, version: ProtocolVersion) -> Result<usize, EncodeError> {
        let mut body = Vec::new();
        let ack_flags = u8::from(self.session_present);
        body.push(ack_flags);
        match version {
            ProtocolVersion::V311 => {
                if self.reason_code.is_some() || !self.properties.is_empty() {
                    return Err(EncodeError::InvalidVersion);
                }
                let return_code = self.return_code.ok_or(EncodeError::InvalidData)?;
                body.push(return_code as u8);
            }
            ProtocolVersion::V5 => {
                let reason_code = self.reason_code.ok_or(EncodeError::InvalidData)?;
                reason_code.encode(&mut body)?;
                self.properties.encode(&mut body)?;
            }
        }

        let fixed_header = FixedHeader::new(PacketType::ConnectAck, body.len())?;
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
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let ack_flags = ba.read_byte()?;
        // Bits 7-1 are reserved and MUST be set to 0 [MQTT-3.2.2-1].
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let session_present = ack_flags & 0b0000_0001 == 0b0000_0001;

        match version {
            ProtocolVersion::V311 => {
                let return_code = ConnectReturnCode::try_from(ba.read_byte()?)?;
                Ok(Self {
                    session_present,
                    return_code: Some(return_code),
                    reason_code: None,
                    properties: Properties::new(),
                })
            }
            ProtocolVersion::V5 => {
                let reason_code = ReasonCode::decode(ba)?;
                if !CONNECT_REASONS.contains(&reason_code) {
                    log::error!("ConnectAckPacket: invalid reason code: {reason_code:?}");
                    return Err(DecodeError::InvalidReasonCode);
                }
                let properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(properties.props(), CONNECT_ACK_PROPERTIES)
                {
                    log::error!(
                        "ConnectAckPacket: property type {property_type:?} cannot be used in properties!"
                    );
                    return Err(DecodeError::InvalidProperties);
                }
                Ok(Self {
                    session_present,
                    return_code: None,
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
    use crate::{Property, StringData, U16Data};

    #[test]
    fn test_connect_ack_round_trip_v3() {
        let packet = ConnectAckPacket::new_v3(true, ConnectReturnCode::Accepted);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf, &[0x20, 0x02, 0x01, 0x00]);

        let mut ba = ByteArray::new(&buf);
        let parsed = ConnectAckPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_connect_ack_round_trip_v5() {
        let mut packet = ConnectAckPacket::new_v5(false, ReasonCode::Success);
        packet
            .properties_mut()
            .push(Property::ServerKeepAlive(U16Data::new(25)))
            .unwrap();
        packet
            .properties_mut()
            .push(Property::AssignedClientIdentifier(
                StringData::from("srv0001").unwrap(),
            ))
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();

        let mut ba = ByteArray::new(&buf);
        let parsed = ConnectAckPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.properties().server_keep_alive(), Some(25));
        assert_eq!(
            parsed.properties().assigned_client_identifier(),
            Some("srv0001")
        );
    }

    #[test]
    fn test_connect_ack_reserved_flags() {
        let buf = [0x20, 0x02, 0x02, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectAckPacket::decode(&mut ba, ProtocolVersion::V311),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
