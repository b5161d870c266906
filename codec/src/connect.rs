// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::property::check_property_type_list;
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader,
    PacketType, Properties, PropertyType, ProtocolVersion, PubTopic, QoS, StringData,
};

/// Protocol name of MQTT 3.1.1 and 5.0.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Properties available in the CONNECT variable header.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties available in the Will Properties field of the CONNECT payload.
pub const WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// Will Message the Server publishes on the Client's behalf when the network
/// connection is closed abnormally.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LastWill {
    topic: PubTopic,
    message: Vec<u8>,
    qos: QoS,
    retain: bool,

    /// v5 only.
    properties: Properties,
}

impl LastWill {
    /// Create a new will message.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid or `message` is too large.
    pub fn new(topic: &str, message: &[u8], qos: QoS, retain: bool) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        if message.len() > u16::MAX as usize {
            return Err(EncodeError::TooManyData);
        }
        Ok(Self {
            topic,
            message: message.to_vec(),
            qos,
            retain,
            properties: Properties::new(),
        })
    }

    /// Get will topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    /// Get will message payload.
    #[must_use]
    pub fn message(&self) -> &[u8] {
        &self.message
    }

    /// Get will qos.
    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Get will retain flag.
    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Get a mutable reference to will property list.
    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Get a reference to will property list.
    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }
}

/// `ConnectPacket` is the first packet sent to the Server after the network
/// connection is established.
///
/// Basic structure of packet:
///
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name length       |
/// |                            |
/// +----------------------------+
/// | Protocol name "MQTT"       |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Properties (v5) ...        |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | Will properties (v5) ...   |
/// +----------------------------+
/// | Will topic, Will message   |
/// +----------------------------+
/// | Username, Password         |
/// +----------------------------+
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    /// If `clean_session` (`Clean Start` in v5) is true, the Server MUST
    /// discard any existing session state associated with the client id and
    /// start a new one.
    clean_session: bool,

    /// Time interval between two packets, in seconds. 0 disables keep alive.
    keep_alive: u16,

    client_id: StringData,

    will: Option<LastWill>,

    username: Option<StringData>,

    password: Option<BinaryData>,

    /// v5 only.
    properties: Properties,
}

impl ConnectPacket {
    /// Create a new connect packet with a validated `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains invalid characters.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id)?;
        let client_id = StringData::from(client_id)?;
        Ok(Self {
            clean_session: true,
            keep_alive: 60,
            client_id,
            ..Self::default()
        })
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` contains invalid characters.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        validate_client_id(client_id)?;
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    /// Get current client id.
    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Update clean session flag.
    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.clean_session = clean_session;
        self
    }

    /// Get current clean session flag.
    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// Update keep alive interval, in seconds.
    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Get current keep alive interval.
    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    /// Update will message.
    pub fn set_will(&mut self, will: Option<LastWill>) -> &mut Self {
        self.will = will;
        self
    }

    /// Get current will message.
    #[must_use]
    pub const fn will(&self) -> Option<&LastWill> {
        self.will.as_ref()
    }

    /// Update username.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is invalid.
    pub fn set_username(&mut self, username: Option<&str>) -> Result<&mut Self, EncodeError> {
        self.username = match username {
            Some(username) => Some(StringData::from(username)?),
            None => None,
        };
        Ok(self)
    }

    /// Get current username.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_ref().map(AsRef::as_ref)
    }

    /// Update password.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is too large.
    pub fn set_password(&mut self, password: Option<&[u8]>) -> Result<&mut Self, EncodeError> {
        self.password = match password {
            Some(password) => Some(BinaryData::from_slice(password)?),
            None => None,
        };
        Ok(self)
    }

    /// Get current password.
    #[must_use]
    pub fn password(&self) -> Option<&[u8]> {
        self.password.as_ref().map(AsRef::as_ref)
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

    fn connect_flags(&self, version: ProtocolVersion) -> Result<u8, EncodeError> {
        let mut flags = 0b0000_0000;
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        if let Some(will) = &self.will {
            flags |= 0b0000_0100;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0b0010_0000;
            }
        }
        if self.password.is_some() {
            // In v3.1.1 the password flag requires the username
            // flag [MQTT-3.1.2-22]. v5 lifted this restriction.
            if version == ProtocolVersion::V311 && self.username.is_none() {
                return Err(EncodeError::InvalidData);
            }
            flags |= 0b0100_0000;
        }
        if self.username.is_some() {
            flags |= 0b1000_0000;
        }
        Ok(flags)
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

        let mut body = Vec::new();
        StringData::from(PROTOCOL_NAME)?.encode(&mut body)?;
        version.encode(&mut body)?;
        body.push(self.connect_flags(version)?);
        body.write_u16::<BigEndian>(self.keep_alive)?;
        if version.is_v5() {
            self.properties.encode(&mut body)?;
        }

        self.client_id.encode(&mut body)?;
        if let Some(will) = &self.will {
            if version.is_v5() {
                will.properties.encode(&mut body)?;
            } else if !will.properties.is_empty() {
                return Err(EncodeError::InvalidVersion);
            }
            will.topic.encode(&mut body)?;
            #[allow(clippy::cast_possible_truncation)]
            let message_len = will.message.len() as u16;
            body.write_u16::<BigEndian>(message_len)?;
            body.write_all(&will.message)?;
        }
        if let Some(username) = &self.username {
            username.encode(&mut body)?;
        }
        if let Some(password) = &self.password {
            password.encode(&mut body)?;
        }

        let fixed_header = FixedHeader::new(PacketType::Connect, body.len())?;
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
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }
        let level = ProtocolVersion::try_from(ba.read_byte()?)?;
        if level != version {
            return Err(DecodeError::InvalidProtocolLevel);
        }

        let flags = ba.read_byte()?;
        // The Server MUST validate that the reserved flag in the CONNECT packet
        // is set to 0 [MQTT-3.1.2-3].
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let clean_session = flags & 0b0000_0010 != 0;
        let has_will = flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will_retain = flags & 0b0010_0000 != 0;
        let has_password = flags & 0b0100_0000 != 0;
        let has_username = flags & 0b1000_0000 != 0;
        // If the Will Flag is set to 0, then Will QoS and Will Retain MUST be
        // set to 0 [MQTT-3.1.2-11].
        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidPacketFlags);
        }
        if version == ProtocolVersion::V311 && has_password && !has_username {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let keep_alive = ba.read_u16()?;
        let properties = if version.is_v5() {
            let properties = Properties::decode(ba)?;
            if let Err(property_type) =
                check_property_type_list(properties.props(), CONNECT_PROPERTIES)
            {
                log::error!("ConnectPacket: property type {property_type:?} cannot be used in properties!");
                return Err(DecodeError::InvalidProperties);
            }
            properties
        } else {
            Properties::new()
        };

        let client_id = StringData::decode(ba)?;
        let will = if has_will {
            let will_properties = if version.is_v5() {
                let will_properties = Properties::decode(ba)?;
                if let Err(property_type) =
                    check_property_type_list(will_properties.props(), WILL_PROPERTIES)
                {
                    log::error!("ConnectPacket: property type {property_type:?} cannot be used in will properties!");
                    return Err(DecodeError::InvalidProperties);
                }
                will_properties
            } else {
                Properties::new()
            };
            let topic = PubTopic::decode(ba)?;
            if topic.is_empty() {
                return Err(DecodeError::InvalidTopic);
            }
            let message_len = ba.read_u16()? as usize;
            let message = ba.read_bytes(message_len)?.to_vec();
            Some(LastWill {
                topic,
                message,
                qos: will_qos,
                retain: will_retain,
                properties: will_properties,
            })
        } else {
            None
        };

        let username = if has_username {
            Some(StringData::decode(ba)?)
        } else {
            None
        };
        let password = if has_password {
            Some(BinaryData::decode(ba)?)
        } else {
            None
        };

        Ok(Self {
            clean_session,
            keep_alive,
            client_id,
            will,
            username,
            password,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Property, U32Data};

    #[test]
    fn test_connect_round_trip_v3() {
        let mut packet = ConnectPacket::new("luoClient").unwrap();
        packet.set_keep_alive(30).set_clean_session(false);
        packet.set_username(Some("user")).unwrap();
        packet.set_password(Some(b"secret")).unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();

        let mut ba = ByteArray::new(&buf);
        let parsed = ConnectPacket::decode(&mut ba, ProtocolVersion::V311).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_connect_round_trip_v5() {
        let mut packet = ConnectPacket::new("luoClient").unwrap();
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(120)))
            .unwrap();
        let mut will = LastWill::new("last/word", b"gone", QoS::AtLeastOnce, true).unwrap();
        will.properties_mut()
            .push(Property::WillDelayInterval(U32Data::new(5)))
            .unwrap();
        packet.set_will(Some(will));

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();

        let mut ba = ByteArray::new(&buf);
        let parsed = ConnectPacket::decode(&mut ba, ProtocolVersion::V5).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_connect_v5_properties_rejected_in_v3() {
        let mut packet = ConnectPacket::new("luoClient").unwrap();
        packet
            .properties_mut()
            .push(Property::SessionExpiryInterval(U32Data::new(120)))
            .unwrap();
        let mut buf = Vec::new();
        assert_eq!(
            packet.encode(&mut buf, ProtocolVersion::V311),
            Err(EncodeError::InvalidVersion)
        );
    }

    #[test]
    fn test_connect_header_bytes() {
        let packet = ConnectPacket::new("c1").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        // Fixed header, protocol name, level 4, flags, keep alive, client id.
        assert_eq!(buf[0], 0x10);
        assert_eq!(&buf[2..9], &[0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04]);
    }
}
