// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, QoS, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Properties which are allowed to appear more than once in a property list.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Check that every property in `properties` is allowed in the owning packet
/// type and that non-repeatable properties appear at most once.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    if properties.is_empty() {
        return Ok(());
    }

    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

/// Property identifiers defined in MQTT 5.0.
#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// A typed (identifier, value) pair carried in v5 packets.
///
/// Each variant documents the value type and the packets it may appear in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. Used in PUBLISH, Will Properties.
    ///
    /// 0 means the payload is unspecified bytes, 1 means it is UTF-8 encoded
    /// character data.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer. Used in PUBLISH, Will Properties.
    ///
    /// Lifetime of the message in seconds. If absent, the message does not expire.
    MessageExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ContentType(StringData),

    /// UTF-8 Encoded String. Used in PUBLISH, Will Properties.
    ///
    /// Topic Name for a response message.
    ResponseTopic(PubTopic),

    /// Binary Data. Used in PUBLISH, Will Properties.
    ///
    /// Used by the sender of a Request Message to identify which request the
    /// Response Message is for when it is received.
    CorrelationData(BinaryData),

    /// Variable Byte Integer. Used in PUBLISH, SUBSCRIBE.
    ///
    /// The Subscription Identifier can have a value of 1 to 268,435,455.
    /// It is a Protocol Error if the Subscription Identifier has a value of 0.
    /// Multiple Subscription Identifiers are allowed in PUBLISH packets when
    /// the publication is the result of a match to more than one subscription.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer. Used in CONNECT, CONNACK, DISCONNECT.
    ///
    /// Session Expiry Interval in seconds. If absent, the session ends when
    /// the network connection is closed. 0xFFFFFFFF means the session does
    /// not expire.
    SessionExpiryInterval(U32Data),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// The Client Identifier which was assigned by the Server.
    AssignedClientIdentifier(StringData),

    /// Two Byte Integer. Used in CONNACK.
    ///
    /// If the Server sends a Server Keep Alive on the CONNACK packet, the
    /// Client MUST use this value instead of the Keep Alive value the Client
    /// sent on CONNECT [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 Encoded String. Used in CONNECT, CONNACK, AUTH.
    ///
    /// Name of the authentication method used for extended authentication.
    /// If absent, extended authentication is not performed.
    AuthenticationMethod(StringData),

    /// Binary Data. Used in CONNECT, CONNACK, AUTH.
    ///
    /// The contents of this data are defined by the authentication method.
    AuthenticationData(BinaryData),

    /// Byte. Used in CONNECT.
    ///
    /// The Client uses this value to indicate whether the Reason String or
    /// User Properties are sent in the case of failures.
    RequestProblemInformation(BoolData),

    /// Four Byte Integer. Will Properties.
    ///
    /// The Server delays publishing the Client's Will Message until the Will
    /// Delay Interval has passed or the Session ends, whichever happens first.
    WillDelayInterval(U32Data),

    /// Byte. Used in CONNECT.
    ///
    /// The Client uses this value to request the Server to return Response
    /// Information in the CONNACK.
    RequestResponseInformation(BoolData),

    /// UTF-8 Encoded String. Used in CONNACK.
    ///
    /// Used as the basis for creating a Response Topic.
    ResponseInformation(StringData),

    /// UTF-8 Encoded String. Used in CONNACK, DISCONNECT.
    ///
    /// Used by the Client to identify another Server to use, together with
    /// Reason Code 0x9C (Use another server) or 0x9D (Server moved).
    ServerReference(StringData),

    /// UTF-8 Encoded String. Used in CONNACK, PUBACK, PUBREC, PUBREL, PUBCOMP,
    /// SUBACK, UNSUBACK, DISCONNECT, AUTH.
    ///
    /// A human readable string designed for diagnostics which SHOULD NOT be
    /// parsed by the receiver.
    ReasonString(StringData),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// Limits the number of QoS 1 and QoS 2 publications that the sender is
    /// willing to process concurrently. It is a Protocol Error to include the
    /// Receive Maximum value more than once or for it to have the value 0.
    /// If absent its value defaults to 65,535.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// The highest value that the sender will accept as a Topic Alias sent by
    /// the other side. If absent, the default value is 0.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer. Used in PUBLISH.
    ///
    /// An integer value used to identify the Topic instead of using the Topic
    /// Name. A Topic Alias of 0 is not permitted [MQTT-3.3.2-8], and topic
    /// alias mappings last only for the lifetime of a network connection.
    TopicAlias(U16Data),

    /// Byte. Used in CONNACK.
    ///
    /// The highest QoS the Server supports. If absent, the Client uses a
    /// Maximum QoS of 2. It is a Protocol Error to include Maximum QoS with a
    /// value other than 0 or 1.
    MaximumQoS(QoS),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports retained messages. If absent,
    /// retained messages are supported.
    RetainAvailable(BoolData),

    /// UTF-8 String Pair. Used in all packets which carry properties.
    ///
    /// The User Property is allowed to appear multiple times to represent
    /// multiple name, value pairs. The same name is allowed to appear more
    /// than once.
    UserProperty(StringPairData),

    /// Four Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// The Maximum Packet Size the sender is willing to accept. It is a
    /// Protocol Error to include the Maximum Packet Size more than once, or
    /// for the value to be set to zero.
    MaximumPacketSize(U32Data),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports Wildcard Subscriptions.
    /// If absent, they are supported.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports Subscription Identifiers.
    /// If absent, they are supported.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte. Used in CONNACK.
    ///
    /// Declares whether the Server supports Shared Subscriptions.
    /// If absent, they are supported.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    /// Get type of the property.
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length used in packets.
    #[allow(clippy::match_same_arms)]
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::AssignedClientIdentifier(value) => value.bytes(),
            Self::AuthenticationData(value) => value.bytes(),
            Self::AuthenticationMethod(value) => value.bytes(),
            Self::ContentType(value) => value.bytes(),
            Self::CorrelationData(value) => value.bytes(),
            Self::MaximumPacketSize(..) => U32Data::bytes(),
            Self::MaximumQoS(..) => QoS::bytes(),
            Self::MessageExpiryInterval(..) => U32Data::bytes(),
            Self::PayloadFormatIndicator(..) => BoolData::bytes(),
            Self::ReasonString(value) => value.bytes(),
            Self::ReceiveMaximum(..) => U16Data::bytes(),
            Self::RequestProblemInformation(..) => BoolData::bytes(),
            Self::RequestResponseInformation(..) => BoolData::bytes(),
            Self::ResponseInformation(value) => value.bytes(),
            Self::ResponseTopic(value) => value.bytes(),
            Self::RetainAvailable(..) => BoolData::bytes(),
            Self::ServerKeepAlive(..) => U16Data::bytes(),
            Self::ServerReference(value) => value.bytes(),
            Self::SessionExpiryInterval(..) => U32Data::bytes(),
            Self::SharedSubscriptionAvailable(..) => BoolData::bytes(),
            Self::SubscriptionIdentifier(value) => value.bytes(),
            Self::SubscriptionIdentifierAvailable(..) => BoolData::bytes(),
            Self::TopicAlias(..) => U16Data::bytes(),
            Self::TopicAliasMaximum(..) => U16Data::bytes(),
            Self::UserProperty(value) => value.bytes(),
            Self::WildcardSubscriptionAvailable(..) => BoolData::bytes(),
            Self::WillDelayInterval(..) => U32Data::bytes(),
        };

        PropertyType::bytes() + value_bytes
    }
}

impl Property {
    /// If the Receive Maximum property is absent its value defaults to 65,535.
    #[must_use]
    pub const fn default_receive_maximum() -> u16 {
        u16::MAX
    }

    #[must_use]
    pub const fn default_topic_alias_maximum() -> u16 {
        0
    }

    #[must_use]
    pub const fn default_maximum_qos() -> QoS {
        QoS::ExactOnce
    }

    #[must_use]
    pub const fn default_retain_available() -> bool {
        true
    }

    #[must_use]
    pub const fn default_wildcard_subscription_available() -> bool {
        true
    }

    #[must_use]
    pub const fn default_subscription_identifier_available() -> bool {
        true
    }

    #[must_use]
    pub const fn default_shared_subscription_available() -> bool {
        true
    }
}

impl DecodePacket for Property {
    #[allow(clippy::too_many_lines)]
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type_byte = ba.read_byte()?;
        let property_type = PropertyType::try_from(property_type_byte)?;
        match property_type {
            PropertyType::SessionExpiryInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::SessionExpiryInterval(interval))
            }
            PropertyType::ReceiveMaximum => {
                let max = U16Data::decode(ba)?;
                // It is a Protocol Error for Receive Maximum to have the value 0.
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::ReceiveMaximum(max))
            }
            PropertyType::MaximumPacketSize => {
                let max = U32Data::decode(ba)?;
                if max.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumPacketSize(max))
            }
            PropertyType::RequestResponseInformation => {
                let on = BoolData::decode(ba)?;
                Ok(Self::RequestResponseInformation(on))
            }
            PropertyType::RequestProblemInformation => {
                let on = BoolData::decode(ba)?;
                Ok(Self::RequestProblemInformation(on))
            }
            PropertyType::UserProperty => {
                let pair = StringPairData::decode(ba)?;
                Ok(Self::UserProperty(pair))
            }
            PropertyType::AuthenticationMethod => {
                let method = StringData::decode(ba)?;
                Ok(Self::AuthenticationMethod(method))
            }
            PropertyType::AuthenticationData => {
                let data = BinaryData::decode(ba)?;
                Ok(Self::AuthenticationData(data))
            }
            PropertyType::WillDelayInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::WillDelayInterval(interval))
            }
            PropertyType::PayloadFormatIndicator => {
                let on = BoolData::decode(ba)?;
                Ok(Self::PayloadFormatIndicator(on))
            }
            PropertyType::MessageExpiryInterval => {
                let interval = U32Data::decode(ba)?;
                Ok(Self::MessageExpiryInterval(interval))
            }
            PropertyType::ContentType => {
                let content_type = StringData::decode(ba)?;
                Ok(Self::ContentType(content_type))
            }
            PropertyType::ResponseTopic => {
                let topic = PubTopic::decode(ba)?;
                Ok(Self::ResponseTopic(topic))
            }
            PropertyType::CorrelationData => {
                let data = BinaryData::decode(ba)?;
                Ok(Self::CorrelationData(data))
            }
            PropertyType::MaximumQoS => {
                let qos = QoS::decode(ba)?;
                if qos == QoS::ExactOnce {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::RetainAvailable(available))
            }
            PropertyType::AssignedClientIdentifier => {
                let client_id = StringData::decode(ba)?;
                Ok(Self::AssignedClientIdentifier(client_id))
            }
            PropertyType::WildcardSubscriptionAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::WildcardSubscriptionAvailable(available))
            }
            PropertyType::SubscriptionIdentifierAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::SubscriptionIdentifierAvailable(available))
            }
            PropertyType::SharedSubscriptionAvailable => {
                let available = BoolData::decode(ba)?;
                Ok(Self::SharedSubscriptionAvailable(available))
            }
            PropertyType::ServerKeepAlive => {
                let keep_alive = U16Data::decode(ba)?;
                Ok(Self::ServerKeepAlive(keep_alive))
            }
            PropertyType::ResponseInformation => {
                let info = StringData::decode(ba)?;
                Ok(Self::ResponseInformation(info))
            }
            PropertyType::ServerReference => {
                let reference = StringData::decode(ba)?;
                Ok(Self::ServerReference(reference))
            }
            PropertyType::ReasonString => {
                let reason = StringData::decode(ba)?;
                Ok(Self::ReasonString(reason))
            }
            PropertyType::TopicAlias => {
                let alias = U16Data::decode(ba)?;
                // A Topic Alias of 0 is not permitted [MQTT-3.3.2-8].
                if alias.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::TopicAlias(alias))
            }
            PropertyType::TopicAliasMaximum => {
                let max = U16Data::decode(ba)?;
                Ok(Self::TopicAliasMaximum(max))
            }
            PropertyType::SubscriptionIdentifier => {
                let id = VarInt::decode(ba)?;
                if id.value() == 0 {
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(id))
            }
        }
    }
}

impl EncodePacket for Property {
    #[allow(clippy::match_same_arms)]
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let property_type_byte = self.property_type() as u8;
        buf.push(property_type_byte);
        let value_bytes = match self {
            Self::AssignedClientIdentifier(client_id) => client_id.encode(buf)?,
            Self::AuthenticationData(data) => data.encode(buf)?,
            Self::AuthenticationMethod(method) => method.encode(buf)?,
            Self::ContentType(content_type) => content_type.encode(buf)?,
            Self::CorrelationData(data) => data.encode(buf)?,
            Self::MaximumPacketSize(max) => max.encode(buf)?,
            Self::MaximumQoS(qos) => qos.encode(buf)?,
            Self::MessageExpiryInterval(interval) => interval.encode(buf)?,
            Self::PayloadFormatIndicator(on) => on.encode(buf)?,
            Self::ReasonString(reason) => reason.encode(buf)?,
            Self::ReceiveMaximum(max) => max.encode(buf)?,
            Self::RequestProblemInformation(on) => on.encode(buf)?,
            Self::RequestResponseInformation(on) => on.encode(buf)?,
            Self::ResponseInformation(info) => info.encode(buf)?,
            Self::ResponseTopic(topic) => topic.encode(buf)?,
            Self::RetainAvailable(available) => available.encode(buf)?,
            Self::ServerKeepAlive(keep_alive) => keep_alive.encode(buf)?,
            Self::ServerReference(reference) => reference.encode(buf)?,
            Self::SessionExpiryInterval(interval) => interval.encode(buf)?,
            Self::SharedSubscriptionAvailable(available) => available.encode(buf)?,
            Self::SubscriptionIdentifier(id) => id.encode(buf)?,
            Self::SubscriptionIdentifierAvailable(available) => available.encode(buf)?,
            Self::TopicAlias(alias) => alias.encode(buf)?,
            Self::TopicAliasMaximum(value) => value.encode(buf)?,
            Self::UserProperty(pair) => pair.encode(buf)?,
            Self::WildcardSubscriptionAvailable(available) => available.encode(buf)?,
            Self::WillDelayInterval(interval) => interval.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// An ordered list of properties, prefixed on the wire with a Variable Byte
/// Integer byte length.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl AsRef<[Property]> for Properties {
    fn as_ref(&self) -> &[Property] {
        self.0.as_ref()
    }
}

impl Properties {
    /// Create a new empty property list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte length of all property pairs, without the length prefix.
    #[must_use]
    fn data_bytes(&self) -> usize {
        self.0.iter().map(Property::bytes).sum()
    }

    /// Get byte length of property list in packet, including the length prefix.
    ///
    /// # Panics
    ///
    /// Raise panic if bytes of properties is larger than the Variable Byte
    /// Integer maximum.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let data_bytes = self.data_bytes();
        let len = VarInt::from(data_bytes).unwrap();
        len.bytes() + data_bytes
    }

    /// Get number of properties in list.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether property list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a reference to property list.
    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    /// Clear property list.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Push a property to the back of the list.
    ///
    /// # Errors
    ///
    /// Returns error if list would exceed the Variable Byte Integer maximum.
    pub fn push(&mut self, v: Property) -> Result<(), EncodeError> {
        let new_bytes = self.data_bytes() + v.bytes();
        let _ = VarInt::from(new_bytes)?;
        self.0.push(v);
        Ok(())
    }

    /// Find the first property of `property_type` in list.
    #[must_use]
    pub fn find(&self, property_type: PropertyType) -> Option<&Property> {
        self.0.iter().find(|p| p.property_type() == property_type)
    }

    /// Get value of the Topic Alias property, if present.
    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        match self.find(PropertyType::TopicAlias) {
            Some(Property::TopicAlias(alias)) => Some(alias.value()),
            _ => None,
        }
    }

    /// Get value of the Server Keep Alive property, if present.
    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        match self.find(PropertyType::ServerKeepAlive) {
            Some(Property::ServerKeepAlive(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Assigned Client Identifier property, if present.
    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        match self.find(PropertyType::AssignedClientIdentifier) {
            Some(Property::AssignedClientIdentifier(value)) => Some(value.as_ref()),
            _ => None,
        }
    }

    /// Get value of the Receive Maximum property, if present.
    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::ReceiveMaximum) {
            Some(Property::ReceiveMaximum(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Maximum QoS property, if present.
    #[must_use]
    pub fn maximum_qos(&self) -> Option<QoS> {
        match self.find(PropertyType::MaximumQoS) {
            Some(Property::MaximumQoS(value)) => Some(*value),
            _ => None,
        }
    }

    /// Get value of the Retain Available property, if present.
    #[must_use]
    pub fn retain_available(&self) -> Option<bool> {
        match self.find(PropertyType::RetainAvailable) {
            Some(Property::RetainAvailable(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Maximum Packet Size property, if present.
    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        match self.find(PropertyType::MaximumPacketSize) {
            Some(Property::MaximumPacketSize(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Topic Alias Maximum property, if present.
    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        match self.find(PropertyType::TopicAliasMaximum) {
            Some(Property::TopicAliasMaximum(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Wildcard Subscription Available property, if present.
    #[must_use]
    pub fn wildcard_subscription_available(&self) -> Option<bool> {
        match self.find(PropertyType::WildcardSubscriptionAvailable) {
            Some(Property::WildcardSubscriptionAvailable(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Subscription Identifier Available property, if present.
    #[must_use]
    pub fn subscription_identifier_available(&self) -> Option<bool> {
        match self.find(PropertyType::SubscriptionIdentifierAvailable) {
            Some(Property::SubscriptionIdentifierAvailable(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Shared Subscription Available property, if present.
    #[must_use]
    pub fn shared_subscription_available(&self) -> Option<bool> {
        match self.find(PropertyType::SharedSubscriptionAvailable) {
            Some(Property::SharedSubscriptionAvailable(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Session Expiry Interval property, if present.
    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        match self.find(PropertyType::SessionExpiryInterval) {
            Some(Property::SessionExpiryInterval(value)) => Some(value.value()),
            _ => None,
        }
    }

    /// Get value of the Authentication Method property, if present.
    #[must_use]
    pub fn authentication_method(&self) -> Option<&str> {
        match self.find(PropertyType::AuthenticationMethod) {
            Some(Property::AuthenticationMethod(value)) => Some(value.as_ref()),
            _ => None,
        }
    }

    /// Get value of the Authentication Data property, if present.
    #[must_use]
    pub fn authentication_data(&self) -> Option<&[u8]> {
        match self.find(PropertyType::AuthenticationData) {
            Some(Property::AuthenticationData(value)) => Some(value.as_ref()),
            _ => None,
        }
    }

    /// Get all Subscription Identifier values in list.
    #[must_use]
    pub fn subscription_identifiers(&self) -> Vec<usize> {
        self.0
            .iter()
            .filter_map(|p| match p {
                Property::SubscriptionIdentifier(id) => Some(id.value()),
                _ => None,
            })
            .collect()
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let data_bytes = VarInt::decode(ba)?;
        let end_offset = ba.offset() + data_bytes.value();
        let mut properties = Vec::new();
        while ba.offset() < end_offset {
            let property = Property::decode(ba)?;
            properties.push(property);
        }
        // A property must not run over the declared property length.
        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidProperties);
        }

        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let data_bytes = self.data_bytes();
        let len = VarInt::from(data_bytes)?;
        let mut bytes_written = len.bytes();
        len.encode(buf)?;
        for property in &self.0 {
            bytes_written += property.encode(buf)?;
        }

        Ok(bytes_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_round_trip() {
        let mut properties = Properties::new();
        properties
            .push(Property::SessionExpiryInterval(U32Data::new(30)))
            .unwrap();
        properties
            .push(Property::UserProperty(
                StringPairData::new("region", "cn-east").unwrap(),
            ))
            .unwrap();
        properties
            .push(Property::UserProperty(
                StringPairData::new("region", "cn-west").unwrap(),
            ))
            .unwrap();

        let mut buf = Vec::new();
        let written = properties.encode(&mut buf).unwrap();
        assert_eq!(written, properties.bytes());

        let mut ba = ByteArray::new(&buf);
        let parsed = Properties::decode(&mut ba).unwrap();
        assert_eq!(parsed, properties);
    }

    #[test]
    fn test_session_expiry_layout() {
        let mut properties = Properties::new();
        properties
            .push(Property::SessionExpiryInterval(U32Data::new(30)))
            .unwrap();
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x05, 0x11, 0x00, 0x00, 0x00, 0x1e]);
    }

    #[test]
    fn test_duplicate_property_rejected() {
        let mut properties = Properties::new();
        properties
            .push(Property::ReceiveMaximum(U16Data::new(10)))
            .unwrap();
        properties
            .push(Property::ReceiveMaximum(U16Data::new(20)))
            .unwrap();
        assert_eq!(
            check_property_type_list(properties.props(), &[PropertyType::ReceiveMaximum]),
            Err(PropertyType::ReceiveMaximum)
        );
    }

    #[test]
    fn test_disallowed_property_rejected() {
        let mut properties = Properties::new();
        properties
            .push(Property::TopicAlias(U16Data::new(3)))
            .unwrap();
        assert_eq!(
            check_property_type_list(properties.props(), &[PropertyType::ReasonString]),
            Err(PropertyType::TopicAlias)
        );
    }

    #[test]
    fn test_zero_topic_alias_rejected() {
        let buf = [0x03, 0x23, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyValue)
        );
    }
}
