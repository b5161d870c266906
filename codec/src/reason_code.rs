// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// A Reason Code is a one byte unsigned value that indicates the result of
/// an operation.
///
/// Reason Codes less than 0x80 indicate successful completion of an operation.
/// The normal Reason Code for success is 0. Reason Code values of 0x80 or
/// greater indicate failure.
///
/// The CONNACK, PUBACK, PUBREC, PUBREL, PUBCOMP, DISCONNECT and AUTH Control
/// Packets have a single Reason Code as part of the Variable Header. The SUBACK
/// and UNSUBACK packets contain a list of one or more Reason Codes in the Payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    /// Used in CONNACK, PUBACK, PUBREC, PUBREL, PUBCOMP, UNSUBACK, AUTH.
    ///
    /// Also stands for `Normal disconnection` in DISCONNECT and
    /// `Granted QoS 0` in SUBACK.
    Success = 0x00,

    /// Used in SUBACK.
    GrantedQoS1 = 0x01,

    /// Used in SUBACK.
    GrantedQoS2 = 0x02,

    /// The Client wishes to disconnect but requires that the Server also
    /// publishes its Will Message. Used in DISCONNECT.
    DisconnectWithWillMessage = 0x04,

    /// The message is accepted but there are no subscribers. Used in PUBACK, PUBREC.
    NoMatchingSubscribers = 0x10,

    /// No matching Topic Filter is being used by the Client. Used in UNSUBACK.
    NoSubscriptionExisted = 0x11,

    /// Continue the authentication with another step. Used in AUTH.
    ContinueAuthentication = 0x18,

    /// Initiate a re-authentication. Used in AUTH.
    ReAuthenticate = 0x19,

    /// The Server does not wish to reveal the reason for the failure,
    /// or none of the other Reason Codes apply.
    UnspecifiedError = 0x80,

    /// Data within the packet could not be correctly parsed.
    MalformedPacket = 0x81,

    /// Data in the packet does not conform to this specification.
    ProtocolError = 0x82,

    /// The packet is valid but is not accepted by this receiver.
    ImplementationSpecificError = 0x83,

    /// The Server does not support the version of the MQTT protocol
    /// requested by the Client. Used in CONNACK.
    UnsupportedProtocolVersion = 0x84,

    /// The Client Identifier is a valid string but is not allowed by the
    /// Server. Used in CONNACK.
    ClientIdentifierNotValid = 0x85,

    /// The Server does not accept the User Name or Password specified by
    /// the Client. Used in CONNACK.
    BadUserNameOrPassword = 0x86,

    /// The request is not authorized.
    NotAuthorized = 0x87,

    /// The MQTT Server is not available. Used in CONNACK.
    ServerUnavailable = 0x88,

    /// The Server is busy and cannot continue processing this request.
    ServerBusy = 0x89,

    /// This Client has been banned by administrative action. Used in CONNACK.
    Banned = 0x8a,

    /// The Server is shutting down. Used in DISCONNECT.
    ServerShuttingDown = 0x8b,

    /// The authentication method is not supported or does not match the
    /// one currently in use. Used in CONNACK, DISCONNECT.
    BadAuthenticationMethod = 0x8c,

    /// The Connection is closed because no packet has been received for
    /// 1.5 times the Keepalive time. Used in DISCONNECT.
    KeepAliveTimeout = 0x8d,

    /// Another Connection using the same ClientID has connected causing
    /// this Connection to be closed. Used in DISCONNECT.
    SessionTakenOver = 0x8e,

    /// The Topic Filter is correctly formed, but is not accepted.
    TopicFilterInvalid = 0x8f,

    /// The Topic Name is correctly formed, but is not accepted.
    TopicNameInvalid = 0x90,

    /// The specified Packet Identifier is already in use.
    PacketIdentifierInUse = 0x91,

    /// The Packet Identifier is not known. Used in PUBREL, PUBCOMP.
    PacketIdentifierNotFound = 0x92,

    /// The Client or Server has received more than Receive Maximum
    /// publications for which it has not sent PUBACK or PUBCOMP.
    /// Used in DISCONNECT.
    ReceiveMaximumExceeded = 0x93,

    /// The Client or Server has received a PUBLISH packet containing a Topic
    /// Alias which is greater than the Maximum Topic Alias it advertised.
    /// Used in DISCONNECT.
    TopicAliasInvalid = 0x94,

    /// The packet exceeded the maximum permissible size. Used in CONNACK, DISCONNECT.
    PacketTooLarge = 0x95,

    /// The received data rate is too high. Used in DISCONNECT.
    MessageRateTooHigh = 0x96,

    /// An implementation or administrative imposed limit has been exceeded.
    QuotaExceeded = 0x97,

    /// The Connection is closed due to an administrative action.
    /// Used in DISCONNECT.
    AdministrativeAction = 0x98,

    /// The payload format does not match the specified Payload Format Indicator.
    PayloadFormatInvalid = 0x99,

    /// The Server does not support retained messages, and the retain flag
    /// was set. Used in CONNACK, DISCONNECT.
    RetainNotSupported = 0x9a,

    /// The Client specified a QoS greater than the QoS specified in a
    /// Maximum QoS in the CONNACK. Used in CONNACK, DISCONNECT.
    QoSNotSupported = 0x9b,

    /// The Client should temporarily use another server.
    /// Used in CONNACK, DISCONNECT.
    UseAnotherServer = 0x9c,

    /// The Client should permanently use another server.
    /// Used in CONNACK, DISCONNECT.
    ServerMoved = 0x9d,

    /// The Server does not support Shared Subscriptions.
    /// Used in SUBACK, DISCONNECT.
    SharedSubscriptionsNotSupported = 0x9e,

    /// The connection rate limit has been exceeded. Used in CONNACK, DISCONNECT.
    ConnectionRateExceeded = 0x9f,

    /// The maximum connection time authorized for this connection has been
    /// exceeded. Used in DISCONNECT.
    MaximumConnectTime = 0xa0,

    /// The Server does not support Subscription Identifiers; the subscription
    /// is not accepted. Used in SUBACK, DISCONNECT.
    SubscriptionIdentifiersNotSupported = 0xa1,

    /// The Server does not support Wildcard Subscriptions; the subscription
    /// is not accepted. Used in SUBACK, DISCONNECT.
    WildcardSubscriptionsNotSupported = 0xa2,
}

impl Default for ReasonCode {
    fn default() -> Self {
        Self::Success
    }
}

impl ReasonCode {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Reason codes 0x00-0x7f indicate success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        (self as u8) < 0x80
    }

    /// Reason codes 0x80 and above indicate failure.
    #[must_use]
    pub const fn is_error(self) -> bool {
        (self as u8) >= 0x80
    }
}

impl TryFrom<u8> for ReasonCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::GrantedQoS1),
            0x02 => Ok(Self::GrantedQoS2),
            0x04 => Ok(Self::DisconnectWithWillMessage),
            0x10 => Ok(Self::NoMatchingSubscribers),
            0x11 => Ok(Self::NoSubscriptionExisted),
            0x18 => Ok(Self::ContinueAuthentication),
            0x19 => Ok(Self::ReAuthenticate),
            0x80 => Ok(Self::UnspecifiedError),
            0x81 => Ok(Self::MalformedPacket),
            0x82 => Ok(Self::ProtocolError),
            0x83 => Ok(Self::ImplementationSpecificError),
            0x84 => Ok(Self::UnsupportedProtocolVersion),
            0x85 => Ok(Self::ClientIdentifierNotValid),
            0x86 => Ok(Self::BadUserNameOrPassword),
            0x87 => Ok(Self::NotAuthorized),
            0x88 => Ok(Self::ServerUnavailable),
            0x89 => Ok(Self::ServerBusy),
            0x8a => Ok(Self::Banned),
            0x8b => Ok(Self::ServerShuttingDown),
            0x8c => Ok(Self::BadAuthenticationMethod),
            0x8d => Ok(Self::KeepAliveTimeout),
            0x8e => Ok(Self::SessionTakenOver),
            0x8f => Ok(Self::TopicFilterInvalid),
            0x90 => Ok(Self::TopicNameInvalid),
            0x91 => Ok(Self::PacketIdentifierInUse),
            0x92 => Ok(Self::PacketIdentifierNotFound),
            0x93 => Ok(Self::ReceiveMaximumExceeded),
            0x94 => Ok(Self::TopicAliasInvalid),
            0x95 => Ok(Self::PacketTooLarge),
            0x96 => Ok(Self::MessageRateTooHigh),
            0x97 => Ok(Self::QuotaExceeded),
            0x98 => Ok(Self::AdministrativeAction),
            0x99 => Ok(Self::PayloadFormatInvalid),
            0x9a => Ok(Self::RetainNotSupported),
            0x9b => Ok(Self::QoSNotSupported),
            0x9c => Ok(Self::UseAnotherServer),
            0x9d => Ok(Self::ServerMoved),
            0x9e => Ok(Self::SharedSubscriptionsNotSupported),
            0x9f => Ok(Self::ConnectionRateExceeded),
            0xa0 => Ok(Self::MaximumConnectTime),
            0xa1 => Ok(Self::SubscriptionIdentifiersNotSupported),
            0xa2 => Ok(Self::WildcardSubscriptionsNotSupported),
            _ => Err(DecodeError::InvalidReasonCode),
        }
    }
}

impl DecodePacket for ReasonCode {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        Self::try_from(byte)
    }
}

impl EncodePacket for ReasonCode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_code_classification() {
        assert!(ReasonCode::Success.is_success());
        assert!(ReasonCode::GrantedQoS2.is_success());
        assert!(ReasonCode::ContinueAuthentication.is_success());
        assert!(ReasonCode::UnspecifiedError.is_error());
        assert!(ReasonCode::WildcardSubscriptionsNotSupported.is_error());
    }

    #[test]
    fn test_reason_code_round_trip() {
        let buf = [0x94];
        let mut ba = ByteArray::new(&buf);
        let code = ReasonCode::decode(&mut ba).unwrap();
        assert_eq!(code, ReasonCode::TopicAliasInvalid);

        let mut out = Vec::new();
        code.encode(&mut out).unwrap();
        assert_eq!(&out, &buf);
    }

    #[test]
    fn test_unknown_reason_code() {
        assert_eq!(ReasonCode::try_from(0x7f), Err(DecodeError::InvalidReasonCode));
    }
}
