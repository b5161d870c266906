// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use byteorder::{BigEndian, WriteBytesExt};

use crate::{ByteArray, DecodeError, EncodeError};

/// Parse value from byte stream.
pub trait DecodePacket: Sized {
    /// # Errors
    ///
    /// Returns error if byte stream is malformed.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Serialize value into byte stream.
pub trait EncodePacket {
    /// Returns number of bytes written on success.
    ///
    /// # Errors
    ///
    /// Returns error if value contains invalid data.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Protocol versions supported by this codec.
///
/// The version is negotiated once in the CONNECT handshake and fixed for
/// the life of the connection.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V311 = 4,
    V5 = 5,
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::V311
    }
}

impl TryFrom<u8> for ProtocolVersion {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

impl ProtocolVersion {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Returns true for MQTT 5.0.
    #[must_use]
    pub const fn is_v5(self) -> bool {
        matches!(self, Self::V5)
    }
}

impl EncodePacket for ProtocolVersion {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

/// Quality of service level of publish messages.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QoS {
    /// At most once delivery.
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl Default for QoS {
    fn default() -> Self {
        Self::AtMostOnce
    }
}

impl QoS {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<QoS, Self::Error> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

impl DecodePacket for QoS {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        Self::try_from(byte)
    }
}

impl EncodePacket for QoS {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

/// Packet identifier of PUBLISH (QoS > 0), SUBSCRIBE, UNSUBSCRIBE packets
/// and their acknowledgements.
///
/// Packet id 0 is never sent on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketId(u16);

impl PacketId {
    /// Create a new packet id.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get inner u16 value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        2
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)?;
        Ok(Self::bytes())
    }
}
