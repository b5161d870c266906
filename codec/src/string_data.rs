// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;

use crate::utils::{validate_utf8_string, StringError};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Text fields within the MQTT Control Packets are encoded as UTF-8 strings.
///
/// String Data is represented by a Two Byte Integer length which indicates
/// the number of data bytes, followed by characters. Thus, the length of
/// String Data is limited to the range of 0 to 65,535 Bytes.
///
/// ```text
/// +-------------------+
/// | String Length     |
/// |                   |
/// +-------------------+
/// | String            |
/// |                   |
/// +-------------------+
/// ```
///
/// The character data MUST NOT include encodings of code points between
/// U+D800 and U+DFFF [MQTT-1.5.4-1], and MUST NOT include an encoding of
/// the null character U+0000 [MQTT-1.5.4-2]. If a receiver receives an MQTT
/// Control Packet containing such data it is a Malformed Packet.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StringData(String);

impl StringData {
    /// Create an empty string data.
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Convert string slice into string data.
    ///
    /// # Errors
    ///
    /// Returns error if string slice contains invalid characters or is too large.
    pub fn from(s: &str) -> Result<Self, StringError> {
        validate_utf8_string(s)?;
        Ok(Self(s.to_string()))
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if string data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clear string.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for StringData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StringData {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for StringData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        Ok(Self(s))
    }
}

impl EncodePacket for StringData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_data_round_trip() {
        let s = StringData::from("sport/tennis").unwrap();
        let mut buf = Vec::new();
        let written = s.encode(&mut buf).unwrap();
        assert_eq!(written, 14);
        assert_eq!(&buf[..2], &[0x00, 0x0c]);

        let mut ba = ByteArray::new(&buf);
        let parsed = StringData::decode(&mut ba).unwrap();
        assert_eq!(parsed, s);
    }

    #[test]
    fn test_string_data_rejects_null() {
        let buf = [0x00, 0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert!(StringData::decode(&mut ba).is_err());
    }
}
