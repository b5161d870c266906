// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate random string.
///
/// # Errors
///
/// Returns error if the sampled bytes are not valid UTF-8.
pub fn random_string(len: usize) -> Result<String, StringError> {
    String::from_utf8(
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .collect::<Vec<u8>>(),
    )
    .map_err(|_err| StringError::InvalidRandomString)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    TooManyData,

    InvalidLength,

    InvalidChar,

    /// Server or client shall DISCONNECT immediately.
    SeriousError,

    InvalidRandomString,
}

impl From<std::string::FromUtf8Error> for StringError {
    fn from(_e: std::string::FromUtf8Error) -> StringError {
        StringError::SeriousError
    }
}

/// Check data length exceeds 64k or not.
///
/// # Errors
///
/// Returns error if length of `data` is larger than 64KiB.
#[inline]
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > u16::MAX as usize {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

/// Check string characters and length.
///
/// The character data in a UTF-8 Encoded String MUST be well-formed UTF-8 as
/// defined by the Unicode specification and restated in RFC 3629. In particular,
/// the character data MUST NOT include encodings of code points between
/// U+D800 and U+DFFF [MQTT-1.5.4-1].
///
/// A UTF-8 Encoded String MUST NOT include an encoding of the null character
/// U+0000 [MQTT-1.5.4-2].
///
/// # Errors
///
/// Returns error if string contains invalid characters or is too long.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooManyData);
    }

    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::SeriousError);
        }

        // Rust chars cannot hold surrogate code points, so only control
        // characters and non-characters remain to be checked here.
        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }

        let cp = u32::from(c);
        if (0xfdd0..=0xfdef).contains(&cp) || (cp & 0xfffe) == 0xfffe {
            return Err(StringError::InvalidChar);
        }
    }

    // Empty string is valid.
    Ok(())
}

/// Convert range of bytes to valid UTF-8 string.
///
/// # Errors
///
/// Returns error if `buf` is not a valid UTF-8 string.
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(buf.to_vec())?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Check client id characters and length.
///
/// The Server MUST allow ClientIds which are between 1 and 23 UTF-8 encoded
/// bytes in length, and that contain only the characters
/// `0-9a-zA-Z` [MQTT-3.1.3-5]. A Server MAY allow more than that.
///
/// An empty client id is accepted here; the server then assigns one.
///
/// # Errors
///
/// Returns error if `client_id` contains characters outside of the
/// alphanumeric range.
pub fn validate_client_id(client_id: &str) -> Result<(), StringError> {
    validate_utf8_string(client_id)?;
    if !client_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(StringError::InvalidChar);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("sport/tennis").is_ok());
        assert!(validate_utf8_string("\u{0000}").is_err());
        assert!(validate_utf8_string("\u{0001}").is_err());
        assert!(validate_utf8_string("\u{fdd0}").is_err());
        assert!(validate_utf8_string("\u{ffff}").is_err());
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("luoClient01").is_ok());
        assert!(validate_client_id("bad id").is_err());
    }

    #[test]
    fn test_random_string() {
        let s = random_string(8).unwrap();
        assert_eq!(s.len(), 8);
    }
}
