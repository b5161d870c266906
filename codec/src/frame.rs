// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::{Buf, Bytes, BytesMut};

use crate::DecodeError;

/// Incremental framing state machine over a raw byte stream.
///
/// The reader consumes arbitrary chunks from the transport and yields one
/// complete control packet at a time: one fixed-header byte, 1-4 bytes of
/// remaining length, then exactly that many body bytes. Partial input is
/// retained until completed.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,

    /// Total number of bytes in a packet, including the fixed header, before
    /// the packet is rejected as too large.
    max_packet_size: usize,
}

impl FrameReader {
    /// Create a new frame reader with `max_packet_size` bytes per packet.
    #[must_use]
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_packet_size,
        }
    }

    /// Append bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Try to extract the next complete packet from the buffer.
    ///
    /// Returns `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns `PacketTooLarge` if the framed packet exceeds the configured
    /// maximum packet size, or `InvalidVarInt` if the remaining length field
    /// is malformed.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        // Fixed header byte plus at least one remaining-length byte.
        if self.buf.len() < 2 {
            return Ok(None);
        }

        let mut remaining_length: usize = 0;
        let mut multiplier: usize = 1;
        let mut header_len = 1;
        loop {
            if header_len >= self.buf.len() {
                // Length field not complete yet.
                return Ok(None);
            }
            if header_len > 4 {
                return Err(DecodeError::InvalidVarInt);
            }
            let byte = self.buf[header_len];
            header_len += 1;
            remaining_length += (byte as usize & 0x7f) * multiplier;
            multiplier *= 128;
            if byte & 0x80 == 0 {
                break;
            }
        }

        let total = header_len + remaining_length;
        if total > self.max_packet_size {
            return Err(DecodeError::PacketTooLarge);
        }
        if self.buf.len() < total {
            // Reserve room for the rest of the packet body.
            self.buf.reserve(total - self.buf.len());
            return Ok(None);
        }

        let frame = self.buf.copy_to_bytes(total);
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_reader_partial_input() {
        let mut reader = FrameReader::new(1024);
        // PUBLISH "t/a" payload "x", split at arbitrary points.
        let packet = [0x30, 0x06, 0x00, 0x03, b't', b'/', b'a', b'x'];

        reader.extend(&packet[..1]);
        assert_eq!(reader.next_frame().unwrap(), None);

        reader.extend(&packet[1..4]);
        assert_eq!(reader.next_frame().unwrap(), None);

        reader.extend(&packet[4..]);
        let frame = reader.next_frame().unwrap().unwrap();
        assert_eq!(frame.as_ref(), &packet);
        assert_eq!(reader.next_frame().unwrap(), None);
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_frame_reader_multiple_packets() {
        let mut reader = FrameReader::new(1024);
        let ping = [0xc0, 0x00];
        let pong = [0xd0, 0x00];
        reader.extend(&ping);
        reader.extend(&pong);

        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), &ping);
        assert_eq!(reader.next_frame().unwrap().unwrap().as_ref(), &pong);
        assert_eq!(reader.next_frame().unwrap(), None);
    }

    #[test]
    fn test_frame_reader_too_large() {
        let mut reader = FrameReader::new(16);
        // Remaining length of 200 bytes.
        reader.extend(&[0x30, 0xc8, 0x01]);
        assert_eq!(reader.next_frame(), Err(DecodeError::PacketTooLarge));
    }

    #[test]
    fn test_frame_reader_invalid_var_int() {
        let mut reader = FrameReader::new(1024);
        reader.extend(&[0x30, 0xff, 0xff, 0xff, 0xff, 0xff]);
        assert_eq!(reader.next_frame(), Err(DecodeError::InvalidVarInt));
    }
}
