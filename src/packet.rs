//! Wire-format definitions for ARQ segments.
//!
//! Every datagram exchanged between sender and receiver is a [`Segment`].
//! This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning
//!   [`SegmentError`] for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! | Header Length |     Flags     |          Data Length          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Reserved (must be zero)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.  The header-length byte
//! doubles as a protocol version marker.

use thiserror::Error;

use crate::config::Mode;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Stop-and-wait (0) or sliding-window (1).
    pub const MODE: u8 = 0b0000_0001;
    /// Acknowledgment (1) or data (0).
    pub const ACK: u8 = 0b0000_0010;
    /// Last data segment of the stream.
    pub const FIN: u8 = 0b0000_0100;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Largest datagram either side will send or expect to receive.
pub const DATAGRAM_CAPACITY: usize = 1500;

/// Largest payload carried by one data segment.
pub const MAX_PAYLOAD: usize = DATAGRAM_CAPACITY - HEADER_LEN;

// Byte offsets of each field within the serialised header.
const OFF_HEADER_LEN: usize = 0;
const OFF_FLAGS: usize = 1;
const OFF_DATA_LEN: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_RESERVED: usize = 8;

/// A complete protocol datagram: header fields + payload bytes.
///
/// `dataLength` is not stored; it is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub mode: Mode,
    pub is_ack: bool,
    pub is_fin: bool,
    pub seq: u32,
    pub payload: Vec<u8>,
}

impl Segment {
    /// A data segment carrying `payload`.
    pub fn data(mode: Mode, seq: u32, payload: Vec<u8>, is_fin: bool) -> Self {
        Self {
            mode,
            is_ack: false,
            is_fin,
            seq,
            payload,
        }
    }

    /// A pure acknowledgment for `seq`.  `is_fin` echoes the FIN flag of the
    /// acknowledged segment.
    pub fn ack(mode: Mode, seq: u32, is_fin: bool) -> Self {
        Self {
            mode,
            is_ack: true,
            is_fin,
            seq,
            payload: Vec::new(),
        }
    }

    pub fn data_len(&self) -> usize {
        self.payload.len()
    }

    fn flags(&self) -> u8 {
        let mut f = self.mode.bit();
        if self.is_ack {
            f |= flags::ACK;
        }
        if self.is_fin {
            f |= flags::FIN;
        }
        f
    }

    /// Number of bytes [`encode`](Self::encode) will produce.
    pub fn encoded_len(&self) -> usize {
        // Payload is ignored on acknowledgments.
        if self.is_ack {
            HEADER_LEN
        } else {
            HEADER_LEN + self.payload.len()
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    pub fn encode(&self) -> Result<Vec<u8>, SegmentError> {
        let mut buf = vec![0u8; self.encoded_len()];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// Serialise into `buf`, returning the number of bytes written.
    ///
    /// `buf` must hold at least [`encoded_len`](Self::encoded_len) bytes.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, SegmentError> {
        if !self.is_ack && self.payload.len() > MAX_PAYLOAD {
            return Err(SegmentError::PayloadTooLarge(self.payload.len()));
        }
        let total = self.encoded_len();
        if buf.len() < total {
            return Err(SegmentError::BufferTooSmall {
                needed: total,
                available: buf.len(),
            });
        }
        let data_len = (total - HEADER_LEN) as u16;

        buf[OFF_HEADER_LEN] = HEADER_LEN as u8;
        buf[OFF_FLAGS] = self.flags();
        buf[OFF_DATA_LEN..OFF_DATA_LEN + 2].copy_from_slice(&data_len.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_RESERVED..HEADER_LEN].fill(0);
        buf[HEADER_LEN..total].copy_from_slice(&self.payload[..total - HEADER_LEN]);

        Ok(total)
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the header-length byte is not [`HEADER_LEN`],
    /// - the reserved bytes are not zero, or
    /// - `dataLength` exceeds the bytes that follow the header.
    ///
    /// Trailing bytes past the declared payload are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::TooShort(buf.len()));
        }
        if buf[OFF_HEADER_LEN] as usize != HEADER_LEN {
            return Err(SegmentError::HeaderLength(buf[OFF_HEADER_LEN]));
        }
        if buf[OFF_RESERVED..HEADER_LEN].iter().any(|&b| b != 0) {
            return Err(SegmentError::ReservedNonZero);
        }

        let flag_bits = buf[OFF_FLAGS];
        let data_len = u16::from_be_bytes([buf[OFF_DATA_LEN], buf[OFF_DATA_LEN + 1]]) as usize;
        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);

        let available = buf.len() - HEADER_LEN;
        if data_len > available {
            return Err(SegmentError::Truncated {
                declared: data_len,
                available,
            });
        }

        let is_ack = flag_bits & flags::ACK != 0;
        let payload = if is_ack {
            Vec::new()
        } else {
            buf[HEADER_LEN..HEADER_LEN + data_len].to_vec()
        };

        Ok(Segment {
            mode: Mode::from_bit(flag_bits & flags::MODE),
            is_ack,
            is_fin: flag_bits & flags::FIN != 0,
            seq,
            payload,
        })
    }
}

/// Reasons a datagram is rejected as a malformed segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("datagram of {0} bytes is shorter than the header")]
    TooShort(usize),
    #[error("unsupported header length {0}")]
    HeaderLength(u8),
    #[error("reserved header bytes are not zero")]
    ReservedNonZero,
    #[error("data length {declared} exceeds the {available} bytes present")]
    Truncated { declared: usize, available: usize },
    #[error("payload of {0} bytes exceeds the datagram capacity")]
    PayloadTooLarge(usize),
    #[error("output buffer holds {available} bytes, segment needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(seq: u32, payload: &[u8], fin: bool) -> Segment {
        Segment::data(Mode::SlidingWindow, seq, payload.to_vec(), fin)
    }

    #[test]
    fn encode_decode_roundtrip() {
        let seg = data(42, b"hello", false);
        let decoded = Segment::decode(&seg.encode().unwrap()).unwrap();
        assert_eq!(decoded, seg);
    }

    #[test]
    fn header_layout_on_wire() {
        let bytes = data(0x0102_0304, b"abc", true).encode().unwrap();
        assert_eq!(bytes[OFF_HEADER_LEN], 12);
        assert_eq!(bytes[OFF_FLAGS], flags::MODE | flags::FIN);
        assert_eq!(&bytes[OFF_DATA_LEN..OFF_DATA_LEN + 2], &[0x00, 0x03]);
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_RESERVED..HEADER_LEN], &[0, 0, 0, 0]);
        assert_eq!(&bytes[HEADER_LEN..], b"abc");
    }

    #[test]
    fn ack_has_no_payload_and_echoes_fin() {
        let ack = Segment::ack(Mode::StopAndWait, 7, true);
        let bytes = ack.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[OFF_FLAGS], flags::ACK | flags::FIN);
        let decoded = Segment::decode(&bytes).unwrap();
        assert!(decoded.is_ack);
        assert!(decoded.is_fin);
        assert_eq!(decoded.seq, 7);
        assert_eq!(decoded.mode, Mode::StopAndWait);
    }

    #[test]
    fn decode_short_header_returns_error() {
        assert_eq!(Segment::decode(&[]), Err(SegmentError::TooShort(0)));
        assert_eq!(
            Segment::decode(&[12u8; HEADER_LEN - 1]),
            Err(SegmentError::TooShort(HEADER_LEN - 1))
        );
    }

    #[test]
    fn decode_truncated_payload_returns_error() {
        let mut bytes = data(0, b"data", false).encode().unwrap();
        bytes.pop();
        assert_eq!(
            Segment::decode(&bytes),
            Err(SegmentError::Truncated {
                declared: 4,
                available: 3
            })
        );
    }

    #[test]
    fn decode_rejects_nonzero_reserved() {
        let mut bytes = data(1, b"x", false).encode().unwrap();
        bytes[OFF_RESERVED + 2] = 0xff;
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::ReservedNonZero));
    }

    #[test]
    fn decode_rejects_other_header_length() {
        let mut bytes = data(1, b"x", false).encode().unwrap();
        bytes[OFF_HEADER_LEN] = 6;
        assert_eq!(Segment::decode(&bytes), Err(SegmentError::HeaderLength(6)));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = data(9, b"xy", false).encode().unwrap();
        bytes.extend_from_slice(&[0xaa; 16]);
        let decoded = Segment::decode(&bytes).unwrap();
        assert_eq!(decoded.payload, b"xy");
    }

    #[test]
    fn empty_fin_segment() {
        let seg = data(3, b"", true);
        let bytes = seg.encode().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        let decoded = Segment::decode(&bytes).unwrap();
        assert!(decoded.is_fin);
        assert!(!decoded.is_ack);
        assert_eq!(decoded.data_len(), 0);
    }

    #[test]
    fn full_payload_fits_datagram() {
        let seg = data(0, &[7u8; MAX_PAYLOAD], false);
        assert_eq!(seg.encode().unwrap().len(), DATAGRAM_CAPACITY);
    }

    #[test]
    fn oversized_payload_rejected() {
        let seg = data(0, &[0u8; MAX_PAYLOAD + 1], false);
        assert_eq!(
            seg.encode(),
            Err(SegmentError::PayloadTooLarge(MAX_PAYLOAD + 1))
        );
    }

    #[test]
    fn encode_into_small_buffer_fails() {
        let seg = data(0, b"hello", false);
        let mut buf = [0u8; HEADER_LEN];
        assert_eq!(
            seg.encode_into(&mut buf),
            Err(SegmentError::BufferTooSmall {
                needed: HEADER_LEN + 5,
                available: HEADER_LEN
            })
        );
    }
}
