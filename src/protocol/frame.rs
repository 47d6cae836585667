//! WebSocket frame layout: header fields, length encodings, and masking.
//!
//! Layout per RFC 6455 §5.2:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! ```

use bytes::{BufMut, BytesMut};

/// Marker value for a 16 bit extended payload length.
pub const PAYLOAD_LEN_16: u8 = 126;

/// Marker value for a 64 bit extended payload length.
pub const PAYLOAD_LEN_64: u8 = 127;

/// WebSocket operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame.
    Continuation = 0x00,
    /// Text frame.
    Text = 0x01,
    /// Binary frame.
    Binary = 0x02,
    /// Close frame.
    Close = 0x08,
    /// Ping frame.
    Ping = 0x09,
    /// Pong frame.
    Pong = 0x0a,
}

impl Opcode {
    /// Create an opcode from its wire value. Returns `None` for the
    /// reserved opcodes, which fail the connection when dispatched.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Continuation),
            0x01 => Some(Self::Text),
            0x02 => Some(Self::Binary),
            0x08 => Some(Self::Close),
            0x09 => Some(Self::Ping),
            0x0a => Some(Self::Pong),
            _ => None,
        }
    }

    /// Check if this is a control opcode.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// The fields packed into the first two bytes of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStart {
    /// FIN bit: final fragment in a message.
    pub fin: bool,
    /// RSV1-3. Must be zero; no extensions are negotiated.
    pub reserved: u8,
    /// Raw opcode nibble, kept unvalidated until dispatch.
    pub opcode: u8,
    /// MASK bit. All client frames must have it set.
    pub masked: bool,
    /// 7 bit payload length field; 126 and 127 select extended lengths.
    pub len7: u8,
}

impl FrameStart {
    /// Split the first two header bytes into their fields.
    pub fn parse(bytes: [u8; 2]) -> Self {
        Self {
            fin: (bytes[0] >> 7) & 0x01 != 0,
            reserved: (bytes[0] >> 4) & 0x07,
            opcode: bytes[0] & 0x0f,
            masked: (bytes[1] >> 7) & 0x01 != 0,
            len7: bytes[1] & 0x7f,
        }
    }
}

/// Unmask (or mask) a payload in place.
///
/// Each 4 byte chunk is XORed with the masking key in the byte order the
/// key arrived in; the final chunk may be shorter and uses the matching
/// prefix of the key.
pub fn apply_mask(key: [u8; 4], payload: &mut [u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a complete server-to-client frame into `out`.
///
/// Server frames always carry FIN (this server never fragments outgoing
/// messages) and are never masked. The payload length uses the minimal
/// encoding: 7 bit up to 125, 16 bit up to 65535, 64 bit beyond.
pub fn encode_frame(opcode: Opcode, payload: &[u8], out: &mut BytesMut) {
    let len = payload.len();
    out.reserve(10 + len);
    out.put_u8(0x80 | opcode as u8);
    if len <= 125 {
        out.put_u8(len as u8);
    } else if len <= u16::MAX as usize {
        out.put_u8(PAYLOAD_LEN_16);
        out.put_u16(len as u16);
    } else {
        out.put_u8(PAYLOAD_LEN_64);
        out.put_u64(len as u64);
    }
    out.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_from_u8() {
        assert_eq!(Opcode::from_u8(0x00), Some(Opcode::Continuation));
        assert_eq!(Opcode::from_u8(0x01), Some(Opcode::Text));
        assert_eq!(Opcode::from_u8(0x02), Some(Opcode::Binary));
        assert_eq!(Opcode::from_u8(0x08), Some(Opcode::Close));
        assert_eq!(Opcode::from_u8(0x09), Some(Opcode::Ping));
        assert_eq!(Opcode::from_u8(0x0a), Some(Opcode::Pong));
        assert_eq!(Opcode::from_u8(0x03), None);
        assert_eq!(Opcode::from_u8(0x0f), None);
    }

    #[test]
    fn test_opcode_is_control() {
        assert!(Opcode::Close.is_control());
        assert!(Opcode::Ping.is_control());
        assert!(Opcode::Pong.is_control());
        assert!(!Opcode::Text.is_control());
        assert!(!Opcode::Binary.is_control());
        assert!(!Opcode::Continuation.is_control());
    }

    #[test]
    fn test_parse_frame_start() {
        // FIN + text, masked, length 5.
        let start = FrameStart::parse([0x81, 0x85]);
        assert!(start.fin);
        assert_eq!(start.reserved, 0);
        assert_eq!(start.opcode, 0x01);
        assert!(start.masked);
        assert_eq!(start.len7, 5);
    }

    #[test]
    fn test_parse_frame_start_reserved_bits() {
        let start = FrameStart::parse([0xf1, 0x00]);
        assert_eq!(start.reserved, 0x07);
        assert!(!start.masked);
        assert_eq!(start.len7, 0);
    }

    #[test]
    fn test_parse_frame_start_extended_markers() {
        assert_eq!(FrameStart::parse([0x82, 0xfe]).len7, PAYLOAD_LEN_16);
        assert_eq!(FrameStart::parse([0x82, 0xff]).len7, PAYLOAD_LEN_64);
    }

    #[test]
    fn test_apply_mask_rfc_vector() {
        // Masked "Hello" from RFC 6455 §5.7.
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut payload = [0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(key, &mut payload);
        assert_eq!(&payload, b"Hello");
    }

    #[test]
    fn test_apply_mask_partial_tail() {
        // Lengths that are not a multiple of 4 use the key prefix.
        let key = [0x01, 0x02, 0x03, 0x04];
        for len in 1..=7 {
            let mut payload = vec![0u8; len];
            apply_mask(key, &mut payload);
            for (i, byte) in payload.iter().enumerate() {
                assert_eq!(*byte, key[i % 4]);
            }
        }
    }

    #[test]
    fn test_apply_mask_roundtrip() {
        let key = [0xde, 0xad, 0xbe, 0xef];
        let original: Vec<u8> = (0..=255).collect();
        let mut payload = original.clone();
        apply_mask(key, &mut payload);
        apply_mask(key, &mut payload);
        assert_eq!(payload, original);
    }

    #[test]
    fn test_encode_small_frame() {
        let mut out = BytesMut::new();
        encode_frame(Opcode::Text, b"Hello", &mut out);
        assert_eq!(&out[..], &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_encode_empty_frame() {
        let mut out = BytesMut::new();
        encode_frame(Opcode::Pong, b"", &mut out);
        assert_eq!(&out[..], &[0x8a, 0x00]);
    }

    #[test]
    fn test_encode_length_boundaries() {
        // 125 stays in the 7 bit field.
        let mut out = BytesMut::new();
        encode_frame(Opcode::Binary, &vec![0u8; 125], &mut out);
        assert_eq!(out[1], 125);
        assert_eq!(out.len(), 2 + 125);

        // 126 switches to the 16 bit length.
        let mut out = BytesMut::new();
        encode_frame(Opcode::Binary, &vec![0u8; 126], &mut out);
        assert_eq!(out[1], PAYLOAD_LEN_16);
        assert_eq!(&out[2..4], &126u16.to_be_bytes());
        assert_eq!(out.len(), 4 + 126);

        // 65535 is the largest 16 bit length.
        let mut out = BytesMut::new();
        encode_frame(Opcode::Binary, &vec![0u8; 65535], &mut out);
        assert_eq!(out[1], PAYLOAD_LEN_16);
        assert_eq!(&out[2..4], &65535u16.to_be_bytes());

        // 65536 switches to the 64 bit length.
        let mut out = BytesMut::new();
        encode_frame(Opcode::Binary, &vec![0u8; 65536], &mut out);
        assert_eq!(out[1], PAYLOAD_LEN_64);
        assert_eq!(&out[2..10], &65536u64.to_be_bytes());
        assert_eq!(out.len(), 10 + 65536);
    }

    #[test]
    fn test_outgoing_frames_never_masked() {
        let mut out = BytesMut::new();
        encode_frame(Opcode::Text, b"payload", &mut out);
        assert_eq!(out[1] & 0x80, 0, "mask bit must not be set");
    }
}
