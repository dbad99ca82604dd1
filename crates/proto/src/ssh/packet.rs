//! SSH binary packet framing (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac
//! ```
//!
//! # Constraints
//!
//! - `packet_length` excludes the MAC and the length field itself
//! - padding is at least 4 bytes and at most 255 bytes
//! - `packet_length + 4` must be a multiple of the cipher block size
//!   (minimum 8)
//! - payloads larger than 35000 bytes are rejected (RFC 4253 §6.1)

use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use rand::RngCore;

/// Maximum accepted packet size in bytes (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Minimum padding length in bytes.
pub const MIN_PADDING_LEN: usize = 4;

/// Maximum padding length in bytes (fits the single-byte field).
pub const MAX_PADDING_LEN: usize = 255;

/// Frames a payload into `packet_length || padding_length || payload ||
/// padding` (no MAC), padded for the given cipher block size.
///
/// Padding bytes are drawn from the thread RNG as RFC 4253 requires.
///
/// # Errors
///
/// Returns [`HawserError::Protocol`] if the payload cannot be framed
/// within the maximum packet size.
pub fn frame_payload(payload: &[u8], block_size: usize) -> HawserResult<Vec<u8>> {
    let align = block_size.max(8);

    // packet_length field (4) + padding_length field (1) + payload
    let unpadded = 5 + payload.len();
    let mut padding_len = MIN_PADDING_LEN;
    while (unpadded + padding_len) % align != 0 {
        padding_len += 1;
    }

    if padding_len > MAX_PADDING_LEN {
        return Err(HawserError::Protocol(format!(
            "Cannot pad payload of {} bytes to block size {}",
            payload.len(),
            align
        )));
    }

    let packet_length = 1 + payload.len() + padding_len;
    if packet_length > MAX_PACKET_SIZE {
        return Err(HawserError::Protocol(format!(
            "Packet too large to send: {} bytes (maximum {})",
            packet_length, MAX_PACKET_SIZE
        )));
    }

    let mut padding = vec![0u8; padding_len];
    rand::thread_rng().fill_bytes(&mut padding);

    let mut buf = BytesMut::with_capacity(4 + packet_length);
    buf.put_u32(packet_length as u32);
    buf.put_u8(padding_len as u8);
    buf.put_slice(payload);
    buf.put_slice(&padding);
    Ok(buf.to_vec())
}

/// Validates a received `packet_length` against the framing limits.
pub fn check_packet_length(packet_length: usize) -> HawserResult<()> {
    if packet_length > MAX_PACKET_SIZE {
        return Err(HawserError::Protocol(format!(
            "Packet too large: {} bytes (maximum {})",
            packet_length, MAX_PACKET_SIZE
        )));
    }
    if packet_length < 1 + MIN_PADDING_LEN {
        return Err(HawserError::Protocol(format!(
            "Packet too small: {} bytes",
            packet_length
        )));
    }
    Ok(())
}

/// Extracts the payload from a decrypted packet body
/// (`padding_length || payload || padding`, without the length field).
pub fn unframe_body(body: &[u8]) -> HawserResult<Vec<u8>> {
    if body.is_empty() {
        return Err(HawserError::Protocol("Empty packet body".to_string()));
    }

    let padding_len = body[0] as usize;
    if padding_len < MIN_PADDING_LEN {
        return Err(HawserError::Protocol(format!(
            "Padding too short: {} bytes (minimum {})",
            padding_len, MIN_PADDING_LEN
        )));
    }
    if 1 + padding_len > body.len() {
        return Err(HawserError::Protocol(format!(
            "Padding length {} exceeds packet body of {} bytes",
            padding_len,
            body.len()
        )));
    }

    Ok(body[1..body.len() - padding_len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_alignment_default_block() {
        let framed = frame_payload(b"test", 8).unwrap();
        assert_eq!(framed.len() % 8, 0);
        assert!(framed.len() >= 16);
    }

    #[test]
    fn test_frame_alignment_aes_block() {
        for len in [0usize, 1, 15, 16, 17, 300] {
            let payload = vec![0x42u8; len];
            let framed = frame_payload(&payload, 16).unwrap();
            assert_eq!(framed.len() % 16, 0, "payload len {}", len);

            let padding_len = framed[4] as usize;
            assert!(padding_len >= MIN_PADDING_LEN);
            assert!(padding_len <= MAX_PADDING_LEN);
        }
    }

    #[test]
    fn test_frame_unframe_round_trip() {
        let payload = b"SSH framed payload".to_vec();
        let framed = frame_payload(&payload, 16).unwrap();

        let packet_length = u32::from_be_bytes([framed[0], framed[1], framed[2], framed[3]]);
        assert_eq!(packet_length as usize, framed.len() - 4);

        let recovered = unframe_body(&framed[4..]).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_check_packet_length() {
        assert!(check_packet_length(16).is_ok());
        assert!(check_packet_length(MAX_PACKET_SIZE + 1).is_err());
        assert!(check_packet_length(2).is_err());
    }

    #[test]
    fn test_unframe_rejects_short_padding() {
        // padding_length = 2 < 4
        let body = [2u8, b'h', b'i', 0, 0];
        assert!(unframe_body(&body).is_err());
    }

    #[test]
    fn test_unframe_rejects_oversized_padding() {
        let body = [200u8, b'h', b'i'];
        assert!(unframe_body(&body).is_err());
    }

    #[test]
    fn test_frame_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_PACKET_SIZE + 10];
        assert!(frame_payload(&payload, 16).is_err());
    }
}
