//! SSH wire codec (RFC 4251 Section 5).
//!
//! Length-prefixed primitive readers and writers shared by every layer
//! of the stack:
//!
//! - `byte`, `boolean`, `uint32`, `uint64` - fixed-width big-endian
//! - `string` - uint32 length prefix then raw bytes
//! - `mpint` - two's-complement big-endian integer inside a string;
//!   a leading 0x00 octet is inserted iff the high bit of the first
//!   octet would otherwise be set, and zero encodes as the empty string
//! - `name-list` - comma-joined US-ASCII names inside a string
//!
//! Readers take a `&[u8]` plus a running offset; any read past the end
//! of the input is a [`HawserError::Protocol`].
//!
//! # Example
//!
//! ```rust
//! use bytes::BytesMut;
//! use hawser_proto::ssh::codec;
//!
//! let mut buf = BytesMut::new();
//! codec::write_string(&mut buf, "ssh-userauth");
//!
//! let mut offset = 0;
//! let name = codec::read_string(&buf, &mut offset).unwrap();
//! assert_eq!(name, "ssh-userauth");
//! assert_eq!(offset, buf.len());
//! ```

use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};

/// Writes an SSH string (uint32 length prefix + raw bytes).
pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_bytes(buf, s.as_bytes());
}

/// Writes a length-prefixed byte string.
pub fn write_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Writes an SSH boolean (single byte, 0 or 1).
pub fn write_bool(buf: &mut BytesMut, value: bool) {
    buf.put_u8(u8::from(value));
}

/// Writes a name-list (comma-joined names inside a string).
pub fn write_name_list(buf: &mut BytesMut, names: &[String]) {
    write_string(buf, &names.join(","));
}

/// Writes an mpint.
///
/// The input is interpreted as an unsigned big-endian integer; leading
/// zero octets are stripped, then a 0x00 octet is prepended iff the
/// high bit of the first remaining octet is set. Zero encodes as an
/// empty string (`00 00 00 00` on the wire).
pub fn write_mpint(buf: &mut BytesMut, data: &[u8]) {
    let trimmed: &[u8] = {
        let mut rest = data;
        while let Some((&0, tail)) = rest.split_first() {
            rest = tail;
        }
        rest
    };

    if trimmed.is_empty() {
        buf.put_u32(0);
        return;
    }

    let pad = trimmed[0] & 0x80 != 0;
    buf.put_u32((trimmed.len() + usize::from(pad)) as u32);
    if pad {
        buf.put_u8(0);
    }
    buf.put_slice(trimmed);
}

/// Reads a uint8.
pub fn read_u8(data: &[u8], offset: &mut usize) -> HawserResult<u8> {
    if *offset >= data.len() {
        return Err(short_read("u8", *offset));
    }
    let value = data[*offset];
    *offset += 1;
    Ok(value)
}

/// Reads an SSH boolean (any non-zero byte is true).
pub fn read_bool(data: &[u8], offset: &mut usize) -> HawserResult<bool> {
    Ok(read_u8(data, offset)? != 0)
}

/// Reads a big-endian uint32.
pub fn read_u32(data: &[u8], offset: &mut usize) -> HawserResult<u32> {
    if *offset + 4 > data.len() {
        return Err(short_read("u32", *offset));
    }
    let value = u32::from_be_bytes([
        data[*offset],
        data[*offset + 1],
        data[*offset + 2],
        data[*offset + 3],
    ]);
    *offset += 4;
    Ok(value)
}

/// Reads a big-endian uint64.
pub fn read_u64(data: &[u8], offset: &mut usize) -> HawserResult<u64> {
    if *offset + 8 > data.len() {
        return Err(short_read("u64", *offset));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[*offset..*offset + 8]);
    *offset += 8;
    Ok(u64::from_be_bytes(bytes))
}

/// Reads a length-prefixed byte string.
pub fn read_bytes(data: &[u8], offset: &mut usize) -> HawserResult<Vec<u8>> {
    let length = read_u32(data, offset)? as usize;
    if *offset + length > data.len() {
        return Err(HawserError::Protocol(format!(
            "String truncated: expected {} bytes at offset {}",
            length, offset
        )));
    }
    let bytes = data[*offset..*offset + length].to_vec();
    *offset += length;
    Ok(bytes)
}

/// Reads an SSH string and decodes it as UTF-8.
pub fn read_string(data: &[u8], offset: &mut usize) -> HawserResult<String> {
    let bytes = read_bytes(data, offset)?;
    String::from_utf8(bytes)
        .map_err(|_| HawserError::Protocol("String contains invalid UTF-8".to_string()))
}

/// Reads a name-list into its individual names.
pub fn read_name_list(data: &[u8], offset: &mut usize) -> HawserResult<Vec<String>> {
    let list = read_string(data, offset)?;
    if list.is_empty() {
        Ok(vec![])
    } else {
        Ok(list.split(',').map(String::from).collect())
    }
}

/// Reads an mpint, returning the magnitude with the sign octet removed.
///
/// The returned bytes are the minimal unsigned big-endian encoding; an
/// empty vector represents zero.
pub fn read_mpint(data: &[u8], offset: &mut usize) -> HawserResult<Vec<u8>> {
    let mut bytes = read_bytes(data, offset)?;
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        return Err(HawserError::Protocol(
            "Negative mpint not supported".to_string(),
        ));
    }
    while bytes.first() == Some(&0) {
        bytes.remove(0);
    }
    Ok(bytes)
}

fn short_read(what: &str, offset: usize) -> HawserError {
    HawserError::Protocol(format!("Cannot read {} at offset {}", what, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mpint_bytes(data: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        write_mpint(&mut buf, data);
        buf.to_vec()
    }

    #[test]
    fn test_mpint_zero() {
        assert_eq!(mpint_bytes(&[]), vec![0, 0, 0, 0]);
        assert_eq!(mpint_bytes(&[0, 0, 0]), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_mpint_high_bit() {
        // 0x80 needs a sign octet
        assert_eq!(mpint_bytes(&[0x80]), vec![0, 0, 0, 2, 0x00, 0x80]);
    }

    #[test]
    fn test_mpint_large_value() {
        // 0x09a378f9b2e332a7 from RFC 4251 Section 5
        let value = 0x09a378f9b2e332a7u64.to_be_bytes();
        assert_eq!(
            mpint_bytes(&value),
            vec![0, 0, 0, 8, 0x09, 0xa3, 0x78, 0xf9, 0xb2, 0xe3, 0x32, 0xa7]
        );
    }

    #[test]
    fn test_mpint_round_trip() {
        for value in [&[][..], &[0x01], &[0x7f, 0xff], &[0x80, 0x00], &[0xff; 16]] {
            let encoded = mpint_bytes(value);
            let mut offset = 0;
            let decoded = read_mpint(&encoded, &mut offset).unwrap();
            assert_eq!(offset, encoded.len());

            let mut expected = value.to_vec();
            while expected.first() == Some(&0) {
                expected.remove(0);
            }
            assert_eq!(decoded, expected);
        }
    }

    #[test]
    fn test_string_round_trip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "diffie-hellman-group14-sha1");

        let mut offset = 0;
        let parsed = read_string(&buf, &mut offset).unwrap();
        assert_eq!(parsed, "diffie-hellman-group14-sha1");
        assert_eq!(offset, buf.len());
    }

    #[test]
    fn test_name_list_round_trip() {
        let names = vec!["aes128-ctr".to_string(), "aes256-cbc".to_string()];
        let mut buf = BytesMut::new();
        write_name_list(&mut buf, &names);

        let mut offset = 0;
        assert_eq!(read_name_list(&buf, &mut offset).unwrap(), names);
    }

    #[test]
    fn test_name_list_empty() {
        let mut buf = BytesMut::new();
        write_name_list(&mut buf, &[]);
        assert_eq!(buf.to_vec(), vec![0, 0, 0, 0]);

        let mut offset = 0;
        assert!(read_name_list(&buf, &mut offset).unwrap().is_empty());
    }

    #[test]
    fn test_u64_round_trip() {
        let mut buf = BytesMut::new();
        buf.put_u64(0x0123456789abcdef);

        let mut offset = 0;
        assert_eq!(read_u64(&buf, &mut offset).unwrap(), 0x0123456789abcdef);
    }

    #[test]
    fn test_out_of_bounds_reads_fail() {
        let data = [0u8, 0, 0, 9, 1, 2];
        let mut offset = 0;
        assert!(read_bytes(&data, &mut offset).is_err());

        let mut offset = 5;
        assert!(read_u32(&data, &mut offset).is_err());

        let mut offset = 6;
        assert!(read_u8(&data, &mut offset).is_err());
    }
}
