//! SSH protocol version exchange (RFC 4253 Section 4.2).
//!
//! The SSH protocol begins with an identification exchange where both
//! sides send a line:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! A server may send any number of other lines before its
//! identification line; clients discard them until one starting with
//! `SSH-` is seen.
//!
//! # Security
//!
//! - Maximum line length: 255 characters (DoS prevention)
//! - Protocol version must be "2.0" or "1.99"
//! - No null bytes allowed in the identification string
//!
//! # Example
//!
//! ```rust
//! use hawser_proto::ssh::version::Version;
//!
//! let version = Version::new("Hawser_0.1.0", None);
//! assert_eq!(version.to_string(), "SSH-2.0-Hawser_0.1.0");
//!
//! let parsed = Version::parse("SSH-2.0-OpenSSH_9.6\r\n").unwrap();
//! assert_eq!(parsed.software(), "OpenSSH_9.6");
//! ```

use hawser_platform::{HawserError, HawserResult};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum length of an SSH identification line.
pub const MAX_VERSION_LENGTH: usize = 255;

/// Maximum number of pre-identification banner lines tolerated before
/// the exchange is treated as a protocol error.
const MAX_BANNER_LINES: usize = 64;

/// SSH protocol identification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Protocol version (e.g. "2.0")
    proto_version: String,
    /// Software version (e.g. "Hawser_0.1.0")
    software_version: String,
    /// Optional comments
    comments: Option<String>,
}

impl Version {
    /// Creates a new identification string with protocol version "2.0".
    pub fn new(software: &str, comments: Option<&str>) -> Self {
        Self {
            proto_version: "2.0".to_string(),
            software_version: software.to_string(),
            comments: comments.map(String::from),
        }
    }

    /// Returns the default Hawser identification string.
    pub fn default_hawser() -> Self {
        Self::new(&format!("Hawser_{}", env!("CARGO_PKG_VERSION")), None)
    }

    /// Parses an identification line (with or without CR LF).
    ///
    /// # Errors
    ///
    /// Returns [`HawserError::Protocol`] if the line is too long, does
    /// not start with `SSH-`, carries an unsupported protocol version,
    /// or contains null bytes.
    pub fn parse(line: &str) -> HawserResult<Self> {
        let line = line.trim_end_matches("\r\n").trim_end_matches('\n');

        if line.len() > MAX_VERSION_LENGTH {
            return Err(HawserError::Protocol(format!(
                "Version string too long: {} bytes (max {})",
                line.len(),
                MAX_VERSION_LENGTH
            )));
        }

        if line.contains('\0') {
            return Err(HawserError::Protocol(
                "Version string contains null byte".to_string(),
            ));
        }

        if !line.starts_with("SSH-") {
            return Err(HawserError::Protocol(format!(
                "Invalid version string: must start with 'SSH-', got '{}'",
                line
            )));
        }

        let parts: Vec<&str> = line.splitn(3, '-').collect();
        if parts.len() < 3 {
            return Err(HawserError::Protocol(format!(
                "Invalid version string format: '{}'",
                line
            )));
        }

        let proto_version = parts[1];
        let rest = parts[2];

        if proto_version != "2.0" && proto_version != "1.99" {
            return Err(HawserError::Protocol(format!(
                "Unsupported protocol version: '{}' (expected '2.0' or '1.99')",
                proto_version
            )));
        }

        let (software_version, comments) = if let Some(space_pos) = rest.find(' ') {
            let software = rest[..space_pos].to_string();
            let comments = rest[space_pos + 1..].trim().to_string();
            (software, Some(comments))
        } else {
            (rest.to_string(), None)
        };

        Ok(Self {
            proto_version: proto_version.to_string(),
            software_version,
            comments,
        })
    }

    /// Returns the protocol version (e.g. "2.0").
    pub fn proto_version(&self) -> &str {
        &self.proto_version
    }

    /// Returns the software version (e.g. "Hawser_0.1.0").
    pub fn software(&self) -> &str {
        &self.software_version
    }

    /// Returns the comments, if any.
    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    /// Converts to wire format (with CR LF).
    pub fn to_wire_format(&self) -> Vec<u8> {
        format!("{}\r\n", self).into_bytes()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SSH-{}-{}", self.proto_version, self.software_version)?;
        if let Some(comments) = &self.comments {
            write!(f, " {}", comments)?;
        }
        Ok(())
    }
}

/// Reads the peer's identification line from a stream.
///
/// Lines that do not start with `SSH-` are discarded (servers are
/// allowed to print a banner before their identification line). The
/// full identification line, without the trailing CR LF, is returned
/// alongside the parsed [`Version`] because the raw bytes enter the
/// key-exchange transcript.
pub async fn read_peer_version<S>(stream: &mut S) -> HawserResult<(Version, String)>
where
    S: AsyncRead + Unpin,
{
    for _ in 0..MAX_BANNER_LINES {
        let line = read_line(stream).await?;
        if line.starts_with("SSH-") {
            let version = Version::parse(&line)?;
            return Ok((version, line));
        }
        tracing::debug!("Discarding pre-version banner line: {:?}", line);
    }

    Err(HawserError::Protocol(
        "No identification line received".to_string(),
    ))
}

async fn read_line<S>(stream: &mut S) -> HawserResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        stream.read_exact(&mut byte).await.map_err(HawserError::Io)?;
        if byte[0] == b'\n' {
            break;
        }
        buffer.push(byte[0]);

        if buffer.len() > MAX_VERSION_LENGTH {
            return Err(HawserError::Protocol(
                "Identification line too long".to_string(),
            ));
        }
    }

    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }

    String::from_utf8(buffer)
        .map_err(|_| HawserError::Protocol("Identification line is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_new() {
        let version = Version::new("Hawser_0.1.0", None);
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "Hawser_0.1.0");
        assert_eq!(version.comments(), None);
    }

    #[test]
    fn test_version_display() {
        let version = Version::new("Hawser_0.1.0", Some("tunnel carrier"));
        assert_eq!(version.to_string(), "SSH-2.0-Hawser_0.1.0 tunnel carrier");
    }

    #[test]
    fn test_version_parse() {
        let version = Version::parse("SSH-2.0-OpenSSH_9.6").unwrap();
        assert_eq!(version.proto_version(), "2.0");
        assert_eq!(version.software(), "OpenSSH_9.6");
    }

    #[test]
    fn test_version_parse_with_comments() {
        let version = Version::parse("SSH-2.0-OpenSSH_9.6 Ubuntu-3ubuntu13").unwrap();
        assert_eq!(version.software(), "OpenSSH_9.6");
        assert_eq!(version.comments(), Some("Ubuntu-3ubuntu13"));
    }

    #[test]
    fn test_version_parse_with_crlf() {
        let version = Version::parse("SSH-2.0-OpenSSH_9.6\r\n").unwrap();
        assert_eq!(version.software(), "OpenSSH_9.6");
    }

    #[test]
    fn test_version_parse_invalid_prefix() {
        assert!(Version::parse("INVALID-2.0-Test").is_err());
    }

    #[test]
    fn test_version_parse_unsupported_protocol() {
        let result = Version::parse("SSH-1.5-OldClient");
        match result {
            Err(HawserError::Protocol(msg)) => {
                assert!(msg.contains("Unsupported protocol version"));
            }
            _ => panic!("Expected Protocol error"),
        }
    }

    #[test]
    fn test_version_parse_too_long() {
        let long_string = format!("SSH-2.0-{}", "A".repeat(300));
        assert!(Version::parse(&long_string).is_err());
    }

    #[test]
    fn test_version_parse_null_byte() {
        assert!(Version::parse("SSH-2.0-Test\0Bad").is_err());
    }

    #[test]
    fn test_version_wire_format() {
        let version = Version::new("Hawser_0.1.0", None);
        assert_eq!(version.to_wire_format(), b"SSH-2.0-Hawser_0.1.0\r\n");
    }

    #[tokio::test]
    async fn test_read_peer_version_skips_banner() {
        let input = b"welcome to the machine\r\nSSH-2.0-Hawser_0.1.0\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(input);

        let (version, raw) = read_peer_version(&mut cursor).await.unwrap();
        assert_eq!(version.software(), "Hawser_0.1.0");
        assert_eq!(raw, "SSH-2.0-Hawser_0.1.0");
    }

    #[tokio::test]
    async fn test_read_peer_version_direct() {
        let input = b"SSH-2.0-OpenSSH_9.6 comment\r\n".to_vec();
        let mut cursor = std::io::Cursor::new(input);

        let (version, _) = read_peer_version(&mut cursor).await.unwrap();
        assert_eq!(version.comments(), Some("comment"));
    }
}
