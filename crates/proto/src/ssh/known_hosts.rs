//! Known-hosts file handling.
//!
//! Line format: `host[,host...] keytype base64-blob [comment]`.
//! Hosts on non-standard ports use the `[host]:port` form. Blank
//! lines and `#` comments are ignored.
//!
//! Verification yields one of three verdicts; what to do about
//! Unknown and Changed is policy, chosen by the front-end via
//! [`StrictHostKeyChecking`] and its prompt callback.

use base64::Engine;
use hawser_platform::{HawserError, HawserResult};
use std::path::{Path, PathBuf};

/// Host key checking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrictHostKeyChecking {
    /// Reject unknown and changed host keys.
    Strict,
    /// Ask the user about unknown keys; reject changed keys.
    Ask,
    /// Accept and record unknown keys; reject changed keys.
    AcceptNew,
    /// Accept everything. For tests only.
    No,
}

/// Verdict on a presented host key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyStatus {
    /// The host is known and the key matches.
    Known,
    /// The host has no recorded key.
    Unknown,
    /// The host is known with a different key.
    Changed {
        /// The recorded key type.
        old_key_type: String,
        /// The recorded key blob.
        old_key_blob: Vec<u8>,
    },
}

/// One known-hosts line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownHostEntry {
    /// Host patterns (exact names; no wildcard support).
    pub hosts: Vec<String>,
    /// Key algorithm name.
    pub key_type: String,
    /// Decoded public key blob.
    pub key_blob: Vec<u8>,
    /// Trailing comment, if any.
    pub comment: Option<String>,
}

impl KnownHostEntry {
    fn parse(line: &str) -> HawserResult<Self> {
        let mut parts = line.split_whitespace();
        let hosts = parts
            .next()
            .ok_or_else(|| HawserError::Format("known_hosts line missing hosts".to_string()))?;
        let key_type = parts
            .next()
            .ok_or_else(|| HawserError::Format("known_hosts line missing key type".to_string()))?;
        let blob = parts
            .next()
            .ok_or_else(|| HawserError::Format("known_hosts line missing key".to_string()))?;
        let comment = {
            let rest: Vec<&str> = parts.collect();
            if rest.is_empty() {
                None
            } else {
                Some(rest.join(" "))
            }
        };

        let key_blob = base64::engine::general_purpose::STANDARD
            .decode(blob)
            .map_err(|e| HawserError::Format(format!("known_hosts base64: {}", e)))?;

        Ok(Self {
            hosts: hosts.split(',').map(String::from).collect(),
            key_type: key_type.to_string(),
            key_blob,
            comment,
        })
    }

    fn to_line(&self) -> String {
        let blob = base64::engine::general_purpose::STANDARD.encode(&self.key_blob);
        match &self.comment {
            Some(comment) => format!("{} {} {} {}", self.hosts.join(","), self.key_type, blob, comment),
            None => format!("{} {} {}", self.hosts.join(","), self.key_type, blob),
        }
    }
}

/// The name a host is recorded under: plain for port 22, `[host]:port`
/// otherwise.
pub fn host_pattern(hostname: &str, port: u16) -> String {
    if port == 22 {
        hostname.to_string()
    } else {
        format!("[{}]:{}", hostname, port)
    }
}

/// A parsed known-hosts file.
#[derive(Debug, Clone)]
pub struct KnownHostsFile {
    path: Option<PathBuf>,
    entries: Vec<KnownHostEntry>,
}

impl KnownHostsFile {
    /// An empty, unbacked file.
    pub fn empty() -> Self {
        Self {
            path: None,
            entries: Vec::new(),
        }
    }

    /// Loads a file; a missing file parses as empty.
    pub fn from_file<P: AsRef<Path>>(path: P) -> HawserResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse_entries(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(HawserError::Io(e)),
        };
        Ok(Self {
            path: Some(path),
            entries,
        })
    }

    /// Parses known-hosts text.
    pub fn from_str(text: &str) -> HawserResult<Self> {
        Ok(Self {
            path: None,
            entries: Self::parse_entries(text)?,
        })
    }

    fn parse_entries(text: &str) -> HawserResult<Vec<KnownHostEntry>> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            entries.push(KnownHostEntry::parse(line)?);
        }
        Ok(entries)
    }

    /// Returns the recorded entries.
    pub fn entries(&self) -> &[KnownHostEntry] {
        &self.entries
    }

    /// Checks a presented host key.
    pub fn verify(
        &self,
        hostname: &str,
        port: u16,
        key_type: &str,
        key_blob: &[u8],
    ) -> HostKeyStatus {
        let pattern = host_pattern(hostname, port);
        let mut seen_host = None;

        for entry in &self.entries {
            if !entry.hosts.iter().any(|h| h == &pattern) {
                continue;
            }
            if entry.key_type == key_type && entry.key_blob == key_blob {
                return HostKeyStatus::Known;
            }
            seen_host = Some(entry);
        }

        match seen_host {
            Some(entry) => HostKeyStatus::Changed {
                old_key_type: entry.key_type.clone(),
                old_key_blob: entry.key_blob.clone(),
            },
            None => HostKeyStatus::Unknown,
        }
    }

    /// Records a host key.
    pub fn add(&mut self, hostname: &str, port: u16, key_type: &str, key_blob: &[u8]) {
        self.entries.push(KnownHostEntry {
            hosts: vec![host_pattern(hostname, port)],
            key_type: key_type.to_string(),
            key_blob: key_blob.to_vec(),
            comment: None,
        });
    }

    /// Writes the file back to its backing path.
    pub fn save(&self) -> HawserResult<()> {
        let path = self.path.as_ref().ok_or_else(|| {
            HawserError::Config("known_hosts file has no backing path".to_string())
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(HawserError::Io)?;
        }
        let mut text = String::new();
        for entry in &self.entries {
            text.push_str(&entry.to_line());
            text.push('\n');
        }
        std::fs::write(path, text).map_err(HawserError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB: &[u8] = b"\x00\x00\x00\x0bssh-ed25519\x00\x00\x00\x01X";

    fn encoded() -> String {
        base64::engine::general_purpose::STANDARD.encode(BLOB)
    }

    #[test]
    fn test_parse_and_verify_known() {
        let text = format!("bastion.example.com ssh-ed25519 {} ops@laptop\n", encoded());
        let file = KnownHostsFile::from_str(&text).unwrap();

        assert_eq!(
            file.verify("bastion.example.com", 22, "ssh-ed25519", BLOB),
            HostKeyStatus::Known
        );
    }

    #[test]
    fn test_unknown_host() {
        let file = KnownHostsFile::empty();
        assert_eq!(
            file.verify("new.example.com", 22, "ssh-ed25519", BLOB),
            HostKeyStatus::Unknown
        );
    }

    #[test]
    fn test_changed_key_reports_old() {
        let text = format!("bastion ssh-ed25519 {}\n", encoded());
        let file = KnownHostsFile::from_str(&text).unwrap();

        match file.verify("bastion", 22, "ssh-ed25519", b"different") {
            HostKeyStatus::Changed {
                old_key_type,
                old_key_blob,
            } => {
                assert_eq!(old_key_type, "ssh-ed25519");
                assert_eq!(old_key_blob, BLOB);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_non_standard_port_pattern() {
        assert_eq!(host_pattern("example.com", 22), "example.com");
        assert_eq!(host_pattern("example.com", 2222), "[example.com]:2222");

        let text = format!("[example.com]:2222 ssh-ed25519 {}\n", encoded());
        let file = KnownHostsFile::from_str(&text).unwrap();
        assert_eq!(
            file.verify("example.com", 2222, "ssh-ed25519", BLOB),
            HostKeyStatus::Known
        );
        assert_eq!(
            file.verify("example.com", 22, "ssh-ed25519", BLOB),
            HostKeyStatus::Unknown
        );
    }

    #[test]
    fn test_multiple_hosts_per_line() {
        let text = format!("alpha,beta ssh-ed25519 {}\n", encoded());
        let file = KnownHostsFile::from_str(&text).unwrap();
        assert_eq!(file.verify("beta", 22, "ssh-ed25519", BLOB), HostKeyStatus::Known);
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        let text = format!("# header\n\nalpha ssh-ed25519 {}\n", encoded());
        let file = KnownHostsFile::from_str(&text).unwrap();
        assert_eq!(file.entries().len(), 1);
    }

    #[test]
    fn test_add_and_round_trip() {
        let mut file = KnownHostsFile::empty();
        file.add("gamma", 2200, "ssh-ed25519", BLOB);

        let line = file.entries()[0].to_line();
        let reparsed = KnownHostsFile::from_str(&line).unwrap();
        assert_eq!(
            reparsed.verify("gamma", 2200, "ssh-ed25519", BLOB),
            HostKeyStatus::Known
        );
    }

    #[test]
    fn test_malformed_line_rejected() {
        assert!(KnownHostsFile::from_str("host-only-no-key\n").is_err());
        assert!(KnownHostsFile::from_str("host ssh-ed25519 !!!notbase64\n").is_err());
    }
}
