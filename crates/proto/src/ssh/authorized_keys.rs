//! Authorized keys list (server-side publickey authorization).
//!
//! Line format: `keytype base64-blob [comment]`, the public half of
//! the OpenSSH `authorized_keys` file. Options prefixes are not
//! supported. Lookup compares decoded blobs in constant time.

use crate::ssh::auth::constant_time_compare;
use base64::Engine;
use hawser_platform::{HawserError, HawserResult};
use std::path::Path;

/// One authorized public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    /// Key algorithm name.
    pub key_type: String,
    /// Decoded public key blob.
    pub key_blob: Vec<u8>,
    /// Trailing comment, if any.
    pub comment: Option<String>,
}

/// The set of keys a server accepts for a user.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    entries: Vec<AuthorizedKey>,
}

impl AuthorizedKeys {
    /// An empty list (authorizes nothing).
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads an authorized_keys file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> HawserResult<Self> {
        let text = std::fs::read_to_string(path).map_err(HawserError::Io)?;
        Self::from_str(&text)
    }

    /// Parses authorized_keys text.
    pub fn from_str(text: &str) -> HawserResult<Self> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut parts = line.split_whitespace();
            let key_type = parts.next().ok_or_else(|| {
                HawserError::Format("authorized_keys line missing key type".to_string())
            })?;
            let blob = parts.next().ok_or_else(|| {
                HawserError::Format("authorized_keys line missing key".to_string())
            })?;
            let rest: Vec<&str> = parts.collect();

            let key_blob = base64::engine::general_purpose::STANDARD
                .decode(blob)
                .map_err(|e| HawserError::Format(format!("authorized_keys base64: {}", e)))?;

            entries.push(AuthorizedKey {
                key_type: key_type.to_string(),
                key_blob,
                comment: if rest.is_empty() {
                    None
                } else {
                    Some(rest.join(" "))
                },
            });
        }
        Ok(Self { entries })
    }

    /// Adds a key given as a `keytype base64 [comment]` line fragment.
    pub fn add_line(&mut self, line: &str) -> HawserResult<()> {
        let parsed = Self::from_str(line)?;
        self.entries.extend(parsed.entries);
        Ok(())
    }

    /// Returns the entries.
    pub fn entries(&self) -> &[AuthorizedKey] {
        &self.entries
    }

    /// Returns true when the presented key is on the list.
    pub fn is_authorized(&self, key_type: &str, key_blob: &[u8]) -> bool {
        self.entries.iter().any(|entry| {
            entry.key_type == key_type && constant_time_compare(&entry.key_blob, key_blob)
        })
    }
}
