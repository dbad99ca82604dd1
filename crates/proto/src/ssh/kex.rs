//! Key exchange messages (RFC 4253 Section 7, RFC 4419, RFC 5656).
//!
//! Message value types for algorithm negotiation and the key exchange
//! methods:
//!
//! - [`KexInit`] / [`NewKeys`] - negotiation and key activation
//! - [`KexEcdhInit`] / [`KexEcdhReply`] - ECDH and curve25519 (string
//!   publics)
//! - [`KexDhInit`] / [`KexDhReply`] - fixed-group DH (mpint publics)
//! - [`GexRequest`] / [`GexGroup`] / [`GexInit`] / [`GexReply`] -
//!   group exchange
//!
//! Every type follows the `to_bytes` / `from_bytes` convention; the
//! first byte is always the message number.

use crate::ssh::algorithm::SupportedAlgorithms;
use crate::ssh::codec;
use crate::ssh::message::MessageType;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use rand::RngCore;

/// SSH_MSG_KEXINIT (RFC 4253 Section 7.1).
///
/// Carries four ordered algorithm name-lists (plus compression and
/// language lists) used to negotiate the connection's suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexInit {
    /// Random cookie (16 bytes).
    cookie: [u8; 16],
    /// Key exchange algorithms.
    kex_algorithms: Vec<String>,
    /// Server host key algorithms.
    server_host_key_algorithms: Vec<String>,
    /// Encryption algorithms, client to server.
    encryption_client_to_server: Vec<String>,
    /// Encryption algorithms, server to client.
    encryption_server_to_client: Vec<String>,
    /// MAC algorithms, client to server.
    mac_client_to_server: Vec<String>,
    /// MAC algorithms, server to client.
    mac_server_to_client: Vec<String>,
    /// Compression algorithms, client to server.
    compression_client_to_server: Vec<String>,
    /// Compression algorithms, server to client.
    compression_server_to_client: Vec<String>,
    /// Languages, client to server.
    languages_client_to_server: Vec<String>,
    /// Languages, server to client.
    languages_server_to_client: Vec<String>,
    /// Whether a guessed kex packet follows.
    first_kex_packet_follows: bool,
}

impl KexInit {
    /// Builds a KEXINIT offering the given algorithm set.
    ///
    /// Compression is always "none"; Hawser carries the compression
    /// hook at the transport layer but negotiates no codec.
    pub fn new(algorithms: &SupportedAlgorithms) -> Self {
        let mut cookie = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut cookie);

        Self {
            cookie,
            kex_algorithms: algorithms.kex_names(),
            server_host_key_algorithms: algorithms.host_key_names(),
            encryption_client_to_server: algorithms.cipher_names(),
            encryption_server_to_client: algorithms.cipher_names(),
            mac_client_to_server: algorithms.mac_names(),
            mac_server_to_client: algorithms.mac_names(),
            compression_client_to_server: vec!["none".to_string()],
            compression_server_to_client: vec!["none".to_string()],
            languages_client_to_server: vec![],
            languages_server_to_client: vec![],
            first_kex_packet_follows: false,
        }
    }

    /// Returns the key exchange name-list.
    pub fn kex_algorithms(&self) -> &[String] {
        &self.kex_algorithms
    }

    /// Returns the host key name-list.
    pub fn server_host_key_algorithms(&self) -> &[String] {
        &self.server_host_key_algorithms
    }

    /// Returns the client-to-server cipher name-list.
    pub fn encryption_client_to_server(&self) -> &[String] {
        &self.encryption_client_to_server
    }

    /// Returns the server-to-client cipher name-list.
    pub fn encryption_server_to_client(&self) -> &[String] {
        &self.encryption_server_to_client
    }

    /// Returns the client-to-server MAC name-list.
    pub fn mac_client_to_server(&self) -> &[String] {
        &self.mac_client_to_server
    }

    /// Returns the server-to-client MAC name-list.
    pub fn mac_server_to_client(&self) -> &[String] {
        &self.mac_server_to_client
    }

    /// Returns whether a guessed kex packet follows.
    pub fn first_kex_packet_follows(&self) -> bool {
        self.first_kex_packet_follows
    }

    /// Serializes to the KEXINIT payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        buf.put_u8(MessageType::KexInit as u8);
        buf.put_slice(&self.cookie);

        codec::write_name_list(&mut buf, &self.kex_algorithms);
        codec::write_name_list(&mut buf, &self.server_host_key_algorithms);
        codec::write_name_list(&mut buf, &self.encryption_client_to_server);
        codec::write_name_list(&mut buf, &self.encryption_server_to_client);
        codec::write_name_list(&mut buf, &self.mac_client_to_server);
        codec::write_name_list(&mut buf, &self.mac_server_to_client);
        codec::write_name_list(&mut buf, &self.compression_client_to_server);
        codec::write_name_list(&mut buf, &self.compression_server_to_client);
        codec::write_name_list(&mut buf, &self.languages_client_to_server);
        codec::write_name_list(&mut buf, &self.languages_server_to_client);

        codec::write_bool(&mut buf, self.first_kex_packet_follows);
        buf.put_u32(0); // reserved

        buf.to_vec()
    }

    /// Parses a KEXINIT payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.is_empty() || data[0] != MessageType::KexInit as u8 {
            return Err(HawserError::Protocol(format!(
                "Expected SSH_MSG_KEXINIT, got {:?}",
                data.first()
            )));
        }
        if data.len() < 17 {
            return Err(HawserError::Protocol(format!(
                "KEXINIT too short: {} bytes",
                data.len()
            )));
        }

        let mut cookie = [0u8; 16];
        cookie.copy_from_slice(&data[1..17]);

        let mut offset = 17;
        let kex_algorithms = codec::read_name_list(data, &mut offset)?;
        let server_host_key_algorithms = codec::read_name_list(data, &mut offset)?;
        let encryption_client_to_server = codec::read_name_list(data, &mut offset)?;
        let encryption_server_to_client = codec::read_name_list(data, &mut offset)?;
        let mac_client_to_server = codec::read_name_list(data, &mut offset)?;
        let mac_server_to_client = codec::read_name_list(data, &mut offset)?;
        let compression_client_to_server = codec::read_name_list(data, &mut offset)?;
        let compression_server_to_client = codec::read_name_list(data, &mut offset)?;
        let languages_client_to_server = codec::read_name_list(data, &mut offset)?;
        let languages_server_to_client = codec::read_name_list(data, &mut offset)?;
        let first_kex_packet_follows = codec::read_bool(data, &mut offset)?;
        let _reserved = codec::read_u32(data, &mut offset)?;

        Ok(Self {
            cookie,
            kex_algorithms,
            server_host_key_algorithms,
            encryption_client_to_server,
            encryption_server_to_client,
            mac_client_to_server,
            mac_server_to_client,
            compression_client_to_server,
            compression_server_to_client,
            languages_client_to_server,
            languages_server_to_client,
            first_kex_packet_follows,
        })
    }
}

/// SSH_MSG_NEWKEYS (RFC 4253 Section 7.3).
///
/// Both sides send this after key exchange; the staged cipher contexts
/// become active for all subsequent packets in that direction. The
/// packet sequence numbers are NOT reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewKeys;

impl NewKeys {
    /// Serializes to the single-byte payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        vec![MessageType::NewKeys as u8]
    }

    /// Parses a NEWKEYS payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&(MessageType::NewKeys as u8)) {
            return Err(HawserError::Protocol(format!(
                "Expected SSH_MSG_NEWKEYS, got {:?}",
                data.first()
            )));
        }
        Ok(Self)
    }
}

/// SSH_MSG_KEX_ECDH_INIT (RFC 5656 Section 4): client ephemeral public
/// as a string. Also serves curve25519-sha256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhInit {
    /// Client ephemeral public Q_C.
    pub public: Vec<u8>,
}

impl KexEcdhInit {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexdhInit as u8);
        codec::write_bytes(&mut buf, &self.public);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexdhInit)?;
        let mut offset = 1;
        let public = codec::read_bytes(data, &mut offset)?;
        Ok(Self { public })
    }
}

/// SSH_MSG_KEX_ECDH_REPLY (RFC 5656 Section 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexEcdhReply {
    /// Server host key blob K_S.
    pub host_key_blob: Vec<u8>,
    /// Server ephemeral public Q_S.
    pub public: Vec<u8>,
    /// Signature over the exchange hash.
    pub signature: Vec<u8>,
}

impl KexEcdhReply {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexdhReply as u8);
        codec::write_bytes(&mut buf, &self.host_key_blob);
        codec::write_bytes(&mut buf, &self.public);
        codec::write_bytes(&mut buf, &self.signature);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexdhReply)?;
        let mut offset = 1;
        let host_key_blob = codec::read_bytes(data, &mut offset)?;
        let public = codec::read_bytes(data, &mut offset)?;
        let signature = codec::read_bytes(data, &mut offset)?;
        Ok(Self {
            host_key_blob,
            public,
            signature,
        })
    }
}

/// SSH_MSG_KEXDH_INIT (RFC 4253 Section 8): client DH public e as an
/// mpint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhInit {
    /// Client DH public e (unsigned big-endian).
    pub e: Vec<u8>,
}

impl KexDhInit {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexdhInit as u8);
        codec::write_mpint(&mut buf, &self.e);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexdhInit)?;
        let mut offset = 1;
        let e = codec::read_mpint(data, &mut offset)?;
        Ok(Self { e })
    }
}

/// SSH_MSG_KEXDH_REPLY (RFC 4253 Section 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KexDhReply {
    /// Server host key blob K_S.
    pub host_key_blob: Vec<u8>,
    /// Server DH public f (unsigned big-endian).
    pub f: Vec<u8>,
    /// Signature over the exchange hash.
    pub signature: Vec<u8>,
}

impl KexDhReply {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexdhReply as u8);
        codec::write_bytes(&mut buf, &self.host_key_blob);
        codec::write_mpint(&mut buf, &self.f);
        codec::write_bytes(&mut buf, &self.signature);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexdhReply)?;
        let mut offset = 1;
        let host_key_blob = codec::read_bytes(data, &mut offset)?;
        let f = codec::read_mpint(data, &mut offset)?;
        let signature = codec::read_bytes(data, &mut offset)?;
        Ok(Self {
            host_key_blob,
            f,
            signature,
        })
    }
}

/// SSH_MSG_KEX_DH_GEX_REQUEST (RFC 4419 Section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GexRequest {
    /// Minimum acceptable group size, bits.
    pub min: u32,
    /// Preferred group size, bits.
    pub preferred: u32,
    /// Maximum acceptable group size, bits.
    pub max: u32,
}

impl GexRequest {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexDhGexRequest as u8);
        buf.put_u32(self.min);
        buf.put_u32(self.preferred);
        buf.put_u32(self.max);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexDhGexRequest)?;
        let mut offset = 1;
        let min = codec::read_u32(data, &mut offset)?;
        let preferred = codec::read_u32(data, &mut offset)?;
        let max = codec::read_u32(data, &mut offset)?;
        Ok(Self {
            min,
            preferred,
            max,
        })
    }
}

/// SSH_MSG_KEX_DH_GEX_GROUP (RFC 4419 Section 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GexGroup {
    /// Group prime p (unsigned big-endian).
    pub prime: Vec<u8>,
    /// Generator g (unsigned big-endian).
    pub generator: Vec<u8>,
}

impl GexGroup {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        // 31 is SSH_MSG_KEX_DH_GEX_GROUP in the group-exchange context
        buf.put_u8(31);
        codec::write_mpint(&mut buf, &self.prime);
        codec::write_mpint(&mut buf, &self.generator);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        if data.first() != Some(&31) {
            return Err(HawserError::Protocol(format!(
                "Expected SSH_MSG_KEX_DH_GEX_GROUP (31), got {:?}",
                data.first()
            )));
        }
        let mut offset = 1;
        let prime = codec::read_mpint(data, &mut offset)?;
        let generator = codec::read_mpint(data, &mut offset)?;
        Ok(Self { prime, generator })
    }
}

/// SSH_MSG_KEX_DH_GEX_INIT (RFC 4419 Section 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GexInit {
    /// Client DH public e (unsigned big-endian).
    pub e: Vec<u8>,
}

impl GexInit {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexDhGexInit as u8);
        codec::write_mpint(&mut buf, &self.e);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexDhGexInit)?;
        let mut offset = 1;
        let e = codec::read_mpint(data, &mut offset)?;
        Ok(Self { e })
    }
}

/// SSH_MSG_KEX_DH_GEX_REPLY (RFC 4419 Section 3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GexReply {
    /// Server host key blob K_S.
    pub host_key_blob: Vec<u8>,
    /// Server DH public f (unsigned big-endian).
    pub f: Vec<u8>,
    /// Signature over the exchange hash.
    pub signature: Vec<u8>,
}

impl GexReply {
    /// Serializes to the message payload.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::KexDhGexReply as u8);
        codec::write_bytes(&mut buf, &self.host_key_blob);
        codec::write_mpint(&mut buf, &self.f);
        codec::write_bytes(&mut buf, &self.signature);
        buf.to_vec()
    }

    /// Parses the message payload.
    pub fn from_bytes(data: &[u8]) -> HawserResult<Self> {
        expect_message(data, MessageType::KexDhGexReply)?;
        let mut offset = 1;
        let host_key_blob = codec::read_bytes(data, &mut offset)?;
        let f = codec::read_mpint(data, &mut offset)?;
        let signature = codec::read_bytes(data, &mut offset)?;
        Ok(Self {
            host_key_blob,
            f,
            signature,
        })
    }
}

fn expect_message(data: &[u8], expected: MessageType) -> HawserResult<()> {
    if data.first() != Some(&(expected as u8)) {
        return Err(HawserError::Protocol(format!(
            "Expected message {}, got {:?}",
            expected as u8,
            data.first()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::algorithm::{CipherAlg, KexAlg, MacAlg};

    #[test]
    fn test_kexinit_round_trip() {
        let original = KexInit::new(&SupportedAlgorithms::default());
        let bytes = original.to_bytes();
        assert_eq!(bytes[0], 20);

        let parsed = KexInit::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_kexinit_respects_restriction() {
        let algorithms = SupportedAlgorithms::default()
            .with_kex(&[KexAlg::DhGroup1Sha1])
            .with_ciphers(&[CipherAlg::Aes128Cbc])
            .with_macs(&[MacAlg::HmacSha1]);
        let kexinit = KexInit::new(&algorithms);

        assert_eq!(kexinit.kex_algorithms(), ["diffie-hellman-group1-sha1"]);
        assert_eq!(kexinit.encryption_client_to_server(), ["aes128-cbc"]);
        assert_eq!(kexinit.mac_server_to_client(), ["hmac-sha1"]);
    }

    #[test]
    fn test_kexinit_rejects_wrong_type() {
        let mut bytes = KexInit::new(&SupportedAlgorithms::default()).to_bytes();
        bytes[0] = 99;
        assert!(KexInit::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_newkeys_round_trip() {
        let bytes = NewKeys.to_bytes();
        assert_eq!(bytes, vec![21]);
        assert!(NewKeys::from_bytes(&bytes).is_ok());
        assert!(NewKeys::from_bytes(&[20]).is_err());
    }

    #[test]
    fn test_ecdh_init_round_trip() {
        let msg = KexEcdhInit {
            public: vec![0xAB; 32],
        };
        let parsed = KexEcdhInit::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_ecdh_reply_round_trip() {
        let msg = KexEcdhReply {
            host_key_blob: b"host key".to_vec(),
            public: vec![0xCD; 32],
            signature: b"signature".to_vec(),
        };
        let parsed = KexEcdhReply::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_dh_init_round_trip_strips_leading_zeros() {
        let msg = KexDhInit {
            e: vec![0x00, 0x12, 0x34],
        };
        let parsed = KexDhInit::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.e, vec![0x12, 0x34]);
    }

    #[test]
    fn test_dh_reply_round_trip() {
        let msg = KexDhReply {
            host_key_blob: b"blob".to_vec(),
            f: vec![0x7F; 256],
            signature: b"sig".to_vec(),
        };
        let parsed = KexDhReply::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_gex_request_round_trip() {
        let msg = GexRequest {
            min: 1024,
            preferred: 2048,
            max: 8192,
        };
        let parsed = GexRequest::from_bytes(&msg.to_bytes()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(msg.to_bytes()[0], 34);
    }

    #[test]
    fn test_gex_group_round_trip() {
        let msg = GexGroup {
            prime: vec![0x7F; 128],
            generator: vec![2],
        };
        let bytes = msg.to_bytes();
        assert_eq!(bytes[0], 31);
        let parsed = GexGroup::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_gex_init_and_reply_numbers() {
        let init = GexInit { e: vec![0x11] };
        assert_eq!(init.to_bytes()[0], 32);

        let reply = GexReply {
            host_key_blob: vec![1],
            f: vec![0x22],
            signature: vec![3],
        };
        assert_eq!(reply.to_bytes()[0], 33);
        assert_eq!(GexReply::from_bytes(&reply.to_bytes()).unwrap(), reply);
    }
}
