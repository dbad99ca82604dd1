//! Algorithm registry and negotiation (RFC 4253 Section 7.1).
//!
//! Each algorithm class (key exchange, host key, cipher, MAC) is a
//! fieldless enum with a stable index (the position in its `ALL`
//! table), a canonical SSH name, and size accessors. Negotiation maps
//! names back to enum variants; no name strings flow beyond this
//! module.
//!
//! Availability is carried by an explicit [`SupportedAlgorithms`]
//! value handed to client/server construction. Tests restrict it to a
//! single algorithm per class to drive every suite through the same
//! handshake path.
//!
//! # Example
//!
//! ```rust
//! use hawser_proto::ssh::algorithm::{CipherAlg, SupportedAlgorithms};
//!
//! let algorithms = SupportedAlgorithms::default();
//! assert!(algorithms.ciphers.contains(&CipherAlg::Aes128Ctr));
//!
//! let restricted = SupportedAlgorithms::default().with_ciphers(&[CipherAlg::Aes256Cbc]);
//! assert_eq!(restricted.ciphers, vec![CipherAlg::Aes256Cbc]);
//! ```

use aes::{Aes128, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use hawser_platform::{HawserError, HawserResult};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

type Aes128Ctr = ctr::Ctr128BE<Aes128>;
type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Key exchange algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexAlg {
    /// curve25519-sha256 (RFC 8731)
    Curve25519Sha256,
    /// ecdh-sha2-nistp256 (RFC 5656)
    EcdhNistp256,
    /// ecdh-sha2-nistp384 (RFC 5656)
    EcdhNistp384,
    /// ecdh-sha2-nistp521 (RFC 5656)
    EcdhNistp521,
    /// diffie-hellman-group-exchange-sha256 (RFC 4419)
    DhGexSha256,
    /// diffie-hellman-group-exchange-sha1 (RFC 4419)
    DhGexSha1,
    /// diffie-hellman-group14-sha1 (RFC 4253)
    DhGroup14Sha1,
    /// diffie-hellman-group1-sha1 (RFC 4253)
    DhGroup1Sha1,
}

impl KexAlg {
    /// All key exchange algorithms in preference order. The position
    /// in this table is the algorithm's stable index.
    pub const ALL: [KexAlg; 8] = [
        KexAlg::Curve25519Sha256,
        KexAlg::EcdhNistp256,
        KexAlg::EcdhNistp384,
        KexAlg::EcdhNistp521,
        KexAlg::DhGexSha256,
        KexAlg::DhGexSha1,
        KexAlg::DhGroup14Sha1,
        KexAlg::DhGroup1Sha1,
    ];

    /// Returns the canonical SSH name.
    pub fn name(&self) -> &'static str {
        match self {
            KexAlg::Curve25519Sha256 => "curve25519-sha256",
            KexAlg::EcdhNistp256 => "ecdh-sha2-nistp256",
            KexAlg::EcdhNistp384 => "ecdh-sha2-nistp384",
            KexAlg::EcdhNistp521 => "ecdh-sha2-nistp521",
            KexAlg::DhGexSha256 => "diffie-hellman-group-exchange-sha256",
            KexAlg::DhGexSha1 => "diffie-hellman-group-exchange-sha1",
            KexAlg::DhGroup14Sha1 => "diffie-hellman-group14-sha1",
            KexAlg::DhGroup1Sha1 => "diffie-hellman-group1-sha1",
        }
    }

    /// Parses an algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|alg| alg.name() == name)
    }

    /// Returns true for the group-exchange variants, which negotiate
    /// the DH group before the exchange proper.
    pub fn is_group_exchange(&self) -> bool {
        matches!(self, KexAlg::DhGexSha256 | KexAlg::DhGexSha1)
    }
}

/// Host key (server authentication) algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyAlg {
    /// ssh-ed25519
    SshEd25519,
    /// ecdsa-sha2-nistp256
    EcdsaP256,
    /// ecdsa-sha2-nistp384
    EcdsaP384,
    /// ecdsa-sha2-nistp521
    EcdsaP521,
    /// ssh-rsa (RSA with SHA-1)
    SshRsa,
}

impl HostKeyAlg {
    /// All host key algorithms in preference order.
    pub const ALL: [HostKeyAlg; 5] = [
        HostKeyAlg::SshEd25519,
        HostKeyAlg::EcdsaP256,
        HostKeyAlg::EcdsaP384,
        HostKeyAlg::EcdsaP521,
        HostKeyAlg::SshRsa,
    ];

    /// Returns the canonical SSH name.
    pub fn name(&self) -> &'static str {
        match self {
            HostKeyAlg::SshEd25519 => "ssh-ed25519",
            HostKeyAlg::EcdsaP256 => "ecdsa-sha2-nistp256",
            HostKeyAlg::EcdsaP384 => "ecdsa-sha2-nistp384",
            HostKeyAlg::EcdsaP521 => "ecdsa-sha2-nistp521",
            HostKeyAlg::SshRsa => "ssh-rsa",
        }
    }

    /// Parses an algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|alg| alg.name() == name)
    }
}

/// Symmetric cipher algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlg {
    /// aes128-ctr
    Aes128Ctr,
    /// aes256-ctr
    Aes256Ctr,
    /// aes128-cbc
    Aes128Cbc,
    /// aes256-cbc
    Aes256Cbc,
}

impl CipherAlg {
    /// All cipher algorithms in preference order.
    pub const ALL: [CipherAlg; 4] = [
        CipherAlg::Aes128Ctr,
        CipherAlg::Aes256Ctr,
        CipherAlg::Aes128Cbc,
        CipherAlg::Aes256Cbc,
    ];

    /// Returns the canonical SSH name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherAlg::Aes128Ctr => "aes128-ctr",
            CipherAlg::Aes256Ctr => "aes256-ctr",
            CipherAlg::Aes128Cbc => "aes128-cbc",
            CipherAlg::Aes256Cbc => "aes256-cbc",
        }
    }

    /// Parses an algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|alg| alg.name() == name)
    }

    /// Returns the cipher block size in bytes.
    pub fn block_size(&self) -> usize {
        16
    }

    /// Returns the key size in bytes.
    pub fn key_size(&self) -> usize {
        match self {
            CipherAlg::Aes128Ctr | CipherAlg::Aes128Cbc => 16,
            CipherAlg::Aes256Ctr | CipherAlg::Aes256Cbc => 32,
        }
    }

    /// Returns the IV size in bytes.
    pub fn iv_size(&self) -> usize {
        16
    }

    /// Constructs an initialized encryption state.
    pub fn encryptor(&self, key: &[u8], iv: &[u8]) -> HawserResult<CipherState> {
        self.check_material(key, iv)?;
        let key = &key[..self.key_size()];
        let iv = &iv[..self.iv_size()];
        Ok(match self {
            CipherAlg::Aes128Ctr => {
                CipherState::Ctr128(Aes128Ctr::new_from_slices(key, iv).map_err(bad_material)?)
            }
            CipherAlg::Aes256Ctr => {
                CipherState::Ctr256(Aes256Ctr::new_from_slices(key, iv).map_err(bad_material)?)
            }
            CipherAlg::Aes128Cbc => CipherState::Cbc128Enc(
                Aes128CbcEnc::new_from_slices(key, iv).map_err(bad_material)?,
            ),
            CipherAlg::Aes256Cbc => CipherState::Cbc256Enc(
                Aes256CbcEnc::new_from_slices(key, iv).map_err(bad_material)?,
            ),
        })
    }

    /// Constructs an initialized decryption state.
    pub fn decryptor(&self, key: &[u8], iv: &[u8]) -> HawserResult<CipherState> {
        self.check_material(key, iv)?;
        let key = &key[..self.key_size()];
        let iv = &iv[..self.iv_size()];
        Ok(match self {
            CipherAlg::Aes128Ctr => {
                CipherState::Ctr128(Aes128Ctr::new_from_slices(key, iv).map_err(bad_material)?)
            }
            CipherAlg::Aes256Ctr => {
                CipherState::Ctr256(Aes256Ctr::new_from_slices(key, iv).map_err(bad_material)?)
            }
            CipherAlg::Aes128Cbc => CipherState::Cbc128Dec(
                Aes128CbcDec::new_from_slices(key, iv).map_err(bad_material)?,
            ),
            CipherAlg::Aes256Cbc => CipherState::Cbc256Dec(
                Aes256CbcDec::new_from_slices(key, iv).map_err(bad_material)?,
            ),
        })
    }

    fn check_material(&self, key: &[u8], iv: &[u8]) -> HawserResult<()> {
        if key.len() < self.key_size() || iv.len() < self.iv_size() {
            return Err(HawserError::Security(format!(
                "Insufficient key material for {}: key {} IV {}",
                self.name(),
                key.len(),
                iv.len()
            )));
        }
        Ok(())
    }
}

fn bad_material<E: std::fmt::Debug>(_: E) -> HawserError {
    HawserError::Security("Invalid cipher key material".to_string())
}

/// An initialized cipher primitive for one direction of one connection.
///
/// CTR states serve both directions; CBC states are direction-specific.
/// Both keep their chaining/counter state across packets, as RFC 4253
/// requires.
pub enum CipherState {
    /// AES-128 in CTR mode.
    Ctr128(Aes128Ctr),
    /// AES-256 in CTR mode.
    Ctr256(Aes256Ctr),
    /// AES-128-CBC encryption.
    Cbc128Enc(Aes128CbcEnc),
    /// AES-128-CBC decryption.
    Cbc128Dec(Aes128CbcDec),
    /// AES-256-CBC encryption.
    Cbc256Enc(Aes256CbcEnc),
    /// AES-256-CBC decryption.
    Cbc256Dec(Aes256CbcDec),
}

impl CipherState {
    /// Transforms `data` in place. `data` must be a whole number of
    /// cipher blocks.
    pub fn apply(&mut self, data: &mut [u8]) -> HawserResult<()> {
        if data.len() % 16 != 0 {
            return Err(HawserError::Protocol(format!(
                "Cipher input not block aligned: {} bytes",
                data.len()
            )));
        }
        match self {
            CipherState::Ctr128(state) => state.apply_keystream(data),
            CipherState::Ctr256(state) => state.apply_keystream(data),
            CipherState::Cbc128Enc(state) => {
                for block in data.chunks_exact_mut(16) {
                    state.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            CipherState::Cbc128Dec(state) => {
                for block in data.chunks_exact_mut(16) {
                    state.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            CipherState::Cbc256Enc(state) => {
                for block in data.chunks_exact_mut(16) {
                    state.encrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
            CipherState::Cbc256Dec(state) => {
                for block in data.chunks_exact_mut(16) {
                    state.decrypt_block_mut(GenericArray::from_mut_slice(block));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for CipherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CipherState::Ctr128(_) => "aes128-ctr",
            CipherState::Ctr256(_) => "aes256-ctr",
            CipherState::Cbc128Enc(_) | CipherState::Cbc128Dec(_) => "aes128-cbc",
            CipherState::Cbc256Enc(_) | CipherState::Cbc256Dec(_) => "aes256-cbc",
        };
        f.debug_struct("CipherState")
            .field("algorithm", &name)
            .field("state", &"<redacted>")
            .finish()
    }
}

/// MAC algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlg {
    /// hmac-sha2-256
    HmacSha2_256,
    /// hmac-sha2-512
    HmacSha2_512,
    /// hmac-sha1
    HmacSha1,
}

impl MacAlg {
    /// All MAC algorithms in preference order.
    pub const ALL: [MacAlg; 3] = [MacAlg::HmacSha2_256, MacAlg::HmacSha2_512, MacAlg::HmacSha1];

    /// Returns the canonical SSH name.
    pub fn name(&self) -> &'static str {
        match self {
            MacAlg::HmacSha2_256 => "hmac-sha2-256",
            MacAlg::HmacSha2_512 => "hmac-sha2-512",
            MacAlg::HmacSha1 => "hmac-sha1",
        }
    }

    /// Parses an algorithm from its SSH name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|alg| alg.name() == name)
    }

    /// Returns the MAC key size in bytes.
    pub fn key_size(&self) -> usize {
        self.mac_size()
    }

    /// Returns the MAC output size in bytes.
    pub fn mac_size(&self) -> usize {
        match self {
            MacAlg::HmacSha2_256 => 32,
            MacAlg::HmacSha2_512 => 64,
            MacAlg::HmacSha1 => 20,
        }
    }

    /// Constructs an initialized MAC state.
    pub fn state(&self, key_material: &[u8]) -> HawserResult<MacState> {
        if key_material.len() < self.key_size() {
            return Err(HawserError::Security(format!(
                "Insufficient key material for {}: expected {}, got {}",
                self.name(),
                self.key_size(),
                key_material.len()
            )));
        }
        Ok(MacState {
            algorithm: *self,
            key: key_material[..self.key_size()].to_vec(),
        })
    }
}

/// An initialized MAC primitive for one direction of one connection.
pub struct MacState {
    algorithm: MacAlg,
    key: Vec<u8>,
}

impl MacState {
    /// Returns the algorithm.
    pub fn algorithm(&self) -> MacAlg {
        self.algorithm
    }

    /// Computes the MAC over `sequence_number || packet`.
    pub fn compute(&self, sequence_number: u32, packet: &[u8]) -> Vec<u8> {
        match self.algorithm {
            MacAlg::HmacSha2_256 => {
                let mut mac =
                    Hmac::<Sha256>::new_from_slice(&self.key).expect("HMAC key size is valid");
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            MacAlg::HmacSha2_512 => {
                let mut mac =
                    Hmac::<Sha512>::new_from_slice(&self.key).expect("HMAC key size is valid");
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
            MacAlg::HmacSha1 => {
                let mut mac =
                    Hmac::<Sha1>::new_from_slice(&self.key).expect("HMAC key size is valid");
                mac.update(&sequence_number.to_be_bytes());
                mac.update(packet);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    /// Verifies a received MAC in constant time.
    pub fn verify(&self, sequence_number: u32, packet: &[u8], received: &[u8]) -> HawserResult<()> {
        let computed = self.compute(sequence_number, packet);
        if computed.len() != received.len() {
            return Err(HawserError::Security("MAC length mismatch".to_string()));
        }
        if computed.ct_eq(received).into() {
            Ok(())
        } else {
            Err(HawserError::Security("MAC verification failed".to_string()))
        }
    }
}

impl std::fmt::Debug for MacState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacState")
            .field("algorithm", &self.algorithm)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl Drop for MacState {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// The set of algorithms a session offers, per class, in preference
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedAlgorithms {
    /// Key exchange algorithms.
    pub kex: Vec<KexAlg>,
    /// Host key algorithms.
    pub host_keys: Vec<HostKeyAlg>,
    /// Cipher algorithms (offered for both directions).
    pub ciphers: Vec<CipherAlg>,
    /// MAC algorithms (offered for both directions).
    pub macs: Vec<MacAlg>,
}

impl Default for SupportedAlgorithms {
    fn default() -> Self {
        Self {
            kex: KexAlg::ALL.to_vec(),
            host_keys: HostKeyAlg::ALL.to_vec(),
            ciphers: CipherAlg::ALL.to_vec(),
            macs: MacAlg::ALL.to_vec(),
        }
    }
}

impl SupportedAlgorithms {
    /// Restricts the key exchange offer.
    pub fn with_kex(mut self, kex: &[KexAlg]) -> Self {
        self.kex = kex.to_vec();
        self
    }

    /// Restricts the host key offer.
    pub fn with_host_keys(mut self, host_keys: &[HostKeyAlg]) -> Self {
        self.host_keys = host_keys.to_vec();
        self
    }

    /// Restricts the cipher offer.
    pub fn with_ciphers(mut self, ciphers: &[CipherAlg]) -> Self {
        self.ciphers = ciphers.to_vec();
        self
    }

    /// Restricts the MAC offer.
    pub fn with_macs(mut self, macs: &[MacAlg]) -> Self {
        self.macs = macs.to_vec();
        self
    }

    /// Returns the kex names in preference order.
    pub fn kex_names(&self) -> Vec<String> {
        self.kex.iter().map(|a| a.name().to_string()).collect()
    }

    /// Returns the host key names in preference order.
    pub fn host_key_names(&self) -> Vec<String> {
        self.host_keys.iter().map(|a| a.name().to_string()).collect()
    }

    /// Returns the cipher names in preference order.
    pub fn cipher_names(&self) -> Vec<String> {
        self.ciphers.iter().map(|a| a.name().to_string()).collect()
    }

    /// Returns the MAC names in preference order.
    pub fn mac_names(&self) -> Vec<String> {
        self.macs.iter().map(|a| a.name().to_string()).collect()
    }
}

/// The outcome of algorithm negotiation: one concrete algorithm per
/// class and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedSuite {
    /// Key exchange algorithm.
    pub kex: KexAlg,
    /// Host key algorithm.
    pub host_key: HostKeyAlg,
    /// Cipher, client to server.
    pub cipher_c2s: CipherAlg,
    /// Cipher, server to client.
    pub cipher_s2c: CipherAlg,
    /// MAC, client to server.
    pub mac_c2s: MacAlg,
    /// MAC, server to client.
    pub mac_s2c: MacAlg,
}

/// Negotiates one algorithm: the first client-preferred name that the
/// server also offers (RFC 4253 Section 7.1).
pub fn negotiate_name(client_list: &[String], server_list: &[String]) -> HawserResult<String> {
    for client_alg in client_list {
        if server_list.contains(client_alg) {
            return Ok(client_alg.clone());
        }
    }

    Err(HawserError::Protocol(format!(
        "No common algorithm: client={:?}, server={:?}",
        client_list, server_list
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_indices() {
        assert_eq!(KexAlg::ALL[0], KexAlg::Curve25519Sha256);
        assert_eq!(KexAlg::ALL[7], KexAlg::DhGroup1Sha1);
        assert_eq!(HostKeyAlg::ALL.len(), 5);
        assert_eq!(CipherAlg::ALL.len(), 4);
        assert_eq!(MacAlg::ALL.len(), 3);
    }

    #[test]
    fn test_name_round_trip() {
        for alg in KexAlg::ALL {
            assert_eq!(KexAlg::from_name(alg.name()), Some(alg));
        }
        for alg in HostKeyAlg::ALL {
            assert_eq!(HostKeyAlg::from_name(alg.name()), Some(alg));
        }
        for alg in CipherAlg::ALL {
            assert_eq!(CipherAlg::from_name(alg.name()), Some(alg));
        }
        for alg in MacAlg::ALL {
            assert_eq!(MacAlg::from_name(alg.name()), Some(alg));
        }
        assert_eq!(KexAlg::from_name("rot13"), None);
    }

    #[test]
    fn test_cipher_sizes() {
        assert_eq!(CipherAlg::Aes128Ctr.key_size(), 16);
        assert_eq!(CipherAlg::Aes256Cbc.key_size(), 32);
        for alg in CipherAlg::ALL {
            assert_eq!(alg.block_size(), 16);
            assert_eq!(alg.iv_size(), 16);
        }
    }

    #[test]
    fn test_mac_sizes() {
        assert_eq!(MacAlg::HmacSha2_256.mac_size(), 32);
        assert_eq!(MacAlg::HmacSha2_512.mac_size(), 64);
        assert_eq!(MacAlg::HmacSha1.mac_size(), 20);
    }

    #[test]
    fn test_ctr_round_trip() {
        let key = [7u8; 32];
        let iv = [9u8; 16];
        let mut enc = CipherAlg::Aes256Ctr.encryptor(&key, &iv).unwrap();
        let mut dec = CipherAlg::Aes256Ctr.decryptor(&key, &iv).unwrap();

        let mut data = [0x55u8; 64];
        enc.apply(&mut data).unwrap();
        assert_ne!(data, [0x55u8; 64]);
        dec.apply(&mut data).unwrap();
        assert_eq!(data, [0x55u8; 64]);
    }

    #[test]
    fn test_cbc_round_trip_is_stateful() {
        let key = [3u8; 16];
        let iv = [1u8; 16];
        let mut enc = CipherAlg::Aes128Cbc.encryptor(&key, &iv).unwrap();
        let mut dec = CipherAlg::Aes128Cbc.decryptor(&key, &iv).unwrap();

        // Two sequential packets must chain across calls.
        let mut first = [0xA0u8; 32];
        let mut second = [0xB0u8; 32];
        enc.apply(&mut first).unwrap();
        enc.apply(&mut second).unwrap();

        dec.apply(&mut first).unwrap();
        dec.apply(&mut second).unwrap();
        assert_eq!(first, [0xA0u8; 32]);
        assert_eq!(second, [0xB0u8; 32]);
    }

    #[test]
    fn test_cipher_rejects_unaligned_input() {
        let mut enc = CipherAlg::Aes128Ctr.encryptor(&[0u8; 16], &[0u8; 16]).unwrap();
        let mut data = [0u8; 15];
        assert!(enc.apply(&mut data).is_err());
    }

    #[test]
    fn test_mac_compute_and_verify() {
        let mac = MacAlg::HmacSha2_256.state(&[0x11u8; 32]).unwrap();
        let tag = mac.compute(7, b"payload");
        assert_eq!(tag.len(), 32);

        assert!(mac.verify(7, b"payload", &tag).is_ok());
        assert!(mac.verify(8, b"payload", &tag).is_err());
        assert!(mac.verify(7, b"payloax", &tag).is_err());
    }

    #[test]
    fn test_mac_key_too_short() {
        assert!(MacAlg::HmacSha2_512.state(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_negotiate_name_prefers_client_order() {
        let client = vec!["aes256-ctr".to_string(), "aes128-ctr".to_string()];
        let server = vec!["aes128-ctr".to_string(), "aes256-ctr".to_string()];
        assert_eq!(negotiate_name(&client, &server).unwrap(), "aes256-ctr");
    }

    #[test]
    fn test_negotiate_name_no_match() {
        let client = vec!["aes256-ctr".to_string()];
        let server = vec!["aes128-cbc".to_string()];
        assert!(negotiate_name(&client, &server).is_err());
    }

    #[test]
    fn test_supported_restriction() {
        let algorithms = SupportedAlgorithms::default()
            .with_kex(&[KexAlg::DhGroup14Sha1])
            .with_macs(&[MacAlg::HmacSha1]);
        assert_eq!(algorithms.kex_names(), vec!["diffie-hellman-group14-sha1"]);
        assert_eq!(algorithms.mac_names(), vec!["hmac-sha1"]);
        assert_eq!(algorithms.ciphers.len(), CipherAlg::ALL.len());
    }
}
