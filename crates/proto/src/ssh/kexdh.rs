//! Key exchange engines (RFC 4253 Section 8, RFC 4419, RFC 5656, RFC 8731).
//!
//! This module holds the cryptographic half of key exchange:
//!
//! - [`Curve25519Exchange`] - curve25519-sha256
//! - [`EcdhExchange`] - ecdh-sha2-nistp256/384/521
//! - [`DhExchange`] - fixed-group DH (group1, group14) and the groups
//!   negotiated by group exchange
//! - [`KexHash`] - the hash each kex algorithm binds to
//! - [`ExchangeHash`] - the canonical transcript for H
//! - [`derive_keys`] - IV/key/MAC-key derivation from K and H
//!
//! The message shapes live in [`crate::ssh::kex`]; the drivers that
//! send and receive them live in [`crate::ssh::handshake`].
//!
//! # Security
//!
//! - DH peer publics are validated to lie in (1, p-1)
//! - Ephemeral DH secrets are zeroized on drop
//! - Curve25519 is delegated to ring's constant-time X25519

use crate::ssh::algorithm::KexAlg;
use crate::ssh::codec;
use bytes::{BufMut, BytesMut};
use hawser_platform::{HawserError, HawserResult};
use num_bigint::{BigUint, RandBigInt};
use once_cell::sync::Lazy;
use ring::agreement::{agree_ephemeral, EphemeralPrivateKey, UnparsedPublicKey, X25519};
use ring::rand::SystemRandom;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroize;

/// Minimum group size accepted for group exchange, in bits (RFC 4419).
pub const GEX_MIN_BITS: u32 = 1024;

/// Maximum group size accepted for group exchange, in bits.
pub const GEX_MAX_BITS: u32 = 8192;

/// Oakley Group 2 prime (1024-bit MODP, RFC 2409 Section 6.2), used by
/// diffie-hellman-group1-sha1.
static GROUP1_P: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(
        b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
          020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
          4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
          EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF",
        16,
    )
    .expect("valid group1 prime")
});

/// Group 14 prime (2048-bit MODP, RFC 3526 Section 3), used by
/// diffie-hellman-group14-sha1 and as the answer to group exchange.
static GROUP14_P: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(
        b"FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
          020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
          4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
          EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
          98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
          9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
          E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
          3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
        16,
    )
    .expect("valid group14 prime")
});

static GENERATOR: Lazy<BigUint> = Lazy::new(|| BigUint::from(2u32));

/// The hash algorithm a kex method binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexHash {
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl KexHash {
    /// Returns the hash bound to a kex algorithm.
    pub fn for_kex(kex: KexAlg) -> Self {
        match kex {
            KexAlg::Curve25519Sha256 | KexAlg::EcdhNistp256 | KexAlg::DhGexSha256 => KexHash::Sha256,
            KexAlg::EcdhNistp384 => KexHash::Sha384,
            KexAlg::EcdhNistp521 => KexHash::Sha512,
            KexAlg::DhGexSha1 | KexAlg::DhGroup14Sha1 | KexAlg::DhGroup1Sha1 => KexHash::Sha1,
        }
    }

    /// Returns the digest size in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            KexHash::Sha1 => 20,
            KexHash::Sha256 => 32,
            KexHash::Sha384 => 48,
            KexHash::Sha512 => 64,
        }
    }

    /// Hashes one buffer.
    pub fn hash(&self, data: &[u8]) -> Vec<u8> {
        match self {
            KexHash::Sha1 => Sha1::digest(data).to_vec(),
            KexHash::Sha256 => Sha256::digest(data).to_vec(),
            KexHash::Sha384 => Sha384::digest(data).to_vec(),
            KexHash::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Group-exchange parameters entering the transcript (RFC 4419 §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GexParams {
    /// Minimum acceptable group size, bits.
    pub min: u32,
    /// Preferred group size, bits.
    pub preferred: u32,
    /// Maximum acceptable group size, bits.
    pub max: u32,
    /// Group prime p (unsigned big-endian).
    pub prime: Vec<u8>,
    /// Generator g (unsigned big-endian).
    pub generator: Vec<u8>,
}

/// Wire encoding of the ephemeral publics in the transcript: classic
/// DH uses mpints (e, f), ECDH and curve25519 use strings (Q_C, Q_S).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicEncoding {
    /// mpint publics (finite-field DH, including group exchange).
    Mpint,
    /// string publics (ECDH, curve25519).
    String,
}

impl PublicEncoding {
    /// Returns the encoding used by a kex algorithm.
    pub fn for_kex(kex: KexAlg) -> Self {
        match kex {
            KexAlg::Curve25519Sha256
            | KexAlg::EcdhNistp256
            | KexAlg::EcdhNistp384
            | KexAlg::EcdhNistp521 => PublicEncoding::String,
            KexAlg::DhGexSha256 | KexAlg::DhGexSha1 | KexAlg::DhGroup14Sha1 | KexAlg::DhGroup1Sha1 => {
                PublicEncoding::Mpint
            }
        }
    }
}

/// The canonical key-exchange transcript hashed into H.
///
/// `H = HASH(V_C || V_S || I_C || I_S || K_S [|| min || n || max || p
/// || g] || e/Q_C || f/Q_S || K)` where the bracketed fields appear
/// only for group exchange.
#[derive(Debug, Clone)]
pub struct ExchangeHash {
    /// Client identification line (no CR LF).
    pub client_version: String,
    /// Server identification line (no CR LF).
    pub server_version: String,
    /// Client KEXINIT payload.
    pub client_kexinit: Vec<u8>,
    /// Server KEXINIT payload.
    pub server_kexinit: Vec<u8>,
    /// Server host key blob K_S.
    pub host_key_blob: Vec<u8>,
    /// Group exchange fields, when the method negotiated a group.
    pub gex: Option<GexParams>,
    /// How the ephemeral publics are encoded.
    pub public_encoding: PublicEncoding,
    /// Client ephemeral public (e or Q_C).
    pub client_public: Vec<u8>,
    /// Server ephemeral public (f or Q_S).
    pub server_public: Vec<u8>,
    /// Shared secret K (unsigned big-endian; mpint-encoded in the hash).
    pub shared_secret: Vec<u8>,
}

impl ExchangeHash {
    /// Computes H under the given hash.
    pub fn compute(&self, hash: KexHash) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec::write_string(&mut buf, &self.client_version);
        codec::write_string(&mut buf, &self.server_version);
        codec::write_bytes(&mut buf, &self.client_kexinit);
        codec::write_bytes(&mut buf, &self.server_kexinit);
        codec::write_bytes(&mut buf, &self.host_key_blob);
        if let Some(gex) = &self.gex {
            buf.put_u32(gex.min);
            buf.put_u32(gex.preferred);
            buf.put_u32(gex.max);
            codec::write_mpint(&mut buf, &gex.prime);
            codec::write_mpint(&mut buf, &gex.generator);
        }
        match self.public_encoding {
            PublicEncoding::Mpint => {
                codec::write_mpint(&mut buf, &self.client_public);
                codec::write_mpint(&mut buf, &self.server_public);
            }
            PublicEncoding::String => {
                codec::write_bytes(&mut buf, &self.client_public);
                codec::write_bytes(&mut buf, &self.server_public);
            }
        }
        codec::write_mpint(&mut buf, &self.shared_secret);
        hash.hash(&buf)
    }
}

/// Curve25519 ephemeral exchange (RFC 8731).
pub struct Curve25519Exchange {
    private_key: EphemeralPrivateKey,
    public_key: [u8; 32],
}

impl Curve25519Exchange {
    /// Generates a new ephemeral key pair.
    pub fn new() -> HawserResult<Self> {
        let rng = SystemRandom::new();
        let private_key = EphemeralPrivateKey::generate(&X25519, &rng)
            .map_err(|_| HawserError::Security("Failed to generate Curve25519 key".to_string()))?;

        let public_key = private_key.compute_public_key().map_err(|_| {
            HawserError::Security("Failed to compute Curve25519 public key".to_string())
        })?;

        let mut public_key_bytes = [0u8; 32];
        public_key_bytes.copy_from_slice(public_key.as_ref());

        Ok(Self {
            private_key,
            public_key: public_key_bytes,
        })
    }

    /// Returns the 32-byte public key.
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    /// Computes the shared secret, consuming the ephemeral key.
    pub fn compute_shared_secret(self, peer_public: &[u8]) -> HawserResult<Vec<u8>> {
        if peer_public.len() != 32 {
            return Err(HawserError::Protocol(format!(
                "Invalid Curve25519 public key length: expected 32, got {}",
                peer_public.len()
            )));
        }
        let peer_public_key = UnparsedPublicKey::new(&X25519, peer_public);

        agree_ephemeral(self.private_key, &peer_public_key, |key_material| {
            key_material.to_vec()
        })
        .map_err(|_| HawserError::Security("Curve25519 key agreement failed".to_string()))
    }
}

/// NIST-curve ECDH ephemeral exchange (RFC 5656).
pub enum EcdhExchange {
    /// ecdh-sha2-nistp256
    P256(p256::ecdh::EphemeralSecret),
    /// ecdh-sha2-nistp384
    P384(p384::ecdh::EphemeralSecret),
    /// ecdh-sha2-nistp521
    P521(p521::ecdh::EphemeralSecret),
}

impl EcdhExchange {
    /// Generates an ephemeral key pair for the curve bound to `kex`.
    pub fn new(kex: KexAlg) -> HawserResult<Self> {
        let mut rng = rand::thread_rng();
        match kex {
            KexAlg::EcdhNistp256 => Ok(Self::P256(p256::ecdh::EphemeralSecret::random(&mut rng))),
            KexAlg::EcdhNistp384 => Ok(Self::P384(p384::ecdh::EphemeralSecret::random(&mut rng))),
            KexAlg::EcdhNistp521 => Ok(Self::P521(p521::ecdh::EphemeralSecret::random(&mut rng))),
            other => Err(HawserError::Protocol(format!(
                "Not an ECDH algorithm: {}",
                other.name()
            ))),
        }
    }

    /// Returns the uncompressed SEC1 public point.
    pub fn public_key(&self) -> Vec<u8> {
        match self {
            Self::P256(secret) => p256::EncodedPoint::from(secret.public_key())
                .as_bytes()
                .to_vec(),
            Self::P384(secret) => p384::EncodedPoint::from(secret.public_key())
                .as_bytes()
                .to_vec(),
            Self::P521(secret) => p521::EncodedPoint::from(secret.public_key())
                .as_bytes()
                .to_vec(),
        }
    }

    /// Computes the shared secret, consuming the ephemeral key.
    pub fn compute_shared_secret(self, peer_public: &[u8]) -> HawserResult<Vec<u8>> {
        match self {
            Self::P256(secret) => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| bad_peer_point("nistp256"))?;
                Ok(secret.diffie_hellman(&peer).raw_secret_bytes().to_vec())
            }
            Self::P384(secret) => {
                let peer = p384::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| bad_peer_point("nistp384"))?;
                Ok(secret.diffie_hellman(&peer).raw_secret_bytes().to_vec())
            }
            Self::P521(secret) => {
                let peer = p521::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| bad_peer_point("nistp521"))?;
                Ok(secret.diffie_hellman(&peer).raw_secret_bytes().to_vec())
            }
        }
    }
}

fn bad_peer_point(curve: &str) -> HawserError {
    HawserError::Protocol(format!("Invalid {} peer public key", curve))
}

/// Finite-field Diffie-Hellman exchange over a MODP group.
pub struct DhExchange {
    prime: BigUint,
    generator: BigUint,
    private_key: BigUint,
    public_key: Vec<u8>,
}

impl DhExchange {
    /// Creates an exchange over the group bound to a fixed-group kex
    /// algorithm.
    pub fn for_kex(kex: KexAlg) -> HawserResult<Self> {
        match kex {
            KexAlg::DhGroup1Sha1 => Ok(Self::from_group(GROUP1_P.clone(), GENERATOR.clone())),
            KexAlg::DhGroup14Sha1 => Ok(Self::from_group(GROUP14_P.clone(), GENERATOR.clone())),
            other => Err(HawserError::Protocol(format!(
                "Not a fixed-group DH algorithm: {}",
                other.name()
            ))),
        }
    }

    /// Creates an exchange over a group received from the peer
    /// (group exchange, client side).
    pub fn from_group_bytes(prime: &[u8], generator: &[u8]) -> HawserResult<Self> {
        let p = BigUint::from_bytes_be(prime);
        let g = BigUint::from_bytes_be(generator);
        let bits = p.bits() as u32;
        if !(GEX_MIN_BITS..=GEX_MAX_BITS).contains(&bits) {
            return Err(HawserError::Protocol(format!(
                "DH group size {} bits outside [{}, {}]",
                bits, GEX_MIN_BITS, GEX_MAX_BITS
            )));
        }
        Ok(Self::from_group(p, g))
    }

    /// Chooses a group answering a group-exchange request
    /// (server side). The RFC 3526 2048-bit group serves any request
    /// whose window includes it.
    pub fn for_gex_request(min: u32, preferred: u32, max: u32) -> HawserResult<Self> {
        if min > max || preferred < min || preferred > max {
            return Err(HawserError::Protocol(format!(
                "Inconsistent group exchange request: min {} preferred {} max {}",
                min, preferred, max
            )));
        }
        if max < GEX_MIN_BITS || min > GEX_MAX_BITS {
            return Err(HawserError::Protocol(format!(
                "Group exchange window [{}, {}] unsatisfiable",
                min, max
            )));
        }
        Ok(Self::from_group(GROUP14_P.clone(), GENERATOR.clone()))
    }

    fn from_group(prime: BigUint, generator: BigUint) -> Self {
        let mut rng = rand::thread_rng();
        let p_minus_one = &prime - 1u32;
        let x = rng.gen_biguint_range(&BigUint::from(2u32), &p_minus_one);
        let y = generator.modpow(&x, &prime);

        Self {
            prime,
            generator,
            private_key: x,
            public_key: y.to_bytes_be(),
        }
    }

    /// Returns the public value (unsigned big-endian).
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Returns the group prime (unsigned big-endian).
    pub fn prime_bytes(&self) -> Vec<u8> {
        self.prime.to_bytes_be()
    }

    /// Returns the generator (unsigned big-endian).
    pub fn generator_bytes(&self) -> Vec<u8> {
        self.generator.to_bytes_be()
    }

    /// Computes the shared secret given the peer's public value.
    ///
    /// # Errors
    ///
    /// Returns [`HawserError::Protocol`] if the peer public lies
    /// outside (1, p-1).
    pub fn compute_shared_secret(&self, peer_public: &[u8]) -> HawserResult<Vec<u8>> {
        let y_peer = BigUint::from_bytes_be(peer_public);

        if y_peer <= BigUint::from(1u32) || y_peer >= self.prime {
            return Err(HawserError::Protocol(
                "Invalid peer public key: out of range".to_string(),
            ));
        }

        let k = y_peer.modpow(&self.private_key, &self.prime);
        Ok(k.to_bytes_be())
    }
}

impl Drop for DhExchange {
    fn drop(&mut self) {
        // BigUint has no Zeroize impl; overwrite through its byte form.
        let mut bytes = std::mem::take(&mut self.private_key).to_bytes_be();
        bytes.zeroize();
    }
}

impl std::fmt::Debug for DhExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhExchange")
            .field("group_bits", &self.prime.bits())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Derives key material per RFC 4253 Section 7.2:
///
/// ```text
/// K1 = HASH(K || H || X || session_id)
/// Kn = HASH(K || H || K1 || ... || K(n-1))
/// ```
///
/// where X is one of 'A'..'F' selecting IV/key/integrity-key per
/// direction and K is mpint-encoded.
pub fn derive_keys(
    hash: KexHash,
    shared_secret: &[u8],
    exchange_hash: &[u8],
    session_id: &[u8],
    letter: u8,
    length: usize,
) -> Vec<u8> {
    let mut k_mpint = BytesMut::new();
    codec::write_mpint(&mut k_mpint, shared_secret);

    let mut first = Vec::with_capacity(k_mpint.len() + exchange_hash.len() + 1 + session_id.len());
    first.extend_from_slice(&k_mpint);
    first.extend_from_slice(exchange_hash);
    first.push(letter);
    first.extend_from_slice(session_id);

    let mut key = hash.hash(&first);
    while key.len() < length {
        let mut next = Vec::with_capacity(k_mpint.len() + exchange_hash.len() + key.len());
        next.extend_from_slice(&k_mpint);
        next.extend_from_slice(exchange_hash);
        next.extend_from_slice(&key);
        key.extend_from_slice(&hash.hash(&next));
    }

    key.truncate(length);
    key
}
