//! Host key blob handling (RFC 4253 Section 6.6).
//!
//! Verification-side counterpart of [`crate::ssh::identity`]: given a
//! public key blob and a signature blob in SSH wire form, check a
//! signature. Used by clients to authenticate servers during key
//! exchange and by servers to check publickey userauth signatures.
//!
//! Also loads persistent server host keys: PEM files named by
//! algorithm under a path prefix (`<prefix>ssh-ed25519.pem`, ...).

use crate::ssh::algorithm::HostKeyAlg;
use crate::ssh::codec;
use crate::ssh::identity::Identity;
use cipher::generic_array::GenericArray;
use ed25519_dalek::Verifier as _;
use hawser_platform::{HawserError, HawserResult};
use rsa::Pkcs1v15Sign;
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Returns the algorithm a public key blob is encoded under.
pub fn algorithm_of_blob(public_key_blob: &[u8]) -> HawserResult<HostKeyAlg> {
    let mut offset = 0;
    let name = codec::read_string(public_key_blob, &mut offset)?;
    HostKeyAlg::from_name(&name).ok_or_else(|| {
        HawserError::Protocol(format!("Unsupported host key algorithm: '{}'", name))
    })
}

/// Computes the SHA-256 fingerprint of a public key blob.
pub fn fingerprint(public_key_blob: &[u8]) -> String {
    format!("SHA256:{}", hex::encode(Sha256::digest(public_key_blob)))
}

/// Verifies an SSH signature blob against a public key blob.
///
/// Returns `Ok(false)` for a well-formed signature that does not
/// verify; malformed blobs are errors.
pub fn verify_signature(
    public_key_blob: &[u8],
    data: &[u8],
    signature_blob: &[u8],
) -> HawserResult<bool> {
    let algorithm = algorithm_of_blob(public_key_blob)?;

    let mut offset = 0;
    let signature_algorithm = codec::read_string(signature_blob, &mut offset)?;
    if signature_algorithm != algorithm.name() {
        return Err(HawserError::Protocol(format!(
            "Signature algorithm '{}' does not match key algorithm '{}'",
            signature_algorithm,
            algorithm.name()
        )));
    }
    let signature = codec::read_bytes(signature_blob, &mut offset)?;

    match algorithm {
        HostKeyAlg::SshEd25519 => verify_ed25519(public_key_blob, data, &signature),
        HostKeyAlg::SshRsa => verify_rsa(public_key_blob, data, &signature),
        HostKeyAlg::EcdsaP256 | HostKeyAlg::EcdsaP384 | HostKeyAlg::EcdsaP521 => {
            verify_ecdsa(algorithm, public_key_blob, data, &signature)
        }
    }
}

fn verify_ed25519(public_key_blob: &[u8], data: &[u8], signature: &[u8]) -> HawserResult<bool> {
    let mut offset = 0;
    let _name = codec::read_string(public_key_blob, &mut offset)?;
    let public = codec::read_bytes(public_key_blob, &mut offset)?;

    if public.len() != 32 {
        return Err(HawserError::Format(
            "Ed25519 public key must be 32 bytes".to_string(),
        ));
    }
    if signature.len() != 64 {
        return Err(HawserError::Format(
            "Ed25519 signature must be 64 bytes".to_string(),
        ));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&public);
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| HawserError::Format(format!("Invalid Ed25519 public key: {}", e)))?;

    let mut sig_bytes = [0u8; 64];
    sig_bytes.copy_from_slice(signature);
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);

    Ok(verifying_key.verify(data, &signature).is_ok())
}

fn verify_rsa(public_key_blob: &[u8], data: &[u8], signature: &[u8]) -> HawserResult<bool> {
    let mut offset = 0;
    let _name = codec::read_string(public_key_blob, &mut offset)?;
    let e = codec::read_mpint(public_key_blob, &mut offset)?;
    let n = codec::read_mpint(public_key_blob, &mut offset)?;

    let public = rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&n),
        rsa::BigUint::from_bytes_be(&e),
    )
    .map_err(|e| HawserError::Format(format!("Invalid RSA public key: {}", e)))?;

    let digest = Sha1::digest(data);
    Ok(public
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, signature)
        .is_ok())
}

fn verify_ecdsa(
    algorithm: HostKeyAlg,
    public_key_blob: &[u8],
    data: &[u8],
    signature: &[u8],
) -> HawserResult<bool> {
    let mut offset = 0;
    let _name = codec::read_string(public_key_blob, &mut offset)?;
    let _curve = codec::read_string(public_key_blob, &mut offset)?;
    let point = codec::read_bytes(public_key_blob, &mut offset)?;

    // The signature body is `mpint r || mpint s`.
    let mut sig_offset = 0;
    let r = codec::read_mpint(signature, &mut sig_offset)?;
    let s = codec::read_mpint(signature, &mut sig_offset)?;

    match algorithm {
        HostKeyAlg::EcdsaP256 => {
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| bad_point("nistp256"))?;
            let r_bytes: p256::FieldBytes =
                GenericArray::clone_from_slice(&pad_scalar(&r, 32)?);
            let s_bytes: p256::FieldBytes =
                GenericArray::clone_from_slice(&pad_scalar(&s, 32)?);
            let sig = p256::ecdsa::Signature::from_scalars(r_bytes, s_bytes)
                .map_err(|_| bad_signature("nistp256"))?;
            use p256::ecdsa::signature::Verifier;
            Ok(key.verify(data, &sig).is_ok())
        }
        HostKeyAlg::EcdsaP384 => {
            let key = p384::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| bad_point("nistp384"))?;
            let r_bytes: p384::FieldBytes =
                GenericArray::clone_from_slice(&pad_scalar(&r, 48)?);
            let s_bytes: p384::FieldBytes =
                GenericArray::clone_from_slice(&pad_scalar(&s, 48)?);
            let sig = p384::ecdsa::Signature::from_scalars(r_bytes, s_bytes)
                .map_err(|_| bad_signature("nistp384"))?;
            use p384::ecdsa::signature::Verifier;
            Ok(key.verify(data, &sig).is_ok())
        }
        HostKeyAlg::EcdsaP521 => {
            let key = p521::ecdsa::VerifyingKey::from_sec1_bytes(&point)
                .map_err(|_| bad_point("nistp521"))?;
            let r_bytes: p521::FieldBytes =
                GenericArray::clone_from_slice(&pad_scalar(&r, 66)?);
            let s_bytes: p521::FieldBytes =
                GenericArray::clone_from_slice(&pad_scalar(&s, 66)?);
            let sig = p521::ecdsa::Signature::from_scalars(r_bytes, s_bytes)
                .map_err(|_| bad_signature("nistp521"))?;
            use p521::ecdsa::signature::Verifier;
            Ok(key.verify(data, &sig).is_ok())
        }
        _ => Err(HawserError::Protocol(format!(
            "Not an ECDSA algorithm: {}",
            algorithm.name()
        ))),
    }
}

fn pad_scalar(bytes: &[u8], width: usize) -> HawserResult<Vec<u8>> {
    if bytes.len() > width {
        return Err(HawserError::Format(format!(
            "ECDSA scalar of {} bytes exceeds field width {}",
            bytes.len(),
            width
        )));
    }
    let mut padded = vec![0u8; width - bytes.len()];
    padded.extend_from_slice(bytes);
    Ok(padded)
}

fn bad_point(curve: &str) -> HawserError {
    HawserError::Format(format!("Invalid {} public point", curve))
}

fn bad_signature(curve: &str) -> HawserError {
    HawserError::Format(format!("Invalid {} signature scalars", curve))
}

/// Returns the on-disk path of a host key for one algorithm:
/// `<prefix><algorithm-name>.pem`.
pub fn host_key_path(prefix: &str, algorithm: HostKeyAlg) -> std::path::PathBuf {
    std::path::PathBuf::from(format!("{}{}.pem", prefix, algorithm.name()))
}

/// Loads every host key present under a path prefix.
///
/// Missing files are skipped; unreadable or malformed files are
/// errors. At least one key must be found.
pub fn load_host_keys(prefix: &str) -> HawserResult<Vec<Identity>> {
    let mut keys = Vec::new();
    for algorithm in HostKeyAlg::ALL {
        let path = host_key_path(prefix, algorithm);
        if !path.exists() {
            continue;
        }
        keys.push(Identity::from_file(&path, None)?);
    }

    if keys.is_empty() {
        return Err(HawserError::Config(format!(
            "No host keys found under prefix '{}'",
            prefix
        )));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_of_blob() {
        let identity = Identity::generate(HostKeyAlg::SshEd25519).unwrap();
        assert_eq!(
            algorithm_of_blob(&identity.public_key_blob()).unwrap(),
            HostKeyAlg::SshEd25519
        );
    }

    #[test]
    fn test_algorithm_of_blob_unknown() {
        let mut blob = bytes::BytesMut::new();
        codec::write_string(&mut blob, "ssh-dss");
        assert!(algorithm_of_blob(&blob).is_err());
    }

    #[test]
    fn test_signature_algorithm_mismatch_rejected() {
        let ed = Identity::generate(HostKeyAlg::SshEd25519).unwrap();
        let ec = Identity::generate(HostKeyAlg::EcdsaP256).unwrap();

        let signature = ec.sign(b"data").unwrap();
        let result = verify_signature(&ed.public_key_blob(), b"data", &signature);
        assert!(result.is_err());
    }

    #[test]
    fn test_ed25519_bad_signature_rejected() {
        let identity = Identity::generate(HostKeyAlg::SshEd25519).unwrap();
        let mut signature = identity.sign(b"data").unwrap();
        let last = signature.len() - 1;
        signature[last] ^= 0xFF;
        assert!(!verify_signature(&identity.public_key_blob(), b"data", &signature).unwrap());
    }

    #[test]
    fn test_fingerprint_shape() {
        let identity = Identity::generate(HostKeyAlg::EcdsaP256).unwrap();
        let fp = fingerprint(&identity.public_key_blob());
        assert!(fp.starts_with("SHA256:"));
        assert_eq!(fp.len(), 7 + 64);
    }

    #[test]
    fn test_host_key_path_naming() {
        let path = host_key_path("/etc/hawser/key_", HostKeyAlg::SshEd25519);
        assert_eq!(
            path.to_string_lossy(),
            "/etc/hawser/key_ssh-ed25519.pem"
        );
    }
}
