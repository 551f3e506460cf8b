//! Password hashing and verification.
//!
//! Digests are derived with scrypt using fixed work factors
//! (N = 2^15, r = 8, p = 1, 32-byte output) and a per-user 32-byte random salt.
//! The stored digest is the standard base64 encoding of the derived key.
//!
//! Key derivation is CPU and memory heavy; async callers go through
//! [`hash_blocking`] and [`verify_blocking`] so the runtime workers are not stalled.

use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;

pub const SCRYPT_LOG_N: u8 = 15;
pub const SCRYPT_R: u32 = 8;
pub const SCRYPT_P: u32 = 1;
pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("invalid scrypt parameters")]
    Params,
    #[error("scrypt key derivation failed")]
    Derive,
    #[error("failed to generate salt")]
    Salt,
    #[error("password task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Clone, PartialEq, Eq)]
pub struct PasswordHash {
    pub digest: String,
    pub salt: Vec<u8>,
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash").finish_non_exhaustive()
    }
}

fn derive(password: &str, salt: &[u8]) -> Result<String, PasswordError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN)
        .map_err(|_| PasswordError::Params)?;
    let mut output = [0u8; KEY_LEN];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut output)
        .map_err(|_| PasswordError::Derive)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(output))
}

/// Hash `password`, generating a fresh salt when none is supplied.
///
/// # Errors
/// Returns an error if salt generation or key derivation fails.
pub fn hash(password: &str, salt: Option<&[u8]>) -> Result<PasswordHash, PasswordError> {
    let salt = match salt {
        Some(salt) => salt.to_vec(),
        None => {
            let mut salt = vec![0u8; SALT_LEN];
            OsRng
                .try_fill_bytes(&mut salt)
                .map_err(|_| PasswordError::Salt)?;
            salt
        }
    };

    let digest = derive(password, &salt)?;
    Ok(PasswordHash { digest, salt })
}

/// Recompute the digest for `password` and compare it to `digest` in constant time.
///
/// # Errors
/// Returns an error if key derivation fails; that is never reported as a mismatch.
pub fn verify(password: &str, digest: &str, salt: &[u8]) -> Result<bool, PasswordError> {
    let computed = derive(password, salt)?;
    Ok(digests_equal(computed.as_bytes(), digest.as_bytes()))
}

fn digests_equal(left: &[u8], right: &[u8]) -> bool {
    left.len() == right.len() && bool::from(left.ct_eq(right))
}

/// [`hash`] on the blocking pool.
///
/// # Errors
/// Returns an error if hashing fails or the blocking task panics.
pub async fn hash_blocking(password: String) -> Result<PasswordHash, PasswordError> {
    tokio::task::spawn_blocking(move || hash(&password, None)).await?
}

/// [`verify`] on the blocking pool.
///
/// # Errors
/// Returns an error if derivation fails or the blocking task panics.
pub async fn verify_blocking(
    password: String,
    digest: String,
    salt: Vec<u8>,
) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify(&password, &digest, &salt)).await?
}

/// Spend the same derivation cost as a real verification for unknown accounts.
pub async fn burn_verification(password: String) {
    let _ = verify_blocking(password, String::new(), vec![0u8; SALT_LEN]).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hashed = hash("Abcd1234!", None);
        assert!(hashed.is_ok());
        if let Ok(hashed) = hashed {
            assert_eq!(hashed.salt.len(), SALT_LEN);
            // base64 of 32 bytes
            assert_eq!(hashed.digest.len(), 44);
            assert!(matches!(
                verify("Abcd1234!", &hashed.digest, &hashed.salt),
                Ok(true)
            ));
            assert!(matches!(
                verify("Abcd1234?", &hashed.digest, &hashed.salt),
                Ok(false)
            ));
        }
    }

    #[test]
    fn supplied_salt_is_deterministic() {
        let salt = [7u8; SALT_LEN];
        let first = hash("correct horse", Some(&salt)).map(|h| h.digest);
        let second = hash("correct horse", Some(&salt)).map(|h| h.digest);
        assert!(first.is_ok());
        assert_eq!(first.ok(), second.ok());
    }

    #[test]
    fn wrong_salt_does_not_verify() {
        let hashed = hash("Abcd1234!", Some(&[1u8; SALT_LEN]));
        assert!(hashed.is_ok());
        if let Ok(hashed) = hashed {
            assert!(matches!(
                verify("Abcd1234!", &hashed.digest, &[2u8; SALT_LEN]),
                Ok(false)
            ));
        }
    }

    #[test]
    fn digest_comparison() {
        assert!(digests_equal(b"abcdef", b"abcdef"));
        assert!(!digests_equal(b"xbcdef", b"abcdef"));
        assert!(!digests_equal(b"abcdex", b"abcdef"));
        assert!(!digests_equal(b"abc", b"abcdef"));
        assert!(!digests_equal(b"", b"abcdef"));
    }

    #[test]
    fn debug_hides_material() {
        let hashed = PasswordHash {
            digest: "secret-digest".to_string(),
            salt: vec![1, 2, 3],
        };
        let rendered = format!("{hashed:?}");
        assert!(!rendered.contains("secret-digest"));
    }

    #[tokio::test]
    async fn blocking_wrappers() {
        let hashed = hash_blocking("Abcd1234!".to_string()).await;
        assert!(hashed.is_ok());
        if let Ok(hashed) = hashed {
            let ok = verify_blocking("Abcd1234!".to_string(), hashed.digest, hashed.salt).await;
            assert!(matches!(ok, Ok(true)));
        }
    }
}
