//! Versioned sealed-envelope encryption for at-rest records.
//!
//! Layout: `magic (8) || version (4, LE) || nonce (24) || ciphertext+tag`.
//! AAD binds a record to its storage slot so a blob copied between slots
//! fails authentication.

use aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use secrecy::{ExposeSecret, Secret};
use thiserror::Error;
use zeroize::Zeroize;

const ENVELOPE_MAGIC: [u8; 8] = *b"MORSLCR1";
const CURRENT_VERSION: u32 = 1;
const NONCE_SIZE: usize = 24;
const KEY_SIZE: usize = 32;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 8 + 4 + NONCE_SIZE;

pub const MAX_PLAINTEXT: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    MalformedEnvelope,
    UnsupportedVersion { version: u32 },
    AuthenticationFailed,
    PayloadTooLarge,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SealedError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("randomness unavailable")]
    RandomUnavailable,

    #[error("plaintext too large: {size} > {max}")]
    PlaintextTooLarge { size: usize, max: usize },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed: {0:?}")]
    OpenFailed(OpenFailure),
}

pub trait RandomProvider {
    fn fill(&self, out: &mut [u8]) -> Result<(), SealedError>;
}

pub struct OsRng;

impl RandomProvider for OsRng {
    fn fill(&self, out: &mut [u8]) -> Result<(), SealedError> {
        getrandom::getrandom(out).map_err(|_| SealedError::RandomUnavailable)
    }
}

/// Single-key sealer over the install-scoped key the shell hands the core
/// at startup.
pub struct Sealer<R: RandomProvider = OsRng> {
    key: Secret<[u8; KEY_SIZE]>,
    rng: R,
}

impl Sealer<OsRng> {
    pub fn with_os_rng(key_bytes: &[u8]) -> Result<Self, SealedError> {
        Self::new(key_bytes, OsRng)
    }
}

impl<R: RandomProvider> Sealer<R> {
    pub fn new(key_bytes: &[u8], rng: R) -> Result<Self, SealedError> {
        if key_bytes.len() != KEY_SIZE {
            return Err(SealedError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: key_bytes.len(),
            });
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(key_bytes);
        let sealer = Self {
            key: Secret::new(key),
            rng,
        };
        key.zeroize();
        Ok(sealer)
    }

    /// Short, non-reversible identifier for the key in use, for diagnostics.
    pub fn key_fingerprint(&self) -> String {
        let digest = blake3::hash(self.key.expose_secret());
        hex::encode(&digest.as_bytes()[..4])
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SealedError> {
        if plaintext.len() > MAX_PLAINTEXT {
            return Err(SealedError::PlaintextTooLarge {
                size: plaintext.len(),
                max: MAX_PLAINTEXT,
            });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce)?;

        let cipher = XChaCha20Poly1305::new(Key::from_slice(self.key.expose_secret()));
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| SealedError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        envelope.extend_from_slice(&ENVELOPE_MAGIC);
        envelope.extend_from_slice(&CURRENT_VERSION.to_le_bytes());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    pub fn open(&self, envelope: &[u8], aad: &[u8]) -> Result<Vec<u8>, SealedError> {
        if envelope.len() < HEADER_SIZE + TAG_SIZE {
            return Err(SealedError::OpenFailed(OpenFailure::MalformedEnvelope));
        }

        if envelope[..8] != ENVELOPE_MAGIC {
            return Err(SealedError::OpenFailed(OpenFailure::MalformedEnvelope));
        }

        let version = u32::from_le_bytes(
            envelope[8..12]
                .try_into()
                .map_err(|_| SealedError::OpenFailed(OpenFailure::MalformedEnvelope))?,
        );
        if version != CURRENT_VERSION {
            return Err(SealedError::OpenFailed(OpenFailure::UnsupportedVersion {
                version,
            }));
        }

        let ciphertext = &envelope[HEADER_SIZE..];
        if ciphertext.len() > MAX_PLAINTEXT + TAG_SIZE {
            return Err(SealedError::OpenFailed(OpenFailure::PayloadTooLarge));
        }

        let nonce = &envelope[12..HEADER_SIZE];
        let cipher = XChaCha20Poly1305::new(Key::from_slice(self.key.expose_secret()));
        cipher
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| SealedError::OpenFailed(OpenFailure::AuthenticationFailed))
    }
}

/// Derive the AAD binding a sealed record to its storage slot.
pub fn slot_aad(slot: &str) -> [u8; 32] {
    *blake3::hash(format!("morsel.sealed.v{CURRENT_VERSION}:{slot}").as_bytes()).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng(u8);

    impl RandomProvider for FixedRng {
        fn fill(&self, out: &mut [u8]) -> Result<(), SealedError> {
            out.fill(self.0);
            Ok(())
        }
    }

    fn sealer() -> Sealer<FixedRng> {
        Sealer::new(&[7u8; 32], FixedRng(0x42)).unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let s = sealer();
        let aad = slot_aad("morsel.auth.v1");
        let envelope = s.seal(b"token pair", &aad).unwrap();
        assert_eq!(s.open(&envelope, &aad).unwrap(), b"token pair");
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let aad = slot_aad("morsel.auth.v1");
        let envelope = sealer().seal(b"token pair", &aad).unwrap();

        let other = Sealer::new(&[8u8; 32], FixedRng(0x42)).unwrap();
        assert_eq!(
            other.open(&envelope, &aad).unwrap_err(),
            SealedError::OpenFailed(OpenFailure::AuthenticationFailed)
        );
    }

    #[test]
    fn wrong_slot_aad_fails_authentication() {
        let s = sealer();
        let envelope = s.seal(b"token pair", &slot_aad("morsel.auth.v1")).unwrap();
        assert_eq!(
            s.open(&envelope, &slot_aad("other.slot")).unwrap_err(),
            SealedError::OpenFailed(OpenFailure::AuthenticationFailed)
        );
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let s = sealer();
        let aad = slot_aad("morsel.auth.v1");
        let mut envelope = s.seal(b"token pair", &aad).unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        assert_eq!(
            s.open(&envelope, &aad).unwrap_err(),
            SealedError::OpenFailed(OpenFailure::AuthenticationFailed)
        );
    }

    #[test]
    fn bad_magic_is_malformed() {
        let s = sealer();
        let aad = slot_aad("morsel.auth.v1");
        let mut envelope = s.seal(b"x", &aad).unwrap();
        envelope[0] = b'X';
        assert_eq!(
            s.open(&envelope, &aad).unwrap_err(),
            SealedError::OpenFailed(OpenFailure::MalformedEnvelope)
        );
    }

    #[test]
    fn unsupported_version_is_reported() {
        let s = sealer();
        let aad = slot_aad("morsel.auth.v1");
        let mut envelope = s.seal(b"x", &aad).unwrap();
        envelope[8..12].copy_from_slice(&9u32.to_le_bytes());
        assert_eq!(
            s.open(&envelope, &aad).unwrap_err(),
            SealedError::OpenFailed(OpenFailure::UnsupportedVersion { version: 9 })
        );
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let s = sealer();
        assert_eq!(
            s.open(&[0u8; 10], b"").unwrap_err(),
            SealedError::OpenFailed(OpenFailure::MalformedEnvelope)
        );
    }

    #[test]
    fn key_length_is_enforced() {
        assert!(matches!(
            Sealer::new(&[0u8; 16], FixedRng(0)),
            Err(SealedError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
    }

    #[test]
    fn plaintext_limit_is_enforced() {
        let s = sealer();
        let big = vec![0u8; MAX_PLAINTEXT + 1];
        assert!(matches!(
            s.seal(&big, b""),
            Err(SealedError::PlaintextTooLarge { .. })
        ));
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let a = sealer().key_fingerprint();
        let b = sealer().key_fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }
}
