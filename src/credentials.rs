//! The credential vault: sole owner of the access/refresh token pair.
//!
//! No other component reads or writes tokens. The pair is all-or-nothing —
//! a partial pair is discarded rather than stored, so `credential()` is the
//! single source of truth for "is there a session".

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::sealed::{slot_aad, RandomProvider, Sealer};

/// Secure-backend slot holding the sealed token record, versioned so a
/// future layout change can re-key without guessing.
pub const SEALED_RECORD_KEY: &str = "morsel.auth.v1";

/// Plaintext keys older releases wrote to the preference backend. The
/// one-time migration drains these; they are never written again.
pub const LEGACY_ACCESS_KEY: &str = "auth_token";
pub const LEGACY_REFRESH_KEY: &str = "refresh_token";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential is incomplete: both tokens are required")]
    Incomplete,

    #[error("sealed record is unreadable: {reason}")]
    Unreadable { reason: String },
}

pub struct Credential {
    access_token: SecretString,
    refresh_token: SecretString,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Result<Self, CredentialError> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();

        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(CredentialError::Incomplete);
        }

        Ok(Self {
            access_token: SecretString::new(access_token),
            refresh_token: SecretString::new(refresh_token),
        })
    }

    /// Both-or-neither: a partial pair is treated as no credential at all.
    pub fn from_parts(access: Option<String>, refresh: Option<String>) -> Option<Self> {
        match (access, refresh) {
            (Some(a), Some(r)) => Self::new(a, r).ok(),
            _ => None,
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self {
            access_token: SecretString::new(self.access_token.expose_secret().to_string()),
            refresh_token: SecretString::new(self.refresh_token.expose_secret().to_string()),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.access_token() == other.access_token()
            && self.refresh_token() == other.refresh_token()
    }
}

/// On-disk layout of the sealed record. Kept separate from `Credential` so
/// the runtime type never derives serde.
#[derive(Serialize, Deserialize)]
struct StoredCredential {
    version: u32,
    access_token: String,
    refresh_token: String,
}

const STORED_VERSION: u32 = 1;

#[derive(Default)]
pub struct CredentialVault {
    credential: Option<Credential>,
}

impl CredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.credential.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credential.as_ref().map(Credential::access_token)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.credential.as_ref().map(Credential::refresh_token)
    }

    pub fn set(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    pub fn clear(&mut self) {
        self.credential = None;
    }

    /// Encode and seal the current pair for the secure backend. `None` when
    /// there is nothing to persist (the caller deletes the record instead).
    pub fn seal_for_storage<R: RandomProvider>(
        &self,
        sealer: &Sealer<R>,
    ) -> Result<Option<Vec<u8>>, CredentialError> {
        let Some(credential) = &self.credential else {
            return Ok(None);
        };

        let stored = StoredCredential {
            version: STORED_VERSION,
            access_token: credential.access_token().to_string(),
            refresh_token: credential.refresh_token().to_string(),
        };

        let mut plaintext = Zeroizing::new(Vec::new());
        ciborium::into_writer(&stored, &mut *plaintext).map_err(|e| {
            CredentialError::Unreadable {
                reason: e.to_string(),
            }
        })?;

        let envelope = sealer
            .seal(&plaintext, &slot_aad(SEALED_RECORD_KEY))
            .map_err(|e| CredentialError::Unreadable {
                reason: e.to_string(),
            })?;

        Ok(Some(envelope))
    }

    /// Unseal and adopt a stored pair. Anything unreadable or partial leaves
    /// the vault empty — a damaged record means "signed out", not a crash.
    pub fn restore_from_sealed<R: RandomProvider>(
        &mut self,
        envelope: &[u8],
        sealer: &Sealer<R>,
    ) -> bool {
        let Ok(plaintext) = sealer.open(envelope, &slot_aad(SEALED_RECORD_KEY)) else {
            self.credential = None;
            return false;
        };
        let plaintext = Zeroizing::new(plaintext);

        let Ok(stored) = ciborium::from_reader::<StoredCredential, _>(plaintext.as_slice()) else {
            self.credential = None;
            return false;
        };

        if stored.version != STORED_VERSION {
            self.credential = None;
            return false;
        }

        match Credential::new(stored.access_token, stored.refresh_token) {
            Ok(credential) => {
                self.credential = Some(credential);
                true
            }
            Err(_) => {
                self.credential = None;
                false
            }
        }
    }
}

/// What the one-time legacy migration should do, given whatever plaintext
/// tokens the preference backend still holds.
#[derive(Debug, PartialEq)]
pub struct MigrationPlan {
    /// Complete pair found: adopt it and write the sealed record.
    pub adopt: Option<Credential>,
    /// Any legacy key present (complete or partial) is deleted either way.
    pub delete_legacy: bool,
}

impl MigrationPlan {
    pub fn is_noop(&self) -> bool {
        self.adopt.is_none() && !self.delete_legacy
    }
}

/// Pure migration decision: a complete pair moves to secure storage, a
/// partial pair is dropped, and legacy copies are deleted in both cases.
/// With nothing stored the plan is a no-op, which is what makes running the
/// migration twice safe.
pub fn plan_migration(access: Option<String>, refresh: Option<String>) -> MigrationPlan {
    let any_present = access.is_some() || refresh.is_some();
    MigrationPlan {
        adopt: Credential::from_parts(access, refresh),
        delete_legacy: any_present,
    }
}
