use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_KEY_LENGTH: usize = 256;
pub const MAX_VALUE_SIZE: usize = 64 * 1024;

/// Where a record lives on the device.
///
/// `Secure` is the platform keystore (Keychain / EncryptedSharedPreferences);
/// `Preferences` is the plain key-value store older releases wrote tokens to,
/// kept only so the one-time migration can drain it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreBackend {
    Secure,
    Preferences,
}

impl StoreBackend {
    pub fn prefix(self) -> &'static str {
        match self {
            StoreBackend::Secure => "secure",
            StoreBackend::Preferences => "prefs",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreKey {
    backend: StoreBackend,
    key: String,
}

impl StoreKey {
    pub fn new(backend: StoreBackend, key: impl Into<String>) -> Result<Self, StoreError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self { backend, key })
    }

    pub fn backend(&self) -> StoreBackend {
        self.backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn raw(&self) -> String {
        format!("{}:{}", self.backend.prefix(), self.key)
    }

    fn validate(key: &str) -> Result<(), StoreError> {
        if key.is_empty() || key.trim().is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key cannot be empty".to_string(),
            });
        }

        if key.len() > MAX_KEY_LENGTH {
            return Err(StoreError::InvalidKey {
                key: key.chars().take(50).collect::<String>() + "...",
                reason: format!("key exceeds maximum length of {} bytes", MAX_KEY_LENGTH),
            });
        }

        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key contains invalid characters".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOperation {
    Get {
        key: StoreKey,
    },
    Set {
        key: StoreKey,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    Delete {
        key: StoreKey,
    },
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum StoreError {
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("value too large: {size} bytes exceeds maximum of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },

    #[error("storage access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("storage I/O failure: {message}")]
    Io { message: String },
}

/// A read with nothing stored is `Read(None)`, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreOutput {
    Read(#[serde(with = "serde_bytes")] Option<Vec<u8>>),
    Written,
    Deleted,
}

pub type StoreResult = Result<StoreOutput, StoreError>;

impl Operation for StoreOperation {
    type Output = StoreResult;
}

pub struct Store<Ev> {
    context: CapabilityContext<StoreOperation, Ev>,
}

impl<Ev> Capability<Ev> for Store<Ev> {
    type Operation = StoreOperation;
    type MappedSelf<MappedEv> = Store<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Store::new(self.context.map_event(f))
    }
}

impl<Ev> Store<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<StoreOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn get<F>(&self, key: StoreKey, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run(StoreOperation::Get { key }, make_event);
    }

    pub fn set<F>(&self, key: StoreKey, value: Vec<u8>, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run(StoreOperation::Set { key, value }, make_event);
    }

    pub fn delete<F>(&self, key: StoreKey, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        self.run(StoreOperation::Delete { key }, make_event);
    }

    fn run<F>(&self, operation: StoreOperation, make_event: F)
    where
        F: FnOnce(StoreResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}
