//! Error types, one enum per concern.

use std::path::PathBuf;

/// Startup configuration problems. Always fatal: nothing is dispatched
/// until these are resolved.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("VAPID configuration is missing (private key, public key and subject are required)")]
    MissingVapid,

    #[error("VAPID configuration is incomplete (private key, public key and subject are required)")]
    IncompleteVapid,

    #[error(transparent)]
    Vapid(#[from] VapidError),

    #[error("backend URL is required")]
    MissingBackendUrl,

    #[error("invalid backend URL '{url}': {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum VapidError {
    #[error("invalid VAPID private key: {0}")]
    InvalidPrivateKey(String),

    #[error("VAPID public key does not match the private key")]
    PublicKeyMismatch,

    #[error("invalid VAPID subject '{0}'; expected a mailto: or https: URI")]
    InvalidSubject(String),

    #[error("invalid push endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("failed to sign VAPID token: {0}")]
    Sign(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptError {
    #[error("payload is {len} bytes; at most {max} bytes fit in a push message")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("subscriber public key is not a valid P-256 point")]
    InvalidPublicKey,

    #[error("subscriber auth secret must be 16 bytes")]
    InvalidAuthSecret,

    #[error("content key derivation failed")]
    KeyDerivation,

    #[error("payload encryption failed")]
    Cipher,

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure to even attempt a delivery. Retrying with the same inputs cannot
/// succeed, so these are final for the notification/subscription pair.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Encrypt(#[from] EncryptError),

    #[error(transparent)]
    Vapid(#[from] VapidError),

    #[error("notification payload cannot be encoded: {0}")]
    Payload(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("push request timed out")]
    Timeout,

    #[error("failed to connect to push service: {0}")]
    Connect(String),

    #[error("push request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("subscription store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("subscription store is corrupt: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("subscription store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures talking to the application backend (reminder evaluation and
/// notification status writes).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend responded with HTTP {0}")]
    Status(u16),

    #[error("backend URL cannot carry path segments")]
    InvalidUrl,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to list subscriptions: {0}")]
    Store(String),

    #[error("timed out listing subscriptions")]
    StoreTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}
