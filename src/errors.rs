//! Service Companion Error Hierarchy
//!
//! Errors are grouped by the collaborator that produced them. Only errors that
//! happen while the caller is waiting (construction, registration, initial
//! configuration sync) cross the public boundary; failures inside background
//! tasks are logged by the task that owns them.

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Registry backend failures (unreachable, rejected request, bad payload)
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Transport failures while dialing a dependency or hosting the server
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Settings loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Collaborators could not be brought up at construction time
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The registry refused to register this instance
    #[error("Registration failed: {0}")]
    Registration(String),

    /// A KV payload is not the JSON object it is supposed to be
    #[error("Failed to decode value of key {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Local configuration template is malformed
    #[error("Invalid configuration template for key {key}: {reason}")]
    InvalidTemplate { key: String, reason: String },

    /// Dependencies were already declared for this instance
    #[error("Dependencies are already declared: {0:?}")]
    DependenciesAlreadyDeclared(Vec<String>),

    /// Background task failed to join
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Shutdown signal could not be installed or delivered
    #[error("{0}")]
    SignalFailed(String),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Agent endpoint cannot be reached at all
    #[error("Registry unreachable at {address}: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request could not be built or sent
    #[error(transparent)]
    Request(#[from] reqwest::Error),

    /// Agent answered with a non-success status code
    #[error("Registry request {path} failed with HTTP {status}: {body}")]
    Status { path: String, status: u16, body: String },

    /// Agent answered with a payload we cannot interpret
    #[error("Unexpected registry response for {path}: {reason}")]
    InvalidResponse { path: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Malformed dependency addresses
    #[error("Invalid URI format: {0}")]
    InvalidURI(String),

    /// Dial to a discovered instance failed
    #[error("Failed to connect to {address}: {source}")]
    ConnectError {
        address: String,
        #[source]
        source: Box<tonic::transport::Error>,
    },

    /// gRPC transport layer errors
    #[error(transparent)]
    TonicError(#[from] Box<tonic::transport::Error>),

    /// Local interface discovery failures
    #[error("Unable to obtain local address: {0}")]
    LocalAddress(#[source] std::io::Error),

    /// No non-loopback IPv4 address found
    #[error("Unable to obtain a non-loopback IPv4 address")]
    NoLocalAddress,

    /// Listener bind failures
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Whether this error is worth retrying on the next cycle.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Registry(e) => matches!(
                e,
                RegistryError::Unreachable { .. } | RegistryError::Request(_)
            ) || matches!(e, RegistryError::Status { status, .. } if *status >= 500),
            Error::Network(NetworkError::ConnectError { .. }) | Error::Network(NetworkError::TonicError(_)) => true,
            _ => false,
        }
    }
}
