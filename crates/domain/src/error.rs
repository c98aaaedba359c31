/// Classifies an Engine failure for fallback decisions.
///
/// `Connection` covers transport faults and non-2xx responses without a
/// recognized body; `Policy` covers responses the Engine itself rejected
/// (`success: false` with a message).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    Connection,
    Policy,
}

/// Shared error type used across all dadp-client crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("hub identity required")]
    TenantMissing,

    #[error("engine ({kind:?}): {message}")]
    Engine {
        kind: EngineErrorKind,
        message: String,
    },

    #[error("hub: {0}")]
    Hub(String),

    #[error("config: {0}")]
    Config(String),

    #[error("no descriptor registered for entity type: {0}")]
    Descriptor(String),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Engine connection-class error with the given message.
    pub fn engine_connection(message: impl Into<String>) -> Self {
        Error::Engine {
            kind: EngineErrorKind::Connection,
            message: message.into(),
        }
    }

    /// Engine policy/cipher-class error with the given message.
    pub fn engine_policy(message: impl Into<String>) -> Self {
        Error::Engine {
            kind: EngineErrorKind::Policy,
            message: message.into(),
        }
    }

    /// True for faults originating in the Engine data plane.  The
    /// interception layer uses this to decide whether fallback-to-original
    /// applies.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            Error::Engine { .. } | Error::Http(_) | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
