use std::io;

/// Error taxonomy for the replication pipeline.
///
/// Each variant maps to one of the five classes the stream consumer and its
/// collaborators can raise: configuration, connectivity, schema, data, or
/// cancellation. Callers match on the class, not the message, to decide
/// whether to retry, invalidate a cache entry, skip an event, or abort.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("connectivity error: {0}")]
    Connectivity(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("config file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("mongodb error: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Connectivity failures are retried with capped backoff; configuration
    /// and authentication failures surface immediately, and everything else
    /// in the taxonomy is either logged and skipped or aborts the caller at
    /// the call site.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connectivity(_) | Error::Io(_) | Error::Mongo(_) => true,
            Error::Redis(e) => !matches!(
                e.kind(),
                redis::ErrorKind::AuthenticationFailed | redis::ErrorKind::InvalidClientConfig
            ),
            _ => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// A bounded-timeout poll coming up empty, not a connectivity failure;
    /// callers in a blocking-read loop retry these silently after
    /// re-checking cancellation, rather than treating them as fatal.
    pub fn is_poll_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}
