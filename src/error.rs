use thiserror::Error;

/// Failure talking to the blocklist persistence backend.
///
/// Never fatal on the request path: lookups fail open and writes keep the
/// in-memory decision that was already made.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Invalid configuration detected at startup. Fatal before traffic is accepted.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment override {var}={value:?} is not a valid number")]
    Env { var: &'static str, value: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// The external rate-counting capability could not answer.
#[derive(Debug, Error)]
pub enum UpstreamCounterError {
    #[error("rate counter unavailable: {0}")]
    Unavailable(String),
}
