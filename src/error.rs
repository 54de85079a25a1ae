//! Unified error type.

use thiserror::Error;

/// The error type returned by weblog's fallible operations.
///
/// Handler-level outcomes (404, ignored query parameters, swallowed body
/// parse failures) are expressed as [`Response`](crate::Response) values, not
/// as `Error`s. This type surfaces infrastructure failures: binding a port,
/// issuing an outbound call, writing exported traces or installing the
/// log subscriber.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`: {source}")]
    Addr {
        addr: String,
        source: std::net::AddrParseError,
    },

    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("http client: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("http: {0}")]
    Http(#[from] http::Error),

    #[error("trace export: {0}")]
    Export(#[from] serde_json::Error),

    #[error("logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}
