//! Error types for shardwatchd.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Snapshot read/write failure. Always fatal to the process.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("snapshot io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encode error: {0}")]
    Encode(#[source] bincode::Error),

    #[error("snapshot decode error on {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("snapshot writer task failed: {0}")]
    Task(#[source] tokio::task::JoinError),
}

/// Why a webhook submission was refused.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("source address {0} not allowed")]
    Forbidden(std::net::IpAddr),

    #[error("webhook key mismatch")]
    Unauthorized,

    #[error("malformed update: {0}")]
    Malformed(String),

    #[error("{what} {value} out of range 0..={max}")]
    OutOfRange {
        what: &'static str,
        value: i64,
        max: u32,
    },

    #[error("body decode error: {0}")]
    Decode(String),

    #[error("body read error: {0}")]
    BodyRead(String),

    #[error("update queue closed")]
    QueueClosed,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Forbidden(_) => StatusCode::FORBIDDEN,
            Rejection::Unauthorized => StatusCode::UNAUTHORIZED,
            Rejection::Malformed(_) | Rejection::OutOfRange { .. } => StatusCode::BAD_REQUEST,
            Rejection::Decode(_) | Rejection::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Rejection::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        // Producers only ever see the status code.
        self.status().into_response()
    }
}
