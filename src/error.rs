//! Crate-wide error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnifferError {
    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("datalink type is {actual} ({name}), expected {expected} (radiotap); is the interface in monitor mode?")]
    WrongLinkType {
        expected: i32,
        actual: i32,
        name: &'static str,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed channel policy: {0}")]
    Policy(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SnifferError>;
