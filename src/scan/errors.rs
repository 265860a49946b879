//! Scan errors
//!
//! Uses thiserror for type-safe error matching rather than opaque anyhow errors.
//! Wire problems and coordinator misuse are separate enums because they are handled
//! at different layers: transport errors are logged and dropped by the host, while
//! coordinator errors are returned to whoever wired the coordinator up.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Malformed scan notification: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown product '{0}'")]
    UnknownProduct(String),

    #[error("Unknown scan status '{0}'")]
    UnknownStatus(String),

    #[error("Unexpected notification method '{0}'")]
    UnexpectedMethod(String),
}

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Coordinator for {product} has been disposed")]
    Disposed { product: crate::proto::Product },

    #[error("Coordinator for {product} is already subscribed to a scan channel")]
    AlreadySubscribed { product: crate::proto::Product },

    #[error("No async runtime available to deliver scan events")]
    NoRuntime,

    #[error("Scan event channel is closed")]
    ChannelClosed,

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;
