//! Error types for udp-impair.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for udp-impair operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for udp-impair.
#[derive(Error, Debug)]
pub enum Error {
    // Endpoint errors
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Capture log errors
    #[error("capture log error: {0}")]
    Capture(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Errors raised while parsing a `host:port` string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing port in {0:?}")]
    MissingPort(String),

    #[error("unterminated IPv6 bracket in {0:?}")]
    UnterminatedBracket(String),

    #[error("empty host in {0:?}")]
    EmptyHost(String),

    #[error("invalid port {port:?} in {input:?}")]
    InvalidPort { input: String, port: String },
}

/// Socket level errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("could not resolve {host}: {reason}")]
    ResolveFailed { host: String, reason: String },

    #[error("send to {addr} failed: {reason}")]
    SendFailed { addr: SocketAddr, reason: String },

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),
}

impl Error {
    /// Check if the event loop must stop on this error.
    ///
    /// Send failures are reported and the datagram is dropped; every other
    /// error ends the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Transport(TransportError::SendFailed { .. }))
    }
}
