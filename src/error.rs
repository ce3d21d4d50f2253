//! Crate-wide error types.
//!
//! The engine itself never raises out of an edit operation (spec.md §7);
//! these types exist for the boundary layers — protocol parsing,
//! transport, and persistence — where a caller does need to distinguish
//! failure modes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),
}

#[derive(Debug, Error)]
pub enum PermissionError {
    #[error("no such user: {0}")]
    UnknownUser(String),
    #[error("invalid rights token: {0}")]
    InvalidRights(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
