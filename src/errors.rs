//! Error model for the retrieval engine and its backends
//!
//! Two layers, both built with `thiserror`:
//!
//! - [`ServiceError`] is what a [`MailboxService`](crate::service::MailboxService)
//!   backend reports for a single protocol round trip.
//! - [`MailError`] is what the engine surfaces to its caller. Each variant
//!   names the engine step that failed and carries the backend error as its
//!   source.

use std::path::PathBuf;

use thiserror::Error;

/// Backend (transport/protocol) error
///
/// Returned by every [`MailboxService`](crate::service::MailboxService)
/// method. The engine wraps it into the [`MailError`] variant matching the
/// step it was performing.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Operation timeout (TCP connect, TLS handshake, server response)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Authentication failure (bad credentials, account disabled)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Server rejected the command or the connection broke
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Backend cannot perform the operation at all (e.g. flag writes on POP3)
    #[error("not supported: {0}")]
    Unsupported(String),
    /// Server returned data the engine cannot interpret
    #[error("malformed data: {0}")]
    Malformed(String),
}

/// Engine error type
///
/// Every variant is surfaced to the direct caller; the engine performs a
/// single local recovery (read-only folder fallback) and never retries.
#[derive(Debug, Error)]
pub enum MailError {
    /// Invalid caller input (malformed configuration, bad folder name)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Mailbox service unreachable, authentication failed, or folders
    /// cannot be enumerated
    #[error("mailbox service connection failed: {0}")]
    Connection(#[source] ServiceError),
    /// Folder open/select/list failure after the read-only fallback
    #[error("folder '{folder}' failed: {source}")]
    Folder {
        folder: String,
        #[source]
        source: ServiceError,
    },
    /// Selection or per-message materialization failure
    #[error("failed to fetch messages: {0}")]
    Fetch(#[source] ServiceError),
    /// Flag write against the server failed
    #[error("failed to update flags of message {number}: {source}")]
    Flag {
        number: u32,
        #[source]
        source: ServiceError,
    },
    /// Copy into the move target failed; nothing was expunged
    #[error("copying messages to '{folder}' failed: {source}")]
    Move {
        folder: String,
        #[source]
        source: ServiceError,
    },
    /// Attachment bytes could not be written to the storage directory
    #[error("failed to store attachment at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MailError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convenience constructor for `Folder`
    pub fn folder(folder: impl Into<String>, source: ServiceError) -> Self {
        Self::Folder {
            folder: folder.into(),
            source,
        }
    }
}

/// Type alias for fallible backend calls
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Type alias for fallible engine calls
///
/// Use this for all public engine operations. Provides a consistent error
/// type throughout the codebase.
pub type MailResult<T> = Result<T, MailError>;
