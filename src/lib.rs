//! mail-receive: deferred mailbox retrieval engine
//!
//! Opens a remote folder, selects messages by search predicate, materializes
//! them as envelope-only or full snapshots (bodies and attachments), and
//! synchronizes the requested flag changes with the server. Nothing touches
//! the network until a terminal call on the receive builder.
//!
//! # Architecture
//!
//! - [`session`]: Folder lifecycle, counters, convenience receive calls
//! - [`receive`]: Deferred builder and runner
//! - [`fetch`]: Fetch plans, selection, and the executor
//! - [`sync`]: Flag writes, SEEN compensation, read-only handling
//! - [`service`]: Mailbox service capability and search predicates
//! - [`imap`]: TLS-only IMAP backend with timeout wrappers
//! - [`mime`]: Snapshot materialization from fetched bytes
//! - [`models`]: Snapshot, envelope, and attachment types
//! - [`filename`]: Attachment naming and RFC 2047 decoding
//! - [`content_type`]: MIME type and charset extraction
//! - [`storage`]: Attachment files on disk
//! - [`flags`]: System and user flag sets
//! - [`trace`]: Serialized protocol debug sink
//! - [`config`]: Environment-driven configuration
//! - [`errors`]: Backend and engine error model

pub mod config;
pub mod content_type;
pub mod errors;
pub mod fetch;
pub mod filename;
pub mod flags;
pub mod imap;
pub mod mime;
pub mod models;
pub mod receive;
pub mod service;
pub mod session;
pub mod storage;
pub mod sync;
pub mod trace;

#[cfg(test)]
mod mock;
