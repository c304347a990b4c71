//! Mailbox service capability
//!
//! The engine never talks to a server directly. It is handed a
//! [`MailboxService`] (IMAP in [`crate::imap`], an in-memory double in the
//! tests) and drives it one round trip at a time. Messages are addressed by
//! their sequence number in the currently open folder.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{MailError, MailResult, ServiceResult};
use crate::flags::{FlagSet, SystemFlag, is_keyword_atom};

/// Folder open mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderMode {
    ReadWrite,
    ReadOnly,
}

impl FolderMode {
    pub fn is_writable(self) -> bool {
        self == FolderMode::ReadWrite
    }
}

/// Server-maintained folder counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCounter {
    Total,
    New,
    Unread,
    Deleted,
}

impl fmt::Display for MessageCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageCounter::Total => "total",
            MessageCounter::New => "new",
            MessageCounter::Unread => "unread",
            MessageCounter::Deleted => "deleted",
        })
    }
}

/// Envelope prefetch record: flags plus raw envelope header block
#[derive(Debug, Clone)]
pub struct FetchedHeaders {
    pub number: u32,
    pub flags: FlagSet,
    pub header: Vec<u8>,
}

/// Full fetch record: flags plus the complete RFC822 source
///
/// `flags` are the flags as they were before the content was read.
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub number: u32,
    pub flags: FlagSet,
    pub raw: Vec<u8>,
}

/// Opaque compiled search expression
///
/// Holds IMAP `SEARCH` criteria text. The engine passes it through to the
/// folder's search unchanged; the constructors below are conveniences, not
/// a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchPredicate(String);

impl SearchPredicate {
    /// Wrap already-compiled criteria
    pub fn new(criteria: impl Into<String>) -> Self {
        Self(criteria.into())
    }

    /// Match messages whose system `flag` is (`value == true`) or is not set
    pub fn flag(flag: SystemFlag, value: bool) -> Self {
        let key = flag.imap_atom()[1..].to_ascii_uppercase();
        Self(match (flag, value) {
            (SystemFlag::Recent, true) => "RECENT".to_owned(),
            (SystemFlag::Recent, false) => "OLD".to_owned(),
            (_, true) => key,
            (_, false) => format!("UN{key}"),
        })
    }

    /// Match messages with (`value == true`) or without the user keyword
    ///
    /// # Errors
    ///
    /// `InvalidInput` if `name` is not an IMAP atom.
    pub fn keyword(name: &str, value: bool) -> MailResult<Self> {
        if !is_keyword_atom(name) {
            return Err(MailError::invalid(format!(
                "keyword '{name}' is not an IMAP atom"
            )));
        }
        let key = if value { "KEYWORD" } else { "UNKEYWORD" };
        Ok(Self(format!("{key} {name}")))
    }

    /// Match on a `Subject` substring
    pub fn subject(text: &str) -> Self {
        Self(format!("SUBJECT {}", quote(text)))
    }

    /// Match on a `From` substring
    pub fn sender(text: &str) -> Self {
        Self(format!("FROM {}", quote(text)))
    }

    /// Both expressions must match
    pub fn and(self, other: SearchPredicate) -> Self {
        Self(format!("{} {}", self.0, other.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// IMAP quoted string; control characters are dropped
fn quote(text: &str) -> String {
    let escaped: String = text
        .chars()
        .filter(|ch| !ch.is_ascii_control())
        .flat_map(|ch| match ch {
            '\\' | '"' => vec!['\\', ch],
            _ => vec![ch],
        })
        .collect();
    format!("\"{escaped}\"")
}

/// Remote mailbox capability
///
/// Models IMAP4/POP3 semantics. At most one folder is open at a time; all
/// message operations apply to it. Backends that cannot write flags or work
/// with several folders (POP3) report [`ServiceError::Unsupported`] for those
/// calls and grant only [`FolderMode::ReadOnly`].
///
/// [`ServiceError::Unsupported`]: crate::errors::ServiceError::Unsupported
#[async_trait]
pub trait MailboxService: Send {
    /// Full names of every folder reachable from the root
    async fn list_folders(&mut self) -> ServiceResult<Vec<String>>;

    /// Open `name` in `mode`, replacing any open folder
    async fn open_folder(&mut self, name: &str, mode: FolderMode) -> ServiceResult<()>;

    /// Close the open folder; `expunge` removes messages flagged deleted
    async fn close_folder(&mut self, expunge: bool) -> ServiceResult<()>;

    /// Read one of the open folder's counters
    async fn count(&mut self, counter: MessageCounter) -> ServiceResult<u32>;

    /// Every message of the open folder, in folder order
    async fn list_messages(&mut self) -> ServiceResult<Vec<u32>>;

    /// Messages of the open folder matching `predicate`, in folder order
    async fn search(&mut self, predicate: &SearchPredicate) -> ServiceResult<Vec<u32>>;

    /// Batched envelope + flags prefetch, one round trip for all `numbers`
    async fn fetch_envelopes(&mut self, numbers: &[u32]) -> ServiceResult<Vec<FetchedHeaders>>;

    /// Full content and flags of one message
    async fn fetch_message(&mut self, number: u32) -> ServiceResult<FetchedMessage>;

    /// Add (`value == true`) or remove `flags` on one message
    async fn store_flags(&mut self, number: u32, flags: &FlagSet, value: bool) -> ServiceResult<()>;

    /// Permanently remove messages flagged deleted from the open folder
    async fn expunge(&mut self) -> ServiceResult<()>;

    /// Copy `numbers` into folder `target`
    async fn copy_messages(&mut self, numbers: &[u32], target: &str) -> ServiceResult<()>;

    /// End the session with the server
    async fn logout(&mut self) -> ServiceResult<()>;
}
