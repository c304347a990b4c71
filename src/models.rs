//! Received message snapshots
//!
//! A [`ReceivedMessage`] is what the engine hands back for every selected
//! message. The envelope is always present; body parts and attachments only
//! when the message was fully fetched.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::{FlagSet, SystemFlag};

/// Lightweight message metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Decoded Subject header
    pub subject: Option<String>,
    /// From addresses
    pub from: Vec<String>,
    /// To addresses
    pub to: Vec<String>,
    /// Cc addresses
    pub cc: Vec<String>,
    /// Reply-To addresses
    pub reply_to: Vec<String>,
    /// Parsed Date header
    pub date: Option<DateTime<Utc>>,
    /// Message-ID header, angle brackets included
    pub message_id: Option<String>,
}

/// Inline text body part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPart {
    /// MIME type as declared (case preserved)
    pub mime_type: String,
    /// Declared charset, or the UTF-8 default
    pub charset: String,
    /// Decoded text
    pub content: String,
}

/// Attachment extracted from a fully fetched message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Resolved (decoded or generated) name
    pub name: String,
    /// MIME type as declared (case preserved)
    pub mime_type: String,
    /// Content-ID, angle brackets included
    pub content_id: Option<String>,
    /// Whether the part was marked `inline`
    pub inline: bool,
    /// Decoded size in bytes
    pub size_bytes: usize,
    /// Where the bytes were written, when attachment storage is configured
    pub stored_path: Option<PathBuf>,
    #[serde(skip)]
    pub(crate) content: Vec<u8>,
}

impl Attachment {
    /// Decoded attachment bytes
    pub fn content(&self) -> &[u8] {
        &self.content
    }
}

/// Body parts and attachments of a fully fetched message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    pub bodies: Vec<BodyPart>,
    pub attachments: Vec<Attachment>,
}

/// Snapshot of one received message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub(crate) number: u32,
    pub(crate) flags: FlagSet,
    pub(crate) envelope: Envelope,
    pub(crate) content: Option<MessageContent>,
}

impl ReceivedMessage {
    /// Sequence number in the folder it was received from
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Flags as seen by the caller (fetch-time flags plus requested changes)
    pub fn flags(&self) -> &FlagSet {
        &self.flags
    }

    /// Mutable flags, for a later [`update_email_flags`] call
    ///
    /// [`update_email_flags`]: crate::session::MailboxSession::update_email_flags
    pub fn flags_mut(&mut self) -> &mut FlagSet {
        &mut self.flags
    }

    pub fn is_seen(&self) -> bool {
        self.flags.contains_system(SystemFlag::Seen)
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn subject(&self) -> Option<&str> {
        self.envelope.subject.as_deref()
    }

    /// Whether only the envelope was fetched
    pub fn is_envelope_only(&self) -> bool {
        self.content.is_none()
    }

    /// Text body parts; empty for envelope-only snapshots
    pub fn bodies(&self) -> &[BodyPart] {
        self.content.as_ref().map_or(&[], |c| c.bodies.as_slice())
    }

    /// Attachments; empty for envelope-only snapshots
    pub fn attachments(&self) -> &[Attachment] {
        self.content.as_ref().map_or(&[], |c| c.attachments.as_slice())
    }
}
