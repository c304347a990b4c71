//! Mailbox session and folder lifecycle
//!
//! A [`MailboxSession`] owns one connected [`MailboxService`] and keeps at
//! most one folder open. Opening another folder, or closing the session,
//! closes the current one first and expunges messages flagged deleted.
//!
//! Operations that need a folder open it lazily: the last folder used, or
//! [`DEFAULT_FOLDER`] when none was ever chosen.

use crate::config::SessionConfig;
use crate::errors::{MailError, MailResult};
use crate::fetch::FetchExecutor;
use crate::flags::SystemFlag;
use crate::models::ReceivedMessage;
use crate::receive::ReceiveBuilder;
use crate::service::{FolderMode, MailboxService, MessageCounter, SearchPredicate};
use crate::storage::AttachmentStorage;
use crate::sync::FlagSynchronizer;

/// Folder opened when nothing else was requested
pub const DEFAULT_FOLDER: &str = "INBOX";

/// Open folder state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderState {
    Closed,
    Open { name: String, mode: FolderMode },
}

/// Receiving session over a mailbox service
#[derive(Debug)]
pub struct MailboxSession<S> {
    service: S,
    state: FolderState,
    last_folder: Option<String>,
    storage: Option<AttachmentStorage>,
    closed: bool,
}

impl<S: MailboxService> MailboxSession<S> {
    /// Wrap a connected service
    pub fn new(service: S, config: SessionConfig) -> Self {
        Self {
            service,
            state: FolderState::Closed,
            last_folder: None,
            storage: config.attachment_storage.map(AttachmentStorage::new),
            closed: false,
        }
    }

    /// Every folder reachable from the root, depth unbounded
    ///
    /// # Errors
    ///
    /// `Connection` if the service cannot enumerate folders.
    pub async fn list_folders(&mut self) -> MailResult<Vec<String>> {
        self.ensure_usable()?;
        self.service.list_folders().await.map_err(MailError::Connection)
    }

    /// Open `name` read-write, falling back to read-only
    pub async fn use_folder(&mut self, name: &str) -> MailResult<FolderMode> {
        self.use_folder_with_mode(name, FolderMode::ReadWrite).await
    }

    /// Close the open folder (expunging) and open `name` in `mode`
    ///
    /// A refused read-write open is retried once read-only. Returns the mode
    /// actually granted.
    ///
    /// # Errors
    ///
    /// `Folder` if the folder cannot be opened even read-only.
    pub async fn use_folder_with_mode(
        &mut self,
        name: &str,
        mode: FolderMode,
    ) -> MailResult<FolderMode> {
        self.ensure_usable()?;
        if name.trim().is_empty() {
            return Err(MailError::invalid("folder name must not be empty"));
        }

        self.close_folder().await;
        self.last_folder = Some(name.to_owned());

        let granted = match self.service.open_folder(name, mode).await {
            Ok(()) => mode,
            Err(error) if mode.is_writable() => {
                tracing::debug!(folder = name, %error, "read-write open refused, retrying read-only");
                self.service
                    .open_folder(name, FolderMode::ReadOnly)
                    .await
                    .map_err(|source| MailError::folder(name, source))?;
                FolderMode::ReadOnly
            }
            Err(source) => return Err(MailError::folder(name, source)),
        };

        tracing::debug!(folder = name, mode = ?granted, "folder open");
        self.state = FolderState::Open {
            name: name.to_owned(),
            mode: granted,
        };
        Ok(granted)
    }

    pub async fn use_default_folder(&mut self) -> MailResult<FolderMode> {
        self.use_folder(DEFAULT_FOLDER).await
    }

    /// Mode of the open folder, opening the last-used or default folder first
    pub async fn ensure_folder_open(&mut self) -> MailResult<FolderMode> {
        if let FolderState::Open { mode, .. } = &self.state {
            return Ok(*mode);
        }
        let name = self
            .last_folder
            .clone()
            .unwrap_or_else(|| DEFAULT_FOLDER.to_owned());
        self.use_folder(&name).await
    }

    /// Total number of messages in the folder
    pub async fn message_count(&mut self) -> MailResult<u32> {
        self.counter(MessageCounter::Total).await
    }

    /// Number of recent messages
    pub async fn new_message_count(&mut self) -> MailResult<u32> {
        self.counter(MessageCounter::New).await
    }

    /// Number of messages without `\Seen`
    pub async fn unread_message_count(&mut self) -> MailResult<u32> {
        self.counter(MessageCounter::Unread).await
    }

    /// Number of messages flagged `\Deleted` but not yet expunged
    pub async fn deleted_message_count(&mut self) -> MailResult<u32> {
        self.counter(MessageCounter::Deleted).await
    }

    async fn counter(&mut self, counter: MessageCounter) -> MailResult<u32> {
        self.ensure_folder_open().await?;
        let folder = self.current_folder().unwrap_or(DEFAULT_FOLDER).to_owned();
        self.service
            .count(counter)
            .await
            .map_err(|source| MailError::folder(folder, source))
    }

    /// Deferred receive pipeline; nothing touches the server until a
    /// terminal call
    pub fn receive(&mut self) -> ReceiveBuilder<'_, S> {
        ReceiveBuilder::new(self)
    }

    /// Fetch matching messages (all when `filter` is `None`) without
    /// changing their flags
    pub async fn receive_email(
        &mut self,
        filter: Option<SearchPredicate>,
    ) -> MailResult<Vec<ReceivedMessage>> {
        self.receive().filter_opt(filter).get().await
    }

    /// Fetch matching messages and mark them seen
    pub async fn receive_email_and_mark_seen(
        &mut self,
        filter: Option<SearchPredicate>,
    ) -> MailResult<Vec<ReceivedMessage>> {
        self.receive().filter_opt(filter).mark_seen().get().await
    }

    /// Fetch matching messages, then mark them seen and deleted
    ///
    /// The folder is expunged once all messages are processed.
    pub async fn receive_email_and_delete(
        &mut self,
        filter: Option<SearchPredicate>,
    ) -> MailResult<Vec<ReceivedMessage>> {
        self.receive()
            .filter_opt(filter)
            .mark(SystemFlag::Seen)
            .mark_deleted()
            .get()
            .await
    }

    /// Envelopes and flags of matching messages, one batched round trip
    pub async fn receive_envelopes(
        &mut self,
        filter: Option<SearchPredicate>,
    ) -> MailResult<Vec<ReceivedMessage>> {
        self.receive().filter_opt(filter).envelope_only().get().await
    }

    /// Write `message`'s flags back to the server
    ///
    /// # Errors
    ///
    /// `Flag` if the server rejects the write.
    pub async fn update_email_flags(&mut self, message: &ReceivedMessage) -> MailResult<()> {
        let mode = self.ensure_folder_open().await?;
        FlagSynchronizer::new(&mut self.service, mode)
            .update_flags(message)
            .await
    }

    /// Close the open folder (expunging) and log out
    ///
    /// Idempotent: later calls do nothing.
    ///
    /// # Errors
    ///
    /// `Connection` if logout fails; the session is closed regardless.
    pub async fn close(&mut self) -> MailResult<()> {
        if self.closed {
            return Ok(());
        }
        self.close_folder().await;
        self.closed = true;
        self.service.logout().await.map_err(MailError::Connection)
    }

    /// Name of the open folder
    pub fn current_folder(&self) -> Option<&str> {
        match &self.state {
            FolderState::Open { name, .. } => Some(name),
            FolderState::Closed => None,
        }
    }

    /// Mode granted to the open folder
    pub fn folder_mode(&self) -> Option<FolderMode> {
        match &self.state {
            FolderState::Open { mode, .. } => Some(*mode),
            FolderState::Closed => None,
        }
    }

    pub fn state(&self) -> &FolderState {
        &self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut S {
        &mut self.service
    }

    pub(crate) fn executor(&mut self) -> FetchExecutor<'_, S> {
        FetchExecutor::new(self)
    }

    /// Service and attachment storage, borrowed together
    pub(crate) fn parts(&mut self) -> (&mut S, Option<&AttachmentStorage>) {
        (&mut self.service, self.storage.as_ref())
    }

    /// Close the open folder, expunging; failures are logged and swallowed
    async fn close_folder(&mut self) {
        let FolderState::Open { name, .. } = std::mem::replace(&mut self.state, FolderState::Closed)
        else {
            return;
        };
        if let Err(error) = self.service.close_folder(true).await {
            tracing::warn!(folder = %name, %error, "failed to close folder");
        }
    }

    fn ensure_usable(&self) -> MailResult<()> {
        if self.closed {
            Err(MailError::invalid("session is closed"))
        } else {
            Ok(())
        }
    }
}
