//! Flag synchronization between snapshots and the server
//!
//! Requested flags always land on the in-memory snapshot. They are written to
//! the server only when the folder is writable; a backend that reports flag
//! writes as unsupported is treated as read-only from then on.

use crate::errors::{MailError, MailResult, ServiceError};
use crate::flags::{FlagSet, SystemFlag};
use crate::models::ReceivedMessage;
use crate::service::{FolderMode, MailboxService};

pub struct FlagSynchronizer<'a, S> {
    service: &'a mut S,
    writable: bool,
}

impl<'a, S: MailboxService> FlagSynchronizer<'a, S> {
    pub fn new(service: &'a mut S, mode: FolderMode) -> Self {
        Self {
            service,
            writable: mode.is_writable(),
        }
    }

    /// Whether server writes are still attempted
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Apply requested flag changes to `message` and, if writable, the server
    ///
    /// With nothing to set and a snapshot that is not seen, `\Seen` is
    /// cleared on the server, undoing a fetch that marked it. That clear is
    /// best effort: its failure is logged and dropped.
    ///
    /// # Errors
    ///
    /// `Flag` if a requested write is rejected.
    pub async fn apply_flags(
        &mut self,
        message: &mut ReceivedMessage,
        to_set: &FlagSet,
        to_unset: &FlagSet,
    ) -> MailResult<()> {
        let number = message.number();

        if !to_set.is_empty() {
            message.flags_mut().insert_all(to_set);
            self.write(number, to_set, true).await?;
        }

        if !to_unset.is_empty() {
            message.flags_mut().remove_all(to_unset);
            self.write(number, to_unset, false).await?;
        }

        if to_set.is_empty() && !message.is_seen() && self.writable {
            let seen = FlagSet::from(SystemFlag::Seen);
            if let Err(error) = self.service.store_flags(number, &seen, false).await {
                tracing::debug!(number, %error, "could not restore unseen state");
            }
        }
        Ok(())
    }

    /// Write the snapshot's whole flag set to the server
    ///
    /// # Errors
    ///
    /// `Flag` if the server rejects the write.
    pub async fn update_flags(&mut self, message: &ReceivedMessage) -> MailResult<()> {
        let number = message.number();
        self.service
            .store_flags(number, message.flags(), true)
            .await
            .map_err(|source| MailError::Flag { number, source })
    }

    async fn write(&mut self, number: u32, flags: &FlagSet, value: bool) -> MailResult<()> {
        if !self.writable {
            return Ok(());
        }
        match self.service.store_flags(number, flags, value).await {
            Ok(()) => Ok(()),
            Err(ServiceError::Unsupported(reason)) => {
                tracing::debug!(number, %reason, "flag writes unsupported, continuing read-only");
                self.writable = false;
                Ok(())
            }
            Err(source) => Err(MailError::Flag { number, source }),
        }
    }
}
