//! Deferred receive pipeline
//!
//! [`ReceiveBuilder`] only accumulates intent. The network is touched by
//! [`ReceiveBuilder::get`] or by the [`ReceiveRunner`] returned from
//! [`ReceiveBuilder::with`].
//!
//! ```no_run
//! # use mail_receive::service::{MailboxService, SearchPredicate};
//! # use mail_receive::session::MailboxSession;
//! # use mail_receive::flags::SystemFlag;
//! # async fn demo<S: MailboxService>(session: &mut MailboxSession<S>) -> mail_receive::errors::MailResult<()> {
//! let moved = session
//!     .receive()
//!     .from_folder("INBOX")
//!     .filter(SearchPredicate::flag(SystemFlag::Seen, false))
//!     .move_to_folder("Archive")
//!     .get()
//!     .await?;
//! # let _ = moved;
//! # Ok(())
//! # }
//! ```

use crate::errors::MailResult;
use crate::fetch::{FetchPlan, PostFetchAction, Selection};
use crate::flags::{Flag, FlagSet, SystemFlag};
use crate::models::ReceivedMessage;
use crate::service::{MailboxService, SearchPredicate};
use crate::session::MailboxSession;

/// Accumulates a receive request without network access
#[must_use = "nothing is received until get() or with(..) is called"]
pub struct ReceiveBuilder<'s, S> {
    session: &'s mut MailboxSession<S>,
    filter: Option<SearchPredicate>,
    flags_to_set: FlagSet,
    flags_to_unset: FlagSet,
    from_folder: Option<String>,
    target_folder: Option<String>,
    envelope_only: bool,
}

impl<'s, S: MailboxService> ReceiveBuilder<'s, S> {
    pub(crate) fn new(session: &'s mut MailboxSession<S>) -> Self {
        Self {
            session,
            filter: None,
            flags_to_set: FlagSet::new(),
            flags_to_unset: FlagSet::new(),
            from_folder: None,
            target_folder: None,
            envelope_only: false,
        }
    }

    /// Only receive messages matching `predicate`
    pub fn filter(mut self, predicate: SearchPredicate) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub(crate) fn filter_opt(mut self, predicate: Option<SearchPredicate>) -> Self {
        self.filter = predicate;
        self
    }

    pub fn mark_seen(self) -> Self {
        self.mark(SystemFlag::Seen)
    }

    /// Set `flag` on every received message
    pub fn mark(mut self, flag: impl Into<Flag>) -> Self {
        self.flags_to_set.insert(flag);
        self
    }

    /// Clear `flag` on every received message
    pub fn unmark(mut self, flag: impl Into<Flag>) -> Self {
        self.flags_to_unset.insert(flag);
        self
    }

    /// Mark received messages deleted; the folder is expunged afterwards
    pub fn mark_deleted(self) -> Self {
        self.mark(SystemFlag::Deleted)
    }

    /// Open `folder` before selecting
    pub fn from_folder(mut self, folder: impl Into<String>) -> Self {
        self.from_folder = Some(folder.into());
        self
    }

    /// Copy received messages to `folder`, then delete them here
    pub fn move_to_folder(mut self, folder: impl Into<String>) -> Self {
        self.target_folder = Some(folder.into());
        self.mark_deleted()
    }

    /// Fetch envelopes and flags only
    pub fn envelope_only(mut self) -> Self {
        self.envelope_only = true;
        self
    }

    /// The plan a terminal call would execute
    pub fn plan(&self) -> FetchPlan {
        FetchPlan {
            predicate: self.filter.clone(),
            flags_to_set: self.flags_to_set.clone(),
            flags_to_unset: self.flags_to_unset.clone(),
            envelope_only: self.envelope_only,
            post_action: self.target_folder.clone().map(PostFetchAction::CopyTo),
        }
    }

    /// Receive now
    pub async fn get(self) -> MailResult<Vec<ReceivedMessage>> {
        self.with(|_: &Selection| {}).fetch().await
    }

    /// Defer the work to a runner that hands the selection to `consumer`
    /// before processing
    pub fn with<C>(self, consumer: C) -> ReceiveRunner<'s, S, C>
    where
        C: FnOnce(&Selection),
    {
        let plan = self.plan();
        tracing::debug!(plan = ?plan, from_folder = ?self.from_folder, "receive planned");
        ReceiveRunner {
            session: self.session,
            plan,
            from_folder: self.from_folder,
            consumer: Some(consumer),
            selection: None,
        }
    }
}

/// Handle to a planned receive
#[must_use = "nothing is received until run() or fetch() is called"]
pub struct ReceiveRunner<'s, S, C> {
    session: &'s mut MailboxSession<S>,
    plan: FetchPlan,
    from_folder: Option<String>,
    consumer: Option<C>,
    selection: Option<Selection>,
}

impl<'s, S, C> ReceiveRunner<'s, S, C>
where
    S: MailboxService,
    C: FnOnce(&Selection),
{
    pub fn plan(&self) -> &FetchPlan {
        &self.plan
    }

    /// Select messages and hand the unprocessed selection to the consumer
    ///
    /// Nothing has been fetched or flagged when the consumer runs.
    pub async fn run(mut self) -> MailResult<Self> {
        self.ensure_selected().await?;
        if let (Some(consumer), Some(selection)) = (self.consumer.take(), &self.selection) {
            consumer(selection);
        }
        Ok(self)
    }

    /// Process the selection, selecting first if [`run`](Self::run) was not
    /// called
    ///
    /// # Errors
    ///
    /// See [`FetchExecutor::process`](crate::fetch::FetchExecutor::process);
    /// a failed copy to the move target surfaces as `Move` and nothing is
    /// expunged.
    pub async fn fetch(mut self) -> MailResult<Vec<ReceivedMessage>> {
        self.ensure_selected().await?;
        let selection = self.selection.take().unwrap_or_default();
        self.session.executor().process(&self.plan, &selection).await
    }

    async fn ensure_selected(&mut self) -> MailResult<()> {
        if self.selection.is_some() {
            return Ok(());
        }
        if let Some(folder) = self.from_folder.take() {
            self.session.use_folder(&folder).await?;
        }
        self.selection = Some(self.session.executor().select(&self.plan).await?);
        Ok(())
    }
}
