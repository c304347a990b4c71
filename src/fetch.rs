//! Fetch plans and their execution
//!
//! A [`FetchPlan`] describes one receive request. [`FetchExecutor`] runs it
//! against a session in two separable phases: [`select`](FetchExecutor::select)
//! resolves the message numbers, [`process`](FetchExecutor::process)
//! materializes snapshots, runs the post-fetch action, synchronizes flags and
//! expunges when deletion was requested.

use serde::Serialize;

use crate::errors::{MailError, MailResult};
use crate::flags::{FlagSet, SystemFlag};
use crate::mime::{parse_envelope, parse_message};
use crate::models::ReceivedMessage;
use crate::service::{MailboxService, SearchPredicate};
use crate::session::MailboxSession;
use crate::sync::FlagSynchronizer;

/// Action run once over the whole selection before any flag is written
///
/// Copies therefore carry the flags the messages had on the server, never a
/// `\Deleted` requested by the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostFetchAction {
    /// Copy the selection into the named folder
    CopyTo(String),
}

/// Immutable receive request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchPlan {
    /// Search criteria; `None` selects every message
    pub predicate: Option<SearchPredicate>,
    pub flags_to_set: FlagSet,
    pub flags_to_unset: FlagSet,
    /// Fetch envelopes and flags only, in one batched round trip
    pub envelope_only: bool,
    pub post_action: Option<PostFetchAction>,
}

impl FetchPlan {
    /// Whether processing ends with an expunge on a writable folder
    pub fn expunges(&self) -> bool {
        self.flags_to_set.contains_system(SystemFlag::Deleted)
    }
}

/// Selected message numbers, in selection order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    numbers: Vec<u32>,
}

impl Selection {
    pub fn numbers(&self) -> &[u32] {
        &self.numbers
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

/// Runs [`FetchPlan`]s against a session
pub struct FetchExecutor<'s, S> {
    session: &'s mut MailboxSession<S>,
}

impl<'s, S: MailboxService> FetchExecutor<'s, S> {
    pub fn new(session: &'s mut MailboxSession<S>) -> Self {
        Self { session }
    }

    /// Select then process
    pub async fn execute(&mut self, plan: &FetchPlan) -> MailResult<Vec<ReceivedMessage>> {
        let selection = self.select(plan).await?;
        self.process(plan, &selection).await
    }

    /// Open the folder if needed and resolve the plan's selection
    ///
    /// # Errors
    ///
    /// `Folder` if no folder can be opened, `Fetch` if the search fails.
    pub async fn select(&mut self, plan: &FetchPlan) -> MailResult<Selection> {
        self.session.ensure_folder_open().await?;
        let (service, _) = self.session.parts();
        let numbers = match &plan.predicate {
            None => service.list_messages().await,
            Some(predicate) => service.search(predicate).await,
        }
        .map_err(MailError::Fetch)?;

        tracing::debug!(
            folder = self.session.current_folder().unwrap_or_default(),
            selected = numbers.len(),
            "messages selected"
        );
        Ok(Selection { numbers })
    }

    /// Materialize, run the post action, synchronize flags, expunge
    ///
    /// Every snapshot is built and the selection copied before any flag is
    /// touched. An empty selection returns immediately.
    ///
    /// # Errors
    ///
    /// - `Fetch` if a message cannot be fetched or parsed; nothing is
    ///   returned and no flag has been written yet
    /// - `Storage` if an attachment cannot be written
    /// - `Flag` if a requested flag write fails; the copy, if any, is done
    /// - `Move` if the copy fails; no flag has been written and the folder is
    ///   not expunged
    /// - `Folder` if the expunge fails
    pub async fn process(
        &mut self,
        plan: &FetchPlan,
        selection: &Selection,
    ) -> MailResult<Vec<ReceivedMessage>> {
        if selection.is_empty() {
            return Ok(Vec::new());
        }

        let mode = self.session.ensure_folder_open().await?;
        let folder = self.session.current_folder().unwrap_or_default().to_owned();
        let (service, storage) = self.session.parts();

        let mut messages = if plan.envelope_only {
            service
                .fetch_envelopes(selection.numbers())
                .await
                .map_err(MailError::Fetch)?
                .into_iter()
                .map(parse_envelope)
                .collect::<MailResult<Vec<_>>>()?
        } else {
            let mut messages = Vec::with_capacity(selection.len());
            for &number in selection.numbers() {
                let fetched = service.fetch_message(number).await.map_err(MailError::Fetch)?;
                messages.push(parse_message(fetched, storage)?);
            }
            messages
        };

        if let Some(PostFetchAction::CopyTo(target)) = &plan.post_action {
            service
                .copy_messages(selection.numbers(), target)
                .await
                .map_err(|source| MailError::Move {
                    folder: target.clone(),
                    source,
                })?;
            tracing::debug!(from = %folder, to = %target, count = selection.len(), "messages copied");
        }

        let mut sync = FlagSynchronizer::new(&mut *service, mode);
        for message in &mut messages {
            sync.apply_flags(message, &plan.flags_to_set, &plan.flags_to_unset)
                .await?;
        }
        let writable = sync.is_writable();

        if plan.expunges() && writable {
            service
                .expunge()
                .await
                .map_err(|source| MailError::folder(folder.as_str(), source))?;
            tracing::debug!(folder = %folder, "folder expunged");
        }

        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::{FetchPlan, PostFetchAction};
    use crate::config::SessionConfig;
    use crate::errors::{MailError, ServiceError};
    use crate::flags::{FlagSet, SystemFlag};
    use crate::mock::{Call, Fail, MockService, message_with_attachments};
    use crate::service::SearchPredicate;
    use crate::session::MailboxSession;

    fn session(service: MockService) -> MailboxSession<MockService> {
        MailboxSession::new(service, SessionConfig::default())
    }

    #[tokio::test]
    async fn empty_selection_makes_no_fetch_calls() {
        let mut s = session(MockService::new().with_messages("INBOX", 2));
        let plan = FetchPlan {
            predicate: Some(SearchPredicate::flag(SystemFlag::Deleted, true)),
            flags_to_set: FlagSet::from(SystemFlag::Seen),
            ..FetchPlan::default()
        };

        let messages = s.executor().execute(&plan).await.expect("execute");

        assert!(messages.is_empty());
        assert_eq!(s.service().count_calls(Call::is_fetch), 0);
        assert_eq!(s.service().count_calls(Call::is_store), 0);
        assert_eq!(s.service().count_calls(|c| *c == Call::Expunge), 0);
    }

    #[tokio::test]
    async fn deleting_three_messages_expunges_once() {
        let mut s = session(MockService::new().with_messages("INBOX", 3));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Deleted),
            ..FetchPlan::default()
        };

        let messages = s.executor().execute(&plan).await.expect("execute");

        assert_eq!(messages.len(), 3);
        assert!(
            messages
                .iter()
                .all(|m| m.flags().contains_system(SystemFlag::Deleted))
        );
        assert_eq!(s.service().count_calls(|c| *c == Call::Expunge), 1);
        assert_eq!(s.service().message_count_in("INBOX"), 0);
    }

    #[tokio::test]
    async fn envelope_only_uses_one_batched_call() {
        let mut s = session(
            MockService::new()
                .with_message("INBOX", FlagSet::new(), message_with_attachments("one", "<1@x>"))
                .with_message("INBOX", FlagSet::new(), message_with_attachments("two", "<2@x>")),
        );
        let plan = FetchPlan {
            envelope_only: true,
            ..FetchPlan::default()
        };

        let messages = s.executor().execute(&plan).await.expect("execute");

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.is_envelope_only() && m.attachments().is_empty()));
        assert_eq!(messages[1].subject(), Some("two"));
        assert_eq!(s.service().count_calls(Call::is_fetch), 1);
        assert!(s.service().calls().contains(&Call::FetchEnvelopes(vec![1, 2])));
    }

    #[tokio::test]
    async fn full_fetch_populates_attachments() {
        let mut s = session(
            MockService::new().with_message("INBOX", FlagSet::new(), message_with_attachments("a", "<a@x>")),
        );

        let messages = s.executor().execute(&FetchPlan::default()).await.expect("execute");

        assert_eq!(messages[0].attachments().len(), 2);
        assert_eq!(messages[0].attachments()[0].content(), b"XZX");
    }

    #[tokio::test]
    async fn read_only_mark_seen_issues_no_writes() {
        let mut s = session(MockService::new().with_messages("INBOX", 2).read_only("INBOX"));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Seen),
            ..FetchPlan::default()
        };

        let messages = s.executor().execute(&plan).await.expect("execute");

        assert!(messages.iter().all(|m| m.is_seen()));
        assert_eq!(s.service().count_calls(Call::is_store), 0);
        assert!(s.service().flags_in("INBOX").iter().all(FlagSet::is_empty));
    }

    #[tokio::test]
    async fn read_only_delete_never_expunges() {
        let mut s = session(MockService::new().with_messages("INBOX", 1).read_only("INBOX"));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Deleted),
            ..FetchPlan::default()
        };

        s.executor().execute(&plan).await.expect("execute");

        assert_eq!(s.service().count_calls(|c| *c == Call::Expunge), 0);
        assert_eq!(s.service().message_count_in("INBOX"), 1);
    }

    #[tokio::test]
    async fn content_is_parsed_before_flags_are_written() {
        let mut s = session(MockService::new().with_messages("INBOX", 2));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Flagged),
            ..FetchPlan::default()
        };

        s.executor().execute(&plan).await.expect("execute");

        let calls = s.service().calls();
        let last_fetch = calls.iter().rposition(|c| c.is_fetch()).expect("fetch");
        let first_store = calls.iter().position(|c| c.is_store()).expect("store");
        assert!(last_fetch < first_store);
    }

    #[tokio::test]
    async fn copy_runs_before_any_flag_write() {
        let mut s = session(MockService::new().with_folder("Archive").with_messages("INBOX", 2));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Deleted),
            post_action: Some(PostFetchAction::CopyTo("Archive".to_owned())),
            ..FetchPlan::default()
        };

        s.executor().execute(&plan).await.expect("execute");

        let calls = s.service().calls();
        let copy = calls
            .iter()
            .position(|c| matches!(c, Call::Copy(..)))
            .expect("copy");
        let first_store = calls.iter().position(|c| c.is_store()).expect("store");
        assert!(copy < first_store);
        assert!(s.service().flags_in("Archive").iter().all(FlagSet::is_empty));
    }

    #[tokio::test]
    async fn fetch_failure_returns_nothing_and_writes_nothing() {
        let mut s = session(MockService::new().with_messages("INBOX", 2).failing(Fail::FetchMessage));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Deleted),
            ..FetchPlan::default()
        };

        let err = s.executor().execute(&plan).await.expect_err("fetch fails");

        assert!(matches!(err, MailError::Fetch(ServiceError::Protocol(_))));
        assert_eq!(s.service().count_calls(Call::is_store), 0);
        assert_eq!(s.service().count_calls(|c| *c == Call::Expunge), 0);
    }

    #[tokio::test]
    async fn search_failure_is_fetch_error() {
        let mut s = session(MockService::new().failing(Fail::Search));
        let plan = FetchPlan {
            predicate: Some(SearchPredicate::subject("x")),
            ..FetchPlan::default()
        };

        assert!(matches!(s.executor().execute(&plan).await, Err(MailError::Fetch(_))));
    }

    #[tokio::test]
    async fn expunge_failure_is_folder_error() {
        let mut s = session(MockService::new().with_messages("INBOX", 1).failing(Fail::Expunge));
        let plan = FetchPlan {
            flags_to_set: FlagSet::from(SystemFlag::Deleted),
            ..FetchPlan::default()
        };

        let err = s.executor().execute(&plan).await.expect_err("expunge fails");
        assert!(matches!(err, MailError::Folder { ref folder, .. } if folder == "INBOX"));
    }

    #[test]
    fn plan_serializes_for_logging() {
        let plan = FetchPlan {
            predicate: Some(SearchPredicate::flag(SystemFlag::Seen, false)),
            envelope_only: true,
            post_action: Some(PostFetchAction::CopyTo("Archive".to_owned())),
            ..FetchPlan::default()
        };

        let json = serde_json::to_value(&plan).expect("serialize");
        assert_eq!(json["predicate"], "UNSEEN");
        assert_eq!(json["envelope_only"], true);
        assert_eq!(json["post_action"]["copy_to"], "Archive");
    }
}
