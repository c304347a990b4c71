//! IMAP mailbox service
//!
//! [`ImapService`] implements [`MailboxService`] over `async-imap`. Every
//! network call is bounded by a timeout derived from [`ReceiveConfig`], and
//! only TLS connections are accepted. Message content is always read with
//! `BODY.PEEK`, so fetching never sets `\Seen` on its own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag as ImapFlag};
use async_imap::{Client, Session};
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls::ClientConfig;
use rustls::RootCertStore;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use utf7_imap::{decode_utf7_imap as decode_utf7, encode_utf7_imap as encode_utf7};

use crate::config::{AccountConfig, ReceiveConfig};
use crate::errors::{MailError, MailResult, ServiceError, ServiceResult};
use crate::flags::{Flag, FlagSet, SystemFlag, is_keyword_atom};
use crate::service::{
    FetchedHeaders, FetchedMessage, FolderMode, MailboxService, MessageCounter, SearchPredicate,
};
use crate::trace::DebugTrace;

/// Authenticated IMAP session over TLS
pub type ImapSession = Session<tokio_rustls::client::TlsStream<TcpStream>>;

/// Header fields requested by the envelope prefetch
const ENVELOPE_QUERY: &str =
    "FLAGS BODY.PEEK[HEADER.FIELDS (DATE FROM TO CC REPLY-TO SUBJECT MESSAGE-ID)]";

const MESSAGE_QUERY: &str = "FLAGS BODY.PEEK[]";

/// IMAP backend
pub struct ImapService {
    session: ImapSession,
    socket_timeout: Duration,
    /// Mode of the selected folder; `None` when nothing is selected
    selected: Option<FolderMode>,
    trace: Option<DebugTrace>,
}

impl ImapService {
    /// Connect to the account's server and authenticate
    ///
    /// Performs the full connection sequence with timeouts:
    /// 1. TCP connect (`timeouts.connect`)
    /// 2. TLS handshake with webpki root certificates (`timeouts.greeting`)
    /// 3. IMAP greeting (`timeouts.greeting`)
    /// 4. LOGIN (`timeouts.greeting`)
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if `secure` is false or the host is not a valid SNI name
    /// - `Connection` wrapping `Timeout`, `AuthFailed` or `Protocol` otherwise
    pub async fn connect(
        config: &ReceiveConfig,
        account: &AccountConfig,
        trace: Option<DebugTrace>,
    ) -> MailResult<Self> {
        if !account.secure {
            return Err(MailError::invalid(
                "insecure IMAP is not supported; set MAIL_RECEIVE_<ACCOUNT>_SECURE=true",
            ));
        }

        let connect_duration = config.timeouts.connect;
        let greeting_duration = config.timeouts.greeting;

        let tcp = timeout(
            connect_duration,
            TcpStream::connect((account.host.as_str(), account.port)),
        )
        .await
        .map_err(|_| ServiceError::Timeout("tcp connect timeout".to_owned()))
        .and_then(|r| r.map_err(|e| ServiceError::Protocol(format!("tcp connect failed: {e}"))))
        .map_err(MailError::Connection)?;

        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(account.host.clone())
            .map_err(|_| MailError::invalid("invalid IMAP host for TLS SNI"))?;
        let tls_stream = timeout(greeting_duration, connector.connect(server_name, tcp))
            .await
            .map_err(|_| ServiceError::Timeout("TLS handshake timeout".to_owned()))
            .and_then(|r| {
                r.map_err(|e| ServiceError::Protocol(format!("TLS handshake failed: {e}")))
            })
            .map_err(MailError::Connection)?;

        let mut client = Client::new(tls_stream);
        let greeting = timeout(greeting_duration, client.read_response())
            .await
            .map_err(|_| ServiceError::Timeout("IMAP greeting timeout".to_owned()))
            .and_then(|r| {
                r.map_err(|e| ServiceError::Protocol(format!("IMAP greeting failed: {e}")))
            })
            .map_err(MailError::Connection)?;

        if greeting.is_none() {
            return Err(MailError::Connection(ServiceError::Protocol(
                "IMAP server closed connection before greeting".to_owned(),
            )));
        }

        let pass = account.pass.expose_secret();
        let session = timeout(greeting_duration, client.login(account.user.as_str(), pass))
            .await
            .map_err(|_| ServiceError::Timeout("IMAP login timeout".to_owned()))
            .and_then(|r| {
                r.map_err(|(e, _)| {
                    let msg = e.to_string();
                    if msg.to_ascii_lowercase().contains("auth") || msg.contains("LOGIN") {
                        ServiceError::AuthFailed(msg)
                    } else {
                        ServiceError::Protocol(msg)
                    }
                })
            })
            .map_err(MailError::Connection)?;

        tracing::info!(account_id = %account.account_id, host = %account.host, "imap session established");
        if let Some(trace) = &trace {
            trace.record(&format!("* connected to {}:{} as {}", account.host, account.port, account.user));
        }

        Ok(Self {
            session,
            socket_timeout: config.timeouts.socket,
            selected: None,
            trace,
        })
    }

    fn trace(&self, line: impl AsRef<str>) {
        if let Some(trace) = &self.trace {
            trace.record(line.as_ref());
        }
    }

    fn selected(&self) -> ServiceResult<FolderMode> {
        self.selected
            .ok_or_else(|| ServiceError::Protocol("no folder is open".to_owned()))
    }

    async fn search_numbers(&mut self, query: &str) -> ServiceResult<Vec<u32>> {
        self.selected()?;
        self.trace(format!("C: SEARCH {query}"));
        let set = bounded(self.socket_timeout, "SEARCH", self.session.search(query)).await?;
        let mut numbers: Vec<u32> = set.into_iter().collect();
        numbers.sort_unstable();
        self.trace(format!("S: {} match(es)", numbers.len()));
        Ok(numbers)
    }

    async fn fetch_all(&mut self, sequence_set: &str, query: &str) -> ServiceResult<Vec<Fetch>> {
        self.selected()?;
        self.trace(format!("C: FETCH {sequence_set} ({query})"));
        let dur = self.socket_timeout;
        let stream = bounded(dur, "FETCH", self.session.fetch(sequence_set, query)).await?;
        let fetches: Vec<Fetch> = bounded(dur, "FETCH stream", stream.try_collect()).await?;
        self.trace(format!("S: {} fetch response(s)", fetches.len()));
        Ok(fetches)
    }
}

/// Bound a protocol future by `dur`, mapping both failure kinds
async fn bounded<T, E: std::fmt::Display>(
    dur: Duration,
    label: &str,
    fut: impl Future<Output = Result<T, E>>,
) -> ServiceResult<T> {
    timeout(dur, fut)
        .await
        .map_err(|_| ServiceError::Timeout(format!("{label} timed out")))
        .and_then(|r| r.map_err(|e| ServiceError::Protocol(format!("{label} failed: {e}"))))
}

/// Convert fetch flags into a [`FlagSet`]
///
/// Unknown backslash flags and `\*` are dropped.
fn convert_flags(fetch: &Fetch) -> FlagSet {
    fetch
        .flags()
        .filter_map(|flag| match flag {
            ImapFlag::Seen => Some(Flag::from(SystemFlag::Seen)),
            ImapFlag::Answered => Some(Flag::from(SystemFlag::Answered)),
            ImapFlag::Flagged => Some(Flag::from(SystemFlag::Flagged)),
            ImapFlag::Deleted => Some(Flag::from(SystemFlag::Deleted)),
            ImapFlag::Draft => Some(Flag::from(SystemFlag::Draft)),
            ImapFlag::Recent => Some(Flag::from(SystemFlag::Recent)),
            ImapFlag::Custom(name) => name.parse::<Flag>().ok(),
            _ => None,
        })
        .collect()
}

fn sequence_set(numbers: &[u32]) -> String {
    numbers
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl MailboxService for ImapService {
    async fn list_folders(&mut self) -> ServiceResult<Vec<String>> {
        self.trace("C: LIST \"\" *");
        let dur = self.socket_timeout;
        let stream = bounded(dur, "LIST", self.session.list(Some(""), Some("*"))).await?;
        let names: Vec<async_imap::types::Name> =
            bounded(dur, "LIST stream", stream.try_collect()).await?;
        self.trace(format!("S: {} folder(s)", names.len()));
        Ok(names
            .iter()
            .map(|name| decode_utf7(name.name().to_owned()))
            .collect())
    }

    async fn open_folder(&mut self, name: &str, mode: FolderMode) -> ServiceResult<()> {
        let encoded = encode_utf7(name.to_owned());
        let dur = self.socket_timeout;
        // a failed SELECT leaves no folder selected on the server either
        self.selected = None;
        let mailbox = match mode {
            FolderMode::ReadWrite => {
                self.trace(format!("C: SELECT {encoded}"));
                bounded(dur, "SELECT", self.session.select(&encoded)).await?
            }
            FolderMode::ReadOnly => {
                self.trace(format!("C: EXAMINE {encoded}"));
                bounded(dur, "EXAMINE", self.session.examine(&encoded)).await?
            }
        };
        self.trace(format!("S: {} EXISTS {} RECENT", mailbox.exists, mailbox.recent));
        tracing::debug!(folder = name, ?mode, exists = mailbox.exists, "folder opened");
        self.selected = Some(mode);
        Ok(())
    }

    /// `CLOSE` expunges a read-write folder implicitly; without `expunge`
    /// the selection is simply dropped and the next `SELECT` or `LOGOUT`
    /// deselects it on the server.
    async fn close_folder(&mut self, expunge: bool) -> ServiceResult<()> {
        let Some(mode) = self.selected.take() else {
            return Ok(());
        };
        if expunge || !mode.is_writable() {
            self.trace("C: CLOSE");
            bounded(self.socket_timeout, "CLOSE", self.session.close()).await?;
        }
        Ok(())
    }

    /// Counted by `SEARCH`, so mail that arrived after `SELECT` is included
    async fn count(&mut self, counter: MessageCounter) -> ServiceResult<u32> {
        let numbers = self.search_numbers(counter_query(counter)).await?;
        Ok(len_u32(numbers.len()))
    }

    async fn list_messages(&mut self) -> ServiceResult<Vec<u32>> {
        self.search_numbers(counter_query(MessageCounter::Total)).await
    }

    async fn search(&mut self, predicate: &SearchPredicate) -> ServiceResult<Vec<u32>> {
        self.search_numbers(predicate.as_str()).await
    }

    async fn fetch_envelopes(&mut self, numbers: &[u32]) -> ServiceResult<Vec<FetchedHeaders>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let fetches = self.fetch_all(&sequence_set(numbers), ENVELOPE_QUERY).await?;

        numbers
            .iter()
            .map(|&number| {
                let fetch = fetches
                    .iter()
                    .find(|f| f.message == number)
                    .ok_or_else(|| {
                        ServiceError::Malformed(format!("no envelope returned for message {number}"))
                    })?;
                let header = fetch
                    .header()
                    .or_else(|| fetch.body())
                    .ok_or_else(|| {
                        ServiceError::Malformed(format!("headers of message {number} not available"))
                    })?
                    .to_vec();
                Ok(FetchedHeaders {
                    number,
                    flags: convert_flags(fetch),
                    header,
                })
            })
            .collect()
    }

    async fn fetch_message(&mut self, number: u32) -> ServiceResult<FetchedMessage> {
        let fetches = self.fetch_all(&number.to_string(), MESSAGE_QUERY).await?;
        let fetch = fetches
            .iter()
            .find(|f| f.message == number)
            .ok_or_else(|| ServiceError::Malformed(format!("message {number} not found")))?;
        let raw = fetch
            .body()
            .ok_or_else(|| ServiceError::Malformed(format!("message {number} has no body")))?
            .to_vec();
        Ok(FetchedMessage {
            number,
            flags: convert_flags(fetch),
            raw,
        })
    }

    async fn store_flags(&mut self, number: u32, flags: &FlagSet, value: bool) -> ServiceResult<()> {
        if !self.selected()?.is_writable() {
            return Err(ServiceError::Unsupported(
                "flags cannot be stored in a read-only folder".to_owned(),
            ));
        }
        if let Some(name) = flags.user_flags().find(|name| !is_keyword_atom(name)) {
            return Err(ServiceError::Malformed(format!(
                "keyword '{name}' is not an IMAP atom"
            )));
        }
        let op = if value { "+FLAGS.SILENT" } else { "-FLAGS.SILENT" };
        let query = format!("{op} {}", flags.to_imap_list());
        self.trace(format!("C: STORE {number} {query}"));
        let dur = self.socket_timeout;
        let stream = bounded(dur, "STORE", self.session.store(number.to_string(), &query)).await?;
        let _: Vec<Fetch> = bounded(dur, "STORE stream", stream.try_collect()).await?;
        Ok(())
    }

    async fn expunge(&mut self) -> ServiceResult<()> {
        self.selected()?;
        self.trace("C: EXPUNGE");
        let dur = self.socket_timeout;
        let stream = bounded(dur, "EXPUNGE", self.session.expunge()).await?;
        let expunged: Vec<u32> = bounded(dur, "EXPUNGE stream", stream.try_collect()).await?;
        self.trace(format!("S: {} EXPUNGE", expunged.len()));
        Ok(())
    }

    async fn copy_messages(&mut self, numbers: &[u32], target: &str) -> ServiceResult<()> {
        if numbers.is_empty() {
            return Ok(());
        }
        self.selected()?;
        let set = sequence_set(numbers);
        let encoded = encode_utf7(target.to_owned());
        self.trace(format!("C: COPY {set} {encoded}"));
        bounded(self.socket_timeout, "COPY", self.session.copy(&set, &encoded)).await
    }

    async fn logout(&mut self) -> ServiceResult<()> {
        self.selected = None;
        self.trace("C: LOGOUT");
        bounded(self.socket_timeout, "LOGOUT", self.session.logout()).await
    }
}

/// Search key behind each server-maintained counter
fn counter_query(counter: MessageCounter) -> &'static str {
    match counter {
        MessageCounter::Total => "ALL",
        MessageCounter::New => "RECENT",
        MessageCounter::Unread => "UNSEEN",
        MessageCounter::Deleted => "DELETED",
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
