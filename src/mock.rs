//! In-memory mailbox service for tests
//!
//! Records every call so tests can assert on exact round trips, and can be
//! told to fail specific operations.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use mailparse::MailHeaderMap;

use crate::errors::{ServiceError, ServiceResult};
use crate::flags::{FlagSet, SystemFlag};
use crate::service::{
    FetchedHeaders, FetchedMessage, FolderMode, MailboxService, MessageCounter, SearchPredicate,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListFolders,
    Open(String, FolderMode),
    Close { expunge: bool },
    Count(MessageCounter),
    ListMessages,
    Search(String),
    FetchEnvelopes(Vec<u32>),
    FetchMessage(u32),
    Store { number: u32, flags: FlagSet, value: bool },
    Expunge,
    Copy(Vec<u32>, String),
    Logout,
}

impl Call {
    pub fn is_store(&self) -> bool {
        matches!(self, Call::Store { .. })
    }

    pub fn is_fetch(&self) -> bool {
        matches!(self, Call::FetchEnvelopes(_) | Call::FetchMessage(_))
    }
}

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Fail {
    ListFolders,
    OpenReadOnly,
    Close,
    Search,
    FetchMessage,
    StoreSet,
    StoreUnset,
    Expunge,
    Copy,
    Logout,
}

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub flags: FlagSet,
    pub raw: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MockService {
    folders: BTreeMap<String, Vec<MockMessage>>,
    read_only: BTreeSet<String>,
    failing: BTreeSet<Fail>,
    no_flag_writes: bool,
    seen_on_fetch: bool,
    open: Option<(String, FolderMode)>,
    calls: Vec<Call>,
}

impl MockService {
    /// Service with an empty INBOX
    pub fn new() -> Self {
        Self::default().with_folder("INBOX")
    }

    pub fn with_folder(mut self, name: &str) -> Self {
        self.folders.entry(name.to_owned()).or_default();
        self
    }

    pub fn with_message(mut self, folder: &str, flags: FlagSet, raw: Vec<u8>) -> Self {
        self.folders
            .entry(folder.to_owned())
            .or_default()
            .push(MockMessage { flags, raw });
        self
    }

    /// Add `n` plain messages titled `Mail : 1`..`Mail : n`
    pub fn with_messages(mut self, folder: &str, n: usize) -> Self {
        for i in 1..=n {
            self = self.with_message(folder, FlagSet::new(), text_message(&format!("Mail : {i}")));
        }
        self
    }

    /// Read-write opens of `folder` are refused
    pub fn read_only(mut self, folder: &str) -> Self {
        self.read_only.insert(folder.to_owned());
        self
    }

    /// POP-like: every flag write is reported unsupported
    pub fn without_flag_writes(mut self) -> Self {
        self.no_flag_writes = true;
        self
    }

    /// Fetching full content marks the message seen, like a non-PEEK fetch
    pub fn marks_seen_on_fetch(mut self) -> Self {
        self.seen_on_fetch = true;
        self
    }

    pub fn failing(mut self, op: Fail) -> Self {
        self.failing.insert(op);
        self
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Server-side flags of every message in `folder`
    pub fn flags_in(&self, folder: &str) -> Vec<FlagSet> {
        self.folders
            .get(folder)
            .map(|msgs| msgs.iter().map(|m| m.flags.clone()).collect())
            .unwrap_or_default()
    }

    pub fn message_count_in(&self, folder: &str) -> usize {
        self.folders.get(folder).map_or(0, Vec::len)
    }

    fn check(&self, op: Fail) -> ServiceResult<()> {
        if self.failing.contains(&op) {
            Err(ServiceError::Protocol(format!("injected {op:?} failure")))
        } else {
            Ok(())
        }
    }

    fn open_messages(&mut self) -> ServiceResult<&mut Vec<MockMessage>> {
        let name = self
            .open
            .as_ref()
            .map(|(name, _)| name.clone())
            .ok_or_else(|| ServiceError::Protocol("no folder is open".to_owned()))?;
        self.folders
            .get_mut(&name)
            .ok_or_else(|| ServiceError::Protocol(format!("folder {name} vanished")))
    }

    fn message(&mut self, number: u32) -> ServiceResult<&mut MockMessage> {
        let idx = usize::try_from(number).unwrap_or(0).wrapping_sub(1);
        self.open_messages()?
            .get_mut(idx)
            .ok_or_else(|| ServiceError::Protocol(format!("no message {number}")))
    }

    fn remove_deleted(&mut self) -> ServiceResult<()> {
        self.open_messages()?
            .retain(|m| !m.flags.contains_system(SystemFlag::Deleted));
        Ok(())
    }
}

/// Minimal criteria evaluation: flag keywords and quoted SUBJECT/FROM
fn criteria_match(criteria: &str, msg: &MockMessage) -> bool {
    let headers = mailparse::parse_headers(&msg.raw)
        .map(|(h, _)| h)
        .unwrap_or_default();
    let tokens = tokenize(criteria);
    let mut tokens = tokens.iter().map(String::as_str);
    while let Some(token) = tokens.next() {
        let ok = match token {
            "ALL" => true,
            "SEEN" => msg.flags.contains_system(SystemFlag::Seen),
            "UNSEEN" => !msg.flags.contains_system(SystemFlag::Seen),
            "DELETED" => msg.flags.contains_system(SystemFlag::Deleted),
            "UNDELETED" => !msg.flags.contains_system(SystemFlag::Deleted),
            "FLAGGED" => msg.flags.contains_system(SystemFlag::Flagged),
            "SUBJECT" | "FROM" => {
                let needle = tokens.next().unwrap_or_default();
                let key = if token == "SUBJECT" { "Subject" } else { "From" };
                headers
                    .get_first_value(key)
                    .is_some_and(|v| v.contains(needle))
            }
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

/// Split criteria into atoms and unescaped quoted strings
fn tokenize(criteria: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = criteria.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '"' {
            chars.next();
            let mut text = String::new();
            while let Some(ch) = chars.next() {
                match ch {
                    '\\' => text.extend(chars.next()),
                    '"' => break,
                    _ => text.push(ch),
                }
            }
            tokens.push(text);
        } else {
            let mut atom = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                atom.push(ch);
                chars.next();
            }
            tokens.push(atom);
        }
    }
    tokens
}

#[async_trait]
impl MailboxService for MockService {
    async fn list_folders(&mut self) -> ServiceResult<Vec<String>> {
        self.calls.push(Call::ListFolders);
        self.check(Fail::ListFolders)?;
        Ok(self.folders.keys().cloned().collect())
    }

    async fn open_folder(&mut self, name: &str, mode: FolderMode) -> ServiceResult<()> {
        self.calls.push(Call::Open(name.to_owned(), mode));
        self.open = None;
        if !self.folders.contains_key(name) {
            return Err(ServiceError::Protocol(format!("NO [NONEXISTENT] {name}")));
        }
        match mode {
            FolderMode::ReadWrite if self.read_only.contains(name) => {
                return Err(ServiceError::Protocol(format!("NO [READ-ONLY] {name}")));
            }
            FolderMode::ReadOnly => self.check(Fail::OpenReadOnly)?,
            FolderMode::ReadWrite => {}
        }
        self.open = Some((name.to_owned(), mode));
        Ok(())
    }

    async fn close_folder(&mut self, expunge: bool) -> ServiceResult<()> {
        self.calls.push(Call::Close { expunge });
        let Some((_, mode)) = self.open.clone() else {
            return Ok(());
        };
        if expunge && mode.is_writable() {
            self.remove_deleted()?;
        }
        self.open = None;
        self.check(Fail::Close)
    }

    async fn count(&mut self, counter: MessageCounter) -> ServiceResult<u32> {
        self.calls.push(Call::Count(counter));
        let msgs = self.open_messages()?;
        let n = match counter {
            MessageCounter::Total => msgs.len(),
            MessageCounter::New => msgs
                .iter()
                .filter(|m| m.flags.contains_system(SystemFlag::Recent))
                .count(),
            MessageCounter::Unread => msgs
                .iter()
                .filter(|m| !m.flags.contains_system(SystemFlag::Seen))
                .count(),
            MessageCounter::Deleted => msgs
                .iter()
                .filter(|m| m.flags.contains_system(SystemFlag::Deleted))
                .count(),
        };
        Ok(u32::try_from(n).unwrap_or(u32::MAX))
    }

    async fn list_messages(&mut self) -> ServiceResult<Vec<u32>> {
        self.calls.push(Call::ListMessages);
        let n = u32::try_from(self.open_messages()?.len()).unwrap_or(u32::MAX);
        Ok((1..=n).collect())
    }

    async fn search(&mut self, predicate: &SearchPredicate) -> ServiceResult<Vec<u32>> {
        self.calls.push(Call::Search(predicate.as_str().to_owned()));
        self.check(Fail::Search)?;
        Ok(self
            .open_messages()?
            .iter()
            .zip(1u32..)
            .filter(|(m, _)| criteria_match(predicate.as_str(), m))
            .map(|(_, n)| n)
            .collect())
    }

    async fn fetch_envelopes(&mut self, numbers: &[u32]) -> ServiceResult<Vec<FetchedHeaders>> {
        self.calls.push(Call::FetchEnvelopes(numbers.to_vec()));
        numbers
            .iter()
            .map(|&number| {
                let msg = self.message(number)?;
                let end = msg
                    .raw
                    .windows(4)
                    .position(|w| w == b"\r\n\r\n")
                    .map_or(msg.raw.len(), |p| p + 4);
                Ok(FetchedHeaders {
                    number,
                    flags: msg.flags.clone(),
                    header: msg.raw[..end].to_vec(),
                })
            })
            .collect()
    }

    async fn fetch_message(&mut self, number: u32) -> ServiceResult<FetchedMessage> {
        self.calls.push(Call::FetchMessage(number));
        self.check(Fail::FetchMessage)?;
        let seen_on_fetch = self.seen_on_fetch;
        let msg = self.message(number)?;
        let fetched = FetchedMessage {
            number,
            flags: msg.flags.clone(),
            raw: msg.raw.clone(),
        };
        if seen_on_fetch {
            msg.flags.insert(SystemFlag::Seen);
        }
        Ok(fetched)
    }

    async fn store_flags(&mut self, number: u32, flags: &FlagSet, value: bool) -> ServiceResult<()> {
        self.calls.push(Call::Store {
            number,
            flags: flags.clone(),
            value,
        });
        if self.no_flag_writes {
            return Err(ServiceError::Unsupported("flag writes".to_owned()));
        }
        self.check(if value { Fail::StoreSet } else { Fail::StoreUnset })?;
        let msg = self.message(number)?;
        if value {
            msg.flags.insert_all(flags);
        } else {
            msg.flags.remove_all(flags);
        }
        Ok(())
    }

    async fn expunge(&mut self) -> ServiceResult<()> {
        self.calls.push(Call::Expunge);
        self.check(Fail::Expunge)?;
        self.remove_deleted()
    }

    async fn copy_messages(&mut self, numbers: &[u32], target: &str) -> ServiceResult<()> {
        self.calls.push(Call::Copy(numbers.to_vec(), target.to_owned()));
        self.check(Fail::Copy)?;
        let copies = numbers
            .iter()
            .map(|&n| self.message(n).cloned())
            .collect::<ServiceResult<Vec<_>>>()?;
        self.folders
            .get_mut(target)
            .ok_or_else(|| ServiceError::Protocol(format!("NO [TRYCREATE] {target}")))?
            .extend(copies);
        Ok(())
    }

    async fn logout(&mut self) -> ServiceResult<()> {
        self.calls.push(Call::Logout);
        self.open = None;
        self.check(Fail::Logout)
    }
}

/// Single-part plain text message
pub fn text_message(subject: &str) -> Vec<u8> {
    format!(
        "From: Jodd <jodd@use.me>\r\n\
         To: green@mail.com\r\n\
         Subject: {subject}\r\n\
         Date: Wed, 1 Jan 2025 10:00:00 +0000\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         \r\n\
         Hello there\r\n"
    )
    .into_bytes()
}

/// Multipart message with a text body and two attachments
///
/// The first attachment is `a.jpg` (content-id `<a.jpg>`, bytes `XZX`), the
/// second is unnamed and holds the UTF-8 bytes of `ГИМНАСТИКА`.
pub fn message_with_attachments(subject: &str, message_id: &str) -> Vec<u8> {
    format!(
        "From: Jodd <jodd@use.me>\r\n\
         To: green@mail.com\r\n\
         Subject: {subject}\r\n\
         Date: Wed, 1 Jan 2025 10:00:00 +0000\r\n\
         Message-ID: {message_id}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"BOUNDARY\"\r\n\
         \r\n\
         --BOUNDARY\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         \r\n\
         Hello Hello\r\n\
         --BOUNDARY\r\n\
         Content-Type: image/jpeg; name=\"a.jpg\"\r\n\
         Content-Disposition: attachment; filename=\"a.jpg\"\r\n\
         Content-ID: <a.jpg>\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         WFpY\r\n\
         --BOUNDARY\r\n\
         Content-Type: application/octet-stream\r\n\
         Content-Disposition: attachment\r\n\
         Content-Transfer-Encoding: base64\r\n\
         \r\n\
         0JPQmNCc0J3QkNCh0KLQmNCa0JA=\r\n\
         --BOUNDARY--\r\n"
    )
    .into_bytes()
}
