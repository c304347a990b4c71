//! Environment-driven configuration
//!
//! Accounts live under `MAIL_RECEIVE_<ACCOUNT>_*`; a `MAIL_RECEIVE_*_HOST`
//! variable declares one. Timeouts and the attachment directory are shared by
//! every account. The loaded [`ReceiveConfig`] is passed explicitly to
//! [`ImapService::connect`](crate::imap::ImapService::connect) and
//! [`MailboxSession::new`](crate::session::MailboxSession::new).

use std::collections::BTreeMap;
use std::env::{self, VarError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use secrecy::SecretString;

use crate::errors::{MailError, MailResult};

/// One mailbox account
#[derive(Debug, Clone)]
pub struct AccountConfig {
    /// Lowercased account segment, as passed to `--account`
    pub account_id: String,
    pub host: String,
    pub port: u16,
    /// Only `true` is accepted at connect time
    pub secure: bool,
    pub user: String,
    pub pass: SecretString,
}

impl AccountConfig {
    /// Read `MAIL_RECEIVE_<SEGMENT>_{HOST,USER,PASS,PORT,SECURE}`
    fn from_env(segment: &str) -> MailResult<Self> {
        let prefix = format!("MAIL_RECEIVE_{segment}_");
        let key = |name: &str| format!("{prefix}{name}");

        Ok(Self {
            account_id: segment.to_ascii_lowercase(),
            host: required_env(&key("HOST"))?,
            port: parse_env(&key("PORT"), 993)?,
            secure: parse_env::<EnvBool>(&key("SECURE"), EnvBool(true))?.0,
            user: required_env(&key("USER"))?,
            pass: SecretString::new(required_env(&key("PASS"))?.into()),
        })
    }
}

/// Network timeouts applied by the IMAP backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect
    pub connect: Duration,
    /// TLS handshake, server greeting and LOGIN
    pub greeting: Duration,
    /// Every command after login
    pub socket: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            greeting: Duration::from_secs(15),
            socket: Duration::from_secs(300),
        }
    }
}

/// Per-session behaviour
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Directory attachments are written to while messages are fetched
    pub attachment_storage: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    /// Keyed by `account_id`
    pub accounts: BTreeMap<String, AccountConfig>,
    pub timeouts: Timeouts,
    pub session: SessionConfig,
}

impl ReceiveConfig {
    /// Load accounts, timeouts and session settings from the environment
    ///
    /// Without any `MAIL_RECEIVE_*_HOST` variable a `default` account is
    /// required.
    ///
    /// ```text
    /// MAIL_RECEIVE_DEFAULT_HOST=imap.example.com
    /// MAIL_RECEIVE_DEFAULT_USER=user@example.com
    /// MAIL_RECEIVE_DEFAULT_PASS=secret
    /// MAIL_RECEIVE_SOCKET_TIMEOUT_MS=60000
    /// MAIL_RECEIVE_ATTACHMENT_DIR=/var/spool/attachments
    /// ```
    ///
    /// # Errors
    ///
    /// `InvalidInput` if a required variable is missing or a value does not
    /// parse.
    pub fn load_from_env() -> MailResult<Self> {
        let accounts = account_segments(env::vars().map(|(key, _)| key))?
            .iter()
            .map(|segment| AccountConfig::from_env(segment))
            .map(|account| account.map(|a| (a.account_id.clone(), a)))
            .collect::<MailResult<BTreeMap<_, _>>>()?;

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            connect: parse_millis("MAIL_RECEIVE_CONNECT_TIMEOUT_MS", defaults.connect)?,
            greeting: parse_millis("MAIL_RECEIVE_GREETING_TIMEOUT_MS", defaults.greeting)?,
            socket: parse_millis("MAIL_RECEIVE_SOCKET_TIMEOUT_MS", defaults.socket)?,
        };

        Ok(Self {
            accounts,
            timeouts,
            session: SessionConfig {
                attachment_storage: optional_env("MAIL_RECEIVE_ATTACHMENT_DIR")?.map(PathBuf::from),
            },
        })
    }

    /// # Errors
    ///
    /// `InvalidInput` if `account_id` is not configured.
    pub fn get_account(&self, account_id: &str) -> MailResult<&AccountConfig> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| MailError::invalid(format!("account '{account_id}' is not configured")))
    }
}

/// Sorted, deduplicated account segments declared by `*_HOST` keys
fn account_segments(keys: impl Iterator<Item = String>) -> MailResult<Vec<String>> {
    let pattern = Regex::new(r"^MAIL_RECEIVE_([A-Z0-9_]+)_HOST$")
        .map_err(|e| MailError::invalid(format!("invalid account pattern: {e}")))?;

    let mut segments: Vec<String> = keys
        .filter_map(|key| {
            pattern
                .captures(&key)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_owned())
        })
        .collect();
    if segments.is_empty() {
        segments.push("DEFAULT".to_owned());
    }
    segments.sort();
    segments.dedup();
    Ok(segments)
}

fn required_env(key: &str) -> MailResult<String> {
    optional_env(key)?
        .ok_or_else(|| MailError::invalid(format!("missing required environment variable {key}")))
}

/// Blank counts as unset
fn optional_env(key: &str) -> MailResult<Option<String>> {
    match env::var(key) {
        Ok(v) if v.trim().is_empty() => Ok(None),
        Ok(v) => Ok(Some(v)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(MailError::invalid(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> MailResult<T> {
    match optional_env(key)? {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| MailError::invalid(format!("invalid value for {key}: '{v}'"))),
        None => Ok(default),
    }
}

fn parse_millis(key: &str, default: Duration) -> MailResult<Duration> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env(key, default_ms).map(Duration::from_millis)
}

/// Boolean accepting `1/0`, `true/false`, `yes/no`, `y/n`, `on/off`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EnvBool(bool);

impl FromStr for EnvBool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Ok(EnvBool(true)),
            "0" | "false" | "no" | "n" | "off" => Ok(EnvBool(false)),
            _ => Err(()),
        }
    }
}
