//! Message flags
//!
//! A [`FlagSet`] combines the fixed system flags with free-form user
//! (keyword) flags. It is the value exchanged between the engine, the
//! snapshots handed to callers, and the backends.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed system flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemFlag {
    Seen,
    Answered,
    Deleted,
    Flagged,
    Draft,
    Recent,
}

impl SystemFlag {
    /// All system flags, in IMAP declaration order
    pub const ALL: [SystemFlag; 6] = [
        SystemFlag::Seen,
        SystemFlag::Answered,
        SystemFlag::Deleted,
        SystemFlag::Flagged,
        SystemFlag::Draft,
        SystemFlag::Recent,
    ];

    /// IMAP atom for this flag (e.g. `\Seen`)
    pub fn imap_atom(self) -> &'static str {
        match self {
            SystemFlag::Seen => "\\Seen",
            SystemFlag::Answered => "\\Answered",
            SystemFlag::Deleted => "\\Deleted",
            SystemFlag::Flagged => "\\Flagged",
            SystemFlag::Draft => "\\Draft",
            SystemFlag::Recent => "\\Recent",
        }
    }
}

/// A single flag, system or user-defined
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    System(SystemFlag),
    User(String),
}

impl Flag {
    /// Build a user (keyword) flag
    pub fn user(name: impl Into<String>) -> Self {
        Flag::User(name.into())
    }
}

/// Whether `name` can be sent as an IMAP flag keyword (an atom)
pub fn is_keyword_atom(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|ch| {
            ch.is_ascii()
                && !ch.is_ascii_control()
                && !matches!(ch, ' ' | '(' | ')' | '{' | '%' | '*' | '"' | '\\' | ']')
        })
}

impl From<SystemFlag> for Flag {
    fn from(flag: SystemFlag) -> Self {
        Flag::System(flag)
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flag::System(flag) => f.write_str(flag.imap_atom()),
            Flag::User(name) => f.write_str(name),
        }
    }
}

/// Parse an IMAP-style flag
///
/// `\Seen`, `\Deleted`, ... (case-insensitive) map to system flags. Without
/// the backslash a name is a keyword, so `Seen` stays a user flag. Keywords
/// must be IMAP atoms.
impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("flag must not be empty".to_owned());
        }
        if let Some(name) = trimmed.strip_prefix('\\') {
            return SystemFlag::ALL
                .into_iter()
                .find(|f| f.imap_atom()[1..].eq_ignore_ascii_case(name))
                .map(Flag::System)
                .ok_or_else(|| format!("unknown system flag '{trimmed}'"));
        }
        if !is_keyword_atom(trimmed) {
            return Err(format!("keyword '{trimmed}' is not an IMAP atom"));
        }
        Ok(Flag::User(trimmed.to_owned()))
    }
}

/// Combination of system and user flags
///
/// Empty iff both subsets are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSet {
    system: BTreeSet<SystemFlag>,
    user: BTreeSet<String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }

    pub fn contains(&self, flag: &Flag) -> bool {
        match flag {
            Flag::System(f) => self.system.contains(f),
            Flag::User(name) => self.user.contains(name),
        }
    }

    pub fn contains_system(&self, flag: SystemFlag) -> bool {
        self.system.contains(&flag)
    }

    pub fn insert(&mut self, flag: impl Into<Flag>) {
        match flag.into() {
            Flag::System(f) => {
                self.system.insert(f);
            }
            Flag::User(name) => {
                self.user.insert(name);
            }
        }
    }

    pub fn remove(&mut self, flag: &Flag) {
        match flag {
            Flag::System(f) => {
                self.system.remove(f);
            }
            Flag::User(name) => {
                self.user.remove(name);
            }
        }
    }

    /// Add every flag of `other` to this set
    pub fn insert_all(&mut self, other: &FlagSet) {
        self.system.extend(other.system.iter().copied());
        self.user.extend(other.user.iter().cloned());
    }

    /// Remove every flag of `other` from this set
    pub fn remove_all(&mut self, other: &FlagSet) {
        for f in &other.system {
            self.system.remove(f);
        }
        for name in &other.user {
            self.user.remove(name);
        }
    }

    pub fn system_flags(&self) -> impl Iterator<Item = SystemFlag> + '_ {
        self.system.iter().copied()
    }

    pub fn user_flags(&self) -> impl Iterator<Item = &str> + '_ {
        self.user.iter().map(String::as_str)
    }

    /// All flags, system flags first
    pub fn iter(&self) -> impl Iterator<Item = Flag> + '_ {
        self.system
            .iter()
            .copied()
            .map(Flag::System)
            .chain(self.user.iter().cloned().map(Flag::User))
    }

    /// Render as a parenthesized IMAP flag list, e.g. `(\Seen \Deleted Todo)`
    pub fn to_imap_list(&self) -> String {
        let atoms = self.iter().map(|f| f.to_string()).collect::<Vec<_>>();
        format!("({})", atoms.join(" "))
    }
}

impl From<SystemFlag> for FlagSet {
    fn from(flag: SystemFlag) -> Self {
        let mut set = FlagSet::new();
        set.insert(flag);
        set
    }
}

impl From<Flag> for FlagSet {
    fn from(flag: Flag) -> Self {
        let mut set = FlagSet::new();
        set.insert(flag);
        set
    }
}

impl<F: Into<Flag>> FromIterator<F> for FlagSet {
    fn from_iter<I: IntoIterator<Item = F>>(iter: I) -> Self {
        let mut set = FlagSet::new();
        for flag in iter {
            set.insert(flag);
        }
        set
    }
}

/// Emptiness check that treats an absent set as empty
pub fn is_empty_flags(flags: Option<&FlagSet>) -> bool {
    flags.is_none_or(FlagSet::is_empty)
}

#[cfg(test)]
mod tests {
    use super::{Flag, FlagSet, SystemFlag, is_empty_flags, is_keyword_atom};

    #[test]
    fn emptiness_follows_both_subsets() {
        assert!(is_empty_flags(Some(&FlagSet::new())));
        assert!(is_empty_flags(None));
        assert!(!is_empty_flags(Some(&FlagSet::from(SystemFlag::Deleted))));
        assert!(!is_empty_flags(Some(&FlagSet::from(Flag::user("userFlag")))));
    }

    #[test]
    fn parses_system_and_user_flags() {
        assert_eq!("\\Seen".parse::<Flag>(), Ok(Flag::System(SystemFlag::Seen)));
        assert_eq!("\\deleted".parse::<Flag>(), Ok(Flag::System(SystemFlag::Deleted)));
        assert_eq!("$Label1".parse::<Flag>(), Ok(Flag::user("$Label1")));
        assert!("\\Bogus".parse::<Flag>().is_err());
        assert!("  ".parse::<Flag>().is_err());
    }

    #[test]
    fn system_names_without_backslash_are_keywords() {
        assert_eq!("Seen".parse::<Flag>(), Ok(Flag::user("Seen")));
        assert_eq!("deleted".parse::<Flag>(), Ok(Flag::user("deleted")));
    }

    #[test]
    fn keywords_must_be_atoms() {
        assert!(is_keyword_atom("$Forwarded"));
        assert!(!is_keyword_atom("two words"));
        assert!(!is_keyword_atom("x)"));
        assert!(!is_keyword_atom(""));
        assert!("two words".parse::<Flag>().is_err());
        assert!("a(b".parse::<Flag>().is_err());
    }

    #[test]
    fn remove_all_keeps_unrelated_flags() {
        let mut flags: FlagSet = [
            Flag::from(SystemFlag::Seen),
            Flag::from(SystemFlag::Flagged),
            Flag::user("Todo"),
        ]
        .into_iter()
        .collect();
        let drop: FlagSet = [Flag::from(SystemFlag::Seen), Flag::user("Todo")]
            .into_iter()
            .collect();

        flags.remove_all(&drop);
        assert!(flags.contains_system(SystemFlag::Flagged));
        assert!(!flags.contains_system(SystemFlag::Seen));
        assert_eq!(flags.user_flags().count(), 0);
    }

    #[test]
    fn renders_imap_flag_list() {
        let flags: FlagSet = [Flag::from(SystemFlag::Deleted), Flag::user("Todo"), Flag::from(SystemFlag::Seen)]
            .into_iter()
            .collect();
        assert_eq!(flags.to_imap_list(), "(\\Seen \\Deleted Todo)");
        assert_eq!(FlagSet::new().to_imap_list(), "()");
    }
}
