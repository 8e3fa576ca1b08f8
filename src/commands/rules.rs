//! Command Grammar Table
//!
//! One static [`CommandRule`] per supported command describes how many
//! positional arguments it takes and which trailing options it accepts.
//! The parser consults this table; nothing else about a command's shape is
//! hard-coded in the parser.

use crate::commands::parser::CommandError;
use bytes::Bytes;
use chrono::DateTime;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// The type an option's value is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Presence only, no value token follows
    Flag,
    /// Passed through unchanged
    Str,
    /// Signed integer
    Integer,
    /// Non-negative duration in seconds
    Seconds,
    /// Non-negative duration in milliseconds
    Millis,
    /// Absolute time: RFC 3339, or unix seconds
    UnixSeconds,
    /// Absolute time: RFC 3339, or unix milliseconds
    UnixMillis,
}

/// Options in the same group constrain each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionGroup {
    Standalone,
    /// At most one option of this group per command
    Expiration,
    /// Mutually exclusive write policies (NX / XX)
    Policy,
}

/// A coerced option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Flag,
    Str(Bytes),
    Integer(i64),
    Duration(Duration),
    Timestamp(SystemTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionKind,
    pub group: OptionGroup,
}

/// Static grammar for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRule {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means variadic
    pub max_args: Option<usize>,
    pub options: &'static [OptionSpec],
    pub is_pubsub: bool,
}

impl CommandRule {
    pub fn is_variadic(&self) -> bool {
        self.max_args.is_none()
    }

    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    /// Whether another positional argument fits after `count` of them.
    pub fn accepts_positional(&self, count: usize) -> bool {
        self.max_args.map_or(true, |max| count < max)
    }

    /// Looks up an option by its upper-cased name.
    pub fn option(&self, name: &str) -> Option<&'static OptionSpec> {
        self.options.iter().find(|opt| opt.name == name)
    }
}

impl OptionKind {
    pub fn takes_value(self) -> bool {
        self != OptionKind::Flag
    }

    /// Coerces a raw value token for the option `option`.
    pub fn coerce(self, option: &str, raw: &[u8]) -> Result<OptionValue, CommandError> {
        let invalid = || CommandError::InvalidOptionValue {
            option: option.to_string(),
            value: String::from_utf8_lossy(raw).into_owned(),
        };

        match self {
            OptionKind::Flag => Ok(OptionValue::Flag),
            OptionKind::Str => Ok(OptionValue::Str(Bytes::copy_from_slice(raw))),
            OptionKind::Integer => parse_number::<i64>(raw)
                .map(OptionValue::Integer)
                .ok_or_else(invalid),
            OptionKind::Seconds => parse_number::<u64>(raw)
                .map(|n| OptionValue::Duration(Duration::from_secs(n)))
                .ok_or_else(invalid),
            OptionKind::Millis => parse_number::<u64>(raw)
                .map(|n| OptionValue::Duration(Duration::from_millis(n)))
                .ok_or_else(invalid),
            OptionKind::UnixSeconds => parse_timestamp(raw, Duration::from_secs)
                .map(OptionValue::Timestamp)
                .ok_or_else(invalid),
            OptionKind::UnixMillis => parse_timestamp(raw, Duration::from_millis)
                .map(OptionValue::Timestamp)
                .ok_or_else(invalid),
        }
    }
}

fn parse_number<T: std::str::FromStr>(raw: &[u8]) -> Option<T> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Parses `2030-01-01T00:00:00Z` style RFC 3339 text, falling back to a
/// unix epoch count in the option's unit.
fn parse_timestamp(raw: &[u8], unit: fn(u64) -> Duration) -> Option<SystemTime> {
    let text = std::str::from_utf8(raw).ok()?;
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(SystemTime::from(at));
    }
    UNIX_EPOCH.checked_add(unit(text.parse().ok()?))
}

pub const SET: &str = "SET";
pub const GET: &str = "GET";
pub const DEL: &str = "DEL";
pub const EXISTS: &str = "EXISTS";
pub const PING: &str = "PING";
pub const ECHO: &str = "ECHO";
pub const SUBSCRIBE: &str = "SUBSCRIBE";
pub const UNSUBSCRIBE: &str = "UNSUBSCRIBE";
pub const PUBLISH: &str = "PUBLISH";

#[rustfmt::skip]
const SET_OPTIONS: &[OptionSpec] = &[
    OptionSpec { name: "EX", kind: OptionKind::Seconds, group: OptionGroup::Expiration },
    OptionSpec { name: "PX", kind: OptionKind::Millis, group: OptionGroup::Expiration },
    OptionSpec { name: "EXAT", kind: OptionKind::UnixSeconds, group: OptionGroup::Expiration },
    OptionSpec { name: "PXAT", kind: OptionKind::UnixMillis, group: OptionGroup::Expiration },
    OptionSpec { name: "NX", kind: OptionKind::Flag, group: OptionGroup::Policy },
    OptionSpec { name: "XX", kind: OptionKind::Flag, group: OptionGroup::Policy },
    OptionSpec { name: "KEEPTTL", kind: OptionKind::Flag, group: OptionGroup::Standalone },
    OptionSpec { name: "GET", kind: OptionKind::Flag, group: OptionGroup::Standalone },
];

#[rustfmt::skip]
static RULES: &[CommandRule] = &[
    CommandRule { name: SET, min_args: 2, max_args: Some(2), options: SET_OPTIONS, is_pubsub: false },
    CommandRule { name: GET, min_args: 1, max_args: Some(1), options: &[], is_pubsub: false },
    CommandRule { name: DEL, min_args: 1, max_args: None, options: &[], is_pubsub: false },
    CommandRule { name: EXISTS, min_args: 1, max_args: None, options: &[], is_pubsub: false },
    CommandRule { name: PING, min_args: 0, max_args: Some(1), options: &[], is_pubsub: false },
    CommandRule { name: ECHO, min_args: 1, max_args: Some(1), options: &[], is_pubsub: false },
    CommandRule { name: SUBSCRIBE, min_args: 1, max_args: None, options: &[], is_pubsub: true },
    CommandRule { name: UNSUBSCRIBE, min_args: 1, max_args: None, options: &[], is_pubsub: true },
    CommandRule { name: PUBLISH, min_args: 2, max_args: Some(2), options: &[], is_pubsub: true },
];

/// Returns the rule for an upper-cased command name.
pub fn rule_for(name: &str) -> Option<&'static CommandRule> {
    RULES.iter().find(|rule| rule.name == name)
}
