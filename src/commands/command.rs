//! Typed Commands
//!
//! A [`RawCommand`] has passed its grammar but still carries loose
//! arguments and an option map. Converting it into a [`Command`] pins every
//! field down once, so execution never re-inspects names or option maps.

use crate::commands::parser::{parse, CommandError, RawCommand};
use crate::commands::rules::{self, OptionValue};
use crate::storage::{Deadline, SetCondition};
use bytes::Bytes;
use std::time::{Duration, Instant, SystemTime};

/// A fully validated request, routed by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Executed against the store
    Store(StoreCommand),
    /// Handled by the pub/sub broker
    PubSub(PubSubCommand),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCommand {
    Set(SetCommand),
    Get { key: Bytes },
    Del { keys: Vec<Bytes> },
    Exists { keys: Vec<Bytes> },
    Ping { message: Option<Bytes> },
    Echo { message: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubCommand {
    Subscribe { topics: Vec<Bytes> },
    Unsubscribe { topics: Vec<Bytes> },
    Publish { topic: Bytes, message: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCommand {
    pub key: Bytes,
    pub value: Bytes,
    pub expiration: ExpirationSpec,
    /// Reply with the previous value instead of `OK`
    pub get: bool,
}

/// When a key set by `SET` should disappear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// `EX`
    Seconds(Duration),
    /// `PX`
    Millis(Duration),
    /// `EXAT`
    UnixTimeSeconds(SystemTime),
    /// `PXAT`
    UnixTimeMillis(SystemTime),
}

impl Expiration {
    /// Resolves to a store deadline; relative expirations count from `now`.
    ///
    /// Returns `None` for a duration too large to represent, which never
    /// comes due.
    pub fn deadline(&self, now: Instant) -> Option<Deadline> {
        match *self {
            Expiration::Seconds(d) | Expiration::Millis(d) => now.checked_add(d).map(Deadline::After),
            Expiration::UnixTimeSeconds(t) | Expiration::UnixTimeMillis(t) => Some(Deadline::At(t)),
        }
    }
}

/// Expiration and write policy of a `SET`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirationSpec {
    /// `None` when no expiration option was given
    pub expiration: Option<Expiration>,
    /// `XX`
    pub only_if_exists: bool,
    /// `NX`
    pub only_if_not_exists: bool,
    pub keep_ttl: bool,
}

impl ExpirationSpec {
    pub fn is_present(&self) -> bool {
        self.expiration.is_some()
    }

    pub fn condition(&self) -> SetCondition {
        if self.only_if_not_exists {
            SetCondition::IfNotExists
        } else if self.only_if_exists {
            SetCondition::IfExists
        } else {
            SetCondition::Always
        }
    }

    fn from_options(raw: &RawCommand) -> Self {
        let expiration = raw.options.iter().find_map(|(name, value)| {
            match (name.as_str(), value) {
                ("EX", OptionValue::Duration(d)) => Some(Expiration::Seconds(*d)),
                ("PX", OptionValue::Duration(d)) => Some(Expiration::Millis(*d)),
                ("EXAT", OptionValue::Timestamp(t)) => Some(Expiration::UnixTimeSeconds(*t)),
                ("PXAT", OptionValue::Timestamp(t)) => Some(Expiration::UnixTimeMillis(*t)),
                _ => None,
            }
        });

        Self {
            expiration,
            only_if_exists: raw.has_option("XX"),
            only_if_not_exists: raw.has_option("NX"),
            keep_ttl: raw.has_option("KEEPTTL"),
        }
    }
}

impl Command {
    pub fn is_pubsub(&self) -> bool {
        matches!(self, Command::PubSub(_))
    }
}

impl TryFrom<RawCommand> for Command {
    type Error = CommandError;

    fn try_from(raw: RawCommand) -> Result<Self, Self::Error> {
        let missing = || CommandError::MissingArguments {
            command: raw.name.clone(),
        };
        let mut args = raw.args.iter().cloned();

        let command = match raw.name.as_str() {
            rules::SET => Command::Store(StoreCommand::Set(SetCommand {
                key: args.next().ok_or_else(missing)?,
                value: args.next().ok_or_else(missing)?,
                expiration: ExpirationSpec::from_options(&raw),
                get: raw.has_option("GET"),
            })),
            rules::GET => Command::Store(StoreCommand::Get {
                key: args.next().ok_or_else(missing)?,
            }),
            rules::DEL => Command::Store(StoreCommand::Del { keys: args.collect() }),
            rules::EXISTS => Command::Store(StoreCommand::Exists { keys: args.collect() }),
            rules::PING => Command::Store(StoreCommand::Ping { message: args.next() }),
            rules::ECHO => Command::Store(StoreCommand::Echo {
                message: args.next().ok_or_else(missing)?,
            }),
            rules::SUBSCRIBE => Command::PubSub(PubSubCommand::Subscribe { topics: args.collect() }),
            rules::UNSUBSCRIBE => {
                Command::PubSub(PubSubCommand::Unsubscribe { topics: args.collect() })
            }
            rules::PUBLISH => Command::PubSub(PubSubCommand::Publish {
                topic: args.next().ok_or_else(missing)?,
                message: args.next().ok_or_else(missing)?,
            }),
            _ => {
                return Err(CommandError::UnknownCommand {
                    name: raw.name.clone(),
                })
            }
        };

        debug_assert_eq!(command.is_pubsub(), raw.is_pubsub);
        Ok(command)
    }
}

/// Parses one complete request straight into a typed command.
pub fn parse_command(input: &[u8]) -> Result<Command, CommandError> {
    Command::try_from(parse(input)?)
}
