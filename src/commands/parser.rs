//! Command Parser
//!
//! Drives the [`Scanner`](crate::protocol::Scanner) over one request and
//! applies the command's [`CommandRule`] to the tokens:
//!
//! 1. The command name selects the rule (`UnknownCommand` otherwise).
//! 2. Tokens are positional arguments while the rule has room for them.
//! 3. Remaining tokens are options: an option name, then a value token
//!    unless the option is a flag.
//!
//! ```text
//! SET  key value  EX 10  NX  GET
//!      └──args──┘ └─────options────┘
//! ```

use crate::commands::rules::{rule_for, CommandRule, OptionGroup, OptionSpec, OptionValue};
use crate::protocol::{ScanError, ScanResult, Scanner, Token};
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while turning a request into a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Framing problem; the connection cannot be trusted afterwards
    #[error("protocol error: {0}")]
    Protocol(#[from] ScanError),

    #[error("unknown command '{name}'")]
    UnknownCommand { name: String },

    #[error("syntax error, command {command} is missing required args")]
    MissingArguments { command: String },

    #[error("syntax error, command {command} does not accept options")]
    TooManyArguments { command: String },

    #[error("syntax error, command {command} does not support option {option}")]
    UnsupportedOption { command: String, option: String },

    #[error("syntax error, option {option} is missing a value")]
    MissingOptionValue { option: String },

    #[error("syntax error, invalid value '{value}' for option {option}")]
    InvalidOptionValue { option: String, value: String },

    #[error("syntax error, expiration already set when {option} was given")]
    DuplicateExpiration { option: String },

    #[error("syntax error, {option} conflicts with {existing}")]
    ConflictingPolicy { option: String, existing: String },
}

impl CommandError {
    /// True for framing errors, after which the connection is closed.
    pub fn is_protocol(&self) -> bool {
        matches!(self, CommandError::Protocol(_))
    }
}

/// A request that passed its command's grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    /// Upper-cased command name
    pub name: String,
    /// Positional arguments in request order
    pub args: Vec<Bytes>,
    /// Options keyed by upper-cased name
    pub options: BTreeMap<String, OptionValue>,
    pub is_pubsub: bool,
}

impl RawCommand {
    pub fn has_option(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }
}

/// Parses one complete request.
///
/// # Example
///
/// ```
/// use sider::commands::parser::{parse, CommandError};
///
/// let cmd = parse(b"*2\r\n$3\r\nget\r\n$3\r\nfoo\r\n").unwrap();
/// assert_eq!(cmd.name, "GET");
///
/// let err = parse(b"*1\r\n$3\r\nLOL\r\n").unwrap_err();
/// assert_eq!(err, CommandError::UnknownCommand { name: "LOL".to_string() });
/// ```
pub fn parse(input: &[u8]) -> Result<RawCommand, CommandError> {
    parse_tokens(Scanner::new(input))
}

/// Applies the grammar to a token stream whose first token is the command.
pub fn parse_tokens<I>(mut tokens: I) -> Result<RawCommand, CommandError>
where
    I: Iterator<Item = ScanResult<Token>>,
{
    let name = match tokens.next() {
        Some(Ok(Token::Command(name))) => name,
        Some(Ok(Token::Arg(_))) => return Err(ScanError::NotABulkString.into()),
        Some(Err(e)) => return Err(e.into()),
        None => return Err(ScanError::OutOfBound.into()),
    };

    let rule = rule_for(&name).ok_or_else(|| CommandError::UnknownCommand { name: name.clone() })?;

    let mut grammar = Grammar::new(rule);
    for token in tokens {
        match token? {
            Token::Arg(word) => grammar.feed(word)?,
            Token::Command(_) => return Err(ScanError::NotABulkString.into()),
        }
    }
    grammar.finish()
}

/// Positional/option state machine for one command.
struct Grammar {
    rule: &'static CommandRule,
    args: Vec<Bytes>,
    options: BTreeMap<String, OptionValue>,
    /// Option waiting for its value token
    pending: Option<&'static OptionSpec>,
    expiration: Option<&'static str>,
    policy: Option<&'static str>,
}

impl Grammar {
    fn new(rule: &'static CommandRule) -> Self {
        Self {
            rule,
            args: Vec::new(),
            options: BTreeMap::new(),
            pending: None,
            expiration: None,
            policy: None,
        }
    }

    fn feed(&mut self, word: Bytes) -> Result<(), CommandError> {
        if self.pending.is_none() && self.rule.accepts_positional(self.args.len()) {
            self.args.push(word);
            return Ok(());
        }

        if !self.rule.has_options() {
            return Err(CommandError::TooManyArguments {
                command: self.rule.name.to_string(),
            });
        }

        if let Some(spec) = self.pending.take() {
            let value = spec.kind.coerce(spec.name, &word)?;
            self.options.insert(spec.name.to_string(), value);
            return Ok(());
        }

        let option = String::from_utf8_lossy(&word).to_ascii_uppercase();
        let spec = self.rule.option(&option).ok_or_else(|| CommandError::UnsupportedOption {
            command: self.rule.name.to_string(),
            option: String::from_utf8_lossy(&word).into_owned(),
        })?;

        self.check_group(spec)?;

        if spec.kind.takes_value() {
            self.pending = Some(spec);
        } else {
            self.options.insert(spec.name.to_string(), OptionValue::Flag);
        }
        Ok(())
    }

    fn check_group(&mut self, spec: &'static OptionSpec) -> Result<(), CommandError> {
        match spec.group {
            OptionGroup::Standalone => {}
            OptionGroup::Expiration => {
                if self.expiration.is_some() {
                    return Err(CommandError::DuplicateExpiration {
                        option: spec.name.to_string(),
                    });
                }
                self.expiration = Some(spec.name);
            }
            OptionGroup::Policy => match self.policy {
                Some(existing) if existing != spec.name => {
                    return Err(CommandError::ConflictingPolicy {
                        option: spec.name.to_string(),
                        existing: existing.to_string(),
                    });
                }
                _ => self.policy = Some(spec.name),
            },
        }
        Ok(())
    }

    fn finish(self) -> Result<RawCommand, CommandError> {
        if self.args.len() < self.rule.min_args {
            return Err(CommandError::MissingArguments {
                command: self.rule.name.to_string(),
            });
        }

        if let Some(spec) = self.pending {
            return Err(CommandError::MissingOptionValue {
                option: spec.name.to_string(),
            });
        }

        Ok(RawCommand {
            name: self.rule.name.to_string(),
            args: self.args,
            options: self.options,
            is_pubsub: self.rule.is_pubsub,
        })
    }
}
