//! Commands
//!
//! A request travels through this module in three steps:
//!
//! ```text
//! raw frame ──> parser (grammar from rules) ──> RawCommand
//!                                                   │ TryFrom
//!                                                   ▼
//!                                   Command::Store / Command::PubSub
//!                                                   │
//!                                  CommandHandler <─┘ (store commands)
//! ```
//!
//! ## Supported Commands
//!
//! - `SET key value [EX s | PX ms | EXAT ts | PXAT ts-ms] [NX | XX] [KEEPTTL] [GET]`
//! - `GET key`
//! - `DEL key [key ...]`, `EXISTS key [key ...]`
//! - `PING [message]`, `ECHO message`
//! - `SUBSCRIBE topic [topic ...]`, `UNSUBSCRIBE topic [topic ...]`
//! - `PUBLISH topic message`

pub mod command;
pub mod handler;
pub mod parser;
pub mod rules;

pub use command::{
    parse_command, Command, Expiration, ExpirationSpec, PubSubCommand, SetCommand, StoreCommand,
};
pub use handler::CommandHandler;
pub use parser::{parse, parse_tokens, CommandError, RawCommand};
pub use rules::{rule_for, CommandRule, OptionGroup, OptionKind, OptionSpec, OptionValue};
