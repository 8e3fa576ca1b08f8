//! RESP Protocol Implementation
//!
//! The wire codec of the server: a scanner that turns request bytes into
//! tokens, and the reply type that encodes results back into bytes.
//!
//! ## Modules
//!
//! - `scanner`: Single-pass scanner for `*N` arrays of bulk strings
//! - `types`: Defines the `RespValue` reply enum and its encoding
//!
//! ## Example
//!
//! ```
//! use sider::protocol::{frame_len, RespValue, Scanner, Token};
//!
//! let data = b"*2\r\n$3\r\nget\r\n$4\r\nname\r\n";
//! assert_eq!(frame_len(data), Ok(Some(data.len())));
//!
//! let mut scanner = Scanner::new(data);
//! assert_eq!(scanner.next_token(), Ok(Token::Command("GET".to_string())));
//!
//! let reply = RespValue::bulk_string("alice").serialize();
//! assert_eq!(reply, b"$5\r\nalice\r\n");
//! ```

pub mod scanner;
pub mod types;

pub use scanner::{frame_len, ScanError, ScanResult, Scanner, Token};
pub use types::RespValue;
