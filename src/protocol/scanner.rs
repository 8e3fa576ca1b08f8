//! Request Scanner
//!
//! Turns the bytes of one client request into a sequence of tokens.
//! Requests are always an array of bulk strings:
//!
//! ```text
//! *<N>\r\n
//! $<len>\r\n<bytes>\r\n      (repeated N times)
//! ```
//!
//! The first element is the command name and comes out upper-cased as
//! [`Token::Command`]. Every later element is a [`Token::Arg`].
//!
//! The scanner keeps its position and the number of elements left on the
//! instance, so it is single-pass: once the declared count is used up
//! `next_token` reports [`ScanError::OutOfBound`].
//!
//! Running past the end of the input yields [`ScanError::Incomplete`]. The
//! connection layer uses [`frame_len`] to wait until a whole request is
//! buffered before handing it to the command parser.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements accepted in one request array
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Errors raised while scanning a request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The input ended before the request did
    #[error("incomplete request")]
    Incomplete,

    /// The request is not an array of bulk strings
    #[error("invalid syntax, input is not a valid resp bulk string")]
    NotABulkString,

    /// A length field contained something other than digits
    #[error("expected digits only when reading array or bulk string size, got {0:?}")]
    MalformedLength(char),

    /// A line terminator was expected but something else was found
    #[error("unexpected symbol found, wanted {wanted:?} but got {got:?}")]
    UnexpectedSymbol { wanted: char, got: char },

    /// More elements were requested than the array header announced
    #[error("index out of bound")]
    OutOfBound,

    /// A length field exceeds the configured limits
    #[error("length {size} exceeds maximum of {max}")]
    TooLarge { size: usize, max: usize },
}

pub type ScanResult<T> = Result<T, ScanError>;

/// One element of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// The command name, upper-cased
    Command(String),
    /// Any element after the command name
    Arg(Bytes),
}

/// Single-pass scanner over one request.
#[derive(Debug)]
pub struct Scanner<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Elements left to read, `None` until the array header has been read
    remaining: Option<usize>,
    /// Element count announced by the header
    size: usize,
    failed: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            remaining: None,
            size: 0,
            failed: false,
        }
    }

    /// True while the header is unread or elements are left.
    pub fn has_next(&self) -> bool {
        self.remaining.map_or(true, |n| n > 0)
    }

    /// Number of bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    /// Element count announced by the array header, once read.
    pub fn array_len(&self) -> Option<usize> {
        self.remaining.map(|_| self.size)
    }

    /// Reads the next token, reading the array header first if needed.
    pub fn next_token(&mut self) -> ScanResult<Token> {
        let remaining = match self.remaining {
            Some(n) => n,
            None => {
                let n = self.read_array_header()?;
                self.remaining = Some(n);
                self.size = n;
                n
            }
        };

        if remaining == 0 {
            return Err(ScanError::OutOfBound);
        }

        let is_command = remaining == self.size;
        let word = self.read_bulk_string()?;
        self.remaining = Some(remaining - 1);

        if is_command {
            let name = String::from_utf8_lossy(word).to_ascii_uppercase();
            Ok(Token::Command(name))
        } else {
            Ok(Token::Arg(Bytes::copy_from_slice(word)))
        }
    }

    fn read_array_header(&mut self) -> ScanResult<usize> {
        if self.read_byte()? != prefix::ARRAY {
            return Err(ScanError::NotABulkString);
        }
        self.read_size(MAX_ARRAY_LEN)
    }

    fn read_bulk_string(&mut self) -> ScanResult<&'a [u8]> {
        let mut symbol = self.read_byte()?;

        // Tolerate blank lines between elements.
        while symbol == b'\r' || symbol == b'\n' {
            self.pos -= 1;
            self.read_crlf()?;
            symbol = self.read_byte()?;
        }

        if symbol != prefix::BULK_STRING {
            return Err(ScanError::NotABulkString);
        }

        let len = self.read_size(MAX_BULK_SIZE)?;
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(ScanError::Incomplete);
        }
        let word = &self.buf[self.pos..end];
        self.pos = end;
        self.read_crlf()?;

        Ok(word)
    }

    /// Reads `<digits>\r\n`.
    fn read_size(&mut self, max: usize) -> ScanResult<usize> {
        let mut size: usize = 0;
        let mut digits = 0;

        loop {
            let ch = self.peek_byte()?;
            match ch {
                b'0'..=b'9' => {
                    self.pos += 1;
                    digits += 1;
                    size = size
                        .checked_mul(10)
                        .and_then(|s| s.checked_add(usize::from(ch - b'0')))
                        .ok_or(ScanError::TooLarge { size: usize::MAX, max })?;
                }
                b'\r' if digits > 0 => break,
                other => return Err(ScanError::MalformedLength(char::from(other))),
            }
        }

        self.read_crlf()?;

        if size > max {
            return Err(ScanError::TooLarge { size, max });
        }
        Ok(size)
    }

    fn read_crlf(&mut self) -> ScanResult<()> {
        for &wanted in CRLF {
            let got = self.read_byte()?;
            if got != wanted {
                return Err(ScanError::UnexpectedSymbol {
                    wanted: char::from(wanted),
                    got: char::from(got),
                });
            }
        }
        Ok(())
    }

    fn peek_byte(&self) -> ScanResult<u8> {
        self.buf.get(self.pos).copied().ok_or(ScanError::Incomplete)
    }

    fn read_byte(&mut self) -> ScanResult<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        Ok(b)
    }
}

impl Iterator for Scanner<'_> {
    type Item = ScanResult<Token>;

    /// Yields tokens until the declared count is exhausted or an error
    /// occurs; an error is yielded once and ends the sequence.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || !self.has_next() {
            return None;
        }
        let token = self.next_token();
        self.failed = token.is_err();
        Some(token)
    }
}

/// Returns the byte length of the first complete request in `buf`.
///
/// - `Ok(Some(len))` - a whole request occupies `buf[..len]`
/// - `Ok(None)` - more bytes are needed
/// - `Err(e)` - the bytes can never form a valid request
pub fn frame_len(buf: &[u8]) -> ScanResult<Option<usize>> {
    let mut scanner = Scanner::new(buf);
    for token in scanner.by_ref() {
        match token {
            Ok(_) => {}
            Err(ScanError::Incomplete) => return Ok(None),
            // An empty array is a whole (if useless) request.
            Err(ScanError::OutOfBound) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(scanner.consumed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &[u8]) -> Vec<ScanResult<Token>> {
        Scanner::new(input).collect()
    }

    #[test]
    fn test_scan_command_and_args() {
        let input = b"*3\r\n$3\r\nset\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        assert_eq!(
            tokens(input),
            vec![
                Ok(Token::Command("SET".to_string())),
                Ok(Token::Arg(Bytes::from("foo"))),
                Ok(Token::Arg(Bytes::from("bar"))),
            ]
        );
    }

    #[test]
    fn test_args_keep_their_case() {
        let input = b"*2\r\n$4\r\nEcHo\r\n$5\r\nHeLLo\r\n";
        assert_eq!(
            tokens(input),
            vec![
                Ok(Token::Command("ECHO".to_string())),
                Ok(Token::Arg(Bytes::from("HeLLo"))),
            ]
        );
    }

    #[test]
    fn test_binary_safe_arg() {
        let input = b"*2\r\n$3\r\nGET\r\n$5\r\nhel\x00o\r\n";
        let scanned = tokens(input);
        assert_eq!(scanned[1], Ok(Token::Arg(Bytes::from(&b"hel\x00o"[..]))));
    }

    #[test]
    fn test_not_an_array() {
        assert_eq!(tokens(b"+PING\r\n"), vec![Err(ScanError::NotABulkString)]);
    }

    #[test]
    fn test_element_not_a_bulk_string() {
        let scanned = tokens(b"*1\r\n:3\r\n");
        assert_eq!(scanned, vec![Err(ScanError::NotABulkString)]);
    }

    #[test]
    fn test_malformed_length() {
        let scanned = tokens(b"*1\r\n$x\r\nGET\r\n");
        assert_eq!(scanned, vec![Err(ScanError::MalformedLength('x'))]);

        let scanned = tokens(b"*-1\r\n");
        assert_eq!(scanned, vec![Err(ScanError::MalformedLength('-'))]);
    }

    #[test]
    fn test_unexpected_symbol() {
        let scanned = tokens(b"*1\r\n$3\r\nGETX\r\n");
        assert_eq!(
            scanned,
            vec![Err(ScanError::UnexpectedSymbol {
                wanted: '\r',
                got: 'X'
            })]
        );
    }

    #[test]
    fn test_out_of_bound() {
        let input = b"*1\r\n$4\r\nPING\r\n";
        let mut scanner = Scanner::new(input);
        assert!(scanner.next_token().is_ok());
        assert!(!scanner.has_next());
        assert_eq!(scanner.next_token(), Err(ScanError::OutOfBound));
    }

    #[test]
    fn test_empty_array_is_out_of_bound() {
        let mut scanner = Scanner::new(b"*0\r\n");
        assert_eq!(scanner.next_token(), Err(ScanError::OutOfBound));
        assert_eq!(scanner.array_len(), Some(0));
    }

    #[test]
    fn test_blank_line_between_elements() {
        let input = b"*2\r\n$3\r\nGET\r\n\r\n$1\r\nk\r\n";
        let scanned = tokens(input);
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[1], Ok(Token::Arg(Bytes::from("k"))));
    }

    #[test]
    fn test_bulk_too_large() {
        let input = b"*1\r\n$999999999999\r\n";
        assert!(matches!(
            tokens(input).as_slice(),
            [Err(ScanError::TooLarge { .. })]
        ));
    }

    #[test]
    fn test_frame_len_complete() {
        let input = b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1\r\n$4\r\nPING\r\n";
        assert_eq!(frame_len(input), Ok(Some(20)));
    }

    #[test]
    fn test_frame_len_incomplete() {
        assert_eq!(frame_len(b""), Ok(None));
        assert_eq!(frame_len(b"*2\r\n$3\r\nGET\r\n$1\r\n"), Ok(None));
        assert_eq!(frame_len(b"*2\r\n$3\r\nGET\r\n$5\r\nab"), Ok(None));
        assert_eq!(frame_len(b"*2\r"), Ok(None));
    }

    #[test]
    fn test_frame_len_empty_array() {
        assert_eq!(frame_len(b"*0\r\n"), Ok(Some(4)));
    }

    #[test]
    fn test_frame_len_rejects_garbage() {
        assert_eq!(frame_len(b"hello\r\n"), Err(ScanError::NotABulkString));
    }
}
