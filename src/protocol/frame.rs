//! Serial frame parsing
//!
//! A frame is one line of serial text carrying two readings separated by a
//! single `:` (`water:temperature`). Tokens are forwarded verbatim: no
//! numeric validation, range checks or unit conversion happen here.

use std::fmt;
use thiserror::Error;

/// Field delimiter inside a frame
pub const FIELD_DELIMITER: char = ':';

/// Number of fields a valid frame carries
pub const FIELD_COUNT: usize = 2;

/// One line of text read from the serial device, without its line terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine(String);

impl RawLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank lines are the normal "no data this tick" condition and must be
    /// skipped before parsing.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for RawLine {
    fn from(line: String) -> Self {
        Self(line)
    }
}

impl From<&str> for RawLine {
    fn from(line: &str) -> Self {
        Self(line.to_string())
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two readings carried by one frame, as unparsed text tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingPair {
    pub water: String,
    pub temperature: String,
}

/// Frame parsing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid data format: {raw:?}. Expected format: data:data")]
    InvalidFormat { raw: String },
}

/// Parse one serial line into a reading pair.
///
/// The line is trimmed and split on `:`; exactly two tokens are required.
/// Callers skip blank lines before calling this.
pub fn parse(line: &RawLine) -> Result<ReadingPair, ParseError> {
    let trimmed = line.as_str().trim();
    let mut tokens = trimmed.split(FIELD_DELIMITER);

    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(water), Some(temperature), None) => Ok(ReadingPair {
            water: water.to_string(),
            temperature: temperature.to_string(),
        }),
        _ => Err(ParseError::InvalidFormat {
            raw: line.as_str().to_string(),
        }),
    }
}
