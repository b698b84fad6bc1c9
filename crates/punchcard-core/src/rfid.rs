//! RFID tag codes: two uppercase letters followed by four digits.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const RFID_LETTERS: usize = 2;
const RFID_DIGITS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RfidError {
    #[error("empty RFID code")]
    Empty,
    #[error("malformed RFID code {0:?}: expected two letters followed by four digits")]
    Malformed(String),
}

/// A validated RFID code such as `AB1234`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RfidCode(String);

impl RfidCode {
    /// Parse operator- or reader-supplied input.
    ///
    /// Surrounding whitespace is ignored and letters are upper-cased, so a
    /// keyboard-wedge reader emitting `ab1234\n` and an operator typing
    /// `AB1234` resolve to the same code.
    pub fn parse(input: &str) -> Result<Self, RfidError> {
        let code = input.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(RfidError::Empty);
        }
        let bytes = code.as_bytes();
        let well_formed = bytes.len() == RFID_LETTERS + RFID_DIGITS
            && bytes[..RFID_LETTERS].iter().all(u8::is_ascii_uppercase)
            && bytes[RFID_LETTERS..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(RfidError::Malformed(input.trim().to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RfidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RfidCode {
    type Err = RfidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RfidCode {
    type Error = RfidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RfidCode> for String {
    fn from(code: RfidCode) -> Self {
        code.0
    }
}
