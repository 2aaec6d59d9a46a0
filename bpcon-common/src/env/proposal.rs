use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::env::value::MAX_VALUE_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("command is not valid UTF-8")]
    NotUtf8,

    #[error("expected `<op>,<key>,<value>`, got {0:?}")]
    MissingFields(String),

    #[error("unknown operation {0:?} (expected P or D)")]
    UnknownOperation(String),

    #[error("empty key")]
    EmptyKey,

    #[error("command is {length} bytes, limit is {max}")]
    TooLong { length: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Put,
    Delete,
}

impl Operation {
    fn tag(self) -> &'static str {
        match self {
            Operation::Put => "P",
            Operation::Delete => "D",
        }
    }
}

/// A client key/value mutation in its `<op>,<key>,<value>` form.
///
/// `P,k,v` stores `v` under `k`; `D,k,` removes `k` (the value field is kept but ignored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub op: Operation,
    pub key: String,
    pub value: String,
}

impl Command {
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        if raw.len() > MAX_VALUE_LEN {
            return Err(CommandError::TooLong { length: raw.len(), max: MAX_VALUE_LEN });
        }
        let fields: Vec<&str> = raw.split(',').collect();
        let [op, key, value] = fields.as_slice() else {
            return Err(CommandError::MissingFields(raw.to_string()));
        };

        let op = match *op {
            "P" => Operation::Put,
            "D" => Operation::Delete,
            other => return Err(CommandError::UnknownOperation(other.to_string())),
        };
        if key.is_empty() {
            return Err(CommandError::EmptyKey);
        }

        Ok(Self {
            op,
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommandError> {
        let raw = std::str::from_utf8(bytes).map_err(|_| CommandError::NotUtf8)?;
        Self::parse(raw)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.op.tag(), self.key, self.value)
    }
}
