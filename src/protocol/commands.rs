//! Command packet decoding
//!
//! The first payload byte of each client packet is the command tag; the rest
//! is the argument (query text or database name).

use crate::error::{Result, ServerError};

use super::constants::*;

/// A decoded client command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    InitDb(String),
    Query(String),
    FieldList(String),
    Ping,
    /// Any other tag, kept raw so rules can still gate on it
    Other(u8, Vec<u8>),
}

impl Command {
    /// Decode a command packet payload
    pub fn parse(payload: &[u8]) -> Result<Command> {
        if payload.is_empty() {
            return Err(ServerError::Protocol("Empty command packet".into()));
        }

        let tag = payload[0];
        let data = &payload[1..];

        Ok(match tag {
            COM_QUIT => Command::Quit,
            COM_INIT_DB => Command::InitDb(String::from_utf8_lossy(data).to_string()),
            COM_QUERY => Command::Query(String::from_utf8_lossy(data).to_string()),
            COM_FIELD_LIST => {
                // COM_FIELD_LIST carries a NUL-terminated table name plus an
                // optional field wildcard; rules see the table name.
                let table = data
                    .split(|&b| b == 0)
                    .next()
                    .map(|t| String::from_utf8_lossy(t).to_string())
                    .unwrap_or_default();
                Command::FieldList(table)
            }
            COM_PING => Command::Ping,
            other => Command::Other(other, data.to_vec()),
        })
    }

    /// The wire tag for this command
    pub fn tag(&self) -> u8 {
        match self {
            Command::Quit => COM_QUIT,
            Command::InitDb(_) => COM_INIT_DB,
            Command::Query(_) => COM_QUERY,
            Command::FieldList(_) => COM_FIELD_LIST,
            Command::Ping => COM_PING,
            Command::Other(tag, _) => *tag,
        }
    }

    /// The textual argument rules match against
    pub fn text(&self) -> String {
        match self {
            Command::Quit | Command::Ping => String::new(),
            Command::InitDb(s) | Command::Query(s) | Command::FieldList(s) => s.clone(),
            Command::Other(_, data) => String::from_utf8_lossy(data).to_string(),
        }
    }
}
