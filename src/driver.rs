//! Upstream SQL driver abstraction and the bridge into the wire protocol
//!
//! The server never parses SQL itself. Queries that reach the forward step
//! are handed to an [`SqlHandle`], and whatever comes back (column metadata
//! plus rows, or an affected-row count) is translated into text-protocol
//! result packets.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::ServerError;
use crate::protocol::constants::{MYSQL_TYPE_STRING, NOT_NULL_FLAG};
use crate::protocol::resultset::{ColumnDef, Row};

/// Error reported by an upstream driver
#[derive(Debug, Clone)]
pub struct DriverError {
    pub message: String,
    pub code: Option<u16>,
    pub sqlstate: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            sqlstate: None,
        }
    }

    pub fn with_codes(message: impl Into<String>, code: u16, sqlstate: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
            sqlstate: Some(sqlstate.into()),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DriverError {}

impl From<DriverError> for ServerError {
    fn from(e: DriverError) -> Self {
        ServerError::Driver {
            message: e.message,
            code: e.code,
            sqlstate: e.sqlstate,
        }
    }
}

/// Column metadata as reported by a driver
#[derive(Debug, Clone)]
pub struct DriverColumn {
    pub name: String,
    pub nullable: bool,
    pub length: u32,
    pub type_code: u8,
}

impl DriverColumn {
    /// A nullable string column, the default shape for non-numeric data
    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            length: 255,
            type_code: MYSQL_TYPE_STRING,
        }
    }
}

/// Result of executing one query through a driver
#[derive(Debug, Clone)]
pub enum DriverOutcome {
    /// A result set: column metadata plus rows rendered as text, NULLs kept
    Rows {
        columns: Vec<DriverColumn>,
        rows: Vec<Row>,
    },
    /// A statement with no result set
    Done {
        affected_rows: u64,
        last_insert_id: u64,
    },
}

/// Connects to upstream databases identified by DSN
pub trait SqlDriver: Send + Sync {
    fn open(
        &self,
        dsn: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn SqlHandle>, DriverError>;
}

/// One open upstream connection
pub trait SqlHandle: Send + Sync {
    /// An independent handle to the same upstream (one per accepted client)
    fn try_clone(&self) -> Result<Box<dyn SqlHandle>, DriverError>;

    fn execute(&mut self, query: &str) -> Result<DriverOutcome, DriverError>;
}

/// Translate driver column metadata into a protocol column definition
pub fn column_def(col: &DriverColumn) -> ColumnDef {
    let mut def = ColumnDef::named(col.name.clone());
    def.length = col.length;
    def.type_code = col.type_code;
    if !col.nullable {
        def.flags |= NOT_NULL_FLAG;
    }
    def
}

/// Scripted reply a [`MemoryDriver`] hands back for a known query
pub type ScriptedReply = Result<DriverOutcome, DriverError>;

/// In-process driver serving scripted query results under `memory:` DSNs.
///
/// Doubles as the crate's test backend: every handle cloned from the same
/// driver shares one script table.
#[derive(Default)]
pub struct MemoryDriver {
    scripts: Arc<Mutex<HashMap<String, ScriptedReply>>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a result set for a query
    pub fn script_rows(&self, query: &str, columns: Vec<DriverColumn>, rows: Vec<Row>) {
        self.scripts.lock().unwrap().insert(
            query.to_string(),
            Ok(DriverOutcome::Rows { columns, rows }),
        );
    }

    /// Script an OK outcome for a query
    pub fn script_done(&self, query: &str, affected_rows: u64, last_insert_id: u64) {
        self.scripts.lock().unwrap().insert(
            query.to_string(),
            Ok(DriverOutcome::Done {
                affected_rows,
                last_insert_id,
            }),
        );
    }

    /// Script a failure for a query
    pub fn script_error(&self, query: &str, error: DriverError) {
        self.scripts
            .lock()
            .unwrap()
            .insert(query.to_string(), Err(error));
    }
}

impl SqlDriver for MemoryDriver {
    fn open(
        &self,
        dsn: &str,
        _user: &str,
        _password: &str,
    ) -> Result<Box<dyn SqlHandle>, DriverError> {
        if !dsn.starts_with("memory:") {
            return Err(DriverError::new(format!("Unsupported DSN: {}", dsn)));
        }
        Ok(Box::new(MemoryHandle {
            scripts: Arc::clone(&self.scripts),
        }))
    }
}

struct MemoryHandle {
    scripts: Arc<Mutex<HashMap<String, ScriptedReply>>>,
}

impl SqlHandle for MemoryHandle {
    fn try_clone(&self) -> Result<Box<dyn SqlHandle>, DriverError> {
        Ok(Box::new(MemoryHandle {
            scripts: Arc::clone(&self.scripts),
        }))
    }

    fn execute(&mut self, query: &str) -> Result<DriverOutcome, DriverError> {
        match self.scripts.lock().unwrap().get(query) {
            Some(reply) => reply.clone(),
            None => Err(DriverError::new(format!(
                "No scripted result for query: {}",
                query
            ))),
        }
    }
}
