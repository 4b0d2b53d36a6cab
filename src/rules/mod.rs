//! Rule records and their programmable slots
//!
//! A rule is a matcher plus a set of hooks applied to a single client
//! command. Every programmable slot is a [`Slot`]: absent, a literal value,
//! or a callable invoked with the query text, the regex captures and the
//! connection's session.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use regex::Regex;

use crate::driver::SqlHandle;
use crate::error::Result;
use crate::session::Session;

pub mod dispatch;
pub mod loader;

pub use dispatch::Dispatcher;

/// Callable slot: receives the raw query, the positional captures from a
/// regex `match`, and the connection state.
pub type Callable<T> = Arc<dyn Fn(&str, &[String], &mut Session) -> Result<T> + Send + Sync>;

/// Hook whose return value is discarded (`before` / `after`)
pub type Hook = Callable<()>;

/// A programmable rule slot
#[derive(Clone)]
pub enum Slot<T> {
    Absent,
    Literal(T),
    Callable(Callable<T>),
}

impl<T: Clone> Slot<T> {
    pub fn is_present(&self) -> bool {
        !matches!(self, Slot::Absent)
    }

    /// Resolve the slot against the current command, running the callable
    /// when there is one.
    pub fn resolve(
        &self,
        query: &str,
        captures: &[String],
        session: &mut Session,
    ) -> Result<Option<T>> {
        match self {
            Slot::Absent => Ok(None),
            Slot::Literal(v) => Ok(Some(v.clone())),
            Slot::Callable(f) => f(query, captures, session).map(Some),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Absent
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Absent => write!(f, "Absent"),
            Slot::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            Slot::Callable(_) => write!(f, "Callable(..)"),
        }
    }
}

/// The `match` gate: absent rules match everything (subject to the command
/// gate), literals must equal the query exactly, regexes capture positional
/// arguments for the hooks.
#[derive(Clone, Default)]
pub enum Matcher {
    #[default]
    Absent,
    Literal(String),
    Regex(Regex),
}

impl Matcher {
    /// Returns the captures on a match, None otherwise. A non-regex match
    /// yields no captures.
    pub fn matches(&self, text: &str) -> Option<Vec<String>> {
        match self {
            Matcher::Absent => Some(Vec::new()),
            Matcher::Literal(s) => (s == text).then(Vec::new),
            Matcher::Regex(re) => re.captures(text).map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect()
            }),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Matcher::Regex(_))
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Matcher::Absent => write!(f, "Absent"),
            Matcher::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            Matcher::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
        }
    }
}

/// Resolved `error` slot value: the ERR triple sent to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReply {
    pub message: String,
    pub code: u16,
    pub sqlstate: String,
}

impl ErrorReply {
    pub fn new(message: impl Into<String>, code: u16, sqlstate: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            sqlstate: sqlstate.into(),
        }
    }
}

/// Resolved `ok` slot value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OkReply {
    /// Truthy sends a bare OK, falsy sends nothing
    Flag(bool),
    Full {
        message: String,
        affected_rows: u64,
        last_insert_id: u64,
        warnings: u16,
    },
}

/// Resolved `data` slot value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    /// Promoted to a one-column, one-row result
    Scalar(String),
    /// One column, one row per item
    List(Vec<Option<String>>),
    /// Emitted row-by-row
    Rows(Vec<Vec<Option<String>>>),
    /// Two columns, key and value, in sorted-key order
    Map(BTreeMap<String, String>),
}

impl DataValue {
    /// Number of columns this data occupies
    pub fn width(&self) -> usize {
        match self {
            DataValue::Scalar(_) | DataValue::List(_) => 1,
            DataValue::Map(_) => 2,
            DataValue::Rows(rows) => rows.iter().map(|r| r.len()).max().unwrap_or(0),
        }
    }

    /// Render into protocol rows
    pub fn into_rows(self) -> Vec<Vec<Option<String>>> {
        match self {
            DataValue::Scalar(v) => vec![vec![Some(v)]],
            DataValue::List(items) => items.into_iter().map(|v| vec![v]).collect(),
            DataValue::Rows(rows) => rows,
            DataValue::Map(map) => map
                .into_iter()
                .map(|(k, v)| vec![Some(k), Some(v)])
                .collect(),
        }
    }
}

/// Per-rule upstream DSN: forwarding through this rule first reconnects the
/// session to it.
#[derive(Debug, Clone, Default)]
pub struct RuleDsn {
    pub dsn: String,
    pub user: String,
    pub password: String,
}

/// A single dispatch rule
#[derive(Clone, Default)]
pub struct Rule {
    // Debug is implemented manually below, since `dbh` holds a
    // non-Debug trait object and `before`/`after` hold non-Debug closures.
    /// Command tag gate; absent gates nothing
    pub command: Slot<u8>,
    /// Query text gate
    pub matcher: Matcher,
    /// Invoked before anything else; a failure is reported as ERR
    pub before: Option<Hook>,
    /// Replaces the forwarded query; defaults to capture 1 for regex rules
    pub rewrite: Slot<String>,
    /// Pinned upstream handle; also makes the rule terminal
    pub dbh: Option<Arc<Mutex<Box<dyn SqlHandle>>>>,
    /// Per-rule DSN to (re)connect through; also makes the rule terminal
    pub dsn: Option<RuleDsn>,
    /// ERR triple; wins over `ok`, suppresses forwarding
    pub error: Slot<Option<ErrorReply>>,
    /// OK reply; suppresses forwarding
    pub ok: Slot<OkReply>,
    /// Column names for the result set
    pub columns: Slot<Vec<String>>,
    /// Row data for the result set
    pub data: Slot<DataValue>,
    /// Invoked after emission, before the stop check; return value discarded
    pub after: Option<Hook>,
    /// Marks the rule terminal without a dbh/dsn of its own
    pub forward: bool,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("command", &self.command)
            .field("matcher", &self.matcher)
            .field("before", &self.before.as_ref().map(|_| "Callable(..)"))
            .field("rewrite", &self.rewrite)
            .field("dbh", &self.dbh.as_ref().map(|_| "SqlHandle(..)"))
            .field("dsn", &self.dsn)
            .field("error", &self.error)
            .field("ok", &self.ok)
            .field("columns", &self.columns)
            .field("data", &self.data)
            .field("after", &self.after.as_ref().map(|_| "Callable(..)"))
            .field("forward", &self.forward)
            .finish()
    }
}

impl Rule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command(mut self, tag: u8) -> Self {
        self.command = Slot::Literal(tag);
        self
    }

    pub fn command_fn(mut self, f: Callable<u8>) -> Self {
        self.command = Slot::Callable(f);
        self
    }

    pub fn match_literal(mut self, text: impl Into<String>) -> Self {
        self.matcher = Matcher::Literal(text.into());
        self
    }

    pub fn match_regex(mut self, re: Regex) -> Self {
        self.matcher = Matcher::Regex(re);
        self
    }

    pub fn before(mut self, hook: Hook) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn rewrite(mut self, query: impl Into<String>) -> Self {
        self.rewrite = Slot::Literal(query.into());
        self
    }

    pub fn rewrite_fn(mut self, f: Callable<String>) -> Self {
        self.rewrite = Slot::Callable(f);
        self
    }

    pub fn dbh(mut self, handle: Box<dyn SqlHandle>) -> Self {
        self.dbh = Some(Arc::new(Mutex::new(handle)));
        self
    }

    pub fn dsn(mut self, dsn: RuleDsn) -> Self {
        self.dsn = Some(dsn);
        self
    }

    pub fn error(mut self, message: impl Into<String>, code: u16, sqlstate: impl Into<String>) -> Self {
        self.error = Slot::Literal(Some(ErrorReply::new(message, code, sqlstate)));
        self
    }

    pub fn error_fn(mut self, f: Callable<Option<ErrorReply>>) -> Self {
        self.error = Slot::Callable(f);
        self
    }

    pub fn ok(mut self) -> Self {
        self.ok = Slot::Literal(OkReply::Flag(true));
        self
    }

    pub fn ok_full(
        mut self,
        message: impl Into<String>,
        affected_rows: u64,
        last_insert_id: u64,
        warnings: u16,
    ) -> Self {
        self.ok = Slot::Literal(OkReply::Full {
            message: message.into(),
            affected_rows,
            last_insert_id,
            warnings,
        });
        self
    }

    pub fn ok_fn(mut self, f: Callable<OkReply>) -> Self {
        self.ok = Slot::Callable(f);
        self
    }

    pub fn columns(mut self, names: Vec<String>) -> Self {
        self.columns = Slot::Literal(names);
        self
    }

    pub fn data(mut self, data: DataValue) -> Self {
        self.data = Slot::Literal(data);
        self
    }

    pub fn data_fn(mut self, f: Callable<DataValue>) -> Self {
        self.data = Slot::Callable(f);
        self
    }

    pub fn after(mut self, hook: Hook) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn forward(mut self) -> Self {
        self.forward = true;
        self
    }

    /// Whether the forward step may trigger for this rule (spec'd triggers
    /// other than being the last rule)
    pub fn is_terminal(&self) -> bool {
        self.dbh.is_some() || self.dsn.is_some() || self.forward
    }
}
