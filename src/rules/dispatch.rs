//! The per-command rule walk
//!
//! Walks the ordered rule list for each client command, runs the matching
//! rules' hooks, and guarantees exactly one terminal packet group (OK, ERR
//! or a complete result set) per command. Errors from hooks and the driver
//! are converted to ERR packets here, at a single point.

use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::driver::{self, DriverOutcome, SqlHandle};
use crate::error::{Result, ServerError};
use crate::protocol::commands::Command;
use crate::protocol::constants::COM_FIELD_LIST;
use crate::protocol::packet::PacketIO;
use crate::protocol::resultset::{ColumnDef, ResponseSender, Row};
use crate::session::Session;

use super::{DataValue, OkReply, Rule};

/// Walks the read-only rule list for one connection
pub struct Dispatcher {
    rules: Arc<Vec<Rule>>,
}

impl Dispatcher {
    pub fn new(rules: Arc<Vec<Rule>>) -> Self {
        Self { rules }
    }

    /// Dispatch one client command. Sends exactly one terminal packet group.
    pub async fn dispatch<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        sender: &ResponseSender,
        session: &mut Session,
        command: &Command,
    ) -> Result<()> {
        session.data_sent = false;
        let tag = command.tag();
        let query = command.text();

        let total = self.rules.len();
        for (idx, rule) in self.rules.iter().enumerate() {
            let is_last = idx + 1 == total;

            match self
                .try_rule(io, sender, session, rule, tag, &query, is_last)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_reportable() => {
                    sender.send_err_for(io, &e).await?;
                    session.data_sent = true;
                }
                Err(e) => return Err(e),
            }

            if session.data_sent {
                return Ok(());
            }
        }

        // Nothing matched or nothing terminal: per-command defaults
        match command {
            Command::Query(_) => {
                match self.forward(io, sender, session, None, &query).await {
                    Ok(()) => {}
                    Err(e) if e.is_reportable() => {
                        sender.send_err_for(io, &e).await?;
                        session.data_sent = true;
                    }
                    Err(e) => return Err(e),
                }
            }
            Command::InitDb(_) => {
                sender.send_ok(io, 0, 0, 0, "").await?;
                session.data_sent = true;
            }
            Command::FieldList(_) => {
                sender.send_field_list(io, &[]).await?;
                session.data_sent = true;
            }
            Command::Other(tag, _) => {
                sender
                    .send_err_for(io, &ServerError::UnsupportedCommand(*tag))
                    .await?;
                session.data_sent = true;
            }
            // Handled by the connection loop, never dispatched
            Command::Quit | Command::Ping => {}
        }

        Ok(())
    }

    /// Run the gates for one rule and, if both pass, its hook pipeline
    async fn try_rule<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        sender: &ResponseSender,
        session: &mut Session,
        rule: &Rule,
        tag: u8,
        query: &str,
        is_last: bool,
    ) -> Result<()> {
        // Command gate
        if rule.command.is_present() {
            match rule.command.resolve(query, &[], session)? {
                Some(c) if c == tag => {}
                _ => return Ok(()),
            }
        }

        // Match gate
        let captures = match rule.matcher.matches(query) {
            Some(c) => c,
            None => return Ok(()),
        };

        self.apply_rule(io, sender, session, rule, tag, query, &captures, is_last)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_rule<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        sender: &ResponseSender,
        session: &mut Session,
        rule: &Rule,
        tag: u8,
        query: &str,
        captures: &[String],
        is_last: bool,
    ) -> Result<()> {
        // `before`: the return value is discarded, a failure is reported
        // and counts as the command's terminal response
        if let Some(hook) = &rule.before {
            if let Err(e) = hook(query, captures, session) {
                sender
                    .send_err_for(io, &ServerError::Rule(e.to_string()))
                    .await?;
                session.data_sent = true;
            }
        }

        // `rewrite`: regex rules with no explicit rewrite forward capture 1
        let fwd_query = match rule.rewrite.resolve(query, captures, session)? {
            Some(q) => q,
            None if rule.matcher.is_regex() && !captures.is_empty() => captures[0].clone(),
            None => query.to_string(),
        };

        // `error` wins over `ok`; both suppress forwarding
        if !session.data_sent {
            if let Some(Some(reply)) = rule.error.resolve(query, captures, session)? {
                sender
                    .send_err(io, reply.code, &reply.sqlstate, &reply.message)
                    .await?;
                session.data_sent = true;
            }
        }

        if !session.data_sent {
            match rule.ok.resolve(query, captures, session)? {
                Some(OkReply::Flag(true)) => {
                    sender.send_ok(io, 0, 0, 0, "").await?;
                    session.data_sent = true;
                }
                Some(OkReply::Full {
                    message,
                    affected_rows,
                    last_insert_id,
                    warnings,
                }) => {
                    sender
                        .send_ok(io, affected_rows, last_insert_id, warnings, &message)
                        .await?;
                    session.data_sent = true;
                }
                Some(OkReply::Flag(false)) | None => {}
            }
        }

        // `columns` and `data` together form one result set
        let col_names = rule.columns.resolve(query, captures, session)?;
        let data = rule.data.resolve(query, captures, session)?;
        let produced = col_names.is_some() || data.is_some();

        // Forward step, terminal: only when nothing has answered the command
        if !session.data_sent && !produced && (rule.is_terminal() || is_last) {
            if let Some(d) = &rule.dsn {
                session.connect(&d.dsn, &d.user, &d.password)?;
            }
            debug!("Forwarding query: {}", fwd_query);
            self.forward(io, sender, session, rule.dbh.as_ref(), &fwd_query)
                .await?;
        }

        // Emit the accumulated result set
        if !session.data_sent && produced {
            let (defs, rows) = build_result(col_names, data);
            if tag == COM_FIELD_LIST {
                sender.send_field_list(io, &defs).await?;
            } else {
                sender.send_result_set(io, &defs, &rows).await?;
            }
            session.data_sent = true;
        }

        // `after` runs before the stop check, even when a terminal action
        // already went out; its return value and failures are discarded
        if let Some(hook) = &rule.after {
            if let Err(e) = hook(query, captures, session) {
                warn!("after hook failed: {}", e);
            }
        }

        Ok(())
    }

    /// Execute a query through the rule's pinned handle or the session's
    /// active one and emit the outcome.
    async fn forward<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        sender: &ResponseSender,
        session: &mut Session,
        dbh: Option<&Arc<Mutex<Box<dyn SqlHandle>>>>,
        query: &str,
    ) -> Result<()> {
        let outcome = if let Some(dbh) = dbh {
            dbh.lock().unwrap().execute(query)
        } else if let Some(handle) = session.handle_mut() {
            handle.execute(query)
        } else {
            return Err(ServerError::UnsupportedForward);
        };

        match outcome.map_err(ServerError::from)? {
            DriverOutcome::Rows { columns, rows } => {
                let defs: Vec<ColumnDef> = columns.iter().map(driver::column_def).collect();
                sender.send_result_set(io, &defs, &rows).await?;
            }
            DriverOutcome::Done {
                affected_rows,
                last_insert_id,
            } => {
                sender.send_ok(io, affected_rows, last_insert_id, 0, "").await?;
            }
        }

        session.data_sent = true;
        Ok(())
    }
}

/// Shape the `columns`/`data` slots into column definitions plus rows.
/// Missing column names fall back to the zero-based index.
fn build_result(names: Option<Vec<String>>, data: Option<DataValue>) -> (Vec<ColumnDef>, Vec<Row>) {
    let (width, rows) = match data {
        Some(d) => (d.width(), d.into_rows()),
        None => (0, Vec::new()),
    };
    let names = names.unwrap_or_default();
    let width = width.max(names.len());

    let defs = (0..width)
        .map(|i| {
            let name = names.get(i).cloned().unwrap_or_else(|| i.to_string());
            ColumnDef::named(name)
        })
        .collect();

    (defs, rows)
}
