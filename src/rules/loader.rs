//! Rule configuration files
//!
//! Each `--config` file holds a JSON array of rule records covering the
//! declarative slots. Callable slots have no file representation; they are
//! attached through the [`Rule`](super::Rule) builder API.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, ServerError};
use crate::protocol::constants::*;

use super::{DataValue, Matcher, OkReply, Rule, RuleDsn, Slot};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleSpec {
    command: Option<CommandSpec>,
    #[serde(rename = "match")]
    matcher: Option<MatchSpec>,
    rewrite: Option<String>,
    error: Option<ErrorSpec>,
    ok: Option<OkSpec>,
    columns: Option<Vec<String>>,
    data: Option<Value>,
    dsn: Option<DsnSpec>,
    #[serde(default)]
    forward: bool,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandSpec {
    Tag(u8),
    Name(String),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MatchSpec {
    Literal(String),
    Regex { regex: String },
}

#[derive(Debug, Deserialize)]
struct ErrorSpec {
    message: String,
    #[serde(default = "default_error_code")]
    code: u16,
    #[serde(default = "default_sqlstate")]
    sqlstate: String,
}

fn default_error_code() -> u16 {
    2000
}

fn default_sqlstate() -> String {
    "HY000".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OkSpec {
    Flag(bool),
    Full {
        #[serde(default)]
        message: String,
        #[serde(default)]
        affected_rows: u64,
        #[serde(default)]
        last_insert_id: u64,
        #[serde(default)]
        warnings: u16,
    },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DsnSpec {
    Plain(String),
    Full {
        dsn: String,
        #[serde(default)]
        user: String,
        #[serde(default)]
        password: String,
    },
}

/// Load and concatenate rule files in argument order
pub fn load_rules<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Rule>> {
    let mut rules = Vec::new();
    for path in paths {
        rules.extend(load_rules_file(path.as_ref())?);
    }
    Ok(rules)
}

/// Load one rule file
pub fn load_rules_file(path: &Path) -> Result<Vec<Rule>> {
    let text = fs::read_to_string(path).map_err(|e| {
        ServerError::Rule(format!("Cannot read rule file {}: {}", path.display(), e))
    })?;
    parse_rules(&text)
        .map_err(|e| ServerError::Rule(format!("Rule file {}: {}", path.display(), e)))
}

/// Parse a JSON array of rule records
pub fn parse_rules(json: &str) -> Result<Vec<Rule>> {
    let specs: Vec<RuleSpec> = serde_json::from_str(json)?;
    specs.into_iter().map(build_rule).collect()
}

fn build_rule(spec: RuleSpec) -> Result<Rule> {
    let mut rule = Rule::new();

    if let Some(cmd) = spec.command {
        rule.command = Slot::Literal(command_tag(cmd)?);
    }

    if let Some(m) = spec.matcher {
        rule.matcher = match m {
            MatchSpec::Literal(s) => Matcher::Literal(s),
            MatchSpec::Regex { regex } => Matcher::Regex(
                Regex::new(&regex)
                    .map_err(|e| ServerError::Rule(format!("Bad match regex: {}", e)))?,
            ),
        };
    }

    if let Some(q) = spec.rewrite {
        rule.rewrite = Slot::Literal(q);
    }

    if let Some(e) = spec.error {
        rule.error = Slot::Literal(Some(super::ErrorReply::new(e.message, e.code, e.sqlstate)));
    }

    if let Some(ok) = spec.ok {
        rule.ok = Slot::Literal(match ok {
            OkSpec::Flag(flag) => OkReply::Flag(flag),
            OkSpec::Full {
                message,
                affected_rows,
                last_insert_id,
                warnings,
            } => OkReply::Full {
                message,
                affected_rows,
                last_insert_id,
                warnings,
            },
        });
    }

    if let Some(names) = spec.columns {
        rule.columns = Slot::Literal(names);
    }

    if let Some(data) = spec.data {
        rule.data = Slot::Literal(data_value(data)?);
    }

    if let Some(dsn) = spec.dsn {
        rule.dsn = Some(match dsn {
            DsnSpec::Plain(dsn) => RuleDsn {
                dsn,
                user: String::new(),
                password: String::new(),
            },
            DsnSpec::Full {
                dsn,
                user,
                password,
            } => RuleDsn {
                dsn,
                user,
                password,
            },
        });
    }

    rule.forward = spec.forward;

    Ok(rule)
}

fn command_tag(spec: CommandSpec) -> Result<u8> {
    Ok(match spec {
        CommandSpec::Tag(tag) => tag,
        CommandSpec::Name(name) => match name.as_str() {
            "quit" => COM_QUIT,
            "init_db" => COM_INIT_DB,
            "query" => COM_QUERY,
            "field_list" => COM_FIELD_LIST,
            "ping" => COM_PING,
            other => {
                return Err(ServerError::Rule(format!("Unknown command name: {}", other)))
            }
        },
    })
}

/// Map a JSON value onto the `data` slot shapes: scalar, flat sequence,
/// sequence of sequences, or mapping.
fn data_value(value: Value) -> Result<DataValue> {
    match value {
        Value::String(s) => Ok(DataValue::Scalar(s)),
        Value::Number(n) => Ok(DataValue::Scalar(n.to_string())),
        Value::Bool(b) => Ok(DataValue::Scalar(if b { "1" } else { "0" }.to_string())),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (k, v) in map {
                out.insert(k, scalar_string(&v)?.unwrap_or_default());
            }
            Ok(DataValue::Map(out))
        }
        Value::Array(items) => {
            if items.iter().all(|i| i.is_array()) && !items.is_empty() {
                let mut rows = Vec::with_capacity(items.len());
                for item in items {
                    let fields = match item {
                        Value::Array(fields) => fields,
                        _ => unreachable!(),
                    };
                    rows.push(
                        fields
                            .iter()
                            .map(scalar_string)
                            .collect::<Result<Vec<_>>>()?,
                    );
                }
                Ok(DataValue::Rows(rows))
            } else {
                Ok(DataValue::List(
                    items
                        .iter()
                        .map(scalar_string)
                        .collect::<Result<Vec<_>>>()?,
                ))
            }
        }
        Value::Null => Err(ServerError::Rule("Rule data cannot be null".into())),
    }
}

/// Render a JSON scalar as its text-protocol form, None for null
fn scalar_string(value: &Value) -> Result<Option<String>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(if *b { "1" } else { "0" }.to_string())),
        other => Err(ServerError::Rule(format!(
            "Unsupported value in rule data: {}",
            other
        ))),
    }
}
