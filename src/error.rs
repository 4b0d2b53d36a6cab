//! Error types for the server
//!
//! Defines a unified error type that can represent errors from all components.
//! Error messages are formatted to be MySQL-compatible.

use std::fmt;
use std::io;

/// Unified error type for server operations
#[derive(Debug)]
pub enum ServerError {
    /// I/O error (socket read/write)
    Io(io::Error),
    /// Protocol error (bad sequence, malformed packet, oversized length)
    Protocol(String),
    /// Authentication error
    Auth(String),
    /// Upstream SQL driver failure, with optional driver-supplied code and SQLSTATE
    Driver {
        message: String,
        code: Option<u16>,
        sqlstate: Option<String>,
    },
    /// Failure inside a user rule hook
    Rule(String),
    /// Command with no matching rule and no built-in response
    UnsupportedCommand(u8),
    /// Forward requested with no handle to forward through
    UnsupportedForward,
}

impl ServerError {
    /// Convenience constructor for driver errors without code/SQLSTATE
    pub fn driver(message: impl Into<String>) -> Self {
        ServerError::Driver {
            message: message.into(),
            code: None,
            sqlstate: None,
        }
    }

    /// Whether this error can still be reported to the client as an ERR packet.
    /// I/O and protocol errors cannot: the stream is no longer trustworthy.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, ServerError::Io(_) | ServerError::Protocol(_))
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // MySQL-compatible error messages: display the message directly
        // without prefixing the error type (clients see the code separately)
        match self {
            ServerError::Io(e) => write!(f, "{}", e),
            ServerError::Protocol(msg) => write!(f, "{}", msg),
            ServerError::Auth(msg) => write!(f, "{}", msg),
            ServerError::Driver { message, .. } => write!(f, "{}", message),
            ServerError::Rule(msg) => write!(f, "{}", msg),
            ServerError::UnsupportedCommand(tag) => {
                write!(f, "Unknown command: 0x{:02X}", tag)
            }
            ServerError::UnsupportedForward => write!(f, "No handle; cannot forward"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::Rule(e.to_string())
    }
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// MySQL error codes (subset used by this server)
#[allow(dead_code)]
pub mod mysql_error_codes {
    pub const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
    pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
    pub const ER_NOT_SUPPORTED_YET: u16 = 1235;
    pub const CR_UNKNOWN_ERROR: u16 = 2000;
}

impl ServerError {
    /// Get the MySQL error code for this error
    pub fn mysql_error_code(&self) -> u16 {
        match self {
            ServerError::Auth(_) => mysql_error_codes::ER_DBACCESS_DENIED_ERROR,
            ServerError::Driver { code: Some(c), .. } => *c,
            ServerError::Driver { .. } => mysql_error_codes::CR_UNKNOWN_ERROR,
            ServerError::UnsupportedCommand(_) => mysql_error_codes::ER_UNKNOWN_COM_ERROR,
            ServerError::UnsupportedForward => mysql_error_codes::ER_NOT_SUPPORTED_YET,
            _ => mysql_error_codes::CR_UNKNOWN_ERROR,
        }
    }

    /// Get the SQLSTATE for this error
    pub fn sql_state(&self) -> &str {
        match self {
            ServerError::Auth(_) => "28000",
            ServerError::Driver {
                sqlstate: Some(s), ..
            } => s,
            ServerError::UnsupportedCommand(_) => "08S01",
            ServerError::UnsupportedForward => "42000",
            _ => "HY000",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_mapping() {
        let e = ServerError::Auth("Access denied for user 'x'".into());
        assert_eq!(e.mysql_error_code(), 1044);
        assert_eq!(e.sql_state(), "28000");
    }

    #[test]
    fn test_forward_error_mapping() {
        let e = ServerError::UnsupportedForward;
        assert_eq!(e.mysql_error_code(), 1235);
        assert_eq!(e.sql_state(), "42000");
        assert_eq!(e.to_string(), "No handle; cannot forward");
    }

    #[test]
    fn test_driver_error_passthrough() {
        let e = ServerError::Driver {
            message: "Table 'test.t' doesn't exist".into(),
            code: Some(1146),
            sqlstate: Some("42S02".into()),
        };
        assert_eq!(e.mysql_error_code(), 1146);
        assert_eq!(e.sql_state(), "42S02");
    }

    #[test]
    fn test_driver_error_defaults() {
        let e = ServerError::driver("upstream went away");
        assert_eq!(e.mysql_error_code(), 2000);
        assert_eq!(e.sql_state(), "HY000");
    }

    #[test]
    fn test_reportable() {
        assert!(!ServerError::Protocol("bad sequence".into()).is_reportable());
        assert!(ServerError::UnsupportedForward.is_reportable());
    }
}
