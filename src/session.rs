//! Per-connection state
//!
//! Each accepted socket gets its own `Session`: the authenticated user, the
//! requested database, the active upstream handle and a named-variable bag
//! that rule hooks may read and write. Nothing here is shared between
//! connections.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::driver::{SqlDriver, SqlHandle};
use crate::error::{Result, ServerError};

/// Connection-scoped state, dropped at disconnect
pub struct Session {
    pub username: String,
    pub database: Option<String>,
    pub peer_host: String,
    /// Set once a terminal response has gone out for the current command
    pub data_sent: bool,
    vars: HashMap<String, String>,
    handle: Option<Box<dyn SqlHandle>>,
    driver: Arc<dyn SqlDriver>,
}

impl Session {
    pub fn new(driver: Arc<dyn SqlDriver>, peer_host: impl Into<String>) -> Self {
        let peer_host = peer_host.into();
        let mut vars = HashMap::new();
        vars.insert("host".to_string(), peer_host.clone());

        Self {
            username: String::new(),
            database: None,
            peer_host,
            data_sent: false,
            vars,
            handle: None,
            driver,
        }
    }

    /// Seed the variable bag with the startup DSN fields
    pub fn seed_dsn_vars(&mut self, pairs: &[(&str, &str)]) {
        for (name, value) in pairs {
            if !value.is_empty() {
                self.vars.insert(name.to_string(), value.to_string());
            }
        }
    }

    /// Adopt an already-open upstream handle (the per-connection clone of the
    /// server's default handle)
    pub fn set_handle(&mut self, handle: Box<dyn SqlHandle>) {
        self.handle = Some(handle);
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    /// The active upstream handle, if any
    pub fn handle_mut(&mut self) -> Option<&mut Box<dyn SqlHandle>> {
        self.handle.as_mut()
    }

    /// Read a variable from the bag
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    /// Write a variable into the bag.
    ///
    /// Setting `dsn` is contractual: it reconnects through the driver and
    /// swaps the connection's active handle.
    pub fn set_var(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        self.vars.insert(name.to_string(), value.clone());

        if name == "dsn" {
            let user = self.vars.get("dsn_user").cloned().unwrap_or_default();
            let password = self.vars.get("dsn_password").cloned().unwrap_or_default();
            self.connect(&value, &user, &password)?;
        }

        Ok(())
    }

    /// Open a new upstream connection and make it the active handle
    pub fn connect(&mut self, dsn: &str, user: &str, password: &str) -> Result<()> {
        debug!("Connecting to upstream dsn {}", dsn);
        let handle = self.driver.open(dsn, user, password).map_err(ServerError::from)?;
        self.handle = Some(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemoryDriver;

    fn session() -> Session {
        Session::new(Arc::new(MemoryDriver::new()), "127.0.0.1")
    }

    #[test]
    fn test_vars_seeded_with_host() {
        let s = session();
        assert_eq!(s.get_var("host"), Some("127.0.0.1"));
    }

    #[test]
    fn test_seed_skips_empty_values() {
        let mut s = session();
        s.seed_dsn_vars(&[("dsn", "memory:main"), ("dsn_user", "")]);
        assert_eq!(s.get_var("dsn"), Some("memory:main"));
        assert_eq!(s.get_var("dsn_user"), None);
    }

    #[test]
    fn test_set_dsn_var_reconnects() {
        let mut s = session();
        assert!(!s.has_handle());

        s.set_var("dsn", "memory:main").unwrap();
        assert!(s.has_handle());
        assert_eq!(s.get_var("dsn"), Some("memory:main"));
    }

    #[test]
    fn test_set_dsn_var_failure_propagates() {
        let mut s = session();
        let err = s.set_var("dsn", "mysql://elsewhere").unwrap_err();
        assert!(matches!(err, ServerError::Driver { .. }));
    }

    #[test]
    fn test_plain_var_does_not_touch_handle() {
        let mut s = session();
        s.set_var("greeting", "hello").unwrap();
        assert_eq!(s.get_var("greeting"), Some("hello"));
        assert!(!s.has_handle());
    }
}
