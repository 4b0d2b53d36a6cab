use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{error, info};
use tokio::net::TcpListener;

pub mod driver;
pub mod error;
pub mod protocol;
pub mod rules;
pub mod session;

use crate::driver::{MemoryDriver, SqlDriver, SqlHandle};
use crate::error::{Result, ServerError};
use crate::protocol::handshake::{AuthPolicy, PasswordIsUsername};
use crate::protocol::ConnectionHandler;
use crate::rules::{Dispatcher, Rule};
use crate::session::Session;

/// Server configuration
#[derive(Clone)]
pub struct Config {
    /// Interface to bind; 0.0.0.0 binds all
    pub interface: String,
    /// Port to listen on
    pub port: u16,
    /// Default upstream DSN, connected at startup and cloned per connection
    pub dsn: String,
    pub dsn_user: String,
    pub dsn_password: String,
    /// Remote upstream DSN, seeded into each connection's variable bag
    pub remote_dsn: String,
    pub remote_dsn_user: String,
    pub remote_dsn_password: String,
    /// Verbose logging
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1".to_string(),
            port: 23306,
            dsn: String::new(),
            dsn_user: String::new(),
            dsn_password: String::new(),
            remote_dsn: String::new(),
            remote_dsn_user: String::new(),
            remote_dsn_password: String::new(),
            debug: false,
        }
    }
}

/// The protocol server: accepts connections and spawns one worker per client
pub struct Server {
    config: Config,
    rules: Arc<Vec<Rule>>,
    driver: Arc<dyn SqlDriver>,
    policy: Arc<dyn AuthPolicy>,
    default_handle: Option<Box<dyn SqlHandle>>,
    connection_counter: AtomicU32,
}

impl Server {
    /// Create a new server with the given configuration and rule list,
    /// backed by the built-in memory driver.
    pub fn new(config: Config, rules: Vec<Rule>) -> Result<Self> {
        Self::with_driver(config, rules, Arc::new(MemoryDriver::new()))
    }

    /// Create a new server forwarding through the given driver
    pub fn with_driver(
        config: Config,
        rules: Vec<Rule>,
        driver: Arc<dyn SqlDriver>,
    ) -> Result<Self> {
        // The default handle is opened once; each accepted connection gets
        // an independent clone.
        let default_handle = if config.dsn.is_empty() {
            None
        } else {
            Some(
                driver
                    .open(&config.dsn, &config.dsn_user, &config.dsn_password)
                    .map_err(ServerError::from)?,
            )
        };

        Ok(Self {
            config,
            rules: Arc::new(rules),
            driver,
            policy: Arc::new(PasswordIsUsername),
            default_handle,
            connection_counter: AtomicU32::new(1),
        })
    }

    /// Replace the authentication policy
    pub fn with_policy(mut self, policy: Arc<dyn AuthPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Bind the configured interface and accept connections forever
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.interface, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    info!("New connection from {}", addr);
                    // Small protocol packets suffer badly under Nagle
                    if let Err(e) = stream.set_nodelay(true) {
                        error!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                    }

                    let thread_id = self.connection_counter.fetch_add(1, Ordering::SeqCst);
                    let session = self.new_session(addr.ip().to_string());
                    let dispatcher = Dispatcher::new(Arc::clone(&self.rules));
                    let policy = Arc::clone(&self.policy);

                    tokio::spawn(async move {
                        let handler =
                            ConnectionHandler::new(stream, thread_id, dispatcher, session, policy);
                        if let Err(e) = handler.run().await {
                            error!("Connection error from {}: {}", addr, e);
                        }
                        info!("Connection closed: {}", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Build the per-connection session: fresh variable bag seeded with the
    /// startup DSN fields, plus a clone of the default handle.
    fn new_session(&self, peer_host: String) -> Session {
        let mut session = Session::new(Arc::clone(&self.driver), peer_host);
        session.seed_dsn_vars(&[
            ("dsn", &self.config.dsn),
            ("dsn_user", &self.config.dsn_user),
            ("dsn_password", &self.config.dsn_password),
            ("remote_dsn", &self.config.remote_dsn),
            ("remote_dsn_user", &self.config.remote_dsn_user),
            ("remote_dsn_password", &self.config.remote_dsn_password),
        ]);

        if let Some(handle) = &self.default_handle {
            match handle.try_clone() {
                Ok(clone) => session.set_handle(clone),
                Err(e) => error!("Failed to clone default handle: {}", e),
            }
        }

        session
    }
}
