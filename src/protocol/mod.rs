//! MySQL server-side protocol engine
//!
//! Implements the server half of the MySQL client/server protocol so that
//! unmodified MySQL clients can connect.
//!
//! ## Protocol Overview
//!
//! 1. **Handshake**: server sends greeting → client responds with auth →
//!    server confirms
//! 2. **Command phase**: client sends commands → server responds with OK,
//!    ERR or a result set
//!
//! ## Packet Format
//! ```text
//! +-------------------+------------------+------------------------------+
//! | 3 bytes           | 1 byte           | N bytes                      |
//! | Payload Length    | Sequence ID      | Payload                      |
//! +-------------------+------------------+------------------------------+
//! ```
//!
//! ## Architecture
//!
//! - `constants`: MySQL protocol constants
//! - `packet`: low-level packet I/O and length-encoded values
//! - `handshake`: greeting, client response, native-password auth
//! - `commands`: command packet decoding
//! - `resultset`: OK/EOF/ERR and result-set emission

use std::io;
use std::sync::Arc;

use log::{debug, info};
use tokio::net::TcpStream;

use crate::error::{Result, ServerError};
use crate::rules::Dispatcher;
use crate::session::Session;

pub mod commands;
pub mod constants;
pub mod handshake;
pub mod packet;
pub mod resultset;

use commands::Command;
use constants::*;
use handshake::{AuthPolicy, HandshakeHandler};
use packet::PacketIO;
use resultset::ResponseSender;

/// Handles a single client connection
pub struct ConnectionHandler {
    io: PacketIO<TcpStream>,
    session: Session,
    dispatcher: Dispatcher,
    policy: Arc<dyn AuthPolicy>,
    sender: ResponseSender,
    thread_id: u32,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(
        stream: TcpStream,
        thread_id: u32,
        dispatcher: Dispatcher,
        session: Session,
        policy: Arc<dyn AuthPolicy>,
    ) -> Self {
        Self {
            io: PacketIO::new(stream),
            session,
            dispatcher,
            policy,
            // Replaced with the client's actual capabilities after handshake
            sender: ResponseSender::new(CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION),
            thread_id,
        }
    }

    /// Run the connection: handshake, then the command loop
    pub async fn run(mut self) -> Result<()> {
        let capabilities = self.do_handshake().await?;
        self.sender = ResponseSender::new(capabilities);

        loop {
            if !self.handle_command().await? {
                return Ok(());
            }
        }
    }

    /// Perform the handshake and authentication exchange.
    /// Returns the client capabilities on success.
    async fn do_handshake(&mut self) -> Result<u32> {
        let handshake = HandshakeHandler::new(self.thread_id);

        handshake.send_greeting(&mut self.io).await?;

        let response = self.io.read_packet().await?;
        let hello = handshake.parse_response(&response)?;

        self.session.username = hello.username.clone();
        self.session.database = hello.database.clone();

        if let Err(e) = handshake.authenticate(&*self.policy, &hello) {
            self.sender.send_err_for(&mut self.io, &e).await?;
            return Err(e);
        }

        let sender = ResponseSender::new(hello.capabilities);
        sender.send_ok(&mut self.io, 0, 0, 0, "").await?;

        info!("Client '{}' authenticated", hello.username);
        Ok(hello.capabilities)
    }

    /// Handle a single command from the client.
    /// Returns Ok(true) to continue, Ok(false) to close the connection.
    async fn handle_command(&mut self) -> Result<bool> {
        // Each command cycle starts a fresh sequence
        self.io.reset_sequence();

        let packet = match self.io.read_packet().await {
            Ok(p) => p,
            Err(ServerError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if packet.is_empty() {
            return Ok(false);
        }

        let command = Command::parse(&packet)?;
        debug!("Command 0x{:02X}: {}", command.tag(), command.text());

        match &command {
            Command::Quit => {
                info!("Client '{}' sent QUIT", self.session.username);
                return Ok(false);
            }
            Command::Ping => {
                self.sender.send_ok(&mut self.io, 0, 0, 0, "").await?;
            }
            Command::InitDb(db) => {
                self.session.database = Some(db.clone());
                self.dispatcher
                    .dispatch(&mut self.io, &self.sender, &mut self.session, &command)
                    .await?;
            }
            _ => {
                self.dispatcher
                    .dispatch(&mut self.io, &self.sender, &mut self.session, &command)
                    .await?;
            }
        }

        Ok(true)
    }
}
