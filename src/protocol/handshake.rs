//! MySQL authentication and handshake handling

use rand::Rng;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, ServerError};

use super::constants::*;
use super::packet::{NulStr, PacketIO};

/// Pluggable credential check.
///
/// Receives the username, the connection's scramble and the 20-byte client
/// response, and decides whether the connection is allowed in.
pub trait AuthPolicy: Send + Sync {
    fn authenticate(&self, username: &str, scramble: &[u8; 20], client_response: &[u8]) -> bool;
}

/// Default policy: the clear password is expected to equal the username.
pub struct PasswordIsUsername;

impl AuthPolicy for PasswordIsUsername {
    fn authenticate(&self, username: &str, scramble: &[u8; 20], client_response: &[u8]) -> bool {
        let expected = compute_auth_response(username, scramble);
        constant_time_eq(client_response, &expected)
    }
}

/// Parsed client handshake response
#[derive(Debug)]
pub struct ClientHello {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
}

/// Handles the MySQL handshake for one connection
pub struct HandshakeHandler {
    scramble: [u8; 20],
    thread_id: u32,
}

impl HandshakeHandler {
    /// Create a new handshake handler with a random scramble
    pub fn new(thread_id: u32) -> Self {
        let mut scramble = [0u8; 20];
        rand::thread_rng().fill(&mut scramble);
        Self {
            scramble,
            thread_id,
        }
    }

    /// Return a copy of the scramble bytes used in the greeting
    pub fn scramble(&self) -> [u8; 20] {
        self.scramble
    }

    /// Send the initial handshake packet (protocol version 10)
    pub async fn send_greeting<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
    ) -> Result<()> {
        let mut packet = Vec::new();

        // Protocol version
        packet.push(PROTOCOL_VERSION);

        // Server version (null-terminated)
        NulStr::write(&mut packet, SERVER_VERSION);

        // Thread ID (4 bytes, little-endian)
        packet.extend_from_slice(&self.thread_id.to_le_bytes());

        // Scramble part 1 (8 bytes)
        packet.extend_from_slice(&self.scramble[0..8]);

        // Filler
        packet.push(0);

        // Capability flags (lower 2 bytes)
        packet.extend_from_slice(&(SERVER_CAPABILITIES as u16).to_le_bytes());

        // Character set (utf8_general_ci)
        packet.push(CHARSET_UTF8_GENERAL_CI);

        // Status flags (2 bytes)
        packet.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());

        // Capability flags (upper 2 bytes)
        packet.extend_from_slice(&((SERVER_CAPABILITIES >> 16) as u16).to_le_bytes());

        // Length of scramble (1 byte)
        packet.push(0x15);

        // Reserved (10 bytes of zeros)
        packet.extend_from_slice(&[0u8; 10]);

        // Scramble part 2 (12 bytes + 1 null terminator)
        packet.extend_from_slice(&self.scramble[8..20]);
        packet.push(0);

        io.reset_sequence();
        io.write_packet(&packet).await?;

        Ok(())
    }

    /// Parse the client's handshake response
    pub fn parse_response(&self, data: &[u8]) -> Result<ClientHello> {
        if data.len() < 32 {
            return Err(ServerError::Protocol("Handshake response too short".into()));
        }

        let mut pos = 0;

        // Client capabilities (4 bytes)
        let capabilities = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        pos += 4;

        // Max packet size (4 bytes)
        let max_packet_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        pos += 4;

        // Character set (1 byte)
        let charset = data[pos];
        pos += 1;

        // Reserved (23 bytes)
        pos += 23;

        // Username (null-terminated)
        let (username, read) = NulStr::read(&data[pos..])?;
        pos += read;

        // Password hash: 1-byte length prefix, then that many bytes
        if pos >= data.len() {
            return Err(ServerError::Protocol("Truncated auth response".into()));
        }
        let auth_len = data[pos] as usize;
        pos += 1;
        if pos + auth_len > data.len() {
            return Err(ServerError::Protocol("Truncated auth response".into()));
        }
        let auth_response = data[pos..pos + auth_len].to_vec();
        pos += auth_len;

        // Database name, present only when the client asked to connect with one
        let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 && pos < data.len() {
            let (db, _) = NulStr::read(&data[pos..])?;
            Some(db).filter(|d| !d.is_empty())
        } else {
            None
        };

        Ok(ClientHello {
            capabilities,
            max_packet_size,
            charset,
            username,
            auth_response,
            database,
        })
    }

    /// Run the credential check against the given policy
    pub fn authenticate(&self, policy: &dyn AuthPolicy, hello: &ClientHello) -> Result<()> {
        if policy.authenticate(&hello.username, &self.scramble, &hello.auth_response) {
            Ok(())
        } else {
            Err(ServerError::Auth(format!(
                "Access denied for user '{}'",
                hello.username
            )))
        }
    }
}

/// Compute the expected auth response for mysql_native_password:
/// SHA1(password) XOR SHA1(scramble + SHA1(SHA1(password)))
pub fn compute_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    // SHA1(password)
    let mut hasher = Sha1::new();
    hasher.update(password.as_bytes());
    let stage1 = hasher.finalize();

    // SHA1(SHA1(password))
    let mut hasher = Sha1::new();
    hasher.update(stage1);
    let stage2 = hasher.finalize();

    // SHA1(scramble + SHA1(SHA1(password)))
    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let stage3 = hasher.finalize();

    // XOR SHA1(password) with result
    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Compare two byte slices without short-circuiting on the first difference
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
