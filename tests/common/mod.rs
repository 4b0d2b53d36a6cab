//! Minimal MySQL client for driving the server over real TCP in tests

#![allow(dead_code)]

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use myserver::driver::SqlDriver;
use myserver::protocol::constants::*;
use myserver::protocol::handshake::compute_auth_response;
use myserver::protocol::packet::LenencString;
use myserver::rules::Rule;
use myserver::{Config, Server};

/// Bind a server with the given rules and driver on an ephemeral port,
/// returning the address to connect to.
pub async fn spawn_server(rules: Vec<Rule>, driver: Arc<dyn SqlDriver>, dsn: &str) -> String {
    let mut config = Config::default();
    config.dsn = dsn.to_string();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let server = Arc::new(Server::with_driver(config, rules, driver).unwrap());
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });

    addr
}

/// One parsed server response
#[derive(Debug)]
pub enum Response {
    Ok {
        affected_rows: u64,
        last_insert_id: u64,
        status: u16,
        warnings: u16,
        message: String,
    },
    Err {
        code: u16,
        sqlstate: String,
        message: String,
    },
    ResultSet {
        column_names: Vec<String>,
        rows: Vec<Vec<Option<String>>>,
    },
    Eof,
}

pub struct MiniClient {
    stream: TcpStream,
    sequence: u8,
}

impl MiniClient {
    /// Connect and complete the handshake; the server's auth verdict is
    /// returned so tests can assert on rejections too.
    pub async fn connect(addr: &str, username: &str, password: &str) -> (MiniClient, Response) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let mut client = MiniClient {
            stream,
            sequence: 0,
        };

        // Greeting: extract the 8+12 scramble
        let greeting = client.read_packet().await;
        assert_eq!(greeting[0], 10, "protocol version");
        let banner_end = greeting[1..].iter().position(|&b| b == 0).unwrap();
        let mut pos = 1 + banner_end + 1 + 4; // banner NUL + thread id
        let mut scramble = [0u8; 20];
        scramble[0..8].copy_from_slice(&greeting[pos..pos + 8]);
        pos += 8 + 1 + 2 + 1 + 2 + 2 + 1 + 10; // filler, caps lo, charset, status, caps hi, len, reserved
        scramble[8..20].copy_from_slice(&greeting[pos..pos + 12]);

        // Client hello
        let caps: u32 = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_LONG_PASSWORD;
        let mut hello = Vec::new();
        hello.extend_from_slice(&caps.to_le_bytes());
        hello.extend_from_slice(&16777216u32.to_le_bytes());
        hello.push(CHARSET_UTF8_GENERAL_CI);
        hello.extend_from_slice(&[0u8; 23]);
        hello.extend_from_slice(username.as_bytes());
        hello.push(0);
        let auth = compute_auth_response(password, &scramble);
        hello.push(auth.len() as u8);
        hello.extend_from_slice(&auth);
        client.write_packet(&hello).await;

        let verdict = client.read_response().await;
        (client, verdict)
    }

    async fn read_packet(&mut self) -> Vec<u8> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        assert_eq!(
            header[3], self.sequence,
            "server sequence number out of order"
        );
        self.sequence = header[3].wrapping_add(1);

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();
        payload
    }

    async fn write_packet(&mut self, payload: &[u8]) {
        let len = payload.len() as u32;
        let header = [
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            ((len >> 16) & 0xFF) as u8,
            self.sequence,
        ];
        self.stream.write_all(&header).await.unwrap();
        self.stream.write_all(payload).await.unwrap();
        self.stream.flush().await.unwrap();
        self.sequence = self.sequence.wrapping_add(1);
    }

    /// Send a command packet; every command starts a fresh sequence
    pub async fn send_command(&mut self, tag: u8, payload: &[u8]) {
        self.sequence = 0;
        let mut packet = vec![tag];
        packet.extend_from_slice(payload);
        self.write_packet(&packet).await;
    }

    pub async fn query(&mut self, sql: &str) -> Response {
        self.send_command(COM_QUERY, sql.as_bytes()).await;
        self.read_response().await
    }

    pub async fn ping(&mut self) -> Response {
        self.send_command(COM_PING, &[]).await;
        self.read_response().await
    }

    pub async fn init_db(&mut self, db: &str) -> Response {
        self.send_command(COM_INIT_DB, db.as_bytes()).await;
        self.read_response().await
    }

    pub async fn quit(&mut self) {
        self.send_command(COM_QUIT, &[]).await;
    }

    /// The sequence number the next packet from the server must carry
    pub fn expected_sequence(&self) -> u8 {
        self.sequence
    }

    /// Assert the server has hung up on us
    pub async fn expect_closed(mut self) {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf).await {
            Ok(0) | Err(_) => {}
            Ok(_) => panic!("server still talking after close"),
        }
    }

    /// Read one terminal packet group
    pub async fn read_response(&mut self) -> Response {
        let first = self.read_packet().await;
        match first[0] {
            OK_PACKET => parse_ok(&first),
            ERR_PACKET => parse_err(&first),
            EOF_PACKET if first.len() < 9 => Response::Eof,
            _ => {
                // Result set: count packet already read; defs until EOF,
                // then rows until EOF
                let mut column_names = Vec::new();
                loop {
                    let pkt = self.read_packet().await;
                    if pkt[0] == EOF_PACKET && pkt.len() < 9 {
                        break;
                    }
                    column_names.push(column_name(&pkt));
                }

                let mut rows = Vec::new();
                loop {
                    let pkt = self.read_packet().await;
                    if pkt[0] == EOF_PACKET && pkt.len() < 9 {
                        break;
                    }
                    rows.push(parse_row(&pkt, column_names.len()));
                }

                Response::ResultSet { column_names, rows }
            }
        }
    }
}

fn parse_ok(pkt: &[u8]) -> Response {
    let (affected_rows, mut pos) = lenenc(&pkt[1..]);
    pos += 1;
    let (last_insert_id, read) = lenenc(&pkt[pos..]);
    pos += read;
    let status = u16::from_le_bytes([pkt[pos], pkt[pos + 1]]);
    let warnings = u16::from_le_bytes([pkt[pos + 2], pkt[pos + 3]]);
    let message = String::from_utf8_lossy(&pkt[pos + 4..]).to_string();
    Response::Ok {
        affected_rows,
        last_insert_id,
        status,
        warnings,
        message,
    }
}

fn parse_err(pkt: &[u8]) -> Response {
    let code = u16::from_le_bytes([pkt[1], pkt[2]]);
    assert_eq!(pkt[3], b'#');
    let sqlstate = String::from_utf8_lossy(&pkt[4..9]).to_string();
    let message = String::from_utf8_lossy(&pkt[9..]).to_string();
    Response::Err {
        code,
        sqlstate,
        message,
    }
}

fn lenenc(data: &[u8]) -> (u64, usize) {
    match data[0] {
        v if v < 251 => (v as u64, 1),
        0xFC => (u16::from_le_bytes([data[1], data[2]]) as u64, 3),
        0xFD => (u32::from_le_bytes([data[1], data[2], data[3], 0]) as u64, 4),
        _ => (
            u64::from_le_bytes([
                data[1], data[2], data[3], data[4], data[5], data[6], data[7], data[8],
            ]),
            9,
        ),
    }
}

/// Pull the column name (field 5) out of a column-definition packet
fn column_name(pkt: &[u8]) -> String {
    let mut pos = 0;
    for _ in 0..4 {
        let (_, read) = LenencString::read(&pkt[pos..]).unwrap();
        pos += read;
    }
    let (name, _) = LenencString::read(&pkt[pos..]).unwrap();
    name
}

fn parse_row(pkt: &[u8], columns: usize) -> Vec<Option<String>> {
    let mut row = Vec::with_capacity(columns);
    let mut pos = 0;
    while pos < pkt.len() {
        if pkt[pos] == NULL_FIELD {
            row.push(None);
            pos += 1;
        } else {
            let (value, read) = LenencString::read(&pkt[pos..]).unwrap();
            row.push(Some(value));
            pos += read;
        }
    }
    row
}
