//! MySQL protocol constants

#![allow(dead_code)]

// Capability flags
pub const CLIENT_LONG_PASSWORD: u32 = 1;
pub const CLIENT_FOUND_ROWS: u32 = 2;
pub const CLIENT_LONG_FLAG: u32 = 4;
pub const CLIENT_CONNECT_WITH_DB: u32 = 8;
pub const CLIENT_NO_SCHEMA: u32 = 16;
pub const CLIENT_PROTOCOL_41: u32 = 512;
pub const CLIENT_TRANSACTIONS: u32 = 8192;
pub const CLIENT_SECURE_CONNECTION: u32 = 32768;
pub const CLIENT_DEPRECATE_EOF: u32 = 0x01000000;

/// Capabilities this server advertises in its greeting
pub const SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_PROTOCOL_41
    | CLIENT_SECURE_CONNECTION;

// Command bytes
pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_FIELD_LIST: u8 = 0x04;
pub const COM_PING: u8 = 0x0E;

// Response types
pub const OK_PACKET: u8 = 0x00;
pub const EOF_PACKET: u8 = 0xFE;
pub const ERR_PACKET: u8 = 0xFF;

/// NULL marker inside a text-protocol row
pub const NULL_FIELD: u8 = 0xFB;

// Column types for result sets
pub const MYSQL_TYPE_DECIMAL: u8 = 0x00;
pub const MYSQL_TYPE_TINY: u8 = 0x01;
pub const MYSQL_TYPE_SHORT: u8 = 0x02;
pub const MYSQL_TYPE_LONG: u8 = 0x03;
pub const MYSQL_TYPE_FLOAT: u8 = 0x04;
pub const MYSQL_TYPE_DOUBLE: u8 = 0x05;
pub const MYSQL_TYPE_NULL: u8 = 0x06;
pub const MYSQL_TYPE_TIMESTAMP: u8 = 0x07;
pub const MYSQL_TYPE_LONGLONG: u8 = 0x08;
pub const MYSQL_TYPE_INT24: u8 = 0x09;
pub const MYSQL_TYPE_VARCHAR: u8 = 0x0F;
pub const MYSQL_TYPE_BLOB: u8 = 0xFC;
pub const MYSQL_TYPE_VAR_STRING: u8 = 0xFD;
pub const MYSQL_TYPE_STRING: u8 = 0xFE;

// Column flags
pub const NOT_NULL_FLAG: u16 = 0x0001;
pub const PRI_KEY_FLAG: u16 = 0x0002;
pub const UNSIGNED_FLAG: u16 = 0x0020;
pub const BINARY_FLAG: u16 = 0x0080;
pub const NUM_FLAG: u16 = 0x8000;

/// utf8_general_ci, the default character set for handshake and columns
pub const CHARSET_UTF8_GENERAL_CI: u8 = 33;

/// Protocol version for the initial handshake
pub const PROTOCOL_VERSION: u8 = 10;

/// Server version banner (clients expect a trailing NUL on the wire)
pub const SERVER_VERSION: &str = "5.7.0-myserver";

/// Server status flags
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;

/// Maximum payload of a single packet; longer payloads are split
pub const MAX_PACKET_PAYLOAD: usize = 0xFF_FFFF;
