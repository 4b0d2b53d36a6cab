//! Response packet building: OK / EOF / ERR, column definitions and rows

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, ServerError};

use super::constants::*;
use super::packet::{LenencInt, LenencString, PacketIO};

/// A column definition for a text-protocol result set.
///
/// Every field is length-encoded on the wire; result-set definitions carry
/// no default value.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub charset: u16,
    pub length: u32,
    pub type_code: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDef {
    /// A default string column with the given name
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            catalog: "def".to_string(),
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            org_name: name.clone(),
            name,
            charset: CHARSET_UTF8_GENERAL_CI as u16,
            length: 255,
            type_code: MYSQL_TYPE_STRING,
            flags: 0,
            decimals: 0,
        }
    }
}

/// A text-protocol row: one rendered value per column, None for NULL
pub type Row = Vec<Option<String>>;

/// Builds and sends response packets for one connection
pub struct ResponseSender {
    client_capabilities: u32,
}

impl ResponseSender {
    pub fn new(client_capabilities: u32) -> Self {
        Self {
            client_capabilities,
        }
    }

    pub fn client_capabilities(&self) -> u32 {
        self.client_capabilities
    }

    /// Send an OK packet
    pub async fn send_ok<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        affected_rows: u64,
        last_insert_id: u64,
        warnings: u16,
        message: &str,
    ) -> Result<()> {
        let mut packet = Vec::new();

        packet.push(OK_PACKET);
        LenencInt::write(&mut packet, affected_rows);
        LenencInt::write(&mut packet, last_insert_id);

        if self.client_capabilities & CLIENT_PROTOCOL_41 != 0 {
            packet.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
            packet.extend_from_slice(&warnings.to_le_bytes());
        }

        if !message.is_empty() {
            packet.extend_from_slice(message.as_bytes());
        }

        io.write_packet(&packet).await
    }

    /// Send an EOF packet
    pub async fn send_eof<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
    ) -> Result<()> {
        let mut packet = Vec::new();
        packet.push(EOF_PACKET);

        if self.client_capabilities & CLIENT_PROTOCOL_41 != 0 {
            // Warnings, then status flags
            packet.extend_from_slice(&0u16.to_le_bytes());
            packet.extend_from_slice(&SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
        }

        io.write_packet(&packet).await
    }

    /// Send an ERR packet with an explicit code / SQLSTATE / message triple
    pub async fn send_err<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        code: u16,
        sqlstate: &str,
        message: &str,
    ) -> Result<()> {
        let mut packet = Vec::new();

        packet.push(ERR_PACKET);
        packet.extend_from_slice(&code.to_le_bytes());

        if self.client_capabilities & CLIENT_PROTOCOL_41 != 0 {
            packet.push(b'#');
            // SQLSTATE is always exactly 5 bytes on the wire
            let mut state = [b'0'; 5];
            for (i, b) in sqlstate.bytes().take(5).enumerate() {
                state[i] = b;
            }
            packet.extend_from_slice(&state);
        }

        packet.extend_from_slice(message.as_bytes());

        io.write_packet(&packet).await
    }

    /// Send the ERR packet corresponding to a server error
    pub async fn send_err_for<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        error: &ServerError,
    ) -> Result<()> {
        self.send_err(
            io,
            error.mysql_error_code(),
            error.sql_state(),
            &error.to_string(),
        )
        .await
    }

    /// Send a complete text-protocol result set:
    /// column count, definitions, EOF, rows, EOF.
    pub async fn send_result_set<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> Result<()> {
        let mut packet = Vec::new();
        LenencInt::write(&mut packet, columns.len() as u64);
        io.write_packet(&packet).await?;

        for col in columns {
            self.send_column_definition(io, col).await?;
        }
        self.send_eof(io).await?;

        for row in rows {
            self.send_row(io, row).await?;
        }
        self.send_eof(io).await
    }

    /// Send bare column definitions terminated by EOF (COM_FIELD_LIST reply)
    pub async fn send_field_list<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        columns: &[ColumnDef],
    ) -> Result<()> {
        for col in columns {
            self.send_column_definition(io, col).await?;
        }
        self.send_eof(io).await
    }

    /// Send a single column definition packet
    async fn send_column_definition<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        col: &ColumnDef,
    ) -> Result<()> {
        let mut packet = Vec::new();

        LenencString::write(&mut packet, &col.catalog);
        LenencString::write(&mut packet, &col.schema);
        LenencString::write(&mut packet, &col.table);
        LenencString::write(&mut packet, &col.org_table);
        LenencString::write(&mut packet, &col.name);
        LenencString::write(&mut packet, &col.org_name);

        // Fixed-length fields marker
        packet.push(0x0C);

        packet.extend_from_slice(&col.charset.to_le_bytes());
        packet.extend_from_slice(&col.length.to_le_bytes());
        packet.push(col.type_code);
        packet.extend_from_slice(&col.flags.to_le_bytes());
        packet.push(col.decimals);

        // Filler
        packet.extend_from_slice(&0u16.to_le_bytes());

        io.write_packet(&packet).await
    }

    /// Send a row packet (text protocol, 0xFB for NULL)
    async fn send_row<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        io: &mut PacketIO<S>,
        row: &Row,
    ) -> Result<()> {
        let mut packet = Vec::new();

        for value in row {
            match value {
                Some(s) => LenencString::write(&mut packet, s),
                None => packet.push(NULL_FIELD),
            }
        }

        io.write_packet(&packet).await
    }
}
