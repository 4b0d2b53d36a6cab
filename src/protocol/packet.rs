//! Low-level MySQL packet I/O and encoding utilities
//!
//! Handles reading/writing MySQL protocol packets and length-encoded values.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, ServerError};

use super::constants::MAX_PACKET_PAYLOAD;

/// Handles low-level packet I/O operations for the MySQL protocol.
///
/// Generic over the stream so the framer can be driven by an in-memory
/// duplex pipe in tests as well as a `TcpStream`.
pub struct PacketIO<S> {
    stream: S,
    sequence_id: u8,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PacketIO<S> {
    /// Create a new PacketIO instance
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence_id: 0,
        }
    }

    /// Get current sequence ID
    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    /// Reset sequence ID to 0 (start of a command cycle)
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    /// Read a packet from the client, validating the sequence number and
    /// reassembling split packets (a 0xFFFFFF payload is followed by a
    /// continuation until a shorter packet arrives).
    ///
    /// Returns the payload bytes.
    pub async fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = self.read_frame().await?;

        if payload.len() == MAX_PACKET_PAYLOAD {
            loop {
                let chunk = self.read_frame().await?;
                let done = chunk.len() < MAX_PACKET_PAYLOAD;
                payload.extend_from_slice(&chunk);
                if done {
                    break;
                }
            }
        }

        Ok(payload)
    }

    /// Read a single frame: 4-byte header, then exactly the declared payload
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header).await?;

        let payload_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;

        // The client must use the sequence we expect next; anything else means
        // the two sides have lost framing agreement.
        if header[3] != self.sequence_id {
            return Err(ServerError::Protocol(format!(
                "Unexpected sequence number: got {}, expected {}",
                header[3], self.sequence_id
            )));
        }
        self.sequence_id = self.sequence_id.wrapping_add(1);

        let mut payload = vec![0u8; payload_len];
        self.stream.read_exact(&mut payload).await?;

        Ok(payload)
    }

    /// Write a packet to the client
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() as u32;
        let header = [
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            ((len >> 16) & 0xFF) as u8,
            self.sequence_id,
        ];

        self.stream.write_all(&header).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;

        self.sequence_id = self.sequence_id.wrapping_add(1);
        Ok(())
    }
}

/// Length-encoded integer encoding/decoding utilities
pub struct LenencInt;

impl LenencInt {
    /// Write a length-encoded integer to a buffer
    pub fn write(buf: &mut Vec<u8>, val: u64) {
        if val < 251 {
            buf.push(val as u8);
        } else if val < 65536 {
            buf.push(0xFC);
            buf.extend_from_slice(&(val as u16).to_le_bytes());
        } else if val < 16777216 {
            buf.push(0xFD);
            buf.push((val & 0xFF) as u8);
            buf.push(((val >> 8) & 0xFF) as u8);
            buf.push(((val >> 16) & 0xFF) as u8);
        } else {
            buf.push(0xFE);
            buf.extend_from_slice(&val.to_le_bytes());
        }
    }

    /// Read a length-encoded integer, returning (value, bytes_read)
    pub fn read(data: &[u8]) -> Result<(u64, usize)> {
        if data.is_empty() {
            return Err(ServerError::Protocol("Empty lenenc int".into()));
        }

        let first = data[0];
        if first < 251 {
            Ok((first as u64, 1))
        } else if first == 0xFC {
            if data.len() < 3 {
                return Err(ServerError::Protocol("Truncated lenenc int".into()));
            }
            let val = u16::from_le_bytes([data[1], data[2]]) as u64;
            Ok((val, 3))
        } else if first == 0xFD {
            if data.len() < 4 {
                return Err(ServerError::Protocol("Truncated lenenc int".into()));
            }
            let val = u32::from_le_bytes([data[1], data[2], data[3], 0]) as u64;
            Ok((val, 4))
        } else if first == 0xFE {
            if data.len() < 9 {
                return Err(ServerError::Protocol("Truncated lenenc int".into()));
            }
            let val = u64::from_le_bytes([
                data[1], data[2], data[3], data[4], data[5], data[6], data[7], data[8],
            ]);
            Ok((val, 9))
        } else {
            Err(ServerError::Protocol(format!(
                "Invalid lenenc int prefix: {}",
                first
            )))
        }
    }
}

/// Length-encoded string utilities
pub struct LenencString;

impl LenencString {
    /// Write a length-encoded string to a buffer
    pub fn write(buf: &mut Vec<u8>, s: &str) {
        LenencInt::write(buf, s.len() as u64);
        buf.extend_from_slice(s.as_bytes());
    }

    /// Read a length-encoded string, returning (string, bytes_read)
    pub fn read(data: &[u8]) -> Result<(String, usize)> {
        let (len, bytes_read) = LenencInt::read(data)?;
        let start = bytes_read;
        let end = start + len as usize;

        if data.len() < end {
            return Err(ServerError::Protocol(
                "Declared string length exceeds payload".into(),
            ));
        }

        let s = String::from_utf8_lossy(&data[start..end]).to_string();
        Ok((s, end))
    }
}

/// Null-terminated C string reader for handshake fields
pub struct NulStr;

impl NulStr {
    /// Read a NUL-terminated string, returning (string, bytes_read including NUL)
    pub fn read(data: &[u8]) -> Result<(String, usize)> {
        let end = data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ServerError::Protocol("Unterminated string".into()))?;
        let s = String::from_utf8_lossy(&data[..end]).to_string();
        Ok((s, end + 1))
    }

    /// Write a string followed by a NUL terminator
    pub fn write(buf: &mut Vec<u8>, s: &str) {
        buf.extend_from_slice(s.as_bytes());
        buf.push(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenenc_int_small() {
        let mut buf = Vec::new();
        LenencInt::write(&mut buf, 42);
        assert_eq!(buf, vec![42]);

        let (val, len) = LenencInt::read(&buf).unwrap();
        assert_eq!(val, 42);
        assert_eq!(len, 1);
    }

    #[test]
    fn test_lenenc_int_medium() {
        let mut buf = Vec::new();
        LenencInt::write(&mut buf, 1000);
        assert_eq!(buf, vec![0xFC, 0xE8, 0x03]);

        let (val, len) = LenencInt::read(&buf).unwrap();
        assert_eq!(val, 1000);
        assert_eq!(len, 3);
    }

    #[test]
    fn test_lenenc_int_boundary_250() {
        let mut buf = Vec::new();
        LenencInt::write(&mut buf, 250);
        assert_eq!(buf, vec![250]);
    }

    #[test]
    fn test_lenenc_int_boundary_251() {
        let mut buf = Vec::new();
        LenencInt::write(&mut buf, 251);
        assert_eq!(buf, vec![0xFC, 0xFB, 0x00]);

        let (val, len) = LenencInt::read(&buf).unwrap();
        assert_eq!(val, 251);
        assert_eq!(len, 3);
    }

    #[test]
    fn test_lenenc_int_reference_encodings() {
        // Every encoding width, boundaries included
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (0xFA, 1),
            (0xFB, 3),
            (0xFFFF, 3),
            (0x10000, 4),
            (0xFFFFFF, 4),
            (0x1000000, 9),
            ((1u64 << 63) - 1, 9),
        ];

        for &(val, expected_len) in cases {
            let mut buf = Vec::new();
            LenencInt::write(&mut buf, val);
            assert_eq!(buf.len(), expected_len, "encoding width for {}", val);

            let (decoded, read) = LenencInt::read(&buf).unwrap();
            assert_eq!(decoded, val);
            assert_eq!(read, expected_len);
        }
    }

    #[test]
    fn test_lenenc_int_truncated() {
        let buf = vec![0xFC, 0x00]; // missing one byte
        assert!(LenencInt::read(&buf).is_err());
    }

    #[test]
    fn test_lenenc_string() {
        let mut buf = Vec::new();
        LenencString::write(&mut buf, "hello");
        assert_eq!(buf, vec![5, b'h', b'e', b'l', b'l', b'o']);

        let (s, len) = LenencString::read(&buf).unwrap();
        assert_eq!(s, "hello");
        assert_eq!(len, 6);
    }

    #[test]
    fn test_lenenc_string_empty() {
        let mut buf = Vec::new();
        LenencString::write(&mut buf, "");
        assert_eq!(buf, vec![0]);
    }

    #[test]
    fn test_lenenc_string_truncated() {
        let buf = vec![5, b'h', b'i']; // says 5 bytes but only has 2
        assert!(LenencString::read(&buf).is_err());
    }

    #[test]
    fn test_nul_str() {
        let (s, n) = NulStr::read(b"root\0rest").unwrap();
        assert_eq!(s, "root");
        assert_eq!(n, 5);

        assert!(NulStr::read(b"no terminator").is_err());
    }

    #[tokio::test]
    async fn test_packet_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = PacketIO::new(client);
        let mut reader = PacketIO::new(server);

        writer.write_packet(&[1, 2, 3]).await.unwrap();
        let payload = reader.read_packet().await.unwrap();
        assert_eq!(payload, vec![1, 2, 3]);
        assert_eq!(reader.sequence_id(), 1);
    }

    #[tokio::test]
    async fn test_packet_sequence_mismatch() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = PacketIO::new(client);
        let mut reader = PacketIO::new(server);

        // Writer at sequence 2 while the reader still expects 0
        writer.write_packet(&[0]).await.unwrap();
        writer.write_packet(&[0]).await.unwrap();
        let _ = reader.read_packet().await.unwrap();
        reader.reset_sequence();

        let err = reader.read_packet().await.unwrap_err();
        assert!(matches!(err, ServerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_packet_short_read() {
        let (client, server) = tokio::io::duplex(1024);
        let mut reader = PacketIO::new(server);

        // Header promises 10 bytes, stream delivers 3 then EOF
        {
            let mut raw = client;
            raw.write_all(&[10, 0, 0, 0, 1, 2, 3]).await.unwrap();
        }

        let err = reader.read_packet().await.unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));
    }

    #[tokio::test]
    async fn test_split_packet_reassembly() {
        let (client, server) = tokio::io::duplex(64 * 1024 * 1024);
        let mut reader = PacketIO::new(server);

        let original = vec![0xABu8; MAX_PACKET_PAYLOAD + 5];

        // Hand-frame the split: a full 0xFFFFFF chunk then the 5-byte tail
        let write_task = tokio::spawn(async move {
            let mut raw = client;
            let mut seq = 0u8;
            for chunk in original.chunks(MAX_PACKET_PAYLOAD) {
                let len = chunk.len() as u32;
                let header = [
                    (len & 0xFF) as u8,
                    ((len >> 8) & 0xFF) as u8,
                    ((len >> 16) & 0xFF) as u8,
                    seq,
                ];
                raw.write_all(&header).await.unwrap();
                raw.write_all(chunk).await.unwrap();
                seq = seq.wrapping_add(1);
            }
            original
        });

        let payload = reader.read_packet().await.unwrap();
        let original = write_task.await.unwrap();
        assert_eq!(payload, original);
        // Two frames consumed, so the next expected sequence is 2
        assert_eq!(reader.sequence_id(), 2);
    }

    #[tokio::test]
    async fn test_split_packet_exact_boundary() {
        // A payload of exactly 0xFFFFFF must be followed by an empty frame
        let (client, server) = tokio::io::duplex(64 * 1024 * 1024);
        let mut reader = PacketIO::new(server);

        let write_task = tokio::spawn(async move {
            let mut raw = client;
            raw.write_all(&[0xFF, 0xFF, 0xFF, 0]).await.unwrap();
            raw.write_all(&vec![7u8; MAX_PACKET_PAYLOAD]).await.unwrap();
            // zero-length continuation ends the sequence
            raw.write_all(&[0, 0, 0, 1]).await.unwrap();
        });

        let payload = reader.read_packet().await.unwrap();
        write_task.await.unwrap();
        assert_eq!(payload.len(), MAX_PACKET_PAYLOAD);
        assert!(payload.iter().all(|&b| b == 7));
    }
}
