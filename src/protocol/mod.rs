//! Wire protocol: a serde-tagged JSON `Message` carried over a 4-byte
//! big-endian length prefix, used identically for peer-to-peer and
//! peer-to-tracker connections.

use crate::core::{MiniBitError, ProtocolError};
use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames above this size are rejected as a protocol violation rather than
/// buffered indefinitely.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "handshake")]
    Handshake { peer_id: String },
    #[serde(rename = "have")]
    Have { blocks: Vec<String> },
    #[serde(rename = "request_block")]
    RequestBlock { block_id: String },
    #[serde(rename = "block_data")]
    BlockData { block_id: String, data: String },
    #[serde(rename = "choke")]
    Choke,
    #[serde(rename = "unchoke")]
    Unchoke,
}

impl Message {
    pub fn block_data(block_id: impl Into<String>, bytes: &[u8]) -> Self {
        Message::BlockData {
            block_id: block_id.into(),
            data: hex::encode(bytes),
        }
    }

    pub fn decode_block_data(&self) -> Option<(String, Vec<u8>)> {
        match self {
            Message::BlockData { block_id, data } => {
                hex::decode(data).ok().map(|bytes| (block_id.clone(), bytes))
            }
            _ => None,
        }
    }

    /// Serializes to a length-prefixed frame ready to write to a socket.
    pub fn encode(&self) -> Result<Vec<u8>, MiniBitError> {
        let body = serde_json::to_vec(self)?;
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
        framed.extend_from_slice(&body);
        Ok(framed)
    }
}

/// Writes one framed JSON message to `writer`.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), MiniBitError> {
    let framed = message.encode()?;
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Length-prefixes and writes any serializable value. Used by the tracker
/// RPC layer, which speaks the same framing as the peer protocol but a
/// different payload schema.
pub async fn write_json<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
) -> Result<(), MiniBitError> {
    let body = serde_json::to_vec(value)?;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_be_bytes());
    framed.extend_from_slice(&body);
    writer.write_all(&framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Accumulates bytes read from a connection and yields complete framed
/// messages one at a time, mirroring the read-then-try-parse loop used for
/// every connection in this crate (peer-to-peer and peer-to-tracker alike).
pub struct FrameReader {
    buffer: BytesMut,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    fn try_take_frame(&mut self) -> Result<Option<Vec<u8>>, MiniBitError> {
        if self.buffer.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge { len }.into());
        }
        let total = 4 + len as usize;
        if self.buffer.len() < total {
            return Ok(None);
        }
        let body = self.buffer[4..total].to_vec();
        self.buffer.advance(total);
        Ok(Some(body))
    }

    async fn read_frame<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<Vec<u8>, MiniBitError> {
        loop {
            if let Some(body) = self.try_take_frame()? {
                return Ok(body);
            }
            let mut chunk = [0u8; 4096];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )
                .into());
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads exactly one message from `reader`, blocking on socket reads as
    /// needed. Returns `Err` on EOF mid-frame or malformed input; the
    /// caller is expected to close the connection on any error.
    pub async fn read_message<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Message, MiniBitError> {
        let body = self.read_frame(reader).await?;
        serde_json::from_slice(&body).map_err(|e| ProtocolError::MalformedJson(e.to_string()).into())
    }

    /// Reads one length-prefixed JSON frame and decodes it as `T`. Used by
    /// the tracker RPC layer for its own request/response schema.
    pub async fn read_json<R: AsyncRead + Unpin, T: DeserializeOwned>(
        &mut self,
        reader: &mut R,
    ) -> Result<T, MiniBitError> {
        let body = self.read_frame(reader).await?;
        serde_json::from_slice(&body).map_err(|e| ProtocolError::MalformedJson(e.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_round_trips_through_json() {
        let msg = Message::Handshake {
            peer_id: "Peer-abc123".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"handshake\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn block_data_hex_encodes_payload() {
        let msg = Message::block_data("file_0", &[0xde, 0xad, 0xbe, 0xef]);
        match &msg {
            Message::BlockData { data, .. } => assert_eq!(data, "deadbeef"),
            _ => panic!("wrong variant"),
        }
        let (id, bytes) = msg.decode_block_data().unwrap();
        assert_eq!(id, "file_0");
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[tokio::test]
    async fn encode_then_read_message_round_trips() {
        let msg = Message::Have {
            blocks: vec!["file_0".into(), "file_1".into()],
        };
        let framed = msg.encode().unwrap();
        let mut cursor = std::io::Cursor::new(framed);
        let mut reader = FrameReader::new();
        let decoded = reader.read_message(&mut cursor).await.unwrap();
        assert_eq!(msg, decoded);
    }

    #[tokio::test]
    async fn read_message_errors_on_eof_mid_frame() {
        let mut cursor = std::io::Cursor::new(vec![0u8, 0, 0, 10, b'{']);
        let mut reader = FrameReader::new();
        let err = reader.read_message(&mut cursor).await;
        assert!(err.is_err());
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"bogus"}"#;
        let result: Result<Message, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
