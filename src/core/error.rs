use std::io;
use thiserror::Error;

//=== Main error type ===//
#[derive(Error, Debug)]
pub enum MiniBitError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Block store error: {0}")]
    BlockStore(#[from] BlockStoreError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed")]
    ConnectionFailed,

    #[error("Connection timeout")]
    Timeout,

    #[error("Peer disconnected")]
    PeerDisconnected,

    #[error("Bind to {addr} failed")]
    BindFailed { addr: String },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Frame exceeds maximum length: {len} bytes")]
    FrameTooLarge { len: u32 },

    #[error("Malformed JSON message: {0}")]
    MalformedJson(String),

    #[error("First message on connection was not a handshake")]
    HandshakeExpected,

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Unknown message type: {message_type}")]
    UnknownMessageType { message_type: String },
}

#[derive(Error, Debug)]
pub enum BlockStoreError {
    #[error("Cannot reconstruct file: store is not complete")]
    IncompleteFile,

    #[error("Block id {id} is not part of this file")]
    UnknownBlock { id: String },
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Tracker at {addr} unreachable: {reason}")]
    Unreachable { addr: String, reason: String },

    #[error("Tracker returned a malformed response")]
    MalformedResponse,

    #[error("Tracker reported an error: {message}")]
    Rejected { message: String },
}

pub type Result<T> = std::result::Result<T, MiniBitError>;
