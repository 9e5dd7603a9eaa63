use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("invalid magic number {0:#x}")]
    BadMagic(u32),

    #[error("service/method request ill-formed: {0}")]
    MalformedServiceMethod(String),

    #[error("can't find service: {0}")]
    UnknownService(String),

    #[error("can't find method: {0}")]
    UnknownMethod(String),

    /// An error produced by the invoked method (or reported by the server
    /// in the response header), carried verbatim.
    #[error("{0}")]
    Method(String),

    #[error("invalid service name: {0}")]
    InvalidServiceName(String),

    #[error("service already defined: {0}")]
    DuplicateService(String),

    #[error("connection timeout: expect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("call failed: deadline exceeded")]
    DeadlineExceeded,

    #[error("connection is closed")]
    Shutdown,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("frame too large: {0} bytes (max {1} bytes)")]
    FrameTooLarge(usize, usize),

    #[error("no available servers")]
    NoServers,

    #[error("registry error: {0}")]
    Registry(String),

    #[error("binary serialization error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// Whether this error is an end-of-stream condition rather than
    /// something worth logging as a failure.
    pub fn is_eof(&self) -> bool {
        matches!(self, RpcError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
