use thiserror::Error;

use crate::packet::DecodeError;

#[derive(Error, Debug)]
pub enum TftpError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TftpError>;
