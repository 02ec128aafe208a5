use chord_lib::messages::CodecError;
use chord_lib::{Identifier, RingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to {0}")]
    Unreachable(String),
    #[error("timed out talking to {address}")]
    Timeout { address: String },
    #[error("i/o error talking to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node {0} is not in the directory")]
    InvalidTarget(Identifier),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error("invalid configuration: {0}")]
    Config(String),
}
