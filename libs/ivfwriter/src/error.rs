use std::io;

use crate::codec::CodecKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No destination to write to: it could not be opened, or it was already released.
    #[error("sink unavailable")]
    SinkUnavailable(#[source] Option<io::Error>),
    /// Malformed RTP payload for the bound codec. The session stays usable.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("codec already bound to {bound}, cannot bind {requested}")]
    CodecAlreadyBound {
        bound: CodecKind,
        requested: CodecKind,
    },
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    /// The sink failed while writing. Terminal for the session.
    #[error("sink write error: {0}")]
    SinkWrite(#[from] io::Error),
    /// No timestamp span to derive a framerate from.
    #[error("framerate undefined: no elapsed timestamp span")]
    RateUndefined,
}

impl Error {
    pub fn invalid_payload<T>(t: T) -> Self
    where
        T: ToString,
    {
        Error::InvalidPayload(t.to_string())
    }

    pub fn unsupported_codec<T>(t: T) -> Self
    where
        T: ToString,
    {
        Error::UnsupportedCodec(t.to_string())
    }
}
