//! Wire types of the epochnet peer protocol and the errors raised while
//! handling them

use std::fmt;

use epochnet_codec::decode;

mod common;

pub mod block;
pub mod handshake;
pub mod message;
pub mod peers;

pub use block::*;
pub use common::*;
pub use handshake::Version;
pub use message::*;
pub use peers::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Handshake,
    Fetch,
    Liveness,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TimeoutKind::Handshake => "handshake",
            TimeoutKind::Fetch => "fetch",
            TimeoutKind::Liveness => "liveness",
        };

        f.write_str(text)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("missing required field {table}.{field}")]
    MissingRequiredField {
        table: &'static str,
        field: &'static str,
    },

    #[error("unknown variant {tag} for {union}")]
    UnknownVariant { union: &'static str, tag: u8 },

    #[error("wrong network, expected magic {expected:#06x} but got {actual:#06x}")]
    WrongNetwork { expected: Magic, actual: Magic },

    #[error("resource limit exceeded: {0}")]
    ResourceLimitExceeded(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("{0} timeout")]
    Timeout(TimeoutKind),

    #[error("peer misbehaving: {0}")]
    PeerMisbehavior(String),
}

impl Error {
    pub fn violation(msg: impl fmt::Display) -> Self {
        Self::ProtocolViolation(msg.to_string())
    }

    /// Whether the error counts against the reputation of the peer that
    /// caused it. Timeouts don't: the peer may just be slow or gone.
    pub fn is_misbehavior(&self) -> bool {
        !matches!(self, Error::Timeout(_))
    }
}

impl From<decode::Error> for Error {
    fn from(value: decode::Error) -> Self {
        match value {
            decode::Error::EndOfInput { .. } | decode::Error::Malformed(_) => {
                Error::MalformedMessage(value.to_string())
            }
            decode::Error::UnknownVariant { union, tag } => Error::UnknownVariant { union, tag },
            decode::Error::MissingRequiredField { table, field } => {
                Error::MissingRequiredField { table, field }
            }
            decode::Error::ResourceLimitExceeded { .. } => {
                Error::ResourceLimitExceeded(value.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_map_onto_the_taxonomy() {
        let err: Error = decode::Error::EndOfInput {
            position: 3,
            needed: 1,
        }
        .into();
        assert!(matches!(err, Error::MalformedMessage(_)));

        let err: Error = decode::Error::unknown_variant("Command", 12).into();
        assert_eq!(
            err,
            Error::UnknownVariant {
                union: "Command",
                tag: 12
            }
        );

        assert!(!Error::Timeout(TimeoutKind::Fetch).is_misbehavior());
        assert!(Error::violation("early ping").is_misbehavior());
    }
}
