pub mod config;
pub mod connection;
pub mod destination;
pub mod message;
pub mod subscription;
pub mod trace;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::*;
pub use destination::Destination;
pub use message::Message;
pub use subscription::Subscription;
pub use trace::{Direction, Trace, TracingSink};
pub use transaction::{Transaction, TransactionState};

pub use stomp_proto::{header, AckMode, Command, Frame, Headers, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum StompError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not log in to broker {server:?} as {user:?}: {detail}")]
    Authentication {
        server: String,
        user: String,
        detail: String,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("No such subscription: {0:?}")]
    Lookup(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Broker error: {message}")]
    Broker { message: String, body: String },

    #[error("Timed out {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, StompError>;
