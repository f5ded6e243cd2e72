use thiserror::Error;

use mm_wire::WireError;

/// Failures surfaced by [`crate::Session`], per `SPEC_FULL.md` §7.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("could not reach message manager at {0}")]
    BrokerUnreachable(std::net::SocketAddr),

    #[error("operation attempted without an active session")]
    NotConnected,

    #[error(transparent)]
    ConnectionLost(#[from] WireError),

    #[error("acknowledgement not received within the connect/control timeout")]
    AcknowledgementTimeout,

    #[error("destination module id {0} is out of range")]
    InvalidDestinationModule(i16),

    #[error("destination host id {0} is out of range")]
    InvalidDestinationHost(i16),

    #[error("received message of unregistered type {0}")]
    UnknownMessageType(i32),

    #[error("message dropped: destination not writable within send timeout")]
    DropOnBusy,
}
