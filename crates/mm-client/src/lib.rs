//! Client session library for the message broker this workspace implements
//! (`SPEC_FULL.md` §4.C), built on [`mm_wire`]'s non-blocking reactor.

mod error;
mod session;

pub use error::ClientError;
pub use session::{ConnectOptions, Message, Session};
