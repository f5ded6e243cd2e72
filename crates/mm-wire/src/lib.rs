//! Wire codec and readiness-driven TCP reactor (`SPEC_FULL.md` §4.B).
//!
//! `codec` is the blocking restatement of the framing contract, usable over
//! any `Read + Write` (exercised directly in this crate's tests over
//! `std::io::Cursor`). `tcp` is the non-blocking multiplexer both the broker
//! and the client library drive their event loop with, each with its own
//! `Reactor`: the broker's holding a listener and many connections, the
//! client's holding exactly one outbound connection and no listener.

mod codec;
mod error;
pub mod tcp;

pub use codec::{read_header, read_payload, write_message};
pub use error::WireError;
