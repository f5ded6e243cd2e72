use std::net::SocketAddr;

use mio::Token;

/// Broker-side record for one connection, per `SPEC_FULL.md` §3 "Client
/// Record" and §4.D's per-client state machine.
///
/// A record exists from `accept` (state [`ClientState::Accepted`]) through
/// to removal; there is no explicit `Removed` variant because a removed
/// client's record is simply dropped from [`crate::broker::Broker`]'s
/// client map, matching [`crate::subscriptions::SubscriptionTable`]'s
/// `remove_all`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, but no `CONNECT` has completed yet.
    Accepted,
    /// `CONNECT` completed; `module_id`/`host_id`/`is_logger` are valid.
    Registered,
}

#[derive(Clone, Debug)]
pub struct ClientRecord {
    pub token: Token,
    pub remote_addr: SocketAddr,
    pub module_id: i16,
    pub host_id: i16,
    pub pid: i32,
    pub is_logger: bool,
    pub state: ClientState,
}

impl ClientRecord {
    pub fn accepted(token: Token, remote_addr: SocketAddr) -> Self {
        ClientRecord {
            token,
            remote_addr,
            module_id: 0,
            host_id: 0,
            pid: 0,
            is_logger: false,
            state: ClientState::Accepted,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state == ClientState::Registered
    }
}
