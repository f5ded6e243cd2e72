use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use mm_types::{HeaderKind, limits};

/// Broker startup settings, per `SPEC_FULL.md` §6 "Broker CLI".
///
/// Kept free of `clap` so the library can be constructed directly by tests
/// and embedders; the `mm-broker` binary's `clap::Parser` args convert into
/// this.
#[derive(Clone, Debug)]
pub struct BrokerConfig {
    pub addr: IpAddr,
    pub port: u16,
    pub header_kind: HeaderKind,
    pub disable_timing_msg: bool,
    /// Sets `SO_REUSEADDR` before binding; also raises the default log
    /// verbosity in the binary (`--debug`).
    pub reuse_address: bool,
    pub poll_interval: Duration,
    pub min_timing_period: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: limits::DEFAULT_PORT,
            header_kind: HeaderKind::Standard,
            disable_timing_msg: false,
            reuse_address: false,
            poll_interval: Duration::from_millis(limits::DEFAULT_POLL_INTERVAL_MS),
            min_timing_period: Duration::from_millis(limits::DEFAULT_MIN_TIMING_PERIOD_MS),
        }
    }
}

impl BrokerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}
