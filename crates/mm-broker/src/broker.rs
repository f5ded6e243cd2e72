//! Single-threaded reactor core: accept, read, classify, dispatch, forward.
//!
//! Grounded on `mm_wire::tcp::Reactor` (itself restating
//! `flux-network::tcp::{connector.rs, stream.rs}`'s registration/dispatch
//! split) with the broker's own classification and forwarding rules layered
//! on top, per `SPEC_FULL.md` §4.D.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use mio::Token;
use mm_timing::{Repeater, unix_time_f64};
use mm_types::limits::{HID_ALL_HOSTS, HID_LOCAL_HOST, MAX_MODULES, MID_MESSAGE_MANAGER};
use mm_types::{
    Connect, FailSubscribe, FailedMessage, Header, HeaderKind, ModuleReady, SubscriptionControl,
    ids,
};
use mm_utils::safe_assert;
use mm_wire::tcp::{Reactor, ReactorEvent};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::client_record::{ClientRecord, ClientState};
use crate::config::BrokerConfig;
use crate::subscriptions::SubscriptionTable;
use crate::timing::TimingTracker;

/// What the wire-level `SUBSCRIBE`/`UNSUBSCRIBE`/`PAUSE_SUBSCRIPTION`/
/// `RESUME_SUBSCRIPTION` quartet reduces to: pause is unsubscribe on the
/// wire, resume is subscribe (`SPEC_FULL.md` §4.D).
#[derive(Clone, Copy, PartialEq, Eq)]
enum SubOp {
    Subscribe,
    Unsubscribe,
}

/// The broker reactor: owns the listen socket, every client connection, the
/// subscription table, and the periodic timing-message counters.
pub struct Broker {
    reactor: Reactor,
    config: BrokerConfig,
    clients: HashMap<Token, ClientRecord>,
    subs: SubscriptionTable,
    timing: TimingTracker,
    timing_repeater: Repeater,
    msg_count: u32,
}

impl Broker {
    /// Binds the listen socket. Returns an `io::Error` on bind failure,
    /// which the binary maps to a non-zero exit code per `SPEC_FULL.md` §6.
    pub fn bind(config: BrokerConfig) -> io::Result<Self> {
        let reactor =
            Reactor::bind(config.socket_addr(), config.header_kind, config.reuse_address)?;
        info!(addr = %config.socket_addr(), kind = ?config.header_kind, "mm-broker: listening");
        Ok(Broker {
            reactor,
            timing_repeater: Repeater::every(config.min_timing_period),
            config,
            clients: HashMap::new(),
            subs: SubscriptionTable::new(),
            timing: TimingTracker::new(),
            msg_count: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.reactor.local_addr()
    }

    pub fn header_kind(&self) -> HeaderKind {
        self.config.header_kind
    }

    /// Runs the event loop until `should_continue` returns `false`,
    /// checked once per iteration (i.e. at most `poll_interval` after the
    /// caller asks it to stop).
    pub fn run(&mut self, mut should_continue: impl FnMut() -> bool) -> io::Result<()> {
        while should_continue() {
            self.tick()?;
        }
        info!("mm-broker: stopped");
        Ok(())
    }

    /// One iteration of the event loop (`SPEC_FULL.md` §4.D steps 1-6).
    pub fn tick(&mut self) -> io::Result<()> {
        // `poll_with`'s closure can only touch locals, never `self` — it
        // holds `&mut self.reactor` for its duration, and `Broker`'s own
        // handlers (`on_disconnect` etc.) need the whole `self`. Collect
        // everything here, then process after the borrow ends.
        let mut accepted: Vec<(Token, SocketAddr)> = Vec::new();
        let mut messages: Vec<(Token, Header, Vec<u8>)> = Vec::new();
        let mut framing_errors: Vec<(Token, usize)> = Vec::new();
        let mut disconnected: Vec<Token> = Vec::new();

        self.reactor.poll_with(Some(self.config.poll_interval), |event| match event {
            ReactorEvent::Accept { token, peer_addr } => accepted.push((token, peer_addr)),
            ReactorEvent::Message { token, header, payload } => {
                messages.push((token, header, payload));
            }
            ReactorEvent::FramingError { token, declared } => {
                framing_errors.push((token, declared));
            }
            ReactorEvent::Disconnect { token } => disconnected.push(token),
        })?;

        for (token, peer_addr) in accepted {
            debug!(?token, %peer_addr, "mm-broker: accepted connection");
            self.clients.insert(token, ClientRecord::accepted(token, peer_addr));
        }
        for (token, declared) in framing_errors {
            warn!(?token, declared, "mm-broker: framing error, disconnecting client");
        }
        for token in disconnected {
            self.on_disconnect(token);
        }

        // Step 3: shuffle the ready set so no single busy sender can
        // starve the rest of the iteration's fairness.
        messages.shuffle(&mut rand::rng());

        for (token, header, payload) in messages {
            if !self.clients.contains_key(&token) {
                continue; // removed earlier this same tick (framing error, etc.)
            }
            self.timing.record(header.msg_type);
            self.dispatch(token, header, payload);
        }

        if !self.config.disable_timing_msg && self.timing_repeater.fired() {
            self.emit_timing_message();
        }

        Ok(())
    }

    fn on_disconnect(&mut self, token: Token) {
        if let Some(client) = self.clients.remove(&token) {
            debug!(?token, module_id = client.module_id, "mm-broker: client disconnected");
        }
        self.subs.remove_all(token);
    }

    fn dispatch(&mut self, token: Token, header: Header, payload: Vec<u8>) {
        if let Some(expected) = Self::control_payload_size(header.msg_type) {
            if payload.len() != expected {
                warn!(
                    ?token,
                    msg_type = header.msg_type,
                    declared = payload.len(),
                    expected,
                    "mm-broker: control message payload size mismatch, disconnecting client"
                );
                self.reactor.remove(token);
                self.on_disconnect(token);
                return;
            }
        }

        match header.msg_type {
            t if t == ids::CONNECT => self.handle_connect(token, header, &payload),
            t if t == ids::DISCONNECT => self.handle_disconnect(token, header),
            t if t == ids::SUBSCRIBE => {
                self.handle_subscription_control(token, header, &payload, SubOp::Subscribe);
            }
            t if t == ids::UNSUBSCRIBE => {
                self.handle_subscription_control(token, header, &payload, SubOp::Unsubscribe);
            }
            t if t == ids::PAUSE_SUBSCRIPTION => {
                self.handle_subscription_control(token, header, &payload, SubOp::Unsubscribe);
            }
            t if t == ids::RESUME_SUBSCRIPTION => {
                self.handle_subscription_control(token, header, &payload, SubOp::Subscribe);
            }
            t if t == ids::MODULE_READY => self.handle_module_ready(token, &payload),
            t if t == ids::FAILED_MESSAGE => self.forward_message(header, payload, true),
            _ => self.forward_message(header, payload, false),
        }
    }

    /// Expected payload size for the core control types this broker parses
    /// with `from_bytes` rather than forwarding opaquely. `num_data_bytes`
    /// disagreeing with the registered fixed size for `msg_type` is a
    /// framing error per `SPEC_FULL.md` §3/§7; checked here since `mm-wire`
    /// itself never interprets payloads and so can't catch a mismatch that
    /// isn't simply oversized.
    fn control_payload_size(msg_type: i32) -> Option<usize> {
        match msg_type {
            t if t == ids::CONNECT => Some(Connect::WIRE_SIZE),
            t if t == ids::SUBSCRIBE
                || t == ids::UNSUBSCRIBE
                || t == ids::PAUSE_SUBSCRIPTION
                || t == ids::RESUME_SUBSCRIPTION =>
            {
                Some(SubscriptionControl::WIRE_SIZE)
            }
            t if t == ids::MODULE_READY => Some(ModuleReady::WIRE_SIZE),
            _ => None,
        }
    }

    /// Binds identity, assigning a dynamic `module_id` when the CONNECT
    /// requested `0` (carried in `header.src_mod_id`, since `Connect`'s own
    /// payload has no id field). Refuses on a duplicate explicit id or on
    /// dynamic-range exhaustion by answering with `FAIL_SUBSCRIBE` and
    /// closing the connection without ever sending `ACKNOWLEDGE`; see
    /// DESIGN.md's "Module ID collision on explicit CONNECT" resolution.
    fn handle_connect(&mut self, token: Token, header: Header, payload: &[u8]) {
        let connect = Connect::from_bytes(payload);
        let requested = header.src_mod_id;

        let assigned = if requested == 0 {
            match self.allocate_dynamic_id() {
                Some(id) => id,
                None => {
                    warn!("mm-broker: dynamic module id range exhausted, refusing CONNECT");
                    self.refuse_connect(token, header, 0);
                    return;
                }
            }
        } else {
            if self.find_client_by_module_id(requested).is_some() {
                warn!(module_id = requested, "mm-broker: refusing CONNECT, duplicate module id");
                self.refuse_connect(token, header, requested);
                return;
            }
            requested
        };

        safe_assert!(
            self.find_client_by_module_id(assigned).is_none(),
            "allocate_dynamic_id/duplicate check handed out module_id {assigned} already in use"
        );

        let Some(client) = self.clients.get_mut(&token) else { return };
        client.module_id = assigned;
        client.host_id = header.src_host_id;
        client.is_logger = connect.logger_status != 0;
        client.state = ClientState::Registered;
        info!(
            ?token,
            module_id = assigned,
            is_logger = client.is_logger,
            "mm-broker: client registered"
        );

        let ack = self.ack_header(&header, assigned);
        self.write_to(token, &ack, &[]);
        self.fanout_ack_to_loggers(token, &ack);
    }

    fn refuse_connect(&mut self, token: Token, header: Header, mod_id: i16) {
        let payload = FailSubscribe { mod_id, msg_type: ids::CONNECT }.to_bytes();
        let refusal = Header {
            msg_type: ids::FAIL_SUBSCRIBE,
            msg_count: self.next_msg_count(),
            send_time: unix_time_f64(),
            recv_time: 0.0,
            src_host_id: HID_LOCAL_HOST,
            src_mod_id: MID_MESSAGE_MANAGER,
            dest_host_id: header.src_host_id,
            dest_mod_id: mod_id,
            num_data_bytes: payload.len() as i32,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        };
        self.write_to(token, &refusal, &payload);
        self.reactor.remove(token);
        self.clients.remove(&token);
    }

    fn handle_disconnect(&mut self, token: Token, header: Header) {
        let module_id = self.clients.get(&token).map_or(0, |c| c.module_id);
        let ack = self.ack_header(&header, module_id);
        self.write_to(token, &ack, &[]);
        self.reactor.remove(token);
        self.on_disconnect(token);
    }

    fn handle_subscription_control(
        &mut self,
        token: Token,
        header: Header,
        payload: &[u8],
        op: SubOp,
    ) {
        let control = SubscriptionControl::from_bytes(payload);
        match op {
            SubOp::Subscribe => self.subs.add(control.msg_type, token),
            SubOp::Unsubscribe => self.subs.remove(control.msg_type, token),
        }
        let module_id = self.clients.get(&token).map_or(0, |c| c.module_id);
        let ack = self.ack_header(&header, module_id);
        self.write_to(token, &ack, &[]);
    }

    fn handle_module_ready(&mut self, token: Token, payload: &[u8]) {
        let ready = ModuleReady::from_bytes(payload);
        if let Some(client) = self.clients.get_mut(&token) {
            client.pid = ready.pid;
            self.timing.set_pid(client.module_id, ready.pid);
        }
    }

    /// Routes a message per `SPEC_FULL.md` §4.D's forwarding rules.
    /// `no_recurse` is set only when forwarding a `FAILED_MESSAGE` itself,
    /// so a failure to deliver one never synthesises another.
    fn forward_message(&mut self, header: Header, payload: Vec<u8>, no_recurse: bool) {
        let msg_type = header.msg_type;
        let dest_mod_id = header.dest_mod_id;

        if dest_mod_id > 0 {
            self.forward_narrowed(header, &payload, dest_mod_id, no_recurse);
        } else {
            self.forward_broadcast(header, &payload, msg_type, no_recurse);
        }

        self.fanout_to_loggers(&header, &payload);
    }

    fn forward_narrowed(
        &mut self,
        header: Header,
        payload: &[u8],
        dest_mod_id: i16,
        no_recurse: bool,
    ) {
        let msg_type = header.msg_type;
        let target = self.find_client_by_module_id(dest_mod_id).filter(|&token| {
            self.subs.contains(msg_type, token) && self.reactor.is_writable(token)
        });
        match target {
            Some(token) => self.write_to(token, &header, payload),
            None if !no_recurse => self.emit_failed_message(dest_mod_id, header),
            None => {}
        }
    }

    fn forward_broadcast(
        &mut self,
        header: Header,
        payload: &[u8],
        msg_type: i32,
        no_recurse: bool,
    ) {
        let targets: Vec<Token> = self.subs.subscribers(msg_type).collect();
        for token in targets {
            let Some((is_logger, module_id)) =
                self.clients.get(&token).map(|c| (c.is_logger, c.module_id))
            else {
                continue;
            };
            if is_logger {
                continue; // delivered once, generically, by fanout_to_loggers
            }
            if self.reactor.is_writable(token) {
                self.write_to(token, &header, payload);
            } else if !no_recurse {
                self.emit_failed_message(module_id, header);
            }
        }
    }

    /// Synthesises a `FAILED_MESSAGE` describing a delivery that couldn't
    /// complete and routes it like any other message (to loggers and to
    /// `FAILED_MESSAGE` subscribers). The wrapping header broadcasts
    /// (`dest_mod_id = 0`, per `SPEC_FULL.md` §7's "routed like any other
    /// message") — the failed recipient's id lives in the payload's own
    /// `dest_mod_id` field, not the header, since narrow-routing the
    /// header back at a client that just proved unwritable would only
    /// fail again. Only ever called with `no_recurse = false` upstream, so
    /// this itself is always forwarded with `no_recurse = true` — a
    /// `FAILED_MESSAGE` that can't be delivered is silently dropped.
    fn emit_failed_message(&mut self, dest_mod_id: i16, original_header: Header) {
        let payload = FailedMessage {
            dest_mod_id,
            time_of_failure: unix_time_f64(),
            original_header,
        }
        .to_bytes(self.config.header_kind);
        let header = Header {
            msg_type: ids::FAILED_MESSAGE,
            msg_count: self.next_msg_count(),
            send_time: unix_time_f64(),
            recv_time: 0.0,
            src_host_id: HID_LOCAL_HOST,
            src_mod_id: MID_MESSAGE_MANAGER,
            dest_host_id: HID_ALL_HOSTS,
            dest_mod_id: 0,
            num_data_bytes: payload.len() as i32,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        };
        self.forward_message(header, payload, true);
    }

    /// Periodic broker-originated snapshot, forwarded like any
    /// `dest_mod_id == 0` message (every subscriber plus every logger).
    fn emit_timing_message(&mut self) {
        let snapshot = self.timing.snapshot_and_reset(unix_time_f64());
        let payload = snapshot.to_bytes();
        let header = Header {
            msg_type: ids::TIMING_MESSAGE,
            msg_count: self.next_msg_count(),
            send_time: snapshot.send_time,
            recv_time: 0.0,
            src_host_id: HID_LOCAL_HOST,
            src_mod_id: MID_MESSAGE_MANAGER,
            dest_host_id: HID_ALL_HOSTS,
            dest_mod_id: 0,
            num_data_bytes: payload.len() as i32,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        };
        self.forward_message(header, payload, false);
    }

    /// Sends `ack` to every registered logger except `exclude` (the client
    /// whose `CONNECT` this acknowledges already received its own copy via
    /// [`Self::handle_connect`]).
    fn fanout_ack_to_loggers(&mut self, exclude: Token, ack: &Header) {
        let loggers: Vec<Token> = self
            .clients
            .values()
            .filter(|c| c.is_logger && c.is_registered() && c.token != exclude)
            .map(|c| c.token)
            .collect();
        for token in loggers {
            self.write_blocking_to_logger(token, ack, &[]);
        }
    }

    /// Delivers `header`/`payload` to every registered logger, blocking
    /// (with no timeout) on any that isn't immediately writable —
    /// `SPEC_FULL.md` §4.D's deliberate back-pressure-to-publishers path.
    fn fanout_to_loggers(&mut self, header: &Header, payload: &[u8]) {
        let loggers: Vec<Token> = self
            .clients
            .values()
            .filter(|c| c.is_logger && c.is_registered())
            .map(|c| c.token)
            .collect();
        for token in loggers {
            self.write_blocking_to_logger(token, header, payload);
        }
    }

    fn write_blocking_to_logger(&mut self, token: Token, header: &Header, payload: &[u8]) {
        if !self.reactor.contains(token) {
            return;
        }
        if self.reactor.write_message(token, header, payload).is_err() {
            self.on_disconnect(token);
            return;
        }
        while self.reactor.contains(token) && !self.reactor.is_writable(token) {
            let mut accepted: Vec<(Token, SocketAddr)> = Vec::new();
            let mut messages: Vec<(Token, Header, Vec<u8>)> = Vec::new();
            let mut framing_errors: Vec<(Token, usize)> = Vec::new();
            let mut disconnected: Vec<Token> = Vec::new();

            let poll_result = self.reactor.poll_with(None, |event| match event {
                ReactorEvent::Accept { token, peer_addr } => accepted.push((token, peer_addr)),
                ReactorEvent::Message { token, header, payload } => {
                    messages.push((token, header, payload));
                }
                ReactorEvent::FramingError { token, declared } => {
                    framing_errors.push((token, declared));
                }
                ReactorEvent::Disconnect { token } => disconnected.push(token),
            });
            if poll_result.is_err() {
                return;
            }

            for (t, peer_addr) in accepted {
                self.clients.insert(t, ClientRecord::accepted(t, peer_addr));
            }
            for (t, declared) in framing_errors {
                warn!(?t, declared, "mm-broker: framing error while blocked on logger");
            }
            for t in disconnected {
                self.on_disconnect(t);
            }
            for (t, h, p) in messages {
                if !self.clients.contains_key(&t) {
                    continue;
                }
                self.timing.record(h.msg_type);
                self.dispatch(t, h, p);
            }
        }
    }

    fn write_to(&mut self, token: Token, header: &Header, payload: &[u8]) {
        if self.reactor.write_message(token, header, payload).is_err() {
            self.on_disconnect(token);
        }
    }

    fn find_client_by_module_id(&self, module_id: i16) -> Option<Token> {
        self.clients
            .values()
            .find(|c| c.is_registered() && c.module_id == module_id)
            .map(|c| c.token)
    }

    /// First free id in `[DYN_MOD_ID_START, MAX_MODULES)`, or `None` if the
    /// dynamic range is fully assigned (`SPEC_FULL.md` §8's 201st-client
    /// boundary behaviour).
    fn allocate_dynamic_id(&self) -> Option<i16> {
        let in_use: std::collections::HashSet<i16> =
            self.clients.values().filter(|c| c.is_registered()).map(|c| c.module_id).collect();
        (mm_types::limits::DYN_MOD_ID_START..MAX_MODULES).find(|id| !in_use.contains(id))
    }

    fn ack_header(&mut self, original: &Header, dest_mod_id: i16) -> Header {
        Header {
            msg_type: ids::ACKNOWLEDGE,
            msg_count: self.next_msg_count(),
            send_time: unix_time_f64(),
            recv_time: 0.0,
            src_host_id: HID_LOCAL_HOST,
            src_mod_id: MID_MESSAGE_MANAGER,
            dest_host_id: original.src_host_id,
            dest_mod_id,
            num_data_bytes: 0,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        }
    }

    fn next_msg_count(&mut self) -> u32 {
        let count = self.msg_count;
        self.msg_count = self.msg_count.wrapping_add(1);
        count
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use mio::Token;
    use mm_types::limits::DYN_MOD_ID_START;

    use super::*;

    fn test_broker() -> Broker {
        let config = BrokerConfig {
            addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..BrokerConfig::default()
        };
        Broker::bind(config).expect("bind to ephemeral port")
    }

    fn fake_registered(token: usize, module_id: i16) -> ClientRecord {
        let mut client = ClientRecord::accepted(
            Token(token),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        );
        client.module_id = module_id;
        client.state = ClientState::Registered;
        client
    }

    /// SPEC_FULL.md §8: with MAX_MODULES (200) clients connected, a 201st
    /// dynamic CONNECT must find no free id in `[DYN_MOD_ID_START,
    /// MAX_MODULES)`.
    #[test]
    fn dynamic_id_range_exhausted_returns_none() {
        let mut broker = test_broker();
        for (i, id) in (DYN_MOD_ID_START..MAX_MODULES).enumerate() {
            broker.clients.insert(Token(i), fake_registered(i, id));
        }
        assert_eq!(broker.allocate_dynamic_id(), None);
    }

    #[test]
    fn dynamic_id_allocates_lowest_free_id() {
        let mut broker = test_broker();
        broker.clients.insert(Token(0), fake_registered(0, DYN_MOD_ID_START));
        assert_eq!(broker.allocate_dynamic_id(), Some(DYN_MOD_ID_START + 1));
    }

    #[test]
    fn control_payload_size_matches_wire_types() {
        assert_eq!(Broker::control_payload_size(ids::CONNECT), Some(Connect::WIRE_SIZE));
        assert_eq!(Broker::control_payload_size(ids::SUBSCRIBE), Some(SubscriptionControl::WIRE_SIZE));
        assert_eq!(Broker::control_payload_size(ids::UNSUBSCRIBE), Some(SubscriptionControl::WIRE_SIZE));
        assert_eq!(
            Broker::control_payload_size(ids::PAUSE_SUBSCRIPTION),
            Some(SubscriptionControl::WIRE_SIZE)
        );
        assert_eq!(Broker::control_payload_size(ids::MODULE_READY), Some(ModuleReady::WIRE_SIZE));
        assert_eq!(Broker::control_payload_size(ids::DISCONNECT), None);
        assert_eq!(Broker::control_payload_size(1234), None);
    }

    /// A CONNECT whose declared payload is shorter than `Connect::WIRE_SIZE`
    /// must never reach `Connect::from_bytes` (which indexes the buffer
    /// assuming the full size arrived) — it's a framing error, and the
    /// client is disconnected rather than the broker panicking.
    #[test]
    fn mismatched_control_payload_disconnects_without_panicking() {
        let mut broker = test_broker();
        let token = Token(0);
        broker.clients.insert(
            token,
            ClientRecord::accepted(token, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)),
        );
        let header = Header {
            msg_type: ids::CONNECT,
            num_data_bytes: 1,
            ..Header::zeroed()
        };
        broker.dispatch(token, header, vec![0u8]);
        assert!(!broker.clients.contains_key(&token));
    }
}
