//! Client-side session: connect, subscribe, publish, and receive against a
//! broker, per `SPEC_FULL.md` §4.C.
//!
//! Built on the same [`mm_wire::tcp::Reactor`] the broker drives, configured
//! here with exactly one outbound connection and no listener. A single
//! `Session` is not `Send`-safe to share across threads without external
//! synchronisation — an application using it from multiple threads must
//! serialise calls into one session, matching `SPEC_FULL.md` §5.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    time::{Duration, Instant},
};

use mio::Token;
use mm_timing::unix_time_f64;
use mm_types::{Connect, Header, HeaderKind, Registry, SubscriptionControl, ids, limits};
use mm_wire::{
    WireError,
    tcp::{Reactor, ReactorEvent},
};
use tracing::debug;

use crate::error::ClientError;

/// Knobs for [`Session::connect`].
#[derive(Clone, Copy, Debug)]
pub struct ConnectOptions {
    /// Must match the header variant the broker was started with.
    pub header_kind: HeaderKind,
    pub logger_status: bool,
    pub daemon_status: bool,
    /// `0` requests dynamic assignment; nonzero asks for that exact id and
    /// fails the connect if it's already taken.
    pub preferred_module_id: i16,
    pub host_id: i16,
    /// Deadline for the whole connect handshake, TCP connect through ACK.
    pub connect_timeout: Duration,
    /// Deadline each subsequent control message (SUBSCRIBE, UNSUBSCRIBE,
    /// PAUSE/RESUME_SUBSCRIPTION, DISCONNECT) waits for its ACK.
    pub ack_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            header_kind: HeaderKind::Standard,
            logger_status: false,
            daemon_status: false,
            preferred_module_id: 0,
            host_id: limits::HID_LOCAL_HOST,
            connect_timeout: Duration::from_millis(limits::DEFAULT_CONNECT_TIMEOUT_MS),
            ack_timeout: Duration::from_millis(limits::DEFAULT_DISCONNECT_ACK_TIMEOUT_MS),
        }
    }
}

/// A received message, materialised against the session's [`Registry`].
#[derive(Clone, Debug)]
pub struct Message {
    pub header: Header,
    pub type_name: String,
    pub payload: Vec<u8>,
}

/// One TCP session to a broker.
pub struct Session {
    reactor: Reactor,
    token: Token,
    registry: Registry,
    module_id: i16,
    host_id: i16,
    msg_count: u32,
    ack_timeout: Duration,
    /// Messages read off the wire while waiting for an ACK or for
    /// writability, in arrival order, returned before any new read.
    pending: VecDeque<(Header, Vec<u8>)>,
    connected: bool,
}

impl Session {
    /// Opens the TCP connection, disables Nagle, sends CONNECT, and waits
    /// for the broker's ACKNOWLEDGE. The assigned `module_id` travels back
    /// in the ACK header's `dest_mod_id` field — ACKNOWLEDGE's payload is
    /// declared empty in `SPEC_FULL.md` §6, so the header is the only place
    /// left to carry it; see DESIGN.md.
    pub fn connect(
        server: SocketAddr,
        registry: Registry,
        opts: ConnectOptions,
    ) -> Result<Self, ClientError> {
        let (reactor, token) = Reactor::connect(server, opts.header_kind, opts.connect_timeout)
            .map_err(|err| map_connect_err(server, err))?;

        let mut session = Session {
            reactor,
            token,
            registry,
            module_id: opts.preferred_module_id,
            host_id: opts.host_id,
            msg_count: 0,
            ack_timeout: opts.ack_timeout,
            pending: VecDeque::new(),
            connected: true,
        };

        let payload = Connect {
            logger_status: i16::from(opts.logger_status),
            daemon_status: i16::from(opts.daemon_status),
        }
        .to_bytes();
        let header = session.control_header(ids::CONNECT, payload.len() as i32);
        session.write_and_track(&header, &payload)?;

        let deadline = Instant::now() + opts.connect_timeout;
        let ack = session.await_message(deadline, |h| h.msg_type == ids::ACKNOWLEDGE)?;
        session.module_id = ack.dest_mod_id;
        Ok(session)
    }

    pub fn module_id(&self) -> i16 {
        self.module_id
    }

    pub fn host_id(&self) -> i16 {
        self.host_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Sends DISCONNECT, waits briefly for the ACK, then closes the socket.
    /// Idempotent: a second call on an already-closed session is a no-op.
    pub fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        let header = self.control_header(ids::DISCONNECT, 0);
        let _ = self.write_and_track(&header, &[]);
        let deadline = Instant::now() + self.ack_timeout;
        let _ = self.await_message(deadline, |h| h.msg_type == ids::ACKNOWLEDGE);
        self.reactor.remove(self.token);
        self.connected = false;
    }

    pub fn subscribe(&mut self, types: impl IntoIterator<Item = i32>) -> Result<(), ClientError> {
        self.control_subscription(ids::SUBSCRIBE, types)
    }

    pub fn unsubscribe(&mut self, types: impl IntoIterator<Item = i32>) -> Result<(), ClientError> {
        self.control_subscription(ids::UNSUBSCRIBE, types)
    }

    pub fn pause_subscription(
        &mut self,
        types: impl IntoIterator<Item = i32>,
    ) -> Result<(), ClientError> {
        self.control_subscription(ids::PAUSE_SUBSCRIPTION, types)
    }

    pub fn resume_subscription(
        &mut self,
        types: impl IntoIterator<Item = i32>,
    ) -> Result<(), ClientError> {
        self.control_subscription(ids::RESUME_SUBSCRIPTION, types)
    }

    fn control_subscription(
        &mut self,
        control_type: i32,
        types: impl IntoIterator<Item = i32>,
    ) -> Result<(), ClientError> {
        for msg_type in types {
            if !self.connected {
                return Err(ClientError::NotConnected);
            }
            let payload = SubscriptionControl { msg_type }.to_bytes();
            let header = self.control_header(control_type, payload.len() as i32);
            self.write_and_track(&header, &payload)?;
            let deadline = Instant::now() + self.ack_timeout;
            self.await_message(deadline, |h| h.msg_type == ids::ACKNOWLEDGE)?;
        }
        Ok(())
    }

    /// Fills a header (`msg_count++`, `send_time=now`), validates the
    /// destination, and writes header+payload if the socket is writable
    /// within `timeout`. Drops the message silently (`DropOnBusy`) if not.
    pub fn send_message(
        &mut self,
        type_id: i32,
        payload: &[u8],
        dest_mod_id: i16,
        dest_host_id: i16,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.send_framed(type_id, payload, dest_mod_id, dest_host_id, timeout)
    }

    /// As [`Self::send_message`], with an empty payload.
    pub fn send_signal(
        &mut self,
        type_id: i32,
        dest_mod_id: i16,
        dest_host_id: i16,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        self.send_framed(type_id, &[], dest_mod_id, dest_host_id, timeout)
    }

    fn send_framed(
        &mut self,
        type_id: i32,
        payload: &[u8],
        dest_mod_id: i16,
        dest_host_id: i16,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        validate_destination(dest_mod_id, dest_host_id)?;

        if !self.wait_writable(timeout)? {
            // Visible protocol diagnostic, not a log line: SPEC_FULL.md §7
            // carries this forward from the original CLI's "x" on drop.
            debug!("x");
            return Err(ClientError::DropOnBusy);
        }

        let header = Header {
            msg_type: type_id,
            msg_count: self.next_msg_count(),
            send_time: unix_time_f64(),
            recv_time: 0.0,
            src_host_id: self.host_id,
            src_mod_id: self.module_id,
            dest_host_id,
            dest_mod_id,
            num_data_bytes: payload.len() as i32,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        };
        self.write_and_track(&header, payload)
    }

    /// Waits up to `timeout` for a message, materialising it against the
    /// session's registry. Returns `None` on elapsed timeout, leaving no
    /// partial state behind.
    pub fn read_message(&mut self, timeout: Duration) -> Result<Option<Message>, ClientError> {
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        if let Some((header, payload)) = self.pending.pop_front() {
            return self.materialize(header, payload).map(Some);
        }

        let deadline = Instant::now() + timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(None);
            };
            let mut frame = None;
            let mut disconnected = false;
            self.reactor
                .poll_with(Some(remaining), |event| match event {
                    ReactorEvent::Message { header, payload, .. } => {
                        if frame.is_none() {
                            frame = Some((header, payload));
                        } else {
                            self.pending.push_back((header, payload));
                        }
                    }
                    ReactorEvent::Disconnect { .. } => disconnected = true,
                    ReactorEvent::Accept { .. } | ReactorEvent::FramingError { .. } => {}
                })
                .map_err(WireError::from)?;

            if let Some((header, payload)) = frame {
                return self.materialize(header, payload).map(Some);
            }
            if disconnected {
                self.connected = false;
                return Err(ClientError::ConnectionLost(WireError::PeerClosed));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    /// Drains the socket with a per-call timeout until no message is
    /// available or the deadline elapses. Returns the count discarded.
    pub fn discard_messages(&mut self, timeout: Duration) -> Result<usize, ClientError> {
        let deadline = Instant::now() + timeout;
        let mut discarded = 0;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(discarded);
            };
            match self.read_message(remaining)? {
                Some(_) => discarded += 1,
                None => return Ok(discarded),
            }
        }
    }

    fn materialize(&self, mut header: Header, payload: Vec<u8>) -> Result<Message, ClientError> {
        header.recv_time = unix_time_f64();
        let type_name = self
            .registry
            .lookup(header.msg_type)
            .ok_or(ClientError::UnknownMessageType(header.msg_type))?
            .type_name
            .as_str()
            .to_owned();
        Ok(Message { header, type_name, payload })
    }

    fn control_header(&mut self, msg_type: i32, num_data_bytes: i32) -> Header {
        Header {
            msg_type,
            msg_count: self.next_msg_count(),
            send_time: unix_time_f64(),
            recv_time: 0.0,
            src_host_id: self.host_id,
            src_mod_id: self.module_id,
            dest_host_id: 0,
            dest_mod_id: 0,
            num_data_bytes,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        }
    }

    /// Unsigned wraparound at 2^32, reset only on new process, per
    /// `SPEC_FULL.md` §4.C.
    fn next_msg_count(&mut self) -> u32 {
        let count = self.msg_count;
        self.msg_count = self.msg_count.wrapping_add(1);
        count
    }

    fn write_and_track(&mut self, header: &Header, payload: &[u8]) -> Result<(), ClientError> {
        match self.reactor.write_message(self.token, header, payload) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.connected = false;
                Err(ClientError::from(err))
            }
        }
    }

    /// Blocks (readiness-driven) until a message matching `pred` arrives or
    /// `deadline` passes; any non-matching message is buffered to
    /// `pending` rather than lost.
    fn await_message(
        &mut self,
        deadline: Instant,
        pred: impl Fn(&Header) -> bool,
    ) -> Result<Header, ClientError> {
        if let Some(pos) = self.pending.iter().position(|(h, _)| pred(h)) {
            let (header, _) = self.pending.remove(pos).expect("position just found");
            return Ok(header);
        }

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Err(ClientError::AcknowledgementTimeout);
            };
            let mut found = None;
            let mut disconnected = false;
            self.reactor
                .poll_with(Some(remaining), |event| match event {
                    ReactorEvent::Message { header, payload, .. } => {
                        if found.is_none() && pred(&header) {
                            found = Some(header);
                        } else {
                            self.pending.push_back((header, payload));
                        }
                    }
                    ReactorEvent::Disconnect { .. } => disconnected = true,
                    ReactorEvent::Accept { .. } | ReactorEvent::FramingError { .. } => {}
                })
                .map_err(WireError::from)?;

            if let Some(header) = found {
                return Ok(header);
            }
            if disconnected {
                self.connected = false;
                return Err(ClientError::ConnectionLost(WireError::PeerClosed));
            }
            if Instant::now() >= deadline {
                return Err(ClientError::AcknowledgementTimeout);
            }
        }
    }

    /// Waits up to `timeout` for the connection to become writable, using
    /// the reactor's write-backlog-emptiness proxy (`SPEC_FULL.md` §4.D's
    /// writability snapshot, restated client-side).
    fn wait_writable(&mut self, timeout: Duration) -> Result<bool, ClientError> {
        if self.reactor.is_writable(self.token) {
            return Ok(true);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(false);
            };
            let mut disconnected = false;
            self.reactor
                .poll_with(Some(remaining), |event| match event {
                    ReactorEvent::Message { header, payload, .. } => {
                        self.pending.push_back((header, payload));
                    }
                    ReactorEvent::Disconnect { .. } => disconnected = true,
                    ReactorEvent::Accept { .. } | ReactorEvent::FramingError { .. } => {}
                })
                .map_err(WireError::from)?;

            if disconnected {
                self.connected = false;
                return Err(ClientError::ConnectionLost(WireError::PeerClosed));
            }
            if self.reactor.is_writable(self.token) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }
}

fn validate_destination(dest_mod_id: i16, dest_host_id: i16) -> Result<(), ClientError> {
    if !(0..limits::MAX_MODULES).contains(&dest_mod_id) {
        return Err(ClientError::InvalidDestinationModule(dest_mod_id));
    }
    if dest_host_id != limits::HID_ALL_HOSTS && !(0..limits::MAX_HOSTS).contains(&dest_host_id) {
        return Err(ClientError::InvalidDestinationHost(dest_host_id));
    }
    Ok(())
}

fn map_connect_err(server: SocketAddr, err: WireError) -> ClientError {
    match &err {
        WireError::ConnectionLost(io)
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut
            ) =>
        {
            ClientError::BrokerUnreachable(server)
        }
        _ => ClientError::ConnectionLost(err),
    }
}
