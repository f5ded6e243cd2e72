//! Single-threaded readiness multiplexer.
//!
//! Grounded on the `flux-network` crate's `TcpConnector`/`ConnectionManager`
//! pair: one `mio::Poll`, a token-addressed set of connections, an optional
//! listener. The broker drives this with many connections and a listener;
//! the client library drives the same type with exactly one outbound
//! connection and no listener, per `SPEC_FULL.md` §4.B's non-blocking
//! variant note.

use std::{
    collections::HashMap,
    io,
    net::SocketAddr,
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, net::TcpListener};
use mm_types::{Header, HeaderKind};
use tracing::{info, warn};

use crate::{WireError, tcp::connection::{ConnState, Connection}};

/// Event surfaced by [`Reactor::poll_with`].
pub enum ReactorEvent {
    Accept { token: Token, peer_addr: SocketAddr },
    Message { token: Token, header: Header, payload: Vec<u8> },
    /// `num_data_bytes` exceeded `MAX_CONTIGUOUS_MESSAGE_DATA`; the
    /// connection is removed immediately after this event fires.
    FramingError { token: Token, declared: usize },
    Disconnect { token: Token },
}

/// Owns the poll instance, an optional listener, and every live connection.
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: Option<(Token, TcpListener)>,
    conns: HashMap<Token, Connection>,
    kind: HeaderKind,
    next_token: usize,
}

impl Reactor {
    fn empty(kind: HeaderKind) -> io::Result<Self> {
        Ok(Reactor {
            poll: Poll::new()?,
            events: Events::with_capacity(256),
            listener: None,
            conns: HashMap::new(),
            kind,
            next_token: 0,
        })
    }

    /// Binds a listener at `addr`. `reuse_address` sets `SO_REUSEADDR`
    /// before binding, matching the broker's `--debug` flag.
    pub fn bind(addr: SocketAddr, kind: HeaderKind, reuse_address: bool) -> io::Result<Self> {
        let mut reactor = Self::empty(kind)?;
        let std_listener = bind_std_listener(addr, reuse_address)?;
        let mut listener = TcpListener::from_std(std_listener);
        let token = reactor.alloc_token();
        reactor.poll.registry().register(&mut listener, token, Interest::READABLE)?;
        info!(%addr, "mm-wire: listening");
        reactor.listener = Some((token, listener));
        Ok(reactor)
    }

    /// Blocking outbound connect used by the client library. Returns the
    /// reactor with the single connection already registered.
    pub fn connect(
        addr: SocketAddr,
        kind: HeaderKind,
        timeout: Duration,
    ) -> Result<(Self, Token), WireError> {
        let std_stream = std::net::TcpStream::connect_timeout(&addr, timeout)?;
        std_stream.set_nonblocking(true)?;
        let mut reactor = Self::empty(kind)?;
        let token = reactor.alloc_token();
        let mut conn = Connection::new(mio::net::TcpStream::from_std(std_stream), kind)?;
        conn.register(reactor.poll.registry(), token)?;
        reactor.conns.insert(token, conn);
        Ok((reactor, token))
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.as_ref().expect("reactor has no listener").1.local_addr()
    }

    pub fn header_kind(&self) -> HeaderKind {
        self.kind
    }

    pub fn is_writable(&self, token: Token) -> bool {
        self.conns.get(&token).is_some_and(Connection::is_writable)
    }

    pub fn peer_addr(&self, token: Token) -> io::Result<SocketAddr> {
        self.conns.get(&token).expect("unknown token").peer_addr()
    }

    pub fn contains(&self, token: Token) -> bool {
        self.conns.contains_key(&token)
    }

    /// Forcibly drops a connection, e.g. after the caller decides to
    /// refuse it (duplicate module id on CONNECT).
    pub fn remove(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            conn.deregister(self.poll.registry());
        }
    }

    pub fn write_message(
        &mut self,
        token: Token,
        header: &Header,
        payload: &[u8],
    ) -> Result<(), WireError> {
        let registry = self.poll.registry();
        let Some(conn) = self.conns.get_mut(&token) else {
            return Err(WireError::PeerClosed);
        };
        if conn.write_message(registry, header, payload) == ConnState::Disconnected {
            self.remove(token);
            return Err(WireError::PeerClosed);
        }
        Ok(())
    }

    /// Blocks up to `timeout` waiting for readiness, then dispatches every
    /// ready event to `handler`. `timeout = None` blocks indefinitely
    /// (used for the logger back-pressure wait in `SPEC_FULL.md` §4.D).
    pub fn poll_with<F>(&mut self, timeout: Option<Duration>, mut handler: F) -> io::Result<()>
    where
        F: FnMut(ReactorEvent),
    {
        self.poll.poll(&mut self.events, timeout)?;

        // Copy out (token, readable, writable) before touching `self` again:
        // `self.events.iter()` borrows `self.events`, and accepting a new
        // connection or draining a connection's backlog both need `&mut
        // self` for unrelated fields.
        let ready: Vec<(Token, bool, bool)> =
            self.events.iter().map(|e| (e.token(), e.is_readable(), e.is_writable())).collect();

        let mut to_remove = Vec::new();
        let listener_token = self.listener.as_ref().map(|(t, _)| *t);

        for (token, readable, writable) in ready {
            if Some(token) == listener_token {
                self.accept_all(&mut handler);
                continue;
            }
            let Some(conn) = self.conns.get_mut(&token) else { continue };
            let registry = self.poll.registry();
            match conn.poll_readiness(registry, readable, writable, |header, payload| {
                handler(ReactorEvent::Message { token, header, payload });
            }) {
                ConnState::Alive => {}
                ConnState::Disconnected => {
                    handler(ReactorEvent::Disconnect { token });
                    to_remove.push(token);
                }
                ConnState::FramingError { declared } => {
                    handler(ReactorEvent::FramingError { token, declared });
                    handler(ReactorEvent::Disconnect { token });
                    to_remove.push(token);
                }
            }
        }

        for token in to_remove {
            self.remove(token);
        }
        Ok(())
    }

    fn accept_all<F>(&mut self, handler: &mut F)
    where
        F: FnMut(ReactorEvent),
    {
        if self.listener.is_none() {
            return;
        }
        loop {
            let accepted = match &self.listener {
                Some((_, listener)) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, peer_addr)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;
                    match Connection::new(stream, self.kind) {
                        Ok(mut conn) => {
                            if let Err(err) = conn.register(self.poll.registry(), token) {
                                warn!(?err, "mm-wire: failed to register accepted connection");
                                continue;
                            }
                            self.conns.insert(token, conn);
                            handler(ReactorEvent::Accept { token, peer_addr });
                        }
                        Err(err) => warn!(?err, "mm-wire: failed to configure accepted socket"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(?err, "mm-wire: accept failed");
                    break;
                }
            }
        }
    }
}

/// Bind helper shared by [`Reactor::bind`], using `socket2` to opt into
/// `SO_REUSEADDR` before handing the socket to `mio`.
fn bind_std_listener(addr: SocketAddr, reuse_address: bool) -> io::Result<std::net::TcpListener> {
    use socket2::{Domain, Socket, Type};

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    if reuse_address {
        socket.set_reuse_address(true)?;
    }
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}
