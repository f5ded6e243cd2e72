//! Exercises `Session` against a minimal hand-rolled broker stand-in built
//! directly on `mm_wire::tcp::Reactor`, the same way
//! `flux-network/tests/tcp_roundtrip.rs` drives `TcpConnector` from a
//! server thread and a client thread over real loopback sockets.

use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use mio::Token;
use mm_client::{ConnectOptions, Session};
use mm_types::{Header, HeaderKind, Registry, TypeDescriptor, ids};
use mm_wire::tcp::{Reactor, ReactorEvent};

/// Accepts one connection, ACKs CONNECT/DISCONNECT, and otherwise echoes
/// every message straight back to its sender. Good enough to exercise the
/// session's framing and control-message waits without a full broker.
fn run_echo_server(mut reactor: Reactor, stop_after: Duration) {
    let deadline = std::time::Instant::now() + stop_after;
    let mut next_module_id = 100i16;
    while std::time::Instant::now() < deadline {
        let mut inbox: Vec<(Token, Header, Vec<u8>)> = Vec::new();
        reactor
            .poll_with(Some(Duration::from_millis(50)), |event| {
                if let ReactorEvent::Message { token, header, payload } = event {
                    inbox.push((token, header, payload));
                }
            })
            .unwrap();

        for (token, mut header, payload) in inbox {
            if !reactor.contains(token) {
                continue;
            }
            match header.msg_type {
                t if t == ids::CONNECT => {
                    header.msg_type = ids::ACKNOWLEDGE;
                    header.dest_mod_id = next_module_id;
                    header.num_data_bytes = 0;
                    next_module_id += 1;
                    let _ = reactor.write_message(token, &header, &[]);
                }
                t if t == ids::DISCONNECT => {
                    header.msg_type = ids::ACKNOWLEDGE;
                    header.num_data_bytes = 0;
                    let _ = reactor.write_message(token, &header, &[]);
                    reactor.remove(token);
                }
                _ => {
                    let _ = reactor.write_message(token, &header, &payload);
                }
            }
        }
    }
}

fn spawn_echo_server() -> SocketAddr {
    let reactor = Reactor::bind("127.0.0.1:0".parse().unwrap(), HeaderKind::Standard, true)
        .expect("bind echo server");
    let addr = reactor.local_addr().unwrap();
    thread::spawn(move || run_echo_server(reactor, Duration::from_secs(5)));
    addr
}

#[test]
fn connect_assigns_module_id_from_ack() {
    let addr = spawn_echo_server();
    let session = Session::connect(addr, Registry::with_core_types(), ConnectOptions::default())
        .expect("connect");
    assert!(session.module_id() >= 100);
    assert!(session.is_connected());
}

#[test]
fn send_message_round_trips_through_echo() {
    let addr = spawn_echo_server();
    let mut registry = Registry::with_core_types();
    registry.register(TypeDescriptor::new(1234, "TEST_TYPE", 80)).unwrap();
    let mut session =
        Session::connect(addr, registry, ConnectOptions::default()).expect("connect");

    let payload: Vec<u8> = (0..80u8).collect();
    session
        .send_message(1234, &payload, 0, 0, Duration::from_millis(500))
        .expect("send");

    let msg = session
        .read_message(Duration::from_secs(1))
        .expect("read")
        .expect("message arrived");
    assert_eq!(msg.header.msg_type, 1234);
    assert_eq!(msg.payload, payload);
}

#[test]
fn read_message_times_out_with_no_traffic() {
    let addr = spawn_echo_server();
    let mut session =
        Session::connect(addr, Registry::with_core_types(), ConnectOptions::default())
            .expect("connect");

    let result = session.read_message(Duration::from_millis(100)).expect("read");
    assert!(result.is_none());
}

#[test]
fn disconnect_is_idempotent() {
    let addr = spawn_echo_server();
    let mut session =
        Session::connect(addr, Registry::with_core_types(), ConnectOptions::default())
            .expect("connect");

    session.disconnect();
    assert!(!session.is_connected());
    session.disconnect();
    assert!(!session.is_connected());
}

#[test]
fn send_rejects_out_of_range_destination() {
    let addr = spawn_echo_server();
    let mut session =
        Session::connect(addr, Registry::with_core_types(), ConnectOptions::default())
            .expect("connect");

    let err = session
        .send_message(1234, &[], mm_types::limits::MAX_MODULES, 0, Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, mm_client::ClientError::InvalidDestinationModule(_)));
}
