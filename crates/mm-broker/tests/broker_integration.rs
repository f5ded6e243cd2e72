//! End-to-end scenarios against a real `Broker`, driven by real
//! `mm_client::Session` connections over loopback TCP, per `SPEC_FULL.md`
//! §8's boundary-behaviour list. Mirrors the hand-rolled-server pattern in
//! `mm-client/tests/session_roundtrip.rs`, but here the server under test
//! is the broker itself rather than a stand-in.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mm_broker::{Broker, BrokerConfig};
use mm_client::{ConnectOptions, Session};
use mm_types::{Registry, TypeDescriptor, ids};

const TEST_TYPE: i32 = 1234;

/// Owns a live broker thread; stops it and joins on drop, exercising the
/// same "stop the loop, exit clean" path `main.rs`'s ctrlc handler drives.
struct TestBroker {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TestBroker {
    fn spawn() -> Self {
        let mut broker = Broker::bind(BrokerConfig::default()).expect("bind broker");
        let addr = broker.local_addr().expect("local_addr");
        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            broker.run(|| loop_flag.load(Ordering::SeqCst)).expect("broker run");
        });
        TestBroker { addr, running, handle: Some(handle) }
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn registry_with_test_type() -> Registry {
    let mut registry = Registry::with_core_types();
    registry.register(TypeDescriptor::new(TEST_TYPE, "TEST_TYPE", 4)).unwrap();
    registry
}

fn connect(broker: &TestBroker, registry: Registry, logger: bool) -> Session {
    let opts = ConnectOptions { logger_status: logger, ..ConnectOptions::default() };
    Session::connect(broker.addr, registry, opts).expect("connect")
}

#[test]
fn pubsub_round_trip() {
    let broker = TestBroker::spawn();
    let mut sub = connect(&broker, registry_with_test_type(), false);
    let mut publ = connect(&broker, registry_with_test_type(), false);
    sub.subscribe([TEST_TYPE]).expect("subscribe");

    publ.send_message(TEST_TYPE, &1i32.to_ne_bytes(), 0, 0, Duration::from_millis(500))
        .expect("send");

    let msg = sub
        .read_message(Duration::from_secs(1))
        .expect("read")
        .expect("message arrived");
    assert_eq!(msg.header.msg_type, TEST_TYPE);
    assert_eq!(msg.payload, 1i32.to_ne_bytes());
}

#[test]
fn destination_narrowing_reaches_only_named_module() {
    let broker = TestBroker::spawn();
    let mut a = connect(&broker, registry_with_test_type(), false);
    let mut b = connect(&broker, registry_with_test_type(), false);
    let mut publ = connect(&broker, registry_with_test_type(), false);
    a.subscribe([TEST_TYPE]).expect("subscribe a");
    b.subscribe([TEST_TYPE]).expect("subscribe b");

    let target = a.module_id();
    publ.send_message(TEST_TYPE, &[], target, 0, Duration::from_millis(500)).expect("send");

    let msg = a.read_message(Duration::from_secs(1)).expect("read").expect("a receives");
    assert_eq!(msg.header.msg_type, TEST_TYPE);

    let none = b.read_message(Duration::from_millis(200)).expect("read");
    assert!(none.is_none(), "b is not the narrowed destination and must not receive it");
}

#[test]
fn logger_receives_without_subscribing() {
    let broker = TestBroker::spawn();
    let mut logger = connect(&broker, registry_with_test_type(), true);
    let mut publ = connect(&broker, registry_with_test_type(), false);

    publ.send_message(TEST_TYPE, &[], 0, 0, Duration::from_millis(500)).expect("send");

    let msg =
        logger.read_message(Duration::from_secs(1)).expect("read").expect("logger receives");
    assert_eq!(msg.header.msg_type, TEST_TYPE);
}

#[test]
fn narrowed_delivery_to_unknown_module_yields_failed_message() {
    let broker = TestBroker::spawn();
    // FAILED_MESSAGE is already a core type in `Registry::with_core_types`.
    let mut watcher = connect(&broker, registry_with_test_type(), false);
    watcher.subscribe([ids::FAILED_MESSAGE]).expect("subscribe to FAILED_MESSAGE");
    let mut publ = connect(&broker, registry_with_test_type(), false);

    // No client holds this module id, so the narrowed send can never be
    // written and the broker must synthesise a FAILED_MESSAGE instead.
    let unused_module_id = 199;
    publ.send_message(TEST_TYPE, &[], unused_module_id, 0, Duration::from_millis(500))
        .expect("send");

    let msg = watcher
        .read_message(Duration::from_secs(1))
        .expect("read")
        .expect("failed message observed");
    assert_eq!(msg.header.msg_type, ids::FAILED_MESSAGE);
    assert_eq!(msg.header.dest_mod_id, 0, "FAILED_MESSAGE broadcasts rather than narrow-routes");
}

#[test]
fn pause_then_resume_subscription() {
    let broker = TestBroker::spawn();
    let mut sub = connect(&broker, registry_with_test_type(), false);
    let mut publ = connect(&broker, registry_with_test_type(), false);
    sub.subscribe([TEST_TYPE]).expect("subscribe");

    publ.send_message(TEST_TYPE, &[], 0, 0, Duration::from_millis(500)).expect("send 1");
    sub.read_message(Duration::from_secs(1)).expect("read").expect("first delivery");

    sub.pause_subscription([TEST_TYPE]).expect("pause");
    for _ in 0..3 {
        publ.send_message(TEST_TYPE, &[], 0, 0, Duration::from_millis(500)).expect("send while paused");
        let none = sub.read_message(Duration::from_millis(200)).expect("read");
        assert!(none.is_none(), "paused subscriber must not receive");
    }

    sub.resume_subscription([TEST_TYPE]).expect("resume");
    publ.send_message(TEST_TYPE, &[], 0, 0, Duration::from_millis(500)).expect("send after resume");
    let msg = sub.read_message(Duration::from_secs(1)).expect("read").expect("resumed delivery");
    assert_eq!(msg.header.msg_type, TEST_TYPE);

    let extra = sub.read_message(Duration::from_millis(100)).expect("read");
    assert!(extra.is_none(), "exactly one message expected after resume");
}

#[test]
fn clean_shutdown_drops_subscriber_from_table() {
    let broker = TestBroker::spawn();
    let mut a = connect(&broker, registry_with_test_type(), false);
    a.subscribe([ids::EXIT]).expect("subscribe to EXIT");

    let mut publ = connect(&broker, registry_with_test_type(), false);
    publ.send_signal(ids::EXIT, 0, 0, Duration::from_millis(500)).expect("send EXIT");

    let msg = a.read_message(Duration::from_secs(1)).expect("read").expect("EXIT observed");
    assert_eq!(msg.header.msg_type, ids::EXIT);

    a.disconnect();
    assert!(!a.is_connected());

    // A fresh publish of the same type must not reach the now-disconnected
    // client via some stale subscription-table entry.
    publ.send_signal(ids::EXIT, 0, 0, Duration::from_millis(500)).expect("send EXIT again");
    thread::sleep(Duration::from_millis(100));
}
