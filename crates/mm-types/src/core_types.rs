//! Core message type ids and their fixed payload layouts.
//!
//! Mirrors `pyrtma/internal_types.py`'s `MT` table and the corresponding
//! `ctypes.Structure` payload definitions. IDs are stable and required;
//! a broker or client that doesn't recognise one of these is not
//! interoperable with the rest of a deployment.

use crate::limits::{MAX_LOGGER_FILENAME_LENGTH, MAX_MESSAGE_TYPES, MAX_MODULES};

/// Stable numeric ids for the core (non-user) message types.
pub mod ids {
    pub const EXIT: i32 = 0;
    pub const KILL: i32 = 1;
    pub const ACKNOWLEDGE: i32 = 2;
    pub const FAIL_SUBSCRIBE: i32 = 6;
    pub const FAILED_MESSAGE: i32 = 8;
    pub const CONNECT: i32 = 13;
    pub const DISCONNECT: i32 = 14;
    pub const SUBSCRIBE: i32 = 15;
    pub const UNSUBSCRIBE: i32 = 16;
    pub const MODULE_READY: i32 = 26;
    pub const SAVE_MESSAGE_LOG: i32 = 56;
    pub const MESSAGE_LOG_SAVED: i32 = 57;
    pub const PAUSE_MESSAGE_LOGGING: i32 = 58;
    pub const RESUME_MESSAGE_LOGGING: i32 = 59;
    pub const RESET_MESSAGE_LOG: i32 = 60;
    pub const DUMP_MESSAGE_LOG: i32 = 61;
    pub const TIMING_MESSAGE: i32 = 80;
    pub const FORCE_DISCONNECT: i32 = 82;
    pub const PAUSE_SUBSCRIPTION: i32 = 85;
    pub const RESUME_SUBSCRIPTION: i32 = 86;
}

/// `CONNECT` payload: `{logger_status:i16, daemon_status:i16}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Connect {
    pub logger_status: i16,
    pub daemon_status: i16,
}

impl Connect {
    pub const WIRE_SIZE: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..2].copy_from_slice(&self.logger_status.to_ne_bytes());
        buf[2..4].copy_from_slice(&self.daemon_status.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Connect {
            logger_status: i16::from_ne_bytes(buf[0..2].try_into().unwrap()),
            daemon_status: i16::from_ne_bytes(buf[2..4].try_into().unwrap()),
        }
    }
}

/// Shared shape of `SUBSCRIBE`/`UNSUBSCRIBE`/`PAUSE_SUBSCRIPTION`/
/// `RESUME_SUBSCRIPTION`: `{msg_type:i32}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SubscriptionControl {
    pub msg_type: i32,
}

impl SubscriptionControl {
    pub const WIRE_SIZE: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        self.msg_type.to_ne_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        SubscriptionControl { msg_type: i32::from_ne_bytes(buf[0..4].try_into().unwrap()) }
    }
}

/// `FAIL_SUBSCRIBE` payload: `{mod_id:i16, _:i16, msg_type:i32}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct FailSubscribe {
    pub mod_id: i16,
    pub msg_type: i32,
}

impl FailSubscribe {
    pub const WIRE_SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..2].copy_from_slice(&self.mod_id.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.msg_type.to_ne_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        FailSubscribe {
            mod_id: i16::from_ne_bytes(buf[0..2].try_into().unwrap()),
            msg_type: i32::from_ne_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// `FAILED_MESSAGE` payload: the module that should have received a message,
/// when the failure occurred, and the header of the message that failed to
/// deliver. Carries a [`crate::Header`] rather than a nested struct, since
/// the original header already encodes which header variant is in effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FailedMessage {
    pub dest_mod_id: i16,
    pub time_of_failure: f64,
    pub original_header: crate::Header,
}

impl FailedMessage {
    /// `dest_mod_id:i16 + 3x reserved i16 + time_of_failure:f64 +
    /// original_header`. The original header is embedded at its
    /// deployment-negotiated size.
    pub fn wire_size(kind: crate::HeaderKind) -> usize {
        2 + 2 * 3 + 8 + kind.wire_size()
    }

    pub fn to_bytes(self, kind: crate::HeaderKind) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::wire_size(kind));
        buf.extend_from_slice(&self.dest_mod_id.to_ne_bytes());
        buf.extend_from_slice(&[0u8; 6]); // reserved: i16 x 3
        buf.extend_from_slice(&self.time_of_failure.to_ne_bytes());
        self.original_header.encode(kind, &mut buf);
        buf
    }

    pub fn from_bytes(kind: crate::HeaderKind, buf: &[u8]) -> Self {
        FailedMessage {
            dest_mod_id: i16::from_ne_bytes(buf[0..2].try_into().unwrap()),
            time_of_failure: f64::from_ne_bytes(buf[8..16].try_into().unwrap()),
            original_header: crate::Header::decode(kind, &buf[16..16 + kind.wire_size()]),
        }
    }
}

/// `FORCE_DISCONNECT` payload: `{mod_id:i32}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ForceDisconnect {
    pub mod_id: i32,
}

impl ForceDisconnect {
    pub const WIRE_SIZE: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        self.mod_id.to_ne_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        ForceDisconnect { mod_id: i32::from_ne_bytes(buf[0..4].try_into().unwrap()) }
    }
}

/// `MODULE_READY` payload: `{pid:i32}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ModuleReady {
    pub pid: i32,
}

impl ModuleReady {
    pub const WIRE_SIZE: usize = 4;

    pub fn to_bytes(self) -> [u8; Self::WIRE_SIZE] {
        self.pid.to_ne_bytes()
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        ModuleReady { pid: i32::from_ne_bytes(buf[0..4].try_into().unwrap()) }
    }
}

/// `SAVE_MESSAGE_LOG` payload: `{pathname:char[256], length:i32}`.
#[derive(Clone, Copy, Debug)]
pub struct SaveMessageLog {
    pub pathname: [u8; MAX_LOGGER_FILENAME_LENGTH],
    pub pathname_length: i32,
}

impl SaveMessageLog {
    pub const WIRE_SIZE: usize = MAX_LOGGER_FILENAME_LENGTH + 4;

    pub fn new(pathname: &str) -> Self {
        let mut buf = [0u8; MAX_LOGGER_FILENAME_LENGTH];
        let bytes = pathname.as_bytes();
        let n = bytes.len().min(MAX_LOGGER_FILENAME_LENGTH);
        buf[..n].copy_from_slice(&bytes[..n]);
        SaveMessageLog { pathname: buf, pathname_length: n as i32 }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        out.extend_from_slice(&self.pathname);
        out.extend_from_slice(&self.pathname_length.to_ne_bytes());
        out
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut pathname = [0u8; MAX_LOGGER_FILENAME_LENGTH];
        pathname.copy_from_slice(&buf[0..MAX_LOGGER_FILENAME_LENGTH]);
        let pathname_length = i32::from_ne_bytes(
            buf[MAX_LOGGER_FILENAME_LENGTH..MAX_LOGGER_FILENAME_LENGTH + 4].try_into().unwrap(),
        );
        SaveMessageLog { pathname, pathname_length }
    }
}

/// `TIMING_MESSAGE` payload: per-type send counters and per-module pids,
/// emitted periodically by the broker (`SPEC_FULL.md` §4.D step 6).
#[derive(Clone)]
pub struct TimingMessage {
    pub timing: Box<[u16; MAX_MESSAGE_TYPES]>,
    pub module_pid: Box<[i32; MAX_MODULES as usize]>,
    pub send_time: f64,
}

impl TimingMessage {
    pub const WIRE_SIZE: usize = MAX_MESSAGE_TYPES * 2 + MAX_MODULES as usize * 4 + 8;

    pub fn zeroed() -> Self {
        TimingMessage {
            timing: Box::new([0u16; MAX_MESSAGE_TYPES]),
            module_pid: Box::new([0i32; MAX_MODULES as usize]),
            send_time: 0.0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        for t in self.timing.iter() {
            out.extend_from_slice(&t.to_ne_bytes());
        }
        for p in self.module_pid.iter() {
            out.extend_from_slice(&p.to_ne_bytes());
        }
        out.extend_from_slice(&self.send_time.to_ne_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeaderKind;

    #[test]
    fn connect_round_trip() {
        let c = Connect { logger_status: 1, daemon_status: 0 };
        assert_eq!(Connect::from_bytes(&c.to_bytes()), c);
    }

    #[test]
    fn subscription_control_round_trip() {
        let s = SubscriptionControl { msg_type: 1234 };
        assert_eq!(SubscriptionControl::from_bytes(&s.to_bytes()), s);
    }

    #[test]
    fn failed_message_round_trip() {
        let fm = FailedMessage {
            dest_mod_id: 11,
            time_of_failure: 9.5,
            original_header: crate::Header::zeroed(),
        };
        let bytes = fm.to_bytes(HeaderKind::Standard);
        assert_eq!(bytes.len(), FailedMessage::wire_size(HeaderKind::Standard));
        let back = FailedMessage::from_bytes(HeaderKind::Standard, &bytes);
        assert_eq!(back.dest_mod_id, fm.dest_mod_id);
        assert_eq!(back.time_of_failure, fm.time_of_failure);
    }

    #[test]
    fn save_message_log_truncates_and_round_trips() {
        let log = SaveMessageLog::new("/tmp/session.log");
        let bytes = log.to_bytes();
        let back = SaveMessageLog::from_bytes(&bytes);
        assert_eq!(back.pathname_length, log.pathname_length);
        assert_eq!(&back.pathname[..back.pathname_length as usize], b"/tmp/session.log");
    }

    #[test]
    fn timing_message_size_matches_wire_size() {
        let tm = TimingMessage::zeroed();
        assert_eq!(tm.to_bytes().len(), TimingMessage::WIRE_SIZE);
    }
}
