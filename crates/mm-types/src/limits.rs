//! Broker-wide constants. Values match the deployment this protocol was
//! modelled on; none of them are wire-critical in themselves, but a broker
//! and its clients must agree on `MAX_MODULES`/`DYN_MOD_ID_START` to avoid
//! colliding dynamic module id assignment.

/// Upper bound (exclusive) on the number of simultaneously connected modules.
pub const MAX_MODULES: i16 = 200;
/// First id handed out by dynamic module id assignment.
pub const DYN_MOD_ID_START: i16 = 100;
/// Upper bound (exclusive) on distinct host ids in a deployment.
pub const MAX_HOSTS: i16 = 5;
/// Upper bound (exclusive) on registered message type ids tracked by
/// `TIMING_MESSAGE`'s per-type counters.
pub const MAX_MESSAGE_TYPES: usize = 10_000;
/// Largest payload the broker will read without treating the header as
/// malformed.
pub const MAX_CONTIGUOUS_MESSAGE_DATA: usize = 9_000;
/// Fixed width of `SaveMessageLog::pathname`.
pub const MAX_LOGGER_FILENAME_LENGTH: usize = 256;

/// Default `type_id` below which a type is considered "core" rather than
/// user-registered. Configurable per [`crate::Registry::with_threshold`].
pub const CORE_TYPE_ID_THRESHOLD: i32 = 100;

/// Type-id threshold used by the original deployment to distinguish
/// contiguous stream payloads; carried for parity, unused by forwarding
/// logic itself.
pub const MIN_STREAM_TYPE: i32 = 9_000;

/// Largest well-known (non-dynamic) module id reserved by the original
/// deployment's fixed module roster.
pub const MAX_LSB_MODULE_ID: i16 = 9;

pub const MID_MESSAGE_MANAGER: i16 = 0;
pub const MID_COMMAND_MODULE: i16 = 1;
pub const MID_APPLICATION_MODULE: i16 = 2;
pub const MID_NETWORK_RELAY: i16 = 3;
pub const MID_STATUS_MODULE: i16 = 4;
pub const MID_QUICKLOGGER: i16 = 5;

pub const HID_LOCAL_HOST: i16 = 0;
pub const HID_ALL_HOSTS: i16 = 0x7FFF;
pub const ALL_MESSAGE_TYPES: i32 = 0x7FFF_FFFF;

/// Default TCP port the broker listens on.
pub const DEFAULT_PORT: u16 = 7111;
/// Default outer readability poll interval of the broker reactor.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;
/// Default minimum spacing between `TIMING_MESSAGE` emissions.
pub const DEFAULT_MIN_TIMING_PERIOD_MS: u64 = 900;
/// Default deadline for a client's `connect()` to receive its ACK.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
/// Default deadline `disconnect()` waits for an ACK before closing anyway.
pub const DEFAULT_DISCONNECT_ACK_TIMEOUT_MS: u64 = 500;
