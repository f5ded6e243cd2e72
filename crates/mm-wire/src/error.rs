use thiserror::Error;

/// Failures from the framing layer, per `SPEC_FULL.md` §7.
///
/// `mm-wire` never interprets payload bytes and never consults the type
/// registry; `FramingError` here covers only what the codec itself can
/// detect (an oversized declared length, a short read/write).
#[derive(Error, Debug)]
pub enum WireError {
    #[error("connection lost: {0}")]
    ConnectionLost(#[from] std::io::Error),

    #[error("peer closed connection")]
    PeerClosed,

    #[error(
        "declared payload length {declared} exceeds MAX_CONTIGUOUS_MESSAGE_DATA ({max})"
    )]
    FramingError { declared: usize, max: usize },
}
