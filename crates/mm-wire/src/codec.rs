//! Blocking restatement of the wire codec (`SPEC_FULL.md` §4.B).
//!
//! These functions assume the stream is either genuinely blocking, or that
//! the caller has already observed readability/writability (the broker
//! reactor does this before calling them). A `WouldBlock` is therefore
//! treated as "not ready yet" and retried rather than surfaced, since the
//! framing guarantee promises the peer writes header and payload back to
//! back without interleaving.

use std::io::{Read, Write};

use mm_types::{Header, HeaderKind, limits::MAX_CONTIGUOUS_MESSAGE_DATA};

use crate::WireError;

fn write_all_retrying<W: Write>(w: &mut W, mut buf: &[u8]) -> Result<(), WireError> {
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => return Err(WireError::PeerClosed),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(WireError::ConnectionLost(e)),
        }
    }
    Ok(())
}

fn read_exact_retrying<R: Read>(r: &mut R, mut buf: &mut [u8]) -> Result<(), WireError> {
    while !buf.is_empty() {
        match r.read(buf) {
            Ok(0) => return Err(WireError::PeerClosed),
            Ok(n) => buf = &mut buf[n..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(WireError::ConnectionLost(e)),
        }
    }
    Ok(())
}

/// Emits `header` then `payload` back to back as one logical send.
///
/// Partial writes are retried until complete; `payload.len()` must equal
/// `header.num_data_bytes` (callers set this when filling the header).
pub fn write_message<W: Write>(
    w: &mut W,
    kind: HeaderKind,
    header: &Header,
    payload: &[u8],
) -> Result<(), WireError> {
    let mut buf = Vec::with_capacity(kind.wire_size() + payload.len());
    header.encode(kind, &mut buf);
    buf.extend_from_slice(payload);
    write_all_retrying(w, &buf)
}

/// Blocks until a full header of `kind` has been read.
pub fn read_header<R: Read>(r: &mut R, kind: HeaderKind) -> Result<Header, WireError> {
    let mut buf = vec![0u8; kind.wire_size()];
    read_exact_retrying(r, &mut buf)?;
    Ok(Header::decode(kind, &buf))
}

/// Reads exactly `num_data_bytes` (zero for signals).
///
/// Rejects `num_data_bytes > MAX_CONTIGUOUS_MESSAGE_DATA` as a framing
/// error without attempting the read (`SPEC_FULL.md` §8 boundary rule).
pub fn read_payload<R: Read>(r: &mut R, num_data_bytes: i32) -> Result<Vec<u8>, WireError> {
    let len = num_data_bytes.max(0) as usize;
    if len > MAX_CONTIGUOUS_MESSAGE_DATA {
        return Err(WireError::FramingError { declared: len, max: MAX_CONTIGUOUS_MESSAGE_DATA });
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; len];
    read_exact_retrying(r, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let header = Header {
            msg_type: 1234,
            msg_count: 1,
            send_time: 1.0,
            recv_time: 0.0,
            src_host_id: 0,
            src_mod_id: 11,
            dest_host_id: 0,
            dest_mod_id: 0,
            num_data_bytes: 4,
            remaining_bytes: 0,
            is_dynamic: 0,
            reserved: 0,
            utc_seconds: 0,
            utc_fraction: 0,
        };
        let payload = [1u8, 2, 3, 4];

        let mut buf = Vec::new();
        write_message(&mut buf, HeaderKind::Standard, &header, &payload).unwrap();
        assert_eq!(buf.len(), HeaderKind::Standard.wire_size() + 4);

        let mut cursor = Cursor::new(buf);
        let decoded_header = read_header(&mut cursor, HeaderKind::Standard).unwrap();
        assert_eq!(decoded_header, header);
        let decoded_payload = read_payload(&mut cursor, decoded_header.num_data_bytes).unwrap();
        assert_eq!(decoded_payload, payload);
    }

    #[test]
    fn zero_length_payload_reads_nothing() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let payload = read_payload(&mut cursor, 0).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn oversized_payload_is_framing_error() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_payload(&mut cursor, MAX_CONTIGUOUS_MESSAGE_DATA as i32 + 1).unwrap_err();
        assert!(matches!(err, WireError::FramingError { .. }));
    }

    #[test]
    fn short_read_is_peer_closed() {
        let mut cursor = Cursor::new(vec![0u8; 2]);
        let err = read_payload(&mut cursor, 10).unwrap_err();
        assert!(matches!(err, WireError::PeerClosed));
    }
}
