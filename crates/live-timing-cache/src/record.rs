//! Fixed-width on-disk representation of a [`Packet`].
//!
//! Each record is `car, kind, data, len` as little-endian `i32`s, `at` as
//! a little-endian `i64`, followed by the full payload buffer. The
//! layout is stable across platforms, unlike the original's raw
//! `fwrite`/`fread` of the in-memory `struct Packet`.

use live_timing_protocol::{Packet, PAYLOAD_CAPACITY};

/// Byte size of one serialized packet record.
pub const RECORD_SIZE: usize = 4 + 4 + 4 + 4 + 8 + PAYLOAD_CAPACITY;

pub fn encode(packet: &Packet, into: &mut [u8; RECORD_SIZE]) {
    into[0..4].copy_from_slice(&packet.car.to_le_bytes());
    into[4..8].copy_from_slice(&packet.kind.to_le_bytes());
    into[8..12].copy_from_slice(&packet.data.to_le_bytes());
    into[12..16].copy_from_slice(&packet.len.to_le_bytes());
    into[16..24].copy_from_slice(&packet.at.to_le_bytes());
    into[24..24 + PAYLOAD_CAPACITY].copy_from_slice(&packet.payload);
}

pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Packet {
    let car = i32::from_le_bytes(bytes[0..4].try_into().expect("slice is 4 bytes"));
    let kind = i32::from_le_bytes(bytes[4..8].try_into().expect("slice is 4 bytes"));
    let data = i32::from_le_bytes(bytes[8..12].try_into().expect("slice is 4 bytes"));
    let len = i32::from_le_bytes(bytes[12..16].try_into().expect("slice is 4 bytes"));
    let at = i64::from_le_bytes(bytes[16..24].try_into().expect("slice is 8 bytes"));
    let payload = &bytes[24..24 + PAYLOAD_CAPACITY];
    let mut p = Packet::new(car, kind, data, len, at, payload);
    // Packet::new only copies up to `len` bytes; restore the full
    // zero-padded tail exactly as stored, matching the original's
    // whole-struct fwrite/fread semantics.
    p.payload.copy_from_slice(payload);
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrips() {
        let p = Packet::new(3, 2, 1, 5, 123456, b"hello");
        let mut buf = [0u8; RECORD_SIZE];
        encode(&p, &mut buf);
        let got = decode(&buf);
        assert_eq!(got, p);
    }
}
