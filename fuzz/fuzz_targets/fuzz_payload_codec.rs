//! Fuzz target: `Payload::from_wire` / `Payload::to_wire`
//!
//! The payload layout covers all 25 wire bytes with no padding, so the
//! codec must be a bijection: any 25 bytes decode, and re-encoding
//! yields the same bytes (NaN float patterns included).
//!
//! cargo fuzz run fuzz_payload_codec

#![no_main]

use libfuzzer_sys::fuzz_target;
use rclink::wire::{PAYLOAD_WIRE_SIZE, Payload};

fuzz_target!(|data: &[u8]| {
    if data.len() < PAYLOAD_WIRE_SIZE {
        return;
    }
    let mut wire = [0u8; PAYLOAD_WIRE_SIZE];
    wire.copy_from_slice(&data[..PAYLOAD_WIRE_SIZE]);

    let payload = Payload::from_wire(&wire);
    assert_eq!(payload.to_wire(), wire, "payload codec must be lossless");

    // Decoding is a pure function of the bytes.
    let again = Payload::from_wire(&wire);
    assert_eq!(again.to_wire(), wire);
});
