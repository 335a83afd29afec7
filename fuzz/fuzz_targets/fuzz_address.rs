//! Fuzz target: generic address construction and classification
//!
//! Arbitrary byte strings become addresses (or are refused), and every
//! accepted address must satisfy the length bound, survive the 6-byte
//! wire field round trip where applicable, and format without panicking.
//!
//! cargo fuzz run fuzz_address

#![no_main]

use libfuzzer_sys::fuzz_target;
use rclink::addr::{Address, MAX_ADDR_LEN};

fuzz_target!(|data: &[u8]| {
    match Address::from_bytes(data) {
        Some(addr) => {
            assert!(!data.is_empty() && data.len() <= MAX_ADDR_LEN);
            assert!(addr.is_valid());
            assert_eq!(addr.len(), data.len());
            assert_eq!(addr.as_bytes(), data);

            // Wire projection is always 6 bytes, zero padded.
            let field = addr.to_wire();
            let copied = addr.len().min(6);
            assert_eq!(&field[..copied], &data[..copied]);

            // Display is used in logs on every adoption; must not panic.
            let shown = format!("{addr}");
            assert!(!shown.is_empty());
        }
        None => assert!(data.is_empty() || data.len() > MAX_ADDR_LEN),
    }

    // The clamping constructor accepts any used length.
    if data.len() >= 7 {
        let mut field = [0u8; 6];
        field.copy_from_slice(&data[..6]);
        let addr = Address::from_wire(&field, data[6] as usize);
        assert!(addr.is_valid());
        assert!(addr.len() <= 6);
    }
});
