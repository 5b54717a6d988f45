//! Fuzz target for envelope body decoding.
//!
//! Any byte string must either decode into an envelope that re-encodes to an
//! equal envelope, or be rejected with a `DecodeError`. Never a panic.
//!
//! Usage:
//!   cargo fuzz run fuzz_decode_envelope

#![no_main]

use libfuzzer_sys::fuzz_target;
use p2p::{decode_envelope, encode_envelope};

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = decode_envelope(data) {
        let encoded = encode_envelope(&envelope).expect("decoded envelope re-encodes");
        let again = decode_envelope(&encoded).expect("re-encoded envelope decodes");
        assert_eq!(envelope, again);
    }
});
