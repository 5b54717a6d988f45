//! Fuzz target for framed reads: arbitrary inbound streams, including
//! truncated bodies and oversized length prefixes.
//!
//! Usage:
//!   cargo fuzz run fuzz_read_frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use p2p::read_envelope;

const MAX_FRAME: usize = 64 * 1024;

fuzz_target!(|data: &[u8]| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let mut reader = data;
        let _ = read_envelope(&mut reader, MAX_FRAME).await;
    });
});
