#![no_main]

use dvbsat_rs::frame::DvbFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic; a successful parse must re-pack without
    // panicking either.
    if let Ok(frame) = DvbFrame::from_bytes(data) {
        let _ = frame.pack();
    }
});
