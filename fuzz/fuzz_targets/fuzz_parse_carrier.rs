#![no_main]

use dvbsat_rs::carrier::parse_carrier;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // The carrier envelope parser feeds the frame parser; neither may
    // panic on arbitrary datagrams.
    let _ = parse_carrier(data);
});
