#![no_main]

use libfuzzer_sys::fuzz_target;
use wasmcore::appmgr::Manifest;

fuzz_target!(|data: &[u8]| {
    let _ = Manifest::parse(data, "fuzz-app");
});
