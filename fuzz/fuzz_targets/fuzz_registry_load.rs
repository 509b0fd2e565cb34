#![no_main]

use libfuzzer_sys::fuzz_target;
use wasmcore::adapters::ram_fs::RamFilesystem;
use wasmcore::appmgr::registry::{Registry, REGISTRY_PATH};
use wasmcore::ports::Filesystem;

fuzz_target!(|data: &[u8]| {
    let mut fs = RamFilesystem::new();
    if fs.write_file(REGISTRY_PATH, data).is_ok() {
        let _ = Registry::load(&mut fs, 32);
    }
});
