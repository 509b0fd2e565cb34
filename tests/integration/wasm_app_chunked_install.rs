//! S3 — a 40 000-byte WASM binary installed through the chunked session
//! API in 17 uneven chunks, with a manifest supplying name/version/limits.

mod mock_runtime;
use mock_runtime::RecordingRuntime;

use wasmcore::adapters::ram_fs::RamFilesystem;
use wasmcore::appmgr::registry::{AppSource, AppState};
use wasmcore::appmgr::AppManager;
use wasmcore::config::SystemConfig;
use wasmcore::ports::Filesystem;

#[test]
fn chunked_install_produces_one_entry_and_a_binary_file() {
    let mut mgr = AppManager::new(RamFilesystem::new(), RecordingRuntime::new(), SystemConfig::default()).unwrap();

    let mut binary = b"\0asm\x01\x00\x00\x00".to_vec();
    binary.resize(40_000, 0x42);

    let manifest = br#"{"name":"blink","version":"1.2.0","heap_kb":64,"stack_kb":8}"#;

    let session = mgr.install_begin("blink", binary.len() as u32, AppSource::Http).unwrap();
    assert_eq!(session, 0);

    let mut chunks = Vec::new();
    for _ in 0..16 {
        chunks.push(2048usize);
    }
    chunks.push(7232);
    assert_eq!(chunks.len(), 17);
    assert_eq!(chunks.iter().sum::<usize>(), binary.len());

    let mut offset = 0;
    for len in chunks {
        mgr.install_chunk(session, &binary[offset..offset + len]).unwrap();
        offset += len;
    }

    let id = mgr.install_end(session, Some(manifest), 0).unwrap();
    assert!(id > 0);

    let apps = mgr.list();
    assert_eq!(apps.len(), 1);
    let app = &apps[0];
    assert_eq!(app.name, "blink");
    assert_eq!(app.version, "1.2.0");
    assert_eq!(app.size, 40_000);
    assert_eq!(app.state, AppState::Installed);

    let path = mgr.registry().get(id).unwrap().binary_path();
    assert_eq!(path, "apps/001_blink.wasm");
    assert_eq!(mgr.fs().read_file(&path).unwrap().len(), 40_000);
}
