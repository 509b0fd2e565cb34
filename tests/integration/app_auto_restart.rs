//! S4 — an app configured with `restart{enabled, max_retries:3}` crashes
//! repeatedly and cycles through the full auto-restart budget, landing on
//! `Failed` with `crash_count` pinned at 3; an explicit `start` afterwards
//! clears the budget and re-enters the cycle.
//!
//! `transition_error` is the method a crash detector (scheduler supervisor,
//! runtime trap handler) calls when it observes a running app die — driving
//! it directly here plays that role without needing a real crashing guest.

mod mock_runtime;
use mock_runtime::RecordingRuntime;

use wasmcore::adapters::ram_fs::RamFilesystem;
use wasmcore::appmgr::registry::{AppSource, AppState};
use wasmcore::appmgr::AppManager;
use wasmcore::config::SystemConfig;

#[test]
fn crash_loop_exhausts_restart_budget_then_fails() {
    let mut mgr =
        AppManager::new(RamFilesystem::new(), RecordingRuntime::new(), SystemConfig::default()).unwrap();

    let mut binary = b"\0asm\x01\x00\x00\x00".to_vec();
    binary.resize(200, 0x11);
    let manifest = br#"{"restart": {"enabled": true, "max_retries": 3, "delay_ms": 100}}"#;
    mgr.install("crashy", &binary, Some(manifest), AppSource::Http, 0).unwrap();
    assert_eq!(mgr.get_state("crashy"), Some(AppState::Installed));

    mgr.start("crashy", 0).unwrap();
    assert_eq!(mgr.get_state("crashy"), Some(AppState::Running));
    assert_eq!(mgr.registry().find_by_name("crashy").unwrap().crash_count, 0);

    // Three crashes, each one restarting automatically (runtime always
    // succeeds) and landing back in Running with crash_count incremented.
    for expected_crash_count in 1u16..=3 {
        mgr.transition_error("crashy").unwrap();
        assert_eq!(mgr.get_state("crashy"), Some(AppState::Running));
        assert_eq!(mgr.registry().find_by_name("crashy").unwrap().crash_count, expected_crash_count);
    }

    // A fourth crash exceeds the budget: no further restart, terminal Failed.
    mgr.transition_error("crashy").unwrap();
    assert_eq!(mgr.get_state("crashy"), Some(AppState::Failed));
    assert_eq!(mgr.registry().find_by_name("crashy").unwrap().crash_count, 3);

    // An explicit start clears crash_count and re-enters the cycle.
    mgr.start("crashy", 1).unwrap();
    assert_eq!(mgr.get_state("crashy"), Some(AppState::Running));
    assert_eq!(mgr.registry().find_by_name("crashy").unwrap().crash_count, 0);
}
