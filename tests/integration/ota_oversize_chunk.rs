//! S2 — an oversize chunk is rejected cleanly, leaves the engine in
//! `Receiving` with no bytes accepted, and a following `abort` still works.

use wasmcore::adapters::sim_flash::{SimBootloader, SimFlashDriver};
use wasmcore::ota::{OtaEngine, OtaError, OtaState};

#[test]
fn oversize_chunk_is_rejected_without_disturbing_state() {
    let engine = OtaEngine::new(
        SimFlashDriver::new(1_048_576, 4),
        SimBootloader::default(),
        4096,
        8192,
    );

    engine.start_update(1000).unwrap();

    let err = engine.write_chunk(&vec![0u8; 2000]).unwrap_err();
    assert_eq!(err, OtaError::InsufficientSpace);

    let status = engine.get_progress();
    assert_eq!(status.state, OtaState::Receiving);
    assert_eq!(status.bytes_written, 0);

    engine.abort().unwrap();
    assert_eq!(engine.get_progress().state, OtaState::Idle);
}
