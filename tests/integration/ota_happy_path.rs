//! S1 — happy-path OTA update of a 132 000-byte image over HTTP-sized
//! chunks, driven end to end through the public `OtaEngine` API.

use wasmcore::adapters::sim_flash::{SimBootloader, SimFlashDriver};
use wasmcore::ota::{OtaEngine, OtaState, FIRMWARE_MAGIC};

#[test]
fn happy_path_ota_reaches_complete_with_exact_byte_count() {
    let engine = OtaEngine::new(
        SimFlashDriver::new(1_048_576, 4),
        SimBootloader::default(),
        4096,
        8192,
    );

    let mut image = vec![0xABu8; 132_000];
    image[0..4].copy_from_slice(&FIRMWARE_MAGIC);

    engine.start_update(132_000).unwrap();
    assert_eq!(engine.get_progress().state, OtaState::Receiving);
    assert_eq!(engine.get_progress().percentage, 0);

    let mut chunks = image.chunks(4096);
    for _ in 0..32 {
        let chunk = chunks.next().unwrap();
        assert_eq!(chunk.len(), 4096);
        engine.write_chunk(chunk).unwrap();
    }
    let last = chunks.next().unwrap();
    assert_eq!(last.len(), 928);
    assert!(chunks.next().is_none());
    engine.write_chunk(last).unwrap();

    assert_eq!(engine.get_progress().bytes_written, 132_000);
    assert_eq!(engine.get_progress().state, OtaState::Receiving);

    engine.finalize().unwrap();

    let status = engine.get_progress();
    assert_eq!(status.state, OtaState::Complete);
    assert_eq!(status.bytes_written, 132_000);
    assert_eq!(status.percentage, 100);
}
