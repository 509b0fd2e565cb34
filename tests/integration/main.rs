//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to one of the end-to-end scenarios: the full
//! OTA engine, the chunked app-install path, the auto-restart loop, the
//! scheduler, and the transport dispatcher, each driven the way a real
//! caller would rather than through a single module's unit tests.

mod mock_runtime;
mod ota_happy_path;
mod ota_oversize_chunk;
mod wasm_app_chunked_install;
mod app_auto_restart;
mod scheduler_round_robin;
mod transport_dual_consumer;
