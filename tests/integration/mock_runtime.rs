//! Shared `WasmRuntime` test double for the app-manager integration tests.
//!
//! Records every call so tests can assert on the install/start/stop history,
//! and can be configured to fail its next `install` to exercise the
//! auto-restart path without touching a real WASM engine.

use wasmcore::ports::{ContainerId, ModuleHandle, RuntimeError, WasmRuntime};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Install(String),
    Start(ContainerId),
    Stop(ContainerId),
    Destroy(ContainerId),
}

pub struct RecordingRuntime {
    pub calls: Vec<RuntimeCall>,
    pub fail_next_install: bool,
    next_container: ContainerId,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self { calls: Vec::new(), fail_next_install: false, next_container: 0 }
    }
}

impl Default for RecordingRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl WasmRuntime for RecordingRuntime {
    fn load(&mut self, _bytes: &[u8]) -> Result<ModuleHandle, RuntimeError> {
        Ok(1)
    }

    fn unload(&mut self, _module: ModuleHandle) {}

    fn install(&mut self, name: &str, _bytes: &[u8]) -> Result<ContainerId, RuntimeError> {
        self.calls.push(RuntimeCall::Install(name.to_string()));
        if self.fail_next_install {
            self.fail_next_install = false;
            return Err(RuntimeError::InstallFailed);
        }
        self.next_container += 1;
        Ok(self.next_container)
    }

    fn start(&mut self, container: ContainerId) -> Result<(), RuntimeError> {
        self.calls.push(RuntimeCall::Start(container));
        Ok(())
    }

    fn stop(&mut self, container: ContainerId) -> Result<(), RuntimeError> {
        self.calls.push(RuntimeCall::Stop(container));
        Ok(())
    }

    fn destroy(&mut self, container: ContainerId) {
        self.calls.push(RuntimeCall::Destroy(container));
    }
}
