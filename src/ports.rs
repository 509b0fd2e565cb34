//! Collaborator ports.
//!
//! The bootloader, flash area, WASM runtime and filesystem are external
//! systems this crate does not implement — it only states their contract
//! and consumes them through a trait, the same "port" pattern the rest of
//! the core uses to stay testable without real hardware. Production
//! deployments supply real adapters; tests supply in-memory fakes.

use core::fmt;

/// Bootloader collaborator: mediates the actual slot swap on reboot.
pub trait Bootloader {
    /// Request that the bootloader boot into the newly staged slot.
    /// `test = true` requests a trial boot that must be `confirm`ed by the
    /// running application, `test = false` requests a permanent swap.
    fn request_upgrade(&mut self, test: bool) -> Result<(), BootloaderError>;
    /// Confirm the currently running (trial) image so it is not rolled back.
    fn confirm(&mut self) -> Result<(), BootloaderError>;
    /// Request a reboot. `warm = true` preserves RAM where the platform
    /// supports it.
    fn reboot(&mut self, warm: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderError {
    RequestFailed,
    ConfirmFailed,
}

impl fmt::Display for BootloaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequestFailed => write!(f, "bootloader upgrade request failed"),
            Self::ConfirmFailed => write!(f, "bootloader confirm failed"),
        }
    }
}

/// An open handle on one of the two flash slots (primary/secondary). OTA
/// writes exclusively to the secondary slot.
pub trait FlashArea {
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError>;
    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), FlashError>;
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;
    fn alignment(&self) -> u32;
    fn size(&self) -> u32;
}

/// Opens a flash slot by name. Kept separate from `FlashArea` so the handle
/// itself can be a plain trait object once opened.
pub trait FlashDriver {
    type Area: FlashArea;
    fn open_secondary(&mut self) -> Result<Self::Area, FlashError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    OpenFailed,
    EraseFailed,
    WriteFailed,
    ReadFailed,
    OutOfBounds,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed => write!(f, "flash open failed"),
            Self::EraseFailed => write!(f, "flash erase failed"),
            Self::WriteFailed => write!(f, "flash write failed"),
            Self::ReadFailed => write!(f, "flash read failed"),
            Self::OutOfBounds => write!(f, "flash access out of bounds"),
        }
    }
}

/// Opaque handle to a loaded (but not necessarily instantiated) WASM module,
/// as produced by [`WasmRuntime::load`].
pub type ModuleHandle = u64;
/// Opaque handle to a running, instantiated application container.
pub type ContainerId = u64;

/// The WASM engine: an opaque module loader + instantiator + `call_function`
/// API. This crate never inspects module internals — only the identifiers
/// this trait hands back.
pub trait WasmRuntime {
    fn load(&mut self, bytes: &[u8]) -> Result<ModuleHandle, RuntimeError>;
    fn unload(&mut self, module: ModuleHandle);
    fn install(&mut self, name: &str, bytes: &[u8]) -> Result<ContainerId, RuntimeError>;
    fn start(&mut self, container: ContainerId) -> Result<(), RuntimeError>;
    fn stop(&mut self, container: ContainerId) -> Result<(), RuntimeError>;
    fn destroy(&mut self, container: ContainerId);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    LoadFailed,
    InstallFailed,
    StartFailed,
    StopFailed,
    InvalidModule,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFailed => write!(f, "module load failed"),
            Self::InstallFailed => write!(f, "container install failed"),
            Self::StartFailed => write!(f, "container start failed"),
            Self::StopFailed => write!(f, "container stop failed"),
            Self::InvalidModule => write!(f, "invalid module bytes"),
        }
    }
}

/// Filesystem collaborator. Errors propagate as the POSIX-style negative
/// codes the rest of the core speaks, surfaced here as a typed enum instead.
pub trait Filesystem {
    fn mkdir(&mut self, path: &str) -> Result<(), FsError>;
    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError>;
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, FsError>;
    fn delete_file(&mut self, path: &str) -> Result<(), FsError>;
    fn size(&self, path: &str) -> Result<u64, FsError>;
    fn exists(&self, path: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NoSpace,
    IoError,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "file not found"),
            Self::AlreadyExists => write!(f, "file already exists"),
            Self::NoSpace => write!(f, "no space left"),
            Self::IoError => write!(f, "filesystem I/O error"),
        }
    }
}

/// Persistence for [`crate::config::SystemConfig`], mirroring the
/// `ConfigPort` the rest of the core uses for settings round-trip.
pub trait ConfigStore {
    fn load(&self) -> Result<crate::config::SystemConfig, crate::config::ConfigError>;
    fn save(&mut self, cfg: &crate::config::SystemConfig) -> Result<(), crate::config::ConfigError>;
}
