//! System configuration parameters.
//!
//! All tunables for the transport registry, buffer pool, OTA engine, module
//! cache, app manager and scheduler live here so callers have one place to
//! load/save/validate them. Persisted through [`crate::ports::ConfigStore`]
//! the same way the rest of the core reaches storage through a port trait.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Core system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Transport registry (C1) ---
    /// Handler slots per `DataType` (spec: `H_PER_TYPE`).
    pub handlers_per_type: u8,

    // --- Buffer pool (C2) ---
    /// Number of fixed-size buffers in the pool.
    pub buffer_pool_count: u8,
    /// Size in bytes of each pool buffer.
    pub buffer_pool_size: u16,
    /// Default allocation timeout, milliseconds.
    pub buffer_alloc_timeout_ms: u32,

    // --- OTA engine (C3) ---
    /// Flash write alignment in bytes.
    pub ota_write_alignment: u32,
    /// Flash page / staging buffer size in bytes.
    pub ota_page_size: u32,
    /// Size of the secondary (OTA) flash slot in bytes.
    pub ota_slot_size: u32,
    /// Emit a progress report every this many bytes written.
    pub ota_progress_report_interval: u32,
    /// Per-call completion timeout, seconds.
    pub ota_completion_timeout_secs: u32,
    /// Message-queue-full timeout, seconds.
    pub ota_queue_timeout_secs: u32,
    /// Depth of the OTA worker's message queue.
    pub ota_queue_depth: usize,

    // --- Module cache (C4) ---
    /// Maximum cached modules (spec: `M`).
    pub module_cache_size: u8,
    /// Instance map table size; must be a power of two.
    pub instance_map_capacity: u32,

    // --- App registry & manager (C5 / C6) ---
    /// Maximum number of app registry slots (spec: `N`).
    pub max_apps: u16,
    /// Maximum WASM binary size accepted at install, bytes.
    pub max_app_binary_size: u32,
    /// Maximum apps allowed to be `Running` simultaneously.
    pub max_running_apps: u16,

    // --- Cooperative scheduler (C7) ---
    /// Default task time slice, milliseconds.
    pub default_time_slice_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            handlers_per_type: 2,

            buffer_pool_count: 8,
            buffer_pool_size: 1536,
            buffer_alloc_timeout_ms: 5_000,

            ota_write_alignment: 4,
            ota_page_size: 4096,
            ota_slot_size: 1_048_576,
            ota_progress_report_interval: 8192,
            ota_completion_timeout_secs: 30,
            ota_queue_timeout_secs: 1,
            ota_queue_depth: 8,

            module_cache_size: 4,
            instance_map_capacity: 64,

            max_apps: 32,
            max_app_binary_size: 256 * 1024,
            max_running_apps: 8,

            default_time_slice_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    NotFound,
    Corrupted,
    ValidationFailed(&'static str),
    StorageFull,
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(why) => write!(f, "validation failed: {why}"),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "storage I/O error"),
        }
    }
}

/// Range-check a configuration before it is persisted. Mirrors the
/// validate-before-save discipline the rest of the core applies to anything
/// written through a `ConfigStore`.
pub fn validate_config(cfg: &SystemConfig) -> core::result::Result<(), ConfigError> {
    if cfg.handlers_per_type == 0 {
        return Err(ConfigError::ValidationFailed("handlers_per_type must be > 0"));
    }
    if cfg.buffer_pool_count == 0 {
        return Err(ConfigError::ValidationFailed("buffer_pool_count must be > 0"));
    }
    if cfg.ota_page_size == 0 || cfg.ota_write_alignment == 0 {
        return Err(ConfigError::ValidationFailed("ota page/alignment must be > 0"));
    }
    if cfg.ota_page_size % cfg.ota_write_alignment != 0 {
        return Err(ConfigError::ValidationFailed(
            "ota_page_size must be a multiple of ota_write_alignment",
        ));
    }
    if cfg.module_cache_size == 0 {
        return Err(ConfigError::ValidationFailed("module_cache_size must be > 0"));
    }
    if !cfg.instance_map_capacity.is_power_of_two() {
        return Err(ConfigError::ValidationFailed(
            "instance_map_capacity must be a power of two",
        ));
    }
    if cfg.max_apps == 0 {
        return Err(ConfigError::ValidationFailed("max_apps must be > 0"));
    }
    if cfg.max_running_apps == 0 || cfg.max_running_apps > cfg.max_apps {
        return Err(ConfigError::ValidationFailed(
            "max_running_apps must be in 1..=max_apps",
        ));
    }
    if cfg.default_time_slice_ms == 0 {
        return Err(ConfigError::ValidationFailed("default_time_slice_ms must be > 0"));
    }
    Ok(())
}
