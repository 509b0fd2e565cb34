//! Crash logging and runtime diagnostics.
//!
//! Stores up to [`DIAG_RING_SLOTS`] crash records as small files under the
//! `diag/` path prefix through the [`Filesystem`] port, the same persistence
//! seam the app registry uses. A custom panic handler writes a record before
//! the process would otherwise simply abort.

use serde::{Deserialize, Serialize};

use crate::ports::Filesystem;

pub const DIAG_RING_SLOTS: usize = 4;
const INDEX_PATH: &str = "diag/write_index";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppCrashRecord {
    pub app_id: u16,
    pub at: u64,
    pub reason: heapless::String<64>,
}

impl AppCrashRecord {
    pub fn new(app_id: u16, at: u64, reason: &str) -> Self {
        let mut r = heapless::String::new();
        let _ = r.push_str(&reason[..reason.len().min(63)]);
        Self { app_id, at, reason: r }
    }
}

/// Filesystem-backed ring buffer of the most recent crash records.
#[derive(Default)]
pub struct CrashLog {
    write_index: usize,
}

impl CrashLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the write index from storage, or default to 0 if absent.
    pub fn init(&mut self, fs: &dyn Filesystem) {
        if let Ok(bytes) = fs.read_file(INDEX_PATH) {
            if let Ok(raw) = <[u8; 4]>::try_from(bytes.as_slice()) {
                self.write_index = u32::from_le_bytes(raw) as usize % DIAG_RING_SLOTS;
            }
        }
    }

    pub fn write_entry(&mut self, fs: &mut dyn Filesystem, entry: &AppCrashRecord) {
        let slot_path = Self::slot_path(self.write_index);
        if let Ok(bytes) = postcard::to_allocvec(entry) {
            let _ = fs.write_file(&slot_path, &bytes);
        }
        self.write_index = (self.write_index + 1) % DIAG_RING_SLOTS;
        let _ = fs.write_file(INDEX_PATH, &(self.write_index as u32).to_le_bytes());
    }

    pub fn read_all(&self, fs: &dyn Filesystem) -> Vec<AppCrashRecord> {
        (0..DIAG_RING_SLOTS)
            .filter_map(|i| fs.read_file(&Self::slot_path(i)).ok())
            .filter_map(|bytes| postcard::from_bytes::<AppCrashRecord>(&bytes).ok())
            .collect()
    }

    pub fn clear(&mut self, fs: &mut dyn Filesystem) {
        for i in 0..DIAG_RING_SLOTS {
            let _ = fs.delete_file(&Self::slot_path(i));
        }
        let _ = fs.delete_file(INDEX_PATH);
        self.write_index = 0;
    }

    pub fn count(&self, fs: &dyn Filesystem) -> usize {
        (0..DIAG_RING_SLOTS).filter(|i| fs.exists(&Self::slot_path(*i))).count()
    }

    fn slot_path(index: usize) -> String {
        format!("diag/crash_{index}")
    }
}

/// Runtime diagnostics snapshot collected on-demand, combining scheduler and
/// cache counters the rest of the core already tracks.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeMetrics {
    pub uptime_secs: u64,
    pub scheduler_ticks: u64,
    pub preemptions: u32,
    pub apps_running: u16,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl RuntimeMetrics {
    pub fn collect(
        uptime_secs: u64,
        scheduler_ticks: u64,
        preemptions: u32,
        apps_running: u16,
        cache_hits: u64,
        cache_misses: u64,
    ) -> Self {
        Self { uptime_secs, scheduler_ticks, preemptions, apps_running, cache_hits, cache_misses }
    }
}

/// Install a panic hook that logs the reason. Persisting to the crash ring
/// buffer from panic context requires a concrete `Filesystem` already
/// reachable without unwinding, which is deployment-specific; hosts that can
/// provide one should instead call [`CrashLog::write_entry`] from their own
/// panic hook built around this one.
pub fn install_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        let reason = if let Some(msg) = info.payload().downcast_ref::<&str>() {
            *msg
        } else if let Some(msg) = info.payload().downcast_ref::<String>() {
            msg.as_str()
        } else {
            "unknown panic"
        };
        log::error!("PANIC: {reason}");
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ram_fs::RamFilesystem;

    #[test]
    fn crash_log_starts_at_zero() {
        let log = CrashLog::new();
        assert_eq!(log.write_index, 0);
    }

    #[test]
    fn write_and_read_single_entry() {
        let mut fs = RamFilesystem::new();
        let mut log = CrashLog::new();
        let entry = AppCrashRecord::new(3, 42, "test panic");

        log.write_entry(&mut fs, &entry);
        let entries = log.read_all(&fs);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].at, 42);
        assert_eq!(entries[0].app_id, 3);
    }

    #[test]
    fn ring_buffer_wraps() {
        let mut fs = RamFilesystem::new();
        let mut log = CrashLog::new();

        for i in 0..6 {
            log.write_entry(&mut fs, &AppCrashRecord::new(1, i as u64, &format!("crash_{i}")));
        }
        let entries = log.read_all(&fs);
        assert_eq!(entries.len(), DIAG_RING_SLOTS);
    }

    #[test]
    fn clear_erases_all() {
        let mut fs = RamFilesystem::new();
        let mut log = CrashLog::new();

        log.write_entry(&mut fs, &AppCrashRecord::new(1, 1, "x"));
        log.write_entry(&mut fs, &AppCrashRecord::new(2, 2, "y"));
        log.clear(&mut fs);

        assert_eq!(log.read_all(&fs).len(), 0);
        assert_eq!(log.write_index, 0);
    }

    #[test]
    fn crash_entry_truncates_long_reason() {
        let long = "a".repeat(200);
        let entry = AppCrashRecord::new(1, 0, &long);
        assert!(entry.reason.len() <= 63);
    }

    #[test]
    fn count_matches_entries() {
        let mut fs = RamFilesystem::new();
        let mut log = CrashLog::new();

        assert_eq!(log.count(&fs), 0);
        log.write_entry(&mut fs, &AppCrashRecord::new(1, 1, "a"));
        assert_eq!(log.count(&fs), 1);
        log.write_entry(&mut fs, &AppCrashRecord::new(2, 2, "b"));
        assert_eq!(log.count(&fs), 2);
    }
}
