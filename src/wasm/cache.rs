//! Content-addressed module cache with LRU eviction.
//!
//! A fixed-size array of `CacheEntry`, sized to `M` (typically 4). Lookup is
//! a linear scan — the array is small by configuration, so this stays O(M)
//! in practice rather than needing a hash index. The cache key is a
//! cryptographic digest of the module's binary bytes; two stores of the
//! same digest share the entry and bump `ref_count`.

use core::fmt;

use log::warn;

use crate::ports::{ModuleHandle, WasmRuntime};

pub type ModuleHash = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    NotFound,
    Full,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "module not in cache"),
            Self::Full => write!(f, "cache full, nothing evictable"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    hash: ModuleHash,
    module: ModuleHandle,
    ref_count: u32,
    binary_size: u32,
    load_time_ms: u32,
    last_used_ms: u64,
    used: bool,
}

impl CacheEntry {
    const EMPTY: CacheEntry = CacheEntry {
        hash: [0u8; 32],
        module: 0,
        ref_count: 0,
        binary_size: 0,
        load_time_ms: 0,
        last_used_ms: 0,
        used: false,
    };
}

pub struct ModuleCache {
    entries: Vec<CacheEntry>,
    hits: u64,
    misses: u64,
}

impl ModuleCache {
    pub fn new(capacity: u8) -> Self {
        Self { entries: vec![CacheEntry::EMPTY; capacity as usize], hits: 0, misses: 0 }
    }

    /// Look up `hash`. On hit, increments `ref_count` and refreshes
    /// `last_used_ms`; the caller is handed the module handle to instantiate
    /// from.
    pub fn lookup(&mut self, hash: &ModuleHash, now_ms: u64) -> Option<ModuleHandle> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.used && &e.hash == hash) {
            entry.ref_count += 1;
            entry.last_used_ms = now_ms;
            self.hits += 1;
            Some(entry.module)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Store a freshly loaded module. If `hash` is already present
    /// (deduplication), increments its `ref_count` instead of taking a new
    /// slot. Otherwise picks a slot by precedence: first empty, then LRU
    /// among `ref_count == 0` entries, then LRU overall (logged as evicting
    /// a referenced module — its prior handle is leaked to whatever
    /// instances still reference it rather than unloaded).
    pub fn store(
        &mut self,
        hash: ModuleHash,
        module: ModuleHandle,
        binary_size: u32,
        load_time_ms: u32,
        now_ms: u64,
        runtime: &mut dyn WasmRuntime,
    ) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.used && e.hash == hash) {
            entry.ref_count += 1;
            entry.last_used_ms = now_ms;
            return;
        }

        let slot = self.pick_eviction_slot();
        let evicted = self.entries[slot];
        if evicted.used && evicted.ref_count == 0 {
            runtime.unload(evicted.module);
        } else if evicted.used {
            warn!(
                "wasm cache: evicting referenced module (ref_count={}), handle leaked",
                evicted.ref_count
            );
        }

        self.entries[slot] = CacheEntry {
            hash,
            module,
            ref_count: 1,
            binary_size,
            load_time_ms,
            last_used_ms: now_ms,
            used: true,
        };
    }

    /// Decrement `ref_count` for `hash`. The entry remains cached until
    /// naturally evicted by a future `store`.
    pub fn release(&mut self, hash: &ModuleHash) -> Result<(), CacheError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.used && &e.hash == hash)
            .ok_or(CacheError::NotFound)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        Ok(())
    }

    pub fn ref_count(&self, hash: &ModuleHash) -> Option<u32> {
        self.entries.iter().find(|e| e.used && &e.hash == hash).map(|e| e.ref_count)
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn pick_eviction_slot(&self) -> usize {
        if let Some(idx) = self.entries.iter().position(|e| !e.used) {
            return idx;
        }
        if let Some(idx) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.ref_count == 0)
            .min_by_key(|(_, e)| e.last_used_ms)
            .map(|(idx, _)| idx)
        {
            return idx;
        }
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.last_used_ms)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRuntime {
        unloaded: Vec<ModuleHandle>,
    }

    impl WasmRuntime for NoopRuntime {
        fn load(&mut self, _bytes: &[u8]) -> Result<ModuleHandle, crate::ports::RuntimeError> {
            Ok(0)
        }
        fn unload(&mut self, module: ModuleHandle) {
            self.unloaded.push(module);
        }
        fn install(&mut self, _name: &str, _bytes: &[u8]) -> Result<crate::ports::ContainerId, crate::ports::RuntimeError> {
            Ok(0)
        }
        fn start(&mut self, _container: crate::ports::ContainerId) -> Result<(), crate::ports::RuntimeError> {
            Ok(())
        }
        fn stop(&mut self, _container: crate::ports::ContainerId) -> Result<(), crate::ports::RuntimeError> {
            Ok(())
        }
        fn destroy(&mut self, _container: crate::ports::ContainerId) {}
    }

    #[test]
    fn dedup_store_increments_ref_count() {
        let mut cache = ModuleCache::new(4);
        let mut rt = NoopRuntime { unloaded: vec![] };
        let hash = [1u8; 32];
        cache.store(hash, 100, 4096, 5, 0, &mut rt);
        cache.store(hash, 100, 4096, 5, 1, &mut rt);
        assert_eq!(cache.ref_count(&hash), Some(2));

        cache.release(&hash).unwrap();
        cache.release(&hash).unwrap();
        assert_eq!(cache.ref_count(&hash), Some(0));
    }

    #[test]
    fn eviction_prefers_empty_then_lru_unreferenced() {
        let mut cache = ModuleCache::new(2);
        let mut rt = NoopRuntime { unloaded: vec![] };
        cache.store([1u8; 32], 1, 10, 1, 0, &mut rt);
        cache.store([2u8; 32], 2, 10, 1, 1, &mut rt);
        // Both slots full, [1;32] unreferenced after release, should be
        // evicted first even though it's older.
        cache.release(&[1u8; 32]).unwrap();
        cache.store([3u8; 32], 3, 10, 1, 2, &mut rt);
        assert_eq!(cache.ref_count(&[1u8; 32]), None);
        assert_eq!(cache.ref_count(&[2u8; 32]), Some(1));
        assert_eq!(rt.unloaded, vec![1]);
    }

    #[test]
    fn lookup_hit_increments_ref_count_and_stat() {
        let mut cache = ModuleCache::new(2);
        let mut rt = NoopRuntime { unloaded: vec![] };
        let hash = [9u8; 32];
        cache.store(hash, 7, 10, 1, 0, &mut rt);
        assert_eq!(cache.lookup(&hash, 5), Some(7));
        assert_eq!(cache.ref_count(&hash), Some(2));
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 0);
        assert!(cache.lookup(&[0u8; 32], 5).is_none());
        assert_eq!(cache.misses(), 1);
    }
}
