//! Instance pointer → app slot index table.
//!
//! Open addressing with linear probing over a power-of-two table, using
//! Knuth's multiplicative hash on the raw pointer value. `remove` uses
//! backward-shift deletion instead of tombstones: every entry in the
//! following cluster that probed past the vacated bucket is shifted back
//! into it, so `get`'s probe sequence never stops early on a hole left by
//! an unrelated key's removal. Guarded by a `critical_section` spin lock so
//! `put`/`get`/`remove` stay O(1) critical sections instead of a full
//! mutex.

use core::cell::RefCell;

use critical_section::Mutex;

/// Knuth's multiplicative hashing constant for 64-bit keys.
const KNUTH_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

const EMPTY: Option<(u64, u32)> = None;

struct Table {
    buckets: Vec<Option<(u64, u32)>>,
    mask: u64,
}

impl Table {
    fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "instance map capacity must be a power of two");
        Self { buckets: vec![EMPTY; capacity as usize], mask: u64::from(capacity) - 1 }
    }

    fn hash(&self, ptr: u64) -> usize {
        let mixed = ptr.wrapping_mul(KNUTH_MULTIPLIER);
        (mixed & self.mask) as usize
    }
}

/// An instance-pointer-keyed map, safe to share behind a `&InstanceMap`.
pub struct InstanceMap {
    table: Mutex<RefCell<Table>>,
}

impl InstanceMap {
    pub fn new(capacity: u32) -> Self {
        Self { table: Mutex::new(RefCell::new(Table::new(capacity))) }
    }

    /// Insert or overwrite `instance_ptr → slot`. Stops at the first
    /// matching or empty bucket.
    pub fn put(&self, instance_ptr: u64, slot: u32) {
        critical_section::with(|cs| {
            let mut table = self.table.borrow(cs).borrow_mut();
            let len = table.buckets.len();
            let mut idx = table.hash(instance_ptr);
            for _ in 0..len {
                match table.buckets[idx] {
                    Some((k, _)) if k == instance_ptr => {
                        table.buckets[idx] = Some((instance_ptr, slot));
                        return;
                    }
                    None => {
                        table.buckets[idx] = Some((instance_ptr, slot));
                        return;
                    }
                    Some(_) => idx = (idx + 1) % len,
                }
            }
        });
    }

    /// Resolve `instance_ptr → slot`, or `None` if never `put` or since
    /// `remove`d. Stops at the first empty bucket.
    pub fn get(&self, instance_ptr: u64) -> Option<u32> {
        critical_section::with(|cs| {
            let table = self.table.borrow(cs).borrow();
            let len = table.buckets.len();
            let mut idx = table.hash(instance_ptr);
            for _ in 0..len {
                match table.buckets[idx] {
                    Some((k, v)) if k == instance_ptr => return Some(v),
                    None => return None,
                    Some(_) => idx = (idx + 1) % len,
                }
            }
            None
        })
    }

    /// Remove `instance_ptr` and backward-shift the rest of its probe
    /// cluster so no live key becomes unreachable behind the vacated
    /// bucket.
    pub fn remove(&self, instance_ptr: u64) {
        critical_section::with(|cs| {
            let mut table = self.table.borrow(cs).borrow_mut();
            let len = table.buckets.len();
            let mut idx = table.hash(instance_ptr);
            let found = loop {
                match table.buckets[idx] {
                    Some((k, _)) if k == instance_ptr => break Some(idx),
                    None => break None,
                    Some(_) => idx = (idx + 1) % len,
                }
            };
            let Some(mut hole) = found else { return };
            table.buckets[hole] = None;

            // Pull each subsequent entry back into the hole it left behind
            // as long as doing so doesn't move it before its own ideal
            // bucket — the standard open-addressing deletion invariant.
            let mut scan = (hole + 1) % len;
            loop {
                let Some((key, slot)) = table.buckets[scan] else { break };
                let ideal = table.hash(key);
                let hole_to_scan = (scan + len - hole) % len;
                let ideal_to_scan = (scan + len - ideal) % len;
                if ideal_to_scan >= hole_to_scan {
                    table.buckets[hole] = Some((key, slot));
                    table.buckets[scan] = None;
                    hole = scan;
                }
                scan = (scan + 1) % len;
                if scan == hole {
                    break;
                }
            }
        });
    }
}
