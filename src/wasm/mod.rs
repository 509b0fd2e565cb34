//! WASM runtime wrapper (C4): content-addressed module cache with LRU
//! eviction, plus an instance-pointer → app-slot hash table.
//!
//! The module cache and instance map are independent data structures with
//! independent locks (spec §5); both are re-exported here as the "runtime
//! wrapper" the app manager talks to.

pub mod cache;
pub mod instance_map;

pub use cache::{CacheError, ModuleCache};
pub use instance_map::InstanceMap;
