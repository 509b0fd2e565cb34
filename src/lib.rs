//! Core of an embedded WASM application host: firmware OTA updates, a
//! persistent app registry with lifecycle control, a cooperative task
//! scheduler, and the transport dispatch / buffer pool plumbing that feeds
//! them.
//!
//! Every module here is pure logic driven through the collaborator traits in
//! [`ports`] — no module talks to real flash, a real WASM engine, or a real
//! filesystem directly, so the whole crate runs and is tested on a host
//! build. Production binaries wire real adapters behind the same traits;
//! [`adapters`] ships the host-simulation ones used by this crate's own
//! tests.

#![deny(unused_must_use)]

pub mod adapters;
pub mod appmgr;
pub mod buffer_pool;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod ota;
pub mod ports;
pub mod scheduler;
pub mod transport;
pub mod wasm;

pub use error::{Error, Result};
