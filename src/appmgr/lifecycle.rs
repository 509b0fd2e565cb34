//! App lifecycle manager (C6): install / start / stop / uninstall / restart,
//! chunked install sessions, crash-driven auto-restart.
//!
//! Mutations to the registry are serialized through `&mut self` — callers
//! are expected to hold a single `AppManager` behind their own lock, the
//! same single-writer discipline the OTA worker uses for its state.

use std::collections::HashMap;

use log::{info, warn};

use crate::appmgr::manifest::Manifest;
use crate::appmgr::registry::{validate_binary, AppEntry, AppSource, AppState, Registry};
use crate::appmgr::AppError;
use crate::config::SystemConfig;
use crate::ports::{Filesystem, WasmRuntime};

/// A chunked install in progress. `install_begin` allocates one of these;
/// `install_chunk` appends into `buffer`; `install_end` consumes it.
pub struct InstallSession {
    pub name: String,
    pub source: AppSource,
    pub total_size: u32,
    pub received: u32,
    buffer: Vec<u8>,
}

pub struct AppManager<R: WasmRuntime, F: Filesystem> {
    registry: Registry,
    runtime: R,
    fs: F,
    cfg: SystemConfig,
    sessions: HashMap<u32, InstallSession>,
    next_session_id: u32,
    running_count: u16,
    state_cb: Option<Box<dyn FnMut(u16, AppState, AppState) + Send>>,
}

impl<R: WasmRuntime, F: Filesystem> AppManager<R, F> {
    pub fn new(mut fs: F, runtime: R, cfg: SystemConfig) -> Result<Self, AppError> {
        let registry = Registry::load(&mut fs, cfg.max_apps)?;
        let running_count = 0; // load() demotes every Running entry to Installed
        Ok(Self {
            registry,
            runtime,
            fs,
            cfg,
            sessions: HashMap::new(),
            next_session_id: 0,
            running_count,
            state_cb: None,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register the callback invoked with `(id, old_state, new_state)` on
    /// every app state transition this manager drives. Replaces any
    /// previously registered callback, matching the single-subscriber shape
    /// of the OTA engine's progress callback.
    pub fn register_state_cb(&mut self, cb: impl FnMut(u16, AppState, AppState) + Send + 'static) {
        self.state_cb = Some(Box::new(cb));
    }

    fn notify_state(&mut self, id: u16, from: AppState, to: AppState) {
        if from == to {
            return;
        }
        if let Some(cb) = self.state_cb.as_mut() {
            cb(id, from, to);
        }
    }

    /// Access to the underlying filesystem, mainly so callers can verify an
    /// installed binary's on-disk contents without the manager exposing a
    /// dedicated read-back method for every field of [`AppEntry`].
    pub fn fs(&mut self) -> &mut F {
        &mut self.fs
    }

    fn persist(&mut self) -> Result<(), AppError> {
        self.registry.save(&mut self.fs)
    }

    /// Synchronous install path: validate the binary, resolve a name
    /// (reusing an existing entry of the same name if present), write it to
    /// storage, and register or update the `AppEntry`.
    pub fn install(
        &mut self,
        name: &str,
        bytes: &[u8],
        manifest: Option<&[u8]>,
        source: AppSource,
        now_ms: u64,
    ) -> Result<u16, AppError> {
        validate_binary(bytes, self.cfg.max_app_binary_size)?;
        let manifest = Manifest::parse(manifest.unwrap_or(&[]), name);

        if let Some(existing) = self.registry.find_by_name(&manifest.name) {
            if existing.is_preloaded {
                return Err(AppError::Permission);
            }
        }

        let entry = AppEntry {
            id: 0,
            name: manifest.name.clone(),
            version: manifest.version,
            state: AppState::Installed,
            size: bytes.len() as u32,
            heap_kb: manifest.heap_kb,
            stack_kb: manifest.stack_kb,
            permissions: manifest.permissions,
            source,
            container_id: 0,
            crash_count: 0,
            restart_policy: manifest.restart_policy,
            install_time: now_ms,
            last_start_time: 0,
            is_preloaded: false,
        };

        let path = entry.binary_path();
        if let Some(existing_id) = self.registry.find_by_name(&entry.name).map(|e| e.id) {
            self.registry.remove(existing_id);
        }
        let id = self.registry.insert(entry)?;

        self.fs.write_file(&path, bytes)?;
        self.persist()?;
        info!("app manager: installed '{name}' as id {id}");
        Ok(id)
    }

    /// Begin a chunked install session. Allocates a buffer sized to
    /// `total_size` up front.
    pub fn install_begin(
        &mut self,
        name: &str,
        total_size: u32,
        source: AppSource,
    ) -> Result<u32, AppError> {
        if total_size > self.cfg.max_app_binary_size {
            return Err(AppError::TooLarge);
        }
        if self.sessions.values().any(|s| s.name == name) {
            return Err(AppError::Busy);
        }
        let id = self.next_session_id;
        self.next_session_id = self.next_session_id.wrapping_add(1);
        self.sessions.insert(
            id,
            InstallSession {
                name: name.to_string(),
                source,
                total_size,
                received: 0,
                buffer: Vec::with_capacity(total_size as usize),
            },
        );
        Ok(id)
    }

    /// Append a chunk to an open session. Rejects chunks that would exceed
    /// the declared `total_size`.
    pub fn install_chunk(&mut self, session: u32, data: &[u8]) -> Result<(), AppError> {
        let session = self.sessions.get_mut(&session).ok_or(AppError::NotFound)?;
        if session.received + data.len() as u32 > session.total_size {
            return Err(AppError::Overflow);
        }
        session.buffer.extend_from_slice(data);
        session.received += data.len() as u32;
        Ok(())
    }

    /// Finalize a session: requires every declared byte to have arrived,
    /// delegates to the synchronous install path, and always frees the
    /// session buffer regardless of outcome.
    pub fn install_end(
        &mut self,
        session: u32,
        manifest: Option<&[u8]>,
        now_ms: u64,
    ) -> Result<u16, AppError> {
        let session = self.sessions.remove(&session).ok_or(AppError::NotFound)?;
        if session.received != session.total_size {
            return Err(AppError::Incomplete);
        }
        self.install(&session.name, &session.buffer, manifest, session.source, now_ms)
    }

    /// Abandon an open session, freeing its buffer without installing.
    pub fn install_abort(&mut self, session: u32) -> Result<(), AppError> {
        self.sessions.remove(&session).ok_or(AppError::NotFound)?;
        Ok(())
    }

    /// Load the binary, hand it to the runtime (which internally resolves
    /// through the module cache), obtain a container id, and start it.
    /// Enforces `MAX_RUNNING`. On any runtime failure the entry moves to
    /// `Error`, which may itself trigger auto-restart handling. An explicit
    /// start clears `crash_count`, re-entering the restart budget fresh.
    pub fn start(&mut self, name: &str, now_ms: u64) -> Result<(), AppError> {
        self.registry.find_by_name_mut(name).ok_or(AppError::NotFound)?.crash_count = 0;
        self.start_inner(name, now_ms)
    }

    /// Shared by `start` and the auto-restart path in `transition_error`.
    /// Unlike `start`, does not touch `crash_count` — the auto-restart loop
    /// needs it to keep accumulating across internal restarts so the retry
    /// budget actually terminates.
    fn start_inner(&mut self, name: &str, now_ms: u64) -> Result<(), AppError> {
        if self.running_count >= self.cfg.max_running_apps {
            return Err(AppError::Busy);
        }
        let path = self.registry.find_by_name(name).ok_or(AppError::NotFound)?.binary_path();
        let bytes = self.fs.read_file(&path)?;

        let entry = self.registry.find_by_name_mut(name).ok_or(AppError::NotFound)?;
        let entry_name = entry.name.clone();
        let (id, old_state) = (entry.id, entry.state);

        match self.runtime.install(&entry_name, &bytes).and_then(|container| {
            self.runtime.start(container)?;
            Ok(container)
        }) {
            Ok(container) => {
                let entry = self.registry.find_by_name_mut(name).unwrap();
                entry.container_id = container;
                entry.state = AppState::Running;
                entry.last_start_time = now_ms;
                self.running_count += 1;
                self.persist()?;
                self.notify_state(id, old_state, AppState::Running);
                Ok(())
            }
            Err(e) => {
                self.transition_error(name)?;
                Err(AppError::from(e))
            }
        }
    }

    pub fn stop(&mut self, name: &str) -> Result<(), AppError> {
        let entry = self.registry.find_by_name_mut(name).ok_or(AppError::NotFound)?;
        if entry.state != AppState::Running {
            return Ok(());
        }
        let id = entry.id;
        let container = entry.container_id;
        self.runtime.stop(container)?;
        self.runtime.destroy(container);
        let entry = self.registry.find_by_name_mut(name).unwrap();
        entry.state = AppState::Stopped;
        entry.container_id = 0;
        self.running_count = self.running_count.saturating_sub(1);
        self.persist()?;
        self.notify_state(id, AppState::Running, AppState::Stopped);
        Ok(())
    }

    pub fn restart(&mut self, name: &str, now_ms: u64) -> Result<(), AppError> {
        self.stop(name)?;
        self.start(name, now_ms)
    }

    /// Preloaded apps (shipped with the firmware image) cannot be removed.
    pub fn uninstall(&mut self, name: &str) -> Result<(), AppError> {
        let entry = self.registry.find_by_name(name).ok_or(AppError::NotFound)?.clone();
        if entry.is_preloaded {
            return Err(AppError::Permission);
        }
        if entry.state == AppState::Running {
            self.stop(name)?;
        }
        let _ = self.fs.delete_file(&entry.binary_path());
        self.registry.remove(entry.id);
        self.persist()
    }

    /// Record a runtime crash: the entry is expected to already be in
    /// `Error` state (the runtime/scheduler reports it via
    /// [`Self::transition_error`]). Evaluates the auto-restart policy and,
    /// if still under the retry budget, restarts the app immediately.
    /// Exceeding `max_retries` moves the entry to the terminal `Failed`
    /// state, from which only an explicit [`Self::start`] recovers.
    pub fn transition_error(&mut self, name: &str) -> Result<(), AppError> {
        let (id, old_state, policy) = {
            let entry = self.registry.find_by_name_mut(name).ok_or(AppError::NotFound)?;
            let old_state = entry.state;
            entry.state = AppState::Error;
            entry.container_id = 0;
            (entry.id, old_state, entry.restart_policy)
        };
        self.running_count = self.running_count.saturating_sub(1);
        self.notify_state(id, old_state, AppState::Error);

        if !policy.enabled {
            return self.persist();
        }

        let crash_count = self.registry.find_by_name(name).map(|e| e.crash_count).unwrap_or(0);
        if crash_count < policy.max_retries {
            {
                let entry = self.registry.find_by_name_mut(name).unwrap();
                entry.crash_count += 1;
                entry.state = AppState::Installed;
            }
            self.persist()?;
            self.notify_state(id, AppState::Error, AppState::Installed);
            info!("app manager: restarting '{name}' (crash_count={})", crash_count + 1);
            self.start_inner(name, 0)
        } else {
            {
                let entry = self.registry.find_by_name_mut(name).unwrap();
                entry.state = AppState::Failed;
            }
            self.persist()?;
            self.notify_state(id, AppState::Error, AppState::Failed);
            warn!("app manager: '{name}' exceeded restart budget, marked Failed");
            Ok(())
        }
    }

    pub fn get_state(&self, name: &str) -> Option<AppState> {
        self.registry.find_by_name(name).map(|e| e.state)
    }

    pub fn list(&self) -> Vec<AppEntry> {
        self.registry.list().cloned().collect()
    }

    pub fn running_count(&self) -> u16 {
        self.running_count
    }
}
