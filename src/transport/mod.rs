//! Transport dispatch registry (C1).
//!
//! Routes a producer's byte chunks to every interested consumer for a given
//! [`DataType`], carrying transfer lifecycle information. This is the glue
//! that decouples a byte source (HTTP upload, CoAP block-wise, cloud push)
//! from a consumer (the OTA engine, an app install session, a config
//! loader) — neither side knows about the other.
//!
//! Handlers are expressed as a trait-object closure rather than a raw
//! callback + context pointer, matching how the rest of the core turns a
//! C-shaped callback API into an owned trait object at the Rust boundary.

use core::fmt;
use std::sync::{Arc, Mutex};

/// Number of handler slots held per [`DataType`].
pub const HANDLERS_PER_TYPE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    WasmApp,
    Firmware,
    File,
    Config,
}

impl DataType {
    pub const COUNT: usize = 4;

    const fn index(self) -> usize {
        match self {
            DataType::WasmApp => 0,
            DataType::Firmware => 1,
            DataType::File => 2,
            DataType::Config => 3,
        }
    }

    const fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(DataType::WasmApp),
            1 => Some(DataType::Firmware),
            2 => Some(DataType::File),
            3 => Some(DataType::Config),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFlags(u8);

impl ChunkFlags {
    pub const NONE: ChunkFlags = ChunkFlags(0);
    pub const CHUNK_START: ChunkFlags = ChunkFlags(0b001);
    pub const CHUNK_END: ChunkFlags = ChunkFlags(0b010);
    pub const ABORT: ChunkFlags = ChunkFlags(0b100);

    pub const fn contains(self, other: ChunkFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Per-callback view of one dispatched chunk.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    pub data_type: DataType,
    pub total_size: u32,
    pub offset: u32,
    pub flags: ChunkFlags,
    pub name: Option<String>,
    pub user_context: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    InvalidParam,
    NoSpace,
    AlreadyRegistered,
    NotFound,
    Busy,
    HandlerFailed(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::NoSpace => write!(f, "no free handler slot"),
            Self::AlreadyRegistered => write!(f, "handler already registered"),
            Self::NotFound => write!(f, "handler not found"),
            Self::Busy => write!(f, "transfer already active"),
            Self::HandlerFailed(code) => write!(f, "handler returned error {code}"),
        }
    }
}

/// Opaque handler identifier: `type_index * HANDLERS_PER_TYPE + local_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u16);

impl HandlerId {
    fn encode(type_idx: usize, local_idx: usize) -> Self {
        HandlerId((type_idx * HANDLERS_PER_TYPE + local_idx) as u16)
    }

    fn decode(self) -> (usize, usize) {
        let raw = self.0 as usize;
        (raw / HANDLERS_PER_TYPE, raw % HANDLERS_PER_TYPE)
    }
}

type HandlerFn = dyn FnMut(&ChunkInfo, &[u8]) -> Result<(), i32> + Send;

struct HandlerSlot {
    callback: Box<HandlerFn>,
    user_context: u32,
    priority: u8,
}

#[derive(Debug, Default, Clone, Copy)]
struct TransferState {
    active: bool,
    current_offset: u32,
    total_size: u32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TransportStats {
    pub total_bytes: u64,
    pub total_chunks: u64,
    pub errors: u64,
}

struct Inner {
    handlers: Vec<[Option<Arc<Mutex<HandlerSlot>>>; HANDLERS_PER_TYPE]>,
    /// Dedup keys kept alongside `handlers` (not inside `HandlerSlot`'s own
    /// mutex) so `register`'s dedup check never has to lock a slot that
    /// `notify`/`dispatch_lifecycle` may already be holding across a
    /// reentrant callback invocation.
    dedup_keys: Vec<[Option<u64>; HANDLERS_PER_TYPE]>,
    transfers: Vec<TransferState>,
    names: Vec<Option<String>>,
    stats: Vec<TransportStats>,
}

/// Type-keyed multi-handler registry. Guarded by a single mutex that is
/// released across callback invocation so handlers may freely
/// register/unregister/notify from within their own callback without
/// deadlocking the registry.
pub struct TransportRegistry {
    inner: Mutex<Inner>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        let n = DataType::COUNT;
        Self {
            inner: Mutex::new(Inner {
                handlers: (0..n).map(|_| [None, None]).collect(),
                dedup_keys: vec![[None, None]; n],
                transfers: vec![TransferState::default(); n],
                names: vec![None; n],
                stats: vec![TransportStats::default(); n],
            }),
        }
    }

    pub fn register(
        &self,
        data_type: DataType,
        user_context: u32,
        priority: u8,
        dedup_key: u64,
        callback: impl FnMut(&ChunkInfo, &[u8]) -> Result<(), i32> + Send + 'static,
    ) -> Result<HandlerId, TransportError> {
        let mut inner = self.inner.lock().unwrap();
        let ty = data_type.index();
        if inner.dedup_keys[ty].iter().flatten().any(|&key| key == dedup_key) {
            return Err(TransportError::AlreadyRegistered);
        }
        let Some(local) = inner.handlers[ty].iter().position(Option::is_none) else {
            return Err(TransportError::NoSpace);
        };
        inner.handlers[ty][local] = Some(Arc::new(Mutex::new(HandlerSlot {
            callback: Box::new(callback),
            user_context,
            priority,
        })));
        inner.dedup_keys[ty][local] = Some(dedup_key);
        Ok(HandlerId::encode(ty, local))
    }

    pub fn unregister(&self, id: HandlerId) -> Result<(), TransportError> {
        let (ty, local) = id.decode();
        let mut inner = self.inner.lock().unwrap();
        if ty >= inner.handlers.len() {
            return Err(TransportError::NotFound);
        }
        if inner.handlers[ty][local].take().is_none() {
            return Err(TransportError::NotFound);
        }
        inner.dedup_keys[ty][local] = None;
        Ok(())
    }

    pub fn begin(
        &self,
        data_type: DataType,
        total_size: u32,
        name: Option<&str>,
    ) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock().unwrap();
            let ty = data_type.index();
            if inner.transfers[ty].active {
                return Err(TransportError::Busy);
            }
            inner.transfers[ty] = TransferState { active: true, current_offset: 0, total_size };
            inner.names[ty] = name.map(str::to_owned);
        }
        self.dispatch_lifecycle(data_type, ChunkFlags::CHUNK_START);
        Ok(())
    }

    /// Dispatch one data chunk to every active handler for `data_type`, in
    /// priority order. Handler errors are recorded but never stop dispatch —
    /// every consumer sees the chunk regardless of another's failure.
    pub fn notify(&self, data_type: DataType, data: &[u8]) -> Result<(), TransportError> {
        let (offset, name, slots) = {
            let inner = self.inner.lock().unwrap();
            let ty = data_type.index();
            let state = inner.transfers[ty];
            let name = inner.names[ty].clone();
            let mut slots: Vec<Arc<Mutex<HandlerSlot>>> =
                inner.handlers[ty].iter().flatten().cloned().collect();
            slots.sort_by_key(|slot| slot.lock().unwrap().priority);
            (state.current_offset, name, slots)
        };

        let mut first_error = None;
        let mut error_count = 0u64;
        for slot in &slots {
            let mut guard = slot.lock().unwrap();
            let info = ChunkInfo {
                data_type,
                total_size: {
                    let inner = self.inner.lock().unwrap();
                    inner.transfers[data_type.index()].total_size
                },
                offset,
                flags: ChunkFlags::NONE,
                name: name.clone(),
                user_context: guard.user_context,
            };
            if let Err(code) = (guard.callback)(&info, data) {
                error_count += 1;
                if first_error.is_none() {
                    first_error = Some(code);
                }
            }
        }

        {
            let mut inner = self.inner.lock().unwrap();
            let ty = data_type.index();
            inner.transfers[ty].current_offset =
                inner.transfers[ty].current_offset.wrapping_add(data.len() as u32);
            let stats = &mut inner.stats[ty];
            stats.total_bytes += data.len() as u64;
            stats.total_chunks += 1;
            stats.errors += error_count;
        }

        match first_error {
            Some(code) => Err(TransportError::HandlerFailed(code)),
            None => Ok(()),
        }
    }

    pub fn end(&self, data_type: DataType, success: bool) -> Result<(), TransportError> {
        let flags = if success { ChunkFlags::CHUNK_END } else { ChunkFlags::ABORT };
        self.dispatch_lifecycle(data_type, flags);
        let mut inner = self.inner.lock().unwrap();
        inner.transfers[data_type.index()] = TransferState::default();
        Ok(())
    }

    pub fn abort(&self, data_type: DataType) -> Result<(), TransportError> {
        self.dispatch_lifecycle(data_type, ChunkFlags::ABORT);
        let mut inner = self.inner.lock().unwrap();
        inner.transfers[data_type.index()] = TransferState::default();
        Ok(())
    }

    pub fn is_active(&self, data_type: DataType) -> bool {
        self.inner.lock().unwrap().transfers[data_type.index()].active
    }

    pub fn stats(&self, data_type: Option<DataType>) -> TransportStats {
        let inner = self.inner.lock().unwrap();
        match data_type {
            Some(ty) => inner.stats[ty.index()],
            None => inner.stats.iter().fold(TransportStats::default(), |acc, s| TransportStats {
                total_bytes: acc.total_bytes + s.total_bytes,
                total_chunks: acc.total_chunks + s.total_chunks,
                errors: acc.errors + s.errors,
            }),
        }
    }

    /// Lifecycle notifications (`begin`/`end`/`abort`) carry no payload and
    /// do not affect `total_bytes`/`total_chunks`/`errors` — only `notify`
    /// does, per the conservation invariant in the testable properties.
    fn dispatch_lifecycle(&self, data_type: DataType, flags: ChunkFlags) {
        let (offset, total_size, name, slots) = {
            let inner = self.inner.lock().unwrap();
            let ty = data_type.index();
            let state = inner.transfers[ty];
            let name = inner.names[ty].clone();
            let slots: Vec<Arc<Mutex<HandlerSlot>>> =
                inner.handlers[ty].iter().flatten().cloned().collect();
            (state.current_offset, state.total_size, name, slots)
        };
        let mut sorted = slots;
        sorted.sort_by_key(|slot| slot.lock().unwrap().priority);
        for slot in &sorted {
            let mut guard = slot.lock().unwrap();
            let info = ChunkInfo {
                data_type,
                total_size,
                offset,
                flags,
                name: name.clone(),
                user_context: guard.user_context,
            };
            let _ = (guard.callback)(&info, &[]);
        }
    }
}
