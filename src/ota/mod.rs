//! Over-the-air firmware update engine (C3) — the hardest subsystem.
//!
//! A single-writer state machine driven by four inbound messages (`Start`,
//! `WriteChunk`, `Finalize`, `Abort`) plus two out-of-band ones (`Confirm`,
//! `Reboot`). Every message is processed on one dedicated worker thread,
//! serialized by a bounded queue; public API calls enqueue a message and
//! block on a per-call reply channel with a 30-second timeout. This
//! guarantees the flash slot has exactly one writer even under concurrent
//! pressure from multiple transports.
//!
//! Grounded on the same state-machine shape as the rest of the core's
//! single-writer subsystems, generalized from an in-process call into a
//! worker-thread RPC because the specification requires a dedicated thread
//! and a bounded queue rather than a plain mutex.

use core::fmt;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use heapless::String as HString;
use log::{info, warn};

use crate::ports::{Bootloader, FlashArea, FlashDriver, FlashError};

/// First four bytes every accepted firmware image must start with.
pub const FIRMWARE_MAGIC: [u8; 4] = [0x96, 0xF3, 0xB8, 0x3D];

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);
const QUEUE_TIMEOUT: Duration = Duration::from_secs(1);
const QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Idle,
    Receiving,
    Validating,
    Installing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaError {
    InvalidParam,
    NotInitialized,
    AlreadyInProgress,
    FlashOpenFailed,
    FlashEraseFailed,
    FlashWriteFailed,
    InvalidImage,
    InsufficientSpace,
    Timeout,
    BootRequestFailed,
}

impl fmt::Display for OtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid parameter"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::AlreadyInProgress => write!(f, "update already in progress"),
            Self::FlashOpenFailed => write!(f, "flash open failed"),
            Self::FlashEraseFailed => write!(f, "flash erase failed"),
            Self::FlashWriteFailed => write!(f, "flash write failed"),
            Self::InvalidImage => write!(f, "invalid image"),
            Self::InsufficientSpace => write!(f, "insufficient space"),
            Self::Timeout => write!(f, "timeout"),
            Self::BootRequestFailed => write!(f, "boot request failed"),
        }
    }
}

impl From<FlashError> for OtaError {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::OpenFailed => Self::FlashOpenFailed,
            FlashError::EraseFailed => Self::FlashEraseFailed,
            FlashError::WriteFailed | FlashError::ReadFailed | FlashError::OutOfBounds => {
                Self::FlashWriteFailed
            }
        }
    }
}

/// A consistent snapshot of engine state for UIs. The direct progress
/// callback is authoritative; this is what `get_progress` hands back.
#[derive(Debug, Clone)]
pub struct OtaStatus {
    pub state: OtaState,
    pub last_error: Option<OtaError>,
    pub total_size: u32,
    pub bytes_written: u32,
    pub percentage: u8,
    pub last_progress_report_offset: u32,
    pub status_message: HString<64>,
}

impl Default for OtaStatus {
    fn default() -> Self {
        Self {
            state: OtaState::Idle,
            last_error: None,
            total_size: 0,
            bytes_written: 0,
            percentage: 0,
            last_progress_report_offset: 0,
            status_message: HString::new(),
        }
    }
}

fn percentage_of(bytes_written: u32, total_size: u32) -> u8 {
    // Open question resolved: percentage = 0 when total_size == 0, rather
    // than divide-by-zero or a special sentinel.
    if total_size == 0 {
        return 0;
    }
    (u64::from(bytes_written) * 100 / u64::from(total_size)) as u8
}

enum OtaMessage {
    Start { total_size: u32, reply: SyncSender<Result<(), OtaError>> },
    WriteChunk { data: Vec<u8>, reply: SyncSender<Result<u32, OtaError>> },
    Finalize { reply: SyncSender<Result<(), OtaError>> },
    Abort { reply: SyncSender<Result<(), OtaError>> },
    Confirm { reply: SyncSender<Result<(), OtaError>> },
    Reboot { delay_ms: u64 },
    RegisterCallback(Box<dyn FnMut(&OtaStatus) + Send>),
}

/// The state machine itself, owned exclusively by the worker thread.
struct Worker<D: FlashDriver> {
    driver: D,
    bootloader: Box<dyn Bootloader + Send>,
    area: Option<D::Area>,
    page_size: u32,
    progress_interval: u32,
    status: Arc<Mutex<OtaStatus>>,
    staging: Vec<u8>,
    buffer_pos: usize,
    /// Bytes already durably written to flash (excludes whatever is
    /// currently sitting in the staging buffer).
    flash_offset: u32,
    progress_cb: Option<Box<dyn FnMut(&OtaStatus) + Send>>,
}

impl<D: FlashDriver> Worker<D>
where
    D::Area: Send,
{
    fn set_status(&self, f: impl FnOnce(&mut OtaStatus)) {
        let mut status = self.status.lock().unwrap();
        f(&mut status);
    }

    /// Fire the registered progress callback, if any, with the current
    /// status snapshot. Called after every status-mutating step.
    fn notify_progress(&mut self) {
        if let Some(cb) = self.progress_cb.as_mut() {
            let snapshot = self.status.lock().unwrap().clone();
            cb(&snapshot);
        }
    }

    fn handle_start(&mut self, total_size: u32) -> Result<(), OtaError> {
        {
            let status = self.status.lock().unwrap();
            if status.state != OtaState::Idle {
                return Err(OtaError::AlreadyInProgress);
            }
        }
        let mut area = self.driver.open_secondary().map_err(OtaError::from)?;
        let slot_size = area.size();
        area.erase(0, slot_size).map_err(OtaError::from)?;
        self.area = Some(area);
        self.buffer_pos = 0;
        self.flash_offset = 0;
        self.staging.clear();
        self.staging.resize(self.page_size as usize, 0xFF);
        self.set_status(|s| {
            *s = OtaStatus {
                state: OtaState::Receiving,
                total_size,
                bytes_written: 0,
                percentage: percentage_of(0, total_size),
                last_progress_report_offset: 0,
                last_error: None,
                status_message: HString::new(),
            };
        });
        self.notify_progress();
        info!("ota: started, total_size={total_size}");
        Ok(())
    }

    fn effective_limit(&self) -> u32 {
        let status = self.status.lock().unwrap();
        let slot_size = self.area.as_ref().map_or(u32::MAX, |area| area.size());
        if status.total_size == 0 {
            slot_size
        } else {
            status.total_size.min(slot_size)
        }
    }

    /// Flush whatever is currently staged to flash. On `final_flush`, pads
    /// the tail with the flash erase value (`0xFF`) up to the write
    /// alignment boundary, per the specification's flush semantics.
    fn flush_staging(&mut self, final_flush: bool) -> Result<(), OtaError> {
        if self.buffer_pos == 0 {
            return Ok(());
        }
        let Some(area) = self.area.as_mut() else { return Err(OtaError::NotInitialized) };
        let alignment = area.alignment();
        let aligned_len = if final_flush {
            let remainder = (self.buffer_pos as u32) % alignment;
            if remainder == 0 {
                self.buffer_pos as u32
            } else {
                let pad = alignment - remainder;
                let pad_start = self.buffer_pos;
                let pad_end = pad_start + pad as usize;
                for b in &mut self.staging[pad_start..pad_end] {
                    *b = 0xFF;
                }
                pad_end as u32
            }
        } else {
            self.buffer_pos as u32
        };

        area.write(self.flash_offset, &self.staging[..aligned_len as usize])
            .map_err(OtaError::from)?;
        self.flash_offset += aligned_len;
        self.buffer_pos = 0;
        Ok(())
    }

    fn handle_write_chunk(&mut self, data: &[u8]) -> Result<u32, OtaError> {
        {
            let status = self.status.lock().unwrap();
            if status.state != OtaState::Receiving {
                return Err(OtaError::NotInitialized);
            }
        }
        let limit = self.effective_limit();
        let current_written = self.status.lock().unwrap().bytes_written;
        if current_written + data.len() as u32 > limit {
            return Err(OtaError::InsufficientSpace);
        }

        let mut written = 0usize;
        while written < data.len() {
            let space = self.staging.len() - self.buffer_pos;
            let take = space.min(data.len() - written);
            self.staging[self.buffer_pos..self.buffer_pos + take]
                .copy_from_slice(&data[written..written + take]);
            self.buffer_pos += take;
            written += take;
            if self.buffer_pos == self.staging.len() {
                if let Err(e) = self.flush_staging(false) {
                    self.transition_error(e);
                    return Err(e);
                }
            }
        }

        let new_total = current_written + data.len() as u32;
        let report;
        {
            let mut status = self.status.lock().unwrap();
            status.bytes_written = new_total;
            status.percentage = percentage_of(new_total, status.total_size);
            report = new_total - status.last_progress_report_offset >= self.progress_interval;
            if report {
                status.last_progress_report_offset = new_total;
            }
        }
        if report {
            info!("ota: progress {}%", self.status.lock().unwrap().percentage);
            self.notify_progress();
        }
        Ok(data.len() as u32)
    }

    fn transition_error(&mut self, err: OtaError) {
        if let Some(mut area) = self.area.take() {
            let _ = area.erase(0, 0); // best-effort; real driver just drops/closes
        }
        self.buffer_pos = 0;
        self.set_status(|s| {
            s.state = OtaState::Error;
            s.last_error = Some(err);
        });
        self.notify_progress();
        warn!("ota: transitioned to Error: {err}");
    }

    fn handle_finalize(&mut self) -> Result<(), OtaError> {
        {
            let status = self.status.lock().unwrap();
            if status.state != OtaState::Receiving {
                return Err(OtaError::NotInitialized);
            }
        }
        if let Err(e) = self.flush_staging(true) {
            self.transition_error(e);
            return Err(e);
        }
        self.set_status(|s| s.state = OtaState::Validating);
        self.notify_progress();

        let Some(area) = self.area.as_mut() else {
            let e = OtaError::NotInitialized;
            self.transition_error(e);
            return Err(e);
        };
        let mut magic = [0u8; 4];
        if area.read(0, &mut magic).is_err() || magic != FIRMWARE_MAGIC {
            let e = OtaError::InvalidImage;
            self.transition_error(e);
            return Err(e);
        }

        self.set_status(|s| s.state = OtaState::Installing);
        self.notify_progress();
        if self.bootloader.request_upgrade(true).is_err() {
            let e = OtaError::BootRequestFailed;
            self.transition_error(e);
            return Err(e);
        }
        self.area = None; // slot closed
        self.set_status(|s| {
            s.state = OtaState::Complete;
            s.percentage = 100;
        });
        self.notify_progress();
        info!("ota: finalize complete");
        Ok(())
    }

    fn handle_abort(&mut self) -> Result<(), OtaError> {
        let _ = self.flush_staging(true);
        self.area = None;
        self.buffer_pos = 0;
        self.staging.clear();
        self.set_status(|s| *s = OtaStatus::default());
        self.notify_progress();
        info!("ota: aborted");
        Ok(())
    }

    fn handle_confirm(&mut self) -> Result<(), OtaError> {
        self.bootloader.confirm().map_err(|_| OtaError::BootRequestFailed)
    }
}

/// Handle to the OTA engine. Cheap to clone; every clone enqueues onto the
/// same worker thread.
#[derive(Clone)]
pub struct OtaEngine {
    tx: SyncSender<OtaMessage>,
    status: Arc<Mutex<OtaStatus>>,
}

impl OtaEngine {
    pub fn new<D>(driver: D, bootloader: impl Bootloader + Send + 'static, page_size: u32, progress_interval: u32) -> Self
    where
        D: FlashDriver + Send + 'static,
        D::Area: Send + 'static,
    {
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let status = Arc::new(Mutex::new(OtaStatus::default()));
        let worker_status = status.clone();
        let mut worker = Worker {
            driver,
            bootloader: Box::new(bootloader),
            area: None,
            page_size,
            progress_interval,
            status: worker_status,
            staging: Vec::new(),
            buffer_pos: 0,
            flash_offset: 0,
            progress_cb: None,
        };
        let _handle: JoinHandle<()> = thread::spawn(move || Self::run(&mut worker, &rx));
        Self { tx, status }
    }

    fn run<D>(worker: &mut Worker<D>, rx: &Receiver<OtaMessage>)
    where
        D: FlashDriver,
        D::Area: Send,
    {
        while let Ok(msg) = rx.recv() {
            match msg {
                OtaMessage::Start { total_size, reply } => {
                    let _ = reply.send(worker.handle_start(total_size));
                }
                OtaMessage::WriteChunk { data, reply } => {
                    let _ = reply.send(worker.handle_write_chunk(&data));
                }
                OtaMessage::Finalize { reply } => {
                    let _ = reply.send(worker.handle_finalize());
                }
                OtaMessage::Abort { reply } => {
                    let _ = reply.send(worker.handle_abort());
                }
                OtaMessage::Confirm { reply } => {
                    let _ = reply.send(worker.handle_confirm());
                }
                OtaMessage::Reboot { delay_ms } => {
                    thread::sleep(Duration::from_millis(delay_ms));
                    worker.bootloader.reboot(true);
                }
                OtaMessage::RegisterCallback(cb) => {
                    worker.progress_cb = Some(cb);
                }
            }
        }
    }

    /// Enqueue `msg`, failing with `Timeout` if the queue stays full for a
    /// full second — the spec's queue-put timeout.
    fn enqueue(&self, mut make: impl FnMut() -> OtaMessage) -> Result<(), OtaError> {
        let deadline = Instant::now() + QUEUE_TIMEOUT;
        loop {
            match self.tx.try_send(make()) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(_)) => {
                    if Instant::now() >= deadline {
                        return Err(OtaError::Timeout);
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Err(TrySendError::Disconnected(_)) => return Err(OtaError::NotInitialized),
            }
        }
    }

    pub fn start_update(&self, total_size: u32) -> Result<(), OtaError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.enqueue(|| OtaMessage::Start { total_size, reply: reply_tx.clone() })?;
        await_reply(&reply_rx)?
    }

    pub fn write_chunk(&self, data: &[u8]) -> Result<u32, OtaError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.enqueue(|| OtaMessage::WriteChunk { data: data.to_vec(), reply: reply_tx.clone() })?;
        await_reply(&reply_rx)?
    }

    pub fn finalize(&self) -> Result<(), OtaError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.enqueue(|| OtaMessage::Finalize { reply: reply_tx.clone() })?;
        await_reply(&reply_rx)?
    }

    pub fn abort(&self) -> Result<(), OtaError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.enqueue(|| OtaMessage::Abort { reply: reply_tx.clone() })?;
        await_reply(&reply_rx)?
    }

    pub fn confirm_firmware(&self) -> Result<(), OtaError> {
        let (reply_tx, reply_rx) = sync_channel(1);
        self.enqueue(|| OtaMessage::Confirm { reply: reply_tx.clone() })?;
        await_reply(&reply_rx)?
    }

    /// Fire-and-forget: the caller must return before the reboot actually
    /// happens, per the specification's preserved async semantics.
    pub fn reboot_to_apply(&self, delay_ms: u64) {
        let _ = self.tx.try_send(OtaMessage::Reboot { delay_ms });
    }

    pub fn get_progress(&self) -> OtaStatus {
        self.status.lock().unwrap().clone()
    }

    /// Register the callback the worker invokes with a status snapshot
    /// after every progress-relevant transition (start, a progress-interval
    /// write, each finalize stage, abort, error). Replaces any previously
    /// registered callback. Unlike the reply-bearing calls this message
    /// carries a non-`Clone` payload, so it can't reuse `enqueue`'s
    /// construct-and-retry closure.
    pub fn register_progress_callback(
        &self,
        cb: impl FnMut(&OtaStatus) + Send + 'static,
    ) -> Result<(), OtaError> {
        let mut pending: Option<Box<dyn FnMut(&OtaStatus) + Send>> = Some(Box::new(cb));
        let deadline = Instant::now() + QUEUE_TIMEOUT;
        loop {
            let msg = OtaMessage::RegisterCallback(pending.take().unwrap());
            match self.tx.try_send(msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(OtaMessage::RegisterCallback(cb))) => {
                    pending = Some(cb);
                    if Instant::now() >= deadline {
                        return Err(OtaError::Timeout);
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Err(TrySendError::Full(_)) => unreachable!("message round-trips through the same variant"),
                Err(TrySendError::Disconnected(_)) => return Err(OtaError::NotInitialized),
            }
        }
    }
}

fn await_reply<T>(rx: &Receiver<Result<T, OtaError>>) -> Result<Result<T, OtaError>, OtaError> {
    match rx.recv_timeout(COMPLETION_TIMEOUT) {
        Ok(result) => Ok(result),
        Err(RecvTimeoutError::Timeout) => Err(OtaError::Timeout),
        Err(RecvTimeoutError::Disconnected) => Err(OtaError::NotInitialized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sim_flash::{SimBootloader, SimFlashDriver};

    fn make_engine(slot_size: u32) -> OtaEngine {
        OtaEngine::new(SimFlashDriver::new(slot_size, 4), SimBootloader::default(), 4096, 8192)
    }

    #[test]
    fn happy_path_small_image() {
        let engine = make_engine(1_048_576);
        let mut image = vec![0xABu8; 132_000];
        image[0..4].copy_from_slice(&FIRMWARE_MAGIC);

        engine.start_update(132_000).unwrap();
        for chunk in image.chunks(4096) {
            engine.write_chunk(chunk).unwrap();
        }
        engine.finalize().unwrap();

        let status = engine.get_progress();
        assert_eq!(status.state, OtaState::Complete);
        assert_eq!(status.bytes_written, 132_000);
        assert_eq!(status.percentage, 100);
    }

    #[test]
    fn oversize_chunk_rejected_cleanly() {
        let engine = make_engine(1_048_576);
        engine.start_update(1000).unwrap();
        let err = engine.write_chunk(&vec![0u8; 2000]).unwrap_err();
        assert_eq!(err, OtaError::InsufficientSpace);
        assert_eq!(engine.get_progress().state, OtaState::Receiving);
        assert_eq!(engine.get_progress().bytes_written, 0);
        engine.abort().unwrap();
        assert_eq!(engine.get_progress().state, OtaState::Idle);
    }

    #[test]
    fn second_start_while_in_progress_fails() {
        let engine = make_engine(1_048_576);
        engine.start_update(1000).unwrap();
        assert_eq!(engine.start_update(1000).unwrap_err(), OtaError::AlreadyInProgress);
    }

    #[test]
    fn abort_always_returns_to_idle() {
        let engine = make_engine(1_048_576);
        engine.start_update(1000).unwrap();
        engine.write_chunk(&[1u8; 50]).unwrap();
        engine.abort().unwrap();
        assert_eq!(engine.get_progress().state, OtaState::Idle);
        engine.start_update(1000).unwrap();
    }

    #[test]
    fn invalid_magic_yields_error_state() {
        let engine = make_engine(1_048_576);
        engine.start_update(8).unwrap();
        engine.write_chunk(&[0u8; 8]).unwrap();
        let err = engine.finalize().unwrap_err();
        assert_eq!(err, OtaError::InvalidImage);
        assert_eq!(engine.get_progress().state, OtaState::Error);
    }

    #[test]
    fn percentage_zero_when_total_size_zero() {
        assert_eq!(percentage_of(0, 0), 0);
        assert_eq!(percentage_of(500, 0), 0);
    }

    #[test]
    fn progress_callback_observes_full_happy_path() {
        let engine = make_engine(1_048_576);
        let states: Arc<Mutex<Vec<OtaState>>> = Arc::new(Mutex::new(Vec::new()));
        let states_cb = states.clone();
        engine
            .register_progress_callback(move |status| states_cb.lock().unwrap().push(status.state))
            .unwrap();

        let mut image = vec![0xABu8; 100];
        image[0..4].copy_from_slice(&FIRMWARE_MAGIC);
        engine.start_update(100).unwrap();
        engine.write_chunk(&image).unwrap();
        engine.finalize().unwrap();

        let seen = states.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![OtaState::Receiving, OtaState::Validating, OtaState::Installing, OtaState::Complete]
        );
    }

    #[test]
    fn progress_callback_observes_abort() {
        let engine = make_engine(1_048_576);
        let states: Arc<Mutex<Vec<OtaState>>> = Arc::new(Mutex::new(Vec::new()));
        let states_cb = states.clone();
        engine
            .register_progress_callback(move |status| states_cb.lock().unwrap().push(status.state))
            .unwrap();

        engine.start_update(1000).unwrap();
        engine.abort().unwrap();

        let seen = states.lock().unwrap().clone();
        assert_eq!(seen, vec![OtaState::Receiving, OtaState::Idle]);
    }
}
