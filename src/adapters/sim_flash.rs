//! In-memory `FlashArea`/`FlashDriver`/`Bootloader` fakes for host tests.
//!
//! Real flash is opaque to this crate (see the collaborator contracts in
//! `ports.rs`); these adapters give the OTA engine something to write into
//! on a developer machine so the state machine, alignment padding, and
//! progress accounting can be exercised without hardware.

use crate::ports::{Bootloader, BootloaderError, FlashArea, FlashDriver, FlashError};

/// A flash slot backed by a `Vec<u8>`, pre-filled with the erase value
/// (`0xFF`) the way real NOR flash reads after erase.
pub struct SimFlashArea {
    data: Vec<u8>,
    alignment: u32,
    open: bool,
}

impl SimFlashArea {
    pub fn new(size: u32, alignment: u32) -> Self {
        Self { data: vec![0xFFu8; size as usize], alignment, open: true }
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }
}

impl FlashArea for SimFlashArea {
    fn erase(&mut self, offset: u32, len: u32) -> Result<(), FlashError> {
        let (offset, len) = (offset as usize, len as usize);
        if offset + len > self.data.len() {
            return Err(FlashError::OutOfBounds);
        }
        self.data[offset..offset + len].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), FlashError> {
        let offset = offset as usize;
        if offset + buf.len() > self.data.len() {
            return Err(FlashError::OutOfBounds);
        }
        if offset as u32 % self.alignment != 0 {
            return Err(FlashError::WriteFailed);
        }
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }

    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let offset = offset as usize;
        if offset + buf.len() > self.data.len() {
            return Err(FlashError::OutOfBounds);
        }
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn alignment(&self) -> u32 {
        self.alignment
    }

    fn size(&self) -> u32 {
        self.data.len() as u32
    }
}

impl Drop for SimFlashArea {
    fn drop(&mut self) {
        self.open = false;
    }
}

/// Hands out a fresh [`SimFlashArea`] each time the secondary slot is opened,
/// as a real flash driver would after the previous handle is closed.
pub struct SimFlashDriver {
    slot_size: u32,
    alignment: u32,
}

impl SimFlashDriver {
    pub fn new(slot_size: u32, alignment: u32) -> Self {
        Self { slot_size, alignment }
    }
}

impl FlashDriver for SimFlashDriver {
    type Area = SimFlashArea;

    fn open_secondary(&mut self) -> Result<Self::Area, FlashError> {
        Ok(SimFlashArea::new(self.slot_size, self.alignment))
    }
}

/// Bootloader fake recording what was requested, for assertions in tests.
#[derive(Debug, Default)]
pub struct SimBootloader {
    pub upgrade_requests: Vec<bool>,
    pub confirms: u32,
    pub reboots: Vec<bool>,
    pub fail_request: bool,
}

impl Bootloader for SimBootloader {
    fn request_upgrade(&mut self, test: bool) -> Result<(), BootloaderError> {
        if self.fail_request {
            return Err(BootloaderError::RequestFailed);
        }
        self.upgrade_requests.push(test);
        Ok(())
    }

    fn confirm(&mut self) -> Result<(), BootloaderError> {
        self.confirms += 1;
        Ok(())
    }

    fn reboot(&mut self, warm: bool) {
        self.reboots.push(warm);
    }
}
