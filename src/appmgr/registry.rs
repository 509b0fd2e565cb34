//! Persistent table of installed apps: fixed-size slot array, serialized to
//! a single file with a magic/version/count/CRC header.
//!
//! The CRC in the header is a true CRC-32 (IEEE) computed over the
//! header-and-entries region with the CRC field zeroed during computation —
//! resolving the open question left by the upstream placeholder checksum —
//! and loads whose CRC doesn't match are rejected outright.

use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};

use crate::appmgr::AppError;
use crate::ports::{ContainerId, Filesystem, FsError};

pub const REGISTRY_MAGIC: u32 = 0x414B_4150;
pub const REGISTRY_VERSION: u8 = 1;
pub const REGISTRY_PATH: &str = "apps.registry";
pub const WASM_MAGIC: [u8; 4] = *b"\0asm";

const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const HEADER_LEN: usize = 4 + 1 + 1 + 2 + 4; // magic, version, app_count, reserved, crc

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    New,
    Installed,
    Running,
    Stopped,
    Error,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppSource {
    Http,
    Ble,
    Usb,
    Sd,
    Firmware,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_retries: u16,
    pub delay_ms: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { enabled: false, max_retries: 0, delay_ms: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEntry {
    pub id: u16,
    pub name: String,
    pub version: String,
    pub state: AppState,
    pub size: u32,
    pub heap_kb: u16,
    pub stack_kb: u16,
    pub permissions: u32,
    pub source: AppSource,
    pub container_id: ContainerId,
    pub crash_count: u16,
    pub restart_policy: RestartPolicy,
    pub install_time: u64,
    pub last_start_time: u64,
    pub is_preloaded: bool,
}

impl AppEntry {
    pub fn binary_path(&self) -> String {
        format!("apps/{:03}_{}.wasm", self.id, self.name)
    }

    pub fn data_dir(&self) -> String {
        format!("app_data/{}/", self.name)
    }
}

/// Validate the first four bytes of a candidate WASM binary and its size.
pub fn validate_binary(bytes: &[u8], max_size: u32) -> Result<(), AppError> {
    if bytes.len() < 4 || bytes[0..4] != WASM_MAGIC {
        return Err(AppError::InvalidImage);
    }
    if bytes.len() as u32 > max_size {
        return Err(AppError::TooLarge);
    }
    Ok(())
}

/// Fixed-size table of `AppEntry` slots, persisted as a single file.
pub struct Registry {
    slots: Vec<Option<AppEntry>>,
}

impl Registry {
    pub fn new(capacity: u16) -> Self {
        Self { slots: vec![None; capacity as usize] }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn app_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn get(&self, id: u16) -> Option<&AppEntry> {
        self.slots.iter().flatten().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: u16) -> Option<&mut AppEntry> {
        self.slots.iter_mut().flatten().find(|e| e.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&AppEntry> {
        self.slots.iter().flatten().find(|e| e.name == name)
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut AppEntry> {
        self.slots.iter_mut().flatten().find(|e| e.name == name)
    }

    pub fn list(&self) -> impl Iterator<Item = &AppEntry> {
        self.slots.iter().flatten()
    }

    /// Names are unique across entries (case-sensitive exact match).
    pub fn name_taken(&self, name: &str) -> bool {
        self.find_by_name(name).is_some()
    }

    /// Insert `entry` into the first free slot, assigning it the lowest
    /// unused id. Returns `NoMemory` if the table is full.
    pub fn insert(&mut self, mut entry: AppEntry) -> Result<u16, AppError> {
        let Some(idx) = self.slots.iter().position(Option::is_none) else {
            return Err(AppError::NoMemory);
        };
        let used_ids: std::collections::HashSet<u16> =
            self.slots.iter().flatten().map(|e| e.id).collect();
        let id = (1..=self.slots.len() as u16).find(|id| !used_ids.contains(id)).unwrap();
        entry.id = id;
        self.slots[idx] = Some(entry);
        Ok(id)
    }

    pub fn remove(&mut self, id: u16) -> Option<AppEntry> {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|e| e.id == id) {
                return slot.take();
            }
        }
        None
    }

    /// Serialize the registry to the on-disk layout: header (magic,
    /// version, app_count, reserved, true CRC-32 over the zeroed-CRC
    /// region) followed by postcard-encoded entries.
    pub fn save(&self, fs: &mut dyn Filesystem) -> Result<(), AppError> {
        let entries: Vec<&AppEntry> = self.slots.iter().flatten().collect();
        let entries_bytes =
            postcard::to_allocvec(&entries).map_err(|_| AppError::RuntimeFailed)?;

        let mut buf = Vec::with_capacity(HEADER_LEN + entries_bytes.len());
        buf.extend_from_slice(&REGISTRY_MAGIC.to_le_bytes());
        buf.push(REGISTRY_VERSION);
        buf.push(entries.len() as u8);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // CRC placeholder, zeroed for computation
        buf.extend_from_slice(&entries_bytes);

        let crc = CRC.checksum(&buf);
        buf[8..12].copy_from_slice(&crc.to_le_bytes());

        fs.write_file(REGISTRY_PATH, &buf).map_err(app_error_from_fs)
    }

    /// Load the registry file, validating magic, version and CRC. On
    /// success, any entry whose state was `Running` is demoted to
    /// `Installed` and its `container_id` reset — no app is really running
    /// yet immediately after boot.
    pub fn load(fs: &mut dyn Filesystem, capacity: u16) -> Result<Self, AppError> {
        let buf = match fs.read_file(REGISTRY_PATH) {
            Ok(b) => b,
            Err(FsError::NotFound) => return Ok(Self::new(capacity)),
            Err(e) => return Err(app_error_from_fs(e)),
        };
        if buf.len() < HEADER_LEN {
            return Err(AppError::InvalidImage);
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let version = buf[4];
        let app_count = buf[5];
        let stored_crc = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if magic != REGISTRY_MAGIC || version != REGISTRY_VERSION {
            return Err(AppError::InvalidImage);
        }

        let mut zeroed = buf.clone();
        zeroed[8..12].copy_from_slice(&0u32.to_le_bytes());
        if CRC.checksum(&zeroed) != stored_crc {
            return Err(AppError::InvalidImage);
        }

        let entries: Vec<AppEntry> =
            postcard::from_bytes(&buf[HEADER_LEN..]).map_err(|_| AppError::InvalidImage)?;
        if entries.len() != app_count as usize {
            return Err(AppError::InvalidImage);
        }

        let mut registry = Self::new(capacity);
        for mut entry in entries {
            if entry.state == AppState::Running {
                entry.state = AppState::Installed;
                entry.container_id = 0;
            }
            if let Some(slot) = registry.slots.iter_mut().find(|s| s.is_none()) {
                *slot = Some(entry);
            }
        }
        Ok(registry)
    }
}

fn app_error_from_fs(_: FsError) -> AppError {
    AppError::RuntimeFailed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ram_fs::RamFilesystem;

    fn sample_entry(name: &str) -> AppEntry {
        AppEntry {
            id: 0,
            name: name.to_string(),
            version: "1.0.0".to_string(),
            state: AppState::Installed,
            size: 1000,
            heap_kb: 64,
            stack_kb: 8,
            permissions: 0,
            source: AppSource::Http,
            container_id: 0,
            crash_count: 0,
            restart_policy: RestartPolicy::default(),
            install_time: 0,
            last_start_time: 0,
            is_preloaded: false,
        }
    }

    #[test]
    fn insert_assigns_unique_ids() {
        let mut reg = Registry::new(4);
        let id1 = reg.insert(sample_entry("a")).unwrap();
        let id2 = reg.insert(sample_entry("b")).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(reg.app_count(), 2);
    }

    #[test]
    fn insert_rejects_when_full() {
        let mut reg = Registry::new(1);
        reg.insert(sample_entry("a")).unwrap();
        assert_eq!(reg.insert(sample_entry("b")), Err(AppError::NoMemory));
    }

    #[test]
    fn save_load_round_trip_demotes_running() {
        let mut fs = RamFilesystem::new();
        let mut reg = Registry::new(4);
        let mut entry = sample_entry("blink");
        entry.state = AppState::Running;
        entry.container_id = 42;
        reg.insert(entry).unwrap();
        reg.save(&mut fs).unwrap();

        let loaded = Registry::load(&mut fs, 4).unwrap();
        let restored = loaded.find_by_name("blink").unwrap();
        assert_eq!(restored.state, AppState::Installed);
        assert_eq!(restored.container_id, 0);
    }

    #[test]
    fn load_rejects_corrupted_crc() {
        let mut fs = RamFilesystem::new();
        let mut reg = Registry::new(4);
        reg.insert(sample_entry("a")).unwrap();
        reg.save(&mut fs).unwrap();

        let mut bytes = fs.read_file(REGISTRY_PATH).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs.write_file(REGISTRY_PATH, &bytes).unwrap();

        assert_eq!(Registry::load(&mut fs, 4), Err(AppError::InvalidImage));
    }

    #[test]
    fn validate_binary_checks_magic_and_size() {
        assert!(validate_binary(b"\0asm\x01\x00\x00\x00", 256).is_ok());
        assert_eq!(validate_binary(b"not-wasm", 256), Err(AppError::InvalidImage));
        let big = vec![0u8; 10];
        let mut img = WASM_MAGIC.to_vec();
        img.extend(big);
        assert_eq!(validate_binary(&img, 4), Err(AppError::TooLarge));
    }
}
