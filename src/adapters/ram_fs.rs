//! RAM-backed filesystem overlay.
//!
//! Referenced but under-specified upstream: when no persistent storage is
//! present, the app registry and installed binaries may live in RAM. This is
//! an alternate implementation of the [`Filesystem`] collaborator that
//! discards everything on drop, not a branch inside app-manager logic — the
//! app manager never knows which `Filesystem` impl it was handed.

use std::collections::HashMap;

use crate::ports::{Filesystem, FsError};

/// In-memory filesystem. Directories are implicit: any path prefix is
/// considered to exist once a file under it has been written.
#[derive(Debug, Default)]
pub struct RamFilesystem {
    files: HashMap<String, Vec<u8>>,
}

impl RamFilesystem {
    pub fn new() -> Self {
        Self { files: HashMap::new() }
    }
}

impl Filesystem for RamFilesystem {
    fn mkdir(&mut self, _path: &str) -> Result<(), FsError> {
        // Directories are implicit in this overlay; nothing to persist.
        Ok(())
    }

    fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), FsError> {
        self.files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, FsError> {
        self.files.get(path).cloned().ok_or(FsError::NotFound)
    }

    fn delete_file(&mut self, path: &str) -> Result<(), FsError> {
        self.files.remove(path).map(|_| ()).ok_or(FsError::NotFound)
    }

    fn size(&self, path: &str) -> Result<u64, FsError> {
        self.files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or(FsError::NotFound)
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }
}
