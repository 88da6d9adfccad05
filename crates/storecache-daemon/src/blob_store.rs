//! Blob File Store - one file per cached reference
//!
//! Pure byte-level storage with no caching policy. Every blob lives in a file
//! named by the hex encoding of its reference, so the index can be rebuilt
//! from a directory scan alone. Files are fanned out by the first byte of
//! SHA-256 of the reference.
//!
//! # File Layout
//! ```text
//! <cache_dir>/storecache/
//! └── 3f/
//!     ├── 6162636465...              # blob for reference "abcde..."
//!     └── 6162636465....41-7.tmp     # in-progress write, never indexed
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, trace, warn};

use storecache_core::{Reference, StoreError};

/// Longest file name we create (common filesystem limit)
const MAX_FILE_NAME_LEN: usize = 255;

/// Suffix of in-progress writes
const TMP_SUFFIX: &str = "tmp";

/// Blob file errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobStoreError {
    #[error("I/O error on {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("size mismatch: expected {expected} bytes, found {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("reference too long for a file name ({0} bytes)")]
    NameTooLong(usize),
}

impl BlobStoreError {
    fn io(path: &Path, e: std::io::Error) -> Self {
        BlobStoreError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

impl From<BlobStoreError> for StoreError {
    fn from(e: BlobStoreError) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// A blob found on disk during startup reconciliation
#[derive(Debug, Clone)]
pub struct ScannedBlob {
    pub reference: Reference,
    pub location: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Byte-level storage of blobs under a root directory
pub struct BlobFileStore {
    root: PathBuf,
    /// Distinguishes temp files of concurrent writers
    tmp_seq: AtomicU64,
}

impl BlobFileStore {
    /// Open (creating if needed) the blob directory
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobStoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| BlobStoreError::io(&root, e))?;
        debug!("Blob store directory: {:?}", root);
        Ok(Self {
            root,
            tmp_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path for a reference
    pub fn location_for(&self, reference: &Reference) -> Result<PathBuf, BlobStoreError> {
        let name = hex::encode(reference.as_bytes());
        if name.is_empty() || name.len() + TMP_SUFFIX.len() + 24 > MAX_FILE_NAME_LEN {
            return Err(BlobStoreError::NameTooLong(reference.len()));
        }
        Ok(self.root.join(fan_out(reference)).join(name))
    }

    /// Write a blob (atomic: tmp file + rename) and return its location
    pub fn write(&self, reference: &Reference, data: &[u8]) -> Result<PathBuf, BlobStoreError> {
        let target_path = self.location_for(reference)?;

        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent).map_err(|e| BlobStoreError::io(parent, e))?;
        }

        let temp_path = self.temp_path(&target_path);
        if let Err(e) = Self::write_temp(&temp_path, data) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &target_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(BlobStoreError::io(&target_path, e));
        }

        trace!("blob_store: wrote {} bytes to {:?}", data.len(), target_path);
        Ok(target_path)
    }

    fn temp_path(&self, target: &Path) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!(
            "{}.{}-{}.{}",
            name,
            std::process::id(),
            seq,
            TMP_SUFFIX
        ))
    }

    fn write_temp(temp_path: &Path, data: &[u8]) -> Result<(), BlobStoreError> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)
            .map_err(|e| BlobStoreError::io(temp_path, e))?;

        file.write_all(data)
            .map_err(|e| BlobStoreError::io(temp_path, e))?;
        file.sync_all()
            .map_err(|e| BlobStoreError::io(temp_path, e))?;

        let written = file
            .metadata()
            .map_err(|e| BlobStoreError::io(temp_path, e))?
            .len();
        if written != data.len() as u64 {
            return Err(BlobStoreError::SizeMismatch {
                expected: data.len() as u64,
                actual: written,
            });
        }
        Ok(())
    }

    /// Read a whole blob, checking it has exactly `expected_size` bytes
    pub fn read(&self, location: &Path, expected_size: u64) -> Result<Vec<u8>, BlobStoreError> {
        let mut file = File::open(location).map_err(|e| BlobStoreError::io(location, e))?;

        let mut data = Vec::with_capacity(expected_size as usize);
        file.read_to_end(&mut data)
            .map_err(|e| BlobStoreError::io(location, e))?;

        if data.len() as u64 != expected_size {
            return Err(BlobStoreError::SizeMismatch {
                expected: expected_size,
                actual: data.len() as u64,
            });
        }

        trace!("blob_store: read {} bytes from {:?}", data.len(), location);
        Ok(data)
    }

    /// Size of the file at `location`
    pub fn stat(&self, location: &Path) -> Result<u64, BlobStoreError> {
        fs::metadata(location)
            .map(|m| m.len())
            .map_err(|e| BlobStoreError::io(location, e))
    }

    /// Delete a blob file. A file that is already gone is not an error.
    pub fn delete(&self, location: &Path) -> Result<(), BlobStoreError> {
        match fs::remove_file(location) {
            Ok(()) => {
                trace!("blob_store: deleted {:?}", location);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobStoreError::io(location, e)),
        }
    }

    /// Walk the directory, returning every valid blob and removing orphans.
    ///
    /// Temp files, names that do not decode to a reference, and files sitting
    /// in the wrong fan-out directory are deleted and logged. Failure to read
    /// the root itself is an error.
    pub fn scan(&self) -> Result<Vec<ScannedBlob>, BlobStoreError> {
        let mut blobs = Vec::new();

        for entry in fs::read_dir(&self.root).map_err(|e| BlobStoreError::io(&self.root, e))? {
            let entry = entry.map_err(|e| BlobStoreError::io(&self.root, e))?;
            let path = entry.path();

            if !path.is_dir() {
                self.remove_orphan(&path, "not inside a fan-out directory");
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            if !is_fan_out_name(&dir_name) {
                warn!("Skipping unexpected directory in blob store: {:?}", path);
                continue;
            }

            self.scan_fan_out_dir(&path, &dir_name, &mut blobs)?;
        }

        Ok(blobs)
    }

    fn scan_fan_out_dir(
        &self,
        dir: &Path,
        dir_name: &str,
        blobs: &mut Vec<ScannedBlob>,
    ) -> Result<(), BlobStoreError> {
        for entry in fs::read_dir(dir).map_err(|e| BlobStoreError::io(dir, e))? {
            let entry = entry.map_err(|e| BlobStoreError::io(dir, e))?;
            let path = entry.path();

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Cannot stat {:?}, skipping: {}", path, e);
                    continue;
                }
            };
            if !metadata.is_file() {
                warn!("Skipping non-file entry in blob store: {:?}", path);
                continue;
            }

            if path.extension().is_some_and(|ext| ext == TMP_SUFFIX) {
                self.remove_orphan(&path, "interrupted write");
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(reference) = decode_name(&name) else {
                self.remove_orphan(&path, "name is not a reference");
                continue;
            };
            if fan_out(&reference) != dir_name {
                self.remove_orphan(&path, "wrong fan-out directory");
                continue;
            }

            blobs.push(ScannedBlob {
                reference,
                location: path,
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(())
    }

    fn remove_orphan(&self, path: &Path, reason: &str) {
        warn!("Removing orphaned cache file {:?}: {}", path, reason);
        if let Err(e) = self.delete(path) {
            warn!("Failed to remove orphan {:?}: {}", path, e);
        }
    }
}

/// Fan-out directory name: first byte of SHA-256(reference) in hex
fn fan_out(reference: &Reference) -> String {
    let digest = Sha256::digest(reference.as_bytes());
    hex::encode(&digest[..1])
}

fn is_fan_out_name(name: &str) -> bool {
    name.len() == 2 && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Recover a reference from a blob file name; only canonical lowercase hex
fn decode_name(name: &str) -> Option<Reference> {
    if name.is_empty() || name.bytes().any(|b| matches!(b, b'A'..=b'F')) {
        return None;
    }
    hex::decode(name).ok().map(Reference::from)
}
