use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::StreamExt;
use rand::RngCore;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::file::{FileInfo, PartStream};

/// Storage-specific identity of a stored file.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Stored {
    /// Written to a file under the engine's destination directory.
    Disk {
        /// The destination directory the engine was configured with.
        destination: PathBuf,
        /// The generated file name within `destination`.
        file_name: String,
        /// Full path of the stored file.
        path: PathBuf,
    },
    /// Accumulated in memory.
    Memory {
        /// The complete file contents.
        buffer: Bytes,
    },
    /// Identity reported by an external storage engine.
    Custom(HashMap<String, String>),
}

/// What a storage engine reports back for a successfully stored file part.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Number of body bytes consumed from the part stream.
    pub size: u64,
    /// Storage-specific identity.
    pub stored: Stored,
}

/// Pluggable sink for a file part's byte stream.
///
/// An engine consumes the part's [`PartStream`] to completion and reports
/// size and identity. Errors (I/O failure, a size-limit condition injected
/// into the stream) must surface as a single `Err` value; the dispatcher
/// converts them to per-part notifications, so one failing part never
/// corrupts its siblings.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Persists one file part.
    async fn handle_file(&self, info: &FileInfo, stream: PartStream) -> crate::Result<FileRecord>;
}

/// Writes each file part to a file under a destination directory.
///
/// File names are 32 hex characters drawn from the thread RNG, so concurrent
/// requests never collide.
pub struct DiskStorage {
    destination: PathBuf,
}

impl DiskStorage {
    /// Creates the engine, creating `destination` if it doesn't exist yet.
    pub fn new<P: Into<PathBuf>>(destination: P) -> std::io::Result<DiskStorage> {
        let destination = destination.into();
        std::fs::create_dir_all(&destination)?;
        Ok(DiskStorage { destination })
    }

    fn random_file_name() -> String {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);

        let mut name = String::with_capacity(raw.len() * 2);
        for byte in raw.iter() {
            let _ = write!(name, "{:02x}", byte);
        }
        name
    }

    async fn write_to(path: &Path, mut stream: PartStream) -> crate::Result<u64> {
        let mut file = fs::File::create(path).await?;
        let mut size: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(size)
    }
}

#[async_trait]
impl StorageEngine for DiskStorage {
    async fn handle_file(&self, info: &FileInfo, stream: PartStream) -> crate::Result<FileRecord> {
        let file_name = DiskStorage::random_file_name();
        let path = self.destination.join(&file_name);

        log::debug!("writing '{}' to {:?}", info.file_name, path);

        match DiskStorage::write_to(&path, stream).await {
            Ok(size) => Ok(FileRecord {
                size,
                stored: Stored::Disk {
                    destination: self.destination.clone(),
                    file_name,
                    path,
                },
            }),
            Err(err) => {
                // Don't leave a partial file behind.
                let _ = fs::remove_file(&path).await;
                Err(err)
            }
        }
    }
}

/// Accumulates each file part into an in-memory byte buffer.
#[derive(Debug, Default)]
pub struct MemoryStorage;

impl MemoryStorage {
    /// Creates the engine.
    pub fn new() -> MemoryStorage {
        MemoryStorage
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn handle_file(&self, _info: &FileInfo, mut stream: PartStream) -> crate::Result<FileRecord> {
        let mut buf = BytesMut::new();

        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }

        Ok(FileRecord {
            size: buf.len() as u64,
            stored: Stored::Memory { buffer: buf.freeze() },
        })
    }
}
