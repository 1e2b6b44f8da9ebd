//! Path-bound file handles.
//!
//! A [`FileHandle`] is a path, an encoding and the right to enqueue work on
//! that path's chain. Every asynchronous operation is enqueued when the
//! method is called, so issue order is call order, and runs with
//! [`ChainPolicy::ContinueRegardless`]: one failed operation never holds up
//! the ones behind it.
//!
//! The `*_sync` methods run immediately on the calling thread and are not
//! ordered against queued operations on the same path.

use std::fmt;
use std::fs;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::encoding::Encoding;
use crate::error::{FileError, Result};
use crate::lines::{ensure_line_ending, ensure_line_ending_bytes, split_lines};
use crate::path;
use crate::registry::{ChainPolicy, OperationChain, PathQueueRegistry, Pending};

/// Data accepted by write and append operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Text, encoded with the handle's (or the options') encoding.
    Text(String),
    /// Raw bytes, written as-is.
    Bytes(Vec<u8>),
}

impl Payload {
    fn into_line(self) -> Self {
        match self {
            Payload::Text(text) => Payload::Text(ensure_line_ending(text)),
            Payload::Bytes(bytes) => Payload::Bytes(ensure_line_ending_bytes(bytes)),
        }
    }

    fn into_bytes(self, path: &str, encoding: Encoding) -> Result<Vec<u8>> {
        match self {
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::Text(text) => encoding.encode(text).ok_or_else(|| FileError::Encoding {
                path: path.to_string(),
                encoding: encoding.to_string(),
            }),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

/// Options for write and append operations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Permission bits for a newly created file. Ignored if the file exists
    /// and on non-unix platforms.
    pub mode: Option<u32>,
    /// Overrides the handle's encoding for text payloads.
    pub encoding: Option<Encoding>,
}

impl WriteOptions {
    /// Options with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the creation mode.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the encoding for text payloads.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }
}

/// A file path whose operations are serialized through a registry.
pub struct FileHandle {
    registry: PathQueueRegistry,
    chain: Arc<OperationChain>,
    path: String,
    encoding: Encoding,
}

impl FileHandle {
    /// Create a handle using the registry's default encoding.
    pub fn new(registry: &PathQueueRegistry, path: impl Into<String>) -> Self {
        Self::with_encoding(registry, path, registry.options().encoding)
    }

    /// Create a handle with an explicit encoding.
    pub fn with_encoding(
        registry: &PathQueueRegistry,
        path: impl Into<String>,
        encoding: Encoding,
    ) -> Self {
        let path = path.into();
        let chain = registry.attach_handle(&path);
        Self {
            registry: registry.clone(),
            chain,
            path,
            encoding,
        }
    }

    /// Path this handle was created with.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Final path component.
    pub fn name(&self) -> &str {
        path::file_name(&self.path)
    }

    /// Extension of [`name`](Self::name), without the dot.
    pub fn ext(&self) -> Option<&str> {
        path::extension(&self.path)
    }

    /// Handle for the parent directory, sharing this handle's registry.
    ///
    /// `None` for a root or for a bare relative name like `"a.txt"`.
    pub fn dir(&self) -> Option<FileHandle> {
        path::parent(&self.path)
            .map(|parent| FileHandle::with_encoding(&self.registry, parent, self.encoding))
    }

    /// Encoding used for text reads and writes.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    fn enqueue<T, F>(&self, operation: F) -> Pending<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        self.registry
            .enqueue(&self.chain, ChainPolicy::ContinueRegardless, operation)
    }

    /// Read the whole file as text.
    pub fn read(&self) -> Pending<String> {
        let path = self.path.clone();
        let encoding = self.encoding;
        self.enqueue(async move { read_text(&path, encoding).await })
    }

    /// Read the whole file as bytes.
    pub fn read_bytes(&self) -> Pending<Vec<u8>> {
        let path = self.path.clone();
        self.enqueue(async move {
            tokio::fs::read(&path)
                .await
                .map_err(|e| FileError::from_io(&path, e))
        })
    }

    /// Read the file and split it on `\n` / `\r\n`.
    pub fn read_lines(&self) -> Pending<Vec<String>> {
        let path = self.path.clone();
        let encoding = self.encoding;
        self.enqueue(async move {
            let text = read_text(&path, encoding).await?;
            Ok(split_lines(&text))
        })
    }

    /// Replace the file's content, creating the parent directory if needed.
    pub fn write(&self, data: impl Into<Payload>, options: WriteOptions) -> Pending<()> {
        self.put(data.into(), options, false)
    }

    /// Like [`write`](Self::write), terminating `data` with one line ending.
    pub fn write_line(&self, data: impl Into<Payload>, options: WriteOptions) -> Pending<()> {
        self.put(data.into().into_line(), options, false)
    }

    /// Append to the file, creating it and its parent directory if needed.
    pub fn append(&self, data: impl Into<Payload>, options: WriteOptions) -> Pending<()> {
        self.put(data.into(), options, true)
    }

    /// Like [`append`](Self::append), terminating `data` with one line ending.
    pub fn append_line(&self, data: impl Into<Payload>, options: WriteOptions) -> Pending<()> {
        self.put(data.into().into_line(), options, true)
    }

    fn put(&self, data: Payload, options: WriteOptions, append: bool) -> Pending<()> {
        // Enqueued now on the parent's own queue, awaited inside our slot.
        let dir_ready = self
            .dir()
            .map(|dir| dir.mkdir(self.registry.options().dir_mode));
        let path = self.path.clone();
        let encoding = options.encoding.unwrap_or(self.encoding);

        self.enqueue(async move {
            if let Some(dir_ready) = dir_ready {
                dir_ready.await?;
            }
            let bytes = data.into_bytes(&path, encoding)?;
            trace!(path = %path, bytes = bytes.len(), append, "Writing file");

            let mut open = tokio::fs::OpenOptions::new();
            open.write(true).create(true);
            if append {
                open.append(true);
            } else {
                open.truncate(true);
            }
            #[cfg(unix)]
            if let Some(mode) = options.mode {
                open.mode(mode);
            }

            let io_err = |e| FileError::from_io(&path, e);
            let mut file = open.open(&path).await.map_err(io_err)?;
            file.write_all(&bytes).await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
            Ok(())
        })
    }

    /// Remove the file. A file that is already gone counts as success.
    pub fn delete(&self) -> Pending<()> {
        let path = self.path.clone();
        self.enqueue(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    trace!(path = %path, "Delete of missing file");
                    Ok(())
                }
                Err(e) => Err(FileError::from_io(&path, e)),
            }
        })
    }

    /// True if the path is a file or a directory.
    pub fn exists(&self) -> Pending<bool> {
        let path = self.path.clone();
        self.enqueue(async move {
            Ok(stat(&path)
                .await?
                .is_some_and(|meta| meta.is_file() || meta.is_dir()))
        })
    }

    /// True if the path exists and is a regular file.
    pub fn is_file(&self) -> Pending<bool> {
        let path = self.path.clone();
        self.enqueue(async move { Ok(stat(&path).await?.is_some_and(|meta| meta.is_file())) })
    }

    /// True if the path exists and is a directory.
    pub fn is_dir(&self) -> Pending<bool> {
        let path = self.path.clone();
        self.enqueue(async move { is_dir(&path).await })
    }

    /// Create the directory, and any missing ancestors, unless it already
    /// is one.
    pub fn mkdir(&self, mode: Option<u32>) -> Pending<()> {
        let path = self.path.clone();
        self.enqueue(async move {
            if is_dir(&path).await? {
                return Ok(());
            }
            trace!(path = %path, "Creating directory");

            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            if let Some(mode) = mode {
                builder.mode(mode);
            }
            #[cfg(not(unix))]
            let _ = mode;

            builder
                .create(&path)
                .await
                .map_err(|e| FileError::from_io(&path, e))
        })
    }

    /// Blocking read that bypasses the queue.
    pub fn read_sync(&self) -> Result<String> {
        let bytes = fs::read(&self.path).map_err(|e| FileError::from_io(&self.path, e))?;
        decode(&self.path, bytes, self.encoding)
    }

    /// Blocking [`read_lines`](Self::read_lines) that bypasses the queue.
    pub fn read_lines_sync(&self) -> Result<Vec<String>> {
        Ok(split_lines(&self.read_sync()?))
    }

    /// Blocking [`exists`](Self::exists) that bypasses the queue.
    pub fn exists_sync(&self) -> Result<bool> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.is_file() || meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(FileError::from_io(&self.path, e)),
        }
    }
}

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        self.registry.retain_handle(&self.chain);
        Self {
            registry: self.registry.clone(),
            chain: Arc::clone(&self.chain),
            path: self.path.clone(),
            encoding: self.encoding,
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.registry.release_handle(&self.chain);
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

async fn stat(path: &str) -> Result<Option<std::fs::Metadata>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FileError::from_io(path, e)),
    }
}

async fn is_dir(path: &str) -> Result<bool> {
    Ok(stat(path).await?.is_some_and(|meta| meta.is_dir()))
}

async fn read_text(path: &str, encoding: Encoding) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| FileError::from_io(path, e))?;
    decode(path, bytes, encoding)
}

fn decode(path: &str, bytes: Vec<u8>, encoding: Encoding) -> Result<String> {
    encoding.decode(bytes).ok_or_else(|| FileError::Encoding {
        path: path.to_string(),
        encoding: encoding.to_string(),
    })
}
