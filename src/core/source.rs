// Read-only byte views over mapped files or frozen in-memory buffers.
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use fs2::FileExt;
use memmap2::Mmap;
use tempfile::TempPath;

use crate::core::error::{Error, ErrorKind};

/// Immutable, randomly addressable bytes `[0, size)`.
///
/// Both variants are `Send + Sync`; indexing shards and later materializers share
/// one source behind an `Arc`.
#[derive(Debug)]
pub enum ByteSource {
    Mapped(MappedFile),
    Buffered(Bytes),
}

impl ByteSource {
    pub fn map(path: impl AsRef<Path>) -> Result<Self, Error> {
        MappedFile::open(path.as_ref(), None).map(Self::Mapped)
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Buffered(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped(mapped) => mapped.as_slice(),
            Self::Buffered(bytes) => bytes.as_ref(),
        }
    }

    pub fn size(&self) -> u64 {
        self.as_slice().len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Whether the last byte is a line feed. Empty sources have none.
    pub fn has_trailing_newline(&self) -> bool {
        self.as_slice().last() == Some(&b'\n')
    }

    pub fn byte_at(&self, offset: u64) -> Option<u8> {
        let offset = usize::try_from(offset).ok()?;
        self.as_slice().get(offset).copied()
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<&[u8], Error> {
        let bytes = self.as_slice();
        let start = usize::try_from(offset).ok();
        let range = start.and_then(|start| Some(start..start.checked_add(len)?));
        match range {
            Some(range) if range.end <= bytes.len() => Ok(&bytes[range]),
            _ => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("read of {len} bytes out of range (size {})", bytes.len()))
                .with_offset(offset)),
        }
    }

    /// Path of the file behind a mapped source.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Mapped(mapped) => Some(mapped.path()),
            Self::Buffered(_) => None,
        }
    }
}

/// A file mapped read-only for the lifetime of the value.
///
/// Holds a shared advisory lock while mapped. A temporary backing file created
/// during stream ingestion is owned here and removed after the map is released.
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    locked: bool,
    mmap: Option<Mmap>,
    _temp: Option<TempPath>,
}

impl MappedFile {
    pub(crate) fn open(path: &Path, temp: Option<TempPath>) -> Result<Self, Error> {
        let file = File::open(path).map_err(|err| Error::from_io(err).with_path(path))?;

        let len = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| Error::from_io(err).with_path(path))?;

        let locked = match FileExt::try_lock_shared(&file) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Err(Error::new(ErrorKind::Busy)
                    .with_message("file is exclusively locked by another writer")
                    .with_path(path)
                    .with_source(err));
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "shared lock unavailable; mapping unlocked");
                false
            }
        };

        let mmap = if len == 0 {
            None
        } else {
            let mmap = unsafe {
                Mmap::map(&file).map_err(|err| {
                    Error::from_io(err)
                        .with_message("failed to map file")
                        .with_path(path)
                })?
            };
            Some(mmap)
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            locked,
            mmap,
            _temp: temp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    pub fn is_temporary(&self) -> bool {
        self._temp.is_some()
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        self.mmap = None;
        if self.locked {
            let _ = FileExt::unlock(&self.file);
        }
    }
}

/// Growable buffer that becomes a [`ByteSource::Buffered`] once frozen.
#[derive(Debug, Default)]
pub struct SourceBuilder {
    buf: BytesMut,
    frozen: bool,
}

impl SourceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            frozen: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn append(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if self.frozen {
            return Err(Error::new(ErrorKind::Usage).with_message("append to a frozen source"));
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    pub fn freeze(&mut self) -> Result<ByteSource, Error> {
        if self.frozen {
            return Err(Error::new(ErrorKind::Usage).with_message("source already frozen"));
        }
        self.frozen = true;
        Ok(ByteSource::Buffered(std::mem::take(&mut self.buf).freeze()))
    }
}
