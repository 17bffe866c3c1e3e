//! Purpose: Index a byte stream of unknown length while retaining its bytes.
//! Exports: `index_reader`.
//! Role: Streaming path; reads chunks, scans them in order and hands each chunk to a
//!   background writer that materializes the backing store.
//! Invariants: Two chunk buffers alternate; a buffer is reused only after the writer
//!   has returned it, so at most one write is outstanding.
//! Invariants: Offsets are absolute stream positions; the frozen backing store holds
//!   exactly the bytes read, so they address it directly.
//! Notes: The scanner carries state across chunks; chunk size never changes results.
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread;

use tempfile::TempPath;

use crate::core::assemble::assemble;
use crate::core::dialect::Dialect;
use crate::core::error::{Error, ErrorKind};
use crate::core::index::FieldIndex;
use crate::core::options::{BackingStore, IndexOptions};
use crate::core::progress::Progress;
use crate::core::scan::RegionIndexer;
use crate::core::source::{ByteSource, MappedFile, SourceBuilder};
use crate::core::table::ShardIndex;

struct Chunk {
    buf: Vec<u8>,
    len: usize,
}

struct Streamed {
    dialect: Dialect,
    table: ShardIndex,
    total: u64,
    chunks: u64,
}

enum Backing {
    Memory(SourceBuilder),
    File {
        file: BufWriter<File>,
        path: TempPath,
    },
}

impl Backing {
    fn create(store: &BackingStore) -> Result<Self, Error> {
        match store {
            BackingStore::Memory => Ok(Self::Memory(SourceBuilder::new())),
            BackingStore::TempFile { dir } => {
                let mut builder = tempfile::Builder::new();
                builder.prefix("delimdex-").suffix(".stream");
                let named = match dir {
                    Some(dir) => builder.tempfile_in(dir).map_err(|err| {
                        Error::from_io(err)
                            .with_message("failed to create backing file")
                            .with_path(dir)
                    })?,
                    None => builder.tempfile().map_err(|err| {
                        Error::from_io(err).with_message("failed to create backing file")
                    })?,
                };
                let (file, path) = named.into_parts();
                tracing::debug!(path = %path.display(), "streaming into temporary file");
                Ok(Self::File {
                    file: BufWriter::new(file),
                    path,
                })
            }
        }
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), Error> {
        match self {
            Self::Memory(builder) => builder.append(bytes),
            Self::File { file, path } => file.write_all(bytes).map_err(|err| {
                Error::from_io(err)
                    .with_message("failed to write backing file")
                    .with_path(path.to_path_buf())
            }),
        }
    }

    fn freeze(self) -> Result<ByteSource, Error> {
        match self {
            Self::Memory(mut builder) => builder.freeze(),
            Self::File { file, path } => {
                let target = path.to_path_buf();
                file.into_inner().map_err(|err| {
                    Error::from_io(err.into_error())
                        .with_message("failed to flush backing file")
                        .with_path(target.clone())
                })?;
                MappedFile::open(&target, Some(path)).map(ByteSource::Mapped)
            }
        }
    }
}

/// Streams `reader` to its end, indexing as it goes.
pub fn index_reader<R: Read>(
    mut reader: R,
    options: &IndexOptions,
    progress: &Progress,
) -> Result<FieldIndex, Error> {
    options.validate()?;
    let backing = Backing::create(&options.backing)?;
    let (to_writer, pending) = mpsc::sync_channel::<Chunk>(1);
    let (done, returned) = mpsc::channel::<Vec<u8>>();

    let (driven, written) = thread::scope(|scope| {
        let writer = scope.spawn(move || write_chunks(backing, pending, done));
        let driven = drive(&mut reader, options, progress, to_writer, &returned);
        (driven, writer.join())
    });

    let backing = match written {
        Ok(Ok(backing)) => backing,
        Ok(Err(err)) => return Err(err),
        Err(_) => {
            return Err(Error::new(ErrorKind::Internal).with_message("backing writer panicked"));
        }
    };
    let streamed = driven?;
    let source = backing.freeze()?;
    if source.size() != streamed.total {
        return Err(Error::new(ErrorKind::Internal).with_message(format!(
            "backing store holds {} bytes, stream produced {}",
            source.size(),
            streamed.total
        )));
    }
    tracing::debug!(
        bytes = streamed.total,
        chunks = streamed.chunks,
        records = streamed.table.records(),
        "stream materialized"
    );

    assemble(
        Arc::new(source),
        streamed.dialect,
        vec![streamed.table],
        options.has_header,
        options.max_rows,
    )
}

fn write_chunks(
    mut backing: Backing,
    pending: Receiver<Chunk>,
    done: Sender<Vec<u8>>,
) -> Result<Backing, Error> {
    for chunk in pending {
        backing.append(&chunk.buf[..chunk.len])?;
        // The driver stops listening after its last chunk.
        let _ = done.send(chunk.buf);
    }
    Ok(backing)
}

fn writer_gone() -> Error {
    Error::new(ErrorKind::Internal).with_message("backing writer stopped early")
}

fn drive<R: Read>(
    reader: &mut R,
    options: &IndexOptions,
    progress: &Progress,
    to_writer: SyncSender<Chunk>,
    returned: &Receiver<Vec<u8>>,
) -> Result<Streamed, Error> {
    let chunk_size = options.chunk_size;
    let mut first = vec![0u8; chunk_size];
    let mut first_len = fill(reader, &mut first)?;
    if first_len == 0 {
        return Err(Error::new(ErrorKind::Empty).with_message("stream is empty"));
    }
    // The first chunk grows until sniffing sees what it would see on a mapped source.
    while first_len == first.len() && !options.sample_ready(&first[..first_len])? {
        first.resize(first_len + chunk_size, 0);
        let read = fill(reader, &mut first[first_len..]).map_err(|err| {
            let offset = err.offset().unwrap_or(0) + first_len as u64;
            err.with_offset(offset)
        })?;
        first_len += read;
    }
    if first_len > chunk_size {
        tracing::debug!(bytes = first_len, chunk_size, "extended first chunk for sniffing");
    }
    let dialect = options.dialect(&first[..first_len])?;
    let mut slots = [Some(first), Some(vec![0u8; chunk_size])];

    let mut scanner = RegionIndexer::new(&dialect, 0, options.skip);
    let mut table = ShardIndex::new(None, options.record_limit());
    let mut next_len = Some(first_len);
    let mut parity = 0usize;
    let mut total = 0u64;
    let mut chunks = 0u64;
    let mut in_flight = false;

    loop {
        let mut buf = slots[parity].take().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("chunk buffer still in flight")
        })?;
        let len = match next_len.take() {
            Some(len) => len,
            None => fill(reader, &mut buf[..chunk_size]).map_err(|err| {
                let offset = err.offset().unwrap_or(0) + total;
                err.with_offset(offset)
            })?,
        };
        if len == 0 {
            break;
        }

        scanner.scan_with_progress(&buf[..len], total, &mut table, progress);
        if in_flight {
            let prev = returned.recv().map_err(|_| writer_gone())?;
            slots[parity ^ 1] = Some(prev);
        }
        to_writer
            .send(Chunk { buf, len })
            .map_err(|_| writer_gone())?;
        in_flight = true;
        total += len as u64;
        chunks += 1;
        parity ^= 1;
    }

    if in_flight {
        returned.recv().map_err(|_| writer_gone())?;
    }
    scanner.finish(total, &mut table);
    Ok(Streamed {
        dialect,
        table,
        total,
        chunks,
    })
}

/// Reads until `buf` is full or the stream ends. Returns the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(Error::from_io(err)
                    .with_message("failed to read stream")
                    .with_offset(filled as u64));
            }
        }
    }
    Ok(filled)
}
