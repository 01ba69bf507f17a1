//! Append-only zip writer
//!
//! A streamed entry is written as a local header, its data, and a trailing
//! data descriptor, so no byte is ever revisited once emitted. Data already
//! in hand goes through [`ZipStreamWriter::add_stored`] with its CRC and
//! sizes in the local header. Output leaves the
//! writer as a sequence of chunks handed to a [`ChunkSink`]; the chunk that
//! closes the archive is flagged `last`.

use crate::bundle::{ArchiveError, ArchiveResult};
use crate::compression::{CompressionLevel, DeflateStream};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

const VERSION: u16 = 20;
/// Names are UTF-8
const FLAG_UTF8: u16 = 0x0800;
/// Sizes and CRC follow the data
const FLAG_DESCRIPTOR: u16 = 0x0008;
const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;
/// 1980-01-01 00:00, keeps output reproducible
const DOS_TIME: u16 = 0;
const DOS_DATE: u16 = (1 << 5) | 1;
const DIRECTORY_ATTRIBUTE: u32 = 0x10;

/// Receives archive output as it is produced
pub trait ChunkSink {
    fn accept(&mut self, chunk: Vec<u8>, last: bool) -> ArchiveResult<()>;
}

/// Sink that keeps every chunk in memory
#[derive(Debug, Default)]
pub struct ChunkCollector {
    chunks: Vec<Vec<u8>>,
    complete: bool,
}

impl ChunkSink for ChunkCollector {
    fn accept(&mut self, chunk: Vec<u8>, last: bool) -> ArchiveResult<()> {
        self.chunks.push(chunk);
        self.complete = last;
        Ok(())
    }
}

impl ChunkCollector {
    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Concatenate the chunks of a finished archive
    pub fn into_bytes(self) -> ArchiveResult<Vec<u8>> {
        if !self.complete {
            return Err(ArchiveError::Incomplete);
        }
        Ok(self.chunks.concat())
    }
}

/// How an entry's data is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMethod {
    Deflate,
    /// Copied verbatim, for data that is already compressed
    Store,
}

#[derive(Debug)]
struct CentralRecord {
    name: Vec<u8>,
    flags: u16,
    method: u16,
    crc: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    header_offset: u32,
    external_attributes: u32,
}

pub struct ZipStreamWriter<S: ChunkSink> {
    sink: S,
    level: CompressionLevel,
    offset: u64,
    directory: Vec<CentralRecord>,
    open_entry: Option<String>,
}

impl<S: ChunkSink> ZipStreamWriter<S> {
    pub fn new(sink: S, level: CompressionLevel) -> Self {
        Self {
            sink,
            level,
            offset: 0,
            directory: Vec::new(),
            open_entry: None,
        }
    }

    /// Bytes emitted so far
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    pub fn entry_count(&self) -> usize {
        self.directory.len()
    }

    fn emit(&mut self, chunk: Vec<u8>, last: bool) -> ArchiveResult<()> {
        if chunk.is_empty() && !last {
            return Ok(());
        }
        self.offset += chunk.len() as u64;
        self.sink.accept(chunk, last)
    }

    fn ensure_no_open_entry(&self) -> ArchiveResult<()> {
        match &self.open_entry {
            Some(path) => Err(ArchiveError::UnfinishedEntry { path: path.clone() }),
            None => Ok(()),
        }
    }

    /// Check `path` and the archive limits before a new local header
    fn entry_name(&self, path: &str) -> ArchiveResult<(Vec<u8>, u32)> {
        self.ensure_no_open_entry()?;
        if path.is_empty() || path.starts_with('/') || path.contains('\0') {
            return Err(ArchiveError::InvalidPath(path.to_string()));
        }
        let name = path.as_bytes().to_vec();
        if name.len() > u16::MAX as usize {
            return Err(ArchiveError::InvalidPath(path.to_string()));
        }
        if self.directory.len() >= u16::MAX as usize {
            return Err(ArchiveError::LimitExceeded("entry count".to_string()));
        }
        if self.offset >= u32::MAX as u64 {
            return Err(ArchiveError::LimitExceeded("archive size".to_string()));
        }
        Ok((name, self.offset as u32))
    }

    /// Begin a new entry
    ///
    /// The returned writer borrows `self`, so entries are strictly
    /// sequential. An entry dropped without [`EntryWriter::finish`] poisons
    /// the archive: later calls fail with [`ArchiveError::UnfinishedEntry`].
    pub fn start_entry(&mut self, path: &str, method: EntryMethod) -> ArchiveResult<EntryWriter<'_, S>> {
        let (name, header_offset) = self.entry_name(path)?;
        let method_code = match method {
            EntryMethod::Deflate => METHOD_DEFLATE,
            EntryMethod::Store => METHOD_STORE,
        };

        // CRC and sizes live in the data descriptor
        let header = local_header(&name, FLAG_UTF8 | FLAG_DESCRIPTOR, method_code, 0, 0, 0);
        self.emit(header, false)?;
        self.open_entry = Some(path.to_string());

        let encoder = match method {
            EntryMethod::Deflate => Some(DeflateStream::new(self.level)),
            EntryMethod::Store => None,
        };
        Ok(EntryWriter {
            writer: self,
            name,
            method: method_code,
            header_offset,
            encoder,
            crc: crc32fast::Hasher::new(),
            uncompressed_size: 0,
            compressed_size: 0,
        })
    }

    /// Write a complete stored entry with CRC and sizes in its local header
    ///
    /// No data descriptor follows, so readers that walk local headers
    /// without the central directory can still find the data.
    pub fn add_stored(&mut self, path: &str, data: &[u8]) -> ArchiveResult<()> {
        let (name, header_offset) = self.entry_name(path)?;
        if data.len() as u64 >= u32::MAX as u64 {
            return Err(ArchiveError::LimitExceeded(format!("entry {}", path)));
        }
        let crc = crc32fast::hash(data);
        let size = data.len() as u32;

        let mut chunk = local_header(&name, FLAG_UTF8, METHOD_STORE, crc, size, size);
        chunk.extend_from_slice(data);
        self.emit(chunk, false)?;

        self.directory.push(CentralRecord {
            external_attributes: external_attributes(&name),
            name,
            flags: FLAG_UTF8,
            method: METHOD_STORE,
            crc,
            compressed_size: size,
            uncompressed_size: size,
            header_offset,
        });
        Ok(())
    }

    /// Write the central directory and hand back the sink
    pub fn finish(mut self) -> ArchiveResult<S> {
        self.ensure_no_open_entry()?;

        let directory_offset = self.offset;
        let mut directory = Vec::new();
        for record in &self.directory {
            put_u32(&mut directory, CENTRAL_HEADER_SIGNATURE);
            put_u16(&mut directory, VERSION);
            put_u16(&mut directory, VERSION);
            put_u16(&mut directory, record.flags);
            put_u16(&mut directory, record.method);
            put_u16(&mut directory, DOS_TIME);
            put_u16(&mut directory, DOS_DATE);
            put_u32(&mut directory, record.crc);
            put_u32(&mut directory, record.compressed_size);
            put_u32(&mut directory, record.uncompressed_size);
            put_u16(&mut directory, record.name.len() as u16);
            put_u16(&mut directory, 0); // extra
            put_u16(&mut directory, 0); // comment
            put_u16(&mut directory, 0); // disk
            put_u16(&mut directory, 0); // internal attributes
            put_u32(&mut directory, record.external_attributes);
            put_u32(&mut directory, record.header_offset);
            directory.extend_from_slice(&record.name);
        }

        let directory_size = directory.len() as u64;
        if directory_offset + directory_size >= u32::MAX as u64 {
            return Err(ArchiveError::LimitExceeded("archive size".to_string()));
        }

        let entries = self.directory.len() as u16;
        put_u32(&mut directory, END_OF_DIRECTORY_SIGNATURE);
        put_u16(&mut directory, 0);
        put_u16(&mut directory, 0);
        put_u16(&mut directory, entries);
        put_u16(&mut directory, entries);
        put_u32(&mut directory, directory_size as u32);
        put_u32(&mut directory, directory_offset as u32);
        put_u16(&mut directory, 0);

        self.emit(directory, true)?;
        log::debug!(
            "Finished archive: {} entries, {} bytes",
            self.directory.len(),
            self.offset
        );
        Ok(self.sink)
    }
}

/// Open entry of a [`ZipStreamWriter`]
pub struct EntryWriter<'w, S: ChunkSink> {
    writer: &'w mut ZipStreamWriter<S>,
    name: Vec<u8>,
    method: u16,
    header_offset: u32,
    encoder: Option<DeflateStream>,
    crc: crc32fast::Hasher,
    uncompressed_size: u64,
    compressed_size: u64,
}

impl<S: ChunkSink> EntryWriter<'_, S> {
    /// Append uncompressed data to the entry
    pub fn push(&mut self, data: &[u8]) -> ArchiveResult<()> {
        self.crc.update(data);
        self.uncompressed_size += data.len() as u64;

        let out = match self.encoder.as_mut() {
            Some(encoder) => encoder.push(data)?,
            None => data.to_vec(),
        };
        self.compressed_size += out.len() as u64;
        self.writer.emit(out, false)
    }

    /// Close the entry with its data descriptor
    pub fn finish(self) -> ArchiveResult<()> {
        let EntryWriter {
            writer,
            name,
            method,
            header_offset,
            encoder,
            crc,
            uncompressed_size,
            mut compressed_size,
        } = self;

        if let Some(encoder) = encoder {
            let tail = encoder.finish()?;
            compressed_size += tail.len() as u64;
            writer.emit(tail, false)?;
        }

        if compressed_size >= u32::MAX as u64 || uncompressed_size >= u32::MAX as u64 {
            return Err(ArchiveError::LimitExceeded(format!(
                "entry {}",
                String::from_utf8_lossy(&name)
            )));
        }

        let crc = crc.finalize();
        let mut descriptor = Vec::with_capacity(16);
        put_u32(&mut descriptor, DATA_DESCRIPTOR_SIGNATURE);
        put_u32(&mut descriptor, crc);
        put_u32(&mut descriptor, compressed_size as u32);
        put_u32(&mut descriptor, uncompressed_size as u32);
        writer.emit(descriptor, false)?;

        writer.directory.push(CentralRecord {
            external_attributes: external_attributes(&name),
            name,
            flags: FLAG_UTF8 | FLAG_DESCRIPTOR,
            method,
            crc,
            compressed_size: compressed_size as u32,
            uncompressed_size: uncompressed_size as u32,
            header_offset,
        });
        writer.open_entry = None;
        Ok(())
    }
}

fn local_header(name: &[u8], flags: u16, method: u16, crc: u32, compressed_size: u32, size: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(30 + name.len());
    put_u32(&mut header, LOCAL_HEADER_SIGNATURE);
    put_u16(&mut header, VERSION);
    put_u16(&mut header, flags);
    put_u16(&mut header, method);
    put_u16(&mut header, DOS_TIME);
    put_u16(&mut header, DOS_DATE);
    put_u32(&mut header, crc);
    put_u32(&mut header, compressed_size);
    put_u32(&mut header, size);
    put_u16(&mut header, name.len() as u16);
    put_u16(&mut header, 0);
    header.extend_from_slice(name);
    header
}

fn external_attributes(name: &[u8]) -> u32 {
    if name.ends_with(b"/") {
        DIRECTORY_ATTRIBUTE
    } else {
        0
    }
}

fn put_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_le_bytes());
}
