use std::io::{Cursor, ErrorKind, Read};

use zip::ZipArchive;

use crate::bundle::{ArchiveError, ArchiveResult};

/// Lazy, in-order view of the entries of an in-memory zip
///
/// Entries are handed out one at a time in central-directory order and are
/// only decompressed as their chunks are pulled. To read the archive again,
/// open a new reader.
pub struct TemplateReader<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
    next_index: usize,
}

impl<'a> TemplateReader<'a> {
    pub fn open(bytes: &'a [u8]) -> ArchiveResult<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        Ok(Self {
            archive,
            next_index: 0,
        })
    }

    /// Number of entries in the archive
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Pull the next entry; `None` once every entry has been visited
    pub fn next_entry(&mut self) -> Option<ArchiveResult<TemplateEntry<'_>>> {
        if self.next_index >= self.archive.len() {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        Some(
            self.archive
                .by_index(index)
                .map(|file| TemplateEntry {
                    path: file.name().to_string(),
                    is_dir: file.is_dir(),
                    data: Box::new(file),
                })
                .map_err(ArchiveError::from),
        )
    }
}

/// One template entry: its path and a decompressing data stream
pub struct TemplateEntry<'r> {
    path: String,
    is_dir: bool,
    data: Box<dyn Read + 'r>,
}

impl<'r> TemplateEntry<'r> {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Decompressed contents in pieces of at most `chunk_size` bytes
    ///
    /// The checksum is verified when the stream reaches its end; a mismatch
    /// surfaces as the final item.
    pub fn chunks(self, chunk_size: usize) -> EntryChunks<'r> {
        EntryChunks {
            path: self.path,
            data: self.data,
            chunk_size: chunk_size.max(1),
            done: false,
        }
    }
}

pub struct EntryChunks<'r> {
    path: String,
    data: Box<dyn Read + 'r>,
    chunk_size: usize,
    done: bool,
}

impl Iterator for EntryChunks<'_> {
    type Item = ArchiveResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            match self.data.read(&mut buffer) {
                Ok(0) => {
                    self.done = true;
                    return None;
                }
                Ok(n) => {
                    buffer.truncate(n);
                    return Some(Ok(buffer));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.done = true;
                    return Some(Err(ArchiveError::TemplateData {
                        path: self.path.clone(),
                        source,
                    }));
                }
            }
        }
    }
}
