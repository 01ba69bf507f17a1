use std::sync::Arc;
use std::thread;

use crate::bundle::{
    ArchiveError, ArchiveResult, ChunkCollector, ChunkSink, EntryMethod, TemplateReader,
    ZipStreamWriter,
};
use crate::compression::CompressionLevel;

/// Entry name the viewer loads the world from
pub const DEFAULT_PACKAGE_ENTRY: &str = "world.bin";

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    /// Path of the appended package entry
    pub package_entry: String,
    /// Level used when recompressing template entries
    pub level: CompressionLevel,
    /// Largest decompressed piece moved from reader to writer at once
    pub chunk_size: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            package_entry: DEFAULT_PACKAGE_ENTRY.to_string(),
            level: CompressionLevel::Default,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Stream `template`'s entries and then `package` into `sink`
///
/// Output order is every template entry in directory order, then the
/// package entry. `package` must already be compressed; it is stored as is.
/// The first error aborts the merge and is returned; whatever the sink has
/// received by then is not a valid archive.
pub fn merge_into<S: ChunkSink>(
    template: &[u8],
    package: &[u8],
    options: &MergeOptions,
    sink: S,
) -> ArchiveResult<S> {
    let mut reader = TemplateReader::open(template)?;
    let mut writer = ZipStreamWriter::new(sink, options.level);

    while let Some(entry) = reader.next_entry() {
        let entry = entry?;
        let path = entry.path().to_string();
        if path == options.package_entry {
            log::warn!("Template already contains {}, the package entry will follow it", path);
        }

        if entry.is_dir() {
            writer.add_stored(&path, &[])?;
            continue;
        }

        let mut target = writer.start_entry(&path, EntryMethod::Deflate)?;
        for chunk in entry.chunks(options.chunk_size) {
            target.push(&chunk?)?;
        }
        target.finish()?;
        log::debug!("Copied template entry {}", path);
    }

    writer.add_stored(&options.package_entry, package)?;

    let entries = writer.entry_count();
    let sink = writer.finish()?;
    log::info!(
        "Merged {} template entries with a {} byte package",
        entries - 1,
        package.len()
    );
    Ok(sink)
}

/// Merge into a single in-memory archive
pub fn merge_archive(template: &[u8], package: &[u8], options: &MergeOptions) -> ArchiveResult<Vec<u8>> {
    merge_into(template, package, options, ChunkCollector::default())?.into_bytes()
}

/// One piece of merged output
#[derive(Debug)]
struct ArchiveChunk {
    data: Vec<u8>,
    last: bool,
}

struct StreamSink {
    chunks: flume::Sender<ArchiveResult<ArchiveChunk>>,
}

impl ChunkSink for StreamSink {
    fn accept(&mut self, data: Vec<u8>, last: bool) -> ArchiveResult<()> {
        self.chunks
            .send(Ok(ArchiveChunk { data, last }))
            .map_err(|_| ArchiveError::Aborted)
    }
}

/// Merge running on a worker thread, consumed as a pull-based sequence
///
/// The worker can only run `depth` chunks ahead of the consumer. The
/// sequence ends after the closing chunk, or after the first error.
/// Dropping the stream early makes the worker stop at its next chunk.
pub struct MergeStream {
    chunks: flume::Receiver<ArchiveResult<ArchiveChunk>>,
    finished: bool,
}

impl MergeStream {
    pub fn spawn(
        template: Arc<[u8]>,
        package: Vec<u8>,
        options: MergeOptions,
        depth: usize,
    ) -> ArchiveResult<Self> {
        let (sender, receiver) = flume::bounded(depth.max(1));

        thread::Builder::new()
            .name("archive-merge".to_string())
            .spawn(move || {
                let sink = StreamSink {
                    chunks: sender.clone(),
                };
                if let Err(e) = merge_into(&template, &package, &options, sink) {
                    if !matches!(e, ArchiveError::Aborted) {
                        log::error!("Archive merge failed: {}", e);
                    }
                    let _ = sender.send(Err(e));
                }
            })
            .map_err(ArchiveError::Worker)?;

        Ok(Self {
            chunks: receiver,
            finished: false,
        })
    }

    fn settle(&mut self, received: Option<ArchiveResult<ArchiveChunk>>) -> Option<ArchiveResult<Vec<u8>>> {
        match received {
            Some(Ok(chunk)) => {
                self.finished = chunk.last;
                Some(Ok(chunk.data))
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            // Worker went away without closing the archive
            None => {
                self.finished = true;
                Some(Err(ArchiveError::Aborted))
            }
        }
    }

    /// Await the next output chunk
    pub async fn next_chunk(&mut self) -> Option<ArchiveResult<Vec<u8>>> {
        if self.finished {
            return None;
        }
        let received = self.chunks.recv_async().await.ok();
        self.settle(received)
    }

    /// Concatenate the whole archive; any error discards the partial output
    pub async fn collect_archive(mut self) -> ArchiveResult<Vec<u8>> {
        let mut archive = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            archive.extend_from_slice(&chunk?);
        }
        Ok(archive)
    }
}

impl Iterator for MergeStream {
    type Item = ArchiveResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let received = self.chunks.recv().ok();
        self.settle(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    fn template(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipStreamWriter::new(ChunkCollector::default(), CompressionLevel::Fast);
        for (path, data) in entries {
            let mut entry = writer.start_entry(path, EntryMethod::Deflate).unwrap();
            entry.push(data).unwrap();
            entry.finish().unwrap();
        }
        writer.finish().unwrap().into_bytes().unwrap()
    }

    fn entries(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                file.read_to_end(&mut data).unwrap();
                (file.name().to_string(), data)
            })
            .collect()
    }

    #[test]
    fn test_template_entries_then_package() {
        let template = template(&[("a.js", &b"console.log(1)"[..]), ("b.css", &b"body{}"[..])]);
        let package = vec![0xAB; 300];

        let merged = merge_archive(&template, &package, &MergeOptions::default()).unwrap();

        assert_eq!(
            entries(&merged),
            vec![
                ("a.js".to_string(), b"console.log(1)".to_vec()),
                ("b.css".to_string(), b"body{}".to_vec()),
                ("world.bin".to_string(), package),
            ]
        );
    }

    #[test]
    fn test_package_local_header_carries_crc_and_size() {
        let template = template(&[("index.html", &b"<html/>"[..])]);
        let package = vec![0x5A; 512];
        let merged = merge_archive(&template, &package, &MergeOptions::default()).unwrap();

        let header = merged
            .windows(34)
            .position(|w| w[..4] == 0x0403_4b50u32.to_le_bytes() && &w[30..] == b"worl")
            .map(|offset| &merged[offset..])
            .unwrap();
        let field = |at: usize| u32::from_le_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
        assert_eq!(u16::from_le_bytes([header[6], header[7]]) & 0x0008, 0);
        assert_eq!(field(14), crc32fast::hash(&package));
        assert_eq!(field(18), 512);
        assert_eq!(field(22), 512);
        assert_eq!(&header[39..39 + 512], &package[..]);
    }

    #[test]
    fn test_small_chunks_still_copy_exactly() {
        let big: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let template = template(&[("big.dat", &big[..])]);
        let options = MergeOptions {
            chunk_size: 1000,
            package_entry: "maps/world.bin".to_string(),
            ..MergeOptions::default()
        };

        let merged = merge_archive(&template, b"pkg", &options).unwrap();
        let merged = entries(&merged);
        assert_eq!(merged[0].1, big);
        assert_eq!(merged[1], ("maps/world.bin".to_string(), b"pkg".to_vec()));
    }

    #[test]
    fn test_corrupt_template_fails() {
        let result = merge_archive(b"definitely not a zip", b"pkg", &MergeOptions::default());
        assert!(matches!(result, Err(ArchiveError::Template(_))));
    }

    #[test]
    fn test_stream_yields_same_bytes() {
        let template: Arc<[u8]> = template(&[("index.html", &b"0123456789"[..])]).into();
        let expected = merge_archive(&template, b"package", &MergeOptions::default()).unwrap();

        let stream = MergeStream::spawn(template.clone(), b"package".to_vec(), MergeOptions::default(), 2).unwrap();
        let chunks: Vec<Vec<u8>> = stream.map(|chunk| chunk.unwrap()).collect();
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), expected);

        let stream = MergeStream::spawn(template, b"package".to_vec(), MergeOptions::default(), 1).unwrap();
        assert_eq!(pollster::block_on(stream.collect_archive()).unwrap(), expected);
    }

    #[test]
    fn test_stream_reports_error_once() {
        let template: Arc<[u8]> = Arc::from(&b"garbage"[..]);
        let mut stream = MergeStream::spawn(template, vec![1], MergeOptions::default(), 4).unwrap();

        assert!(matches!(stream.next(), Some(Err(ArchiveError::Template(_)))));
        assert!(stream.next().is_none());
    }
}
