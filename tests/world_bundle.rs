//! Package codec and viewer bundle behaviour against archives produced by
//! an independent zip writer

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use voxel_studio::bundle::{merge_archive, ArchiveError, MergeOptions, MergeStream};
use voxel_studio::compression::{self, CompressionLevel};
use voxel_studio::package::{self, CodecError, WorldMetadata};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

fn build_template(entries: &[(&str, &str)], method: CompressionMethod) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(method);
    for (path, data) in entries {
        if path.ends_with('/') {
            writer.add_directory(*path, options).unwrap();
        } else {
            writer.start_file(*path, options).unwrap();
            writer.write_all(data.as_bytes()).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

fn extract(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive)).unwrap();
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
fn default_metadata_round_trips() {
    let metadata = WorldMetadata::default();
    let bytes = package::encode(&metadata, &[]).unwrap();

    let header: serde_json::Value = serde_json::from_slice(&bytes[2..]).unwrap();
    assert_eq!(
        header,
        serde_json::json!({"chunkSize": 32, "scale": 0.125, "spawn": [0.0, 8.0, 0.0], "version": "0.0.1"})
    );

    let decoded = package::decode(&bytes).unwrap();
    assert_eq!(decoded.metadata, metadata);
    assert!(decoded.payload.is_empty());
}

#[test]
fn bundle_holds_template_then_world() {
    let template = build_template(
        &[("index.html", "<html/>..."), ("assets/", ""), ("assets/app.js", "run()")],
        CompressionMethod::Deflated,
    );
    let world: Vec<u8> = (0..100u8).collect();

    let archive = merge_archive(&template, &world, &MergeOptions::default()).unwrap();

    assert_eq!(
        extract(&archive),
        vec![
            ("index.html".to_string(), b"<html/>...".to_vec()),
            ("assets/".to_string(), Vec::new()),
            ("assets/app.js".to_string(), b"run()".to_vec()),
            ("world.bin".to_string(), world),
        ]
    );
}

#[test]
fn bundle_output_is_deterministic() {
    let template = build_template(&[("index.html", "0123456789")], CompressionMethod::Stored);
    let world = compression::deflate(&[5; 4096], CompressionLevel::Best).unwrap();

    let first = merge_archive(&template, &world, &MergeOptions::default()).unwrap();
    let second = merge_archive(&template, &world, &MergeOptions::default()).unwrap();
    assert_eq!(first, second);

    let streamed = MergeStream::spawn(Arc::from(template), world, MergeOptions::default(), 3).unwrap();
    assert_eq!(pollster::block_on(streamed.collect_archive()).unwrap(), first);
}

#[test]
fn corrupted_template_entry_aborts_merge() {
    let content = "0123456789abcdef";
    let mut template = build_template(&[("data.txt", content)], CompressionMethod::Stored);
    let content = content.as_bytes();
    let offset = template
        .windows(content.len())
        .position(|window| window == content)
        .unwrap();
    template[offset] ^= 0xFF;

    let result = merge_archive(&template, b"world", &MergeOptions::default());
    assert!(matches!(result, Err(ArchiveError::TemplateData { .. })));

    let stream = MergeStream::spawn(Arc::from(template), b"world".to_vec(), MergeOptions::default(), 4).unwrap();
    assert!(pollster::block_on(stream.collect_archive()).is_err());
}

#[test]
fn oversized_metadata_is_rejected_without_output() {
    let mut metadata = WorldMetadata::default();
    metadata.name = Some("n".repeat(70_000));

    assert!(matches!(
        package::encode(&metadata, b"payload"),
        Err(CodecError::MetadataTooLarge { .. })
    ));

    let original = package::encode(&WorldMetadata::default(), b"payload").unwrap();
    let snapshot = original.clone();
    assert!(package::patch_metadata(&original, &metadata).is_err());
    assert_eq!(original, snapshot);
}

#[test]
fn compressed_world_survives_bundle() {
    let metadata = WorldMetadata {
        name: Some("harbor".to_string()),
        ..WorldMetadata::default()
    };
    let world = package::encode(&metadata, &[42; 2048]).unwrap();
    let compressed = package::compress(&world, CompressionLevel::Default).unwrap();
    let template = build_template(&[("index.html", "viewer")], CompressionMethod::Deflated);

    let archive = merge_archive(&template, &compressed, &MergeOptions::default()).unwrap();
    let (_, stored) = extract(&archive).pop().unwrap();

    let restored = package::decompress(&stored).unwrap();
    let decoded = package::decode(&restored).unwrap();
    assert_eq!(decoded.metadata, metadata);
    assert_eq!(decoded.payload, &[42; 2048][..]);
}
