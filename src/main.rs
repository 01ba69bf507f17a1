//! Offline tooling for finished world packages

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};

use voxel_studio::bundle::{merge_archive, FileTemplate, TemplateCache};
use voxel_studio::package::{self, WorldMetadata};
use voxel_studio::StudioConfig;

const USAGE: &str = "usage: voxel-studio [--config FILE] <command>

commands:
  inspect <package>
  patch <package> <out> [--name N] [--author A] [--scale S] [--spawn x,y,z]
  compress <package> <out.bin>
  bundle <package> <template.zip> <out.zip>";

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(std::env::args().skip(1).collect()) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(mut args: Vec<String>) -> Result<()> {
    let config = match take_option(&mut args, "--config")? {
        Some(path) => StudioConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => StudioConfig::default(),
    };

    if args.is_empty() {
        bail!("{}", USAGE);
    }
    let command = args.remove(0);
    match command.as_str() {
        "inspect" => {
            let [input] = positional::<1>(args)?;
            inspect(&input)
        }
        "patch" => patch(args),
        "compress" => {
            let [input, output] = positional::<2>(args)?;
            let bytes = read_package(&input)?;
            let compressed = package::compress(&bytes, config.bundle.compression)?;
            std::fs::write(&output, &compressed).with_context(|| format!("writing {}", output))?;
            log::info!("Wrote {} ({} -> {} bytes)", output, bytes.len(), compressed.len());
            Ok(())
        }
        "bundle" => {
            let [input, template, output] = positional::<3>(args)?;
            let bytes = read_package(&input)?;
            let compressed = package::compress(&bytes, config.bundle.compression)?;
            let template = TemplateCache::new(FileTemplate::new(PathBuf::from(template))).get()?;
            let archive = merge_archive(&template, &compressed, &config.bundle.merge_options())?;
            std::fs::write(&output, &archive).with_context(|| format!("writing {}", output))?;
            log::info!("Wrote {} ({} bytes)", output, archive.len());
            Ok(())
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }
}

fn inspect(input: &str) -> Result<()> {
    let bytes = read_package(input)?;
    let decoded = package::decode(&bytes)?;
    println!("metadata length: {}", decoded.metadata_len);
    println!("metadata: {}", serde_json::to_string_pretty(&decoded.metadata)?);
    println!("payload: {} bytes", decoded.payload.len());
    Ok(())
}

fn patch(mut args: Vec<String>) -> Result<()> {
    let name = take_option(&mut args, "--name")?;
    let author = take_option(&mut args, "--author")?;
    let scale = take_option(&mut args, "--scale")?;
    let spawn = take_option(&mut args, "--spawn")?;
    let [input, output] = positional::<2>(args)?;

    let bytes = read_package(&input)?;
    let mut metadata: WorldMetadata = package::decode(&bytes)?.metadata;
    if name.is_some() {
        metadata.name = name;
    }
    if author.is_some() {
        metadata.author = author;
    }
    if let Some(scale) = scale {
        metadata.scale = scale.parse().with_context(|| format!("invalid scale {:?}", scale))?;
    }
    if let Some(spawn) = spawn {
        metadata.spawn = parse_spawn(&spawn)?;
    }
    metadata.validate().map_err(|e| anyhow!(e))?;

    let patched = package::patch_metadata(&bytes, &metadata)?;
    std::fs::write(&output, &patched).with_context(|| format!("writing {}", output))?;
    log::info!("Wrote {} ({} bytes)", output, patched.len());
    Ok(())
}

fn read_package(path: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path))
}

/// Remove `--flag value` from `args`
fn take_option(args: &mut Vec<String>, flag: &str) -> Result<Option<String>> {
    let Some(index) = args.iter().position(|arg| arg == flag) else {
        return Ok(None);
    };
    if index + 1 >= args.len() {
        bail!("{} needs a value", flag);
    }
    let value = args.remove(index + 1);
    args.remove(index);
    Ok(Some(value))
}

fn positional<const N: usize>(args: Vec<String>) -> Result<[String; N]> {
    let count = args.len();
    args.try_into()
        .map_err(|_| anyhow!("expected {} arguments, got {}\n{}", N, count, USAGE))
}

fn parse_spawn(raw: &str) -> Result<[f64; 3]> {
    let parts = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid spawn {:?}", raw))?;
    parts
        .try_into()
        .map_err(|_| anyhow!("spawn needs three components, got {:?}", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_take_option() {
        let mut list = args(&["patch", "--name", "castle", "in.bin", "out.bin"]);
        assert_eq!(take_option(&mut list, "--name").unwrap(), Some("castle".to_string()));
        assert_eq!(list, args(&["patch", "in.bin", "out.bin"]));
        assert_eq!(take_option(&mut list, "--author").unwrap(), None);

        let mut dangling = args(&["--scale"]);
        assert!(take_option(&mut dangling, "--scale").is_err());
    }

    #[test]
    fn test_positional_count() {
        assert!(positional::<2>(args(&["a", "b"])).is_ok());
        assert!(positional::<2>(args(&["a"])).is_err());
    }

    #[test]
    fn test_parse_spawn() {
        assert_eq!(parse_spawn("1, 2.5,-3").unwrap(), [1.0, 2.5, -3.0]);
        assert!(parse_spawn("1,2").is_err());
        assert!(parse_spawn("1,x,3").is_err());
    }

    #[test]
    fn test_patch_command() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        std::fs::write(&input, package::encode(&WorldMetadata::default(), b"chunks").unwrap()).unwrap();

        run(args(&[
            "patch",
            input.to_str().unwrap(),
            output.to_str().unwrap(),
            "--name",
            "castle",
            "--spawn",
            "4,5,6",
        ]))
        .unwrap();

        let patched = std::fs::read(&output).unwrap();
        let decoded = package::decode(&patched).unwrap();
        assert_eq!(decoded.metadata.name.as_deref(), Some("castle"));
        assert_eq!(decoded.metadata.spawn, [4.0, 5.0, 6.0]);
        assert_eq!(decoded.payload, b"chunks");
    }
}
