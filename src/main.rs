//! `ewfctl` — a thin reference front end over the `ewf_engine` library.
//!
//! Per the Non-goals in the design this wraps (command-line front ends are
//! external collaborators, not the core's concern), this binary does only
//! argument parsing and the four obvious verbs: acquire, verify, info,
//! export. All format knowledge lives in the library.

use std::fs::File;
use std::io::Write;
use std::process::ExitCode;

use clap::{Arg, ArgAction, Command};
use log::{error, info};

use ewf_engine::compression::Level;
use ewf_engine::format::Variant;
use ewf_engine::{EwfReader, EwfWriter, WriterConfig};

fn parse_variant(s: &str) -> Result<Variant, String> {
    match s.to_ascii_lowercase().as_str() {
        "ftk" => Ok(Variant::Ftk),
        "encase2" => Ok(Variant::Encase2),
        "encase3" => Ok(Variant::Encase3),
        "encase4" => Ok(Variant::Encase4),
        "encase5" => Ok(Variant::Encase5),
        "encase6" => Ok(Variant::Encase6),
        "linen5" => Ok(Variant::Linen5),
        "linen6" => Ok(Variant::Linen6),
        "ewfx" => Ok(Variant::Ewfx),
        "smart" => Ok(Variant::Smart),
        other => Err(format!("unknown variant '{other}'")),
    }
}

fn parse_level(s: &str) -> Result<Level, String> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Ok(Level::None),
        "fast" => Ok(Level::Fast),
        "best" => Ok(Level::Best),
        other => Err(format!("unknown compression level '{other}'")),
    }
}

fn cli() -> Command {
    Command::new("ewfctl")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Acquire, verify, inspect and export EWF/E01 forensic disk images.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("acquire")
                .about("Stream an input file or device into a new EWF image set")
                .arg(Arg::new("input").short('i').long("input").required(true))
                .arg(Arg::new("output").short('o').long("output").required(true)
                    .help("Path to the first segment file, e.g. case.E01"))
                .arg(Arg::new("variant").long("variant").default_value("encase5"))
                .arg(Arg::new("compression").short('C').long("compression").default_value("none"))
                .arg(Arg::new("sectors-per-chunk").short('b').long("sectors-per-chunk")
                    .value_parser(clap::value_parser!(u32)).default_value("64"))
                .arg(Arg::new("segment-size").short('S').long("segment-size-kib")
                    .value_parser(clap::value_parser!(u64))
                    .help("Segment file size cap, in KiB"))
                .arg(Arg::new("case-number").short('c').long("case-number"))
                .arg(Arg::new("description").short('D').long("description"))
                .arg(Arg::new("examiner").short('e').long("examiner"))
                .arg(Arg::new("evidence-number").short('E').long("evidence-number"))
                .arg(Arg::new("notes").short('N').long("notes"))
                .arg(Arg::new("sha1").long("sha1").action(ArgAction::SetTrue)
                    .help("Additionally calculate and store a SHA-1 digest")),
        )
        .subcommand(
            Command::new("info")
                .about("Print acquisition metadata, media geometry and stored hashes")
                .arg(Arg::new("image").required(true)),
        )
        .subcommand(
            Command::new("verify")
                .about("Re-read the full image and compare its digest against the stored hash")
                .arg(Arg::new("image").required(true)),
        )
        .subcommand(
            Command::new("export")
                .about("Write the decoded media stream to a raw output file")
                .arg(Arg::new("image").required(true))
                .arg(Arg::new("output").required(true)),
        )
}

fn run() -> Result<(), String> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("acquire", sub)) => {
            let input_path = sub.get_one::<String>("input").unwrap();
            let output_path = sub.get_one::<String>("output").unwrap();
            let variant = parse_variant(sub.get_one::<String>("variant").unwrap())?;
            let compression = parse_level(sub.get_one::<String>("compression").unwrap())?;

            let mut config = WriterConfig {
                variant,
                compression,
                sectors_per_chunk: *sub.get_one::<u32>("sectors-per-chunk").unwrap(),
                calculate_sha1: sub.get_flag("sha1"),
                case_number: sub.get_one::<String>("case-number").cloned(),
                description: sub.get_one::<String>("description").cloned(),
                examiner_name: sub.get_one::<String>("examiner").cloned(),
                evidence_number: sub.get_one::<String>("evidence-number").cloned(),
                notes: sub.get_one::<String>("notes").cloned(),
                ..WriterConfig::default()
            };
            if let Some(kib) = sub.get_one::<u64>("segment-size") {
                config.segment_file_size = kib * 1024;
            }

            let mut input = File::open(input_path).map_err(|e| format!("opening input: {e}"))?;
            info!(
                "acquiring {input_path} -> {output_path} (variant {:?}, compression {:?})",
                config.variant, config.compression
            );
            let mut writer = EwfWriter::new(output_path, config).map_err(|e| e.to_string())?;
            writer.write_from(&mut input, None).map_err(|e| e.to_string())?;
            match writer.close() {
                Ok(status) => info!("acquisition completed cleanly ({status:?})"),
                Err(ewf_engine::EwfError::Partial { error_count }) => {
                    info!("acquisition completed with {error_count} recorded read error(s)");
                }
                Err(other) => return Err(other.to_string()),
            }
            Ok(())
        }
        Some(("info", sub)) => {
            let image = sub.get_one::<String>("image").unwrap();
            let reader = EwfReader::open(image).map_err(|e| e.to_string())?;
            print_info(&reader);
            Ok(())
        }
        Some(("verify", sub)) => {
            let image = sub.get_one::<String>("image").unwrap();
            let mut reader = EwfReader::open(image).map_err(|e| e.to_string())?;
            let ok = verify(&mut reader).map_err(|e| e.to_string())?;
            if ok {
                println!("MD5 verification: OK");
                Ok(())
            } else {
                println!("MD5 verification: FAILED");
                Err("stored MD5 does not match recomputed digest".to_string())
            }
        }
        Some(("export", sub)) => {
            let image = sub.get_one::<String>("image").unwrap();
            let output = sub.get_one::<String>("output").unwrap();
            let mut reader = EwfReader::open(image).map_err(|e| e.to_string())?;
            let mut out = File::create(output).map_err(|e| format!("creating output: {e}"))?;
            export(&mut reader, &mut out).map_err(|e| e.to_string())?;
            Ok(())
        }
        _ => unreachable!("subcommand_required(true) guarantees a match above"),
    }
}

fn print_info(reader: &EwfReader) {
    let media = reader.media();
    println!("Media geometry:");
    println!("  bytes per sector  : {}", media.bytes_per_sector);
    println!("  sectors per chunk : {}", media.sectors_per_chunk);
    println!("  sector count      : {}", media.sector_count);
    println!("  chunk count       : {}", media.chunk_count);
    println!("  media size        : {} bytes", media.media_size());
    if let Some(guid) = media.guid {
        println!("  GUID              : {}", uuid::Uuid::from_bytes(guid));
    }

    println!("Acquisition metadata:");
    for (identifier, value) in reader.header().iter() {
        println!("  {identifier:<28}: {value}");
    }

    let hashes = reader.hashes();
    println!("Hashes:");
    println!("  MD5  : {}", hex(&hashes.md5));
    if let Some(sha1) = &hashes.sha1 {
        println!("  SHA1 : {}", hex(sha1));
    }

    let errors = reader.read_errors();
    if !errors.is_empty() {
        println!("Recorded read errors: {}", errors.len());
        for e in errors {
            println!("  start_sector={} sector_count={}", e.start_sector, e.sector_count);
        }
    }
}

fn verify(reader: &mut EwfReader) -> Result<bool, ewf_engine::EwfError> {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 1024 * 1024];
    reader.seek_to(0)?;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let computed: [u8; 16] = hasher.finalize().into();
    Ok(computed == reader.hashes().md5)
}

fn export(reader: &mut EwfReader, out: &mut impl Write) -> Result<(), ewf_engine::EwfError> {
    reader.seek_to(0)?;
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn main() -> ExitCode {
    ewf_engine::logging::init();
    if let Err(message) = run() {
        error!("{message}");
        eprintln!("error: {message}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
