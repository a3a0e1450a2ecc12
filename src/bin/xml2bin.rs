//! Converts BedMasterEx XML exports into CFWB waveform files and
//! per-parameter vital-sign files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use xml2bin::{ConversionState, Converter, ConverterConfig, Result, TagMap};

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert BedMasterEx XML exports to CFWB and vital files", long_about = None)]
struct Args {
    /// Converter settings (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Continuation state (JSON), loaded if present and saved after every input
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Extra filename tag as key=value, may be repeated
    #[arg(short, long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,

    /// Log every renamed channel
    #[arg(long)]
    rename_details: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// XML files or directories holding them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn parse_tag(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got {:?}", s))
}

/// Directories expand to the `*.xml` files they hold, sorted by name
fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_xml(p))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

fn is_xml(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("xml"))
            .unwrap_or(false)
}

fn run(args: Args) -> Result<()> {
    let config = ConverterConfig::load(&args.config)?;
    if !config.output_dir.as_os_str().is_empty() {
        fs::create_dir_all(&config.output_dir)?;
    }

    let mut state = match &args.state {
        Some(path) if path.exists() => ConversionState::load(path)?,
        _ => ConversionState::new(chrono::Local::now().naive_local()),
    };
    let mut tags: TagMap = args.tags.into_iter().collect();
    let mut converter = Converter::new(&config)?;

    let mut total = 0;
    for xml in expand_inputs(&args.inputs)? {
        total += converter.convert(&xml, &mut tags, &mut state)?;
        for gap in converter.take_gap_warnings() {
            warn!("{}: gap of {} s at {}", xml.display(), gap.gap_seconds, gap.collection_time);
        }
        if let Some(path) = &args.state {
            state.save(path)?;
        }
    }

    let renamed = converter.rename_channels(args.rename_details)?;
    info!(
        "{} samples written to {} files, {} renamed",
        total,
        converter.output_files().len(),
        renamed
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    info!("xml2bin v{}", xml2bin::version());
    match run(args) {
        Ok(()) => {
            info!("done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
