//! Re-indents an XML file.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Pretty-print an XML file", long_about = None)]
struct Args {
    /// Input filename
    #[arg(short, long)]
    filename: PathBuf,

    /// Output filename
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("wfpretty v{}", xml2bin::version());
    match xml2bin::pretty::prettify(&args.filename, &args.output) {
        Ok(()) => {
            info!("done.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}: {}", args.filename.display(), e);
            ExitCode::FAILURE
        }
    }
}
