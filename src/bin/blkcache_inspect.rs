//! `blkcache-inspect` — loads a mapfile and prints its ranges and aggregate
//! recovery status, without needing a live device or NBD host.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use blkcache::logging::{init_logging, LogFormat, LogLevel};
use blkcache::mapfile;

#[derive(Debug, Parser)]
#[command(about = "Inspect a blkcache ddrescue-compatible mapfile.")]
struct Args {
    /// Path to the `.log` mapfile to inspect.
    mapfile: PathBuf,

    /// Size in bytes of the device the mapfile was recorded against.
    #[arg(long)]
    device_size: u64,

    /// Emit logs as JSON instead of plain text.
    #[arg(long)]
    json_logs: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(
        LogLevel::from_env(),
        if args.json_logs { LogFormat::Json } else { LogFormat::Text },
    );

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "failed to inspect mapfile");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), blkcache::Error> {
    let file = File::open(&args.mapfile).map_err(blkcache::Error::StdIo)?;
    let doc = mapfile::load(BufReader::new(file), args.device_size)?;

    println!("pos:    0x{:08x}", doc.region_map.pos()?);
    println!("status: {}", doc.region_map.status()?);
    println!();
    println!("{:>12}  {:>12}  status", "pos", "size");
    for range in doc.region_map.ranges() {
        println!("0x{:08x}  0x{:08x}  {}", range.position, range.length, range.status);
    }
    Ok(())
}
