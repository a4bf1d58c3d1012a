//! ntfs_undelete - NTFS undelete straight from the MFT
//!
//! Reads the Master File Table off a raw device or image, rebuilds every
//! record's path, and copies out the files whose name or path matches one
//! of the given patterns, deleted or not.
//!
//! Raw device access needs Administrator/root privileges.

mod disk_reader;
mod error;
mod mft_loader;
mod ntfs_parser;
mod path_resolver;
mod pattern;
mod recovery_engine;
mod report;
mod runlist;
#[cfg(test)]
mod test_support;

use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use crate::error::Result;
use crate::recovery_engine::{perform_scan, ScanOptions};
use crate::report::{ConsoleSink, FileSink, ReportSink, TeeSink};

/// Recover files from an NTFS volume using only its MFT
#[derive(Parser)]
#[command(name = "ntfs_undelete")]
#[command(version)]
#[command(about = "Recover files from an NTFS volume using only its MFT", long_about = None)]
struct Args {
    /// Raw device or image path (e.g. \\.\C: or /dev/sdb1)
    disk: PathBuf,

    /// Override the bytes per sector read from the boot sector
    #[arg(long)]
    sector_size: Option<u16>,

    /// Override the sectors per cluster read from the boot sector
    #[arg(long)]
    cluster_size: Option<u8>,

    /// Use this MFT dump instead of reading the MFT from the disk
    #[arg(long)]
    mft: Option<PathBuf>,

    /// Write the MFT used for this scan to a file
    #[arg(long)]
    save_mft: Option<PathBuf>,

    /// Glob to recover (repeatable); without one, paths are only listed
    #[arg(short, long = "pattern", allow_hyphen_values = true)]
    pattern: Vec<String>,

    /// Directory recovered files are written to
    #[arg(short, long, default_value = ".")]
    outdir: PathBuf,

    /// Only consider records that are no longer in use
    #[arg(long)]
    deleted_only: bool,

    /// Also write every report line to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print a JSON summary on stdout when the scan ends
    #[arg(long)]
    json: bool,
}

impl From<Args> for ScanOptions {
    fn from(args: Args) -> Self {
        ScanOptions {
            sector_size: args.sector_size,
            cluster_size: args.cluster_size,
            mft: args.mft,
            save_mft: args.save_mft,
            patterns: args.pattern,
            outdir: args.outdir,
            deleted_only: args.deleted_only,
            ..ScanOptions::new(args.disk)
        }
    }
}

/// Scan with the given console sink; stdout only ever receives the JSON summary
fn run(args: Args, console: &dyn ReportSink, stdout: &mut dyn Write) -> Result<()> {
    let json = args.json;
    let file_sink = args.report.as_deref().map(FileSink::create).transpose()?;

    let mut sinks: Vec<&dyn ReportSink> = vec![console];
    if let Some(sink) = &file_sink {
        sinks.push(sink);
    }
    let sink = TeeSink::new(sinks);

    let options = ScanOptions::from(args);
    log::debug!("Scan options: {:?}", options);

    let summary = perform_scan(&options, &sink)?;
    if json {
        serde_json::to_writer_pretty(&mut *stdout, &summary)?;
        writeln!(stdout)?;
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let console = ConsoleSink::new(!args.json);
    let stdout = std::io::stdout();

    if let Err(e) = run(args, &console, &mut stdout.lock()) {
        if e.is_recoverable() {
            eprintln!("Scan aborted: {}", e);
        } else {
            eprintln!("{}", e);
        }
        std::process::exit(1);
    }
}
