//! Recovery Engine
//! Boot sector → MFT → record table → paths → pattern selection → extraction
//!
//! Failures inside one record or one file are reported and the scan moves
//! on; only the device, the boot sector and the initial MFT read can stop it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::disk_reader::DiskReader;
use crate::error::{RecoveryError, Result};
use crate::mft_loader::{load_mft_file, read_mft, save_mft, MftBytes};
use crate::ntfs_parser::{
    parse_boot_sector, parse_mft, AttributeType, MftRecord, NtfsBootSector, StandardInformation,
    BOOT_SECTOR_SIZE,
};
use crate::path_resolver::{resolve_all, ResolvedPath};
use crate::pattern::GlobPattern;
use crate::report::{CountingSink, ReportSink};

const MAX_NAME_SUFFIX: u32 = 10_000;

/// What to scan and what to do with the results
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub disk: PathBuf,
    /// Bytes per sector, replacing the boot sector value
    pub sector_size: Option<u16>,
    /// Sectors per cluster, replacing the boot sector value
    pub cluster_size: Option<u8>,
    /// Pre-extracted MFT to use instead of bootstrapping from the disk
    pub mft: Option<PathBuf>,
    pub save_mft: Option<PathBuf>,
    /// Empty means list only
    pub patterns: Vec<String>,
    pub outdir: PathBuf,
    pub deleted_only: bool,
}

impl ScanOptions {
    pub fn new(disk: impl Into<PathBuf>) -> Self {
        ScanOptions {
            disk: disk.into(),
            sector_size: None,
            cluster_size: None,
            mft: None,
            save_mft: None,
            patterns: Vec::new(),
            outdir: PathBuf::from("."),
            deleted_only: false,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct FileReport {
    pub record: u64,
    pub name: String,
    pub path: String,
    pub orphaned: bool,
    pub deleted: bool,
    pub directory: bool,
    pub size: Option<u64>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub mft_modified: Option<String>,
    pub accessed: Option<String>,
    /// DOS-style attribute bits from STANDARD_INFORMATION
    pub file_attributes: Option<u32>,
    pub recovered_to: Option<String>,
    pub error: Option<String>,
}

impl FileReport {
    fn new(record: &MftRecord, resolved: &ResolvedPath) -> Self {
        let info = record.standard_information().ok();
        let stamp = |pick: fn(&StandardInformation) -> Option<DateTime<Utc>>| {
            info.as_ref().and_then(pick).map(|dt| dt.to_rfc3339())
        };
        FileReport {
            record: resolved.record,
            name: resolved.name.clone(),
            path: resolved.full_path(),
            orphaned: resolved.orphaned,
            deleted: !record.is_in_use(),
            directory: record.is_directory(),
            size: record.stream(AttributeType::Data, None).map(|d| d.declared_size()),
            created: stamp(|si| si.created),
            modified: stamp(|si| si.modified),
            mft_modified: stamp(|si| si.mft_modified),
            accessed: stamp(|si| si.accessed),
            file_attributes: info.as_ref().map(|si| si.file_attributes),
            recovered_to: None,
            error: None,
        }
    }
}

#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanSummary {
    pub disk: String,
    pub bytes_per_cluster: u64,
    pub mft_bytes: u64,
    pub mft_crc32: String,
    pub records_total: usize,
    pub records_parsed: usize,
    pub files_listed: usize,
    pub files_matched: usize,
    pub files_recovered: usize,
    pub files_failed: usize,
    pub orphaned: usize,
    pub warnings: usize,
    pub files: Vec<FileReport>,
}

/// Main recovery engine
pub struct RecoveryEngine<'a, R = File> {
    disk: DiskReader<R>,
    sink: CountingSink<'a>,
}

impl<'a> RecoveryEngine<'a, File> {
    /// Open a device or image for scanning
    pub fn open(path: &Path, sink: &'a dyn ReportSink) -> Result<Self> {
        Ok(Self::new(DiskReader::open(path)?, sink))
    }
}

impl<'a, R: Read + Seek> RecoveryEngine<'a, R> {
    pub fn new(disk: DiskReader<R>, sink: &'a dyn ReportSink) -> Self {
        RecoveryEngine {
            disk,
            sink: CountingSink::new(sink),
        }
    }

    /// Read and validate the boot sector, then apply geometry overrides
    pub fn read_boot_sector(&mut self, options: &ScanOptions) -> Result<NtfsBootSector> {
        let data = self.disk.read_at(0, BOOT_SECTOR_SIZE)?;
        let mut boot = match parse_boot_sector(&data) {
            Ok(boot) => boot,
            Err(e) => {
                if let RecoveryError::NotNtfs(_) = e {
                    self.sink.failure("Not an NTFS disk???");
                }
                return Err(e);
            }
        };
        boot.apply_overrides(options.sector_size, options.cluster_size)?;
        if boot.bytes_per_cluster() == 0 {
            return Err(RecoveryError::format(0x0B, "cluster size is zero"));
        }

        // Total sectors excludes the backup boot sector at the very end
        if boot.total_sectors > 0 {
            self.disk.limit_to(
                boot.total_sectors
                    .saturating_add(1)
                    .saturating_mul(boot.bytes_per_sector as u64),
            );
        }
        match self.disk.stream_len() {
            Ok(len) if len > 0 => self.disk.limit_to(len),
            Ok(_) => {}
            Err(e) => log::debug!("Device length unavailable: {}", e),
        }

        log::info!(
            "Geometry: {} bytes/sector, {} sectors/cluster, {} sectors, MFT at cluster {} (mirror {})",
            boot.bytes_per_sector,
            boot.sectors_per_cluster,
            boot.total_sectors,
            boot.mft_cluster,
            boot.mft_mirror_cluster
        );
        Ok(boot)
    }

    /// Run a full scan: list or recover every record that resolves to a name
    pub fn scan(&mut self, options: &ScanOptions) -> Result<ScanSummary> {
        let patterns = options
            .patterns
            .iter()
            .map(|p| GlobPattern::new(p))
            .collect::<Result<Vec<_>>>()?;
        if !patterns.is_empty() {
            let sources: Vec<&str> = patterns.iter().map(|p| p.as_str()).collect();
            log::debug!("Recovering files matching {:?}", sources);
        }

        fs::create_dir_all(&options.outdir)?;

        let boot = self.read_boot_sector(options)?;
        let bpc = boot.bytes_per_cluster();

        self.sink.progress("Reading MFT");
        let mft = match &options.mft {
            Some(path) => load_mft_file(path)?,
            None => MftBytes::Owned(read_mft(&mut self.disk, &boot, &self.sink)?),
        };

        let crc = crc32fast::hash(&mft);
        if let Some(path) = &options.save_mft {
            save_mft(path, &mft)?;
            self.sink.progress(&format!(
                "Saved MFT to {} ({} bytes, crc32 {:08x})",
                path.display(),
                mft.len(),
                crc
            ));
        }

        let table = parse_mft(&mft, bpc, &self.sink);
        let resolved = resolve_all(&table);

        let mut summary = ScanSummary {
            disk: options.disk.display().to_string(),
            bytes_per_cluster: bpc,
            mft_bytes: mft.len() as u64,
            mft_crc32: format!("{:08x}", crc),
            records_total: table.len(),
            records_parsed: table.iter().filter(|r| r.is_some()).count(),
            ..Default::default()
        };

        for (record, path) in table.iter().zip(resolved) {
            let (Some(record), Some(path)) = (record, path) else {
                continue;
            };
            if options.deleted_only && record.is_in_use() {
                continue;
            }

            summary.files_listed += 1;
            if path.orphaned {
                summary.orphaned += 1;
            }
            let full_path = path.full_path();
            let mut report = FileReport::new(record, &path);

            if patterns.is_empty() {
                self.sink.progress(&full_path);
                summary.files.push(report);
                continue;
            }

            if !patterns
                .iter()
                .any(|p| p.matches(&path.name) || p.matches(&full_path))
            {
                continue;
            }

            summary.files_matched += 1;
            self.sink.progress(&format!("Recovering {}", full_path));
            match save_file(&mut self.disk, record, &path.segments, &options.outdir, &self.sink) {
                Ok(dest) => {
                    self.sink.progress("Success!");
                    summary.files_recovered += 1;
                    report.recovered_to = Some(dest.display().to_string());
                }
                Err(e) => {
                    self.sink.failure(&format!("failed: {}", e));
                    summary.files_failed += 1;
                    report.error = Some(e.to_string());
                }
            }
            summary.files.push(report);
        }

        summary.warnings = self.sink.warnings();
        log::info!(
            "Scan finished: {} records, {} listed, {} recovered, {} failure lines, {} warnings",
            summary.records_total,
            summary.files_listed,
            summary.files_recovered,
            self.sink.failures(),
            summary.warnings
        );
        Ok(summary)
    }
}

/// Open the device named in `options` and scan it
pub fn perform_scan(options: &ScanOptions, sink: &dyn ReportSink) -> Result<ScanSummary> {
    let mut engine = RecoveryEngine::open(&options.disk, sink)?;
    engine.scan(options)
}

/// Keep a recovered name from escaping the output directory
fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            ':' | '*' | '?' | '"' | '<' | '>' | '|' if cfg!(windows) => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => format!("_{}", cleaned),
        _ => cleaned,
    }
}

fn try_create(path: &Path) -> Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `data` to `dest`, or to `dest_0000`, `dest_0001`, ... if taken
fn write_output_file(dest: &Path, data: &[u8]) -> Result<PathBuf> {
    let candidates = std::iter::once(dest.to_path_buf())
        .chain((0..MAX_NAME_SUFFIX).map(|t| with_suffix(dest, &format!("_{:04}", t))));

    for candidate in candidates {
        if let Some(mut file) = try_create(&candidate)? {
            file.write_all(data)?;
            return Ok(candidate);
        }
    }

    Err(RecoveryError::Extraction {
        path: dest.display().to_string(),
        reason: "File exists.".to_string(),
    })
}

/// Extract one record's unnamed DATA stream plus every named stream.
///
/// Named streams land next to the main file as `<name>~<stream>`.
/// Returns the path the main stream was written to.
pub fn save_file<R: Read + Seek>(
    disk: &mut DiskReader<R>,
    record: &MftRecord,
    segments: &[String],
    outdir: &Path,
    sink: &dyn ReportSink,
) -> Result<PathBuf> {
    let display = segments.join("/");
    if segments.is_empty() {
        return Err(RecoveryError::Extraction {
            path: display,
            reason: "record is the volume root".to_string(),
        });
    }

    let main = record
        .stream(AttributeType::Data, None)
        .ok_or_else(|| RecoveryError::Extraction {
            path: display.clone(),
            reason: "no unnamed DATA stream".to_string(),
        })?;

    let mut dest = outdir.to_path_buf();
    for segment in segments {
        dest.push(sanitize_segment(segment));
    }

    let data = main.materialize(disk, sink)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let written = write_output_file(&dest, &data)?;

    for (name, stream) in record.streams(AttributeType::Data) {
        let Some(name) = name else {
            continue;
        };
        let bytes = stream.materialize(disk, sink)?;
        let ads = with_suffix(&dest, &format!("~{}", sanitize_segment(name)));
        write_output_file(&ads, &bytes)?;
    }

    Ok(written)
}
