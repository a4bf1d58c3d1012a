//! MFT bootstrap
//! The $MFT record describes the MFT's own extent, so a small window is read
//! first and record 0's DATA runlist is followed to get the whole table.

use memmap2::Mmap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::ops::Deref;
use std::path::Path;

use crate::disk_reader::DiskReader;
use crate::error::{RecoveryError, Result};
use crate::ntfs_parser::{parse_mft_record, AttributeType, NtfsBootSector, MFT_RECORD_SIZE};
use crate::report::ReportSink;

/// MFT bytes either read off the device or mapped from a dump
pub enum MftBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for MftBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            MftBytes::Owned(bytes) => bytes,
            MftBytes::Mapped(map) => map,
        }
    }
}

/// Read the MFT described by the boot sector.
///
/// Only the initial window read is fatal; if following $MFT's own runlist
/// fails, the window is returned as a partial MFT.
pub fn read_mft<R: Read + Seek>(
    disk: &mut DiskReader<R>,
    boot: &NtfsBootSector,
    sink: &dyn ReportSink,
) -> Result<Vec<u8>> {
    let bpc = boot.bytes_per_cluster();
    sink.progress(&format!("Loading MFT from cluster {}", boot.mft_cluster));

    let offset = boot
        .mft_cluster
        .checked_mul(bpc)
        .ok_or_else(|| RecoveryError::format(0x30, "MFT cluster out of range"))?;
    let window = usize::try_from(boot.mft_window_bytes())
        .map_err(|_| RecoveryError::format(0x40, "MFT record size out of range"))?;
    let mft = disk.read_at(offset, window)?;

    match follow_mft_runlist(disk, bpc, &mft, sink) {
        Ok(full) => Ok(full),
        Err(e) => {
            sink.warning(&format!(
                "WARNING: Failed to load $MFT ({}), proceeding with partial MFT.",
                e
            ));
            Ok(mft)
        }
    }
}

fn follow_mft_runlist<R: Read + Seek>(
    disk: &mut DiskReader<R>,
    bpc: u64,
    window: &[u8],
    sink: &dyn ReportSink,
) -> Result<Vec<u8>> {
    let first = &window[..window.len().min(MFT_RECORD_SIZE)];
    let record = parse_mft_record(first, 0, 0, bpc, sink)?;
    let data = record
        .stream(AttributeType::Data, None)
        .ok_or_else(|| RecoveryError::format(0, "$MFT has no unnamed DATA attribute"))?;

    let full = data.materialize(disk, sink)?;
    if full.len() < window.len() {
        return Err(RecoveryError::format(0, "$MFT truncated"));
    }
    log::debug!("$MFT runlist yields {} bytes ({} records)", full.len(), full.len() / MFT_RECORD_SIZE);
    Ok(full)
}

/// Use an MFT dump instead of the device's own table
pub fn load_mft_file(path: &Path) -> Result<MftBytes> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(MftBytes::Owned(Vec::new()));
    }
    // SAFETY: the dump is opened read-only and only read while the scan runs
    let map = unsafe { Mmap::map(&file)? };
    Ok(MftBytes::Mapped(map))
}

/// Write the MFT bytes used for this scan; returns their CRC-32
pub fn save_mft(path: &Path, mft: &[u8]) -> Result<u32> {
    let mut file = File::create(path)?;
    file.write_all(mft)?;
    Ok(crc32fast::hash(mft))
}
