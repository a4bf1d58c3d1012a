//! Raw Disk Reader Module
//! Positioned reads over a raw block device or a disk image

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{RecoveryError, Result};

#[cfg(windows)]
use std::os::windows::fs::OpenOptionsExt;

#[cfg(windows)]
const SECTOR_SIZE: u64 = 512;

/// Raw disk reader for direct byte access
pub struct DiskReader<R = File> {
    handle: R,
    /// Seek granularity; 1 means any offset is fine
    block_size: u64,
    current_position: u64,
    /// Bytes the volume can supply; reads past it fail before allocating
    size_limit: Option<u64>,
}

impl DiskReader<File> {
    /// Open a physical drive, partition or image for reading
    /// For Windows: Use paths like "\\.\PhysicalDrive0" or "\\.\C:"
    pub fn open(path: &Path) -> Result<Self> {
        #[cfg(windows)]
        {
            use winapi::um::winnt::{FILE_SHARE_READ, FILE_SHARE_WRITE};

            let file = OpenOptions::new()
                .read(true)
                .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
                .open(path)?;

            // Raw Windows devices only seek to sector multiples
            Ok(DiskReader::with_block_size(file, SECTOR_SIZE))
        }

        #[cfg(not(windows))]
        {
            let file = OpenOptions::new().read(true).open(path)?;
            Ok(DiskReader::new(file))
        }
    }
}

impl<R: Read + Seek> DiskReader<R> {
    pub fn new(handle: R) -> Self {
        Self::with_block_size(handle, 1)
    }

    pub fn with_block_size(handle: R, block_size: u64) -> Self {
        DiskReader {
            handle,
            block_size: block_size.max(1),
            current_position: 0,
            size_limit: None,
        }
    }

    /// Narrow the readable size; an existing smaller limit is kept
    pub fn limit_to(&mut self, bytes: u64) {
        self.size_limit = Some(self.size_limit.map_or(bytes, |limit| limit.min(bytes)));
    }

    pub fn size_limit(&self) -> Option<u64> {
        self.size_limit
    }

    /// Length reported by the handle; raw devices may report 0
    pub fn stream_len(&mut self) -> Result<u64> {
        let restore = self.position();
        let len = self.handle.seek(SeekFrom::End(0))?;
        self.restore_position(restore)?;
        Ok(len)
    }

    /// Get current position
    pub fn position(&self) -> u64 {
        self.current_position
    }

    /// Seek to a byte offset, respecting the device's block alignment.
    /// Returns the slack bytes that still have to be skipped.
    fn seek_aligned(&mut self, offset: u64) -> Result<u64> {
        let slack = offset % self.block_size;
        self.handle.seek(SeekFrom::Start(offset - slack))?;
        Ok(slack)
    }

    /// Read `size` bytes at `offset` without changing position
    pub fn read_at(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        if let Some(limit) = self.size_limit {
            let end = offset.checked_add(size as u64);
            if end.map_or(true, |end| end > limit) {
                return Err(RecoveryError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {} bytes at offset {} runs past the volume end ({} bytes)",
                        size, offset, limit
                    ),
                )));
            }
        }
        let restore = self.current_position;
        let result = self.read_exact_at(offset, size);
        self.restore_position(restore)?;
        result
    }

    fn read_exact_at(&mut self, offset: u64, size: usize) -> Result<Vec<u8>> {
        let slack = self.seek_aligned(offset)? as usize;
        let mut buffer = vec![0u8; slack + size];
        let mut filled = 0;
        while filled < buffer.len() {
            match self.handle.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled < buffer.len() {
            return Err(RecoveryError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read at offset {}: got {} of {} bytes",
                    offset,
                    filled.saturating_sub(slack),
                    size
                ),
            )));
        }
        buffer.drain(..slack);
        Ok(buffer)
    }

    fn restore_position(&mut self, position: u64) -> Result<()> {
        let slack = self.seek_aligned(position)?;
        if slack > 0 {
            std::io::copy(&mut (&mut self.handle).take(slack), &mut std::io::sink())?;
        }
        self.current_position = position;
        Ok(())
    }
}
