//! NTFS MFT Parser Module
//! Parses the boot sector, MFT records and their attributes straight from raw bytes

use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::disk_reader::DiskReader;
use crate::error::{RecoveryError, Result};
use crate::report::ReportSink;
use crate::runlist::{decode_runlist, DataRun};

// NTFS Constants
pub const MFT_RECORD_SIZE: usize = 1024;
pub const BOOT_SECTOR_SIZE: usize = 512;
const MFT_SIGNATURE: &[u8] = b"FILE";
const NTFS_OEM_ID: &[u8] = b"NTFS    ";
const ATTRIBUTE_END: i32 = -1;
const USA_SECTOR_SIZE: usize = 512;
const PROGRESS_INTERVAL: usize = 791;

// Record header flags
const RECORD_IN_USE: u16 = 0x0001;
const RECORD_IS_DIRECTORY: u16 = 0x0002;

/// Low 48 bits of a file reference are the record number
pub const FILE_REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

#[derive(Debug, Clone)]
pub struct NtfsBootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_sectors: u64,
    pub mft_cluster: u64,
    pub mft_mirror_cluster: u64,
    /// Raw byte at 0x40; negative values encode 2^|v| bytes
    pub clusters_per_mft_record: u8,
}

/// Parse NTFS boot sector to get MFT location
pub fn parse_boot_sector(data: &[u8]) -> Result<NtfsBootSector> {
    if data.len() < 0x41 {
        return Err(RecoveryError::format(0, "boot sector too short"));
    }

    if &data[3..11] != NTFS_OEM_ID {
        return Err(RecoveryError::NotNtfs(
            String::from_utf8_lossy(&data[3..11]).into_owned(),
        ));
    }

    let mut cursor = Cursor::new(data);

    cursor.seek(SeekFrom::Start(0x0B))?;
    let bytes_per_sector = cursor.read_u16::<LittleEndian>()?;
    let sectors_per_cluster = cursor.read_u8()?;

    cursor.seek(SeekFrom::Start(0x28))?;
    let total_sectors = cursor.read_u64::<LittleEndian>()?;
    let mft_cluster = cursor.read_u64::<LittleEndian>()?;
    let mft_mirror_cluster = cursor.read_u64::<LittleEndian>()?;
    let clusters_per_mft_record = cursor.read_u8()?;

    Ok(NtfsBootSector {
        bytes_per_sector,
        sectors_per_cluster,
        total_sectors,
        mft_cluster,
        mft_mirror_cluster,
        clusters_per_mft_record,
    })
}

impl NtfsBootSector {
    /// Replace detected geometry with caller-supplied values
    pub fn apply_overrides(
        &mut self,
        sector_size: Option<u16>,
        cluster_size: Option<u8>,
    ) -> Result<()> {
        if let Some(bps) = sector_size {
            if bps == 0 {
                return Err(RecoveryError::format(0x0B, "sector size override must be non-zero"));
            }
            self.bytes_per_sector = bps;
        }
        if let Some(spc) = cluster_size {
            if spc == 0 {
                return Err(RecoveryError::format(0x0D, "cluster size override must be non-zero"));
            }
            self.sectors_per_cluster = spc;
        }
        Ok(())
    }

    pub fn bytes_per_cluster(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }

    /// Size of the initial MFT read, never less than one record
    pub fn mft_window_bytes(&self) -> u64 {
        let raw = self.clusters_per_mft_record as i8;
        let bytes = if raw > 0 {
            raw as u64 * self.bytes_per_cluster()
        } else {
            let shift = (raw as i32).unsigned_abs();
            if shift < 32 {
                1u64 << shift
            } else {
                0
            }
        };
        bytes.max(MFT_RECORD_SIZE as u64)
    }
}

// ============================================================================
// Attributes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeType {
    StandardInformation,
    AttributeList,
    FileName,
    ObjectId,
    SecurityDescriptor,
    VolumeName,
    VolumeInformation,
    Data,
    IndexRoot,
    IndexAllocation,
    Bitmap,
    ReparsePoint,
    EaInformation,
    Ea,
    PropertySet,
    LoggedUtilityStream,
    Unknown(i32),
}

impl AttributeType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0x10 => Self::StandardInformation,
            0x20 => Self::AttributeList,
            0x30 => Self::FileName,
            0x40 => Self::ObjectId,
            0x50 => Self::SecurityDescriptor,
            0x60 => Self::VolumeName,
            0x70 => Self::VolumeInformation,
            0x80 => Self::Data,
            0x90 => Self::IndexRoot,
            0xA0 => Self::IndexAllocation,
            0xB0 => Self::Bitmap,
            0xC0 => Self::ReparsePoint,
            0xD0 => Self::EaInformation,
            0xE0 => Self::Ea,
            0xF0 => Self::PropertySet,
            0x100 => Self::LoggedUtilityStream,
            other => Self::Unknown(other),
        }
    }

    pub fn name(&self) -> String {
        let name = match self {
            Self::StandardInformation => "STANDARD_INFORMATION",
            Self::AttributeList => "ATTRIBUTE_LIST",
            Self::FileName => "FILE_NAME",
            Self::ObjectId => "OBJECT_ID",
            Self::SecurityDescriptor => "SECURITY_DESCRIPTOR",
            Self::VolumeName => "VOLUME_NAME",
            Self::VolumeInformation => "VOLUME_INFORMATION",
            Self::Data => "DATA",
            Self::IndexRoot => "INDEX_ROOT",
            Self::IndexAllocation => "INDEX_ALLOCATION",
            Self::Bitmap => "BITMAP",
            Self::ReparsePoint => "REPARSE_POINT",
            Self::EaInformation => "EA_INFORMATION",
            Self::Ea => "EA",
            Self::PropertySet => "PROPERTY_SET",
            Self::LoggedUtilityStream => "LOGGED_UTILITY_STREAM",
            Self::Unknown(code) => return code.to_string(),
        };
        name.to_string()
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Attribute content, read from disk only when asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeData {
    Resident(Vec<u8>),
    NonResident {
        runs: Vec<DataRun>,
        real_size: u64,
        bytes_per_cluster: u64,
    },
}

impl AttributeData {
    /// Declared content length
    pub fn declared_size(&self) -> u64 {
        match self {
            AttributeData::Resident(data) => data.len() as u64,
            AttributeData::NonResident { real_size, .. } => *real_size,
        }
    }

    pub fn resident_bytes(&self) -> Option<&[u8]> {
        match self {
            AttributeData::Resident(data) => Some(data),
            AttributeData::NonResident { .. } => None,
        }
    }

    /// Produce the attribute's bytes.
    ///
    /// Non-resident content is read run by run and cut at the real size.
    /// Sparse runs read as zeros; a run that cannot be read is reported and
    /// zero-filled so the rest of the file keeps its position. A real size
    /// larger than the device's limit is rejected before anything is read.
    pub fn materialize<R: Read + Seek>(
        &self,
        disk: &mut DiskReader<R>,
        sink: &dyn ReportSink,
    ) -> Result<Vec<u8>> {
        let (runs, real_size, bpc) = match self {
            AttributeData::Resident(data) => return Ok(data.clone()),
            AttributeData::NonResident {
                runs,
                real_size,
                bytes_per_cluster,
            } => (runs, *real_size, *bytes_per_cluster),
        };

        if let Some(limit) = disk.size_limit() {
            if real_size > limit {
                return Err(RecoveryError::format(
                    0x30,
                    format!("declared size {} exceeds the volume ({} bytes)", real_size, limit),
                ));
            }
        }

        let mut out: Vec<u8> = Vec::new();
        for run in runs {
            let remaining = real_size.saturating_sub(out.len() as u64);
            if remaining == 0 {
                break;
            }
            let wanted = run.cluster_count.saturating_mul(bpc).min(remaining);
            let wanted = usize::try_from(wanted)
                .map_err(|_| RecoveryError::format(0, "run larger than address space"))?;

            if run.is_sparse {
                out.resize(out.len() + wanted, 0);
                continue;
            }

            let offset = u64::try_from(run.cluster_offset)
                .ok()
                .and_then(|c| c.checked_mul(bpc));
            let read = match offset {
                Some(offset) => disk.read_at(offset, wanted),
                None => Err(RecoveryError::format(0, "run starts before the volume")),
            };
            match read {
                Ok(data) => out.extend_from_slice(&data),
                Err(e) => {
                    sink.warning(&format!(
                        "Warning: failed to read {} clusters at cluster {}: {}",
                        run.cluster_count, run.cluster_offset, e
                    ));
                    out.resize(out.len() + wanted, 0);
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub attr_type: AttributeType,
    /// Stream name; None for the unnamed stream
    pub name: Option<String>,
    pub data: AttributeData,
}

fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parse one attribute record
pub fn parse_attribute(chunk: &[u8], bpc: u64, sink: &dyn ReportSink) -> Result<Attribute> {
    if chunk.len() < 16 {
        return Err(RecoveryError::format(0, "attribute header truncated"));
    }

    let mut cursor = Cursor::new(chunk);
    let type_code = cursor.read_i32::<LittleEndian>()?;
    let _size = cursor.read_u32::<LittleEndian>()?;
    let non_resident = cursor.read_u8()?;
    let name_length = cursor.read_u8()? as usize;
    let name_offset = cursor.read_u16::<LittleEndian>()? as usize;

    let name = if name_length > 0 {
        let end = name_offset + name_length * 2;
        if end > chunk.len() {
            return Err(RecoveryError::format(
                name_offset as u64,
                "attribute name runs past the record",
            ));
        }
        Some(decode_utf16(&chunk[name_offset..end]))
    } else {
        None
    };

    let data = if non_resident != 0 {
        if chunk.len() < 0x38 {
            return Err(RecoveryError::format(0, "non-resident header truncated"));
        }
        cursor.seek(SeekFrom::Start(0x20))?;
        let runlist_offset = cursor.read_u16::<LittleEndian>()? as usize;
        cursor.seek(SeekFrom::Start(0x30))?;
        let real_size = cursor.read_u64::<LittleEndian>()?;

        AttributeData::NonResident {
            runs: decode_runlist(chunk, runlist_offset, sink),
            real_size,
            bytes_per_cluster: bpc,
        }
    } else {
        cursor.seek(SeekFrom::Start(0x10))?;
        let value_length = cursor.read_u32::<LittleEndian>()? as usize;
        let value_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let start = value_offset.min(chunk.len());
        let end = value_offset.saturating_add(value_length).min(chunk.len());
        AttributeData::Resident(chunk[start..end].to_vec())
    };

    Ok(Attribute {
        attr_type: AttributeType::from_code(type_code),
        name,
        data,
    })
}

// ============================================================================
// Attribute values
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameValue {
    /// 48-bit parent record number and 16-bit sequence number
    pub parent_ref: u64,
    pub name: String,
}

impl FileNameValue {
    pub fn parent_record(&self) -> u64 {
        self.parent_ref & FILE_REFERENCE_MASK
    }

    pub fn is_root(&self) -> bool {
        self.name == "."
    }
}

pub fn parse_file_name(value: &[u8]) -> Result<FileNameValue> {
    if value.len() < 66 {
        return Err(RecoveryError::format(0, "FILE_NAME value too short"));
    }
    let parent_ref = u64::from_le_bytes([
        value[0], value[1], value[2], value[3], value[4], value[5], value[6], value[7],
    ]);
    let name_length = value[64] as usize;
    let end = 66 + name_length * 2;
    if end > value.len() {
        return Err(RecoveryError::format(64, "FILE_NAME name runs past the value"));
    }
    Ok(FileNameValue {
        parent_ref,
        name: decode_utf16(&value[66..end]),
    })
}

#[derive(Debug, Clone)]
pub struct StandardInformation {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub file_attributes: u32,
}

/// Convert Windows FILETIME (100ns ticks since 1601) to UTC
pub fn filetime_to_datetime(ft: u64) -> Option<DateTime<Utc>> {
    if ft == 0 {
        return None;
    }
    let secs = (ft / 10_000_000) as i64 - 11_644_473_600;
    let nanos = ((ft % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

pub fn parse_standard_information(value: &[u8]) -> Result<StandardInformation> {
    if value.len() < 36 {
        return Err(RecoveryError::format(0, "STANDARD_INFORMATION value too short"));
    }
    let mut cursor = Cursor::new(value);
    let created = cursor.read_u64::<LittleEndian>()?;
    let modified = cursor.read_u64::<LittleEndian>()?;
    let mft_modified = cursor.read_u64::<LittleEndian>()?;
    let accessed = cursor.read_u64::<LittleEndian>()?;
    let file_attributes = cursor.read_u32::<LittleEndian>()?;

    Ok(StandardInformation {
        created: filetime_to_datetime(created),
        modified: filetime_to_datetime(modified),
        mft_modified: filetime_to_datetime(mft_modified),
        accessed: filetime_to_datetime(accessed),
        file_attributes,
    })
}

// ============================================================================
// MFT records
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MftRecord {
    pub record_number: u64,
    pub sequence_number: u16,
    pub link_count: u16,
    pub flags: u16,
    /// Attribute type -> stream name -> content. A later attribute with the
    /// same type and name replaces an earlier one.
    pub attributes: BTreeMap<AttributeType, BTreeMap<Option<String>, AttributeData>>,
}

pub type MftTable = Vec<Option<MftRecord>>;

impl MftRecord {
    pub fn is_in_use(&self) -> bool {
        self.flags & RECORD_IN_USE != 0
    }

    pub fn is_directory(&self) -> bool {
        self.flags & RECORD_IS_DIRECTORY != 0
    }

    pub fn stream(&self, attr_type: AttributeType, name: Option<&str>) -> Option<&AttributeData> {
        self.attributes
            .get(&attr_type)?
            .get(&name.map(str::to_string))
    }

    /// Every stream of one attribute type, unnamed stream first
    pub fn streams(
        &self,
        attr_type: AttributeType,
    ) -> impl Iterator<Item = (Option<&str>, &AttributeData)> {
        self.attributes
            .get(&attr_type)
            .into_iter()
            .flat_map(|streams| streams.iter().map(|(k, v)| (k.as_deref(), v)))
    }

    fn resident_value(&self, attr_type: AttributeType) -> Result<&[u8]> {
        let data = self.stream(attr_type, None).ok_or_else(|| {
            RecoveryError::format(0, format!("record {} has no {}", self.record_number, attr_type))
        })?;
        data.resident_bytes().ok_or_else(|| {
            RecoveryError::format(
                0,
                format!("record {} has a non-resident {}", self.record_number, attr_type),
            )
        })
    }

    pub fn file_name(&self) -> Result<FileNameValue> {
        parse_file_name(self.resident_value(AttributeType::FileName)?)
    }

    pub fn standard_information(&self) -> Result<StandardInformation> {
        parse_standard_information(self.resident_value(AttributeType::StandardInformation)?)
    }
}

/// Apply the update sequence array to a record in place.
///
/// Sectors whose trailer does not carry the sequence number are reported
/// and left as they are. Never fails.
pub fn apply_fixup(
    chunk: &mut [u8],
    chunk_offset: u64,
    usa_offset: usize,
    usa_count: usize,
    sink: &dyn ReportSink,
) {
    if usa_offset == 0 || usa_count == 0 {
        return;
    }
    if usa_offset + 2 > chunk.len() {
        sink.warning(&format!(
            "Warning: USA offset {} outside record at offset {}",
            usa_offset, chunk_offset
        ));
        return;
    }

    let usa_num = [chunk[usa_offset], chunk[usa_offset + 1]];
    let mut upos = usa_offset + 2;

    for sector in 0..chunk.len() / USA_SECTOR_SIZE {
        let cpos = sector * USA_SECTOR_SIZE + USA_SECTOR_SIZE - 2;
        if chunk[cpos..cpos + 2] != usa_num {
            sink.warning(&format!(
                "Warning: bad USA data at offset {} - disk corrupt?",
                chunk_offset + cpos as u64
            ));
        } else if upos + 2 <= chunk.len() {
            let fix = [chunk[upos], chunk[upos + 1]];
            chunk[cpos..cpos + 2].copy_from_slice(&fix);
        }
        upos += 2;
    }
}

/// Parse a single MFT record slot.
///
/// Fails only when the slot is not a FILE record or its header is cut short;
/// a bad attribute is reported and skipped.
pub fn parse_mft_record(
    data: &[u8],
    record_number: u64,
    chunk_offset: u64,
    bpc: u64,
    sink: &dyn ReportSink,
) -> Result<MftRecord> {
    if data.len() < 0x18 {
        return Err(RecoveryError::format(chunk_offset, "record header truncated"));
    }
    if &data[0..4] != MFT_SIGNATURE {
        return Err(RecoveryError::format(chunk_offset, "missing FILE signature"));
    }

    let mut cursor = Cursor::new(data);
    cursor.seek(SeekFrom::Start(0x04))?;
    let usa_offset = cursor.read_u16::<LittleEndian>()? as usize;
    let usa_count = cursor.read_u16::<LittleEndian>()? as usize;
    let _lsn = cursor.read_u64::<LittleEndian>()?;
    let sequence_number = cursor.read_u16::<LittleEndian>()?;
    let link_count = cursor.read_u16::<LittleEndian>()?;
    let attr_offset = cursor.read_u16::<LittleEndian>()? as usize;
    let flags = cursor.read_u16::<LittleEndian>()?;

    let mut chunk = data.to_vec();
    apply_fixup(&mut chunk, chunk_offset, usa_offset, usa_count, sink);

    let mut record = MftRecord {
        record_number,
        sequence_number,
        link_count,
        flags,
        attributes: BTreeMap::new(),
    };

    let mut pos = attr_offset;
    while pos + 12 <= chunk.len() {
        let type_code = i32::from_le_bytes([chunk[pos], chunk[pos + 1], chunk[pos + 2], chunk[pos + 3]]);
        if type_code == ATTRIBUTE_END {
            break;
        }
        let size = u32::from_le_bytes([chunk[pos + 4], chunk[pos + 5], chunk[pos + 6], chunk[pos + 7]]) as usize;
        if size == 0 {
            sink.warning(&format!(
                "File at offset {}: zero-length attr type={} pos={}, stopping",
                chunk_offset, type_code, pos
            ));
            break;
        }

        let end = pos.saturating_add(size).min(chunk.len());
        match parse_attribute(&chunk[pos..end], bpc, sink) {
            Ok(attr) => {
                record
                    .attributes
                    .entry(attr.attr_type)
                    .or_default()
                    .insert(attr.name, attr.data);
            }
            Err(e) => sink.warning(&format!(
                "File at offset {}: failed to parse attr type={} pos={}: {}",
                chunk_offset, type_code, pos, e
            )),
        }

        pos = pos.saturating_add(size);
    }

    Ok(record)
}

/// Split raw MFT bytes into 1024-byte slots and parse every FILE record
pub fn parse_mft(mft: &[u8], bpc: u64, sink: &dyn ReportSink) -> MftTable {
    let total = mft.len() / MFT_RECORD_SIZE;
    let mut table = Vec::with_capacity(total);

    for i in 0..total {
        if i % PROGRESS_INTERVAL == 0 {
            sink.progress(&format!("Parsing MFT: {}/{}", i, total));
        }

        let offset = i * MFT_RECORD_SIZE;
        let chunk = &mft[offset..offset + MFT_RECORD_SIZE];
        if &chunk[..4] != MFT_SIGNATURE {
            table.push(None);
            continue;
        }

        match parse_mft_record(chunk, i as u64, offset as u64, bpc, sink) {
            Ok(record) => table.push(Some(record)),
            Err(e) => {
                sink.warning(&format!("Record {}: {}", i, e));
                table.push(None);
            }
        }
    }

    sink.progress("Parsing MFT: Done!");
    table
}
