//! Builders for synthetic NTFS structures used across the unit tests

use std::io::Cursor;

use crate::disk_reader::DiskReader;

/// Update sequence number written over every sector trailer
pub const USN: [u8; 2] = [0x07, 0x00];
/// True trailing bytes of sectors 0 and 1 in records built by `mft_record`
pub const TRAILER_BYTES: [[u8; 2]; 2] = [[0xAB, 0xCD], [0x12, 0x34]];

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

fn utf16(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn width_unsigned(v: u64) -> usize {
    (1..=8).find(|&w| w == 8 || v < 1u64 << (8 * w)).unwrap_or(8)
}

fn width_signed(v: i64) -> usize {
    (1..=8)
        .find(|&w| {
            w == 8 || {
                let half = 1i64 << (8 * w - 1);
                v >= -half && v < half
            }
        })
        .unwrap_or(8)
}

/// Encode (length, delta) pairs the way NTFS lays them out
pub fn encode_runlist(runs: &[(u64, i64)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(length, delta) in runs {
        let lw = width_unsigned(length);
        let ow = width_signed(delta);
        out.push(((ow as u8) << 4) | lw as u8);
        out.extend_from_slice(&length.to_le_bytes()[..lw]);
        out.extend_from_slice(&delta.to_le_bytes()[..ow]);
    }
    out.push(0);
    out
}

pub fn resident_attr(type_code: i32, name: Option<&str>, value: &[u8]) -> Vec<u8> {
    let name_bytes = name.map(utf16).unwrap_or_default();
    let name_offset = 0x18;
    let value_offset = align8(name_offset + name_bytes.len());
    let size = align8(value_offset + value.len());

    let mut attr = vec![0u8; size];
    attr[0..4].copy_from_slice(&type_code.to_le_bytes());
    attr[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    attr[8] = 0;
    attr[9] = (name_bytes.len() / 2) as u8;
    attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    attr[0x10..0x14].copy_from_slice(&(value.len() as u32).to_le_bytes());
    attr[0x14..0x16].copy_from_slice(&(value_offset as u16).to_le_bytes());
    attr[name_offset..name_offset + name_bytes.len()].copy_from_slice(&name_bytes);
    attr[value_offset..value_offset + value.len()].copy_from_slice(value);
    attr
}

pub fn non_resident_attr(type_code: i32, name: Option<&str>, runlist: &[u8], real_size: u64) -> Vec<u8> {
    let name_bytes = name.map(utf16).unwrap_or_default();
    let name_offset = 0x40;
    let runlist_offset = align8(name_offset + name_bytes.len());
    let size = align8(runlist_offset + runlist.len());

    let mut attr = vec![0u8; size];
    attr[0..4].copy_from_slice(&type_code.to_le_bytes());
    attr[4..8].copy_from_slice(&(size as u32).to_le_bytes());
    attr[8] = 1;
    attr[9] = (name_bytes.len() / 2) as u8;
    attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
    attr[0x20..0x22].copy_from_slice(&(runlist_offset as u16).to_le_bytes());
    attr[0x28..0x30].copy_from_slice(&real_size.to_le_bytes());
    attr[0x30..0x38].copy_from_slice(&real_size.to_le_bytes());
    attr[0x38..0x40].copy_from_slice(&real_size.to_le_bytes());
    attr[name_offset..name_offset + name_bytes.len()].copy_from_slice(&name_bytes);
    attr[runlist_offset..runlist_offset + runlist.len()].copy_from_slice(runlist);
    attr
}

pub fn file_name_value(parent_ref: u64, name: &str) -> Vec<u8> {
    let name_bytes = utf16(name);
    let mut value = vec![0u8; 66];
    value[0..8].copy_from_slice(&parent_ref.to_le_bytes());
    value[64] = (name_bytes.len() / 2) as u8;
    value[65] = 1;
    value.extend_from_slice(&name_bytes);
    value
}

pub fn file_name_attr(parent: u64, name: &str) -> Vec<u8> {
    // Sequence number 1 in the top 16 bits, as NTFS writes it
    resident_attr(0x30, None, &file_name_value(parent | (1 << 48), name))
}

pub fn standard_info_attr(filetime: u64) -> Vec<u8> {
    let mut value = Vec::with_capacity(48);
    for _ in 0..4 {
        value.extend_from_slice(&filetime.to_le_bytes());
    }
    value.extend_from_slice(&0x20u32.to_le_bytes());
    value.resize(48, 0);
    resident_attr(0x10, None, &value)
}

/// A protected 1024-byte FILE record holding `attrs`
pub fn mft_record(attrs: &[Vec<u8>], flags: u16, sequence: u16) -> Vec<u8> {
    let mut rec = vec![0u8; 1024];
    rec[510..512].copy_from_slice(&TRAILER_BYTES[0]);
    rec[1022..1024].copy_from_slice(&TRAILER_BYTES[1]);

    rec[0..4].copy_from_slice(b"FILE");
    rec[0x04..0x06].copy_from_slice(&0x30u16.to_le_bytes());
    rec[0x06..0x08].copy_from_slice(&3u16.to_le_bytes());
    rec[0x10..0x12].copy_from_slice(&sequence.to_le_bytes());
    rec[0x12..0x14].copy_from_slice(&1u16.to_le_bytes());
    rec[0x14..0x16].copy_from_slice(&0x38u16.to_le_bytes());
    rec[0x16..0x18].copy_from_slice(&flags.to_le_bytes());

    let mut pos = 0x38;
    for attr in attrs {
        rec[pos..pos + attr.len()].copy_from_slice(attr);
        pos += attr.len();
    }
    assert!(pos + 8 <= 1022, "attributes do not fit in one record");
    rec[pos..pos + 4].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    rec[0x18..0x1C].copy_from_slice(&((pos + 8) as u32).to_le_bytes());
    rec[0x1C..0x20].copy_from_slice(&1024u32.to_le_bytes());

    // Move the real sector trailers into the USA and stamp the USN
    rec[0x30..0x32].copy_from_slice(&USN);
    for sector in 0..2 {
        let trailer = sector * 512 + 510;
        let slot = 0x32 + sector * 2;
        let saved = [rec[trailer], rec[trailer + 1]];
        rec[slot..slot + 2].copy_from_slice(&saved);
        rec[trailer..trailer + 2].copy_from_slice(&USN);
    }
    rec
}

/// Raw MFT bytes with `records` at their slot numbers and zeroed gaps
pub fn mft_bytes(slots: usize, records: &[(usize, Vec<u8>)]) -> Vec<u8> {
    let mut mft = vec![0u8; slots * 1024];
    for (slot, record) in records {
        mft[slot * 1024..(slot + 1) * 1024].copy_from_slice(record);
    }
    mft
}

pub fn boot_sector(bytes_per_sector: u16, sectors_per_cluster: u8, mft_cluster: u64, clusters_per_record: u8) -> Vec<u8> {
    let mut boot = vec![0u8; 512];
    boot[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
    boot[3..11].copy_from_slice(b"NTFS    ");
    boot[0x0B..0x0D].copy_from_slice(&bytes_per_sector.to_le_bytes());
    boot[0x0D] = sectors_per_cluster;
    boot[0x28..0x30].copy_from_slice(&0x10000u64.to_le_bytes());
    boot[0x30..0x38].copy_from_slice(&mft_cluster.to_le_bytes());
    boot[0x38..0x40].copy_from_slice(&(mft_cluster + 1).to_le_bytes());
    boot[0x40] = clusters_per_record;
    boot[0x1FE] = 0x55;
    boot[0x1FF] = 0xAA;
    boot
}

/// Volume image laid out cluster by cluster
pub struct ImageBuilder {
    data: Vec<u8>,
    bytes_per_cluster: usize,
}

impl ImageBuilder {
    pub fn new(bytes_per_sector: u16, sectors_per_cluster: u8, clusters: usize, mft_cluster: u64) -> Self {
        let bytes_per_cluster = bytes_per_sector as usize * sectors_per_cluster as usize;
        let mut data = vec![0u8; (bytes_per_cluster * clusters).max(512)];
        data[..512].copy_from_slice(&boot_sector(bytes_per_sector, sectors_per_cluster, mft_cluster, 2));
        ImageBuilder {
            data,
            bytes_per_cluster,
        }
    }

    pub fn write_clusters(mut self, cluster: usize, bytes: &[u8]) -> Self {
        let start = cluster * self.bytes_per_cluster;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}

pub fn disk_from(image: Vec<u8>) -> DiskReader<Cursor<Vec<u8>>> {
    DiskReader::new(Cursor::new(image))
}
