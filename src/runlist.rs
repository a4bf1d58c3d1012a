//! Runlist decoding
//! Maps a non-resident attribute's run headers to absolute cluster ranges

use serde::{Deserialize, Serialize};

use crate::report::ReportSink;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DataRun {
    /// Absolute starting cluster (after delta accumulation)
    pub cluster_offset: i64,
    pub cluster_count: u64,
    /// No offset field: the run has no clusters on disk
    pub is_sparse: bool,
}

/// Little-endian unsigned integer of arbitrary width (0 bytes => 0)
pub fn parse_varint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Little-endian two's complement integer of arbitrary width
pub fn parse_signed_varint(bytes: &[u8]) -> i64 {
    let width = bytes.len().min(8);
    if width == 0 {
        return 0;
    }
    let raw = parse_varint(bytes);
    if width == 8 {
        return raw as i64;
    }
    let sign_bit = 1u64 << (8 * width - 1);
    if raw & sign_bit != 0 {
        (raw as i64) - (1i64 << (8 * width))
    } else {
        raw as i64
    }
}

/// Decode the runlist that starts at `start` inside `chunk`.
///
/// A zero header or the end of `chunk` ends the list. A header whose
/// fields would run past the end is reported and decoding stops; runs
/// already decoded are kept.
pub fn decode_runlist(chunk: &[u8], start: usize, sink: &dyn ReportSink) -> Vec<DataRun> {
    let mut runs = Vec::new();
    let mut pos = start;
    let mut current: i64 = 0;

    while pos < chunk.len() {
        let header = chunk[pos];
        if header == 0 {
            break;
        }
        pos += 1;

        let length_size = (header & 0x0F) as usize;
        let offset_size = (header >> 4) as usize;

        if pos + length_size + offset_size > chunk.len() {
            sink.warning(&format!(
                "Warning: invalid runlist header {:02x} (runlist {})",
                header,
                hex::encode(&chunk[start.min(chunk.len())..])
            ));
            break;
        }

        let cluster_count = parse_varint(&chunk[pos..pos + length_size]);
        pos += length_size;
        let delta = parse_signed_varint(&chunk[pos..pos + offset_size]);
        pos += offset_size;

        current = current.wrapping_add(delta);
        runs.push(DataRun {
            cluster_offset: current,
            cluster_count,
            is_sparse: offset_size == 0,
        });
    }

    runs
}
