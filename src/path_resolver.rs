//! Path reconstruction
//! Walks FILE_NAME parent references from a record up to the root directory

use rayon::prelude::*;

use crate::error::{RecoveryError, Result};
use crate::ntfs_parser::{MftRecord, MftTable};

/// Top-level bucket for files whose parent chain is broken
pub const ORPHAN_DIR: &str = "__ORPHANED__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub record: u64,
    /// The record's own FILE_NAME
    pub name: String,
    /// Root to leaf, root itself excluded
    pub segments: Vec<String>,
    pub orphaned: bool,
}

impl ResolvedPath {
    pub fn full_path(&self) -> String {
        self.segments.join("/")
    }
}

fn record_at(table: &[Option<MftRecord>], index: u64) -> Option<&MftRecord> {
    let index = usize::try_from(index).ok()?;
    table.get(index)?.as_ref()
}

/// Names from the root down to `index`.
///
/// The walk stops at the record named "." and ignores the sequence half of
/// each parent reference. A chain longer than the table can only be a
/// cycle and is treated as an orphan.
pub fn get_filepath(table: &[Option<MftRecord>], index: u64) -> Result<Vec<String>> {
    let mut bits = Vec::new();
    let mut current = index;

    for _ in 0..table.len() {
        let record = record_at(table, current).ok_or_else(|| {
            RecoveryError::orphan(index, format!("record {} is not a FILE record", current))
        })?;
        let file_name = record
            .file_name()
            .map_err(|e| RecoveryError::orphan(index, e.to_string()))?;

        if file_name.is_root() {
            bits.reverse();
            return Ok(bits);
        }
        current = file_name.parent_record();
        bits.push(file_name.name);
    }

    Err(RecoveryError::orphan(
        index,
        format!("parent chain exceeds {} hops", table.len()),
    ))
}

/// Resolve one record; None when it has no usable FILE_NAME of its own
pub fn resolve(table: &[Option<MftRecord>], index: u64) -> Option<ResolvedPath> {
    let name = record_at(table, index)?.file_name().ok()?.name;

    let (segments, orphaned) = match get_filepath(table, index) {
        Ok(segments) => (segments, false),
        Err(e) => {
            log::debug!("{}", e);
            (vec![ORPHAN_DIR.to_string(), name.clone()], true)
        }
    };

    Some(ResolvedPath {
        record: index,
        name,
        segments,
        orphaned,
    })
}

/// Resolve every record of a loaded table; the table is read-only here
pub fn resolve_all(table: &MftTable) -> Vec<Option<ResolvedPath>> {
    (0..table.len() as u64)
        .into_par_iter()
        .map(|i| resolve(table, i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs_parser::parse_mft;
    use crate::report::MemorySink;
    use crate::test_support::*;

    fn table(records: &[(usize, Vec<u8>)], slots: usize) -> MftTable {
        let sink = MemorySink::new();
        parse_mft(&mft_bytes(slots, records), 4096, &sink)
    }

    fn named(parent: u64, name: &str) -> Vec<u8> {
        mft_record(&[file_name_attr(parent, name)], 0x01, 1)
    }

    #[test]
    fn test_chain_to_root() {
        let t = table(
            &[
                (5, named(5, ".")),
                (6, named(5, "Users")),
                (7, named(6, "alice")),
                (9, named(7, "notes.txt")),
            ],
            10,
        );
        assert_eq!(get_filepath(&t, 9).unwrap(), vec!["Users", "alice", "notes.txt"]);
        assert_eq!(get_filepath(&t, 5).unwrap(), Vec::<String>::new());

        let resolved = resolve(&t, 9).unwrap();
        assert_eq!(resolved.full_path(), "Users/alice/notes.txt");
        assert!(!resolved.orphaned);
    }

    #[test]
    fn test_missing_parent_is_orphan() {
        let t = table(&[(5, named(5, ".")), (8, named(3, "lost.jpg"))], 10);
        assert!(matches!(get_filepath(&t, 8), Err(RecoveryError::Orphan { record: 8, .. })));

        let resolved = resolve(&t, 8).unwrap();
        assert!(resolved.orphaned);
        assert_eq!(resolved.full_path(), "__ORPHANED__/lost.jpg");
    }

    #[test]
    fn test_parent_outside_table_is_orphan() {
        let t = table(&[(5, named(5, ".")), (6, named(0xFFFF_FFFF, "far.bin"))], 8);
        assert!(resolve(&t, 6).unwrap().orphaned);
    }

    #[test]
    fn test_cycle_terminates_as_orphan() {
        let t = table(&[(5, named(5, ".")), (6, named(7, "a")), (7, named(6, "b"))], 8);
        let err = get_filepath(&t, 6).unwrap_err();
        assert!(err.to_string().contains("exceeds 8 hops"));
        assert!(resolve(&t, 7).unwrap().orphaned);
    }

    #[test]
    fn test_self_loop_terminates() {
        let t = table(&[(3, named(3, "loop"))], 4);
        assert!(get_filepath(&t, 3).is_err());
    }

    #[test]
    fn test_record_without_name_is_skipped() {
        let t = table(&[(5, named(5, ".")), (6, mft_record(&[], 0x01, 1))], 8);
        assert!(resolve(&t, 6).is_none());
        assert!(resolve(&t, 2).is_none());
    }

    #[test]
    fn test_resolve_all_matches_sequential() {
        let t = table(
            &[(5, named(5, ".")), (6, named(5, "docs")), (7, named(6, "a.txt")), (8, named(40, "b.txt"))],
            12,
        );
        let all = resolve_all(&t);
        assert_eq!(all.len(), 12);
        for (i, resolved) in all.iter().enumerate() {
            assert_eq!(resolved, &resolve(&t, i as u64));
        }
        assert_eq!(all[7].as_ref().unwrap().full_path(), "docs/a.txt");
        assert!(all[8].as_ref().unwrap().orphaned);
    }
}
