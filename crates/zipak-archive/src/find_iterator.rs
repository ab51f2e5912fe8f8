//! Lazy directory scan merging loose-filesystem entries with every mounted
//! archive's directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::Cache;

/// One entry produced by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindEntry {
    /// Lowercase, slash-normalized name relative to the scanned directory.
    pub name: String,
    /// `true` if this entry is itself a directory.
    pub is_dir: bool,
    /// Uncompressed size, `0` for directories.
    pub size: u64,
}

/// A single mount consulted by a scan, paired with the sub-path inside it
/// that corresponds to the requested directory.
pub struct MountView<'a> {
    /// The mounted archive.
    pub cache: &'a Arc<Cache>,
    /// Path of the scanned directory relative to this mount's bind root.
    pub relative_dir: String,
}

/// Scan `dir` on disk (if `loose_root` is given) and in every mount in
/// `mounts`, merging results into one case-insensitive, name-sorted list.
/// "Directory" wins over "file" on a name collision between sources, since
/// a loose directory can shadow a single packed file of the same name.
pub fn find_first(loose_root: Option<&Path>, dir: &str, mounts: &[MountView<'_>]) -> Vec<FindEntry> {
    let mut merged: BTreeMap<String, FindEntry> = BTreeMap::new();

    if let Some(root) = loose_root {
        let scan_dir = join_native(root, dir);
        if let Ok(read_dir) = std::fs::read_dir(&scan_dir) {
            for item in read_dir.flatten() {
                let Ok(file_type) = item.file_type() else {
                    continue;
                };
                let name = item.file_name().to_string_lossy().into_owned();
                let key = zipak_format::path::normalize(&name);
                let size = if file_type.is_dir() {
                    0
                } else {
                    item.metadata().map(|m| m.len()).unwrap_or(0)
                };
                insert_dominant(
                    &mut merged,
                    key,
                    FindEntry {
                        name,
                        is_dir: file_type.is_dir(),
                        size,
                    },
                );
            }
        }
    }

    for mount in mounts {
        let Some(node) = mount.cache.dir().lookup_dir(&mount.relative_dir) else {
            continue;
        };
        for sub in &node.dirs {
            insert_dominant(
                &mut merged,
                sub.name.clone(),
                FindEntry {
                    name: sub.name.clone(),
                    is_dir: true,
                    size: 0,
                },
            );
        }
        for file in &node.files {
            insert_dominant(
                &mut merged,
                file.name.clone(),
                FindEntry {
                    name: file.name.clone(),
                    is_dir: false,
                    size: u64::from(file.uncompressed_size),
                },
            );
        }
    }

    merged.into_values().collect()
}

fn insert_dominant(map: &mut BTreeMap<String, FindEntry>, key: String, entry: FindEntry) {
    match map.get(&key) {
        Some(existing) if existing.is_dir && !entry.is_dir => {}
        _ => {
            map.insert(key, entry);
        }
    }
}

fn join_native(root: &Path, dir: &str) -> PathBuf {
    if dir.is_empty() {
        root.to_path_buf()
    } else {
        root.join(dir.replace('/', std::path::MAIN_SEPARATOR_STR))
    }
}

/// A stateful cursor over one [`find_first`] result set, mirroring the
/// `find_next`/`find_close` POSIX-style iteration the pak manager exposes.
pub struct FindIterator {
    entries: Vec<FindEntry>,
    pos: usize,
}

impl FindIterator {
    /// Snapshot `entries` into a new cursor, starting before the first
    /// result.
    pub fn new(entries: Vec<FindEntry>) -> Self {
        Self { entries, pos: 0 }
    }

    /// Advance and return the next entry, or `None` once exhausted.
    pub fn next_entry(&mut self) -> Option<&FindEntry> {
        let entry = self.entries.get(self.pos)?;
        self.pos += 1;
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_dominates_file_on_collision() {
        let mut map = BTreeMap::new();
        insert_dominant(
            &mut map,
            "x".into(),
            FindEntry {
                name: "x".into(),
                is_dir: true,
                size: 0,
            },
        );
        insert_dominant(
            &mut map,
            "x".into(),
            FindEntry {
                name: "x".into(),
                is_dir: false,
                size: 10,
            },
        );
        assert!(map["x"].is_dir);
    }

    #[test]
    fn find_iterator_yields_entries_in_order() {
        let entries = vec![
            FindEntry {
                name: "a".into(),
                is_dir: false,
                size: 0,
            },
            FindEntry {
                name: "b".into(),
                is_dir: false,
                size: 0,
            },
        ];
        let mut it = FindIterator::new(entries);
        assert_eq!(it.next_entry().unwrap().name, "a");
        assert_eq!(it.next_entry().unwrap().name, "b");
        assert!(it.next_entry().is_none());
    }
}
