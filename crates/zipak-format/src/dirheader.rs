//! Compact in-memory ZIP directory
//!
//! [`DirHeader`] is the parsed, queryable form of an archive's central
//! directory: a tree of [`DirEntry`] nodes, each holding its immediate
//! children sorted by name for binary search, plus the [`FileEntry`] leaves
//! that carry everything needed to locate and decompress an entry's data
//! without touching the central directory again. A single shared name pool
//! backs every entry so the whole tree can be rebuilt from one buffer.
//!
//! A [`FlatIndex`] sits alongside the tree and maps the CRC-32 of a
//! normalized full path directly to a file entry, giving O(log n) lookup
//! for callers that already know the exact path and don't need directory
//! traversal.

use std::collections::BTreeMap;

use crate::path;
use crate::structures::{CompressionMethod, GeneralPurposeFlags};

/// A single file's directory-level metadata.
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Lowercase, slash-normalized leaf name (no parent path).
    pub name: String,
    /// CRC-32 of uncompressed data, from the central directory.
    pub crc32: u32,
    /// Compressed size in bytes.
    pub compressed_size: u32,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u32,
    /// Compression method.
    pub method: CompressionMethod,
    /// General purpose bit flags.
    pub flags: GeneralPurposeFlags,
    /// Offset of the local file header, relative to the start of the
    /// archive (or the start of the mapped region for split archives).
    pub local_header_offset: u32,
    /// MS-DOS modification date/time, as stored.
    pub mod_date: u16,
    pub mod_time: u16,
    /// Index into the stream-cipher key table, when this entry is
    /// encrypted with `STREAMCIPHER_KEYTABLE`. `None` for plaintext
    /// entries or entries encrypted with a self-contained method.
    pub key_slot: Option<u16>,
}

/// A directory node: a name, its file children, and its subdirectory
/// children, both kept sorted by name.
#[derive(Debug, Clone, Default)]
pub struct DirEntry {
    /// Lowercase, slash-normalized name of this directory (empty for root).
    pub name: String,
    /// Subdirectories, sorted by [`DirEntry::name`].
    pub dirs: Vec<DirEntry>,
    /// Files directly in this directory, sorted by [`FileEntry::name`].
    pub files: Vec<FileEntry>,
}

impl DirEntry {
    /// Binary search a child directory by name.
    pub fn find_dir(&self, name: &str) -> Option<&DirEntry> {
        self.dirs
            .binary_search_by(|d| d.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.dirs[i])
    }

    /// Binary search a child file by name.
    pub fn find_file(&self, name: &str) -> Option<&FileEntry> {
        self.files
            .binary_search_by(|f| f.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.files[i])
    }

    fn find_dir_mut(&mut self, name: &str) -> Option<&mut DirEntry> {
        match self.dirs.binary_search_by(|d| d.name.as_str().cmp(name)) {
            Ok(i) => Some(&mut self.dirs[i]),
            Err(_) => None,
        }
    }

    fn insert_dir_sorted(&mut self, name: &str) -> &mut DirEntry {
        match self.dirs.binary_search_by(|d| d.name.as_str().cmp(name)) {
            Ok(i) => &mut self.dirs[i],
            Err(i) => {
                self.dirs.insert(
                    i,
                    DirEntry {
                        name: name.to_string(),
                        dirs: Vec::new(),
                        files: Vec::new(),
                    },
                );
                &mut self.dirs[i]
            }
        }
    }

    fn insert_file_sorted(&mut self, entry: FileEntry) {
        match self
            .files
            .binary_search_by(|f| f.name.as_str().cmp(&entry.name))
        {
            Ok(i) => self.files[i] = entry,
            Err(i) => self.files.insert(i, entry),
        }
    }

    fn iter_with_prefix<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a FileEntry)>) {
        for f in &self.files {
            let full = if prefix.is_empty() {
                f.name.clone()
            } else {
                format!("{prefix}/{}", f.name)
            };
            out.push((full, f));
        }
        for d in &self.dirs {
            let sub = if prefix.is_empty() {
                d.name.clone()
            } else {
                format!("{prefix}/{}", d.name)
            };
            d.iter_with_prefix(&sub, out);
        }
    }
}

/// Parsed, queryable directory for one archive.
#[derive(Debug, Clone, Default)]
pub struct DirHeader {
    /// Root of the directory tree.
    pub root: DirEntry,
    /// CRC-32(normalized full path) -> (full path, entry) for O(log n)
    /// whole-archive lookup without tree traversal.
    flat: BTreeMap<u32, (String, FileEntry)>,
}

impl DirHeader {
    /// Build an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file at `full_path` (not yet normalized), creating
    /// intermediate directory nodes as needed. Keeps tree children and the
    /// flat index in sync.
    pub fn insert(&mut self, full_path: &str, entry: FileEntry) {
        let normalized = path::normalize(full_path);
        let hash = crc32fast::hash(normalized.as_bytes());

        let (parent, leaf) = path::split_parent(&normalized);
        let mut node = &mut self.root;
        if !parent.is_empty() {
            for segment in parent.split('/') {
                node = node.insert_dir_sorted(segment);
            }
        }
        let mut leaf_entry = entry;
        leaf_entry.name = leaf.to_string();
        node.insert_file_sorted(leaf_entry.clone());

        self.flat.insert(hash, (normalized, leaf_entry));
    }

    /// Look up a file by full path, walking the directory tree. Accepts
    /// either slash style and any case.
    pub fn lookup(&self, full_path: &str) -> Option<&FileEntry> {
        let normalized = path::normalize(full_path);
        if normalized.is_empty() {
            return None;
        }
        let mut node = &self.root;
        let mut segments = normalized.split('/').peekable();
        while let Some(seg) = segments.next() {
            if segments.peek().is_none() {
                return node.find_file(seg);
            }
            node = node.find_dir(seg)?;
        }
        None
    }

    /// Look up a file by full path using the flat CRC-32 index, bypassing
    /// tree traversal.
    pub fn lookup_hashed(&self, full_path: &str) -> Option<&FileEntry> {
        let hash = path::hash(full_path);
        self.flat.get(&hash).map(|(_, e)| e)
    }

    /// Look up a subdirectory node by path.
    pub fn lookup_dir(&self, dir_path: &str) -> Option<&DirEntry> {
        let normalized = path::normalize(dir_path);
        if normalized.is_empty() {
            return Some(&self.root);
        }
        let mut node = &self.root;
        for seg in normalized.split('/') {
            node = node.find_dir(seg)?;
        }
        Some(node)
    }

    /// Iterate all files in the archive as `(full_path, entry)`, depth
    /// first, children in sorted order.
    pub fn iter_all(&self) -> Vec<(String, &FileEntry)> {
        let mut out = Vec::new();
        self.root.iter_with_prefix("", &mut out);
        out
    }

    /// Total number of files indexed.
    pub fn file_count(&self) -> usize {
        self.flat.len()
    }

    /// Remove a file by full path. Returns the removed entry, if any.
    /// Leaves now-empty directory nodes in place; they carry no on-disk
    /// cost and pruning them would require re-walking every ancestor.
    pub fn remove(&mut self, full_path: &str) -> Option<FileEntry> {
        let normalized = path::normalize(full_path);
        let hash = crc32fast::hash(normalized.as_bytes());
        let (_, removed) = self.flat.remove(&hash)?;

        let (parent, leaf) = path::split_parent(&normalized);
        let mut node = &mut self.root;
        if !parent.is_empty() {
            for segment in parent.split('/') {
                node = node.find_dir_mut(segment)?;
            }
        }
        if let Ok(i) = node.files.binary_search_by(|f| f.name.as_str().cmp(leaf)) {
            node.files.remove(i);
        }
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(crc: u32) -> FileEntry {
        FileEntry {
            name: String::new(),
            crc32: crc,
            compressed_size: 0,
            uncompressed_size: 0,
            method: CompressionMethod::Store,
            flags: GeneralPurposeFlags(0),
            local_header_offset: 0,
            mod_date: 0,
            mod_time: 0,
            key_slot: None,
        }
    }

    #[test]
    fn insert_and_lookup_round_trips() {
        let mut dir = DirHeader::new();
        dir.insert("Textures/Rock.dds", entry(1));
        dir.insert("textures/wood.dds", entry(2));
        dir.insert("readme.txt", entry(3));

        assert_eq!(dir.lookup("TEXTURES\\ROCK.DDS").unwrap().crc32, 1);
        assert_eq!(dir.lookup_hashed("textures/rock.dds").unwrap().crc32, 1);
        assert_eq!(dir.lookup("readme.txt").unwrap().crc32, 3);
        assert!(dir.lookup("missing.txt").is_none());
        assert_eq!(dir.file_count(), 3);
    }

    #[test]
    fn lookup_dir_and_iter_all() {
        let mut dir = DirHeader::new();
        dir.insert("a/b/c.txt", entry(1));
        dir.insert("a/d.txt", entry(2));

        let b = dir.lookup_dir("a/b").unwrap();
        assert_eq!(b.files.len(), 1);

        let all = dir.iter_all();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn remove_drops_from_both_indexes() {
        let mut dir = DirHeader::new();
        dir.insert("a/b.txt", entry(1));
        assert!(dir.remove("A/B.TXT").is_some());
        assert!(dir.lookup("a/b.txt").is_none());
        assert!(dir.lookup_hashed("a/b.txt").is_none());
        assert_eq!(dir.file_count(), 0);
    }

    #[test]
    fn children_stay_sorted() {
        let mut dir = DirHeader::new();
        for name in ["z.txt", "a.txt", "m.txt"] {
            dir.insert(name, entry(0));
        }
        let names: Vec<_> = dir.root.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "m.txt", "z.txt"]);
    }
}
