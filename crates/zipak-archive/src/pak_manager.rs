//! Owns every mounted archive, resolves logical paths against them and the
//! loose filesystem under a configurable priority, and manages the pool of
//! open pseudo-files.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use rsa::{RsaPrivateKey, RsaPublicKey};
use zipak_arena::Arena;
use zipak_format::FileEntry;

use crate::cache::Cache;
use crate::cache_factory::{self, InitMethod, OpenFlags};
use crate::error::{ArchiveError, Result};
use crate::find_iterator::{self, FindEntry, MountView};
use crate::pseudo_file::PseudoFile;

/// Offset added to a pseudo-file slot index to produce an opaque handle
/// that is always distinguishable from a platform file handle.
pub const PSEUDO_HANDLE_BASE: u32 = 0x1000_0000;

/// Four policies for choosing between a loose file and a packed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PakPriority {
    /// Try disk first, then any mounted pak.
    FileFirst,
    /// Try any mounted pak first, then disk.
    PakFirst,
    /// Packed entries only; disk is consulted only when the caller passes
    /// [`ResolveHint::OnDisk`].
    PakOnly,
    /// Disk first only under a mods folder; `PakFirst` everywhere else.
    FileFirstModsOnly,
}

/// Per-call resolution hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveHint {
    /// Permit a disk hit even under `PakOnly`.
    pub on_disk: bool,
    /// Never resolve into a mod directory for this call.
    pub never_in_pak: bool,
}

struct Mount {
    bind_root: String,
    path: PathBuf,
    cache: Arc<Cache>,
    disabled: std::sync::atomic::AtomicBool,
}

thread_local! {
    static ACCESS_DISABLED: Cell<bool> = const { Cell::new(false) };
}

/// Where a resolved read will come from.
pub enum Resolved {
    /// A loose file on disk at this absolute path.
    Disk(PathBuf),
    /// An entry inside a mounted archive.
    Packed {
        /// The archive the entry lives in.
        cache: Arc<Cache>,
        /// CRC-32 path hash used as the cache's per-entry lookup key.
        path_hash: u32,
        /// The resolved directory entry.
        entry: FileEntry,
    },
}

/// Owns mounts, mods, aliases, and the open pseudo-file table.
pub struct PakManager {
    mounts: RwLock<Vec<Mount>>,
    mods: RwLock<Vec<String>>,
    aliases: RwLock<std::collections::HashMap<String, String>>,
    priority: PakPriority,
    data_root: PathBuf,
    pseudo_files: RwLock<Vec<Option<Arc<PseudoFile>>>>,
    cached_raw: parking_lot::Mutex<std::collections::HashMap<u32, Arc<Vec<u8>>>>,
    missing_paths: DashMap<String, AtomicU32>,
    arena: Arc<Arena>,
    next_continuous: AtomicU64,
}

impl PakManager {
    /// Create a manager rooted at `data_root` with the given default
    /// priority policy.
    pub fn new(data_root: impl Into<PathBuf>, priority: PakPriority) -> Self {
        Self {
            mounts: RwLock::new(Vec::new()),
            mods: RwLock::new(Vec::new()),
            aliases: RwLock::new(std::collections::HashMap::new()),
            priority,
            data_root: data_root.into(),
            pseudo_files: RwLock::new(Vec::new()),
            cached_raw: parking_lot::Mutex::new(std::collections::HashMap::new()),
            missing_paths: DashMap::new(),
            arena: Arc::new(Arena::new()),
            next_continuous: AtomicU64::new(0),
        }
    }

    /// Mount one archive under `bind_root`. `public_key` is required only
    /// for archives carrying a `CDR_SIGNED` trailing header.
    pub fn open_pack(
        &self,
        bind_root: &str,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        init: InitMethod,
        private_key: Option<&RsaPrivateKey>,
        public_key: Option<&RsaPublicKey>,
    ) -> Result<()> {
        let path = path.as_ref();
        let cache = cache_factory::open(
            path,
            flags,
            init,
            Arc::clone(&self.arena),
            private_key,
            public_key,
        )?;
        let mut bind_root = bind_root.replace('\\', "/");
        if !bind_root.ends_with('/') {
            bind_root.push('/');
        }
        self.mounts.write().push(Mount {
            bind_root,
            path: path.to_path_buf(),
            cache: Arc::new(cache),
            disabled: std::sync::atomic::AtomicBool::new(false),
        });
        Ok(())
    }

    /// Mount every archive matching a glob-style wildcard pattern (only `*`
    /// is supported, matched against the file name).
    pub fn open_packs(
        &self,
        bind_root: &str,
        dir: impl AsRef<Path>,
        wildcard_suffix: &str,
        flags: OpenFlags,
        init: InitMethod,
    ) -> Result<usize> {
        let mut opened = 0;
        let read_dir = std::fs::read_dir(dir.as_ref())?;
        for item in read_dir.flatten() {
            let name = item.file_name().to_string_lossy().into_owned();
            if name.ends_with(wildcard_suffix) {
                self.open_pack(bind_root, item.path(), flags, init, None, None)?;
                opened += 1;
            }
        }
        Ok(opened)
    }

    /// Unmount the archive opened from `path`.
    pub fn close_pack(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut mounts = self.mounts.write();
        if let Some(idx) = mounts.iter().position(|m| m.path == path) {
            mounts.remove(idx);
            true
        } else {
            false
        }
    }

    /// Unmount every archive.
    pub fn close_packs(&self) {
        self.mounts.write().clear();
    }

    /// Enable or disable an already-mounted archive without unmounting it.
    pub fn set_pack_accessible(&self, path: impl AsRef<Path>, accessible: bool) -> bool {
        let path = path.as_ref();
        let mounts = self.mounts.read();
        if let Some(mount) = mounts.iter().find(|m| m.path == path) {
            mount.disabled.store(!accessible, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Append a mod search directory, most-specific last.
    pub fn add_mod(&self, mod_root: &str) {
        self.mods.write().push(mod_root.replace('\\', "/"));
    }

    /// Remove a previously added mod search directory.
    pub fn remove_mod(&self, mod_root: &str) {
        self.mods.write().retain(|m| m != mod_root);
    }

    /// Register a `@alias@` prefix expansion.
    pub fn set_alias(&self, alias: &str, target: &str) {
        self.aliases
            .write()
            .insert(alias.to_string(), target.to_string());
    }

    /// Look up a previously registered alias.
    pub fn get_alias(&self, alias: &str) -> Option<String> {
        self.aliases.read().get(alias).cloned()
    }

    /// Disable file access for the calling thread, used by QA builds to
    /// catch accidental synchronous I/O during gameplay.
    pub fn set_access_disabled(disabled: bool) {
        ACCESS_DISABLED.with(|flag| flag.set(disabled));
    }

    fn check_access(&self) -> Result<()> {
        if ACCESS_DISABLED.with(Cell::get) {
            return Err(ArchiveError::InvalidCall(
                "file access disabled on this thread".into(),
            ));
        }
        Ok(())
    }

    /// Normalize a path the way every resolution step expects: lowercase,
    /// forward slashes, `.`/`..` collapsed, and a data-root prefix applied
    /// unless the path is an alias (`@name@...`) or already absolute.
    pub fn adjust_file_name(&self, src: &str) -> String {
        if let Some(rest) = src.strip_prefix('@') {
            if let Some(end) = rest.find('@') {
                let alias = &rest[..end];
                let tail = &rest[end + 1..];
                if let Some(target) = self.get_alias(alias) {
                    return join_collapsed(&target, tail);
                }
                return src.to_string();
            }
        }

        let normalized = zipak_format::path::normalize(src);
        if Path::new(&normalized).is_absolute() {
            return normalized;
        }
        join_collapsed(&self.data_root.to_string_lossy(), &normalized)
    }

    fn resolve_in_mounts(&self, normalized: &str) -> Option<(Arc<Cache>, u32, FileEntry)> {
        let mounts = self.mounts.read();
        for mount in mounts.iter().rev() {
            if mount.disabled.load(Ordering::Acquire) {
                continue;
            }
            let Some(relative) = normalized.strip_prefix(mount.bind_root.as_str()) else {
                continue;
            };
            if let Some(entry) = mount.cache.find(relative) {
                let hash = zipak_format::path::hash(relative);
                return Some((Arc::clone(&mount.cache), hash, entry));
            }
        }
        None
    }

    fn resolve_on_disk(&self, normalized: &str) -> Option<PathBuf> {
        let path = PathBuf::from(normalized);
        path.is_file().then_some(path)
    }

    /// Resolve a caller-facing path to either a loose file or a packed
    /// entry, per this manager's priority policy.
    pub fn resolve(&self, path: &str, hint: ResolveHint) -> Result<Resolved> {
        self.check_access()?;
        let normalized = self.adjust_file_name(path);

        let is_under_mods = !hint.never_in_pak
            && self
                .mods
                .read()
                .iter()
                .any(|m| normalized.starts_with(m.as_str()));

        let try_disk_first = match self.priority {
            PakPriority::FileFirst => true,
            PakPriority::PakFirst => false,
            PakPriority::PakOnly => hint.on_disk,
            PakPriority::FileFirstModsOnly => is_under_mods,
        };

        if try_disk_first {
            if let Some(p) = self.resolve_on_disk(&normalized) {
                return Ok(Resolved::Disk(p));
            }
        }

        if self.priority != PakPriority::PakOnly || !hint.never_in_pak {
            if let Some((cache, hash, entry)) = self.resolve_in_mounts(&normalized) {
                return Ok(Resolved::Packed {
                    cache,
                    path_hash: hash,
                    entry,
                });
            }
        }

        if !try_disk_first && self.priority != PakPriority::PakOnly {
            if let Some(p) = self.resolve_on_disk(&normalized) {
                return Ok(Resolved::Disk(p));
            }
        }
        if self.priority == PakPriority::PakOnly && hint.on_disk {
            if let Some(p) = self.resolve_on_disk(&normalized) {
                return Ok(Resolved::Disk(p));
            }
        }

        self.missing_paths
            .entry(normalized.clone())
            .or_default()
            .fetch_add(1, Ordering::AcqRel);
        Err(ArchiveError::FileNotFound(normalized))
    }

    /// How many times a path has failed to resolve.
    pub fn missing_path_count(&self, path: &str) -> u32 {
        let normalized = self.adjust_file_name(path);
        self.missing_paths
            .get(&normalized)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Open a read-only pseudo-file for a path that resolved into a
    /// mounted archive. Disk hits are the caller's responsibility (they
    /// bypass this manager's pseudo-file pool entirely).
    pub fn fopen(&self, path: &str, hint: ResolveHint) -> Result<u32> {
        match self.resolve(path, hint)? {
            Resolved::Disk(_) => Err(ArchiveError::InvalidCall(
                "path resolved to a loose file; open it directly".into(),
            )),
            Resolved::Packed {
                cache,
                path_hash,
                entry,
            } => {
                let pseudo = Arc::new(PseudoFile::new(cache, path_hash, entry));
                let mut slots = self.pseudo_files.write();
                let slot_index = slots.iter().position(Option::is_none).unwrap_or(slots.len());
                if slot_index == slots.len() {
                    slots.push(Some(pseudo));
                } else {
                    slots[slot_index] = Some(pseudo);
                }
                Ok(PSEUDO_HANDLE_BASE + slot_index as u32)
            }
        }
    }

    /// Release a pseudo-file handle previously returned by [`Self::fopen`].
    pub fn fclose(&self, handle: u32) -> Result<()> {
        let index = self.pseudo_index(handle)?;
        let mut slots = self.pseudo_files.write();
        if slots.get(index).map(Option::is_some) != Some(true) {
            return Err(ArchiveError::InvalidHandle(handle));
        }
        slots[index] = None;
        Ok(())
    }

    fn pseudo_index(&self, handle: u32) -> Result<usize> {
        handle
            .checked_sub(PSEUDO_HANDLE_BASE)
            .map(|i| i as usize)
            .ok_or(ArchiveError::InvalidHandle(handle))
    }

    fn pseudo(&self, handle: u32) -> Result<Arc<PseudoFile>> {
        let index = self.pseudo_index(handle)?;
        self.pseudo_files
            .read()
            .get(index)
            .and_then(Option::clone)
            .ok_or(ArchiveError::InvalidHandle(handle))
    }

    /// `true` if `handle` refers to a pseudo-file rather than a platform
    /// handle.
    pub fn is_pseudo_handle(handle: u32) -> bool {
        handle >= PSEUDO_HANDLE_BASE
    }

    /// Read from a pseudo-file handle.
    pub fn fread(&self, handle: u32, dst: &mut [u8]) -> Result<usize> {
        self.pseudo(handle)?.read(dst)
    }

    /// Seek a pseudo-file handle.
    pub fn fseek(&self, handle: u32, offset: i64, whence: crate::pseudo_file::Whence) -> Result<u64> {
        self.pseudo(handle)?.seek(offset, whence)
    }

    /// Current cursor of a pseudo-file handle.
    pub fn ftell(&self, handle: u32) -> Result<u64> {
        Ok(self.pseudo(handle)?.tell())
    }

    /// `true` once a pseudo-file handle has reached end of stream.
    pub fn feof(&self, handle: u32) -> Result<bool> {
        Ok(self.pseudo(handle)?.eof())
    }

    /// Total size of the entry behind a pseudo-file handle.
    pub fn fgetsize(&self, handle: u32) -> Result<u64> {
        Ok(self.pseudo(handle)?.size())
    }

    /// Read the entire decompressed contents of a pseudo-file handle,
    /// caching the buffer so repeated whole-file reads are free.
    pub fn get_cached_file_data(&self, handle: u32) -> Result<Arc<Vec<u8>>> {
        let key = handle;
        if let Some(existing) = self.cached_raw.lock().get(&key) {
            return Ok(Arc::clone(existing));
        }

        let pseudo = self.pseudo(handle)?;
        let mut buf = vec![0u8; pseudo.size() as usize];
        pseudo.seek(0, crate::pseudo_file::Whence::Set)?;
        let mut total = 0;
        while total < buf.len() {
            let n = pseudo.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        buf.truncate(total);
        let arced = Arc::new(buf);

        let mut table = self.cached_raw.lock();
        // First writer wins; a racing caller's buffer is simply discarded.
        let winner = Arc::clone(table.entry(key).or_insert_with(|| Arc::clone(&arced)));
        Ok(winner)
    }

    /// Scan a directory, merging loose-filesystem results with every
    /// mount whose bind root covers it.
    pub fn find_first(&self, dir: &str) -> Vec<FindEntry> {
        let normalized = zipak_format::path::normalize(dir);
        let mounts = self.mounts.read();
        let views: Vec<MountView<'_>> = mounts
            .iter()
            .rev()
            .filter(|m| !m.disabled.load(Ordering::Acquire))
            .filter_map(|m| {
                normalized
                    .strip_prefix(m.bind_root.trim_end_matches('/'))
                    .map(|rel| MountView {
                        cache: &m.cache,
                        relative_dir: rel.trim_start_matches('/').to_string(),
                    })
            })
            .collect();
        find_iterator::find_first(Some(&self.data_root), &normalized, &views)
    }

    /// `true` if `path` exists as either a loose file or a packed entry.
    pub fn is_file_exist(&self, path: &str) -> bool {
        self.resolve(path, ResolveHint::default()).is_ok()
    }
}

fn join_collapsed(root: &str, tail: &str) -> String {
    let is_absolute = root.starts_with('/');
    let mut stack: Vec<&str> = Vec::new();
    for segment in root.split('/').chain(tail.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    let joined = stack.join("/");
    if is_absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_file_name_prefixes_data_root() {
        let mgr = PakManager::new("/game", PakPriority::FileFirst);
        assert_eq!(mgr.adjust_file_name("textures/rock.dds"), "/game/textures/rock.dds");
    }

    #[test]
    fn adjust_file_name_passes_through_unknown_alias() {
        let mgr = PakManager::new("/game", PakPriority::FileFirst);
        assert_eq!(mgr.adjust_file_name("@unknown@foo"), "@unknown@foo");
    }

    #[test]
    fn adjust_file_name_collapses_dotdot() {
        let mgr = PakManager::new("/game", PakPriority::FileFirst);
        assert_eq!(mgr.adjust_file_name("a/../b.txt"), "/game/b.txt");
    }

    #[test]
    fn missing_path_is_not_counted_until_resolve_fails() {
        let mgr = PakManager::new("/nonexistent-root", PakPriority::FileFirst);
        assert_eq!(mgr.missing_path_count("missing.txt"), 0);
        let _ = mgr.resolve("missing.txt", ResolveHint::default());
        assert_eq!(mgr.missing_path_count("missing.txt"), 1);
    }

    #[test]
    fn pseudo_handle_base_is_distinguished() {
        assert!(PakManager::is_pseudo_handle(PSEUDO_HANDLE_BASE));
        assert!(!PakManager::is_pseudo_handle(PSEUDO_HANDLE_BASE - 1));
    }
}
