use std::{
    collections::{BTreeSet, HashMap},
    io::Read,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes};
use cloudraid_common::{StripeId, META_PATH, RESERVED_STRIPES};
use cloudraid_storage::RaidStore;
use snafu::{ensure, ResultExt};
use tracing::{debug, info, warn};

use crate::err::{
    AlreadyExistsSnafu, CorruptionSnafu, DirNotEmptySnafu, Error, MetadataTooLargeSnafu,
    NotADirectorySnafu, PathNotFoundSnafu, ReservedPathSnafu, Result, StorageSnafu,
};
use crate::trie::PathTrie;

const MAX_PATH_LEN: u32 = 4096;
const MAX_FILE_COUNT: u32 = 1 << 24;
const MAX_STRIPES_PER_FILE: u32 = 1 << 24;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntry {
    pub size: u64,
    pub stripes: Vec<StripeId>,
}

struct MetaInner {
    files: HashMap<String, FileEntry>,
    dirs: BTreeSet<String>,
    trie: PathTrie,
}

impl MetaInner {
    /// Only the metadata file itself, self-registered.
    fn fresh() -> Self {
        let mut inner = Self {
            files: HashMap::new(),
            dirs: BTreeSet::new(),
            trie: PathTrie::new(),
        };
        inner.register_meta_file(FileEntry::default());
        inner
    }

    fn register_meta_file(&mut self, entry: FileEntry) {
        self.files.insert(META_PATH.to_string(), entry);
        self.trie.insert(META_PATH);
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path) || self.trie.has_children(path)
    }

    fn exists(&self, path: &str) -> bool {
        if path == META_PATH {
            return false;
        }
        self.files.contains_key(path) || self.dirs.contains(path) || self.is_dir(path)
    }

    fn children(&self, path: &str) -> Option<Vec<String>> {
        let mut names = self.trie.list_children(path)?;
        if path == "/" {
            let meta_name = &META_PATH[1..];
            names.retain(|n| n != meta_name);
        }
        Some(names)
    }
}

fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((parent, _)) => parent,
    }
}

/// Path → file entry map plus the directory tree, guarded by one mutex.
///
/// Persisted as a little-endian binary stream over the reserved stripe
/// chain (ids 0, 1, … below `RESERVED_STRIPES`), written and read through
/// the RAID layer directly. The store's own entry at `META_PATH` is
/// excluded from serialization and recomputed to cover the payload.
pub struct MetadataStore {
    raid: Arc<RaidStore>,
    stripe_size: usize,
    inner: Mutex<MetaInner>,
    dirty: AtomicBool,
    /// Serializes chain rewrites; two interleaved saves would mix stripes
    /// of different serializations.
    save_lock: tokio::sync::Mutex<()>,
}

impl MetadataStore {
    pub fn new(raid: Arc<RaidStore>, stripe_size: usize) -> Self {
        Self {
            raid,
            stripe_size,
            inner: Mutex::new(MetaInner::fresh()),
            dirty: AtomicBool::new(false),
            save_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn check_user_path(path: &str) -> Result<()> {
        ensure!(path != META_PATH, ReservedPathSnafu { path });
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // file operations
    // ------------------------------------------------------------------

    pub fn exists(&self, path: &str) -> bool {
        self.inner.lock().unwrap().exists(path)
    }

    pub fn is_file(&self, path: &str) -> bool {
        path != META_PATH && self.inner.lock().unwrap().files.contains_key(path)
    }

    pub fn get_size(&self, path: &str) -> Option<u64> {
        if path == META_PATH {
            return None;
        }
        self.inner.lock().unwrap().files.get(path).map(|e| e.size)
    }

    pub fn set_size(&self, path: &str, size: u64) -> Result<()> {
        Self::check_user_path(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.files.entry(path.to_string()).or_default();
            entry.size = size;
            inner.trie.insert(path);
        }
        self.mark_dirty();
        Ok(())
    }

    /// Grow the size to at least `size` (concurrent writers race on the
    /// maximum, not on each other).
    pub fn grow_size(&self, path: &str, size: u64) -> Result<()> {
        Self::check_user_path(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.files.entry(path.to_string()).or_default();
            entry.size = entry.size.max(size);
            inner.trie.insert(path);
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn get_stripes(&self, path: &str) -> Vec<StripeId> {
        if path == META_PATH {
            return Vec::new();
        }
        self.inner
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|e| e.stripes.clone())
            .unwrap_or_default()
    }

    pub fn add_stripe(&self, path: &str, stripe_id: StripeId) -> Result<()> {
        Self::check_user_path(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.files.entry(path.to_string()).or_default();
            entry.stripes.push(stripe_id);
            inner.trie.insert(path);
        }
        self.mark_dirty();
        Ok(())
    }

    /// Drop stripe ids past `keep` and return them; the physical chunks are
    /// orphaned, not deleted.
    pub fn truncate_stripes(&self, path: &str, keep: usize) -> Result<Vec<StripeId>> {
        Self::check_user_path(path)?;
        let orphans = {
            let mut inner = self.inner.lock().unwrap();
            match inner.files.get_mut(path) {
                Some(entry) if entry.stripes.len() > keep => entry.stripes.split_off(keep),
                _ => Vec::new(),
            }
        };
        if !orphans.is_empty() {
            self.mark_dirty();
        }
        Ok(orphans)
    }

    pub fn create_file(&self, path: &str) -> Result<()> {
        Self::check_user_path(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            ensure!(!inner.is_dir(path), AlreadyExistsSnafu { path });
            inner.files.entry(path.to_string()).or_default();
            inner.trie.insert(path);
        }
        self.mark_dirty();
        Ok(())
    }

    /// Remove the file and return its now-orphaned stripes.
    pub fn remove_file(&self, path: &str) -> Result<Vec<StripeId>> {
        Self::check_user_path(path)?;
        let entry = {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner
                .files
                .remove(path)
                .ok_or_else(|| PathNotFoundSnafu { path }.build())?;
            inner.trie.remove(path);
            entry
        };
        self.mark_dirty();
        Ok(entry.stripes)
    }

    // ------------------------------------------------------------------
    // directory operations
    // ------------------------------------------------------------------

    pub fn is_dir(&self, path: &str) -> bool {
        self.inner.lock().unwrap().is_dir(path)
    }

    pub fn is_empty_dir(&self, path: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.is_dir(path) && inner.children(path).map_or(true, |c| c.is_empty())
    }

    pub fn create_dir(&self, path: &str) -> Result<()> {
        Self::check_user_path(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            ensure!(
                !inner.files.contains_key(path) && !inner.is_dir(path),
                AlreadyExistsSnafu { path }
            );
            let parent = parent_of(path);
            ensure!(inner.is_dir(parent), PathNotFoundSnafu { path: parent });
            inner.dirs.insert(path.to_string());
            inner.trie.insert(path);
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn remove_dir(&self, path: &str) -> Result<()> {
        Self::check_user_path(path)?;
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.files.contains_key(path) {
                return NotADirectorySnafu { path }.fail();
            }
            ensure!(inner.is_dir(path), PathNotFoundSnafu { path });
            ensure!(
                inner.children(path).map_or(true, |c| c.is_empty()),
                DirNotEmptySnafu { path }
            );
            inner.dirs.remove(path);
            inner.trie.remove(path);
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        Self::check_user_path(path)?;
        let inner = self.inner.lock().unwrap();
        if inner.files.contains_key(path) {
            return NotADirectorySnafu { path }.fail();
        }
        match inner.children(path) {
            Some(names) => Ok(names),
            None if inner.is_dir(path) => Ok(Vec::new()),
            None => PathNotFoundSnafu { path }.fail(),
        }
    }

    /// Move a file, or a whole directory subtree (explicit or implicit).
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        Self::check_user_path(old)?;
        Self::check_user_path(new)?;
        {
            let mut inner = self.inner.lock().unwrap();
            ensure!(!inner.exists(new), AlreadyExistsSnafu { path: new });
            let new_parent = parent_of(new);
            ensure!(
                inner.is_dir(new_parent),
                NotADirectorySnafu { path: new_parent }
            );

            if let Some(entry) = inner.files.remove(old) {
                inner.trie.remove(old);
                inner.trie.insert(new);
                inner.files.insert(new.to_string(), entry);
            } else if inner.is_dir(old) {
                let prefix = format!("{old}/");
                let moved: Vec<String> = inner
                    .files
                    .keys()
                    .filter(|p| p.starts_with(&prefix))
                    .cloned()
                    .collect();
                for path in moved {
                    let entry = inner.files.remove(&path).unwrap_or_default();
                    let moved_to = format!("{new}{}", &path[old.len()..]);
                    inner.trie.remove(&path);
                    inner.trie.insert(&moved_to);
                    inner.files.insert(moved_to, entry);
                }
                let moved_dirs: Vec<String> = inner
                    .dirs
                    .iter()
                    .filter(|p| p.as_str() == old || p.starts_with(&prefix))
                    .cloned()
                    .collect();
                for path in moved_dirs {
                    inner.dirs.remove(&path);
                    inner.trie.remove(&path);
                    let moved_to = format!("{new}{}", &path[old.len()..]);
                    inner.trie.insert(&moved_to);
                    inner.dirs.insert(moved_to);
                }
            } else {
                return PathNotFoundSnafu { path: old }.fail();
            }
        }
        self.mark_dirty();
        Ok(())
    }

    // ------------------------------------------------------------------
    // bootstrap
    // ------------------------------------------------------------------

    /// First stripe id the allocator may hand out.
    pub fn allocator_start(&self) -> StripeId {
        let inner = self.inner.lock().unwrap();
        let max_used = inner
            .files
            .values()
            .flat_map(|e| e.stripes.iter().copied())
            .max();
        RESERVED_STRIPES.max(max_used.map_or(0, |id| id + 1))
    }

    // ------------------------------------------------------------------
    // persistence
    // ------------------------------------------------------------------

    /// Serialize everything except the self entry and rewrite the reserved
    /// stripe chain.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let (payload, stripe_count) = {
            let inner = self.inner.lock().unwrap();
            let payload = serialize(&inner);
            let stripe_count = payload.len().div_ceil(self.stripe_size);
            (payload, stripe_count)
        };
        ensure!(
            (stripe_count as u64) <= RESERVED_STRIPES,
            MetadataTooLargeSnafu {
                size: payload.len(),
            }
        );

        {
            let mut inner = self.inner.lock().unwrap();
            inner.register_meta_file(FileEntry {
                size: payload.len() as u64,
                stripes: (0..stripe_count as u64).collect(),
            });
        }

        for i in 0..stripe_count {
            let start = i * self.stripe_size;
            let end = usize::min(start + self.stripe_size, payload.len());
            self.raid
                .write_stripe(i as StripeId, Bytes::copy_from_slice(&payload[start..end]))
                .await
                .context(StorageSnafu)?;
        }
        self.dirty.store(false, Ordering::Release);
        debug!(
            bytes = payload.len(),
            stripes = stripe_count,
            "metadata persisted"
        );
        Ok(())
    }

    /// Load the metadata chain. An absent chain starts fresh; a garbled one
    /// is logged and also starts fresh. Backend failures surface.
    pub async fn load(&self) -> Result<()> {
        match self.load_inner().await {
            Ok(()) => Ok(()),
            Err(Error::Corruption { reason, .. }) => {
                warn!("metadata chain corrupted ({reason}); starting fresh");
                *self.inner.lock().unwrap() = MetaInner::fresh();
                self.dirty.store(false, Ordering::Release);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn load_inner(&self) -> Result<()> {
        let first = match self.raid.read_stripe(0).await {
            Ok(payload) => payload,
            Err(e) if e.is_not_found() => {
                info!("no metadata chain found, starting empty");
                *self.inner.lock().unwrap() = MetaInner::fresh();
                self.dirty.store(false, Ordering::Release);
                return Ok(());
            }
            Err(e) => return Err(e).context(StorageSnafu),
        };
        if first.is_empty() {
            info!("metadata chain is empty, starting empty");
            *self.inner.lock().unwrap() = MetaInner::fresh();
            self.dirty.store(false, Ordering::Release);
            return Ok(());
        }

        let mut reader = ChainReader {
            raid: &self.raid,
            buf: first.to_vec(),
            pos: 0,
            next_stripe: 1,
        };

        let mut files: HashMap<String, FileEntry> = HashMap::new();
        let mut dirs: BTreeSet<String> = BTreeSet::new();

        let file_count = reader.read_u32().await?;
        ensure!(
            file_count <= MAX_FILE_COUNT,
            CorruptionSnafu {
                reason: format!("implausible file count {file_count}"),
            }
        );
        for _ in 0..file_count {
            let path = reader.read_path().await?;
            let size = reader.read_u64().await?;
            let stripe_count = reader.read_u32().await?;
            ensure!(
                stripe_count <= MAX_STRIPES_PER_FILE,
                CorruptionSnafu {
                    reason: format!("implausible stripe count {stripe_count} for {path}"),
                }
            );
            let mut stripes = Vec::with_capacity(stripe_count as usize);
            for _ in 0..stripe_count {
                stripes.push(reader.read_u64().await?);
            }
            files.insert(path, FileEntry { size, stripes });
        }

        let dir_count = reader.read_u32().await?;
        ensure!(
            dir_count <= MAX_FILE_COUNT,
            CorruptionSnafu {
                reason: format!("implausible dir count {dir_count}"),
            }
        );
        for _ in 0..dir_count {
            dirs.insert(reader.read_path().await?);
        }

        let consumed = reader.pos;
        let chain_stripes = reader.next_stripe;

        let mut inner = MetaInner {
            files,
            dirs,
            trie: PathTrie::new(),
        };
        for path in inner.files.keys() {
            inner.trie.insert(path);
        }
        let dir_paths: Vec<String> = inner.dirs.iter().cloned().collect();
        for path in dir_paths {
            inner.trie.insert(&path);
        }
        inner.register_meta_file(FileEntry {
            size: consumed as u64,
            stripes: (0..chain_stripes).collect(),
        });

        info!(
            files = inner.files.len() - 1,
            dirs = inner.dirs.len(),
            "metadata chain loaded"
        );
        *self.inner.lock().unwrap() = inner;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

fn serialize(inner: &MetaInner) -> Vec<u8> {
    let mut user_files: Vec<(&String, &FileEntry)> = inner
        .files
        .iter()
        .filter(|(path, _)| path.as_str() != META_PATH)
        .collect();
    user_files.sort_by_key(|(path, _)| path.as_str());

    let mut out = Vec::new();
    out.put_u32_le(user_files.len() as u32);
    for (path, entry) in user_files {
        out.put_u32_le(path.len() as u32);
        out.put_slice(path.as_bytes());
        out.put_u64_le(entry.size);
        out.put_u32_le(entry.stripes.len() as u32);
        for stripe in &entry.stripes {
            out.put_u64_le(*stripe);
        }
    }
    out.put_u32_le(inner.dirs.len() as u32);
    for path in &inner.dirs {
        out.put_u32_le(path.len() as u32);
        out.put_slice(path.as_bytes());
    }
    out
}

/// Pulls reserved stripes on demand while the stream is being decoded.
struct ChainReader<'a> {
    raid: &'a Arc<RaidStore>,
    buf: Vec<u8>,
    pos: usize,
    next_stripe: StripeId,
}

impl ChainReader<'_> {
    async fn ensure(&mut self, n: usize) -> Result<()> {
        while self.buf.len() - self.pos < n {
            ensure!(
                self.next_stripe < RESERVED_STRIPES,
                CorruptionSnafu {
                    reason: "metadata stream ends mid-record",
                }
            );
            match self.raid.read_stripe(self.next_stripe).await {
                Ok(payload) => {
                    self.buf.extend_from_slice(&payload);
                    self.next_stripe += 1;
                }
                Err(e) if e.is_not_found() => {
                    return CorruptionSnafu {
                        reason: "metadata stream ends mid-record",
                    }
                    .fail();
                }
                Err(e) => return Err(e).context(StorageSnafu),
            }
        }
        Ok(())
    }

    async fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4).await?;
        let v = (&self.buf[self.pos..self.pos + 4])
            .read_u32::<LittleEndian>()
            .map_err(|_| {
                CorruptionSnafu {
                    reason: "truncated u32",
                }
                .build()
            })?;
        self.pos += 4;
        Ok(v)
    }

    async fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8).await?;
        let v = (&self.buf[self.pos..self.pos + 8])
            .read_u64::<LittleEndian>()
            .map_err(|_| {
                CorruptionSnafu {
                    reason: "truncated u64",
                }
                .build()
            })?;
        self.pos += 8;
        Ok(v)
    }

    async fn read_path(&mut self) -> Result<String> {
        let len = self.read_u32().await?;
        ensure!(
            len <= MAX_PATH_LEN,
            CorruptionSnafu {
                reason: format!("implausible path length {len}"),
            }
        );
        self.ensure(len as usize).await?;
        let mut bytes = vec![0u8; len as usize];
        (&self.buf[self.pos..self.pos + len as usize])
            .read_exact(&mut bytes)
            .map_err(|_| {
                CorruptionSnafu {
                    reason: "truncated path",
                }
                .build()
            })?;
        self.pos += len as usize;
        String::from_utf8(bytes).map_err(|_| {
            CorruptionSnafu {
                reason: "path is not utf-8",
            }
            .build()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudraid_storage::{ChunkBackendRef, ObjectBackend};
    use cloudraid_utils::object_storage;

    const STRIPE: usize = 1 << 10;

    fn new_raid() -> Arc<RaidStore> {
        let backends: Vec<ChunkBackendRef> = (0..3)
            .map(|i| {
                Arc::new(ObjectBackend::new(
                    format!("mem-{i}"),
                    object_storage::new_memory_store("/").unwrap(),
                )) as ChunkBackendRef
            })
            .collect();
        Arc::new(RaidStore::new(backends, 2, 1).unwrap())
    }

    #[tokio::test]
    async fn files_and_implicit_dirs() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        store.create_file("/a/x").unwrap();
        store.set_size("/a/x", 10).unwrap();
        store.add_stripe("/a/x", 100).unwrap();

        assert!(store.exists("/a/x"));
        assert!(store.is_file("/a/x"));
        assert!(store.is_dir("/a"), "implicit directory");
        assert!(!store.is_dir("/a/x"));
        assert_eq!(store.get_size("/a/x"), Some(10));
        assert_eq!(store.get_stripes("/a/x"), vec![100]);
        assert_eq!(store.list_dir("/a").unwrap(), vec!["x".to_string()]);

        let orphans = store.remove_file("/a/x").unwrap();
        assert_eq!(orphans, vec![100]);
        assert!(!store.exists("/a/x"));
        assert!(!store.is_dir("/a"), "implicit directory vanished");
    }

    #[tokio::test]
    async fn meta_path_is_hidden_and_rejected() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        assert!(!store.exists(META_PATH));
        assert!(store.get_size(META_PATH).is_none());
        assert!(store.list_dir("/").unwrap().is_empty());
        assert!(store.is_empty_dir("/"));
        assert!(matches!(
            store.create_file(META_PATH),
            Err(Error::ReservedPath { .. })
        ));
        assert!(matches!(
            store.rename(META_PATH, "/x"),
            Err(Error::ReservedPath { .. })
        ));
    }

    #[tokio::test]
    async fn explicit_dirs() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        store.create_dir("/d").unwrap();
        assert!(store.is_dir("/d"));
        assert!(store.is_empty_dir("/d"));
        assert!(matches!(
            store.create_dir("/d"),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(matches!(
            store.create_dir("/nope/child"),
            Err(Error::PathNotFound { .. })
        ));
        assert!(matches!(
            store.create_file("/d"),
            Err(Error::AlreadyExists { .. })
        ));

        store.create_file("/d/f").unwrap();
        assert!(matches!(
            store.remove_dir("/d"),
            Err(Error::DirNotEmpty { .. })
        ));
        store.remove_file("/d/f").unwrap();
        store.remove_dir("/d").unwrap();
        assert!(!store.is_dir("/d"));
    }

    #[tokio::test]
    async fn rename_file() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        store.create_file("/f").unwrap();
        store.add_stripe("/f", 100).unwrap();
        store.create_file("/g").unwrap();

        assert!(matches!(
            store.rename("/f", "/g"),
            Err(Error::AlreadyExists { .. })
        ));
        assert!(matches!(
            store.rename("/missing", "/x"),
            Err(Error::PathNotFound { .. })
        ));

        store.rename("/f", "/renamed").unwrap();
        assert!(!store.exists("/f"));
        assert_eq!(store.get_stripes("/renamed"), vec![100]);
    }

    #[tokio::test]
    async fn rename_non_empty_directory() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        store.create_file("/a/x").unwrap();
        store.create_file("/a/y/z").unwrap();

        store.rename("/a", "/b").unwrap();
        assert!(store.exists("/b/x"));
        assert!(store.exists("/b/y/z"));
        assert!(!store.exists("/a"));
        assert!(!store.exists("/a/x"));
        assert_eq!(
            store.list_dir("/b").unwrap(),
            vec!["x".to_string(), "y".to_string()]
        );
    }

    #[tokio::test]
    async fn rename_into_missing_parent_fails() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        store.create_file("/f").unwrap();
        assert!(matches!(
            store.rename("/f", "/no-such-dir/f"),
            Err(Error::NotADirectory { .. })
        ));
    }

    #[tokio::test]
    async fn save_load_round_trip() {
        let raid = new_raid();
        let store = MetadataStore::new(raid.clone(), STRIPE);
        store.create_file("/a/x").unwrap();
        store.set_size("/a/x", 12345).unwrap();
        store.add_stripe("/a/x", 100).unwrap();
        store.add_stripe("/a/x", 101).unwrap();
        store.create_dir("/a/empty").unwrap();
        store.create_file("/top").unwrap();
        assert!(store.is_dirty());
        store.save().await.unwrap();
        assert!(!store.is_dirty());

        let restored = MetadataStore::new(raid, STRIPE);
        restored.load().await.unwrap();
        assert_eq!(restored.get_size("/a/x"), Some(12345));
        assert_eq!(restored.get_stripes("/a/x"), vec![100, 101]);
        assert!(restored.is_dir("/a/empty"));
        assert!(restored.is_file("/top"));
        assert_eq!(
            restored.list_dir("/a").unwrap(),
            vec!["empty".to_string(), "x".to_string()]
        );
        assert_eq!(restored.allocator_start(), 102);
    }

    #[tokio::test]
    async fn multi_stripe_chain() {
        let raid = new_raid();
        let store = MetadataStore::new(raid.clone(), STRIPE);
        // Enough entries that the serialized stream spans several stripes.
        for i in 0..200 {
            let path = format!("/dir/file-with-a-long-enough-name-{i:04}");
            store.create_file(&path).unwrap();
            store.set_size(&path, i).unwrap();
            store.add_stripe(&path, 1000 + i).unwrap();
        }
        store.save().await.unwrap();
        assert!(
            store.get_stripes(META_PATH).is_empty(),
            "self entry stays hidden"
        );

        let restored = MetadataStore::new(raid, STRIPE);
        restored.load().await.unwrap();
        assert_eq!(restored.list_dir("/dir").unwrap().len(), 200);
        assert_eq!(restored.get_size("/dir/file-with-a-long-enough-name-0123"), Some(123));
        assert_eq!(restored.allocator_start(), 1200);
    }

    #[tokio::test]
    async fn absent_chain_starts_fresh() {
        let store = MetadataStore::new(new_raid(), STRIPE);
        store.load().await.unwrap();
        assert!(store.list_dir("/").unwrap().is_empty());
        assert_eq!(store.allocator_start(), RESERVED_STRIPES);
    }

    #[tokio::test]
    async fn garbled_chain_starts_fresh() {
        let raid = new_raid();
        raid.write_stripe(0, Bytes::from(vec![0xFFu8; 64]))
            .await
            .unwrap();
        let store = MetadataStore::new(raid, STRIPE);
        store.load().await.unwrap();
        assert!(store.list_dir("/").unwrap().is_empty());
    }
}
