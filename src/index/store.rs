//! Default key-value collaborator: a sharded, append-oriented store kept
//! in memory behind per-shard locks and persisted to one segment file per
//! shard. Values are opaque byte strings; appends concatenate. Track
//! metadata lives in a reserved keyspace (sentinel top bit, dedicated
//! segment) that packed landmark keys can never reach.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{LandmarkError, Result};
use crate::index::postings::{read_varint, write_varint};
use crate::keys::Key;
use crate::models::TrackMeta;

const FORMAT_VERSION: u32 = 1;
const HEADER_FILE: &str = "header.json";
const META_SEGMENT: &str = "meta.seg";

/// Store open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new store, truncating any existing one
    Create,
    /// Open an existing store for reads and writes
    ReadWrite,
    /// Open an existing store for reads only
    ReadOnly,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    format_version: u32,
    shards: u16,
}

type ShardMap = HashMap<[u8; 16], Vec<u8>>;

pub struct ShardedStore {
    dir: PathBuf,
    shards: u16,
    mode: OpenMode,
    maps: Vec<RwLock<ShardMap>>,
    dirty: Vec<AtomicBool>,
    meta: RwLock<ShardMap>,
    meta_dirty: AtomicBool,
}

/// Reserved-keyspace key for a track's metadata: sentinel top bit set,
/// which no packed landmark key can carry (packed widths stop at 64 bits).
pub fn meta_key(track_id: u32) -> Key {
    let logical = (1u128 << 127) | track_id as u128;
    Key::from_bytes(logical.to_be_bytes())
}

impl ShardedStore {
    /// Open a store with an explicit shard count. For existing stores the
    /// count must match the one recorded at creation.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode, shards: u16) -> Result<Self> {
        if shards == 0 {
            return Err(LandmarkError::KvOpen("shard count must be > 0".into()));
        }
        let dir = path.as_ref().to_path_buf();

        match mode {
            OpenMode::Create => {
                fs::create_dir_all(&dir)
                    .map_err(|e| LandmarkError::KvOpen(format!("{}: {}", dir.display(), e)))?;
                let store = Self::empty(dir, mode, shards);
                store.truncate_segments()?;
                store.write_header()?;
                Ok(store)
            }
            OpenMode::ReadWrite | OpenMode::ReadOnly => {
                let header = Self::read_header(&dir)?;
                if header.shards != shards {
                    return Err(LandmarkError::KvOpen(format!(
                        "store has {} shards, caller expected {}",
                        header.shards, shards
                    )));
                }
                let mut store = Self::empty(dir, mode, shards);
                store.load_segments()?;
                Ok(store)
            }
        }
    }

    /// Open an existing store, taking the shard count from its header.
    pub fn open_existing(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        if mode == OpenMode::Create {
            return Err(LandmarkError::KvOpen(
                "open_existing cannot create a store".into(),
            ));
        }
        let dir = path.as_ref().to_path_buf();
        let header = Self::read_header(&dir)?;
        let mut store = Self::empty(dir, mode, header.shards);
        store.load_segments()?;
        Ok(store)
    }

    fn empty(dir: PathBuf, mode: OpenMode, shards: u16) -> Self {
        Self {
            dir,
            shards,
            mode,
            maps: (0..shards).map(|_| RwLock::new(ShardMap::new())).collect(),
            dirty: (0..shards).map(|_| AtomicBool::new(false)).collect(),
            meta: RwLock::new(ShardMap::new()),
            meta_dirty: AtomicBool::new(false),
        }
    }

    pub fn shards(&self) -> u16 {
        self.shards
    }

    fn header_path(&self) -> PathBuf {
        self.dir.join(HEADER_FILE)
    }

    fn segment_path(&self, shard: u16) -> PathBuf {
        self.dir.join(format!("shard_{:04}.seg", shard))
    }

    fn read_header(dir: &Path) -> Result<Header> {
        let text = fs::read_to_string(dir.join(HEADER_FILE))
            .map_err(|e| LandmarkError::KvOpen(format!("{}: {}", dir.display(), e)))?;
        let header: Header = serde_json::from_str(&text)
            .map_err(|e| LandmarkError::KvOpen(format!("bad header: {}", e)))?;
        if header.format_version != FORMAT_VERSION {
            return Err(LandmarkError::KvOpen(format!(
                "unsupported store format version {}",
                header.format_version
            )));
        }
        Ok(header)
    }

    fn write_header(&self) -> Result<()> {
        let header = Header {
            format_version: FORMAT_VERSION,
            shards: self.shards,
        };
        let text = serde_json::to_string_pretty(&header)
            .map_err(|e| LandmarkError::KvWrite(e.to_string()))?;
        fs::write(self.header_path(), text)
            .map_err(|e| LandmarkError::KvWrite(format!("header: {}", e)))
    }

    fn truncate_segments(&self) -> Result<()> {
        for shard in 0..self.shards {
            let path = self.segment_path(shard);
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| LandmarkError::KvOpen(format!("{}: {}", path.display(), e)))?;
            }
        }
        let meta_path = self.dir.join(META_SEGMENT);
        if meta_path.exists() {
            fs::remove_file(&meta_path)
                .map_err(|e| LandmarkError::KvOpen(format!("{}: {}", meta_path.display(), e)))?;
        }
        Ok(())
    }

    fn load_segments(&mut self) -> Result<()> {
        for shard in 0..self.shards {
            let path = self.segment_path(shard);
            if !path.exists() {
                continue;
            }
            let map = Self::load_segment_file(&path)?;
            *self.maps[shard as usize].write() = map;
        }
        let meta_path = self.dir.join(META_SEGMENT);
        if meta_path.exists() {
            *self.meta.write() = Self::load_segment_file(&meta_path)?;
        }
        Ok(())
    }

    fn load_segment_file(path: &Path) -> Result<ShardMap> {
        let bytes = fs::read(path)
            .map_err(|e| LandmarkError::KvOpen(format!("{}: {}", path.display(), e)))?;
        let mut map = ShardMap::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            if pos + 16 > bytes.len() {
                return Err(LandmarkError::KvOpen(format!(
                    "{}: truncated segment entry",
                    path.display()
                )));
            }
            let mut key = [0u8; 16];
            key.copy_from_slice(&bytes[pos..pos + 16]);
            pos += 16;
            let len = read_varint(&bytes, &mut pos)
                .map_err(|e| LandmarkError::KvOpen(format!("{}: {}", path.display(), e)))?
                as usize;
            if pos + len > bytes.len() {
                return Err(LandmarkError::KvOpen(format!(
                    "{}: truncated segment value",
                    path.display()
                )));
            }
            map.insert(key, bytes[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(map)
    }

    fn write_segment_file(path: &Path, map: &ShardMap) -> Result<()> {
        // Sorted key order keeps segment bytes reproducible.
        let mut keys: Vec<&[u8; 16]> = map.keys().collect();
        keys.sort_unstable();

        let mut buf = Vec::new();
        for key in keys {
            buf.extend_from_slice(key);
            let value = &map[key];
            write_varint(&mut buf, value.len() as u64);
            buf.extend_from_slice(value);
        }

        let mut file = fs::File::create(path)
            .map_err(|e| LandmarkError::KvWrite(format!("{}: {}", path.display(), e)))?;
        file.write_all(&buf)
            .map_err(|e| LandmarkError::KvWrite(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Precondition message shared by the write paths; the caller wraps
    /// it in the error kind of its own operation.
    fn write_precondition(&self, shard: u16) -> std::result::Result<(), String> {
        if self.mode == OpenMode::ReadOnly {
            return Err("store is read-only".into());
        }
        if shard >= self.shards {
            return Err(format!("shard {} out of range [0, {})", shard, self.shards));
        }
        Ok(())
    }

    /// Fetch the full value currently stored at `(shard, key)`.
    pub fn get(&self, shard: u16, key: &Key) -> Result<Option<Vec<u8>>> {
        if shard >= self.shards {
            return Err(LandmarkError::KvRead(format!(
                "shard {} out of range [0, {})",
                shard, self.shards
            )));
        }
        let map = self.maps[shard as usize].read();
        Ok(map.get(key.as_bytes()).cloned())
    }

    /// Append bytes to the value slot at `(shard, key)`. Readers observe
    /// the pre-append or post-append value in full, never a prefix.
    pub fn put_append(&self, shard: u16, key: &Key, value: &[u8]) -> Result<()> {
        self.write_precondition(shard).map_err(LandmarkError::KvWrite)?;
        let mut map = self.maps[shard as usize].write();
        map.entry(*key.as_bytes())
            .or_default()
            .extend_from_slice(value);
        self.dirty[shard as usize].store(true, Ordering::Release);
        Ok(())
    }

    /// Install a sorted `(key, value)` stream as the canonical state of a
    /// shard, replacing whatever was there.
    pub fn bulk_merge(
        &self,
        shard: u16,
        sorted: impl IntoIterator<Item = (Key, Vec<u8>)>,
    ) -> Result<()> {
        self.write_precondition(shard).map_err(LandmarkError::KvMerge)?;

        let mut map = ShardMap::new();
        let mut last: Option<Key> = None;
        for (key, value) in sorted {
            if let Some(prev) = last {
                if key <= prev {
                    return Err(LandmarkError::KvMerge(
                        "bulk merge input is not strictly sorted".into(),
                    ));
                }
            }
            last = Some(key);
            map.insert(*key.as_bytes(), value);
        }

        *self.maps[shard as usize].write() = map;
        self.dirty[shard as usize].store(true, Ordering::Release);
        Ok(())
    }

    /// Persist every dirty shard segment. Called at the end of a build;
    /// idempotent.
    pub fn finalize_shards(&self) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(LandmarkError::KvMerge("store is read-only".into()));
        }
        for shard in 0..self.shards {
            if !self.dirty[shard as usize].swap(false, Ordering::AcqRel) {
                continue;
            }
            let map = self.maps[shard as usize].read();
            Self::write_segment_file(&self.segment_path(shard), &map)
                .map_err(|e| LandmarkError::KvMerge(e.to_string()))?;
        }
        if self.meta_dirty.swap(false, Ordering::AcqRel) {
            let map = self.meta.read();
            Self::write_segment_file(&self.dir.join(META_SEGMENT), &map)
                .map_err(|e| LandmarkError::KvMerge(e.to_string()))?;
        }
        Ok(())
    }

    /// Store one track's metadata in the reserved keyspace.
    pub fn put_track_meta(&self, meta: &TrackMeta) -> Result<()> {
        if self.mode == OpenMode::ReadOnly {
            return Err(LandmarkError::KvWrite("store is read-only".into()));
        }
        let value =
            serde_json::to_vec(meta).map_err(|e| LandmarkError::KvWrite(e.to_string()))?;
        let key = meta_key(meta.track_id);
        self.meta.write().insert(*key.as_bytes(), value);
        self.meta_dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn get_track_meta(&self, track_id: u32) -> Result<Option<TrackMeta>> {
        let key = meta_key(track_id);
        let map = self.meta.read();
        match map.get(key.as_bytes()) {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LandmarkError::Integrity(format!("track meta: {}", e))),
        }
    }

    /// All stored track metadata, in track-id order.
    pub fn track_metas(&self) -> Result<Vec<TrackMeta>> {
        let map = self.meta.read();
        let mut keys: Vec<&[u8; 16]> = map.keys().collect();
        keys.sort_unstable();
        keys.iter()
            .map(|k| {
                serde_json::from_slice(&map[*k])
                    .map_err(|e| LandmarkError::Integrity(format!("track meta: {}", e)))
            })
            .collect()
    }

    /// Flush pending segments and close the store.
    pub fn close(self) -> Result<()> {
        if self.mode != OpenMode::ReadOnly {
            self.finalize_shards()?;
        }
        Ok(())
    }
}
