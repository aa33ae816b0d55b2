//! On-disk tile cache.
//!
//! Tiles are stored as `<root>/<source>/<published file name>`, e.g.
//! `dem_cache/srtm/N57W003.hgt`. Writes go to a hidden `.part` file in the
//! same directory which is then renamed into place, so a reader never sees a
//! partially written tile and a crashed write leaves only a `.part` file.
//! [`DiskTileCache::open`] removes `.part` files old enough that no live
//! writer can still own them; younger ones may belong to another process
//! sharing the cache and are left alone.

use crate::{DemError, Result};
use localmap_geo::{SourceKind, TileId};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Suffix of in-progress writes.
const PART_SUFFIX: &str = ".part";

/// Age after which a `.part` file is considered abandoned.
const STALE_PART_AGE: Duration = Duration::from_secs(60 * 60);

/// A tile present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Which tile this is.
    pub tile: TileId,
    /// Location of the tile file.
    pub path: PathBuf,
    /// Size of the tile file.
    pub size_bytes: u64,
    /// Whether the file passed the minimum size check.
    pub validated: bool,
}

/// Storage for downloaded tiles.
///
/// Implementations must be safe to share between tile workers.
pub trait TileStore: Send + Sync {
    /// Look up a tile. Returns `None` if the tile is absent or unusable.
    fn get(&self, tile: &TileId) -> Result<Option<CacheEntry>>;

    /// Store a tile's bytes and return the resulting entry.
    fn put(&self, tile: &TileId, bytes: &[u8]) -> Result<CacheEntry>;
}

/// [`TileStore`] rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskTileCache {
    root: PathBuf,
    min_tile_bytes: u64,
}

impl DiskTileCache {
    /// Open (creating if needed) a cache rooted at `root`.
    ///
    /// Files smaller than `min_tile_bytes` are treated as corrupt.
    pub fn open<P: AsRef<Path>>(root: P, min_tile_bytes: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let cache = Self {
            root,
            min_tile_bytes,
        };
        cache.purge_partial_writes(SystemTime::now())?;
        Ok(cache)
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `tile` lives (whether or not it is cached).
    pub fn path_for(&self, tile: &TileId) -> PathBuf {
        self.source_dir(tile.source).join(tile.published_file_name())
    }

    fn source_dir(&self, source: SourceKind) -> PathBuf {
        self.root.join(source.name())
    }

    /// All valid tiles cached for `source`, sorted by tile.
    pub fn entries(&self, source: SourceKind) -> Result<Vec<CacheEntry>> {
        let dir = self.source_dir(source);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name();
            let Some(tile) = name.to_str().and_then(|n| TileId::from_file_name(source, n)) else {
                continue;
            };
            let size_bytes = dir_entry.metadata()?.len();
            if size_bytes >= self.min_tile_bytes {
                entries.push(CacheEntry {
                    tile,
                    path: dir_entry.path(),
                    size_bytes,
                    validated: true,
                });
            }
        }
        entries.sort_by(|a, b| a.tile.cmp(&b.tile));
        Ok(entries)
    }

    /// Remove `.part` files left behind by interrupted writes at least
    /// [`STALE_PART_AGE`] before `now`.
    fn purge_partial_writes(&self, now: SystemTime) -> Result<()> {
        for source in SourceKind::ALL {
            let dir = self.source_dir(source);
            let read_dir = match fs::read_dir(&dir) {
                Ok(read_dir) => read_dir,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for dir_entry in read_dir {
                let dir_entry = dir_entry?;
                let is_partial = dir_entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with('.') && n.ends_with(PART_SUFFIX));
                if !is_partial {
                    continue;
                }
                let modified = match dir_entry.metadata().and_then(|m| m.modified()) {
                    Ok(modified) => modified,
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
                if age < STALE_PART_AGE {
                    continue;
                }
                debug!(path = %dir_entry.path().display(), "removing interrupted tile write");
                match fs::remove_file(dir_entry.path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

impl TileStore for DiskTileCache {
    fn get(&self, tile: &TileId) -> Result<Option<CacheEntry>> {
        let path = self.path_for(tile);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if metadata.len() < self.min_tile_bytes {
            warn!(
                tile = %tile,
                bytes = metadata.len(),
                minimum = self.min_tile_bytes,
                "discarding undersized cached tile"
            );
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(None);
        }

        Ok(Some(CacheEntry {
            tile: *tile,
            path,
            size_bytes: metadata.len(),
            validated: true,
        }))
    }

    fn put(&self, tile: &TileId, bytes: &[u8]) -> Result<CacheEntry> {
        let size_bytes = bytes.len() as u64;
        if size_bytes < self.min_tile_bytes {
            return Err(DemError::UndersizedTile {
                tile: *tile,
                bytes: size_bytes,
                minimum: self.min_tile_bytes,
            });
        }

        let dir = self.source_dir(tile.source);
        fs::create_dir_all(&dir)?;
        let path = dir.join(tile.published_file_name());

        let mut part = tempfile::Builder::new()
            .prefix(".")
            .suffix(PART_SUFFIX)
            .tempfile_in(&dir)?;
        part.write_all(bytes)?;
        part.as_file().sync_all()?;
        part.persist(&path).map_err(|e| e.error)?;

        debug!(tile = %tile, path = %path.display(), bytes = size_bytes, "tile cached");
        Ok(CacheEntry {
            tile: *tile,
            path,
            size_bytes,
            validated: true,
        })
    }
}
