use std::fs;
use std::hash::Hasher;
use std::path::{Path, PathBuf};

use jiff::{Timestamp, ToSpan};
use twox_hash::XxHash64;

use crate::prelude::*;

/// `<cache dir>/cur-rollup`, when the platform has a cache dir.
pub fn default_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("cur-rollup"))
}

/// Downloaded exports on disk, one file per (source, object key).
///
/// An entry lives for `ttl_minutes` from its mtime. A live entry is never rewritten, so
/// a rerun inside the window can't push its own expiry forward.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    dir: PathBuf,
    ttl_minutes: i64,
}

impl DownloadCache {
    pub fn new(dir: PathBuf, ttl_minutes: i64) -> Self {
        DownloadCache { dir, ttl_minutes }
    }

    /// Hashing keeps the directory flat and the names filesystem-safe.
    pub fn entry_path(&self, location: &str, key: &str) -> PathBuf {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(location.as_bytes());
        hasher.write_u8(0);
        hasher.write(key.as_bytes());

        self.dir.join(format!("{:016x}.bin", hasher.finish()))
    }

    /// The cached bytes, or `None` when the entry is missing or expired at `now`.
    pub fn retrieve(&self, entry: &Path, now: Timestamp) -> AppResult<Option<Vec<u8>>> {
        if !self.is_live(entry, now)? {
            return Ok(None);
        }

        let bytes = fs::read(entry)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to read cache entry {}", entry.display()))?;

        Ok(Some(bytes))
    }

    pub fn store(&self, entry: &Path, bytes: &[u8], now: Timestamp) -> AppResult<()> {
        if let Some(parent) = entry.parent() {
            fs::create_dir_all(parent).into_diagnostic()?;
        }

        if self.is_live(entry, now)? {
            return Ok(());
        }

        fs::write(entry, bytes)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write cache entry {}", entry.display()))
    }

    // private

    fn is_live(&self, entry: &Path, now: Timestamp) -> AppResult<bool> {
        if !entry.try_exists().into_diagnostic()? {
            return Ok(false);
        }

        let written = fs::metadata(entry)
            .and_then(|metadata| metadata.modified())
            .into_diagnostic()?;
        let expires = Timestamp::try_from(written).into_diagnostic()? + self.ttl_minutes.minutes();

        Ok(now < expires)
    }
}
