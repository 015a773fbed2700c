use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use jiff::Timestamp;

use crate::calculation::period::BillingPeriod;
use crate::error::Error;
use crate::prelude::*;

use super::cache::DownloadCache;

pub const DEFAULT_PREFIX: &str = "data";
pub const DEFAULT_REPORT_FILE: &str = "cur-report-00001.csv.gz";

/// Upper bound for a single export download.
const MAX_EXPORT_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Something that hands out the bytes of an export object by key.
pub trait ObjectSource {
    /// Where the objects come from, for logs and error messages.
    fn location(&self) -> &str;

    fn fetch(&self, key: &str) -> AppResult<Vec<u8>>;
}

/// Builds the object key of a period's export, `<prefix>/BILLING_PERIOD=<YYYY-MM>/<file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLayout {
    pub prefix: String,
    pub report_file: String,
}

impl ObjectLayout {
    pub fn key(&self, period: BillingPeriod) -> String {
        let prefix = self.prefix.trim_matches('/');
        let partition = format!("BILLING_PERIOD={period}/{}", self.report_file);

        if prefix.is_empty() {
            partition
        } else {
            format!("{prefix}/{partition}")
        }
    }
}

impl Default for ObjectLayout {
    fn default() -> Self {
        ObjectLayout {
            prefix: DEFAULT_PREFIX.to_owned(),
            report_file: DEFAULT_REPORT_FILE.to_owned(),
        }
    }
}

/// Picks the source from the shape of `location`: http(s) urls go over the network,
/// everything else is a local directory.
pub fn from_location(location: &str, timeout: Duration) -> Box<dyn ObjectSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpSource::new(location, timeout))
    } else {
        Box::new(DirectorySource::new(location))
    }
}

/// Plain GETs against a bucket endpoint (public, presigned or behind a gateway).
pub struct HttpSource {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();

        HttpSource {
            base_url: base_url.trim_end_matches('/').to_owned(),
            agent,
        }
    }
}

impl ObjectSource for HttpSource {
    fn location(&self) -> &str {
        &self.base_url
    }

    fn fetch(&self, key: &str) -> AppResult<Vec<u8>> {
        let fetch_error = |source: ureq::Error| Error::Fetch {
            location: self.base_url.clone(),
            key: key.to_owned(),
            source: Box::new(source),
        };

        let url = format!("{}/{key}", self.base_url);

        // Non-2xx statuses come back as errors too.
        let bytes = self
            .agent
            .get(&url)
            .call()
            .map_err(fetch_error)?
            .body_mut()
            .with_config()
            .limit(MAX_EXPORT_BYTES)
            .read_to_vec()
            .map_err(fetch_error)?;

        Ok(bytes)
    }
}

/// Exports laid out on a local or mounted filesystem.
pub struct DirectorySource {
    root: PathBuf,
    location: String,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let location = root.display().to_string();

        DirectorySource { root, location }
    }
}

impl ObjectSource for DirectorySource {
    fn location(&self) -> &str {
        &self.location
    }

    fn fetch(&self, key: &str) -> AppResult<Vec<u8>> {
        let bytes = fs::read(self.root.join(key)).map_err(|source| Error::Fetch {
            location: self.location.clone(),
            key: key.to_owned(),
            source: Box::new(source),
        })?;

        Ok(bytes)
    }
}

/// Keeps downloaded exports on disk for `ttl_minutes`, so a rerun doesn't fetch again.
pub struct CachedSource<S> {
    inner: S,
    cache: DownloadCache,
}

impl<S: ObjectSource> CachedSource<S> {
    pub fn new(inner: S, cache_dir: PathBuf, ttl_minutes: i64) -> Self {
        CachedSource {
            inner,
            cache: DownloadCache::new(cache_dir, ttl_minutes),
        }
    }
}

impl<S: ObjectSource> ObjectSource for CachedSource<S> {
    fn location(&self) -> &str {
        self.inner.location()
    }

    fn fetch(&self, key: &str) -> AppResult<Vec<u8>> {
        let entry = self.cache.entry_path(self.inner.location(), key);
        let now = Timestamp::now();

        if let Some(bytes) = self.cache.retrieve(&entry, now)? {
            tracing::info!(key, cache = %entry.display(), "export served from cache");
            return Ok(bytes);
        }

        let bytes = self.inner.fetch(key)?;

        // A cache that can't be written only costs a download next time.
        if let Err(error) = self.cache.store(&entry, &bytes, now) {
            tracing::warn!(%error, cache = %entry.display(), "could not cache the export");
        }

        Ok(bytes)
    }
}

impl ObjectSource for Box<dyn ObjectSource> {
    fn location(&self) -> &str {
        (**self).location()
    }

    fn fetch(&self, key: &str) -> AppResult<Vec<u8>> {
        (**self).fetch(key)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn key_follows_the_partition_layout() {
        let period: BillingPeriod = "2024-05".parse().unwrap();

        assert_eq!(
            ObjectLayout::default().key(period),
            "data/BILLING_PERIOD=2024-05/cur-report-00001.csv.gz"
        );

        let layout = ObjectLayout {
            prefix: "/".to_owned(),
            report_file: "r.csv".to_owned(),
        };
        assert_eq!(layout.key(period), "BILLING_PERIOD=2024-05/r.csv");
    }

    #[test]
    fn location_decides_the_source() {
        let timeout = Duration::from_secs(1);

        assert_eq!(
            from_location("https://bucket.example/", timeout).location(),
            "https://bucket.example"
        );
        assert_eq!(from_location("/mnt/exports", timeout).location(), "/mnt/exports");
    }

    #[test]
    fn directory_source_reads_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = "data/BILLING_PERIOD=2024-05/r.csv";
        fs::create_dir_all(dir.path().join("data/BILLING_PERIOD=2024-05")).unwrap();
        fs::write(dir.path().join(key), b"a,b\n").unwrap();

        let source = DirectorySource::new(dir.path());

        assert_eq!(source.fetch(key).unwrap(), b"a,b\n");
        assert!(matches!(
            source.fetch("missing").unwrap_err().downcast_ref::<Error>(),
            Some(Error::Fetch { .. })
        ));
    }

    struct Counting {
        calls: Cell<usize>,
    }

    impl ObjectSource for Counting {
        fn location(&self) -> &str {
            "counting"
        }

        fn fetch(&self, _key: &str) -> AppResult<Vec<u8>> {
            self.calls.set(self.calls.get() + 1);
            Ok(b"export".to_vec())
        }
    }

    #[test]
    fn cached_source_fetches_once_within_the_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let source = CachedSource::new(
            Counting {
                calls: Cell::new(0),
            },
            dir.path().to_path_buf(),
            30,
        );

        assert_eq!(source.fetch("k").unwrap(), b"export");
        assert_eq!(source.fetch("k").unwrap(), b"export");
        assert_eq!(source.inner.calls.get(), 1);

        source.fetch("other").unwrap();
        assert_eq!(source.inner.calls.get(), 2);
    }
}
