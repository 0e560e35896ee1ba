//! Remote tile stores and the local tile cache.
//!
//! Tiles are fetched from a [`RemoteStore`] (an HTTP bucket or a mirrored
//! directory) and kept in a flat cache directory, one file per remote key.
//!
//! ## Freshness
//!
//! With [`CacheMode::Validate`] every lookup asks the store for the object's
//! current [`ObjectVersion`]. A SHA-256 is compared against the local bytes.
//! Any other version token (an S3 ETag, or length plus modification time) is
//! compared against the token recorded in a `<file>.version` sidecar when the
//! copy was downloaded. A mismatch or a missing sidecar means re-download.
//! Stores that report no version at all cannot be validated; the copy is
//! reused with a warning.
//!
//! [`CacheMode::Trust`] reuses local copies without any network traffic, and
//! [`CacheMode::Disabled`] is for callers that stream tiles into memory via
//! [`TileCache::fetch_bytes`] instead of touching disk.
//!
//! ## Thread Safety
//!
//! `TileCache` is `Send + Sync`. Downloads land in a uniquely named `.part`
//! file that is synced and then renamed over the target, so concurrent
//! lookups of the same key never observe a partial file; at worst both
//! download and the last rename wins.

use crate::{RasterError, Result};
use gprox_metrics::{metric_defs, MetricLabels};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Request timeout for remote stores. WorldCover tiles run to ~100 MB.
const HTTP_TIMEOUT_SECS: u64 = 600;

/// Object metadata header carrying a SHA-256 of the object body.
const SHA256_HEADER: &str = "x-amz-meta-sha256";

/// Suffix of the sidecar file holding a cached object's version token.
const VERSION_SUFFIX: &str = "version";

/// Distinguishes temp files created by one process.
static PART_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A source of tile objects addressed by key.
pub trait RemoteStore: Send + Sync {
    /// Short name for logs and metric labels.
    fn describe(&self) -> String;

    /// Fetch an object. `Ok(None)` means the store has no such key.
    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Current version of an object. `Ok(None)` when the store cannot
    /// identify one (or has no such key).
    fn version(&self, key: &str) -> Result<Option<ObjectVersion>>;
}

/// Identity of a remote object's current contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectVersion {
    /// Lowercase hex SHA-256 of the body; comparable with the local bytes.
    Sha256(String),
    /// Opaque token that changes whenever the object does.
    Tag(String),
}

impl ObjectVersion {
    /// Version advertised by HTTP response headers.
    ///
    /// Preference: `x-amz-meta-sha256`, a 64-hex ETag, any other ETag, then
    /// `Content-Length` together with `Last-Modified`.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let etag = header(reqwest::header::ETAG.as_str());
        let sha256 = header(SHA256_HEADER)
            .map(|v| v.trim_matches('"').to_ascii_lowercase())
            .filter(|v| is_sha256_hex(v))
            .or_else(|| {
                etag.as_deref()
                    .map(|v| v.trim_matches('"').to_ascii_lowercase())
                    .filter(|v| is_sha256_hex(v))
            });
        if let Some(digest) = sha256 {
            return Some(ObjectVersion::Sha256(digest));
        }
        if let Some(etag) = etag {
            return Some(ObjectVersion::Tag(format!("etag {}", etag)));
        }

        let length = header(reqwest::header::CONTENT_LENGTH.as_str());
        let modified = header(reqwest::header::LAST_MODIFIED.as_str());
        match (length, modified) {
            (Some(length), Some(modified)) => {
                Some(ObjectVersion::Tag(format!("{} bytes, {}", length, modified)))
            }
            _ => None,
        }
    }
}

/// An object store reachable over HTTP(S), e.g. a public S3 bucket.
pub struct HttpStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for HttpStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStore")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl HttpStore {
    /// Create a store rooted at `base_url` (trailing slashes are ignored).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { base_url, client })
    }

    /// Full URL of an object.
    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

impl RemoteStore for HttpStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url_for(key);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| RasterError::download(key, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RasterError::download(key, format!("HTTP {}", response.status())));
        }

        let bytes = response.bytes().map_err(|e| RasterError::download(key, e))?;
        Ok(Some(bytes.to_vec()))
    }

    fn version(&self, key: &str) -> Result<Option<ObjectVersion>> {
        let url = self.url_for(key);
        let response = self
            .client
            .head(&url)
            .send()
            .map_err(|e| RasterError::download(key, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RasterError::download(key, format!("HTTP {}", response.status())));
        }
        Ok(ObjectVersion::from_headers(response.headers()))
    }
}

/// A mounted or mirrored object store on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Location of an object under the store root.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

impl RemoteStore for DirectoryStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RasterError::download(key, e)),
        }
    }

    fn version(&self, key: &str) -> Result<Option<ObjectVersion>> {
        match sha256_file(&self.path_for(key)) {
            Ok(digest) => Ok(Some(ObjectVersion::Sha256(digest))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RasterError::download(key, e)),
        }
    }
}

/// How the cache treats existing local copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Compare against the remote object version before reuse.
    #[default]
    Validate,
    /// Reuse local copies without contacting the store.
    Trust,
    /// Keep nothing on disk; callers stream tiles with `fetch_bytes`.
    Disabled,
}

/// Where a tile currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileState {
    /// Only in the remote store.
    Remote,
    /// Present in the local cache.
    Cached(PathBuf),
    /// The store reported that the object does not exist.
    Missing,
}

/// A tile id paired with its remote key and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileReference {
    pub id: String,
    pub key: String,
    pub state: TileState,
}

impl TileReference {
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            state: TileState::Remote,
        }
    }

    /// Local path if the tile is cached.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.state {
            TileState::Cached(path) => Some(path),
            _ => None,
        }
    }
}

/// Download statistics for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStats {
    /// Number of objects downloaded this session.
    pub tiles_downloaded: usize,
    /// Total bytes downloaded this session.
    pub bytes_downloaded: u64,
    /// Lookups served from an existing local copy.
    pub cache_hits: usize,
    /// Hits in `Validate` mode whose store reported no version to compare.
    pub unvalidated: usize,
}

/// Local cache of remote tiles.
pub struct TileCache {
    /// Cache directory, created once at construction.
    dir: PathBuf,
    store: Arc<dyn RemoteStore>,
    mode: CacheMode,
    labels: MetricLabels,
    tiles_downloaded: AtomicUsize,
    bytes_downloaded: AtomicU64,
    cache_hits: AtomicUsize,
    unvalidated: AtomicUsize,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("dir", &self.dir)
            .field("store", &self.store.describe())
            .field("mode", &self.mode)
            .finish()
    }
}

impl TileCache {
    /// Create a cache in `dir` backed by `store`.
    ///
    /// The directory is created if needed. In `Disabled` mode nothing is
    /// created.
    pub fn new<P: AsRef<Path>>(dir: P, store: Arc<dyn RemoteStore>, mode: CacheMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if mode != CacheMode::Disabled {
            fs::create_dir_all(&dir)?;
        }
        let labels = MetricLabels::new(store.describe());

        Ok(Self {
            dir,
            store,
            mode,
            labels,
            tiles_downloaded: AtomicUsize::new(0),
            bytes_downloaded: AtomicU64::new(0),
            cache_hits: AtomicUsize::new(0),
            unvalidated: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    /// Local path for a remote key: the key's last path segment in the
    /// (flat) cache directory.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let name = key
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or("object");
        self.dir.join(name)
    }

    /// Get download statistics for this session.
    pub fn stats(&self) -> DownloadStats {
        DownloadStats {
            tiles_downloaded: self.tiles_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            unvalidated: self.unvalidated.load(Ordering::Relaxed),
        }
    }

    /// Reset download statistics.
    pub fn reset_stats(&self) {
        self.tiles_downloaded.store(0, Ordering::Relaxed);
        self.bytes_downloaded.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.unvalidated.store(0, Ordering::Relaxed);
    }

    /// Ensure `local_path` holds a current copy of `remote_key`.
    ///
    /// Fails with `DownloadFailed` when the store lacks the key or a
    /// transfer fails.
    pub fn get<P: AsRef<Path>>(&self, remote_key: &str, local_path: P) -> Result<PathBuf> {
        self.ensure(remote_key, local_path.as_ref())?
            .ok_or_else(|| RasterError::download(remote_key, "object not found in remote store"))
    }

    /// Describe where a tile lives without touching the network.
    pub fn inspect(&self, id: &str, key: &str) -> TileReference {
        let path = self.path_for(key);
        let state = if self.mode != CacheMode::Disabled && path.is_file() {
            TileState::Cached(path)
        } else {
            TileState::Remote
        };
        TileReference {
            id: id.to_string(),
            key: key.to_string(),
            state,
        }
    }

    /// Bring a tile into the cache.
    ///
    /// Returns the reference as `Cached` on success, `Missing` if the store
    /// has no such object, and unchanged (`Remote`) when caching is disabled.
    pub fn materialize(&self, reference: TileReference) -> Result<TileReference> {
        if self.mode == CacheMode::Disabled {
            return Ok(reference);
        }

        let path = self.path_for(&reference.key);
        let state = match self.ensure(&reference.key, &path)? {
            Some(path) => TileState::Cached(path),
            None => {
                tracing::warn!(tile = %reference.id, key = %reference.key, "tile missing from remote store");
                TileState::Missing
            }
        };
        Ok(TileReference { state, ..reference })
    }

    /// Download an object straight into memory, bypassing the cache directory.
    pub fn fetch_bytes(&self, remote_key: &str) -> Result<Vec<u8>> {
        tracing::debug!(key = %remote_key, store = %self.labels.source, "streaming tile");
        let bytes = self
            .store
            .fetch(remote_key)?
            .ok_or_else(|| RasterError::download(remote_key, "object not found in remote store"))?;
        self.record_download(bytes.len());
        Ok(bytes)
    }

    /// Returns `Ok(None)` when the store has no such object.
    fn ensure(&self, key: &str, path: &Path) -> Result<Option<PathBuf>> {
        let labels = self.labels.to_labels();

        if !path.is_file() {
            tracing::debug!(key = %key, path = %path.display(), "cache miss");
            metrics::counter!(metric_defs::CACHE_MISSES.name, &labels).increment(1);
            // must precede the fetch so the sidecar never names a newer
            // version than the bytes on disk
            let version = match self.mode {
                CacheMode::Validate => self.store.version(key)?,
                _ => None,
            };
            return self.download(key, path, version.as_ref());
        }

        if self.mode == CacheMode::Validate {
            match self.store.version(key)? {
                Some(remote) => {
                    let current =
                        is_current(path, &remote).map_err(|e| RasterError::download(key, e))?;
                    if !current {
                        tracing::info!(key = %key, version = ?remote, "remote tile changed, re-downloading");
                        metrics::counter!(metric_defs::CACHE_REVALIDATED.name, &labels).increment(1);
                        return self.download(key, path, Some(&remote));
                    }
                }
                None => {
                    tracing::warn!(
                        key = %key,
                        store = %self.labels.source,
                        "store reports no object version, reusing cached tile without validation"
                    );
                    self.unvalidated.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_defs::CACHE_UNVALIDATED.name, &labels).increment(1);
                }
            }
        }

        tracing::debug!(key = %key, path = %path.display(), "cache hit");
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(metric_defs::CACHE_HITS.name, &labels).increment(1);
        Ok(Some(path.to_path_buf()))
    }

    /// Fetch `key` into `path`, recording a `Tag` version in the sidecar.
    fn download(
        &self,
        key: &str,
        path: &Path,
        version: Option<&ObjectVersion>,
    ) -> Result<Option<PathBuf>> {
        tracing::info!(key = %key, store = %self.labels.source, "downloading tile");
        let Some(bytes) = self.store.fetch(key)? else {
            return Ok(None);
        };

        write_atomic(path, &bytes).map_err(|e| RasterError::download(key, e))?;
        let sidecar = version_path(path);
        let recorded = match version {
            Some(ObjectVersion::Tag(tag)) => write_atomic(&sidecar, tag.as_bytes()),
            _ => match fs::remove_file(&sidecar) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        };
        recorded.map_err(|e| RasterError::download(key, e))?;
        self.record_download(bytes.len());
        tracing::debug!(key = %key, bytes = bytes.len(), path = %path.display(), "tile cached");
        Ok(Some(path.to_path_buf()))
    }

    fn record_download(&self, len: usize) {
        self.tiles_downloaded.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(len as u64, Ordering::Relaxed);
        metrics::counter!(metric_defs::CACHE_DOWNLOADED_BYTES.name, &self.labels.to_labels())
            .increment(len as u64);
    }
}

/// Sidecar holding the version token of a cached file.
fn version_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.{}", name, VERSION_SUFFIX))
}

/// Check a cached file against the remote version.
fn is_current(path: &Path, remote: &ObjectVersion) -> std::io::Result<bool> {
    match remote {
        ObjectVersion::Sha256(digest) => Ok(sha256_file(path)?.eq_ignore_ascii_case(digest)),
        ObjectVersion::Tag(tag) => match fs::read_to_string(version_path(path)) {
            Ok(recorded) => Ok(recorded == *tag),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        },
    }
}

/// Unique sibling temp path: `<name>.<pid>.<seq>.part`.
pub(crate) fn part_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = PART_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!("{}.{}.{}.part", name, std::process::id(), seq))
}

/// Write `bytes` to a temp file beside `target`, sync, then rename over it.
fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = part_path(target);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, target)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Hex SHA-256 of a file, streamed.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 16];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// What a [`FakeStore`] reports as an object's version.
    #[derive(Default, Clone, Copy)]
    enum Versioning {
        #[default]
        Nothing,
        Sha256,
        /// S3-style opaque ETag that changes on every put.
        ETag,
    }

    /// In-memory store that counts requests.
    #[derive(Default)]
    struct FakeStore {
        objects: Mutex<std::collections::HashMap<String, (Vec<u8>, usize)>>,
        puts: AtomicUsize,
        fetches: AtomicUsize,
        version_requests: AtomicUsize,
        versioning: Versioning,
    }

    impl FakeStore {
        fn with_versioning(versioning: Versioning) -> Self {
            Self {
                versioning,
                ..Default::default()
            }
        }

        fn with_digests() -> Self {
            Self::with_versioning(Versioning::Sha256)
        }

        fn put(&self, key: &str, bytes: &[u8]) {
            let generation = self.puts.fetch_add(1, Ordering::SeqCst);
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (bytes.to_vec(), generation));
        }
    }

    impl RemoteStore for FakeStore {
        fn describe(&self) -> String {
            "fake".to_string()
        }

        fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone()))
        }

        fn version(&self, key: &str) -> Result<Option<ObjectVersion>> {
            self.version_requests.fetch_add(1, Ordering::SeqCst);
            let objects = self.objects.lock().unwrap();
            let Some((bytes, generation)) = objects.get(key) else {
                return Ok(None);
            };
            Ok(match self.versioning {
                Versioning::Nothing => None,
                Versioning::Sha256 => Some(ObjectVersion::Sha256(hex::encode(Sha256::digest(bytes)))),
                Versioning::ETag => Some(ObjectVersion::Tag(format!("\"{:032x}\"", generation))),
            })
        }
    }

    fn cache_with(store: Arc<FakeStore>, mode: CacheMode) -> (tempfile::TempDir, TileCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = TileCache::new(dir.path().join("tiles"), store, mode).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_path_for_is_flat() {
        let store = Arc::new(FakeStore::default());
        let (_dir, cache) = cache_with(store, CacheMode::Trust);
        let path = cache.path_for("v200/2021/map/ESA_WorldCover_10m_2021_v200_N45E009_Map.tif");
        assert_eq!(path, cache.dir().join("ESA_WorldCover_10m_2021_v200_N45E009_Map.tif"));
    }

    #[test]
    fn test_get_downloads_once_then_hits() {
        let store = Arc::new(FakeStore::with_digests());
        store.put("a/tile.tif", b"tile bytes");
        let (_dir, cache) = cache_with(store.clone(), CacheMode::Validate);
        let local = cache.path_for("a/tile.tif");

        cache.get("a/tile.tif", &local).unwrap();
        cache.get("a/tile.tif", &local).unwrap();

        assert_eq!(fs::read(&local).unwrap(), b"tile bytes");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.stats(),
            DownloadStats {
                tiles_downloaded: 1,
                bytes_downloaded: 10,
                cache_hits: 1,
                unvalidated: 0,
            }
        );
    }

    #[test]
    fn test_validate_redownloads_on_digest_change() {
        let store = Arc::new(FakeStore::with_digests());
        store.put("tile.tif", b"old");
        let (_dir, cache) = cache_with(store.clone(), CacheMode::Validate);
        let local = cache.path_for("tile.tif");

        cache.get("tile.tif", &local).unwrap();
        store.put("tile.tif", b"new contents");
        cache.get("tile.tif", &local).unwrap();

        assert_eq!(fs::read(&local).unwrap(), b"new contents");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_trust_never_contacts_store() {
        let store = Arc::new(FakeStore::with_digests());
        store.put("tile.tif", b"old");
        let (_dir, cache) = cache_with(store.clone(), CacheMode::Trust);
        let local = cache.path_for("tile.tif");

        cache.get("tile.tif", &local).unwrap();
        store.put("tile.tif", b"new");
        cache.get("tile.tif", &local).unwrap();

        assert_eq!(fs::read(&local).unwrap(), b"old");
        assert_eq!(store.version_requests.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_without_version_reuses_copy() {
        let store = Arc::new(FakeStore::default());
        store.put("tile.tif", b"old");
        let (_dir, cache) = cache_with(store.clone(), CacheMode::Validate);
        let local = cache.path_for("tile.tif");

        cache.get("tile.tif", &local).unwrap();
        store.put("tile.tif", b"new");
        cache.get("tile.tif", &local).unwrap();

        assert_eq!(fs::read(&local).unwrap(), b"old");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().unvalidated, 1);
    }

    #[test]
    fn test_validate_with_etag_only_store() {
        let store = Arc::new(FakeStore::with_versioning(Versioning::ETag));
        store.put("tile.tif", b"old");
        let (_dir, cache) = cache_with(store.clone(), CacheMode::Validate);
        let local = cache.path_for("tile.tif");

        cache.get("tile.tif", &local).unwrap();
        assert!(version_path(&local).is_file());
        cache.get("tile.tif", &local).unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);

        store.put("tile.tif", b"new contents");
        cache.get("tile.tif", &local).unwrap();
        assert_eq!(fs::read(&local).unwrap(), b"new contents");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);

        cache.get("tile.tif", &local).unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().cache_hits, 2);
        assert_eq!(cache.stats().unvalidated, 0);
    }

    #[test]
    fn test_etag_store_refreshes_copy_without_sidecar() {
        let store = Arc::new(FakeStore::with_versioning(Versioning::ETag));
        store.put("tile.tif", b"payload");
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("tiles/tile.tif");

        // a trusted download records no version
        let trusting = TileCache::new(dir.path().join("tiles"), store.clone(), CacheMode::Trust).unwrap();
        trusting.get("tile.tif", &local).unwrap();
        assert!(!version_path(&local).exists());

        let validating =
            TileCache::new(dir.path().join("tiles"), store.clone(), CacheMode::Validate).unwrap();
        validating.get("tile.tif", &local).unwrap();
        validating.get("tile.tif", &local).unwrap();
        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(validating.stats().cache_hits, 1);
    }

    #[test]
    fn test_version_from_headers() {
        use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, ETAG, LAST_MODIFIED};

        let sha = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        let mut headers = HeaderMap::new();
        headers.insert(SHA256_HEADER, HeaderValue::from_static(sha));
        headers.insert(ETAG, HeaderValue::from_static("\"d41d8cd98f00b204e9800998ecf8427e\""));
        assert_eq!(
            ObjectVersion::from_headers(&headers),
            Some(ObjectVersion::Sha256(sha.to_string()))
        );

        // S3 single-part ETags are MD5s
        headers.remove(SHA256_HEADER);
        assert_eq!(
            ObjectVersion::from_headers(&headers),
            Some(ObjectVersion::Tag("etag \"d41d8cd98f00b204e9800998ecf8427e\"".to_string()))
        );

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(ObjectVersion::from_headers(&headers), None);
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(
            ObjectVersion::from_headers(&headers),
            Some(ObjectVersion::Tag(
                "1024 bytes, Wed, 21 Oct 2015 07:28:00 GMT".to_string()
            ))
        );
    }

    #[test]
    fn test_missing_object() {
        let store = Arc::new(FakeStore::default());
        let (_dir, cache) = cache_with(store, CacheMode::Validate);

        let err = cache.get("nope.tif", cache.path_for("nope.tif")).unwrap_err();
        assert!(matches!(err, RasterError::DownloadFailed { ref key, .. } if key == "nope.tif"));

        let reference = cache.materialize(TileReference::new("X", "nope.tif")).unwrap();
        assert_eq!(reference.state, TileState::Missing);
    }

    #[test]
    fn test_materialize_and_inspect() {
        let store = Arc::new(FakeStore::default());
        store.put("dir/T1.tif", b"1");
        let (_dir, cache) = cache_with(store, CacheMode::Trust);

        assert_eq!(cache.inspect("T1", "dir/T1.tif").state, TileState::Remote);
        let reference = cache.materialize(TileReference::new("T1", "dir/T1.tif")).unwrap();
        let expected = cache.path_for("dir/T1.tif");
        assert_eq!(reference.local_path(), Some(expected.as_path()));
        assert_eq!(cache.inspect("T1", "dir/T1.tif").state, TileState::Cached(expected));
    }

    #[test]
    fn test_disabled_streams_without_disk() {
        let store = Arc::new(FakeStore::default());
        store.put("T1.tif", b"streamed");
        let (dir, cache) = cache_with(store, CacheMode::Disabled);

        let reference = cache.materialize(TileReference::new("T1", "T1.tif")).unwrap();
        assert_eq!(reference.state, TileState::Remote);
        assert_eq!(cache.fetch_bytes("T1.tif").unwrap(), b"streamed");
        assert!(!dir.path().join("tiles").exists());
        assert_eq!(cache.stats().tiles_downloaded, 1);
    }

    #[test]
    fn test_no_part_files_left_behind() {
        let store = Arc::new(FakeStore::default());
        store.put("T1.tif", b"payload");
        let (_dir, cache) = cache_with(store, CacheMode::Trust);
        cache.get("T1.tif", cache.path_for("T1.tif")).unwrap();

        let leftovers: Vec<_> = fs::read_dir(cache.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_concurrent_same_key() {
        let store = Arc::new(FakeStore::default());
        store.put("T1.tif", &[7u8; 4096]);
        let (_dir, cache) = cache_with(store, CacheMode::Trust);
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get("T1.tif", cache.path_for("T1.tif")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(fs::read(cache.path_for("T1.tif")).unwrap(), vec![7u8; 4096]);
    }

    #[test]
    fn test_directory_store() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("v1")).unwrap();
        fs::write(root.path().join("v1/a.tif"), b"abc").unwrap();
        let store = DirectoryStore::new(root.path());

        assert_eq!(store.fetch("v1/a.tif").unwrap(), Some(b"abc".to_vec()));
        assert_eq!(store.fetch("v1/b.tif").unwrap(), None);
        assert_eq!(
            store.version("v1/a.tif").unwrap(),
            Some(ObjectVersion::Sha256(
                "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string()
            ))
        );
        assert_eq!(store.version("v1/b.tif").unwrap(), None);
    }

    #[test]
    fn test_http_store_url() {
        let store = HttpStore::new("https://example.com/bucket/").unwrap();
        assert_eq!(store.url_for("v200/a.tif"), "https://example.com/bucket/v200/a.tif");
    }

    #[test]
    fn test_sha256_hex_check() {
        assert!(is_sha256_hex(&"a".repeat(64)));
        assert!(!is_sha256_hex("d41d8cd98f00b204e9800998ecf8427e"));
        assert!(!is_sha256_hex(&"g".repeat(64)));
    }
}
