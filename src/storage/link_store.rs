//! File-backed per-site link state
//!
//! Each site owns three files in the data directory:
//!
//! - `<site>.queue.json` - the coordinator's queue plus the time it was fetched
//! - `<site>.used.json` - links already shown on the site, keyed by link id
//! - `<site>.used.lock` - advisory lock guarding updates of the used set
//! - `<site>.registered` - present once the coordinator accepted the site
//!
//! Writes go to a temporary file that is renamed over the target, so readers
//! never observe a half-written file. Read-merge-write cycles on the used
//! set hold an async mutex per site and an exclusive lock on the site's
//! lock file, so separate processes sharing the data directory queue up too.
//!
//! # Example
//!
//! ```no_run
//! use linkgate::models::{Link, Site, UsedLinkRecord};
//! use linkgate::storage::{LinkStore, StoreSettings};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), linkgate::storage::StoreError> {
//! let store = LinkStore::open(Path::new("/var/lib/linkgate"), StoreSettings::default())?;
//! let site = Site::parse("www.example.com").unwrap();
//!
//! store.refresh_queue(&site, vec![Link::new(1, "https://a.example/")])?;
//! store
//!     .record_used(&site, vec![UsedLinkRecord::now(Link::new(1, "https://a.example/"))])
//!     .await?;
//! assert_eq!(store.get_used(&site)?.len(), 1);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::coordinator::{ClientError, RegistrationLedger};
use crate::models::{Link, Site, UsedLinkRecord, UsedLinks};

use super::StoreError;

/// How long a fetched queue is served from disk
pub const QUEUE_CACHE_LIFETIME: Duration = Duration::from_secs(600);

/// How long a shown link stays in the used set
pub const USED_LINK_RETENTION: Duration = Duration::from_secs(86_400);

// ============================================================================
// Settings and cached state
// ============================================================================

/// Time boxes for the two caches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub queue_ttl: Duration,
    pub used_retention: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            queue_ttl: QUEUE_CACHE_LIFETIME,
            used_retention: USED_LINK_RETENTION,
        }
    }
}

/// Persisted queue of one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueCache {
    pub fetched_at: DateTime<Utc>,
    pub links: Vec<Link>,
}

impl QueueCache {
    /// Age of the cache; a timestamp in the future counts as brand new
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.fetched_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsedCache {
    updated_at: Option<DateTime<Utc>>,
    records: UsedLinks,
}

/// Where the links returned by [`LinkStore::get_queue`] came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOrigin {
    /// Fresh cache, no network call
    Cached,
    /// Fetched from the coordinator just now
    Fetched,
    /// Fetch failed, expired cache served instead
    Stale,
    /// Fetch failed and nothing was cached
    Empty,
}

/// Queue contents together with their provenance
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub links: Vec<Link>,
    pub origin: QueueOrigin,
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Anything that can supply a fresh queue for a site
#[async_trait]
pub trait QueueSource: Send + Sync {
    async fn fetch_queue(&self, site: &Site) -> Result<Vec<Link>, ClientError>;
}

// ============================================================================
// Link Store
// ============================================================================

/// Durable per-site queue and used-link state
pub struct LinkStore {
    /// Directory holding all state files
    data_dir: PathBuf,

    settings: StoreSettings,

    /// One writer lock per site
    locks: Mutex<HashMap<Site, Arc<tokio::sync::Mutex<()>>>>,
}

impl LinkStore {
    /// Open the store, creating the data directory if needed
    ///
    /// Fails with [`StoreError::NotWritable`] when the directory cannot be
    /// written; callers treat that as fatal.
    pub fn open(data_dir: &Path, settings: StoreSettings) -> Result<Self, StoreError> {
        let not_writable = |e: std::io::Error| StoreError::NotWritable {
            path: data_dir.to_path_buf(),
            reason: e.to_string(),
        };

        fs::create_dir_all(data_dir).map_err(not_writable)?;

        let probe = data_dir.join(format!(".write-probe-{}", std::process::id()));
        File::create(&probe)
            .and_then(|mut file| file.write_all(b"ok"))
            .map_err(not_writable)?;
        let _ = fs::remove_file(&probe);

        tracing::debug!(data_dir = %data_dir.display(), "Link store opened");

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            settings,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Get data directory
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> StoreSettings {
        self.settings
    }

    fn queue_path(&self, site: &Site) -> PathBuf {
        self.data_dir.join(format!("{site}.queue.json"))
    }

    fn used_path(&self, site: &Site) -> PathBuf {
        self.data_dir.join(format!("{site}.used.json"))
    }

    fn lock_path(&self, site: &Site) -> PathBuf {
        self.data_dir.join(format!("{site}.used.lock"))
    }

    fn registered_path(&self, site: &Site) -> PathBuf {
        self.data_dir.join(format!("{site}.registered"))
    }

    fn site_lock(&self, site: &Site) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(site.clone()).or_default().clone()
    }

    /// Block until this process holds the exclusive lock file of `site`
    ///
    /// The lock is released when the returned handle is dropped.
    async fn lock_site_file(&self, site: &Site) -> Result<File, StoreError> {
        let path = self.lock_path(site);
        let file = tokio::task::spawn_blocking(move || {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(file)
    }

    /// Drop records older than the retention window
    fn prune_expired(&self, used: &mut UsedLinks) {
        let now = Utc::now();
        let retention = self.settings.used_retention;
        used.retain(|_, record| {
            (now - record.assigned_at).to_std().unwrap_or_default() <= retention
        });
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Read the persisted queue without touching the network
    pub fn cached_queue(&self, site: &Site) -> Result<Option<QueueCache>, StoreError> {
        read_json(&self.queue_path(site))
    }

    /// Get the queue for `site`, refreshing it from `source` when stale
    ///
    /// Never fails: a failed fetch falls back to the last cached queue, or
    /// to an empty one.
    pub async fn get_queue<S>(&self, site: &Site, source: &S) -> QueueSnapshot
    where
        S: QueueSource + ?Sized,
    {
        let cached = match self.cached_queue(site) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(%site, error = %e, "Ignoring unreadable queue cache");
                None
            }
        };

        if let Some(cache) = &cached {
            if cache.age(Utc::now()) <= self.settings.queue_ttl {
                return QueueSnapshot {
                    links: cache.links.clone(),
                    origin: QueueOrigin::Cached,
                    fetched_at: Some(cache.fetched_at),
                };
            }
        }

        match source.fetch_queue(site).await {
            Ok(links) => {
                tracing::debug!(%site, links = links.len(), "Queue fetched from coordinator");
                let fetched_at = match self.refresh_queue(site, links.clone()) {
                    Ok(cache) => cache.fetched_at,
                    Err(e) => {
                        tracing::warn!(%site, error = %e, "Failed to persist fetched queue");
                        Utc::now()
                    }
                };
                QueueSnapshot {
                    links,
                    origin: QueueOrigin::Fetched,
                    fetched_at: Some(fetched_at),
                }
            }
            Err(e) => {
                tracing::warn!(%site, error = %e, "Queue fetch failed");
                match cached {
                    Some(cache) => QueueSnapshot {
                        links: cache.links,
                        origin: QueueOrigin::Stale,
                        fetched_at: Some(cache.fetched_at),
                    },
                    None => QueueSnapshot {
                        links: Vec::new(),
                        origin: QueueOrigin::Empty,
                        fetched_at: None,
                    },
                }
            }
        }
    }

    /// Replace the persisted queue and reset its freshness clock
    pub fn refresh_queue(&self, site: &Site, links: Vec<Link>) -> Result<QueueCache, StoreError> {
        let cache = QueueCache {
            fetched_at: Utc::now(),
            links,
        };
        write_json_atomic(&self.queue_path(site), &cache)?;
        Ok(cache)
    }

    // =========================================================================
    // Used links
    // =========================================================================

    /// Get the used links of `site` that are still within retention
    ///
    /// A missing file is an empty set; an unreadable one is an error.
    pub fn get_used(&self, site: &Site) -> Result<UsedLinks, StoreError> {
        let mut used = self.read_used(site)?;
        self.prune_expired(&mut used);
        Ok(used)
    }

    fn read_used(&self, site: &Site) -> Result<UsedLinks, StoreError> {
        Ok(read_json::<UsedCache>(&self.used_path(site))?
            .map(|cache| cache.records)
            .unwrap_or_default())
    }

    /// Merge `records` into the used set, last write wins per link id
    pub async fn record_used(
        &self,
        site: &Site,
        records: Vec<UsedLinkRecord>,
    ) -> Result<(), StoreError> {
        self.with_used(site, move |used| {
            for record in records {
                used.insert(record.link_id, record);
            }
        })
        .await
    }

    /// Run a read-modify-write cycle on the used set under the site lock
    ///
    /// `f` only sees records within retention. The set is written back when
    /// expiry or `f` changed it. Corrupt state is logged and replaced by an
    /// empty set.
    pub async fn with_used<T, F>(&self, site: &Site, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut UsedLinks) -> T,
    {
        let lock = self.site_lock(site);
        let _guard = lock.lock().await;
        let _file_lock = self.lock_site_file(site).await?;

        let mut used = match self.read_used(site) {
            Ok(used) => used,
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::warn!(%site, error = %e, "Resetting corrupt used-link state");
                UsedLinks::new()
            }
            Err(e) => return Err(e),
        };
        let before = used.clone();

        self.prune_expired(&mut used);
        let value = f(&mut used);
        self.prune_expired(&mut used);

        if used != before {
            let cache = UsedCache {
                updated_at: Some(Utc::now()),
                records: used,
            };
            write_json_atomic(&self.used_path(site), &cache)?;
        }

        Ok(value)
    }

    // =========================================================================
    // Registration marker
    // =========================================================================

    /// Whether the coordinator has accepted `site` at least once
    pub fn is_registered(&self, site: &Site) -> bool {
        self.registered_path(site).exists()
    }

    /// Record that the coordinator accepted `site`
    pub fn mark_registered(&self, site: &Site) -> Result<(), StoreError> {
        let stamp = Utc::now().to_rfc3339();
        fs::write(self.registered_path(site), stamp)?;
        Ok(())
    }
}

impl RegistrationLedger for LinkStore {
    fn is_registered(&self, site: &Site) -> bool {
        LinkStore::is_registered(self, site)
    }

    fn mark_registered(&self, site: &Site) -> Result<(), StoreError> {
        LinkStore::mark_registered(self, site)
    }
}

// ============================================================================
// JSON file helpers
// ============================================================================

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    // Unique per writer so concurrent processes never share a temp file
    let temp_path = path.with_file_name(format!(
        "{filename}.{}.{}.tmp",
        std::process::id(),
        rand::random::<u32>()
    ));

    let result = (|| {
        let mut writer = BufWriter::new(File::create(&temp_path)?);
        serde_json::to_writer(&mut writer, value).map_err(std::io::Error::other)?;
        writer.flush()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    tracing::trace!(path = %path.display(), "State file written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingSource {
        links: Option<Vec<Link>>,
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn ok(links: Vec<Link>) -> Self {
            Self {
                links: Some(links),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                links: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueSource for CountingSource {
        async fn fetch_queue(&self, _site: &Site) -> Result<Vec<Link>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.links
                .clone()
                .ok_or_else(|| ClientError::Transport("unreachable".to_string()))
        }
    }

    fn site() -> Site {
        Site::parse("example.com").unwrap()
    }

    fn store(dir: &TempDir) -> LinkStore {
        LinkStore::open(dir.path(), StoreSettings::default()).unwrap()
    }

    fn links(ids: &[u64]) -> Vec<Link> {
        ids.iter()
            .map(|id| Link::new(*id, format!("https://l{id}.example/")))
            .collect()
    }

    #[test]
    fn test_open_rejects_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let result = LinkStore::open(&file.join("sub"), StoreSettings::default());
        assert!(matches!(result, Err(StoreError::NotWritable { .. })));
    }

    #[test]
    fn test_get_used_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).get_used(&site()).unwrap().is_empty());
    }

    #[test]
    fn test_get_used_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("example.com.used.json"), "{not json").unwrap();

        assert!(matches!(
            store.get_used(&site()),
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_record_used_recovers_from_corrupt_state() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(dir.path().join("example.com.used.json"), "[-1]").unwrap();

        store
            .record_used(&site(), vec![UsedLinkRecord::now(Link::new(5, "u"))])
            .await
            .unwrap();

        let used = store.get_used(&site()).unwrap();
        assert_eq!(used.keys().copied().collect::<Vec<_>>(), vec![5]);
    }

    #[tokio::test]
    async fn test_record_used_merges_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let earlier = Utc::now() - chrono::Duration::seconds(60);

        store
            .record_used(&site(), vec![UsedLinkRecord::new(Link::new(1, "old"), earlier)])
            .await
            .unwrap();
        store
            .record_used(
                &site(),
                vec![
                    UsedLinkRecord::now(Link::new(1, "new")),
                    UsedLinkRecord::now(Link::new(2, "two")),
                ],
            )
            .await
            .unwrap();

        let used = store.get_used(&site()).unwrap();
        assert_eq!(used.len(), 2);
        assert_eq!(used[&1].link.url, "new");
        assert!(used[&1].assigned_at > earlier);
    }

    #[tokio::test]
    async fn test_record_used_drops_expired_entries() {
        let dir = TempDir::new().unwrap();
        let store = LinkStore::open(
            dir.path(),
            StoreSettings {
                used_retention: Duration::from_secs(3600),
                ..StoreSettings::default()
            },
        )
        .unwrap();
        let expired = Utc::now() - chrono::Duration::hours(2);

        store
            .record_used(
                &site(),
                vec![
                    UsedLinkRecord::new(Link::new(1, "a"), expired),
                    UsedLinkRecord::now(Link::new(2, "b")),
                ],
            )
            .await
            .unwrap();

        let persisted = store.get_used(&site()).unwrap();
        assert_eq!(persisted.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn test_concurrent_record_used_loses_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir));

        let tasks: Vec<_> = (0..32u64)
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_used(&site(), vec![UsedLinkRecord::now(Link::new(id, "x"))])
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.get_used(&site()).unwrap().len(), 32);
    }

    #[test]
    fn test_separate_stores_share_the_file_lock() {
        let dir = TempDir::new().unwrap();

        let writers: Vec<_> = [0u64, 1_000]
            .into_iter()
            .map(|offset| {
                let data_dir = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .unwrap();
                    let store = LinkStore::open(&data_dir, StoreSettings::default()).unwrap();
                    runtime.block_on(async {
                        for id in offset..offset + 200 {
                            let record = UsedLinkRecord::now(Link::new(id, "x"));
                            store.record_used(&site(), vec![record]).await.unwrap();
                        }
                    });
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(store(&dir).get_used(&site()).unwrap().len(), 400);
        assert!(dir.path().join("example.com.used.lock").exists());
    }

    #[tokio::test]
    async fn test_expired_records_are_invisible_and_evicted() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let shown = Utc::now() - chrono::Duration::days(3);
        let cache = UsedCache {
            updated_at: None,
            records: [(1, UsedLinkRecord::new(Link::new(1, "a"), shown))]
                .into_iter()
                .collect(),
        };
        write_json_atomic(&dir.path().join("example.com.used.json"), &cache).unwrap();

        assert!(store.get_used(&site()).unwrap().is_empty());

        let seen = store.with_used(&site(), |used| used.len()).await.unwrap();
        assert_eq!(seen, 0);
        assert!(store.read_used(&site()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_queue_fetches_once_within_lifetime() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let source = CountingSource::ok(links(&[1, 2, 3]));

        let first = store.get_queue(&site(), &source).await;
        let second = store.get_queue(&site(), &source).await;

        assert_eq!(first.origin, QueueOrigin::Fetched);
        assert_eq!(second.origin, QueueOrigin::Cached);
        assert_eq!(first.links, second.links);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_queue_refetches_when_stale() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stale = QueueCache {
            fetched_at: Utc::now() - chrono::Duration::seconds(601),
            links: links(&[9]),
        };
        write_json_atomic(&dir.path().join("example.com.queue.json"), &stale).unwrap();
        let source = CountingSource::ok(links(&[1, 2]));

        let snapshot = store.get_queue(&site(), &source).await;

        assert_eq!(snapshot.origin, QueueOrigin::Fetched);
        assert_eq!(snapshot.links, links(&[1, 2]));
        assert_eq!(store.cached_queue(&site()).unwrap().unwrap().links, links(&[1, 2]));
    }

    #[tokio::test]
    async fn test_get_queue_serves_stale_cache_on_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let stale = QueueCache {
            fetched_at: Utc::now() - chrono::Duration::hours(1),
            links: links(&[4, 5]),
        };
        write_json_atomic(&dir.path().join("example.com.queue.json"), &stale).unwrap();

        let snapshot = store.get_queue(&site(), &CountingSource::failing()).await;

        assert_eq!(snapshot.origin, QueueOrigin::Stale);
        assert_eq!(snapshot.links, links(&[4, 5]));
    }

    #[tokio::test]
    async fn test_get_queue_empty_without_cache_on_fetch_failure() {
        let dir = TempDir::new().unwrap();
        let snapshot = store(&dir)
            .get_queue(&site(), &CountingSource::failing())
            .await;

        assert_eq!(snapshot.origin, QueueOrigin::Empty);
        assert!(snapshot.links.is_empty());
    }

    #[test]
    fn test_registration_marker() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert!(!store.is_registered(&site()));
        store.mark_registered(&site()).unwrap();
        assert!(store.is_registered(&site()));
    }
}
