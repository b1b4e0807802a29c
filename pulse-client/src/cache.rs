//! Paged result cache
//!
//! Fronts a slow, rate limited, paginated list operation with a per-key
//! time-to-live cache. A request asks for "at least N most recent records"
//! (or all of them); a cached entry answers it only if it is fresh and either
//! large enough or known to hold every record of the source. Otherwise the
//! entry is dropped and refetched as a whole.
//!
//! One async mutex guards the whole map and is held across the fetch, so
//! concurrent requests are serialized and a key is never fetched twice at
//! the same time.

use chrono::{DateTime, Utc};
use pulse_core::{Clock, SystemClock};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Largest page size the provider accepts
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of a paged list endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Number of the last page as currently reported by the source (1-based)
    pub last_page: u32,
}

/// How many records a caller needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCount {
    /// The `n` most recent records (fewer if the source has fewer)
    AtLeast(usize),
    /// Every record the source has
    All,
}

/// Errors raised by [`PagedResultCache::get_records`]
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Could not get page {page} for '{key}': {source}")]
    PageFetch {
        key: String,
        page: u32,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

#[derive(Debug)]
struct CacheEntry<T> {
    sampled_at: DateTime<Utc>,
    values: Vec<T>,
    /// The fetch walked every page of the source
    complete: bool,
}

/// Time-bounded cache over a paginated source
pub struct PagedResultCache<T> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone + Send> PagedResultCache<T> {
    /// Creates a cache backed by wall-clock time
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns at least `count` records for `key`
    ///
    /// `list_page(page, per_page)` is only called on a miss, starting at page 1
    /// and stopping once enough records were collected or the source runs out
    /// of pages. Bounded requests return exactly `n` records (a prefix of the
    /// fetch order) unless the source has fewer. A failed page aborts the call
    /// and leaves the cache without an entry for `key`.
    pub async fn get_records<F, Fut, E>(
        &self,
        key: &str,
        mut list_page: F,
        count: RecordCount,
    ) -> Result<Vec<T>, CacheError>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Result<Page<T>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        if count == RecordCount::AtLeast(0) {
            return Ok(Vec::new());
        }

        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(key) {
            if self.is_fresh(entry) {
                match count {
                    RecordCount::All if entry.complete => return Ok(entry.values.clone()),
                    RecordCount::AtLeast(n) if n <= entry.values.len() => {
                        return Ok(entry.values[..n].to_vec());
                    }
                    // The source has fewer records than asked for; a refetch would return the same set
                    RecordCount::AtLeast(_) if entry.complete => return Ok(entry.values.clone()),
                    _ => debug!(
                        "Cache for '{}' holds {} records, {:?} requested",
                        key,
                        entry.values.len(),
                        count
                    ),
                }
            }
            entries.remove(key);
        }

        let (values, complete) = fetch_pages(key, &mut list_page, count).await?;
        entries.insert(
            key.to_string(),
            CacheEntry {
                sampled_at: self.clock.current_time(),
                values: values.clone(),
                complete,
            },
        );
        Ok(values)
    }

    /// Drops every cached entry
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    fn is_fresh(&self, entry: &CacheEntry<T>) -> bool {
        match (self.clock.current_time() - entry.sampled_at).to_std() {
            Ok(age) => age <= self.ttl,
            // Sampled "in the future": the clock was moved back
            Err(_) => true,
        }
    }
}

async fn fetch_pages<T, F, Fut, E>(
    key: &str,
    list_page: &mut F,
    count: RecordCount,
) -> Result<(Vec<T>, bool), CacheError>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<Page<T>, E>>,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    let per_page = (match count {
        RecordCount::AtLeast(n) => n.min(MAX_PAGE_SIZE),
        RecordCount::All => MAX_PAGE_SIZE,
    }) as u32;

    let mut results = Vec::new();
    let mut page = 1;
    let mut last_page = 1;

    while page <= last_page {
        debug!("Fetching page {} for '{}' (last={})", page, key, last_page);

        let fetched = list_page(page, per_page)
            .await
            .map_err(|e| CacheError::PageFetch {
                key: key.to_string(),
                page,
                source: e.into(),
            })?;

        last_page = fetched.last_page;
        let empty = fetched.items.is_empty();
        results.extend(fetched.items);
        page += 1;

        if let RecordCount::AtLeast(n) = count {
            if results.len() >= n {
                results.truncate(n);
                return Ok((results, false));
            }
        }
        if empty {
            break;
        }
    }

    Ok((results, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source serving fixed pages regardless of the requested page size
    struct FakeSource {
        pages: Vec<Vec<u32>>,
        calls: AtomicUsize,
        requested: std::sync::Mutex<Vec<(u32, u32)>>,
        fail_on_page: Option<u32>,
    }

    impl FakeSource {
        fn with_pages(sizes: &[usize]) -> Self {
            let mut next = 0;
            let pages = sizes
                .iter()
                .map(|size| {
                    let page: Vec<u32> = (next..next + *size as u32).collect();
                    next += *size as u32;
                    page
                })
                .collect();
            Self {
                pages,
                calls: AtomicUsize::new(0),
                requested: std::sync::Mutex::new(Vec::new()),
                fail_on_page: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn list(&self, page: u32, per_page: u32) -> Result<Page<u32>, std::io::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push((page, per_page));
            if self.fail_on_page == Some(page) {
                return Err(std::io::Error::other("rate limited"));
            }
            Ok(Page {
                items: self.pages.get(page as usize - 1).cloned().unwrap_or_default(),
                last_page: self.pages.len() as u32,
            })
        }
    }

    fn cache(ttl_secs: u64) -> (PagedResultCache<u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = PagedResultCache::with_clock(Duration::from_secs(ttl_secs), clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_fetch_stops_once_enough_records() {
        let source = FakeSource::with_pages(&[10, 10, 5]);
        let (cache, _) = cache(60);

        let records = cache
            .get_records("orgA/pipeline1", |p, n| source.list(p, n), RecordCount::AtLeast(20))
            .await
            .unwrap();

        assert_eq!(source.calls(), 2);
        assert_eq!(records, (0..20).collect::<Vec<u32>>());
        assert_eq!(*source.requested.lock().unwrap(), vec![(1, 20), (2, 20)]);
    }

    #[tokio::test]
    async fn test_truncates_to_requested_count() {
        let source = FakeSource::with_pages(&[10, 10, 5]);
        let (cache, _) = cache(60);

        let records = cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(15))
            .await
            .unwrap();

        assert_eq!(records.len(), 15);
        assert_eq!(records, (0..15).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_returns_fewer_when_source_runs_out() {
        let source = FakeSource::with_pages(&[10, 10, 5]);
        let (cache, _) = cache(60);

        let records = cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(40))
            .await
            .unwrap();

        assert_eq!(records.len(), 25);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_smaller_requests_within_ttl_are_served_from_cache() {
        let source = FakeSource::with_pages(&[10, 10, 5]);
        let (cache, clock) = cache(10);

        cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(20))
            .await
            .unwrap();

        for count in [20, 5, 1, 19] {
            clock.advance_seconds(2);
            let records = cache
                .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(count))
                .await
                .unwrap();
            assert_eq!(records, (0..count as u32).collect::<Vec<u32>>());
        }

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let source = FakeSource::with_pages(&[5]);
        let (cache, clock) = cache(10);

        let get = || cache.get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(5));

        get().await.unwrap();
        clock.advance_seconds(9);
        get().await.unwrap();
        clock.advance_seconds(1);
        get().await.unwrap();
        assert_eq!(source.calls(), 1, "entry is still valid at exactly the ttl");

        clock.advance_seconds(1);
        get().await.unwrap();
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_larger_request_triggers_one_full_refetch() {
        let source = FakeSource::with_pages(&[10, 10, 5]);
        let (cache, clock) = cache(60);

        cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(10))
            .await
            .unwrap();
        assert_eq!(source.calls(), 1);

        clock.advance_seconds(1);
        let records = cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(11))
            .await
            .unwrap();

        // Refetched from page 1, not extended from page 2
        assert_eq!(records, (0..11).collect::<Vec<u32>>());
        assert_eq!(source.calls(), 3);
        assert_eq!(source.requested.lock().unwrap()[1], (1, 11));

        // The larger set now answers both sizes
        cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(10))
            .await
            .unwrap();
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_all_records() {
        let source = FakeSource::with_pages(&[100, 100, 7]);
        let (cache, _) = cache(60);

        let records = cache
            .get_records("org", |p, n| source.list(p, n), RecordCount::All)
            .await
            .unwrap();
        assert_eq!(records.len(), 207);
        assert!(source.requested.lock().unwrap().iter().all(|(_, n)| *n == 100));

        cache
            .get_records("org", |p, n| source.list(p, n), RecordCount::All)
            .await
            .unwrap();
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_partial_entry_does_not_answer_all() {
        let source = FakeSource::with_pages(&[10, 10, 5]);
        let (cache, _) = cache(60);

        cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(10))
            .await
            .unwrap();
        let records = cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::All)
            .await
            .unwrap();

        assert_eq!(records.len(), 25);
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn test_zero_records_needs_no_fetch() {
        let source = FakeSource::with_pages(&[10]);
        let (cache, _) = cache(60);

        let records = cache
            .get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(0))
            .await
            .unwrap();
        assert!(records.is_empty());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_page_failure_is_reported_and_not_cached() {
        let mut source = FakeSource::with_pages(&[10, 10, 5]);
        source.fail_on_page = Some(2);
        let (cache, _) = cache(60);

        let err = cache
            .get_records("orgA/pipeline1", |p, n| source.list(p, n), RecordCount::AtLeast(20))
            .await
            .unwrap_err();
        let CacheError::PageFetch { key, page, .. } = &err;
        assert_eq!(key, "orgA/pipeline1");
        assert_eq!(*page, 2);
        assert!(err.to_string().contains("rate limited"));

        source.fail_on_page = None;
        cache
            .get_records("orgA/pipeline1", |p, n| source.list(p, n), RecordCount::AtLeast(5))
            .await
            .unwrap();
        assert_eq!(source.calls(), 3, "nothing was cached by the failed call");
    }

    #[tokio::test]
    async fn test_short_source_is_served_from_cache() {
        let source = FakeSource::with_pages(&[15]);
        let (cache, clock) = cache(300);

        for _ in 0..3 {
            let records = cache
                .get_records("org/small", |p, n| source.list(p, n), RecordCount::AtLeast(20))
                .await
                .unwrap();
            assert_eq!(records, (0..15).collect::<Vec<u32>>());
            clock.advance_seconds(1);
        }
        assert_eq!(source.calls(), 1);

        // The complete entry also answers requests for every record
        let all = cache
            .get_records("org/small", |p, n| source.list(p, n), RecordCount::All)
            .await
            .unwrap();
        assert_eq!(all.len(), 15);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_fetch_once() {
        let source = FakeSource::with_pages(&[10, 10]);
        let (cache, _) = cache(60);

        let (first, second) = tokio::join!(
            cache.get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(10)),
            cache.get_records("k", |p, n| source.list(p, n), RecordCount::AtLeast(10)),
        );

        assert_eq!(first.unwrap(), (0..10).collect::<Vec<u32>>());
        assert_eq!(second.unwrap(), (0..10).collect::<Vec<u32>>());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let source = FakeSource::with_pages(&[10]);
        let (cache, _) = cache(60);

        for key in ["a/x", "a/y", "a/x"] {
            cache
                .get_records(key, |p, n| source.list(p, n), RecordCount::AtLeast(10))
                .await
                .unwrap();
        }
        assert_eq!(source.calls(), 2);

        cache.clear().await;
        cache
            .get_records("a/x", |p, n| source.list(p, n), RecordCount::AtLeast(10))
            .await
            .unwrap();
        assert_eq!(source.calls(), 3);
    }
}
