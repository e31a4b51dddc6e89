//! HistorySearchEngine - main API
//!
//! Ties the durable store, the cache manager and the write aggregator
//! together and exposes search, visit recording and lifecycle control.
//!
//! Async Cancellation Architecture:
//! When a caller drops a search future we intercept it via a DropGuard that
//! triggers a CancellationToken. The blocking search thread checks this token
//! between passes and inside the parallel scoring loop.

use crate::aggregator::{AggregatorStats, WriteAggregator};
use crate::cache::{CacheManager, CacheState};
use crate::config::{EngineConfig, SimilarityConfig};
use crate::database::HistoryDatabase;
use crate::interface::{
    CacheStats, HistoryProvider, HistorySink, OmniError, OmniResult, SearchOptions, SearchResult,
    ShutdownReport,
};
use crate::models::{HistoryRecord, MatchCandidate};
use crate::search::{self, SearchContext};
use chrono::Utc;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Snapshot file created next to the database when none is configured.
const DEFAULT_SNAPSHOT_FILE: &str = "history_cache_v1.bin";

/// Global fallback Tokio runtime for when the engine is used outside any
/// runtime context. Shared across all engines and never dropped.
static FALLBACK_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create fallback tokio runtime")
});

static RAYON_INIT: Once = Once::new();

/// Initialize global Rayon thread pool with core reservation and lower priority
fn init_rayon() {
    RAYON_INIT.call_once(|| {
        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        // Leave 2 cores to tokio so visit flushing stays responsive
        let rayon_threads = num_threads.saturating_sub(2).max(1);

        let _ = rayon::ThreadPoolBuilder::new()
            .num_threads(rayon_threads)
            .thread_name(|i| format!("omnirank-rayon-{}", i))
            .start_handler(|_| {
                use thread_priority::*;
                let _ = set_current_thread_priority(ThreadPriority::Min);
            })
            .build_global();
    });
}

/// Current runtime if there is one, otherwise the global fallback.
fn runtime_handle() -> tokio::runtime::Handle {
    tokio::runtime::Handle::try_current().unwrap_or_else(|_| FALLBACK_RUNTIME.handle().clone())
}

/// RAII guard that cancels a token when dropped.
/// Dropping a search future drops this guard, which cancels the blocking work.
struct DropGuard {
    token: CancellationToken,
}

impl DropGuard {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Browser history search engine.
///
/// Concurrency Model:
/// - Searches read an `Arc` of the current snapshot and never wait on writes
/// - Visits go through the bounded write aggregator
/// - Rebuilds run on tokio blocking threads and swap the snapshot atomically
/// - Uses FALLBACK_RUNTIME when constructed outside any runtime
pub struct HistorySearchEngine {
    provider: Arc<dyn HistoryProvider>,
    cache: Arc<CacheManager>,
    aggregator: WriteAggregator,
}

impl HistorySearchEngine {
    /// Open or create a SQLite history database at `db_path`.
    ///
    /// Without an explicit `snapshot_path` the snapshot lives next to the
    /// database file.
    pub fn open<P: AsRef<Path>>(db_path: P, mut config: EngineConfig) -> OmniResult<Self> {
        config.validate()?;
        let db_path = db_path.as_ref();
        if config.snapshot_path.is_none() {
            config.snapshot_path = Some(default_snapshot_path(db_path));
        }

        let db = Arc::new(HistoryDatabase::open(db_path)?);
        Self::with_store(Arc::clone(&db) as Arc<dyn HistoryProvider>, db, config)
    }

    /// In-memory database, no snapshot persistence.
    pub fn open_in_memory() -> OmniResult<Self> {
        let db = Arc::new(HistoryDatabase::open_in_memory()?);
        Self::with_store(
            Arc::clone(&db) as Arc<dyn HistoryProvider>,
            db,
            EngineConfig::default(),
        )
    }

    /// Build an engine over any store. Restores the persisted snapshot when
    /// it is fresh, otherwise builds one before returning.
    pub fn with_store(
        provider: Arc<dyn HistoryProvider>,
        sink: Arc<dyn HistorySink>,
        config: EngineConfig,
    ) -> OmniResult<Self> {
        config.validate()?;
        init_rayon();

        let runtime = runtime_handle();
        let cache = Arc::new(CacheManager::new(
            Arc::clone(&provider),
            &config,
            runtime.clone(),
        ));
        cache.restore_or_build()?;

        let aggregator =
            WriteAggregator::start(sink, Arc::clone(&cache), &config.aggregator, &runtime);

        Ok(Self {
            provider,
            cache,
            aggregator,
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // SEARCH
    // ─────────────────────────────────────────────────────────────────────

    /// Ranked matches for `query`.
    ///
    /// Supports cancellation: dropping the future cancels the blocking work.
    pub async fn search(&self, query: &str, options: SearchOptions) -> OmniResult<SearchResult> {
        if query.trim().is_empty() {
            return Ok(SearchResult::empty(query, self.entry_count(), Duration::ZERO));
        }

        let token = CancellationToken::new();
        let _guard = DropGuard::new(token.clone());

        let provider = Arc::clone(&self.provider);
        let cache = Arc::clone(&self.cache);
        let config = self.cache.similarity();
        let query_owned = query.to_string();

        // runtime.spawn_blocking rather than tokio::task::spawn_blocking so
        // callers without a runtime still work
        let handle = runtime_handle().spawn_blocking(move || {
            run_search(provider.as_ref(), &cache, &config, &query_owned, &options, &token)
        });

        match handle.await {
            Ok(result) => result,
            // JoinError means the task panicked or was aborted
            Err(_join_error) => Err(OmniError::Cancelled),
        }
    }

    /// Synchronous search on the calling thread.
    pub fn search_blocking(&self, query: &str, options: &SearchOptions) -> OmniResult<SearchResult> {
        let config = self.cache.similarity();
        run_search(
            self.provider.as_ref(),
            &self.cache,
            &config,
            query,
            options,
            &CancellationToken::new(),
        )
    }

    /// Single highest-ranked match, if any.
    pub async fn best_match(&self, query: &str) -> OmniResult<Option<MatchCandidate>> {
        let options = SearchOptions {
            max_results: Some(1),
            ..SearchOptions::default()
        };
        let result = self.search(query, options).await?;
        Ok(result.matches.into_iter().next())
    }

    /// Matches scoring at least `min_score`, which replaces the configured
    /// threshold for this call only.
    pub async fn matches_above(
        &self,
        query: &str,
        min_score: f64,
    ) -> OmniResult<Vec<MatchCandidate>> {
        let options = SearchOptions {
            min_score: Some(min_score),
            ..SearchOptions::default()
        };
        Ok(self.search(query, options).await?.matches)
    }

    /// Most recent and most visited entries, for when nothing is typed yet.
    pub fn top_entries(&self, limit: usize) -> OmniResult<Vec<MatchCandidate>> {
        let snapshot = self.cache.current()?;
        let config = self.cache.similarity();
        Ok(snapshot.top_entries(limit, &config, Utc::now().timestamp()))
    }

    /// Entries whose host contains `domain`, ranked by similarity to it.
    pub fn search_by_domain(&self, domain: &str, limit: usize) -> OmniResult<Vec<MatchCandidate>> {
        let snapshot = self.cache.current()?;
        let config = self.cache.similarity();
        Ok(search::by_domain(&snapshot, domain, &config, limit, Utc::now().timestamp()))
    }

    /// Entries last visited strictly between `start` and `end` (unix
    /// seconds), ranked against `query`. A blank query lists the whole range.
    pub fn search_by_time_range(
        &self,
        query: &str,
        start: i64,
        end: i64,
    ) -> OmniResult<Vec<MatchCandidate>> {
        let snapshot = self.cache.current()?;
        let config = self.cache.similarity();
        let now = Utc::now().timestamp();
        Ok(search::in_time_range(&snapshot, query, start, end, &config, now))
    }

    /// Most visited entries, optionally restricted to those matching `filter`.
    pub fn top_visited(&self, limit: usize, filter: &str) -> OmniResult<Vec<MatchCandidate>> {
        let snapshot = self.cache.current()?;
        let config = self.cache.similarity();
        Ok(search::top_visited(&snapshot, limit, filter, &config, Utc::now().timestamp()))
    }

    /// Most recently visited entries read from the store, optionally
    /// restricted to those matching `filter`.
    pub fn recent(&self, limit: usize, filter: &str) -> OmniResult<Vec<MatchCandidate>> {
        let config = self.cache.similarity();
        search::recent(self.provider.as_ref(), limit, filter, &config, Utc::now().timestamp())
    }

    /// The stored record for `url`, including flushed visits not yet indexed.
    pub fn lookup(&self, url: &str) -> OmniResult<Option<HistoryRecord>> {
        self.provider.get_by_url(url)
    }

    // ─────────────────────────────────────────────────────────────────────
    // WRITES
    // ─────────────────────────────────────────────────────────────────────

    /// Queue a visit for batched writing.
    pub fn record_visit(&self, url: &str, title: &str) -> OmniResult<()> {
        self.aggregator.record_visit(url, title)
    }

    // ─────────────────────────────────────────────────────────────────────
    // CONFIG & CACHE CONTROL
    // ─────────────────────────────────────────────────────────────────────

    /// Replace the scoring config. Invalid configs are rejected and the
    /// previous one stays in effect. A new recency half-life also reorders
    /// the top-entry listing, via a background rebuild.
    pub fn update_config(&self, config: SimilarityConfig) -> OmniResult<()> {
        config.validate()?;
        tracing::debug!(?config, "similarity config updated");
        if self.cache.set_similarity(config) {
            let _ = self.cache.invalidate_and_refresh();
        }
        Ok(())
    }

    pub fn config(&self) -> SimilarityConfig {
        self.cache.similarity()
    }

    /// Rebuild the snapshot now, ignoring the refresh policy. Searches keep
    /// using the old snapshot until the rebuild completes. Returns `None`
    /// when a rebuild is already running.
    pub fn invalidate_and_refresh(&self) -> Option<JoinHandle<bool>> {
        self.cache.invalidate_and_refresh()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    pub fn aggregator_stats(&self) -> AggregatorStats {
        self.aggregator.stats()
    }

    fn entry_count(&self) -> usize {
        self.cache.peek().map(|s| s.len()).unwrap_or(0)
    }

    // ─────────────────────────────────────────────────────────────────────
    // LIFECYCLE
    // ─────────────────────────────────────────────────────────────────────

    /// Drain pending visits, rebuild if any write is not indexed yet, then
    /// save the snapshot. The drain and the rebuild are each bounded by
    /// `timeout`. No step failing is fatal; the report says what happened.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let mut report = self.aggregator.shutdown(timeout).await;

        if self.cache.persists() && self.cache.has_unindexed_writes() {
            report.snapshot_rebuilt = self.rebuild_for_exit(timeout).await;
        }
        report.snapshot_saved = self.cache.save();
        tracing::info!(
            flushed = report.flushed,
            timed_out = report.timed_out,
            snapshot_rebuilt = report.snapshot_rebuilt,
            snapshot_saved = report.snapshot_saved,
            "history engine shut down"
        );
        report
    }

    /// Rebuild so the saved snapshot includes the last visits. Falls back to
    /// saving the current snapshot when a rebuild is already running, fails
    /// or takes longer than `timeout`.
    async fn rebuild_for_exit(&self, timeout: Duration) -> bool {
        let Some(handle) = self.cache.invalidate_and_refresh() else {
            return false;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(rebuilt)) => rebuilt,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "exit rebuild ended abnormally");
                false
            }
            Err(_) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "exit rebuild timed out");
                false
            }
        }
    }
}

fn default_snapshot_path(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .map(|p| p.join(DEFAULT_SNAPSHOT_FILE))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SNAPSHOT_FILE))
}

/// Fuzzy searches need a snapshot and build one if none exists; exact-only
/// searches use whatever is cached.
fn run_search(
    provider: &dyn HistoryProvider,
    cache: &CacheManager,
    config: &SimilarityConfig,
    query: &str,
    options: &SearchOptions,
    token: &CancellationToken,
) -> OmniResult<SearchResult> {
    let snapshot = if options.fuzzy {
        Some(cache.current()?)
    } else {
        cache.peek()
    };
    let ctx = SearchContext {
        provider,
        snapshot: snapshot.as_deref(),
        config,
    };
    search::search_sync(&ctx, query, options, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryRecord, MatchedField};
    use crate::test_support::MemoryHistory;
    use std::sync::atomic::Ordering;

    fn engine_with(records: Vec<HistoryRecord>) -> HistorySearchEngine {
        let db = Arc::new(HistoryDatabase::open_in_memory().unwrap());
        for record in &records {
            db.insert_record(record).unwrap();
        }
        HistorySearchEngine::with_store(db.clone(), db, EngineConfig::default()).unwrap()
    }

    fn numbered_pages(n: i64) -> Vec<HistoryRecord> {
        let now = Utc::now().timestamp();
        (0..n)
            .map(|i| {
                HistoryRecord::new(i, format!("https://pages.example/item-{}", i))
                    .with_title(format!("Item number {} with some text content", i))
                    .with_visits(i % 7 + 1)
                    .with_last_visited(now - i * 60)
            })
            .collect()
    }

    #[test]
    fn test_engine_creation() {
        let engine = HistorySearchEngine::open_in_memory().unwrap();
        assert_eq!(engine.stats().entry_count, 0);
        assert_eq!(engine.cache_state(), CacheState::Ready);
    }

    #[test]
    fn test_invalid_config_rejected_at_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.similarity.max_results = 0;
        let result = HistorySearchEngine::open(dir.path().join("history.db"), config);
        assert!(matches!(result, Err(OmniError::Config(_))));
    }

    #[test]
    fn test_initial_build_failure_reaches_caller() {
        let store = Arc::new(MemoryHistory::sample());
        store.fail_reads.store(true, Ordering::SeqCst);
        let result = HistorySearchEngine::with_store(store.clone(), store, EngineConfig::default());
        assert!(matches!(result, Err(OmniError::Retrieval(_))));
    }

    #[test]
    fn test_update_config_keeps_previous_on_error() {
        let engine = HistorySearchEngine::open_in_memory().unwrap();
        let bad = SimilarityConfig {
            url_weight: -1.0,
            ..SimilarityConfig::default()
        };
        assert!(matches!(engine.update_config(bad), Err(OmniError::Config(_))));
        assert_eq!(engine.config(), SimilarityConfig::default());

        let good = SimilarityConfig {
            max_results: 5,
            ..SimilarityConfig::default()
        };
        engine.update_config(good.clone()).unwrap();
        assert_eq!(engine.config(), good);
    }

    #[test]
    fn test_search_blocking_respects_updated_config() {
        let engine = engine_with(numbered_pages(30));
        engine
            .update_config(SimilarityConfig {
                max_results: 4,
                ..SimilarityConfig::default()
            })
            .unwrap();
        let result = engine.search_blocking("item number", &SearchOptions::default()).unwrap();
        assert_eq!(result.matches.len(), 4);
        assert_eq!(result.total_entries, 30);
    }

    #[test]
    fn test_top_entries_prefers_recent_and_frequent() {
        let now = Utc::now().timestamp();
        let engine = engine_with(vec![
            HistoryRecord::new(1, "https://old.example")
                .with_visits(1)
                .with_last_visited(now - 90 * 86_400),
            HistoryRecord::new(2, "https://fresh.example")
                .with_visits(40)
                .with_last_visited(now - 60),
            HistoryRecord::new(3, "https://middle.example")
                .with_visits(3)
                .with_last_visited(now - 5 * 86_400),
        ]);

        let top = engine.top_entries(2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].record.url, "https://fresh.example");
        assert_eq!(top[1].record.url, "https://middle.example");
        assert!(top.iter().all(|m| m.matched_field == MatchedField::Recent));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        let guard = DropGuard::new(token.clone());
        assert!(!token.is_cancelled());

        drop(guard);
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_run_search_with_precancelled_token_returns_cancelled() {
        let engine = engine_with(numbered_pages(10));
        let token = CancellationToken::new();
        token.cancel();

        let config = engine.config();
        let result = run_search(
            engine.provider.as_ref(),
            &engine.cache,
            &config,
            "item",
            &SearchOptions::default(),
            &token,
        );
        assert!(matches!(result, Err(OmniError::Cancelled)));
    }

    #[tokio::test]
    async fn test_async_search_cancellation_via_drop() {
        let engine = engine_with(numbered_pages(100));

        // Start a search but drop it immediately
        let search_future = engine.search("Item", SearchOptions::default());
        drop(search_future);

        let result = engine.search("Item", SearchOptions::default()).await.unwrap();
        assert!(!result.matches.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_searches_independent() {
        let engine = Arc::new(engine_with(numbered_pages(50)));

        let e1 = engine.clone();
        let e2 = engine.clone();
        let e3 = engine.clone();

        let search1 = tokio::spawn(async move { e1.search("item", SearchOptions::default()).await });
        let search2 = tokio::spawn(async move { e2.search("number", SearchOptions::default()).await });
        let search3 = tokio::spawn(async move { e3.search("content", SearchOptions::default()).await });

        assert!(!search1.await.unwrap().unwrap().matches.is_empty());
        assert!(!search2.await.unwrap().unwrap().matches.is_empty());
        assert!(!search3.await.unwrap().unwrap().matches.is_empty());

        let result = engine.search("item", SearchOptions::default()).await.unwrap();
        assert!(!result.matches.is_empty());
    }

    #[tokio::test]
    async fn test_search_abort_doesnt_corrupt_engine() {
        let engine = Arc::new(engine_with(numbered_pages(20)));

        for _ in 0..5 {
            let engine_clone = engine.clone();
            let handle =
                tokio::spawn(async move { engine_clone.search("Item", SearchOptions::default()).await });
            handle.abort();
            // May complete or be aborted
            let _ = handle.await;
        }

        let result = engine.search("Item", SearchOptions::default()).await.unwrap();
        assert!(!result.matches.is_empty());
    }

    #[test]
    fn test_dropguard_cancels_on_panic() {
        let token = CancellationToken::new();
        let token_clone = token.clone();

        let result = std::panic::catch_unwind(|| {
            let _guard = DropGuard::new(token_clone);
            panic!("Intentional panic to test unwinding");
        });

        assert!(result.is_err());
        assert!(token.is_cancelled());
    }

    /// Callers with no tokio runtime of their own go through FALLBACK_RUNTIME.
    #[test]
    fn test_search_works_without_external_tokio_runtime() {
        let engine = engine_with(numbered_pages(5));

        let result = futures::executor::block_on(engine.search("Item", SearchOptions::default()));

        assert!(result.is_ok());
        assert!(!result.unwrap().matches.is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────
    // Writes and lifecycle
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_recorded_visits_searchable_after_refresh() {
        let engine = HistorySearchEngine::open_in_memory().unwrap();
        engine.record_visit("https://crates.io/crates/tokio", "tokio - crates.io").unwrap();
        engine.record_visit("https://docs.rs/rayon", "rayon - Rust").unwrap();

        let report = engine.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.flushed, 2);
        assert!(!report.timed_out);
        // In-memory engines have nowhere to save
        assert!(!report.snapshot_saved);

        let refreshed = engine.invalidate_and_refresh().unwrap().await.unwrap();
        assert!(refreshed);
        assert_eq!(engine.stats().entry_count, 2);

        let result = engine.search("tokio", SearchOptions::fuzzy_only()).await.unwrap();
        assert_eq!(result.matches[0].record.url, "https://crates.io/crates/tokio");
    }

    #[tokio::test]
    async fn test_empty_query_returns_empty_result() {
        let engine = engine_with(numbered_pages(3));
        let result = engine.search("   ", SearchOptions::default()).await.unwrap();
        assert!(result.matches.is_empty());
        assert_eq!(result.total_entries, 3);
    }

    #[tokio::test]
    async fn test_shutdown_saves_snapshot_next_to_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine =
            HistorySearchEngine::open(dir.path().join("history.db"), EngineConfig::default())
                .unwrap();
        engine.record_visit("https://github.com", "GitHub").unwrap();

        let report = engine.shutdown(Duration::from_secs(5)).await;
        assert!(report.snapshot_rebuilt);
        assert!(report.snapshot_saved);
        assert!(dir.path().join(DEFAULT_SNAPSHOT_FILE).exists());
        assert!(engine.stats().file_size.is_some());
        assert_eq!(engine.stats().entry_count, 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_new_visits_skips_rebuild() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine =
            HistorySearchEngine::open(dir.path().join("history.db"), EngineConfig::default())
                .unwrap();
        let builds = engine.cache.rebuild_count();

        let report = engine.shutdown(Duration::from_secs(5)).await;
        assert!(!report.snapshot_rebuilt);
        assert!(report.snapshot_saved);
        assert_eq!(engine.cache.rebuild_count(), builds);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Filtered listings
    // ─────────────────────────────────────────────────────────────────────

    fn sites() -> Vec<HistoryRecord> {
        let now = Utc::now().timestamp();
        vec![
            HistoryRecord::new(1, "https://github.com/tokio-rs/tokio")
                .with_title("tokio-rs/tokio")
                .with_visits(40)
                .with_last_visited(now - 3_600),
            HistoryRecord::new(2, "https://gist.github.com/snippets")
                .with_title("Gists")
                .with_visits(3)
                .with_last_visited(now - 2 * 86_400),
            HistoryRecord::new(3, "https://docs.rs/tokio")
                .with_title("tokio - Rust")
                .with_visits(12)
                .with_last_visited(now - 600),
            HistoryRecord::new(4, "https://www.rust-lang.org")
                .with_title("Rust Programming Language")
                .with_visits(7)
                .with_last_visited(now - 40 * 86_400),
        ]
    }

    fn sorted_urls(matches: &[MatchCandidate]) -> Vec<&str> {
        let mut urls: Vec<&str> = matches.iter().map(|m| m.record.url.as_str()).collect();
        urls.sort_unstable();
        urls
    }

    #[test]
    fn test_search_by_domain_filters_on_host() {
        let engine = engine_with(sites());

        let hits = engine.search_by_domain("GitHub", 10).unwrap();
        assert_eq!(
            sorted_urls(&hits),
            vec!["https://gist.github.com/snippets", "https://github.com/tokio-rs/tokio"]
        );
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        assert_eq!(engine.search_by_domain("github", 1).unwrap().len(), 1);
        assert!(engine.search_by_domain("  ", 10).unwrap().is_empty());
        assert!(engine.search_by_domain("gitlab", 10).unwrap().is_empty());
    }

    #[test]
    fn test_search_by_time_range() {
        let engine = engine_with(sites());
        let now = Utc::now().timestamp();

        let last_day = engine.search_by_time_range("", now - 86_400, now + 60).unwrap();
        assert_eq!(
            sorted_urls(&last_day),
            vec!["https://docs.rs/tokio", "https://github.com/tokio-rs/tokio"]
        );
        assert!(last_day.iter().all(|m| m.matched_field == MatchedField::Recent));

        let older = engine
            .search_by_time_range("", now - 30 * 86_400, now - 86_400)
            .unwrap();
        assert_eq!(sorted_urls(&older), vec!["https://gist.github.com/snippets"]);

        let tokio = engine.search_by_time_range("tokio", now - 86_400, now + 60).unwrap();
        assert!(!tokio.is_empty());
        assert!(tokio.iter().all(|m| m.has_text_match()));

        // Bounds are exclusive
        let record_time = engine.lookup("https://docs.rs/tokio").unwrap().unwrap().last_visited;
        let t = record_time.unwrap();
        assert!(engine.search_by_time_range("", t, t + 1).unwrap().is_empty());
    }

    #[test]
    fn test_top_visited_orders_by_visit_count() {
        let engine = engine_with(sites());

        let top = engine.top_visited(2, "").unwrap();
        let urls: Vec<&str> = top.iter().map(|m| m.record.url.as_str()).collect();
        assert_eq!(urls, vec!["https://github.com/tokio-rs/tokio", "https://docs.rs/tokio"]);
        assert!(top.iter().all(|m| m.matched_field == MatchedField::Frequent));
        assert!((top[0].score - top[0].visit_score).abs() < 1e-12);

        let rust = engine.top_visited(10, "rust").unwrap();
        let urls: Vec<&str> = rust.iter().map(|m| m.record.url.as_str()).collect();
        assert!(urls.contains(&"https://docs.rs/tokio"));
        assert!(urls.contains(&"https://www.rust-lang.org"));
        for pair in rust.windows(2) {
            assert!(pair[0].record.visit_count >= pair[1].record.visit_count);
        }
    }

    #[tokio::test]
    async fn test_recent_reads_visits_not_yet_indexed() {
        let engine = engine_with(sites());
        engine.shutdown(Duration::from_secs(5)).await;

        // Written straight through, below the rebuild threshold
        engine.record_visit("https://new.example/page", "New page").unwrap();
        assert_eq!(engine.stats().entry_count, 4);

        let recent = engine.recent(2, "").unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].record.url, "https://new.example/page");
        assert_eq!(recent[1].record.url, "https://docs.rs/tokio");
        assert!(recent
            .iter()
            .all(|m| m.matched_field == MatchedField::Recent && m.score == 1.0));

        let filtered = engine.recent(3, "tokio").unwrap();
        assert!(!filtered.is_empty() && filtered.len() <= 3);
        assert!(filtered.iter().all(|m| m.has_text_match()));
        assert!(engine.recent(0, "").unwrap().is_empty());

        let stored = engine.lookup("https://new.example/page").unwrap().unwrap();
        assert_eq!(stored.visit_count, 1);
        assert_eq!(stored.title.as_deref(), Some("New page"));
        assert!(engine.lookup("https://absent.example").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_best_match_and_score_floor() {
        let engine = engine_with(sites());

        let best = engine.best_match("tokio").await.unwrap().unwrap();
        let full = engine.search("tokio", SearchOptions::default()).await.unwrap();
        assert_eq!(best.record.url, full.matches[0].record.url);
        assert!(engine.best_match("   ").await.unwrap().is_none());

        let strong = engine.matches_above("tokio", 0.9).await.unwrap();
        assert!(!strong.is_empty());
        assert!(strong.iter().all(|m| m.score >= 0.9));
        assert!(strong.len() <= full.matches.len());

        assert!(matches!(
            engine.matches_above("tokio", 1.5).await,
            Err(OmniError::Config(_))
        ));
    }

    #[test]
    fn test_half_life_update_reorders_top_entries() {
        let now = Utc::now().timestamp();
        let engine = engine_with(vec![
            HistoryRecord::new(1, "https://heavy.example")
                .with_visits(1_000)
                .with_last_visited(now - 60 * 86_400),
            HistoryRecord::new(2, "https://fresh.example")
                .with_visits(1)
                .with_last_visited(now - 86_400),
        ]);
        assert_eq!(engine.top_entries(1).unwrap()[0].record.url, "https://fresh.example");

        engine
            .update_config(SimilarityConfig {
                recency_half_life_days: 1_000.0,
                ..SimilarityConfig::default()
            })
            .unwrap();

        // The reorder lands with the background rebuild
        let mut top = engine.top_entries(1).unwrap();
        for _ in 0..100 {
            if top[0].record.url == "https://heavy.example" {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
            top = engine.top_entries(1).unwrap();
        }
        assert_eq!(top[0].record.url, "https://heavy.example");
    }
}
