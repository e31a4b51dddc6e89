//! Cache manager: owns the current `CacheSnapshot` and decides when to
//! replace it.
//!
//! Concurrency Model:
//! - The snapshot lives behind `RwLock<Option<Arc<CacheSnapshot>>>`; readers
//!   clone the `Arc` and release the lock immediately
//! - The first reader with no snapshot builds synchronously under `build_lock`;
//!   concurrent first readers wait on that lock and then see the result
//! - Rebuilds run on the tokio blocking pool, at most one at a time
//!   (`rebuilding` flag); the old snapshot is served until the swap
//!
//! Each snapshot carries a fingerprint of the store's most recent rows,
//! taken before the records are read. A persisted snapshot is only restored
//! while the store still produces the same fingerprint.

use crate::config::{EngineConfig, SimilarityConfig};
use crate::indexer::CacheSnapshot;
use crate::interface::{CacheStats, HistoryProvider, OmniResult};
use crate::models::HistoryRecord;
use crate::refresh::{RefreshPolicy, RefreshState};
use crate::snapshot_file;
use crc32fast::Hasher as Crc32Hasher;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Most recent store rows folded into a snapshot's fingerprint.
pub const FINGERPRINT_ROWS: usize = 20;

/// Observable lifecycle of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing built yet.
    Empty,
    /// First build in progress; readers wait for it.
    Building,
    Ready,
    /// A rebuild is running while the previous snapshot is still served.
    Refreshing,
}

/// Why a persisted snapshot was not used at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored { entries: usize },
    Disabled,
    Missing,
    Expired { age_secs: i64 },
    Stale { snapshot_entries: usize, store_entries: usize },
    /// Same or fewer records, but recent rows were revisited or retitled.
    Changed { snapshot_fingerprint: u32, store_fingerprint: u32 },
    Invalid(String),
}

struct CacheShared {
    provider: Arc<dyn HistoryProvider>,
    /// Scoring config the top-entry ordering is built with.
    similarity: RwLock<SimilarityConfig>,
    snapshot: RwLock<Option<Arc<CacheSnapshot>>>,
    refresh: Mutex<RefreshState>,
    rebuilding: AtomicBool,
    rebuild_count: AtomicU64,
}

impl CacheShared {
    fn build(&self) -> OmniResult<CacheSnapshot> {
        let config = self.similarity.read().clone();
        build_snapshot(self.provider.as_ref(), &config)
    }

    fn swap(&self, snapshot: CacheSnapshot) -> Arc<CacheSnapshot> {
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write() = Some(Arc::clone(&snapshot));
        self.refresh.lock().reset(Instant::now());
        self.rebuild_count.fetch_add(1, Ordering::SeqCst);
        snapshot
    }
}

/// Clears the single-flight flag even if the rebuild panics.
struct RebuildGuard {
    shared: Arc<CacheShared>,
}

impl Drop for RebuildGuard {
    fn drop(&mut self) {
        self.shared.rebuilding.store(false, Ordering::SeqCst);
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// CRC over url, title, visit count and last visit of `records`, in order.
pub fn store_fingerprint(records: &[HistoryRecord]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    for record in records {
        hasher.update(record.url.as_bytes());
        hasher.update(&[0]);
        hasher.update(record.title_str().unwrap_or("").as_bytes());
        hasher.update(&[0]);
        hasher.update(&record.visit_count.to_le_bytes());
        hasher.update(&record.last_visited.unwrap_or(-1).to_le_bytes());
    }
    hasher.finalize()
}

/// Fetch every record and index it.
fn build_snapshot(
    provider: &dyn HistoryProvider,
    config: &SimilarityConfig,
) -> OmniResult<CacheSnapshot> {
    let start = Instant::now();
    // Fingerprint first: a write landing between the two reads makes the
    // snapshot look older than it is, never newer
    let fingerprint = store_fingerprint(&provider.get_recent(FINGERPRINT_ROWS)?);
    let records = provider.get_all()?;
    let snapshot = CacheSnapshot::build_with_config(records, now_unix(), config)
        .with_store_fingerprint(fingerprint);
    tracing::info!(
        entries = snapshot.len(),
        trigrams = snapshot.trigram_count(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "history snapshot built"
    );
    Ok(snapshot)
}

pub struct CacheManager {
    shared: Arc<CacheShared>,
    build_lock: Mutex<()>,
    initial_building: AtomicBool,
    policy: RefreshPolicy,
    snapshot_path: Option<PathBuf>,
    snapshot_ttl: Duration,
    runtime: tokio::runtime::Handle,
}

impl CacheManager {
    pub fn new(
        provider: Arc<dyn HistoryProvider>,
        config: &EngineConfig,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            shared: Arc::new(CacheShared {
                provider,
                similarity: RwLock::new(config.similarity.clone()),
                snapshot: RwLock::new(None),
                refresh: Mutex::new(RefreshState::new(Instant::now())),
                rebuilding: AtomicBool::new(false),
                rebuild_count: AtomicU64::new(0),
            }),
            build_lock: Mutex::new(()),
            initial_building: AtomicBool::new(false),
            policy: config.refresh.clone(),
            snapshot_path: config.snapshot_path.clone(),
            snapshot_ttl: config.snapshot_ttl(),
            runtime,
        }
    }

    pub fn state(&self) -> CacheState {
        let has_snapshot = self.shared.snapshot.read().is_some();
        match (has_snapshot, self.shared.rebuilding.load(Ordering::SeqCst)) {
            (true, true) => CacheState::Refreshing,
            (true, false) => CacheState::Ready,
            (false, _) if self.initial_building.load(Ordering::SeqCst) => CacheState::Building,
            (false, _) => CacheState::Empty,
        }
    }

    /// Completed builds and rebuilds, including the initial one.
    pub fn rebuild_count(&self) -> u64 {
        self.shared.rebuild_count.load(Ordering::SeqCst)
    }

    pub fn refresh_state(&self) -> RefreshState {
        *self.shared.refresh.lock()
    }

    /// Writes counted since the served snapshot was built.
    pub fn has_unindexed_writes(&self) -> bool {
        self.shared.refresh.lock().writes_since_rebuild > 0
    }

    pub fn persists(&self) -> bool {
        self.snapshot_path.is_some()
    }

    pub fn similarity(&self) -> SimilarityConfig {
        self.shared.similarity.read().clone()
    }

    /// Replace the scoring config. Returns whether the recency half-life
    /// changed, which makes the served top-entry ordering out of date.
    pub fn set_similarity(&self, config: SimilarityConfig) -> bool {
        let mut current = self.shared.similarity.write();
        let reorder = current.recency_half_life_days != config.recency_half_life_days;
        *current = config;
        reorder
    }

    /// Snapshot currently served, without triggering a build.
    pub fn peek(&self) -> Option<Arc<CacheSnapshot>> {
        self.shared.snapshot.read().clone()
    }

    /// Current snapshot. Builds it synchronously if none exists yet.
    ///
    /// Fails only when there is no snapshot and the store cannot be read.
    pub fn current(&self) -> OmniResult<Arc<CacheSnapshot>> {
        if let Some(snapshot) = self.peek() {
            return Ok(snapshot);
        }

        let _build = self.build_lock.lock();
        // Another caller may have finished the build while we waited
        if let Some(snapshot) = self.peek() {
            return Ok(snapshot);
        }

        self.initial_building.store(true, Ordering::SeqCst);
        let result = self.shared.build();
        self.initial_building.store(false, Ordering::SeqCst);
        Ok(self.shared.swap(result?))
    }

    // ─────────────────────────────────────────────────────────────────────
    // STARTUP RESTORE
    // ─────────────────────────────────────────────────────────────────────

    /// Load the persisted snapshot if it passes the freshness checks,
    /// otherwise build from the store.
    pub fn restore_or_build(&self) -> OmniResult<Arc<CacheSnapshot>> {
        match self.try_restore(now_unix()) {
            RestoreOutcome::Restored { entries } => {
                tracing::info!(entries, "restored history snapshot from disk");
            }
            outcome => {
                tracing::info!(?outcome, "snapshot not restored, building from store");
            }
        }
        self.current()
    }

    /// Attempt a restore as of `now` (unix seconds). Swaps the snapshot in on
    /// success and leaves the cache untouched otherwise.
    pub fn try_restore(&self, now: i64) -> RestoreOutcome {
        let Some(path) = self.snapshot_path.as_deref() else {
            return RestoreOutcome::Disabled;
        };
        if !path.exists() {
            return RestoreOutcome::Missing;
        }

        let header = match snapshot_file::read_header(path) {
            Ok(header) => header,
            Err(e) => return RestoreOutcome::Invalid(e.to_string()),
        };

        let age_secs = now - header.as_of;
        if age_secs < 0 || age_secs as u64 >= self.snapshot_ttl.as_secs() {
            return RestoreOutcome::Expired { age_secs };
        }

        // A store holding more records than the snapshot has moved on since
        // the save. A store we cannot count does not block the restore.
        let snapshot_entries = header.entry_count as usize;
        match self.shared.provider.count() {
            Ok(store_entries) if store_entries > snapshot_entries => {
                return RestoreOutcome::Stale {
                    snapshot_entries,
                    store_entries,
                };
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not count store records during restore"),
        }

        // Revisits and title updates leave the count alone
        match self.shared.provider.get_recent(FINGERPRINT_ROWS) {
            Ok(recent) => {
                let current = store_fingerprint(&recent);
                if current != header.store_fingerprint {
                    return RestoreOutcome::Changed {
                        snapshot_fingerprint: header.store_fingerprint,
                        store_fingerprint: current,
                    };
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not fingerprint store during restore"),
        }

        match snapshot_file::load(path) {
            Ok(snapshot) => {
                let entries = snapshot.len();
                self.shared.swap(snapshot);
                RestoreOutcome::Restored { entries }
            }
            Err(e) => RestoreOutcome::Invalid(e.to_string()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // REFRESH
    // ─────────────────────────────────────────────────────────────────────

    /// Count `n` new store writes and rebuild if the policy is now due.
    pub fn record_writes(&self, n: u64) -> Option<JoinHandle<bool>> {
        if n == 0 {
            return None;
        }
        self.shared.refresh.lock().record_writes(n);
        self.maybe_refresh()
    }

    pub fn maybe_refresh(&self) -> Option<JoinHandle<bool>> {
        self.maybe_refresh_at(Instant::now())
    }

    /// Policy check against an explicit clock reading.
    pub fn maybe_refresh_at(&self, now: Instant) -> Option<JoinHandle<bool>> {
        let due = self.shared.refresh.lock().is_due(&self.policy, now);
        if !due {
            return None;
        }
        self.spawn_rebuild()
    }

    /// Rebuild regardless of the policy. The current snapshot keeps being
    /// served until the new one is ready.
    pub fn invalidate_and_refresh(&self) -> Option<JoinHandle<bool>> {
        self.spawn_rebuild()
    }

    /// Start a background rebuild unless one is already running. The handle
    /// resolves to whether a new snapshot was swapped in.
    fn spawn_rebuild(&self) -> Option<JoinHandle<bool>> {
        if self
            .shared
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("rebuild already in flight, skipping trigger");
            return None;
        }

        let guard = RebuildGuard {
            shared: Arc::clone(&self.shared),
        };
        Some(self.runtime.spawn_blocking(move || {
            let shared = Arc::clone(&guard.shared);
            match shared.build() {
                Ok(snapshot) => {
                    shared.swap(snapshot);
                    true
                }
                Err(e) => {
                    tracing::warn!(error = %e, "history rebuild failed, keeping previous snapshot");
                    false
                }
            }
        }))
    }

    // ─────────────────────────────────────────────────────────────────────
    // PERSISTENCE
    // ─────────────────────────────────────────────────────────────────────

    /// Best-effort save of the current snapshot. Failures are logged.
    pub fn save(&self) -> bool {
        let Some(path) = self.snapshot_path.as_deref() else {
            return false;
        };
        let Some(snapshot) = self.peek() else {
            return false;
        };
        match snapshot_file::save(path, &snapshot) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist history snapshot");
                false
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let (entry_count, trigram_count, last_built_unix) = match self.peek() {
            Some(s) => (s.len(), s.trigram_count(), s.as_of()),
            None => (0, 0, 0),
        };
        let file_size = self
            .snapshot_path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len());
        CacheStats {
            entry_count,
            trigram_count,
            last_built_unix,
            file_size,
        }
    }
}
