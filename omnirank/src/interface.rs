//! omnirank public interface
//!
//! Shared result types, the error taxonomy, and the two seams to the durable
//! history store: `HistoryProvider` (reads) and `HistorySink` (batched writes).

use crate::config::ConfigError;
use crate::models::{HistoryRecord, MatchCandidate, VisitEvent};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// SEARCH RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-call switches for the two retrieval passes.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Run the indexed substring lookup against the store.
    pub exact: bool,
    /// Run the fuzzy pass over the cached snapshot.
    pub fuzzy: bool,
    /// Apply the literal/domain/short-URL multipliers after merging.
    pub boosts: bool,
    /// Upper bound on store rows fetched by the exact pass.
    pub exact_limit: usize,
    /// Overrides `SimilarityConfig::max_results` downward when set.
    pub max_results: Option<usize>,
    /// Replaces `SimilarityConfig::min_score_threshold` for this call.
    pub min_score: Option<f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            exact: true,
            fuzzy: true,
            boosts: true,
            exact_limit: 10,
            max_results: None,
            min_score: None,
        }
    }
}

impl SearchOptions {
    pub fn fuzzy_only() -> Self {
        Self {
            exact: false,
            ..Self::default()
        }
    }

    pub fn exact_only() -> Self {
        Self {
            fuzzy: false,
            ..Self::default()
        }
    }
}

/// Search result container
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub query: String,
    /// Number of records in the snapshot the fuzzy pass ran against.
    pub total_entries: usize,
    pub match_count: usize,
    pub matches: Vec<MatchCandidate>,
    pub elapsed: Duration,
}

impl SearchResult {
    pub fn empty(query: impl Into<String>, total_entries: usize, elapsed: Duration) -> Self {
        Self {
            query: query.into(),
            total_entries,
            match_count: 0,
            matches: Vec::new(),
            elapsed,
        }
    }
}

/// Cache statistics for diagnostics tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub trigram_count: usize,
    /// Unix seconds of the snapshot currently served.
    pub last_built_unix: i64,
    /// Size of the persisted snapshot on disk, if one exists.
    pub file_size: Option<u64>,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Entries: {}, Trigrams: {}, File: {} bytes, Built: {}",
            self.entry_count,
            self.trigram_count,
            self.file_size.unwrap_or(0),
            self.last_built_unix
        )
    }
}

/// Outcome of a bounded shutdown drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Visit events flushed during the drain.
    pub flushed: usize,
    /// The drain hit its deadline before the queue emptied.
    pub timed_out: bool,
    /// Unindexed visits were folded into a fresh snapshot before saving.
    pub snapshot_rebuilt: bool,
    /// The snapshot was written to disk.
    pub snapshot_saved: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Error type for omnirank operations.
///
/// Only configuration errors and a failed initial build (nothing cached to
/// fall back on) ever reach search callers; everything else is recovered
/// inside the engine.
#[derive(Debug, Error)]
pub enum OmniError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Retrieval error: {0}")]
    Retrieval(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Operation cancelled")]
    Cancelled,
}

pub type OmniResult<T> = Result<T, OmniError>;

impl From<crate::database::DatabaseError> for OmniError {
    fn from(e: crate::database::DatabaseError) -> Self {
        OmniError::Retrieval(e.to_string())
    }
}

impl From<crate::snapshot_file::SnapshotError> for OmniError {
    fn from(e: crate::snapshot_file::SnapshotError) -> Self {
        OmniError::Persistence(e.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// Read side of the durable history store. The engine treats it as the
/// source of truth and never writes through it.
pub trait HistoryProvider: Send + Sync {
    /// Every record, most recently visited first.
    fn get_all(&self) -> OmniResult<Vec<HistoryRecord>>;

    /// The `limit` most recently visited records.
    fn get_recent(&self, limit: usize) -> OmniResult<Vec<HistoryRecord>>;

    /// Indexed case-insensitive substring lookup on URL and title.
    fn search_exact(&self, pattern: &str, limit: usize) -> OmniResult<Vec<HistoryRecord>>;

    fn get_by_url(&self, url: &str) -> OmniResult<Option<HistoryRecord>>;

    /// Number of records in the store.
    fn count(&self) -> OmniResult<usize> {
        Ok(self.get_all()?.len())
    }
}

/// Write side of the durable history store, fed only by the write aggregator.
pub trait HistorySink: Send + Sync {
    /// Insert the URL or bump its visit count and last-visited time.
    fn add_or_update(&self, url: &str, title: &str) -> OmniResult<()>;

    /// Flush a batch in order. Returns how many events were written.
    fn add_or_update_batch(&self, events: &[VisitEvent]) -> OmniResult<usize> {
        for event in events {
            self.add_or_update(&event.url, &event.title)?;
        }
        Ok(events.len())
    }
}
