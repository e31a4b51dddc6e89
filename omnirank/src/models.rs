//! Core data models for omnirank
//!
//! `HistoryRecord` is the read-only copy of one row of the durable history
//! store. `MatchCandidate` is produced fresh for every query and never
//! persisted.

use serde::{Deserialize, Serialize};

/// Seconds per day, used for recency decay and day arithmetic.
pub const SECS_PER_DAY: f64 = 86_400.0;

// ─────────────────────────────────────────────────────────────────────────────
// HISTORY RECORD
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable snapshot of one visited resource.
///
/// Timestamps are unix seconds. `last_visited == None` means the store never
/// recorded a visit time for this URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub visit_count: i64,
    pub last_visited: Option<i64>,
    pub created_at: i64,
}

impl HistoryRecord {
    pub fn new(id: i64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: None,
            visit_count: 0,
            last_visited: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_visits(mut self, visit_count: i64) -> Self {
        self.visit_count = visit_count;
        self
    }

    pub fn with_last_visited(mut self, unix: i64) -> Self {
        self.last_visited = Some(unix);
        self
    }

    /// Title if present and non-empty.
    pub fn title_str(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }

    /// Text fed to the trigram index: URL and title, lowercased.
    pub(crate) fn index_text(&self) -> String {
        match self.title_str() {
            Some(title) => format!("{} {}", self.url, title).to_lowercase(),
            None => self.url.to_lowercase(),
        }
    }

    /// Days elapsed since the last visit, clamped at zero for clock skew.
    pub fn days_since_visit(&self, now: i64) -> Option<f64> {
        self.last_visited
            .map(|ts| ((now - ts).max(0)) as f64 / SECS_PER_DAY)
    }
}

/// A single page-visit event accepted by the write aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitEvent {
    pub url: String,
    pub title: String,
}

impl VisitEvent {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MATCH CANDIDATE
// ─────────────────────────────────────────────────────────────────────────────

/// Which field(s) produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedField {
    Url,
    Title,
    Both,
    /// Returned by the indexed substring pass against the store.
    Exact,
    /// Returned by the empty-query and recent listings.
    Recent,
    /// Returned by the unfiltered most-visited listing.
    Frequent,
}

impl MatchedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchedField::Url => "url",
            MatchedField::Title => "title",
            MatchedField::Both => "both",
            MatchedField::Exact => "exact",
            MatchedField::Recent => "recent",
            MatchedField::Frequent => "frequent",
        }
    }
}

impl std::fmt::Display for MatchedField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored record for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub record: HistoryRecord,
    pub url_score: f64,
    pub title_score: f64,
    pub recency_score: f64,
    pub visit_score: f64,
    /// Weighted sum of the four components, plus any ranking boosts.
    pub score: f64,
    pub matched_field: MatchedField,
}

impl MatchCandidate {
    /// Whether either text field contributed to the score.
    pub fn has_text_match(&self) -> bool {
        self.url_score > 0.0 || self.title_score > 0.0
    }
}
