//! Composite scoring for history records.
//!
//! Each record gets four component scores in `[0, 1]`:
//! 1. url: best of affine similarity and positional substring against the URL
//! 2. title: the same against the title, 0 when there is none
//! 3. recency: exponential decay over days since the last visit
//! 4. visit: log-scaled visit count, saturating at 1000 visits
//!
//! The combined score is their weighted sum. A post-pass (`apply_boosts`)
//! then multiplies in small bonuses for literal URL hits, domain hits, and
//! short URLs.

use crate::config::SimilarityConfig;
use crate::models::{HistoryRecord, MatchCandidate, MatchedField};
use crate::similarity::{affine_similarity, substring_score};

/// Visit count at which the visit score saturates.
const VISIT_SATURATION: f64 = 1000.0;

pub const LITERAL_URL_BOOST: f64 = 1.2;
pub const DOMAIN_MATCH_BOOST: f64 = 1.15;
pub const SHORT_URL_BOOST: f64 = 1.05;

/// URLs shorter than this (in bytes) get `SHORT_URL_BOOST`.
pub const SHORT_URL_LEN: usize = 50;

/// Blend used to rank entries when there is no query text.
const TOP_RECENCY_WEIGHT: f64 = 0.7;
const TOP_VISIT_WEIGHT: f64 = 0.3;

/// Per-query scorer. Normalizes the query once so the hot loop only
/// lowercases record fields.
#[derive(Debug, Clone)]
pub struct QueryScorer<'a> {
    query: String,
    config: &'a SimilarityConfig,
    now: i64,
}

impl<'a> QueryScorer<'a> {
    pub fn new(query: &str, config: &'a SimilarityConfig, now: i64) -> Self {
        Self {
            query: query.trim().to_lowercase(),
            config,
            now,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn score(&self, record: &HistoryRecord) -> MatchCandidate {
        let url_score = text_score(&self.query, &record.url.to_lowercase());
        let title_score = record
            .title_str()
            .map(|t| text_score(&self.query, &t.to_lowercase()))
            .unwrap_or(0.0);
        let recency_score = recency_score(record, self.config.recency_half_life_days, self.now);
        let visit_score = visit_score(record.visit_count);

        let score = self.config.url_weight * url_score
            + self.config.title_weight * title_score
            + self.config.recency_weight * recency_score
            + self.config.visit_weight * visit_score;

        MatchCandidate {
            record: record.clone(),
            url_score,
            title_score,
            recency_score,
            visit_score,
            score,
            matched_field: matched_field(url_score, title_score),
        }
    }
}

/// Score a single record. Prefer `QueryScorer` when scoring many records.
pub fn score_record(
    query: &str,
    record: &HistoryRecord,
    config: &SimilarityConfig,
    now: i64,
) -> MatchCandidate {
    QueryScorer::new(query, config, now).score(record)
}

fn text_score(query: &str, text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    affine_similarity(query, text).max(substring_score(query, text))
}

/// `exp(-days / half_life)`. Records never visited score 0.
pub fn recency_score(record: &HistoryRecord, half_life_days: f64, now: i64) -> f64 {
    match record.days_since_visit(now) {
        Some(days) => (-days / half_life_days).exp(),
        None => 0.0,
    }
}

/// `ln(1 + visits) / ln(1 + 1000)`, capped at 1.
pub fn visit_score(visit_count: i64) -> f64 {
    if visit_count <= 0 {
        return 0.0;
    }
    ((visit_count as f64).ln_1p() / VISIT_SATURATION.ln_1p()).min(1.0)
}

fn matched_field(url_score: f64, title_score: f64) -> MatchedField {
    match (url_score > 0.0, title_score > 0.0) {
        (true, true) => MatchedField::Both,
        (true, false) => MatchedField::Url,
        _ => MatchedField::Title,
    }
}

/// Recency/visit blend used when there is no query text.
pub fn top_entry_score(record: &HistoryRecord, config: &SimilarityConfig, now: i64) -> f64 {
    TOP_RECENCY_WEIGHT * recency_score(record, config.recency_half_life_days, now)
        + TOP_VISIT_WEIGHT * visit_score(record.visit_count)
}

/// Candidate for the empty-query listing. Only recency and visits count.
pub fn top_entry(record: &HistoryRecord, config: &SimilarityConfig, now: i64) -> MatchCandidate {
    MatchCandidate {
        record: record.clone(),
        url_score: 0.0,
        title_score: 0.0,
        recency_score: recency_score(record, config.recency_half_life_days, now),
        visit_score: visit_score(record.visit_count),
        score: top_entry_score(record, config, now),
        matched_field: MatchedField::Recent,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// BOOSTS
// ─────────────────────────────────────────────────────────────────────────────

/// Multiplicative post-pass over merged results. The three boosts stack.
pub fn apply_boosts(query: &str, candidates: &mut [MatchCandidate]) {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return;
    }
    for candidate in candidates.iter_mut() {
        candidate.score *= boost_factor(&query, &candidate.record.url);
    }
}

/// Combined multiplier for one URL. `query` must already be lowercased.
pub fn boost_factor(query: &str, url: &str) -> f64 {
    let mut factor = 1.0;
    if url.to_lowercase().contains(query) {
        factor *= LITERAL_URL_BOOST;
    }
    if is_domain_match(query, url) {
        factor *= DOMAIN_MATCH_BOOST;
    }
    if url.len() < SHORT_URL_LEN {
        factor *= SHORT_URL_BOOST;
    }
    factor
}

/// Host portion of a URL, lowercased. Falls back to manual splitting for
/// scheme-less input like `github.com/rust-lang`.
pub(crate) fn host_of(raw: &str) -> Option<String> {
    if let Ok(parsed) = url::Url::parse(raw) {
        if let Some(host) = parsed.host_str() {
            return Some(host.to_lowercase());
        }
    }

    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    let host = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Whether `query` names the URL's host or one of its dot-separated labels.
pub fn is_domain_match(query: &str, url: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return false;
    }
    let Some(host) = host_of(url) else {
        return false;
    };

    host == query
        || host.ends_with(&format!(".{}", query))
        || host.starts_with(&format!("{}.", query))
        || host.split('.').any(|label| label == query)
}

/// Ranking order: score descending, then more visits, then URL.
pub fn compare_candidates(a: &MatchCandidate, b: &MatchCandidate) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.record.visit_count.cmp(&a.record.visit_count))
        .then_with(|| a.record.url.cmp(&b.record.url))
}
