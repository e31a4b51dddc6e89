//! Search orchestration (exact pass + fuzzy pass + merge)
//!
//! 1. Exact pass: indexed substring lookup in the store. Hits score 1.0.
//! 2. Fuzzy pass: trigram-narrowed candidates from the cached snapshot,
//!    scored in parallel with rayon and gated by the score threshold.
//! 3. Merge: fuzzy hits already returned by the exact pass are dropped,
//!    boosts applied, then sorted and truncated.
//!
//! Runs on a blocking thread. Cancellation is checked between passes and
//! inside the parallel scoring loop.
//!
//! The filtered listings at the bottom (domain, time range, most visited,
//! recent) skip the trigram narrowing and filter the whole snapshot.

use crate::config::{ConfigError, SimilarityConfig};
use crate::indexer::CacheSnapshot;
use crate::interface::{HistoryProvider, OmniError, OmniResult, SearchOptions, SearchResult};
use crate::models::{HistoryRecord, MatchCandidate, MatchedField};
use crate::ranking::{apply_boosts, compare_candidates, host_of, top_entry, QueryScorer};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::HashSet;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything one search call reads. The snapshot is `None` only when the
/// fuzzy pass is disabled and no snapshot has been built yet.
pub(crate) struct SearchContext<'a> {
    pub provider: &'a dyn HistoryProvider,
    pub snapshot: Option<&'a CacheSnapshot>,
    pub config: &'a SimilarityConfig,
}

pub(crate) fn search_sync(
    ctx: &SearchContext<'_>,
    query: &str,
    options: &SearchOptions,
    token: &CancellationToken,
) -> OmniResult<SearchResult> {
    let start = Instant::now();
    let total_entries = ctx.snapshot.map(|s| s.len()).unwrap_or(0);

    let threshold = options.min_score.unwrap_or(ctx.config.min_score_threshold);
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::ThresholdOutOfRange(threshold).into());
    }

    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Ok(SearchResult::empty(query, total_entries, start.elapsed()));
    }
    if token.is_cancelled() {
        return Err(OmniError::Cancelled);
    }

    let scorer = QueryScorer::new(trimmed, ctx.config, Utc::now().timestamp());

    #[cfg(feature = "perf-log")]
    let t0 = Instant::now();
    let exact = if options.exact {
        exact_pass(ctx.provider, &scorer, options.exact_limit)
    } else {
        Vec::new()
    };

    if token.is_cancelled() {
        return Err(OmniError::Cancelled);
    }

    #[cfg(feature = "perf-log")]
    let t1 = Instant::now();
    let fuzzy = match ctx.snapshot {
        Some(snapshot) if options.fuzzy => {
            fuzzy_pass(snapshot, &scorer, threshold, token)?
        }
        _ => Vec::new(),
    };

    #[cfg(feature = "perf-log")]
    let (exact_count, fuzzy_count) = (exact.len(), fuzzy.len());

    let mut matches = merge(exact, fuzzy);
    if options.boosts {
        apply_boosts(trimmed, &mut matches);
    }
    matches.sort_by(compare_candidates);

    let limit = options
        .max_results
        .map_or(ctx.config.max_results, |max| max.min(ctx.config.max_results));
    matches.truncate(limit);

    #[cfg(feature = "perf-log")]
    eprintln!(
        "[perf] exact={:.1}ms fuzzy={:.1}ms exact_hits={} fuzzy_hits={} returned={}",
        (t1 - t0).as_secs_f64() * 1000.0,
        t1.elapsed().as_secs_f64() * 1000.0,
        exact_count,
        fuzzy_count,
        matches.len(),
    );

    Ok(SearchResult {
        query: query.to_string(),
        total_entries,
        match_count: matches.len(),
        matches,
        elapsed: start.elapsed(),
    })
}

/// Store substring hits. A failing store yields no hits rather than an error.
fn exact_pass(
    provider: &dyn HistoryProvider,
    scorer: &QueryScorer<'_>,
    limit: usize,
) -> Vec<MatchCandidate> {
    if limit == 0 {
        return Vec::new();
    }
    match provider.search_exact(scorer.query(), limit) {
        Ok(records) => records
            .iter()
            .map(|record| {
                let mut candidate = scorer.score(record);
                candidate.score = 1.0;
                candidate.matched_field = MatchedField::Exact;
                candidate
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "exact pass failed, continuing with fuzzy results only");
            Vec::new()
        }
    }
}

fn fuzzy_pass(
    snapshot: &CacheSnapshot,
    scorer: &QueryScorer<'_>,
    threshold: f64,
    token: &CancellationToken,
) -> OmniResult<Vec<MatchCandidate>> {
    let slots = snapshot.candidates(scorer.query()).into_slots();

    let matches: Vec<MatchCandidate> = slots
        .par_iter()
        .take_any_while(|_| !token.is_cancelled())
        .filter_map(|&slot| snapshot.record(slot))
        .map(|record| scorer.score(record))
        .filter(|candidate| candidate.has_text_match() && candidate.score >= threshold)
        .collect();

    // take_any_while stops early on cancel; a partial set must not be returned
    if token.is_cancelled() {
        return Err(OmniError::Cancelled);
    }
    Ok(matches)
}

/// Exact hits first, then fuzzy hits for URLs not seen yet.
fn merge(exact: Vec<MatchCandidate>, fuzzy: Vec<MatchCandidate>) -> Vec<MatchCandidate> {
    let mut seen: HashSet<String> = HashSet::with_capacity(exact.len() + fuzzy.len());
    let mut merged = Vec::with_capacity(exact.len() + fuzzy.len());
    for candidate in exact.into_iter().chain(fuzzy) {
        if seen.insert(candidate.record.url.clone()) {
            merged.push(candidate);
        }
    }
    merged
}

// ─────────────────────────────────────────────────────────────────────────────
// FILTERED LISTINGS
// ─────────────────────────────────────────────────────────────────────────────

/// Scored record if it mentions `scorer`'s query closely enough.
fn text_match(
    scorer: &QueryScorer<'_>,
    record: &HistoryRecord,
    threshold: f64,
) -> Option<MatchCandidate> {
    let candidate = scorer.score(record);
    (candidate.has_text_match() && candidate.score >= threshold).then_some(candidate)
}

/// Records whose host contains `domain`, scored against the domain text.
pub(crate) fn by_domain(
    snapshot: &CacheSnapshot,
    domain: &str,
    config: &SimilarityConfig,
    limit: usize,
    now: i64,
) -> Vec<MatchCandidate> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return Vec::new();
    }
    let scorer = QueryScorer::new(&domain, config, now);

    let mut matches: Vec<MatchCandidate> = snapshot
        .records()
        .par_iter()
        .filter(|record| host_of(&record.url).is_some_and(|host| host.contains(&domain)))
        .map(|record| scorer.score(record))
        .filter(|candidate| candidate.score >= config.min_score_threshold)
        .collect();
    matches.sort_by(compare_candidates);
    matches.truncate(limit);
    matches
}

/// Records last visited strictly between `start` and `end` (unix seconds).
/// A blank query lists them by recency and visits instead of scoring text.
pub(crate) fn in_time_range(
    snapshot: &CacheSnapshot,
    query: &str,
    start: i64,
    end: i64,
    config: &SimilarityConfig,
    now: i64,
) -> Vec<MatchCandidate> {
    let in_range = |record: &&HistoryRecord| {
        record
            .last_visited
            .is_some_and(|ts| ts > start && ts < end)
    };
    let records = snapshot.records().par_iter().filter(in_range);

    let mut matches: Vec<MatchCandidate> = if query.trim().is_empty() {
        records.map(|record| top_entry(record, config, now)).collect()
    } else {
        let scorer = QueryScorer::new(query, config, now);
        records
            .filter_map(|record| text_match(&scorer, record, config.min_score_threshold))
            .collect()
    };
    matches.sort_by(compare_candidates);
    matches.truncate(config.max_results);
    matches
}

/// Most visited records first. With a filter, only records matching it are
/// listed; the order stays by visit count.
pub(crate) fn top_visited(
    snapshot: &CacheSnapshot,
    limit: usize,
    filter: &str,
    config: &SimilarityConfig,
    now: i64,
) -> Vec<MatchCandidate> {
    let mut matches: Vec<MatchCandidate> = if filter.trim().is_empty() {
        snapshot
            .records()
            .par_iter()
            .map(|record| {
                let mut candidate = top_entry(record, config, now);
                candidate.score = candidate.visit_score;
                candidate.matched_field = MatchedField::Frequent;
                candidate
            })
            .collect()
    } else {
        let scorer = QueryScorer::new(filter, config, now);
        snapshot
            .records()
            .par_iter()
            .filter_map(|record| text_match(&scorer, record, config.min_score_threshold))
            .collect()
    };
    matches.sort_by(|a, b| {
        b.record
            .visit_count
            .cmp(&a.record.visit_count)
            .then_with(|| b.record.last_visited.cmp(&a.record.last_visited))
            .then_with(|| a.record.url.cmp(&b.record.url))
    });
    matches.truncate(limit);
    matches
}

/// Most recently visited records straight from the store, so visits that
/// are flushed but not yet indexed show up. A blank filter lists them in
/// visit order with full score.
pub(crate) fn recent(
    provider: &dyn HistoryProvider,
    limit: usize,
    filter: &str,
    config: &SimilarityConfig,
    now: i64,
) -> OmniResult<Vec<MatchCandidate>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    if filter.trim().is_empty() {
        let records = provider.get_recent(limit)?;
        return Ok(records
            .iter()
            .map(|record| {
                let mut candidate = top_entry(record, config, now);
                candidate.score = 1.0;
                candidate
            })
            .collect());
    }

    // Over-fetch so filtering still leaves enough to fill the page
    let records = provider.get_recent(limit.saturating_mul(2))?;
    let scorer = QueryScorer::new(filter, config, now);
    let mut matches: Vec<MatchCandidate> = records
        .iter()
        .filter_map(|record| text_match(&scorer, record, config.min_score_threshold))
        .collect();
    matches.sort_by(compare_candidates);
    matches.truncate(limit);
    Ok(matches)
}
