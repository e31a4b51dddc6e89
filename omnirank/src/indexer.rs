//! In-memory candidate index over a frozen copy of the history store.
//!
//! A `CacheSnapshot` owns every record it was built from, char-trigram
//! postings over `url + " " + title`, a sorted word table for prefix
//! lookups, and a slot list pre-sorted for the empty-query listing.
//! Snapshots are immutable; the cache manager replaces them wholesale.

use crate::config::SimilarityConfig;
use crate::models::{HistoryRecord, MatchCandidate};
use crate::ranking::{compare_candidates, top_entry, top_entry_score};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Upper bound on slots handed to the scorer for one query.
pub const MAX_CANDIDATES: usize = 1000;

/// Queries shorter than this (in chars) have no trigrams and always scan.
pub const MIN_TRIGRAM_QUERY_LEN: usize = 3;

/// Index of a record inside its snapshot.
pub type Slot = u32;

/// Char trigrams of `text`, lowercased, deduplicated, in first-seen order.
///
/// Trigrams made only of whitespace and punctuation are skipped since nearly
/// every URL contains `://` and `.co`-style noise.
pub fn extract_trigrams(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if chars.len() < 3 {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut trigrams = Vec::with_capacity(chars.len() - 2);
    for window in chars.windows(3) {
        if !window.iter().any(|c| c.is_alphanumeric()) {
            continue;
        }
        let trigram: String = window.iter().collect();
        if seen.insert(trigram.clone()) {
            trigrams.push(trigram);
        }
    }
    trigrams
}

/// Shortest word kept in the prefix table, and shortest query word looked up.
pub const MIN_PREFIX_LEN: usize = 2;

/// Lowercased alphanumeric words of `text`, at least `MIN_PREFIX_LEN` chars.
/// URL schemes and a leading `www.` are dropped first.
pub fn extract_words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let stripped = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let stripped = stripped.strip_prefix("www.").unwrap_or(stripped);

    stripped
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_PREFIX_LEN)
        .map(str::to_string)
        .collect()
}

/// Which records the scorer should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidates {
    /// Slots that share enough trigrams with the query, best first.
    Narrowed(Vec<Slot>),
    /// No usable trigram hit; scan from the front of the snapshot.
    FullScan(usize),
}

impl Candidates {
    pub fn len(&self) -> usize {
        match self {
            Candidates::Narrowed(slots) => slots.len(),
            Candidates::FullScan(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_slots(self) -> Vec<Slot> {
        match self {
            Candidates::Narrowed(slots) => slots,
            Candidates::FullScan(n) => (0..n as Slot).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheSnapshot {
    records: Vec<HistoryRecord>,
    postings: HashMap<String, Vec<Slot>>,
    /// Sorted by word so a prefix maps to one contiguous range.
    words: Vec<(String, Vec<Slot>)>,
    top_slots: Vec<Slot>,
    as_of: i64,
    store_fingerprint: u32,
}

impl CacheSnapshot {
    pub fn empty(as_of: i64) -> Self {
        Self {
            as_of,
            ..Default::default()
        }
    }

    /// Build with the default scoring config. `as_of` is unix seconds.
    pub fn build(records: Vec<HistoryRecord>, as_of: i64) -> Self {
        Self::build_with_config(records, as_of, &SimilarityConfig::default())
    }

    /// Build postings, the word table and the top-entry ordering. The
    /// ordering uses `config`'s recency half-life.
    pub fn build_with_config(
        records: Vec<HistoryRecord>,
        as_of: i64,
        config: &SimilarityConfig,
    ) -> Self {
        let mut postings: HashMap<String, Vec<Slot>> = HashMap::new();
        for (slot, record) in records.iter().enumerate() {
            for trigram in extract_trigrams(&record.index_text()) {
                // Slots are visited in order, so each list stays sorted
                postings.entry(trigram).or_default().push(slot as Slot);
            }
        }

        let words = build_word_table(&records);
        let top_slots = rank_top_slots(&records, as_of, config);

        Self {
            records,
            postings,
            words,
            top_slots,
            as_of,
            store_fingerprint: 0,
        }
    }

    /// Tag the snapshot with the store state it was built from.
    pub fn with_store_fingerprint(mut self, fingerprint: u32) -> Self {
        self.store_fingerprint = fingerprint;
        self
    }

    /// Reassemble a snapshot from persisted parts. The word table is rebuilt
    /// from the records. Returns `None` if any slot points past the record list.
    pub(crate) fn from_parts(
        records: Vec<HistoryRecord>,
        postings: HashMap<String, Vec<Slot>>,
        top_slots: Vec<Slot>,
        as_of: i64,
    ) -> Option<Self> {
        let n = records.len();
        let in_range = |s: &Slot| (*s as usize) < n;
        if !top_slots.iter().all(in_range) || !postings.values().flatten().all(in_range) {
            return None;
        }
        let words = build_word_table(&records);
        Some(Self {
            records,
            postings,
            words,
            top_slots,
            as_of,
            store_fingerprint: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn as_of(&self) -> i64 {
        self.as_of
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    pub fn record(&self, slot: Slot) -> Option<&HistoryRecord> {
        self.records.get(slot as usize)
    }

    pub fn trigram_count(&self) -> usize {
        self.postings.len()
    }

    pub fn store_fingerprint(&self) -> u32 {
        self.store_fingerprint
    }

    pub(crate) fn postings(&self) -> &HashMap<String, Vec<Slot>> {
        &self.postings
    }

    pub(crate) fn top_slots(&self) -> &[Slot] {
        &self.top_slots
    }

    /// Narrow the snapshot to records worth scoring for `query`.
    ///
    /// A slot qualifies when it shares at least `min(2, query_trigrams)`
    /// trigrams with the query, or when one of its words starts with a query
    /// word. Trigram hits come first, ordered by shared-trigram count then
    /// slot, followed by prefix-only hits in slot order. Capped at
    /// `MAX_CANDIDATES`.
    pub fn candidates(&self, query: &str) -> Candidates {
        let full_scan = Candidates::FullScan(self.records.len().min(MAX_CANDIDATES));

        let query = query.trim();
        if query.chars().count() < MIN_TRIGRAM_QUERY_LEN {
            return full_scan;
        }
        let query_trigrams = extract_trigrams(query);
        let prefix_hits = self.prefix_slots(query);
        if query_trigrams.is_empty() && prefix_hits.is_empty() {
            return full_scan;
        }

        let mut hits: HashMap<Slot, u32> = HashMap::new();
        for trigram in &query_trigrams {
            if let Some(slots) = self.postings.get(trigram) {
                for &slot in slots {
                    *hits.entry(slot).or_insert(0) += 1;
                }
            }
        }

        let min_hits = query_trigrams.len().min(2) as u32;
        let mut ranked: Vec<(Slot, u32)> = hits
            .into_iter()
            .filter(|(_, count)| *count >= min_hits)
            .collect();

        if ranked.is_empty() && prefix_hits.is_empty() {
            return full_scan;
        }

        ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let mut slots: Vec<Slot> = ranked.into_iter().map(|(slot, _)| slot).collect();
        let trigram_hits: BTreeSet<Slot> = slots.iter().copied().collect();
        slots.extend(prefix_hits.into_iter().filter(|slot| !trigram_hits.contains(slot)));
        slots.truncate(MAX_CANDIDATES);
        Candidates::Narrowed(slots)
    }

    /// Slots with a word starting with any query word, ascending.
    pub fn prefix_slots(&self, query: &str) -> BTreeSet<Slot> {
        let mut found = BTreeSet::new();
        for word in extract_words(query) {
            let start = self.words.partition_point(|(w, _)| w.as_str() < word.as_str());
            for (_, slots) in self.words[start..]
                .iter()
                .take_while(|(w, _)| w.starts_with(word.as_str()))
            {
                found.extend(slots.iter().copied());
            }
        }
        found
    }

    /// Most recent and most visited records, scored for the empty-query listing.
    pub fn top_entries(
        &self,
        limit: usize,
        config: &SimilarityConfig,
        now: i64,
    ) -> Vec<MatchCandidate> {
        let mut entries: Vec<MatchCandidate> = self
            .top_slots
            .iter()
            .take(limit)
            .filter_map(|&slot| self.record(slot))
            .map(|record| top_entry(record, config, now))
            .collect();
        entries.sort_by(compare_candidates);
        entries
    }
}

fn build_word_table(records: &[HistoryRecord]) -> Vec<(String, Vec<Slot>)> {
    let mut table: BTreeMap<String, Vec<Slot>> = BTreeMap::new();
    for (slot, record) in records.iter().enumerate() {
        let slot = slot as Slot;
        let title_words = record.title_str().map(extract_words).unwrap_or_default();
        for word in extract_words(&record.url).into_iter().chain(title_words) {
            let slots = table.entry(word).or_default();
            // A word repeated within one record is listed once
            if slots.last() != Some(&slot) {
                slots.push(slot);
            }
        }
    }
    table.into_iter().collect()
}

/// Slots ordered by the recency/visit blend as of build time.
fn rank_top_slots(records: &[HistoryRecord], as_of: i64, config: &SimilarityConfig) -> Vec<Slot> {
    let scores: Vec<f64> = records
        .iter()
        .map(|record| top_entry_score(record, config, as_of))
        .collect();
    let mut slots: Vec<Slot> = (0..records.len() as Slot).collect();
    slots.sort_by(|&a, &b| {
        let (ra, rb) = (&records[a as usize], &records[b as usize]);
        scores[b as usize]
            .total_cmp(&scores[a as usize])
            .then_with(|| rb.visit_count.cmp(&ra.visit_count))
            .then_with(|| ra.url.cmp(&rb.url))
    });
    slots
}
