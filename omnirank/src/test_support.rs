//! In-memory history store for unit tests.

use crate::interface::{HistoryProvider, HistorySink, OmniError, OmniResult};
use crate::models::HistoryRecord;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
pub(crate) struct MemoryHistory {
    records: Mutex<Vec<HistoryRecord>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub get_all_calls: AtomicUsize,
    pub single_writes: AtomicUsize,
    pub batch_writes: AtomicUsize,
}

impl MemoryHistory {
    pub fn with_records(records: Vec<HistoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Default::default()
        }
    }

    /// GitHub visited an hour ago, Go docs visited yesterday.
    pub fn sample() -> Self {
        Self::with_records(vec![
            HistoryRecord::new(1, "https://github.com")
                .with_title("GitHub")
                .with_visits(25)
                .with_last_visited(chrono::Utc::now().timestamp() - 3_600),
            HistoryRecord::new(2, "https://golang.org")
                .with_title("The Go Programming Language")
                .with_visits(5)
                .with_last_visited(chrono::Utc::now().timestamp() - 86_400),
        ])
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.url.clone()).collect()
    }

    pub fn push(&self, record: HistoryRecord) {
        self.records.lock().push(record);
    }

    fn check_reads(&self) -> OmniResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(OmniError::Retrieval("store offline".into()));
        }
        Ok(())
    }

    fn upsert(&self, url: &str, title: &str) -> OmniResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(OmniError::Retrieval("store read-only".into()));
        }
        let now = chrono::Utc::now().timestamp();
        let mut records = self.records.lock();
        if let Some(existing) = records.iter_mut().find(|r| r.url == url) {
            existing.visit_count += 1;
            existing.last_visited = Some(now);
            if !title.is_empty() {
                existing.title = Some(title.to_string());
            }
        } else {
            let id = records.len() as i64 + 1;
            let mut record = HistoryRecord::new(id, url).with_visits(1).with_last_visited(now);
            if !title.is_empty() {
                record.title = Some(title.to_string());
            }
            records.push(record);
        }
        Ok(())
    }
}

impl HistoryProvider for MemoryHistory {
    fn get_all(&self) -> OmniResult<Vec<HistoryRecord>> {
        self.check_reads()?;
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.lock().clone())
    }

    fn get_recent(&self, limit: usize) -> OmniResult<Vec<HistoryRecord>> {
        self.check_reads()?;
        let mut records = self.records.lock().clone();
        records.sort_by(|a, b| b.last_visited.cmp(&a.last_visited));
        records.truncate(limit);
        Ok(records)
    }

    fn search_exact(&self, pattern: &str, limit: usize) -> OmniResult<Vec<HistoryRecord>> {
        self.check_reads()?;
        let pattern = pattern.to_lowercase();
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| {
                r.url.to_lowercase().contains(&pattern)
                    || r.title_str().is_some_and(|t| t.to_lowercase().contains(&pattern))
            })
            .take(limit)
            .cloned()
            .collect())
    }

    fn get_by_url(&self, url: &str) -> OmniResult<Option<HistoryRecord>> {
        self.check_reads()?;
        Ok(self.records.lock().iter().find(|r| r.url == url).cloned())
    }

    fn count(&self) -> OmniResult<usize> {
        self.check_reads()?;
        Ok(self.len())
    }
}

impl HistorySink for MemoryHistory {
    fn add_or_update(&self, url: &str, title: &str) -> OmniResult<()> {
        self.upsert(url, title)?;
        self.single_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn add_or_update_batch(&self, events: &[crate::models::VisitEvent]) -> OmniResult<usize> {
        for event in events {
            self.upsert(&event.url, &event.title)?;
        }
        self.batch_writes.fetch_add(1, Ordering::SeqCst);
        Ok(events.len())
    }
}
