//! omnirank - fuzzy match-and-rank engine for browser history
//!
//! Answers address-bar queries against previously visited pages. An
//! in-memory trigram snapshot of the history store is scored with a blend
//! of string similarity, recency and visit frequency, and is rebuilt in the
//! background as new visits arrive.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod database;
pub mod indexer;
pub mod interface;
pub mod models;
pub mod ranking;
pub mod refresh;
mod search;
pub mod similarity;
pub mod snapshot_file;
mod store;

#[cfg(test)]
mod test_support;

pub use cache::{CacheState, RestoreOutcome};
pub use config::{AggregatorConfig, ConfigError, EngineConfig, SimilarityConfig};
pub use database::HistoryDatabase;
pub use interface::*;
pub use models::{HistoryRecord, MatchCandidate, MatchedField, VisitEvent};
pub use refresh::RefreshPolicy;
pub use store::HistorySearchEngine;
