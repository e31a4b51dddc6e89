//! Generate a synthetic browser history database for benchmarks.
//!
//! Uses the crate's own `HistoryDatabase`, so the schema always matches
//! what the engine reads.
//!
//! Usage:
//!     cargo run --release --bin generate-history-db -- --count 20000 --db-path history.sqlite

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use omnirank::database::HistoryDatabase;
use omnirank::models::HistoryRecord;
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::PathBuf;

const DEFAULT_COUNT: usize = 5_000;

const DAY: i64 = 86_400;

/// Visits are spread over this many days.
const HISTORY_SPAN_DAYS: i64 = 180;

/// (host, site name) pairs for realistic URLs and titles
const SITES: &[(&str, &str)] = &[
    ("github.com", "GitHub"),
    ("docs.rs", "Docs.rs"),
    ("crates.io", "crates.io: Rust Package Registry"),
    ("stackoverflow.com", "Stack Overflow"),
    ("news.ycombinator.com", "Hacker News"),
    ("en.wikipedia.org", "Wikipedia"),
    ("developer.mozilla.org", "MDN Web Docs"),
    ("golang.org", "The Go Programming Language"),
    ("www.rust-lang.org", "Rust Programming Language"),
    ("www.youtube.com", "YouTube"),
    ("mail.google.com", "Gmail"),
    ("www.reddit.com", "Reddit"),
    ("arxiv.org", "arXiv.org e-Print archive"),
    ("localhost:8080", "Local dev server"),
];

const TOPICS: &[&str] = &[
    "async", "tokio", "rayon", "sqlite", "trigram", "fuzzy", "search", "ranking",
    "parser", "serde", "tracing", "benchmark", "cache", "snapshot", "iterator",
    "lifetime", "borrow", "trait", "closure", "channel", "mutex", "atomic",
    "history", "browser", "address", "completion", "index", "release", "issue",
];

const PATH_KINDS: &[&str] = &["issues", "pull", "wiki", "questions", "docs", "blog", "watch", "r"];

fn random_record<R: Rng>(rng: &mut R, id: i64, now: i64) -> HistoryRecord {
    let (host, site) = SITES[rng.gen_range(0..SITES.len())];
    let kind = PATH_KINDS.choose(rng).copied().unwrap_or("docs");
    let word_count = rng.gen_range(1..=3);
    let words: Vec<&str> = TOPICS.choose_multiple(rng, word_count).copied().collect();

    let scheme = if host.starts_with("localhost") { "http" } else { "https" };
    let url = format!("{}://{}/{}/{}-{}", scheme, host, kind, words.join("-"), id);
    let title = format!("{} - {}", words.join(" "), site);

    // Skew visit counts toward a few heavily used pages
    let visits = if rng.gen_bool(0.05) {
        rng.gen_range(50..=1_500)
    } else {
        rng.gen_range(1..=12)
    };
    let age = rng.gen_range(0..HISTORY_SPAN_DAYS * DAY);

    let mut record = HistoryRecord::new(id, url)
        .with_visits(visits)
        .with_last_visited(now - age);
    // Some pages never report a title
    if !rng.gen_bool(0.08) {
        record = record.with_title(title);
    }
    record.created_at = now - age - rng.gen_range(0..30 * DAY);
    record
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of history records to generate
    #[arg(short, long, default_value_t = DEFAULT_COUNT)]
    count: usize,

    /// Output database path (replaced if it exists)
    #[arg(short, long, default_value = "benches/synthetic_history.sqlite")]
    db_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let output_path = args.db_path;

    if output_path.exists() {
        std::fs::remove_file(&output_path)
            .with_context(|| format!("Failed to remove {}", output_path.display()))?;
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    println!("Generating synthetic history database...");
    println!("Output: {}", output_path.display());

    let db = HistoryDatabase::open(&output_path).context("Failed to create database")?;
    let mut rng = rand::thread_rng();
    let now = Utc::now().timestamp();

    for i in 0..args.count {
        let record = random_record(&mut rng, i as i64 + 1, now);
        db.insert_record(&record).context("Failed to insert record")?;

        if (i + 1) % 1_000 == 0 {
            println!("  Generated {}/{} records...", i + 1, args.count);
        }
    }

    println!();
    println!("Database created: {}", output_path.display());
    println!("  Records: {}", db.count_records()?);
    println!(
        "  Size: {:.2} MB",
        db.database_size()? as f64 / 1024.0 / 1024.0
    );
    Ok(())
}
