use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

use e2e_tests::{book, library_bindings, TestHarness};
use sync_engine::{BulkIndexConfig, CountingMonitor, LocalTransaction};
use sync_types::{EntitySnapshot, EntityType, Settings, WorkItem};

const GENRES: &[&str] = &["sf", "crime", "poetry", "classic", "drama", "history"];
const WORDS: &[&str] = &[
    "spice", "desert", "harbor", "winter", "engine", "garden", "signal", "archive", "river",
    "lantern", "orbit", "citadel",
];

#[derive(Parser, Debug)]
#[command(name = "bulk_bench", about = "Index synchronization throughput benchmark")]
struct Args {
    /// Books to load
    #[arg(long, default_value_t = 10_000)]
    books: usize,
    /// Entities per bulk batch
    #[arg(long, default_value_t = 1000)]
    batch_size: usize,
    /// Transactions to commit after the bulk load
    #[arg(long, default_value_t = 50)]
    transactions: usize,
    /// Work items per transaction
    #[arg(long, default_value_t = 20)]
    per_transaction: usize,
    /// Seed for the synthetic corpus
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Config file; the index base path is always a temp directory
    #[arg(long)]
    config: Option<PathBuf>,
    /// Merge segments after the bulk load
    #[arg(long)]
    optimize: bool,
}

#[derive(Debug, Serialize)]
struct BenchReport {
    backend: String,
    books: u64,
    bulk_batches: u64,
    bulk_ms: u64,
    bulk_docs_per_sec: f64,
    transactions: usize,
    transactional_ms: u64,
    documents_added: u64,
    documents_removed: u64,
}

fn synthetic_books(count: usize, rng: &mut StdRng) -> Vec<EntitySnapshot> {
    (0..count)
        .map(|i| {
            let title: Vec<&str> = (0..3).map(|_| WORDS[rng.random_range(0..WORDS.len())]).collect();
            let genre = GENRES[rng.random_range(0..GENRES.len())];
            book(&i.to_string(), &title.join(" "), genre)
        })
        .collect()
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.batch_size == 0 {
        bail!("--batch-size must be > 0");
    }

    let config_path = args.config.as_ref().map(|p| p.to_string_lossy().to_string());
    let settings = Settings::load(config_path.as_deref()).context("Failed to load configuration")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let harness = TestHarness::new();
    let settings = Settings {
        index_base_path: harness.index_path.to_string_lossy().to_string(),
        ..settings
    };
    let backend = settings.backend.clone();
    let monitor = std::sync::Arc::new(CountingMonitor::new());
    let (builder, _factory) = harness.builder(settings);
    let integrator = library_bindings()
        .into_iter()
        .fold(builder.monitor(monitor.clone()), |builder, binding| builder.bind(binding))
        .build()
        .context("Failed to build search integrator")?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let corpus = synthetic_books(args.books, &mut rng);
    info!(books = corpus.len(), backend = %backend, "Starting bulk load");

    let stats = integrator
        .bulk_indexer(BulkIndexConfig {
            batch_size: args.batch_size,
            purge_first: true,
            optimize_after: args.optimize,
        })
        .run(&EntityType::new("Book"), corpus)
        .context("Bulk load failed")?;

    let worker = integrator.worker();
    let started = Instant::now();
    for t in 0..args.transactions {
        let tx = LocalTransaction::begin();
        for _ in 0..args.per_transaction {
            let id = rng.random_range(0..args.books.max(1)).to_string();
            let item = if rng.random_bool(0.2) {
                WorkItem::delete_by_id("Book", id.as_str())
            } else {
                let genre = GENRES[rng.random_range(0..GENRES.len())];
                WorkItem::update(book(&id, "revised edition", genre))
            };
            worker
                .perform_work(item, &*tx)
                .with_context(|| format!("Failed to submit work in transaction {}", t))?;
        }
        tx.commit()
            .with_context(|| format!("Failed to commit transaction {}", t))?;
    }
    let transactional_ms = started.elapsed().as_millis() as u64;

    integrator.close().context("Failed to close search integrator")?;

    let bulk_secs = (stats.elapsed_ms as f64 / 1000.0).max(f64::EPSILON);
    let report = BenchReport {
        backend,
        books: stats.entities,
        bulk_batches: stats.batches,
        bulk_ms: stats.elapsed_ms,
        bulk_docs_per_sec: stats.entities as f64 / bulk_secs,
        transactions: args.transactions,
        transactional_ms,
        documents_added: monitor.added(),
        documents_removed: monitor.removed(),
    };
    println!(
        "{:<12} {:>10} {:>10} {:>14}",
        "phase", "items", "ms", "items/sec"
    );
    println!(
        "{:<12} {:>10} {:>10} {:>14.1}",
        "bulk", report.books, report.bulk_ms, report.bulk_docs_per_sec
    );
    let tx_items = (args.transactions * args.per_transaction) as f64;
    println!(
        "{:<12} {:>10} {:>10} {:>14.1}",
        "transaction",
        args.transactions * args.per_transaction,
        report.transactional_ms,
        tx_items / (report.transactional_ms as f64 / 1000.0).max(f64::EPSILON)
    );
    println!(
        "\n{}",
        serde_json::to_string_pretty(&report).context("Failed to render report")?
    );
    Ok(())
}
