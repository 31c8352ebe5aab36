//! End-to-end test infrastructure for index synchronization.
//!
//! Provides a shared TestHarness that wires a [`SearchIntegrator`] to real
//! Tantivy units under a temp directory, plus a small library domain
//! (books, authors, reviews) used across the E2E tests.

use std::path::PathBuf;
use std::sync::Arc;

use sync_engine::{
    EntityBinding, FieldShardingStrategy, IdHashShardingStrategy, NotShardedStrategy,
    SearchIntegrator, SearchIntegratorBuilder,
};
use sync_tantivy::{StoredDocument, TantivyBackendFactory, UnitSearcher, UnitStorage, RAM_BACKEND};
use sync_types::{EntityKey, EntitySnapshot, IndexUnitId, Settings};

/// Shards of the `Book` index.
pub const BOOK_SHARDS: usize = 2;

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Root of every file-backed unit
    pub index_path: PathBuf,
}

impl TestHarness {
    /// Create a new test harness with a temp index directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let index_path = temp_dir.path().join("indexes");
        std::fs::create_dir_all(&index_path).expect("Failed to create index dir");
        Self {
            _temp_dir: temp_dir,
            index_path,
        }
    }

    /// File-backed Tantivy settings rooted in the temp directory.
    pub fn settings(&self) -> Settings {
        Settings::default()
            .with_backend("tantivy")
            .with_index_base_path(self.index_path.to_string_lossy().to_string())
    }

    /// Builder with the Tantivy backends registered under `settings.backend`.
    pub fn builder(&self, settings: Settings) -> (SearchIntegratorBuilder, TantivyBackendFactory) {
        let storage = if settings.backend == RAM_BACKEND {
            UnitStorage::Ram
        } else {
            UnitStorage::Directory
        };
        let factory = TantivyBackendFactory::new(storage);
        let backend = settings.backend.clone();
        let mut builder = SearchIntegrator::builder(settings);
        builder.backends_mut().register(backend, factory.clone());
        (builder, factory)
    }

    /// Library domain on Tantivy units.
    pub fn library(&self, settings: Settings) -> Library {
        let (builder, factory) = self.builder(settings);
        let integrator = library_bindings()
            .into_iter()
            .fold(builder, |builder, binding| builder.bind(binding))
            .build()
            .expect("Failed to build integrator");
        Library {
            integrator,
            factory,
            index_path: self.index_path.clone(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Books sharded by id, authors in one unit, reviews embedded in books.
pub fn library_bindings() -> Vec<EntityBinding> {
    vec![
        EntityBinding::indexed("Book", Arc::new(IdHashShardingStrategy::new("Book", BOOK_SHARDS))),
        EntityBinding::indexed("Author", Arc::new(NotShardedStrategy::new("Author"))),
        EntityBinding::contained_only("Review").with_contained_in("book", Some(1)),
    ]
}

/// Books sharded by genre.
pub fn genre_sharded_bindings() -> Vec<EntityBinding> {
    vec![EntityBinding::indexed(
        "Book",
        Arc::new(FieldShardingStrategy::new("genre", "Book", BOOK_SHARDS)),
    )]
}

/// A running integrator plus handles on its Tantivy units.
pub struct Library {
    pub integrator: SearchIntegrator,
    pub factory: TantivyBackendFactory,
    pub index_path: PathBuf,
}

impl Library {
    /// Searcher over one unit, reloaded to the latest commit.
    pub fn searcher(&self, unit: &str) -> UnitSearcher {
        let backend = self
            .factory
            .backend(&IndexUnitId::new(unit))
            .unwrap_or_else(|| panic!("No backend for unit {}", unit));
        let searcher = backend.searcher().expect("Failed to open searcher");
        searcher.reload().expect("Failed to reload searcher");
        searcher
    }

    /// Live documents in one unit.
    pub fn count(&self, unit: &str) -> u64 {
        self.searcher(unit).count().expect("Failed to count documents")
    }

    /// Live documents across every book shard.
    pub fn book_count(&self) -> u64 {
        (0..BOOK_SHARDS)
            .map(|n| self.count(IndexUnitId::shard("Book", n).as_str()))
            .sum()
    }

    /// Find a document in whichever unit holds it.
    pub fn find(&self, key: &EntityKey) -> Option<(IndexUnitId, StoredDocument)> {
        self.integrator.units().ids().iter().find_map(|unit| {
            self.searcher(unit.as_str())
                .get(key)
                .expect("Failed to read document")
                .map(|doc| (unit.clone(), doc))
        })
    }
}

/// A book snapshot.
pub fn book(id: &str, title: &str, genre: &str) -> EntitySnapshot {
    EntitySnapshot::new("Book", id)
        .with_field("title", title)
        .with_field("genre", genre)
}

/// An author snapshot.
pub fn author(id: &str, name: &str) -> EntitySnapshot {
    EntitySnapshot::new("Author", id).with_field("name", name)
}

/// A review embedded in `book`.
pub fn review(id: &str, text: &str, book: EntitySnapshot) -> EntitySnapshot {
    EntitySnapshot::new("Review", id)
        .with_field("text", text)
        .contained_in("book", book)
}

/// N books with sequential ids and titles.
pub fn create_test_books(count: usize, genre: &str) -> Vec<EntitySnapshot> {
    (0..count)
        .map(|i| book(&i.to_string(), &format!("Volume {}", i), genre))
        .collect()
}
