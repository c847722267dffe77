//! Schema metadata cache example
//!
//! This example shows the map as the memoization layer of a database driver:
//! table field lookups are expensive round trips, so their results are cached
//! under a derived string key. The unlocked lazy insertion keeps a slow lookup
//! for one table from blocking cache hits for every other table.
//!
//! Run with `RUST_LOG=trace` to see discarded duplicate lookups.

use guardmap::metrics::MetricsCollector;
use guardmap::ConcurrentMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
struct TableField {
    index: usize,
    name: String,
    kind: String,
}

type TableFields = Arc<HashMap<String, TableField>>;

#[derive(Debug)]
enum SchemaError {
    /// The table argument named more than one table
    MultipleTables(String),
    /// The catalog has no such table
    UnknownTable { table: String, schema: String },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaError::MultipleTables(table) => {
                write!(f, "only single table lookups are supported, got {:?}", table)
            }
            SchemaError::UnknownTable { table, schema } => {
                write!(f, "table {} not found in schema {}", table, schema)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Source of column metadata, normally a catalog query against the server
trait Introspector: Send + Sync {
    fn columns(&self, table: &str, schema: &str) -> Result<Vec<(String, String)>, SchemaError>;
}

/// In-memory catalog with an artificial round-trip delay
struct SimulatedCatalog {
    tables: HashMap<(String, String), Vec<(String, String)>>,
    round_trip: Duration,
    queries: AtomicUsize,
}

impl SimulatedCatalog {
    fn new(round_trip: Duration) -> Self {
        let mut tables = HashMap::new();
        for (table, columns) in [
            ("users", vec![("id", "int8"), ("email", "text"), ("created_at", "timestamptz")]),
            ("orders", vec![("id", "int8"), ("user_id", "int8"), ("total", "numeric")]),
            ("items", vec![("sku", "text"), ("price", "numeric")]),
        ] {
            tables.insert(
                (table.to_string(), "public".to_string()),
                columns
                    .into_iter()
                    .map(|(name, kind)| (name.to_string(), kind.to_string()))
                    .collect(),
            );
        }

        Self {
            tables,
            round_trip,
            queries: AtomicUsize::new(0),
        }
    }
}

impl Introspector for SimulatedCatalog {
    fn columns(&self, table: &str, schema: &str) -> Result<Vec<(String, String)>, SchemaError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        thread::sleep(self.round_trip);

        self.tables
            .get(&(table.to_string(), schema.to_string()))
            .cloned()
            .ok_or_else(|| SchemaError::UnknownTable {
                table: table.to_string(),
                schema: schema.to_string(),
            })
    }
}

struct SchemaCache<I> {
    cache: ConcurrentMap<String, TableFields>,
    source: I,
    default_schema: String,
}

impl<I: Introspector> SchemaCache<I> {
    fn new(source: I, default_schema: &str) -> Self {
        Self {
            cache: ConcurrentMap::new(),
            source,
            default_schema: default_schema.to_string(),
        }
    }

    /// Seed the cache at startup from metadata fetched in bulk
    fn seed(&self, keys: Vec<String>, fields: Vec<TableFields>) {
        self.cache.merge(&ConcurrentMap::from_arrays(keys, fields));
    }

    fn cache_key(table: &str, schema: &str) -> String {
        format!("pgsql_table_fields_{}_{}", table, schema)
    }

    fn table_fields(&self, table: &str, schema: Option<&str>) -> Result<TableFields, SchemaError> {
        let table = table.trim();
        if table.contains(' ') {
            return Err(SchemaError::MultipleTables(table.to_string()));
        }
        let table = table.replace('"', "");
        let schema = schema
            .filter(|schema| !schema.is_empty())
            .unwrap_or(&self.default_schema);

        self.cache
            .try_get_or_set_func(Self::cache_key(&table, schema), || {
                let columns = self.source.columns(&table.to_lowercase(), schema)?;
                let fields = columns
                    .into_iter()
                    .enumerate()
                    .map(|(index, (name, kind))| {
                        (name.clone(), TableField { index, name, kind })
                    })
                    .collect();
                Ok(Arc::new(fields))
            })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    println!("Schema Metadata Cache Example");
    println!("=============================");

    let schema_cache = Arc::new(SchemaCache::new(
        SimulatedCatalog::new(Duration::from_millis(20)),
        "public",
    ));
    schema_cache.cache.set_metrics_enabled(true);

    // Bulk seed one table as if it had been loaded at startup
    let seeded_fields: TableFields = Arc::new(HashMap::from([(
        "sku".to_string(),
        TableField {
            index: 0,
            name: "sku".to_string(),
            kind: "text".to_string(),
        },
    )]));
    schema_cache.seed(
        vec![SchemaCache::<SimulatedCatalog>::cache_key("items", "public")],
        vec![seeded_fields],
    );

    let num_threads = 8;
    let barrier = Arc::new(Barrier::new(num_threads));
    let start = Instant::now();

    let handles: Vec<_> = (0..num_threads)
        .map(|worker| {
            let schema_cache = Arc::clone(&schema_cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || -> Result<usize, SchemaError> {
                barrier.wait();
                let mut columns = 0;
                for round in 0..20 {
                    let table = match (worker + round) % 3 {
                        0 => "users",
                        1 => "\"orders\"",
                        _ => "items",
                    };
                    columns += schema_cache.table_fields(table, None)?.len();
                }
                Ok(columns)
            })
        })
        .collect();

    let mut total_columns = 0;
    for handle in handles {
        total_columns += handle.join().map_err(|_| "worker panicked")??;
    }

    println!("\nResolved {} columns in {:?}", total_columns, start.elapsed());
    println!(
        "Catalog round trips: {}",
        schema_cache.source.queries.load(Ordering::Relaxed)
    );

    let users = schema_cache.table_fields("users", Some("public"))?;
    let mut columns: Vec<_> = users.values().collect();
    columns.sort_by_key(|field| field.index);
    println!("\nusers:");
    for field in columns {
        println!("  {:>2} {} {}", field.index, field.name, field.kind);
    }

    // Failures are reported to the caller and never cached
    for (table, schema) in [("users, orders", None), ("missing", Some("public"))] {
        match schema_cache.table_fields(table, schema) {
            Ok(fields) => println!("{}: {} fields", table, fields.len()),
            Err(err) => println!("Lookup failed: {}", err),
        }
    }

    let mut keys = schema_cache.cache.keys();
    keys.sort();
    println!("\nCached keys:");
    for key in keys {
        println!("  {}", key);
    }

    let metrics = schema_cache.cache.metrics();
    println!("\nCache metrics:");
    println!("  Hits (existing entries): {}", metrics.rejected_insertions);
    println!("  Committed lookups: {}", metrics.insertions);
    println!("  Discarded duplicate lookups: {}", metrics.discarded_computations);
    println!("  Discard rate: {:.2}%", metrics.discard_rate());

    Ok(())
}
