//! Benchmarks for packrat commit and query paths.
//!
//! Run with: cargo bench --package packrat
//!
//! ## Benchmark Categories
//!
//! - **Commit**: batched upserts fanned out across both indexes
//! - **Query**: full scans and filtered scans over a populated store
//! - **Filename codec**: encode/decode throughput

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use packrat::{
    fname, ColumnType, PathFilter, Record, Store, StoreConfig, Table, TableSchema, Value,
};
use std::sync::OnceLock;
use tempfile::TempDir;

#[derive(Debug, Clone, Default)]
struct Metric {
    date: Option<NaiveDate>,
    account: Option<String>,
    ad: Option<String>,
    impressions: Option<i64>,
}

fn schema() -> &'static TableSchema {
    static SCHEMA: OnceLock<TableSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        TableSchema::builder("metrics")
            .column("date", ColumnType::Date)
            .column("account", ColumnType::Str)
            .column("ad", ColumnType::Str)
            .column("impressions", ColumnType::Int)
            .unique(["ad", "date"])
            .index("account_date", ["account", "date"])
            .index("date_account", ["date", "account"])
            .build()
            .expect("valid schema")
    })
}

impl Record for Metric {
    fn schema() -> &'static TableSchema {
        schema()
    }

    fn get(&self, column: usize) -> Value {
        match column {
            0 => self.date.map(Value::Date).unwrap_or(Value::Null),
            1 => self.account.clone().map(Value::Str).unwrap_or(Value::Null),
            2 => self.ad.clone().map(Value::Str).unwrap_or(Value::Null),
            3 => self.impressions.map(Value::Int).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn set(&mut self, column: usize, value: Value) {
        match (column, value) {
            (0, Value::Date(d)) => self.date = Some(d),
            (0, _) => self.date = None,
            (1, Value::Str(s)) => self.account = Some(s),
            (1, _) => self.account = None,
            (2, Value::Str(s)) => self.ad = Some(s),
            (2, _) => self.ad = None,
            (3, Value::Int(i)) => self.impressions = Some(i),
            (3, _) => self.impressions = None,
            _ => {}
        }
    }
}

/// Generates `count` metrics spread over 4 accounts and 8 days.
fn generate_metrics(count: usize) -> Vec<Metric> {
    (0..count)
        .map(|i| Metric {
            date: NaiveDate::from_ymd_opt(2020, 1, 1 + (i % 8) as u32),
            account: Some(format!("a{:02}", i % 4)),
            ad: Some(format!("ad{i:05}")),
            impressions: Some(i as i64),
        })
        .collect()
}

fn populated_table(dir: &TempDir, count: usize) -> Table<Metric> {
    let store = Store::open(StoreConfig::default().with_database_path(dir.path())).unwrap();
    let table = store.table::<Metric>();
    let mut txn = table.begin();
    for metric in generate_metrics(count) {
        txn.add(metric);
    }
    txn.commit().unwrap();
    table
}

fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    group.throughput(Throughput::Elements(1_000));
    group.bench_function("commit_1k_records", |b| {
        b.iter_with_setup(
            || {
                let dir = TempDir::new().unwrap();
                let table = populated_table(&dir, 0);
                (dir, table, generate_metrics(1_000))
            },
            |(_dir, table, metrics)| {
                let mut txn = table.begin();
                for metric in metrics {
                    txn.add(metric);
                }
                txn.commit().unwrap();
            },
        )
    });
    group.finish();
}

fn bench_query_scan(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let table = populated_table(&dir, 4_000);

    let mut group = c.benchmark_group("query");
    group.throughput(Throughput::Elements(4_000));
    group.bench_function("full_scan_4k", |b| {
        b.iter(|| {
            let records = table
                .fetch(table.query())
                .unwrap()
                .fetch_all()
                .unwrap();
            black_box(records.len())
        })
    });

    group.bench_function("filtered_scan", |b| {
        b.iter(|| {
            let records = table
                .fetch(
                    table
                        .query()
                        .filter("account", PathFilter::equals("a01"))
                        .order_by_asc("date"),
                )
                .unwrap()
                .fetch_all()
                .unwrap();
            black_box(records.len())
        })
    });
    group.finish();
}

fn bench_fname(c: &mut Criterion) {
    let names: Vec<String> = (0..1_000)
        .map(|i| format!("Account {i}/metric.{i}%"))
        .collect();

    c.bench_function("fname_encode_1k", |b| {
        b.iter(|| {
            for name in &names {
                black_box(fname::encode(name));
            }
        })
    });

    let encoded: Vec<String> = names.iter().map(|n| fname::encode(n)).collect();
    c.bench_function("fname_decode_1k", |b| {
        b.iter(|| {
            for name in &encoded {
                black_box(fname::decode(name));
            }
        })
    });
}

criterion_group!(benches, bench_commit, bench_query_scan, bench_fname);
criterion_main!(benches);
