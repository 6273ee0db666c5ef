//! End-to-end tests for the complete write and read paths.
//!
//! These tests drive the public surface only: schema declaration,
//! transactions committing across both indexes, planned queries with
//! filters, sorts and limits, bookmark paging, and the update hook.

use chrono::NaiveDate;
use packrat::{
    Bookmark, ColumnType, Durability, IndexPriority, PathFilter, Record, Store, StoreConfig,
    StoreError, Table, TableSchema, Value,
};
use std::sync::OnceLock;
use tempfile::TempDir;

// ============================================================================
// Test record: one advertising metrics row
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct Metric {
    date: Option<NaiveDate>,
    account: Option<String>,
    ad: Option<String>,
    impressions: Option<i64>,
    created: Option<String>,
}

impl Metric {
    fn new(date: &str, account: &str, ad: &str, impressions: i64) -> Self {
        Self {
            date: Some(date.parse().expect("valid date")),
            account: Some(account.to_string()),
            ad: Some(ad.to_string()),
            impressions: Some(impressions),
            created: Some("t0".to_string()),
        }
    }
}

fn schema() -> &'static TableSchema {
    static SCHEMA: OnceLock<TableSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        TableSchema::builder("metrics")
            .column("date", ColumnType::Date)
            .column("account", ColumnType::Str)
            .column("ad", ColumnType::Str)
            .column("impressions", ColumnType::Int)
            .column("created", ColumnType::Str)
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
            4 => self.created.clone().map(Value::Str).unwrap_or(Value::Null),
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
            (4, Value::Str(s)) => self.created = Some(s),
            (4, _) => self.created = None,
            _ => {}
        }
    }
}

fn open(dir: &TempDir) -> Store {
    Store::open(
        StoreConfig::default()
            .with_database_path(dir.path())
            .with_transaction_parallelism(3)
            .with_query_parallelism(3),
    )
    .unwrap()
}

fn insert(table: &Table<Metric>, records: impl IntoIterator<Item = Metric>) {
    let mut txn = table.begin();
    for record in records {
        txn.add(record);
    }
    txn.commit().unwrap();
}

/// Fetches all records of a query hinted at a specific index.
fn all_via_index(table: &Table<Metric>, index: &str) -> Vec<Metric> {
    table
        .fetch(table.query().with_index(index))
        .unwrap()
        .fetch_all()
        .unwrap()
}

// ============================================================================
// Insert, read back, upsert (S1, S2)
// ============================================================================

/// Inserting two records and querying by date and account returns exactly
/// the matching record, on either index.
#[test]
fn test_insert_and_read() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(
        &table,
        [
            Metric::new("2020-01-02", "a11", "ad1", 100),
            Metric::new("2020-01-03", "a11", "ad1", 200),
        ],
    );

    for index in ["account_date", "date_account"] {
        let records = table
            .fetch(
                table
                    .query()
                    .filter("date", PathFilter::equals(date("2020-01-02")))
                    .filter("account", PathFilter::equals("a11"))
                    .with_index(index),
            )
            .unwrap()
            .fetch_all()
            .unwrap();
        assert_eq!(records.len(), 1, "index {index}");
        assert_eq!(records[0].ad.as_deref(), Some("ad1"));
        assert_eq!(records[0].impressions, Some(100));
    }
}

/// Re-adding a record with the same unique key replaces it on every index.
#[test]
fn test_upsert_replaces_on_both_indexes() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(&table, [Metric::new("2020-01-02", "a11", "ad1", 100)]);
    insert(&table, [Metric::new("2020-01-02", "a11", "ad1", 999)]);

    for index in ["account_date", "date_account"] {
        let records = all_via_index(&table, index);
        assert_eq!(records.len(), 1, "index {index}");
        assert_eq!(records[0].impressions, Some(999));
    }
}

/// Committing the same add twice yields a single stored record per index.
#[test]
fn test_idempotent_upsert() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    let record = Metric::new("2020-01-02", "a11", "ad1", 100);
    insert(&table, [record.clone()]);
    insert(&table, [record.clone()]);

    for index in ["account_date", "date_account"] {
        assert_eq!(all_via_index(&table, index), vec![record.clone()]);
    }
}

// ============================================================================
// Index redundancy
// ============================================================================

/// After any commit, every index holds the same multiset of records.
#[test]
fn test_index_redundancy() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    let mut records = Vec::new();
    for account in ["a11", "a12", "a13"] {
        for day in 1..=5 {
            let date = format!("2020-01-{day:02}");
            records.push(Metric::new(&date, account, &format!("ad-{account}-{day}"), day));
        }
    }
    insert(&table, records.clone());

    let mut txn = table.begin();
    txn.remove(&records[3]);
    txn.commit().unwrap();

    let key = |m: &Metric| (m.ad.clone(), m.date);
    let mut left: Vec<_> = all_via_index(&table, "account_date").iter().map(key).collect();
    let mut right: Vec<_> = all_via_index(&table, "date_account").iter().map(key).collect();
    left.sort();
    right.sort();
    assert_eq!(left.len(), records.len() - 1);
    assert_eq!(left, right);
}

// ============================================================================
// Sort feasibility and ordering (S3)
// ============================================================================

/// Sorting by (account, date) uses account_date; (date, account) uses
/// date_account; a sort no index can honor fails with the admissible
/// prefixes of both indexes.
#[test]
fn test_sort_feasibility() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();

    let plan = table
        .explain(table.query().order_by_asc("account").order_by_asc("date"))
        .unwrap();
    assert!(plan.contains("index account_date"));

    let plan = table
        .explain(table.query().order_by_asc("date").order_by_asc("account"))
        .unwrap();
    assert!(plan.contains("index date_account"));

    let result = table.explain(
        table
            .query()
            .order_by_asc("account")
            .order_by_desc("impressions"),
    );
    match result {
        Err(StoreError::QueryInfeasible { admissible, .. }) => {
            assert!(admissible.contains("(account, date)"), "{admissible}");
            assert!(admissible.contains("(date, account)"), "{admissible}");
        }
        other => panic!("expected QueryInfeasible, got {other:?}"),
    }
}

/// A feasible multi-level sort streams records in the requested order.
#[test]
fn test_sort_correctness() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    let mut records = Vec::new();
    for (i, account) in ["a13", "a11", "a12"].iter().enumerate() {
        for day in [3, 1, 2] {
            records.push(Metric::new(
                &format!("2020-01-{day:02}"),
                account,
                &format!("ad{i}{day}"),
                (i as i64) * 10 + day,
            ));
        }
    }
    insert(&table, records);

    let sorted = table
        .fetch(table.query().order_by_desc("account").order_by_asc("date"))
        .unwrap()
        .fetch_all()
        .unwrap();
    let keys: Vec<_> = sorted
        .iter()
        .map(|m| (m.account.clone().unwrap(), m.date.unwrap()))
        .collect();
    let mut expected = keys.clone();
    expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    assert_eq!(keys, expected);
    assert_eq!(keys.len(), 9);
}

// ============================================================================
// Flex filters and limit (S4)
// ============================================================================

/// A flex filter composes with a limit: exactly `limit` records, each
/// passing the predicate.
#[test]
fn test_flex_filter_with_limit() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(
        &table,
        (1..=50).map(|i| Metric::new("2020-01-02", "a11", &format!("ad{i:02}"), i)),
    );

    let records = table
        .fetch(
            table
                .query()
                .flex_filter(|m: &Metric| m.impressions.unwrap_or(0) > 10)
                .with_limit(5),
        )
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|m| m.impressions.unwrap() > 10));
}

/// A query with limit N returns min(N, total) records.
#[test]
fn test_limit_beyond_total() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(
        &table,
        (1..=4).map(|i| Metric::new("2020-01-02", "a11", &format!("ad{i}"), i)),
    );

    let records = table
        .fetch(table.query().with_limit(100))
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(records.len(), 4);
}

// ============================================================================
// Bookmark paging (S5)
// ============================================================================

/// Three consecutive 12-record pages concatenate to the first 36 records of
/// the unpaged query, with no gaps or repeats.
#[test]
fn test_bookmark_paging() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    let mut records = Vec::new();
    for account in ["a11", "a12", "a13", "a14"] {
        for day in 1..=5 {
            for ad in 1..=5 {
                records.push(Metric::new(
                    &format!("2020-01-{day:02}"),
                    account,
                    &format!("ad{ad}"),
                    (day * 10 + ad) as i64,
                ));
            }
        }
    }
    assert_eq!(records.len(), 100);
    insert(&table, records);

    let query = || {
        table
            .query()
            .order_by_asc("account")
            .order_by_asc("date")
            .with_limit(12)
    };

    let mut cursor = table.fetch(query()).unwrap();
    let mut pages = vec![cursor.fetch_all().unwrap()];
    for _ in 0..2 {
        let bookmark = cursor.bookmark().unwrap();
        // Bookmarks travel as opaque strings.
        let token = bookmark.encode();
        cursor = table
            .fetch(query().after_bookmark(Bookmark::decode(&token).unwrap()))
            .unwrap();
        pages.push(cursor.fetch_all().unwrap());
    }

    let paged: Vec<Metric> = pages.into_iter().flatten().collect();
    assert_eq!(paged.len(), 36);

    let full = table
        .fetch(table.query().order_by_asc("account").order_by_asc("date"))
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(paged, full[..36].to_vec());
}

/// A bookmark whose record was deleted is rejected.
#[test]
fn test_bookmark_invalidated_by_deletion() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    let records: Vec<Metric> = (1..=6)
        .map(|i| Metric::new("2020-01-02", "a11", &format!("ad{i}"), i))
        .collect();
    insert(&table, records.clone());

    let query = || table.query().order_by_asc("account").order_by_asc("date");
    let mut cursor = table.fetch(query().with_limit(2)).unwrap();
    let first = cursor.fetch_all().unwrap();
    let bookmark = cursor.bookmark().unwrap();

    let mut txn = table.begin();
    txn.remove(&first[1]);
    txn.commit().unwrap();

    let mut cursor = table.fetch(query().after_bookmark(bookmark)).unwrap();
    match cursor.fetch_all() {
        Err(StoreError::InvalidBookmark(reason)) => assert!(reason.contains("no longer valid")),
        other => panic!("expected InvalidBookmark, got {other:?}"),
    }
}

// ============================================================================
// Update hook (S6)
// ============================================================================

/// The hook can preserve a column from the stored record: the original
/// `created` survives an upsert that tried to change it.
#[test]
fn test_on_update_preserves_immutable_column() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(&table, [Metric::new("2020-01-02", "a11", "ad1", 100)]);

    let mut replacement = Metric::new("2020-01-02", "a11", "ad1", 500);
    replacement.created = Some("t9".to_string());

    let mut txn = table.begin();
    txn.on_update(|old: &Metric, mut new: Metric| {
        new.created = old.created.clone();
        Some(new)
    });
    txn.add(replacement);
    txn.commit().unwrap();

    for index in ["account_date", "date_account"] {
        let records = all_via_index(&table, index);
        assert_eq!(records[0].impressions, Some(500), "index {index}");
        assert_eq!(records[0].created.as_deref(), Some("t0"), "index {index}");
    }
}

/// Mutating an indexed column in the hook fails the commit and leaves the
/// packet unchanged.
#[test]
fn test_on_update_indexed_column_is_illegal() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(&table, [Metric::new("2020-01-02", "a11", "ad1", 100)]);

    let mut txn = table.begin();
    txn.on_update(|_: &Metric, mut new: Metric| {
        new.account = Some("a99".to_string());
        Some(new)
    });
    txn.add(Metric::new("2020-01-02", "a11", "ad1", 500));
    match txn.commit() {
        Err(StoreError::IllegalUpdate { table: name, .. }) => assert_eq!(name, "metrics"),
        other => panic!("expected IllegalUpdate, got {other:?}"),
    }

    let records = all_via_index(&table, "account_date");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].impressions, Some(100));
}

// ============================================================================
// Bulk delete and update
// ============================================================================

/// Query-style deletes remove matches from every index, including records
/// matched through flex filters.
#[test]
fn test_bulk_delete() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(
        &table,
        (1..=10).map(|i| Metric::new("2020-01-02", "a11", &format!("ad{i:02}"), i)),
    );

    let mut txn = table.begin();
    txn.delete(
        table
            .query()
            .filter("account", PathFilter::equals("a11"))
            .flex_filter(|m: &Metric| m.impressions.unwrap_or(0) > 7),
    );
    txn.commit().unwrap();

    for index in ["account_date", "date_account"] {
        let records = all_via_index(&table, index);
        assert_eq!(records.len(), 7, "index {index}");
        assert!(records.iter().all(|m| m.impressions.unwrap() <= 7));
    }
}

/// Query-style updates mutate matches under every index; indexed columns
/// stay frozen.
#[test]
fn test_bulk_update() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    insert(
        &table,
        [
            Metric::new("2020-01-02", "a11", "ad1", 1),
            Metric::new("2020-01-02", "a12", "ad2", 2),
        ],
    );

    let mut txn = table.begin();
    txn.update(
        table.query().filter("account", PathFilter::equals("a11")),
        |m| m.impressions = Some(m.impressions.unwrap_or(0) + 100),
    );
    txn.commit().unwrap();

    for index in ["account_date", "date_account"] {
        let records = all_via_index(&table, index);
        let lookup = |ad: &str| {
            records
                .iter()
                .find(|m| m.ad.as_deref() == Some(ad))
                .unwrap()
                .impressions
        };
        assert_eq!(lookup("ad1"), Some(101), "index {index}");
        assert_eq!(lookup("ad2"), Some(2), "index {index}");
    }
}

// ============================================================================
// Planner modes, durability, null path values
// ============================================================================

/// Sorting priority prefers the sort-matching index even when a filter
/// points elsewhere.
#[test]
fn test_sorting_priority_mode() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();

    let query = table
        .query()
        .filter("account", PathFilter::equals("a11"))
        .order_by_asc("date")
        .with_priority(IndexPriority::Sorting);
    let plan = table.explain(query).unwrap();
    assert!(plan.contains("index date_account"), "{plan}");
}

/// Atomic durability survives the full write/read cycle.
#[test]
fn test_atomic_durability_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(
        StoreConfig::default()
            .with_database_path(dir.path())
            .with_durability(Durability::Atomic),
    )
    .unwrap();
    let table = store.table::<Metric>();
    insert(&table, [Metric::new("2020-01-02", "a11", "ad1", 100)]);
    insert(&table, [Metric::new("2020-01-02", "a11", "ad1", 200)]);

    let records = all_via_index(&table, "account_date");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].impressions, Some(200));
}

/// Records with a null index column land under the encoded null sentinel
/// and come back with the null intact.
#[test]
fn test_null_index_value_round_trip() {
    let dir = TempDir::new().unwrap();
    let table = open(&dir).table::<Metric>();
    let mut record = Metric::new("2020-01-02", "a11", "ad1", 100);
    record.account = None;
    insert(&table, [record]);

    let records = table
        .fetch(table.query().filter("account", PathFilter::equals(Value::Null)))
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].account, None);
    assert_eq!(records[0].impressions, Some(100));
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}
