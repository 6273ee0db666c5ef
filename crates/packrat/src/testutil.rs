//! Shared record fixture for unit tests.

use crate::schema::{ColumnType, Record, TableSchema, Value};
use chrono::NaiveDate;
use std::sync::OnceLock;

/// One advertising metrics row, the worked example used throughout the
/// crate's tests: unique by `(ad, date)`, indexed by `(account, date)` and
/// `(date, account)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Metric {
    pub date: Option<NaiveDate>,
    pub account: Option<String>,
    pub ad: Option<String>,
    pub impressions: Option<i64>,
}

pub(crate) fn metrics_schema() -> &'static TableSchema {
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
            .expect("test schema is valid")
    })
}

impl Record for Metric {
    fn schema() -> &'static TableSchema {
        metrics_schema()
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

pub(crate) fn metric(date: &str, account: &str, ad: &str, impressions: i64) -> Metric {
    Metric {
        date: Some(date.parse().expect("valid test date")),
        account: Some(account.to_string()),
        ad: Some(ad.to_string()),
        impressions: Some(impressions),
    }
}
