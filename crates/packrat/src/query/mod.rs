//! Query surface: the plan input, the planner, the execution engine, and
//! paging bookmarks.

pub mod bookmark;
pub mod engine;
pub mod plan;

pub use bookmark::Bookmark;
pub use engine::Cursor;
pub use plan::{IndexPriority, QueryPlan};

use crate::filter::{FlexFilter, PathFilter, SortOrder};
use crate::schema::Record;
use std::sync::Arc;

/// A query description: filters, sort directives, limit, and paging input.
///
/// `Query` is the planner's input. Its builder-style methods double as a
/// small fluent surface:
///
/// ```rust,ignore
/// let cursor = table.fetch(
///     table
///         .query()
///         .filter("account", PathFilter::equals("a11"))
///         .order_by_asc("date")
///         .with_limit(12),
/// )?;
/// ```
pub struct Query<R: Record> {
    pub(crate) path_filters: Vec<(String, PathFilter)>,
    pub(crate) flex_filters: Vec<FlexFilter<R>>,
    pub(crate) sort: Vec<(String, SortOrder)>,
    pub(crate) limit: u64,
    pub(crate) bookmark: Option<Bookmark>,
    pub(crate) index_hint: Option<String>,
    pub(crate) priority: IndexPriority,
}

impl<R: Record> Default for Query<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> Clone for Query<R> {
    fn clone(&self) -> Self {
        Self {
            path_filters: self.path_filters.clone(),
            flex_filters: self.flex_filters.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            bookmark: self.bookmark.clone(),
            index_hint: self.index_hint.clone(),
            priority: self.priority,
        }
    }
}

impl<R: Record> Query<R> {
    /// An empty query matching every record of the table.
    pub fn new() -> Self {
        Self {
            path_filters: Vec::new(),
            flex_filters: Vec::new(),
            sort: Vec::new(),
            limit: 0,
            bookmark: None,
            index_hint: None,
            priority: IndexPriority::default(),
        }
    }

    /// Adds a per-column filter; a second filter on the same column replaces
    /// the first.
    pub fn filter(mut self, column: impl Into<String>, filter: PathFilter) -> Self {
        let column = column.into();
        match self.path_filters.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = filter,
            None => self.path_filters.push((column, filter)),
        }
        self
    }

    /// Adds an arbitrary record predicate, applied after materialization.
    pub fn flex_filter(mut self, filter: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        self.flex_filters.push(Arc::new(filter));
        self
    }

    /// Appends an ascending sort directive.
    pub fn order_by_asc(mut self, column: impl Into<String>) -> Self {
        self.sort.push((column.into(), SortOrder::Asc));
        self
    }

    /// Appends a descending sort directive.
    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.sort.push((column.into(), SortOrder::Desc));
        self
    }

    /// Caps the number of records served (0 = unlimited, the default).
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Resumes after the record a bookmark identifies.
    pub fn after_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.bookmark = Some(bookmark);
        self
    }

    /// Forces the named index instead of letting the planner choose.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index_hint = Some(index.into());
        self
    }

    /// Sets what the planner optimizes for when several indexes fit.
    pub fn with_priority(mut self, priority: IndexPriority) -> Self {
        self.priority = priority;
        self
    }
}
