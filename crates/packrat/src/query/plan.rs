//! Query planning: index selection, sort feasibility, and the partition of
//! filters and sorts into bound (absorbed by the index path) and free
//! (applied per packet) halves.

use crate::error::{Result, StoreError};
use crate::filter::{FlexFilter, PathFilter, SortOrder};
use crate::query::{Bookmark, Query};
use crate::schema::{Index, Record, TableSchema, Value};

/// What the planner optimizes for when several indexes could serve a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexPriority {
    /// Prefer indexes whose leading columns are strictly filtered (default).
    #[default]
    Filtering,
    /// Prefer indexes whose leading columns match the requested sort.
    Sorting,
}

/// Walk metadata for one directory level of the chosen index.
#[derive(Debug, Clone)]
pub(crate) struct LevelPlan {
    /// Schema position of the column partitioning this level.
    pub column: usize,
    /// Single pinned value when the column is strictly filtered; the level
    /// is then never listed from disk.
    pub strict: Option<Value>,
    /// Non-strict filter pruning this level's directory entries.
    pub filter: Option<PathFilter>,
    /// Traversal direction for this level.
    pub order: SortOrder,
}

/// A planned query: the chosen index plus everything the engine needs to
/// walk it and to finish filtering and sorting per packet.
pub struct QueryPlan<R: Record> {
    pub(crate) index: Index,
    pub(crate) levels: Vec<LevelPlan>,
    pub(crate) free_path_filters: Vec<(usize, PathFilter)>,
    pub(crate) flex_filters: Vec<FlexFilter<R>>,
    pub(crate) free_sort: Vec<(usize, SortOrder)>,
    pub(crate) bound_sort: Vec<(usize, SortOrder)>,
    pub(crate) limit: u64,
    pub(crate) bookmark: Option<Bookmark>,
}

impl<R: Record> std::fmt::Debug for QueryPlan<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPlan")
            .field("index", &self.index)
            .field("levels", &self.levels)
            .field("free_path_filters", &self.free_path_filters)
            .field("flex_filters_count", &self.flex_filters.len())
            .field("free_sort", &self.free_sort)
            .field("bound_sort", &self.bound_sort)
            .field("limit", &self.limit)
            .field("bookmark", &self.bookmark)
            .finish()
    }
}

impl<R: Record> QueryPlan<R> {
    /// Plans a query against the record's schema.
    ///
    /// # Errors
    ///
    /// [`StoreError::SchemaInvalid`] for an unknown column or index name;
    /// [`StoreError::QueryInfeasible`] when the requested sort cannot be
    /// produced by any path through the chosen index.
    pub fn build(query: Query<R>) -> Result<Self> {
        let schema = R::schema();
        let resolve = |name: &str| {
            schema.column_position(name).ok_or_else(|| {
                StoreError::SchemaInvalid(format!(
                    "unknown column `{name}` in query against table `{}`",
                    schema.name()
                ))
            })
        };

        let mut path_filters: Vec<(usize, PathFilter)> = Vec::new();
        for (name, filter) in query.path_filters {
            let col = resolve(&name)?;
            match path_filters.iter_mut().find(|(c, _)| *c == col) {
                Some(slot) => slot.1 = filter,
                None => path_filters.push((col, filter)),
            }
        }

        let mut sort: Vec<(usize, SortOrder)> = Vec::new();
        for (name, order) in &query.sort {
            sort.push((resolve(name)?, *order));
        }

        let strict = |col: usize| {
            path_filters
                .iter()
                .any(|(c, f)| *c == col && f.is_strict())
        };

        // A sort on a strictly filtered column is vacuous: every record
        // shares the one accepted value.
        let effective_sort: Vec<(usize, SortOrder)> =
            sort.iter().copied().filter(|(c, _)| !strict(*c)).collect();

        let index = match &query.index_hint {
            Some(name) => schema
                .index(name)
                .ok_or_else(|| {
                    StoreError::SchemaInvalid(format!(
                        "unknown index `{name}` hinted for table `{}`",
                        schema.name()
                    ))
                })?
                .clone(),
            None => select_index(schema, &strict, &effective_sort, query.priority).clone(),
        };

        // Feasibility: the index's non-strict columns must consume the sort
        // directives as an aligned prefix. A directive left unconsumed while
        // an unconsumed index level precedes it can never be honored — the
        // packet order would already diverge from the requested order.
        let mut bound_sort = Vec::new();
        let mut cursor = 0usize;
        for &col in index.columns() {
            if strict(col) {
                continue;
            }
            match effective_sort.get(cursor) {
                Some(&(sort_col, order)) if sort_col == col => {
                    bound_sort.push((col, order));
                    cursor += 1;
                }
                Some(&(sort_col, order)) => {
                    return Err(infeasible(schema, sort_col, order, &strict));
                }
                None => {}
            }
        }
        for &(col, order) in &effective_sort[cursor..] {
            if index.contains(col) {
                return Err(infeasible(schema, col, order, &strict));
            }
        }
        let free_sort: Vec<(usize, SortOrder)> = effective_sort[cursor..].to_vec();

        let levels = index
            .columns()
            .iter()
            .map(|&col| {
                let filter = path_filters
                    .iter()
                    .find(|(c, _)| *c == col)
                    .map(|(_, f)| f.clone());
                let strict_value = filter
                    .as_ref()
                    .and_then(|f| f.strict_value())
                    .cloned();
                let order = bound_sort
                    .iter()
                    .find(|(c, _)| *c == col)
                    .map(|&(_, o)| o)
                    .unwrap_or(SortOrder::Asc);
                LevelPlan {
                    column: col,
                    filter: if strict_value.is_some() { None } else { filter },
                    strict: strict_value,
                    order,
                }
            })
            .collect();

        let free_path_filters = path_filters
            .into_iter()
            .filter(|(col, _)| !index.contains(*col))
            .collect();

        Ok(Self {
            index,
            levels,
            free_path_filters,
            flex_filters: query.flex_filters,
            free_sort,
            bound_sort,
            limit: query.limit,
            bookmark: query.bookmark,
        })
    }

    /// Name of the index the plan walks.
    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Evaluates the plan's free path filters and flex filters against a
    /// materialized record. Bound filters are not re-checked: every record
    /// of a walked packet already satisfies them by construction.
    pub(crate) fn matches_free(&self, record: &R) -> bool {
        self.free_path_filters
            .iter()
            .all(|(col, filter)| filter.evaluate(&record.get(*col)))
            && self.flex_filters.iter().all(|filter| filter(record))
    }

    /// Renders the plan for an explain surface.
    pub fn describe(&self) -> String {
        let schema = R::schema();
        let name = |col: usize| schema.columns()[col].name();
        let sorts = |directives: &[(usize, SortOrder)]| {
            directives
                .iter()
                .map(|&(col, order)| {
                    let dir = match order {
                        SortOrder::Asc => "asc",
                        SortOrder::Desc => "desc",
                    };
                    format!("{} {dir}", name(col))
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        let pinned: Vec<String> = self
            .levels
            .iter()
            .filter_map(|level| {
                level
                    .strict
                    .as_ref()
                    .map(|v| format!("{} = {}", name(level.column), schema.value_to_text(v)))
            })
            .collect();
        let free: Vec<&str> = self
            .free_path_filters
            .iter()
            .map(|&(col, _)| name(col))
            .collect();

        let mut out = format!("index {}", self.index.name());
        if !pinned.is_empty() {
            out.push_str(&format!(" | pinned [{}]", pinned.join(", ")));
        }
        if !self.bound_sort.is_empty() {
            out.push_str(&format!(" | bound sort [{}]", sorts(&self.bound_sort)));
        }
        if !self.free_sort.is_empty() {
            out.push_str(&format!(" | free sort [{}]", sorts(&self.free_sort)));
        }
        if !free.is_empty() {
            out.push_str(&format!(" | free filters [{}]", free.join(", ")));
        }
        if !self.flex_filters.is_empty() {
            out.push_str(&format!(" | flex filters {}", self.flex_filters.len()));
        }
        if self.limit > 0 {
            out.push_str(&format!(" | limit {}", self.limit));
        }
        out
    }
}

fn infeasible(
    schema: &TableSchema,
    col: usize,
    order: SortOrder,
    strict: &impl Fn(usize) -> bool,
) -> StoreError {
    let dir = match order {
        SortOrder::Asc => "asc",
        SortOrder::Desc => "desc",
    };
    let admissible = schema
        .indexes()
        .iter()
        .map(|index| {
            let columns: Vec<&str> = index
                .columns()
                .iter()
                .filter(|&&c| !strict(c))
                .map(|&c| schema.columns()[c].name())
                .collect();
            format!("({})", columns.join(", "))
        })
        .collect::<Vec<_>>()
        .join("; ");
    StoreError::QueryInfeasible {
        directive: format!("{} {dir}", schema.columns()[col].name()),
        admissible,
    }
}

/// Picks the best index by pairwise duels in declaration order.
fn select_index<'a>(
    schema: &'a TableSchema,
    strict: &impl Fn(usize) -> bool,
    sort: &[(usize, SortOrder)],
    priority: IndexPriority,
) -> &'a Index {
    let mut best = &schema.indexes()[0];
    for challenger in &schema.indexes()[1..] {
        if challenger_wins(best, challenger, strict, sort, priority) {
            best = challenger;
        }
    }
    best
}

/// Compares two candidate indexes level by level. Returns true if the
/// challenger `b` beats the incumbent `a`; on a full tie the incumbent
/// (declared earlier) keeps its seat.
fn challenger_wins(
    a: &Index,
    b: &Index,
    strict: &impl Fn(usize) -> bool,
    sort: &[(usize, SortOrder)],
    priority: IndexPriority,
) -> bool {
    // Each candidate tracks its own next-unresolved-sort cursor: a level
    // consumes a sort directive when its column matches and is not strict.
    let mut cursor_a = 0usize;
    let mut cursor_b = 0usize;
    let next_sort_matches =
        |cursor: usize, col: usize| sort.get(cursor).is_some_and(|&(c, _)| c == col);

    for level in 0..a.arity().max(b.arity()) {
        let col_a = a.columns().get(level).copied();
        let col_b = b.columns().get(level).copied();

        if col_a == col_b {
            // Same column at this level: a tie, descend.
            if let Some(col) = col_a {
                if !strict(col) && next_sort_matches(cursor_a, col) {
                    cursor_a += 1;
                    cursor_b += 1;
                }
            }
            continue;
        }

        let strict_a = col_a.map(strict).unwrap_or(false);
        let strict_b = col_b.map(strict).unwrap_or(false);
        let sorts_a = col_a
            .map(|c| !strict(c) && next_sort_matches(cursor_a, c))
            .unwrap_or(false);
        let sorts_b = col_b
            .map(|c| !strict(c) && next_sort_matches(cursor_b, c))
            .unwrap_or(false);

        let criteria = match priority {
            IndexPriority::Filtering => [(strict_a, strict_b), (sorts_a, sorts_b)],
            IndexPriority::Sorting => [(sorts_a, sorts_b), (strict_a, strict_b)],
        };
        for (wins_a, wins_b) in criteria {
            if wins_a != wins_b {
                return wins_b;
            }
        }

        if sorts_a {
            cursor_a += 1;
        }
        if sorts_b {
            cursor_b += 1;
        }
    }
    false
}
