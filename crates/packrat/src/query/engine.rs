//! Query execution: ordered directory-tree walk, parallel packet loading,
//! and record-level traversal with limit and bookmark support.
//!
//! The walk keeps a stack of *index levels*, one per directory depth of the
//! chosen index. A strictly filtered level is pinned to its single value and
//! never listed from disk; any other level lists its directory, decodes each
//! entry back into a column value, prunes it against the level's filter and
//! the bookmark's continuation bound, and sorts by the traversal direction.
//! When the stack reaches the index's arity it denotes one packet.
//!
//! Packets load on a FIFO pipeline of at most `query_parallelism` in-flight
//! tasks. A task takes the packet's lock only while reading bytes; decoding,
//! filtering and sorting run off-lock. The engine drains completed packets
//! from the queue head, preserving emission order regardless of completion
//! order.

use crate::config::StoreConfig;
use crate::error::{IoPhase, Result, StoreError};
use crate::filter::{FlexFilter, IndexFilter, PathFilter, SortOrder};
use crate::fname;
use crate::lock::LockTable;
use crate::packet::{Packet, RowSelection, PACKET_EXTENSION};
use crate::query::bookmark::{Bookmark, Fragment};
use crate::query::plan::{LevelPlan, QueryPlan};
use crate::schema::{Index, Record, TableSchema, Value, UNIQUE_SEPARATOR};
use std::collections::VecDeque;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// One entry of a listed (or pinned) directory level.
struct Entry {
    value: Value,
    text: String,
}

struct Level {
    entries: Vec<Entry>,
    pos: usize,
}

impl Level {
    fn current(&self) -> &Entry {
        &self.entries[self.pos]
    }
}

/// Ordered iterator over the packet paths a plan selects.
///
/// Emits packets so that consecutive packets sort strictly by the plan's
/// bound-sort prefix.
pub(crate) struct TreeWalk {
    schema: &'static TableSchema,
    base: PathBuf,
    levels: Vec<LevelPlan>,
    /// Continuation bound per level, from a bookmark.
    after: Vec<Option<Value>>,
    stack: Vec<Level>,
    started: bool,
    done: bool,
}

impl TreeWalk {
    pub(crate) fn new(
        schema: &'static TableSchema,
        root: &std::path::Path,
        index: &Index,
        levels: Vec<LevelPlan>,
        after: Vec<Option<Value>>,
    ) -> Self {
        Self {
            schema,
            base: root.join(schema.name()).join(index.name()),
            levels,
            after,
            stack: Vec::new(),
            started: false,
            done: false,
        }
    }

    /// Advances to the next packet path, or `None` when the tree is
    /// exhausted. Path values are the decoded string forms, outermost level
    /// first.
    pub(crate) fn next_packet(&mut self) -> Result<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if self.started {
                if !self.advance() {
                    self.done = true;
                    return Ok(None);
                }
            } else {
                self.started = true;
                let level = self.open_level(0)?;
                if level.entries.is_empty() {
                    self.done = true;
                    return Ok(None);
                }
                self.stack.push(level);
            }

            while self.stack.len() < self.levels.len() {
                let level = self.open_level(self.stack.len())?;
                if level.entries.is_empty() {
                    break;
                }
                self.stack.push(level);
            }
            if self.stack.len() == self.levels.len() {
                let values = self
                    .stack
                    .iter()
                    .map(|level| level.current().text.clone())
                    .collect();
                return Ok(Some(values));
            }
            // Empty subtree under the current prefix; move on.
        }
    }

    /// Moves the deepest level to its next entry, backtracking through
    /// exhausted levels. Returns false when the whole walk is exhausted.
    fn advance(&mut self) -> bool {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return false;
            };
            top.pos += 1;
            if top.pos < top.entries.len() {
                return true;
            }
            self.stack.pop();
        }
    }

    /// True while every level above `depth` sits exactly on the bookmark's
    /// continuation value, i.e. the bound still applies at `depth`.
    fn on_after_prefix(&self, depth: usize) -> bool {
        (0..depth).all(|d| {
            self.after[d]
                .as_ref()
                .is_some_and(|av| &self.stack[d].current().value == av)
        })
    }

    fn open_level(&self, depth: usize) -> Result<Level> {
        let meta = &self.levels[depth];

        if let Some(strict) = &meta.strict {
            // Pinned to one value; no directory read.
            return Ok(Level {
                entries: vec![Entry {
                    value: strict.clone(),
                    text: self.schema.value_to_text(strict),
                }],
                pos: 0,
            });
        }

        let mut dir = self.base.clone();
        for level in &self.stack[..depth] {
            dir.push(fname::encode(&level.current().text));
        }

        let bound = match &self.after[depth] {
            Some(av) if self.on_after_prefix(depth) => {
                Some(IndexFilter::After(av.clone()))
            }
            _ => None,
        };
        let invert = meta.order == SortOrder::Desc;
        let leaf = depth + 1 == self.levels.len();

        let reader = match fs::read_dir(&dir) {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(Level {
                    entries: Vec::new(),
                    pos: 0,
                })
            }
            Err(e) => return Err(StoreError::io(IoPhase::List, &dir, e)),
        };

        let mut entries = Vec::new();
        for dirent in reader {
            let dirent = dirent.map_err(|e| StoreError::io(IoPhase::List, &dir, e))?;
            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let is_dir = dirent
                .file_type()
                .map_err(|e| StoreError::io(IoPhase::List, dirent.path(), e))?
                .is_dir();
            let encoded = if leaf {
                if is_dir {
                    continue;
                }
                match name.strip_suffix(&format!(".{PACKET_EXTENSION}")) {
                    Some(stem) => stem,
                    None => continue, // tmp files and other strays
                }
            } else {
                if !is_dir {
                    continue;
                }
                name
            };
            let Some(text) = fname::decode(encoded) else {
                warn!(path = %dirent.path().display(), "skipping undecodable entry");
                continue;
            };
            let value = match self.schema.value_from_text(meta.column, &text) {
                Ok(value) => value,
                Err(_) => {
                    warn!(path = %dirent.path().display(), "skipping mistyped entry");
                    continue;
                }
            };
            if let Some(filter) = &meta.filter {
                if !filter.evaluate(&value) {
                    continue;
                }
            }
            if let Some(bound) = &bound {
                if !bound.intersects(&value, invert) {
                    continue;
                }
            }
            entries.push(Entry { value, text });
        }

        entries.sort_by(|a, b| match meta.order {
            SortOrder::Asc => a.value.cmp(&b.value),
            SortOrder::Desc => b.value.cmp(&a.value),
        });
        Ok(Level { entries, pos: 0 })
    }
}

/// Context shared with packet load tasks.
struct LoadContext<R: Record> {
    root: PathBuf,
    index: Index,
    free_path_filters: Vec<(usize, PathFilter)>,
    flex_filters: Vec<FlexFilter<R>>,
    free_sort: Vec<(usize, SortOrder)>,
    failed: AtomicBool,
}

fn load_packet<R: Record>(ctx: &LoadContext<R>, values: Vec<String>) -> Result<Vec<R>> {
    if ctx.failed.load(Ordering::Acquire) {
        return Err(StoreError::Aborted);
    }
    let mut packet = Packet::<R>::new(&ctx.root, &ctx.index, values);
    let result = (|| {
        {
            let _guard = LockTable::global().lock(packet.path());
            packet.load()?;
        }
        // Bytes are in memory; decode, filter and sort off-lock.
        let selection = RowSelection {
            path_filters: &ctx.free_path_filters,
            flex_filters: &ctx.flex_filters,
            sort: &ctx.free_sort,
        };
        packet.decode(Some(&selection))
    })();
    if result.is_err() {
        ctx.failed.store(true, Ordering::Release);
    }
    result
}

/// Position of the bookmarked record the cursor must seek past.
struct SeekState {
    unique: String,
    scanned_first_packet: bool,
}

/// A running query: streams records in plan order.
pub struct Cursor<R: Record> {
    ctx: Arc<LoadContext<R>>,
    walk: TreeWalk,
    pending: VecDeque<JoinHandle<Result<Vec<R>>>>,
    parallelism: usize,
    current: std::vec::IntoIter<R>,
    limit: u64,
    served: u64,
    last: Option<R>,
    seek: Option<SeekState>,
    done: bool,
}

impl<R: Record> Cursor<R> {
    pub(crate) fn new(plan: QueryPlan<R>, config: &StoreConfig) -> Result<Self> {
        let schema = R::schema();
        let QueryPlan {
            index,
            levels,
            free_path_filters,
            flex_filters,
            free_sort,
            bookmark,
            limit,
            ..
        } = plan;

        let mut after = vec![None; levels.len()];
        let mut seek = None;
        if let Some(bookmark) = bookmark {
            let fragment = bookmark
                .fragment_for(schema.name(), index.name())
                .ok_or_else(|| {
                    StoreError::InvalidBookmark(format!(
                        "no fragment for table `{}` and index `{}`",
                        schema.name(),
                        index.name()
                    ))
                })?;
            for (depth, level) in levels.iter().enumerate() {
                let column = schema.columns()[level.column].name();
                let text = fragment.value(column).ok_or_else(|| {
                    StoreError::InvalidBookmark(format!("missing level `{column}`"))
                })?;
                let value = schema.value_from_text(level.column, text).map_err(|_| {
                    StoreError::InvalidBookmark(format!("unreadable level `{column}`"))
                })?;
                after[depth] = Some(value);
            }
            let mut unique = String::new();
            for (i, &col) in schema.unique().iter().enumerate() {
                let column = schema.columns()[col].name();
                let text = fragment.value(column).ok_or_else(|| {
                    StoreError::InvalidBookmark(format!("missing unique column `{column}`"))
                })?;
                if i > 0 {
                    unique.push(UNIQUE_SEPARATOR);
                }
                unique.push_str(text);
            }
            seek = Some(SeekState {
                unique,
                scanned_first_packet: false,
            });
        }

        let walk = TreeWalk::new(schema, &config.database_path, &index, levels, after);
        let ctx = Arc::new(LoadContext {
            root: config.database_path.clone(),
            index,
            free_path_filters,
            flex_filters,
            free_sort,
            failed: AtomicBool::new(false),
        });
        debug!(table = schema.name(), index = ctx.index.name(), "starting query");

        Ok(Self {
            ctx,
            walk,
            pending: VecDeque::new(),
            parallelism: config.query_parallelism.max(1),
            current: Vec::new().into_iter(),
            limit,
            served: 0,
            last: None,
            seek,
            done: false,
        })
    }

    /// Serves the next record in plan order, or `None` when the query is
    /// exhausted or the limit has been reached.
    pub fn fetch_next(&mut self) -> Result<Option<R>> {
        if self.done {
            return Ok(None);
        }
        if self.limit > 0 && self.served >= self.limit {
            self.done = true;
            return Ok(None);
        }
        loop {
            for record in self.current.by_ref() {
                if let Some(state) = &self.seek {
                    // Skip records up to and including the bookmarked one.
                    let found = R::schema().unique_key(&record) == state.unique;
                    if found {
                        self.seek = None;
                    }
                    continue;
                }
                self.last = Some(record.clone());
                self.served += 1;
                return Ok(Some(record));
            }
            match self.next_loaded() {
                Ok(Some(records)) => {
                    if let Some(state) = &mut self.seek {
                        if state.scanned_first_packet {
                            self.done = true;
                            return Err(StoreError::InvalidBookmark(
                                "bookmark no longer valid".into(),
                            ));
                        }
                        state.scanned_first_packet = true;
                    }
                    self.current = records.into_iter();
                }
                Ok(None) => {
                    self.done = true;
                    if self.seek.is_some() {
                        return Err(StoreError::InvalidBookmark(
                            "bookmark no longer valid".into(),
                        ));
                    }
                    return Ok(None);
                }
                Err(e) => {
                    self.done = true;
                    return Err(e);
                }
            }
        }
    }

    /// Drains the whole cursor into a vector.
    pub fn fetch_all(&mut self) -> Result<Vec<R>> {
        let mut records = Vec::new();
        while let Some(record) = self.fetch_next()? {
            records.push(record);
        }
        Ok(records)
    }

    /// A bookmark identifying the last record served; resuming a fresh run
    /// of the same query after it continues with the following record.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidBookmark`] if no record has been served yet.
    pub fn bookmark(&self) -> Result<Bookmark> {
        let record = self.last.as_ref().ok_or_else(|| {
            StoreError::InvalidBookmark("no record has been fetched".into())
        })?;
        let schema = R::schema();
        let mut path = Vec::new();
        for &col in self.ctx.index.columns() {
            path.push((
                schema.columns()[col].name().to_string(),
                schema.value_to_text(&record.get(col)),
            ));
        }
        for &col in schema.unique() {
            path.push((
                schema.columns()[col].name().to_string(),
                schema.value_to_text(&record.get(col)),
            ));
        }
        Ok(Bookmark::new(vec![Fragment {
            table: schema.name().to_string(),
            index: self.ctx.index.name().to_string(),
            path,
        }]))
    }

    /// Keeps the pipeline full: at most `parallelism` loads in flight.
    fn refill(&mut self) -> Result<()> {
        while self.pending.len() < self.parallelism {
            match self.walk.next_packet()? {
                Some(values) => {
                    let ctx = Arc::clone(&self.ctx);
                    self.pending
                        .push_back(thread::spawn(move || load_packet(&ctx, values)));
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Takes the next completed packet off the queue head. On failure,
    /// awaits every in-flight task and surfaces the first real error.
    fn next_loaded(&mut self) -> Result<Option<Vec<R>>> {
        self.refill()?;
        let Some(handle) = self.pending.pop_front() else {
            return Ok(None);
        };
        match join_load(handle) {
            Ok(records) => Ok(Some(records)),
            Err(first) => {
                let mut errors = vec![first];
                for handle in self.pending.drain(..) {
                    if let Err(e) = join_load(handle) {
                        errors.push(e);
                    }
                }
                Err(errors
                    .into_iter()
                    .find(|e| !matches!(e, StoreError::Aborted))
                    .unwrap_or(StoreError::Aborted))
            }
        }
    }
}

impl<R: Record> Drop for Cursor<R> {
    fn drop(&mut self) {
        // Abandon in-flight loads without blocking on their results.
        self.ctx.failed.store(true, Ordering::Release);
        for handle in self.pending.drain(..) {
            let _ = handle.join();
        }
    }
}

fn join_load<R>(handle: JoinHandle<Result<Vec<R>>>) -> Result<Vec<R>> {
    handle.join().unwrap_or(Err(StoreError::Aborted))
}
