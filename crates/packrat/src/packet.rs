//! One packet: a compressed tab-separated file holding every record that
//! shares an index path.
//!
//! A packet is the smallest unit of read, write, and locking. On disk it is
//! a gzip stream wrapping TSV text: the first line names the table's columns
//! in schema order, each following line is one record, and nulls appear as
//! the schema's null sentinel. Decoding tolerates column additions, removals
//! and reordering across packets of the same table; writers always emit the
//! current schema's column set.

use crate::config::Durability;
use crate::error::{IoPhase, Result, StoreError};
use crate::filter::{FlexFilter, PathFilter, SortOrder};
use crate::fname;
use crate::schema::{Index, Record};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File extension of packet files.
pub const PACKET_EXTENSION: &str = "tsv.gz";

/// Suffix appended to a packet path for the durable write's temporary file.
const TMP_SUFFIX: &str = ".tmp";

/// Row selection applied while a packet decodes.
///
/// All three parts are the "free" remainder of a query plan: filters and
/// sorts the chosen index path did not absorb.
pub struct RowSelection<'a, R> {
    /// Path filters by schema column position, evaluated per row.
    pub path_filters: &'a [(usize, PathFilter)],
    /// Arbitrary record predicates, evaluated after materialization.
    pub flex_filters: &'a [FlexFilter<R>],
    /// Sort directives applied to the decoded row list.
    pub sort: &'a [(usize, SortOrder)],
}

/// Compares two records under a sequence of sort directives.
pub(crate) fn compare_records<R: Record>(a: &R, b: &R, sort: &[(usize, SortOrder)]) -> Ordering {
    for &(col, order) in sort {
        let ord = a.get(col).cmp(&b.get(col));
        let ord = match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// In-memory image of one packet file.
pub struct Packet<R: Record> {
    index: Index,
    path_values: Vec<String>,
    path: PathBuf,
    buffer: Option<Vec<u8>>,
    records: BTreeMap<String, R>,
}

impl<R: Record> Packet<R> {
    /// Describes the packet holding records whose index columns render to
    /// `path_values`. Computes the file path; performs no I/O.
    pub fn new(root: &Path, index: &Index, path_values: Vec<String>) -> Self {
        let schema = R::schema();
        let mut path = root.join(schema.name()).join(index.name());
        let last = path_values.len().saturating_sub(1);
        for (level, value) in path_values.iter().enumerate() {
            let encoded = fname::encode(value);
            if level == last {
                path.push(format!("{encoded}.{PACKET_EXTENSION}"));
            } else {
                path.push(encoded);
            }
        }
        Self {
            index: index.clone(),
            path_values,
            path,
            buffer: None,
            records: BTreeMap::new(),
        }
    }

    /// The packet's file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The index this packet belongs to.
    pub fn index(&self) -> &Index {
        &self.index
    }

    /// The packet's path values (string forms, one per directory level).
    pub fn path_values(&self) -> &[String] {
        &self.path_values
    }

    /// Reads the packet file into the in-memory compressed buffer.
    ///
    /// Idempotent; a missing file is not an error (the packet is empty).
    /// Must be called under the packet's lock.
    pub fn load(&mut self) -> Result<()> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                self.buffer = Some(bytes);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.buffer = None;
                Ok(())
            }
            Err(e) => Err(StoreError::io(IoPhase::Read, &self.path, e)),
        }
    }

    /// Decodes the loaded buffer into records.
    ///
    /// Builds a mapping between the file's own columns and the schema's:
    /// reordered columns are followed, columns missing from the file decode
    /// as null, and unknown file columns are dropped. Rows failing
    /// `selection` are skipped before they reach the in-memory map. The
    /// returned list holds the surviving records, stable-sorted by the
    /// selection's sort directives; the map keeps an independent copy per
    /// unique key.
    pub fn decode(&mut self, selection: Option<&RowSelection<'_, R>>) -> Result<Vec<R>> {
        self.records.clear();
        let Some(buffer) = &self.buffer else {
            return Ok(Vec::new());
        };

        let mut text = String::new();
        GzDecoder::new(buffer.as_slice())
            .read_to_string(&mut text)
            .map_err(|e| StoreError::PacketCorrupt {
                path: self.path.clone(),
                line: 0,
                reason: format!("not a valid compressed stream: {e}"),
            })?;
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let schema = R::schema();
        let mut lines = text.lines();
        let header: Vec<&str> = lines.next().unwrap_or("").split('\t').collect();

        // file column -> schema column (None = unknown, dropped)
        let file_to_schema: Vec<Option<usize>> = header
            .iter()
            .map(|name| schema.column_position(name))
            .collect();
        // schema column -> file column (None = missing, reads as null)
        let schema_to_file: Vec<Option<usize>> = (0..schema.columns().len())
            .map(|col| file_to_schema.iter().position(|&m| m == Some(col)))
            .collect();
        if file_to_schema.iter().any(Option::is_none) {
            warn!(path = %self.path.display(), "dropping unknown packet columns");
        }

        let corrupt = |line: usize, reason: String| StoreError::PacketCorrupt {
            path: self.path.clone(),
            line,
            reason,
        };

        let mut result = Vec::new();
        for (row, line) in lines.enumerate() {
            let line_no = row + 2;
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != header.len() {
                return Err(corrupt(
                    line_no,
                    format!("row has {} columns, header has {}", fields.len(), header.len()),
                ));
            }

            if let Some(selection) = selection {
                let mut keep = true;
                for (col, filter) in selection.path_filters {
                    let value = match schema_to_file[*col] {
                        Some(pos) => schema
                            .value_from_text(*col, fields[pos])
                            .map_err(|reason| corrupt(line_no, reason))?,
                        None => crate::schema::Value::Null,
                    };
                    if !filter.evaluate(&value) {
                        keep = false;
                        break;
                    }
                }
                if !keep {
                    continue;
                }
            }

            let mut record = R::default();
            for (col, file_pos) in schema_to_file.iter().enumerate() {
                let value = match file_pos {
                    Some(pos) => schema
                        .value_from_text(col, fields[*pos])
                        .map_err(|reason| corrupt(line_no, reason))?,
                    None => crate::schema::Value::Null,
                };
                record.set(col, value);
            }

            if let Some(selection) = selection {
                if !selection.flex_filters.iter().all(|f| f(&record)) {
                    continue;
                }
            }

            self.records
                .insert(schema.unique_key(&record), record.clone());
            result.push(record);
        }

        if let Some(selection) = selection {
            if !selection.sort.is_empty() {
                result.sort_by(|a, b| compare_records(a, b, selection.sort));
            }
        }
        Ok(result)
    }

    /// Looks up a record by unique key.
    pub fn get(&self, unique: &str) -> Option<&R> {
        self.records.get(unique)
    }

    /// Inserts or replaces a record under its unique key.
    pub fn set(&mut self, unique: String, record: R) {
        self.records.insert(unique, record);
    }

    /// Removes a record by unique key.
    pub fn remove(&mut self, unique: &str) -> Option<R> {
        self.records.remove(unique)
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the packet holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Re-encodes the in-memory records into the compressed buffer.
    ///
    /// Emits the current schema's columns in declared order; null columns
    /// are written as the schema's null sentinel.
    pub fn encode(&mut self) -> Result<()> {
        let schema = R::schema();
        let mut text = String::new();
        for (i, column) in schema.columns().iter().enumerate() {
            if i > 0 {
                text.push('\t');
            }
            text.push_str(column.name());
        }
        text.push('\n');
        for record in self.records.values() {
            for col in 0..schema.columns().len() {
                if col > 0 {
                    text.push('\t');
                }
                text.push_str(&schema.value_to_text(&record.get(col)));
            }
            text.push('\n');
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(text.as_bytes())
            .and_then(|_| encoder.finish())
            .map(|bytes| self.buffer = Some(bytes))
            .map_err(|e| StoreError::io(IoPhase::Write, &self.path, e))
    }

    /// Writes the packet durably to disk. Must be called under the packet's
    /// lock.
    ///
    /// An empty packet is unlinked instead of written. Otherwise the records
    /// are re-encoded and written according to `durability`:
    /// [`Durability::Buffered`] overwrites in place and flushes;
    /// [`Durability::Atomic`] writes a temporary file, flushes, then swaps
    /// it over the target, surfacing [`StoreError::RecoveryRequired`] if the
    /// swap fails after the data is already durable.
    pub fn save(&mut self, durability: Durability) -> Result<()> {
        if self.records.is_empty() {
            return self.unlink();
        }
        self.encode()?;
        let buffer = self.buffer.as_deref().unwrap_or_default();

        let parent = self.path.parent().unwrap_or(Path::new(""));
        fs::create_dir_all(parent).map_err(|e| StoreError::io(IoPhase::CreateDir, parent, e))?;

        match durability {
            Durability::Buffered => {
                write_and_sync(&self.path, buffer)?;
            }
            Durability::Atomic => {
                let mut tmp = self.path.clone().into_os_string();
                tmp.push(TMP_SUFFIX);
                let tmp = PathBuf::from(tmp);
                write_and_sync(&tmp, buffer)?;
                // From here on the new data is durable in the tmp file; a
                // failure must tell the host how to finish the swap by hand.
                match fs::remove_file(&self.path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(StoreError::RecoveryRequired {
                            tmp,
                            path: self.path.clone(),
                            source: e,
                        })
                    }
                }
                fs::rename(&tmp, &self.path).map_err(|e| StoreError::RecoveryRequired {
                    tmp,
                    path: self.path.clone(),
                    source: e,
                })?;
            }
        }
        debug!(path = %self.path.display(), records = self.records.len(), "saved packet");
        Ok(())
    }

    /// Removes the packet file, if present.
    fn unlink(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "unlinked empty packet");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(IoPhase::Delete, &self.path, e)),
        }
    }
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        fs::File::create(path).map_err(|e| StoreError::io(IoPhase::Write, path, e))?;
    file.write_all(bytes)
        .map_err(|e| StoreError::io(IoPhase::Write, path, e))?;
    file.sync_all()
        .map_err(|e| StoreError::io(IoPhase::Sync, path, e))
}
