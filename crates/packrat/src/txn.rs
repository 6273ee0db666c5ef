//! Transactions: batched upserts and removes, query-style bulk deletes and
//! updates, and the three-phase parallel commit.
//!
//! `add` and `remove` expand each record across every index of its table
//! into per-packet plans keyed by `(index, index path)`. `commit` then runs
//! up to three phases, each on a bounded worker pool: query-deletes,
//! query-updates, and finally the accumulated upsert/remove plans. Within a
//! phase there is no ordering guarantee across packets; per-packet work is
//! serialized by the packet lock. Readers running concurrently may observe
//! some indexes updated before others (read-uncommitted).

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::lock::LockTable;
use crate::packet::Packet;
use crate::pool;
use crate::query::engine::TreeWalk;
use crate::query::{Query, QueryPlan};
use crate::schema::{Index, Record, TableSchema};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Hook invoked under the packet lock for every upsert that replaces an
/// existing record: `(stored, incoming) -> merged`, or `None` to discard
/// the upsert.
pub type UpdateHook<R> = Arc<dyn Fn(&R, R) -> Option<R> + Send + Sync>;

/// Mutator applied to every record matched by a bulk update.
pub type Updater<R> = Arc<dyn Fn(&mut R) + Send + Sync>;

/// Mutations destined for one packet of one index.
struct PacketPlan<R> {
    index: Index,
    path_values: Vec<String>,
    upserts: BTreeMap<String, R>,
    removes: BTreeSet<String>,
}

/// Records the distinct `(index, index path)` packets that hold records
/// touched under another index, so a second pass can mirror the mutation.
struct PacketCollector {
    entries: Mutex<BTreeMap<(String, String), CollectedPacket>>,
}

struct CollectedPacket {
    index: Index,
    path_values: Vec<String>,
    uniques: BTreeSet<String>,
}

impl PacketCollector {
    fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Registers `record` (keyed by its pre-mutation unique key) with every
    /// index other than `touched`.
    fn collect<R: Record>(
        &self,
        schema: &TableSchema,
        touched: &str,
        record: &R,
        unique: &str,
    ) {
        let mut entries = self.entries.lock().unwrap();
        for index in schema.indexes() {
            if index.name() == touched {
                continue;
            }
            let path_values = schema.index_path(index, record);
            let key = (index.name().to_string(), path_values.join("\0"));
            entries
                .entry(key)
                .or_insert_with(|| CollectedPacket {
                    index: index.clone(),
                    path_values,
                    uniques: BTreeSet::new(),
                })
                .uniques
                .insert(unique.to_string());
        }
    }

    fn into_packets(self) -> Vec<CollectedPacket> {
        self.entries
            .into_inner()
            .unwrap()
            .into_values()
            .collect()
    }
}

/// A batch of mutations committed as one unit of work.
///
/// Obtained from [`Table::begin`](crate::store::Table::begin). The batch is
/// emptied by [`commit`](Transaction::commit), succeed or fail; a failed
/// commit may have updated some indexes and not others (see the crate-level
/// consistency notes).
pub struct Transaction<R: Record> {
    config: StoreConfig,
    plans: BTreeMap<(String, String), PacketPlan<R>>,
    bulk_deletes: Vec<Query<R>>,
    bulk_updates: Vec<(Query<R>, Updater<R>)>,
    on_update: Option<UpdateHook<R>>,
}

impl<R: Record> Transaction<R> {
    pub(crate) fn new(config: StoreConfig) -> Self {
        Self {
            config,
            plans: BTreeMap::new(),
            bulk_deletes: Vec::new(),
            bulk_updates: Vec::new(),
            on_update: None,
        }
    }

    /// Schedules an upsert of `record` under every index of its table.
    ///
    /// A prior `remove` of the same unique key in this transaction is
    /// superseded.
    pub fn add(&mut self, record: R) {
        let schema = R::schema();
        let unique = schema.unique_key(&record);
        for index in schema.indexes() {
            let plan = self.plan_for(schema, index, &record);
            plan.removes.remove(&unique);
            plan.upserts.insert(unique.clone(), record.clone());
        }
    }

    /// Schedules removal of `record` (by unique key) under every index.
    ///
    /// A prior `add` of the same unique key in this transaction is
    /// superseded.
    pub fn remove(&mut self, record: &R) {
        let schema = R::schema();
        let unique = schema.unique_key(record);
        for index in schema.indexes() {
            let plan = self.plan_for(schema, index, record);
            plan.upserts.remove(&unique);
            plan.removes.insert(unique.clone());
        }
    }

    /// Schedules deletion of every record the query matches.
    ///
    /// The query's `limit` and bookmark are ignored; all matches go.
    pub fn delete(&mut self, query: Query<R>) {
        self.bulk_deletes.push(query);
    }

    /// Schedules an in-place mutation of every record the query matches.
    ///
    /// The updater must not change indexed columns; a violation fails the
    /// commit with [`StoreError::IllegalUpdate`] and leaves the offending
    /// packet untouched.
    pub fn update(&mut self, query: Query<R>, updater: impl Fn(&mut R) + Send + Sync + 'static) {
        self.bulk_updates.push((query, Arc::new(updater)));
    }

    /// Installs a merge hook consulted for every upsert that would replace
    /// an existing record. Returning `None` discards that upsert.
    pub fn on_update(&mut self, hook: impl Fn(&R, R) -> Option<R> + Send + Sync + 'static) {
        self.on_update = Some(Arc::new(hook));
    }

    /// True if nothing has been scheduled.
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty() && self.bulk_deletes.is_empty() && self.bulk_updates.is_empty()
    }

    /// Number of distinct packets the accumulated upserts and removes touch.
    pub fn pending_packets(&self) -> usize {
        self.plans.len()
    }

    /// Executes the batch: query-deletes, then query-updates, then the
    /// upsert/remove plans, each phase on a pool of
    /// `transaction_parallelism` workers.
    ///
    /// The first worker error is re-surfaced after its phase drains; later
    /// phases do not run. The transaction is emptied either way.
    pub fn commit(&mut self) -> Result<()> {
        let result = self.run_phases();
        self.plans.clear();
        self.bulk_deletes.clear();
        self.bulk_updates.clear();
        result
    }

    fn plan_for(
        &mut self,
        schema: &TableSchema,
        index: &Index,
        record: &R,
    ) -> &mut PacketPlan<R> {
        let path_values = schema.index_path(index, record);
        let key = (index.name().to_string(), path_values.join("\0"));
        self.plans.entry(key).or_insert_with(|| PacketPlan {
            index: index.clone(),
            path_values,
            upserts: BTreeMap::new(),
            removes: BTreeSet::new(),
        })
    }

    fn run_phases(&mut self) -> Result<()> {
        let deletes = std::mem::take(&mut self.bulk_deletes);
        for query in deletes {
            self.run_bulk_delete(query)?;
        }
        let updates = std::mem::take(&mut self.bulk_updates);
        for (query, updater) in updates {
            self.run_bulk_update(query, updater)?;
        }
        self.run_packet_plans()
    }

    /// Enumerates the packets a plan's walk selects, without loading any.
    fn matching_packets(&self, plan: &QueryPlan<R>) -> Result<Vec<Vec<String>>> {
        let mut walk = TreeWalk::new(
            R::schema(),
            &self.config.database_path,
            &plan.index,
            plan.levels.clone(),
            vec![None; plan.levels.len()],
        );
        let mut packets = Vec::new();
        while let Some(values) = walk.next_packet()? {
            packets.push(values);
        }
        Ok(packets)
    }

    fn run_bulk_delete(&self, query: Query<R>) -> Result<()> {
        let schema = R::schema();
        let plan = QueryPlan::build(query)?;
        let packets = self.matching_packets(&plan)?;
        debug!(
            table = schema.name(),
            index = plan.index_name(),
            packets = packets.len(),
            "bulk delete"
        );

        let collector = PacketCollector::new();
        pool::run_parallel(self.config.transaction_parallelism, packets, |values| {
            let mut packet = Packet::<R>::new(&self.config.database_path, &plan.index, values);
            let _guard = LockTable::global().lock(packet.path());
            packet.load()?;
            let records = packet.decode(None)?;
            let mut removed = false;
            for record in records {
                if plan.matches_free(&record) {
                    let unique = schema.unique_key(&record);
                    packet.remove(&unique);
                    collector.collect(schema, plan.index.name(), &record, &unique);
                    removed = true;
                }
            }
            if removed {
                packet.save(self.config.durability)?;
            }
            Ok(())
        })?;

        // Mirror the deletions under every other index.
        pool::run_parallel(
            self.config.transaction_parallelism,
            collector.into_packets(),
            |entry| {
                let mut packet =
                    Packet::<R>::new(&self.config.database_path, &entry.index, entry.path_values);
                let _guard = LockTable::global().lock(packet.path());
                packet.load()?;
                packet.decode(None)?;
                let mut removed = false;
                for unique in &entry.uniques {
                    removed |= packet.remove(unique).is_some();
                }
                if removed {
                    packet.save(self.config.durability)?;
                }
                Ok(())
            },
        )
    }

    fn run_bulk_update(&self, query: Query<R>, updater: Updater<R>) -> Result<()> {
        let schema = R::schema();
        let plan = QueryPlan::build(query)?;
        let packets = self.matching_packets(&plan)?;
        debug!(
            table = schema.name(),
            index = plan.index_name(),
            packets = packets.len(),
            "bulk update"
        );

        let collector = PacketCollector::new();
        pool::run_parallel(self.config.transaction_parallelism, packets, |values| {
            let mut packet = Packet::<R>::new(&self.config.database_path, &plan.index, values);
            let _guard = LockTable::global().lock(packet.path());
            packet.load()?;
            let records = packet.decode(None)?;
            let mut changed = false;
            for record in records {
                if !plan.matches_free(&record) {
                    continue;
                }
                let unique = schema.unique_key(&record);
                let updated = apply_updater(schema, &updater, &record)?;
                let new_unique = schema.unique_key(&updated);
                if new_unique != unique {
                    packet.remove(&unique);
                }
                packet.set(new_unique, updated);
                collector.collect(schema, plan.index.name(), &record, &unique);
                changed = true;
            }
            if changed {
                packet.save(self.config.durability)?;
            }
            Ok(())
        })?;

        pool::run_parallel(
            self.config.transaction_parallelism,
            collector.into_packets(),
            |entry| {
                let mut packet =
                    Packet::<R>::new(&self.config.database_path, &entry.index, entry.path_values);
                let _guard = LockTable::global().lock(packet.path());
                packet.load()?;
                packet.decode(None)?;
                let mut changed = false;
                for unique in &entry.uniques {
                    let Some(record) = packet.get(unique).cloned() else {
                        continue;
                    };
                    let updated = apply_updater(schema, &updater, &record)?;
                    let new_unique = schema.unique_key(&updated);
                    if &new_unique != unique {
                        packet.remove(unique);
                    }
                    packet.set(new_unique, updated);
                    changed = true;
                }
                if changed {
                    packet.save(self.config.durability)?;
                }
                Ok(())
            },
        )
    }

    fn run_packet_plans(&mut self) -> Result<()> {
        let schema = R::schema();
        let plans: Vec<PacketPlan<R>> = std::mem::take(&mut self.plans).into_values().collect();
        if plans.is_empty() {
            return Ok(());
        }
        debug!(
            table = schema.name(),
            packets = plans.len(),
            "committing packet plans"
        );

        let on_update = self.on_update.clone();
        pool::run_parallel(self.config.transaction_parallelism, plans, |plan| {
            let mut packet =
                Packet::<R>::new(&self.config.database_path, &plan.index, plan.path_values);
            let _guard = LockTable::global().lock(packet.path());
            packet.load()?;
            packet.decode(None)?;

            for (unique, incoming) in plan.upserts {
                let stored = packet.get(&unique).cloned();
                match (&on_update, stored) {
                    (Some(hook), Some(old)) => {
                        let Some(merged) = hook(&old, incoming) else {
                            continue;
                        };
                        let merged_path = schema.index_path(&plan.index, &merged);
                        if merged_path.as_slice() != packet.path_values() {
                            return Err(StoreError::IllegalUpdate {
                                table: schema.name().to_string(),
                                reason: format!(
                                    "update hook moved a record out of its `{}` packet",
                                    plan.index.name()
                                ),
                            });
                        }
                        let merged_unique = schema.unique_key(&merged);
                        if merged_unique != unique {
                            packet.remove(&unique);
                        }
                        packet.set(merged_unique, merged);
                    }
                    _ => packet.set(unique, incoming),
                }
            }
            for unique in plan.removes {
                packet.remove(&unique);
            }
            packet.save(self.config.durability)
        })
    }
}

/// Applies a bulk updater to a copy of `record`, enforcing that no index
/// path changes.
fn apply_updater<R: Record>(
    schema: &TableSchema,
    updater: &Updater<R>,
    record: &R,
) -> Result<R> {
    let mut updated = record.clone();
    updater(&mut updated);
    for index in schema.indexes() {
        if schema.index_path(index, record) != schema.index_path(index, &updated) {
            return Err(StoreError::IllegalUpdate {
                table: schema.name().to_string(),
                reason: format!("bulk update changed columns of index `{}`", index.name()),
            });
        }
    }
    Ok(updated)
}
