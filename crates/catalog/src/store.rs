//! Committed catalog rows and the per-transaction overlay staged on top of
//! them.
//!
//! A mutating transaction never touches committed rows directly: inserts and
//! deletes accumulate in [`TxState`] and are merged by [`CommittedState::merge`]
//! at commit, or dropped wholesale at rollback. This is what makes an aborted
//! relation creation leave no catalog trace.

use std::collections::{BTreeMap, BTreeSet};

use cinderdb_primitives::{AttrDefId, CommandId, ConstraintId, RelationId, TypeId};
use rustc_hash::FxHashMap;

use crate::system_tables::{
    AttrDefRow, AttributeRow, ClassRow, ConstraintRow, DependRow, ForeignRow, InheritsRow,
    PartitionedRow, StatisticRow, SubscriptionRelRow, SystemCatalog,
};
use crate::types::TypeRow;

/// A cache-invalidation message, broadcast to other sessions at commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invalidation {
    /// A row of `catalog` affecting `relation` changed.
    Catalog {
        catalog: SystemCatalog,
        relation: RelationId,
    },
    /// The relation's cached descriptor must be rebuilt.
    RelationCache { relation: RelationId },
    /// The relation's cache entry must be discarded outright, not rebuilt.
    RelationFlush { relation: RelationId },
}

/// Staged changes of one catalog table within a transaction.
///
/// Inserted rows carry the command id that created them; scans only see rows
/// from earlier commands, so freshly inserted rows become visible to reads
/// after the command counter is bumped.
#[derive(Clone, Debug)]
pub(crate) struct Overlay<K: Ord + Clone, R: Clone> {
    pub(crate) inserted: BTreeMap<K, (CommandId, R)>,
    pub(crate) deleted: BTreeSet<K>,
}

impl<K: Ord + Clone, R: Clone> Default for Overlay<K, R> {
    fn default() -> Self {
        Self {
            inserted: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone, R: Clone> Overlay<K, R> {
    pub(crate) fn insert(&mut self, key: K, cmd: CommandId, row: R) {
        self.inserted.insert(key, (cmd, row));
    }

    /// Stages a delete. Returns true when the key was staged or committed.
    pub(crate) fn delete(&mut self, key: K, committed: bool) -> bool {
        // A staged copy is cancelled without trace; the committed original
        // (if any) still needs a tombstone so the merge removes it.
        let had_staged = self.inserted.remove(&key).is_some();
        if committed {
            self.deleted.insert(key);
            return true;
        }
        had_staged
    }

    pub(crate) fn is_deleted(&self, key: &K) -> bool {
        self.deleted.contains(key)
    }

    /// The staged row under `key`, regardless of command visibility.
    pub(crate) fn staged(&self, key: &K) -> Option<&R> {
        self.inserted.get(key).map(|(_, row)| row)
    }

    /// The staged row under `key`, as seen by a scan at `cmd`.
    pub(crate) fn visible(&self, key: &K, cmd: CommandId) -> Option<&R> {
        self.inserted
            .get(key)
            .filter(|(row_cmd, _)| *row_cmd < cmd)
            .map(|(_, row)| row)
    }

    pub(crate) fn visible_iter(&self, cmd: CommandId) -> impl Iterator<Item = (&K, &R)> {
        self.inserted
            .iter()
            .filter(move |(_, (row_cmd, _))| *row_cmd < cmd)
            .map(|(k, (_, row))| (k, row))
    }

    pub(crate) fn staged_iter(&self) -> impl Iterator<Item = (&K, &R)> {
        self.inserted.iter().map(|(k, (_, row))| (k, row))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.deleted.is_empty()
    }
}

/// All catalog rows whose creating transactions have committed.
///
/// The row maps are public for read access between transactions; mutation
/// goes through a transaction's staged overlay exclusively.
#[derive(Default)]
pub struct CommittedState {
    pub classes: FxHashMap<RelationId, ClassRow>,
    pub attributes: BTreeMap<(RelationId, i16), AttributeRow>,
    pub types: FxHashMap<TypeId, TypeRow>,
    pub constraints: BTreeMap<ConstraintId, ConstraintRow>,
    pub attr_defaults: BTreeMap<AttrDefId, AttrDefRow>,
    pub depends: Vec<DependRow>,
    pub inherits: BTreeMap<(RelationId, i16), InheritsRow>,
    pub partitioned: BTreeMap<RelationId, PartitionedRow>,
    pub foreign_tables: BTreeMap<RelationId, ForeignRow>,
    pub statistics: BTreeMap<(RelationId, i16), StatisticRow>,
    pub subscription_rels: BTreeMap<(u32, u32), SubscriptionRelRow>,
    /// Invalidations broadcast by committed transactions, newest last.
    /// Other sessions consume these to refresh their caches.
    pub(crate) inval_log: Vec<Invalidation>,
}

/// Row changes staged by one transaction.
#[derive(Default)]
pub struct TxState {
    pub(crate) classes: Overlay<RelationId, ClassRow>,
    pub(crate) attributes: Overlay<(RelationId, i16), AttributeRow>,
    pub(crate) types: Overlay<TypeId, TypeRow>,
    pub(crate) constraints: Overlay<ConstraintId, ConstraintRow>,
    pub(crate) attr_defaults: Overlay<AttrDefId, AttrDefRow>,
    /// Dependency edges only ever accumulate within a transaction; deletion
    /// happens by referrer, tracked separately.
    pub(crate) depends_added: Vec<DependRow>,
    pub(crate) depends_deleted: Vec<DependRow>,
    pub(crate) inherits: Overlay<(RelationId, i16), InheritsRow>,
    pub(crate) partitioned: Overlay<RelationId, PartitionedRow>,
    pub(crate) foreign_tables: Overlay<RelationId, ForeignRow>,
    pub(crate) statistics: Overlay<(RelationId, i16), StatisticRow>,
    pub(crate) subscription_rels: Overlay<(u32, u32), SubscriptionRelRow>,
}

impl TxState {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
            && self.attributes.is_empty()
            && self.types.is_empty()
            && self.constraints.is_empty()
            && self.attr_defaults.is_empty()
            && self.depends_added.is_empty()
            && self.depends_deleted.is_empty()
            && self.inherits.is_empty()
            && self.partitioned.is_empty()
            && self.foreign_tables.is_empty()
            && self.statistics.is_empty()
            && self.subscription_rels.is_empty()
    }
}

fn merge_overlay<K: Ord + Clone, R: Clone>(
    committed: &mut BTreeMap<K, R>,
    overlay: Overlay<K, R>,
) {
    for key in overlay.deleted {
        committed.remove(&key);
    }
    for (key, (_, row)) in overlay.inserted {
        committed.insert(key, row);
    }
}

impl CommittedState {
    /// Folds a transaction's staged rows into the committed store and
    /// appends its invalidation messages to the broadcast log.
    pub(crate) fn merge(&mut self, tx: TxState, invals: Vec<Invalidation>) {
        for key in tx.classes.deleted {
            self.classes.remove(&key);
        }
        for (key, (_, row)) in tx.classes.inserted {
            self.classes.insert(key, row);
        }
        merge_overlay(&mut self.attributes, tx.attributes);
        for key in tx.types.deleted {
            self.types.remove(&key);
        }
        for (key, (_, row)) in tx.types.inserted {
            self.types.insert(key, row);
        }
        merge_overlay(&mut self.constraints, tx.constraints);
        merge_overlay(&mut self.attr_defaults, tx.attr_defaults);
        self.depends.retain(|edge| !tx.depends_deleted.contains(edge));
        self.depends.extend(tx.depends_added);
        merge_overlay(&mut self.inherits, tx.inherits);
        merge_overlay(&mut self.partitioned, tx.partitioned);
        merge_overlay(&mut self.foreign_tables, tx.foreign_tables);
        merge_overlay(&mut self.statistics, tx.statistics);
        merge_overlay(&mut self.subscription_rels, tx.subscription_rels);
        self.inval_log.extend(invals);
    }

    /// Broadcast log of committed invalidations, oldest first.
    pub fn invalidations(&self) -> &[Invalidation] {
        &self.inval_log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_visibility_follows_command_counter() {
        let mut overlay: Overlay<u32, &'static str> = Overlay::default();
        overlay.insert(1, 5, "row");
        assert!(overlay.visible(&1, 5).is_none());
        assert_eq!(overlay.visible(&1, 6), Some(&"row"));
        assert_eq!(overlay.staged(&1), Some(&"row"));
    }

    #[test]
    fn delete_of_staged_row_leaves_no_trace() {
        let mut overlay: Overlay<u32, &'static str> = Overlay::default();
        overlay.insert(1, 0, "row");
        assert!(overlay.delete(1, false));
        assert!(overlay.is_empty());
    }

    #[test]
    fn delete_of_committed_row_is_staged() {
        let mut overlay: Overlay<u32, &'static str> = Overlay::default();
        assert!(overlay.delete(1, true));
        assert!(overlay.is_deleted(&1));
        assert!(!overlay.delete(2, false));
    }

    #[test]
    fn delete_after_update_tombstones_the_committed_row() {
        let mut overlay: Overlay<u32, &'static str> = Overlay::default();
        // A committed row was updated in this transaction, then deleted.
        overlay.insert(1, 0, "updated");
        assert!(overlay.delete(1, true));
        assert!(overlay.staged(&1).is_none());
        assert!(overlay.is_deleted(&1));
    }
}
