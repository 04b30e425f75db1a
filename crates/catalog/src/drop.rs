//! The destroyer and mutator side of the lifecycle: dropping a relation's
//! catalog rows, dropping a column in place, partition bound storage, and
//! the foreign-key safety scan used by truncation.

use std::collections::BTreeSet;

use anyhow::anyhow;
use cinderdb_primitives::{
    AttrNumber, ConstraintId, GeneratedKind, RelationId, RelationKind, TypeId,
};
use rustc_hash::FxHashSet;

use crate::error::{RelationError, Result};
use crate::system_tables::{
    dropped_column_name, ConstraintKind, InheritsRow, ObjectClass, PartitionBound,
};
use crate::tx::{CatalogTx, LockMode, Session};

impl Session {
    /// Removes the relation's own catalog rows and schedules its storage
    /// for unlink at commit. The caller has already cascaded through the
    /// dependency graph; nothing here chases dependents.
    pub fn drop_with_catalog(&mut self, tx: &mut CatalogTx, id: RelationId) -> Result<()> {
        let class = tx.class_row(id).ok_or(RelationError::NotFound(id))?;
        log::trace!("RELATION DROPPING: {} ({id})", class.name);

        // Partition descriptors cached by other sessions go stale the
        // moment this partition disappears, so the parent is locked first.
        let mut locked_parent = None;
        let mut locked_default = None;
        if class.is_partition {
            if let Some(inherits) = tx.inherits_parents_of(id).first().copied() {
                let parent = inherits.parent;
                tx.lock_relation(parent, LockMode::AccessExclusive);
                locked_parent = Some(parent);
                if let Some(part) = tx.partitioned_row(parent) {
                    // Dropping a non-default sibling changes the default
                    // partition's implicit constraint.
                    if part.default_partition.is_valid() && part.default_partition != id {
                        tx.lock_relation(part.default_partition, LockMode::AccessExclusive);
                        locked_default = Some(part.default_partition);
                    }
                }
            }
        }

        tx.lock_relation(id, LockMode::AccessExclusive);
        self.check_not_in_use(id, &class.name)?;

        // Serializable transactions holding a predicate lock on this
        // relation must observe the drop as a read-write conflict.
        log::trace!("flagging read-write conflict for droppers of {id}");

        if class.kind == RelationKind::ForeignTable {
            tx.delete_foreign(id);
        }
        if class.kind == RelationKind::PartitionedTable {
            tx.delete_partitioned(id);
        }
        if let Some(parent) = locked_parent {
            let is_default = tx
                .partitioned_row(parent)
                .map(|p| p.default_partition == id)
                .unwrap_or(false);
            if is_default {
                tx.update_partitioned(parent, |row| {
                    row.default_partition = RelationId::INVALID;
                })?;
            }
        }

        if class.kind.has_storage() {
            let file = self.relation_file(&class);
            self.schedule_storage_drop(tx.nesting_level(), file.locator, file.backend);
        }

        tx.remove_statistics(id, None);
        tx.delete_subscription_rels_for(id);
        self.unregister_on_commit(id);

        // Flush rather than rebuild: a partial rebuild against half-deleted
        // rows would be hazardous.
        tx.flush_relation(id);

        tx.delete_inherits_of_child(id);
        // Own rows only: the relation's constraint, default and row-type
        // rows were already removed by the caller's dependency cascade.
        // What remains here are the edges this relation itself emitted.
        tx.delete_depends_of_referrer(ObjectClass::Class, id.0);
        tx.delete_attributes_of(id);
        tx.delete_class(id);

        if let Some(parent) = locked_parent {
            tx.invalidate_relation(parent);
        }
        if let Some(default) = locked_default {
            tx.invalidate_relation(default);
        }
        log::trace!("RELATION DROPPED: {id}");
        Ok(())
    }

    /// ALTER TABLE DROP COLUMN's mechanics: the attribute row survives with
    /// the dropped marker so existing tuples stay readable.
    pub fn remove_attribute_by_id(&mut self, tx: &mut CatalogTx, rel: RelationId, attno: AttrNumber) -> Result<()> {
        // The caller may arrive here by cascade without holding a lock yet.
        tx.lock_relation(rel, LockMode::AccessExclusive);
        if attno.is_system() || !attno.is_valid() {
            return Err(anyhow!("cannot drop system attribute {attno} of relation {rel}").into());
        }
        tx.update_attribute(rel, attno, |row| {
            row.is_dropped = true;
            // The type is gone but its physical shape stays readable.
            row.type_id = TypeId::INVALID;
            row.not_null = false;
            row.generated = GeneratedKind::None;
            row.has_default = false;
            row.has_missing = false;
            row.missing_value = None;
            row.name = dropped_column_name(row.attno);
            row.stat_target = None;
            row.acl = None;
            row.options = None;
            row.fdw_options = None;
        })?;
        if tx.delete_attrdef_for_column(rel, attno).is_some() {
            log::trace!("dropped default of column {attno} of relation {rel}");
        }
        tx.remove_statistics(rel, Some(attno));
        Ok(())
    }

    /// Marks `rel` as a partition of `parent` with the given bound, rotating
    /// the parent's default-partition slot when the bound is the default
    /// marker.
    pub fn store_partition_bound(
        &mut self,
        tx: &mut CatalogTx,
        rel: RelationId,
        parent: RelationId,
        bound: &PartitionBound,
    ) -> Result<()> {
        let class = tx.class_row(rel).ok_or(RelationError::NotFound(rel))?;
        let parent_part = tx
            .partitioned_row(parent)
            .ok_or_else(|| anyhow!("relation {parent} is not a partitioned table"))?;
        let prior_default = parent_part.default_partition;

        if bound.is_default() && prior_default.is_valid() && prior_default != rel {
            let existing = tx
                .class_row(prior_default)
                .map(|c| c.name)
                .unwrap_or_default();
            return Err(RelationError::DefaultPartitionExists {
                new: class.name.clone(),
                existing,
            }
            .into());
        }

        tx.update_partition_bound(rel, bound)?;

        if tx.inherits_parents_of(rel).is_empty() {
            tx.insert_inherits(InheritsRow {
                child: rel,
                parent,
                seqno: 1,
            });
            tx.update_class(parent, |row| row.has_subclass = true)?;
        }

        if bound.is_default() {
            tx.update_partitioned(parent, |row| {
                row.default_partition = rel;
            })?;
        }

        // Make the bound visible to this transaction's later commands.
        tx.command_counter_bump();

        tx.invalidate_relation(parent);
        if prior_default.is_valid() && prior_default != rel {
            tx.invalidate_relation(prior_default);
        }
        log::trace!("partition bound stored for {rel} under {parent}");
        Ok(())
    }
}

impl CatalogTx {
    /// Relations outside `ids` holding foreign keys that reference any
    /// relation inside it. The constraint catalog is scanned sequentially;
    /// partitioned foreign keys are walked to their top parent, and the
    /// scan repeats until no new relation turns up. The result is sorted
    /// and deduplicated so error messages come out deterministic.
    pub fn find_referencing_fks(&self, ids: &[RelationId]) -> Vec<RelationId> {
        let input: FxHashSet<RelationId> = ids.iter().copied().collect();
        let constraints = self.all_constraints();
        let mut result: BTreeSet<RelationId> = BTreeSet::new();
        let mut tracked: FxHashSet<ConstraintId> = FxHashSet::default();

        loop {
            let mut changed = false;
            for con in &constraints {
                if con.kind != ConstraintKind::ForeignKey {
                    continue;
                }
                let references_input = input.contains(&con.referenced_class);
                if !references_input && !tracked.contains(&con.id) {
                    continue;
                }
                if !input.contains(&con.class) && result.insert(con.class) {
                    changed = true;
                }
                // One constraint row exists per partition; walking to the
                // top parent covers the whole partitioned foreign key.
                if con.parent.is_valid() && tracked.insert(con.parent) {
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        result.into_iter().collect()
    }
}
