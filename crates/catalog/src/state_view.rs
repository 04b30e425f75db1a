//! Row access for the mutating transaction: committed rows overlaid with the
//! transaction's staged changes.
//!
//! Keyed lookups and unique-index checks see staged rows immediately, the
//! way an index sees entries as they are inserted. Whole-table scans honor
//! the command counter: rows staged by the current command are invisible
//! until [`CatalogTx::command_counter_bump`](crate::tx::CatalogTx).

use anyhow::anyhow;
use cinderdb_primitives::{AttrDefId, AttrNumber, ConstraintId, NamespaceId, RelationId, SubscriptionId, TypeId};
use itertools::Itertools as _;

use crate::error::Result;
use crate::system_tables::{
    AttrDefRow, AttributeRow, ClassRow, ConstraintRow, DependRow, ForeignRow, InheritsRow,
    ObjectAddress, ObjectClass, PartitionedRow, StatisticRow, SubscriptionRelRow, SystemCatalog,
};
use crate::error::RelationError;
use crate::tx::CatalogTx;
use crate::types::TypeRow;

impl CatalogTx {
    // ---- st_class ----

    pub fn class_row(&self, id: RelationId) -> Option<ClassRow> {
        if let Some(row) = self.tx.classes.staged(&id) {
            return Some(row.clone());
        }
        if self.tx.classes.is_deleted(&id) {
            return None;
        }
        self.committed.classes.get(&id).cloned()
    }

    pub fn class_exists(&self, id: RelationId) -> bool {
        self.tx.classes.staged(&id).is_some()
            || (!self.tx.classes.is_deleted(&id) && self.committed.classes.contains_key(&id))
    }

    /// Unique-index probe on (namespace, name).
    pub fn class_by_name(&self, namespace: NamespaceId, name: &str) -> Option<RelationId> {
        for (id, row) in self.tx.classes.staged_iter() {
            if row.namespace == namespace && row.name == name {
                return Some(*id);
            }
        }
        self.committed
            .classes
            .values()
            .filter(|row| !self.tx.classes.is_deleted(&row.id))
            .find(|row| row.namespace == namespace && row.name == name)
            .map(|row| row.id)
    }

    /// Every visible class row, for scans. Order is by id.
    pub fn classes(&self) -> Vec<ClassRow> {
        self.committed
            .classes
            .values()
            .filter(|row| !self.tx.classes.is_deleted(&row.id))
            .filter(|row| self.tx.classes.staged(&row.id).is_none())
            .cloned()
            .chain(self.tx.classes.visible_iter(self.cmd).map(|(_, row)| row.clone()))
            .sorted_by_key(|row| row.id)
            .collect()
    }

    pub(crate) fn insert_class(&mut self, row: ClassRow) -> Result<()> {
        if self.class_exists(row.id) {
            return Err(anyhow!("duplicate key {} in st_class primary index", row.id).into());
        }
        if self.class_by_name(row.namespace, &row.name).is_some() {
            // The unique index on (namespace, name) catches creations that
            // raced past the builder's pre-check.
            return Err(RelationError::DuplicateTable(row.name.clone()).into());
        }
        let id = row.id;
        self.tx.classes.insert(id, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_class, id);
        Ok(())
    }

    pub(crate) fn update_class(&mut self, id: RelationId, f: impl FnOnce(&mut ClassRow)) -> Result<()> {
        let mut row = self.class_row(id).ok_or(RelationError::NotFound(id))?;
        f(&mut row);
        let committed = self.committed.classes.contains_key(&id);
        self.tx.classes.delete(id, committed);
        self.tx.classes.insert(id, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_class, id);
        Ok(())
    }

    pub(crate) fn delete_class(&mut self, id: RelationId) -> bool {
        let committed = self.committed.classes.contains_key(&id);
        let existed = self.tx.classes.delete(id, committed);
        if existed {
            self.note_catalog_change(SystemCatalog::st_class, id);
        }
        existed
    }

    // ---- st_attribute ----

    pub fn attribute_row(&self, rel: RelationId, attno: AttrNumber) -> Option<AttributeRow> {
        let key = (rel, attno.0);
        if let Some(row) = self.tx.attributes.staged(&key) {
            return Some(row.clone());
        }
        if self.tx.attributes.is_deleted(&key) {
            return None;
        }
        self.committed.attributes.get(&key).cloned()
    }

    /// All visible attribute rows of a relation, system attributes first
    /// (they carry negative numbers), then user attributes in order.
    pub fn attributes_of(&self, rel: RelationId) -> Vec<AttributeRow> {
        self.committed
            .attributes
            .range((rel, i16::MIN)..=(rel, i16::MAX))
            .filter(|(key, _)| !self.tx.attributes.is_deleted(key))
            .filter(|(key, _)| self.tx.attributes.visible(key, self.cmd).is_none())
            .map(|(_, row)| row.clone())
            .chain(
                self.tx
                    .attributes
                    .visible_iter(self.cmd)
                    .filter(|((r, _), _)| *r == rel)
                    .map(|(_, row)| row.clone()),
            )
            .sorted_by_key(|row| row.attno)
            .collect()
    }

    pub(crate) fn insert_attribute(&mut self, row: AttributeRow) {
        let key = (row.class, row.attno.0);
        let rel = row.class;
        self.tx.attributes.insert(key, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_attribute, rel);
    }

    pub(crate) fn update_attribute(
        &mut self,
        rel: RelationId,
        attno: AttrNumber,
        f: impl FnOnce(&mut AttributeRow),
    ) -> Result<()> {
        let mut row = self
            .attribute_row(rel, attno)
            .ok_or(crate::error::AttributeError::NotFound { rel, attno })?;
        f(&mut row);
        let key = (rel, attno.0);
        let committed = self.committed.attributes.contains_key(&key);
        self.tx.attributes.delete(key, committed);
        self.tx.attributes.insert(key, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_attribute, rel);
        Ok(())
    }

    pub(crate) fn delete_attributes_of(&mut self, rel: RelationId) {
        let keys: Vec<_> = self
            .committed
            .attributes
            .range((rel, i16::MIN)..=(rel, i16::MAX))
            .map(|(key, _)| *key)
            .chain(
                self.tx
                    .attributes
                    .staged_iter()
                    .filter(|((r, _), _)| *r == rel)
                    .map(|(key, _)| *key),
            )
            .collect();
        for key in keys {
            let committed = self.committed.attributes.contains_key(&key);
            self.tx.attributes.delete(key, committed);
        }
        self.note_catalog_change(SystemCatalog::st_attribute, rel);
    }

    // ---- st_type ----

    pub fn type_row(&self, id: TypeId) -> Option<TypeRow> {
        if let Some(row) = self.tx.types.staged(&id) {
            return Some(row.clone());
        }
        if self.tx.types.is_deleted(&id) {
            return None;
        }
        self.committed.types.get(&id).cloned()
    }

    pub fn type_exists(&self, id: TypeId) -> bool {
        self.tx.types.staged(&id).is_some()
            || (!self.tx.types.is_deleted(&id) && self.committed.types.contains_key(&id))
    }

    /// Unique-index probe on (namespace, name).
    pub fn type_by_name(&self, namespace: NamespaceId, name: &str) -> Option<TypeId> {
        for (id, row) in self.tx.types.staged_iter() {
            if row.namespace == namespace && row.name == name {
                return Some(*id);
            }
        }
        self.committed
            .types
            .values()
            .filter(|row| !self.tx.types.is_deleted(&row.id))
            .find(|row| row.namespace == namespace && row.name == name)
            .map(|row| row.id)
    }

    pub(crate) fn insert_type(&mut self, row: TypeRow) -> Result<()> {
        if self.type_exists(row.id) {
            return Err(anyhow!("duplicate key {} in st_type primary index", row.id).into());
        }
        if self.type_by_name(row.namespace, &row.name).is_some() {
            return Err(RelationError::DuplicateType(row.name.clone()).into());
        }
        self.tx.types.insert(row.id, self.cmd, row);
        Ok(())
    }

    pub(crate) fn update_type(&mut self, id: TypeId, f: impl FnOnce(&mut TypeRow)) -> Result<()> {
        let mut row = self
            .type_row(id)
            .ok_or_else(|| anyhow!("type {id} does not exist"))?;
        f(&mut row);
        let committed = self.committed.types.contains_key(&id);
        self.tx.types.delete(id, committed);
        self.tx.types.insert(id, self.cmd, row);
        Ok(())
    }

    /// Deletion primitive consumed by the dependency-deletion machinery
    /// when it cascades onto a row type.
    pub fn delete_type(&mut self, id: TypeId) -> bool {
        let committed = self.committed.types.contains_key(&id);
        self.tx.types.delete(id, committed)
    }

    // ---- st_constraint ----

    pub fn constraint_row(&self, id: ConstraintId) -> Option<ConstraintRow> {
        if let Some(row) = self.tx.constraints.staged(&id) {
            return Some(row.clone());
        }
        if self.tx.constraints.is_deleted(&id) {
            return None;
        }
        self.committed.constraints.get(&id).cloned()
    }

    pub fn constraints_of(&self, rel: RelationId) -> Vec<ConstraintRow> {
        let mut rows: Vec<ConstraintRow> = self
            .committed
            .constraints
            .values()
            .filter(|row| row.class == rel)
            .filter(|row| !self.tx.constraints.is_deleted(&row.id))
            .filter(|row| self.tx.constraints.staged(&row.id).is_none())
            .cloned()
            .collect();
        rows.extend(
            self.tx
                .constraints
                .staged_iter()
                .filter(|(_, row)| row.class == rel)
                .map(|(_, row)| row.clone()),
        );
        rows.sort_by_key(|row| row.id);
        rows
    }

    /// Unique-index probe on (relation, name, domain-type), with the domain
    /// component always null here.
    pub fn constraint_by_name(&self, rel: RelationId, name: &str) -> Option<ConstraintRow> {
        self.constraints_of(rel).into_iter().find(|row| row.name == name)
    }

    /// Sequential scan over every visible constraint row.
    pub fn all_constraints(&self) -> Vec<ConstraintRow> {
        let mut rows: Vec<ConstraintRow> = self
            .committed
            .constraints
            .values()
            .filter(|row| !self.tx.constraints.is_deleted(&row.id))
            .filter(|row| self.tx.constraints.staged(&row.id).is_none())
            .cloned()
            .collect();
        rows.extend(self.tx.constraints.staged_iter().map(|(_, row)| row.clone()));
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub(crate) fn insert_constraint(&mut self, row: ConstraintRow) -> Result<()> {
        if row.class.is_valid() && self.constraint_by_name(row.class, &row.name).is_some() {
            let rel_name = self
                .class_row(row.class)
                .map(|c| c.name)
                .unwrap_or_default();
            return Err(crate::error::ConstraintError::DuplicateName(row.name.clone(), rel_name).into());
        }
        let (id, rel) = (row.id, row.class);
        self.tx.constraints.insert(id, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_constraint, rel);
        Ok(())
    }

    pub(crate) fn update_constraint(&mut self, id: ConstraintId, f: impl FnOnce(&mut ConstraintRow)) -> Result<()> {
        let mut row = self
            .constraint_row(id)
            .ok_or_else(|| anyhow!("constraint {id} does not exist"))?;
        f(&mut row);
        let rel = row.class;
        let committed = self.committed.constraints.contains_key(&id);
        self.tx.constraints.delete(id, committed);
        self.tx.constraints.insert(id, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_constraint, rel);
        Ok(())
    }

    /// Deletion primitive consumed by the dependency-deletion machinery
    /// when it cascades onto a constraint.
    pub fn delete_constraint(&mut self, id: ConstraintId) -> bool {
        let committed = self.committed.constraints.contains_key(&id);
        self.tx.constraints.delete(id, committed)
    }

    // ---- st_attrdef ----

    pub fn attrdef_for_column(&self, rel: RelationId, attno: AttrNumber) -> Option<AttrDefRow> {
        for (_, row) in self.tx.attr_defaults.staged_iter() {
            if row.class == rel && row.attno == attno {
                return Some(row.clone());
            }
        }
        self.committed
            .attr_defaults
            .values()
            .filter(|row| !self.tx.attr_defaults.is_deleted(&row.id))
            .find(|row| row.class == rel && row.attno == attno)
            .cloned()
    }

    pub fn attrdefs_of(&self, rel: RelationId) -> Vec<AttrDefRow> {
        let mut rows: Vec<AttrDefRow> = self
            .committed
            .attr_defaults
            .values()
            .filter(|row| row.class == rel)
            .filter(|row| !self.tx.attr_defaults.is_deleted(&row.id))
            .cloned()
            .collect();
        rows.extend(
            self.tx
                .attr_defaults
                .staged_iter()
                .filter(|(_, row)| row.class == rel)
                .map(|(_, row)| row.clone()),
        );
        rows.sort_by_key(|row| row.id);
        rows
    }

    pub(crate) fn attrdefs_exist(&self, id: AttrDefId) -> bool {
        self.tx.attr_defaults.staged(&id).is_some()
            || (!self.tx.attr_defaults.is_deleted(&id) && self.committed.attr_defaults.contains_key(&id))
    }

    pub(crate) fn insert_attrdef(&mut self, row: AttrDefRow) {
        let rel = row.class;
        self.tx.attr_defaults.insert(row.id, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_attrdef, rel);
    }

    pub fn delete_attrdef_for_column(&mut self, rel: RelationId, attno: AttrNumber) -> Option<AttrDefId> {
        let id = self.attrdef_for_column(rel, attno)?.id;
        let committed = self.committed.attr_defaults.contains_key(&id);
        self.tx.attr_defaults.delete(id, committed);
        self.note_catalog_change(SystemCatalog::st_attrdef, rel);
        Some(id)
    }

    /// Deletion primitive consumed by the dependency-deletion machinery
    /// when it cascades onto a relation's stored defaults.
    pub fn delete_attrdefs_of(&mut self, rel: RelationId) {
        for row in self.attrdefs_of(rel) {
            let committed = self.committed.attr_defaults.contains_key(&row.id);
            self.tx.attr_defaults.delete(row.id, committed);
        }
        self.note_catalog_change(SystemCatalog::st_attrdef, rel);
    }

    // ---- st_depend ----

    pub(crate) fn add_depend(&mut self, edge: DependRow) {
        self.tx.depends_added.push(edge);
    }

    /// Every visible dependency edge; committed first, then this
    /// transaction's additions.
    pub fn depends(&self) -> Vec<DependRow> {
        let mut edges: Vec<DependRow> = self
            .committed
            .depends
            .iter()
            .filter(|edge| !self.tx.depends_deleted.contains(edge))
            .copied()
            .collect();
        edges.extend(self.tx.depends_added.iter().copied());
        edges
    }

    /// Removes every edge whose referrer is the given object (any sub-id).
    /// The dependency-deletion machinery calls this for each object it
    /// drops; `drop_with_catalog` calls it for the relation itself.
    pub fn delete_depends_of_referrer(&mut self, class: ObjectClass, oid: u32) {
        let doomed: Vec<DependRow> = self
            .committed
            .depends
            .iter()
            .filter(|edge| edge.referrer.class == class && edge.referrer.oid == oid)
            .copied()
            .collect();
        self.tx.depends_deleted.extend(doomed);
        self.tx
            .depends_added
            .retain(|edge| !(edge.referrer.class == class && edge.referrer.oid == oid));
    }

    /// Relations depending on `rel` through an edge of any kind; used to
    /// find a table's indexes and toast relation at truncate time.
    pub fn relation_dependents(&self, rel: RelationId) -> Vec<RelationId> {
        let target = ObjectAddress::relation(rel);
        let mut ids: Vec<RelationId> = self
            .depends()
            .into_iter()
            .filter(|edge| {
                edge.referent.class == target.class && edge.referent.oid == target.oid && edge.referrer.class == ObjectClass::Class
            })
            .map(|edge| RelationId(edge.referrer.oid))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    // ---- st_inherits ----

    pub fn inherits_parents_of(&self, child: RelationId) -> Vec<InheritsRow> {
        let mut rows: Vec<InheritsRow> = self
            .committed
            .inherits
            .range((child, i16::MIN)..=(child, i16::MAX))
            .filter(|(key, _)| !self.tx.inherits.is_deleted(key))
            .map(|(_, row)| *row)
            .collect();
        rows.extend(
            self.tx
                .inherits
                .staged_iter()
                .filter(|((c, _), _)| *c == child)
                .map(|(_, row)| *row),
        );
        rows.sort_by_key(|row| row.seqno);
        rows
    }

    pub fn children_of(&self, parent: RelationId) -> Vec<RelationId> {
        let mut ids: Vec<RelationId> = self
            .committed
            .inherits
            .values()
            .filter(|row| row.parent == parent)
            .filter(|row| !self.tx.inherits.is_deleted(&(row.child, row.seqno)))
            .map(|row| row.child)
            .collect();
        ids.extend(
            self.tx
                .inherits
                .staged_iter()
                .filter(|(_, row)| row.parent == parent)
                .map(|(_, row)| row.child),
        );
        ids.sort();
        ids.dedup();
        ids
    }

    pub(crate) fn insert_inherits(&mut self, row: InheritsRow) {
        let child = row.child;
        self.tx.inherits.insert((row.child, row.seqno), self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_inherits, child);
    }

    /// Deletes inheritance rows where `child` is the child, via the
    /// child-id index.
    pub(crate) fn delete_inherits_of_child(&mut self, child: RelationId) {
        for row in self.inherits_parents_of(child) {
            let key = (row.child, row.seqno);
            let committed = self.committed.inherits.contains_key(&key);
            self.tx.inherits.delete(key, committed);
        }
        self.note_catalog_change(SystemCatalog::st_inherits, child);
    }

    // ---- st_partitioned ----

    pub fn partitioned_row(&self, rel: RelationId) -> Option<PartitionedRow> {
        if let Some(row) = self.tx.partitioned.staged(&rel) {
            return Some(row.clone());
        }
        if self.tx.partitioned.is_deleted(&rel) {
            return None;
        }
        self.committed.partitioned.get(&rel).cloned()
    }

    pub(crate) fn insert_partitioned(&mut self, row: PartitionedRow) {
        let rel = row.class;
        self.tx.partitioned.insert(rel, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_partitioned, rel);
    }

    pub(crate) fn update_partitioned(&mut self, rel: RelationId, f: impl FnOnce(&mut PartitionedRow)) -> Result<()> {
        let mut row = self
            .partitioned_row(rel)
            .ok_or_else(|| anyhow!("relation {rel} has no partitioned-table row"))?;
        f(&mut row);
        let committed = self.committed.partitioned.contains_key(&rel);
        self.tx.partitioned.delete(rel, committed);
        self.tx.partitioned.insert(rel, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_partitioned, rel);
        Ok(())
    }

    pub(crate) fn delete_partitioned(&mut self, rel: RelationId) -> bool {
        let committed = self.committed.partitioned.contains_key(&rel);
        let existed = self.tx.partitioned.delete(rel, committed);
        if existed {
            self.note_catalog_change(SystemCatalog::st_partitioned, rel);
        }
        existed
    }

    // ---- st_foreign ----

    pub fn foreign_row(&self, rel: RelationId) -> Option<ForeignRow> {
        if let Some(row) = self.tx.foreign_tables.staged(&rel) {
            return Some(row.clone());
        }
        if self.tx.foreign_tables.is_deleted(&rel) {
            return None;
        }
        self.committed.foreign_tables.get(&rel).cloned()
    }

    pub(crate) fn insert_foreign(&mut self, row: ForeignRow) {
        let rel = row.class;
        self.tx.foreign_tables.insert(rel, self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_foreign, rel);
    }

    pub(crate) fn delete_foreign(&mut self, rel: RelationId) -> bool {
        let committed = self.committed.foreign_tables.contains_key(&rel);
        self.tx.foreign_tables.delete(rel, committed)
    }

    // ---- st_statistic ----

    pub fn statistics_of(&self, rel: RelationId) -> Vec<StatisticRow> {
        let mut rows: Vec<StatisticRow> = self
            .committed
            .statistics
            .range((rel, i16::MIN)..=(rel, i16::MAX))
            .filter(|(key, _)| !self.tx.statistics.is_deleted(key))
            .map(|(_, row)| row.clone())
            .collect();
        rows.extend(
            self.tx
                .statistics
                .staged_iter()
                .filter(|((r, _), _)| *r == rel)
                .map(|(_, row)| row.clone()),
        );
        rows.sort_by_key(|row| row.attno);
        rows
    }

    pub fn insert_statistic(&mut self, row: StatisticRow) {
        let rel = row.class;
        self.tx.statistics.insert((row.class, row.attno.0), self.cmd, row);
        self.note_catalog_change(SystemCatalog::st_statistic, rel);
    }

    /// Drops statistics rows for one column, or for the whole relation.
    pub(crate) fn remove_statistics(&mut self, rel: RelationId, attno: Option<AttrNumber>) {
        let keys: Vec<_> = self
            .statistics_of(rel)
            .into_iter()
            .filter(|row| attno.map_or(true, |a| row.attno == a))
            .map(|row| (row.class, row.attno.0))
            .collect();
        for key in keys {
            let committed = self.committed.statistics.contains_key(&key);
            self.tx.statistics.delete(key, committed);
        }
        self.note_catalog_change(SystemCatalog::st_statistic, rel);
    }

    // ---- st_subscription_rel ----

    pub fn subscription_rels_for(&self, rel: RelationId) -> Vec<SubscriptionRelRow> {
        let mut rows: Vec<SubscriptionRelRow> = self
            .committed
            .subscription_rels
            .values()
            .filter(|row| row.class == rel)
            .filter(|row| !self.tx.subscription_rels.is_deleted(&(row.subscription.0, row.class.0)))
            .cloned()
            .collect();
        rows.extend(
            self.tx
                .subscription_rels
                .staged_iter()
                .filter(|(_, row)| row.class == rel)
                .map(|(_, row)| row.clone()),
        );
        rows
    }

    pub fn insert_subscription_rel(&mut self, row: SubscriptionRelRow) {
        self.tx
            .subscription_rels
            .insert((row.subscription.0, row.class.0), self.cmd, row);
    }

    pub(crate) fn delete_subscription_rels_for(&mut self, rel: RelationId) {
        let keys: Vec<(SubscriptionId, RelationId)> = self
            .subscription_rels_for(rel)
            .into_iter()
            .map(|row| (row.subscription, row.class))
            .collect();
        for (sub, class) in keys {
            let key = (sub.0, class.0);
            let committed = self.committed.subscription_rels.contains_key(&key);
            self.tx.subscription_rels.delete(key, committed);
        }
    }
}
