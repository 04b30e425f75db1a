//! Typed construction and insertion of catalog rows.
//!
//! Callers must be inside a mutating transaction with the target catalog
//! locked; cache invalidations for other sessions funnel through the
//! underlying row primitives automatically.

use cinderdb_primitives::{AclItem, AttrNumber, OwnerId, RelationId, RelationKind, TypeId};

use crate::desc::{RelationDescriptor, TupleDescriptor};
use crate::error::Result;
use crate::expr::Expr;
use crate::system_tables::{
    AttrDefRow, AttributeRow, ClassRow, ConstraintRow, PartitionBound, SYSTEM_ATTRIBUTES,
};
use crate::tx::{CatalogTx, Session};

/// Attribute inserts are grouped until the batch reaches this many bytes.
pub const MAX_ATTRIBUTE_MULTI_INSERT_BYTES: usize = 64 * 1024;

/// Rough serialized footprint of one attribute row.
fn attribute_row_size(row: &AttributeRow) -> usize {
    96 + row.name.len()
}

impl CatalogTx {
    /// Assembles and inserts the class row from the descriptor's cached
    /// header. The ACL and options are stored as null when empty; the
    /// partition bound is null unconditionally (set later via row update).
    pub fn insert_class_row(
        &mut self,
        desc: &RelationDescriptor,
        row_type: TypeId,
        of_type: TypeId,
        owner: OwnerId,
        acl: Option<Vec<AclItem>>,
        options: Vec<String>,
    ) -> Result<()> {
        // A sequence always has exactly one page holding one tuple; for
        // everything else the stats start unknown.
        let (pages, tuples) = match desc.kind {
            RelationKind::Sequence => (1, 1.0),
            _ => (0, -1.0),
        };
        let row = ClassRow {
            id: desc.id,
            name: desc.name.clone(),
            namespace: desc.namespace,
            row_type,
            of_type,
            owner,
            access_method: desc.access_method,
            file_number: desc.file.rel_number,
            tablespace: desc.tablespace,
            pages,
            tuples,
            toast_relation: RelationId::INVALID,
            has_index: false,
            shared: desc.shared,
            mapped: desc.mapped,
            persistence: desc.persistence,
            kind: desc.kind,
            natts: desc.descriptor.len() as i16,
            checks: 0,
            has_subclass: false,
            is_partition: false,
            partition_bound: None,
            acl: acl.filter(|a| !a.is_empty()),
            options: (!options.is_empty()).then_some(options),
            freeze_xact: desc.freeze_xact,
            freeze_multi: desc.freeze_multi,
        };
        self.insert_class(row)
    }

    /// Inserts one row per user attribute, then the system-attribute
    /// prototype with the class id patched in (when the relkind carries
    /// system attributes). Rows are grouped into multi-insert batches
    /// bounded by [`MAX_ATTRIBUTE_MULTI_INSERT_BYTES`].
    pub fn insert_attribute_rows(
        &mut self,
        class: RelationId,
        descriptor: &TupleDescriptor,
        with_system: bool,
    ) -> Result<()> {
        let mut batch: Vec<AttributeRow> = Vec::new();
        let mut batch_bytes = 0usize;

        let mut rows: Vec<AttributeRow> = descriptor
            .iter()
            .enumerate()
            .map(|(i, def)| AttributeRow::from_definition(class, AttrNumber(i as i16 + 1), def))
            .collect();
        if with_system {
            rows.extend(SYSTEM_ATTRIBUTES.iter().map(|proto| AttributeRow::system(class, proto)));
        }

        for row in rows {
            let size = attribute_row_size(&row);
            if batch_bytes + size > MAX_ATTRIBUTE_MULTI_INSERT_BYTES && !batch.is_empty() {
                self.flush_attribute_batch(&mut batch);
                batch_bytes = 0;
            }
            batch_bytes += size;
            batch.push(row);
        }
        self.flush_attribute_batch(&mut batch);
        Ok(())
    }

    fn flush_attribute_batch(&mut self, batch: &mut Vec<AttributeRow>) {
        if batch.is_empty() {
            return;
        }
        log::trace!("inserting {} attribute row(s)", batch.len());
        for row in batch.drain(..) {
            self.insert_attribute(row);
        }
    }

    /// Stores the partition key of a partitioned relation.
    pub fn store_partition_key(
        &mut self,
        rel: RelationId,
        strategy: crate::system_tables::PartitionStrategy,
        key_attrs: Vec<AttrNumber>,
        key_collations: Vec<cinderdb_primitives::CollationId>,
    ) {
        self.insert_partitioned(crate::system_tables::PartitionedRow {
            class: rel,
            strategy,
            key_attrs,
            key_collations,
            default_partition: RelationId::INVALID,
        });
        self.invalidate_relation(rel);
    }

    /// Sets the partition bound and the is-partition flag in one row
    /// update. A stale has-subclass marker left from prior inheritance is
    /// cleared in the same update.
    pub fn update_partition_bound(&mut self, id: RelationId, bound: &PartitionBound) -> Result<()> {
        self.update_class(id, |row| {
            row.partition_bound = Some(bound.to_stored_text());
            row.is_partition = true;
            row.has_subclass = false;
        })
    }
}

impl Session {
    /// Stores a column default's expression; the returned identifier comes
    /// from the OID-allocating index on the default catalog.
    pub fn insert_attrdef_row(
        &self,
        tx: &mut CatalogTx,
        class: RelationId,
        attno: AttrNumber,
        expr: Expr,
    ) -> cinderdb_primitives::AttrDefId {
        let id = self.new_attrdef_id(tx);
        tx.insert_attrdef(AttrDefRow {
            id,
            class,
            attno,
            expr,
        });
        id
    }

    /// Stores a constraint row, allocating its identifier.
    pub fn insert_constraint_row(
        &self,
        tx: &mut CatalogTx,
        mut row: ConstraintRow,
    ) -> Result<cinderdb_primitives::ConstraintId> {
        row.id = self.new_constraint_id(tx);
        let id = row.id;
        tx.insert_constraint(row)?;
        Ok(id)
    }
}
