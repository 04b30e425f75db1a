//! The relation builder: one call composes a new relation across the class,
//! attribute and type catalogs, creates its storage, and wires up the
//! dependency graph.

use std::sync::Arc;

use cinderdb_primitives::{
    AccessMethodId, AclItem, AlignKind, BackendTag, DatabaseId, DependencyKind, NamespaceId,
    OnCommitAction, OwnerId, Persistence, RelFileLocator, RelationId, RelationKind, TablespaceId,
    TypeId, GLOBAL_TABLESPACE, NAME_MAX_BYTES,
};

use crate::check::{check_names_and_types, CheckTypeFlags, CookedConstraint, CookedKind};
use crate::desc::{RelationDescriptor, TupleDescriptor};
use crate::error::{RelationError, Result};
use crate::system_tables::{relation_name_is_system, ObjectAddress};
use crate::tx::{AclObjectKind, CatalogTx, LockMode, Session};
use crate::types::{array_type_name, TypeKind, TypeRow, SYSTEM_NAMESPACE, VARLENA_LEN};

/// Identifier override slots consumed during a binary upgrade. Each is taken
/// on use; a failed creation does not restore them.
#[derive(Clone, Debug, Default)]
pub struct BinaryUpgradeIds {
    pub next_heap_id: Option<RelationId>,
    pub next_toast_id: Option<RelationId>,
    pub next_type_id: Option<TypeId>,
    pub next_array_type_id: Option<TypeId>,
}

/// Everything [`Session::create_with_catalog`] needs to know.
pub struct CreationRequest {
    pub name: String,
    pub namespace: NamespaceId,
    pub tablespace: Option<TablespaceId>,
    pub requested_id: Option<RelationId>,
    pub requested_type_id: Option<TypeId>,
    pub of_type: Option<TypeId>,
    pub owner: OwnerId,
    pub access_method: Option<AccessMethodId>,
    pub descriptor: TupleDescriptor,
    pub cooked_constraints: Vec<CookedConstraint>,
    pub kind: RelationKind,
    pub persistence: Persistence,
    pub shared: bool,
    pub mapped: bool,
    pub on_commit: Option<OnCommitAction>,
    pub options: Vec<String>,
    pub use_user_default_acl: bool,
    pub allow_system_mods: bool,
    pub is_internal: bool,
    pub rewrite_of: Option<RelationId>,
    pub in_binary_upgrade: bool,
    pub binary_upgrade: BinaryUpgradeIds,
}

impl CreationRequest {
    pub fn new(
        name: impl Into<String>,
        namespace: NamespaceId,
        kind: RelationKind,
        persistence: Persistence,
        descriptor: TupleDescriptor,
        owner: OwnerId,
    ) -> Self {
        Self {
            name: name.into(),
            namespace,
            tablespace: None,
            requested_id: None,
            requested_type_id: None,
            of_type: None,
            owner,
            access_method: None,
            descriptor,
            cooked_constraints: Vec::new(),
            kind,
            persistence,
            shared: false,
            mapped: false,
            on_commit: None,
            options: Vec::new(),
            use_user_default_acl: false,
            allow_system_mods: false,
            is_internal: false,
            rewrite_of: None,
            in_binary_upgrade: false,
            binary_upgrade: BinaryUpgradeIds::default(),
        }
    }
}

/// What the builder hands back: the new id and, when a row type was made,
/// its address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedRelation {
    pub id: RelationId,
    pub type_address: Option<ObjectAddress>,
}

impl Session {
    /// Creates one relation: identifier allocation, collision checks,
    /// catalog composition, storage creation, dependency edges, constraint
    /// storage, on-commit registration. A failure anywhere aborts the
    /// surrounding transaction; the pending-action log reverses the file
    /// creation.
    pub fn create_with_catalog(&mut self, tx: &mut CatalogTx, mut req: CreationRequest) -> Result<CreatedRelation> {
        log::trace!("RELATION CREATING: {}", req.name);

        let system_override = self.config.allow_system_table_mods || req.allow_system_mods;
        if relation_name_is_system(&req.name) && !system_override {
            return Err(RelationError::ReservedName(req.name).into());
        }
        if req.namespace == SYSTEM_NAMESPACE && !system_override {
            return Err(RelationError::SystemNamespace(req.name).into());
        }

        // The any-array exception exists to let the statistic catalog be
        // re-cloned under the system-modification override.
        let mut flags = CheckTypeFlags::empty();
        if req.allow_system_mods {
            flags |= CheckTypeFlags::ALLOW_ANY_ARRAY;
        }
        check_names_and_types(tx, &req.descriptor, req.kind, flags)?;

        if tx.class_by_name(req.namespace, &req.name).is_some() {
            return Err(RelationError::DuplicateTable(req.name).into());
        }
        if let Some(conflicting) = tx.type_by_name(req.namespace, &req.name) {
            move_array_type_name(tx, conflicting, &req.name)?;
        }

        let tablespace = req.tablespace.unwrap_or_else(|| {
            if req.shared {
                GLOBAL_TABLESPACE
            } else {
                self.default_tablespace()
            }
        });
        if req.shared && tablespace != GLOBAL_TABLESPACE {
            return Err(RelationError::SharedWrongTablespace.into());
        }

        let id = self.resolve_relation_id(tx, &mut req, tablespace)?;
        // Nothing else can touch the id until we commit or abort.
        tx.lock_relation(id, LockMode::AccessExclusive);

        let acl = self.initial_acl(&req);

        let backend = match req.persistence {
            Persistence::Temporary => self.backend,
            _ => BackendTag::INVALID,
        };
        let database = if req.shared {
            DatabaseId::INVALID
        } else {
            self.database()
        };
        let mut desc = RelationDescriptor {
            id,
            name: req.name.clone(),
            namespace: req.namespace,
            tablespace: req.tablespace.unwrap_or(TablespaceId::INVALID),
            kind: req.kind,
            persistence: req.persistence,
            descriptor: req.descriptor.clone(),
            access_method: req.access_method.unwrap_or(AccessMethodId::INVALID),
            shared: req.shared,
            mapped: req.mapped,
            file: RelFileLocator::new(tablespace, database, id.0),
            backend,
            freeze_xact: 0,
            freeze_multi: 0,
        };

        if req.kind.has_storage() {
            if req.kind.has_table_am() {
                let am = Arc::clone(&self.am);
                let (freeze_xact, freeze_multi) = am.set_new_file(self, tx.nesting_level(), &desc)?;
                desc.freeze_xact = freeze_xact;
                desc.freeze_multi = freeze_multi;
            } else {
                // Indexes go through the lower-level storage primitive and
                // carry no freeze horizon of their own.
                self.create_storage(tx.nesting_level(), desc.file, desc.backend, desc.persistence)?;
            }
        }

        let (row_type, type_address) = if req.kind.has_row_type() {
            let type_id = self.make_row_type(tx, &mut req, id)?;
            (type_id, Some(ObjectAddress::type_entry(type_id)))
        } else {
            (TypeId::INVALID, None)
        };

        tx.insert_class_row(
            &desc,
            row_type,
            req.of_type.unwrap_or(TypeId::INVALID),
            req.owner,
            acl.clone(),
            req.options.clone(),
        )?;
        tx.insert_attribute_rows(id, &req.descriptor, req.kind.has_system_attributes())?;

        // A composite type's edges live on its type row; a toast store is
        // reachable only through its parent. Neither gets class-level edges.
        if !matches!(req.kind, RelationKind::CompositeType | RelationKind::ToastStore) {
            let class_addr = ObjectAddress::relation(id);
            tx.record_dependency(class_addr, ObjectAddress::namespace(req.namespace), DependencyKind::Normal);
            tx.record_dependency_on_owner(class_addr, req.owner);
            if let Some(acl) = &acl {
                tx.record_dependency_on_acl(class_addr, req.owner, acl);
            }
            tx.record_dependency_on_current_extension(class_addr);
            if let Some(of_type) = req.of_type {
                tx.record_dependency(class_addr, ObjectAddress::type_entry(of_type), DependencyKind::Normal);
            }
            let depends_on_am = req.kind.has_table_am()
                || (req.kind == RelationKind::PartitionedTable && req.access_method.is_some());
            if depends_on_am && desc.access_method.is_valid() {
                tx.record_dependency(
                    class_addr,
                    ObjectAddress::access_method(desc.access_method),
                    DependencyKind::Normal,
                );
            }
        }

        if let Some(hook) = &self.post_create_hook {
            hook(&ObjectAddress::relation(id));
        }

        let cooked = std::mem::take(&mut req.cooked_constraints);
        if !cooked.is_empty() {
            self.store_constraints(tx, id, &cooked, req.is_internal)?;
        }

        if let Some(action) = req.on_commit {
            if req.persistence != Persistence::Temporary {
                return Err(RelationError::OnCommitNotTemporary.into());
            }
            self.register_on_commit(id, action);
        }

        log::trace!("RELATION CREATED: {}, id: {id}", req.name);
        Ok(CreatedRelation { id, type_address })
    }

    fn resolve_relation_id(
        &self,
        tx: &CatalogTx,
        req: &mut CreationRequest,
        tablespace: TablespaceId,
    ) -> Result<RelationId> {
        if let Some(id) = req.requested_id {
            return Ok(id);
        }
        if req.in_binary_upgrade {
            // Index identifiers have no override slot at this layer; they
            // are assigned by the index-creation path.
            if !req.kind.is_index() {
                let slot = match req.kind {
                    RelationKind::ToastStore => req.binary_upgrade.next_toast_id.take(),
                    _ => req.binary_upgrade.next_heap_id.take(),
                };
                return slot.ok_or_else(|| {
                    let which = if req.kind == RelationKind::ToastStore {
                        "toast relation"
                    } else {
                        "heap relation"
                    };
                    RelationError::MissingUpgradeOverride(which).into()
                });
            }
        }
        Ok(self.new_relation_file_id(tx, tablespace, req.shared, req.persistence))
    }

    fn initial_acl(&self, req: &CreationRequest) -> Option<Vec<AclItem>> {
        if !req.use_user_default_acl {
            return None;
        }
        let kind = match req.kind {
            RelationKind::Table
            | RelationKind::View
            | RelationKind::MaterializedView
            | RelationKind::ForeignTable
            | RelationKind::PartitionedTable => AclObjectKind::Table,
            RelationKind::Sequence => AclObjectKind::Sequence,
            _ => return None,
        };
        self.default_acl(kind)
    }

    /// Creates the composite row type and its paired array type. The array
    /// id is allocated first: by convention it sorts before the composite.
    fn make_row_type(&self, tx: &mut CatalogTx, req: &mut CreationRequest, rel: RelationId) -> Result<TypeId> {
        let array_id = req
            .binary_upgrade
            .next_array_type_id
            .take()
            .unwrap_or_else(|| self.new_type_id(tx));
        let type_id = req
            .requested_type_id
            .or_else(|| req.binary_upgrade.next_type_id.take())
            .unwrap_or_else(|| self.new_type_id(tx));

        tx.insert_type(TypeRow {
            id: type_id,
            name: req.name.clone(),
            namespace: req.namespace,
            owner: req.owner,
            kind: TypeKind::Composite,
            len: VARLENA_LEN,
            by_value: false,
            align: AlignKind::Double,
            relation: rel,
            element: TypeId::INVALID,
            array_type: array_id,
            base_type: TypeId::INVALID,
            range_subtype: TypeId::INVALID,
            range_collation: cinderdb_primitives::CollationId::INVALID,
            collatable: false,
            not_null: false,
        })?;

        let array_name = unique_array_type_name(tx, req.namespace, &req.name);
        tx.insert_type(TypeRow {
            id: array_id,
            name: array_name,
            namespace: req.namespace,
            owner: req.owner,
            kind: TypeKind::Base,
            len: VARLENA_LEN,
            by_value: false,
            align: AlignKind::Int,
            relation: RelationId::INVALID,
            element: type_id,
            array_type: TypeId::INVALID,
            base_type: TypeId::INVALID,
            range_subtype: TypeId::INVALID,
            range_collation: cinderdb_primitives::CollationId::INVALID,
            collatable: false,
            not_null: false,
        })?;

        // The row type stands and falls with its relation; the array type
        // with its element.
        tx.record_dependency(
            ObjectAddress::type_entry(type_id),
            ObjectAddress::relation(rel),
            DependencyKind::Internal,
        );
        tx.record_dependency(
            ObjectAddress::type_entry(array_id),
            ObjectAddress::type_entry(type_id),
            DependencyKind::Internal,
        );
        Ok(type_id)
    }

    /// Builder step fifteen: stores the request's pre-cooked constraints.
    /// The command counter is bumped first so the just-inserted attribute
    /// rows are visible to expression deparsing.
    pub fn store_constraints(
        &self,
        tx: &mut CatalogTx,
        rel: RelationId,
        cooked: &[CookedConstraint],
        is_internal: bool,
    ) -> Result<()> {
        tx.command_counter_bump();
        let mut any_checks = false;
        for constraint in cooked {
            match constraint.kind {
                CookedKind::Default => {
                    let kind = tx
                        .class_row(rel)
                        .map(|c| c.kind)
                        .unwrap_or(RelationKind::Table);
                    self.store_attr_default(tx, rel, constraint.attno, &constraint.expr, false, kind)?;
                }
                CookedKind::Check => {
                    let name = constraint.name.as_deref().unwrap_or("check");
                    self.store_rel_check(
                        tx,
                        rel,
                        name,
                        &constraint.expr,
                        !constraint.skip_validation,
                        constraint.is_local,
                        constraint.inherit_count,
                        constraint.no_inherit,
                        is_internal,
                    )?;
                    any_checks = true;
                }
            }
        }
        if any_checks {
            self.set_relation_num_checks(tx, rel)?;
        }
        Ok(())
    }
}

/// Renames an auto-generated array type out of the way of a new relation's
/// row type. Any other kind of collision is fatal.
fn move_array_type_name(tx: &mut CatalogTx, conflicting: TypeId, wanted: &str) -> Result<()> {
    let row = tx
        .type_row(conflicting)
        .expect("type id came from the name index");
    if !row.is_array() {
        return Err(RelationError::DuplicateType(wanted.to_string()).into());
    }
    let namespace = row.namespace;
    let fresh = unique_array_type_name(tx, namespace, &row.name);
    log::debug!("moving array type \"{}\" out of the way as \"{fresh}\"", row.name);
    tx.update_type(conflicting, |t| t.name = fresh)
}

/// Derives a free array-type name over `base` by prefixing underscores, the
/// way auto-generated array names are spelled.
fn unique_array_type_name(tx: &CatalogTx, namespace: NamespaceId, base: &str) -> String {
    let mut candidate = array_type_name(base);
    candidate.truncate(NAME_MAX_BYTES);
    let mut fallback = 0u32;
    while tx.type_by_name(namespace, &candidate).is_some() {
        if candidate.len() < NAME_MAX_BYTES {
            candidate.insert(0, '_');
        } else {
            // Prefixing cannot grow any further; fall back to a counter.
            fallback += 1;
            candidate = format!("_{base}{fallback}");
            candidate.truncate(NAME_MAX_BYTES);
        }
    }
    candidate
}
