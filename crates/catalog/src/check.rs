//! Schema validation and expression cooking: the gate every descriptor and
//! every raw default or check expression passes before a catalog row exists.

use cinderdb_primitives::{
    AttrNumber, CollationId, ConstraintId, GeneratedKind, RelationId, RelationKind, TypeId,
    MAX_COLUMNS, NAME_MAX_BYTES,
};

use crate::desc::{AttributeDefinition, TupleDescriptor};
use crate::error::{AttributeError, ConstraintError, Result};
use crate::expr::{
    assign_expr_collations, check_generation_expr, coerce_to_boolean, coerce_to_target_type,
    eval_const, transform_expr, Expr, ExprKind, ParseContext, MAX_EXPR_DEPTH,
};
use crate::system_tables::{is_system_attribute_name, ConstraintRow, ConstraintKind, ObjectAddress};
use crate::tx::{CatalogTx, Session};
use crate::types::TypeKind;
use cinderdb_primitives::DependencyKind;

bitflags::bitflags! {
    /// Pseudo-type exceptions admitted by attribute-type checking.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct CheckTypeFlags: u8 {
        const ALLOW_ANY_ARRAY = 1 << 0;
        const ALLOW_RECORD = 1 << 1;
        const ALLOW_RECORD_ARRAY = 1 << 2;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CookedKind {
    Default,
    Check,
}

/// A constraint or default after cooking, ready for (or already in) catalog
/// storage.
#[derive(Clone, Debug)]
pub struct CookedConstraint {
    pub kind: CookedKind,
    /// Identifier assigned at storage time; zero until then.
    pub stored_id: u32,
    pub name: Option<String>,
    /// Target column for defaults; invalid for table constraints.
    pub attno: AttrNumber,
    pub expr: Expr,
    pub skip_validation: bool,
    pub is_local: bool,
    pub inherit_count: i16,
    pub no_inherit: bool,
}

/// A raw column default handed to [`Session::add_new_constraints`].
#[derive(Clone, Debug)]
pub struct RawDefault {
    pub attno: AttrNumber,
    pub raw: Expr,
    /// True when the default accompanies a newly added column, making the
    /// pre-evaluated missing-value fast path applicable.
    pub missing_mode: bool,
}

/// A raw check constraint handed to [`Session::add_new_constraints`].
#[derive(Clone, Debug)]
pub struct RawCheck {
    pub name: Option<String>,
    pub raw: Expr,
    pub is_no_inherit: bool,
    pub initially_valid: bool,
}

/// Validates names and types of a descriptor before anything is written.
pub fn check_names_and_types(
    tx: &CatalogTx,
    descriptor: &TupleDescriptor,
    kind: RelationKind,
    flags: CheckTypeFlags,
) -> Result<()> {
    if descriptor.is_empty() {
        return Err(AttributeError::NoColumns.into());
    }
    if descriptor.len() > MAX_COLUMNS {
        return Err(AttributeError::TooManyColumns {
            count: descriptor.len(),
            max: MAX_COLUMNS,
        }
        .into());
    }
    let mut seen: Vec<&str> = Vec::with_capacity(descriptor.len());
    for attr in descriptor.iter() {
        if attr.name.len() > NAME_MAX_BYTES {
            return Err(AttributeError::NameTooLong(attr.name.clone()).into());
        }
        // Views and composite types carry no system attributes, so their
        // column names cannot collide with any.
        if kind.has_system_attributes() && is_system_attribute_name(&attr.name) {
            return Err(AttributeError::SystemColumnName(attr.name.clone()).into());
        }
        if seen.contains(&attr.name.as_str()) {
            return Err(AttributeError::DuplicateColumn(attr.name.clone()).into());
        }
        seen.push(&attr.name);
        let mut containing = Vec::new();
        check_attribute_type(tx, &attr.name, attr.type_id, attr.collation, &mut containing, flags, 0)?;
    }
    Ok(())
}

/// Recursive legality check of one attribute type.
///
/// `containing` is the stack of row types currently being descended through;
/// finding the type under check in it means a composite contains itself.
pub fn check_attribute_type(
    tx: &CatalogTx,
    att_name: &str,
    type_id: TypeId,
    collation: CollationId,
    containing: &mut Vec<TypeId>,
    flags: CheckTypeFlags,
    depth: usize,
) -> Result<()> {
    if depth > MAX_EXPR_DEPTH {
        return Err(AttributeError::RecursionLimit(att_name.to_string()).into());
    }
    let ty = tx
        .type_row(type_id)
        .ok_or_else(|| crate::error::ExpressionError::UnknownType(type_id))?;

    match ty.kind {
        TypeKind::Pseudo => {
            let allowed = (type_id == crate::types::ANY_ARRAY && flags.contains(CheckTypeFlags::ALLOW_ANY_ARRAY))
                || (type_id == crate::types::RECORD && flags.contains(CheckTypeFlags::ALLOW_RECORD))
                || (type_id == crate::types::RECORD_ARRAY && flags.contains(CheckTypeFlags::ALLOW_RECORD_ARRAY));
            if !allowed {
                return Err(AttributeError::PseudoTypeColumn {
                    column: att_name.to_string(),
                    type_name: ty.name.clone(),
                }
                .into());
            }
        }
        TypeKind::Domain => {
            check_attribute_type(tx, att_name, ty.base_type, collation, containing, flags, depth + 1)?;
        }
        TypeKind::Composite => {
            if containing.contains(&type_id) {
                return Err(AttributeError::CompositeSelfReference(ty.name.clone()).into());
            }
            containing.push(type_id);
            for row in tx.attributes_of(ty.relation) {
                if row.attno.is_system() || row.is_dropped {
                    continue;
                }
                check_attribute_type(tx, &row.name, row.type_id, row.collation, containing, flags, depth + 1)?;
            }
            containing.pop();
        }
        TypeKind::Range => {
            check_attribute_type(
                tx,
                att_name,
                ty.range_subtype,
                ty.range_collation,
                containing,
                flags,
                depth + 1,
            )?;
        }
        TypeKind::Base => {
            if ty.is_array() {
                check_attribute_type(tx, att_name, ty.element, collation, containing, flags, depth + 1)?;
            }
        }
    }

    if ty.collatable && !collation.is_valid() {
        return Err(AttributeError::NoCollation {
            column: att_name.to_string(),
            type_name: ty.name.clone(),
        }
        .into());
    }
    Ok(())
}

/// Cooks a raw default (or generation) expression: transform, legality
/// checks, assignment coercion to the column type, collation assignment.
pub fn cook_default(
    tx: &CatalogTx,
    ctx: &ParseContext<'_>,
    raw: &Expr,
    target_type: TypeId,
    target_typmod: i32,
    att_name: &str,
    generated: GeneratedKind,
) -> Result<Expr> {
    let kind = match generated {
        GeneratedKind::Stored => ExprKind::GeneratedColumn,
        GeneratedKind::None => ExprKind::ColumnDefault,
    };
    let cooked = transform_expr(ctx, raw, kind)?;
    if generated == GeneratedKind::Stored {
        check_generation_expr(ctx.descriptor, &cooked)?;
    }
    let found = cooked.type_of();
    let mut coerced = coerce_to_target_type(cooked, target_type, target_typmod).ok_or_else(|| {
        let name_of = |id: TypeId| {
            tx.type_row(id)
                .map(|t| t.name)
                .unwrap_or_else(|| format!("type {id}"))
        };
        crate::error::ExpressionError::TypeMismatch {
            column: att_name.to_string(),
            expected: name_of(target_type),
            found: name_of(found),
        }
    })?;
    assign_expr_collations(&mut coerced);
    Ok(coerced)
}

/// Cooks a raw check-constraint expression: transform as a check expression,
/// coerce to boolean, assign collations. The range table is the single
/// target relation by construction.
pub fn cook_constraint(ctx: &ParseContext<'_>, raw: &Expr, rel_name: &str) -> Result<Expr> {
    let cooked = transform_expr(ctx, raw, ExprKind::CheckConstraint)?;
    let mut coerced = coerce_to_boolean(cooked, rel_name)?;
    assign_expr_collations(&mut coerced);
    Ok(coerced)
}

impl Session {
    /// Cooks and stores new defaults and check constraints on an existing
    /// relation, merging with inherited duplicates where legal. Returns the
    /// stored form of everything that was actually added.
    #[allow(clippy::too_many_arguments)]
    pub fn add_new_constraints(
        &self,
        tx: &mut CatalogTx,
        rel: RelationId,
        new_defaults: &[RawDefault],
        new_checks: &[RawCheck],
        allow_merge: bool,
        is_local: bool,
        is_internal: bool,
    ) -> Result<Vec<CookedConstraint>> {
        let class = tx.class_row(rel).ok_or(crate::error::RelationError::NotFound(rel))?;
        let descriptor = tx.relation_descriptor(rel);
        let mut cooked_out = Vec::new();

        for def in new_defaults {
            let attr = descriptor
                .attr(def.attno)
                .ok_or(AttributeError::NotFound { rel, attno: def.attno })?
                .clone();
            let ctx = ParseContext::new(&class.name, &descriptor);
            let expr = cook_default(tx, &ctx, &def.raw, attr.type_id, attr.typmod, &attr.name, attr.generated)?;

            // A bare null default is equivalent to no entry at all.
            if expr.is_null_const() && attr.generated == GeneratedKind::None {
                continue;
            }

            // Missing values are consulted without re-evaluation, so a
            // volatile default can never take that path.
            let missing_mode = def.missing_mode && !expr.contains_volatile();

            let id = self.store_attr_default(tx, rel, def.attno, &expr, missing_mode, class.kind)?;
            cooked_out.push(CookedConstraint {
                kind: CookedKind::Default,
                stored_id: id.0,
                name: None,
                attno: def.attno,
                expr,
                skip_validation: false,
                is_local,
                inherit_count: 0,
                no_inherit: false,
            });
        }

        let mut used_names: Vec<String> = Vec::new();
        let mut added_checks = false;
        for check in new_checks {
            if class.kind == RelationKind::PartitionedTable && check.is_no_inherit {
                return Err(ConstraintError::NoInheritOnPartitioned(class.name.clone()).into());
            }
            let ctx = ParseContext::new(&class.name, &descriptor);
            let expr = cook_constraint(&ctx, &check.raw, &class.name)?;

            let name = match &check.name {
                Some(name) => {
                    if used_names.iter().any(|n| n == name) {
                        return Err(ConstraintError::DuplicateName(name.clone(), class.name.clone()).into());
                    }
                    if self.merge_existing_constraint(
                        tx,
                        rel,
                        name,
                        &expr,
                        allow_merge,
                        is_local,
                        check.initially_valid,
                        check.is_no_inherit,
                    )? {
                        // Merged into an existing row; nothing new to store.
                        added_checks = true;
                        continue;
                    }
                    name.clone()
                }
                None => choose_constraint_name(tx, rel, &class.name, &expr, &descriptor, &used_names),
            };

            let id = self.store_rel_check(
                tx,
                rel,
                &name,
                &expr,
                check.initially_valid,
                is_local,
                if is_local { 0 } else { 1 },
                check.is_no_inherit,
                is_internal,
            )?;
            used_names.push(name.clone());
            added_checks = true;
            cooked_out.push(CookedConstraint {
                kind: CookedKind::Check,
                stored_id: id.0,
                name: Some(name),
                attno: AttrNumber::INVALID,
                expr,
                skip_validation: !check.initially_valid,
                is_local,
                inherit_count: if is_local { 0 } else { 1 },
                no_inherit: check.is_no_inherit,
            });
        }

        // Even an unchanged count is written back: the row update carries
        // the catalog-cache invalidation other sessions need.
        if added_checks || !new_checks.is_empty() {
            self.set_relation_num_checks(tx, rel)?;
        }
        Ok(cooked_out)
    }

    /// Reconciles a new check constraint with an existing row of the same
    /// name. Returns true when the existing row absorbed the new one.
    #[allow(clippy::too_many_arguments)]
    pub fn merge_existing_constraint(
        &self,
        tx: &mut CatalogTx,
        rel: RelationId,
        name: &str,
        expr: &Expr,
        mut allow_merge: bool,
        is_local: bool,
        is_validated: bool,
        is_no_inherit: bool,
    ) -> Result<bool> {
        let Some(existing) = tx.constraint_by_name(rel, name) else {
            return Ok(false);
        };
        let rel_name = tx.class_row(rel).map(|c| c.name).unwrap_or_default();

        if existing.kind != ConstraintKind::Check {
            return Err(ConstraintError::NotCheck(name.to_string()).into());
        }
        if existing.expr.as_ref() != Some(expr) {
            return Err(ConstraintError::DivergentExpression(name.to_string()).into());
        }
        // A purely inherited row absorbing a local definition is always a
        // legal merge.
        if !existing.is_local && existing.inherit_count > 0 && is_local {
            allow_merge = true;
        }
        if !allow_merge {
            return Err(ConstraintError::DuplicateName(name.to_string(), rel_name).into());
        }
        if existing.no_inherit {
            return Err(ConstraintError::ExistingNoInherit(name.to_string()).into());
        }
        if existing.inherit_count > 0 && is_no_inherit {
            return Err(ConstraintError::NewNoInherit(name.to_string()).into());
        }
        if is_validated && !existing.validated {
            return Err(ConstraintError::MergeNotValidated(name.to_string()).into());
        }

        let is_partition = tx.class_row(rel).map(|c| c.is_partition).unwrap_or(false);
        let bumped_count = if !is_partition && !is_local {
            Some(
                existing
                    .inherit_count
                    .checked_add(1)
                    .ok_or_else(|| ConstraintError::InheritCountOverflow(name.to_string()))?,
            )
        } else {
            None
        };
        tx.update_constraint(existing.id, |row| {
            if is_partition {
                // A partition has exactly one parent.
                row.inherit_count = 1;
                row.is_local = false;
            } else if is_local {
                row.is_local = true;
            } else {
                row.inherit_count = bumped_count.unwrap();
            }
        })?;
        log::trace!("merged constraint \"{name}\" on relation {rel}");
        Ok(true)
    }

    /// Stores one column default: the attrdef row, the flag updates on the
    /// attribute row, the missing-value fast path, and the dependency edges.
    pub(crate) fn store_attr_default(
        &self,
        tx: &mut CatalogTx,
        rel: RelationId,
        attno: AttrNumber,
        expr: &Expr,
        missing_mode: bool,
        rel_kind: RelationKind,
    ) -> Result<cinderdb_primitives::AttrDefId> {
        let id = self.insert_attrdef_row(tx, rel, attno, expr.clone());

        // The missing value only applies to real tables: rows that predate
        // the column must exist for the fast path to matter.
        let missing = if missing_mode && rel_kind == RelationKind::Table {
            match eval_const(expr) {
                Some(value) => Some(value),
                None => {
                    log::debug!("default for column {attno} of {rel} is not foldable, skipping missing value");
                    None
                }
            }
        } else {
            None
        };
        tx.update_attribute(rel, attno, |row| {
            row.has_default = true;
            if let Some(value) = missing {
                row.has_missing = true;
                row.missing_value = Some(value);
            }
        })?;

        let addr = ObjectAddress::attr_default(id);
        tx.record_dependency(addr, ObjectAddress::relation_column(rel, attno), DependencyKind::Auto);
        tx.record_dependency_on_expression(addr, expr, Some(rel), DependencyKind::Normal, DependencyKind::Normal, false);
        Ok(id)
    }

    /// Stores one check constraint row plus its dependency edges.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn store_rel_check(
        &self,
        tx: &mut CatalogTx,
        rel: RelationId,
        name: &str,
        expr: &Expr,
        is_validated: bool,
        is_local: bool,
        inherit_count: i16,
        is_no_inherit: bool,
        is_internal: bool,
    ) -> Result<ConstraintId> {
        let class = tx.class_row(rel).ok_or(crate::error::RelationError::NotFound(rel))?;
        let keys = expr.pull_column_refs();
        let id = self.insert_constraint_row(
            tx,
            ConstraintRow {
                id: ConstraintId::INVALID,
                name: name.to_string(),
                namespace: class.namespace,
                kind: ConstraintKind::Check,
                deferrable: false,
                deferred: false,
                validated: is_validated,
                class: rel,
                domain_type: TypeId::INVALID,
                keys: keys.clone(),
                referenced_class: RelationId::INVALID,
                parent: ConstraintId::INVALID,
                inherit_count,
                no_inherit: is_no_inherit,
                is_local,
                is_internal,
                expr: Some(expr.clone()),
            },
        )?;

        let addr = ObjectAddress::constraint(id);
        if keys.is_empty() {
            tx.record_dependency(addr, ObjectAddress::relation(rel), DependencyKind::Auto);
        }
        tx.record_dependency_on_expression(addr, expr, Some(rel), DependencyKind::Auto, DependencyKind::Normal, false);
        log::trace!("CONSTRAINT CREATED: \"{name}\" on {rel}");
        Ok(id)
    }

    /// Rewrites the class row's check-constraint count. Called even when
    /// the count is unchanged: the row update broadcasts the invalidation.
    pub(crate) fn set_relation_num_checks(&self, tx: &mut CatalogTx, rel: RelationId) -> Result<()> {
        let count = tx
            .constraints_of(rel)
            .into_iter()
            .filter(|c| c.kind == ConstraintKind::Check)
            .count() as i16;
        tx.update_class(rel, |row| row.checks = count)
    }
}

/// Picks a name for an anonymous check constraint: `{rel}_{col}_check` when
/// the expression touches exactly one column, `{rel}_check` otherwise, with
/// a numeric suffix to dodge names taken earlier in the same statement or
/// already present on the relation.
fn choose_constraint_name(
    tx: &CatalogTx,
    rel: RelationId,
    rel_name: &str,
    expr: &Expr,
    descriptor: &TupleDescriptor,
    used: &[String],
) -> String {
    let refs = expr.pull_column_refs();
    let base = if refs.len() == 1 {
        let col_name = descriptor
            .attr(refs[0])
            .map(|a| a.name.as_str())
            .unwrap_or("col");
        format!("{rel_name}_{col_name}_check")
    } else {
        format!("{rel_name}_check")
    };
    let mut candidate = base.clone();
    let mut n = 0;
    while used.iter().any(|u| *u == candidate) || tx.constraint_by_name(rel, &candidate).is_some() {
        n += 1;
        candidate = format!("{base}{n}");
    }
    candidate
}

impl CatalogTx {
    /// Rebuilds a tuple descriptor from the relation's attribute rows.
    /// Dropped columns keep their slots so attribute numbers stay aligned.
    pub fn relation_descriptor(&self, rel: RelationId) -> TupleDescriptor {
        let mut defs: Vec<AttributeDefinition> = Vec::new();
        for row in self.attributes_of(rel) {
            if row.attno.is_system() {
                continue;
            }
            defs.push(AttributeDefinition {
                name: row.name.clone(),
                type_id: row.type_id,
                typmod: row.typmod,
                len: row.len,
                by_value: row.by_value,
                align: row.align,
                storage: row.storage,
                not_null: row.not_null,
                collation: row.collation,
                identity: row.identity,
                generated: row.generated,
                is_dropped: row.is_dropped,
                is_local: row.is_local,
                inherit_count: row.inherit_count,
            });
        }
        TupleDescriptor::new(defs)
    }
}
