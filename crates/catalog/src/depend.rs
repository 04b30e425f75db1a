//! Typed edge recording into the dependency catalog.
//!
//! Edges are persisted as rows in the current transaction immediately; there
//! is no separate staging beyond the transaction itself. Traversal of the
//! graph (cascade deletion) lives with the caller.

use cinderdb_primitives::{
    AclItem, DependencyKind, OwnerId, RelationId, DEFAULT_COLLATION,
};

use crate::expr::Expr;
use crate::system_tables::{DependRow, ObjectAddress};
use crate::tx::CatalogTx;

impl CatalogTx {
    /// Records one edge: `referrer` depends on `referent`.
    pub fn record_dependency(&mut self, referrer: ObjectAddress, referent: ObjectAddress, kind: DependencyKind) {
        self.add_depend(DependRow {
            referrer,
            referent,
            kind,
        });
    }

    /// Batch form of [`record_dependency`](Self::record_dependency).
    pub fn record_dependencies_on(
        &mut self,
        referrer: ObjectAddress,
        referents: &[ObjectAddress],
        kind: DependencyKind,
    ) {
        for referent in referents {
            self.record_dependency(referrer, *referent, kind);
        }
    }

    /// Pins the object on its owner. Nothing is recorded in bootstrap mode;
    /// bootstrap objects are implicitly pinned.
    pub fn record_dependency_on_owner(&mut self, referrer: ObjectAddress, owner: OwnerId) {
        if self.bootstrap {
            return;
        }
        self.record_dependency(referrer, ObjectAddress::owner(owner), DependencyKind::PinnedOwner);
    }

    /// One ACL edge per grantee other than the owner.
    pub fn record_dependency_on_acl(&mut self, referrer: ObjectAddress, owner: OwnerId, acl: &[AclItem]) {
        for item in acl {
            if item.grantee == owner {
                continue;
            }
            self.record_dependency(referrer, ObjectAddress::owner(item.grantee), DependencyKind::Acl);
        }
    }

    /// If an extension is being created, makes the object a member of it.
    pub fn record_dependency_on_current_extension(&mut self, referrer: ObjectAddress) {
        if let Some(extension) = self.current_extension {
            self.record_dependency(referrer, ObjectAddress::extension(extension), DependencyKind::Extension);
        }
    }

    /// Walks a cooked expression and records one edge per referenced object:
    /// functions, operators, types, and non-default collations get
    /// `outside_kind`; columns of `self_rel` get `inside_kind`. With
    /// `reverse_self` the column edges point the other way, making each
    /// referenced column depend on `referrer`.
    pub fn record_dependency_on_expression(
        &mut self,
        referrer: ObjectAddress,
        expr: &Expr,
        self_rel: Option<RelationId>,
        inside_kind: DependencyKind,
        outside_kind: DependencyKind,
        reverse_self: bool,
    ) {
        let mut edges = Vec::new();
        expr.walk(&mut |node| match node {
            Expr::Var { attno, collation, .. } => {
                if let Some(rel) = self_rel {
                    let column = ObjectAddress::relation_column(rel, *attno);
                    if reverse_self {
                        edges.push(DependRow {
                            referrer: column,
                            referent: referrer,
                            kind: inside_kind,
                        });
                    } else {
                        edges.push(DependRow {
                            referrer,
                            referent: column,
                            kind: inside_kind,
                        });
                    }
                }
                if collation.is_valid() && *collation != DEFAULT_COLLATION {
                    edges.push(DependRow {
                        referrer,
                        referent: ObjectAddress::collation(*collation),
                        kind: outside_kind,
                    });
                }
            }
            Expr::Func { routine, result, .. } | Expr::Op { routine, result, .. } => {
                edges.push(DependRow {
                    referrer,
                    referent: ObjectAddress::routine(*routine),
                    kind: outside_kind,
                });
                edges.push(DependRow {
                    referrer,
                    referent: ObjectAddress::type_entry(*result),
                    kind: outside_kind,
                });
            }
            Expr::Const { type_id, .. } => {
                edges.push(DependRow {
                    referrer,
                    referent: ObjectAddress::type_entry(*type_id),
                    kind: outside_kind,
                });
            }
            Expr::Cast { to, .. } => {
                edges.push(DependRow {
                    referrer,
                    referent: ObjectAddress::type_entry(*to),
                    kind: outside_kind,
                });
            }
            Expr::Collate { collation, .. } => {
                // The default collation is pinned; recording it would only
                // bloat the graph.
                if *collation != DEFAULT_COLLATION && collation.is_valid() {
                    edges.push(DependRow {
                        referrer,
                        referent: ObjectAddress::collation(*collation),
                        kind: outside_kind,
                    });
                }
            }
            _ => {}
        });
        edges.sort_by_key(|e| (e.referent.class as u8, e.referent.oid, e.referent.sub));
        edges.dedup();
        for edge in edges {
            self.add_depend(edge);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{binary_op, Volatility};
    use crate::smgr::MemSmgr;
    use crate::storage::HeapLikeAm;
    use crate::system_tables::ObjectClass;
    use crate::tx::{Catalog, Session};
    use crate::types;
    use crate::wal::MemWal;
    use crate::config::CatalogConfig;
    use cinderdb_primitives::{AttrNumber, BackendTag, CollationId, ConstraintId, DatabaseId, RoutineId};
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(
            Catalog::bootstrap(DatabaseId(5)),
            Arc::new(MemSmgr::new()),
            Arc::new(MemWal::new(true)),
            Arc::new(HeapLikeAm),
            CatalogConfig::default(),
            BackendTag::INVALID,
        )
    }

    #[test]
    fn expression_edges_cover_functions_types_and_columns() {
        let session = session();
        let mut tx = session.begin_tx();
        let rel = RelationId(6000);
        let referrer = ObjectAddress::constraint(ConstraintId(42));
        let expr = binary_op(
            ">",
            Expr::Var {
                attno: AttrNumber(1),
                type_id: types::INT4,
                collation: CollationId::INVALID,
            },
            Expr::int4(0),
            types::BOOL,
        );
        tx.record_dependency_on_expression(
            referrer,
            &expr,
            Some(rel),
            DependencyKind::Auto,
            DependencyKind::Normal,
            false,
        );
        let edges = tx.depends();
        assert!(edges.iter().any(|e| {
            e.kind == DependencyKind::Auto
                && e.referent == ObjectAddress::relation_column(rel, AttrNumber(1))
        }));
        assert!(edges
            .iter()
            .any(|e| e.kind == DependencyKind::Normal && e.referent.class == ObjectClass::Routine));
        assert!(edges
            .iter()
            .any(|e| e.kind == DependencyKind::Normal && e.referent == ObjectAddress::type_entry(types::INT4)));
    }

    #[test]
    fn reverse_self_flips_column_edges() {
        let session = session();
        let mut tx = session.begin_tx();
        let rel = RelationId(6000);
        let referrer = ObjectAddress::attr_default(cinderdb_primitives::AttrDefId(7));
        let expr = Expr::Var {
            attno: AttrNumber(2),
            type_id: types::INT4,
            collation: CollationId::INVALID,
        };
        tx.record_dependency_on_expression(
            referrer,
            &expr,
            Some(rel),
            DependencyKind::Auto,
            DependencyKind::Normal,
            true,
        );
        let edges = tx.depends();
        let column = ObjectAddress::relation_column(rel, AttrNumber(2));
        assert!(edges
            .iter()
            .any(|e| e.referrer == column && e.referent == referrer && e.kind == DependencyKind::Auto));
    }

    #[test]
    fn default_collation_is_never_recorded() {
        let session = session();
        let mut tx = session.begin_tx();
        let referrer = ObjectAddress::constraint(ConstraintId(1));
        let expr = Expr::Collate {
            arg: Box::new(Expr::text("x")),
            collation: DEFAULT_COLLATION,
        };
        tx.record_dependency_on_expression(referrer, &expr, None, DependencyKind::Auto, DependencyKind::Normal, false);
        assert!(!tx
            .depends()
            .iter()
            .any(|e| e.referent.class == ObjectClass::Collation));
    }

    #[test]
    fn explicit_collation_is_recorded() {
        let session = session();
        let mut tx = session.begin_tx();
        let referrer = ObjectAddress::constraint(ConstraintId(1));
        let expr = Expr::Collate {
            arg: Box::new(Expr::text("x")),
            collation: types::COLLATION_C,
        };
        tx.record_dependency_on_expression(referrer, &expr, None, DependencyKind::Auto, DependencyKind::Normal, false);
        assert!(tx
            .depends()
            .iter()
            .any(|e| e.referent == ObjectAddress::collation(types::COLLATION_C)));
    }

    #[test]
    fn owner_edge_skipped_in_bootstrap_mode() {
        let mut session = session();
        session.set_bootstrap_mode(true);
        let mut tx = session.begin_tx();
        tx.record_dependency_on_owner(ObjectAddress::relation(RelationId(6000)), OwnerId(10));
        assert!(tx.depends().is_empty());
    }

    #[test]
    fn acl_edges_skip_the_owner() {
        let session = session();
        let mut tx = session.begin_tx();
        let owner = OwnerId(10);
        let acl = vec![
            AclItem {
                grantee: owner,
                grantor: owner,
                privs: cinderdb_primitives::AclPrivs::SELECT,
            },
            AclItem {
                grantee: OwnerId(20),
                grantor: owner,
                privs: cinderdb_primitives::AclPrivs::SELECT,
            },
        ];
        tx.record_dependency_on_acl(ObjectAddress::relation(RelationId(6000)), owner, &acl);
        let edges = tx.depends();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].referent, ObjectAddress::owner(OwnerId(20)));
        assert_eq!(edges[0].kind, DependencyKind::Acl);
    }

    #[test]
    fn operators_carry_valid_routine_ids() {
        let op = binary_op("+", Expr::int4(1), Expr::int4(2), types::INT4);
        let Expr::Op { routine, .. } = op else {
            unreachable!();
        };
        assert_ne!(routine, RoutineId::INVALID);
    }
}
