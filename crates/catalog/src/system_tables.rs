//! Identities and row shapes of the system catalog tables.
//!
//! When defining a new catalog table, remember to:
//! - Define constants for its ID and name.
//! - Add it to [`SystemCatalog`] and [`catalog_relations`].
//! - Define its row struct and give it a home in the catalog store.
//! - List its columns in [`catalog_columns`] so bootstrap can describe it.

use cinderdb_primitives::{
    AccessMethodId, AlignKind, AttrNumber, AttrDefId, CollationId, ConstraintId, DependencyKind,
    ExtensionId, GeneratedKind, IdentityKind, MultiXactId, NamespaceId, OwnerId, Persistence,
    RelationId, RelationKind, RoutineId, StorageKind, SubscriptionId, TablespaceId, TransactionId,
    TypeId, AclItem,
};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::expr::{Expr, Value};
use crate::types;

pub const ST_CLASS_ID: RelationId = RelationId(1);
pub const ST_ATTRIBUTE_ID: RelationId = RelationId(2);
pub const ST_TYPE_ID: RelationId = RelationId(3);
pub const ST_CONSTRAINT_ID: RelationId = RelationId(4);
pub const ST_ATTRDEF_ID: RelationId = RelationId(5);
pub const ST_DEPEND_ID: RelationId = RelationId(6);
pub const ST_INHERITS_ID: RelationId = RelationId(7);
pub const ST_PARTITIONED_ID: RelationId = RelationId(8);
pub const ST_FOREIGN_ID: RelationId = RelationId(9);
pub const ST_STATISTIC_ID: RelationId = RelationId(10);
pub const ST_SUBSCRIPTION_REL_ID: RelationId = RelationId(11);

pub const ST_CLASS_NAME: &str = "st_class";
pub const ST_ATTRIBUTE_NAME: &str = "st_attribute";
pub const ST_TYPE_NAME: &str = "st_type";
pub const ST_CONSTRAINT_NAME: &str = "st_constraint";
pub const ST_ATTRDEF_NAME: &str = "st_attrdef";
pub const ST_DEPEND_NAME: &str = "st_depend";
pub const ST_INHERITS_NAME: &str = "st_inherits";
pub const ST_PARTITIONED_NAME: &str = "st_partitioned";
pub const ST_FOREIGN_NAME: &str = "st_foreign";
pub const ST_STATISTIC_NAME: &str = "st_statistic";
pub const ST_SUBSCRIPTION_REL_NAME: &str = "st_subscription_rel";

/// Identifiers below this value are reserved for catalog objects; ids for
/// user relations and types are allocated above it.
pub const FIRST_USER_ID: u32 = 4096;

// This helps to keep the correct order when bootstrapping.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum SystemCatalog {
    st_class,
    st_attribute,
    st_type,
    st_constraint,
    st_attrdef,
    st_depend,
    st_inherits,
    st_partitioned,
    st_foreign,
    st_statistic,
    st_subscription_rel,
}

impl SystemCatalog {
    pub const ALL: [SystemCatalog; 11] = [
        SystemCatalog::st_class,
        SystemCatalog::st_attribute,
        SystemCatalog::st_type,
        SystemCatalog::st_constraint,
        SystemCatalog::st_attrdef,
        SystemCatalog::st_depend,
        SystemCatalog::st_inherits,
        SystemCatalog::st_partitioned,
        SystemCatalog::st_foreign,
        SystemCatalog::st_statistic,
        SystemCatalog::st_subscription_rel,
    ];

    pub fn relation_id(self) -> RelationId {
        match self {
            SystemCatalog::st_class => ST_CLASS_ID,
            SystemCatalog::st_attribute => ST_ATTRIBUTE_ID,
            SystemCatalog::st_type => ST_TYPE_ID,
            SystemCatalog::st_constraint => ST_CONSTRAINT_ID,
            SystemCatalog::st_attrdef => ST_ATTRDEF_ID,
            SystemCatalog::st_depend => ST_DEPEND_ID,
            SystemCatalog::st_inherits => ST_INHERITS_ID,
            SystemCatalog::st_partitioned => ST_PARTITIONED_ID,
            SystemCatalog::st_foreign => ST_FOREIGN_ID,
            SystemCatalog::st_statistic => ST_STATISTIC_ID,
            SystemCatalog::st_subscription_rel => ST_SUBSCRIPTION_REL_ID,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SystemCatalog::st_class => ST_CLASS_NAME,
            SystemCatalog::st_attribute => ST_ATTRIBUTE_NAME,
            SystemCatalog::st_type => ST_TYPE_NAME,
            SystemCatalog::st_constraint => ST_CONSTRAINT_NAME,
            SystemCatalog::st_attrdef => ST_ATTRDEF_NAME,
            SystemCatalog::st_depend => ST_DEPEND_NAME,
            SystemCatalog::st_inherits => ST_INHERITS_NAME,
            SystemCatalog::st_partitioned => ST_PARTITIONED_NAME,
            SystemCatalog::st_foreign => ST_FOREIGN_NAME,
            SystemCatalog::st_statistic => ST_STATISTIC_NAME,
            SystemCatalog::st_subscription_rel => ST_SUBSCRIPTION_REL_NAME,
        }
    }
}

/// Names starting with this prefix are reserved for the system catalogs.
pub fn relation_name_is_system(name: &str) -> bool {
    name.starts_with("st_")
}

/// The rewritten name of a dropped column. The original name is gone for
/// good; only the attribute number survives in the marker.
pub fn dropped_column_name(attno: AttrNumber) -> String {
    format!("........pg.dropped.{}........", attno.0)
}

/// One row of `st_class`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassRow {
    pub id: RelationId,
    pub name: String,
    pub namespace: NamespaceId,
    /// Composite row type, invalid for kinds without one.
    pub row_type: TypeId,
    /// The declared OF type, when the relation was created over one.
    pub of_type: TypeId,
    pub owner: OwnerId,
    pub access_method: AccessMethodId,
    /// On-disk file number; coincides with `id` until a rewrite.
    pub file_number: u32,
    pub tablespace: TablespaceId,
    pub pages: i32,
    /// -1 means "never yet estimated".
    pub tuples: f32,
    pub toast_relation: RelationId,
    pub has_index: bool,
    pub shared: bool,
    pub mapped: bool,
    pub persistence: Persistence,
    pub kind: RelationKind,
    pub natts: i16,
    /// Number of check constraints; kept in sync by the constraint writer.
    pub checks: i16,
    pub has_subclass: bool,
    pub is_partition: bool,
    /// Stored text of the partition bound; set only via row update.
    pub partition_bound: Option<String>,
    pub acl: Option<Vec<AclItem>>,
    pub options: Option<Vec<String>>,
    pub freeze_xact: TransactionId,
    pub freeze_multi: MultiXactId,
}

/// One row of `st_attribute`.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeRow {
    pub class: RelationId,
    pub name: String,
    pub type_id: TypeId,
    pub attno: AttrNumber,
    pub len: i16,
    pub typmod: i32,
    /// Cached offset; always written as -1, computed only in descriptors.
    pub cache_off: i32,
    pub by_value: bool,
    pub align: AlignKind,
    pub storage: StorageKind,
    pub not_null: bool,
    pub has_default: bool,
    pub has_missing: bool,
    /// Pre-evaluated default for rows that predate the column, stored as a
    /// one-element array; `Some(Value::Null)` records a null-evaluated value.
    pub missing_value: Option<Value>,
    pub identity: IdentityKind,
    pub generated: GeneratedKind,
    pub is_dropped: bool,
    pub is_local: bool,
    pub inherit_count: i16,
    pub collation: CollationId,
    pub stat_target: Option<i16>,
    pub acl: Option<Vec<AclItem>>,
    pub options: Option<Vec<String>>,
    pub fdw_options: Option<Vec<String>>,
}

impl AttributeRow {
    /// Catalog row for one user attribute of `class`.
    pub fn from_definition(class: RelationId, attno: AttrNumber, def: &crate::desc::AttributeDefinition) -> Self {
        Self {
            class,
            name: def.name.clone(),
            type_id: def.type_id,
            attno,
            len: def.len,
            typmod: def.typmod,
            cache_off: -1,
            by_value: def.by_value,
            align: def.align,
            storage: def.storage,
            not_null: def.not_null,
            has_default: false,
            has_missing: false,
            missing_value: None,
            identity: def.identity,
            generated: def.generated,
            is_dropped: def.is_dropped,
            is_local: def.is_local,
            inherit_count: def.inherit_count,
            collation: def.collation,
            stat_target: None,
            acl: None,
            options: None,
            fdw_options: None,
        }
    }

    /// Catalog row for one entry of the system-attribute prototype, with the
    /// class id patched in.
    pub fn system(class: RelationId, proto: &SystemAttribute) -> Self {
        Self {
            class,
            name: proto.name.to_string(),
            type_id: proto.type_id,
            attno: proto.attno,
            len: proto.len,
            typmod: -1,
            cache_off: -1,
            by_value: proto.by_value,
            align: proto.align,
            storage: StorageKind::Plain,
            not_null: true,
            has_default: false,
            has_missing: false,
            missing_value: None,
            identity: IdentityKind::None,
            generated: GeneratedKind::None,
            is_dropped: false,
            is_local: true,
            inherit_count: 0,
            collation: CollationId::INVALID,
            stat_target: None,
            acl: None,
            options: None,
            fdw_options: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Check,
    ForeignKey,
    PrimaryKey,
    Unique,
    NotNull,
}

/// One row of `st_constraint`.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintRow {
    pub id: ConstraintId,
    pub name: String,
    pub namespace: NamespaceId,
    pub kind: ConstraintKind,
    pub deferrable: bool,
    pub deferred: bool,
    pub validated: bool,
    /// Owning relation; invalid for domain constraints.
    pub class: RelationId,
    /// Owning domain; invalid for relation constraints.
    pub domain_type: TypeId,
    pub keys: Vec<AttrNumber>,
    /// Referenced relation of a foreign key.
    pub referenced_class: RelationId,
    /// Parent constraint when this row is a partition's clone of an FK.
    pub parent: ConstraintId,
    pub inherit_count: i16,
    pub no_inherit: bool,
    pub is_local: bool,
    pub is_internal: bool,
    /// Cooked check expression; `None` for non-check constraints.
    pub expr: Option<Expr>,
}

/// One row of `st_attrdef`.
#[derive(Clone, Debug, PartialEq)]
pub struct AttrDefRow {
    pub id: AttrDefId,
    pub class: RelationId,
    pub attno: AttrNumber,
    pub expr: Expr,
}

/// Which catalog an [`ObjectAddress`] points into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectClass {
    Class,
    Type,
    Constraint,
    AttrDefault,
    Namespace,
    Owner,
    Collation,
    Routine,
    Extension,
    AccessMethod,
}

/// (class, object, sub) triple identifying any catalog object.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectAddress {
    pub class: ObjectClass,
    pub oid: u32,
    pub sub: i32,
}

impl ObjectAddress {
    pub fn relation(id: RelationId) -> Self {
        Self {
            class: ObjectClass::Class,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn relation_column(id: RelationId, attno: AttrNumber) -> Self {
        Self {
            class: ObjectClass::Class,
            oid: id.0,
            sub: attno.0 as i32,
        }
    }

    pub fn type_entry(id: TypeId) -> Self {
        Self {
            class: ObjectClass::Type,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn constraint(id: ConstraintId) -> Self {
        Self {
            class: ObjectClass::Constraint,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn attr_default(id: AttrDefId) -> Self {
        Self {
            class: ObjectClass::AttrDefault,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn namespace(id: NamespaceId) -> Self {
        Self {
            class: ObjectClass::Namespace,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn owner(id: OwnerId) -> Self {
        Self {
            class: ObjectClass::Owner,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn collation(id: CollationId) -> Self {
        Self {
            class: ObjectClass::Collation,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn routine(id: RoutineId) -> Self {
        Self {
            class: ObjectClass::Routine,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn extension(id: ExtensionId) -> Self {
        Self {
            class: ObjectClass::Extension,
            oid: id.0,
            sub: 0,
        }
    }

    pub fn access_method(id: AccessMethodId) -> Self {
        Self {
            class: ObjectClass::AccessMethod,
            oid: id.0,
            sub: 0,
        }
    }
}

/// One edge of the dependency graph, persisted in `st_depend`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DependRow {
    pub referrer: ObjectAddress,
    pub referent: ObjectAddress,
    pub kind: DependencyKind,
}

/// One row of `st_inherits`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InheritsRow {
    pub child: RelationId,
    pub parent: RelationId,
    pub seqno: i16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionStrategy {
    Range,
    List,
    Hash,
}

/// One row of `st_partitioned`, keyed by the partitioned relation.
#[derive(Clone, Debug, PartialEq)]
pub struct PartitionedRow {
    pub class: RelationId,
    pub strategy: PartitionStrategy,
    pub key_attrs: Vec<AttrNumber>,
    pub key_collations: Vec<CollationId>,
    /// The default partition, if one exists.
    pub default_partition: RelationId,
}

/// Declarative bound of one partition, stored as text in its class row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PartitionBound {
    Default,
    Range { lower: Vec<Value>, upper: Vec<Value> },
    List(Vec<Value>),
    Hash { modulus: i32, remainder: i32 },
}

impl PartitionBound {
    pub fn is_default(&self) -> bool {
        matches!(self, PartitionBound::Default)
    }

    pub fn to_stored_text(&self) -> String {
        serde_json::to_string(self).expect("partition bounds always serialize")
    }

    pub fn from_stored_text(text: &str) -> Option<PartitionBound> {
        serde_json::from_str(text).ok()
    }
}

/// One row of `st_foreign`.
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignRow {
    pub class: RelationId,
    pub server: u32,
    pub options: Vec<String>,
}

/// One row of `st_statistic`.
#[derive(Clone, Debug, PartialEq)]
pub struct StatisticRow {
    pub class: RelationId,
    pub attno: AttrNumber,
    pub null_frac: f32,
    pub avg_width: i32,
    pub n_distinct: f32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionRelState {
    Init,
    DataSync,
    Ready,
}

/// One row of `st_subscription_rel`.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionRelRow {
    pub subscription: SubscriptionId,
    pub class: RelationId,
    pub state: SubscriptionRelState,
    pub lsn: u64,
}

/// Template for the fixed system attributes appended to every relation whose
/// kind carries them. The class id is patched in at insertion time.
pub struct SystemAttribute {
    pub name: &'static str,
    pub attno: AttrNumber,
    pub type_id: TypeId,
    pub len: i16,
    pub by_value: bool,
    pub align: AlignKind,
}

pub const SYSTEM_ATTRIBUTES: [SystemAttribute; 6] = [
    SystemAttribute {
        name: "row_pointer",
        attno: AttrNumber::ROW_POINTER,
        type_id: types::TID,
        len: 6,
        by_value: false,
        align: AlignKind::Short,
    },
    SystemAttribute {
        name: "insert_xact",
        attno: AttrNumber::INSERT_XACT,
        type_id: types::XID,
        len: 4,
        by_value: true,
        align: AlignKind::Int,
    },
    SystemAttribute {
        name: "insert_cmd",
        attno: AttrNumber::INSERT_CMD,
        type_id: types::CID,
        len: 4,
        by_value: true,
        align: AlignKind::Int,
    },
    SystemAttribute {
        name: "delete_xact",
        attno: AttrNumber::DELETE_XACT,
        type_id: types::XID,
        len: 4,
        by_value: true,
        align: AlignKind::Int,
    },
    SystemAttribute {
        name: "delete_cmd",
        attno: AttrNumber::DELETE_CMD,
        type_id: types::CID,
        len: 4,
        by_value: true,
        align: AlignKind::Int,
    },
    SystemAttribute {
        name: "table_ident",
        attno: AttrNumber::TABLE_IDENT,
        type_id: types::OID,
        len: 4,
        by_value: true,
        align: AlignKind::Int,
    },
];

/// Whether `name` collides with one of the system attribute names.
pub fn is_system_attribute_name(name: &str) -> bool {
    SYSTEM_ATTRIBUTES.iter().any(|a| a.name == name)
}

/// Logical columns of each catalog table, used by bootstrap to make the
/// catalog describe itself.
pub fn catalog_columns(catalog: SystemCatalog) -> &'static [(&'static str, TypeId)] {
    match catalog {
        SystemCatalog::st_class => &[
            ("id", types::OID),
            ("name", types::TEXT),
            ("namespace", types::OID),
            ("row_type", types::OID),
            ("of_type", types::OID),
            ("owner", types::OID),
            ("access_method", types::OID),
            ("file_number", types::OID),
            ("tablespace", types::OID),
            ("pages", types::INT4),
            ("tuples", types::FLOAT4),
            ("toast_relation", types::OID),
            ("has_index", types::BOOL),
            ("shared", types::BOOL),
            ("mapped", types::BOOL),
            ("persistence", types::TEXT),
            ("kind", types::TEXT),
            ("natts", types::INT2),
            ("checks", types::INT2),
            ("has_subclass", types::BOOL),
            ("is_partition", types::BOOL),
            ("partition_bound", types::TEXT),
            ("acl", types::ARRAY_TEXT),
            ("options", types::ARRAY_TEXT),
            ("freeze_xact", types::XID),
            ("freeze_multi", types::XID),
        ],
        SystemCatalog::st_attribute => &[
            ("class", types::OID),
            ("name", types::TEXT),
            ("type_id", types::OID),
            ("attno", types::INT2),
            ("len", types::INT2),
            ("typmod", types::INT4),
            ("cache_off", types::INT4),
            ("by_value", types::BOOL),
            ("align", types::TEXT),
            ("storage", types::TEXT),
            ("not_null", types::BOOL),
            ("has_default", types::BOOL),
            ("has_missing", types::BOOL),
            ("missing_value", types::ARRAY_TEXT),
            ("identity", types::TEXT),
            ("generated", types::TEXT),
            ("is_dropped", types::BOOL),
            ("is_local", types::BOOL),
            ("inherit_count", types::INT2),
            ("collation", types::OID),
            ("stat_target", types::INT2),
            ("acl", types::ARRAY_TEXT),
            ("options", types::ARRAY_TEXT),
            ("fdw_options", types::ARRAY_TEXT),
        ],
        SystemCatalog::st_type => &[
            ("id", types::OID),
            ("name", types::TEXT),
            ("namespace", types::OID),
            ("owner", types::OID),
            ("kind", types::TEXT),
            ("len", types::INT2),
            ("by_value", types::BOOL),
            ("align", types::TEXT),
            ("relation", types::OID),
            ("element", types::OID),
            ("array_type", types::OID),
            ("base_type", types::OID),
            ("range_subtype", types::OID),
            ("range_collation", types::OID),
            ("collatable", types::BOOL),
            ("not_null", types::BOOL),
        ],
        SystemCatalog::st_constraint => &[
            ("id", types::OID),
            ("name", types::TEXT),
            ("namespace", types::OID),
            ("kind", types::TEXT),
            ("deferrable", types::BOOL),
            ("deferred", types::BOOL),
            ("validated", types::BOOL),
            ("class", types::OID),
            ("domain_type", types::OID),
            ("keys", types::ARRAY_INT2),
            ("referenced_class", types::OID),
            ("parent", types::OID),
            ("inherit_count", types::INT2),
            ("no_inherit", types::BOOL),
            ("is_local", types::BOOL),
            ("is_internal", types::BOOL),
            ("expr", types::TEXT),
        ],
        SystemCatalog::st_attrdef => &[
            ("id", types::OID),
            ("class", types::OID),
            ("attno", types::INT2),
            ("expr", types::TEXT),
        ],
        SystemCatalog::st_depend => &[
            ("referrer_class", types::OID),
            ("referrer", types::OID),
            ("referrer_sub", types::INT4),
            ("referent_class", types::OID),
            ("referent", types::OID),
            ("referent_sub", types::INT4),
            ("kind", types::TEXT),
        ],
        SystemCatalog::st_inherits => &[
            ("child", types::OID),
            ("parent", types::OID),
            ("seqno", types::INT2),
        ],
        SystemCatalog::st_partitioned => &[
            ("class", types::OID),
            ("strategy", types::TEXT),
            ("key_attrs", types::ARRAY_INT2),
            ("key_collations", types::ARRAY_INT4),
            ("default_partition", types::OID),
        ],
        SystemCatalog::st_foreign => &[
            ("class", types::OID),
            ("server", types::OID),
            ("options", types::ARRAY_TEXT),
        ],
        SystemCatalog::st_statistic => &[
            ("class", types::OID),
            ("attno", types::INT2),
            ("null_frac", types::FLOAT4),
            ("avg_width", types::INT4),
            ("n_distinct", types::FLOAT4),
        ],
        SystemCatalog::st_subscription_rel => &[
            ("subscription", types::OID),
            ("class", types::OID),
            ("state", types::TEXT),
            ("lsn", types::INT8),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_reserved() {
        for catalog in SystemCatalog::ALL {
            assert!(catalog.relation_id().0 < FIRST_USER_ID);
            assert!(relation_name_is_system(catalog.name()));
        }
    }

    #[test]
    fn dropped_name_pattern() {
        assert_eq!(dropped_column_name(AttrNumber(2)), "........pg.dropped.2........");
        assert_eq!(dropped_column_name(AttrNumber(17)), "........pg.dropped.17........");
    }

    #[test]
    fn system_attribute_names_are_reserved() {
        assert!(is_system_attribute_name("row_pointer"));
        assert!(is_system_attribute_name("table_ident"));
        assert!(!is_system_attribute_name("id"));
    }

    #[test]
    fn partition_bound_round_trip() {
        for bound in [
            PartitionBound::Default,
            PartitionBound::List(vec![Value::Int4(1), Value::Int4(2)]),
            PartitionBound::Range {
                lower: vec![Value::Int4(0)],
                upper: vec![Value::Int4(10)],
            },
            PartitionBound::Hash {
                modulus: 4,
                remainder: 1,
            },
        ] {
            let text = bound.to_stored_text();
            assert_eq!(PartitionBound::from_stored_text(&text), Some(bound));
        }
    }

    #[test]
    fn every_catalog_describes_its_columns() {
        for catalog in SystemCatalog::ALL {
            assert!(!catalog_columns(catalog).is_empty(), "{catalog}");
        }
    }
}
