//! The type catalog's row shape and the fixed set of built-in entries.
//!
//! Composite and array rows for user relations are created by the relation
//! builder; everything else a column can reference is seeded at bootstrap.

use cinderdb_primitives::{AlignKind, CollationId, NamespaceId, OwnerId, RelationId, TypeId};
use serde::{Deserialize, Serialize};

/// The namespace all built-in types live in.
pub const SYSTEM_NAMESPACE: NamespaceId = NamespaceId(11);

pub const BOOL: TypeId = TypeId(16);
pub const BYTEA: TypeId = TypeId(17);
pub const INT2: TypeId = TypeId(21);
pub const INT4: TypeId = TypeId(23);
pub const INT8: TypeId = TypeId(20);
pub const FLOAT4: TypeId = TypeId(700);
pub const FLOAT8: TypeId = TypeId(701);
pub const TEXT: TypeId = TypeId(25);
pub const VARCHAR: TypeId = TypeId(1043);

pub const ARRAY_BOOL: TypeId = TypeId(1000);
pub const ARRAY_INT2: TypeId = TypeId(1005);
pub const ARRAY_INT4: TypeId = TypeId(1007);
pub const ARRAY_INT8: TypeId = TypeId(1016);
pub const ARRAY_TEXT: TypeId = TypeId(1009);
pub const ARRAY_FLOAT8: TypeId = TypeId(1022);

pub const OID: TypeId = TypeId(26);
pub const TID: TypeId = TypeId(27);
pub const XID: TypeId = TypeId(28);
pub const CID: TypeId = TypeId(29);

pub const UNKNOWN: TypeId = TypeId(705);
pub const RECORD: TypeId = TypeId(2249);
pub const RECORD_ARRAY: TypeId = TypeId(2287);
pub const CSTRING: TypeId = TypeId(2275);
pub const ANY: TypeId = TypeId(2276);
pub const ANY_ARRAY: TypeId = TypeId(2277);
pub const VOID: TypeId = TypeId(2278);

pub const COLLATION_C: CollationId = CollationId(950);

/// Varlena length sentinel.
pub const VARLENA_LEN: i16 = -1;
/// Null-terminated-string length sentinel.
pub const CSTRING_LEN: i16 = -2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Base,
    Pseudo,
    Domain,
    Composite,
    Range,
}

/// One row of the type catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeRow {
    pub id: TypeId,
    pub name: String,
    pub namespace: NamespaceId,
    pub owner: OwnerId,
    pub kind: TypeKind,
    pub len: i16,
    pub by_value: bool,
    pub align: AlignKind,
    /// The relation whose rows this composite type describes.
    pub relation: RelationId,
    /// Element type when this is an array type.
    pub element: TypeId,
    /// The paired array type, if one exists.
    pub array_type: TypeId,
    /// Base type when this is a domain.
    pub base_type: TypeId,
    pub range_subtype: TypeId,
    pub range_collation: CollationId,
    pub collatable: bool,
    pub not_null: bool,
}

impl TypeRow {
    pub fn is_array(&self) -> bool {
        self.element.is_valid()
    }

    pub fn is_pseudo(&self) -> bool {
        self.kind == TypeKind::Pseudo
    }
}

fn base(id: TypeId, name: &str, len: i16, by_value: bool, align: AlignKind) -> TypeRow {
    TypeRow {
        id,
        name: name.into(),
        namespace: SYSTEM_NAMESPACE,
        owner: OwnerId(10),
        kind: TypeKind::Base,
        len,
        by_value,
        align,
        relation: RelationId::INVALID,
        element: TypeId::INVALID,
        array_type: TypeId::INVALID,
        base_type: TypeId::INVALID,
        range_subtype: TypeId::INVALID,
        range_collation: CollationId::INVALID,
        collatable: false,
        not_null: false,
    }
}

fn array_of(id: TypeId, name: &str, element: TypeId) -> TypeRow {
    TypeRow {
        element,
        len: VARLENA_LEN,
        by_value: false,
        align: AlignKind::Int,
        ..base(id, name, VARLENA_LEN, false, AlignKind::Int)
    }
}

fn pseudo(id: TypeId, name: &str) -> TypeRow {
    TypeRow {
        kind: TypeKind::Pseudo,
        ..base(id, name, 4, true, AlignKind::Int)
    }
}

/// The rows seeded into the type catalog at bootstrap.
pub fn builtin_type_rows() -> Vec<TypeRow> {
    let mut collatable_text = base(TEXT, "text", VARLENA_LEN, false, AlignKind::Int);
    collatable_text.collatable = true;
    collatable_text.array_type = ARRAY_TEXT;
    let mut collatable_varchar = base(VARCHAR, "varchar", VARLENA_LEN, false, AlignKind::Int);
    collatable_varchar.collatable = true;

    let with_array = |mut row: TypeRow, array: TypeId| {
        row.array_type = array;
        row
    };

    let mut any_array = pseudo(ANY_ARRAY, "anyarray");
    any_array.len = VARLENA_LEN;
    any_array.by_value = false;
    let mut record_array = pseudo(RECORD_ARRAY, "_record");
    record_array.element = RECORD;
    let mut cstring = pseudo(CSTRING, "cstring");
    cstring.len = CSTRING_LEN;
    cstring.by_value = false;

    vec![
        with_array(base(BOOL, "bool", 1, true, AlignKind::Char), ARRAY_BOOL),
        base(BYTEA, "bytea", VARLENA_LEN, false, AlignKind::Int),
        with_array(base(INT2, "int2", 2, true, AlignKind::Short), ARRAY_INT2),
        with_array(base(INT4, "int4", 4, true, AlignKind::Int), ARRAY_INT4),
        with_array(base(INT8, "int8", 8, true, AlignKind::Double), ARRAY_INT8),
        base(FLOAT4, "float4", 4, true, AlignKind::Int),
        with_array(base(FLOAT8, "float8", 8, true, AlignKind::Double), ARRAY_FLOAT8),
        collatable_text,
        collatable_varchar,
        base(OID, "oid", 4, true, AlignKind::Int),
        base(TID, "tid", 6, false, AlignKind::Short),
        base(XID, "xid", 4, true, AlignKind::Int),
        base(CID, "cid", 4, true, AlignKind::Int),
        base(UNKNOWN, "unknown", CSTRING_LEN, false, AlignKind::Char),
        array_of(ARRAY_BOOL, "_bool", BOOL),
        array_of(ARRAY_INT2, "_int2", INT2),
        array_of(ARRAY_INT4, "_int4", INT4),
        array_of(ARRAY_INT8, "_int8", INT8),
        array_of(ARRAY_TEXT, "_text", TEXT),
        array_of(ARRAY_FLOAT8, "_float8", FLOAT8),
        pseudo(RECORD, "record"),
        record_array,
        cstring,
        pseudo(ANY, "any"),
        any_array,
        pseudo(VOID, "void"),
    ]
}

/// Conventional name of the auto-generated array type over `name`.
pub fn array_type_name(name: &str) -> String {
    format!("_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_unique() {
        let rows = builtin_type_rows();
        let mut ids: Vec<_> = rows.iter().map(|r| r.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), rows.len());
    }

    #[test]
    fn text_is_collatable() {
        let rows = builtin_type_rows();
        let text = rows.iter().find(|r| r.id == TEXT).unwrap();
        assert!(text.collatable);
        assert_eq!(text.array_type, ARRAY_TEXT);
    }

    #[test]
    fn pseudo_types_flagged() {
        let rows = builtin_type_rows();
        for id in [RECORD, RECORD_ARRAY, CSTRING, ANY, ANY_ARRAY, VOID] {
            assert!(rows.iter().find(|r| r.id == id).unwrap().is_pseudo(), "{id}");
        }
    }
}
