//! Tuple descriptors and the in-memory relation handle the builder fills in.

use cinderdb_primitives::{
    AccessMethodId, AlignKind, AttrNumber, BackendTag, CollationId, GeneratedKind, IdentityKind,
    MultiXactId, NamespaceId, Persistence, RelFileLocator, RelationId, RelationKind, StorageKind,
    TablespaceId, TransactionId, TypeId, DEFAULT_COLLATION,
};

use crate::types::{TypeRow, VARLENA_LEN};

/// One column of a relation under construction.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeDefinition {
    pub name: String,
    pub type_id: TypeId,
    pub typmod: i32,
    /// Byte length; negative sentinels denote varlena (-1) and cstring (-2).
    pub len: i16,
    pub by_value: bool,
    pub align: AlignKind,
    pub storage: StorageKind,
    pub not_null: bool,
    pub collation: CollationId,
    pub identity: IdentityKind,
    pub generated: GeneratedKind,
    pub is_dropped: bool,
    pub is_local: bool,
    pub inherit_count: i16,
}

impl AttributeDefinition {
    /// Builds a definition from a type-catalog row, inheriting its physical
    /// properties and default collation.
    pub fn from_type(name: impl Into<String>, ty: &TypeRow) -> Self {
        Self {
            name: name.into(),
            type_id: ty.id,
            typmod: -1,
            len: ty.len,
            by_value: ty.by_value,
            align: ty.align,
            storage: if ty.len == VARLENA_LEN {
                StorageKind::Extended
            } else {
                StorageKind::Plain
            },
            not_null: false,
            collation: if ty.collatable {
                DEFAULT_COLLATION
            } else {
                CollationId::INVALID
            },
            identity: IdentityKind::None,
            generated: GeneratedKind::None,
            is_dropped: false,
            is_local: true,
            inherit_count: 0,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn generated_stored(mut self) -> Self {
        self.generated = GeneratedKind::Stored;
        self
    }
}

/// Ordered list of user attributes describing one relation's shape.
///
/// Attribute numbers are positional: entry `i` is attribute `i + 1`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TupleDescriptor {
    attrs: Vec<AttributeDefinition>,
}

impl TupleDescriptor {
    pub fn new(attrs: Vec<AttributeDefinition>) -> Self {
        Self { attrs }
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attrs.iter()
    }

    /// The attribute at `attno`, which must be a user attribute number.
    pub fn attr(&self, attno: AttrNumber) -> Option<&AttributeDefinition> {
        self.attrs.get(attno.user_idx())
    }

    /// Resolves a column name against the non-dropped attributes.
    pub fn find_by_name(&self, name: &str) -> Option<(AttrNumber, &AttributeDefinition)> {
        self.attrs
            .iter()
            .enumerate()
            .filter(|(_, a)| !a.is_dropped)
            .find(|(_, a)| a.name == name)
            .map(|(i, a)| (AttrNumber(i as i16 + 1), a))
    }
}

impl From<Vec<AttributeDefinition>> for TupleDescriptor {
    fn from(attrs: Vec<AttributeDefinition>) -> Self {
        Self::new(attrs)
    }
}

/// The in-memory handle for a relation, built progressively by the relation
/// builder before any catalog row is written.
#[derive(Clone, Debug)]
pub struct RelationDescriptor {
    pub id: RelationId,
    pub name: String,
    pub namespace: NamespaceId,
    pub tablespace: TablespaceId,
    pub kind: RelationKind,
    pub persistence: Persistence,
    pub descriptor: TupleDescriptor,
    pub access_method: AccessMethodId,
    pub shared: bool,
    pub mapped: bool,
    pub file: RelFileLocator,
    pub backend: BackendTag,
    pub freeze_xact: TransactionId,
    pub freeze_multi: MultiXactId,
}
