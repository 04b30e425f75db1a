//! Identifier newtypes and small tag enums shared across the CinderDB
//! catalog crates.
//!
//! Everything in here is `Copy`, cheap to compare, and carries no behavior
//! beyond what its container needs: the catalog crate owns the semantics.

use core::fmt;

/// Generates a `u32`-backed object identifier newtype.
///
/// Zero is reserved as the invalid sentinel for every identifier class.
macro_rules! object_id {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[derive(serde::Serialize, serde::Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub const INVALID: Self = Self(0);

            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != 0
            }

            #[inline]
            pub fn idx(self) -> usize {
                self.0 as usize
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// Identifies one relation (table, index, view, …) in the class catalog.
    ///
    /// Equal to the relation's initial on-disk file number.
    RelationId
);
object_id!(
    /// Identifies a row in the type catalog.
    TypeId
);
object_id!(NamespaceId);
object_id!(TablespaceId);
object_id!(DatabaseId);
object_id!(OwnerId);
object_id!(CollationId);
object_id!(ConstraintId);
object_id!(AttrDefId);
object_id!(SubscriptionId);
object_id!(ExtensionId);
object_id!(
    /// Identifies a function or operator referenced from a cooked expression.
    RoutineId
);
object_id!(AccessMethodId);

/// Transaction identifier, as handed out by the external transaction manager.
pub type TransactionId = u32;
/// Multi-transaction identifier.
pub type MultiXactId = u32;
/// Command counter within one transaction.
pub type CommandId = u32;

/// The oldest transaction id that can appear in user data.
pub const FIRST_NORMAL_XACT: TransactionId = 3;
pub const FIRST_MULTI_XACT: MultiXactId = 1;

/// The tablespace every shared (cluster-wide) relation must live in.
pub const GLOBAL_TABLESPACE: TablespaceId = TablespaceId(1664);
/// The default tablespace of a database.
pub const DEFAULT_TABLESPACE: TablespaceId = TablespaceId(1663);

/// The collation a collatable type falls back to. Pinned: the dependency
/// system never records edges against it.
pub const DEFAULT_COLLATION: CollationId = CollationId(100);

/// Attribute (column) number. Positive and dense from 1 for user columns,
/// negative for the fixed system attributes, zero invalid.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AttrNumber(pub i16);

impl AttrNumber {
    pub const INVALID: Self = Self(0);

    pub const ROW_POINTER: Self = Self(-1);
    pub const INSERT_XACT: Self = Self(-2);
    pub const INSERT_CMD: Self = Self(-3);
    pub const DELETE_XACT: Self = Self(-4);
    pub const DELETE_CMD: Self = Self(-5);
    pub const TABLE_IDENT: Self = Self(-6);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    pub fn is_system(self) -> bool {
        self.0 < 0
    }

    /// Index of a user attribute into a dense tuple descriptor.
    ///
    /// Panics on system or invalid attribute numbers.
    #[inline]
    pub fn user_idx(self) -> usize {
        assert!(self.0 > 0, "attribute number {} has no descriptor slot", self.0);
        (self.0 - 1) as usize
    }
}

impl From<i16> for AttrNumber {
    fn from(value: i16) -> Self {
        Self(value)
    }
}

impl fmt::Display for AttrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hard cap on user columns per relation.
pub const MAX_COLUMNS: usize = 1600;
/// Longest permitted identifier, in bytes.
pub const NAME_MAX_BYTES: usize = 63;

/// Block number within one fork of a relation.
pub type BlockNumber = u32;
pub const INVALID_BLOCK: BlockNumber = u32::MAX;

/// Distinguishes per-session temporary storage from ordinary storage.
/// `INVALID` tags shared (non-session) files.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct BackendTag(pub u32);

impl BackendTag {
    pub const INVALID: Self = Self(0);

    #[inline]
    pub fn is_session(self) -> bool {
        self.0 != 0
    }
}

/// Physical identity of a relation's storage, one per relation.
///
/// A relation's id and its initial `rel_number` coincide; they diverge only
/// after a rewriting operation assigns fresh storage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RelFileLocator {
    pub tablespace: TablespaceId,
    pub database: DatabaseId,
    pub rel_number: u32,
}

impl RelFileLocator {
    pub fn new(tablespace: TablespaceId, database: DatabaseId, rel_number: u32) -> Self {
        Self {
            tablespace,
            database,
            rel_number,
        }
    }
}

impl fmt::Display for RelFileLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tablespace, self.database, self.rel_number)
    }
}

/// The named forks a relation's storage decomposes into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ForkNumber {
    Main,
    FreeSpaceMap,
    VisibilityMap,
    Init,
}

impl ForkNumber {
    pub const ALL: [ForkNumber; 4] = [
        ForkNumber::Main,
        ForkNumber::FreeSpaceMap,
        ForkNumber::VisibilityMap,
        ForkNumber::Init,
    ];

    pub fn as_u8(self) -> u8 {
        match self {
            ForkNumber::Main => 0,
            ForkNumber::FreeSpaceMap => 1,
            ForkNumber::VisibilityMap => 2,
            ForkNumber::Init => 3,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ForkNumber::Main,
            1 => ForkNumber::FreeSpaceMap,
            2 => ForkNumber::VisibilityMap,
            3 => ForkNumber::Init,
            _ => return None,
        })
    }
}

/// What kind of schema object a class-catalog row describes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum RelationKind {
    Table,
    Index,
    Sequence,
    ToastStore,
    View,
    MaterializedView,
    CompositeType,
    ForeignTable,
    PartitionedTable,
    PartitionedIndex,
}

impl RelationKind {
    /// Kinds backed by on-disk storage of their own.
    pub fn has_storage(self) -> bool {
        !matches!(
            self,
            RelationKind::View
                | RelationKind::CompositeType
                | RelationKind::ForeignTable
                | RelationKind::PartitionedTable
                | RelationKind::PartitionedIndex
        )
    }

    /// Kinds whose attribute rows include the synthesized system attributes.
    pub fn has_system_attributes(self) -> bool {
        !matches!(self, RelationKind::View | RelationKind::CompositeType)
    }

    /// Kinds that get a composite row type (and a paired array type) in the
    /// type catalog.
    pub fn has_row_type(self) -> bool {
        !matches!(
            self,
            RelationKind::Sequence
                | RelationKind::ToastStore
                | RelationKind::Index
                | RelationKind::PartitionedIndex
        )
    }

    /// Kinds driven through a table access method.
    pub fn has_table_am(self) -> bool {
        matches!(
            self,
            RelationKind::Table
                | RelationKind::Sequence
                | RelationKind::ToastStore
                | RelationKind::MaterializedView
        )
    }

    pub fn is_index(self) -> bool {
        matches!(self, RelationKind::Index | RelationKind::PartitionedIndex)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelationKind::Table => "table",
            RelationKind::Index => "index",
            RelationKind::Sequence => "sequence",
            RelationKind::ToastStore => "toast store",
            RelationKind::View => "view",
            RelationKind::MaterializedView => "materialized view",
            RelationKind::CompositeType => "composite type",
            RelationKind::ForeignTable => "foreign table",
            RelationKind::PartitionedTable => "partitioned table",
            RelationKind::PartitionedIndex => "partitioned index",
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permanence class of a relation's storage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum Persistence {
    Permanent,
    Unlogged,
    Temporary,
}

impl Persistence {
    pub fn wal_logged(self) -> bool {
        matches!(self, Persistence::Permanent)
    }

    /// Unlogged relations carry an init fork that survives crash recovery.
    pub fn has_init_fork(self) -> bool {
        matches!(self, Persistence::Unlogged)
    }
}

/// Physical alignment class of an attribute's values.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum AlignKind {
    Char,
    Short,
    Int,
    Double,
}

impl AlignKind {
    pub fn bytes(self) -> usize {
        match self {
            AlignKind::Char => 1,
            AlignKind::Short => 2,
            AlignKind::Int => 4,
            AlignKind::Double => 8,
        }
    }
}

/// Out-of-line storage strategy for varlena attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum StorageKind {
    Plain,
    External,
    Extended,
    Main,
}

/// Identity-column marker.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum IdentityKind {
    #[default]
    None,
    Always,
    ByDefault,
}

/// Generated-column marker.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum GeneratedKind {
    #[default]
    None,
    Stored,
}

/// Edge kinds of the object-dependency graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum DependencyKind {
    Normal,
    Auto,
    Internal,
    Extension,
    PinnedOwner,
    Acl,
}

/// What happens to a temporary table at transaction commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum OnCommitAction {
    PreserveRows,
    DeleteRows,
    Drop,
}

bitflags::bitflags! {
    /// Privilege bits carried by one ACL grant.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct AclPrivs: u16 {
        const SELECT = 1 << 0;
        const INSERT = 1 << 1;
        const UPDATE = 1 << 2;
        const DELETE = 1 << 3;
        const TRUNCATE = 1 << 4;
        const REFERENCES = 1 << 5;
        const TRIGGER = 1 << 6;
        const USAGE = 1 << 7;
    }
}

/// One grant in an access-control list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AclItem {
    pub grantee: OwnerId,
    pub grantor: OwnerId,
    pub privs: AclPrivs,
}
