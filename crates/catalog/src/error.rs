use cinderdb_primitives::{AttrNumber, RelationId, TypeId};
use enum_as_inner::EnumAsInner;
use thiserror::Error;

/// Stable error classification exposed to the command layer.
///
/// Every [`CatalogError`] maps to exactly one of these codes; the enum is the
/// contract tests and callers match on, independent of message wording.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    DuplicateTable,
    DuplicateObject,
    DuplicateColumn,
    TooManyColumns,
    InvalidTableDefinition,
    InvalidObjectDefinition,
    DatatypeMismatch,
    InvalidColumnReference,
    InvalidParameterValue,
    InsufficientPrivilege,
    FeatureNotSupported,
    ProgramLimitExceeded,
    ObjectInUse,
    UndefinedObject,
    Internal,
}

#[derive(Error, Debug, EnumAsInner)]
pub enum CatalogError {
    #[error("RelationError: {0}")]
    Relation(#[from] RelationError),
    #[error("AttributeError: {0}")]
    Attribute(#[from] AttributeError),
    #[error("ConstraintError: {0}")]
    Constraint(#[from] ConstraintError),
    #[error("ExpressionError: {0}")]
    Expression(#[from] ExpressionError),
    #[error("WalError: {0}")]
    Wal(#[from] WalError),
    #[error("StorageError: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CatalogError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CatalogError::Relation(e) => e.code(),
            CatalogError::Attribute(e) => e.code(),
            CatalogError::Constraint(e) => e.code(),
            CatalogError::Expression(e) => e.code(),
            CatalogError::Wal(_) | CatalogError::Storage(_) | CatalogError::Other(_) => ErrorCode::Internal,
        }
    }

    /// Optional hint shown beneath the primary message.
    pub fn hint(&self) -> Option<String> {
        match self {
            CatalogError::Attribute(AttributeError::NoCollation { .. }) => {
                Some("Use the COLLATE clause to set the collation explicitly.".into())
            }
            CatalogError::Relation(RelationError::TruncateFkReferenced { referencing }) => Some(format!(
                "Truncate table \"{}\" at the same time, or use TRUNCATE ... CASCADE.",
                referencing.join("\", \"")
            )),
            CatalogError::Expression(ExpressionError::TypeMismatch { .. }) => {
                Some("You will need to rewrite or cast the expression.".into())
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RelationError {
    #[error("relation \"{0}\" already exists")]
    DuplicateTable(String),
    #[error("type \"{0}\" already exists")]
    DuplicateType(String),
    #[error("relation with ID {0} does not exist")]
    NotFound(RelationId),
    #[error("relation \"{0}\" is reserved for system catalogs")]
    ReservedName(String),
    #[error("permission denied to create \"{0}\" in a system namespace")]
    SystemNamespace(String),
    #[error("shared relations must be placed in the global tablespace")]
    SharedWrongTablespace,
    #[error("{0} OID value not set when in binary upgrade mode")]
    MissingUpgradeOverride(&'static str),
    #[error("cannot drop \"{0}\" because it is in use by an open handle in this session")]
    InUse(String),
    #[error("ON COMMIT can only be used on temporary tables")]
    OnCommitNotTemporary,
    #[error("cannot truncate a table referenced in a foreign key constraint")]
    TruncateFkReferenced { referencing: Vec<String> },
    #[error("partition \"{new}\" conflicts with existing default partition \"{existing}\"")]
    DefaultPartitionExists { new: String, existing: String },
}

impl RelationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelationError::DuplicateTable(_) => ErrorCode::DuplicateTable,
            RelationError::DuplicateType(_) => ErrorCode::DuplicateObject,
            RelationError::NotFound(_) => ErrorCode::UndefinedObject,
            RelationError::ReservedName(_) | RelationError::SystemNamespace(_) => ErrorCode::InsufficientPrivilege,
            RelationError::SharedWrongTablespace | RelationError::MissingUpgradeOverride(_) => {
                ErrorCode::InvalidParameterValue
            }
            RelationError::InUse(_) => ErrorCode::ObjectInUse,
            RelationError::OnCommitNotTemporary => ErrorCode::InvalidTableDefinition,
            RelationError::TruncateFkReferenced { .. } => ErrorCode::FeatureNotSupported,
            RelationError::DefaultPartitionExists { .. } => ErrorCode::InvalidObjectDefinition,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AttributeError {
    #[error("tables can have at most {max} columns, {count} given")]
    TooManyColumns { count: usize, max: usize },
    #[error("relation must have at least one column")]
    NoColumns,
    #[error("column name \"{0}\" specified more than once")]
    DuplicateColumn(String),
    #[error("column name \"{0}\" conflicts with a system column name")]
    SystemColumnName(String),
    #[error("identifier \"{0}\" exceeds the maximum name length")]
    NameTooLong(String),
    #[error("column \"{column}\" has pseudo-type {type_name}")]
    PseudoTypeColumn { column: String, type_name: String },
    #[error("composite type {0} cannot be made a member of itself")]
    CompositeSelfReference(String),
    #[error("no collation was derived for column \"{column}\" with collatable type {type_name}")]
    NoCollation { column: String, type_name: String },
    #[error("column {attno} of relation {rel} does not exist")]
    NotFound { rel: RelationId, attno: AttrNumber },
    #[error("types nested too deeply while checking column \"{0}\"")]
    RecursionLimit(String),
}

impl AttributeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AttributeError::TooManyColumns { .. } => ErrorCode::TooManyColumns,
            AttributeError::NoColumns => ErrorCode::InvalidTableDefinition,
            AttributeError::DuplicateColumn(_) | AttributeError::SystemColumnName(_) => ErrorCode::DuplicateColumn,
            AttributeError::NameTooLong(_) => ErrorCode::InvalidTableDefinition,
            AttributeError::PseudoTypeColumn { .. }
            | AttributeError::CompositeSelfReference(_)
            | AttributeError::NoCollation { .. }
            | AttributeError::RecursionLimit(_) => ErrorCode::InvalidTableDefinition,
            AttributeError::NotFound { .. } => ErrorCode::UndefinedObject,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("constraint \"{0}\" for relation \"{1}\" already exists")]
    DuplicateName(String, String),
    #[error("constraint \"{0}\" conflicts with an existing constraint that is not a check constraint")]
    NotCheck(String),
    #[error("check constraint \"{0}\" already exists with a different expression")]
    DivergentExpression(String),
    #[error("constraint \"{0}\" conflicts with non-inherited constraint on the relation")]
    ExistingNoInherit(String),
    #[error("constraint \"{0}\" conflicts with inherited constraint on the relation")]
    NewNoInherit(String),
    #[error("constraint \"{0}\" conflicts with NOT VALID constraint on the relation")]
    MergeNotValidated(String),
    #[error("too many inheritance parents for constraint \"{0}\"")]
    InheritCountOverflow(String),
    #[error("cannot add NO INHERIT constraint to partitioned table \"{0}\"")]
    NoInheritOnPartitioned(String),
}

impl ConstraintError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConstraintError::DuplicateName(..)
            | ConstraintError::NotCheck(_)
            | ConstraintError::DivergentExpression(_) => ErrorCode::DuplicateObject,
            ConstraintError::ExistingNoInherit(_)
            | ConstraintError::NewNoInherit(_)
            | ConstraintError::MergeNotValidated(_) => ErrorCode::InvalidObjectDefinition,
            ConstraintError::InheritCountOverflow(_) => ErrorCode::ProgramLimitExceeded,
            ConstraintError::NoInheritOnPartitioned(_) => ErrorCode::InvalidTableDefinition,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("column \"{column}\" is of type {expected} but default expression is of type {found}")]
    TypeMismatch {
        column: String,
        expected: String,
        found: String,
    },
    #[error("argument of CHECK for \"{0}\" must be type boolean")]
    NotBoolean(String),
    #[error("cannot use column references in default expression")]
    VariableInDefault,
    #[error("column \"{0}\" does not exist")]
    UnknownColumn(String),
    #[error("cannot use generated column \"{0}\" in column generation expression")]
    GeneratedRefGenerated(String),
    #[error("cannot use whole-row variable in column generation expression")]
    GeneratedWholeRow,
    #[error("generation expression is not immutable")]
    GeneratedNotImmutable,
    #[error("unknown type {0} in expression")]
    UnknownType(TypeId),
    #[error("expression nested too deeply")]
    DepthExceeded,
    #[error("malformed stored expression: {0}")]
    BadStoredText(String),
}

impl ExpressionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ExpressionError::TypeMismatch { .. } | ExpressionError::NotBoolean(_) => ErrorCode::DatatypeMismatch,
            ExpressionError::VariableInDefault | ExpressionError::UnknownColumn(_) => ErrorCode::InvalidColumnReference,
            ExpressionError::GeneratedRefGenerated(_)
            | ExpressionError::GeneratedWholeRow
            | ExpressionError::GeneratedNotImmutable => ErrorCode::InvalidObjectDefinition,
            ExpressionError::UnknownType(_)
            | ExpressionError::DepthExceeded
            | ExpressionError::BadStoredText(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Error, Debug)]
pub enum WalError {
    #[error("truncated {0} record: {1} bytes")]
    ShortRecord(&'static str, usize),
    #[error("unknown fork number {0} in WAL record")]
    BadFork(u8),
    #[error("unknown smgr record info {0:#x}")]
    BadInfo(u8),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file {file} fork {fork:?} does not exist")]
    NoSuchFork {
        file: cinderdb_primitives::RelFileLocator,
        fork: cinderdb_primitives::ForkNumber,
    },
    #[error("block {block} out of range for {file} fork {fork:?} ({nblocks} blocks)")]
    BlockOutOfRange {
        file: cinderdb_primitives::RelFileLocator,
        fork: cinderdb_primitives::ForkNumber,
        block: u32,
        nblocks: u32,
    },
    #[error("file {0} already exists")]
    AlreadyExists(cinderdb_primitives::RelFileLocator),
    #[error("io error on {0}: {1}")]
    Io(cinderdb_primitives::RelFileLocator, String),
}

pub type Result<T, E = CatalogError> = core::result::Result<T, E>;
