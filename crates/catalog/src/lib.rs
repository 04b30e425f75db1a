//! The relation lifecycle core of the CinderDB system catalog.
//!
//! A relation (table, index, view, sequence, toast store, partitioned
//! container, …) exists as a set of coherent rows across a family of
//! self-describing catalog tables, coupled to physical storage whose side
//! effects are deferred to transaction outcome. This crate owns:
//!
//! - the pending-action log aligning file creates/drops with commit/abort,
//! - typed construction and insertion of catalog rows,
//! - attribute-type validation and expression cooking for defaults and
//!   check constraints,
//! - the dependency-edge emitters feeding cascade deletion,
//! - the relation builder and destroyer orchestrating all of the above,
//! - WAL-logged truncation and the two smgr record shapes it defines.
//!
//! The SQL parser/planner, transaction manager, buffer manager and index
//! access methods are collaborators behind narrow traits, not residents.

pub mod check;
pub mod config;
pub mod create;
pub mod depend;
pub mod desc;
pub mod drop;
pub mod error;
pub mod expr;
pub mod oid;
pub mod pending;
pub mod smgr;
pub mod state_view;
pub mod storage;
pub mod store;
pub mod system_tables;
pub mod tx;
pub mod types;
pub mod wal;
pub mod writer;

pub use check::{CheckTypeFlags, CookedConstraint, CookedKind, RawCheck, RawDefault};
pub use config::CatalogConfig;
pub use create::{BinaryUpgradeIds, CreatedRelation, CreationRequest};
pub use desc::{AttributeDefinition, RelationDescriptor, TupleDescriptor};
pub use error::{CatalogError, ErrorCode, Result};
pub use expr::{Expr, ExprKind, Value, Volatility};
pub use smgr::{MemSmgr, SmgrFile, StorageManager};
pub use storage::{AccessMethod, HeapLikeAm};
pub use store::Invalidation;
pub use system_tables::{ObjectAddress, ObjectClass, PartitionBound, SystemCatalog};
pub use tx::{AclObjectKind, Catalog, CatalogTx, LockMode, Session};
pub use wal::{MemWal, Wal};
