//! Object-identifier allocation with collision avoidance.

use std::sync::atomic::{AtomicU32, Ordering};

use cinderdb_primitives::{
    AttrDefId, BackendTag, ConstraintId, DatabaseId, ForkNumber, Persistence, RelFileLocator,
    RelationId, TablespaceId, TypeId,
};

use crate::smgr::SmgrFile;
use crate::system_tables::FIRST_USER_ID;
use crate::tx::{CatalogTx, Session};

/// Monotonic pool shared by every identifier class. Wraps back to the first
/// user id, never into the reserved catalog range.
pub struct OidAllocator {
    next: AtomicU32,
}

impl Default for OidAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(FIRST_USER_ID + 1),
        }
    }
}

impl OidAllocator {
    pub fn next_raw(&self) -> u32 {
        loop {
            let value = self.next.fetch_add(1, Ordering::Relaxed);
            if value > FIRST_USER_ID {
                return value;
            }
            // Wrapped: skip the reserved range.
            self.next.store(FIRST_USER_ID + 1, Ordering::Relaxed);
        }
    }
}

impl Session {
    /// Picks an id for a new relation, skipping values that collide with an
    /// existing class row or a leftover physical file. The chosen id doubles
    /// as the relation's initial file number.
    pub fn new_relation_file_id(
        &self,
        tx: &CatalogTx,
        tablespace: TablespaceId,
        shared: bool,
        persistence: Persistence,
    ) -> RelationId {
        let database = if shared {
            DatabaseId::INVALID
        } else {
            self.database()
        };
        let backend = match persistence {
            Persistence::Temporary => self.backend,
            Persistence::Permanent | Persistence::Unlogged => BackendTag::INVALID,
        };
        loop {
            let candidate = RelationId(self.oids.next_raw());
            if tx.class_exists(candidate) {
                continue;
            }
            let file = SmgrFile {
                locator: RelFileLocator::new(tablespace, database, candidate.0),
                backend,
            };
            if self.smgr.exists(file, ForkNumber::Main) {
                log::debug!("relation file id {candidate} collides with an existing file, skipping");
                continue;
            }
            return candidate;
        }
    }

    pub fn new_type_id(&self, tx: &CatalogTx) -> TypeId {
        loop {
            let candidate = TypeId(self.oids.next_raw());
            if !tx.type_exists(candidate) {
                return candidate;
            }
        }
    }

    pub fn new_constraint_id(&self, tx: &CatalogTx) -> ConstraintId {
        loop {
            let candidate = ConstraintId(self.oids.next_raw());
            if tx.constraint_row(candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Allocates from the OID-bearing index on the default catalog.
    pub fn new_attrdef_id(&self, tx: &CatalogTx) -> AttrDefId {
        loop {
            let candidate = AttrDefId(self.oids.next_raw());
            let taken = tx.attrdefs_exist(candidate);
            if !taken {
                return candidate;
            }
        }
    }
}
