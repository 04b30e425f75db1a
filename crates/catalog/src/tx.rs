//! Catalog handle, session context, and the mutating transaction.
//!
//! Lock discipline follows the datastore convention: the committed state
//! sits behind one `RwLock`, and a mutating transaction holds the arc write
//! guard for its whole duration, so writers serialize. Relation-level locks
//! are tracked per transaction and released when it ends.

use std::collections::BTreeMap;
use std::sync::Arc;

use cinderdb_primitives::{
    AclItem, AttrNumber, BackendTag, CommandId, DatabaseId, ExtensionId, OnCommitAction, OwnerId,
    RelationId, TablespaceId, DEFAULT_TABLESPACE, FIRST_MULTI_XACT, FIRST_NORMAL_XACT,
};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};
use rustc_hash::FxHashMap;

use crate::config::CatalogConfig;
use crate::error::{RelationError, Result};
use crate::oid::OidAllocator;
use crate::pending::{PendingLog, PendingSyncs};
use crate::smgr::StorageManager;
use crate::storage::AccessMethod;
use crate::store::{CommittedState, Invalidation, TxState};
use crate::system_tables::{
    catalog_columns, AttributeRow, ClassRow, ObjectAddress, SystemCatalog, SYSTEM_ATTRIBUTES,
};
use crate::types::{builtin_type_rows, SYSTEM_NAMESPACE};
use crate::wal::Wal;

/// Relation-level lock strength, strongest last.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    AccessShare,
    RowExclusive,
    ShareUpdateExclusive,
    AccessExclusive,
}

/// Object kinds the user-default-ACL registry distinguishes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AclObjectKind {
    Table,
    Sequence,
}

/// Shared handle to one database's catalog.
#[derive(Clone)]
pub struct Catalog {
    committed: Arc<RwLock<CommittedState>>,
    database: DatabaseId,
}

/// The owner used for catalog objects created at bootstrap.
pub const BOOTSTRAP_OWNER: OwnerId = OwnerId(10);

impl Catalog {
    /// Creates the catalog with its self-describing rows in place: a class
    /// row, attribute rows and built-in type rows for every system catalog.
    pub fn bootstrap(database: DatabaseId) -> Self {
        log::trace!("CATALOG: bootstrapping system tables");
        let mut state = CommittedState::default();

        for row in builtin_type_rows() {
            state.types.insert(row.id, row);
        }
        let type_map: FxHashMap<_, _> = state.types.iter().map(|(k, v)| (*k, v.clone())).collect();

        for catalog in SystemCatalog::ALL {
            let id = catalog.relation_id();
            let columns = catalog_columns(catalog);
            state.classes.insert(
                id,
                ClassRow {
                    id,
                    name: catalog.name().to_string(),
                    namespace: SYSTEM_NAMESPACE,
                    row_type: cinderdb_primitives::TypeId::INVALID,
                    of_type: cinderdb_primitives::TypeId::INVALID,
                    owner: BOOTSTRAP_OWNER,
                    access_method: cinderdb_primitives::AccessMethodId(2),
                    file_number: id.0,
                    tablespace: TablespaceId::INVALID,
                    pages: 0,
                    tuples: -1.0,
                    toast_relation: RelationId::INVALID,
                    has_index: true,
                    shared: false,
                    mapped: true,
                    persistence: cinderdb_primitives::Persistence::Permanent,
                    kind: cinderdb_primitives::RelationKind::Table,
                    natts: columns.len() as i16,
                    checks: 0,
                    has_subclass: false,
                    is_partition: false,
                    partition_bound: None,
                    acl: None,
                    options: None,
                    freeze_xact: FIRST_NORMAL_XACT,
                    freeze_multi: FIRST_MULTI_XACT,
                },
            );
            for (i, (name, type_id)) in columns.iter().enumerate() {
                let ty = &type_map[type_id];
                let def = crate::desc::AttributeDefinition::from_type(*name, ty).not_null();
                let attno = AttrNumber(i as i16 + 1);
                state
                    .attributes
                    .insert((id, attno.0), AttributeRow::from_definition(id, attno, &def));
            }
            for proto in &SYSTEM_ATTRIBUTES {
                state
                    .attributes
                    .insert((id, proto.attno.0), AttributeRow::system(id, proto));
            }
        }

        log::trace!("CATALOG: bootstrap done");
        Self {
            committed: Arc::new(RwLock::new(state)),
            database,
        }
    }

    pub fn database(&self) -> DatabaseId {
        self.database
    }

    /// Read access to the committed rows, for inspection between
    /// transactions.
    pub fn shared(&self) -> ArcRwLockReadGuard<RawRwLock, CommittedState> {
        self.committed.read_arc()
    }

    fn begin_mut(&self, bootstrap: bool) -> CatalogTx {
        CatalogTx {
            committed: self.committed.write_arc(),
            tx: TxState::default(),
            cmd: 0,
            nesting: 1,
            locks: BTreeMap::new(),
            invals: Vec::new(),
            bootstrap,
            current_extension: None,
        }
    }
}

/// A mutating catalog transaction. Holds the committed-state write guard for
/// its duration; all row changes stage in `tx` until commit.
pub struct CatalogTx {
    pub(crate) committed: ArcRwLockWriteGuard<RawRwLock, CommittedState>,
    pub(crate) tx: TxState,
    pub(crate) cmd: CommandId,
    pub(crate) nesting: u32,
    pub(crate) locks: BTreeMap<RelationId, LockMode>,
    pub(crate) invals: Vec<Invalidation>,
    pub(crate) bootstrap: bool,
    pub(crate) current_extension: Option<ExtensionId>,
}

impl CatalogTx {
    /// Makes rows written by earlier commands in this transaction visible to
    /// subsequent scans.
    pub fn command_counter_bump(&mut self) {
        self.cmd = self.cmd.checked_add(1).expect("command counter overflow");
    }

    pub fn current_command(&self) -> CommandId {
        self.cmd
    }

    pub fn nesting_level(&self) -> u32 {
        self.nesting
    }

    /// Takes (or upgrades) a relation-level lock. With the committed-state
    /// guard already held this never blocks; the table records intent and
    /// retention, which outlives individual operations.
    pub fn lock_relation(&mut self, id: RelationId, mode: LockMode) {
        let entry = self.locks.entry(id).or_insert(mode);
        if *entry < mode {
            *entry = mode;
        }
    }

    pub fn held_lock(&self, id: RelationId) -> Option<LockMode> {
        self.locks.get(&id).copied()
    }

    /// Queues a rebuild request for the relation's cached descriptor.
    pub fn invalidate_relation(&mut self, id: RelationId) {
        self.invals.push(Invalidation::RelationCache { relation: id });
    }

    /// Queues an unconditional discard of the relation's cache entry.
    pub fn flush_relation(&mut self, id: RelationId) {
        self.invals.push(Invalidation::RelationFlush { relation: id });
    }

    pub(crate) fn note_catalog_change(&mut self, catalog: SystemCatalog, relation: RelationId) {
        self.invals.push(Invalidation::Catalog { catalog, relation });
    }

    /// Invalidations queued so far, oldest first.
    pub fn queued_invalidations(&self) -> &[Invalidation] {
        &self.invals
    }

    pub fn set_current_extension(&mut self, extension: Option<ExtensionId>) {
        self.current_extension = extension;
    }
}

/// Per-process session state: the pending-action log, the on-commit
/// registry, open relation handles, and the collaborator endpoints.
pub struct Session {
    pub catalog: Catalog,
    pub smgr: Arc<dyn StorageManager>,
    pub wal: Arc<dyn Wal>,
    pub am: Arc<dyn AccessMethod>,
    pub config: CatalogConfig,
    pub backend: BackendTag,
    pub(crate) oids: OidAllocator,
    pub(crate) pending: PendingLog,
    pub(crate) pending_syncs: PendingSyncs,
    pub(crate) on_commit: BTreeMap<RelationId, OnCommitAction>,
    pub(crate) open_handles: FxHashMap<RelationId, u32>,
    pub(crate) default_acls: FxHashMap<AclObjectKind, Vec<AclItem>>,
    pub(crate) smgr_hints: FxHashMap<RelationId, u32>,
    pub(crate) bootstrap_mode: bool,
    #[allow(clippy::type_complexity)]
    pub(crate) post_create_hook: Option<Box<dyn Fn(&ObjectAddress) + Send + Sync>>,
}

impl Session {
    pub fn new(
        catalog: Catalog,
        smgr: Arc<dyn StorageManager>,
        wal: Arc<dyn Wal>,
        am: Arc<dyn AccessMethod>,
        config: CatalogConfig,
        backend: BackendTag,
    ) -> Self {
        Self {
            catalog,
            smgr,
            wal,
            am,
            config,
            backend,
            oids: OidAllocator::default(),
            pending: PendingLog::default(),
            pending_syncs: PendingSyncs::default(),
            on_commit: BTreeMap::new(),
            open_handles: FxHashMap::default(),
            default_acls: FxHashMap::default(),
            smgr_hints: FxHashMap::default(),
            bootstrap_mode: false,
            post_create_hook: None,
        }
    }

    pub fn database(&self) -> DatabaseId {
        self.catalog.database()
    }

    /// Tablespace used when a creation request does not name one.
    pub fn default_tablespace(&self) -> TablespaceId {
        DEFAULT_TABLESPACE
    }

    pub fn set_bootstrap_mode(&mut self, on: bool) {
        self.bootstrap_mode = on;
    }

    pub fn set_default_acl(&mut self, kind: AclObjectKind, acl: Vec<AclItem>) {
        self.default_acls.insert(kind, acl);
    }

    pub(crate) fn default_acl(&self, kind: AclObjectKind) -> Option<Vec<AclItem>> {
        self.default_acls.get(&kind).cloned()
    }

    pub fn set_post_create_hook(&mut self, hook: Box<dyn Fn(&ObjectAddress) + Send + Sync>) {
        self.post_create_hook = Some(hook);
    }

    pub fn begin_tx(&self) -> CatalogTx {
        self.catalog.begin_mut(self.bootstrap_mode)
    }

    /// Commits the transaction: runs on-commit actions, settles pending
    /// syncs, merges the staged rows, broadcasts invalidations, then fires
    /// at-commit file drops.
    pub fn commit(&mut self, mut tx: CatalogTx) -> Result<()> {
        debug_assert_eq!(tx.nesting, 1, "sub-transactions must end before commit");
        if let Err(e) = self.run_on_commit_actions(&mut tx) {
            self.abort(tx);
            return Err(e);
        }
        if let Err(e) = crate::storage::do_pending_syncs(self, true) {
            self.abort(tx);
            return Err(e);
        }
        let CatalogTx {
            mut committed,
            tx: state,
            invals,
            ..
        } = tx;
        committed.merge(state, invals);
        drop(committed);
        self.pending.drain(true, 1, &*self.smgr);
        log::debug!("catalog transaction committed");
        Ok(())
    }

    /// Rolls the transaction back: staged rows vanish, files created under
    /// it are unlinked, pending syncs are forgotten.
    pub fn abort(&mut self, tx: CatalogTx) {
        drop(tx);
        self.pending.drain(false, 1, &*self.smgr);
        self.pending_syncs.clear();
        log::debug!("catalog transaction aborted");
    }

    pub fn begin_subtransaction(&mut self, tx: &mut CatalogTx) {
        tx.nesting = tx.nesting.checked_add(1).expect("nesting level overflow");
    }

    pub fn commit_subtransaction(&mut self, tx: &mut CatalogTx) {
        assert!(tx.nesting > 1, "no sub-transaction to commit");
        self.pending.reparent(tx.nesting);
        tx.nesting -= 1;
    }

    /// Aborts the innermost sub-transaction. Storage effects recorded under
    /// it are reverted; staged catalog rows roll back with the top-level
    /// transaction.
    pub fn abort_subtransaction(&mut self, tx: &mut CatalogTx) {
        assert!(tx.nesting > 1, "no sub-transaction to abort");
        self.pending.drain(false, tx.nesting, &*self.smgr);
        tx.nesting -= 1;
    }

    /// Hands the pending queue over to the two-phase-commit state file.
    pub fn post_prepare(&mut self) {
        self.pending.post_prepare();
        self.pending_syncs.clear();
    }

    pub fn register_on_commit(&mut self, id: RelationId, action: OnCommitAction) {
        self.on_commit.insert(id, action);
    }

    pub(crate) fn unregister_on_commit(&mut self, id: RelationId) {
        self.on_commit.remove(&id);
    }

    pub fn on_commit_action(&self, id: RelationId) -> Option<OnCommitAction> {
        self.on_commit.get(&id).copied()
    }

    fn run_on_commit_actions(&mut self, tx: &mut CatalogTx) -> Result<()> {
        let actions: Vec<_> = self.on_commit.iter().map(|(id, a)| (*id, *a)).collect();
        let mut delete_rows = Vec::new();
        for (id, action) in actions {
            match action {
                OnCommitAction::PreserveRows => {}
                OnCommitAction::DeleteRows => {
                    if tx.class_row(id).is_some() {
                        delete_rows.push(id);
                    }
                }
                OnCommitAction::Drop => {
                    if tx.class_row(id).is_some() {
                        self.drop_with_catalog(tx, id)?;
                    }
                    self.on_commit.remove(&id);
                }
            }
        }
        if !delete_rows.is_empty() {
            self.non_transactional_truncate(tx, &delete_rows)?;
        }
        Ok(())
    }

    /// Notes an open handle on the relation, as query execution would.
    pub fn open_relation(&mut self, id: RelationId) {
        *self.open_handles.entry(id).or_insert(0) += 1;
    }

    pub fn close_relation(&mut self, id: RelationId) {
        if let Some(count) = self.open_handles.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.open_handles.remove(&id);
            }
        }
    }

    /// Confirms no open cursor or query of this session still uses the
    /// relation. Other sessions are excluded by the access-exclusive lock.
    pub(crate) fn check_not_in_use(&self, id: RelationId, name: &str) -> Result<()> {
        if self.open_handles.get(&id).copied().unwrap_or(0) > 0 {
            return Err(RelationError::InUse(name.to_string()).into());
        }
        Ok(())
    }

    pub(crate) fn clear_smgr_hints(&mut self, id: RelationId) {
        self.smgr_hints.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smgr::MemSmgr;
    use crate::storage::HeapLikeAm;
    use crate::wal::MemWal;

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
    fn bootstrap_self_describes() {
        let session = session();
        let shared = session.catalog.shared();
        for catalog in SystemCatalog::ALL {
            let id = catalog.relation_id();
            let class = shared.classes.get(&id).expect("class row");
            assert_eq!(class.name, catalog.name());
            let natts = shared
                .attributes
                .range((id, i16::MIN)..=(id, i16::MAX))
                .count();
            assert_eq!(natts, class.natts as usize + 6, "{catalog}");
        }
    }

    #[test]
    fn lock_upgrades_but_never_downgrades() {
        let session = session();
        let mut tx = session.begin_tx();
        let id = RelationId(5000);
        tx.lock_relation(id, LockMode::AccessExclusive);
        tx.lock_relation(id, LockMode::AccessShare);
        assert_eq!(tx.held_lock(id), Some(LockMode::AccessExclusive));
    }

    #[test]
    fn command_counter_is_monotonic() {
        let session = session();
        let mut tx = session.begin_tx();
        assert_eq!(tx.current_command(), 0);
        tx.command_counter_bump();
        assert_eq!(tx.current_command(), 1);
    }
}
