//! Physical storage side of the relation lifecycle: file creation, scheduled
//! drops, WAL-logged truncation, the at-commit sync path for relations
//! created without WAL, and replay of the two smgr record shapes.

use std::sync::Arc;

use cinderdb_primitives::{
    BackendTag, BlockNumber, DatabaseId, ForkNumber, MultiXactId, Persistence, RelFileLocator,
    RelationId, RelationKind, TablespaceId, TransactionId, FIRST_MULTI_XACT, FIRST_NORMAL_XACT,
};

use crate::desc::RelationDescriptor;
use crate::error::{RelationError, Result, WalError};
use crate::smgr::{total_size_kib, SmgrFile, StorageManager};
use crate::system_tables::ClassRow;
use crate::tx::{CatalogTx, LockMode, Session};
use crate::wal::{
    log_full_page, log_smgr_create, log_smgr_truncate, SmgrCreateRecord, SmgrTruncateRecord,
    TruncateFlags, Wal, WalRecord, XLOG_SMGR_CREATE, XLOG_SMGR_TRUNCATE,
};

/// Heap-block capacity of one free-space-map page.
pub const FSM_SLOTS_PER_PAGE: u32 = 4096;
/// Heap-block capacity of one visibility-map page.
pub const VM_BITS_PER_PAGE: u32 = 32768;

fn pages_for(heap_blocks: BlockNumber, per_page: u32) -> BlockNumber {
    heap_blocks.div_ceil(per_page)
}

/// New size for the free-space fork after the main fork shrinks to
/// `new_main_blocks`, or `None` when the fork is absent or needs no cut.
pub fn fsm_prepare_truncate(
    smgr: &dyn StorageManager,
    file: SmgrFile,
    new_main_blocks: BlockNumber,
) -> Option<BlockNumber> {
    if !smgr.exists(file, ForkNumber::FreeSpaceMap) {
        return None;
    }
    let current = smgr.nblocks(file, ForkNumber::FreeSpaceMap).ok()?;
    let wanted = pages_for(new_main_blocks, FSM_SLOTS_PER_PAGE);
    (wanted < current).then_some(wanted)
}

/// Visibility-map counterpart of [`fsm_prepare_truncate`].
pub fn vm_prepare_truncate(
    smgr: &dyn StorageManager,
    file: SmgrFile,
    new_main_blocks: BlockNumber,
) -> Option<BlockNumber> {
    if !smgr.exists(file, ForkNumber::VisibilityMap) {
        return None;
    }
    let current = smgr.nblocks(file, ForkNumber::VisibilityMap).ok()?;
    let wanted = pages_for(new_main_blocks, VM_BITS_PER_PAGE);
    (wanted < current).then_some(wanted)
}

/// Per-relkind storage initialization, provided by the access-method layer.
pub trait AccessMethod: Send + Sync {
    /// Creates the relation's initial storage and returns the freeze
    /// horizon to record in its class row.
    fn set_new_file(
        &self,
        session: &mut Session,
        nesting: u32,
        rel: &RelationDescriptor,
    ) -> Result<(TransactionId, MultiXactId)>;

    /// Empties the relation's storage in place. Not rollback-safe; used
    /// only by the on-commit truncate path.
    fn nontransactional_truncate(&self, session: &mut Session, class: &ClassRow) -> Result<()>;
}

/// The default table access method: plain heap-style storage.
pub struct HeapLikeAm;

impl AccessMethod for HeapLikeAm {
    fn set_new_file(
        &self,
        session: &mut Session,
        nesting: u32,
        rel: &RelationDescriptor,
    ) -> Result<(TransactionId, MultiXactId)> {
        session.create_storage(nesting, rel.file, rel.backend, rel.persistence)?;
        if rel.persistence.has_init_fork() {
            session.create_init_fork(rel.file, rel.backend)?;
        }
        Ok((FIRST_NORMAL_XACT, FIRST_MULTI_XACT))
    }

    fn nontransactional_truncate(&self, session: &mut Session, class: &ClassRow) -> Result<()> {
        let file = session.relation_file(class);
        truncate_all_forks(&*session.smgr, file)?;
        Ok(())
    }
}

/// Zeroes every fork except init (which must survive crash-recovery resets).
pub(crate) fn truncate_all_forks(smgr: &dyn StorageManager, file: SmgrFile) -> Result<()> {
    let plan: Vec<(ForkNumber, BlockNumber)> = ForkNumber::ALL
        .into_iter()
        .filter(|fork| *fork != ForkNumber::Init)
        .filter(|fork| smgr.exists(file, *fork))
        .map(|fork| (fork, 0))
        .collect();
    if !plan.is_empty() {
        smgr.truncate(file, &plan)?;
    }
    Ok(())
}

impl Session {
    /// The physical file of a cataloged relation.
    pub fn relation_file(&self, class: &ClassRow) -> SmgrFile {
        let tablespace = if class.tablespace.is_valid() {
            class.tablespace
        } else {
            self.default_tablespace()
        };
        let database = if class.shared {
            DatabaseId::INVALID
        } else {
            self.database()
        };
        let backend = match class.persistence {
            Persistence::Temporary => self.backend,
            _ => BackendTag::INVALID,
        };
        SmgrFile {
            locator: RelFileLocator::new(tablespace, database, class.file_number),
            backend,
        }
    }

    /// Creates the main fork, WAL-logs the creation for permanent relations,
    /// and registers the undo entry with the pending-action log. When the
    /// WAL stream is not being archived, the relation is instead queued for
    /// an at-commit sync.
    pub(crate) fn create_storage(
        &mut self,
        nesting: u32,
        locator: RelFileLocator,
        backend: BackendTag,
        persistence: Persistence,
    ) -> Result<()> {
        let file = SmgrFile { locator, backend };
        self.smgr.create(file, ForkNumber::Main, false)?;
        if persistence.wal_logged() {
            if self.wal.archiving() {
                log_smgr_create(&*self.wal, locator, ForkNumber::Main);
            } else {
                self.pending_syncs.record_sync(locator, backend);
            }
        }
        self.pending.record_create(locator, backend, nesting);
        Ok(())
    }

    /// Creates and immediately WAL-logs the init fork of an unlogged
    /// relation; the init fork is what crash recovery resets the relation
    /// from, so it is always durable.
    pub(crate) fn create_init_fork(&mut self, locator: RelFileLocator, backend: BackendTag) -> Result<()> {
        let file = SmgrFile { locator, backend };
        self.smgr.create(file, ForkNumber::Init, false)?;
        let lsn = log_smgr_create(&*self.wal, locator, ForkNumber::Init);
        self.wal.flush(lsn);
        Ok(())
    }

    /// Schedules the relation's storage for unlink at commit.
    pub(crate) fn schedule_storage_drop(&mut self, nesting: u32, locator: RelFileLocator, backend: BackendTag) {
        self.pending.record_drop(locator, backend, nesting);
    }

    /// WAL-logged resize of a relation to `n_blocks` main-fork blocks,
    /// carrying the free-space and visibility forks along.
    pub fn truncate(&mut self, tx: &mut CatalogTx, rel: RelationId, n_blocks: BlockNumber) -> Result<()> {
        let class = tx.class_row(rel).ok_or(RelationError::NotFound(rel))?;
        let file = self.relation_file(&class);

        // Forget cached insertion targets; blocks past the cut no longer
        // exist.
        self.clear_smgr_hints(rel);

        let mut plan = vec![(ForkNumber::Main, n_blocks)];
        let mut flags = TruncateFlags::MAIN;
        if let Some(fsm_blocks) = fsm_prepare_truncate(&*self.smgr, file, n_blocks) {
            plan.push((ForkNumber::FreeSpaceMap, fsm_blocks));
            flags |= TruncateFlags::FSM;
        }
        if let Some(vm_blocks) = vm_prepare_truncate(&*self.smgr, file, n_blocks) {
            plan.push((ForkNumber::VisibilityMap, vm_blocks));
            flags |= TruncateFlags::VM;
        }

        self.pending_syncs.mark_truncated(file.locator);

        if class.persistence.wal_logged() {
            let lsn = log_smgr_truncate(
                &*self.wal,
                &SmgrTruncateRecord {
                    blocks: n_blocks,
                    locator: file.locator,
                    flags,
                },
            );
            // If a secondary fork shrinks too, the record must be durable
            // before any physical truncation: a crash in between would
            // otherwise leave FSM/VM entries for pages that no longer exist.
            if flags.intersects(TruncateFlags::FSM | TruncateFlags::VM) {
                self.wal.flush(lsn);
            }
        }

        self.smgr.truncate(file, &plan)?;
        self.smgr.vacuum_fsm_range(file, n_blocks);
        Ok(())
    }

    /// The on-commit truncate path for temporary tables. Not rollback-safe:
    /// storage is emptied in place.
    pub fn non_transactional_truncate(&mut self, tx: &mut CatalogTx, ids: &[RelationId]) -> Result<()> {
        for id in ids {
            tx.lock_relation(*id, LockMode::AccessExclusive);
        }
        let referencing = tx.find_referencing_fks(ids);
        if !referencing.is_empty() {
            let names = referencing
                .iter()
                .filter_map(|id| tx.class_row(*id).map(|c| c.name))
                .collect();
            return Err(RelationError::TruncateFkReferenced { referencing: names }.into());
        }
        let am = Arc::clone(&self.am);
        for id in ids {
            let class = tx.class_row(*id).ok_or(RelationError::NotFound(*id))?;
            if class.kind == RelationKind::PartitionedTable {
                // No storage of its own; the caller expands the partition
                // tree before asking.
                continue;
            }
            log::trace!("TRUNCATE (non-transactional): {}", class.name);
            am.nontransactional_truncate(self, &class)?;
            self.truncate_dependent_storage(tx, *id)?;
            if class.toast_relation.is_valid() {
                if let Some(toast) = tx.class_row(class.toast_relation) {
                    am.nontransactional_truncate(self, &toast)?;
                    self.truncate_dependent_storage(tx, toast.id)?;
                }
            }
        }
        Ok(())
    }

    /// Empties the storage of the relation's indexes.
    fn truncate_dependent_storage(&mut self, tx: &CatalogTx, rel: RelationId) -> Result<()> {
        for dep in tx.relation_dependents(rel) {
            if let Some(class) = tx.class_row(dep) {
                if class.kind.is_index() && class.kind.has_storage() {
                    let file = self.relation_file(&class);
                    truncate_all_forks(&*self.smgr, file)?;
                }
            }
        }
        Ok(())
    }
}

/// Settles the pending-sync queue at top-level commit: relations that are
/// still small and untouched by truncation get their pages WAL-logged;
/// everything else is fsynced. Abort just discards the queue, as do
/// parallel workers (the leader owns the syncs).
pub(crate) fn do_pending_syncs(session: &mut Session, is_commit: bool) -> Result<()> {
    do_pending_syncs_inner(session, is_commit, false)
}

pub fn drain_pending_syncs(session: &mut Session, is_commit: bool, is_parallel_worker: bool) -> Result<()> {
    do_pending_syncs_inner(session, is_commit, is_parallel_worker)
}

fn do_pending_syncs_inner(session: &mut Session, is_commit: bool, is_parallel_worker: bool) -> Result<()> {
    if session.pending_syncs.is_empty() {
        return Ok(());
    }
    let entries = session.pending_syncs.take();
    if !is_commit || is_parallel_worker {
        return Ok(());
    }
    let doomed = session.pending.drops_at_commit();
    let threshold = session.config.wal_skip_threshold_kib;
    let mut to_sync = Vec::new();
    for (locator, backend, truncated) in entries {
        if doomed.contains(&locator) {
            continue;
        }
        let file = SmgrFile { locator, backend };
        if truncated || total_size_kib(&*session.smgr, file) > threshold {
            to_sync.push(file);
            continue;
        }
        // Small and never truncated: logging every page is cheaper than an
        // fsync at commit.
        let mut last_lsn = 0;
        for fork in ForkNumber::ALL {
            if !session.smgr.exists(file, fork) {
                continue;
            }
            let nblocks = session.smgr.nblocks(file, fork)?;
            for block in 0..nblocks {
                let page = session.smgr.read_block(file, fork, block)?;
                last_lsn = log_full_page(&*session.wal, locator, fork, block, &page);
            }
        }
        if last_lsn > 0 {
            session.wal.flush(last_lsn);
        }
    }
    if !to_sync.is_empty() {
        log::debug!("queueing fsync for {} relation(s) at commit", to_sync.len());
        session.smgr.sync_all(&to_sync)?;
    }
    Ok(())
}

/// Replays one storage-manager WAL record on a fresh instance.
pub fn smgr_redo(record: &WalRecord, smgr: &dyn StorageManager, wal: &dyn Wal) -> Result<()> {
    match record.info {
        XLOG_SMGR_CREATE => {
            let rec = SmgrCreateRecord::decode(&record.payload)?;
            smgr.create(SmgrFile::shared(rec.locator), rec.fork, true)?;
        }
        XLOG_SMGR_TRUNCATE => {
            let rec = SmgrTruncateRecord::decode(&record.payload)?;
            let file = SmgrFile::shared(rec.locator);
            // The main fork may be missing if creation was never replayed
            // (e.g. the create record predates the backup).
            if !smgr.exists(file, ForkNumber::Main) {
                smgr.create(file, ForkNumber::Main, true)?;
            }
            // Everything up to this record must be durable before pages
            // vanish.
            wal.flush(record.lsn);
            let mut plan = Vec::new();
            if rec.flags.contains(TruncateFlags::MAIN) {
                plan.push((ForkNumber::Main, rec.blocks));
            }
            if rec.flags.contains(TruncateFlags::FSM) && smgr.exists(file, ForkNumber::FreeSpaceMap) {
                plan.push((ForkNumber::FreeSpaceMap, pages_for(rec.blocks, FSM_SLOTS_PER_PAGE)));
            }
            if rec.flags.contains(TruncateFlags::VM) && smgr.exists(file, ForkNumber::VisibilityMap) {
                plan.push((ForkNumber::VisibilityMap, pages_for(rec.blocks, VM_BITS_PER_PAGE)));
            }
            smgr.truncate(file, &plan)?;
            smgr.vacuum_fsm_range(file, rec.blocks);
        }
        other => return Err(WalError::BadInfo(other).into()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smgr::{MemSmgr, BLOCK_SIZE};
    use crate::wal::MemWal;
    use cinderdb_primitives::TablespaceId;

    #[test]
    fn fork_geometry() {
        assert_eq!(pages_for(0, FSM_SLOTS_PER_PAGE), 0);
        assert_eq!(pages_for(1, FSM_SLOTS_PER_PAGE), 1);
        assert_eq!(pages_for(4096, FSM_SLOTS_PER_PAGE), 1);
        assert_eq!(pages_for(4097, FSM_SLOTS_PER_PAGE), 2);
    }

    #[test]
    fn redo_create_and_truncate() {
        let locator = RelFileLocator::new(TablespaceId(1663), DatabaseId(5), 20001);
        let file = SmgrFile::shared(locator);

        // Source side: create, fill, truncate.
        let smgr = MemSmgr::new();
        let wal = MemWal::new(true);
        log_smgr_create(&wal, locator, ForkNumber::Main);
        smgr.create(file, ForkNumber::Main, false).unwrap();
        log_smgr_truncate(
            &wal,
            &SmgrTruncateRecord {
                blocks: 2,
                locator,
                flags: TruncateFlags::MAIN,
            },
        );

        // Replay on a fresh instance.
        let standby = MemSmgr::new();
        let standby_wal = MemWal::new(true);
        for record in wal.records() {
            smgr_redo(&record, &standby, &standby_wal).unwrap();
        }
        assert!(standby.exists(file, ForkNumber::Main));
        assert_eq!(standby.nblocks(file, ForkNumber::Main).unwrap(), 0);
    }

    #[test]
    fn redo_truncate_recreates_missing_main_fork() {
        let locator = RelFileLocator::new(TablespaceId(1663), DatabaseId(5), 20002);
        let wal = MemWal::new(true);
        let lsn = log_smgr_truncate(
            &wal,
            &SmgrTruncateRecord {
                blocks: 0,
                locator,
                flags: TruncateFlags::MAIN,
            },
        );
        let standby = MemSmgr::new();
        let record = wal.records().pop().unwrap();
        smgr_redo(&record, &standby, &wal).unwrap();
        assert!(standby.exists(SmgrFile::shared(locator), ForkNumber::Main));
        assert_eq!(wal.flushed_to(), lsn);
    }

    #[test]
    fn fsm_truncate_point_only_shrinks() {
        let locator = RelFileLocator::new(TablespaceId(1663), DatabaseId(5), 20003);
        let file = SmgrFile::shared(locator);
        let smgr = MemSmgr::new();
        smgr.create(file, ForkNumber::Main, false).unwrap();
        assert_eq!(fsm_prepare_truncate(&smgr, file, 0), None);

        smgr.create(file, ForkNumber::FreeSpaceMap, false).unwrap();
        for block in 0..3 {
            smgr.extend(file, ForkNumber::FreeSpaceMap, block, &[0u8; BLOCK_SIZE]).unwrap();
        }
        // Shrinking the heap to one block leaves a single FSM page.
        assert_eq!(fsm_prepare_truncate(&smgr, file, 1), Some(1));
        // Already small enough: nothing to do.
        assert_eq!(fsm_prepare_truncate(&smgr, file, 4096 * 3), None);
    }
}
