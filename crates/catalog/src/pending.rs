//! Per-transaction log of deferred storage side effects.
//!
//! Physical file creation and unlinking must align with transaction outcome:
//! a file created in an aborted transaction is unlinked at abort, a file
//! belonging to a dropped relation is unlinked only once the drop commits.
//! The log lives in the session and outlasts individual transactions;
//! sub-transaction boundaries reassign nesting levels instead of firing.

use cinderdb_primitives::{BackendTag, RelFileLocator};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::smgr::{SmgrFile, StorageManager};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub file: RelFileLocator,
    pub backend: BackendTag,
    /// True: unlink when the transaction commits (a scheduled drop).
    /// False: unlink when it aborts (an undone create).
    pub at_commit: bool,
    pub nesting: u32,
}

/// Stack of pending file actions, newest last.
#[derive(Default)]
pub struct PendingLog {
    entries: Vec<PendingAction>,
}

impl PendingLog {
    pub fn record_create(&mut self, file: RelFileLocator, backend: BackendTag, nesting: u32) {
        self.entries.push(PendingAction {
            file,
            backend,
            at_commit: false,
            nesting,
        });
    }

    pub fn record_drop(&mut self, file: RelFileLocator, backend: BackendTag, nesting: u32) {
        self.entries.push(PendingAction {
            file,
            backend,
            at_commit: true,
            nesting,
        });
    }

    /// Forgets entries matching `(file, at_commit)`. Used when a relation is
    /// re-homed by a catalog-remap commit separate from the surrounding
    /// transaction.
    pub fn preserve(&mut self, file: RelFileLocator, at_commit: bool) {
        self.entries
            .retain(|e| !(e.file == file && e.at_commit == at_commit));
    }

    /// Files that will be unlinked if the transaction commits. The sync
    /// drain consults this to skip work for already-doomed files.
    pub fn drops_at_commit(&self) -> FxHashSet<RelFileLocator> {
        self.entries
            .iter()
            .filter(|e| e.at_commit)
            .map(|e| e.file)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fires the entries at nesting level `nesting` or deeper for the given
    /// outcome, unlinking their files. Entries at shallower levels survive.
    ///
    /// Unlink failures are logged and swallowed: the entry is already
    /// removed, so there will be no retry.
    pub fn drain(&mut self, is_commit: bool, nesting: u32, smgr: &dyn StorageManager) {
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            if entry.nesting < nesting {
                kept.push(entry);
                continue;
            }
            if entry.at_commit != is_commit {
                continue;
            }
            let file = SmgrFile {
                locator: entry.file,
                backend: entry.backend,
            };
            if let Err(e) = smgr.unlink_all(file) {
                log::warn!("could not unlink {}: {}", entry.file, e);
            }
        }
        self.entries = kept;
    }

    /// At sub-transaction commit, promotes the current level's entries to
    /// the parent so they fire with the parent's outcome.
    pub fn reparent(&mut self, nesting: u32) {
        let parent = nesting.checked_sub(1).expect("nesting level underflow");
        for entry in &mut self.entries {
            if entry.nesting >= nesting {
                entry.nesting = parent;
            }
        }
    }

    /// After PREPARE the queue belongs to the two-phase state file; drop it
    /// without firing anything.
    pub fn post_prepare(&mut self) {
        self.entries.clear();
    }
}

/// Permanent relations created while WAL was skippable, waiting for their
/// at-commit fsync (or page-image replay, if small).
#[derive(Default)]
pub struct PendingSyncs {
    map: FxHashMap<RelFileLocator, (BackendTag, bool)>,
}

impl PendingSyncs {
    pub fn record_sync(&mut self, file: RelFileLocator, backend: BackendTag) {
        self.map.entry(file).or_insert((backend, false));
    }

    /// Marks an existing entry truncated, if any; commit then prefers fsync
    /// over page replay regardless of size.
    pub fn mark_truncated(&mut self, file: RelFileLocator) {
        if let Some((_, truncated)) = self.map.get_mut(&file) {
            *truncated = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Drains all entries for the commit path.
    pub fn take(&mut self) -> Vec<(RelFileLocator, BackendTag, bool)> {
        let mut entries: Vec<_> = self
            .map
            .drain()
            .map(|(file, (backend, truncated))| (file, backend, truncated))
            .collect();
        entries.sort_by_key(|(file, ..)| *file);
        entries
    }
}
