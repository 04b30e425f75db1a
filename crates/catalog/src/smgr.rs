//! The storage-manager boundary: page-level file access for relation forks.
//!
//! The catalog core only schedules and orders storage side effects; the
//! manager implementation owns durability of the bytes. [`MemSmgr`] keeps
//! everything in maps and records an event trail the tests assert against.

use cinderdb_primitives::{BackendTag, BlockNumber, ForkNumber, RelFileLocator};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::StorageError;

pub const BLOCK_SIZE: usize = 8192;

pub type Page = Vec<u8>;

/// A relation's physical file plus the backend tag that scopes it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SmgrFile {
    pub locator: RelFileLocator,
    pub backend: BackendTag,
}

impl SmgrFile {
    pub fn shared(locator: RelFileLocator) -> Self {
        Self {
            locator,
            backend: BackendTag::INVALID,
        }
    }
}

pub trait StorageManager: Send + Sync {
    /// Creates a fork. With `redo` set, an already existing fork is not an
    /// error (replay may re-create files).
    fn create(&self, file: SmgrFile, fork: ForkNumber, redo: bool) -> Result<(), StorageError>;

    fn exists(&self, file: SmgrFile, fork: ForkNumber) -> bool;

    fn nblocks(&self, file: SmgrFile, fork: ForkNumber) -> Result<BlockNumber, StorageError>;

    /// Appends one page at `block`, which must equal the current size.
    fn extend(&self, file: SmgrFile, fork: ForkNumber, block: BlockNumber, page: &[u8])
        -> Result<(), StorageError>;

    fn read_block(&self, file: SmgrFile, fork: ForkNumber, block: BlockNumber) -> Result<Page, StorageError>;

    fn write_block(
        &self,
        file: SmgrFile,
        fork: ForkNumber,
        block: BlockNumber,
        page: &[u8],
    ) -> Result<(), StorageError>;

    /// Cuts each listed fork down to the given number of blocks.
    fn truncate(&self, file: SmgrFile, plan: &[(ForkNumber, BlockNumber)]) -> Result<(), StorageError>;

    /// Removes every fork of the file.
    fn unlink_all(&self, file: SmgrFile) -> Result<(), StorageError>;

    fn sync_all(&self, files: &[SmgrFile]) -> Result<(), StorageError>;

    /// Re-derives upper-level free-space information after blocks past
    /// `first_removed` went away.
    fn vacuum_fsm_range(&self, _file: SmgrFile, _first_removed: BlockNumber) {}
}

/// Total size of a file across all existing forks, in KiB.
pub fn total_size_kib(smgr: &dyn StorageManager, file: SmgrFile) -> u64 {
    let mut blocks: u64 = 0;
    for fork in ForkNumber::ALL {
        if smgr.exists(file, fork) {
            blocks += smgr.nblocks(file, fork).unwrap_or(0) as u64;
        }
    }
    blocks * (BLOCK_SIZE as u64) / 1024
}

/// What the in-memory manager was asked to do, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmgrEvent {
    Create(SmgrFile, ForkNumber),
    Truncate(SmgrFile, ForkNumber, BlockNumber),
    Unlink(SmgrFile),
    Sync(SmgrFile),
    FsmVacuum(SmgrFile, BlockNumber),
}

#[derive(Default)]
struct MemSmgrInner {
    files: FxHashMap<SmgrFile, FxHashMap<u8, Vec<Page>>>,
    events: Vec<SmgrEvent>,
}

/// Map-backed storage manager.
#[derive(Default)]
pub struct MemSmgr {
    inner: Mutex<MemSmgrInner>,
}

impl MemSmgr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SmgrEvent> {
        self.inner.lock().events.clone()
    }

    pub fn file_count(&self) -> usize {
        self.inner.lock().files.len()
    }
}

impl StorageManager for MemSmgr {
    fn create(&self, file: SmgrFile, fork: ForkNumber, redo: bool) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let forks = inner.files.entry(file).or_default();
        if forks.contains_key(&fork.as_u8()) {
            if !redo {
                return Err(StorageError::AlreadyExists(file.locator));
            }
        } else {
            forks.insert(fork.as_u8(), Vec::new());
        }
        inner.events.push(SmgrEvent::Create(file, fork));
        Ok(())
    }

    fn exists(&self, file: SmgrFile, fork: ForkNumber) -> bool {
        self.inner
            .lock()
            .files
            .get(&file)
            .is_some_and(|forks| forks.contains_key(&fork.as_u8()))
    }

    fn nblocks(&self, file: SmgrFile, fork: ForkNumber) -> Result<BlockNumber, StorageError> {
        self.inner
            .lock()
            .files
            .get(&file)
            .and_then(|forks| forks.get(&fork.as_u8()))
            .map(|pages| pages.len() as BlockNumber)
            .ok_or(StorageError::NoSuchFork {
                file: file.locator,
                fork,
            })
    }

    fn extend(
        &self,
        file: SmgrFile,
        fork: ForkNumber,
        block: BlockNumber,
        page: &[u8],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let pages = inner
            .files
            .get_mut(&file)
            .and_then(|forks| forks.get_mut(&fork.as_u8()))
            .ok_or(StorageError::NoSuchFork {
                file: file.locator,
                fork,
            })?;
        if block as usize != pages.len() {
            return Err(StorageError::BlockOutOfRange {
                file: file.locator,
                fork,
                block,
                nblocks: pages.len() as u32,
            });
        }
        pages.push(page.to_vec());
        Ok(())
    }

    fn read_block(&self, file: SmgrFile, fork: ForkNumber, block: BlockNumber) -> Result<Page, StorageError> {
        let inner = self.inner.lock();
        let pages = inner
            .files
            .get(&file)
            .and_then(|forks| forks.get(&fork.as_u8()))
            .ok_or(StorageError::NoSuchFork {
                file: file.locator,
                fork,
            })?;
        pages
            .get(block as usize)
            .cloned()
            .ok_or(StorageError::BlockOutOfRange {
                file: file.locator,
                fork,
                block,
                nblocks: pages.len() as u32,
            })
    }

    fn write_block(
        &self,
        file: SmgrFile,
        fork: ForkNumber,
        block: BlockNumber,
        page: &[u8],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        let pages = inner
            .files
            .get_mut(&file)
            .and_then(|forks| forks.get_mut(&fork.as_u8()))
            .ok_or(StorageError::NoSuchFork {
                file: file.locator,
                fork,
            })?;
        let nblocks = pages.len() as u32;
        let slot = pages
            .get_mut(block as usize)
            .ok_or(StorageError::BlockOutOfRange {
                file: file.locator,
                fork,
                block,
                nblocks,
            })?;
        *slot = page.to_vec();
        Ok(())
    }

    fn truncate(&self, file: SmgrFile, plan: &[(ForkNumber, BlockNumber)]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        for (fork, new_blocks) in plan {
            let Some(pages) = inner
                .files
                .get_mut(&file)
                .and_then(|forks| forks.get_mut(&fork.as_u8()))
            else {
                return Err(StorageError::NoSuchFork {
                    file: file.locator,
                    fork: *fork,
                });
            };
            pages.truncate(*new_blocks as usize);
            inner.events.push(SmgrEvent::Truncate(file, *fork, *new_blocks));
        }
        Ok(())
    }

    fn unlink_all(&self, file: SmgrFile) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.files.remove(&file).is_none() {
            return Err(StorageError::NoSuchFork {
                file: file.locator,
                fork: ForkNumber::Main,
            });
        }
        inner.events.push(SmgrEvent::Unlink(file));
        Ok(())
    }

    fn sync_all(&self, files: &[SmgrFile]) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        for file in files {
            inner.events.push(SmgrEvent::Sync(*file));
        }
        Ok(())
    }

    fn vacuum_fsm_range(&self, file: SmgrFile, first_removed: BlockNumber) {
        self.inner.lock().events.push(SmgrEvent::FsmVacuum(file, first_removed));
    }
}
