//! WAL boundary: record construction, the two storage-manager record shapes
//! this core defines, and an in-memory stream for tests.

use cinderdb_primitives::{BlockNumber, DatabaseId, ForkNumber, RelFileLocator, TablespaceId};
use parking_lot::Mutex;

use crate::error::WalError;

pub type Lsn = u64;

/// Resource-manager id of the storage-manager records.
pub const RM_SMGR_ID: u8 = 6;
pub const XLOG_SMGR_CREATE: u8 = 0x10;
pub const XLOG_SMGR_TRUNCATE: u8 = 0x20;

/// Resource-manager id used for full-page images on the WAL-skip commit path.
pub const RM_XLOG_ID: u8 = 0;
pub const XLOG_FPI: u8 = 0xb0;

pub trait Wal: Send + Sync {
    /// Appends one record and returns its LSN. Insertion is atomic from this
    /// core's point of view.
    fn append(&self, rmid: u8, info: u8, payload: &[u8]) -> Lsn;

    /// Makes everything up to `lsn` durable.
    fn flush(&self, lsn: Lsn);

    fn flushed_to(&self) -> Lsn;

    /// Whether the stream is being archived. When it is not, relation
    /// creation may skip WAL and register an at-commit sync instead.
    fn archiving(&self) -> bool;
}

/// Accumulates registered data chunks for one record insertion.
pub struct WalInsert<'a> {
    wal: &'a dyn Wal,
    buf: Vec<u8>,
}

pub fn begin_insert(wal: &dyn Wal) -> WalInsert<'_> {
    WalInsert { wal, buf: Vec::new() }
}

impl WalInsert<'_> {
    pub fn register_data(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn insert(self, rmid: u8, info: u8) -> Lsn {
        self.wal.append(rmid, info, &self.buf)
    }
}

bitflags::bitflags! {
    /// Which forks participate in a truncation record.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct TruncateFlags: u8 {
        const MAIN = 1 << 0;
        const FSM = 1 << 1;
        const VM = 1 << 2;
    }
}

fn put_locator(buf: &mut Vec<u8>, locator: RelFileLocator) {
    buf.extend_from_slice(&locator.tablespace.0.to_le_bytes());
    buf.extend_from_slice(&locator.database.0.to_le_bytes());
    buf.extend_from_slice(&locator.rel_number.to_le_bytes());
}

fn get_locator(buf: &[u8]) -> RelFileLocator {
    let u32_at = |off: usize| u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
    RelFileLocator {
        tablespace: TablespaceId(u32_at(0)),
        database: DatabaseId(u32_at(4)),
        rel_number: u32_at(8),
    }
}

/// `smgr_create`: { file-id, fork-number }, 13 bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmgrCreateRecord {
    pub locator: RelFileLocator,
    pub fork: ForkNumber,
}

impl SmgrCreateRecord {
    pub const LEN: usize = 13;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        put_locator(&mut buf, self.locator);
        buf.push(self.fork.as_u8());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WalError> {
        if payload.len() < Self::LEN {
            return Err(WalError::ShortRecord("smgr_create", payload.len()));
        }
        Ok(Self {
            locator: get_locator(payload),
            fork: ForkNumber::from_u8(payload[12]).ok_or(WalError::BadFork(payload[12]))?,
        })
    }
}

/// `smgr_truncate`: { new-main-size, file-id, fork flags }, 17 bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SmgrTruncateRecord {
    pub blocks: BlockNumber,
    pub locator: RelFileLocator,
    pub flags: TruncateFlags,
}

impl SmgrTruncateRecord {
    pub const LEN: usize = 17;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.blocks.to_le_bytes());
        put_locator(&mut buf, self.locator);
        buf.push(self.flags.bits());
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, WalError> {
        if payload.len() < Self::LEN {
            return Err(WalError::ShortRecord("smgr_truncate", payload.len()));
        }
        Ok(Self {
            blocks: u32::from_le_bytes(payload[0..4].try_into().unwrap()),
            locator: get_locator(&payload[4..16]),
            flags: TruncateFlags::from_bits_truncate(payload[16]),
        })
    }
}

pub fn log_smgr_create(wal: &dyn Wal, locator: RelFileLocator, fork: ForkNumber) -> Lsn {
    let mut insert = begin_insert(wal);
    insert.register_data(&SmgrCreateRecord { locator, fork }.encode());
    insert.insert(RM_SMGR_ID, XLOG_SMGR_CREATE)
}

pub fn log_smgr_truncate(wal: &dyn Wal, record: &SmgrTruncateRecord) -> Lsn {
    let mut insert = begin_insert(wal);
    insert.register_data(&record.encode());
    insert.insert(RM_SMGR_ID, XLOG_SMGR_TRUNCATE)
}

/// Logs a full image of one block; the cheap commit path for small relations
/// created without WAL.
pub fn log_full_page(
    wal: &dyn Wal,
    locator: RelFileLocator,
    fork: ForkNumber,
    block: BlockNumber,
    page: &[u8],
) -> Lsn {
    let mut insert = begin_insert(wal);
    let mut header = Vec::with_capacity(17);
    put_locator(&mut header, locator);
    header.push(fork.as_u8());
    header.extend_from_slice(&block.to_le_bytes());
    insert.register_data(&header);
    insert.register_data(page);
    insert.insert(RM_XLOG_ID, XLOG_FPI)
}

/// One record of the in-memory stream.
#[derive(Clone, Debug)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub rmid: u8,
    pub info: u8,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct MemWalInner {
    records: Vec<WalRecord>,
    flushed: Lsn,
}

/// Vec-backed WAL stream. LSNs are 1-based record ordinals.
pub struct MemWal {
    inner: Mutex<MemWalInner>,
    archiving: bool,
}

impl MemWal {
    pub fn new(archiving: bool) -> Self {
        Self {
            inner: Mutex::default(),
            archiving,
        }
    }

    pub fn records(&self) -> Vec<WalRecord> {
        self.inner.lock().records.clone()
    }

    pub fn records_by(&self, rmid: u8, info: u8) -> Vec<WalRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.rmid == rmid && r.info == info)
            .cloned()
            .collect()
    }
}

impl Wal for MemWal {
    fn append(&self, rmid: u8, info: u8, payload: &[u8]) -> Lsn {
        let mut inner = self.inner.lock();
        let lsn = inner.records.len() as Lsn + 1;
        inner.records.push(WalRecord {
            lsn,
            rmid,
            info,
            payload: payload.to_vec(),
        });
        lsn
    }

    fn flush(&self, lsn: Lsn) {
        let mut inner = self.inner.lock();
        if lsn > inner.flushed {
            inner.flushed = lsn;
        }
    }

    fn flushed_to(&self) -> Lsn {
        self.inner.lock().flushed
    }

    fn archiving(&self) -> bool {
        self.archiving
    }
}
