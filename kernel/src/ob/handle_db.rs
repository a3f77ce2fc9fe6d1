//! Handle Count Database
//!
//! Types that maintain handle counts track how many handles each process
//! holds to an object. The first process is recorded inline in the header
//! (`SINGLE_HANDLE_ENTRY`); a second distinct process moves the counts
//! into a pool-allocated database that grows by `HANDLE_DB_GROWTH` entries
//! whenever every slot is taken. Slots are scanned linearly and a slot
//! whose count dropped to zero is reused.
//!
//! # Key Structures
//!
//! - `OBJECT_HANDLE_COUNT_ENTRY`: [`HandleCountEntry`]
//! - `OBJECT_HANDLE_COUNT_DATABASE`: [`HandleCountDatabase`]
//! - `OBJECT_HEADER_HANDLE_INFO`: [`HandleInfo`]

use alloc::vec::Vec;

use super::status::{ObError, ObResult};
use crate::mm::{pool_tags, PoolAllocator, PoolBlock, PoolType};
use crate::ps::ProcessId;

/// Slots added each time the database is full
pub const HANDLE_DB_GROWTH: usize = 4;

const ENTRY_SIZE: usize = 16;
const DATABASE_HEADER_SIZE: usize = 8;

/// One process's handle count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleCountEntry {
    /// `None` marks a free slot
    pub process: Option<ProcessId>,
    pub count: u32,
}

/// Out-of-line handle counts
#[derive(Debug)]
pub struct HandleCountDatabase {
    entries: Vec<HandleCountEntry>,
    pool_block: PoolBlock,
}

impl HandleCountDatabase {
    fn allocate(
        pool: &dyn PoolAllocator,
        pool_type: PoolType,
        slots: usize,
    ) -> ObResult<PoolBlock> {
        pool.allocate(
            pool_type,
            DATABASE_HEADER_SIZE + slots * ENTRY_SIZE,
            pool_tags::TAG_HANDLE_DB,
        )
        .ok_or(ObError::OutOfResources)
    }

    pub fn entries(&self) -> &[HandleCountEntry] {
        &self.entries
    }

    /// Allocated slots
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// Per-object handle information (OBJECT_HEADER_HANDLE_INFO)
#[derive(Debug)]
pub enum HandleInfo {
    /// One inline entry
    Single(HandleCountEntry),
    Database(HandleCountDatabase),
}

impl Default for HandleInfo {
    fn default() -> Self {
        HandleInfo::Single(HandleCountEntry::default())
    }
}

impl HandleInfo {
    /// Count one more handle for `process` (ObpIncrementHandleDataBase)
    ///
    /// Returns the process's new handle count.
    pub fn increment(
        &mut self,
        process: ProcessId,
        pool: &dyn PoolAllocator,
        pool_type: PoolType,
    ) -> ObResult<u32> {
        if let HandleInfo::Single(entry) = self {
            if entry.process == Some(process) {
                entry.count += 1;
                return Ok(entry.count);
            }
            if entry.count == 0 {
                *entry = HandleCountEntry {
                    process: Some(process),
                    count: 1,
                };
                return Ok(1);
            }

            // Second process: move to a database of two
            let pool_block = HandleCountDatabase::allocate(pool, pool_type, 2)?;
            let first = *entry;
            *self = HandleInfo::Database(HandleCountDatabase {
                entries: alloc::vec![
                    first,
                    HandleCountEntry {
                        process: Some(process),
                        count: 1,
                    },
                ],
                pool_block,
            });
            return Ok(1);
        }

        let HandleInfo::Database(database) = self else {
            return Err(ObError::InvalidParameter);
        };

        let mut free_slot = None;
        for (index, entry) in database.entries.iter_mut().enumerate() {
            if entry.process == Some(process) {
                entry.count += 1;
                return Ok(entry.count);
            }
            if entry.count == 0 && free_slot.is_none() {
                free_slot = Some(index);
            }
        }

        if let Some(index) = free_slot {
            database.entries[index] = HandleCountEntry {
                process: Some(process),
                count: 1,
            };
            return Ok(1);
        }

        // Full: grow by HANDLE_DB_GROWTH slots
        let old_capacity = database.entries.len();
        let new_block =
            HandleCountDatabase::allocate(pool, pool_type, old_capacity + HANDLE_DB_GROWTH)?;
        let old_block = core::mem::replace(&mut database.pool_block, new_block);
        pool.free(old_block);

        database
            .entries
            .resize(old_capacity + HANDLE_DB_GROWTH, HandleCountEntry::default());
        database.entries[old_capacity] = HandleCountEntry {
            process: Some(process),
            count: 1,
        };
        log::trace!(
            "handle database grown to {} entries",
            old_capacity + HANDLE_DB_GROWTH
        );
        Ok(1)
    }

    /// Count one handle less for `process`
    ///
    /// Returns the process's remaining count, or `None` if the process
    /// held no handle. A slot that drops to zero is freed for reuse.
    pub fn decrement(&mut self, process: ProcessId) -> Option<u32> {
        let entry = match self {
            HandleInfo::Single(entry) => {
                if entry.process == Some(process) && entry.count > 0 {
                    Some(entry)
                } else {
                    None
                }
            }
            HandleInfo::Database(database) => database
                .entries
                .iter_mut()
                .find(|entry| entry.process == Some(process) && entry.count > 0),
        }?;

        entry.count -= 1;
        if entry.count == 0 {
            entry.process = None;
        }
        Some(entry.count)
    }

    /// Handles `process` holds
    pub fn count_for(&self, process: ProcessId) -> u32 {
        match self {
            HandleInfo::Single(entry) if entry.process == Some(process) => entry.count,
            HandleInfo::Single(_) => 0,
            HandleInfo::Database(database) => database
                .entries
                .iter()
                .find(|entry| entry.process == Some(process))
                .map_or(0, |entry| entry.count),
        }
    }

    /// Still the inline single entry
    pub fn is_single_entry(&self) -> bool {
        matches!(self, HandleInfo::Single(_))
    }

    /// Free the database storage, if any
    pub fn release(self, pool: &dyn PoolAllocator) {
        if let HandleInfo::Database(database) = self {
            pool.free(database.pool_block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::SystemPool;

    #[test]
    fn test_single_entry_then_database() {
        let pool = SystemPool::new();
        let mut info = HandleInfo::default();

        assert_eq!(info.increment(ProcessId(8), &pool, PoolType::PagedPool), Ok(1));
        assert_eq!(info.increment(ProcessId(8), &pool, PoolType::PagedPool), Ok(2));
        assert!(info.is_single_entry());
        assert_eq!(pool.tag_usage(pool_tags::TAG_HANDLE_DB).allocations, 0);

        assert_eq!(info.increment(ProcessId(12), &pool, PoolType::PagedPool), Ok(1));
        assert!(!info.is_single_entry());
        assert_eq!(info.count_for(ProcessId(8)), 2);
        assert_eq!(info.count_for(ProcessId(12)), 1);
        assert_eq!(pool.tag_usage(pool_tags::TAG_HANDLE_DB).allocations, 1);

        info.release(&pool);
        assert_eq!(pool.tag_usage(pool_tags::TAG_HANDLE_DB).bytes, 0);
    }

    #[test]
    fn test_database_grows_by_four() {
        let pool = SystemPool::new();
        let mut info = HandleInfo::default();

        for pid in 1..=3u32 {
            info.increment(ProcessId(pid * 4), &pool, PoolType::PagedPool)
                .expect("increment");
        }
        match &info {
            HandleInfo::Database(database) => assert_eq!(database.capacity(), 6),
            HandleInfo::Single(_) => panic!("expected a database"),
        }
        info.release(&pool);
    }

    #[test]
    fn test_zeroed_slot_is_reused() {
        let pool = SystemPool::new();
        let mut info = HandleInfo::default();
        info.increment(ProcessId(4), &pool, PoolType::PagedPool).expect("increment");
        info.increment(ProcessId(8), &pool, PoolType::PagedPool).expect("increment");

        assert_eq!(info.decrement(ProcessId(4)), Some(0));
        assert_eq!(info.decrement(ProcessId(4)), None);
        info.increment(ProcessId(16), &pool, PoolType::PagedPool).expect("increment");

        match &info {
            HandleInfo::Database(database) => {
                assert_eq!(database.capacity(), 2);
                assert_eq!(database.entries()[0].process, Some(ProcessId(16)));
            }
            HandleInfo::Single(_) => panic!("expected a database"),
        }
        info.release(&pool);
    }

    #[test]
    fn test_growth_failure_leaves_counts_intact() {
        let pool = SystemPool::with_limits(64, 64);
        let mut info = HandleInfo::default();
        info.increment(ProcessId(4), &pool, PoolType::PagedPool).expect("inline");
        info.increment(ProcessId(8), &pool, PoolType::PagedPool).expect("fits");

        assert_eq!(
            info.increment(ProcessId(12), &pool, PoolType::PagedPool),
            Err(ObError::OutOfResources)
        );
        assert_eq!(info.count_for(ProcessId(4)), 1);
        assert_eq!(info.count_for(ProcessId(12)), 0);
        info.release(&pool);
    }
}
