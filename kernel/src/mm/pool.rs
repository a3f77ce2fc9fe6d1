//! Kernel Pool Allocator
//!
//! NT uses pool allocators for dynamic kernel memory:
//!
//! - **NonPagedPool**: Cannot be paged out, usable at any IRQL
//! - **PagedPool**: Can be paged to disk, only at PASSIVE_LEVEL
//! - **NonPagedPoolNx**: Non-executable nonpaged pool
//!
//! # Pool Tags
//! Each allocation has a 4-character tag for debugging and leak detection.
//!
//! # Allocator collaborator
//! The object manager never assumes an allocator algorithm. It asks a
//! [`PoolAllocator`] for a tagged block and gets back a [`PoolBlock`]
//! receipt, or `None` when the pool cannot satisfy the request. Rust owns
//! the backing memory of every object body; the pool accounts for it and
//! decides whether the allocation may happen at all.
//!
//! [`SystemPool`] is the in-kernel implementation: per-pool byte limits
//! plus per-tag usage accounting.

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

/// Pool types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PoolType {
    /// Non-paged pool (always resident)
    #[default]
    NonPagedPool = 0,
    /// Paged pool (can be paged out)
    PagedPool = 1,
    /// Non-paged pool, non-executable
    NonPagedPoolNx = 2,
    /// Paged pool, non-executable
    PagedPoolNx = 3,
}

impl PoolType {
    /// Whether allocations of this type come out of paged pool
    pub const fn is_paged(self) -> bool {
        matches!(self, PoolType::PagedPool | PoolType::PagedPoolNx)
    }
}

/// Pool tag (4 characters)
pub type PoolTag = u32;

/// Create a pool tag from 4 ASCII characters
pub const fn make_tag(a: u8, b: u8, c: u8, d: u8) -> PoolTag {
    ((d as u32) << 24) | ((c as u32) << 16) | ((b as u32) << 8) | (a as u32)
}

/// Common pool tags
pub mod pool_tags {
    use super::make_tag;

    pub const TAG_GENERIC: u32 = make_tag(b'G', b'e', b'n', b' ');
    pub const TAG_PROCESS: u32 = make_tag(b'P', b'r', b'o', b'c');
    pub const TAG_SECURITY: u32 = make_tag(b'S', b'e', b'c', b' ');
    /// Object header and body
    pub const TAG_OBJECT: u32 = make_tag(b'O', b'b', b'j', b' ');
    /// Object type objects
    pub const TAG_OBJECT_TYPE: u32 = make_tag(b'O', b'b', b'j', b'T');
    /// Handle count databases
    pub const TAG_HANDLE_DB: u32 = make_tag(b'O', b'b', b'H', b'd');
    /// Security descriptor cache entries
    pub const TAG_SD_CACHE: u32 = make_tag(b'O', b'b', b'S', b'c');
    /// Handle table segments
    pub const TAG_HANDLE_TABLE: u32 = make_tag(b'O', b'b', b'H', b't');
    /// Object name buffers
    pub const TAG_OBJECT_NAME: u32 = make_tag(b'O', b'b', b'N', b'm');
}

/// Every block carries a header and is rounded to this granularity
pub const POOL_HEADER_SIZE: usize = 16;
const POOL_GRANULARITY: usize = 16;

/// Receipt for one pool allocation
///
/// Returned to the allocator that produced it on free.
#[derive(Debug, PartialEq, Eq)]
pub struct PoolBlock {
    pub pool_type: PoolType,
    /// Bytes requested by the caller
    pub size: usize,
    /// Bytes actually taken from the pool (header and rounding included)
    pub charged: usize,
    pub tag: PoolTag,
}

/// Allocator collaborator
pub trait PoolAllocator: Send + Sync {
    /// Allocate `size` bytes (ExAllocatePoolWithTag); `None` on failure
    fn allocate(&self, pool_type: PoolType, size: usize, tag: PoolTag) -> Option<PoolBlock>;

    /// Free a block (ExFreePoolWithTag)
    fn free(&self, block: PoolBlock);
}

/// Bytes taken from the pool for a request of `size` bytes
pub const fn pool_block_size(size: usize) -> usize {
    let total = size + POOL_HEADER_SIZE;
    (total + POOL_GRANULARITY - 1) & !(POOL_GRANULARITY - 1)
}

/// Per-tag usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagUsage {
    pub allocations: usize,
    pub frees: usize,
    pub bytes: usize,
}

/// Pool statistics
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub paged_limit: usize,
    pub paged_in_use: usize,
    pub nonpaged_limit: usize,
    pub nonpaged_in_use: usize,
    pub allocation_count: usize,
    pub free_count: usize,
    pub failed_count: usize,
}

struct PoolArena {
    limit: AtomicUsize,
    in_use: AtomicUsize,
}

impl PoolArena {
    const fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            in_use: AtomicUsize::new(0),
        }
    }

    fn try_take(&self, bytes: usize) -> bool {
        let limit = self.limit.load(Ordering::Relaxed);
        let mut current = self.in_use.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(bytes) {
                Some(next) if next <= limit => next,
                _ => return false,
            };

            match self.in_use.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn give_back(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Default pool limits
pub const DEFAULT_PAGED_POOL_LIMIT: usize = 64 * 1024 * 1024;
pub const DEFAULT_NONPAGED_POOL_LIMIT: usize = 32 * 1024 * 1024;

/// In-kernel pool accounting
pub struct SystemPool {
    paged: PoolArena,
    nonpaged: PoolArena,
    tags: Mutex<BTreeMap<PoolTag, TagUsage>>,
    allocations: AtomicUsize,
    frees: AtomicUsize,
    failures: AtomicUsize,
}

impl SystemPool {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PAGED_POOL_LIMIT, DEFAULT_NONPAGED_POOL_LIMIT)
    }

    pub fn with_limits(paged_limit: usize, nonpaged_limit: usize) -> Self {
        Self {
            paged: PoolArena::new(paged_limit),
            nonpaged: PoolArena::new(nonpaged_limit),
            tags: Mutex::new(BTreeMap::new()),
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    fn arena(&self, pool_type: PoolType) -> &PoolArena {
        if pool_type.is_paged() {
            &self.paged
        } else {
            &self.nonpaged
        }
    }

    /// Change the byte limit of the pool backing `pool_type`
    pub fn set_limit(&self, pool_type: PoolType, limit: usize) {
        self.arena(pool_type).limit.store(limit, Ordering::Relaxed);
    }

    /// Usage recorded against one tag
    pub fn tag_usage(&self, tag: PoolTag) -> TagUsage {
        self.tags.lock().get(&tag).copied().unwrap_or_default()
    }

    /// Bytes in use in the pool backing `pool_type`
    pub fn in_use(&self, pool_type: PoolType) -> usize {
        self.arena(pool_type).in_use.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            paged_limit: self.paged.limit.load(Ordering::Relaxed),
            paged_in_use: self.paged.in_use.load(Ordering::Relaxed),
            nonpaged_limit: self.nonpaged.limit.load(Ordering::Relaxed),
            nonpaged_in_use: self.nonpaged.in_use.load(Ordering::Relaxed),
            allocation_count: self.allocations.load(Ordering::Relaxed),
            free_count: self.frees.load(Ordering::Relaxed),
            failed_count: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for SystemPool {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolAllocator for SystemPool {
    fn allocate(&self, pool_type: PoolType, size: usize, tag: PoolTag) -> Option<PoolBlock> {
        let charged = pool_block_size(size);
        if !self.arena(pool_type).try_take(charged) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "pool: {:?} allocation of {} bytes (tag {:08x}) failed",
                pool_type,
                size,
                tag
            );
            return None;
        }

        {
            let mut tags = self.tags.lock();
            let usage = tags.entry(tag).or_default();
            usage.allocations += 1;
            usage.bytes += charged;
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);

        Some(PoolBlock {
            pool_type,
            size,
            charged,
            tag,
        })
    }

    fn free(&self, block: PoolBlock) {
        self.arena(block.pool_type).give_back(block.charged);

        let mut tags = self.tags.lock();
        match tags.get_mut(&block.tag) {
            Some(usage) => {
                usage.frees += 1;
                usage.bytes = usage.bytes.saturating_sub(block.charged);
            }
            None => log::error!("pool: free of unknown tag {:08x}", block.tag),
        }
        drop(tags);

        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}
