//! Memory Manager (mm)
//!
//! The object manager consumes memory management only as a tagged pool
//! allocator:
//!
//! - **Pool Allocator**: Paged and NonPaged pools, pool tags, usage
//!   accounting
//!
//! # Pool Types
//!
//! - NonPagedPool: Always resident, usable at any IRQL
//! - PagedPool: Can be paged out, only at PASSIVE_LEVEL

pub mod pool;

pub use pool::{
    make_tag, pool_block_size, pool_tags, PoolAllocator, PoolBlock, PoolStats, PoolTag,
    PoolType, SystemPool, TagUsage, POOL_HEADER_SIZE,
};
