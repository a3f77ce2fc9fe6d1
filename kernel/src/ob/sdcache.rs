//! Security Descriptor Cache
//!
//! Most objects carry one of a handful of bit-identical descriptors. The
//! cache keeps every distinct descriptor once and hands out counted
//! references to the shared copy.
//!
//! # Algorithm
//!
//! - The descriptor bytes are folded into a 32-bit hash (rotate by 3, XOR
//!   word by word, then byte by byte for the tail)
//! - The hash picks one of `SD_CACHE_BUCKETS` buckets; each bucket keeps
//!   its entries ordered by full hash behind its own reader/writer lock
//! - Logging a descriptor scans the bucket under the shared lock; a hash
//!   match is confirmed byte for byte. On a miss the entry is built with
//!   no lock held, then the bucket is rescanned under the exclusive lock
//!   before inserting, since another thread may have logged the same
//!   descriptor meanwhile
//! - Dereferencing is a compare-exchange loop; only the thread taking the
//!   count to zero takes the exclusive lock and unlinks the entry
//!
//! Entries are immutable once published. Changing an object's security
//! logs the new descriptor and drops the reference on the old one.
//!
//! # NT Functions
//!
//! - `ObLogSecurityDescriptor`
//! - `ObReferenceSecurityDescriptor` (slow path)
//! - `ObDereferenceSecurityDescriptor`

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use spin::{Mutex, RwLock};

use super::status::{ObError, ObResult};
use crate::mm::{pool_tags, PoolAllocator, PoolBlock, PoolType};
use crate::se::SecurityDescriptor;

/// Number of hash buckets
pub const SD_CACHE_BUCKETS: usize = 257;

/// Bookkeeping bytes allocated ahead of each cached descriptor
const CACHE_ENTRY_OVERHEAD: usize = 32;

/// One cached descriptor (SECURITY_DESCRIPTOR_HEADER)
pub struct CachedSecurityDescriptor {
    full_hash: u32,
    ref_count: AtomicU64,
    descriptor: SecurityDescriptor,
    pool_block: Mutex<Option<PoolBlock>>,
}

impl CachedSecurityDescriptor {
    pub fn descriptor(&self) -> &SecurityDescriptor {
        &self.descriptor
    }

    pub fn full_hash(&self) -> u32 {
        self.full_hash
    }

    pub fn reference_count(&self) -> u64 {
        self.ref_count.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CachedSecurityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSecurityDescriptor")
            .field("full_hash", &format_args!("{:#010x}", self.full_hash))
            .field("ref_count", &self.reference_count())
            .field("length", &self.descriptor.len())
            .finish()
    }
}

/// ObpHashBuffer
pub fn hash_buffer(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0;
    let mut words = bytes.chunks_exact(4);
    for word in &mut words {
        let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        hash = hash.rotate_left(3) ^ value;
    }
    for &byte in words.remainder() {
        hash = hash.rotate_left(3) ^ byte as u32;
    }
    hash
}

/// ObpCompareSecurityDescriptors
fn compare_descriptors(a: &SecurityDescriptor, b: &SecurityDescriptor) -> bool {
    a.len() == b.len() && a.as_bytes() == b.as_bytes()
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SdCacheStats {
    pub entries: usize,
    pub references: u64,
    pub largest_bucket: usize,
}

/// Security descriptor cache
pub struct SecurityDescriptorCache {
    buckets: Box<[RwLock<Vec<Arc<CachedSecurityDescriptor>>>]>,
    pool: Arc<dyn PoolAllocator>,
    entry_count: AtomicUsize,
}

impl SecurityDescriptorCache {
    pub fn new(pool: Arc<dyn PoolAllocator>) -> Self {
        Self {
            buckets: (0..SD_CACHE_BUCKETS).map(|_| RwLock::new(Vec::new())).collect(),
            pool,
            entry_count: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, hash: u32) -> &RwLock<Vec<Arc<CachedSecurityDescriptor>>> {
        &self.buckets[hash as usize % SD_CACHE_BUCKETS]
    }

    /// Find a matching entry in an ordered chain
    fn find(
        chain: &[Arc<CachedSecurityDescriptor>],
        hash: u32,
        descriptor: &SecurityDescriptor,
    ) -> Result<Arc<CachedSecurityDescriptor>, usize> {
        let start = chain.partition_point(|entry| entry.full_hash < hash);
        for (offset, entry) in chain[start..].iter().enumerate() {
            if entry.full_hash != hash {
                return Err(start + offset);
            }
            if compare_descriptors(&entry.descriptor, descriptor) {
                return Ok(entry.clone());
            }
        }
        Err(chain.len())
    }

    /// Share `descriptor` through the cache (ObLogSecurityDescriptor)
    ///
    /// The returned entry carries `ref_bias` references for the caller.
    pub fn log_security_descriptor(
        &self,
        descriptor: SecurityDescriptor,
        ref_bias: u32,
    ) -> ObResult<Arc<CachedSecurityDescriptor>> {
        let hash = hash_buffer(descriptor.as_bytes());
        let bucket = self.bucket(hash);

        {
            let chain = bucket.read();
            if let Ok(entry) = Self::find(&chain, hash, &descriptor) {
                entry.ref_count.fetch_add(ref_bias as u64, Ordering::AcqRel);
                return Ok(entry);
            }
        }

        // Build the entry with no lock held
        let pool_block = self
            .pool
            .allocate(
                PoolType::PagedPool,
                CACHE_ENTRY_OVERHEAD + descriptor.len(),
                pool_tags::TAG_SD_CACHE,
            )
            .ok_or(ObError::OutOfResources)?;
        let new_entry = Arc::new(CachedSecurityDescriptor {
            full_hash: hash,
            ref_count: AtomicU64::new(ref_bias as u64),
            descriptor,
            pool_block: Mutex::new(Some(pool_block)),
        });

        let mut chain = bucket.write();
        match Self::find(&chain, hash, &new_entry.descriptor) {
            Ok(existing) => {
                // Lost the race; use the published copy
                existing.ref_count.fetch_add(ref_bias as u64, Ordering::AcqRel);
                drop(chain);
                self.free_entry(&new_entry);
                Ok(existing)
            }
            Err(position) => {
                chain.insert(position, new_entry.clone());
                self.entry_count.fetch_add(1, Ordering::Relaxed);
                log::trace!("sd cache: new entry {:#010x}", hash);
                Ok(new_entry)
            }
        }
    }

    /// Take `count` more references on an entry
    pub fn reference(&self, entry: &Arc<CachedSecurityDescriptor>, count: u32) {
        entry.ref_count.fetch_add(count as u64, Ordering::AcqRel);
    }

    /// Drop `count` references (ObDereferenceSecurityDescriptor)
    pub fn dereference(&self, entry: &Arc<CachedSecurityDescriptor>, count: u32) {
        let count = count as u64;
        let mut current = entry.ref_count.load(Ordering::Acquire);
        loop {
            if current < count {
                log::error!(
                    "sd cache: dereference by {} with only {} references",
                    count,
                    current
                );
                return;
            }
            if current == count {
                break;
            }
            match entry.ref_count.compare_exchange_weak(
                current,
                current - count,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }

        // Possibly the last references: unlink under the exclusive lock
        let mut chain = self.bucket(entry.full_hash).write();
        if entry.ref_count.fetch_sub(count, Ordering::AcqRel) == count {
            if let Some(position) = chain.iter().position(|cached| Arc::ptr_eq(cached, entry)) {
                chain.remove(position);
                self.entry_count.fetch_sub(1, Ordering::Relaxed);
            }
            drop(chain);
            self.free_entry(entry);
            log::trace!("sd cache: freed entry {:#010x}", entry.full_hash);
        }
    }

    fn free_entry(&self, entry: &CachedSecurityDescriptor) {
        if let Some(block) = entry.pool_block.lock().take() {
            self.pool.free(block);
        }
    }

    /// Number of distinct cached descriptors
    pub fn len(&self) -> usize {
        self.entry_count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reference count of the cached copy of `descriptor`, if cached
    pub fn reference_count_of(&self, descriptor: &SecurityDescriptor) -> Option<u64> {
        let hash = hash_buffer(descriptor.as_bytes());
        let chain = self.bucket(hash).read();
        Self::find(&chain, hash, descriptor)
            .ok()
            .map(|entry| entry.reference_count())
    }

    pub fn stats(&self) -> SdCacheStats {
        let mut stats = SdCacheStats::default();
        for bucket in self.buckets.iter() {
            let chain = bucket.read();
            stats.entries += chain.len();
            stats.largest_bucket = stats.largest_bucket.max(chain.len());
            stats.references += chain.iter().map(|entry| entry.reference_count()).sum::<u64>();
        }
        stats
    }
}
