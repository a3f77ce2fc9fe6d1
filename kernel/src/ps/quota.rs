//! Process Quota Management
//!
//! Quota tracking for the pool charges the object manager makes on
//! behalf of a process:
//! - Paged pool memory
//! - Non-paged pool memory
//!
//! # Quota Blocks
//!
//! Each process has a quota block that tracks resource usage against limits.
//! Multiple processes can share a quota block (inherited from parent). An
//! object remembers the block it was charged to, so the charge is returned
//! to the same block even after the creating process has gone.
//!
//! # NT Functions
//!
//! - `PsChargeSharedPoolQuota` - Charge paged and non-paged pool together
//! - `PsReturnSharedPoolQuota` - Return both charges

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Default quota limits (generous for development)
pub const DEFAULT_PAGED_POOL_LIMIT: u64 = 64 * 1024 * 1024; // 64 MB
pub const DEFAULT_NONPAGED_POOL_LIMIT: u64 = 32 * 1024 * 1024; // 32 MB

/// Quota usage tracking for a single resource
#[derive(Debug)]
pub struct QuotaUsage {
    /// Current usage
    usage: AtomicU64,
    /// Peak usage (high water mark)
    peak: AtomicU64,
    /// Limit (0 = unlimited)
    limit: AtomicU64,
}

impl QuotaUsage {
    pub const fn new(limit: u64) -> Self {
        Self {
            usage: AtomicU64::new(0),
            peak: AtomicU64::new(0),
            limit: AtomicU64::new(limit),
        }
    }

    /// Try to charge amount against quota
    ///
    /// Returns Ok(new_usage) if successful, Err(current_usage) if the limit
    /// would be exceeded.
    pub fn charge(&self, amount: u64) -> Result<u64, u64> {
        let mut current = self.usage.load(Ordering::Acquire);
        loop {
            let new_usage = current.saturating_add(amount);
            let limit = self.limit.load(Ordering::Relaxed);

            if limit > 0 && new_usage > limit {
                return Err(current);
            }

            match self.usage.compare_exchange_weak(
                current,
                new_usage,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.peak.fetch_max(new_usage, Ordering::Relaxed);
                    return Ok(new_usage);
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Return amount to quota
    pub fn return_quota(&self, amount: u64) {
        let old = self.usage.fetch_sub(amount, Ordering::Release);
        if old < amount {
            log::error!("quota returned {} with only {} charged", amount, old);
        }
    }

    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::Relaxed);
    }
}

impl Default for QuotaUsage {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Process Quota Block (EPROCESS_QUOTA_BLOCK)
#[derive(Debug)]
pub struct QuotaBlock {
    /// Paged pool quota
    pub paged_pool: QuotaUsage,
    /// Non-paged pool quota
    pub non_paged_pool: QuotaUsage,
    /// Times a charge against this block was refused
    exceeded: AtomicU32,
}

impl QuotaBlock {
    /// Quota block with default limits
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PAGED_POOL_LIMIT, DEFAULT_NONPAGED_POOL_LIMIT)
    }

    /// Quota block with custom limits (0 = unlimited)
    pub fn with_limits(paged_limit: u64, non_paged_limit: u64) -> Self {
        Self {
            paged_pool: QuotaUsage::new(paged_limit),
            non_paged_pool: QuotaUsage::new(non_paged_limit),
            exceeded: AtomicU32::new(0),
        }
    }

    /// Quota block without limits, used by the system process
    pub fn unlimited() -> Self {
        Self::with_limits(0, 0)
    }

    /// Charge paged and non-paged pool together (PsChargeSharedPoolQuota)
    ///
    /// Either both charges are taken or neither is.
    pub fn charge_shared_pool_quota(&self, paged: u64, non_paged: u64) -> bool {
        if self.paged_pool.charge(paged).is_err() {
            self.exceeded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if self.non_paged_pool.charge(non_paged).is_err() {
            self.paged_pool.return_quota(paged);
            self.exceeded.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        true
    }

    /// Return a shared pool charge (PsReturnSharedPoolQuota)
    pub fn return_shared_pool_quota(&self, paged: u64, non_paged: u64) {
        self.paged_pool.return_quota(paged);
        self.non_paged_pool.return_quota(non_paged);
    }

    /// Number of refused charges
    pub fn exceeded_count(&self) -> u32 {
        self.exceeded.load(Ordering::Relaxed)
    }
}

impl Default for QuotaBlock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_usage_tracks_peak() {
        let usage = QuotaUsage::new(100);

        assert_eq!(usage.charge(60), Ok(60));
        assert_eq!(usage.charge(50), Err(60));
        usage.return_quota(40);
        assert_eq!(usage.charge(30), Ok(50));
        assert_eq!(usage.peak(), 60);
    }

    #[test]
    fn test_shared_charge_is_all_or_nothing() {
        let block = QuotaBlock::with_limits(1000, 100);

        assert!(block.charge_shared_pool_quota(500, 80));
        assert!(!block.charge_shared_pool_quota(100, 40));
        assert_eq!(block.paged_pool.usage(), 500);
        assert_eq!(block.non_paged_pool.usage(), 80);
        assert_eq!(block.exceeded_count(), 1);

        block.return_shared_pool_quota(500, 80);
        assert_eq!(block.paged_pool.usage(), 0);
        assert_eq!(block.non_paged_pool.usage(), 0);
    }

    #[test]
    fn test_unlimited_block() {
        let block = QuotaBlock::unlimited();
        assert!(block.charge_shared_pool_quota(u64::MAX / 2, u64::MAX / 2));
    }
}
