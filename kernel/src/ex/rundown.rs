//! Rundown Protection (EX_RUNDOWN_REF)
//!
//! Rundown protection guards a resource that can be torn down while
//! other threads are still using it. The object manager puts one on
//! every handle table: cross-process handle operations acquire it before
//! touching a table they do not own, and process teardown runs it down
//! before closing the remaining handles.
//!
//! # Semantics
//!
//! - Acquiring a reference prevents rundown from completing
//! - After rundown has been initiated, new acquires fail
//! - The thread running the resource down waits until every existing
//!   reference has been released
//!
//! # States
//!
//! - Bit 0: Rundown active (new acquires will fail)
//! - Bits 1+: Reference count (shifted by 1)

use core::sync::atomic::{AtomicUsize, Ordering};

/// Bit indicating rundown is active
const EX_RUNDOWN_ACTIVE: usize = 0x1;

/// The reference count starts at bit 1
const EX_RUNDOWN_COUNT_SHIFT: u32 = 1;

/// One reference in the count field
const EX_RUNDOWN_COUNT_INC: usize = 1 << EX_RUNDOWN_COUNT_SHIFT;

/// Mask for the count portion
const EX_RUNDOWN_COUNT_MASK: usize = !EX_RUNDOWN_ACTIVE;

/// Rundown reference
pub struct ExRundownRef {
    /// Combined rundown flag and reference count
    count: AtomicUsize,
}

impl ExRundownRef {
    /// Create a new rundown reference (not in rundown state)
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Acquire one rundown reference (ExAcquireRundownProtection)
    ///
    /// Returns false once rundown has started. Every successful acquire
    /// must be paired with `release`.
    pub fn acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        while current & EX_RUNDOWN_ACTIVE == 0 {
            match self.count.compare_exchange_weak(
                current,
                current + EX_RUNDOWN_COUNT_INC,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    /// Release one rundown reference (ExReleaseRundownProtection)
    pub fn release(&self) {
        let old = self.count.fetch_sub(EX_RUNDOWN_COUNT_INC, Ordering::Release);
        debug_assert!(
            old & EX_RUNDOWN_COUNT_MASK != 0,
            "rundown reference released more often than acquired"
        );
    }

    /// Initiate rundown and wait for all references to be released
    ///
    /// After this returns no reference is outstanding and every later
    /// acquire fails, so the protected resource may be destroyed.
    pub fn wait_for_rundown(&self) {
        let old = self.count.fetch_or(EX_RUNDOWN_ACTIVE, Ordering::AcqRel);
        if old & EX_RUNDOWN_COUNT_MASK == 0 {
            return;
        }

        while self.count.load(Ordering::Acquire) & EX_RUNDOWN_COUNT_MASK != 0 {
            core::hint::spin_loop();
        }
    }

    /// Check if rundown is active
    #[inline]
    pub fn is_rundown_active(&self) -> bool {
        self.count.load(Ordering::Relaxed) & EX_RUNDOWN_ACTIVE != 0
    }

    /// Get the current reference count
    #[inline]
    pub fn reference_count(&self) -> usize {
        (self.count.load(Ordering::Relaxed) & EX_RUNDOWN_COUNT_MASK) >> EX_RUNDOWN_COUNT_SHIFT
    }
}

impl Default for ExRundownRef {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one rundown reference
pub struct RundownGuard<'a> {
    rundown: &'a ExRundownRef,
}

impl<'a> RundownGuard<'a> {
    /// Try to acquire a rundown reference
    ///
    /// Returns None if rundown is active.
    pub fn try_new(rundown: &'a ExRundownRef) -> Option<Self> {
        if rundown.acquire() {
            Some(Self { rundown })
        } else {
            None
        }
    }
}

impl Drop for RundownGuard<'_> {
    fn drop(&mut self) {
        self.rundown.release();
    }
}
