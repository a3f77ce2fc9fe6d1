//! Push Lock (EX_PUSH_LOCK)
//!
//! Push locks are pointer-sized reader/writer locks. The object manager
//! uses them where a lock has to be held across calls rather than for
//! the lifetime of a guard:
//!
//! - the per-type object lock shards (`ObpLockObject`)
//! - directory locks held inside a namespace lookup context
//!
//! Waiters spin; every critical section guarded by a push lock here is
//! short and never calls out to a type callback.
//!
//! # States
//!
//! - Bit 0: Exclusively owned
//! - Bits 4+: Share count (number of concurrent readers)

use core::sync::atomic::{AtomicUsize, Ordering};

const EX_PUSH_LOCK_LOCKED: usize = 0x1;
const EX_PUSH_LOCK_SHARE_SHIFT: u32 = 4;
const EX_PUSH_LOCK_SHARE_INC: usize = 1 << EX_PUSH_LOCK_SHARE_SHIFT;
const EX_PUSH_LOCK_SHARE_MASK: usize = !0xF;

/// Lock acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Push lock
pub struct ExPushLock {
    value: AtomicUsize,
}

impl ExPushLock {
    /// Create a new unlocked push lock
    pub const fn new() -> Self {
        Self {
            value: AtomicUsize::new(0),
        }
    }

    /// Acquire the lock exclusively
    pub fn acquire_exclusive(&self) {
        while !self.try_acquire_exclusive() {
            while self.value.load(Ordering::Relaxed) != 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// Try to acquire the lock exclusively without spinning
    #[inline]
    fn try_acquire_exclusive(&self) -> bool {
        self.value
            .compare_exchange(0, EX_PUSH_LOCK_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Release an exclusively held lock
    pub fn release_exclusive(&self) {
        let old = self.value.swap(0, Ordering::Release);
        debug_assert_eq!(old, EX_PUSH_LOCK_LOCKED, "push lock not held exclusive");
    }

    /// Acquire the lock shared
    pub fn acquire_shared(&self) {
        while !self.try_acquire_shared() {
            while self.value.load(Ordering::Relaxed) & EX_PUSH_LOCK_LOCKED != 0 {
                core::hint::spin_loop();
            }
        }
    }

    /// Try to acquire the lock shared without spinning on an exclusive owner
    fn try_acquire_shared(&self) -> bool {
        let mut current = self.value.load(Ordering::Relaxed);
        loop {
            if current & EX_PUSH_LOCK_LOCKED != 0 {
                return false;
            }

            match self.value.compare_exchange_weak(
                current,
                current + EX_PUSH_LOCK_SHARE_INC,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Release a shared hold
    pub fn release_shared(&self) {
        let old = self.value.fetch_sub(EX_PUSH_LOCK_SHARE_INC, Ordering::Release);
        debug_assert!(old & EX_PUSH_LOCK_SHARE_MASK != 0, "push lock not held shared");
    }

    /// Acquire in the given mode
    #[inline]
    pub fn acquire(&self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.acquire_shared(),
            LockMode::Exclusive => self.acquire_exclusive(),
        }
    }

    /// Release a hold taken in the given mode
    #[inline]
    pub fn release(&self, mode: LockMode) {
        match mode {
            LockMode::Shared => self.release_shared(),
            LockMode::Exclusive => self.release_exclusive(),
        }
    }

    #[inline]
    pub fn is_locked_exclusive(&self) -> bool {
        self.value.load(Ordering::Relaxed) & EX_PUSH_LOCK_LOCKED != 0
    }

    #[inline]
    pub fn share_count(&self) -> usize {
        (self.value.load(Ordering::Relaxed) & EX_PUSH_LOCK_SHARE_MASK) >> EX_PUSH_LOCK_SHARE_SHIFT
    }
}

impl Default for ExPushLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for exclusive push lock access
pub struct ExPushLockExclusiveGuard<'a> {
    lock: &'a ExPushLock,
}

impl<'a> ExPushLockExclusiveGuard<'a> {
    pub fn new(lock: &'a ExPushLock) -> Self {
        lock.acquire_exclusive();
        Self { lock }
    }
}

impl Drop for ExPushLockExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_exclusive();
    }
}

/// RAII guard for shared push lock access
pub struct ExPushLockSharedGuard<'a> {
    lock: &'a ExPushLock,
}

impl<'a> ExPushLockSharedGuard<'a> {
    pub fn new(lock: &'a ExPushLock) -> Self {
        lock.acquire_shared();
        Self { lock }
    }
}

impl Drop for ExPushLockSharedGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_shared();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_exclusive_lock() {
        let lock = ExPushLock::new();

        assert!(!lock.is_locked_exclusive());
        lock.acquire_exclusive();
        assert!(lock.is_locked_exclusive());
        assert!(!lock.try_acquire_shared());
        lock.release_exclusive();
        assert!(!lock.is_locked_exclusive());
    }

    #[test]
    fn test_shared_lock() {
        let lock = ExPushLock::new();

        lock.acquire(LockMode::Shared);
        lock.acquire(LockMode::Shared);
        assert_eq!(lock.share_count(), 2);
        assert!(!lock.try_acquire_exclusive());

        lock.release(LockMode::Shared);
        lock.release(LockMode::Shared);
        assert_eq!(lock.share_count(), 0);
        assert!(lock.try_acquire_exclusive());
        lock.release_exclusive();
    }

    #[test]
    fn test_guards_release() {
        let lock = ExPushLock::new();
        {
            let _guard = ExPushLockExclusiveGuard::new(&lock);
            assert!(lock.is_locked_exclusive());
        }
        {
            let _a = ExPushLockSharedGuard::new(&lock);
            let _b = ExPushLockSharedGuard::new(&lock);
            assert_eq!(lock.share_count(), 2);
        }
        assert_eq!(lock.share_count(), 0);
        assert!(!lock.is_locked_exclusive());
    }

    #[test]
    fn test_exclusive_serializes_writers() {
        struct Shared {
            lock: ExPushLock,
            value: core::cell::UnsafeCell<u64>,
        }
        unsafe impl Sync for Shared {}

        let shared = Arc::new(Shared {
            lock: ExPushLock::new(),
            value: core::cell::UnsafeCell::new(0),
        });

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = ExPushLockExclusiveGuard::new(&shared.lock);
                        unsafe { *shared.value.get() += 1 };
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker");
        }

        assert_eq!(unsafe { *shared.value.get() }, 4000);
    }
}
