//! Fast References (EX_FAST_REF)
//!
//! A fast reference caches a small budget of pre-taken references on a
//! shared object next to the pointer to it. A referencer that finds
//! budget left consumes one entry and never touches the object's shared
//! reference count; only when the budget runs out does it fall back to
//! the slow path and refill the budget for the next referencers.
//!
//! The shared count lives in the referenced object and is owned by the
//! caller (for the object manager, the security descriptor cache). The
//! accounting contract is:
//!
//! - the slot itself owns one shared reference
//! - every unused budget entry owns one shared reference
//! - a reference handed out of the budget is a full shared reference
//!
//! so whoever swaps an object out of the slot must drop
//! `unused + 1` shared references on it.
//!
//! The budget is an explicit counter next to the pointer rather than
//! bits stolen from it.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::RwLock;

/// Size of the per-slot reference budget
pub const MAX_FAST_REFS: u32 = 7;

struct FastRefSlot<T> {
    object: Option<Arc<T>>,
    unused: AtomicU32,
}

/// Result of a fast reference attempt
pub enum FastReference<T> {
    /// The slot is empty
    Empty,
    /// A budget entry was consumed. When `last` is set the budget is now
    /// empty and the caller should refill it.
    Fast { object: Arc<T>, last: bool },
    /// The budget was already empty; the caller has to take a shared
    /// reference itself before using `object`.
    Exhausted(Arc<T>),
}

/// Fast-referenced slot holding an optional shared object
pub struct ExFastRef<T> {
    slot: RwLock<FastRefSlot<T>>,
}

impl<T> ExFastRef<T> {
    /// Create a slot. A present object must already carry
    /// `MAX_FAST_REFS + 1` shared references for the slot.
    pub fn new(object: Option<Arc<T>>) -> Self {
        let unused = if object.is_some() { MAX_FAST_REFS } else { 0 };
        Self {
            slot: RwLock::new(FastRefSlot {
                object,
                unused: AtomicU32::new(unused),
            }),
        }
    }

    /// Create an empty slot
    pub fn empty() -> Self {
        Self::new(None)
    }

    /// Consume one entry of the budget (ExFastReference)
    pub fn reference(&self) -> FastReference<T> {
        let slot = self.slot.read();
        let object = match slot.object.as_ref() {
            Some(object) => object,
            None => return FastReference::Empty,
        };

        let mut unused = slot.unused.load(Ordering::Relaxed);
        loop {
            if unused == 0 {
                return FastReference::Exhausted(object.clone());
            }

            match slot.unused.compare_exchange_weak(
                unused,
                unused - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return FastReference::Fast {
                        object: object.clone(),
                        last: unused == 1,
                    }
                }
                Err(observed) => unused = observed,
            }
        }
    }

    /// Try to hand a reference back to the budget (ExFastRefDereference)
    ///
    /// Returns false if the slot no longer holds `object` or the budget is
    /// full; the caller then drops the shared reference itself.
    pub fn dereference(&self, object: &Arc<T>) -> bool {
        self.add_additional(object, 1)
    }

    /// Add `refs` already-taken shared references to the budget
    /// (ExFastRefAddAdditionalReferenceCounts)
    pub fn add_additional(&self, object: &Arc<T>, refs: u32) -> bool {
        let slot = self.slot.read();
        match slot.object.as_ref() {
            Some(current) if Arc::ptr_eq(current, object) => {}
            _ => return false,
        }

        let mut unused = slot.unused.load(Ordering::Relaxed);
        loop {
            if unused + refs > MAX_FAST_REFS {
                return false;
            }

            match slot.unused.compare_exchange_weak(
                unused,
                unused + refs,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => unused = observed,
            }
        }
    }

    /// Replace the slot contents (ExFastRefSwapObject)
    ///
    /// Returns the previous object with its unused budget; the caller owes
    /// `unused + 1` shared dereferences on it.
    pub fn swap(&self, object: Option<Arc<T>>) -> Option<(Arc<T>, u32)> {
        let mut slot = self.slot.write();
        Self::replace(&mut slot, object)
    }

    /// Replace the slot contents only if it still holds `expected`
    /// (ExFastRefCompareSwapObject)
    ///
    /// On success returns the previous object and budget as `swap` does;
    /// on failure hands `object` back to the caller.
    pub fn compare_swap(
        &self,
        expected: Option<&Arc<T>>,
        object: Option<Arc<T>>,
    ) -> Result<Option<(Arc<T>, u32)>, Option<Arc<T>>> {
        let mut slot = self.slot.write();
        let matches = match (slot.object.as_ref(), expected) {
            (None, None) => true,
            (Some(current), Some(expected)) => Arc::ptr_eq(current, expected),
            _ => false,
        };

        if !matches {
            return Err(object);
        }
        Ok(Self::replace(&mut slot, object))
    }

    fn replace(slot: &mut FastRefSlot<T>, object: Option<Arc<T>>) -> Option<(Arc<T>, u32)> {
        let unused = if object.is_some() { MAX_FAST_REFS } else { 0 };
        let old_unused = slot.unused.swap(unused, Ordering::AcqRel);
        let old = core::mem::replace(&mut slot.object, object);
        old.map(|old| (old, old_unused))
    }

    /// Peek at the current object without taking a reference
    pub fn object(&self) -> Option<Arc<T>> {
        self.slot.read().object.clone()
    }

    /// Whether the slot currently holds an object
    pub fn is_empty(&self) -> bool {
        self.slot.read().object.is_none()
    }

    /// Budget entries left
    pub fn unused_references(&self) -> u32 {
        self.slot.read().unused.load(Ordering::Relaxed)
    }
}

impl<T> Default for ExFastRef<T> {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_consumed_then_exhausted() {
        let object = Arc::new(5u32);
        let fast = ExFastRef::new(Some(object.clone()));

        for remaining in (0..MAX_FAST_REFS).rev() {
            match fast.reference() {
                FastReference::Fast { object: got, last } => {
                    assert!(Arc::ptr_eq(&got, &object));
                    assert_eq!(last, remaining == 0);
                }
                _ => panic!("budget should not be empty yet"),
            }
        }

        assert!(matches!(fast.reference(), FastReference::Exhausted(_)));
        assert_eq!(fast.unused_references(), 0);
    }

    #[test]
    fn test_dereference_returns_to_budget() {
        let object = Arc::new(1u32);
        let fast = ExFastRef::new(Some(object.clone()));

        assert!(!fast.dereference(&object), "budget is full");
        let _ = fast.reference();
        assert!(fast.dereference(&object));
        assert_eq!(fast.unused_references(), MAX_FAST_REFS);

        let stranger = Arc::new(1u32);
        let _ = fast.reference();
        assert!(!fast.dereference(&stranger));
    }

    #[test]
    fn test_add_additional_respects_limit() {
        let object = Arc::new(0u8);
        let fast = ExFastRef::new(Some(object.clone()));
        for _ in 0..MAX_FAST_REFS {
            let _ = fast.reference();
        }

        assert!(fast.add_additional(&object, MAX_FAST_REFS));
        assert!(!fast.add_additional(&object, 1));
    }

    #[test]
    fn test_swap_reports_old_budget() {
        let first = Arc::new(1u32);
        let second = Arc::new(2u32);
        let fast = ExFastRef::new(Some(first.clone()));
        let _ = fast.reference();
        let _ = fast.reference();

        let (old, unused) = fast.swap(Some(second.clone())).expect("slot was full");
        assert!(Arc::ptr_eq(&old, &first));
        assert_eq!(unused, MAX_FAST_REFS - 2);
        assert_eq!(fast.unused_references(), MAX_FAST_REFS);

        assert!(fast.swap(None).is_some());
        assert!(fast.is_empty());
        assert!(matches!(fast.reference(), FastReference::Empty));
    }

    #[test]
    fn test_compare_swap_detects_change() {
        let first = Arc::new(1u32);
        let second = Arc::new(2u32);
        let fast = ExFastRef::new(Some(first.clone()));

        let rejected = fast.compare_swap(Some(&second), None);
        assert!(rejected.is_err());
        assert!(!fast.is_empty());

        let swapped = fast.compare_swap(Some(&first), Some(second.clone()));
        assert!(matches!(swapped, Ok(Some(_))));
        assert!(Arc::ptr_eq(&fast.object().expect("slot"), &second));
    }
}
