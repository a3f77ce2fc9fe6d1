//! Object Deletion
//!
//! An object is deleted when its pointer count reaches zero. A caller that
//! may block deletes it in line. Any other caller pushes it on a lock-free
//! list; the push that finds the list empty queues a worker to drain it.
//!
//! # Deferred list
//!
//! The list head is a CAS-managed stack of nodes. While the worker runs,
//! the head holds a sentinel instead of null, so pushes during the drain
//! do not queue a second worker; the sentinel also terminates each batch.
//!
//! # Deletion order (ObpRemoveObjectRoutine)
//!
//! 1. Unlink from the type's instance list
//! 2. Type delete callback
//! 3. Security descriptor release
//! 4. Quota return and handle database release
//! 5. Pool storage free
//!
//! Nothing on this path can fail the deletion; callback problems are
//! logged.

use alloc::boxed::Box;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use super::header::{ObjectFlags, ObjectRef};
use super::manager::ObjectManager;
use super::namespace::LookupContext;
use super::object_type::ObjectProcedures;
use crate::ex::{LockMode, WorkQueueItem, WorkQueueType};

struct DeferredNode {
    object: ObjectRef,
    next: *mut DeferredNode,
}

/// Marks a list whose worker is already running
const WORKER_ACTIVE: *mut DeferredNode = 1usize as *mut DeferredNode;

/// Pending deletions (ObpRemoveObjectList)
pub(crate) struct DeferredDeletions {
    head: AtomicPtr<DeferredNode>,
    deferred: AtomicUsize,
    deleted: AtomicUsize,
}

impl DeferredDeletions {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            deferred: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
        }
    }

    /// Push an object; true if the list was idle and a worker must be
    /// queued
    fn push(&self, object: ObjectRef) -> bool {
        let node = Box::into_raw(Box::new(DeferredNode {
            object,
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // Safety: the node is ours until the CAS publishes it
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(observed) => head = observed,
            }
        }
        self.deferred.fetch_add(1, Ordering::Relaxed);
        head.is_null()
    }

    /// Detach everything pushed so far, leaving the sentinel behind
    fn take_batch(&self) -> *mut DeferredNode {
        self.head.swap(WORKER_ACTIVE, Ordering::AcqRel)
    }

    /// Leave the list idle unless more work arrived meanwhile
    fn finish(&self) -> bool {
        self.head
            .compare_exchange(WORKER_ACTIVE, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Nothing pushed and no worker running
    pub(crate) fn is_idle(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    pub(crate) fn deferred_count(&self) -> usize {
        self.deferred.load(Ordering::Relaxed)
    }
}

impl Drop for DeferredDeletions {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        while !node.is_null() && node != WORKER_ACTIVE {
            // Safety: nodes on the list were leaked from boxes by `push`
            let boxed = unsafe { Box::from_raw(node) };
            log::warn!("ob: object {} still pending deletion", boxed.object.id());
            node = boxed.next;
        }
    }
}

impl ObjectManager {
    /// Delete now if the caller may block, else defer
    pub(crate) fn delete_object(&self, object: ObjectRef) {
        if crate::ke::can_block_at(self.context().current_irql()) {
            self.remove_object_routine(object, true);
        } else {
            self.defer_object_deletion(object);
        }
    }

    /// ObpDeferObjectDeletion
    pub(crate) fn defer_object_deletion(&self, object: ObjectRef) {
        log::trace!("ob: deferring deletion of object {}", object.id());
        if !self.deferred.push(object) {
            return;
        }

        match self.self_ref() {
            Some(ob) => self.work_queue().queue_work_item(
                WorkQueueItem::new(move || {
                    ob.process_deferred_deletions();
                }),
                WorkQueueType::CriticalWorkQueue,
            ),
            None => {
                log::warn!("ob: manager going away, draining deferred deletions in line");
                self.process_deferred_deletions();
            }
        }
    }

    /// Drain the deferred list (ObpProcessRemoveObjectQueue)
    ///
    /// Returns the number of objects deleted.
    pub fn process_deferred_deletions(&self) -> usize {
        let mut processed = 0;
        let mut node = self.deferred.take_batch();
        loop {
            while !node.is_null() && node != WORKER_ACTIVE {
                // Safety: every node on the list came from `push`, and the
                // swap handed this batch to us alone
                let boxed = unsafe { Box::from_raw(node) };
                node = boxed.next;
                self.remove_object_routine(boxed.object, false);
                processed += 1;
            }
            if self.deferred.finish() {
                break;
            }
            node = self.deferred.take_batch();
        }
        processed
    }

    /// Objects deleted since initialization
    pub fn deleted_object_count(&self) -> usize {
        self.deferred.deleted.load(Ordering::Relaxed)
    }

    /// Objects ever handed to the deletion worker
    pub fn deferred_deletion_count(&self) -> usize {
        self.deferred.deferred_count()
    }

    /// No deletion pending and no worker draining the list
    pub fn deferred_deletions_idle(&self) -> bool {
        self.deferred.is_idle()
    }

    /// ObpRemoveObjectRoutine
    pub(crate) fn remove_object_routine(&self, object: ObjectRef, inline: bool) {
        let object_type = object.object_type().clone();
        log::debug!(
            "ob: deleting {} object {}{}",
            object_type.name(),
            object.id(),
            if inline { "" } else { " (deferred)" }
        );

        if object.pointer_count() != 0 || object.handle_count() != 0 {
            log::error!(
                "ob: deleting object {} with pointer count {} and handle count {}",
                object.id(),
                object.pointer_count(),
                object.handle_count()
            );
        }

        object_type.remove_instance(&object);
        if inline {
            object.set_flags(ObjectFlags::DELETED_INLINE);
        }

        if object_type.procedures().contains(ObjectProcedures::DELETE) {
            object_type.methods().delete(&object);
        }

        self.delete_object_security(&object);

        let (quota_charged, handle_info) = {
            let mut locked = object.lock_exclusive();
            (locked.quota_charged.take(), locked.handle_info.take())
        };
        if let Some(charge) = quota_charged {
            charge
                .block
                .return_shared_pool_quota(charge.paged, charge.non_paged);
        }
        if let Some(handle_info) = handle_info {
            handle_info.release(self.pool());
        }

        if let Some(name_info) = object.name_info() {
            if let Some(directory) = name_info.clear_directory() {
                log::error!(
                    "ob: object {} deleted while named in directory {}",
                    object.id(),
                    directory.id()
                );
            }
        }
        if let Some(block) = object.take_pool_block() {
            self.pool().free(block);
        }

        object_type.object_deleted();
        self.deferred.deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a temporary object's name once its last handle is gone
    /// (ObpDeleteNameCheck)
    pub(crate) fn delete_name_check(&self, object: &ObjectRef) {
        if object.handle_count() != 0 || object.is_permanent() {
            return;
        }
        self.remove_object_name(object, false);
    }

    /// Unlink an object from its directory
    ///
    /// Unless `force` is set, the name stays if a handle was opened by name
    /// or the object became permanent meanwhile.
    pub(crate) fn remove_object_name(&self, object: &ObjectRef, force: bool) {
        let Some(name_info) = object.name_info() else {
            return;
        };
        let Some(directory) = name_info.directory() else {
            return;
        };
        let name = name_info.name();

        let removed = {
            let context =
                LookupContext::new(self.namespace(), directory.clone(), LockMode::Exclusive);
            if !force && (object.handle_count() != 0 || object.is_permanent()) {
                None
            } else {
                match context.lookup(&name, false) {
                    Some(found) if alloc::sync::Arc::ptr_eq(&found, object) => {
                        context.delete_entry(&name, false);
                        name_info.clear_directory()
                    }
                    _ => None,
                }
            }
        };

        if let Some(directory) = removed {
            log::trace!("ob: removed name {} of object {}", name, object.id());
            name_info.dereference_query();
            self.dereference_object(object.clone());
            self.dereference_object(directory);
        }
    }

    /// Let a permanent object go away with its last handle
    /// (ObMakeTemporaryObject)
    pub fn make_temporary_object(&self, object: &ObjectRef) {
        {
            let _locked = object.lock_exclusive();
            object.clear_flags(ObjectFlags::PERMANENT_OBJECT);
        }
        self.delete_name_check(object);
    }

    /// Keep an object alive past its last handle (ObpSetPermanentObject)
    pub fn make_permanent_object(&self, object: &ObjectRef) {
        let _locked = object.lock_exclusive();
        object.set_flags(ObjectFlags::PERMANENT_OBJECT);
    }
}
