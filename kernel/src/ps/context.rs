//! Execution context collaborator
//!
//! Supplies the identity of the caller: current process, current thread,
//! and the IRQL the caller runs at. The object manager uses the IRQL to
//! choose between synchronous and deferred deletion and the process for
//! quota attribution and handle-count database keys.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use spin::RwLock;

use super::process::{Process, ThreadId};
use crate::ke::{levels, Kirql};
use crate::ob::ObjectRef;

/// Process/thread provider
pub trait ExecutionContext: Send + Sync {
    /// PsGetCurrentProcess
    fn current_process(&self) -> Arc<Process>;

    /// PsGetCurrentThreadId
    fn current_thread(&self) -> ThreadId;

    /// KeGetCurrentIrql
    fn current_irql(&self) -> Kirql;

    /// Object backing the current-process pseudo handle
    fn current_process_object(&self) -> Option<ObjectRef> {
        None
    }

    /// Object backing the current-thread pseudo handle
    fn current_thread_object(&self) -> Option<ObjectRef> {
        None
    }
}

/// Settable execution context
///
/// The embedding kernel (or a test) switches the current process, thread
/// and IRQL explicitly.
pub struct SystemContext {
    process: RwLock<Arc<Process>>,
    thread: AtomicU32,
    irql: AtomicU8,
    process_object: RwLock<Option<ObjectRef>>,
    thread_object: RwLock<Option<ObjectRef>>,
}

impl SystemContext {
    pub fn new(process: Arc<Process>) -> Self {
        Self {
            process: RwLock::new(process),
            thread: AtomicU32::new(0),
            irql: AtomicU8::new(levels::PASSIVE_LEVEL),
            process_object: RwLock::new(None),
            thread_object: RwLock::new(None),
        }
    }

    /// Switch to another process, returning the previous one
    pub fn attach_process(&self, process: Arc<Process>) -> Arc<Process> {
        core::mem::replace(&mut *self.process.write(), process)
    }

    pub fn set_thread(&self, thread: ThreadId) {
        self.thread.store(thread.0, Ordering::Relaxed);
    }

    /// Raise or lower the IRQL, returning the old level
    pub fn set_irql(&self, level: Kirql) -> Kirql {
        self.irql.swap(level, Ordering::AcqRel)
    }

    pub fn set_process_object(&self, object: Option<ObjectRef>) {
        *self.process_object.write() = object;
    }

    pub fn set_thread_object(&self, object: Option<ObjectRef>) {
        *self.thread_object.write() = object;
    }
}

impl ExecutionContext for SystemContext {
    fn current_process(&self) -> Arc<Process> {
        self.process.read().clone()
    }

    fn current_thread(&self) -> ThreadId {
        ThreadId(self.thread.load(Ordering::Relaxed))
    }

    fn current_irql(&self) -> Kirql {
        self.irql.load(Ordering::Acquire)
    }

    fn current_process_object(&self) -> Option<ObjectRef> {
        self.process_object.read().clone()
    }

    fn current_thread_object(&self) -> Option<ObjectRef> {
        self.thread_object.read().clone()
    }
}
