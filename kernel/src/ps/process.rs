//! Processes as seen by the object manager
//!
//! The object manager treats a process as an opaque identity that owns a
//! handle table and a quota block. Everything else an EPROCESS carries
//! (address space, threads, token) belongs to other subsystems.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::RwLock;

use super::quota::QuotaBlock;
use crate::ob::HandleTable;

/// Process identifier (CLIENT_ID.UniqueProcess)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// The system process
    pub const SYSTEM: ProcessId = ProcessId(4);
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid {}", self.0)
    }
}

/// Thread identifier (CLIENT_ID.UniqueThread)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ThreadId(pub u32);

/// A process
pub struct Process {
    id: ProcessId,
    parent: Option<ProcessId>,
    name: String,
    quota: Arc<QuotaBlock>,
    /// Handle table (EPROCESS.ObjectTable); `None` before `init_process`
    /// and after `kill_process`
    object_table: RwLock<Option<Arc<HandleTable>>>,
    exiting: AtomicBool,
}

impl Process {
    pub fn new(id: ProcessId, name: &str, quota: Arc<QuotaBlock>) -> Self {
        Self {
            id,
            parent: None,
            name: String::from(name),
            quota,
            object_table: RwLock::new(None),
            exiting: AtomicBool::new(false),
        }
    }

    /// Child process sharing its parent's quota block
    pub fn new_child(id: ProcessId, name: &str, parent: &Process) -> Self {
        let mut child = Self::new(id, name, parent.quota.clone());
        child.parent = Some(parent.id);
        child
    }

    /// The system process: unlimited quota
    pub fn system() -> Self {
        Self::new(ProcessId::SYSTEM, "System", Arc::new(QuotaBlock::unlimited()))
    }

    #[inline]
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn parent_id(&self) -> Option<ProcessId> {
        self.parent
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quota(&self) -> &Arc<QuotaBlock> {
        &self.quota
    }

    pub fn is_system(&self) -> bool {
        self.id == ProcessId::SYSTEM
    }

    /// The process handle table, if it has one
    pub fn object_table(&self) -> Option<Arc<HandleTable>> {
        self.object_table.read().clone()
    }

    /// Install a handle table, returning the one it replaces
    pub fn set_object_table(&self, table: Arc<HandleTable>) -> Option<Arc<HandleTable>> {
        self.object_table.write().replace(table)
    }

    /// Detach the handle table
    pub fn take_object_table(&self) -> Option<Arc<HandleTable>> {
        self.object_table.write().take()
    }

    pub fn set_exiting(&self) {
        self.exiting.store(true, Ordering::Release);
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_object_table", &self.object_table.read().is_some())
            .field("exiting", &self.is_exiting())
            .finish()
    }
}
