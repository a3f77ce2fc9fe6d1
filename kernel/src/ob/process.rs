//! Process handle tables
//!
//! A process gets its handle table when it is initialized and loses it
//! when it is killed. In between, anyone reaching into the table, the
//! owner or another process, holds the table's rundown protection through
//! a [`HandleTableGuard`], so teardown waits for them and refuses
//! newcomers.
//!
//! # NT Functions
//!
//! - `ObInitProcess`: create the table, inheriting from a parent
//! - `ObKillProcess`: run down the table and close every handle
//! - `ObReferenceProcessHandleTable` / `ObDereferenceProcessHandleTable`

use alloc::sync::Arc;
use core::ops::Deref;

use super::attributes::{HandleAttributes, ObjAttributes};
use super::handle::{Handle, HandleIndex, HandleKind, HandleTable};
use super::manager::ObjectManager;
use super::object_type::OpenReason;
use super::status::{ObError, ObResult};
use crate::ke::ProcessorMode;
use crate::mm::{pool_tags, PoolType};
use crate::ps::Process;
use crate::se::AccessState;

/// Rundown-protected use of a handle table
pub struct HandleTableGuard {
    table: Arc<HandleTable>,
}

impl HandleTableGuard {
    fn acquire(table: Arc<HandleTable>) -> Option<Self> {
        if table.rundown().acquire() {
            Some(Self { table })
        } else {
            None
        }
    }

    pub fn table(&self) -> &Arc<HandleTable> {
        &self.table
    }
}

impl Deref for HandleTableGuard {
    type Target = HandleTable;

    fn deref(&self) -> &HandleTable {
        &self.table
    }
}

impl Drop for HandleTableGuard {
    fn drop(&mut self) {
        self.table.rundown().release();
    }
}

impl ObjectManager {
    /// ObReferenceProcessHandleTable
    pub fn reference_process_handle_table(&self, process: &Process) -> ObResult<HandleTableGuard> {
        let table = process.object_table().ok_or(ObError::ProcessTerminating)?;
        HandleTableGuard::acquire(table).ok_or(ObError::ProcessTerminating)
    }

    /// Rundown-protected use of the kernel handle table
    pub(crate) fn reference_kernel_handle_table(&self) -> ObResult<HandleTableGuard> {
        let table = self
            .kernel_handle_table()
            .cloned()
            .ok_or(ObError::InvalidHandle)?;
        HandleTableGuard::acquire(table).ok_or(ObError::InvalidHandle)
    }

    /// The table a handle of `process` lives in, and its slot
    ///
    /// Kernel handles only resolve for kernel-mode callers.
    pub(crate) fn resolve_handle(
        &self,
        process: &Process,
        handle: Handle,
        mode: ProcessorMode,
    ) -> ObResult<(HandleTableGuard, HandleIndex)> {
        match handle.classify() {
            HandleKind::Null | HandleKind::Pseudo(_) => Err(ObError::InvalidHandle),
            HandleKind::Kernel(index) => {
                if !mode.is_kernel() {
                    return Err(ObError::InvalidHandle);
                }
                Ok((self.reference_kernel_handle_table()?, index))
            }
            HandleKind::User(index) => Ok((self.reference_process_handle_table(process)?, index)),
        }
    }

    /// Give a process its handle table (ObInitProcess)
    ///
    /// With a parent, every inheritable handle whose object is still alive
    /// is copied to the same handle value in the child.
    pub fn init_process(&self, parent: Option<&Process>, process: &Arc<Process>) -> ObResult<()> {
        if process.object_table().is_some() {
            return Err(ObError::InvalidParameter);
        }

        let block = self
            .pool()
            .allocate(
                PoolType::NonPagedPool,
                core::mem::size_of::<HandleTable>(),
                pool_tags::TAG_HANDLE_TABLE,
            )
            .ok_or(ObError::OutOfResources)?;

        let table = match parent {
            Some(parent) => {
                let parent_table = match self.reference_process_handle_table(parent) {
                    Ok(table) => table,
                    Err(error) => {
                        self.pool().free(block);
                        return Err(error);
                    }
                };
                parent_table.duplicate_for_inheritance(process.id(), |entry| {
                    if !entry.attributes.contains(HandleAttributes::INHERIT) {
                        return None;
                    }
                    let object = self.reference_object_safe(&entry.object)?;

                    let mut access_state = AccessState::new(
                        self.current_subject(),
                        0,
                        object.object_type().generic_mapping(),
                    );
                    access_state.grant(entry.granted_access);
                    match self.increment_handle_count(
                        OpenReason::Inherit,
                        process,
                        &object,
                        Some(&mut access_state),
                        ProcessorMode::KernelMode,
                        ObjAttributes::empty(),
                    ) {
                        Ok(()) => Some(entry.clone()),
                        Err(error) => {
                            log::debug!(
                                "ob: handle to object {} not inherited: {:?}",
                                object.id(),
                                error
                            );
                            self.dereference_object(object);
                            None
                        }
                    }
                })
            }
            None => HandleTable::new(process.id(), false, self.config().handle_limit()),
        };

        let table = Arc::new(table);
        table.set_pool_block(block);
        process.set_object_table(table.clone());
        self.register_handle_table(&table);

        log::debug!(
            "ob: process {} handle table ready, {} inherited handles",
            process.id(),
            table.handle_count()
        );
        Ok(())
    }

    /// Close every handle of an exiting process (ObKillProcess)
    pub fn kill_process(&self, process: &Process) {
        process.set_exiting();
        let Some(table) = process.object_table() else {
            return;
        };

        // Wait out cross-process users; later references fail
        table.rundown().wait_for_rundown();

        let owner = table.owner();
        let mut closed = 0usize;
        table.sweep(|_, entry| {
            self.close_removed_entry(owner, entry);
            closed += 1;
        });

        process.take_object_table();
        self.unregister_handle_table(&table);
        if let Some(block) = table.take_pool_block() {
            self.pool().free(block);
        }
        log::debug!("ob: process {} exited, {} handles closed", owner, closed);
    }
}
