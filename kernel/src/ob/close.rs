//! Handle Close
//!
//! Closing a handle removes its table entry, counts the handle out of the
//! object, lets the type react, drops the name of a temporary object
//! whose last handle went away, and finally gives back the handle's
//! pointer reference.
//!
//! # NT Functions
//!
//! - `NtClose` / `ObCloseHandle`
//! - `ObpCloseHandleTableEntry`
//! - `ObpDecrementHandleCount`

use super::attributes::HandleAttributes;
use super::handle::{Handle, HandleTable, HandleTableEntry, LockedHandleEntry};
use super::header::ObjectRef;
use super::manager::ObjectManager;
use super::object_type::ObjectProcedures;
use super::status::{ObError, ObResult};
use crate::ke::ProcessorMode;
use crate::ps::{Process, ProcessId};
use crate::se::{AccessMask, AuditEvent, AuditKind};

impl ObjectManager {
    /// Count a handle of `process` out of `object` (ObpDecrementHandleCount)
    pub(crate) fn decrement_handle_count(
        &self,
        process: ProcessId,
        object: &ObjectRef,
        granted_access: AccessMask,
    ) {
        let object_type = object.object_type().clone();

        let (system_handle_count, process_handle_count) = {
            let mut locked = object.lock_exclusive();
            let old = object.decrement_handle_count();
            let process_count = locked
                .handle_info
                .as_mut()
                .and_then(|info| info.decrement(process))
                .map_or(0, |remaining| remaining + 1);
            if old == 1 {
                locked.exclusive_process = None;
            }
            (old, process_count)
        };
        if system_handle_count <= 0 {
            log::error!(
                "ob: handle count of object {} underflowed",
                object.id()
            );
        }

        if object_type.procedures().contains(ObjectProcedures::CLOSE) {
            if let Err(error) = object_type.methods().close(
                process,
                object,
                granted_access,
                process_handle_count,
                system_handle_count.max(0) as u32,
            ) {
                log::warn!(
                    "ob: close callback of {} failed for object {}: {:?}",
                    object_type.name(),
                    object.id(),
                    error
                );
            }
        }

        self.delete_name_check(object);
        object_type.handle_closed();
    }

    /// Close a handle (NtClose)
    pub fn close_handle(&self, handle: Handle, mode: ProcessorMode) -> ObResult<()> {
        self.close_process_handle(&self.current_process(), handle, mode)
    }

    /// Close a handle in another process's table (ObCloseHandle attached)
    pub(crate) fn close_process_handle(
        &self,
        process: &Process,
        handle: Handle,
        mode: ProcessorMode,
    ) -> ObResult<()> {
        let (table, index) = self.resolve_handle(process, handle, mode)?;
        let locked = table.map_handle_to_entry(index).ok_or(ObError::InvalidHandle)?;
        self.close_handle_table_entry(&table, locked, mode, false)
    }

    /// Close a locked entry of `table` (ObpCloseHandleTableEntry)
    pub(crate) fn close_handle_table_entry(
        &self,
        table: &HandleTable,
        locked: LockedHandleEntry<'_>,
        mode: ProcessorMode,
        ignore_protect: bool,
    ) -> ObResult<()> {
        if !ignore_protect
            && locked
                .entry()
                .attributes
                .contains(HandleAttributes::PROTECT_CLOSE)
        {
            log::debug!(
                "ob: {:?} refused to close protected handle {:?}",
                mode,
                locked.handle()
            );
            return Err(ObError::HandleNotClosable);
        }

        let entry = table.destroy_entry(locked).ok_or(ObError::InvalidHandle)?;
        self.close_removed_entry(table.owner(), entry);
        Ok(())
    }

    /// Finish closing an entry already taken out of its table
    pub(crate) fn close_removed_entry(&self, owner: ProcessId, entry: HandleTableEntry) {
        if entry.attributes.contains(HandleAttributes::AUDIT_ON_CLOSE) {
            self.validator().audit(&AuditEvent {
                kind: AuditKind::Close,
                object_id: entry.object.id(),
                type_name: entry.object.object_type().name(),
                process: owner,
                access: entry.granted_access,
                success: true,
            });
        }

        self.decrement_handle_count(owner, &entry.object, entry.granted_access);
        self.dereference_object(entry.object);
    }
}
