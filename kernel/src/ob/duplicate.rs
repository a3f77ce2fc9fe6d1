//! Handle Duplication
//!
//! Copies a handle from one process's table into another's. The new
//! handle counts as a fresh open of the object for the target process:
//! quota, exclusivity and the open callback all apply, and access beyond
//! what the source handle grants must pass an access check.
//!
//! # NT Functions
//!
//! - `NtDuplicateObject` / `ObDuplicateObject`

use alloc::sync::Arc;

use super::attributes::{DuplicateOptions, HandleAttributes, ObjAttributes};
use super::handle::{Handle, HandleKind, HandleTableEntry};
use super::header::ObjectRef;
use super::manager::ObjectManager;
use super::object_type::OpenReason;
use super::reference::HandleInformation;
use super::status::{ObError, ObResult};
use crate::ke::ProcessorMode;
use crate::ps::Process;
use crate::se::{is_valid_desired_access, special_rights, AccessMask, AccessState, SubjectContext};

impl ObjectManager {
    /// Duplicate `source_handle` of `source_process` (ObDuplicateObject)
    ///
    /// With no target process only `DUPLICATE_CLOSE_SOURCE` is honored and
    /// no handle is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn duplicate_object(
        &self,
        source_process: &Arc<Process>,
        source_handle: Handle,
        target_process: Option<&Arc<Process>>,
        desired_access: AccessMask,
        attributes: HandleAttributes,
        options: DuplicateOptions,
        mode: ProcessorMode,
    ) -> ObResult<Option<Handle>> {
        if !is_valid_desired_access(desired_access) {
            return Err(ObError::AccessDenied);
        }
        if !(attributes - HandleAttributes::SETTABLE).is_empty() {
            return Err(ObError::InvalidParameter);
        }

        let source = self.reference_source_handle(source_process, source_handle, mode);
        if options.contains(DuplicateOptions::CLOSE_SOURCE) {
            if let Err(error) = self.close_process_handle(source_process, source_handle, mode) {
                log::debug!(
                    "ob: closing duplicated source {:?} failed: {:?}",
                    source_handle,
                    error
                );
            }
        }
        let (object, source_info) = source?;

        let Some(target_process) = target_process else {
            self.dereference_object(object);
            return Ok(None);
        };

        match self.duplicate_into(
            &object,
            source_info,
            target_process,
            desired_access,
            attributes,
            options,
            mode,
        ) {
            Ok(handle) => Ok(Some(handle)),
            Err(error) => {
                self.dereference_object(object);
                Err(error)
            }
        }
    }

    /// Reference the object behind a handle of any process
    fn reference_source_handle(
        &self,
        process: &Arc<Process>,
        handle: Handle,
        mode: ProcessorMode,
    ) -> ObResult<(ObjectRef, HandleInformation)> {
        if let HandleKind::Pseudo(_) = handle.classify() {
            if !Arc::ptr_eq(process, &self.current_process()) {
                return Err(ObError::InvalidHandle);
            }
            return self.reference_object_by_handle(handle, 0, None, mode);
        }

        let (table, index) = self.resolve_handle(process, handle, mode)?;
        let locked = table.map_handle_to_entry(index).ok_or(ObError::InvalidHandle)?;
        let entry = locked.entry();
        let information = HandleInformation {
            granted_access: entry.granted_access,
            attributes: entry.attributes,
        };
        Ok((self.reference_object(&entry.object), information))
    }

    /// Give `target` a handle to `object`, whose reference moves to the
    /// handle on success
    #[allow(clippy::too_many_arguments)]
    fn duplicate_into(
        &self,
        object: &ObjectRef,
        source: HandleInformation,
        target: &Arc<Process>,
        desired_access: AccessMask,
        attributes: HandleAttributes,
        options: DuplicateOptions,
        mode: ProcessorMode,
    ) -> ObResult<Handle> {
        let table = self.reference_process_handle_table(target)?;
        let object_type = object.object_type().clone();

        let desired = if options.contains(DuplicateOptions::SAME_ACCESS) {
            source.granted_access
        } else {
            object_type.generic_mapping().map_generic(desired_access)
        };
        let attributes = if options.contains(DuplicateOptions::SAME_ATTRIBUTES) {
            source.attributes & HandleAttributes::SETTABLE
        } else {
            attributes
        };

        // Access the source handle doesn't grant has to be checked
        let mut access_state = (desired & !source.granted_access != 0).then(|| {
            let subject = SubjectContext {
                process: target.id(),
                thread: self.current_subject().thread,
            };
            let mut state = AccessState::new(subject, desired, object_type.generic_mapping());
            state.grant(desired & source.granted_access);
            state
        });

        let open_attributes = if attributes.contains(HandleAttributes::INHERIT) {
            ObjAttributes::INHERIT
        } else {
            ObjAttributes::empty()
        };
        self.increment_handle_count(
            OpenReason::Duplicate,
            target,
            object,
            access_state.as_mut(),
            mode,
            open_attributes,
        )?;

        let valid = object_type.valid_access_mask() | special_rights::ACCESS_SYSTEM_SECURITY;
        let granted_access = match access_state.as_ref() {
            Some(state) => {
                (state.remaining_desired_access | state.previously_granted_access) & valid
            }
            None => desired & valid,
        };
        let audit_mask = access_state
            .as_ref()
            .map_or(0, |state| state.maximum_audit_mask);

        let entry = HandleTableEntry::new(object.clone(), granted_access, attributes);
        match table.create_entry(entry, audit_mask) {
            Some(handle) => {
                log::trace!(
                    "ob: duplicated object {} into process {} as {:?}, access {:#x}",
                    object.id(),
                    target.id(),
                    handle,
                    granted_access
                );
                Ok(handle)
            }
            None => {
                self.decrement_handle_count(target.id(), object, granted_access);
                log::warn!("ob: handle table of process {} is full", target.id());
                Err(ObError::OutOfResources)
            }
        }
    }
}
