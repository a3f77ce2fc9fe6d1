//! Handle Creation
//!
//! Every new handle, whatever its origin, goes through
//! [`ObjectManager::increment_handle_count`]: it charges the object's quota
//! the first time, enforces exclusivity and kernel-only access, decides
//! access for opens, counts the handle, and runs the type's open
//! callback. [`ObjectManager::create_handle`] then stores the entry in a
//! handle table.
//!
//! # NT Functions
//!
//! - `ObpChargeQuotaForObject`
//! - `ObpIncrementHandleCount`
//! - `ObpCreateHandle`

use alloc::sync::Arc;

use super::attributes::{HandleAttributes, ObjAttributes};
use super::handle::{Handle, HandleTableEntry};
use super::handle_db::HandleInfo;
use super::header::{ObjectFlags, ObjectLockGuard, ObjectRef, QuotaCharge};
use super::manager::ObjectManager;
use super::namespace::LookupContext;
use super::object_type::{ObjectProcedures, OpenReason};
use super::status::{ObError, ObResult};
use crate::ke::ProcessorMode;
use crate::ps::{Process, ProcessId};
use crate::se::{generic_rights, special_rights, AccessState, AuditEvent, AuditKind, Privilege};

/// Exclusivity rules for one more handle from `process`
fn check_exclusive(
    object: &ObjectRef,
    locked: &ObjectLockGuard<'_>,
    attributes: ObjAttributes,
    process: ProcessId,
) -> ObResult<()> {
    if attributes.contains(ObjAttributes::EXCLUSIVE) {
        if attributes.contains(ObjAttributes::INHERIT)
            || !object.has_flag(ObjectFlags::EXCLUSIVE_OBJECT)
        {
            return Err(ObError::InvalidParameter);
        }
        match locked.exclusive_process {
            None if object.handle_count() != 0 => return Err(ObError::AccessDenied),
            Some(owner) if owner != process => return Err(ObError::AccessDenied),
            _ => {}
        }
    } else if object.has_flag(ObjectFlags::EXCLUSIVE_OBJECT) && locked.exclusive_process.is_some()
    {
        return Err(ObError::AccessDenied);
    }
    Ok(())
}

impl ObjectManager {
    /// Charge a new object's quota to `process` (ObpChargeQuotaForObject)
    ///
    /// Only the first handle pays; returns whether this call charged.
    pub(crate) fn charge_quota_for_object(
        &self,
        object: &ObjectRef,
        locked: &mut ObjectLockGuard<'_>,
        process: &Process,
    ) -> ObResult<bool> {
        if !object.has_flag(ObjectFlags::NEW_OBJECT) {
            return Ok(false);
        }

        let object_type = object.object_type();
        let (mut paged, non_paged, security_charge) = match object.quota_info() {
            Some(quota) => (
                quota.paged_pool_charge,
                quota.non_paged_pool_charge,
                quota.security_descriptor_charge,
            ),
            None => (
                object_type.info().default_paged_pool_charge,
                object_type.info().default_non_paged_pool_charge,
                0,
            ),
        };
        if object.has_security_descriptor() {
            if security_charge != 0 {
                paged += security_charge;
            } else {
                object.set_flags(ObjectFlags::DEFAULT_SECURITY_QUOTA);
                paged += self.config().default_security_quota;
            }
        }

        let block = process.quota().clone();
        if !block.charge_shared_pool_quota(paged as u64, non_paged as u64) {
            log::debug!(
                "ob: quota exceeded charging object {} to process {}",
                object.id(),
                process.id()
            );
            return Err(ObError::QuotaExceeded);
        }

        locked.quota_charged = Some(QuotaCharge {
            block,
            paged: paged as u64,
            non_paged: non_paged as u64,
        });
        object.clear_flags(ObjectFlags::NEW_OBJECT);
        Ok(true)
    }

    /// Count one more handle on `object` for `process`
    /// (ObpIncrementHandleCount)
    ///
    /// On failure nothing is left counted. The object lock is dropped while
    /// the access check and the open callback run.
    pub(crate) fn increment_handle_count(
        &self,
        reason: OpenReason,
        process: &Arc<Process>,
        object: &ObjectRef,
        mut access_state: Option<&mut AccessState>,
        mode: ProcessorMode,
        attributes: ObjAttributes,
    ) -> ObResult<()> {
        let access_mode = if attributes.contains(ObjAttributes::FORCE_ACCESS_CHECK) {
            ProcessorMode::UserMode
        } else {
            mode
        };
        let object_type = object.object_type().clone();
        let procedures = object_type.procedures();
        let process_id = process.id();

        let mut locked = object.lock_exclusive();
        let new_object = self.charge_quota_for_object(object, &mut locked, process)?;
        check_exclusive(object, &locked, attributes, process_id)?;

        if !access_mode.is_kernel() && object.is_kernel_exclusive() {
            return Err(ObError::AccessDenied);
        }

        // The object can't be reopened once its last handle went away
        if object.handle_count() == 0
            && !new_object
            && object_type.info().maintain_handle_count
            && !procedures.contains(ObjectProcedures::OPEN)
            && procedures.contains(ObjectProcedures::CLOSE)
        {
            return Err(ObError::Unsuccessful);
        }

        let needs_check = match reason {
            OpenReason::Open => true,
            OpenReason::Duplicate => access_state.is_some(),
            OpenReason::Create | OpenReason::Inherit => false,
        };
        if needs_check {
            if let Some(state) = access_state.as_deref_mut() {
                drop(locked);
                self.check_object_access(object, state, access_mode)?;
                locked = object.lock_exclusive();
                check_exclusive(object, &locked, attributes, process_id)?;
            }
        }

        if reason == OpenReason::Create {
            if let Some(state) = access_state.as_deref_mut() {
                if state.remaining_desired_access & special_rights::MAXIMUM_ALLOWED != 0 {
                    state.remaining_desired_access &= !special_rights::MAXIMUM_ALLOWED;
                    state.remaining_desired_access |= generic_rights::GENERIC_ALL;
                }
                state.remaining_desired_access = object_type
                    .generic_mapping()
                    .map_generic(state.remaining_desired_access);

                if state.remaining_desired_access & special_rights::ACCESS_SYSTEM_SECURITY != 0 {
                    if !self
                        .validator()
                        .privilege_check(&state.subject, Privilege::Security, access_mode)
                    {
                        return Err(ObError::PrivilegeNotHeld);
                    }
                    state.privileges_used.push(Privilege::Security);
                    state.grant(special_rights::ACCESS_SYSTEM_SECURITY);
                }
            }
        }

        let took_ownership =
            attributes.contains(ObjAttributes::EXCLUSIVE) && locked.exclusive_process.is_none();
        if took_ownership {
            locked.exclusive_process = Some(process_id);
        }
        object.increment_handle_count();

        let mut process_handle_count = 0;
        if object_type.info().maintain_handle_count {
            let info = locked.handle_info.get_or_insert_with(HandleInfo::default);
            match info.increment(process_id, self.pool(), object_type.info().pool_type) {
                Ok(count) => process_handle_count = count,
                Err(error) => {
                    object.decrement_handle_count();
                    if took_ownership {
                        locked.exclusive_process = None;
                    }
                    return Err(error);
                }
            }
            if !info.is_single_entry() {
                object.clear_flags(ObjectFlags::SINGLE_HANDLE_ENTRY);
            }
        }
        drop(locked);

        if procedures.contains(ObjectProcedures::OPEN) {
            let granted = access_state
                .as_deref()
                .map_or(0, |state| state.previously_granted_access);
            if let Err(error) = object_type.methods().open(
                reason,
                process_id,
                object,
                granted,
                process_handle_count,
            ) {
                let mut locked = object.lock_exclusive();
                let old = object.decrement_handle_count();
                if let Some(info) = locked.handle_info.as_mut() {
                    info.decrement(process_id);
                }
                if took_ownership || old == 1 {
                    locked.exclusive_process = None;
                }
                log::debug!(
                    "ob: open callback of {} refused object {}: {:?}",
                    object_type.name(),
                    object.id(),
                    error
                );
                return Err(error);
            }
        }

        if reason == OpenReason::Create {
            self.finalize_insertion(object);
        }
        object_type.handle_created();
        Ok(())
    }

    /// A created object becomes visible to type enumeration
    pub(crate) fn finalize_insertion(&self, object: &ObjectRef) {
        object.clear_flags(ObjectFlags::NEW_OBJECT);
        if object.creator_info().is_some() {
            object.object_type().insert_instance(object);
        }
    }

    /// Create a handle to `object` (ObpCreateHandle)
    ///
    /// The caller's pointer reference moves to the handle on success and
    /// stays with the caller on failure. `extra_references` more are taken
    /// for callers that keep using the object. A directory kept locked by
    /// `lookup` is released once the handle exists.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn create_handle(
        &self,
        reason: OpenReason,
        object: &ObjectRef,
        access_state: &mut AccessState,
        attributes: ObjAttributes,
        mode: ProcessorMode,
        extra_references: u32,
        lookup: Option<LookupContext<'_>>,
    ) -> ObResult<Handle> {
        let kernel_handle = attributes.contains(ObjAttributes::KERNEL_HANDLE) && mode.is_kernel();
        let process = if kernel_handle {
            self.system_process().clone()
        } else {
            self.current_process()
        };
        let table = if kernel_handle {
            self.reference_kernel_handle_table()?
        } else {
            self.reference_process_handle_table(&process)?
        };

        self.increment_handle_count(
            reason,
            &process,
            object,
            Some(&mut *access_state),
            mode,
            attributes,
        )?;

        let object_type = object.object_type();
        let granted_access = (access_state.remaining_desired_access
            | access_state.previously_granted_access)
            & (object_type.valid_access_mask() | special_rights::ACCESS_SYSTEM_SECURITY);
        let mut handle_attributes = attributes.handle_attributes();
        if access_state.generate_on_close {
            handle_attributes |= HandleAttributes::AUDIT_ON_CLOSE;
        }

        if extra_references != 0 {
            object.add_pointer_references(extra_references as i64);
        }
        let entry = HandleTableEntry::new(object.clone(), granted_access, handle_attributes);
        let created = table.create_entry(entry, access_state.maximum_audit_mask);
        drop(lookup);

        match created {
            Some(handle) => {
                if access_state.generate_audit {
                    let kind = match reason {
                        OpenReason::Create => AuditKind::Create,
                        OpenReason::Duplicate => AuditKind::Duplicate,
                        OpenReason::Open | OpenReason::Inherit => AuditKind::Open,
                    };
                    self.validator().audit(&AuditEvent {
                        kind,
                        object_id: object.id(),
                        type_name: object_type.name(),
                        process: process.id(),
                        access: granted_access,
                        success: true,
                    });
                }
                log::trace!(
                    "ob: handle {:?} -> object {} access {:#x}",
                    handle,
                    object.id(),
                    granted_access
                );
                Ok(handle)
            }
            None => {
                if extra_references != 0 {
                    object.remove_pointer_references(extra_references as i64);
                }
                self.decrement_handle_count(process.id(), object, granted_access);
                log::warn!("ob: handle table of process {} is full", process.id());
                Err(ObError::OutOfResources)
            }
        }
    }
}
