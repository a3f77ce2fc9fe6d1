//! Object Security
//!
//! An object's security descriptor lives in the descriptor cache; the
//! header holds a fast reference to the cached entry. Callers that only
//! need to read a descriptor take a reference through the header's slot,
//! which costs no shared-counter update while the slot's budget lasts.
//!
//! Types that keep their own security (a `SECURITY` procedure) are asked
//! through their method instead; everything else runs
//! [`ObjectManager::default_object_method`].
//!
//! # NT Functions
//!
//! - `ObAssignSecurity` / `SeDefaultObjectMethod`
//! - `ObGetObjectSecurity` / `ObReleaseObjectSecurity`
//! - `ObpReferenceSecurityDescriptor`
//! - `ObCheckObjectAccess` / `ObCheckCreateObjectAccess`
//! - `ObpCheckTraverseAccess`
//! - `NtQuerySecurityObject` / `NtSetSecurityObject`

use alloc::sync::Arc;

use super::directory::directory_access;
use super::handle::Handle;
use super::header::ObjectRef;
use super::manager::ObjectManager;
use super::object_type::{SecurityOperation, SecurityOutcome};
use super::sdcache::CachedSecurityDescriptor;
use super::status::{ObError, ObResult};
use crate::ex::{FastReference, MAX_FAST_REFS};
use crate::ke::ProcessorMode;
use crate::se::{
    special_rights, standard_rights, AccessMask, AccessState, AuditEvent, AuditKind,
    GenericMapping, Privilege, SecurityDescriptor, SecurityInformation, SubjectContext,
};

/// Security descriptor handed out by [`ObjectManager::get_object_security`]
pub enum ObjectSecurity {
    /// Referenced cache entry of a default-security object
    Cached(Arc<CachedSecurityDescriptor>),
    /// Copy returned by a type's own security method
    Captured(SecurityDescriptor),
}

impl ObjectSecurity {
    pub fn descriptor(&self) -> &SecurityDescriptor {
        match self {
            ObjectSecurity::Cached(entry) => entry.descriptor(),
            ObjectSecurity::Captured(descriptor) => descriptor,
        }
    }
}

impl ObjectManager {
    /// Reference the descriptor attached to an object
    /// (ObpReferenceSecurityDescriptor)
    pub(crate) fn reference_object_security(
        &self,
        object: &ObjectRef,
    ) -> Option<Arc<CachedSecurityDescriptor>> {
        let slot = object.security_slot();
        match slot.reference() {
            FastReference::Empty => None,
            FastReference::Fast { object: entry, last } => {
                if last {
                    // Refill the budget for the next referencers
                    self.sd_cache().reference(&entry, MAX_FAST_REFS);
                    if !slot.add_additional(&entry, MAX_FAST_REFS) {
                        self.sd_cache().dereference(&entry, MAX_FAST_REFS);
                    }
                }
                Some(entry)
            }
            FastReference::Exhausted(_) => {
                // Swaps happen under the exclusive object lock
                let _locked = object.lock_shared();
                let entry = slot.object()?;
                self.sd_cache().reference(&entry, 1);
                Some(entry)
            }
        }
    }

    /// Give back a reference taken by `reference_object_security`
    pub(crate) fn release_security_reference(
        &self,
        object: &ObjectRef,
        entry: Arc<CachedSecurityDescriptor>,
    ) {
        if !object.security_slot().dereference(&entry) {
            self.sd_cache().dereference(&entry, 1);
        }
    }

    /// Drop what a slot swap handed back
    fn release_swapped(&self, swapped: Option<(Arc<CachedSecurityDescriptor>, u32)>) {
        if let Some((entry, unused)) = swapped {
            self.sd_cache().dereference(&entry, unused + 1);
        }
    }

    /// ObGetObjectSecurity
    pub fn get_object_security(&self, object: &ObjectRef) -> ObResult<Option<ObjectSecurity>> {
        let object_type = object.object_type().clone();
        if object_type.uses_default_security() {
            return Ok(self.reference_object_security(object).map(ObjectSecurity::Cached));
        }

        let info = SecurityInformation::OWNER
            | SecurityInformation::GROUP
            | SecurityInformation::DACL
            | SecurityInformation::SACL;
        match object_type
            .methods()
            .security(self, object, SecurityOperation::Query { info })?
        {
            SecurityOutcome::Descriptor(descriptor) => {
                Ok(Some(ObjectSecurity::Captured(descriptor)))
            }
            SecurityOutcome::Done => Ok(None),
        }
    }

    /// ObReleaseObjectSecurity
    pub fn release_object_security(&self, object: &ObjectRef, security: Option<ObjectSecurity>) {
        if let Some(ObjectSecurity::Cached(entry)) = security {
            self.release_security_reference(object, entry);
        }
    }

    /// Compute and attach the descriptor of a new object (ObAssignSecurity)
    pub(crate) fn assign_object_security(
        &self,
        object: &ObjectRef,
        parent: Option<&ObjectRef>,
        explicit: Option<&SecurityDescriptor>,
        subject: &SubjectContext,
    ) -> ObResult<()> {
        let parent_security = match parent {
            Some(parent) => self.get_object_security(parent)?,
            None => None,
        };

        let object_type = object.object_type().clone();
        let assigned = self.validator().assign_security(
            parent_security.as_ref().map(ObjectSecurity::descriptor),
            explicit,
            self.namespace().is_directory(object),
            subject,
            object_type.generic_mapping(),
        );
        if let Some(parent) = parent {
            self.release_object_security(parent, parent_security);
        }

        if let Some(descriptor) = assigned? {
            object_type.methods().security(
                self,
                object,
                SecurityOperation::Assign {
                    descriptor: &descriptor,
                },
            )?;
        }
        Ok(())
    }

    /// Security method for objects whose descriptor lives in the header
    /// (SeDefaultObjectMethod)
    pub fn default_object_method(
        &self,
        object: &ObjectRef,
        operation: SecurityOperation<'_>,
    ) -> ObResult<SecurityOutcome> {
        match operation {
            SecurityOperation::Assign { descriptor } => {
                let entry = self
                    .sd_cache()
                    .log_security_descriptor(descriptor.clone(), MAX_FAST_REFS + 1)?;
                let swapped = {
                    let _locked = object.lock_exclusive();
                    object.security_slot().swap(Some(entry))
                };
                self.release_swapped(swapped);
                Ok(SecurityOutcome::Done)
            }

            SecurityOperation::Query { info } => match self.reference_object_security(object) {
                Some(entry) => {
                    let result = entry.descriptor().query(info);
                    self.release_security_reference(object, entry);
                    Ok(SecurityOutcome::Descriptor(result?))
                }
                None => Ok(SecurityOutcome::Descriptor(SecurityDescriptor::from_parts(
                    0, None, None, None, None,
                )?)),
            },

            SecurityOperation::Set { info, modification } => loop {
                let current = self
                    .reference_object_security(object)
                    .ok_or(ObError::Unsupported)?;

                let merged = match current.descriptor().merge(info, modification) {
                    Ok(merged) => merged,
                    Err(error) => {
                        self.release_security_reference(object, current);
                        return Err(error.into());
                    }
                };
                let entry = match self
                    .sd_cache()
                    .log_security_descriptor(merged, MAX_FAST_REFS + 1)
                {
                    Ok(entry) => entry,
                    Err(error) => {
                        self.release_security_reference(object, current);
                        return Err(error);
                    }
                };

                let swapped = {
                    let _locked = object.lock_exclusive();
                    object
                        .security_slot()
                        .compare_swap(Some(&current), Some(entry))
                };
                self.release_security_reference(object, current);
                match swapped {
                    Ok(old) => {
                        self.release_swapped(old);
                        return Ok(SecurityOutcome::Done);
                    }
                    Err(unused) => {
                        // Someone else changed the descriptor; merge again
                        if let Some(entry) = unused {
                            self.sd_cache().dereference(&entry, MAX_FAST_REFS + 1);
                        }
                    }
                }
            },

            SecurityOperation::Delete => {
                let swapped = {
                    let _locked = object.lock_exclusive();
                    object.security_slot().swap(None)
                };
                self.release_swapped(swapped);
                Ok(SecurityOutcome::Done)
            }
        }
    }

    /// Release an object's descriptor at deletion
    pub(crate) fn delete_object_security(&self, object: &ObjectRef) {
        let object_type = object.object_type().clone();
        if object_type.uses_default_security() {
            if object.has_security_descriptor() {
                let swapped = object.security_slot().swap(None);
                self.release_swapped(swapped);
            }
            return;
        }

        if let Err(error) =
            object_type
                .methods()
                .security(self, object, SecurityOperation::Delete)
        {
            log::warn!(
                "ob: security delete for object {} failed: {:?}",
                object.id(),
                error
            );
        }
    }

    /// Decide an open against the object's descriptor (ObCheckObjectAccess)
    pub fn check_object_access(
        &self,
        object: &ObjectRef,
        access_state: &mut AccessState,
        mode: ProcessorMode,
    ) -> ObResult<AccessMask> {
        let security = self.get_object_security(object)?;
        let desired = access_state.remaining_desired_access;
        let object_type = object.object_type().clone();

        let result = self.validator().check_access(
            security.as_ref().map(ObjectSecurity::descriptor),
            access_state,
            desired,
            object_type.generic_mapping(),
            mode,
        );
        self.release_object_security(object, security);

        if access_state.generate_audit {
            self.validator().audit(&AuditEvent {
                kind: AuditKind::Open,
                object_id: object.id(),
                type_name: object_type.name(),
                process: access_state.subject.process,
                access: desired,
                success: result.is_ok(),
            });
        }
        Ok(result?)
    }

    /// Check `desired` on a directory without touching the caller's state
    fn check_directory_access(
        &self,
        directory: &ObjectRef,
        access_state: &AccessState,
        desired: AccessMask,
        mode: ProcessorMode,
    ) -> ObResult<()> {
        let security = self.get_object_security(directory)?;
        let mapping: GenericMapping = *directory.object_type().generic_mapping();
        let mut trial = AccessState::new(access_state.subject, desired, &mapping);

        let result = self.validator().check_access(
            security.as_ref().map(ObjectSecurity::descriptor),
            &mut trial,
            desired,
            &mapping,
            mode,
        );
        self.release_object_security(directory, security);

        let granted = result?;
        if granted & desired != desired {
            return Err(ObError::AccessDenied);
        }
        Ok(())
    }

    /// May the caller create an object in `directory`
    /// (ObCheckCreateObjectAccess)
    pub fn check_create_access(
        &self,
        directory: &ObjectRef,
        access_state: &AccessState,
        mode: ProcessorMode,
    ) -> ObResult<()> {
        self.check_directory_access(
            directory,
            access_state,
            directory_access::DIRECTORY_CREATE_OBJECT,
            mode,
        )
    }

    /// May the caller walk through `directory` (ObpCheckTraverseAccess)
    ///
    /// The change-notify privilege bypasses the check; the bypass is
    /// latched on the access state.
    pub fn check_traverse_access(
        &self,
        directory: &ObjectRef,
        access_state: &mut AccessState,
        mode: ProcessorMode,
    ) -> ObResult<()> {
        if access_state.traverse_privilege {
            return Ok(());
        }
        if self
            .validator()
            .privilege_check(&access_state.subject, Privilege::ChangeNotify, mode)
        {
            access_state.traverse_privilege = true;
            return Ok(());
        }
        self.check_directory_access(
            directory,
            access_state,
            directory_access::DIRECTORY_TRAVERSE,
            mode,
        )
    }

    /// Read parts of an object's descriptor (NtQuerySecurityObject)
    pub fn query_security_object(
        &self,
        handle: Handle,
        info: SecurityInformation,
        mode: ProcessorMode,
    ) -> ObResult<SecurityDescriptor> {
        let desired = query_security_access(info);
        let (object, _) = self.reference_object_by_handle(handle, desired, None, mode)?;
        let result = object
            .object_type()
            .methods()
            .security(self, &object, SecurityOperation::Query { info });
        self.dereference_object(object);

        match result? {
            SecurityOutcome::Descriptor(descriptor) => Ok(descriptor),
            SecurityOutcome::Done => Err(ObError::Unsupported),
        }
    }

    /// Replace parts of an object's descriptor (NtSetSecurityObject)
    pub fn set_security_object(
        &self,
        handle: Handle,
        info: SecurityInformation,
        modification: &SecurityDescriptor,
        mode: ProcessorMode,
    ) -> ObResult<()> {
        if info.is_empty() {
            return Err(ObError::InvalidParameter);
        }
        let desired = set_security_access(info);
        let (object, _) = self.reference_object_by_handle(handle, desired, None, mode)?;
        let result = object.object_type().methods().security(
            self,
            &object,
            SecurityOperation::Set { info, modification },
        );
        self.dereference_object(object);
        result.map(|_| ())
    }
}

/// Access needed to read the parts named by `info` (SeQuerySecurityAccessMask)
pub fn query_security_access(info: SecurityInformation) -> AccessMask {
    let mut access = 0;
    if info.intersects(
        SecurityInformation::OWNER | SecurityInformation::GROUP | SecurityInformation::DACL,
    ) {
        access |= standard_rights::READ_CONTROL;
    }
    if info.contains(SecurityInformation::SACL) {
        access |= special_rights::ACCESS_SYSTEM_SECURITY;
    }
    access
}

/// Access needed to change the parts named by `info` (SeSetSecurityAccessMask)
pub fn set_security_access(info: SecurityInformation) -> AccessMask {
    let mut access = 0;
    if info.intersects(SecurityInformation::OWNER | SecurityInformation::GROUP) {
        access |= standard_rights::WRITE_OWNER;
    }
    if info.contains(SecurityInformation::DACL) {
        access |= standard_rights::WRITE_DAC;
    }
    if info.contains(SecurityInformation::SACL) {
        access |= special_rights::ACCESS_SYSTEM_SECURITY;
    }
    access
}
