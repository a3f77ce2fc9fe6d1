//! Object Referencing
//!
//! Pointer references keep an object in existence. Every [`ObjectRef`]
//! handed out by these routines carries one; it is given back with
//! [`ObjectManager::dereference_object`].
//!
//! # NT Functions
//!
//! - `ObReferenceObject` / `ObReferenceObjectSafe`
//! - `ObDereferenceObject` / `ObDereferenceObjectDeferDelete`
//! - `ObReferenceObjectByPointer`
//! - `ObReferenceObjectByHandle`
//! - `ObReferenceObjectByName`
//! - `ObOpenObjectByName` / `ObOpenObjectByPointer`

use alloc::sync::Arc;

use super::attributes::{HandleAttributes, ObjAttributes, ObjectAttributes};
use super::handle::{Handle, HandleKind, PseudoHandle};
use super::header::ObjectRef;
use super::lookup::LookupOutcome;
use super::manager::ObjectManager;
use super::object_type::{ObjectType, OpenReason};
use super::status::{ObError, ObResult};
use crate::ke::ProcessorMode;
use crate::se::{AccessMask, AccessState, AuditEvent, AuditKind};

/// What a handle grants (OBJECT_HANDLE_INFORMATION)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleInformation {
    pub granted_access: AccessMask,
    pub attributes: HandleAttributes,
}

impl ObjectManager {
    /// Take another pointer reference (ObReferenceObject)
    pub fn reference_object(&self, object: &ObjectRef) -> ObjectRef {
        let count = object.add_pointer_references(1);
        log::trace!("ob: reference object {} -> {}", object.id(), count);
        object.clone()
    }

    /// Reference an object that may already be on its way out
    /// (ObReferenceObjectSafe); `None` once the count has reached zero
    pub fn reference_object_safe(&self, object: &ObjectRef) -> Option<ObjectRef> {
        if object.try_add_pointer_reference() {
            Some(object.clone())
        } else {
            None
        }
    }

    /// Drop a pointer reference (ObDereferenceObject)
    ///
    /// Returns the new count. The last dereference deletes the object,
    /// in line when the caller may block and deferred otherwise.
    pub fn dereference_object(&self, object: ObjectRef) -> i64 {
        let count = object.remove_pointer_references(1);
        log::trace!("ob: dereference object {} -> {}", object.id(), count);
        if count == 0 {
            self.delete_object(object);
        } else if count < 0 {
            log::error!("ob: pointer count of object {} underflowed", object.id());
        }
        count
    }

    /// Drop a pointer reference, never deleting in line
    /// (ObDereferenceObjectDeferDelete)
    pub fn dereference_object_deferred(&self, object: ObjectRef) -> i64 {
        let count = object.remove_pointer_references(1);
        if count == 0 {
            self.defer_object_deletion(object);
        } else if count < 0 {
            log::error!("ob: pointer count of object {} underflowed", object.id());
        }
        count
    }

    /// ObReferenceObjectByPointer
    pub fn reference_object_by_pointer(
        &self,
        object: &ObjectRef,
        _desired_access: AccessMask,
        object_type: Option<&ObjectType>,
        _mode: ProcessorMode,
    ) -> ObResult<ObjectRef> {
        if let Some(object_type) = object_type {
            if !object.is_type(object_type) {
                return Err(ObError::TypeMismatch);
            }
        }
        Ok(self.reference_object(object))
    }

    /// ObReferenceObjectByHandle
    ///
    /// User-mode callers only get access the handle grants; kernel
    /// handles are invisible to them.
    pub fn reference_object_by_handle(
        &self,
        handle: Handle,
        desired_access: AccessMask,
        object_type: Option<&ObjectType>,
        mode: ProcessorMode,
    ) -> ObResult<(ObjectRef, HandleInformation)> {
        let process = self.current_process();

        if let HandleKind::Pseudo(pseudo) = handle.classify() {
            let object = match pseudo {
                PseudoHandle::CurrentProcess => self.context().current_process_object(),
                PseudoHandle::CurrentThread => self.context().current_thread_object(),
            }
            .ok_or(ObError::InvalidHandle)?;
            if let Some(object_type) = object_type {
                if !object.is_type(object_type) {
                    return Err(ObError::TypeMismatch);
                }
            }

            let valid_access = object.object_type().valid_access_mask();
            if !mode.is_kernel() && desired_access & !valid_access != 0 {
                return Err(ObError::AccessDenied);
            }
            let object = self.reference_object(&object);
            return Ok((
                object,
                HandleInformation {
                    granted_access: valid_access,
                    attributes: HandleAttributes::empty(),
                },
            ));
        }

        let (table, index) = self.resolve_handle(&process, handle, mode)?;
        let locked = table.map_handle_to_entry(index).ok_or(ObError::InvalidHandle)?;
        let entry = locked.entry();

        if let Some(object_type) = object_type {
            if !entry.object.is_type(object_type) {
                return Err(ObError::TypeMismatch);
            }
        }
        if !mode.is_kernel() && desired_access & !entry.granted_access != 0 {
            return Err(ObError::AccessDenied);
        }

        let first_use = locked.consume_audit_bits(desired_access);
        let information = HandleInformation {
            granted_access: entry.granted_access,
            attributes: entry.attributes,
        };
        let object = self.reference_object(&entry.object);
        drop(locked);

        // First use of audited access is reported once, outside the entry lock
        if first_use != 0 {
            self.validator().audit(&AuditEvent {
                kind: AuditKind::Reference,
                object_id: object.id(),
                type_name: object.object_type().name(),
                process: table.owner(),
                access: first_use,
                success: true,
            });
        }
        Ok((object, information))
    }

    /// ObReferenceObjectByName
    pub fn reference_object_by_name(
        &self,
        name: &str,
        attributes: ObjAttributes,
        access_state: Option<&mut AccessState>,
        desired_access: AccessMask,
        object_type: Option<&Arc<ObjectType>>,
        mode: ProcessorMode,
    ) -> ObResult<ObjectRef> {
        let mut local_state;
        let access_state = match access_state {
            Some(state) => state,
            None => {
                local_state = self.create_access_state(desired_access, object_type);
                &mut local_state
            }
        };

        let object = match self.lookup_object_name(
            None,
            name,
            attributes,
            object_type,
            mode,
            access_state,
            None,
        )? {
            LookupOutcome::Found(object) => object,
            LookupOutcome::Inserted(_) => return Err(ObError::InvalidParameter),
        };

        if let Some(object_type) = object_type {
            if !object.is_type(object_type) {
                self.dereference_object(object);
                return Err(ObError::TypeMismatch);
            }
        }
        Ok(object)
    }

    /// Open an object by name and return a handle to it (ObOpenObjectByName)
    pub fn open_object_by_name(
        &self,
        attributes: &ObjectAttributes,
        object_type: Option<&Arc<ObjectType>>,
        mode: ProcessorMode,
        desired_access: AccessMask,
    ) -> ObResult<Handle> {
        let name = attributes.name.as_deref().ok_or(ObError::ObjectNameInvalid)?;
        let mut access_state = self.create_access_state(desired_access, object_type);

        let root = match attributes.root_directory {
            Some(root) => Some(self.reference_object_by_handle(root, 0, None, mode)?.0),
            None => None,
        };
        let result = self.lookup_object_name(
            root.clone(),
            name,
            attributes.attributes,
            object_type,
            mode,
            &mut access_state,
            None,
        );
        if let Some(root) = root {
            self.dereference_object(root);
        }

        let object = match result? {
            LookupOutcome::Found(object) => object,
            LookupOutcome::Inserted(_) => return Err(ObError::InvalidParameter),
        };
        if let Some(object_type) = object_type {
            if !object.is_type(object_type) {
                self.dereference_object(object);
                return Err(ObError::TypeMismatch);
            }
        }

        match self.create_handle(
            OpenReason::Open,
            &object,
            &mut access_state,
            attributes.attributes,
            mode,
            0,
            None,
        ) {
            Ok(handle) => Ok(handle),
            Err(error) => {
                self.dereference_object(object);
                Err(error)
            }
        }
    }

    /// Open a handle to an object the caller already references
    /// (ObOpenObjectByPointer)
    pub fn open_object_by_pointer(
        &self,
        object: &ObjectRef,
        attributes: ObjAttributes,
        access_state: Option<&mut AccessState>,
        desired_access: AccessMask,
        object_type: Option<&Arc<ObjectType>>,
        mode: ProcessorMode,
    ) -> ObResult<Handle> {
        let object = self.reference_object_by_pointer(
            object,
            0,
            object_type.map(|object_type| object_type.as_ref()),
            mode,
        )?;

        let mut local_state;
        let access_state = match access_state {
            Some(state) => state,
            None => {
                local_state = self.create_access_state(desired_access, Some(object.object_type()));
                &mut local_state
            }
        };

        match self.create_handle(
            OpenReason::Open,
            &object,
            access_state,
            attributes,
            mode,
            0,
            None,
        ) {
            Ok(handle) => Ok(handle),
            Err(error) => {
                self.dereference_object(object);
                Err(error)
            }
        }
    }

    /// SeCreateAccessState for the current subject
    pub fn create_access_state(
        &self,
        desired_access: AccessMask,
        object_type: Option<&Arc<ObjectType>>,
    ) -> AccessState {
        let mapping = object_type
            .map(|object_type| *object_type.generic_mapping())
            .unwrap_or_default();
        AccessState::new(self.current_subject(), desired_access, &mapping)
    }
}
