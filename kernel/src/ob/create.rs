//! Object Creation and Insertion
//!
//! Creating an object is two steps. [`ObjectManager::create_object`]
//! validates the request, captures it on the header and allocates the
//! object; nothing is visible yet and no quota is charged. Then
//! [`ObjectManager::insert_object`] puts the name in the namespace,
//! assigns security and creates the first handle, which charges the
//! quota. The creation reference becomes the handle's reference.
//!
//! # NT Functions
//!
//! - `ObCreateObject` / `ObpAllocateObject`
//! - `ObInsertObject`
//! - `NtCreateDirectoryObject`

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;

use super::attributes::{ObjAttributes, ObjectAttributes};
use super::config::SE_DEFAULT_SECURITY_QUOTA;
use super::directory::directory_access;
use super::handle::Handle;
use super::handle_db::HandleInfo;
use super::header::{
    CreatorInfo, HeaderInit, NameInfo, ObjectCreateInfo, ObjectFlags, ObjectHeader, ObjectRef,
    QuotaInfo,
};
use super::lookup::LookupOutcome;
use super::manager::ObjectManager;
use super::object_type::{ObjectType, OpenReason};
use super::status::{NtStatus, ObError, ObResult};
use crate::ke::ProcessorMode;
use crate::se::{AccessMask, AccessState, Privilege};

/// Result of [`ObjectManager::insert_object`]
#[derive(Debug)]
pub struct InsertOutcome {
    pub handle: Handle,
    /// `Success`, or `ObjectNameExists` when `OBJ_OPENIF` found the name
    /// taken and opened the existing object instead
    pub status: NtStatus,
    /// Referenced object, when the caller asked to keep one
    pub object: Option<ObjectRef>,
}

impl ObjectManager {
    /// Allocate a new object with the type's default charges (ObCreateObject)
    pub fn create_object(
        &self,
        object_type: &Arc<ObjectType>,
        attributes: &ObjectAttributes,
        mode: ProcessorMode,
        body: Box<dyn Any + Send + Sync>,
    ) -> ObResult<ObjectRef> {
        self.create_object_ex(
            object_type,
            attributes,
            mode,
            body,
            object_type.info().default_paged_pool_charge,
            object_type.info().default_non_paged_pool_charge,
        )
    }

    /// Allocate a new object with explicit pool charges
    pub fn create_object_ex(
        &self,
        object_type: &Arc<ObjectType>,
        attributes: &ObjectAttributes,
        mode: ProcessorMode,
        body: Box<dyn Any + Send + Sync>,
        paged_pool_charge: u32,
        non_paged_pool_charge: u32,
    ) -> ObResult<ObjectRef> {
        let info = object_type.info();
        let requested = attributes.attributes;
        if requested.intersects(info.invalid_attributes) {
            return Err(ObError::InvalidParameter);
        }

        let name = attributes.name.clone().filter(|name| !name.is_empty());
        if attributes.root_directory.is_some() && name.is_none() {
            return Err(ObError::ObjectNameInvalid);
        }

        let subject = self.current_subject();
        if requested.contains(ObjAttributes::PERMANENT)
            && !mode.is_kernel()
            && !self
                .validator()
                .privilege_check(&subject, Privilege::CreatePermanent, mode)
        {
            return Err(ObError::PrivilegeNotHeld);
        }

        let security_charge = attributes
            .security_descriptor
            .as_ref()
            .map_or(0, |descriptor| descriptor.len() as u32);
        let quota_info = if paged_pool_charge != info.default_paged_pool_charge
            || non_paged_pool_charge != info.default_non_paged_pool_charge
            || security_charge > SE_DEFAULT_SECURITY_QUOTA
            || requested.contains(ObjAttributes::EXCLUSIVE)
        {
            Some(QuotaInfo {
                paged_pool_charge,
                non_paged_pool_charge,
                security_descriptor_charge: security_charge,
            })
        } else {
            None
        };

        let mut flags = ObjectFlags::NEW_OBJECT;
        if mode.is_kernel() {
            flags |= ObjectFlags::KERNEL_OBJECT;
        }
        if requested.contains(ObjAttributes::PERMANENT) {
            flags |= ObjectFlags::PERMANENT_OBJECT;
        }
        if requested.contains(ObjAttributes::EXCLUSIVE) {
            flags |= ObjectFlags::EXCLUSIVE_OBJECT;
        }
        let handle_info = if info.maintain_handle_count {
            flags |= ObjectFlags::SINGLE_HANDLE_ENTRY;
            Some(HandleInfo::default())
        } else {
            None
        };

        let size = core::mem::size_of::<ObjectHeader>()
            + info.body_size as usize
            + name.as_ref().map_or(0, String::len);
        let pool_block = self
            .pool()
            .allocate(info.pool_type, size, object_type.pool_tag())
            .ok_or(ObError::OutOfResources)?;

        let object = Arc::new(ObjectHeader::new(HeaderInit {
            id: self.next_object_id(),
            object_type: object_type.clone(),
            flags,
            creator_info: info
                .maintain_type_list
                .then(|| CreatorInfo::new(subject.process)),
            name_info: name.as_ref().map(|_| NameInfo::new()),
            quota_info,
            handle_info,
            create_info: Some(ObjectCreateInfo {
                attributes: requested,
                name,
                root_directory: attributes.root_directory,
                security_descriptor: attributes.security_descriptor.clone(),
                creator_mode: mode,
            }),
            pool_block: Some(pool_block),
            body,
        }));
        object_type.object_created();

        log::trace!(
            "ob: created {} object {}",
            object_type.name(),
            object.id()
        );
        Ok(object)
    }

    /// Publish a created object and return its first handle (ObInsertObject)
    ///
    /// Consumes the creation reference, also on failure. With `reference`
    /// set the outcome carries one more reference for the caller.
    pub fn insert_object(
        &self,
        object: ObjectRef,
        access_state: Option<&mut AccessState>,
        desired_access: AccessMask,
        reference: bool,
    ) -> ObResult<InsertOutcome> {
        let Some(create_info) = object.take_create_info() else {
            self.dereference_object(object);
            return Err(ObError::InvalidParameter);
        };
        let object_type = object.object_type().clone();
        let mode = create_info.creator_mode;
        let attributes = create_info.attributes;
        let extra_references = u32::from(reference);

        let mut local_state;
        let access_state = match access_state {
            Some(state) => state,
            None => {
                local_state = self.create_access_state(desired_access, Some(&object_type));
                &mut local_state
            }
        };
        let subject = access_state.subject;
        let explicit = create_info.security_descriptor.as_ref();

        let Some(name) = create_info.name.as_deref() else {
            if object_type.info().security_required || explicit.is_some() {
                if let Err(error) = self.assign_object_security(&object, None, explicit, &subject) {
                    self.dereference_object(object);
                    return Err(error);
                }
            }
            return match self.create_handle(
                OpenReason::Create,
                &object,
                access_state,
                attributes,
                mode,
                extra_references,
                None,
            ) {
                Ok(handle) => Ok(InsertOutcome {
                    handle,
                    status: NtStatus::Success,
                    object: reference.then(|| object.clone()),
                }),
                Err(error) => {
                    self.dereference_object(object);
                    Err(error)
                }
            };
        };

        let root = match create_info.root_directory {
            Some(root) => match self.reference_object_by_handle(
                root,
                directory_access::DIRECTORY_CREATE_OBJECT,
                None,
                mode,
            ) {
                Ok((root, _)) => Some(root),
                Err(error) => {
                    self.dereference_object(object);
                    return Err(error);
                }
            },
            None => None,
        };
        let lookup = self.lookup_object_name(
            root.clone(),
            name,
            attributes,
            Some(&object_type),
            mode,
            access_state,
            Some(&object),
        );
        if let Some(root) = root {
            self.dereference_object(root);
        }

        match lookup {
            Err(error) => {
                self.dereference_object(object);
                Err(error)
            }

            Ok(LookupOutcome::Found(existing)) => {
                self.dereference_object(object);
                if !attributes.contains(ObjAttributes::OPENIF) {
                    self.dereference_object(existing);
                    return Err(ObError::NameCollision);
                }
                if !existing.is_type(&object_type) {
                    self.dereference_object(existing);
                    return Err(ObError::TypeMismatch);
                }

                match self.create_handle(
                    OpenReason::Open,
                    &existing,
                    access_state,
                    attributes,
                    mode,
                    extra_references,
                    None,
                ) {
                    Ok(handle) => Ok(InsertOutcome {
                        handle,
                        status: NtStatus::ObjectNameExists,
                        object: reference.then(|| existing.clone()),
                    }),
                    Err(error) => {
                        self.dereference_object(existing);
                        Err(error)
                    }
                }
            }

            Ok(LookupOutcome::Inserted(context)) => {
                let parent = context.directory().clone();
                if let Err(error) =
                    self.assign_object_security(&object, Some(&parent), explicit, &subject)
                {
                    drop(context);
                    self.remove_object_name(&object, true);
                    self.dereference_object(object);
                    return Err(error);
                }

                match self.create_handle(
                    OpenReason::Create,
                    &object,
                    access_state,
                    attributes,
                    mode,
                    extra_references,
                    Some(context),
                ) {
                    Ok(handle) => {
                        log::debug!(
                            "ob: inserted {} object {} as {}",
                            object_type.name(),
                            object.id(),
                            name
                        );
                        Ok(InsertOutcome {
                            handle,
                            status: NtStatus::Success,
                            object: reference.then(|| object.clone()),
                        })
                    }
                    Err(error) => {
                        self.remove_object_name(&object, true);
                        self.dereference_object(object);
                        Err(error)
                    }
                }
            }
        }
    }

    /// Create a directory object (NtCreateDirectoryObject)
    pub fn create_directory_object(
        &self,
        attributes: &ObjectAttributes,
        desired_access: AccessMask,
        mode: ProcessorMode,
    ) -> ObResult<Handle> {
        let directory_type = self
            .directory_object_type()
            .ok_or(ObError::InvalidParameter)?;
        let directory = self.create_object(
            &directory_type,
            attributes,
            mode,
            self.namespace().new_directory(),
        )?;
        let outcome = self.insert_object(directory, None, desired_access, false)?;
        Ok(outcome.handle)
    }
}
