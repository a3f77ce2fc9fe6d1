//! Object Manager Queries
//!
//! Information classes answered about objects, handles, types and
//! directories, plus the one handle setting callers may change after
//! creation.
//!
//! # NT Functions
//!
//! - `NtQueryObject` (basic, name and type information)
//! - `NtSetInformationObject` (handle flags)
//! - `ObQueryNameString`
//! - `ObFindHandleForObject`
//! - `ObEnumerateObjectsByType`
//! - `NtQueryDirectoryObject`
//! - `NtQuerySystemInformation(SystemHandleInformation)`

use alloc::string::String;
use alloc::vec::Vec;

use super::attributes::HandleAttributes;
use super::directory::{directory_access, DirectoryEntrySnapshot};
use super::handle::Handle;
use super::header::{ObjectFlags, ObjectRef};
use super::manager::ObjectManager;
use super::namespace::{LookupContext, OBJ_NAME_PATH_SEPARATOR};
use super::object_type::{ObjectType, ObjectTypeSnapshot, ObjectTypeStats};
use super::status::{ObError, ObResult};
use crate::ex::{LockMode, RundownGuard};
use crate::ke::ProcessorMode;
use crate::ps::{Process, ProcessId};
use crate::se::AccessMask;

/// OBJECT_BASIC_INFORMATION
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectBasicInformation {
    pub attributes: HandleAttributes,
    pub granted_access: AccessMask,
    pub handle_count: i64,
    pub pointer_count: i64,
    pub paged_pool_charge: u32,
    pub non_paged_pool_charge: u32,
    pub type_name: String,
    pub name: Option<String>,
}

/// One row of the system handle list (SYSTEM_HANDLE_TABLE_ENTRY_INFO)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemHandleEntry {
    pub process: ProcessId,
    pub handle: Handle,
    pub object_id: u64,
    pub type_index: u32,
    pub granted_access: AccessMask,
    pub attributes: HandleAttributes,
}

impl ObjectManager {
    /// Basic information about the object behind `handle`
    pub fn query_object_basic_information(
        &self,
        handle: Handle,
        mode: ProcessorMode,
    ) -> ObResult<ObjectBasicInformation> {
        let (object, information) = self.reference_object_by_handle(handle, 0, None, mode)?;
        let object_type = object.object_type();

        let (paged_pool_charge, non_paged_pool_charge) = match object.quota_info() {
            Some(quota) => (quota.paged_pool_charge, quota.non_paged_pool_charge),
            None => (
                object_type.info().default_paged_pool_charge,
                object_type.info().default_non_paged_pool_charge,
            ),
        };
        let basic = ObjectBasicInformation {
            attributes: information.attributes,
            granted_access: information.granted_access,
            handle_count: object.handle_count(),
            // Without the reference taken for this query
            pointer_count: object.pointer_count() - 1,
            paged_pool_charge,
            non_paged_pool_charge,
            type_name: String::from(object_type.name()),
            name: object.name(),
        };
        self.dereference_object(object);
        Ok(basic)
    }

    /// Full path of an object (ObQueryNameString)
    ///
    /// The root directory is `\`; an object outside the namespace has an
    /// empty name.
    pub fn query_name_string(&self, object: &ObjectRef) -> ObResult<String> {
        if let Some(root) = self.root_directory() {
            if ObjectRef::ptr_eq(object, &root) {
                return Ok(String::from(OBJ_NAME_PATH_SEPARATOR));
            }
        }
        if object.directory().is_none() {
            return Ok(String::new());
        }

        let mut components: Vec<String> = Vec::new();
        let mut current = object.clone();
        loop {
            if let Some(root) = self.root_directory() {
                if ObjectRef::ptr_eq(&current, &root) {
                    break;
                }
            }
            let Some(name_info) = current.name_info() else {
                return Err(ObError::ObjectPathNotFound);
            };
            if !name_info.reference_query() {
                return Err(ObError::ObjectPathNotFound);
            }
            let parent = name_info.directory();
            components.push(name_info.name());
            name_info.dereference_query();

            match parent {
                Some(parent) => current = parent,
                // Removed from the namespace while the path was built
                None => return Err(ObError::ObjectPathNotFound),
            }
        }

        let mut path = String::new();
        for component in components.iter().rev() {
            path.push(OBJ_NAME_PATH_SEPARATOR);
            path.push_str(component);
        }
        Ok(path)
    }

    /// Snapshot of every registered type
    pub fn type_snapshots(&self) -> Vec<ObjectTypeSnapshot> {
        self.type_table()
            .types()
            .iter()
            .map(|object_type| object_type.snapshot())
            .collect()
    }

    /// Totals across all types
    pub fn type_stats(&self) -> ObjectTypeStats {
        let types = self.type_table().types();
        ObjectTypeStats {
            type_count: types.len(),
            total_objects: types.iter().map(|object_type| object_type.total_objects()).sum(),
            total_handles: types.iter().map(|object_type| object_type.total_handles()).sum(),
        }
    }

    /// Every handle in the system, kernel handles first
    pub fn system_handle_information(&self) -> Vec<SystemHandleEntry> {
        let mut tables = Vec::new();
        if let Some(kernel) = self.kernel_handle_table() {
            tables.push(kernel.clone());
        }
        tables.extend(self.handle_tables());

        let mut handles = Vec::new();
        for table in tables {
            let Some(_rundown) = RundownGuard::try_new(table.rundown()) else {
                continue;
            };
            for (handle, entry) in table.entries() {
                handles.push(SystemHandleEntry {
                    process: table.owner(),
                    handle,
                    object_id: entry.object.id(),
                    type_index: entry.object.object_type().index(),
                    granted_access: entry.granted_access,
                    attributes: entry.attributes,
                });
            }
        }
        handles
    }

    /// A handle `process` holds to `object` (ObFindHandleForObject)
    pub fn find_handle_for_object(&self, process: &Process, object: &ObjectRef) -> Option<Handle> {
        let table = self.reference_process_handle_table(process).ok()?;
        table
            .entries()
            .into_iter()
            .find(|(_, entry)| ObjectRef::ptr_eq(&entry.object, object))
            .map(|(handle, _)| handle)
    }

    /// Change the inherit and protect-from-close flags of a handle
    /// (NtSetInformationObject, ObjectHandleFlagInformation)
    pub fn set_handle_attributes(
        &self,
        handle: Handle,
        attributes: HandleAttributes,
        mode: ProcessorMode,
    ) -> ObResult<()> {
        if !(attributes - HandleAttributes::SETTABLE).is_empty() {
            return Err(ObError::InvalidParameter);
        }

        let process = self.current_process();
        let (table, index) = self.resolve_handle(&process, handle, mode)?;
        let mut locked = table.map_handle_to_entry(index).ok_or(ObError::InvalidHandle)?;
        let entry = locked.entry_mut();
        if attributes.contains(HandleAttributes::INHERIT)
            && entry.object.has_flag(ObjectFlags::EXCLUSIVE_OBJECT)
        {
            return Err(ObError::AccessDenied);
        }
        entry.attributes = (entry.attributes - HandleAttributes::SETTABLE) | attributes;
        Ok(())
    }

    /// Visit the live objects of a type (ObEnumerateObjectsByType)
    ///
    /// `visit` gets the object, its path, and its pointer and handle
    /// counts; returning false stops the walk.
    pub fn enumerate_objects_by_type(
        &self,
        object_type: &ObjectType,
        mut visit: impl FnMut(&ObjectRef, Option<String>, i64, i64) -> bool,
    ) -> ObResult<()> {
        if !object_type.info().maintain_type_list {
            return Err(ObError::Unsupported);
        }

        for candidate in object_type.instances() {
            let Some(object) = self.reference_object_safe(&candidate) else {
                continue;
            };
            let name = self
                .query_name_string(&object)
                .ok()
                .filter(|name| !name.is_empty());
            let keep_going = visit(
                &object,
                name,
                object.pointer_count() - 1,
                object.handle_count(),
            );
            self.dereference_object(object);
            if !keep_going {
                break;
            }
        }
        Ok(())
    }

    /// Entries of the directory behind `handle` (NtQueryDirectoryObject)
    pub fn query_directory_object(
        &self,
        handle: Handle,
        mode: ProcessorMode,
    ) -> ObResult<Vec<DirectoryEntrySnapshot>> {
        let directory_type = self.directory_object_type().ok_or(ObError::InvalidParameter)?;
        let (directory, _) = self.reference_object_by_handle(
            handle,
            directory_access::DIRECTORY_QUERY,
            Some(&directory_type),
            mode,
        )?;
        let entries = self.directory_entries(&directory);
        self.dereference_object(directory);
        entries
    }

    /// Entries of a referenced directory object
    pub fn directory_entries(
        &self,
        directory: &ObjectRef,
    ) -> ObResult<Vec<DirectoryEntrySnapshot>> {
        if !self.namespace().is_directory(directory) {
            return Err(ObError::TypeMismatch);
        }
        let context = LookupContext::new(self.namespace(), directory.clone(), LockMode::Shared);
        let snapshots = self
            .namespace()
            .entries(context.directory())
            .into_iter()
            .map(|(name, object)| {
                let is_directory = self.namespace().is_directory(&object);
                DirectoryEntrySnapshot::new(name, &object, is_directory)
            })
            .collect();
        drop(context);
        Ok(snapshots)
    }
}
