//! Object Type Implementation
//!
//! Each class of object (Process, Thread, Event, File, Directory, ...) is
//! described by an OBJECT_TYPE that defines:
//! - Type name and pool tag
//! - Pool type and default quota charges
//! - Valid access mask and generic mapping
//! - Type-specific callbacks (open, close, delete, parse, security)
//! - The lock shards that guard its objects' headers
//!
//! A type is itself an object. The first type created, `Type`, is its
//! own type; every later type object is an instance of it and is
//! inserted into `\ObjectTypes` once that directory exists.
//!
//! # Callbacks
//!
//! Callbacks are the [`ObjectTypeMethods`] trait. No object lock or type
//! lock is held while one runs. A type reports the callbacks it really
//! implements through [`ObjectTypeMethods::procedures`]; the object
//! manager consults that set where NT tests a procedure pointer for NULL.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Once, RwLock};

use super::attributes::ObjAttributes;
use super::handle_db::HandleInfo;
use super::header::{
    CreatorInfo, HeaderInit, NameInfo, ObjectFlags, ObjectHeader, ObjectRef,
};
use super::manager::ObjectManager;
use super::namespace::LookupContext;
use super::status::{ObError, ObResult};
use crate::ex::{ExPushLock, LockMode};
use crate::ke::ProcessorMode;
use crate::mm::{make_tag, pool_tags, PoolTag, PoolType};
use crate::ps::ProcessId;
use crate::se::{
    standard_rights, AccessMask, AccessState, GenericMapping, SecurityDescriptor,
    SecurityInformation,
};

/// Lock shards per type
pub const OBJECT_LOCK_COUNT: usize = 8;

/// Maximum type name length
pub const OB_MAX_TYPE_NAME: usize = 64;

/// Access rights on type objects
pub mod object_type_access {
    use crate::se::{standard_rights, GenericMapping};

    pub const OBJECT_TYPE_CREATE: u32 = 0x0001;
    pub const OBJECT_TYPE_ALL_ACCESS: u32 = standard_rights::STANDARD_RIGHTS_REQUIRED | 0x1;

    pub const GENERIC_MAPPING: GenericMapping = GenericMapping::new(
        standard_rights::STANDARD_RIGHTS_READ,
        standard_rights::STANDARD_RIGHTS_WRITE,
        standard_rights::STANDARD_RIGHTS_EXECUTE,
        OBJECT_TYPE_ALL_ACCESS,
    );
}

bitflags::bitflags! {
    /// Callbacks a type actually implements
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectProcedures: u32 {
        const OPEN = 0x01;
        const CLOSE = 0x02;
        const DELETE = 0x04;
        const PARSE = 0x08;
        /// Replaces the default security method
        const SECURITY = 0x10;
    }
}

/// Why a handle is being created (OB_OPEN_REASON)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    Create,
    Open,
    Duplicate,
    Inherit,
}

/// Security method operation (SECURITY_OPERATION_CODE)
#[derive(Debug, Clone, Copy)]
pub enum SecurityOperation<'a> {
    Set {
        info: SecurityInformation,
        modification: &'a SecurityDescriptor,
    },
    Query {
        info: SecurityInformation,
    },
    Delete,
    Assign {
        descriptor: &'a SecurityDescriptor,
    },
}

/// Result of a security method call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityOutcome {
    Done,
    Descriptor(SecurityDescriptor),
}

/// State handed to a parse callback
pub struct ParseContext<'a> {
    /// Path left after the object being parsed, without a leading `\`
    pub remaining_name: &'a str,
    pub attributes: ObjAttributes,
    pub mode: ProcessorMode,
    pub access_state: &'a mut AccessState,
}

/// Type-specific callbacks
pub trait ObjectTypeMethods: Send + Sync {
    /// Callbacks this type implements
    fn procedures(&self) -> ObjectProcedures {
        ObjectProcedures::empty()
    }

    /// A handle is being created; failure undoes the handle
    fn open(
        &self,
        _reason: OpenReason,
        _process: ProcessId,
        _object: &ObjectRef,
        _granted_access: AccessMask,
        _process_handle_count: u32,
    ) -> ObResult<()> {
        Ok(())
    }

    /// A handle was closed; `system_handle_count` is the object's handle
    /// count before this close
    fn close(
        &self,
        _process: ProcessId,
        _object: &ObjectRef,
        _granted_access: AccessMask,
        _process_handle_count: u32,
        _system_handle_count: u32,
    ) -> ObResult<()> {
        Ok(())
    }

    /// The object is being deleted
    fn delete(&self, _object: &ObjectHeader) {}

    /// Resolve `context.remaining_name` inside `object`
    ///
    /// Returns a referenced object.
    fn parse(
        &self,
        _ob: &ObjectManager,
        _object: &ObjectRef,
        _context: &mut ParseContext<'_>,
    ) -> ObResult<ObjectRef> {
        Err(ObError::ObjectPathNotFound)
    }

    /// Security method; defaults to SeDefaultObjectMethod
    fn security(
        &self,
        ob: &ObjectManager,
        object: &ObjectRef,
        operation: SecurityOperation<'_>,
    ) -> ObResult<SecurityOutcome> {
        ob.default_object_method(object, operation)
    }
}

/// Type without callbacks
pub struct DefaultMethods;

impl ObjectTypeMethods for DefaultMethods {}

/// Parameters of a new type (OBJECT_TYPE_INITIALIZER)
#[derive(Debug, Clone, Copy)]
pub struct ObjectTypeInitializer {
    /// Attributes objects of this type may not be created with
    pub invalid_attributes: ObjAttributes,
    pub generic_mapping: GenericMapping,
    pub valid_access_mask: AccessMask,
    /// Objects always carry a security descriptor
    pub security_required: bool,
    /// Keep per-process handle counts
    pub maintain_handle_count: bool,
    /// Track live instances on the type
    pub maintain_type_list: bool,
    /// Waits go through the shared default object
    pub use_default_object: bool,
    pub pool_type: PoolType,
    pub default_paged_pool_charge: u32,
    pub default_non_paged_pool_charge: u32,
    pub case_insensitive: bool,
    /// Size of the object body
    pub body_size: u32,
}

impl Default for ObjectTypeInitializer {
    fn default() -> Self {
        Self {
            invalid_attributes: ObjAttributes::empty(),
            generic_mapping: GenericMapping::default(),
            valid_access_mask: standard_rights::STANDARD_RIGHTS_ALL
                | standard_rights::SPECIFIC_RIGHTS_ALL,
            security_required: false,
            maintain_handle_count: false,
            maintain_type_list: false,
            use_default_object: true,
            pool_type: PoolType::NonPagedPool,
            default_paged_pool_charge: 0,
            default_non_paged_pool_charge: 0,
            case_insensitive: true,
            body_size: 0,
        }
    }
}

/// Per-object metadata charged on top of the body
pub fn standard_header_charge(maintain_handle_count: bool) -> u32 {
    let mut charge = core::mem::size_of::<ObjectHeader>() + core::mem::size_of::<NameInfo>();
    if maintain_handle_count {
        charge += core::mem::size_of::<HandleInfo>();
    }
    charge as u32
}

/// Pool tag made from the first four bytes of a type name
pub fn type_pool_tag(name: &str) -> PoolTag {
    let mut key = [b' '; 4];
    for (slot, byte) in key.iter_mut().zip(name.bytes()) {
        *slot = byte;
    }
    make_tag(key[0], key[1], key[2], key[3])
}

/// Object type descriptor (OBJECT_TYPE)
pub struct ObjectType {
    name: String,
    /// Index in the type table, starting at 1 for `Type`
    index: u32,
    /// Pool tag for objects of this type
    key: PoolTag,
    info: ObjectTypeInitializer,
    methods: Box<dyn ObjectTypeMethods>,
    /// Object lock shards
    pub(crate) object_locks: [ExPushLock; OBJECT_LOCK_COUNT],
    /// Live instances keyed by object id (guarded by the type mutex)
    type_list: RwLock<BTreeMap<u64, Weak<ObjectHeader>>>,
    total_objects: AtomicU32,
    total_handles: AtomicU32,
    high_water_objects: AtomicU32,
    high_water_handles: AtomicU32,
    /// The type's own object
    header: Once<Weak<ObjectHeader>>,
}

impl ObjectType {
    fn new(
        name: &str,
        index: u32,
        key: PoolTag,
        info: ObjectTypeInitializer,
        methods: Box<dyn ObjectTypeMethods>,
    ) -> Self {
        Self {
            name: String::from(name),
            index,
            key,
            info,
            methods,
            object_locks: core::array::from_fn(|_| ExPushLock::new()),
            type_list: RwLock::new(BTreeMap::new()),
            total_objects: AtomicU32::new(0),
            total_handles: AtomicU32::new(0),
            high_water_objects: AtomicU32::new(0),
            high_water_handles: AtomicU32::new(0),
            header: Once::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn pool_tag(&self) -> PoolTag {
        self.key
    }

    pub fn info(&self) -> &ObjectTypeInitializer {
        &self.info
    }

    pub fn methods(&self) -> &dyn ObjectTypeMethods {
        self.methods.as_ref()
    }

    pub fn procedures(&self) -> ObjectProcedures {
        self.methods.procedures()
    }

    /// Whether the type runs the default security method
    pub fn uses_default_security(&self) -> bool {
        !self.procedures().contains(ObjectProcedures::SECURITY)
    }

    pub fn generic_mapping(&self) -> &GenericMapping {
        &self.info.generic_mapping
    }

    pub fn valid_access_mask(&self) -> AccessMask {
        self.info.valid_access_mask
    }

    /// The object that represents this type
    pub fn object(&self) -> Option<ObjectRef> {
        self.header.get().and_then(Weak::upgrade)
    }

    pub fn total_objects(&self) -> u32 {
        self.total_objects.load(Ordering::Relaxed)
    }

    pub fn total_handles(&self) -> u32 {
        self.total_handles.load(Ordering::Relaxed)
    }

    pub fn high_water_objects(&self) -> u32 {
        self.high_water_objects.load(Ordering::Relaxed)
    }

    pub fn high_water_handles(&self) -> u32 {
        self.high_water_handles.load(Ordering::Relaxed)
    }

    pub(crate) fn object_created(&self) {
        let total = self.total_objects.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water_objects.fetch_max(total, Ordering::Relaxed);
    }

    pub(crate) fn object_deleted(&self) {
        self.total_objects.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn handle_created(&self) {
        let total = self.total_handles.fetch_add(1, Ordering::Relaxed) + 1;
        self.high_water_handles.fetch_max(total, Ordering::Relaxed);
    }

    pub(crate) fn handle_closed(&self) {
        self.total_handles.fetch_sub(1, Ordering::Relaxed);
    }

    /// Link an object's creator info into the instance list
    pub(crate) fn insert_instance(&self, object: &ObjectRef) {
        if let Some(creator) = object.creator_info() {
            let mut list = self.type_list.write();
            if !creator.set_in_type_list(true) {
                list.insert(object.id(), Arc::downgrade(object));
            }
        }
    }

    /// Unlink an object from the instance list
    pub(crate) fn remove_instance(&self, object: &ObjectHeader) {
        if let Some(creator) = object.creator_info() {
            let mut list = self.type_list.write();
            if creator.set_in_type_list(false) {
                list.remove(&object.id());
            }
        }
    }

    /// Ids of the live instances on the type list
    pub fn instance_ids(&self) -> Vec<u64> {
        self.type_list.read().keys().copied().collect()
    }

    /// Instances on the type list, still reachable in memory
    pub(crate) fn instances(&self) -> Vec<ObjectRef> {
        self.type_list
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn snapshot(&self) -> ObjectTypeSnapshot {
        ObjectTypeSnapshot {
            index: self.index,
            name: self.name.clone(),
            total_objects: self.total_objects(),
            total_handles: self.total_handles(),
            high_water_objects: self.high_water_objects(),
            high_water_handles: self.high_water_handles(),
            pool_type: self.info.pool_type,
            valid_access_mask: self.info.valid_access_mask,
            invalid_attributes: self.info.invalid_attributes,
            default_paged_pool_charge: self.info.default_paged_pool_charge,
            default_non_paged_pool_charge: self.info.default_non_paged_pool_charge,
            maintain_handle_count: self.info.maintain_handle_count,
        }
    }
}

impl fmt::Debug for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectType")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("total_objects", &self.total_objects())
            .field("total_handles", &self.total_handles())
            .finish()
    }
}

/// Global type table (ObpObjectTypes)
pub struct TypeTable {
    slots: RwLock<Vec<Arc<ObjectType>>>,
    capacity: usize,
    next_index: AtomicU32,
}

impl TypeTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            capacity,
            next_index: AtomicU32::new(1),
        }
    }

    fn allocate_index(&self) -> u32 {
        self.next_index.fetch_add(1, Ordering::AcqRel)
    }

    /// Publish a type; types past the capacity stay unindexed
    fn publish(&self, object_type: &Arc<ObjectType>) {
        if (object_type.index() as usize) <= self.capacity {
            self.slots.write().push(object_type.clone());
        } else {
            log::warn!(
                "ob: type table full, {} (index {}) not indexed",
                object_type.name(),
                object_type.index()
            );
        }
    }

    /// Type by index (1-based)
    pub fn get(&self, index: u32) -> Option<Arc<ObjectType>> {
        self.slots
            .read()
            .iter()
            .find(|object_type| object_type.index() == index)
            .cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ObjectType>> {
        self.slots
            .read()
            .iter()
            .find(|object_type| object_type.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn types(&self) -> Vec<Arc<ObjectType>> {
        self.slots.read().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Snapshot of an object type
#[derive(Debug, Clone)]
pub struct ObjectTypeSnapshot {
    pub index: u32,
    pub name: String,
    pub total_objects: u32,
    pub total_handles: u32,
    pub high_water_objects: u32,
    pub high_water_handles: u32,
    pub pool_type: PoolType,
    pub valid_access_mask: AccessMask,
    pub invalid_attributes: ObjAttributes,
    pub default_paged_pool_charge: u32,
    pub default_non_paged_pool_charge: u32,
    pub maintain_handle_count: bool,
}

/// Object type statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectTypeStats {
    /// Number of registered object types
    pub type_count: usize,
    /// Total objects across all types
    pub total_objects: u32,
    /// Total handles across all types
    pub total_handles: u32,
}

impl ObjectManager {
    /// Register a new object type (ObCreateObjectType)
    pub fn create_object_type(
        &self,
        name: &str,
        initializer: ObjectTypeInitializer,
        methods: Box<dyn ObjectTypeMethods>,
    ) -> ObResult<Arc<ObjectType>> {
        let procedures = methods.procedures();
        if name.is_empty()
            || name.len() > OB_MAX_TYPE_NAME
            || !(initializer.invalid_attributes - ObjAttributes::VALID).is_empty()
            || (initializer.maintain_handle_count
                && !procedures.intersects(ObjectProcedures::OPEN | ObjectProcedures::CLOSE))
            || (!initializer.use_default_object && initializer.pool_type != PoolType::NonPagedPool)
        {
            return Err(ObError::InvalidParameter);
        }
        if name.contains('\\') {
            return Err(ObError::ObjectNameInvalid);
        }

        // The type directory stays locked until the new type is inserted
        let type_directory = self.type_directory();
        let context = type_directory.as_ref().map(|directory| {
            LookupContext::new(self.namespace(), directory.clone(), LockMode::Exclusive)
        });
        if let Some(context) = context.as_ref() {
            if context.lookup(name, true).is_some() {
                return Err(ObError::NameCollision);
            }
        }

        let mut info = initializer;
        if self.config().maintain_type_lists {
            info.maintain_type_list = true;
        }
        let header_charge = standard_header_charge(info.maintain_handle_count);
        if info.pool_type.is_paged() {
            info.default_paged_pool_charge += header_charge;
        } else {
            info.default_non_paged_pool_charge += header_charge;
        }
        if info.use_default_object {
            info.valid_access_mask |= standard_rights::SYNCHRONIZE;
        }

        let type_type = self.type_object_type();
        let key = if type_type.is_none() {
            pool_tags::TAG_OBJECT_TYPE
        } else {
            type_pool_tag(name)
        };
        let index = self.type_table().allocate_index();
        let new_type = Arc::new(ObjectType::new(name, index, key, info, methods));

        // The first type is its own type
        let owner_type = type_type.unwrap_or_else(|| new_type.clone());
        let header = self.allocate_type_object(&owner_type, &new_type)?;
        new_type.header.call_once(|| Arc::downgrade(&header));

        owner_type.insert_instance(&header);
        self.type_table().publish(&new_type);

        if let Some(context) = context.as_ref() {
            if !self.insert_directory_entry(context, name, &header, true) {
                log::warn!("ob: type {} not inserted into the type directory", name);
            }
        }
        self.retain_permanent(header);

        log::debug!("ob: registered object type {} (index {})", name, index);
        Ok(new_type)
    }

    /// Header and pool storage of a type object
    fn allocate_type_object(
        &self,
        type_type: &Arc<ObjectType>,
        new_type: &Arc<ObjectType>,
    ) -> ObResult<ObjectRef> {
        let size = core::mem::size_of::<ObjectHeader>() + core::mem::size_of::<ObjectType>();
        let pool_block = self
            .pool()
            .allocate(PoolType::NonPagedPool, size, type_type.pool_tag())
            .ok_or(ObError::OutOfResources)?;

        let creator_info = if type_type.info().maintain_type_list {
            Some(CreatorInfo::new(ProcessId::SYSTEM))
        } else {
            None
        };
        let header = Arc::new(ObjectHeader::new(HeaderInit {
            id: self.next_object_id(),
            object_type: type_type.clone(),
            flags: ObjectFlags::KERNEL_OBJECT | ObjectFlags::PERMANENT_OBJECT,
            creator_info,
            name_info: Some(NameInfo::new()),
            quota_info: None,
            handle_info: None,
            create_info: None,
            pool_block: Some(pool_block),
            body: Box::new(new_type.clone()),
        }));
        type_type.object_created();
        Ok(header)
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;

    /// Free-standing type for unit tests that need headers
    pub(crate) fn test_type(
        name: &str,
        initializer: ObjectTypeInitializer,
        methods: Box<dyn ObjectTypeMethods>,
    ) -> Arc<ObjectType> {
        Arc::new(ObjectType::new(name, 99, type_pool_tag(name), initializer, methods))
    }
}
