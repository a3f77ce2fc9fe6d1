//! Object Header Implementation
//!
//! Every kernel object is reached through an OBJECT_HEADER that carries
//! its counts, its type, and optional extension blocks.
//!
//! # Layout
//! ```text
//! +----------------------+
//! | CreatorInfo (opt)    |  <- creating process, type-list membership
//! | NameInfo (opt)       |  <- name, parent directory
//! | QuotaInfo (opt)      |  <- pool and security charges
//! +----------------------+
//! | OBJECT_HEADER        |  <- counts, type, flags, security descriptor
//! +----------------------+
//! | Object Body          |  <- type-specific data
//! +----------------------+
//! ```
//!
//! # Counts
//!
//! `pointer_count` keeps the object alive; `handle_count` counts handles
//! and never exceeds it. Both are plain atomics on the header. The `Arc`
//! behind [`ObjectRef`] only keeps the memory reachable; the object's
//! logical lifetime ends when `pointer_count` reaches zero and the
//! object manager deletes it.
//!
//! # Object lock
//!
//! Handle-count bookkeeping and exclusivity live in [`ObjectLockedState`].
//! It has no lock of its own: it is guarded by one of the type's
//! `OBJECT_LOCK_COUNT` push locks, picked by hashing the object id.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;
use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use spin::Mutex;

use super::attributes::ObjAttributes;
use super::handle::Handle;
use super::handle_db::HandleInfo;
use super::object_type::{ObjectType, OBJECT_LOCK_COUNT};
use super::sdcache::CachedSecurityDescriptor;
use crate::ex::{ExFastRef, ExPushLock, ExPushLockExclusiveGuard, ExPushLockSharedGuard};
use crate::ke::ProcessorMode;
use crate::mm::PoolBlock;
use crate::ps::{ProcessId, QuotaBlock};
use crate::se::SecurityDescriptor;

/// Shared reference to an object
pub type ObjectRef = Arc<ObjectHeader>;

bitflags::bitflags! {
    /// Object header flags (OB_FLAG_*)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u32 {
        /// Created but quota not yet charged
        const NEW_OBJECT = 0x01;
        /// Created from kernel mode
        const KERNEL_OBJECT = 0x02;
        /// User-mode handles are refused
        const KERNEL_ONLY_ACCESS = 0x04;
        /// At most one process may hold handles
        const EXCLUSIVE_OBJECT = 0x08;
        /// Survives its last handle
        const PERMANENT_OBJECT = 0x10;
        /// Descriptor charged at the default security quota
        const DEFAULT_SECURITY_QUOTA = 0x20;
        /// Handle-count database still holds a single inline entry
        const SINGLE_HANDLE_ENTRY = 0x40;
        /// Deleted on the thread that dropped the last reference
        const DELETED_INLINE = 0x80;
    }
}

/// Creator information (OBJECT_HEADER_CREATOR_INFO)
#[derive(Debug)]
pub struct CreatorInfo {
    pub creator_process: ProcessId,
    pub creator_back_trace_index: u16,
    /// Linked into the type's instance list
    in_type_list: AtomicBool,
}

impl CreatorInfo {
    pub fn new(creator_process: ProcessId) -> Self {
        Self {
            creator_process,
            creator_back_trace_index: 0,
            in_type_list: AtomicBool::new(false),
        }
    }

    pub fn in_type_list(&self) -> bool {
        self.in_type_list.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_type_list(&self, linked: bool) -> bool {
        self.in_type_list.swap(linked, Ordering::AcqRel)
    }
}

struct NameState {
    name: String,
    /// Referenced while the directory entry exists
    directory: Option<ObjectRef>,
}

/// Name information (OBJECT_HEADER_NAME_INFO)
pub struct NameInfo {
    state: Mutex<NameState>,
    /// Outstanding name queries
    query_references: AtomicU32,
}

impl NameInfo {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(NameState {
                name: String::new(),
                directory: None,
            }),
            query_references: AtomicU32::new(1),
        }
    }

    /// Name within the parent directory
    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    /// Parent directory, while the object is in the namespace
    pub fn directory(&self) -> Option<ObjectRef> {
        self.state.lock().directory.clone()
    }

    pub fn is_inserted(&self) -> bool {
        self.state.lock().directory.is_some()
    }

    pub(crate) fn set_entry(&self, directory: &ObjectRef, name: &str) {
        let mut state = self.state.lock();
        state.name = String::from(name);
        state.directory = Some(directory.clone());
    }

    /// Forget the parent directory; the name string stays for queries
    pub(crate) fn clear_directory(&self) -> Option<ObjectRef> {
        self.state.lock().directory.take()
    }

    /// ObpReferenceNameInfo
    pub(crate) fn reference_query(&self) -> bool {
        let mut count = self.query_references.load(Ordering::Acquire);
        loop {
            if count == 0 {
                return false;
            }
            match self.query_references.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
    }

    /// ObpDereferenceNameInfo
    pub(crate) fn dereference_query(&self) {
        self.query_references.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn query_references(&self) -> u32 {
        self.query_references.load(Ordering::Relaxed)
    }
}

impl Default for NameInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NameInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NameInfo")
            .field("name", &state.name)
            .field("inserted", &state.directory.is_some())
            .finish()
    }
}

/// Quota information (OBJECT_HEADER_QUOTA_INFO)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    pub paged_pool_charge: u32,
    pub non_paged_pool_charge: u32,
    pub security_descriptor_charge: u32,
}

/// Quota actually charged for an object
#[derive(Debug, Clone)]
pub struct QuotaCharge {
    pub block: Arc<QuotaBlock>,
    pub paged: u64,
    pub non_paged: u64,
}

/// State guarded by the object lock
#[derive(Debug, Default)]
pub struct ObjectLockedState {
    /// Per-process handle counts; present when the type maintains them
    pub handle_info: Option<HandleInfo>,
    /// Owner of an exclusive object
    pub exclusive_process: Option<ProcessId>,
    /// Where the object's quota went, once charged
    pub quota_charged: Option<QuotaCharge>,
}

/// Captured creation parameters (OBJECT_CREATE_INFORMATION)
///
/// Lives on the header between create and insert.
#[derive(Debug, Clone)]
pub struct ObjectCreateInfo {
    pub attributes: ObjAttributes,
    pub name: Option<String>,
    pub root_directory: Option<Handle>,
    pub security_descriptor: Option<SecurityDescriptor>,
    pub creator_mode: ProcessorMode,
}

/// Everything needed to build a header
pub(crate) struct HeaderInit {
    pub id: u64,
    pub object_type: Arc<ObjectType>,
    pub flags: ObjectFlags,
    pub creator_info: Option<CreatorInfo>,
    pub name_info: Option<NameInfo>,
    pub quota_info: Option<QuotaInfo>,
    pub handle_info: Option<HandleInfo>,
    pub create_info: Option<ObjectCreateInfo>,
    pub pool_block: Option<PoolBlock>,
    pub body: Box<dyn Any + Send + Sync>,
}

/// Object header
pub struct ObjectHeader {
    id: u64,
    /// Existence references
    pointer_count: AtomicI64,
    /// Handles
    handle_count: AtomicI64,
    object_type: Arc<ObjectType>,
    flags: AtomicU32,
    security_descriptor: ExFastRef<CachedSecurityDescriptor>,
    creator_info: Option<CreatorInfo>,
    name_info: Option<NameInfo>,
    quota_info: Option<QuotaInfo>,
    locked: UnsafeCell<ObjectLockedState>,
    create_info: Mutex<Option<ObjectCreateInfo>>,
    pool_block: Mutex<Option<PoolBlock>>,
    body: Box<dyn Any + Send + Sync>,
}

// Safety: `locked` is only reached through ObjectLockGuard, which holds
// the object's shard push lock
unsafe impl Sync for ObjectHeader {}
unsafe impl Send for ObjectHeader {}

impl ObjectHeader {
    pub(crate) fn new(init: HeaderInit) -> Self {
        Self {
            id: init.id,
            pointer_count: AtomicI64::new(1),
            handle_count: AtomicI64::new(0),
            object_type: init.object_type,
            flags: AtomicU32::new(init.flags.bits()),
            security_descriptor: ExFastRef::empty(),
            creator_info: init.creator_info,
            name_info: init.name_info,
            quota_info: init.quota_info,
            locked: UnsafeCell::new(ObjectLockedState {
                handle_info: init.handle_info,
                exclusive_process: None,
                quota_charged: None,
            }),
            create_info: Mutex::new(init.create_info),
            pool_block: Mutex::new(init.pool_block),
            body: init.body,
        }
    }

    /// Unique object id
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn object_type(&self) -> &Arc<ObjectType> {
        &self.object_type
    }

    /// Whether the object is of type `object_type`
    #[inline]
    pub fn is_type(&self, object_type: &ObjectType) -> bool {
        core::ptr::eq(Arc::as_ptr(&self.object_type), object_type)
    }

    #[inline]
    pub fn pointer_count(&self) -> i64 {
        self.pointer_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn handle_count(&self) -> i64 {
        self.handle_count.load(Ordering::Acquire)
    }

    /// Add `count` pointer references, returning the new count
    #[inline]
    pub(crate) fn add_pointer_references(&self, count: i64) -> i64 {
        self.pointer_count.fetch_add(count, Ordering::AcqRel) + count
    }

    /// Add one pointer reference unless the count is zero
    pub(crate) fn try_add_pointer_reference(&self) -> bool {
        let mut count = self.pointer_count.load(Ordering::Acquire);
        loop {
            if count <= 0 {
                return false;
            }
            match self.pointer_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => count = observed,
            }
        }
    }

    /// Drop `count` pointer references, returning the new count
    #[inline]
    pub(crate) fn remove_pointer_references(&self, count: i64) -> i64 {
        self.pointer_count.fetch_sub(count, Ordering::AcqRel) - count
    }

    /// ObpIncrHandleCount; returns the old count
    #[inline]
    pub(crate) fn increment_handle_count(&self) -> i64 {
        self.handle_count.fetch_add(1, Ordering::AcqRel)
    }

    /// ObpDecrHandleCount; returns the old count
    #[inline]
    pub(crate) fn decrement_handle_count(&self) -> i64 {
        self.handle_count.fetch_sub(1, Ordering::AcqRel)
    }

    #[inline]
    pub fn flags(&self) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn has_flag(&self, flag: ObjectFlags) -> bool {
        self.flags().contains(flag)
    }

    /// Set flags, returning the previous set
    #[inline]
    pub(crate) fn set_flags(&self, flag: ObjectFlags) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.fetch_or(flag.bits(), Ordering::AcqRel))
    }

    /// Clear flags, returning the previous set
    #[inline]
    pub(crate) fn clear_flags(&self, flag: ObjectFlags) -> ObjectFlags {
        ObjectFlags::from_bits_truncate(self.flags.fetch_and(!flag.bits(), Ordering::AcqRel))
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        self.has_flag(ObjectFlags::PERMANENT_OBJECT)
    }

    /// Kernel-exclusive objects refuse user-mode handles
    #[inline]
    pub fn is_kernel_exclusive(&self) -> bool {
        self.has_flag(ObjectFlags::KERNEL_ONLY_ACCESS)
    }

    /// Mark the object as reachable from kernel mode only
    pub fn set_kernel_exclusive(&self) {
        self.set_flags(ObjectFlags::KERNEL_ONLY_ACCESS);
    }

    pub fn creator_info(&self) -> Option<&CreatorInfo> {
        self.creator_info.as_ref()
    }

    pub fn name_info(&self) -> Option<&NameInfo> {
        self.name_info.as_ref()
    }

    pub fn quota_info(&self) -> Option<&QuotaInfo> {
        self.quota_info.as_ref()
    }

    /// Object name within its directory
    pub fn name(&self) -> Option<String> {
        self.name_info.as_ref().map(NameInfo::name).filter(|name| !name.is_empty())
    }

    /// Parent directory, if inserted in the namespace
    pub fn directory(&self) -> Option<ObjectRef> {
        self.name_info.as_ref().and_then(NameInfo::directory)
    }

    /// Fast-referenced security descriptor slot
    pub(crate) fn security_slot(&self) -> &ExFastRef<CachedSecurityDescriptor> {
        &self.security_descriptor
    }

    /// Whether a security descriptor is attached
    pub fn has_security_descriptor(&self) -> bool {
        !self.security_descriptor.is_empty()
    }

    /// Object body
    pub fn body<T: Any>(&self) -> Option<&T> {
        self.body.downcast_ref::<T>()
    }

    pub(crate) fn take_create_info(&self) -> Option<ObjectCreateInfo> {
        self.create_info.lock().take()
    }

    pub(crate) fn take_pool_block(&self) -> Option<PoolBlock> {
        self.pool_block.lock().take()
    }

    /// The shard push lock guarding this object
    #[inline]
    pub(crate) fn object_lock(&self) -> &ExPushLock {
        &self.object_type.object_locks[(self.id as usize) % OBJECT_LOCK_COUNT]
    }

    /// ObpLockObject
    pub(crate) fn lock_exclusive(&self) -> ObjectLockGuard<'_> {
        ObjectLockGuard {
            header: self,
            _hold: ExPushLockExclusiveGuard::new(self.object_lock()),
        }
    }

    /// ObpLockObjectShared
    pub(crate) fn lock_shared(&self) -> ObjectSharedGuard<'_> {
        ObjectSharedGuard {
            header: self,
            _hold: ExPushLockSharedGuard::new(self.object_lock()),
        }
    }

    /// Owner of an exclusive object
    pub fn exclusive_process(&self) -> Option<ProcessId> {
        self.lock_shared().exclusive_process
    }

    /// Handles `process` holds, when the type keeps a handle database
    pub fn process_handle_count(&self, process: ProcessId) -> Option<u32> {
        self.lock_shared()
            .handle_info
            .as_ref()
            .map(|info| info.count_for(process))
    }

    /// Quota charged for the object so far
    pub fn quota_charged(&self) -> Option<QuotaCharge> {
        self.lock_shared().quota_charged.clone()
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("id", &self.id)
            .field("type", &self.object_type.name())
            .field("pointer_count", &self.pointer_count())
            .field("handle_count", &self.handle_count())
            .field("flags", &self.flags())
            .field("name", &self.name())
            .finish()
    }
}

/// Exclusive hold on an object's lock
pub struct ObjectLockGuard<'a> {
    header: &'a ObjectHeader,
    _hold: ExPushLockExclusiveGuard<'a>,
}

impl Deref for ObjectLockGuard<'_> {
    type Target = ObjectLockedState;

    fn deref(&self) -> &ObjectLockedState {
        // Safety: the shard lock is held exclusive
        unsafe { &*self.header.locked.get() }
    }
}

impl DerefMut for ObjectLockGuard<'_> {
    fn deref_mut(&mut self) -> &mut ObjectLockedState {
        // Safety: the shard lock is held exclusive
        unsafe { &mut *self.header.locked.get() }
    }
}

/// Shared hold on an object's lock
pub struct ObjectSharedGuard<'a> {
    header: &'a ObjectHeader,
    _hold: ExPushLockSharedGuard<'a>,
}

impl Deref for ObjectSharedGuard<'_> {
    type Target = ObjectLockedState;

    fn deref(&self) -> &ObjectLockedState {
        // Safety: the shard lock is held shared; nobody holds it exclusive
        unsafe { &*self.header.locked.get() }
    }
}
