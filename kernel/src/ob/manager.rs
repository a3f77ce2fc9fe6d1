//! Object Manager Instance
//!
//! [`ObjectManager`] owns the object manager's singletons: the type table,
//! the security descriptor cache, the kernel handle table, the deferred
//! deletion list and the bootstrap namespace. Everything it needs from
//! the rest of the kernel arrives as [`Collaborators`].
//!
//! # Initialization (ObInitSystem)
//!
//! 1. `Type`, the type of type objects (its own type)
//! 2. `Directory`
//! 3. `\`, the root directory
//! 4. `\ObjectTypes`, which then receives every type created so far
//! 5. The kernel handle table
//!
//! The operations themselves are spread over the sibling modules as
//! further `impl ObjectManager` blocks.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, Once};

use super::attributes::{ObjAttributes, ObjectAttributes};
use super::config::ObConfig;
use super::delete::DeferredDeletions;
use super::directory::{directory_access, DirectoryNamespace};
use super::handle::HandleTable;
use super::header::{ObjectFlags, ObjectRef};
use super::namespace::{LookupContext, NamespaceStore};
use super::object_type::{
    object_type_access, DefaultMethods, ObjectType, ObjectTypeInitializer, TypeTable,
};
use super::sdcache::SecurityDescriptorCache;
use super::status::{ObError, ObResult};
use crate::ex::{LockMode, SystemWorkQueue, WorkQueue};
use crate::ke::ProcessorMode;
use crate::mm::{pool_tags, PoolAllocator, PoolType, SystemPool};
use crate::ps::{ExecutionContext, Process, ProcessId, SystemContext};
use crate::se::{AccessValidator, PermissiveValidator, SecurityDescriptor, SubjectContext};

/// Everything the object manager consumes from the rest of the kernel
#[derive(Clone)]
pub struct Collaborators {
    pub pool: Arc<dyn PoolAllocator>,
    pub validator: Arc<dyn AccessValidator>,
    pub namespace: Arc<dyn NamespaceStore>,
    pub context: Arc<dyn ExecutionContext>,
    pub work_queue: Arc<dyn WorkQueue>,
}

impl Collaborators {
    /// The in-kernel implementations, running as the System process
    pub fn system() -> Self {
        Self {
            pool: Arc::new(SystemPool::new()),
            validator: Arc::new(PermissiveValidator::new()),
            namespace: Arc::new(DirectoryNamespace::new()),
            context: Arc::new(SystemContext::new(Arc::new(Process::system()))),
            work_queue: Arc::new(SystemWorkQueue::new()),
        }
    }

    pub fn with_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = context;
        self
    }
}

/// The object manager
pub struct ObjectManager {
    this: Weak<ObjectManager>,
    config: ObConfig,
    pool: Arc<dyn PoolAllocator>,
    validator: Arc<dyn AccessValidator>,
    namespace: Arc<dyn NamespaceStore>,
    context: Arc<dyn ExecutionContext>,
    work_queue: Arc<dyn WorkQueue>,
    /// Owner of kernel handles (PsInitialSystemProcess)
    system_process: Arc<Process>,
    type_table: TypeTable,
    sd_cache: SecurityDescriptorCache,
    type_type: Once<Arc<ObjectType>>,
    directory_type: Once<Arc<ObjectType>>,
    root_directory: Once<ObjectRef>,
    type_directory: Once<ObjectRef>,
    kernel_table: Once<Arc<HandleTable>>,
    /// Process handle tables alive (HandleTableListHead)
    handle_tables: Mutex<Vec<Weak<HandleTable>>>,
    /// Bootstrap objects whose creation reference the manager keeps
    permanent: Mutex<Vec<ObjectRef>>,
    pub(crate) deferred: DeferredDeletions,
    next_object_id: AtomicU64,
}

impl ObjectManager {
    /// Build and initialize an object manager (ObInitSystem)
    pub fn new(config: ObConfig, collaborators: Collaborators) -> ObResult<Arc<Self>> {
        let current = collaborators.context.current_process();
        let system_process = if current.is_system() {
            current
        } else {
            Arc::new(Process::system())
        };
        let ob = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            sd_cache: SecurityDescriptorCache::new(collaborators.pool.clone()),
            pool: collaborators.pool,
            validator: collaborators.validator,
            namespace: collaborators.namespace,
            context: collaborators.context,
            work_queue: collaborators.work_queue,
            system_process,
            type_table: TypeTable::new(config.max_object_types),
            type_type: Once::new(),
            directory_type: Once::new(),
            root_directory: Once::new(),
            type_directory: Once::new(),
            kernel_table: Once::new(),
            handle_tables: Mutex::new(Vec::new()),
            permanent: Mutex::new(Vec::new()),
            deferred: DeferredDeletions::new(),
            next_object_id: AtomicU64::new(1),
        });
        ob.initialize()?;
        Ok(ob)
    }

    fn initialize(&self) -> ObResult<()> {
        let type_type = self.create_object_type(
            "Type",
            ObjectTypeInitializer {
                generic_mapping: object_type_access::GENERIC_MAPPING,
                valid_access_mask: object_type_access::OBJECT_TYPE_ALL_ACCESS,
                maintain_type_list: true,
                ..ObjectTypeInitializer::default()
            },
            Box::new(DefaultMethods),
        )?;
        self.type_type.call_once(|| type_type);

        let directory_type = self.create_object_type(
            "Directory",
            ObjectTypeInitializer {
                generic_mapping: directory_access::GENERIC_MAPPING,
                valid_access_mask: directory_access::DIRECTORY_ALL_ACCESS,
                pool_type: PoolType::PagedPool,
                ..ObjectTypeInitializer::default()
            },
            Box::new(DefaultMethods),
        )?;
        self.directory_type.call_once(|| directory_type);

        let root = self.create_bootstrap_directory(None)?;
        self.root_directory.call_once(|| root.clone());

        let type_directory = self.create_bootstrap_directory(Some((&root, "ObjectTypes")))?;
        {
            let context =
                LookupContext::new(self.namespace(), type_directory.clone(), LockMode::Exclusive);
            for object_type in self.type_table.types() {
                if let Some(object) = object_type.object() {
                    let name = object_type.name();
                    if !self.insert_directory_entry(&context, name, &object, true) {
                        log::warn!("ob: type {} already in \\ObjectTypes", name);
                    }
                }
            }
        }
        self.type_directory.call_once(|| type_directory);

        let kernel_table = Arc::new(HandleTable::new(
            ProcessId::SYSTEM,
            true,
            self.config.handle_limit(),
        ));
        let block = self
            .pool
            .allocate(
                PoolType::NonPagedPool,
                core::mem::size_of::<HandleTable>(),
                pool_tags::TAG_HANDLE_TABLE,
            )
            .ok_or(ObError::OutOfResources)?;
        kernel_table.set_pool_block(block);
        self.kernel_table.call_once(|| kernel_table);

        log::debug!(
            "ob: initialized, {} types, root directory {}",
            self.type_table.len(),
            root.id()
        );
        Ok(())
    }

    /// Permanent directory made during initialization
    fn create_bootstrap_directory(
        &self,
        parent: Option<(&ObjectRef, &str)>,
    ) -> ObResult<ObjectRef> {
        let directory_type = self.directory_object_type().ok_or(ObError::InvalidParameter)?;
        let attributes = match parent {
            Some((_, name)) => ObjectAttributes::named(name, ObjAttributes::PERMANENT),
            None => ObjectAttributes::new(ObjAttributes::PERMANENT),
        };
        let directory = self.create_object(
            &directory_type,
            &attributes,
            ProcessorMode::KernelMode,
            self.namespace.new_directory(),
        )?;
        directory.take_create_info();

        let explicit = match parent {
            Some(_) => None,
            None => Some(SecurityDescriptor::system_default()),
        };
        self.assign_object_security(
            &directory,
            parent.map(|(parent, _)| parent),
            explicit.as_ref(),
            &self.system_subject(),
        )?;
        directory.clear_flags(ObjectFlags::NEW_OBJECT);
        self.finalize_insertion(&directory);

        if let Some((parent, name)) = parent {
            let context = LookupContext::new(self.namespace(), parent.clone(), LockMode::Exclusive);
            if !self.insert_directory_entry(&context, name, &directory, true) {
                return Err(ObError::NameCollision);
            }
        }
        self.retain_permanent(directory.clone());
        Ok(directory)
    }

    pub fn config(&self) -> &ObConfig {
        &self.config
    }

    pub fn pool(&self) -> &dyn PoolAllocator {
        self.pool.as_ref()
    }

    pub fn validator(&self) -> &dyn AccessValidator {
        self.validator.as_ref()
    }

    pub fn namespace(&self) -> &dyn NamespaceStore {
        self.namespace.as_ref()
    }

    pub fn context(&self) -> &dyn ExecutionContext {
        self.context.as_ref()
    }

    pub fn work_queue(&self) -> &dyn WorkQueue {
        self.work_queue.as_ref()
    }

    pub fn sd_cache(&self) -> &SecurityDescriptorCache {
        &self.sd_cache
    }

    pub fn type_table(&self) -> &TypeTable {
        &self.type_table
    }

    /// The `Type` type
    pub fn type_object_type(&self) -> Option<Arc<ObjectType>> {
        self.type_type.get().cloned()
    }

    /// The `Directory` type
    pub fn directory_object_type(&self) -> Option<Arc<ObjectType>> {
        self.directory_type.get().cloned()
    }

    /// `\`
    pub fn root_directory(&self) -> Option<ObjectRef> {
        self.root_directory.get().cloned()
    }

    /// `\ObjectTypes`
    pub fn type_directory(&self) -> Option<ObjectRef> {
        self.type_directory.get().cloned()
    }

    /// The global kernel handle table
    pub fn kernel_handle_table(&self) -> Option<&Arc<HandleTable>> {
        self.kernel_table.get()
    }

    pub(crate) fn next_object_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn self_ref(&self) -> Option<Arc<ObjectManager>> {
        self.this.upgrade()
    }

    pub fn current_process(&self) -> Arc<Process> {
        self.context.current_process()
    }

    /// The process kernel handles are charged to
    pub fn system_process(&self) -> &Arc<Process> {
        &self.system_process
    }

    /// Capture the caller's subject context (SeCaptureSubjectContext)
    pub fn current_subject(&self) -> SubjectContext {
        SubjectContext {
            process: self.context.current_process().id(),
            thread: self.context.current_thread(),
        }
    }

    fn system_subject(&self) -> SubjectContext {
        SubjectContext {
            process: ProcessId::SYSTEM,
            thread: Default::default(),
        }
    }

    /// Link `object` under `name` in a directory locked by `context`
    ///
    /// The entry takes a pointer reference on the object and the object's
    /// name takes one on the directory; both are dropped when the name is
    /// deleted.
    pub(crate) fn insert_directory_entry(
        &self,
        context: &LookupContext<'_>,
        name: &str,
        object: &ObjectRef,
        case_insensitive: bool,
    ) -> bool {
        let Some(name_info) = object.name_info() else {
            log::error!("ob: object {} has no name information", object.id());
            return false;
        };
        if !context.insert(name, object, case_insensitive) {
            return false;
        }
        name_info.set_entry(context.directory(), name);
        object.add_pointer_references(1);
        context.directory().add_pointer_references(1);
        true
    }

    /// Keep a bootstrap object's creation reference for the manager's
    /// lifetime
    pub(crate) fn retain_permanent(&self, object: ObjectRef) {
        self.permanent.lock().push(object);
    }

    pub(crate) fn register_handle_table(&self, table: &Arc<HandleTable>) {
        let mut tables = self.handle_tables.lock();
        tables.retain(|table| table.strong_count() > 0);
        tables.push(Arc::downgrade(table));
    }

    pub(crate) fn unregister_handle_table(&self, table: &Arc<HandleTable>) {
        self.handle_tables
            .lock()
            .retain(|entry| {
                entry.strong_count() > 0 && !core::ptr::eq(entry.as_ptr(), Arc::as_ptr(table))
            });
    }

    /// Process handle tables currently registered
    pub fn handle_tables(&self) -> Vec<Arc<HandleTable>> {
        self.handle_tables
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}
