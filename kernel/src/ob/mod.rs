//! Object Manager (ob)
//!
//! The object manager provides a unified object model for all kernel resources:
//!
//! - **Object Types**: registered at run time with their callbacks
//! - **Namespace**: Hierarchical directory structure for named objects
//! - **Handle Tables**: Per-process handle-to-object mapping
//! - **Reference Counting**: Pointer and handle counts with safe and
//!   deferred deletion
//! - **Security**: Per-object security descriptors, shared through a
//!   de-duplicating cache
//!
//! # Object Structure
//!
//! Every kernel object has:
//! - OBJECT_HEADER: Type, ref counts, optional name/quota/creator/handle info
//! - Object Body: Type-specific data
//!
//! # Namespace Hierarchy
//!
//! - `\` - Root directory
//! - `\ObjectTypes` - Type objects
//!
//! # Key Structures
//!
//! - `OBJECT_HEADER`: [`ObjectHeader`]
//! - `OBJECT_TYPE`: [`ObjectType`] with [`ObjectTypeMethods`]
//! - `HANDLE_TABLE`: [`HandleTable`]
//! - `SECURITY_DESCRIPTOR_HEADER`: [`CachedSecurityDescriptor`]
//!
//! All operations hang off [`ObjectManager`]; each submodule adds its own
//! `impl ObjectManager` block.

// Submodules
pub mod attributes;
pub mod close;
pub mod config;
pub mod create;
pub mod delete;
pub mod directory;
pub mod duplicate;
pub mod handle;
pub mod handle_db;
pub mod header;
pub mod lookup;
pub mod manager;
pub mod namespace;
pub mod object_type;
pub mod open;
pub mod process;
pub mod query;
pub mod reference;
pub mod sdcache;
pub mod security;
pub mod status;

#[cfg(test)]
mod tests;

// Re-exports for convenience
pub use attributes::{DuplicateOptions, HandleAttributes, ObjAttributes, ObjectAttributes};
pub use config::{ObConfig, SE_DEFAULT_SECURITY_QUOTA};
pub use create::InsertOutcome;
pub use directory::{
    directory_access, DirectoryEntrySnapshot, DirectoryNamespace, ObjectDirectory,
};
pub use handle::{
    Handle, HandleIndex, HandleKind, HandleTable, HandleTableEntry, HandleTableStats,
    PseudoHandle, KERNEL_HANDLE_FLAG,
};
pub use handle_db::{HandleCountDatabase, HandleInfo, HANDLE_DB_GROWTH};
pub use header::{
    CreatorInfo, NameInfo, ObjectFlags, ObjectHeader, ObjectRef, QuotaCharge, QuotaInfo,
};
pub use manager::{Collaborators, ObjectManager};
pub use namespace::{LookupContext, NamespaceStore, OBJ_NAME_PATH_SEPARATOR};
pub use object_type::{
    object_type_access, DefaultMethods, ObjectProcedures, ObjectType, ObjectTypeInitializer,
    ObjectTypeMethods, ObjectTypeSnapshot, ObjectTypeStats, OpenReason, ParseContext,
    SecurityOperation, SecurityOutcome, OBJECT_LOCK_COUNT, OB_MAX_TYPE_NAME,
};
pub use process::HandleTableGuard;
pub use query::{ObjectBasicInformation, SystemHandleEntry};
pub use reference::HandleInformation;
pub use sdcache::{
    CachedSecurityDescriptor, SdCacheStats, SecurityDescriptorCache, SD_CACHE_BUCKETS,
};
pub use security::ObjectSecurity;
pub use status::{NtStatus, ObError, ObResult};
