//! Namespace collaborator
//!
//! Directory entry storage belongs to the namespace, not to the object
//! manager. The object manager only asks a [`NamespaceStore`] to lock a
//! directory, and then to look up, insert or delete an entry while the
//! lock is held. The lock is held by a [`LookupContext`]
//! (OBP_LOOKUP_CONTEXT) and released when the context is dropped, so a
//! caller can keep a directory locked across handle creation and make
//! insertion plus handle creation atomic for other lookers.
//!
//! Shared locks serve lookups; inserts and deletes need exclusive ones.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;

use super::header::{ObjectHeader, ObjectRef};
use crate::ex::LockMode;

/// Path separator
pub const OBJ_NAME_PATH_SEPARATOR: char = '\\';

/// Directory entry storage
pub trait NamespaceStore: Send + Sync {
    /// Body for a new directory object
    fn new_directory(&self) -> Box<dyn Any + Send + Sync>;

    /// Whether `object` is a directory of this store
    fn is_directory(&self, object: &ObjectHeader) -> bool;

    fn lock_directory(&self, directory: &ObjectHeader, mode: LockMode);

    fn unlock_directory(&self, directory: &ObjectHeader, mode: LockMode);

    /// Find `name` in a locked directory
    fn lookup(&self, directory: &ObjectHeader, name: &str, case_insensitive: bool)
        -> Option<ObjectRef>;

    /// Add an entry to an exclusively locked directory; false if the
    /// name exists under the same case rule or `directory` is not a
    /// directory
    fn insert(
        &self,
        directory: &ObjectHeader,
        name: &str,
        object: &ObjectRef,
        case_insensitive: bool,
    ) -> bool;

    /// Remove an entry from an exclusively locked directory
    fn delete_entry(
        &self,
        directory: &ObjectHeader,
        name: &str,
        case_insensitive: bool,
    ) -> Option<ObjectRef>;

    /// Entries of a directory, for queries
    fn entries(&self, directory: &ObjectHeader) -> Vec<(String, ObjectRef)>;
}

/// A locked directory (OBP_LOOKUP_CONTEXT)
pub struct LookupContext<'a> {
    store: &'a dyn NamespaceStore,
    directory: ObjectRef,
    mode: LockMode,
}

impl<'a> LookupContext<'a> {
    /// Lock `directory` in `mode` (ObpLockLookupContext)
    pub fn new(store: &'a dyn NamespaceStore, directory: ObjectRef, mode: LockMode) -> Self {
        store.lock_directory(&directory, mode);
        Self {
            store,
            directory,
            mode,
        }
    }

    pub fn directory(&self) -> &ObjectRef {
        &self.directory
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// ObpLookupDirectoryEntry
    pub fn lookup(&self, name: &str, case_insensitive: bool) -> Option<ObjectRef> {
        self.store.lookup(&self.directory, name, case_insensitive)
    }

    /// ObpInsertDirectoryEntry
    pub fn insert(&self, name: &str, object: &ObjectRef, case_insensitive: bool) -> bool {
        if self.mode != LockMode::Exclusive {
            log::error!("ob: directory insert without the exclusive lock");
            return false;
        }
        self.store.insert(&self.directory, name, object, case_insensitive)
    }

    /// ObpDeleteDirectoryEntry
    pub fn delete_entry(&self, name: &str, case_insensitive: bool) -> Option<ObjectRef> {
        if self.mode != LockMode::Exclusive {
            log::error!("ob: directory delete without the exclusive lock");
            return None;
        }
        self.store.delete_entry(&self.directory, name, case_insensitive)
    }
}

impl Drop for LookupContext<'_> {
    fn drop(&mut self) {
        self.store.unlock_directory(&self.directory, self.mode);
    }
}
