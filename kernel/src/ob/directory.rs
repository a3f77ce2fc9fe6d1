//! Object Directory Implementation
//!
//! Object directories form the namespace hierarchy for named kernel objects.
//! The object manager creates:
//! - `\` - Root directory
//! - `\ObjectTypes` - Type objects
//!
//! Further directories are created like any other object of the
//! `Directory` type.
//!
//! # Directory Operations
//! - Lookup: Find object by name
//! - Insert: Add named object
//! - Delete: Remove named object
//!
//! Entries are hashed into `NUMBER_HASH_BUCKETS` chains. The directory's
//! push lock is the lock a [`LookupContext`](super::namespace::LookupContext)
//! holds; the chains themselves sit behind a short-lived inner lock.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;
use spin::RwLock;

use super::header::{ObjectHeader, ObjectRef};
use super::namespace::NamespaceStore;
use crate::ex::{ExPushLock, LockMode};

/// Hash chains per directory
pub const NUMBER_HASH_BUCKETS: usize = 37;

/// Directory access rights
pub mod directory_access {
    use crate::se::{standard_rights, GenericMapping};

    pub const DIRECTORY_QUERY: u32 = 0x0001;
    pub const DIRECTORY_TRAVERSE: u32 = 0x0002;
    pub const DIRECTORY_CREATE_OBJECT: u32 = 0x0004;
    pub const DIRECTORY_CREATE_SUBDIRECTORY: u32 = 0x0008;
    pub const DIRECTORY_ALL_ACCESS: u32 = standard_rights::STANDARD_RIGHTS_REQUIRED | 0xF;

    pub const GENERIC_MAPPING: GenericMapping = GenericMapping::new(
        standard_rights::STANDARD_RIGHTS_READ | DIRECTORY_QUERY | DIRECTORY_TRAVERSE,
        standard_rights::STANDARD_RIGHTS_WRITE
            | DIRECTORY_CREATE_OBJECT
            | DIRECTORY_CREATE_SUBDIRECTORY,
        standard_rights::STANDARD_RIGHTS_EXECUTE | DIRECTORY_QUERY | DIRECTORY_TRAVERSE,
        DIRECTORY_ALL_ACCESS,
    );
}

/// Directory entry
#[derive(Clone)]
pub struct DirectoryEntry {
    pub name: String,
    /// Hash of the upper-cased name
    pub name_hash: u32,
    pub object: ObjectRef,
}

/// Object directory (OBJECT_DIRECTORY)
pub struct ObjectDirectory {
    /// Lock for directory operations
    lock: ExPushLock,
    buckets: RwLock<Vec<Vec<DirectoryEntry>>>,
}

impl ObjectDirectory {
    /// Create a new empty directory
    pub fn new() -> Self {
        Self {
            lock: ExPushLock::new(),
            buckets: RwLock::new((0..NUMBER_HASH_BUCKETS).map(|_| Vec::new()).collect()),
        }
    }

    /// Simple hash function for names
    pub fn hash_name(name: &str) -> u32 {
        let mut hash: u32 = 0;
        for byte in name.bytes() {
            // Case-insensitive hash (convert to uppercase)
            hash = hash.wrapping_mul(31).wrapping_add(byte.to_ascii_uppercase() as u32);
        }
        hash
    }

    fn names_equal(a: &str, b: &str, case_insensitive: bool) -> bool {
        if case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    pub fn lookup(&self, name: &str, case_insensitive: bool) -> Option<ObjectRef> {
        let hash = Self::hash_name(name);
        let buckets = self.buckets.read();
        buckets[hash as usize % NUMBER_HASH_BUCKETS]
            .iter()
            .find(|entry| {
                entry.name_hash == hash && Self::names_equal(&entry.name, name, case_insensitive)
            })
            .map(|entry| entry.object.clone())
    }

    /// Insert an entry; false if the name is already present
    pub fn insert(&self, name: &str, object: &ObjectRef, case_insensitive: bool) -> bool {
        let hash = Self::hash_name(name);
        let mut buckets = self.buckets.write();
        let chain = &mut buckets[hash as usize % NUMBER_HASH_BUCKETS];
        if chain.iter().any(|entry| {
            entry.name_hash == hash && Self::names_equal(&entry.name, name, case_insensitive)
        }) {
            return false;
        }
        // New entries go to the head of the chain
        chain.insert(
            0,
            DirectoryEntry {
                name: String::from(name),
                name_hash: hash,
                object: object.clone(),
            },
        );
        true
    }

    pub fn remove(&self, name: &str, case_insensitive: bool) -> Option<ObjectRef> {
        let hash = Self::hash_name(name);
        let mut buckets = self.buckets.write();
        let chain = &mut buckets[hash as usize % NUMBER_HASH_BUCKETS];
        let position = chain.iter().position(|entry| {
            entry.name_hash == hash && Self::names_equal(&entry.name, name, case_insensitive)
        })?;
        Some(chain.remove(position).object)
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.buckets.read().iter().map(Vec::len).sum()
    }

    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.buckets.read().iter().flatten().cloned().collect()
    }
}

impl Default for ObjectDirectory {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of a directory entry
#[derive(Debug, Clone)]
pub struct DirectoryEntrySnapshot {
    pub object_id: u64,
    pub name: String,
    pub type_name: String,
    pub pointer_count: i64,
    pub handle_count: i64,
    /// Is a directory
    pub is_directory: bool,
}

impl DirectoryEntrySnapshot {
    pub fn new(name: String, object: &ObjectRef, is_directory: bool) -> Self {
        Self {
            object_id: object.id(),
            name,
            type_name: String::from(object.object_type().name()),
            pointer_count: object.pointer_count(),
            handle_count: object.handle_count(),
            is_directory,
        }
    }
}

/// Namespace made of [`ObjectDirectory`] bodies
#[derive(Debug, Default)]
pub struct DirectoryNamespace;

impl DirectoryNamespace {
    pub fn new() -> Self {
        Self
    }

    fn directory<'a>(&self, object: &'a ObjectHeader) -> Option<&'a ObjectDirectory> {
        object.body::<ObjectDirectory>()
    }
}

impl NamespaceStore for DirectoryNamespace {
    fn new_directory(&self) -> Box<dyn Any + Send + Sync> {
        Box::new(ObjectDirectory::new())
    }

    fn is_directory(&self, object: &ObjectHeader) -> bool {
        self.directory(object).is_some()
    }

    fn lock_directory(&self, directory: &ObjectHeader, mode: LockMode) {
        if let Some(directory) = self.directory(directory) {
            directory.lock.acquire(mode);
        }
    }

    fn unlock_directory(&self, directory: &ObjectHeader, mode: LockMode) {
        if let Some(directory) = self.directory(directory) {
            directory.lock.release(mode);
        }
    }

    fn lookup(
        &self,
        directory: &ObjectHeader,
        name: &str,
        case_insensitive: bool,
    ) -> Option<ObjectRef> {
        self.directory(directory)?.lookup(name, case_insensitive)
    }

    fn insert(
        &self,
        directory: &ObjectHeader,
        name: &str,
        object: &ObjectRef,
        case_insensitive: bool,
    ) -> bool {
        match self.directory(directory) {
            Some(directory) => directory.insert(name, object, case_insensitive),
            None => false,
        }
    }

    fn delete_entry(
        &self,
        directory: &ObjectHeader,
        name: &str,
        case_insensitive: bool,
    ) -> Option<ObjectRef> {
        self.directory(directory)?.remove(name, case_insensitive)
    }

    fn entries(&self, directory: &ObjectHeader) -> Vec<(String, ObjectRef)> {
        match self.directory(directory) {
            Some(directory) => directory
                .entries()
                .into_iter()
                .map(|entry| (entry.name, entry.object))
                .collect(),
            None => Vec::new(),
        }
    }
}
