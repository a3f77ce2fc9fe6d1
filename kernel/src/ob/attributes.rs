//! Object attributes, handle attributes and duplication options
//!
//! # Key Structures
//!
//! - `OBJECT_ATTRIBUTES`: [`ObjectAttributes`]
//! - `OBJ_*` attribute bits: [`ObjAttributes`]
//! - Handle entry attribute bits: [`HandleAttributes`]
//! - `DUPLICATE_*` options: [`DuplicateOptions`]

use alloc::string::String;

use super::handle::Handle;
use crate::se::SecurityDescriptor;

bitflags::bitflags! {
    /// OBJ_* attributes of a create/open request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjAttributes: u32 {
        /// Handle is inherited by child processes
        const INHERIT = 0x0000_0002;
        /// Object survives its last handle (needs a privilege from user mode)
        const PERMANENT = 0x0000_0010;
        /// Only one process may hold handles
        const EXCLUSIVE = 0x0000_0020;
        /// Name comparisons ignore case
        const CASE_INSENSITIVE = 0x0000_0040;
        /// Attach to an existing object instead of failing on collision
        const OPENIF = 0x0000_0080;
        /// Open a symbolic link itself rather than its target
        const OPENLINK = 0x0000_0100;
        /// Create the handle in the kernel handle table
        const KERNEL_HANDLE = 0x0000_0200;
        /// Check access as if the caller were user mode
        const FORCE_ACCESS_CHECK = 0x0000_0400;
    }
}

impl ObjAttributes {
    /// OBJ_VALID_ATTRIBUTES
    pub const VALID: ObjAttributes = ObjAttributes::all();

    /// Attributes that carry over to the handle entry
    pub fn handle_attributes(self) -> HandleAttributes {
        let mut attributes = HandleAttributes::empty();
        if self.contains(ObjAttributes::INHERIT) {
            attributes |= HandleAttributes::INHERIT;
        }
        attributes
    }
}

bitflags::bitflags! {
    /// Per-entry handle attributes
    ///
    /// Kept beside the object pointer rather than folded into its low bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleAttributes: u32 {
        /// Copied into a child's table at process creation
        const INHERIT = 0x0000_0002;
        /// Closing the handle generates an audit
        const AUDIT_ON_CLOSE = 0x0000_0004;
        /// `close_handle` refuses this handle
        const PROTECT_CLOSE = 0x0000_0001;
    }
}

impl HandleAttributes {
    /// Attributes a caller may change after creation
    pub const SETTABLE: HandleAttributes =
        HandleAttributes::INHERIT.union(HandleAttributes::PROTECT_CLOSE);
}

bitflags::bitflags! {
    /// DUPLICATE_* options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DuplicateOptions: u32 {
        /// Close the source handle, whatever the outcome
        const CLOSE_SOURCE = 0x0000_0001;
        /// Target gets the source's granted access
        const SAME_ACCESS = 0x0000_0002;
        /// Target gets the source's handle attributes
        const SAME_ATTRIBUTES = 0x0000_0004;
    }
}

/// Object attributes of a create/open request (OBJECT_ATTRIBUTES)
#[derive(Debug, Clone, Default)]
pub struct ObjectAttributes {
    /// Object name; absolute (`\A\B`) or relative to `root_directory`
    pub name: Option<String>,
    /// Directory handle that `name` is relative to
    pub root_directory: Option<Handle>,
    pub attributes: ObjAttributes,
    /// Explicit security descriptor for a new object
    pub security_descriptor: Option<SecurityDescriptor>,
}

impl ObjectAttributes {
    /// Unnamed object with the given attributes
    pub fn new(attributes: ObjAttributes) -> Self {
        Self {
            attributes,
            ..Self::default()
        }
    }

    /// Named object
    pub fn named(name: &str, attributes: ObjAttributes) -> Self {
        Self {
            name: Some(String::from(name)),
            attributes,
            ..Self::default()
        }
    }

    /// Name relative to an open directory handle
    pub fn relative(root: Handle, name: &str, attributes: ObjAttributes) -> Self {
        Self {
            name: Some(String::from(name)),
            root_directory: Some(root),
            attributes,
            security_descriptor: None,
        }
    }

    pub fn with_security(mut self, descriptor: SecurityDescriptor) -> Self {
        self.security_descriptor = Some(descriptor);
        self
    }
}
