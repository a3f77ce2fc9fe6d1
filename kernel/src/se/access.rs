//! Access masks, generic mapping and access state
//!
//! An access mask is a 32-bit value:
//!
//! - Bits 0-15: Object-specific rights
//! - Bits 16-20: Standard rights (DELETE, READ_CONTROL, ...)
//! - Bit 24: ACCESS_SYSTEM_SECURITY
//! - Bit 25: MAXIMUM_ALLOWED
//! - Bits 28-31: Generic rights, mapped per type before use
//!
//! Bits 21-23 and 26-27 are reserved; asking for them is always denied.
//!
//! The [`AccessState`] travels with one create/open/duplicate call and
//! records what has been granted so far, what is still wanted, and
//! whether closing the resulting handle must be audited.

use alloc::vec::Vec;

use super::descriptor::SecurityDescriptor;
use crate::ps::{ProcessId, ThreadId};

/// Access mask
pub type AccessMask = u32;

/// Standard rights
pub mod standard_rights {
    pub const DELETE: u32 = 0x0001_0000;
    pub const READ_CONTROL: u32 = 0x0002_0000;
    pub const WRITE_DAC: u32 = 0x0004_0000;
    pub const WRITE_OWNER: u32 = 0x0008_0000;
    pub const SYNCHRONIZE: u32 = 0x0010_0000;

    pub const STANDARD_RIGHTS_REQUIRED: u32 = 0x000F_0000;
    pub const STANDARD_RIGHTS_READ: u32 = READ_CONTROL;
    pub const STANDARD_RIGHTS_WRITE: u32 = READ_CONTROL;
    pub const STANDARD_RIGHTS_EXECUTE: u32 = READ_CONTROL;
    pub const STANDARD_RIGHTS_ALL: u32 = 0x001F_0000;
    pub const SPECIFIC_RIGHTS_ALL: u32 = 0x0000_FFFF;
}

/// Rights that are not part of any type's valid mask
pub mod special_rights {
    pub const ACCESS_SYSTEM_SECURITY: u32 = 0x0100_0000;
    pub const MAXIMUM_ALLOWED: u32 = 0x0200_0000;
}

/// Generic rights
pub mod generic_rights {
    pub const GENERIC_READ: u32 = 0x8000_0000;
    pub const GENERIC_WRITE: u32 = 0x4000_0000;
    pub const GENERIC_EXECUTE: u32 = 0x2000_0000;
    pub const GENERIC_ALL: u32 = 0x1000_0000;

    pub const GENERIC_ACCESS: u32 = GENERIC_READ | GENERIC_WRITE | GENERIC_EXECUTE | GENERIC_ALL;
}

/// Reserved bits of a desired access mask
pub const RESERVED_ACCESS_BITS: AccessMask = 0x0CE0_0000;

/// Whether a desired access mask only uses defined bits
#[inline]
pub const fn is_valid_desired_access(desired: AccessMask) -> bool {
    desired & RESERVED_ACCESS_BITS == 0
}

/// Generic mapping - maps generic rights to specific rights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericMapping {
    pub generic_read: u32,
    pub generic_write: u32,
    pub generic_execute: u32,
    pub generic_all: u32,
}

impl GenericMapping {
    pub const fn new(read: u32, write: u32, execute: u32, all: u32) -> Self {
        Self {
            generic_read: read,
            generic_write: write,
            generic_execute: execute,
            generic_all: all,
        }
    }

    /// Map generic rights to specific rights (RtlMapGenericMask)
    pub fn map_generic(&self, access_mask: u32) -> u32 {
        let mut result = access_mask;

        if (result & generic_rights::GENERIC_READ) != 0 {
            result |= self.generic_read;
        }
        if (result & generic_rights::GENERIC_WRITE) != 0 {
            result |= self.generic_write;
        }
        if (result & generic_rights::GENERIC_EXECUTE) != 0 {
            result |= self.generic_execute;
        }
        if (result & generic_rights::GENERIC_ALL) != 0 {
            result |= self.generic_all;
        }

        result & !generic_rights::GENERIC_ACCESS
    }
}

impl Default for GenericMapping {
    fn default() -> Self {
        Self::new(
            standard_rights::STANDARD_RIGHTS_READ,
            standard_rights::STANDARD_RIGHTS_WRITE,
            standard_rights::STANDARD_RIGHTS_EXECUTE,
            standard_rights::STANDARD_RIGHTS_ALL,
        )
    }
}

/// Privileges the object manager asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// SeSecurityPrivilege: ACCESS_SYSTEM_SECURITY
    Security,
    /// SeCreatePermanentPrivilege: OBJ_PERMANENT from user mode
    CreatePermanent,
    /// SeChangeNotifyPrivilege: bypass traverse checking
    ChangeNotify,
    /// SeTakeOwnershipPrivilege
    TakeOwnership,
}

/// Captured subject context (SECURITY_SUBJECT_CONTEXT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectContext {
    pub process: ProcessId,
    pub thread: ThreadId,
}

/// Access state for one create/open/duplicate call (ACCESS_STATE)
#[derive(Debug, Clone)]
pub struct AccessState {
    pub subject: SubjectContext,
    /// Desired access not yet granted
    pub remaining_desired_access: AccessMask,
    /// Access already granted
    pub previously_granted_access: AccessMask,
    /// Access originally asked for, after generic mapping
    pub original_desired_access: AccessMask,
    /// Descriptor supplied by the creator, if any
    pub security_descriptor: Option<SecurityDescriptor>,
    /// Privileges used while granting access
    pub privileges_used: Vec<Privilege>,
    /// Closing the handle must generate an audit
    pub generate_on_close: bool,
    /// An audit was generated for the open
    pub generate_audit: bool,
    /// Traverse checking was already satisfied by privilege
    pub traverse_privilege: bool,
    /// Audit mask to latch on the handle
    pub maximum_audit_mask: AccessMask,
    pub generic_mapping: GenericMapping,
}

impl AccessState {
    /// SeCreateAccessState
    pub fn new(
        subject: SubjectContext,
        desired_access: AccessMask,
        generic_mapping: &GenericMapping,
    ) -> Self {
        let mapped = generic_mapping.map_generic(desired_access);
        Self {
            subject,
            remaining_desired_access: mapped,
            previously_granted_access: 0,
            original_desired_access: mapped,
            security_descriptor: None,
            privileges_used: Vec::new(),
            generate_on_close: false,
            generate_audit: false,
            traverse_privilege: false,
            maximum_audit_mask: 0,
            generic_mapping: *generic_mapping,
        }
    }

    /// Move bits from the remaining mask into the granted mask
    pub fn grant(&mut self, access: AccessMask) {
        self.previously_granted_access |= access;
        self.remaining_desired_access &= !access;
    }

    /// Everything desired has been granted
    pub fn is_satisfied(&self) -> bool {
        self.remaining_desired_access == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPING: GenericMapping = GenericMapping::new(0x1, 0x2, 0x4, 0xF);

    #[test]
    fn test_map_generic_clears_generic_bits() {
        assert_eq!(MAPPING.map_generic(generic_rights::GENERIC_READ), 0x1);
        assert_eq!(
            MAPPING.map_generic(generic_rights::GENERIC_WRITE | standard_rights::SYNCHRONIZE),
            0x2 | standard_rights::SYNCHRONIZE
        );
        assert_eq!(MAPPING.map_generic(generic_rights::GENERIC_ALL), 0xF);
        assert_eq!(MAPPING.map_generic(0x10), 0x10);
    }

    #[test]
    fn test_reserved_bits() {
        assert!(is_valid_desired_access(standard_rights::DELETE | 0xFFFF));
        assert!(is_valid_desired_access(special_rights::MAXIMUM_ALLOWED));
        assert!(!is_valid_desired_access(0x0020_0000));
        assert!(!is_valid_desired_access(0x0400_0000));
    }

    #[test]
    fn test_access_state_grant() {
        let subject = SubjectContext {
            process: ProcessId(8),
            thread: ThreadId(1),
        };
        let mut state = AccessState::new(subject, generic_rights::GENERIC_READ | 0x2, &MAPPING);
        assert_eq!(state.remaining_desired_access, 0x3);

        state.grant(0x1);
        assert_eq!(state.previously_granted_access, 0x1);
        assert!(!state.is_satisfied());
        state.grant(0x2);
        assert!(state.is_satisfied());
    }
}
