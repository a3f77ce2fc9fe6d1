//! Object manager status codes
//!
//! Internally every fallible operation returns [`ObResult`]; the error kind
//! is converted to an [`NtStatus`] at the kernel-caller boundary.
//!
//! `NtStatus::ObjectNameExists` is informational: it reports that an
//! `OBJ_OPENIF` insert attached to an existing object and a handle was
//! still returned.

use crate::se::{DescriptorError, SecurityError};

/// Object manager error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObError {
    /// Pool allocation failed
    OutOfResources,
    /// Process quota would be exceeded
    QuotaExceeded,
    /// Handle is stale, absent, or of the wrong mode
    InvalidHandle,
    /// Access check failed or a disallowed access bit was requested
    AccessDenied,
    /// Object is not of the expected type
    TypeMismatch,
    /// A name already exists and `OBJ_OPENIF` was not given
    NameCollision,
    /// Handle table unavailable, process is exiting
    ProcessTerminating,
    /// Operation not supported by the object type
    Unsupported,
    /// Malformed attributes or arguments
    InvalidParameter,
    /// Handle is protected from close
    HandleNotClosable,
    /// Last path component does not exist
    ObjectNameNotFound,
    /// An intermediate path component does not exist
    ObjectPathNotFound,
    /// Name is syntactically invalid
    ObjectNameInvalid,
    /// Caller lacks a required privilege
    PrivilegeNotHeld,
    /// Reopen of an object the type cannot reopen
    Unsuccessful,
    /// Owner in a security descriptor is not assignable
    InvalidOwner,
}

/// Object manager result
pub type ObResult<T> = Result<T, ObError>;

/// NT status code (NTSTATUS)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtStatus {
    Success = 0,
    /// 0x40000000
    ObjectNameExists = 1073741824,
    /// 0xC0000001
    Unsuccessful = -1073741823,
    /// 0xC0000008
    InvalidHandle = -1073741816,
    /// 0xC000000D
    InvalidParameter = -1073741811,
    /// 0xC0000022
    AccessDenied = -1073741790,
    /// 0xC0000024
    ObjectTypeMismatch = -1073741788,
    /// 0xC0000033
    ObjectNameInvalid = -1073741773,
    /// 0xC0000034
    ObjectNameNotFound = -1073741772,
    /// 0xC0000035
    ObjectNameCollision = -1073741771,
    /// 0xC000003A
    ObjectPathNotFound = -1073741766,
    /// 0xC0000044
    QuotaExceeded = -1073741756,
    /// 0xC000005A
    InvalidOwner = -1073741734,
    /// 0xC0000061
    PrivilegeNotHeld = -1073741727,
    /// 0xC000009A
    InsufficientResources = -1073741670,
    /// 0xC00000BB
    NotSupported = -1073741637,
    /// 0xC000010A
    ProcessIsTerminating = -1073741558,
    /// 0xC0000235
    HandleNotClosable = -1073741259,
}

impl NtStatus {
    /// NT_SUCCESS: success and informational codes
    #[inline]
    pub fn is_success(self) -> bool {
        (self as i32) >= 0
    }

    /// Raw 32-bit value as it appears in NTSTATUS
    #[inline]
    pub fn as_u32(self) -> u32 {
        self as i32 as u32
    }
}

impl From<ObError> for NtStatus {
    fn from(error: ObError) -> Self {
        match error {
            ObError::OutOfResources => NtStatus::InsufficientResources,
            ObError::QuotaExceeded => NtStatus::QuotaExceeded,
            ObError::InvalidHandle => NtStatus::InvalidHandle,
            ObError::AccessDenied => NtStatus::AccessDenied,
            ObError::TypeMismatch => NtStatus::ObjectTypeMismatch,
            ObError::NameCollision => NtStatus::ObjectNameCollision,
            ObError::ProcessTerminating => NtStatus::ProcessIsTerminating,
            ObError::Unsupported => NtStatus::NotSupported,
            ObError::InvalidParameter => NtStatus::InvalidParameter,
            ObError::HandleNotClosable => NtStatus::HandleNotClosable,
            ObError::ObjectNameNotFound => NtStatus::ObjectNameNotFound,
            ObError::ObjectPathNotFound => NtStatus::ObjectPathNotFound,
            ObError::ObjectNameInvalid => NtStatus::ObjectNameInvalid,
            ObError::PrivilegeNotHeld => NtStatus::PrivilegeNotHeld,
            ObError::Unsuccessful => NtStatus::Unsuccessful,
            ObError::InvalidOwner => NtStatus::InvalidOwner,
        }
    }
}

impl From<SecurityError> for ObError {
    fn from(error: SecurityError) -> Self {
        match error {
            SecurityError::AccessDenied => ObError::AccessDenied,
            SecurityError::PrivilegeNotHeld => ObError::PrivilegeNotHeld,
            SecurityError::InvalidOwner => ObError::InvalidOwner,
            SecurityError::InvalidDescriptor => ObError::InvalidParameter,
        }
    }
}

impl From<DescriptorError> for ObError {
    fn from(error: DescriptorError) -> Self {
        match error {
            DescriptorError::BadOwner => ObError::InvalidOwner,
            _ => ObError::InvalidParameter,
        }
    }
}

/// Collapse a result into the status a kernel caller sees
pub fn to_status<T>(result: &ObResult<T>) -> NtStatus {
    match result {
        Ok(_) => NtStatus::Success,
        Err(error) => NtStatus::from(*error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_values() {
        assert_eq!(NtStatus::AccessDenied.as_u32(), 0xC000_0022);
        assert_eq!(NtStatus::ObjectNameExists.as_u32(), 0x4000_0000);
        assert_eq!(NtStatus::HandleNotClosable.as_u32(), 0xC000_0235);
        assert!(NtStatus::ObjectNameExists.is_success());
        assert!(!NtStatus::QuotaExceeded.is_success());
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(NtStatus::from(ObError::OutOfResources), NtStatus::InsufficientResources);
        assert_eq!(ObError::from(SecurityError::AccessDenied), ObError::AccessDenied);
        assert_eq!(ObError::from(DescriptorError::BadOwner), ObError::InvalidOwner);
        assert_eq!(ObError::from(DescriptorError::BadRevision), ObError::InvalidParameter);
        assert_eq!(to_status(&Ok::<(), ObError>(())), NtStatus::Success);
    }
}
