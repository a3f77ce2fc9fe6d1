//! Security Reference Monitor (se)
//!
//! What the object manager needs from security:
//!
//! - **Access Masks**: Standard, specific, generic and special rights
//! - **Generic Mapping**: Per-type translation of generic rights
//! - **Access State**: Per-call record of granted and remaining access
//! - **Security Descriptors**: Immutable self-relative descriptors
//! - **Access Validation**: The collaborator that decides access,
//!   privileges, security assignment and auditing
//!
//! # Security Descriptor
//!
//! Each object can have:
//! - Owner SID
//! - Group SID
//! - DACL (Discretionary ACL) - who can access
//! - SACL (System ACL) - auditing
//!
//! # Key Structures
//!
//! - `ACCESS_STATE`: [`AccessState`]
//! - `GENERIC_MAPPING`: [`GenericMapping`]
//! - `SECURITY_DESCRIPTOR_RELATIVE`: [`SecurityDescriptor`]

pub mod access;
pub mod descriptor;
pub mod validator;

pub use access::{
    generic_rights, is_valid_desired_access, special_rights, standard_rights, AccessMask,
    AccessState, GenericMapping, Privilege, SubjectContext, RESERVED_ACCESS_BITS,
};
pub use descriptor::{
    build_acl, build_sid, sd_control, well_known, Ace, AceType, DescriptorError,
    SecurityDescriptor, SecurityInformation,
};
pub use validator::{
    AccessValidator, AuditEvent, AuditKind, PermissiveValidator, SecurityError,
};
