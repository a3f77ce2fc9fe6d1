//! Access validation collaborator
//!
//! The object manager never decides access itself. Every access decision,
//! privilege check, security assignment and audit goes through an
//! [`AccessValidator`]; the policy behind it is not the object manager's
//! concern.
//!
//! [`PermissiveValidator`] is the reference implementation used until a
//! real reference monitor is plugged in: it grants whatever is asked for
//! within the type's mapping and holds every privilege.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::access::{
    generic_rights, special_rights, AccessMask, AccessState, GenericMapping, Privilege,
    SubjectContext,
};
use super::descriptor::{sd_control, well_known, SecurityDescriptor};
use crate::ke::ProcessorMode;
use crate::ps::ProcessId;

/// Negative outcome of a security decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityError {
    /// The descriptor does not grant the desired access
    AccessDenied,
    /// A required privilege is not held
    PrivilegeNotHeld,
    /// The owner in a supplied descriptor may not be assigned
    InvalidOwner,
    /// A supplied descriptor is malformed
    InvalidDescriptor,
}

/// What happened, for audit purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Create,
    Open,
    Duplicate,
    /// First use of audited access through a handle
    Reference,
    Close,
    Delete,
}

/// One audit alarm
#[derive(Debug, Clone, Copy)]
pub struct AuditEvent<'a> {
    pub kind: AuditKind,
    pub object_id: u64,
    pub type_name: &'a str,
    pub process: ProcessId,
    /// Access the event is about (desired, granted or first-used)
    pub access: AccessMask,
    pub success: bool,
}

/// Access-check collaborator
pub trait AccessValidator: Send + Sync {
    /// Decide an access request (SeAccessCheck)
    ///
    /// On success returns the granted mask and records it in `state`; may
    /// latch `generate_on_close` and `maximum_audit_mask`.
    fn check_access(
        &self,
        descriptor: Option<&SecurityDescriptor>,
        state: &mut AccessState,
        desired_access: AccessMask,
        mapping: &GenericMapping,
        mode: ProcessorMode,
    ) -> Result<AccessMask, SecurityError>;

    /// SeSinglePrivilegeCheck
    fn privilege_check(
        &self,
        subject: &SubjectContext,
        privilege: Privilege,
        mode: ProcessorMode,
    ) -> bool;

    /// Compute the descriptor of a new object (SeAssignSecurity)
    fn assign_security(
        &self,
        parent: Option<&SecurityDescriptor>,
        explicit: Option<&SecurityDescriptor>,
        is_container: bool,
        subject: &SubjectContext,
        mapping: &GenericMapping,
    ) -> Result<Option<SecurityDescriptor>, SecurityError>;

    /// Audit alarm; called whenever an audit bit was latched
    fn audit(&self, _event: &AuditEvent<'_>) {}
}

/// Grants everything, holds every privilege
pub struct PermissiveValidator {
    /// Latch audit-on-close for objects whose descriptor has a SACL
    audit_sacl_objects: bool,
    audits: AtomicUsize,
}

impl PermissiveValidator {
    pub fn new() -> Self {
        Self {
            audit_sacl_objects: false,
            audits: AtomicUsize::new(0),
        }
    }

    /// Variant that asks for close auditing on objects carrying a SACL
    pub fn with_sacl_auditing() -> Self {
        Self {
            audit_sacl_objects: true,
            audits: AtomicUsize::new(0),
        }
    }

    /// Number of audit alarms received
    pub fn audit_count(&self) -> usize {
        self.audits.load(Ordering::Relaxed)
    }
}

impl Default for PermissiveValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessValidator for PermissiveValidator {
    fn check_access(
        &self,
        descriptor: Option<&SecurityDescriptor>,
        state: &mut AccessState,
        desired_access: AccessMask,
        mapping: &GenericMapping,
        _mode: ProcessorMode,
    ) -> Result<AccessMask, SecurityError> {
        let mut granted = mapping.map_generic(desired_access);
        if granted & special_rights::MAXIMUM_ALLOWED != 0 {
            granted &= !special_rights::MAXIMUM_ALLOWED;
            granted |= mapping.map_generic(generic_rights::GENERIC_ALL);
        }

        state.grant(granted);
        if self.audit_sacl_objects && descriptor.is_some_and(|sd| sd.has_sacl()) {
            state.generate_on_close = true;
            state.maximum_audit_mask |= granted;
        }
        Ok(granted)
    }

    fn privilege_check(
        &self,
        _subject: &SubjectContext,
        _privilege: Privilege,
        _mode: ProcessorMode,
    ) -> bool {
        true
    }

    fn assign_security(
        &self,
        parent: Option<&SecurityDescriptor>,
        explicit: Option<&SecurityDescriptor>,
        _is_container: bool,
        _subject: &SubjectContext,
        _mapping: &GenericMapping,
    ) -> Result<Option<SecurityDescriptor>, SecurityError> {
        if let Some(explicit) = explicit {
            return Ok(Some(explicit.clone()));
        }

        match parent.and_then(|parent| parent.dacl().map(|dacl| (parent, dacl))) {
            Some((parent, dacl)) => {
                let owner = well_known::local_system();
                SecurityDescriptor::from_parts(
                    sd_control::SE_DACL_AUTO_INHERITED,
                    Some(owner.as_slice()),
                    parent.group(),
                    None,
                    Some(dacl),
                )
                .map(Some)
                .map_err(|_| SecurityError::InvalidDescriptor)
            }
            None => Ok(Some(SecurityDescriptor::system_default())),
        }
    }

    fn audit(&self, event: &AuditEvent<'_>) {
        log::trace!(
            "audit: {:?} object {} ({}) by {} access {:#x}",
            event.kind,
            event.object_id,
            event.type_name,
            event.process,
            event.access
        );
        self.audits.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ps::ThreadId;
    use crate::se::descriptor::{build_acl, Ace, AceType};

    const MAPPING: GenericMapping = GenericMapping::new(0x1, 0x2, 0x4, 0xF);

    fn subject() -> SubjectContext {
        SubjectContext {
            process: ProcessId(16),
            thread: ThreadId(3),
        }
    }

    #[test]
    fn test_maximum_allowed_maps_to_generic_all() {
        let validator = PermissiveValidator::new();
        let mut state = AccessState::new(subject(), special_rights::MAXIMUM_ALLOWED, &MAPPING);

        let granted = validator
            .check_access(
                None,
                &mut state,
                special_rights::MAXIMUM_ALLOWED,
                &MAPPING,
                ProcessorMode::UserMode,
            )
            .expect("permissive");
        assert_eq!(granted, 0xF);
        assert!(!state.generate_on_close);
    }

    #[test]
    fn test_sacl_latches_close_audit() {
        let validator = PermissiveValidator::with_sacl_auditing();
        let world = well_known::world();
        let sacl = build_acl(&[Ace {
            ace_type: AceType::SystemAudit,
            flags: 0xC0,
            mask: 0x1,
            sid: world.clone(),
        }]);
        let sd = SecurityDescriptor::from_parts(
            0,
            Some(world.as_slice()),
            None,
            Some(sacl.as_slice()),
            None,
        )
        .expect("valid");

        let mut state = AccessState::new(subject(), 0x1, &MAPPING);
        validator
            .check_access(Some(&sd), &mut state, 0x1, &MAPPING, ProcessorMode::UserMode)
            .expect("permissive");
        assert!(state.generate_on_close);
        assert_eq!(state.maximum_audit_mask, 0x1);
    }

    #[test]
    fn test_assign_inherits_parent_dacl() {
        let validator = PermissiveValidator::new();
        let parent = SecurityDescriptor::system_default();

        let child = validator
            .assign_security(Some(&parent), None, false, &subject(), &MAPPING)
            .expect("assign")
            .expect("descriptor");
        assert_eq!(child.dacl(), parent.dacl());
        assert_ne!(child.control() & sd_control::SE_DACL_AUTO_INHERITED, 0);

        let explicit = parent.query(crate::se::SecurityInformation::OWNER).expect("query");
        let assigned = validator
            .assign_security(Some(&parent), Some(&explicit), false, &subject(), &MAPPING)
            .expect("assign");
        assert_eq!(assigned, Some(explicit));
    }
}
