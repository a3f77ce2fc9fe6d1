//! Security Descriptor Implementation
//!
//! A security descriptor contains the security information for an object:
//! - Owner SID: Who owns the object
//! - Group SID: Primary group of the object
//! - DACL: Discretionary ACL - who can access the object
//! - SACL: System ACL - auditing information
//!
//! # Format
//! Objects only ever carry self-relative descriptors: one contiguous,
//! immutable byte block that can be hashed and compared byte for byte,
//! which is what lets the object manager de-duplicate them.
//!
//! ```text
//! 0  Revision (1)      1  Sbz1
//! 2  Control (u16)
//! 4  OffsetOwner (u32) 8  OffsetGroup (u32)
//! 12 OffsetSacl (u32)  16 OffsetDacl (u32)
//! 20 ... SIDs and ACLs
//! ```
//!
//! An offset of zero means the section is absent.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Security descriptor revision
pub const SECURITY_DESCRIPTOR_REVISION: u8 = 1;

/// Size of the self-relative header
pub const SECURITY_DESCRIPTOR_MIN_LENGTH: usize = 20;

/// ACL revisions accepted in a descriptor
pub const ACL_REVISION: u8 = 2;
pub const ACL_REVISION_DS: u8 = 4;

const ACL_HEADER_SIZE: usize = 8;
const ACE_HEADER_SIZE: usize = 8;
const SID_REVISION: u8 = 1;
const SID_MAX_SUB_AUTHORITIES: u8 = 15;

/// Security descriptor control flags
pub mod sd_control {
    /// Owner defaulted (set by RM, not creator)
    pub const SE_OWNER_DEFAULTED: u16 = 0x0001;
    /// Group defaulted
    pub const SE_GROUP_DEFAULTED: u16 = 0x0002;
    /// DACL present
    pub const SE_DACL_PRESENT: u16 = 0x0004;
    /// DACL defaulted
    pub const SE_DACL_DEFAULTED: u16 = 0x0008;
    /// SACL present
    pub const SE_SACL_PRESENT: u16 = 0x0010;
    /// SACL defaulted
    pub const SE_SACL_DEFAULTED: u16 = 0x0020;
    /// DACL was auto-inherited
    pub const SE_DACL_AUTO_INHERITED: u16 = 0x0400;
    /// SACL was auto-inherited
    pub const SE_SACL_AUTO_INHERITED: u16 = 0x0800;
    /// DACL protected from inheritance
    pub const SE_DACL_PROTECTED: u16 = 0x1000;
    /// SACL protected from inheritance
    pub const SE_SACL_PROTECTED: u16 = 0x2000;
    /// Self-relative format
    pub const SE_SELF_RELATIVE: u16 = 0x8000;

    pub(super) const OWNER_BITS: u16 = SE_OWNER_DEFAULTED;
    pub(super) const GROUP_BITS: u16 = SE_GROUP_DEFAULTED;
    pub(super) const DACL_BITS: u16 =
        SE_DACL_PRESENT | SE_DACL_DEFAULTED | SE_DACL_AUTO_INHERITED | SE_DACL_PROTECTED;
    pub(super) const SACL_BITS: u16 =
        SE_SACL_PRESENT | SE_SACL_DEFAULTED | SE_SACL_AUTO_INHERITED | SE_SACL_PROTECTED;
}

bitflags::bitflags! {
    /// Which parts of a descriptor an operation touches (SECURITY_INFORMATION)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SecurityInformation: u32 {
        const OWNER = 0x0000_0001;
        const GROUP = 0x0000_0002;
        const DACL = 0x0000_0004;
        const SACL = 0x0000_0008;
    }
}

/// Why a byte block is not a valid self-relative descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    /// Shorter than the self-relative header
    TooSmall,
    /// Unknown descriptor revision
    BadRevision,
    /// SE_SELF_RELATIVE is not set
    NotSelfRelative,
    /// A section offset points outside the block
    BadOffset,
    /// Malformed owner SID
    BadOwner,
    /// Malformed group SID
    BadGroup,
    /// Malformed ACL
    BadAcl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Section {
    offset: usize,
    length: usize,
}

/// Immutable self-relative security descriptor
#[derive(Clone, PartialEq, Eq)]
pub struct SecurityDescriptor {
    bytes: Vec<u8>,
    owner: Option<Section>,
    group: Option<Section>,
    sacl: Option<Section>,
    dacl: Option<Section>,
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Length of the SID starting at `bytes[0]`, if well formed
pub fn sid_length(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < 8 || bytes[0] != SID_REVISION || bytes[1] > SID_MAX_SUB_AUTHORITIES {
        return None;
    }
    let length = 8 + 4 * bytes[1] as usize;
    (length <= bytes.len()).then_some(length)
}

/// Length of the ACL starting at `bytes[0]`, if well formed
pub fn acl_length(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < ACL_HEADER_SIZE {
        return None;
    }
    if bytes[0] != ACL_REVISION && bytes[0] != ACL_REVISION_DS {
        return None;
    }
    let length = read_u16(bytes, 2) as usize;
    (ACL_HEADER_SIZE..=bytes.len())
        .contains(&length)
        .then_some(length)
}

fn parse_section(
    bytes: &[u8],
    offset_at: usize,
    measure: fn(&[u8]) -> Option<usize>,
    error: DescriptorError,
) -> Result<Option<Section>, DescriptorError> {
    let offset = read_u32(bytes, offset_at) as usize;
    if offset == 0 {
        return Ok(None);
    }
    if offset < SECURITY_DESCRIPTOR_MIN_LENGTH || offset >= bytes.len() {
        return Err(DescriptorError::BadOffset);
    }
    let length = measure(&bytes[offset..]).ok_or(error)?;
    Ok(Some(Section { offset, length }))
}

impl SecurityDescriptor {
    /// Validate and adopt a self-relative descriptor (RtlValidRelativeSecurityDescriptor)
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DescriptorError> {
        if bytes.len() < SECURITY_DESCRIPTOR_MIN_LENGTH {
            return Err(DescriptorError::TooSmall);
        }
        if bytes[0] != SECURITY_DESCRIPTOR_REVISION {
            return Err(DescriptorError::BadRevision);
        }
        let control = read_u16(&bytes, 2);
        if control & sd_control::SE_SELF_RELATIVE == 0 {
            return Err(DescriptorError::NotSelfRelative);
        }

        let owner = parse_section(&bytes, 4, sid_length, DescriptorError::BadOwner)?;
        let group = parse_section(&bytes, 8, sid_length, DescriptorError::BadGroup)?;
        let sacl = if control & sd_control::SE_SACL_PRESENT != 0 {
            parse_section(&bytes, 12, acl_length, DescriptorError::BadAcl)?
        } else {
            None
        };
        let dacl = if control & sd_control::SE_DACL_PRESENT != 0 {
            parse_section(&bytes, 16, acl_length, DescriptorError::BadAcl)?
        } else {
            None
        };

        Ok(Self {
            bytes,
            owner,
            group,
            sacl,
            dacl,
        })
    }

    /// Build a descriptor from its parts
    ///
    /// `owner` and `group` are SIDs, `sacl` and `dacl` ACLs. Present bits
    /// for the ACLs are derived from the arguments.
    pub fn from_parts(
        control: u16,
        owner: Option<&[u8]>,
        group: Option<&[u8]>,
        sacl: Option<&[u8]>,
        dacl: Option<&[u8]>,
    ) -> Result<Self, DescriptorError> {
        let mut control = control
            & !(sd_control::SE_DACL_PRESENT | sd_control::SE_SACL_PRESENT)
            | sd_control::SE_SELF_RELATIVE;
        if sacl.is_some() {
            control |= sd_control::SE_SACL_PRESENT;
        }
        if dacl.is_some() {
            control |= sd_control::SE_DACL_PRESENT;
        }

        let mut bytes = vec![0u8; SECURITY_DESCRIPTOR_MIN_LENGTH];
        bytes[0] = SECURITY_DESCRIPTOR_REVISION;
        bytes[2..4].copy_from_slice(&control.to_le_bytes());

        // Section order in the block: owner, group, sacl, dacl
        for (offset_at, part) in [(4usize, owner), (8, group), (12, sacl), (16, dacl)] {
            if let Some(part) = part {
                let offset = bytes.len() as u32;
                bytes[offset_at..offset_at + 4].copy_from_slice(&offset.to_le_bytes());
                bytes.extend_from_slice(part);
            }
        }

        Self::from_bytes(bytes)
    }

    /// Default descriptor for system objects: owned by LocalSystem, full
    /// access for LocalSystem and Administrators
    pub fn system_default() -> Self {
        let system = well_known::local_system();
        let admins = well_known::administrators();
        let dacl = build_acl(&[
            Ace::allowed(super::access::generic_rights::GENERIC_ALL, &system),
            Ace::allowed(super::access::generic_rights::GENERIC_ALL, &admins),
        ]);

        // Every part is well formed, so this cannot fail; fall back to an
        // owner-only descriptor rather than panic.
        Self::from_parts(
            0,
            Some(system.as_slice()),
            Some(admins.as_slice()),
            None,
            Some(dacl.as_slice()),
        )
        .unwrap_or_else(|_| Self::minimal())
    }

    fn minimal() -> Self {
        let mut bytes = vec![0u8; SECURITY_DESCRIPTOR_MIN_LENGTH];
        bytes[0] = SECURITY_DESCRIPTOR_REVISION;
        bytes[2..4].copy_from_slice(&sd_control::SE_SELF_RELATIVE.to_le_bytes());
        Self {
            bytes,
            owner: None,
            group: None,
            sacl: None,
            dacl: None,
        }
    }

    fn slice(&self, section: Option<Section>) -> Option<&[u8]> {
        section.map(|s| &self.bytes[s.offset..s.offset + s.length])
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn control(&self) -> u16 {
        read_u16(&self.bytes, 2)
    }

    pub fn owner(&self) -> Option<&[u8]> {
        self.slice(self.owner)
    }

    pub fn group(&self) -> Option<&[u8]> {
        self.slice(self.group)
    }

    pub fn sacl(&self) -> Option<&[u8]> {
        self.slice(self.sacl)
    }

    pub fn dacl(&self) -> Option<&[u8]> {
        self.slice(self.dacl)
    }

    pub fn has_sacl(&self) -> bool {
        self.sacl.is_some()
    }

    /// Copy of the parts named by `info` (SeQuerySecurityDescriptorInfo)
    pub fn query(&self, info: SecurityInformation) -> Result<Self, DescriptorError> {
        let current = self.control();
        let mut control = 0u16;

        let owner = if info.contains(SecurityInformation::OWNER) {
            control |= current & sd_control::OWNER_BITS;
            self.owner()
        } else {
            None
        };
        let group = if info.contains(SecurityInformation::GROUP) {
            control |= current & sd_control::GROUP_BITS;
            self.group()
        } else {
            None
        };
        let sacl = if info.contains(SecurityInformation::SACL) {
            control |= current & sd_control::SACL_BITS;
            self.sacl()
        } else {
            None
        };
        let dacl = if info.contains(SecurityInformation::DACL) {
            control |= current & sd_control::DACL_BITS;
            self.dacl()
        } else {
            None
        };

        Self::from_parts(control, owner, group, sacl, dacl)
    }

    /// New descriptor with the parts named by `info` taken from
    /// `modification` and the rest kept (SeSetSecurityDescriptorInfo)
    pub fn merge(
        &self,
        info: SecurityInformation,
        modification: &SecurityDescriptor,
    ) -> Result<Self, DescriptorError> {
        let mut control = 0u16;
        let mut choose = |flag: SecurityInformation, bits: u16| {
            let source = if info.contains(flag) { modification } else { self };
            control |= source.control() & bits;
            source
        };

        let owner = choose(SecurityInformation::OWNER, sd_control::OWNER_BITS).owner();
        let group = choose(SecurityInformation::GROUP, sd_control::GROUP_BITS).group();
        let sacl = choose(SecurityInformation::SACL, sd_control::SACL_BITS).sacl();
        let dacl = choose(SecurityInformation::DACL, sd_control::DACL_BITS).dacl();

        Self::from_parts(control, owner, group, sacl, dacl)
    }
}

impl fmt::Debug for SecurityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityDescriptor")
            .field("length", &self.bytes.len())
            .field("control", &format_args!("{:#06x}", self.control()))
            .field("owner", &self.owner.is_some())
            .field("group", &self.group.is_some())
            .field("sacl", &self.sacl.is_some())
            .field("dacl", &self.dacl.is_some())
            .finish()
    }
}

/// Build a SID from an identifier authority and sub-authorities
pub fn build_sid(authority: u8, sub_authorities: &[u32]) -> Vec<u8> {
    let mut sid = Vec::with_capacity(8 + 4 * sub_authorities.len());
    sid.push(SID_REVISION);
    sid.push(sub_authorities.len() as u8);
    sid.extend_from_slice(&[0, 0, 0, 0, 0, authority]);
    for sub in sub_authorities {
        sid.extend_from_slice(&sub.to_le_bytes());
    }
    sid
}

/// Well-known SIDs
pub mod well_known {
    use super::build_sid;
    use alloc::vec::Vec;

    /// S-1-5-18
    pub fn local_system() -> Vec<u8> {
        build_sid(5, &[18])
    }

    /// S-1-5-32-544
    pub fn administrators() -> Vec<u8> {
        build_sid(5, &[32, 544])
    }

    /// S-1-1-0
    pub fn world() -> Vec<u8> {
        build_sid(1, &[0])
    }
}

/// ACE types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AceType {
    AccessAllowed = 0,
    AccessDenied = 1,
    SystemAudit = 2,
}

/// One access control entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ace {
    pub ace_type: AceType,
    pub flags: u8,
    pub mask: u32,
    pub sid: Vec<u8>,
}

impl Ace {
    pub fn allowed(mask: u32, sid: &[u8]) -> Self {
        Self {
            ace_type: AceType::AccessAllowed,
            flags: 0,
            mask,
            sid: sid.to_vec(),
        }
    }

    pub fn denied(mask: u32, sid: &[u8]) -> Self {
        Self {
            ace_type: AceType::AccessDenied,
            flags: 0,
            mask,
            sid: sid.to_vec(),
        }
    }
}

/// Serialize ACEs into an ACL
pub fn build_acl(aces: &[Ace]) -> Vec<u8> {
    let size: usize = ACL_HEADER_SIZE
        + aces
            .iter()
            .map(|ace| ACE_HEADER_SIZE + ace.sid.len())
            .sum::<usize>();

    let mut acl = Vec::with_capacity(size);
    acl.push(ACL_REVISION);
    acl.push(0);
    acl.extend_from_slice(&(size as u16).to_le_bytes());
    acl.extend_from_slice(&(aces.len() as u16).to_le_bytes());
    acl.extend_from_slice(&0u16.to_le_bytes());

    for ace in aces {
        acl.push(ace.ace_type as u8);
        acl.push(ace.flags);
        acl.extend_from_slice(&((ACE_HEADER_SIZE + ace.sid.len()) as u16).to_le_bytes());
        acl.extend_from_slice(&ace.mask.to_le_bytes());
        acl.extend_from_slice(&ace.sid);
    }
    acl
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_default_layout() {
        let sd = SecurityDescriptor::system_default();

        assert_eq!(sd.as_bytes()[0], SECURITY_DESCRIPTOR_REVISION);
        assert_ne!(sd.control() & sd_control::SE_SELF_RELATIVE, 0);
        assert_ne!(sd.control() & sd_control::SE_DACL_PRESENT, 0);
        assert_eq!(sd.owner(), Some(well_known::local_system().as_slice()));
        assert_eq!(sd.group(), Some(well_known::administrators().as_slice()));
        assert!(sd.sacl().is_none());
        assert_eq!(acl_length(sd.dacl().expect("dacl")), Some(8 + (8 + 12) + (8 + 16)));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert_eq!(
            SecurityDescriptor::from_bytes(vec![1, 0, 0]),
            Err(DescriptorError::TooSmall)
        );

        let mut bytes = SecurityDescriptor::system_default().into_bytes();
        bytes[0] = 2;
        assert_eq!(
            SecurityDescriptor::from_bytes(bytes.clone()),
            Err(DescriptorError::BadRevision)
        );

        bytes[0] = 1;
        bytes[3] &= 0x7F;
        assert_eq!(
            SecurityDescriptor::from_bytes(bytes.clone()),
            Err(DescriptorError::NotSelfRelative)
        );

        bytes[3] |= 0x80;
        bytes[4..8].copy_from_slice(&0xFFFFu32.to_le_bytes());
        assert_eq!(
            SecurityDescriptor::from_bytes(bytes),
            Err(DescriptorError::BadOffset)
        );
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let sd = SecurityDescriptor::system_default();
        let copy = SecurityDescriptor::from_bytes(sd.as_bytes().to_vec()).expect("valid");
        assert_eq!(sd, copy);
    }

    #[test]
    fn test_query_selects_parts() {
        let sd = SecurityDescriptor::system_default();
        let owner_only = sd.query(SecurityInformation::OWNER).expect("query");

        assert_eq!(owner_only.owner(), sd.owner());
        assert!(owner_only.group().is_none());
        assert!(owner_only.dacl().is_none());
        assert_eq!(owner_only.control() & sd_control::SE_DACL_PRESENT, 0);
    }

    #[test]
    fn test_merge_replaces_named_parts() {
        let sd = SecurityDescriptor::system_default();
        let world = well_known::world();
        let open_dacl = build_acl(&[Ace::allowed(0x1F_FFFF, &world)]);
        let modification = SecurityDescriptor::from_parts(
            0,
            Some(world.as_slice()),
            None,
            None,
            Some(open_dacl.as_slice()),
        )
        .expect("valid");

        let merged = sd.merge(SecurityInformation::DACL, &modification).expect("merge");
        assert_eq!(merged.owner(), sd.owner());
        assert_eq!(merged.group(), sd.group());
        assert_eq!(merged.dacl(), Some(open_dacl.as_slice()));

        let merged = sd.merge(SecurityInformation::OWNER, &modification).expect("merge");
        assert_eq!(merged.owner(), Some(world.as_slice()));
        assert_eq!(merged.dacl(), sd.dacl());
    }
}
