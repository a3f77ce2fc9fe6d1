//! Object manager configuration
//!
//! Tunables fixed at initialization. Structural constants (lock shards,
//! cache buckets, fast-reference budget, handle database growth) live
//! next to the code that uses them.

use super::handle::MAX_HANDLE_SLOTS;

/// Default number of indexed object types (OBJECT_TYPE_TABLE)
pub const DEFAULT_MAX_OBJECT_TYPES: usize = 48;

/// Default per-table handle limit
pub const DEFAULT_MAX_HANDLES: usize = 1 << 20;

/// Security quota charged for an object with a descriptor
/// (SE_DEFAULT_SECURITY_QUOTA)
pub const SE_DEFAULT_SECURITY_QUOTA: u32 = 2048;

/// Object manager configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObConfig {
    /// Types past this index are created but not indexed
    pub max_object_types: usize,
    /// Handle slots per table, capped by the handle encoding
    pub max_handles_per_table: usize,
    /// Track instances on every type (FLG_MAINTAIN_OBJECT_TYPELIST)
    pub maintain_type_lists: bool,
    pub default_security_quota: u32,
    /// Name lookups ignore case unless a type opts out (ObpCaseInsensitive)
    pub case_insensitive_names: bool,
}

impl ObConfig {
    /// Handle slots actually available per table
    pub fn handle_limit(&self) -> usize {
        self.max_handles_per_table.clamp(1, MAX_HANDLE_SLOTS)
    }
}

impl Default for ObConfig {
    fn default() -> Self {
        Self {
            max_object_types: DEFAULT_MAX_OBJECT_TYPES,
            max_handles_per_table: DEFAULT_MAX_HANDLES,
            maintain_type_lists: false,
            default_security_quota: SE_DEFAULT_SECURITY_QUOTA,
            case_insensitive_names: true,
        }
    }
}
