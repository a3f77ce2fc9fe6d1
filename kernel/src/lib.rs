//! Nostalgia OS Object Manager
//!
//! The object manager (ob) of the Nostalgia OS kernel, packaged as a
//! `no_std` library so the rest of the kernel and the host test suite can
//! link against it.
//!
//! # Subsystems
//!
//! - **ob** - Object Manager: headers, types, handle tables, reference
//!   counting, security descriptor cache, namespace glue
//! - **ex** - Executive support: rundown protection, push locks, fast
//!   references, work queues
//! - **se** - Security: access masks, access state, security descriptors,
//!   access validation interface
//! - **ps** - Process support: processes, quota blocks, execution context
//! - **mm** - Memory Manager: pool types, tags and the pool allocator
//!   interface
//! - **ke** - Kernel: IRQL levels and processor modes
//!
//! Everything the object manager needs from the rest of the kernel is
//! consumed through the collaborator traits in `mm`, `se`, `ps`, `ex` and
//! `ob::namespace`, and injected into [`ob::ObjectManager`].

#![cfg_attr(not(test), no_std)]
// Kernel-specific lint configurations:
// - missing_safety_doc: unsafe blocks are documented at the call site
// - too_many_arguments: NT object APIs carry many parameters
// - type_complexity: callback tables are necessarily complex
#![allow(clippy::missing_safety_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

extern crate alloc;

pub mod ex;
pub mod ke;
pub mod mm;
pub mod ob;
pub mod ps;
pub mod se;
