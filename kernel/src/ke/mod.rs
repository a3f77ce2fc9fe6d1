//! Kernel (ke)
//!
//! Only the pieces of the kernel layer the object manager consults:
//!
//! - PASSIVE_LEVEL (0): Normal thread execution, blocking allowed
//! - APC_LEVEL (1): APC delivery disabled
//! - DISPATCH_LEVEL (2): DPC execution, no blocking
//! - HIGH_LEVEL (31): Clock, IPI, power fail
//!
//! plus the processor mode (kernel/user) of a caller.

pub mod irql;

pub use irql::{can_block_at, irql as levels, Kirql, ProcessorMode};
