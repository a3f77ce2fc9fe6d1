//! Executive (ex)
//!
//! Executive support used by the object manager:
//!
//! - **Rundown Protection**: Safe teardown of handle tables
//! - **Push Locks**: Lightweight reader-writer locks (object lock shards,
//!   directory locks)
//! - **Fast References**: Budgeted references on shared security
//!   descriptors
//! - **Worker Queues**: Deferred work execution
//!
//! # Key Structures
//!
//! - `EX_RUNDOWN_REF`: Rundown protection
//! - `EX_PUSH_LOCK`: Lightweight RW lock
//! - `EX_FAST_REF`: Pointer plus reference budget
//! - `WORK_QUEUE_ITEM`: Deferred work item

pub mod fastref;
pub mod pushlock;
pub mod rundown;
pub mod worker;

// Re-exports for convenience
pub use fastref::*;
pub use pushlock::*;
pub use rundown::*;
pub use worker::*;
