//! Process Manager (ps)
//!
//! The slice of process management the object manager depends on:
//!
//! - **Processes**: identity, quota block, handle table slot
//! - **Quota Blocks**: paged/non-paged pool charges with limits
//! - **Execution Context**: current process, thread and IRQL
//!
//! # Key Structures
//!
//! - `EPROCESS`: reduced to [`Process`]
//! - `EPROCESS_QUOTA_BLOCK`: [`QuotaBlock`]
//! - `CLIENT_ID`: [`ProcessId`] / [`ThreadId`]

pub mod context;
pub mod process;
pub mod quota;

pub use context::{ExecutionContext, SystemContext};
pub use process::{Process, ProcessId, ThreadId};
pub use quota::{QuotaBlock, QuotaUsage};
