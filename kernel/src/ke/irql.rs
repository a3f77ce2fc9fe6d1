//! IRQL and processor mode
//!
//! The object manager never raises or lowers IRQL itself. It only asks
//! the execution context which level the caller runs at, to decide
//! whether an object whose last reference went away may be deleted in
//! line or has to be handed to a worker thread.

/// Interrupt Request Level type
pub type Kirql = u8;

/// IRQL levels (NT compatible)
pub mod irql {
    use super::Kirql;

    /// Passive level - normal thread execution, all interrupts enabled
    pub const PASSIVE_LEVEL: Kirql = 0;
    /// APC level - APCs are disabled
    pub const APC_LEVEL: Kirql = 1;
    /// Dispatch level - thread preemption disabled, DPCs run here
    pub const DISPATCH_LEVEL: Kirql = 2;
    /// Highest level - all interrupts disabled
    pub const HIGH_LEVEL: Kirql = 31;
}

/// Whether code running at `level` may block, allocate paged pool or
/// take page faults.
#[inline]
pub const fn can_block_at(level: Kirql) -> bool {
    level == irql::PASSIVE_LEVEL
}

/// Processor mode of the caller (KPROCESSOR_MODE)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessorMode {
    /// Trusted kernel-mode caller
    #[default]
    KernelMode = 0,
    /// Untrusted caller arriving through a system service
    UserMode = 1,
}

impl ProcessorMode {
    #[inline]
    pub fn is_kernel(self) -> bool {
        self == ProcessorMode::KernelMode
    }
}
