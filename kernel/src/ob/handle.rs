//! Handle Table Implementation
//!
//! Each process has a handle table that maps handles (small integers)
//! to kernel objects; one more table holds kernel handles. A table entry
//! records:
//! - The referenced object
//! - The granted access mask
//! - Handle attributes (inherit, audit-on-close, protect-from-close)
//!
//! # Handle Format
//! ```text
//!  31   30        24 23                    2 1  0
//! +----+------------+-----------------------+----+
//! | K  | generation |      slot + 1         | xx |
//! +----+------------+-----------------------+----+
//! ```
//! - K: kernel handle, only valid from kernel mode
//! - generation: bumped each time a slot is freed, so a stale handle
//!   never reaches the slot's next occupant
//! - bits 0-1 are ignored, as on NT
//!
//! `0xFFFFFFFF` and `0xFFFFFFFE` are the current-process and
//! current-thread pseudo handles. They also have bit 31 set, so a handle
//! value is classified once into [`HandleKind`] and never re-tested bit
//! by bit.
//!
//! # Table Structure
//! Slots live in fixed-size segments allocated on first use. A slot's
//! entry is guarded by the slot's own lock; freed slots go on a free list.
//! The table's rundown protection keeps teardown from racing cross-process
//! users.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, MutexGuard, Once};

use super::attributes::HandleAttributes;
use super::header::ObjectRef;
use crate::ex::ExRundownRef;
use crate::mm::PoolBlock;
use crate::ps::ProcessId;
use crate::se::AccessMask;

/// Kernel handle bit
pub const KERNEL_HANDLE_FLAG: u32 = 0x8000_0000;

const GENERATION_SHIFT: u32 = 24;
const GENERATION_MASK: u32 = 0x7F;
const INDEX_SHIFT: u32 = 2;
const INDEX_MASK: u32 = 0x003F_FFFF;

/// Handles a table can address
pub const MAX_HANDLE_SLOTS: usize = INDEX_MASK as usize;

/// Slots per table segment
pub const HANDLE_SEGMENT_SIZE: usize = 256;

/// Handle value (unsigned 32-bit, like Windows HANDLE)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Handle(u32);

impl Handle {
    /// Null handle
    pub const NULL: Handle = Handle(0);
    /// NtCurrentProcess()
    pub const CURRENT_PROCESS: Handle = Handle(0xFFFF_FFFF);
    /// NtCurrentThread()
    pub const CURRENT_THREAD: Handle = Handle(0xFFFF_FFFE);

    #[inline]
    pub const fn from_raw(value: u32) -> Self {
        Handle(value)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    fn encode(index: HandleIndex, kernel: bool) -> Self {
        let mut value = ((index.slot + 1) & INDEX_MASK) << INDEX_SHIFT;
        value |= (index.generation as u32 & GENERATION_MASK) << GENERATION_SHIFT;
        if kernel {
            value |= KERNEL_HANDLE_FLAG;
        }
        Handle(value)
    }

    /// Classify a handle value
    pub fn classify(self) -> HandleKind {
        if self == Handle::CURRENT_PROCESS {
            return HandleKind::Pseudo(PseudoHandle::CurrentProcess);
        }
        if self == Handle::CURRENT_THREAD {
            return HandleKind::Pseudo(PseudoHandle::CurrentThread);
        }

        let encoded = (self.0 >> INDEX_SHIFT) & INDEX_MASK;
        if encoded == 0 {
            return HandleKind::Null;
        }
        let index = HandleIndex {
            slot: encoded - 1,
            generation: ((self.0 >> GENERATION_SHIFT) & GENERATION_MASK) as u8,
        };
        if self.0 & KERNEL_HANDLE_FLAG != 0 {
            HandleKind::Kernel(index)
        } else {
            HandleKind::User(index)
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.0)
    }
}

/// Position of an entry in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleIndex {
    pub slot: u32,
    pub generation: u8,
}

/// Pseudo handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoHandle {
    CurrentProcess,
    CurrentThread,
}

/// What a handle value denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Null,
    Pseudo(PseudoHandle),
    /// Entry in the kernel handle table
    Kernel(HandleIndex),
    /// Entry in the current process's table
    User(HandleIndex),
}

/// Handle table entry (HANDLE_TABLE_ENTRY)
#[derive(Clone)]
pub struct HandleTableEntry {
    pub object: ObjectRef,
    pub granted_access: AccessMask,
    pub attributes: HandleAttributes,
    pub creator_back_trace_index: u16,
}

impl HandleTableEntry {
    pub fn new(
        object: ObjectRef,
        granted_access: AccessMask,
        attributes: HandleAttributes,
    ) -> Self {
        Self {
            object,
            granted_access,
            attributes,
            creator_back_trace_index: 0,
        }
    }
}

impl fmt::Debug for HandleTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTableEntry")
            .field("object", &self.object.id())
            .field("granted_access", &format_args!("{:#x}", self.granted_access))
            .field("attributes", &self.attributes)
            .finish()
    }
}

#[derive(Default)]
struct SlotState {
    generation: u8,
    entry: Option<HandleTableEntry>,
}

struct HandleSlot {
    state: Mutex<SlotState>,
    /// Access bits whose first use still has to be audited
    audit_mask: AtomicU32,
}

impl HandleSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::default()),
            audit_mask: AtomicU32::new(0),
        }
    }
}

struct FreeList {
    free: Vec<u32>,
    next_unused: u32,
}

/// Locked table entry (ExMapHandleToPointer)
///
/// The slot stays locked, and so cannot be freed or reused, until this
/// is dropped or passed to [`HandleTable::destroy_entry`].
pub struct LockedHandleEntry<'a> {
    guard: MutexGuard<'a, SlotState>,
    slot: &'a HandleSlot,
    index: HandleIndex,
    kernel: bool,
}

impl LockedHandleEntry<'_> {
    pub fn entry(&self) -> &HandleTableEntry {
        // Only built for slots holding an entry
        match self.guard.entry.as_ref() {
            Some(entry) => entry,
            None => unreachable!("locked handle entry without an entry"),
        }
    }

    pub fn entry_mut(&mut self) -> &mut HandleTableEntry {
        match self.guard.entry.as_mut() {
            Some(entry) => entry,
            None => unreachable!("locked handle entry without an entry"),
        }
    }

    pub fn handle(&self) -> Handle {
        Handle::encode(self.index, self.kernel)
    }

    pub fn audit_mask(&self) -> AccessMask {
        self.slot.audit_mask.load(Ordering::Acquire)
    }

    /// Clear `bits` from the audit mask, returning the bits this caller
    /// cleared; each bit is reported to exactly one caller
    pub fn consume_audit_bits(&self, bits: AccessMask) -> AccessMask {
        let mut current = self.slot.audit_mask.load(Ordering::Acquire);
        loop {
            let cleared = current & bits;
            if cleared == 0 {
                return 0;
            }
            match self.slot.audit_mask.compare_exchange_weak(
                current,
                current & !bits,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return cleared,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Handle table (HANDLE_TABLE)
pub struct HandleTable {
    owner: ProcessId,
    kernel: bool,
    segments: Box<[Once<Box<[HandleSlot]>>]>,
    free_list: Mutex<FreeList>,
    handle_count: AtomicU32,
    rundown: ExRundownRef,
    max_handles: usize,
    pool_block: Mutex<Option<PoolBlock>>,
}

impl HandleTable {
    /// Create an empty table (ExCreateHandleTable)
    pub fn new(owner: ProcessId, kernel: bool, max_handles: usize) -> Self {
        let max_handles = max_handles.clamp(1, MAX_HANDLE_SLOTS);
        let segment_count = max_handles.div_ceil(HANDLE_SEGMENT_SIZE);
        Self {
            owner,
            kernel,
            segments: (0..segment_count).map(|_| Once::new()).collect(),
            free_list: Mutex::new(FreeList {
                free: Vec::new(),
                next_unused: 0,
            }),
            handle_count: AtomicU32::new(0),
            rundown: ExRundownRef::new(),
            max_handles,
            pool_block: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> ProcessId {
        self.owner
    }

    /// The kernel handle table
    pub fn is_kernel(&self) -> bool {
        self.kernel
    }

    pub fn handle_count(&self) -> u32 {
        self.handle_count.load(Ordering::Acquire)
    }

    pub fn max_handles(&self) -> usize {
        self.max_handles
    }

    pub fn rundown(&self) -> &ExRundownRef {
        &self.rundown
    }

    pub(crate) fn set_pool_block(&self, block: PoolBlock) {
        *self.pool_block.lock() = Some(block);
    }

    pub(crate) fn take_pool_block(&self) -> Option<PoolBlock> {
        self.pool_block.lock().take()
    }

    fn slot(&self, slot: u32) -> Option<&HandleSlot> {
        let slot = slot as usize;
        if slot >= self.max_handles {
            return None;
        }
        let segment = self.segments.get(slot / HANDLE_SEGMENT_SIZE)?.get()?;
        segment.get(slot % HANDLE_SEGMENT_SIZE)
    }

    fn slot_or_allocate(&self, slot: u32) -> Option<&HandleSlot> {
        let slot = slot as usize;
        if slot >= self.max_handles {
            return None;
        }
        let segment = self.segments.get(slot / HANDLE_SEGMENT_SIZE)?.call_once(|| {
            (0..HANDLE_SEGMENT_SIZE).map(|_| HandleSlot::new()).collect()
        });
        segment.get(slot % HANDLE_SEGMENT_SIZE)
    }

    fn allocate_slot(&self) -> Option<u32> {
        let mut free_list = self.free_list.lock();
        if let Some(slot) = free_list.free.pop() {
            return Some(slot);
        }
        if (free_list.next_unused as usize) < self.max_handles {
            let slot = free_list.next_unused;
            free_list.next_unused += 1;
            return Some(slot);
        }
        None
    }

    fn free_slot(&self, slot: u32) {
        self.free_list.lock().free.push(slot);
    }

    /// Insert an entry (ExCreateHandle); `None` when the table is full
    pub fn create_entry(&self, entry: HandleTableEntry, audit_mask: AccessMask) -> Option<Handle> {
        let slot_index = self.allocate_slot()?;
        let slot = match self.slot_or_allocate(slot_index) {
            Some(slot) => slot,
            None => {
                self.free_slot(slot_index);
                return None;
            }
        };

        let mut state = slot.state.lock();
        state.entry = Some(entry);
        slot.audit_mask.store(audit_mask, Ordering::Release);
        let index = HandleIndex {
            slot: slot_index,
            generation: state.generation,
        };
        drop(state);

        self.handle_count.fetch_add(1, Ordering::AcqRel);
        Some(Handle::encode(index, self.kernel))
    }

    /// Lock the entry a handle names (ExMapHandleToPointer)
    pub fn map_handle_to_entry(&self, index: HandleIndex) -> Option<LockedHandleEntry<'_>> {
        let slot = self.slot(index.slot)?;
        let guard = slot.state.lock();
        if guard.generation != index.generation || guard.entry.is_none() {
            return None;
        }
        Some(LockedHandleEntry {
            guard,
            slot,
            index,
            kernel: self.kernel,
        })
    }

    /// Remove a locked entry (ExDestroyHandle)
    pub fn destroy_entry(&self, mut locked: LockedHandleEntry<'_>) -> Option<HandleTableEntry> {
        let entry = locked.guard.entry.take();
        locked.guard.generation = (locked.guard.generation.wrapping_add(1)) & GENERATION_MASK as u8;
        locked.slot.audit_mask.store(0, Ordering::Release);
        let slot = locked.index.slot;
        drop(locked);

        self.free_slot(slot);
        self.handle_count.fetch_sub(1, Ordering::AcqRel);
        entry
    }

    /// Copy of every entry with its handle (ExEnumHandleTable)
    pub fn entries(&self) -> Vec<(Handle, HandleTableEntry)> {
        let mut entries = Vec::new();
        self.for_each_slot(|index, slot| {
            let state = slot.state.lock();
            if let Some(entry) = state.entry.as_ref() {
                let handle = Handle::encode(
                    HandleIndex {
                        slot: index,
                        generation: state.generation,
                    },
                    self.kernel,
                );
                entries.push((handle, entry.clone()));
            }
        });
        entries
    }

    /// Remove every entry, handing each to `close` outside the slot lock
    /// (ExSweepHandleTable)
    pub fn sweep(&self, mut close: impl FnMut(Handle, HandleTableEntry)) {
        let mut removed = Vec::new();
        self.for_each_slot(|index, slot| {
            let mut state = slot.state.lock();
            if let Some(entry) = state.entry.take() {
                let handle = Handle::encode(
                    HandleIndex {
                        slot: index,
                        generation: state.generation,
                    },
                    self.kernel,
                );
                state.generation = state.generation.wrapping_add(1) & GENERATION_MASK as u8;
                slot.audit_mask.store(0, Ordering::Release);
                removed.push((index, handle, entry));
            }
        });

        for (index, handle, entry) in removed {
            self.free_slot(index);
            self.handle_count.fetch_sub(1, Ordering::AcqRel);
            close(handle, entry);
        }
    }

    /// Build a child's table from the entries `duplicate` accepts
    /// (ExDupHandleTable)
    ///
    /// Accepted entries keep their handle values. `duplicate` runs with no
    /// slot lock held and may return an adjusted entry.
    pub fn duplicate_for_inheritance(
        &self,
        owner: ProcessId,
        mut duplicate: impl FnMut(&HandleTableEntry) -> Option<HandleTableEntry>,
    ) -> HandleTable {
        let mut candidates = Vec::new();
        self.for_each_slot(|index, slot| {
            let state = slot.state.lock();
            if let Some(entry) = state.entry.as_ref() {
                candidates.push((
                    index,
                    state.generation,
                    entry.clone(),
                    slot.audit_mask.load(Ordering::Acquire),
                ));
            }
        });

        let table = HandleTable::new(owner, self.kernel, self.max_handles);
        let next_unused = self.free_list.lock().next_unused;
        let mut used = alloc::vec![false; next_unused as usize];

        for (index, generation, entry, audit_mask) in candidates {
            let Some(entry) = duplicate(&entry) else {
                continue;
            };
            if let Some(slot) = table.slot_or_allocate(index) {
                let mut state = slot.state.lock();
                state.generation = generation;
                state.entry = Some(entry);
                slot.audit_mask.store(audit_mask, Ordering::Release);
                drop(state);
                table.handle_count.fetch_add(1, Ordering::AcqRel);
                if let Some(flag) = used.get_mut(index as usize) {
                    *flag = true;
                }
            }
        }

        {
            let mut free_list = table.free_list.lock();
            free_list.next_unused = next_unused;
            free_list.free = (0..next_unused).rev().filter(|slot| !used[*slot as usize]).collect();
        }
        table
    }

    fn for_each_slot(&self, mut visit: impl FnMut(u32, &HandleSlot)) {
        for (segment_index, segment) in self.segments.iter().enumerate() {
            let Some(slots) = segment.get() else {
                continue;
            };
            for (offset, slot) in slots.iter().enumerate() {
                visit((segment_index * HANDLE_SEGMENT_SIZE + offset) as u32, slot);
            }
        }
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("owner", &self.owner)
            .field("kernel", &self.kernel)
            .field("handle_count", &self.handle_count())
            .finish()
    }
}

/// Handle table statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct HandleTableStats {
    pub handle_count: u32,
    pub max_handles: usize,
    pub rundown_references: usize,
}

impl HandleTable {
    pub fn stats(&self) -> HandleTableStats {
        HandleTableStats {
            handle_count: self.handle_count(),
            max_handles: self.max_handles,
            rundown_references: self.rundown.reference_count(),
        }
    }
}
