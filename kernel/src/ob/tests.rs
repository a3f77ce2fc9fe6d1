//! End-to-end object manager scenarios
//!
//! Each test builds its own manager on the in-crate collaborators and
//! drives it through the public operations, switching the current process
//! through a shared [`SystemContext`].

use super::*;
use crate::ex::{SystemWorkQueue, WorkQueueType, MAX_FAST_REFS};
use crate::ke::{levels, ProcessorMode};
use crate::ps::{Process, ProcessId, QuotaBlock, SystemContext};
use crate::se::{
    build_acl, build_sid, standard_rights, well_known, AccessMask, AccessState, AccessValidator,
    Ace, AceType, AuditEvent, AuditKind, GenericMapping, PermissiveValidator, Privilege,
    SecurityDescriptor, SecurityError, SubjectContext, RESERVED_ACCESS_BITS,
};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

const EVENT_ALL_ACCESS: u32 = standard_rights::STANDARD_RIGHTS_REQUIRED | 0x3;

#[derive(Default)]
struct Recorder {
    opens: Mutex<Vec<(OpenReason, ProcessId)>>,
    closes: Mutex<Vec<u32>>,
    deletes: AtomicUsize,
    /// Processes whose opens the type refuses
    refused: Mutex<Vec<ProcessId>>,
}

struct RecordingMethods {
    recorder: Arc<Recorder>,
    procedures: ObjectProcedures,
}

impl ObjectTypeMethods for RecordingMethods {
    fn procedures(&self) -> ObjectProcedures {
        self.procedures
    }

    fn open(
        &self,
        reason: OpenReason,
        process: ProcessId,
        _object: &ObjectRef,
        _granted_access: u32,
        _process_handle_count: u32,
    ) -> ObResult<()> {
        if self.recorder.refused.lock().contains(&process) {
            return Err(ObError::AccessDenied);
        }
        self.recorder.opens.lock().push((reason, process));
        Ok(())
    }

    fn close(
        &self,
        _process: ProcessId,
        _object: &ObjectRef,
        _granted_access: u32,
        _process_handle_count: u32,
        system_handle_count: u32,
    ) -> ObResult<()> {
        self.recorder.closes.lock().push(system_handle_count);
        Ok(())
    }

    fn delete(&self, _object: &ObjectHeader) {
        self.recorder.deletes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Permissive validator that walks a process's handle table whenever a
/// first-use audit arrives
struct TableReadingAuditor {
    inner: PermissiveValidator,
    watched: Mutex<Option<Arc<Process>>>,
    seen: Mutex<Vec<usize>>,
}

impl AccessValidator for TableReadingAuditor {
    fn check_access(
        &self,
        descriptor: Option<&SecurityDescriptor>,
        state: &mut AccessState,
        desired_access: AccessMask,
        mapping: &GenericMapping,
        mode: ProcessorMode,
    ) -> Result<AccessMask, SecurityError> {
        self.inner
            .check_access(descriptor, state, desired_access, mapping, mode)
    }

    fn privilege_check(
        &self,
        subject: &SubjectContext,
        privilege: Privilege,
        mode: ProcessorMode,
    ) -> bool {
        self.inner.privilege_check(subject, privilege, mode)
    }

    fn assign_security(
        &self,
        parent: Option<&SecurityDescriptor>,
        explicit: Option<&SecurityDescriptor>,
        is_container: bool,
        subject: &SubjectContext,
        mapping: &GenericMapping,
    ) -> Result<Option<SecurityDescriptor>, SecurityError> {
        self.inner
            .assign_security(parent, explicit, is_container, subject, mapping)
    }

    fn audit(&self, event: &AuditEvent<'_>) {
        self.inner.audit(event);
        if event.kind != AuditKind::Reference {
            return;
        }
        if let Some(process) = self.watched.lock().clone() {
            let live = process.object_table().map_or(0, |table| table.entries().len());
            self.seen.lock().push(live);
        }
    }
}

struct Harness {
    ob: Arc<ObjectManager>,
    context: Arc<SystemContext>,
    work_queue: Arc<SystemWorkQueue>,
}

impl Harness {
    fn new() -> Self {
        Self::with_validator(Arc::new(PermissiveValidator::new()))
    }

    fn with_validator(validator: Arc<dyn AccessValidator>) -> Self {
        Self::with_parts(ObConfig::default(), validator)
    }

    fn with_config(config: ObConfig) -> Self {
        Self::with_parts(config, Arc::new(PermissiveValidator::new()))
    }

    fn with_parts(config: ObConfig, validator: Arc<dyn AccessValidator>) -> Self {
        let system = Arc::new(Process::system());
        let context = Arc::new(SystemContext::new(system.clone()));
        let work_queue = Arc::new(SystemWorkQueue::new());
        let mut collaborators = Collaborators::system().with_context(context.clone());
        collaborators.work_queue = work_queue.clone();
        collaborators.validator = validator;
        let ob = ObjectManager::new(config, collaborators).expect("init");
        ob.init_process(None, &system).expect("system table");
        Self {
            ob,
            context,
            work_queue,
        }
    }

    fn process(&self, id: u32) -> Arc<Process> {
        let process = Arc::new(Process::new(
            ProcessId(id),
            "test",
            Arc::new(QuotaBlock::new()),
        ));
        self.ob.init_process(None, &process).expect("process table");
        process
    }

    fn attach(&self, process: &Arc<Process>) {
        self.context.attach_process(process.clone());
    }

    fn event_type(
        &self,
        name: &str,
        initializer: ObjectTypeInitializer,
    ) -> (Arc<ObjectType>, Arc<Recorder>) {
        self.recording_type(
            name,
            initializer,
            ObjectProcedures::OPEN | ObjectProcedures::CLOSE | ObjectProcedures::DELETE,
        )
    }

    fn recording_type(
        &self,
        name: &str,
        initializer: ObjectTypeInitializer,
        procedures: ObjectProcedures,
    ) -> (Arc<ObjectType>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let object_type = self
            .ob
            .create_object_type(
                name,
                initializer,
                Box::new(RecordingMethods {
                    recorder: recorder.clone(),
                    procedures,
                }),
            )
            .expect("type");
        (object_type, recorder)
    }

    fn create(
        &self,
        object_type: &Arc<ObjectType>,
        attributes: &ObjectAttributes,
        mode: ProcessorMode,
    ) -> ObjectRef {
        self.ob
            .create_object(object_type, attributes, mode, Box::new(()))
            .expect("create")
    }

    /// Create an object under `name` and insert it, returning the object
    /// and its first handle
    fn create_named(
        &self,
        object_type: &Arc<ObjectType>,
        name: &str,
        attributes: ObjAttributes,
        mode: ProcessorMode,
    ) -> (ObjectRef, ObResult<InsertOutcome>) {
        let object = self.create(object_type, &ObjectAttributes::named(name, attributes), mode);
        let watched = object.clone();
        let outcome = self.ob.insert_object(object, None, EVENT_ALL_ACCESS, false);
        (watched, outcome)
    }

    /// Create and insert an unnamed object, returning the object and its
    /// first handle
    fn create_handle(
        &self,
        object_type: &Arc<ObjectType>,
        attributes: ObjAttributes,
        mode: ProcessorMode,
    ) -> (ObjectRef, Handle) {
        let object = self.create(object_type, &ObjectAttributes::new(attributes), mode);
        let watched = object.clone();
        let outcome = self
            .ob
            .insert_object(object, None, EVENT_ALL_ACCESS, false)
            .expect("insert");
        assert_eq!(outcome.status, NtStatus::Success);
        (watched, outcome.handle)
    }

    /// Duplicate with the source's access and no new attributes
    fn duplicate_same_access(
        &self,
        source: &Arc<Process>,
        handle: Handle,
        target: &Arc<Process>,
        mode: ProcessorMode,
    ) -> ObResult<Option<Handle>> {
        self.ob.duplicate_object(
            source,
            handle,
            Some(target),
            0,
            HandleAttributes::empty(),
            DuplicateOptions::SAME_ACCESS,
            mode,
        )
    }
}

fn counted_type() -> ObjectTypeInitializer {
    ObjectTypeInitializer {
        maintain_handle_count: true,
        maintain_type_list: true,
        ..ObjectTypeInitializer::default()
    }
}

fn quota_usage(process: &Process) -> (u64, u64) {
    (
        process.quota().paged_pool.usage(),
        process.quota().non_paged_pool.usage(),
    )
}

/// Descriptor no other object in the manager shares
fn private_descriptor(sub_authority: u32) -> SecurityDescriptor {
    let owner = build_sid(5, &[21, sub_authority]);
    let dacl = build_acl(&[Ace::allowed(EVENT_ALL_ACCESS, &well_known::world())]);
    SecurityDescriptor::from_parts(0, Some(owner.as_slice()), None, None, Some(dacl.as_slice()))
        .expect("descriptor")
}

#[test]
fn test_duplicates_close_in_order_and_delete_once() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let a = harness.process(100);
    let b = harness.process(104);
    let c = harness.process(108);
    let mode = ProcessorMode::UserMode;

    harness.attach(&a);
    let (object, handle_a) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);
    assert_eq!(object.pointer_count(), 1);
    assert_eq!(object.handle_count(), 1);

    let handle_b = harness
        .duplicate_same_access(&a, handle_a, &b, mode)
        .expect("duplicate to b")
        .expect("handle");
    let handle_c = harness
        .duplicate_same_access(&a, handle_a, &c, mode)
        .expect("duplicate to c")
        .expect("handle");
    assert_eq!(object.pointer_count(), 3);
    assert_eq!(object.handle_count(), 3);
    assert_eq!(object.process_handle_count(b.id()), Some(1));

    harness.attach(&b);
    let info = harness
        .ob
        .query_object_basic_information(handle_b, mode)
        .expect("basic information");
    assert_eq!(info.granted_access, EVENT_ALL_ACCESS);
    assert_eq!(info.pointer_count, 3);
    assert_eq!(info.handle_count, 3);
    assert_eq!(info.type_name, "Event");

    harness.attach(&a);
    harness.ob.close_handle(handle_a, mode).expect("close a");
    harness.attach(&b);
    harness.ob.close_handle(handle_b, mode).expect("close b");
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 0);
    harness.attach(&c);
    harness.ob.close_handle(handle_c, mode).expect("close c");

    assert_eq!(*recorder.closes.lock(), [3, 2, 1]);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(object.pointer_count(), 0);
    assert_eq!(event_type.total_objects(), 0);
    assert_eq!(event_type.total_handles(), 0);

    let reasons: Vec<OpenReason> = recorder
        .opens
        .lock()
        .iter()
        .map(|(reason, _)| *reason)
        .collect();
    assert_eq!(
        reasons,
        [OpenReason::Create, OpenReason::Duplicate, OpenReason::Duplicate]
    );
}

#[test]
fn test_duplicate_validation_and_close_source() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let a = harness.process(100);
    let b = harness.process(104);
    harness.attach(&a);
    let mode = ProcessorMode::UserMode;
    let (object, handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);

    assert_eq!(
        harness.ob.duplicate_object(
            &a,
            handle,
            Some(&b),
            RESERVED_ACCESS_BITS,
            HandleAttributes::empty(),
            DuplicateOptions::empty(),
            mode,
        ),
        Err(ObError::AccessDenied)
    );
    assert_eq!(
        harness.ob.duplicate_object(
            &a,
            handle,
            Some(&b),
            0,
            HandleAttributes::AUDIT_ON_CLOSE,
            DuplicateOptions::empty(),
            mode,
        ),
        Err(ObError::InvalidParameter)
    );

    // Narrower access than the source needs no access check
    let narrow = harness
        .ob
        .duplicate_object(
            &a,
            handle,
            Some(&b),
            0x1,
            HandleAttributes::INHERIT,
            DuplicateOptions::empty(),
            mode,
        )
        .expect("duplicate")
        .expect("handle");
    let entries = b.object_table().expect("table").entries();
    let (_, entry) = entries.iter().find(|(h, _)| *h == narrow).expect("entry");
    assert_eq!(entry.granted_access, 0x1);
    assert!(entry.attributes.contains(HandleAttributes::INHERIT));

    // Closing the source with no target just drops it
    let result = harness.ob.duplicate_object(
        &a,
        handle,
        None,
        0,
        HandleAttributes::empty(),
        DuplicateOptions::CLOSE_SOURCE,
        mode,
    );
    assert_eq!(result, Ok(None));
    assert_eq!(a.object_table().expect("table").handle_count(), 0);
    assert_eq!(object.handle_count(), 1);
    assert_eq!(object.pointer_count(), 1);
}

#[test]
fn test_quota_charge_is_idempotent() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type(
        "Event",
        ObjectTypeInitializer {
            default_non_paged_pool_charge: 64,
            ..counted_type()
        },
    );
    let process = harness.process(100);
    let object = harness.create(
        &event_type,
        &ObjectAttributes::default(),
        ProcessorMode::KernelMode,
    );

    let expected = event_type.info().default_non_paged_pool_charge as u64;
    {
        let mut locked = object.lock_exclusive();
        assert_eq!(
            harness.ob.charge_quota_for_object(&object, &mut locked, &process),
            Ok(true)
        );
        assert_eq!(
            harness.ob.charge_quota_for_object(&object, &mut locked, &process),
            Ok(false)
        );
    }
    assert_eq!(process.quota().non_paged_pool.usage(), expected);

    harness.ob.dereference_object(object);
    assert_eq!(process.quota().non_paged_pool.usage(), 0);
}

#[test]
fn test_quota_exceeded_creates_no_handle() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let poor = Arc::new(Process::new(
        ProcessId(100),
        "poor",
        Arc::new(QuotaBlock::with_limits(0, 16)),
    ));
    harness.ob.init_process(None, &poor).expect("table");
    harness.attach(&poor);

    let object = harness.create(&event_type, &ObjectAttributes::default(), ProcessorMode::UserMode);
    let watched = object.clone();
    let result = harness.ob.insert_object(object, None, EVENT_ALL_ACCESS, false);

    assert_eq!(result.map(|outcome| outcome.handle), Err(ObError::QuotaExceeded));
    assert_eq!(watched.handle_count(), 0);
    assert_eq!(watched.pointer_count(), 0);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(poor.object_table().expect("table").handle_count(), 0);
    assert_eq!(poor.quota().exceeded_count(), 1);
}

#[test]
fn test_failed_open_callback_rolls_back() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type(
        "Event",
        ObjectTypeInitializer {
            default_non_paged_pool_charge: 64,
            ..counted_type()
        },
    );
    let a = harness.process(100);
    let b = harness.process(104);
    let c = harness.process(108);
    let mode = ProcessorMode::UserMode;

    harness.attach(&a);
    let (object, handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);
    let charged_to_a = quota_usage(&a);
    recorder.refused.lock().extend([b.id(), c.id()]);

    // An open of an existing object leaves no count behind
    assert_eq!(
        harness.duplicate_same_access(&a, handle, &b, mode),
        Err(ObError::AccessDenied)
    );
    assert_eq!(object.handle_count(), 1);
    assert_eq!(object.pointer_count(), 1);
    assert_eq!(object.process_handle_count(a.id()), Some(1));
    assert_eq!(object.process_handle_count(b.id()), Some(0));
    assert_eq!(b.object_table().expect("table").handle_count(), 0);
    assert_eq!(quota_usage(&a), charged_to_a);
    assert_eq!(quota_usage(&b), (0, 0));
    assert_eq!(event_type.total_handles(), 1);

    // A refused first handle takes the new object and its quota with it
    harness.attach(&c);
    let fresh = harness.create(&event_type, &ObjectAttributes::default(), mode);
    let watched = fresh.clone();
    assert_eq!(
        harness
            .ob
            .insert_object(fresh, None, EVENT_ALL_ACCESS, false)
            .map(|outcome| outcome.handle),
        Err(ObError::AccessDenied)
    );
    assert_eq!(watched.handle_count(), 0);
    assert_eq!(watched.pointer_count(), 0);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert!(c.quota().non_paged_pool.peak() > 0);
    assert_eq!(quota_usage(&c), (0, 0));
    assert_eq!(c.object_table().expect("table").handle_count(), 0);

    harness.attach(&a);
    harness.ob.close_handle(handle, mode).expect("close");
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 2);
    assert_eq!(quota_usage(&a), (0, 0));
}

#[test]
fn test_full_table_withdraws_new_name() {
    let harness = Harness::with_config(ObConfig {
        max_handles_per_table: 1,
        ..ObConfig::default()
    });
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::UserMode;

    let (first, first_handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);

    let (crowded, outcome) =
        harness.create_named(&event_type, "\\Crowded", ObjAttributes::empty(), mode);
    assert_eq!(
        outcome.map(|outcome| outcome.handle),
        Err(ObError::OutOfResources)
    );
    assert!(crowded.directory().is_none());
    assert_eq!(crowded.handle_count(), 0);
    assert_eq!(crowded.pointer_count(), 0);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(event_type.total_objects(), 1);
    assert_eq!(
        harness
            .ob
            .reference_object_by_name("\\Crowded", ObjAttributes::empty(), None, 0, None, mode)
            .err(),
        Some(ObError::ObjectNameNotFound)
    );

    // The slot is free again once the first handle goes
    harness.ob.close_handle(first_handle, mode).expect("close");
    assert_eq!(first.pointer_count(), 0);
    let (again, outcome) =
        harness.create_named(&event_type, "\\Crowded", ObjAttributes::empty(), mode);
    let handle = outcome.expect("insert").handle;
    assert_eq!(again.pointer_count(), 2);
    harness.ob.close_handle(handle, mode).expect("close");
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 3);
}

#[test]
fn test_reference_safe_fails_at_zero() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let object = harness.create(
        &event_type,
        &ObjectAttributes::default(),
        ProcessorMode::KernelMode,
    );
    let watched = object.clone();

    let extra = harness.ob.reference_object_safe(&object).expect("alive");
    assert_eq!(harness.ob.dereference_object(extra), 1);
    assert_eq!(harness.ob.dereference_object(object), 0);

    assert!(harness.ob.reference_object_safe(&watched).is_none());
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_dereference_deletes_once() {
    const THREADS: usize = 8;
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let object = harness.create(
        &event_type,
        &ObjectAttributes::default(),
        ProcessorMode::KernelMode,
    );

    let mut references: Vec<ObjectRef> = (1..THREADS)
        .map(|_| harness.ob.reference_object(&object))
        .collect();
    references.push(object);

    let threads: Vec<_> = references
        .into_iter()
        .map(|reference| {
            let ob = harness.ob.clone();
            std::thread::spawn(move || {
                ob.dereference_object(reference);
            })
        })
        .collect();
    for thread in threads {
        thread.join().expect("thread");
    }

    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert_eq!(event_type.total_objects(), 0);
}

#[test]
fn test_concurrent_duplicate_and_close_keep_counts() {
    const THREADS: u32 = 6;
    const ROUNDS: usize = 500;
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let source = harness.process(100);
    harness.attach(&source);
    let mode = ProcessorMode::KernelMode;
    let (object, handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);

    let targets: Vec<Arc<Process>> = (0..THREADS)
        .map(|index| harness.process(200 + 4 * index))
        .collect();
    let workers: Vec<_> = targets
        .iter()
        .cloned()
        .map(|target| {
            let ob = harness.ob.clone();
            let source = source.clone();
            let object = object.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let duplicate = ob
                        .duplicate_object(
                            &source,
                            handle,
                            Some(&target),
                            0,
                            HandleAttributes::empty(),
                            DuplicateOptions::SAME_ACCESS,
                            mode,
                        )
                        .expect("duplicate")
                        .expect("handle");
                    assert!(object.handle_count() >= 2);
                    assert!(object.pointer_count() >= 2);
                    ob.close_process_handle(&target, duplicate, mode)
                        .expect("close duplicate");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    assert_eq!(object.handle_count(), 1);
    assert_eq!(object.pointer_count(), 1);
    assert_eq!(object.process_handle_count(source.id()), Some(1));
    for target in &targets {
        assert_eq!(object.process_handle_count(target.id()), Some(0));
        assert_eq!(target.object_table().expect("table").handle_count(), 0);
    }
    assert_eq!(event_type.total_handles(), 1);

    harness.ob.close_handle(handle, mode).expect("close");
    assert_eq!(object.pointer_count(), 0);
}

#[test]
fn test_identical_descriptors_share_a_cache_entry() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::UserMode;

    let descriptor = private_descriptor(500);
    let entries_before = harness.ob.sd_cache().len();

    let first = harness.create(
        &event_type,
        &ObjectAttributes::new(ObjAttributes::empty()).with_security(descriptor.clone()),
        mode,
    );
    let first_watched = first.clone();
    let first_handle = harness
        .ob
        .insert_object(first, None, EVENT_ALL_ACCESS, false)
        .expect("insert")
        .handle;

    // The second copy arrives through a security set on a plain object
    let (second, second_handle) =
        harness.create_handle(&event_type, ObjAttributes::empty(), mode);
    assert!(!second.has_security_descriptor());
    harness
        .ob
        .default_object_method(&second, SecurityOperation::Assign { descriptor: &descriptor })
        .expect("assign");

    assert_eq!(harness.ob.sd_cache().len(), entries_before + 1);
    let bias = u64::from(MAX_FAST_REFS + 1);
    let cache = harness.ob.sd_cache();
    assert_eq!(cache.reference_count_of(&descriptor), Some(2 * bias));
    assert!(first_watched.has_security_descriptor());

    harness.ob.close_handle(first_handle, mode).expect("close");
    assert_eq!(cache.reference_count_of(&descriptor), Some(bias));
    harness.ob.close_handle(second_handle, mode).expect("close");
    assert_eq!(cache.reference_count_of(&descriptor), None);
    assert_eq!(cache.len(), entries_before);
}

#[test]
fn test_security_fast_reference_budget() {
    const GETS: u32 = 50;
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let mode = ProcessorMode::KernelMode;

    let descriptor = private_descriptor(501);
    let object = harness.create(
        &event_type,
        &ObjectAttributes::new(ObjAttributes::empty()).with_security(descriptor.clone()),
        mode,
    );
    let watched = object.clone();
    let handle = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, false)
        .expect("insert")
        .handle;
    let cache = harness.ob.sd_cache();
    let bias = u64::from(MAX_FAST_REFS + 1);
    assert_eq!(cache.reference_count_of(&descriptor), Some(bias));

    // Each exhausted budget moves another MAX_FAST_REFS onto the entry
    let held: Vec<_> = (0..GETS)
        .map(|_| {
            harness
                .ob
                .get_object_security(&watched)
                .expect("security")
                .expect("descriptor")
        })
        .collect();
    assert!(held.iter().all(|security| security.descriptor() == &descriptor));
    let refills = u64::from(GETS / MAX_FAST_REFS);
    assert_eq!(
        cache.reference_count_of(&descriptor),
        Some(bias + refills * u64::from(MAX_FAST_REFS))
    );

    for security in held {
        harness.ob.release_object_security(&watched, Some(security));
    }
    assert_eq!(cache.reference_count_of(&descriptor), Some(bias));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let ob = harness.ob.clone();
            let object = watched.clone();
            std::thread::spawn(move || {
                for _ in 0..2000 {
                    let security = ob.get_object_security(&object).expect("security");
                    assert!(security.is_some());
                    ob.release_object_security(&object, security);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    // A refill that loses to a fast release hands its batch back to the
    // cache, so only the slot's budget plus its own reference remain
    let unused = watched.security_slot().unused_references();
    assert!(unused <= MAX_FAST_REFS);
    assert_eq!(
        cache.reference_count_of(&descriptor),
        Some(1 + u64::from(unused))
    );

    harness.ob.close_handle(handle, mode).expect("close");
    assert_eq!(cache.reference_count_of(&descriptor), None);
}

#[test]
fn test_deferred_deletion_runs_on_worker() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let object = harness.create(
        &event_type,
        &ObjectAttributes::default(),
        ProcessorMode::KernelMode,
    );
    let watched = object.clone();
    assert!(harness.ob.deferred_deletions_idle());

    harness.context.set_irql(levels::DISPATCH_LEVEL);
    harness.ob.dereference_object(object);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(harness.work_queue.depth(WorkQueueType::CriticalWorkQueue), 1);
    assert!(!harness.ob.deferred_deletions_idle());
    assert_eq!(harness.ob.deferred_deletion_count(), 1);

    harness.context.set_irql(levels::PASSIVE_LEVEL);
    assert_eq!(harness.work_queue.drain(), 1);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert!(!watched.has_flag(ObjectFlags::DELETED_INLINE));
    assert_eq!(harness.ob.deleted_object_count(), 1);
    assert!(harness.ob.deferred_deletions_idle());
}

#[test]
fn test_named_insert_open_and_collision() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::UserMode;

    let (object, created) =
        harness.create_named(&event_type, "\\Ready", ObjAttributes::empty(), mode);
    let created = created.expect("insert");
    assert_eq!(created.status, NtStatus::Success);
    assert_eq!(object.pointer_count(), 2);
    assert_eq!(harness.ob.query_name_string(&object).as_deref(), Ok("\\Ready"));

    let (_, duplicate_name) =
        harness.create_named(&event_type, "\\Ready", ObjAttributes::empty(), mode);
    assert_eq!(
        duplicate_name.map(|outcome| outcome.status),
        Err(ObError::NameCollision)
    );

    let (_, opened) = harness.create_named(&event_type, "\\Ready", ObjAttributes::OPENIF, mode);
    let opened = opened.expect("openif");
    assert_eq!(opened.status, NtStatus::ObjectNameExists);
    assert_eq!(object.handle_count(), 2);

    let by_name = harness
        .ob
        .open_object_by_name(
            &ObjectAttributes::named("\\ready", ObjAttributes::CASE_INSENSITIVE),
            Some(&event_type),
            mode,
            EVENT_ALL_ACCESS,
        )
        .expect("open by name");
    assert_eq!(object.handle_count(), 3);
    assert_eq!(
        harness.ob.open_object_by_name(
            &ObjectAttributes::named("\\Missing", ObjAttributes::empty()),
            None,
            mode,
            0,
        ),
        Err(ObError::ObjectNameNotFound)
    );
    assert_eq!(
        harness.ob.open_object_by_name(
            &ObjectAttributes::named("Ready", ObjAttributes::empty()),
            None,
            mode,
            0,
        ),
        Err(ObError::ObjectNameInvalid)
    );

    for handle in [created.handle, opened.handle, by_name] {
        harness.ob.close_handle(handle, mode).expect("close");
    }
    // Both rejected duplicates and the temporary object are gone
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 3);
    assert_eq!(object.pointer_count(), 0);
    assert_eq!(
        harness
            .ob
            .reference_object_by_name("\\Ready", ObjAttributes::empty(), None, 0, None, mode)
            .err(),
        Some(ObError::ObjectNameNotFound)
    );
}

#[test]
fn test_case_sensitive_type_names_coexist() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type(
        "Event",
        ObjectTypeInitializer {
            case_insensitive: false,
            ..counted_type()
        },
    );
    let mode = ProcessorMode::KernelMode;

    let (upper, first) = harness.create_named(&event_type, "\\Event", ObjAttributes::empty(), mode);
    let first = first.expect("insert");

    // A name differing only in case is a new object, not a collision
    let (lower, second) = harness.create_named(&event_type, "\\event", ObjAttributes::OPENIF, mode);
    let second = second.expect("openif");
    assert_eq!(second.status, NtStatus::Success);
    assert!(!ObjectRef::ptr_eq(&upper, &lower));
    assert_eq!(harness.ob.query_name_string(&lower).as_deref(), Ok("\\event"));

    let (_, third) = harness.create_named(
        &event_type,
        "\\EVENT",
        ObjAttributes::OPENIF | ObjAttributes::CASE_INSENSITIVE,
        mode,
    );
    let third = third.expect("openif");
    assert_eq!(third.status, NtStatus::ObjectNameExists);

    for handle in [first.handle, second.handle, third.handle] {
        harness.ob.close_handle(handle, mode).expect("close");
    }
    assert_eq!(upper.pointer_count(), 0);
    assert_eq!(lower.pointer_count(), 0);
}

#[test]
fn test_named_objects_in_subdirectories() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let mode = ProcessorMode::KernelMode;

    let directory = harness
        .ob
        .create_directory_object(
            &ObjectAttributes::named("\\BaseNamedObjects", ObjAttributes::empty()),
            directory_access::DIRECTORY_ALL_ACCESS,
            mode,
        )
        .expect("directory");
    let object = harness.create(
        &event_type,
        &ObjectAttributes::relative(directory, "Ready", ObjAttributes::empty()),
        mode,
    );
    let watched = object.clone();
    let handle = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, false)
        .expect("insert")
        .handle;

    assert_eq!(
        harness.ob.query_name_string(&watched).as_deref(),
        Ok("\\BaseNamedObjects\\Ready")
    );
    let entries = harness
        .ob
        .query_directory_object(directory, mode)
        .expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "Ready");
    assert!(!entries[0].is_directory);

    let found = harness
        .ob
        .reference_object_by_name(
            "\\BaseNamedObjects\\Ready",
            ObjAttributes::empty(),
            None,
            0,
            Some(&event_type),
            mode,
        )
        .expect("lookup");
    assert!(ObjectRef::ptr_eq(&found, &watched));
    harness.ob.dereference_object(found);

    let root = harness.ob.root_directory().expect("root");
    let listing = harness.ob.directory_entries(&root).expect("root entries");
    assert!(listing
        .iter()
        .any(|entry| entry.name == "ObjectTypes" && entry.is_directory));
    assert!(listing.iter().any(|entry| entry.name == "BaseNamedObjects"));
    assert_eq!(harness.ob.query_name_string(&root).as_deref(), Ok("\\"));

    harness.ob.close_handle(handle, mode).expect("close");
    harness
        .ob
        .close_handle(directory, mode)
        .expect("close directory");
}

#[test]
fn test_make_temporary_drops_permanent_name() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let mode = ProcessorMode::KernelMode;

    let object = harness.create(
        &event_type,
        &ObjectAttributes::named("\\Keep", ObjAttributes::PERMANENT),
        mode,
    );
    let outcome = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, true)
        .expect("insert");
    let object = outcome.object.expect("referenced");
    harness.ob.close_handle(outcome.handle, mode).expect("close");

    // Still named and alive with no handles
    assert_eq!(object.handle_count(), 0);
    assert!(object.directory().is_some());

    harness.ob.make_temporary_object(&object);
    assert!(object.directory().is_none());
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 0);
    harness.ob.dereference_object(object);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_exclusive_object_has_one_owner() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let a = harness.process(100);
    let b = harness.process(104);
    harness.attach(&a);
    let mode = ProcessorMode::UserMode;

    let (object, handle) = harness.create_handle(&event_type, ObjAttributes::EXCLUSIVE, mode);
    assert_eq!(object.exclusive_process(), Some(a.id()));

    assert_eq!(
        harness.duplicate_same_access(&a, handle, &b, mode),
        Err(ObError::AccessDenied)
    );
    assert_eq!(object.pointer_count(), 1);
    assert_eq!(
        harness
            .ob
            .set_handle_attributes(handle, HandleAttributes::INHERIT, mode),
        Err(ObError::AccessDenied)
    );

    // Exclusive and inheritable at once is malformed
    let bad = harness.create(
        &event_type,
        &ObjectAttributes::new(ObjAttributes::EXCLUSIVE | ObjAttributes::INHERIT),
        mode,
    );
    assert_eq!(
        harness
            .ob
            .insert_object(bad, None, EVENT_ALL_ACCESS, false)
            .map(|outcome| outcome.status),
        Err(ObError::InvalidParameter)
    );

    harness.ob.close_handle(handle, mode).expect("close");
    assert_eq!(object.exclusive_process(), None);
}

#[test]
fn test_protect_close() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::UserMode;

    let (object, handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);
    harness
        .ob
        .set_handle_attributes(handle, HandleAttributes::PROTECT_CLOSE, mode)
        .expect("protect");
    assert_eq!(
        harness.ob.close_handle(handle, mode),
        Err(ObError::HandleNotClosable)
    );
    assert_eq!(object.handle_count(), 1);

    harness
        .ob
        .set_handle_attributes(handle, HandleAttributes::empty(), mode)
        .expect("unprotect");
    harness.ob.close_handle(handle, mode).expect("close");
    assert_eq!(harness.ob.close_handle(handle, mode), Err(ObError::InvalidHandle));
}

#[test]
fn test_kernel_handles_hidden_from_user_mode() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());

    let (object, handle) = harness.create_handle(
        &event_type,
        ObjAttributes::KERNEL_HANDLE,
        ProcessorMode::KernelMode,
    );
    assert_ne!(handle.raw() & KERNEL_HANDLE_FLAG, 0);
    assert_eq!(object.process_handle_count(ProcessId::SYSTEM), Some(1));

    assert_eq!(
        harness
            .ob
            .reference_object_by_handle(handle, 0, None, ProcessorMode::UserMode)
            .map(|(_, info)| info),
        Err(ObError::InvalidHandle)
    );
    let (referenced, info) = harness
        .ob
        .reference_object_by_handle(handle, 0, Some(&event_type), ProcessorMode::KernelMode)
        .expect("kernel reference");
    assert_eq!(info.granted_access, EVENT_ALL_ACCESS);
    harness.ob.dereference_object(referenced);

    let listed = harness.ob.system_handle_information();
    assert!(listed
        .iter()
        .any(|entry| entry.handle == handle && entry.object_id == object.id()));

    assert_eq!(
        harness.ob.close_handle(handle, ProcessorMode::UserMode),
        Err(ObError::InvalidHandle)
    );
    harness
        .ob
        .close_handle(handle, ProcessorMode::KernelMode)
        .expect("close");
}

#[test]
fn test_kernel_only_objects_refuse_user_opens() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let kernel = ProcessorMode::KernelMode;

    let object = harness.create(&event_type, &ObjectAttributes::default(), kernel);
    let outcome = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, true)
        .expect("insert");
    let object = outcome.object.expect("referenced");
    object.set_kernel_exclusive();

    let open = |mode| {
        harness.ob.open_object_by_pointer(
            &object,
            ObjAttributes::empty(),
            None,
            EVENT_ALL_ACCESS,
            None,
            mode,
        )
    };
    assert_eq!(open(ProcessorMode::UserMode), Err(ObError::AccessDenied));
    let kernel_handle = open(kernel).expect("kernel open");
    assert_eq!(object.handle_count(), 2);

    harness.ob.close_handle(kernel_handle, kernel).expect("close");
    harness.ob.close_handle(outcome.handle, kernel).expect("close");
    harness.ob.dereference_object(object);
}

#[test]
fn test_closed_object_without_open_callback_cannot_reopen() {
    let harness = Harness::new();
    let (close_only, _) =
        harness.recording_type("File", counted_type(), ObjectProcedures::CLOSE);
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::KernelMode;

    let object = harness.create(&close_only, &ObjectAttributes::default(), mode);
    let outcome = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, true)
        .expect("insert");
    let object = outcome.object.expect("referenced");
    harness.ob.close_handle(outcome.handle, mode).expect("close");

    assert_eq!(
        harness.ob.open_object_by_pointer(
            &object,
            ObjAttributes::empty(),
            None,
            EVENT_ALL_ACCESS,
            None,
            mode,
        ),
        Err(ObError::Unsuccessful)
    );
    harness.ob.dereference_object(object);
}

#[test]
fn test_process_inheritance_and_teardown() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let parent = harness.process(100);
    harness.attach(&parent);
    let mode = ProcessorMode::UserMode;

    let (inherited, inherit_handle) =
        harness.create_handle(&event_type, ObjAttributes::INHERIT, mode);
    let (private, _private_handle) =
        harness.create_handle(&event_type, ObjAttributes::empty(), mode);

    let child = Arc::new(Process::new_child(ProcessId(200), "child", &parent));
    harness
        .ob
        .init_process(Some(parent.as_ref()), &child)
        .expect("child table");
    assert_eq!(
        harness.ob.init_process(Some(parent.as_ref()), &child),
        Err(ObError::InvalidParameter)
    );

    let child_handles: Vec<Handle> = child
        .object_table()
        .expect("table")
        .entries()
        .into_iter()
        .map(|(handle, _)| handle)
        .collect();
    assert_eq!(child_handles, [inherit_handle]);
    assert_eq!(
        harness.ob.find_handle_for_object(&child, &inherited),
        Some(inherit_handle)
    );
    assert_eq!(harness.ob.find_handle_for_object(&child, &private), None);
    assert_eq!(inherited.handle_count(), 2);
    assert_eq!(inherited.pointer_count(), 2);
    assert!(recorder
        .opens
        .lock()
        .contains(&(OpenReason::Inherit, child.id())));

    harness.ob.kill_process(&child);
    assert!(child.object_table().is_none());
    assert_eq!(
        harness.ob.reference_process_handle_table(&child).map(|_| ()),
        Err(ObError::ProcessTerminating)
    );
    assert_eq!(inherited.handle_count(), 1);

    harness.ob.kill_process(&parent);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 2);
    assert_eq!(private.pointer_count(), 0);
}

#[test]
fn test_enumerate_and_type_statistics() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type("Event", counted_type());
    let mode = ProcessorMode::KernelMode;

    let (_, named) = harness.create_named(&event_type, "\\Listed", ObjAttributes::empty(), mode);
    let named_handle = named.expect("insert").handle;
    let (_, unnamed_handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);

    let mut seen = Vec::new();
    harness
        .ob
        .enumerate_objects_by_type(&event_type, |_, name, pointer_count, handle_count| {
            seen.push((name, pointer_count, handle_count));
            true
        })
        .expect("enumerate");
    seen.sort();
    assert_eq!(seen.len(), 2);
    assert!(seen.contains(&(Some(String::from("\\Listed")), 2, 1)));
    assert!(seen.contains(&(None, 1, 1)));

    let stats = harness.ob.type_stats();
    assert_eq!(stats.type_count, harness.ob.type_table().len());
    let snapshot = harness
        .ob
        .type_snapshots()
        .into_iter()
        .find(|snapshot| snapshot.name == "Event")
        .expect("snapshot");
    assert_eq!(snapshot.total_objects, 2);
    assert_eq!(snapshot.total_handles, 2);
    assert_eq!(snapshot.high_water_handles, 2);

    let (plain, _) = harness.recording_type(
        "Plain",
        ObjectTypeInitializer::default(),
        ObjectProcedures::empty(),
    );
    assert_eq!(
        harness.ob.enumerate_objects_by_type(&plain, |_, _, _, _| true),
        Err(ObError::Unsupported)
    );

    harness.ob.close_handle(named_handle, mode).expect("close");
    harness.ob.close_handle(unnamed_handle, mode).expect("close");
    assert_eq!(event_type.total_objects(), 0);
    assert_eq!(event_type.high_water_objects(), 2);
}

#[test]
fn test_query_and_set_security() {
    let harness = Harness::new();
    let (event_type, _) = harness.event_type(
        "Event",
        ObjectTypeInitializer {
            security_required: true,
            ..counted_type()
        },
    );
    let mode = ProcessorMode::KernelMode;
    let (object, handle) = harness.create_handle(&event_type, ObjAttributes::empty(), mode);
    assert!(object.has_security_descriptor());

    let world_dacl = build_acl(&[Ace::allowed(EVENT_ALL_ACCESS, &well_known::world())]);
    let update = SecurityDescriptor::from_parts(0, None, None, None, Some(world_dacl.as_slice()))
        .expect("descriptor");
    harness
        .ob
        .set_security_object(handle, crate::se::SecurityInformation::DACL, &update, mode)
        .expect("set");
    let queried = harness
        .ob
        .query_security_object(handle, crate::se::SecurityInformation::DACL, mode)
        .expect("query");
    assert_eq!(queried.dacl(), Some(world_dacl.as_slice()));
    assert_eq!(
        harness.ob.set_security_object(
            handle,
            crate::se::SecurityInformation::empty(),
            &update,
            mode,
        ),
        Err(ObError::InvalidParameter)
    );

    harness.ob.close_handle(handle, mode).expect("close");
}

#[test]
fn test_pseudo_handles_and_deferred_dereference() {
    let harness = Harness::new();
    let (event_type, recorder) = harness.event_type("Event", counted_type());
    let mode = ProcessorMode::UserMode;

    assert_eq!(
        harness
            .ob
            .reference_object_by_handle(Handle::CURRENT_PROCESS, 0, None, mode)
            .map(|(_, info)| info),
        Err(ObError::InvalidHandle)
    );

    let process_object = harness.create(
        &event_type,
        &ObjectAttributes::default(),
        ProcessorMode::KernelMode,
    );
    harness.context.set_process_object(Some(process_object.clone()));
    let (referenced, info) = harness
        .ob
        .reference_object_by_handle(Handle::CURRENT_PROCESS, 0, Some(&event_type), mode)
        .expect("pseudo handle");
    assert!(ObjectRef::ptr_eq(&referenced, &process_object));
    assert_eq!(info.granted_access, event_type.valid_access_mask());
    assert_eq!(process_object.pointer_count(), 2);
    harness.ob.dereference_object(referenced);
    assert_eq!(
        harness
            .ob
            .reference_object_by_handle(Handle::CURRENT_THREAD, 0, None, mode)
            .map(|(_, info)| info),
        Err(ObError::InvalidHandle)
    );
    harness.context.set_process_object(None);

    harness.ob.make_permanent_object(&process_object);
    assert!(process_object.is_permanent());
    harness.ob.make_temporary_object(&process_object);
    assert!(!process_object.is_permanent());

    // Even at passive level the last reference goes to the worker
    let watched = process_object.clone();
    assert_eq!(harness.ob.dereference_object_deferred(process_object), 0);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 0);
    assert_eq!(harness.work_queue.drain(), 1);
    assert_eq!(recorder.deletes.load(Ordering::SeqCst), 1);
    assert!(!watched.has_flag(ObjectFlags::DELETED_INLINE));
}

/// Object carrying a SACL that audits `mask` for everyone
fn audited_descriptor(mask: u32) -> SecurityDescriptor {
    let world = well_known::world();
    let sacl = build_acl(&[Ace {
        ace_type: AceType::SystemAudit,
        flags: 0xC0,
        mask,
        sid: world.clone(),
    }]);
    SecurityDescriptor::from_parts(0, Some(world.as_slice()), None, Some(sacl.as_slice()), None)
        .expect("descriptor")
}

#[test]
fn test_audit_on_close_follows_sacl() {
    let validator = Arc::new(PermissiveValidator::with_sacl_auditing());
    let harness = Harness::with_validator(validator.clone());
    let (event_type, _) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::UserMode;

    let object = harness.create(
        &event_type,
        &ObjectAttributes::new(ObjAttributes::empty()).with_security(audited_descriptor(0x1)),
        mode,
    );
    let outcome = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, true)
        .expect("insert");
    let object = outcome.object.expect("referenced");

    let opened = harness
        .ob
        .open_object_by_pointer(&object, ObjAttributes::empty(), None, 0x1, None, mode)
        .expect("open");
    let entries = process.object_table().expect("table").entries();
    let (_, entry) = entries
        .iter()
        .find(|(handle, _)| *handle == opened)
        .expect("entry");
    assert!(entry.attributes.contains(HandleAttributes::AUDIT_ON_CLOSE));

    let before = validator.audit_count();
    harness.ob.close_handle(opened, mode).expect("close");
    assert_eq!(validator.audit_count(), before + 1);

    harness.ob.close_handle(outcome.handle, mode).expect("close");
    harness.ob.dereference_object(object);
}

#[test]
fn test_first_use_audit_runs_without_entry_lock() {
    let auditor = Arc::new(TableReadingAuditor {
        inner: PermissiveValidator::with_sacl_auditing(),
        watched: Mutex::new(None),
        seen: Mutex::new(Vec::new()),
    });
    let harness = Harness::with_validator(auditor.clone());
    let (event_type, _) = harness.event_type("Event", counted_type());
    let process = harness.process(100);
    harness.attach(&process);
    let mode = ProcessorMode::UserMode;

    let object = harness.create(
        &event_type,
        &ObjectAttributes::new(ObjAttributes::empty()).with_security(audited_descriptor(0x1)),
        mode,
    );
    let outcome = harness
        .ob
        .insert_object(object, None, EVENT_ALL_ACCESS, true)
        .expect("insert");
    let object = outcome.object.expect("referenced");
    let opened = harness
        .ob
        .open_object_by_pointer(&object, ObjAttributes::empty(), None, 0x1, None, mode)
        .expect("open");
    *auditor.watched.lock() = Some(process.clone());

    // The auditor walks the very table whose entry is being referenced
    for _ in 0..2 {
        let (referenced, info) = harness
            .ob
            .reference_object_by_handle(opened, 0x1, Some(&event_type), mode)
            .expect("reference");
        assert_eq!(info.granted_access, 0x1);
        harness.ob.dereference_object(referenced);
    }
    assert_eq!(*auditor.seen.lock(), [2]);

    *auditor.watched.lock() = None;
    harness.ob.close_handle(opened, mode).expect("close");
    harness.ob.close_handle(outcome.handle, mode).expect("close");
    harness.ob.dereference_object(object);
}
