//! Name Lookup
//!
//! Walks a path component by component from the root directory, or from
//! a caller-supplied starting object, holding each directory's lock only
//! while its entry is looked up. An object that is not a directory may
//! still continue the walk through its type's parse callback.
//!
//! When an object to insert is given, the last directory is locked
//! exclusively and stays locked in the returned [`LookupContext`], so the
//! new name and the first handle appear together.
//!
//! # NT Functions
//!
//! - `ObpLookupObjectName`

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::attributes::ObjAttributes;
use super::header::ObjectRef;
use super::manager::ObjectManager;
use super::namespace::{LookupContext, OBJ_NAME_PATH_SEPARATOR};
use super::object_type::{ObjectProcedures, ObjectType, ParseContext};
use super::status::{ObError, ObResult};
use crate::ex::LockMode;
use crate::ke::ProcessorMode;
use crate::se::AccessState;

/// Result of a lookup
pub enum LookupOutcome<'a> {
    /// The name exists; the object is referenced
    Found(ObjectRef),
    /// The object to insert was linked under the name; its directory
    /// stays locked until the context is dropped
    Inserted(LookupContext<'a>),
}

impl ObjectManager {
    /// Resolve `name` (ObpLookupObjectName)
    ///
    /// `root` is the directory a relative name starts from. With `insert`
    /// set, a missing last component is created for that object.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn lookup_object_name(
        &self,
        root: Option<ObjectRef>,
        name: &str,
        attributes: ObjAttributes,
        object_type: Option<&Arc<ObjectType>>,
        mode: ProcessorMode,
        access_state: &mut AccessState,
        insert: Option<&ObjectRef>,
    ) -> ObResult<LookupOutcome<'_>> {
        let case_insensitive = attributes.contains(ObjAttributes::CASE_INSENSITIVE)
            || (self.config().case_insensitive_names
                && object_type.map_or(true, |object_type| object_type.info().case_insensitive));

        let (start, remaining) = match root {
            Some(root) => {
                if name.starts_with(OBJ_NAME_PATH_SEPARATOR) {
                    return Err(ObError::ObjectNameInvalid);
                }
                if !self.namespace().is_directory(&root) {
                    if insert.is_some()
                        || !root.object_type().procedures().contains(ObjectProcedures::PARSE)
                    {
                        return Err(ObError::TypeMismatch);
                    }
                    return self
                        .parse_object_name(&root, name, attributes, mode, access_state)
                        .map(LookupOutcome::Found);
                }
                (root, name)
            }
            None => {
                let Some(remaining) = name.strip_prefix(OBJ_NAME_PATH_SEPARATOR) else {
                    return Err(ObError::ObjectNameInvalid);
                };
                let root = self.root_directory().ok_or(ObError::ObjectPathNotFound)?;
                (root, remaining)
            }
        };

        if remaining.is_empty() {
            if insert.is_some() {
                return Err(ObError::NameCollision);
            }
            return Ok(LookupOutcome::Found(self.reference_object(&start)));
        }
        let components: Vec<&str> = remaining.split(OBJ_NAME_PATH_SEPARATOR).collect();
        if components.iter().any(|component| component.is_empty()) {
            return Err(ObError::ObjectNameInvalid);
        }

        let mut current = self.reference_object(&start);
        for (position, component) in components.iter().enumerate() {
            let last = position + 1 == components.len();

            if !mode.is_kernel() {
                if let Err(error) = self.check_traverse_access(&current, access_state, mode) {
                    self.dereference_object(current);
                    return Err(error);
                }
            }

            if let (true, Some(object)) = (last, insert) {
                let context =
                    LookupContext::new(self.namespace(), current.clone(), LockMode::Exclusive);
                if let Some(existing) = context.lookup(component, case_insensitive) {
                    let existing = self.reference_object(&existing);
                    drop(context);
                    self.dereference_object(current);
                    return Ok(LookupOutcome::Found(existing));
                }

                if !mode.is_kernel() {
                    if let Err(error) = self.check_create_access(&current, access_state, mode) {
                        drop(context);
                        self.dereference_object(current);
                        return Err(error);
                    }
                }
                let inserted =
                    self.insert_directory_entry(&context, component, object, case_insensitive);
                if !inserted {
                    drop(context);
                    self.dereference_object(current);
                    return Err(ObError::NameCollision);
                }
                // The directory is now referenced by the new name
                self.dereference_object(current);
                return Ok(LookupOutcome::Inserted(context));
            }

            let found = {
                let context =
                    LookupContext::new(self.namespace(), current.clone(), LockMode::Shared);
                context
                    .lookup(component, case_insensitive)
                    .map(|object| self.reference_object(&object))
            };
            self.dereference_object(current);

            let Some(next) = found else {
                return Err(if last {
                    ObError::ObjectNameNotFound
                } else {
                    ObError::ObjectPathNotFound
                });
            };
            if last {
                return Ok(LookupOutcome::Found(next));
            }
            if self.namespace().is_directory(&next) {
                current = next;
                continue;
            }

            // Not a directory: its type resolves the rest
            if insert.is_some()
                || !next.object_type().procedures().contains(ObjectProcedures::PARSE)
            {
                self.dereference_object(next);
                return Err(ObError::ObjectPathNotFound);
            }
            let rest: String = components[position + 1..].join("\\");
            let result = self.parse_object_name(&next, &rest, attributes, mode, access_state);
            self.dereference_object(next);
            return result.map(LookupOutcome::Found);
        }

        Err(ObError::ObjectNameInvalid)
    }

    /// Hand the rest of a path to the type of `object`
    fn parse_object_name(
        &self,
        object: &ObjectRef,
        remaining_name: &str,
        attributes: ObjAttributes,
        mode: ProcessorMode,
        access_state: &mut AccessState,
    ) -> ObResult<ObjectRef> {
        let object_type = object.object_type().clone();
        let mut context = ParseContext {
            remaining_name,
            attributes,
            mode,
            access_state,
        };
        object_type.methods().parse(self, object, &mut context)
    }
}
