//! Classification of values against the built-in surface
//!
//! Built-ins are never wrapped: their identity is relied upon by the object
//! model itself and tracing them only adds noise. The surface is computed once
//! per realm as a fixed-point closure over the intrinsics, their `prototype`
//! objects and their `[[Prototype]]`s.

use crate::realm::{BuiltinKind, Realm};
use crate::value::{unwrap_proxy_deep, ObjectRef, Value};
use std::collections::HashMap;

/// How a value relates to the built-in surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not an object: never hookable
    Scalar,
    /// One of the built-ins, or an object reachable from one
    Builtin(BuiltinKind),
    /// An instance of a built-in class (an `Error`, a `Map`, ...)
    BuiltinInstance(BuiltinKind),
    /// Everything else
    Hookable,
}

impl Classification {
    pub fn is_excluded(self) -> bool {
        !matches!(self, Self::Hookable)
    }
}

/// Snapshot of the built-in surface of one realm
#[derive(Debug, Clone)]
pub struct BuiltinSurface {
    /// Object id -> the intrinsic it was reached from
    members: HashMap<u64, BuiltinKind>,
    /// Prototypes whose instances count as built-in values
    instance_prototypes: Vec<(BuiltinKind, ObjectRef)>,
}

impl BuiltinSurface {
    /// Compute the closure over every intrinsic of `realm`
    pub fn snapshot(realm: &Realm) -> Self {
        let mut members = HashMap::new();
        let mut worklist: Vec<(BuiltinKind, ObjectRef)> = realm
            .intrinsics()
            .map(|(kind, object)| (kind, object.clone()))
            .collect();
        worklist.push((BuiltinKind::Object, realm.object_prototype().clone()));
        worklist.push((BuiltinKind::Function, realm.function_prototype().clone()));

        while let Some((kind, object)) = worklist.pop() {
            if members.contains_key(&object.id()) {
                continue;
            }
            members.insert(object.id(), kind);
            if let Some(prototype) = Realm::prototype_of_class(&object) {
                worklist.push((kind, prototype));
            }
            if let Some(parent) = object.prototype() {
                worklist.push((kind, parent));
            }
        }

        let instance_prototypes = realm
            .intrinsics()
            .filter(|(kind, _)| kind.excludes_instances())
            .filter_map(|(kind, class)| Realm::prototype_of_class(class).map(|p| (kind, p)))
            .collect();

        tracing::debug!(members = members.len(), "built-in surface snapshot");
        Self {
            members,
            instance_prototypes,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Is `object` itself part of the snapshot?
    pub fn contains(&self, object: &ObjectRef) -> bool {
        self.members.contains_key(&object.id())
    }

    pub fn classify(&self, value: &Value) -> Classification {
        let Value::Object(object) = unwrap_proxy_deep(value) else {
            return Classification::Scalar;
        };
        if let Some(kind) = self.members.get(&object.id()) {
            return Classification::Builtin(*kind);
        }
        // Callables are only excluded by identity: user functions inherit
        // from Function.prototype too.
        if object.is_callable() {
            return Classification::Hookable;
        }
        match self.instance_kind(&object) {
            Some(kind) => Classification::BuiltinInstance(kind),
            None => Classification::Hookable,
        }
    }

    pub fn is_excluded(&self, value: &Value) -> bool {
        self.classify(value).is_excluded()
    }

    fn instance_kind(&self, object: &ObjectRef) -> Option<BuiltinKind> {
        let mut current = object.prototype();
        let mut depth = 0;
        while let Some(candidate) = current {
            if let Some((kind, _)) = self
                .instance_prototypes
                .iter()
                .find(|(_, prototype)| prototype.ptr_eq(&candidate))
            {
                return Some(*kind);
            }
            depth += 1;
            if depth > 256 {
                return None;
            }
            current = candidate.prototype();
        }
        None
    }
}
