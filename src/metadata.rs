//! Identity-keyed hook bookkeeping
//!
//! Metadata lives in a side table keyed by object id rather than on the
//! objects themselves, so it never shows up in property enumeration and never
//! extends an object's lifetime: each entry holds a weak back-reference and is
//! dropped once the object is gone.

use crate::context::CallContext;
use crate::value::{ObjectRef, PropertyKey, Value, WeakObjectRef};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Insertions between sweeps of dead entries
const PRUNE_INTERVAL: usize = 1024;

/// Last raw value observed through a rewritten accessor
#[derive(Debug, Clone, Default)]
pub struct PrivateSlot {
    pub value: Value,
}

/// Per-object hook state
#[derive(Debug, Default)]
pub struct HookMetadata {
    /// Set once, on the first admitted hook attempt
    pub is_hooked: bool,
    pub cached_wrapper: Option<WeakObjectRef>,
    /// Name the cached wrapper was created under
    pub cached_name: Option<String>,
    pub known_name: Option<String>,
    pub name_override: Option<String>,
    pub special_properties: HashMap<PropertyKey, PrivateSlot>,
    pub creation_context: Option<Rc<CallContext>>,
    pub never_hook: bool,
    pub lazy_installed: bool,
}

impl HookMetadata {
    /// The cached wrapper, if it is still alive
    pub fn live_wrapper(&self) -> Option<ObjectRef> {
        self.cached_wrapper.as_ref().and_then(WeakObjectRef::upgrade)
    }

    pub fn slot(&self, key: &PropertyKey) -> Option<&Value> {
        self.special_properties.get(key).map(|slot| &slot.value)
    }

    pub fn set_slot(&mut self, key: PropertyKey, value: Value) {
        self.special_properties.insert(key, PrivateSlot { value });
    }
}

pub type MetaHandle = Rc<RefCell<HookMetadata>>;

struct Entry {
    object: WeakObjectRef,
    meta: MetaHandle,
}

/// Side table of [`HookMetadata`] keyed by object identity
#[derive(Default)]
pub struct MetadataStore {
    entries: HashMap<u64, Entry>,
    inserts_since_prune: usize,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `object`, if any was ever attached
    pub fn get(&self, object: &ObjectRef) -> Option<MetaHandle> {
        self.entries
            .get(&object.id())
            .filter(|entry| entry.object.is_alive())
            .map(|entry| entry.meta.clone())
    }

    /// Metadata for `object`, created when absent
    ///
    /// Non-extensible objects cannot carry metadata: they get a fresh,
    /// transient record on every call that is never stored.
    pub fn ensure(&mut self, object: &ObjectRef) -> MetaHandle {
        if let Some(meta) = self.get(object) {
            return meta;
        }
        let meta = MetaHandle::default();
        if !object.is_extensible() {
            tracing::trace!(object = object.id(), "transient metadata for non-extensible object");
            return meta;
        }
        self.entries.insert(
            object.id(),
            Entry {
                object: object.downgrade(),
                meta: meta.clone(),
            },
        );
        self.inserts_since_prune += 1;
        if self.inserts_since_prune >= PRUNE_INTERVAL {
            self.prune();
        }
        meta
    }

    /// Metadata for `object`, stored even when it is not extensible
    ///
    /// Used for markers the engine itself places (never-hook), which must
    /// stick regardless of the object's extensibility.
    pub fn pin(&mut self, object: &ObjectRef) -> MetaHandle {
        if let Some(meta) = self.get(object) {
            return meta;
        }
        let meta = MetaHandle::default();
        self.entries.insert(
            object.id(),
            Entry {
                object: object.downgrade(),
                meta: meta.clone(),
            },
        );
        meta
    }

    /// Drop entries whose object is gone
    pub fn prune(&mut self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.object.is_alive());
        self.inserts_since_prune = 0;
        tracing::trace!(removed = before - self.entries.len(), "pruned hook metadata");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_is_stable_for_extensible_objects() {
        let mut store = MetadataStore::new();
        let object = ObjectRef::new_ordinary(None);
        let first = store.ensure(&object);
        first.borrow_mut().is_hooked = true;
        let second = store.ensure(&object);
        assert!(Rc::ptr_eq(&first, &second));
        assert!(store.get(&object).unwrap().borrow().is_hooked);
    }

    #[test]
    fn test_non_extensible_objects_get_transient_metadata() {
        let mut store = MetadataStore::new();
        let object = ObjectRef::new_ordinary(None);
        object.prevent_extensions();
        let first = store.ensure(&object);
        let second = store.ensure(&object);
        assert!(!Rc::ptr_eq(&first, &second));
        assert!(store.get(&object).is_none());
        assert!(store.is_empty());

        store.pin(&object).borrow_mut().never_hook = true;
        assert!(store.get(&object).unwrap().borrow().never_hook);
    }

    #[test]
    fn test_entries_do_not_keep_objects_alive() {
        let mut store = MetadataStore::new();
        let object = ObjectRef::new_ordinary(None);
        let weak = object.downgrade();
        store.ensure(&object);
        drop(object);
        assert!(weak.upgrade().is_none());
        store.prune();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_private_slots() {
        let mut meta = HookMetadata::default();
        let key = PropertyKey::from("answer");
        assert!(meta.slot(&key).is_none());
        meta.set_slot(key.clone(), Value::from(42));
        assert_eq!(meta.slot(&key), Some(&Value::from(42)));
    }

    #[test]
    fn test_live_wrapper_expires() {
        let mut meta = HookMetadata::default();
        let wrapper = ObjectRef::new_ordinary(None);
        meta.cached_wrapper = Some(wrapper.downgrade());
        assert!(meta.live_wrapper().is_some());
        drop(wrapper);
        assert!(meta.live_wrapper().is_none());
    }
}
