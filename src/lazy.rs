//! Lazy property hooking
//!
//! Objects discovered as namespace roots are hooked in place: each own
//! property is replaced by an accessor pair whose getter hooks the value on
//! demand. The raw value lives in a private slot so descriptor copies and
//! clones can still see it.
//!
//! Properties that cannot be redefined (non-configurable ones, or any
//! property of a non-extensible object, which could not keep its slot) are
//! resolved once and hooked for side effects only. Later direct reads of such
//! a property bypass hooking.

use crate::context::CallContext;
use crate::engine::Tracer;
use crate::filter::Subject;
use crate::metadata::MetaHandle;
use crate::value::{call, NativeFunction, ObjectRef, PropertyDescriptor, PropertyKey, Throw, Value};
use std::rc::Rc;

pub(crate) fn install_lazy_hooks(
    tracer: &Tracer,
    name: &str,
    object: &ObjectRef,
    context: &Rc<CallContext>,
    meta: &MetaHandle,
) -> Result<(), Throw> {
    {
        let mut meta = meta.borrow_mut();
        if meta.lazy_installed {
            return Ok(());
        }
        meta.lazy_installed = true;
    }
    let rewritable = object.is_extensible();

    for key in object.own_keys() {
        let Some(property) = key.as_str() else {
            continue;
        };
        let property_name = format!("{name}.{property}");
        if !tracer.admit(&property_name, Subject::Property { property, object })? {
            continue;
        }
        let Some(descriptor) = object.get_own_property(&key) else {
            continue;
        };

        // A non-extensible object could not keep a private slot for the
        // rewritten accessor, even for a configurable property
        if !descriptor.is_configurable() || !rewritable {
            let value = object.get(&key, &Value::from(object.clone())).unwrap_or_default();
            tracer.hook_value(&property_name, &value, context)?;
            continue;
        }

        if descriptor.value().is_some_and(|value| tracer.is_excluded(value)) {
            continue;
        }

        let (original_get, original_set, enumerable) = match descriptor {
            PropertyDescriptor::Data { value, enumerable, .. } => {
                meta.borrow_mut().set_slot(key.clone(), value);
                (None, None, enumerable)
            }
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                ..
            } => (get, set, enumerable),
        };

        let getter = accessor_getter(tracer, &property_name, property, &key, context, original_get);
        let setter = accessor_setter(tracer, property, &key, original_set);
        tracer.mark_never_hook(&getter);
        tracer.mark_never_hook(&setter);

        object.define_own_property(
            key.clone(),
            PropertyDescriptor::Accessor {
                get: Some(getter),
                set: Some(setter),
                enumerable,
                configurable: true,
            },
        );
    }
    tracing::trace!(name, object = object.id(), "installed lazy hooks");
    Ok(())
}

fn accessor_getter(
    tracer: &Tracer,
    name: &str,
    property: &str,
    key: &PropertyKey,
    context: &Rc<CallContext>,
    original: Option<Value>,
) -> Value {
    let tracer_ref = tracer.clone();
    let name = name.to_string();
    let key = key.clone();
    let context = Rc::clone(context);
    let getter = NativeFunction::new(format!("get {property}"), move |inv| {
        if let Some(original) = &original {
            let fresh = call(original, inv.this.clone(), Vec::new())?;
            // Lost when the receiver is non-extensible
            if let Value::Object(receiver) = tracer_ref.unwrap(&inv.this) {
                tracer_ref.write_slot(&receiver, key.clone(), fresh.clone());
            }
            return tracer_ref.hook_value(&name, &fresh, &context);
        }
        let raw = tracer_ref.private_slot(&inv.this, &key).unwrap_or_default();
        tracer_ref.hook_value(&name, &raw, &context)
    });
    Value::from(tracer.realm().function_object(getter))
}

fn accessor_setter(tracer: &Tracer, property: &str, key: &PropertyKey, original: Option<Value>) -> Value {
    let tracer_ref = tracer.clone();
    let key = key.clone();
    let setter = NativeFunction::new(format!("set {property}"), move |inv| {
        let value = inv.arg(0);
        if let Value::Object(receiver) = tracer_ref.unwrap(&inv.this) {
            tracer_ref.write_slot(&receiver, key.clone(), value.clone());
        }
        if let Some(original) = &original {
            call(original, inv.this.clone(), vec![value])?;
        }
        Ok(Value::Undefined)
    });
    Value::from(tracer.realm().function_object(setter))
}

#[cfg(test)]
mod tests {
    use crate::config::TraceOptions;
    use crate::context::{CallContext, TraceKind};
    use crate::engine::Tracer;
    use crate::event::EventType;
    use crate::realm::Realm;
    use crate::value::{call, Completion, ObjectRef, PropertyDescriptor, PropertyKey, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn hook_root(tracer: &Tracer, name: &str, object: &ObjectRef) -> Completion {
        let context = Rc::new(CallContext::root(TraceKind::Module, name));
        tracer.hook_value(name, &Value::from(object.clone()), &context)
    }

    fn namespace(realm: &Realm) -> ObjectRef {
        let object = realm.new_object();
        object.put("answer", 42);
        object.put("double", realm.new_function("double", |inv| Ok(Value::from(inv.arg(0).to_number() * 2.0))));
        object
    }

    #[test]
    fn test_properties_become_accessors() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = namespace(&realm);
        let hooked = hook_root(&tracer, "ns", &object).unwrap();
        assert!(hooked.same_value(&Value::from(object.clone())));

        let double = object.get_own_property(&PropertyKey::from("double")).unwrap();
        assert!(double.is_accessor());
        assert!(double.is_enumerable());
        // Scalars are left alone
        let answer = object.get_own_property(&PropertyKey::from("answer")).unwrap();
        assert!(!answer.is_accessor());
    }

    #[test]
    fn test_getter_hooks_on_demand() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let names = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&names);
        tracer.events().on(EventType::Enter, move |e| seen.borrow_mut().push(e.name.clone()));
        let object = namespace(&realm);
        hook_root(&tracer, "ns", &object).unwrap();

        let double = object.get_str("double").unwrap();
        assert!(tracer.is_wrapper(&double));
        assert_eq!(call(&double, Value::from(object), vec![Value::from(4)]).unwrap(), Value::from(8));
        assert_eq!(*names.borrow(), vec!["ns.double".to_string()]);
    }

    #[test]
    fn test_setter_replaces_slot() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = namespace(&realm);
        hook_root(&tracer, "ns", &object).unwrap();

        let replacement = Value::from(realm.new_function("triple", |inv| Ok(Value::from(inv.arg(0).to_number() * 3.0))));
        let receiver = Value::from(object.clone());
        assert!(object.set(&PropertyKey::from("double"), replacement.clone(), &receiver).unwrap());

        let key = PropertyKey::from("double");
        assert!(tracer.private_slot(&receiver, &key).unwrap().same_value(&replacement));
        let read = object.get_str("double").unwrap();
        assert_eq!(call(&read, receiver, vec![Value::from(2)]).unwrap(), Value::from(6));
    }

    #[test]
    fn test_original_accessors_still_run() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = realm.new_object();
        let stored = Rc::new(RefCell::new(Value::from(realm.new_object())));
        let read_from = Rc::clone(&stored);
        let write_to = Rc::clone(&stored);
        object.define_own_property(
            PropertyKey::from("current"),
            PropertyDescriptor::Accessor {
                get: Some(Value::from(realm.new_function("get current", move |_| Ok(read_from.borrow().clone())))),
                set: Some(Value::from(realm.new_function("set current", move |inv| {
                    *write_to.borrow_mut() = inv.arg(0);
                    Ok(Value::Undefined)
                }))),
                enumerable: false,
                configurable: true,
            },
        );
        hook_root(&tracer, "ns", &object).unwrap();

        let next = Value::from(realm.new_object());
        object.set(&PropertyKey::from("current"), next.clone(), &Value::from(object.clone())).unwrap();
        assert!(stored.borrow().same_value(&next));
        let read = object.get_str("current").unwrap();
        assert!(read.same_value(&next));
        assert!(!object.get_own_property(&PropertyKey::from("current")).unwrap().is_enumerable());
    }

    #[test]
    fn test_original_getter_through_frozen_instance() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let prototype = realm.new_object();
        let current = Value::from(realm.new_object());
        let returned = current.clone();
        prototype.define_own_property(
            PropertyKey::from("current"),
            PropertyDescriptor::Accessor {
                get: Some(Value::from(realm.new_function("get current", move |_| Ok(returned.clone())))),
                set: None,
                enumerable: true,
                configurable: true,
            },
        );
        let instance = ObjectRef::new_ordinary(Some(prototype.clone()));
        instance.freeze();
        assert!(instance.get_str("current").unwrap().same_value(&current));

        hook_root(&tracer, "Proto", &prototype).unwrap();

        assert!(prototype.get_own_property(&PropertyKey::from("current")).unwrap().is_accessor());
        let read = instance.get_str("current").unwrap();
        assert!(read.same_value(&current));
        assert!(tracer.metadata(&current).is_some_and(|meta| meta.borrow().is_hooked));
    }

    #[test]
    fn test_non_configurable_properties_are_hooked_eagerly() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = realm.new_object();
        let nested = realm.new_object();
        nested.put("deep", realm.new_function("deep", |_| Ok(Value::Undefined)));
        object.define_own_property(
            PropertyKey::from("nested"),
            PropertyDescriptor::fixed(Value::from(nested.clone())),
        );
        hook_root(&tracer, "ns", &object).unwrap();

        // The slot stays a data property, but the nested object was hooked in place
        assert!(!object.get_own_property(&PropertyKey::from("nested")).unwrap().is_accessor());
        let meta = tracer.metadata(&Value::from(nested.clone())).unwrap();
        assert_eq!(meta.borrow().known_name.as_deref(), Some("ns.nested"));
        assert!(nested.get_own_property(&PropertyKey::from("deep")).unwrap().is_accessor());
    }

    #[test]
    fn test_inherited_accessor_reads_prototype_slot() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let prototype = namespace(&realm);
        hook_root(&tracer, "Proto", &prototype).unwrap();
        let instance = ObjectRef::new_ordinary(Some(prototype));
        let double = instance.get_str("double").unwrap();
        assert!(tracer.is_wrapper(&double));
    }

    #[test]
    fn test_filter_skips_properties() {
        let realm = Realm::new();
        let options = TraceOptions::default().with_filter(Rc::new(|c| Ok(c.name != "ns.double")));
        let tracer = Tracer::new(options, &realm);
        let object = namespace(&realm);
        hook_root(&tracer, "ns", &object).unwrap();
        assert!(!object.get_own_property(&PropertyKey::from("double")).unwrap().is_accessor());
    }

    #[test]
    fn test_self_referencing_frozen_graph_terminates() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = realm.new_object();
        object.put("myself", object.clone());
        object.freeze();
        let hooked = hook_root(&tracer, "loop", &object).unwrap();
        assert!(hooked.same_value(&Value::from(object)));
    }
}
