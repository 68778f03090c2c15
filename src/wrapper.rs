//! Call/construct-trapping wrappers
//!
//! A wrapper is a proxy around the original value whose traps route calls
//! through [`Tracer::trace_call`] and hook every property value read through
//! it. Everything else forwards to the original untouched.

use crate::context::CallContext;
use crate::engine::Tracer;
use crate::value::{call, construct, Completion, ObjectRef, PropertyKey, ProxyTraps, Value};
use std::any::Any;
use std::rc::Rc;

pub(crate) struct CallTrap {
    tracer: Tracer,
    name: String,
    context: Rc<CallContext>,
}

impl CallTrap {
    pub(crate) fn belongs_to(&self, tracer: &Tracer) -> bool {
        self.tracer.ptr_eq(tracer)
    }

    /// Receiver handed to the wrapped function
    fn receiver_for(&self, target: &ObjectRef, this: &Value) -> Value {
        let checks_receiver = target.as_function().is_some_and(|f| f.checks_receiver);
        if checks_receiver || self.context.is_binding_origin() {
            self.tracer.unwrap(this)
        } else {
            this.clone()
        }
    }
}

/// Wrap `target` under `name`
pub(crate) fn create(tracer: &Tracer, name: &str, target: &ObjectRef, context: &Rc<CallContext>) -> ObjectRef {
    ObjectRef::new_proxy(
        target.clone(),
        Rc::new(CallTrap {
            tracer: tracer.clone(),
            name: name.to_string(),
            context: Rc::clone(context),
        }),
    )
}

impl ProxyTraps for CallTrap {
    fn get(&self, target: &ObjectRef, key: &PropertyKey, _receiver: &Value) -> Completion {
        if key == self.tracer.unwrap_marker() {
            return Ok(Value::from(target.clone()));
        }
        let value = target.get(key, &Value::from(target.clone()))?;
        match key.as_str() {
            Some(property) => self
                .tracer
                .hook_value(&format!("{}.{property}", self.name), &value, &self.context),
            None => Ok(value),
        }
    }

    fn apply(&self, target: &ObjectRef, this: Value, args: Vec<Value>) -> Completion {
        let receiver = self.receiver_for(target, &this);
        let callee = Value::from(target.clone());
        self.tracer
            .trace_call(&self.name, &self.context, Some(this), args, false, |args| {
                call(&callee, receiver, args)
            })
    }

    fn construct(&self, target: &ObjectRef, args: Vec<Value>, new_target: Option<ObjectRef>) -> Completion {
        // Instances must get the original prototype, not one read through a wrapper
        let new_target = new_target
            .map(|t| self.tracer.unwrap(&Value::from(t)))
            .and_then(|t| t.as_object().cloned())
            .unwrap_or_else(|| target.clone());
        let callee = Value::from(target.clone());
        self.tracer
            .trace_call(&self.name, &self.context, None, args, true, |args| {
                construct(&callee, args, Some(new_target))
            })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
