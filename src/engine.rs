//! The interception engine
//!
//! [`Tracer`] owns the per-instance state: nesting, call ids, the untraced
//! scope and the emission guard, plus the metadata side table and the
//! classification snapshot. Wrapping itself lives in [`crate::wrapper`] and
//! property rewriting in [`crate::lazy`]; both call back into the tracer.
//!
//! Every counter is held through a guard that is released on all exit paths,
//! so a throwing call or a panicking subscriber never leaves the engine in a
//! skewed state.

use crate::classify::BuiltinSurface;
use crate::config::TraceOptions;
use crate::context::{CallContext, TraceKind};
use crate::environment::{EnvironmentEnumerator, RootEntry};
use crate::error::TraceError;
use crate::event::{CallEvent, EventType, Events, Frame};
use crate::filter::{Candidate, Subject};
use crate::lazy;
use crate::metadata::{MetaHandle, MetadataStore};
use crate::realm::Realm;
use crate::value::{call, Completion, NativeFunction, ObjectRef, PropertyDescriptor, PropertyKey, SymbolId, Throw, Value};
use crate::wrapper::{self, CallTrap};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

/// Global name the engine handle is installed under with `provide_global`
pub const GLOBAL_HANDLE_NAME: &str = "__interpose__";

/// Globals that alias the global object itself
const SKIPPED_GLOBALS: &[&str] = &["global", "globalThis"];

/// Counters of one engine instance
#[derive(Debug, Default)]
struct EngineState {
    nesting: Cell<u32>,
    next_call_id: Cell<u64>,
    untraced: Cell<u32>,
    emission: Cell<u32>,
    /// Shadow stack of open traced calls
    open_calls: RefCell<Vec<Frame>>,
}

/// Increments a counter for as long as it is alive
struct DepthGuard<'a> {
    counter: &'a Cell<u32>,
    previous: u32,
}

impl<'a> DepthGuard<'a> {
    fn enter(counter: &'a Cell<u32>) -> Self {
        let previous = counter.get();
        counter.set(previous + 1);
        Self { counter, previous }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.counter.set(self.counter.get() - 1);
    }
}

/// One open call: nesting level plus its shadow stack frame
struct CallGuard<'a> {
    state: &'a EngineState,
    depth: u32,
}

impl<'a> CallGuard<'a> {
    fn open(state: &'a EngineState, frame: Frame) -> Self {
        let depth = state.nesting.get();
        state.nesting.set(depth + 1);
        state.open_calls.borrow_mut().push(frame);
        Self { state, depth }
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.state.open_calls.borrow_mut().pop();
        self.state.nesting.set(self.state.nesting.get() - 1);
    }
}

/// An own property descriptor together with the object it was read from
///
/// Redefining through [`Tracer::define_property`] carries the private slot
/// of the source along, so copies see raw values rather than wrappers.
#[derive(Debug, Clone)]
pub struct TracedDescriptor {
    pub descriptor: PropertyDescriptor,
    pub source: ObjectRef,
}

pub(crate) struct TracerInner {
    options: TraceOptions,
    realm: Realm,
    surface: BuiltinSurface,
    store: RefCell<MetadataStore>,
    state: EngineState,
    events: Events,
    /// Objects whose properties are being rewritten right now
    installing: RefCell<HashSet<u64>>,
    /// Never-hook object standing for the engine itself
    handle: ObjectRef,
    /// Key that makes a wrapper hand out its target
    unwrap_marker: PropertyKey,
}

/// Call-interception engine bound to one realm
#[derive(Clone)]
pub struct Tracer {
    inner: Rc<TracerInner>,
}

/// Non-owning reference to a [`Tracer`], for natives stored inside the realm
#[derive(Clone, Default)]
pub struct WeakTracer(Weak<TracerInner>);

impl WeakTracer {
    pub fn upgrade(&self) -> Option<Tracer> {
        self.0.upgrade().map(|inner| Tracer { inner })
    }
}

impl Tracer {
    pub fn new(options: TraceOptions, realm: &Realm) -> Self {
        let surface = BuiltinSurface::snapshot(realm);
        let inner = Rc::new_cyclic(|weak: &Weak<TracerInner>| TracerInner {
            options,
            realm: realm.clone(),
            surface,
            store: RefCell::new(MetadataStore::new()),
            state: EngineState::default(),
            events: Events::new(),
            installing: RefCell::new(HashSet::new()),
            handle: build_handle(realm, weak.clone()),
            unwrap_marker: PropertyKey::Symbol(SymbolId::fresh()),
        });
        let tracer = Self { inner };
        tracer.mark_never_hook(&tracer.handle());
        if let Some(run_untraced) = tracer.inner.handle.get_data("runUntraced") {
            tracer.mark_never_hook(&run_untraced);
        }
        tracing::debug!(options = ?tracer.inner.options, "tracer created");
        tracer
    }

    /// Subscriber list of this engine
    pub fn events(&self) -> Events {
        self.inner.events.clone()
    }

    pub fn options(&self) -> &TraceOptions {
        &self.inner.options
    }

    pub fn realm(&self) -> &Realm {
        &self.inner.realm
    }

    /// The object standing for the engine in the traced world
    pub fn handle(&self) -> Value {
        Value::from(self.inner.handle.clone())
    }

    pub(crate) fn unwrap_marker(&self) -> &PropertyKey {
        &self.inner.unwrap_marker
    }

    pub fn downgrade(&self) -> WeakTracer {
        WeakTracer(Rc::downgrade(&self.inner))
    }

    pub(crate) fn ptr_eq(&self, other: &Tracer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of calls currently open
    pub fn nesting_depth(&self) -> u32 {
        self.inner.state.nesting.get()
    }

    pub fn is_untraced(&self) -> bool {
        self.inner.state.untraced.get() > 0
    }

    /// Run `f` with hooking suppressed
    pub fn run_untraced<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = DepthGuard::enter(&self.inner.state.untraced);
        f()
    }

    /// Hook an ad-hoc value under `name`
    ///
    /// Objects come back as wrappers; the caller's own object graph is left
    /// as it was.
    pub fn hook(&self, name: &str, value: &Value) -> Completion {
        self.hook_value(name, value, &Rc::new(CallContext::custom()))
    }

    /// Wrap `value` so calls through it are traced
    ///
    /// Returns the value unchanged when it is not eligible: scalars,
    /// built-ins, never-hook values, the engine itself, values the filter
    /// rejects, and anything requested inside an untraced scope (which is
    /// handed back unwrapped). A throwing filter propagates its error.
    pub fn hook_value(&self, name: &str, value: &Value, context: &Rc<CallContext>) -> Completion {
        if self.is_untraced() {
            return Ok(self.unwrap(value));
        }
        let Value::Object(object) = value else {
            return Ok(value.clone());
        };
        if self.is_wrapper(value) || self.is_excluded(value) {
            return Ok(value.clone());
        }

        let existing = self.inner.store.borrow().get(object);
        let name = existing
            .as_ref()
            .and_then(|meta| meta.borrow().name_override.clone())
            .unwrap_or_else(|| name.to_string());

        if let Some(meta) = &existing {
            let meta = meta.borrow();
            if meta.is_hooked {
                match meta.live_wrapper() {
                    Some(wrapper)
                        if !object.is_callable() || meta.cached_name.as_deref() == Some(name.as_str()) =>
                    {
                        return Ok(Value::from(wrapper));
                    }
                    // Hooked in place
                    None if meta.cached_name.is_none() && !object.is_callable() => {
                        return Ok(value.clone());
                    }
                    _ => {}
                }
            }
        }

        if !self.admit(&name, Subject::Value(value))? {
            tracing::trace!(name = %name, "filter rejected value");
            return Ok(value.clone());
        }

        let meta = self.inner.store.borrow_mut().ensure(object);
        {
            let mut meta = meta.borrow_mut();
            meta.is_hooked = true;
            meta.known_name.get_or_insert_with(|| name.clone());
            meta.creation_context.get_or_insert_with(|| Rc::clone(context));
        }

        if context.existing_object || context.is_binding_origin() {
            self.install_lazy_hooks(&name, object, context, &meta)?;
            if !object.is_callable() {
                return Ok(value.clone());
            }
        }

        let wrapper = wrapper::create(self, &name, object, context);
        tracing::trace!(name = %name, object = object.id(), wrapper = wrapper.id(), "wrapped");
        let mut meta = meta.borrow_mut();
        meta.cached_wrapper = Some(wrapper.downgrade());
        meta.cached_name = Some(name);
        Ok(Value::from(wrapper))
    }

    fn install_lazy_hooks(
        &self,
        name: &str,
        object: &ObjectRef,
        context: &Rc<CallContext>,
        meta: &MetaHandle,
    ) -> Result<(), Throw> {
        if !self.inner.installing.borrow_mut().insert(object.id()) {
            return Ok(());
        }
        let result = lazy::install_lazy_hooks(self, name, object, context, meta);
        self.inner.installing.borrow_mut().remove(&object.id());
        result
    }

    /// Hook every root the environment supplies and hand out the event source
    ///
    /// Roots that fail to resolve are logged and skipped. A filter that
    /// throws while admitting a root aborts setup.
    pub fn setup_hooks(&self, env: &dyn EnvironmentEnumerator) -> Result<Events, TraceError> {
        for value in env.never_hook() {
            self.mark_never_hook(&value);
        }
        if self.inner.options.provide_global {
            self.inner.realm.global().put_hidden(GLOBAL_HANDLE_NAME, self.handle());
        }

        let flags = self.inner.options.trace;
        if flags.binding {
            self.hook_roots(TraceKind::Binding, env.bindings())?;
        }
        if flags.global {
            self.hook_roots(TraceKind::Global, env.globals())?;
        }
        if flags.module {
            self.hook_roots(TraceKind::Module, env.modules())?;
        }
        tracing::debug!(hooked = self.inner.store.borrow().len(), "setup complete");
        Ok(self.events())
    }

    fn hook_roots(&self, kind: TraceKind, roots: Vec<RootEntry>) -> Result<(), TraceError> {
        for (name, resolved) in roots {
            let name = match kind {
                TraceKind::Binding => format!("@{name}"),
                _ => name,
            };
            if kind == TraceKind::Global && SKIPPED_GLOBALS.contains(&name.as_str()) {
                continue;
            }
            let value = match resolved {
                Ok(value) => value,
                Err(err) => {
                    tracing::warn!(root = %name, error = %err, "skipping root that failed to resolve");
                    continue;
                }
            };
            let context = Rc::new(CallContext::root(kind, name.clone()));
            self.hook_value(&name, &value, &context)
                .map_err(|thrown| TraceError::Filter {
                    name: name.clone(),
                    message: thrown.to_string(),
                })?;
        }
        Ok(())
    }

    /// Run a traced call: enter, invoke, leave, then hook the result
    pub(crate) fn trace_call(
        &self,
        name: &str,
        context: &Rc<CallContext>,
        this_arg: Option<Value>,
        args: Vec<Value>,
        is_construct_call: bool,
        invoke: impl FnOnce(Vec<Value>) -> Completion,
    ) -> Completion {
        if self.is_untraced() {
            return invoke(args);
        }
        let local_name = if is_construct_call {
            format!("new {name}")
        } else {
            name.to_string()
        };

        let args = if self.inner.options.trace.passed {
            let passed = Rc::new(context.derive(TraceKind::Passed));
            args.iter()
                .enumerate()
                .map(|(i, arg)| self.hook_value(&format!("({local_name} args).{i}"), arg, &passed))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            args
        };

        let call_id = self.inner.state.next_call_id.get();
        self.inner.state.next_call_id.set(call_id + 1);
        let stack = self.call_sites();

        let guard = CallGuard::open(
            &self.inner.state,
            Frame {
                call_id,
                name: local_name.clone(),
            },
        );
        let mut event = CallEvent {
            call_id,
            is_construct_call,
            name: name.to_string(),
            local_name: local_name.clone(),
            this_arg,
            arguments: args.clone(),
            depth: guard.depth,
            context: Rc::clone(context),
            stack,
            ret: None,
            exception: None,
        };
        self.emit(EventType::Enter, &event);

        let outcome = invoke(args);
        match &outcome {
            Ok(ret) => event.ret = Some(ret.clone()),
            Err(thrown) => event.exception = Some(thrown.value().clone()),
        }
        self.emit(EventType::Leave, &event);
        drop(guard);

        let ret = outcome?;
        if self.inner.options.trace.ret {
            let produced = Rc::new(context.derive(TraceKind::Ret).produced_by(call_id));
            return self.hook_value(&format!("{local_name}()"), &ret, &produced);
        }
        Ok(ret)
    }

    /// Deliver an event unless another emission is already in progress
    pub fn emit(&self, event_type: EventType, event: &CallEvent) {
        let guard = DepthGuard::enter(&self.inner.state.emission);
        if guard.previous == 0 {
            self.inner.events.dispatch(event_type, event);
        } else {
            tracing::trace!(call_id = event.call_id, "dropped reentrant emission");
        }
    }

    /// Innermost open calls, when call-site gathering is enabled
    fn call_sites(&self) -> Option<Vec<Frame>> {
        let limit = self.inner.options.gather_call_sites?;
        Some(
            self.inner
                .state
                .open_calls
                .borrow()
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect(),
        )
    }

    pub(crate) fn admit(&self, name: &str, subject: Subject<'_>) -> Result<bool, Throw> {
        let stack = self.call_sites();
        let candidate = Candidate {
            name,
            subject,
            stack: stack.as_deref(),
        };
        (self.inner.options.filter)(&candidate)
    }

    /// Is `value` one of this engine's wrappers?
    pub fn is_wrapper(&self, value: &Value) -> bool {
        self.own_trap(value).is_some()
    }

    fn own_trap<'v>(&self, value: &'v Value) -> Option<&'v CallTrap> {
        let traps = value.as_object()?.proxy_traps()?;
        traps
            .as_any()
            .downcast_ref::<CallTrap>()
            .filter(|trap| trap.belongs_to(self))
    }

    /// Peel this engine's wrappers off `value`
    pub fn unwrap(&self, value: &Value) -> Value {
        let mut current = value.clone();
        while self.is_wrapper(&current) {
            let Some(target) = current.as_object().and_then(ObjectRef::proxy_target).cloned() else {
                break;
            };
            current = Value::from(target);
        }
        current
    }

    /// Excluded from hooking: scalars, built-ins, never-hook values and the
    /// engine itself
    pub fn is_excluded(&self, value: &Value) -> bool {
        if self.inner.surface.is_excluded(value) {
            return true;
        }
        match self.unwrap(value) {
            Value::Object(object) => {
                object.ptr_eq(&self.inner.handle)
                    || self
                        .inner
                        .store
                        .borrow()
                        .get(&object)
                        .is_some_and(|meta| meta.borrow().never_hook)
            }
            _ => true,
        }
    }

    /// Exclude `value` from hooking for the lifetime of the engine
    pub fn mark_never_hook(&self, value: &Value) {
        if let Value::Object(object) = self.unwrap(value) {
            self.inner.store.borrow_mut().pin(&object).borrow_mut().never_hook = true;
        }
    }

    /// Fix the display name `value` is hooked under from now on
    pub fn set_name_override(&self, value: &Value, name: &str) {
        if let Value::Object(object) = self.unwrap(value) {
            self.inner.store.borrow_mut().ensure(&object).borrow_mut().name_override = Some(name.to_string());
        }
    }

    /// Hook metadata of the original behind `value`
    pub fn metadata(&self, value: &Value) -> Option<MetaHandle> {
        match self.unwrap(value) {
            Value::Object(object) => self.inner.store.borrow().get(&object),
            _ => None,
        }
    }

    /// Raw value last stored for `key` through a rewritten accessor,
    /// looked up along the prototype chain of `object`
    pub fn private_slot(&self, object: &Value, key: &PropertyKey) -> Option<Value> {
        let Value::Object(start) = self.unwrap(object) else {
            return None;
        };
        let store = self.inner.store.borrow();
        let mut current = Some(start);
        while let Some(object) = current {
            if let Some(value) = store.get(&object).and_then(|meta| meta.borrow().slot(key).cloned()) {
                return Some(value);
            }
            current = object.prototype();
        }
        None
    }

    pub(crate) fn write_slot(&self, object: &ObjectRef, key: PropertyKey, value: Value) {
        let meta = self.inner.store.borrow_mut().ensure(object);
        meta.borrow_mut().set_slot(key, value);
    }

    /// Own property descriptor of `object`, tagged with its source
    pub fn own_property_descriptor(&self, object: &ObjectRef, key: &PropertyKey) -> Option<TracedDescriptor> {
        let source = match self.unwrap(&Value::from(object.clone())) {
            Value::Object(source) => source,
            _ => object.clone(),
        };
        source.get_own_property(key).map(|descriptor| TracedDescriptor { descriptor, source })
    }

    /// Define `key` on `target`, carrying over the source's private slot
    pub fn define_property(&self, target: &ObjectRef, key: PropertyKey, traced: TracedDescriptor) -> bool {
        let raw = self
            .inner
            .store
            .borrow()
            .get(&traced.source)
            .and_then(|meta| meta.borrow().slot(&key).cloned());
        if let Some(raw) = raw {
            self.write_slot(target, key.clone(), raw);
        }
        target.define_own_property(key, traced.descriptor)
    }

    /// Shallow copy of `object` that keeps raw values of rewritten properties
    pub fn clone_object(&self, object: &ObjectRef) -> ObjectRef {
        let copy = ObjectRef::new_ordinary(object.prototype());
        for key in object.own_keys() {
            if let Some(traced) = self.own_property_descriptor(object, &key) {
                self.define_property(&copy, key, traced);
            }
        }
        copy
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("nesting", &self.inner.state.nesting.get())
            .field("next_call_id", &self.inner.state.next_call_id.get())
            .field("untraced", &self.inner.state.untraced.get())
            .finish_non_exhaustive()
    }
}

/// The engine as seen from the traced world: `runUntraced(fn)`
fn build_handle(realm: &Realm, tracer: Weak<TracerInner>) -> ObjectRef {
    let handle = ObjectRef::with_class(Some(realm.object_prototype().clone()), "Interpose");
    let run_untraced = realm.function_object(NativeFunction::new("runUntraced", move |inv| {
        let Some(inner) = tracer.upgrade() else {
            return Err(Throw::type_error("tracer has been dropped"));
        };
        let tracer = Tracer { inner };
        let callback = inv.arg(0);
        tracer.run_untraced(|| call(&callback, Value::Undefined, Vec::new()))
    }));
    handle.put_hidden("runUntraced", run_untraced);
    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceFlags;
    use crate::realm::BuiltinKind;
    use crate::value::{construct, instance_of};

    type Log = Rc<RefCell<Vec<(EventType, u64, u32, String)>>>;

    fn record(tracer: &Tracer) -> Log {
        let log: Log = Rc::default();
        let enter = Rc::clone(&log);
        let leave = Rc::clone(&log);
        tracer
            .events()
            .on(EventType::Enter, move |e| {
                enter.borrow_mut().push((EventType::Enter, e.call_id, e.depth, e.name.clone()))
            })
            .on(EventType::Leave, move |e| {
                leave.borrow_mut().push((EventType::Leave, e.call_id, e.depth, e.name.clone()))
            });
        log
    }

    fn method_object(realm: &Realm) -> ObjectRef {
        let object = realm.new_object();
        object.put(
            "method",
            realm.new_function("method", |inv| Ok(Value::from(inv.arg(0).to_number() + 42.0))),
        );
        object
    }

    fn call_method(object: &Value, method: &str, args: Vec<Value>) -> Completion {
        let callee = object.get(&PropertyKey::from(method))?;
        call(&callee, object.clone(), args)
    }

    #[test]
    fn test_scenario_method_call() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let object = Value::from(method_object(&realm));

        let hooked = tracer.hook("obj", &object).unwrap();
        let result = call_method(&hooked, "method", vec![Value::from(20)]).unwrap();

        assert_eq!(result, Value::from(62));
        assert_eq!(
            *log.borrow(),
            vec![
                (EventType::Enter, 0, 0, "obj.method".to_string()),
                (EventType::Leave, 0, 0, "obj.method".to_string()),
            ]
        );
    }

    #[test]
    fn test_ad_hoc_hook_leaves_object_untouched() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = method_object(&realm);
        let value = Value::from(object.clone());

        let hooked = tracer.hook("obj", &value).unwrap();

        assert!(tracer.is_wrapper(&hooked));
        assert!(!hooked.same_value(&value));
        let key = PropertyKey::from("method");
        let descriptor = object.get_own_property(&key).unwrap();
        assert!(!descriptor.is_accessor());
        assert!(!tracer.is_wrapper(descriptor.value().unwrap()));
        assert!(tracer.private_slot(&value, &key).is_none());
        // Hooking again hands back the same wrapper
        assert!(tracer.hook("obj", &value).unwrap().same_value(&hooked));
    }

    #[test]
    fn test_scenario_returned_closure() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let object = realm.new_object();
        let closure_realm = realm.clone();
        object.put(
            "method",
            realm.new_function("method", move |_| {
                Ok(Value::from(closure_realm.new_function("inner", |_| Ok(Value::from("done")))))
            }),
        );

        let hooked = tracer.hook("obj", &Value::from(object)).unwrap();
        let closure = call_method(&hooked, "method", vec![]).unwrap();
        assert!(tracer.is_wrapper(&closure));
        log.borrow_mut().clear();

        assert_eq!(call(&closure, Value::Undefined, vec![]).unwrap(), Value::from("done"));
        assert_eq!(
            *log.borrow(),
            vec![
                (EventType::Enter, 1, 0, "obj.method()".to_string()),
                (EventType::Leave, 1, 0, "obj.method()".to_string()),
            ]
        );
    }

    fn point_class(realm: &Realm) -> ObjectRef {
        realm.new_class("Point", None, |inv| {
            inv.this_object()?.put("x", inv.arg(0));
            Ok(Value::Undefined)
        })
    }

    #[test]
    fn test_scenario_construct() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let constructs = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&constructs);
        tracer.events().on(EventType::Enter, move |e| {
            seen.borrow_mut().push((e.is_construct_call, e.local_name.clone()))
        });
        let class = Value::from(point_class(&realm));

        let hooked = tracer.hook("Point", &class).unwrap();
        assert!(tracer.is_wrapper(&hooked));
        let point = construct(&hooked, vec![Value::from(3)], None).unwrap();

        assert_eq!(*constructs.borrow(), vec![(true, "new Point".to_string())]);
        assert!(instance_of(&point, &class));
        assert_eq!(point.get(&PropertyKey::from("x")).unwrap(), Value::from(3));
    }

    #[test]
    fn test_hook_is_idempotent() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let f = Value::from(realm.new_function("f", |_| Ok(Value::Undefined)));
        let first = tracer.hook("f", &f).unwrap();
        let second = tracer.hook("f", &f).unwrap();
        assert!(first.same_value(&second));
        // Hooking the wrapper itself hands it back
        assert!(tracer.hook("f", &first).unwrap().same_value(&first));
    }

    #[test]
    fn test_second_name_gets_independent_wrapper() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let f = Value::from(realm.new_function("f", |_| Ok(Value::Undefined)));
        let first = tracer.hook("a.f", &f).unwrap();
        let second = tracer.hook("b.f", &f).unwrap();
        assert!(!first.same_value(&second));
        assert!(tracer.unwrap(&first).same_value(&tracer.unwrap(&second)));
    }

    #[test]
    fn test_name_override_wins() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let names = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&names);
        tracer.events().on(EventType::Enter, move |e| seen.borrow_mut().push(e.name.clone()));
        let f = Value::from(realm.new_function("f", |_| Ok(Value::Undefined)));
        tracer.set_name_override(&f, "fixed");
        let first = tracer.hook("a.f", &f).unwrap();
        let second = tracer.hook("b.f", &f).unwrap();
        assert!(first.same_value(&second));
        call(&second, Value::Undefined, vec![]).unwrap();
        assert_eq!(*names.borrow(), vec!["fixed".to_string()]);
    }

    #[test]
    fn test_transparent_exception_identity() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let error = realm.new_error(BuiltinKind::Error, "boom");
        let thrown = error.clone();
        let f = Value::from(realm.new_function("fails", move |_| Err(Throw(thrown.clone()))));
        let exceptions = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&exceptions);
        tracer.events().on(EventType::Leave, move |e| seen.borrow_mut().push(e.exception.clone()));

        let hooked = tracer.hook("fails", &f).unwrap();
        let err = call(&hooked, Value::Undefined, vec![]).unwrap_err();

        assert!(err.value().same_value(&error));
        assert_eq!(exceptions.borrow().len(), 1);
        assert!(exceptions.borrow()[0].as_ref().unwrap().same_value(&error));
        assert_eq!(tracer.nesting_depth(), 0);
    }

    #[test]
    fn test_events_are_well_nested() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let inner = tracer
            .hook("inner", &Value::from(realm.new_function("inner", |_| Ok(Value::from(1)))))
            .unwrap();
        let outer = Value::from(realm.new_function("outer", move |_| call(&inner, Value::Undefined, vec![])));
        let outer = tracer.hook("outer", &outer).unwrap();

        call(&outer, Value::Undefined, vec![]).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![
                (EventType::Enter, 0, 0, "outer".to_string()),
                (EventType::Enter, 1, 1, "inner".to_string()),
                (EventType::Leave, 1, 1, "inner".to_string()),
                (EventType::Leave, 0, 0, "outer".to_string()),
            ]
        );
    }

    #[test]
    fn test_self_exclusion() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let handle = tracer.handle();
        assert!(tracer.hook("engine", &handle).unwrap().same_value(&handle));

        let internal = Value::from(realm.new_function("internal", |_| Ok(Value::Undefined)));
        tracer.mark_never_hook(&internal);
        let hooked = tracer.hook("internal", &internal).unwrap();
        assert!(hooked.same_value(&internal));
        call(&hooked, Value::Undefined, vec![]).unwrap();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_builtins_are_not_wrapped() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let map = Value::from(realm.intrinsic(BuiltinKind::Map).clone());
        assert!(tracer.hook("Map", &map).unwrap().same_value(&map));
        assert!(tracer.hook("n", &Value::from(3)).unwrap().same_value(&Value::from(3)));
    }

    #[test]
    fn test_filter_rejection_creates_no_metadata() {
        let realm = Realm::new();
        let options = TraceOptions::default().with_filter(Rc::new(|c| Ok(c.name != "secret")));
        let tracer = Tracer::new(options, &realm);
        let f = Value::from(realm.new_function("f", |_| Ok(Value::Undefined)));
        let hooked = tracer.hook("secret", &f).unwrap();
        assert!(hooked.same_value(&f));
        assert!(tracer.metadata(&f).is_none());
    }

    #[test]
    fn test_filter_error_propagates() {
        let realm = Realm::new();
        let options = TraceOptions::default().with_filter(Rc::new(|_| Err(Throw(Value::from("filter broke")))));
        let tracer = Tracer::new(options, &realm);
        let f = Value::from(realm.new_function("f", |_| Ok(Value::Undefined)));
        let err = tracer.hook("f", &f).unwrap_err();
        assert_eq!(err.value(), &Value::from("filter broke"));
    }

    #[test]
    fn test_untraced_scope_is_invisible() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let f = Value::from(realm.new_function("f", |_| Ok(Value::from(1))));
        let wrapper = tracer.hook("f", &f).unwrap();

        tracer.run_untraced(|| {
            let fresh = realm.new_function("g", |_| Ok(Value::Undefined));
            let fresh = Value::from(fresh);
            assert!(tracer.hook("g", &fresh).unwrap().same_value(&fresh));
            assert!(tracer.hook("f", &wrapper).unwrap().same_value(&f));
            tracer.run_untraced(|| call(&wrapper, Value::Undefined, vec![]).unwrap());
        });

        assert!(log.borrow().is_empty());
        assert!(!tracer.is_untraced());
    }

    #[test]
    fn test_run_untraced_releases_on_panic() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tracer.run_untraced(|| panic!("subscriber bug"));
        }));
        assert!(result.is_err());
        assert!(!tracer.is_untraced());
    }

    #[test]
    fn test_non_extensible_values_are_wrapped_twice() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let frozen = realm.new_function("frozen", |_| Ok(Value::from(7)));
        frozen.freeze();
        let frozen = Value::from(frozen);

        let first = tracer.hook("frozen", &frozen).unwrap();
        let second = tracer.hook("frozen", &frozen).unwrap();

        assert!(!first.same_value(&second));
        assert_eq!(call(&first, Value::Undefined, vec![]).unwrap(), Value::from(7));
        assert_eq!(call(&second, Value::Undefined, vec![]).unwrap(), Value::from(7));
        assert!(tracer.metadata(&frozen).is_none());
    }

    #[test]
    fn test_clone_preserves_raw_slots() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let object = realm.new_object();
        let raw = Value::from(realm.new_function("helper", |_| Ok(Value::Undefined)));
        object.put("helper", raw.clone());
        let context = Rc::new(CallContext::root(TraceKind::Module, "obj"));
        tracer.hook_value("obj", &Value::from(object.clone()), &context).unwrap();

        let key = PropertyKey::from("helper");
        let traced = tracer.own_property_descriptor(&object, &key).unwrap();
        assert!(traced.descriptor.is_accessor());

        let copy = tracer.clone_object(&object);
        assert!(tracer.private_slot(&Value::from(copy.clone()), &key).unwrap().same_value(&raw));
        let through_copy = copy.get_str("helper").unwrap();
        assert!(tracer.is_wrapper(&through_copy));
        assert!(tracer.unwrap(&through_copy).same_value(&raw));
    }

    #[test]
    fn test_reentrant_emission_is_dropped() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let side = tracer
            .hook("side", &Value::from(realm.new_function("side", |_| Ok(Value::Undefined))))
            .unwrap();
        let side_calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&side_calls);
        tracer.events().on(EventType::Enter, move |_| {
            call(&side, Value::Undefined, vec![]).unwrap();
            counter.set(counter.get() + 1);
        });
        let main = tracer
            .hook("main", &Value::from(realm.new_function("main", |_| Ok(Value::Undefined))))
            .unwrap();

        call(&main, Value::Undefined, vec![]).unwrap();

        assert_eq!(side_calls.get(), 1);
        let names: Vec<String> = log.borrow().iter().map(|(_, _, _, name)| name.clone()).collect();
        assert_eq!(names, vec!["main".to_string(), "main".to_string()]);
    }

    #[test]
    fn test_receiver_checking_native_sees_raw_receiver() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let holder = realm.new_object();
        let expected = holder.clone();
        let check = realm.function_object(
            NativeFunction::new("check", move |inv| {
                Ok(Value::from(inv.this.as_object().is_some_and(|this| this.ptr_eq(&expected))))
            })
            .checking_receiver(),
        );
        holder.put("check", check);
        let this_args = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&this_args);
        tracer.events().on(EventType::Enter, move |e| seen.borrow_mut().push(e.this_arg.clone()));

        let ret_context = Rc::new(CallContext::new(TraceKind::Ret));
        let wrapped = tracer.hook_value("holder", &Value::from(holder), &ret_context).unwrap();
        assert!(tracer.is_wrapper(&wrapped));

        assert_eq!(call_method(&wrapped, "check", vec![]).unwrap(), Value::from(true));
        assert!(this_args.borrow()[0].as_ref().unwrap().same_value(&wrapped));
    }

    #[test]
    fn test_arguments_are_hooked_when_passed_tracing_is_on() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let received = Rc::new(RefCell::new(Value::Undefined));
        let slot = Rc::clone(&received);
        let f = Value::from(realm.new_function("consume", move |inv| {
            *slot.borrow_mut() = inv.arg(0);
            Ok(Value::Undefined)
        }));
        let hooked = tracer.hook("consume", &f).unwrap();
        let argument = Value::from(realm.new_object());

        call(&hooked, Value::Undefined, vec![argument.clone()]).unwrap();

        let seen = received.borrow().clone();
        assert!(tracer.is_wrapper(&seen));
        assert!(tracer.unwrap(&seen).same_value(&argument));
        let meta = tracer.metadata(&argument).unwrap();
        assert_eq!(meta.borrow().known_name.as_deref(), Some("(consume args).0"));
        let context = meta.borrow().creation_context.clone().unwrap();
        assert_eq!(context.kind, TraceKind::Passed);
    }

    #[test]
    fn test_return_tracing_can_be_disabled() {
        let realm = Realm::new();
        let options = TraceOptions::default().with_trace(TraceFlags {
            ret: false,
            ..TraceFlags::default()
        });
        let tracer = Tracer::new(options, &realm);
        let inner = Value::from(realm.new_function("inner", |_| Ok(Value::Undefined)));
        let returned = inner.clone();
        let f = Value::from(realm.new_function("make", move |_| Ok(returned.clone())));
        let hooked = tracer.hook("make", &f).unwrap();
        assert!(call(&hooked, Value::Undefined, vec![]).unwrap().same_value(&inner));
    }

    #[test]
    fn test_ret_context_records_producer() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let closure_realm = realm.clone();
        let f = Value::from(realm.new_function("make", move |_| Ok(Value::from(closure_realm.new_object()))));
        let hooked = tracer.hook("make", &f).unwrap();
        let made = call(&hooked, Value::Undefined, vec![]).unwrap();
        let meta = tracer.metadata(&made).unwrap();
        let context = meta.borrow().creation_context.clone().unwrap();
        assert_eq!(context.kind, TraceKind::Ret);
        assert_eq!(context.produced_by, Some(0));
        assert_eq!(meta.borrow().known_name.as_deref(), Some("make()"));
    }

    #[test]
    fn test_call_sites_are_attached() {
        let realm = Realm::new();
        let options = TraceOptions {
            gather_call_sites: Some(4),
            ..TraceOptions::default()
        };
        let tracer = Tracer::new(options, &realm);
        let stacks = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&stacks);
        tracer.events().on(EventType::Enter, move |e| seen.borrow_mut().push(e.stack.clone()));
        let inner = tracer
            .hook("inner", &Value::from(realm.new_function("inner", |_| Ok(Value::Undefined))))
            .unwrap();
        let outer = tracer
            .hook("outer", &Value::from(realm.new_function("outer", move |_| call(&inner, Value::Undefined, vec![]))))
            .unwrap();

        call(&outer, Value::Undefined, vec![]).unwrap();

        let stacks = stacks.borrow();
        assert_eq!(stacks[0], Some(vec![]));
        assert_eq!(
            stacks[1],
            Some(vec![Frame {
                call_id: 0,
                name: "outer".to_string()
            }])
        );
    }

    #[test]
    fn test_run_untraced_through_handle() {
        let realm = Realm::new();
        let tracer = Tracer::new(TraceOptions::default(), &realm);
        let log = record(&tracer);
        let f = tracer
            .hook("f", &Value::from(realm.new_function("f", |_| Ok(Value::from(5)))))
            .unwrap();
        let callback = Value::from(realm.new_function("callback", move |_| call(&f, Value::Undefined, vec![])));
        let result = call_method(&tracer.handle(), "runUntraced", vec![callback]).unwrap();
        assert_eq!(result, Value::from(5));
        assert!(log.borrow().is_empty());
    }
}
