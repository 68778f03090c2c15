//! Dynamic value model for traced programs
//!
//! Values, objects with property descriptors and prototype chains, native
//! functions and proxies. The interception engine only ever wraps values of
//! this model, which is what scopes the instrumentation surface.
//!
//! Objects are reference counted and compared by identity. Thrown values are
//! carried as [`Throw`] inside a [`Completion`].

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SYMBOL_ID: AtomicU32 = AtomicU32::new(1);

/// Maximum prototype chain length walked before giving up
const MAX_PROTOTYPE_CHAIN_DEPTH: usize = 1024;

/// Unique symbol identifier, used for keys invisible to string enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

impl SymbolId {
    /// Allocate a process-unique symbol
    pub fn fresh() -> Self {
        Self(NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A property key: either a string or a symbol
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    String(String),
    Symbol(SymbolId),
}

impl PropertyKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Symbol(_) => None,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// Runtime value
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ObjectRef),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(ObjectRef::is_callable)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Object(o) if o.is_callable() => "function",
            Self::Object(_) => "object",
        }
    }

    /// Truthiness as used by conditionals
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }

    /// SameValue comparison: identity for objects, NaN equals NaN
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => {
                (a.is_nan() && b.is_nan()) || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `===`: like SameValue, except NaN is unequal to itself and zeros are equal
    pub fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b,
            _ => self.same_value(other),
        }
    }

    /// `==` without object-to-primitive conversion
    pub fn loose_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Object(_), _) | (_, Self::Object(_)) => self.same_value(other),
            _ if self.is_nullish() || other.is_nullish() => self.is_nullish() && other.is_nullish(),
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => self.to_number() == other.to_number(),
        }
    }

    /// Numeric coercion
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Self::Object(_) => f64::NAN,
        }
    }

    /// String coercion that never runs accessors
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => number_to_string(*n),
            Self::Str(s) => s.to_string(),
            Self::Object(o) => o.display_string(),
        }
    }

    /// Property read with this value as the receiver
    pub fn get(&self, key: &PropertyKey) -> Completion {
        match self {
            Self::Object(o) => o.get(key, self),
            Self::Undefined | Self::Null => Err(Throw::type_error(format!(
                "Cannot read properties of {} (reading '{key}')",
                self.to_display_string()
            ))),
            Self::Str(s) if key.as_str() == Some("length") => {
                Ok(Value::Number(s.chars().count() as f64))
            }
            _ => Ok(Value::Undefined),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", number_to_string(*n)),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Object(o) => write!(f, "{o:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

/// Format a number the way script output expects (`62`, not `62.0`)
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A thrown value travelling up the call stack
#[derive(Clone, PartialEq)]
pub struct Throw(pub Value);

impl Throw {
    /// A thrown TypeError message from the object model itself
    pub fn type_error(message: impl Into<String>) -> Self {
        Self(Value::from(format!("TypeError: {}", message.into())))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl fmt::Debug for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Throw({:?})", self.0)
    }
}

impl fmt::Display for Throw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_display_string())
    }
}

/// Result of evaluating anything that may throw
pub type Completion = Result<Value, Throw>;

/// Property descriptor: data or accessor
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescriptor {
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    Accessor {
        get: Option<Value>,
        set: Option<Value>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Writable, enumerable, configurable data property
    pub fn data(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Writable, configurable, non-enumerable data property (methods, `name`)
    pub fn hidden(value: Value) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    /// Non-writable, non-enumerable, non-configurable data property
    pub fn fixed(value: Value) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    fn freeze(&mut self) {
        match self {
            Self::Data {
                writable,
                configurable,
                ..
            } => {
                *writable = false;
                *configurable = false;
            }
            Self::Accessor { configurable, .. } => *configurable = false,
        }
    }
}

/// Arguments handed to a native function body
pub struct Invocation {
    /// The function object being invoked
    pub callee: ObjectRef,
    pub this: Value,
    pub args: Vec<Value>,
    /// Set when invoked as a constructor
    pub new_target: Option<ObjectRef>,
}

impl Invocation {
    /// Argument `index`, `undefined` when absent
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn is_construct(&self) -> bool {
        self.new_target.is_some()
    }

    /// The receiver as an object, or a TypeError naming the callee
    pub fn this_object(&self) -> Result<&ObjectRef, Throw> {
        self.this.as_object().ok_or_else(|| {
            Throw::type_error(format!(
                "{} called on non-object",
                self.callee.function_name().unwrap_or_default()
            ))
        })
    }
}

pub type NativeCall = Rc<dyn Fn(&Invocation) -> Completion>;

/// A host-implemented function
pub struct NativeFunction {
    pub name: String,
    pub behavior: NativeCall,
    pub constructable: bool,
    /// The body compares its receiver by identity and must never see a wrapper
    pub checks_receiver: bool,
}

impl NativeFunction {
    pub fn new(name: impl Into<String>, behavior: impl Fn(&Invocation) -> Completion + 'static) -> Self {
        Self {
            name: name.into(),
            behavior: Rc::new(behavior),
            constructable: false,
            checks_receiver: false,
        }
    }

    pub fn constructable(mut self) -> Self {
        self.constructable = true;
        self
    }

    pub fn checking_receiver(mut self) -> Self {
        self.checks_receiver = true;
        self
    }
}

/// Operations a proxy may intercept
///
/// Every trap defaults to forwarding to the target. Operations not listed
/// here (own keys, descriptors, prototype, extensibility) always forward.
pub trait ProxyTraps {
    fn get(&self, target: &ObjectRef, key: &PropertyKey, _receiver: &Value) -> Completion {
        target.get(key, &Value::Object(target.clone()))
    }

    fn set(
        &self,
        target: &ObjectRef,
        key: &PropertyKey,
        value: Value,
        _receiver: &Value,
    ) -> Result<bool, Throw> {
        target.set(key, value, &Value::Object(target.clone()))
    }

    fn apply(&self, target: &ObjectRef, this: Value, args: Vec<Value>) -> Completion {
        call(&Value::Object(target.clone()), this, args)
    }

    fn construct(
        &self,
        target: &ObjectRef,
        args: Vec<Value>,
        new_target: Option<ObjectRef>,
    ) -> Completion {
        construct(&Value::Object(target.clone()), args, new_target)
    }

    fn as_any(&self) -> &dyn Any;
}

pub enum ObjectKind {
    Ordinary,
    Function(Rc<NativeFunction>),
    Proxy {
        target: ObjectRef,
        traps: Rc<dyn ProxyTraps>,
    },
}

struct ObjectData {
    class_name: Option<String>,
    prototype: Option<ObjectRef>,
    extensible: bool,
    properties: Vec<(PropertyKey, PropertyDescriptor)>,
}

pub struct JsObject {
    id: u64,
    kind: ObjectKind,
    data: RefCell<ObjectData>,
}

/// Shared, identity-compared handle to an object
#[derive(Clone)]
pub struct ObjectRef(Rc<JsObject>);

/// Non-owning handle to an object
#[derive(Clone)]
pub struct WeakObjectRef(Weak<JsObject>);

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(object) => write!(f, "Weak({object:?})"),
            None => write!(f, "Weak(<dead>)"),
        }
    }
}

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl ObjectRef {
    fn alloc(kind: ObjectKind, prototype: Option<ObjectRef>, class_name: Option<String>) -> Self {
        Self(Rc::new(JsObject {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            data: RefCell::new(ObjectData {
                class_name,
                prototype,
                extensible: true,
                properties: Vec::new(),
            }),
        }))
    }

    pub fn new_ordinary(prototype: Option<ObjectRef>) -> Self {
        Self::alloc(ObjectKind::Ordinary, prototype, None)
    }

    pub fn with_class(prototype: Option<ObjectRef>, class_name: impl Into<String>) -> Self {
        Self::alloc(ObjectKind::Ordinary, prototype, Some(class_name.into()))
    }

    /// Function object with a hidden `name` property
    pub fn new_function(prototype: Option<ObjectRef>, function: NativeFunction) -> Self {
        let name = function.name.clone();
        let object = Self::alloc(
            ObjectKind::Function(Rc::new(function)),
            prototype,
            Some("Function".to_string()),
        );
        object.define_own_property(
            PropertyKey::from("name"),
            PropertyDescriptor::Data {
                value: Value::from(name),
                writable: false,
                enumerable: false,
                configurable: true,
            },
        );
        object
    }

    pub fn new_proxy(target: ObjectRef, traps: Rc<dyn ProxyTraps>) -> Self {
        Self::alloc(ObjectKind::Proxy { target, traps }, None, None)
    }

    /// Process-unique identity
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.0.kind
    }

    pub fn as_function(&self) -> Option<&Rc<NativeFunction>> {
        match &self.0.kind {
            ObjectKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn proxy_target(&self) -> Option<&ObjectRef> {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => Some(target),
            _ => None,
        }
    }

    pub fn proxy_traps(&self) -> Option<&Rc<dyn ProxyTraps>> {
        match &self.0.kind {
            ObjectKind::Proxy { traps, .. } => Some(traps),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        match &self.0.kind {
            ObjectKind::Ordinary => false,
            ObjectKind::Function(_) => true,
            ObjectKind::Proxy { target, .. } => target.is_callable(),
        }
    }

    pub fn is_constructor(&self) -> bool {
        match &self.0.kind {
            ObjectKind::Ordinary => false,
            ObjectKind::Function(f) => f.constructable,
            ObjectKind::Proxy { target, .. } => target.is_constructor(),
        }
    }

    pub fn class_name(&self) -> Option<String> {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.class_name(),
            _ => self.0.data.borrow().class_name.clone(),
        }
    }

    pub fn set_class_name(&self, class_name: impl Into<String>) {
        self.0.data.borrow_mut().class_name = Some(class_name.into());
    }

    /// `[[Prototype]]`, forwarded to the target for proxies
    pub fn prototype(&self) -> Option<ObjectRef> {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.prototype(),
            _ => self.0.data.borrow().prototype.clone(),
        }
    }

    pub fn set_prototype(&self, prototype: Option<ObjectRef>) {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.set_prototype(prototype),
            _ => self.0.data.borrow_mut().prototype = prototype,
        }
    }

    pub fn is_extensible(&self) -> bool {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.is_extensible(),
            _ => self.0.data.borrow().extensible,
        }
    }

    pub fn prevent_extensions(&self) {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.prevent_extensions(),
            _ => self.0.data.borrow_mut().extensible = false,
        }
    }

    /// Make every own property non-configurable (and data ones read-only)
    pub fn freeze(&self) {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.freeze(),
            _ => {
                let mut data = self.0.data.borrow_mut();
                data.extensible = false;
                for (_, descriptor) in &mut data.properties {
                    descriptor.freeze();
                }
            }
        }
    }

    pub fn get_own_property(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.get_own_property(key),
            _ => self
                .0
                .data
                .borrow()
                .properties
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, d)| d.clone()),
        }
    }

    /// Own keys in insertion order
    pub fn own_keys(&self) -> Vec<PropertyKey> {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => target.own_keys(),
            _ => self
                .0
                .data
                .borrow()
                .properties
                .iter()
                .map(|(k, _)| k.clone())
                .collect(),
        }
    }

    /// `[[DefineOwnProperty]]`; `false` when the change is rejected
    pub fn define_own_property(&self, key: PropertyKey, descriptor: PropertyDescriptor) -> bool {
        if let ObjectKind::Proxy { target, .. } = &self.0.kind {
            return target.define_own_property(key, descriptor);
        }
        let mut data = self.0.data.borrow_mut();
        match data.properties.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                let current = &data.properties[index].1;
                if !current.is_configurable() && !compatible_redefinition(current, &descriptor) {
                    return false;
                }
                data.properties[index].1 = descriptor;
                true
            }
            None => {
                if !data.extensible {
                    return false;
                }
                data.properties.push((key, descriptor));
                true
            }
        }
    }

    pub fn delete(&self, key: &PropertyKey) -> bool {
        if let ObjectKind::Proxy { target, .. } = &self.0.kind {
            return target.delete(key);
        }
        let mut data = self.0.data.borrow_mut();
        match data.properties.iter().position(|(k, _)| k == key) {
            Some(index) if !data.properties[index].1.is_configurable() => false,
            Some(index) => {
                data.properties.remove(index);
                true
            }
            None => true,
        }
    }

    /// Own or inherited property presence, without running accessors
    pub fn has_property(&self, key: &PropertyKey) -> bool {
        let mut current = Some(self.clone());
        let mut depth = 0;
        while let Some(object) = current {
            if object.get_own_property(key).is_some() {
                return true;
            }
            depth += 1;
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return false;
            }
            current = object.prototype();
        }
        false
    }

    /// `[[Get]]`: proxies dispatch to their traps, accessors run with `receiver`
    pub fn get(&self, key: &PropertyKey, receiver: &Value) -> Completion {
        if let ObjectKind::Proxy { target, traps } = &self.0.kind {
            return traps.get(target, key, receiver);
        }
        match self.get_own_property(key) {
            Some(PropertyDescriptor::Data { value, .. }) => Ok(value),
            Some(PropertyDescriptor::Accessor { get: Some(getter), .. }) => {
                call(&getter, receiver.clone(), Vec::new())
            }
            Some(PropertyDescriptor::Accessor { get: None, .. }) => Ok(Value::Undefined),
            None => match self.prototype() {
                Some(prototype) => prototype.get(key, receiver),
                None => Ok(Value::Undefined),
            },
        }
    }

    /// Convenience read with this object as receiver
    pub fn get_str(&self, key: &str) -> Completion {
        self.get(&PropertyKey::from(key), &Value::Object(self.clone()))
    }

    /// `[[Set]]`; `Ok(false)` when the assignment was rejected
    pub fn set(&self, key: &PropertyKey, value: Value, receiver: &Value) -> Result<bool, Throw> {
        if let ObjectKind::Proxy { target, traps } = &self.0.kind {
            return traps.set(target, key, value, receiver);
        }
        let mut holder = Some(self.clone());
        let mut depth = 0;
        while let Some(object) = holder {
            match object.get_own_property(key) {
                Some(PropertyDescriptor::Accessor { set: Some(setter), .. }) => {
                    call(&setter, receiver.clone(), vec![value])?;
                    return Ok(true);
                }
                Some(PropertyDescriptor::Accessor { set: None, .. }) => return Ok(false),
                Some(PropertyDescriptor::Data { writable: false, .. }) => return Ok(false),
                Some(PropertyDescriptor::Data { .. }) => break,
                None => {
                    depth += 1;
                    if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                        break;
                    }
                    holder = object.prototype();
                }
            }
        }
        let Value::Object(target) = receiver else {
            return Ok(false);
        };
        match target.get_own_property(key) {
            Some(PropertyDescriptor::Data {
                writable,
                enumerable,
                configurable,
                ..
            }) => Ok(writable
                && target.define_own_property(
                    key.clone(),
                    PropertyDescriptor::Data {
                        value,
                        writable,
                        enumerable,
                        configurable,
                    },
                )),
            Some(PropertyDescriptor::Accessor { .. }) => Ok(false),
            None => Ok(target.define_own_property(key.clone(), PropertyDescriptor::data(value))),
        }
    }

    /// Define (or overwrite) an enumerable data property, ignoring rejection
    pub fn put(&self, key: &str, value: impl Into<Value>) {
        self.define_own_property(PropertyKey::from(key), PropertyDescriptor::data(value.into()));
    }

    /// Define a non-enumerable data property, ignoring rejection
    pub fn put_hidden(&self, key: &str, value: impl Into<Value>) {
        self.define_own_property(PropertyKey::from(key), PropertyDescriptor::hidden(value.into()));
    }

    /// Read a data property along the prototype chain without running
    /// accessors or traps
    pub fn get_data(&self, key: &str) -> Option<Value> {
        let key = PropertyKey::from(key);
        let mut current = Some(self.clone());
        let mut depth = 0;
        while let Some(object) = current {
            let object = object.proxy_target().cloned().unwrap_or(object);
            if let Some(descriptor) = object.get_own_property(&key) {
                return descriptor.value().cloned();
            }
            depth += 1;
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return None;
            }
            current = object.prototype();
        }
        None
    }

    pub fn function_name(&self) -> Option<String> {
        match &self.0.kind {
            ObjectKind::Function(f) => Some(f.name.clone()),
            ObjectKind::Proxy { target, .. } => target.function_name(),
            ObjectKind::Ordinary => None,
        }
    }

    fn display_string(&self) -> String {
        if let Some(name) = self.function_name() {
            return format!("function {name}() {{ [native code] }}");
        }
        match self.class_name().as_deref() {
            Some("Array") => array_like_items(self)
                .iter()
                .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                .collect::<Vec<_>>()
                .join(","),
            Some(class) if class.ends_with("Error") => {
                let name = self
                    .get_data("name")
                    .map(|v| v.to_display_string())
                    .unwrap_or_else(|| class.to_string());
                match self.get_data("message").map(|v| v.to_display_string()) {
                    Some(message) if !message.is_empty() => format!("{name}: {message}"),
                    _ => name,
                }
            }
            _ => "[object Object]".to_string(),
        }
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.kind {
            ObjectKind::Proxy { target, .. } => write!(f, "Proxy#{}({target:?})", self.0.id),
            ObjectKind::Function(func) => write!(f, "Function#{}<{}>", self.0.id, func.name),
            ObjectKind::Ordinary => match self.0.data.try_borrow() {
                Ok(data) => write!(
                    f,
                    "Object#{}<{}>",
                    self.0.id,
                    data.class_name.as_deref().unwrap_or("Object")
                ),
                Err(_) => write!(f, "Object#{}", self.0.id),
            },
        }
    }
}

/// A non-configurable property accepts only a redefinition that changes nothing
/// observable
fn compatible_redefinition(current: &PropertyDescriptor, next: &PropertyDescriptor) -> bool {
    if next.is_configurable() || next.is_enumerable() != current.is_enumerable() {
        return false;
    }
    match (current, next) {
        (
            PropertyDescriptor::Data {
                value: cur_value,
                writable: cur_writable,
                ..
            },
            PropertyDescriptor::Data {
                value: new_value,
                writable: new_writable,
                ..
            },
        ) => *cur_writable || (!new_writable && cur_value.same_value(new_value)),
        (
            PropertyDescriptor::Accessor {
                get: cur_get,
                set: cur_set,
                ..
            },
            PropertyDescriptor::Accessor {
                get: new_get,
                set: new_set,
                ..
            },
        ) => cur_get == new_get && cur_set == new_set,
        _ => false,
    }
}

/// Largest valid array length, 2^32 - 1
pub const MAX_ARRAY_LENGTH: f64 = 4_294_967_295.0;

/// Most items ever materialized from a single array-like
pub const MAX_DENSE_ITEMS: usize = 1 << 20;

/// Items of an array-like (`length` plus indices), read without accessors
///
/// A `length` that is not a valid array length reads as empty. Valid but
/// huge lengths are cut off at [`MAX_DENSE_ITEMS`].
pub fn array_like_items(object: &ObjectRef) -> Vec<Value> {
    let length = object
        .get_data("length")
        .map(|v| v.to_number())
        .filter(|n| n.is_finite() && *n >= 0.0 && *n <= MAX_ARRAY_LENGTH)
        .map_or(0, |n| (n as usize).min(MAX_DENSE_ITEMS));
    (0..length)
        .map(|i| object.get_data(&i.to_string()).unwrap_or_default())
        .collect()
}

/// `[[Call]]`
pub fn call(callee: &Value, this: Value, args: Vec<Value>) -> Completion {
    let Value::Object(object) = callee else {
        return Err(Throw::type_error(format!(
            "{} is not a function",
            callee.to_display_string()
        )));
    };
    match object.kind() {
        ObjectKind::Function(function) => (function.behavior)(&Invocation {
            callee: object.clone(),
            this,
            args,
            new_target: None,
        }),
        ObjectKind::Proxy { target, traps } => traps.apply(target, this, args),
        ObjectKind::Ordinary => Err(Throw::type_error("object is not a function")),
    }
}

/// `[[Construct]]`: allocate `this` from `new_target.prototype` and run the body
pub fn construct(callee: &Value, args: Vec<Value>, new_target: Option<ObjectRef>) -> Completion {
    let Value::Object(object) = callee else {
        return Err(Throw::type_error(format!(
            "{} is not a constructor",
            callee.to_display_string()
        )));
    };
    match object.kind() {
        ObjectKind::Proxy { target, traps } => traps.construct(target, args, new_target),
        ObjectKind::Function(function) if function.constructable => {
            let new_target = new_target.unwrap_or_else(|| object.clone());
            let prototype = match new_target.get_str("prototype")? {
                Value::Object(prototype) => Some(prototype),
                _ => None,
            };
            let this = ObjectRef::new_ordinary(prototype);
            let result = (function.behavior)(&Invocation {
                callee: object.clone(),
                this: Value::Object(this.clone()),
                args,
                new_target: Some(new_target),
            })?;
            match result {
                Value::Object(_) => Ok(result),
                _ => Ok(Value::Object(this)),
            }
        }
        _ => Err(Throw::type_error(format!(
            "{} is not a constructor",
            object.function_name().unwrap_or_else(|| "object".to_string())
        ))),
    }
}

/// Peel every proxy layer off a value
pub fn unwrap_proxy_deep(value: &Value) -> Value {
    let mut current = value.clone();
    while let Some(target) = current.as_object().and_then(ObjectRef::proxy_target) {
        current = Value::Object(target.clone());
    }
    current
}

/// Nominal type check: is `constructor.prototype` on the prototype chain of
/// `value`? Both sides are looked at through proxies without running traps.
pub fn instance_of(value: &Value, constructor: &Value) -> bool {
    let Value::Object(constructor) = unwrap_proxy_deep(constructor) else {
        return false;
    };
    let Some(Value::Object(prototype)) = constructor
        .get_own_property(&PropertyKey::from("prototype"))
        .and_then(|d| d.value().cloned())
    else {
        return false;
    };
    let Value::Object(object) = unwrap_proxy_deep(value) else {
        return false;
    };
    let mut current = object.prototype();
    let mut depth = 0;
    while let Some(candidate) = current {
        if candidate.ptr_eq(&prototype) {
            return true;
        }
        depth += 1;
        if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
            return false;
        }
        current = candidate.prototype();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_function() -> ObjectRef {
        ObjectRef::new_function(
            None,
            NativeFunction::new("add", |inv| {
                Ok(Value::from(inv.arg(0).to_number() + inv.arg(1).to_number()))
            }),
        )
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(62.0), "62");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(-3.0), "-3");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::INFINITY), "Infinity");
    }

    #[test]
    fn test_same_value() {
        let a = ObjectRef::new_ordinary(None);
        let b = ObjectRef::new_ordinary(None);
        assert!(Value::from(a.clone()).same_value(&Value::from(a.clone())));
        assert!(!Value::from(a).same_value(&Value::from(b)));
        assert!(Value::Number(f64::NAN).same_value(&Value::Number(f64::NAN)));
        assert!(!Value::from(1).same_value(&Value::from("1")));
    }

    #[test]
    fn test_call_native_function() {
        let add = Value::from(add_function());
        let result = call(&add, Value::Undefined, vec![Value::from(20), Value::from(42)]).unwrap();
        assert_eq!(result, Value::from(62));
    }

    #[test]
    fn test_call_non_function_throws() {
        let err = call(&Value::from(3), Value::Undefined, vec![]).unwrap_err();
        assert!(err.to_string().contains("is not a function"));
    }

    #[test]
    fn test_prototype_chain_get() {
        let proto = ObjectRef::new_ordinary(None);
        proto.put("greeting", "hi");
        let child = ObjectRef::new_ordinary(Some(proto));
        assert_eq!(child.get_str("greeting").unwrap(), Value::from("hi"));
        assert_eq!(child.get_str("missing").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_accessor_receives_receiver() {
        let proto = ObjectRef::new_ordinary(None);
        let getter = ObjectRef::new_function(
            None,
            NativeFunction::new("get tag", |inv| Ok(inv.this_object()?.get_data("tag").unwrap_or_default())),
        );
        proto.define_own_property(
            PropertyKey::from("tagged"),
            PropertyDescriptor::Accessor {
                get: Some(Value::from(getter)),
                set: None,
                enumerable: true,
                configurable: true,
            },
        );
        let child = ObjectRef::new_ordinary(Some(proto));
        child.put("tag", "child");
        assert_eq!(child.get_str("tagged").unwrap(), Value::from("child"));
    }

    #[test]
    fn test_non_configurable_redefinition_rejected() {
        let object = ObjectRef::new_ordinary(None);
        object.define_own_property(PropertyKey::from("x"), PropertyDescriptor::fixed(Value::from(1)));
        assert!(!object.define_own_property(PropertyKey::from("x"), PropertyDescriptor::data(Value::from(2))));
        assert!(!object.delete(&PropertyKey::from("x")));
        assert_eq!(object.get_str("x").unwrap(), Value::from(1));
    }

    #[test]
    fn test_non_extensible_rejects_new_properties() {
        let object = ObjectRef::new_ordinary(None);
        object.prevent_extensions();
        let receiver = Value::from(object.clone());
        assert!(!object.set(&PropertyKey::from("x"), Value::from(1), &receiver).unwrap());
        assert!(object.get_own_property(&PropertyKey::from("x")).is_none());
    }

    #[test]
    fn test_freeze_makes_properties_read_only() {
        let object = ObjectRef::new_ordinary(None);
        object.put("x", 1);
        object.freeze();
        let receiver = Value::from(object.clone());
        assert!(!object.set(&PropertyKey::from("x"), Value::from(2), &receiver).unwrap());
        assert!(!object.get_own_property(&PropertyKey::from("x")).unwrap().is_configurable());
    }

    #[test]
    fn test_construct_uses_prototype_property() {
        let class = ObjectRef::new_function(
            None,
            NativeFunction::new("Point", |inv| {
                let this = inv.this_object()?;
                this.put("x", inv.arg(0));
                Ok(Value::Undefined)
            })
            .constructable(),
        );
        let prototype = ObjectRef::new_ordinary(None);
        class.define_own_property(
            PropertyKey::from("prototype"),
            PropertyDescriptor::fixed(Value::from(prototype)),
        );
        let class = Value::from(class);
        let point = construct(&class, vec![Value::from(3)], None).unwrap();
        assert!(instance_of(&point, &class));
        assert_eq!(point.get(&PropertyKey::from("x")).unwrap(), Value::from(3));
    }

    #[test]
    fn test_construct_non_constructor_throws() {
        let add = Value::from(add_function());
        assert!(construct(&add, vec![], None).is_err());
    }

    struct Passthrough;

    impl ProxyTraps for Passthrough {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_proxy_forwards_by_default() {
        let target = add_function();
        target.put("answer", 42);
        let proxy = ObjectRef::new_proxy(target.clone(), Rc::new(Passthrough));
        assert!(proxy.is_callable());
        assert_eq!(proxy.get_str("answer").unwrap(), Value::from(42));
        let sum = call(&Value::from(proxy.clone()), Value::Undefined, vec![Value::from(1), Value::from(2)]).unwrap();
        assert_eq!(sum, Value::from(3));
        assert!(unwrap_proxy_deep(&Value::from(proxy)).same_value(&Value::from(target)));
    }

    #[test]
    fn test_weak_ref_does_not_keep_alive() {
        let object = ObjectRef::new_ordinary(None);
        let weak = object.downgrade();
        assert!(weak.is_alive());
        drop(object);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_array_like_with_huge_length() {
        let invalid = ObjectRef::new_ordinary(None);
        invalid.put("length", 1e15);
        assert!(array_like_items(&invalid).is_empty());

        let sparse = ObjectRef::new_ordinary(None);
        sparse.put("length", MAX_ARRAY_LENGTH);
        sparse.put("0", "first");
        let items = array_like_items(&sparse);
        assert_eq!(items.len(), MAX_DENSE_ITEMS);
        assert_eq!(items[0], Value::from("first"));
        assert!(items[1].is_undefined());
    }

    #[test]
    fn test_read_property_of_undefined_throws() {
        assert!(Value::Undefined.get(&PropertyKey::from("x")).is_err());
    }
}
