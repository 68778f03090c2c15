//! Built-in intrinsics and the global object
//!
//! A [`Realm`] creates one intrinsic per [`BuiltinKind`]. The closed
//! enumeration is what the classification oracle snapshots at startup, so
//! adding a built-in here automatically excludes it from interception.

use crate::value::{
    array_like_items, construct, NativeFunction, ObjectRef, PropertyDescriptor, PropertyKey,
    Throw, Value, MAX_ARRAY_LENGTH,
};
use std::collections::BTreeMap;

/// Every built-in the realm provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuiltinKind {
    Object,
    Function,
    Array,
    ArrayBuffer,
    Boolean,
    DataView,
    Date,
    Error,
    EvalError,
    RangeError,
    ReferenceError,
    SyntaxError,
    TypeError,
    UriError,
    Float32Array,
    Float64Array,
    Int8Array,
    Int16Array,
    Int32Array,
    Uint8Array,
    Uint8ClampedArray,
    Uint16Array,
    Uint32Array,
    Map,
    Set,
    WeakMap,
    WeakSet,
    Promise,
    RegExp,
    String,
    Number,
    Symbol,
    Json,
    Math,
    DecodeUri,
    DecodeUriComponent,
    EncodeUri,
    EncodeUriComponent,
    Escape,
    Eval,
    IsFinite,
    IsNaN,
    ParseFloat,
    ParseInt,
    Unescape,
}

/// How a built-in presents itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinShape {
    /// A class with a `prototype` object
    Constructor,
    /// A plain namespace object (`Math`, `JSON`)
    Namespace,
    /// A free function
    Function,
}

impl BuiltinKind {
    pub const ALL: &'static [BuiltinKind] = &[
        Self::Object,
        Self::Function,
        Self::Array,
        Self::ArrayBuffer,
        Self::Boolean,
        Self::DataView,
        Self::Date,
        Self::Error,
        Self::EvalError,
        Self::RangeError,
        Self::ReferenceError,
        Self::SyntaxError,
        Self::TypeError,
        Self::UriError,
        Self::Float32Array,
        Self::Float64Array,
        Self::Int8Array,
        Self::Int16Array,
        Self::Int32Array,
        Self::Uint8Array,
        Self::Uint8ClampedArray,
        Self::Uint16Array,
        Self::Uint32Array,
        Self::Map,
        Self::Set,
        Self::WeakMap,
        Self::WeakSet,
        Self::Promise,
        Self::RegExp,
        Self::String,
        Self::Number,
        Self::Symbol,
        Self::Json,
        Self::Math,
        Self::DecodeUri,
        Self::DecodeUriComponent,
        Self::EncodeUri,
        Self::EncodeUriComponent,
        Self::Escape,
        Self::Eval,
        Self::IsFinite,
        Self::IsNaN,
        Self::ParseFloat,
        Self::ParseInt,
        Self::Unescape,
    ];

    /// Global binding name
    pub fn name(self) -> &'static str {
        match self {
            Self::Object => "Object",
            Self::Function => "Function",
            Self::Array => "Array",
            Self::ArrayBuffer => "ArrayBuffer",
            Self::Boolean => "Boolean",
            Self::DataView => "DataView",
            Self::Date => "Date",
            Self::Error => "Error",
            Self::EvalError => "EvalError",
            Self::RangeError => "RangeError",
            Self::ReferenceError => "ReferenceError",
            Self::SyntaxError => "SyntaxError",
            Self::TypeError => "TypeError",
            Self::UriError => "URIError",
            Self::Float32Array => "Float32Array",
            Self::Float64Array => "Float64Array",
            Self::Int8Array => "Int8Array",
            Self::Int16Array => "Int16Array",
            Self::Int32Array => "Int32Array",
            Self::Uint8Array => "Uint8Array",
            Self::Uint8ClampedArray => "Uint8ClampedArray",
            Self::Uint16Array => "Uint16Array",
            Self::Uint32Array => "Uint32Array",
            Self::Map => "Map",
            Self::Set => "Set",
            Self::WeakMap => "WeakMap",
            Self::WeakSet => "WeakSet",
            Self::Promise => "Promise",
            Self::RegExp => "RegExp",
            Self::String => "String",
            Self::Number => "Number",
            Self::Symbol => "Symbol",
            Self::Json => "JSON",
            Self::Math => "Math",
            Self::DecodeUri => "decodeURI",
            Self::DecodeUriComponent => "decodeURIComponent",
            Self::EncodeUri => "encodeURI",
            Self::EncodeUriComponent => "encodeURIComponent",
            Self::Escape => "escape",
            Self::Eval => "eval",
            Self::IsFinite => "isFinite",
            Self::IsNaN => "isNaN",
            Self::ParseFloat => "parseFloat",
            Self::ParseInt => "parseInt",
            Self::Unescape => "unescape",
        }
    }

    pub fn shape(self) -> BuiltinShape {
        match self {
            Self::Json | Self::Math => BuiltinShape::Namespace,
            Self::DecodeUri
            | Self::DecodeUriComponent
            | Self::EncodeUri
            | Self::EncodeUriComponent
            | Self::Escape
            | Self::Eval
            | Self::IsFinite
            | Self::IsNaN
            | Self::ParseFloat
            | Self::ParseInt
            | Self::Unescape => BuiltinShape::Function,
            _ => BuiltinShape::Constructor,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            Self::Error
                | Self::EvalError
                | Self::RangeError
                | Self::ReferenceError
                | Self::SyntaxError
                | Self::TypeError
                | Self::UriError
        )
    }

    /// Constructors whose instances count as built-in values. `Object` and
    /// `Array` are left out: every plain object and argument list inherits
    /// from them.
    pub fn excludes_instances(self) -> bool {
        self.shape() == BuiltinShape::Constructor && !matches!(self, Self::Object | Self::Array)
    }
}

/// Characters `encodeURIComponent` leaves alone
const URI_UNRESERVED: &str = "-_.!~*'()";
/// Extra characters `encodeURI` leaves alone
const URI_RESERVED: &str = ";,/?:@&=+$#";

/// Intrinsics plus the global object
#[derive(Clone)]
pub struct Realm {
    object_prototype: ObjectRef,
    function_prototype: ObjectRef,
    intrinsics: BTreeMap<BuiltinKind, ObjectRef>,
    global: ObjectRef,
}

impl Realm {
    pub fn new() -> Self {
        let object_prototype = ObjectRef::with_class(None, "Object");
        let function_prototype = ObjectRef::with_class(Some(object_prototype.clone()), "Function");
        let global = ObjectRef::with_class(Some(object_prototype.clone()), "global");
        let mut realm = Self {
            object_prototype,
            function_prototype,
            intrinsics: BTreeMap::new(),
            global,
        };
        for &kind in BuiltinKind::ALL {
            let intrinsic = realm.create_intrinsic(kind);
            realm.global.put_hidden(kind.name(), intrinsic.clone());
            realm.intrinsics.insert(kind, intrinsic);
        }
        realm.install_prototype_methods();
        realm.global.put_hidden("globalThis", realm.global.clone());
        realm.global.put_hidden("global", realm.global.clone());
        realm
    }

    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    pub fn object_prototype(&self) -> &ObjectRef {
        &self.object_prototype
    }

    pub fn function_prototype(&self) -> &ObjectRef {
        &self.function_prototype
    }

    pub fn intrinsic(&self, kind: BuiltinKind) -> &ObjectRef {
        &self.intrinsics[&kind]
    }

    pub fn intrinsics(&self) -> impl Iterator<Item = (BuiltinKind, &ObjectRef)> {
        self.intrinsics.iter().map(|(kind, object)| (*kind, object))
    }

    /// Plain object inheriting from `Object.prototype`
    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::new_ordinary(Some(self.object_prototype.clone()))
    }

    pub fn new_function(
        &self,
        name: &str,
        behavior: impl Fn(&crate::value::Invocation) -> crate::value::Completion + 'static,
    ) -> ObjectRef {
        ObjectRef::new_function(
            Some(self.function_prototype.clone()),
            NativeFunction::new(name, behavior),
        )
    }

    /// Wrap an already configured native function in a function object
    pub fn function_object(&self, function: NativeFunction) -> ObjectRef {
        ObjectRef::new_function(Some(self.function_prototype.clone()), function)
    }

    /// Constructable function with a fresh `prototype` object whose
    /// `constructor` points back at it
    pub fn new_class(
        &self,
        name: &str,
        parent_prototype: Option<ObjectRef>,
        behavior: impl Fn(&crate::value::Invocation) -> crate::value::Completion + 'static,
    ) -> ObjectRef {
        let class = self.function_object(NativeFunction::new(name, behavior).constructable());
        let prototype = ObjectRef::new_ordinary(Some(
            parent_prototype.unwrap_or_else(|| self.object_prototype.clone()),
        ));
        prototype.put_hidden("constructor", class.clone());
        class.define_own_property(
            PropertyKey::from("prototype"),
            PropertyDescriptor::fixed(Value::from(prototype)),
        );
        class
    }

    /// The `prototype` object of a class
    pub fn prototype_of_class(class: &ObjectRef) -> Option<ObjectRef> {
        class.get_data("prototype").and_then(|v| v.as_object().cloned())
    }

    /// Array-like object inheriting from `Array.prototype`
    pub fn new_array(&self, items: Vec<Value>) -> ObjectRef {
        make_array(self.intrinsic(BuiltinKind::Array), items)
    }

    /// Instantiate one of the error classes
    pub fn new_error(&self, kind: BuiltinKind, message: &str) -> Value {
        let class = Value::from(self.intrinsic(kind).clone());
        construct(&class, vec![Value::from(message)], None).unwrap_or_else(|thrown| thrown.0)
    }

    /// Build a throw carrying an error instance
    pub fn throw(&self, kind: BuiltinKind, message: &str) -> Throw {
        throw_instance(self.intrinsics.get(&kind), message)
    }

    fn create_intrinsic(&self, kind: BuiltinKind) -> ObjectRef {
        match kind.shape() {
            BuiltinShape::Namespace => self.create_namespace(kind),
            BuiltinShape::Function => self.create_free_function(kind),
            BuiltinShape::Constructor => self.create_constructor(kind),
        }
    }

    fn create_constructor(&self, kind: BuiltinKind) -> ObjectRef {
        let class = match kind {
            BuiltinKind::Object => {
                let class = self.function_object(
                    NativeFunction::new("Object", |inv| match inv.arg(0) {
                        value @ Value::Object(_) => Ok(value),
                        _ => Ok(inv.this.clone()),
                    })
                    .constructable(),
                );
                // Object.prototype already exists; the class adopts it.
                self.object_prototype.put_hidden("constructor", class.clone());
                class.define_own_property(
                    PropertyKey::from("prototype"),
                    PropertyDescriptor::fixed(Value::from(self.object_prototype.clone())),
                );
                return class;
            }
            BuiltinKind::Function => {
                let class = self.function_object(NativeFunction::new("Function", |_| {
                    Err(Throw::type_error("dynamic function creation is not supported"))
                }));
                self.function_prototype.put_hidden("constructor", class.clone());
                class.define_own_property(
                    PropertyKey::from("prototype"),
                    PropertyDescriptor::fixed(Value::from(self.function_prototype.clone())),
                );
                return class;
            }
            BuiltinKind::Array => {
                // RangeError is created after Array
                let global = self.global.downgrade();
                self.new_class("Array", None, move |inv| {
                    let (items, length) = match inv.args.as_slice() {
                        [Value::Number(n)] => {
                            if n.fract() != 0.0 || *n < 0.0 || *n > MAX_ARRAY_LENGTH {
                                let range_error = global
                                    .upgrade()
                                    .and_then(|global| global.get_data("RangeError"))
                                    .and_then(|class| class.as_object().cloned());
                                return Err(throw_instance(range_error.as_ref(), "Invalid array length"));
                            }
                            // Holes only; no index is materialized
                            (Vec::new(), *n)
                        }
                        args => (args.to_vec(), args.len() as f64),
                    };
                    let array = if inv.is_construct() {
                        let this = inv.this_object()?;
                        this.set_class_name("Array");
                        fill_array(this, items);
                        this.clone()
                    } else {
                        make_array(&inv.callee, items)
                    };
                    array.put_hidden("length", length);
                    Ok(Value::from(array))
                })
            }
            kind if kind.is_error() => {
                let parent = (kind != BuiltinKind::Error)
                    .then(|| self.intrinsics.get(&BuiltinKind::Error))
                    .flatten()
                    .and_then(Self::prototype_of_class);
                let name = kind.name();
                let class = self.new_class(name, parent, move |inv| {
                    if !inv.is_construct() {
                        let class = Value::from(inv.callee.clone());
                        return construct(&class, inv.args.clone(), None);
                    }
                    let this = inv.this_object()?;
                    this.set_class_name(name);
                    if !inv.arg(0).is_undefined() {
                        this.put_hidden("message", inv.arg(0).to_display_string());
                    }
                    Ok(Value::Undefined)
                });
                if let Some(prototype) = Self::prototype_of_class(&class) {
                    prototype.put_hidden("name", name);
                    prototype.put_hidden("message", "");
                }
                class
            }
            BuiltinKind::String => self.new_class("String", None, |inv| {
                let text = if inv.args.is_empty() {
                    String::new()
                } else {
                    inv.arg(0).to_display_string()
                };
                tag_or_return(inv, "String", Value::from(text))
            }),
            BuiltinKind::Number => self.new_class("Number", None, |inv| {
                let number = if inv.args.is_empty() { 0.0 } else { inv.arg(0).to_number() };
                tag_or_return(inv, "Number", Value::from(number))
            }),
            BuiltinKind::Boolean => self.new_class("Boolean", None, |inv| {
                tag_or_return(inv, "Boolean", Value::from(inv.arg(0).is_truthy()))
            }),
            other => {
                let name = other.name();
                self.new_class(name, None, move |inv| {
                    if inv.is_construct() {
                        inv.this_object()?.set_class_name(name);
                        Ok(Value::Undefined)
                    } else {
                        Err(Throw::type_error(format!(
                            "Class constructor {name} cannot be invoked without 'new'"
                        )))
                    }
                })
            }
        };
        class.set_class_name("Function");
        class
    }

    fn create_namespace(&self, kind: BuiltinKind) -> ObjectRef {
        let namespace = ObjectRef::with_class(Some(self.object_prototype.clone()), kind.name());
        match kind {
            BuiltinKind::Math => {
                namespace.put_hidden("PI", std::f64::consts::PI);
                namespace.put_hidden("E", std::f64::consts::E);
                let unary: [(&str, fn(f64) -> f64); 6] = [
                    ("abs", f64::abs),
                    ("floor", f64::floor),
                    ("ceil", f64::ceil),
                    ("round", f64::round),
                    ("sqrt", f64::sqrt),
                    ("trunc", f64::trunc),
                ];
                for (name, op) in unary {
                    namespace.put_hidden(
                        name,
                        self.new_function(name, move |inv| Ok(Value::from(op(inv.arg(0).to_number())))),
                    );
                }
                namespace.put_hidden(
                    "max",
                    self.new_function("max", |inv| {
                        Ok(Value::from(
                            inv.args.iter().map(Value::to_number).fold(f64::NEG_INFINITY, f64::max),
                        ))
                    }),
                );
                namespace.put_hidden(
                    "min",
                    self.new_function("min", |inv| {
                        Ok(Value::from(
                            inv.args.iter().map(Value::to_number).fold(f64::INFINITY, f64::min),
                        ))
                    }),
                );
                namespace.put_hidden(
                    "pow",
                    self.new_function("pow", |inv| {
                        Ok(Value::from(inv.arg(0).to_number().powf(inv.arg(1).to_number())))
                    }),
                );
            }
            BuiltinKind::Json => {
                namespace.put_hidden(
                    "stringify",
                    self.new_function("stringify", |inv| match to_json(&inv.arg(0), 0) {
                        Some(json) => Ok(Value::from(json.to_string())),
                        None => Ok(Value::Undefined),
                    }),
                );
                let object_prototype = self.object_prototype.clone();
                let array_class = self.intrinsics.get(&BuiltinKind::Array).cloned();
                let syntax_error = self.intrinsics.get(&BuiltinKind::SyntaxError).cloned();
                namespace.put_hidden(
                    "parse",
                    self.new_function("parse", move |inv| {
                        let text = inv.arg(0).to_display_string();
                        match serde_json::from_str::<serde_json::Value>(&text) {
                            Ok(json) => Ok(json_to_value(&json, &object_prototype, array_class.as_ref())),
                            Err(e) => Err(throw_instance(syntax_error.as_ref(), &e.to_string())),
                        }
                    }),
                );
            }
            _ => {}
        }
        namespace
    }

    fn create_free_function(&self, kind: BuiltinKind) -> ObjectRef {
        match kind {
            BuiltinKind::ParseInt => self.new_function("parseInt", |inv| {
                let text = inv.arg(0).to_display_string();
                let radix = match inv.arg(1).to_number() {
                    r if r.is_nan() || r == 0.0 => 10,
                    r => r as u32,
                };
                Ok(Value::from(parse_int(&text, radix)))
            }),
            BuiltinKind::ParseFloat => self.new_function("parseFloat", |inv| {
                Ok(Value::from(parse_float(&inv.arg(0).to_display_string())))
            }),
            BuiltinKind::IsNaN => self.new_function("isNaN", |inv| {
                Ok(Value::from(inv.arg(0).to_number().is_nan()))
            }),
            BuiltinKind::IsFinite => self.new_function("isFinite", |inv| {
                Ok(Value::from(inv.arg(0).to_number().is_finite()))
            }),
            BuiltinKind::EncodeUriComponent | BuiltinKind::Escape => {
                self.new_function(kind.name(), |inv| {
                    Ok(Value::from(percent_encode(&inv.arg(0).to_display_string(), URI_UNRESERVED)))
                })
            }
            BuiltinKind::EncodeUri => self.new_function("encodeURI", |inv| {
                let keep = format!("{URI_UNRESERVED}{URI_RESERVED}");
                Ok(Value::from(percent_encode(&inv.arg(0).to_display_string(), &keep)))
            }),
            BuiltinKind::DecodeUri | BuiltinKind::DecodeUriComponent | BuiltinKind::Unescape => {
                let uri_error = self.intrinsics.get(&BuiltinKind::UriError).cloned();
                self.new_function(kind.name(), move |inv| {
                    percent_decode(&inv.arg(0).to_display_string())
                        .map(Value::from)
                        .ok_or_else(|| throw_instance(uri_error.as_ref(), "URI malformed"))
                })
            }
            BuiltinKind::Eval => {
                let eval_error = self.intrinsics.get(&BuiltinKind::EvalError).cloned();
                self.new_function("eval", move |_| {
                    Err(throw_instance(eval_error.as_ref(), "eval is not supported"))
                })
            }
            other => self.new_function(other.name(), |_| Ok(Value::Undefined)),
        }
    }

    fn install_prototype_methods(&self) {
        let Some(array_prototype) = Self::prototype_of_class(self.intrinsic(BuiltinKind::Array))
        else {
            return;
        };
        array_prototype.put_hidden(
            "push",
            self.new_function("push", |inv| {
                let this = inv.this_object()?;
                let mut items = array_like_items(this);
                items.extend(inv.args.iter().cloned());
                let length = items.len();
                fill_array(this, items);
                Ok(Value::from(length as f64))
            }),
        );
        array_prototype.put_hidden(
            "join",
            self.new_function("join", |inv| {
                let separator = match inv.arg(0) {
                    Value::Undefined => ",".to_string(),
                    other => other.to_display_string(),
                };
                let items = array_like_items(inv.this_object()?);
                Ok(Value::from(
                    items
                        .iter()
                        .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                        .collect::<Vec<_>>()
                        .join(&separator),
                ))
            }),
        );
        self.object_prototype.put_hidden(
            "hasOwnProperty",
            self.new_function("hasOwnProperty", |inv| {
                let key = PropertyKey::from(inv.arg(0).to_display_string());
                Ok(Value::from(inv.this_object()?.get_own_property(&key).is_some()))
            }),
        );
    }

    /// Convert parsed JSON into realm values
    pub fn from_json(&self, json: &serde_json::Value) -> Value {
        json_to_value(json, &self.object_prototype, self.intrinsics.get(&BuiltinKind::Array))
    }
}

impl Default for Realm {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_or_return(inv: &crate::value::Invocation, class: &str, primitive: Value) -> crate::value::Completion {
    if inv.is_construct() {
        let this = inv.this_object()?;
        this.set_class_name(class);
        this.put_hidden("valueOf", primitive);
        Ok(inv.this.clone())
    } else {
        Ok(primitive)
    }
}

pub(crate) fn make_array(array_class: &ObjectRef, items: Vec<Value>) -> ObjectRef {
    let array = ObjectRef::with_class(Realm::prototype_of_class(array_class), "Array");
    fill_array(&array, items);
    array
}

/// Throw an instance of `class`, or a plain TypeError message without one
pub(crate) fn throw_instance(class: Option<&ObjectRef>, message: &str) -> Throw {
    match class {
        Some(class) => match construct(&Value::from(class.clone()), vec![Value::from(message)], None) {
            Ok(error) => Throw(error),
            Err(thrown) => thrown,
        },
        None => Throw::type_error(message.to_string()),
    }
}

fn json_to_value(
    json: &serde_json::Value,
    object_prototype: &ObjectRef,
    array_class: Option<&ObjectRef>,
) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::from(*b),
        serde_json::Value::Number(n) => Value::from(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => {
            let items = items
                .iter()
                .map(|item| json_to_value(item, object_prototype, array_class))
                .collect();
            let array = match array_class {
                Some(class) => make_array(class, items),
                None => {
                    let array = ObjectRef::with_class(Some(object_prototype.clone()), "Array");
                    fill_array(&array, items);
                    array
                }
            };
            Value::from(array)
        }
        serde_json::Value::Object(map) => {
            let object = ObjectRef::new_ordinary(Some(object_prototype.clone()));
            for (key, item) in map {
                object.put(key, json_to_value(item, object_prototype, array_class));
            }
            Value::from(object)
        }
    }
}

fn fill_array(array: &ObjectRef, items: Vec<Value>) {
    let length = items.len();
    for (index, item) in items.into_iter().enumerate() {
        array.put(&index.to_string(), item);
    }
    array.put_hidden("length", length as f64);
}

/// Serialize a value the way `JSON.stringify` does, reading data properties only
pub(crate) fn to_json(value: &Value, depth: usize) -> Option<serde_json::Value> {
    const MAX_DEPTH: usize = 64;
    match value {
        Value::Undefined => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
            Some(serde_json::Value::from(*n as i64))
        }
        Value::Number(n) => Some(
            serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        Value::Str(s) => Some(serde_json::Value::String(s.to_string())),
        Value::Object(_) if depth >= MAX_DEPTH => Some(serde_json::Value::Null),
        Value::Object(object) if object.is_callable() => None,
        Value::Object(object) if object.class_name().as_deref() == Some("Array") => {
            Some(serde_json::Value::Array(
                array_like_items(object)
                    .iter()
                    .map(|item| to_json(item, depth + 1).unwrap_or(serde_json::Value::Null))
                    .collect(),
            ))
        }
        Value::Object(object) => {
            let mut map = serde_json::Map::new();
            for key in object.own_keys() {
                let Some(name) = key.as_str() else { continue };
                let Some(descriptor) = object.get_own_property(&key) else { continue };
                if !descriptor.is_enumerable() {
                    continue;
                }
                let item = descriptor.value().cloned().unwrap_or_default();
                if let Some(json) = to_json(&item, depth + 1) {
                    map.insert(name.to_string(), json);
                }
            }
            Some(serde_json::Value::Object(map))
        }
    }
}

fn parse_int(text: &str, radix: u32) -> f64 {
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    let magnitude = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

fn parse_float(text: &str) -> f64 {
    let trimmed = text.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (index, c) in trimmed.char_indices() {
        match c {
            '+' | '-' if index == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = index + c.len_utf8();
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed[..end].parse().unwrap_or(f64::NAN)
}

fn percent_encode(text: &str, keep: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() || keep.contains(c) {
            out.push(c);
        } else {
            let mut buffer = [0u8; 4];
            for byte in c.encode_utf8(&mut buffer).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

fn percent_decode(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hex = text.get(index + 1..index + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            out.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(out).ok()
}
