//! Root enumeration and the sandbox the CLI traces
//!
//! The engine only needs [`EnvironmentEnumerator`]: three lists of named
//! roots plus the values that must never be hooked. [`SandboxEnvironment`]
//! implements it over a [`Realm`], populating the global object with a small
//! host surface: `console`, `process`, `require`, four library modules and
//! four internal bindings reachable through `process.binding`.

use crate::engine::{Tracer, WeakTracer};
use crate::error::TraceError;
use crate::formatting::{format_message, inspect};
use crate::realm::{make_array, throw_instance, BuiltinKind, Realm};
use crate::value::{
    array_like_items, call, construct, number_to_string, unwrap_proxy_deep, Completion, Invocation, NativeFunction,
    ObjectRef, PropertyDescriptor, PropertyKey, SymbolId, Throw, Value, MAX_DENSE_ITEMS,
};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// A named root and its resolved value
pub type RootEntry = (String, Result<Value, TraceError>);

/// Output sink shared between natives
pub type SharedWriter = Rc<RefCell<dyn Write>>;

/// Supplies the roots hooked at setup
pub trait EnvironmentEnumerator {
    /// Internal bindings, reported without the `@` prefix
    fn bindings(&self) -> Vec<RootEntry>;

    fn modules(&self) -> Vec<RootEntry>;

    fn globals(&self) -> Vec<RootEntry>;

    /// Values the engine must leave untouched
    fn never_hook(&self) -> Vec<Value> {
        Vec::new()
    }
}

const BINDINGS: &[&str] = &["constants", "buffer", "uv", "inspector"];
const UNAVAILABLE_BINDINGS: &[&str] = &["inspector"];

/// Error classes natives throw
#[derive(Clone)]
struct Errors {
    error: ObjectRef,
    type_error: ObjectRef,
    range_error: ObjectRef,
}

impl Errors {
    fn new(realm: &Realm) -> Self {
        Self {
            error: realm.intrinsic(BuiltinKind::Error).clone(),
            type_error: realm.intrinsic(BuiltinKind::TypeError).clone(),
            range_error: realm.intrinsic(BuiltinKind::RangeError).clone(),
        }
    }

    fn error(&self, message: &str) -> Throw {
        throw_instance(Some(&self.error), message)
    }

    fn type_error(&self, message: &str) -> Throw {
        throw_instance(Some(&self.type_error), message)
    }

    fn range_error(&self, message: &str) -> Throw {
        throw_instance(Some(&self.range_error), message)
    }

    fn string_arg(&self, inv: &Invocation, index: usize, what: &str) -> Result<String, Throw> {
        match inv.arg(index) {
            Value::Str(s) => Ok(s.to_string()),
            other => Err(self.type_error(&format!(
                "The \"{what}\" argument must be of type string. Received {}",
                other.type_name()
            ))),
        }
    }
}

/// Host surface over a realm
pub struct SandboxEnvironment {
    realm: Realm,
    bindings: Vec<(&'static str, ObjectRef)>,
    modules: Vec<(&'static str, ObjectRef)>,
    process: ObjectRef,
    fatal_exception: ObjectRef,
    tracer: Rc<RefCell<WeakTracer>>,
}

impl SandboxEnvironment {
    /// Build the host surface and install it on the realm's global object
    pub fn new(realm: &Realm, stdout: SharedWriter, stderr: SharedWriter, argv: Vec<String>) -> Self {
        let errors = Errors::new(realm);
        let tracer = Rc::new(RefCell::new(WeakTracer::default()));

        let bindings = vec![
            ("constants", constants_binding(realm)),
            ("buffer", buffer_binding(realm, &errors)),
            ("uv", uv_binding(realm)),
        ];

        let emitter_class = event_emitter_class(realm, &errors);
        let modules = vec![
            ("path", path_module(realm, &errors)),
            ("events", emitter_class.clone()),
            ("util", util_module(realm)),
            ("assert", assert_module(realm)),
        ];

        let console = console_object(realm, &errors, &tracer, stdout, stderr);
        let require = require_function(realm, &errors, modules.clone());
        let (process, fatal_exception) =
            process_object(realm, &errors, &emitter_class, bindings.clone(), argv);

        let global = realm.global();
        global.put_hidden("console", console);
        global.put_hidden("process", process.clone());
        global.put_hidden("require", require);

        Self {
            realm: realm.clone(),
            bindings,
            modules,
            process,
            fatal_exception,
            tracer,
        }
    }

    /// Route console writes through the untraced scope of `tracer`
    pub fn attach(&self, tracer: &Tracer) {
        *self.tracer.borrow_mut() = tracer.downgrade();
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// The module `require(name)` would return
    pub fn require(&self, name: &str) -> Option<Value> {
        self.modules
            .iter()
            .find(|(module, _)| *module == name)
            .map(|(_, object)| Value::from(object.clone()))
    }

    /// The binding `process.binding(name)` would return
    pub fn binding(&self, name: &str) -> Option<Value> {
        self.bindings
            .iter()
            .find(|(binding, _)| *binding == name)
            .map(|(_, object)| Value::from(object.clone()))
    }

    /// Offer an uncaught exception to `process` listeners
    ///
    /// Returns whether an `uncaughtException` listener handled it.
    pub fn fatal_exception(&self, thrown: &Throw) -> Result<bool, Throw> {
        let handled = call(
            &Value::from(self.fatal_exception.clone()),
            Value::from(self.process.clone()),
            vec![thrown.value().clone()],
        )?;
        Ok(handled.is_truthy())
    }
}

impl EnvironmentEnumerator for SandboxEnvironment {
    fn bindings(&self) -> Vec<RootEntry> {
        BINDINGS
            .iter()
            .map(|&name| {
                let resolved = self.binding(name).ok_or_else(|| TraceError::Enumeration {
                    name: name.to_string(),
                    reason: "binding is not available in this sandbox".to_string(),
                });
                (name.to_string(), resolved)
            })
            .collect()
    }

    fn modules(&self) -> Vec<RootEntry> {
        self.modules
            .iter()
            .map(|(name, object)| (name.to_string(), Ok(Value::from(object.clone()))))
            .collect()
    }

    fn globals(&self) -> Vec<RootEntry> {
        let global = self.realm.global();
        let receiver = Value::from(global.clone());
        global
            .own_keys()
            .into_iter()
            .filter_map(|key| {
                let name = key.as_str()?.to_string();
                let resolved = global.get(&key, &receiver).map_err(|thrown| TraceError::Enumeration {
                    name: name.clone(),
                    reason: thrown.to_string(),
                });
                Some((name, resolved))
            })
            .collect()
    }

    fn never_hook(&self) -> Vec<Value> {
        vec![Value::from(self.fatal_exception.clone())]
    }
}

fn method(realm: &Realm, target: &ObjectRef, name: &str, behavior: impl Fn(&Invocation) -> Completion + 'static) {
    target.put(name, realm.new_function(name, behavior));
}

fn constants_binding(realm: &Realm) -> ObjectRef {
    let errno = realm.new_object();
    for (name, code) in [("E2BIG", 7), ("EACCES", 13), ("EEXIST", 17), ("EINVAL", 22), ("ENOENT", 2), ("EPIPE", 32)] {
        errno.put(name, code);
    }
    errno.freeze();
    let signals = realm.new_object();
    for (name, code) in [("SIGHUP", 1), ("SIGINT", 2), ("SIGKILL", 9), ("SIGTERM", 15)] {
        signals.put(name, code);
    }
    let constants = realm.new_object();
    constants.put("errno", errno);
    constants.put("signals", signals);
    constants
}

fn buffer_binding(realm: &Realm, errors: &Errors) -> ObjectRef {
    let binding = realm.new_object();
    method(realm, &binding, "byteLengthUtf8", |inv| {
        Ok(Value::from(inv.arg(0).to_display_string().len() as f64))
    });
    method(realm, &binding, "compare", |inv| {
        let ordering = inv.arg(0).to_display_string().cmp(&inv.arg(1).to_display_string());
        Ok(Value::from(ordering as i32))
    });

    // Only valid with the binding itself as receiver
    let owner = binding.downgrade();
    let array_class = realm.intrinsic(BuiltinKind::Array).clone();
    let errors = errors.clone();
    let zero_fill = NativeFunction::new("zeroFill", move |inv| {
        let is_owner = match (owner.upgrade(), inv.this.as_object()) {
            (Some(owner), Some(this)) => owner.ptr_eq(this),
            _ => false,
        };
        if !is_owner {
            return Err(errors.type_error("Illegal invocation"));
        }
        let length = inv.arg(0).to_number();
        let length = if length.is_finite() && length > 0.0 { length as usize } else { 0 };
        if length > MAX_DENSE_ITEMS {
            return Err(errors.range_error("Invalid array length"));
        }
        Ok(Value::from(make_array(&array_class, vec![Value::from(0); length])))
    })
    .checking_receiver();
    binding.put("zeroFill", realm.function_object(zero_fill));
    binding
}

fn uv_binding(realm: &Realm) -> ObjectRef {
    let binding = realm.new_object();
    method(realm, &binding, "errname", |inv| {
        let code = inv.arg(0).to_number();
        let name = match code as i64 {
            -2 => "ENOENT".to_string(),
            -13 => "EACCES".to_string(),
            -17 => "EEXIST".to_string(),
            -22 => "EINVAL".to_string(),
            -32 => "EPIPE".to_string(),
            -110 => "ETIMEDOUT".to_string(),
            _ => format!("Unknown system error {}", number_to_string(code)),
        };
        Ok(Value::from(name))
    });
    binding
}

fn path_module(realm: &Realm, errors: &Errors) -> ObjectRef {
    let path = realm.new_object();
    path.put("sep", "/");

    let e = errors.clone();
    method(realm, &path, "join", move |inv| {
        let parts = (0..inv.args.len())
            .map(|i| e.string_arg(inv, i, "path"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::from(join(&parts)))
    });
    let e = errors.clone();
    method(realm, &path, "normalize", move |inv| Ok(Value::from(normalize(&e.string_arg(inv, 0, "path")?))));
    let e = errors.clone();
    method(realm, &path, "basename", move |inv| {
        let ext = match inv.arg(1) {
            Value::Undefined => None,
            _ => Some(e.string_arg(inv, 1, "ext")?),
        };
        Ok(Value::from(basename(&e.string_arg(inv, 0, "path")?, ext.as_deref())))
    });
    let e = errors.clone();
    method(realm, &path, "dirname", move |inv| Ok(Value::from(dirname(&e.string_arg(inv, 0, "path")?))));
    let e = errors.clone();
    method(realm, &path, "extname", move |inv| Ok(Value::from(extname(&e.string_arg(inv, 0, "path")?))));
    let e = errors.clone();
    method(realm, &path, "isAbsolute", move |inv| {
        Ok(Value::from(e.string_arg(inv, 0, "path")?.starts_with('/')))
    });
    path
}

/// POSIX path normalization: collapse `.`, `..` and repeated separators
pub(crate) fn normalize(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let absolute = path.starts_with('/');
    let trailing = path.ends_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            segment => parts.push(segment),
        }
    }
    let mut joined = parts.join("/");
    if trailing && !joined.is_empty() {
        joined.push('/');
    }
    match (absolute, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

pub(crate) fn join(parts: &[String]) -> String {
    let parts: Vec<&str> = parts.iter().map(String::as_str).filter(|p| !p.is_empty()).collect();
    if parts.is_empty() {
        return ".".to_string();
    }
    normalize(&parts.join("/"))
}

pub(crate) fn basename(path: &str, ext: Option<&str>) -> String {
    let trimmed = path.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or_default();
    match ext {
        Some(ext) if base != ext && base.ends_with(ext) => base[..base.len() - ext.len()].to_string(),
        _ => base.to_string(),
    }
}

pub(crate) fn dirname(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        None => ".".to_string(),
        Some(0) => "/".to_string(),
        Some(index) => {
            let parent = trimmed[..index].trim_end_matches('/');
            if parent.is_empty() { "/".to_string() } else { parent.to_string() }
        }
    }
}

pub(crate) fn extname(path: &str) -> String {
    let base = basename(path, None);
    match base.rfind('.') {
        Some(index) if index > 0 => base[index..].to_string(),
        _ => String::new(),
    }
}

fn event_emitter_class(realm: &Realm, errors: &Errors) -> ObjectRef {
    let class = realm.new_class("EventEmitter", None, |inv| {
        if inv.is_construct() {
            Ok(Value::Undefined)
        } else {
            Err(Throw::type_error("Class constructor EventEmitter cannot be invoked without 'new'"))
        }
    });
    class.put("EventEmitter", class.clone());
    let Some(prototype) = Realm::prototype_of_class(&class) else {
        return class;
    };

    let listeners = Rc::new(Listeners {
        key: PropertyKey::Symbol(SymbolId::fresh()),
        array_class: realm.intrinsic(BuiltinKind::Array).clone(),
    });

    let table = Rc::clone(&listeners);
    let on = realm.new_function("on", move |inv| {
        let listener = inv.arg(1);
        if !listener.is_callable() {
            return Err(Throw::type_error("The \"listener\" argument must be of type function"));
        }
        let target = receiver(inv)?;
        let event = inv.arg(0).to_display_string();
        let mut current = table.get(&target, &event);
        current.push(listener);
        table.set(&target, &event, current);
        Ok(inv.this.clone())
    });
    prototype.put_hidden("on", on.clone());
    prototype.put_hidden("addListener", on);

    let table = Rc::clone(&listeners);
    let errors = errors.clone();
    prototype.put_hidden(
        "emit",
        realm.new_function("emit", move |inv| {
            let target = receiver(inv)?;
            let event = inv.arg(0).to_display_string();
            let args: Vec<Value> = inv.args.iter().skip(1).cloned().collect();
            let current = table.get(&target, &event);
            if current.is_empty() && event == "error" {
                return Err(match inv.arg(1) {
                    Value::Undefined => errors.error("Unhandled error."),
                    thrown => Throw(thrown),
                });
            }
            for listener in &current {
                call(listener, inv.this.clone(), args.clone())?;
            }
            Ok(Value::from(!current.is_empty()))
        }),
    );

    let table = Rc::clone(&listeners);
    prototype.put_hidden(
        "listenerCount",
        realm.new_function("listenerCount", move |inv| {
            let target = receiver(inv)?;
            Ok(Value::from(table.get(&target, &inv.arg(0).to_display_string()).len() as f64))
        }),
    );

    let table = listeners;
    prototype.put_hidden(
        "removeAllListeners",
        realm.new_function("removeAllListeners", move |inv| {
            let target = receiver(inv)?;
            match inv.arg(0) {
                Value::Undefined => {
                    target.delete(&table.key);
                }
                event => table.set(&target, &event.to_display_string(), Vec::new()),
            }
            Ok(inv.this.clone())
        }),
    );
    class
}

/// The raw emitter behind `this`
fn receiver(inv: &Invocation) -> Result<ObjectRef, Throw> {
    match unwrap_proxy_deep(&inv.this) {
        Value::Object(object) => Ok(object),
        _ => Err(Throw::type_error("EventEmitter method called on non-object")),
    }
}

/// Per-emitter listener lists, kept under a symbol key so property
/// rewriting never touches them
struct Listeners {
    key: PropertyKey,
    array_class: ObjectRef,
}

impl Listeners {
    fn table(&self, target: &ObjectRef) -> Option<ObjectRef> {
        target
            .get_own_property(&self.key)
            .and_then(|descriptor| descriptor.value().cloned())
            .and_then(|value| value.as_object().cloned())
    }

    fn get(&self, target: &ObjectRef, event: &str) -> Vec<Value> {
        self.table(target)
            .and_then(|table| table.get_data(event))
            .and_then(|list| list.as_object().map(array_like_items))
            .unwrap_or_default()
    }

    fn set(&self, target: &ObjectRef, event: &str, listeners: Vec<Value>) {
        let table = self.table(target).unwrap_or_else(|| {
            let table = ObjectRef::new_ordinary(None);
            target.define_own_property(
                self.key.clone(),
                PropertyDescriptor::hidden(Value::from(table.clone())),
            );
            table
        });
        table.put(event, make_array(&self.array_class, listeners));
    }
}

fn util_module(realm: &Realm) -> ObjectRef {
    let util = realm.new_object();
    method(realm, &util, "format", |inv| Ok(Value::from(format_message(&inv.args))));
    method(realm, &util, "inspect", |inv| Ok(Value::from(inspect(&inv.arg(0)))));
    util
}

fn assert_module(realm: &Realm) -> ObjectRef {
    let parent = Realm::prototype_of_class(realm.intrinsic(BuiltinKind::Error));
    let assertion_error = realm.new_class("AssertionError", parent, |inv| {
        let this = inv.this_object()?;
        this.set_class_name("AssertionError");
        this.put_hidden("message", inv.arg(0).to_display_string());
        Ok(Value::Undefined)
    });
    if let Some(prototype) = Realm::prototype_of_class(&assertion_error) {
        prototype.put_hidden("name", "AssertionError");
    }
    let fail = move |message: &Value, default: String| -> Throw {
        let message = match message {
            Value::Undefined => default,
            other => other.to_display_string(),
        };
        throw_instance(Some(&assertion_error), &message)
    };

    let ok_fail = fail.clone();
    let ok = move |inv: &Invocation| {
        if inv.arg(0).is_truthy() {
            Ok(Value::Undefined)
        } else {
            Err(ok_fail(&inv.arg(1), "The expression evaluated to a falsy value".to_string()))
        }
    };
    let assert = realm.new_function("ok", ok.clone());
    method(realm, &assert, "ok", ok);

    let equal_fail = fail.clone();
    method(realm, &assert, "equal", move |inv| {
        let (actual, expected) = (inv.arg(0), inv.arg(1));
        if actual.loose_equals(&expected) {
            Ok(Value::Undefined)
        } else {
            Err(equal_fail(&inv.arg(2), format!("{} == {}", inspect(&actual), inspect(&expected))))
        }
    });
    let strict_fail = fail.clone();
    method(realm, &assert, "strictEqual", move |inv| {
        let (actual, expected) = (inv.arg(0), inv.arg(1));
        if actual.same_value(&expected) {
            Ok(Value::Undefined)
        } else {
            Err(strict_fail(&inv.arg(2), format!("{} !== {}", inspect(&actual), inspect(&expected))))
        }
    });
    method(realm, &assert, "throws", move |inv| match call(&inv.arg(0), Value::Undefined, Vec::new()) {
        Err(_) => Ok(Value::Undefined),
        Ok(_) => Err(fail(&inv.arg(1), "Missing expected exception.".to_string())),
    });
    assert
}

fn console_object(
    realm: &Realm,
    errors: &Errors,
    tracer: &Rc<RefCell<WeakTracer>>,
    stdout: SharedWriter,
    stderr: SharedWriter,
) -> ObjectRef {
    let console = realm.new_object();
    for (name, sink) in [("log", &stdout), ("info", &stdout), ("error", &stderr), ("warn", &stderr)] {
        let sink = Rc::clone(sink);
        let tracer = Rc::clone(tracer);
        let errors = errors.clone();
        method(realm, &console, name, move |inv| {
            let line = format_message(&inv.args);
            let write = || writeln!(sink.borrow_mut(), "{line}");
            let attached = tracer.borrow().upgrade();
            let written = match attached {
                Some(tracer) => tracer.run_untraced(write),
                None => write(),
            };
            written.map_err(|err| errors.error(&format!("console write failed: {err}")))?;
            Ok(Value::Undefined)
        });
    }
    console
}

fn require_function(realm: &Realm, errors: &Errors, modules: Vec<(&'static str, ObjectRef)>) -> ObjectRef {
    let errors = errors.clone();
    realm.new_function("require", move |inv| {
        let name = errors.string_arg(inv, 0, "id")?;
        modules
            .iter()
            .find(|(module, _)| *module == name)
            .map(|(_, object)| Value::from(object.clone()))
            .ok_or_else(|| errors.error(&format!("Cannot find module '{name}'")))
    })
}

fn process_object(
    realm: &Realm,
    errors: &Errors,
    emitter_class: &ObjectRef,
    bindings: Vec<(&'static str, ObjectRef)>,
    argv: Vec<String>,
) -> (ObjectRef, ObjectRef) {
    let process = match construct(&Value::from(emitter_class.clone()), Vec::new(), None) {
        Ok(Value::Object(process)) => process,
        _ => realm.new_object(),
    };
    process.set_class_name("process");

    let argv = argv.into_iter().map(Value::from).collect();
    process.put("argv", realm.new_array(argv));
    let env = realm.new_object();
    for (key, value) in std::env::vars() {
        env.put(&key, value);
    }
    process.put("env", env);
    process.put("platform", std::env::consts::OS);
    process.put("version", concat!("v", env!("CARGO_PKG_VERSION")));
    process.put("EventEmitter", emitter_class.clone());

    let e = errors.clone();
    method(realm, &process, "cwd", move |_| {
        std::env::current_dir()
            .map(|dir| Value::from(dir.display().to_string()))
            .map_err(|err| e.error(&err.to_string()))
    });

    let e = errors.clone();
    method(realm, &process, "binding", move |inv| {
        let name = e.string_arg(inv, 0, "name")?;
        if UNAVAILABLE_BINDINGS.contains(&name.as_str()) {
            return Err(e.error(&format!("Binding {name} is not available")));
        }
        bindings
            .iter()
            .find(|(binding, _)| *binding == name)
            .map(|(_, object)| Value::from(object.clone()))
            .ok_or_else(|| e.error(&format!("No such module: {name}")))
    });

    let emit = Realm::prototype_of_class(emitter_class)
        .and_then(|prototype| prototype.get_data("emit"))
        .unwrap_or_default();
    let fatal_exception = realm.new_function("_fatalException", move |inv| {
        let args = vec![Value::from("uncaughtException"), inv.arg(0)];
        call(&emit, inv.this.clone(), args)
    });
    process.put_hidden("_fatalException", fatal_exception.clone());
    (process, fatal_exception)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sandbox {
        env: SandboxEnvironment,
        stdout: Rc<RefCell<Vec<u8>>>,
    }

    fn sandbox() -> Sandbox {
        let realm = Realm::new();
        let stdout = Rc::new(RefCell::new(Vec::new()));
        let stderr: SharedWriter = Rc::new(RefCell::new(Vec::<u8>::new()));
        let env = SandboxEnvironment::new(&realm, stdout.clone(), stderr, vec!["interpose".to_string()]);
        Sandbox { env, stdout }
    }

    fn invoke(target: &Value, name: &str, args: Vec<Value>) -> Completion {
        let callee = target.get(&PropertyKey::from(name))?;
        call(&callee, target.clone(), args)
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize("/a//b/../c/./d"), "/a/c/d");
        assert_eq!(normalize("a/../../b/"), "../b/");
        assert_eq!(normalize(""), ".");
        assert_eq!(join(&["/usr".to_string(), "lib".to_string(), "../bin".to_string()]), "/usr/bin");
        assert_eq!(join(&[]), ".");
        assert_eq!(basename("/tmp/file.txt", None), "file.txt");
        assert_eq!(basename("/tmp/file.txt", Some(".txt")), "file");
        assert_eq!(basename("/tmp/dir/", None), "dir");
        assert_eq!(dirname("/tmp/file.txt"), "/tmp");
        assert_eq!(dirname("file.txt"), ".");
        assert_eq!(dirname("/file"), "/");
        assert_eq!(extname("archive.tar.gz"), ".gz");
        assert_eq!(extname(".bashrc"), "");
    }

    #[test]
    fn test_roots_are_enumerated() {
        let sandbox = sandbox();
        let modules: Vec<String> = sandbox.env.modules().into_iter().map(|(name, _)| name).collect();
        assert_eq!(modules, vec!["path", "events", "util", "assert"]);

        let globals: Vec<String> = sandbox.env.globals().into_iter().map(|(name, _)| name).collect();
        for expected in ["console", "process", "require", "Math", "globalThis"] {
            assert!(globals.iter().any(|name| name == expected), "missing global {expected}");
        }
    }

    #[test]
    fn test_unavailable_binding_fails_to_resolve() {
        let sandbox = sandbox();
        let bindings = sandbox.env.bindings();
        assert_eq!(bindings.len(), 4);
        let (name, inspector) = &bindings[3];
        assert_eq!(name, "inspector");
        assert!(matches!(inspector, Err(TraceError::Enumeration { .. })));
        assert!(bindings[..3].iter().all(|(_, resolved)| resolved.is_ok()));

        let process = sandbox.env.realm().global().get_str("process").unwrap();
        assert!(invoke(&process, "binding", vec![Value::from("inspector")]).is_err());
        assert!(invoke(&process, "binding", vec![Value::from("buffer")]).is_ok());
    }

    #[test]
    fn test_require() {
        let sandbox = sandbox();
        let require = sandbox.env.realm().global().get_str("require").unwrap();
        let path = call(&require, Value::Undefined, vec![Value::from("path")]).unwrap();
        assert!(path.same_value(&sandbox.env.require("path").unwrap()));
        let joined = invoke(&path, "join", vec![Value::from("a"), Value::from("b")]).unwrap();
        assert_eq!(joined, Value::from("a/b"));

        let missing = call(&require, Value::Undefined, vec![Value::from("fs")]).unwrap_err();
        assert_eq!(missing.to_string(), "Error: Cannot find module 'fs'");
    }

    #[test]
    fn test_console_writes_formatted_lines() {
        let sandbox = sandbox();
        let console = sandbox.env.realm().global().get_str("console").unwrap();
        invoke(&console, "log", vec![Value::from("%s has %d items"), Value::from("list"), Value::from(3)]).unwrap();
        invoke(&console, "log", vec![Value::from(true)]).unwrap();
        let written = String::from_utf8(sandbox.stdout.borrow().clone()).unwrap();
        assert_eq!(written, "list has 3 items\ntrue\n");
    }

    #[test]
    fn test_zero_fill_requires_the_binding_as_receiver() {
        let sandbox = sandbox();
        let buffer = sandbox.env.binding("buffer").unwrap();
        let filled = invoke(&buffer, "zeroFill", vec![Value::from(2)]).unwrap();
        assert_eq!(array_like_items(filled.as_object().unwrap()), vec![Value::from(0), Value::from(0)]);

        let zero_fill = buffer.get(&PropertyKey::from("zeroFill")).unwrap();
        let thrown = call(&zero_fill, Value::Undefined, vec![Value::from(1)]).unwrap_err();
        assert_eq!(thrown.to_string(), "TypeError: Illegal invocation");

        let thrown = invoke(&buffer, "zeroFill", vec![Value::from(1e15)]).unwrap_err();
        assert_eq!(thrown.to_string(), "RangeError: Invalid array length");
    }

    #[test]
    fn test_event_emitter() {
        let sandbox = sandbox();
        let class = sandbox.env.require("events").unwrap();
        assert!(class.get(&PropertyKey::from("EventEmitter")).unwrap().same_value(&class));

        let emitter = construct(&class, vec![], None).unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let record = Rc::clone(&seen);
        let listener = sandbox.env.realm().new_function("listener", move |inv| {
            record.borrow_mut().push(inv.arg(0));
            Ok(Value::Undefined)
        });
        invoke(&emitter, "on", vec![Value::from("data"), Value::from(listener)]).unwrap();
        assert_eq!(invoke(&emitter, "listenerCount", vec![Value::from("data")]).unwrap(), Value::from(1));
        assert_eq!(invoke(&emitter, "emit", vec![Value::from("data"), Value::from(7)]).unwrap(), Value::from(true));
        assert_eq!(invoke(&emitter, "emit", vec![Value::from("other")]).unwrap(), Value::from(false));
        assert_eq!(*seen.borrow(), vec![Value::from(7)]);

        invoke(&emitter, "removeAllListeners", vec![]).unwrap();
        assert_eq!(invoke(&emitter, "listenerCount", vec![Value::from("data")]).unwrap(), Value::from(0));
        assert!(invoke(&emitter, "emit", vec![Value::from("error")]).is_err());
    }

    #[test]
    fn test_assert_throws_assertion_errors() {
        let sandbox = sandbox();
        let assert = sandbox.env.require("assert").unwrap();
        assert!(call(&assert, Value::Undefined, vec![Value::from(1)]).is_ok());
        assert!(invoke(&assert, "equal", vec![Value::from("1"), Value::from(1)]).is_ok());
        let thrown = invoke(&assert, "strictEqual", vec![Value::from("1"), Value::from(1)]).unwrap_err();
        assert_eq!(thrown.to_string(), "AssertionError: '1' !== 1");
        let thrown = invoke(&assert, "ok", vec![Value::from(0), Value::from("nope")]).unwrap_err();
        assert_eq!(thrown.to_string(), "AssertionError: nope");
    }

    #[test]
    fn test_util_format() {
        let sandbox = sandbox();
        let util = sandbox.env.require("util").unwrap();
        let formatted = invoke(&util, "format", vec![Value::from("%d%%"), Value::from(50)]).unwrap();
        assert_eq!(formatted, Value::from("50%"));
    }

    #[test]
    fn test_fatal_exception_reaches_listeners() {
        let sandbox = sandbox();
        let thrown = Throw(Value::from("boom"));
        assert!(!sandbox.env.fatal_exception(&thrown).unwrap());

        let process = sandbox.env.realm().global().get_str("process").unwrap();
        let handler = sandbox.env.realm().new_function("handler", |_| Ok(Value::Undefined));
        invoke(&process, "on", vec![Value::from("uncaughtException"), Value::from(handler)]).unwrap();
        assert!(sandbox.env.fatal_exception(&thrown).unwrap());
        assert_eq!(sandbox.env.never_hook().len(), 1);
    }
}
