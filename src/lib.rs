//! Interpose - call interception and tracing for a dynamic object model
//!
//! Host objects (bindings, modules and globals) are replaced by transparent
//! proxies that report every call as a pair of enter/leave events. Values
//! flowing through traced calls (callbacks passed in, objects handed back)
//! are hooked on the fly, and object properties are rewritten lazily so that
//! nothing is touched until it is actually read.
//!
//! ```
//! use interpose::value::{call, PropertyKey};
//! use interpose::{EventType, Realm, TraceOptions, Tracer, Value};
//!
//! let realm = Realm::new();
//! let tracer = Tracer::new(TraceOptions::default(), &realm);
//! let object = realm.new_object();
//! object.put("twice", realm.new_function("twice", |inv| Ok(Value::from(inv.arg(0).to_number() * 2.0))));
//!
//! tracer.events().on(EventType::Enter, |event| assert_eq!(event.name, "obj.twice"));
//! let hooked = tracer.hook("obj", &Value::from(object)).unwrap();
//! let twice = hooked.get(&PropertyKey::from("twice")).unwrap();
//! assert_eq!(call(&twice, hooked, vec![Value::from(21)]).unwrap(), Value::from(42));
//! ```

pub mod classify;
pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod environment;
pub mod error;
pub mod event;
pub mod filter;
pub mod formatting;
pub mod json_output;
mod lazy;
pub mod metadata;
pub mod output;
pub mod realm;
pub mod script;
pub mod stats;
pub mod value;
mod wrapper;

pub use config::{TraceConfig, TraceFlags, TraceOptions};
pub use context::{CallContext, TraceKind};
pub use engine::Tracer;
pub use environment::{EnvironmentEnumerator, SandboxEnvironment};
pub use error::TraceError;
pub use event::{CallEvent, EventType, Events};
pub use realm::Realm;
pub use value::{ObjectRef, Throw, Value};
