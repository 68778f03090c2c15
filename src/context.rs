//! Call contexts: where a hooked value came from
//!
//! A context is a small record copied and extended for every value derived
//! from a hooked one (arguments, return values), forming a parent chain back
//! to the root it was discovered under.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;

/// Origin category of a hooked value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// Lowest-level primitive namespaces
    Binding,
    /// Library modules
    Module,
    /// Global namespace
    Global,
    /// Values passed as arguments into a traced call
    Passed,
    /// Values returned from a traced call
    Ret,
    /// Ad-hoc hooks requested through the API
    Custom,
}

impl TraceKind {
    pub const ALL: [TraceKind; 6] = [
        Self::Binding,
        Self::Module,
        Self::Global,
        Self::Passed,
        Self::Ret,
        Self::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binding => "binding",
            Self::Module => "module",
            Self::Global => "global",
            Self::Passed => "passed",
            Self::Ret => "ret",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for TraceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub kind: TraceKind,
    /// Root name this value was discovered under
    pub origin: Option<String>,
    /// The value already existed when it was discovered (a namespace root)
    pub existing_object: bool,
    pub parent: Option<Rc<CallContext>>,
    /// `call_id` of the call whose return produced this value
    pub produced_by: Option<u64>,
}

impl CallContext {
    pub fn new(kind: TraceKind) -> Self {
        Self {
            kind,
            origin: None,
            existing_object: false,
            parent: None,
            produced_by: None,
        }
    }

    /// Context for a root discovered during environment setup
    pub fn root(kind: TraceKind, origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            existing_object: true,
            ..Self::new(kind)
        }
    }

    /// Context for an ad-hoc hook: wrapped, never rewritten in place
    pub fn custom() -> Self {
        Self::new(TraceKind::Custom)
    }

    /// Child context for a value derived from one hooked under `self`
    pub fn derive(self: &Rc<Self>, kind: TraceKind) -> Self {
        Self {
            kind,
            origin: self.origin.clone(),
            existing_object: false,
            parent: Some(Rc::clone(self)),
            produced_by: None,
        }
    }

    pub fn produced_by(mut self, call_id: u64) -> Self {
        self.produced_by = Some(call_id);
        self
    }

    /// Whether this context, or any ancestor, is rooted in a binding
    pub fn is_binding_origin(&self) -> bool {
        let mut current = Some(self);
        while let Some(context) = current {
            if context.kind == TraceKind::Binding {
                return true;
            }
            current = context.parent.as_deref();
        }
        false
    }

    /// Kind of the root this context descends from
    pub fn root_kind(&self) -> TraceKind {
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            current = parent;
        }
        current.kind
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::custom()
    }
}
