//! Tracer configuration
//!
//! Options come from built-in defaults, an optional `interpose.toml`, and
//! finally command-line flags, each layer overriding the previous one.
//!
//! # Example interpose.toml
//!
//! ```toml
//! hook = ["path.**", "util.format"]
//! print = ["path.join"]
//! call_sites = 8
//! provide_global = true
//!
//! [trace]
//! binding = true
//! passed = false
//! ```

use crate::context::TraceKind;
use crate::error::TraceError;
use crate::filter::{FilterFn, SelectorSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// Names never admitted by the default filter
const DEFAULT_REJECTED: &[&str] = &["process.EventEmitter"];

/// Which root categories and derived values are traced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceFlags {
    pub binding: bool,
    pub module: bool,
    pub global: bool,
    pub passed: bool,
    pub ret: bool,
}

impl Default for TraceFlags {
    fn default() -> Self {
        Self {
            binding: false,
            module: true,
            global: true,
            passed: true,
            ret: true,
        }
    }
}

impl TraceFlags {
    pub fn enabled(&self, kind: TraceKind) -> bool {
        match kind {
            TraceKind::Binding => self.binding,
            TraceKind::Module => self.module,
            TraceKind::Global => self.global,
            TraceKind::Passed => self.passed,
            TraceKind::Ret => self.ret,
            TraceKind::Custom => true,
        }
    }
}

/// On-disk configuration (`interpose.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub trace: TraceFlags,
    /// Selectors limiting what gets hooked
    pub hook: Vec<String>,
    /// Selectors limiting what gets printed
    pub print: Vec<String>,
    /// Number of call-site frames attached to events
    pub call_sites: Option<usize>,
    /// Install the engine handle as `__interpose__`
    pub provide_global: bool,
}

impl TraceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        Self::from_toml_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TraceError> {
        Ok(toml::from_str(content)?)
    }

    /// Compile the hook selectors into engine options
    pub fn into_options(self) -> Result<TraceOptions, TraceError> {
        let selectors = SelectorSet::parse(&self.hook)?;
        Ok(TraceOptions {
            trace: self.trace,
            gather_call_sites: self.call_sites,
            provide_global: self.provide_global,
            filter: if selectors.is_empty() {
                default_filter()
            } else {
                selectors.into_filter()
            },
        })
    }
}

/// Options the engine runs with
#[derive(Clone)]
pub struct TraceOptions {
    pub trace: TraceFlags,
    pub gather_call_sites: Option<usize>,
    pub provide_global: bool,
    pub filter: FilterFn,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            trace: TraceFlags::default(),
            gather_call_sites: None,
            provide_global: false,
            filter: default_filter(),
        }
    }
}

impl TraceOptions {
    pub fn with_filter(mut self, filter: FilterFn) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_trace(mut self, trace: TraceFlags) -> Self {
        self.trace = trace;
        self
    }
}

impl std::fmt::Debug for TraceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceOptions")
            .field("trace", &self.trace)
            .field("gather_call_sites", &self.gather_call_sites)
            .field("provide_global", &self.provide_global)
            .finish_non_exhaustive()
    }
}

/// Admit everything except a few names that only produce noise
pub fn default_filter() -> FilterFn {
    Rc::new(|candidate| Ok(!DEFAULT_REJECTED.contains(&candidate.name)))
}
