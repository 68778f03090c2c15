//! Hook admission filters and the selector language for `-e` / `-p`
//!
//! A filter sees every candidate the engine is about to hook and may only
//! narrow interception. Selectors compile dotted paths into anchored regexes:
//! - `/re/`: raw regular expression
//! - `a.b.c`: matches `a`, `a.b` and `a.b.c` (every prefix of the path)
//! - `a[b]`: same as `a.b`
//! - `*`: exactly one path component, `**`: any remainder
//! - an optional leading `@` (binding names) is always accepted

use crate::error::TraceError;
use crate::event::Frame;
use crate::value::{ObjectRef, Throw, Value};
use regex::Regex;
use std::rc::Rc;

/// What is being considered for hooking
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// A value about to be wrapped
    Value(&'a Value),
    /// An own property about to be rewritten into an accessor pair
    Property {
        property: &'a str,
        object: &'a ObjectRef,
    },
}

/// Filter input
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub name: &'a str,
    pub subject: Subject<'a>,
    /// Innermost open traced calls, when call-site gathering is on
    pub stack: Option<&'a [Frame]>,
}

/// Admission predicate; a thrown error propagates out of the hook attempt
pub type FilterFn = Rc<dyn Fn(&Candidate<'_>) -> Result<bool, Throw>>;

/// Filter admitting everything
pub fn admit_all() -> FilterFn {
    Rc::new(|_| Ok(true))
}

/// A compiled selector expression
#[derive(Debug, Clone)]
pub struct Selector {
    expr: String,
    regex: Regex,
}

impl Selector {
    pub fn parse(expr: &str) -> Result<Self, TraceError> {
        let pattern = Self::to_pattern(expr);
        let regex = Regex::new(&pattern).map_err(|source| TraceError::Selector {
            expr: expr.to_string(),
            source,
        })?;
        Ok(Self {
            expr: expr.to_string(),
            regex,
        })
    }

    /// Translate a selector expression into regex source
    pub fn to_pattern(expr: &str) -> String {
        if let Some(raw) = expr
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
            .filter(|raw| !raw.is_empty())
        {
            return raw.to_string();
        }

        let dotted = expr.replace('[', ".").replace(']', "");
        let components: Vec<String> = dotted
            .split('.')
            .map(|component| match component {
                "*" => "(?:[^.]*)".to_string(),
                "**" => "(?:.*)".to_string(),
                other => other
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join("[^.]*"),
            })
            .collect();

        let nested = components.join("(?:|\\.");
        format!("^@?{nested}{}$", ")".repeat(components.len() - 1))
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }
}

/// Any-of set of selectors; an empty set matches everything
#[derive(Debug, Clone, Default)]
pub struct SelectorSet {
    selectors: Vec<Selector>,
}

impl SelectorSet {
    pub fn parse<S: AsRef<str>>(exprs: &[S]) -> Result<Self, TraceError> {
        let selectors = exprs
            .iter()
            .map(|expr| Selector::parse(expr.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn matches(&self, name: &str) -> bool {
        self.selectors.is_empty() || self.selectors.iter().any(|s| s.matches(name))
    }

    /// Admission filter testing candidate names against the set
    pub fn into_filter(self) -> FilterFn {
        if self.is_empty() {
            return admit_all();
        }
        Rc::new(move |candidate| Ok(self.matches(candidate.name)))
    }
}
