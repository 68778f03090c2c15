//! JSON output format for call traces
//!
//! `--format json`: calls are listed in enter order and completed when they
//! leave, then the whole document is written once the script finishes.

use crate::event::{CallEvent, EventType, Events, Frame};
use crate::filter::SelectorSet;
use crate::formatting::format_value;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A single traced call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonCall {
    pub call_id: u64,
    /// Dotted callee name (e.g., "path.join")
    pub name: String,
    /// Context kind the callee was reached through
    pub context: String,
    pub depth: u32,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub construct: bool,
    /// Arguments as formatted strings
    pub args: Vec<String>,
    /// Formatted return value; absent while the call is open or when it threw
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    /// Open calls at entry (if --call-sites enabled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<JsonFrame>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFrame {
    pub call_id: u64,
    pub name: String,
}

impl From<&Frame> for JsonFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            call_id: frame.call_id,
            name: frame.name.clone(),
        }
    }
}

/// Summary statistics for the trace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonSummary {
    pub total_calls: u64,
    pub exceptions: u64,
    pub max_depth: u32,
    /// Exit code of the traced script
    pub exit_code: i32,
}

/// Root JSON output structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOutput {
    /// Format version identifier
    pub version: String,
    /// Format name
    pub format: String,
    pub calls: Vec<JsonCall>,
    pub summary: JsonSummary,
    #[serde(skip)]
    open: HashMap<u64, usize>,
}

impl JsonOutput {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            format: "interpose-json-v1".to_string(),
            calls: Vec::new(),
            summary: JsonSummary::default(),
            open: HashMap::new(),
        }
    }

    /// Record a call at entry
    pub fn add_call(&mut self, event: &CallEvent) {
        self.summary.total_calls += 1;
        self.summary.max_depth = self.summary.max_depth.max(event.depth);
        self.open.insert(event.call_id, self.calls.len());
        self.calls.push(JsonCall {
            call_id: event.call_id,
            name: event.name.clone(),
            context: event.context.kind.to_string(),
            depth: event.depth,
            construct: event.is_construct_call,
            args: event.arguments.iter().map(format_value).collect(),
            result: None,
            exception: None,
            stack: event
                .stack
                .as_ref()
                .map(|frames| frames.iter().map(JsonFrame::from).collect()),
        });
    }

    /// Fill in the outcome of a call recorded by [`Self::add_call`]
    pub fn complete_call(&mut self, event: &CallEvent) {
        let Some(index) = self.open.remove(&event.call_id) else {
            return;
        };
        let call = &mut self.calls[index];
        match &event.exception {
            Some(exception) => {
                call.exception = Some(format_value(exception));
                self.summary.exceptions += 1;
            }
            None => call.result = Some(format_value(&event.ret.clone().unwrap_or_default())),
        }
    }

    pub fn set_exit_code(&mut self, code: i32) {
        self.summary.exit_code = code;
    }

    /// Record every printed call of `events` into a shared document
    pub fn subscribe(self, events: &Events, print: SelectorSet) -> Rc<RefCell<Self>> {
        let output = Rc::new(RefCell::new(self));
        let print = Rc::new(print);
        let (enter, enter_print) = (Rc::clone(&output), Rc::clone(&print));
        let leave = Rc::clone(&output);
        events
            .on(EventType::Enter, move |event| {
                if enter_print.matches(&event.name) {
                    enter.borrow_mut().add_call(event);
                }
            })
            .on(EventType::Leave, move |event| leave.borrow_mut().complete_call(event));
        output
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for JsonOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CallContext, TraceKind};
    use crate::value::Value;

    fn event(call_id: u64, name: &str, depth: u32) -> CallEvent {
        CallEvent {
            call_id,
            is_construct_call: false,
            name: name.to_string(),
            local_name: name.to_string(),
            this_arg: None,
            arguments: vec![Value::from("a")],
            depth,
            context: Rc::new(CallContext::root(TraceKind::Global, name)),
            stack: None,
            ret: None,
            exception: None,
        }
    }

    #[test]
    fn test_json_output_creation() {
        let output = JsonOutput::new();
        assert_eq!(output.format, "interpose-json-v1");
        assert_eq!(output.calls.len(), 0);
        assert_eq!(output.summary.total_calls, 0);
    }

    #[test]
    fn test_calls_keep_enter_order() {
        let mut output = JsonOutput::new();
        let mut outer = event(1, "outer", 0);
        let mut inner = event(2, "inner", 1);
        output.add_call(&outer);
        output.add_call(&inner);
        inner.exception = Some(Value::from("bad"));
        output.complete_call(&inner);
        outer.ret = Some(Value::from(1));
        output.complete_call(&outer);

        let names: Vec<&str> = output.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner"]);
        assert_eq!(output.calls[0].result.as_deref(), Some("1"));
        assert_eq!(output.calls[1].exception.as_deref(), Some("'bad'"));
        assert_eq!(output.summary.total_calls, 2);
        assert_eq!(output.summary.exceptions, 1);
        assert_eq!(output.summary.max_depth, 1);
    }

    #[test]
    fn test_json_serialization() {
        let mut output = JsonOutput::new();
        let mut call = event(1, "path.join", 0);
        call.stack = Some(vec![Frame {
            call_id: 1,
            name: "path.join".to_string(),
        }]);
        output.add_call(&call);
        call.ret = Some(Value::from("a"));
        output.complete_call(&call);
        output.set_exit_code(0);

        let json = output.to_json().unwrap();
        assert!(json.contains("\"name\": \"path.join\""));
        assert!(json.contains("\"format\": \"interpose-json-v1\""));
        assert!(json.contains("\"context\": \"global\""));
        assert!(json.contains("\"stack\""));
        assert!(!json.contains("\"open\""));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let mut output = JsonOutput::new();
        output.add_call(&event(1, "util.format", 0));
        let json = serde_json::to_string(&output.calls[0]).unwrap();
        assert!(!json.contains("result"));
        assert!(!json.contains("exception"));
        assert!(!json.contains("stack"));
        assert!(!json.contains("construct"));
    }
}
