//! Call events and their subscribers

use crate::context::CallContext;
use crate::value::Value;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Enter,
    Leave,
}

/// One open traced call on the shadow stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub call_id: u64,
    pub name: String,
}

/// Enter/leave record of a single traced call
///
/// Built at call entry, completed with `ret` or `exception` at exit.
/// Subscribers receive it by reference and clone what they keep.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub call_id: u64,
    pub is_construct_call: bool,
    /// Full dotted name of the callee
    pub name: String,
    /// `name`, prefixed with `new ` for constructs
    pub local_name: String,
    pub this_arg: Option<Value>,
    pub arguments: Vec<Value>,
    /// Calls open when this one entered
    pub depth: u32,
    pub context: Rc<CallContext>,
    pub stack: Option<Vec<Frame>>,
    pub ret: Option<Value>,
    pub exception: Option<Value>,
}

impl CallEvent {
    pub fn threw(&self) -> bool {
        self.exception.is_some()
    }
}

pub type Handler = Rc<dyn Fn(&CallEvent)>;

/// Subscriber list shared between the engine and whoever subscribes
#[derive(Clone, Default)]
pub struct Events {
    handlers: Rc<RefCell<Vec<(EventType, Handler)>>>,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one event type
    pub fn on(&self, event_type: EventType, handler: impl Fn(&CallEvent) + 'static) -> &Self {
        self.handlers.borrow_mut().push((event_type, Rc::new(handler)));
        self
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Run every handler registered for `event_type`
    ///
    /// The list is snapshotted first so handlers may subscribe further
    /// handlers without invalidating the iteration.
    pub(crate) fn dispatch(&self, event_type: EventType, event: &CallEvent) {
        let handlers: Vec<Handler> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(ty, _)| *ty == event_type)
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }
}

impl std::fmt::Debug for Events {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Events")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TraceKind;

    fn sample_event() -> CallEvent {
        CallEvent {
            call_id: 3,
            is_construct_call: false,
            name: "obj.method".to_string(),
            local_name: "obj.method".to_string(),
            this_arg: None,
            arguments: vec![Value::from(1)],
            depth: 0,
            context: Rc::new(CallContext::new(TraceKind::Custom)),
            stack: None,
            ret: None,
            exception: None,
        }
    }

    #[test]
    fn test_handlers_filtered_by_type() {
        let events = Events::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let enter_seen = Rc::clone(&seen);
        let leave_seen = Rc::clone(&seen);
        events
            .on(EventType::Enter, move |e| enter_seen.borrow_mut().push(("enter", e.call_id)))
            .on(EventType::Leave, move |e| leave_seen.borrow_mut().push(("leave", e.call_id)));
        events.dispatch(EventType::Enter, &sample_event());
        assert_eq!(*seen.borrow(), vec![("enter", 3)]);
        assert_eq!(events.subscriber_count(), 2);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let events = Events::new();
        let inner = events.clone();
        events.on(EventType::Enter, move |_| {
            inner.on(EventType::Leave, |_| {});
        });
        events.dispatch(EventType::Enter, &sample_event());
        assert_eq!(events.subscriber_count(), 2);
    }

    #[test]
    fn test_threw() {
        let mut event = sample_event();
        assert!(!event.threw());
        event.exception = Some(Value::from("boom"));
        assert!(event.threw());
    }
}
