//! Indented, colored call trace
//!
//! One line per call, indented two spaces per nesting level and colored by
//! the kind of context the callee was reached through. A call with no nested
//! output finishes on its own line (` = ret`); otherwise its result follows
//! the nested calls as `-> ret`.

use crate::context::TraceKind;
use crate::event::{CallEvent, EventType, Events};
use crate::filter::SelectorSet;
use crate::formatting::{format_args, format_value};
use crate::value::Value;
use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;
use termcolor::{Color, ColorSpec, WriteColor};

pub fn color_for(kind: TraceKind) -> Color {
    match kind {
        TraceKind::Binding => Color::Yellow,
        TraceKind::Module => Color::Green,
        TraceKind::Global => Color::Red,
        TraceKind::Passed => Color::Cyan,
        TraceKind::Ret => Color::Magenta,
        TraceKind::Custom => Color::Blue,
    }
}

pub struct TextReporter<W: WriteColor> {
    out: W,
    print: SelectorSet,
    /// Call whose enter line is the last thing written
    last_call: Option<u64>,
    /// The last line has not been terminated yet
    line_open: bool,
}

impl<W: WriteColor + 'static> TextReporter<W> {
    pub fn new(out: W, print: SelectorSet) -> Self {
        Self {
            out,
            print,
            last_call: None,
            line_open: false,
        }
    }

    /// Register enter/leave handlers and hand back the shared reporter
    pub fn subscribe(self, events: &Events) -> Rc<RefCell<Self>> {
        let reporter = Rc::new(RefCell::new(self));
        let enter = Rc::clone(&reporter);
        let leave = Rc::clone(&reporter);
        events
            .on(EventType::Enter, move |event| {
                if let Err(err) = enter.borrow_mut().on_enter(event) {
                    tracing::warn!(error = %err, "failed to write trace line");
                }
            })
            .on(EventType::Leave, move |event| {
                if let Err(err) = leave.borrow_mut().on_leave(event) {
                    tracing::warn!(error = %err, "failed to write trace line");
                }
            });
        reporter
    }
}

impl<W: WriteColor> TextReporter<W> {
    fn printed(&self, event: &CallEvent) -> bool {
        self.print.matches(&event.name)
    }

    fn close_line(&mut self) -> io::Result<()> {
        if self.line_open {
            writeln!(self.out)?;
            self.line_open = false;
        }
        Ok(())
    }

    pub fn on_enter(&mut self, event: &CallEvent) -> io::Result<()> {
        if !self.printed(event) {
            return Ok(());
        }
        self.close_line()?;
        write!(self.out, "{}", pad(event.depth))?;
        self.out
            .set_color(ColorSpec::new().set_fg(Some(color_for(event.context.kind))))?;
        write!(self.out, "{}", event.local_name)?;
        self.out.reset()?;
        write!(self.out, "({})", format_args(&event.arguments))?;
        self.out.flush()?;
        self.last_call = Some(event.call_id);
        self.line_open = true;
        Ok(())
    }

    pub fn on_leave(&mut self, event: &CallEvent) -> io::Result<()> {
        if !self.printed(event) {
            return Ok(());
        }
        let ret = event.ret.clone().unwrap_or_default();
        if self.last_call == Some(event.call_id) && self.line_open {
            match &event.exception {
                Some(exception) => writeln!(self.out, " threw {}", format_value(exception))?,
                None if ret == Value::Undefined => writeln!(self.out)?,
                None => writeln!(self.out, " = {}", format_value(&ret))?,
            }
        } else {
            self.close_line()?;
            match &event.exception {
                Some(exception) => writeln!(self.out, "{}threw {}", pad(event.depth), format_value(exception))?,
                None => writeln!(self.out, "{}-> {}", pad(event.depth), format_value(&ret))?,
            }
        }
        self.line_open = false;
        self.last_call = None;
        self.out.flush()
    }

    /// Terminate a dangling line
    pub fn finish(&mut self) -> io::Result<()> {
        self.close_line()?;
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

fn pad(depth: u32) -> String {
    "  ".repeat(depth as usize)
}
