//! Call statistics for -c mode

use crate::event::{EventType, Events};
use crate::filter::SelectorSet;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

/// Statistics for a single callee name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStats {
    /// Number of completed calls
    pub count: u64,
    /// Calls that threw
    pub exceptions: u64,
    /// Deepest nesting level the callee was entered at
    pub max_depth: u32,
}

/// Summary totals for all callees
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatTotals {
    pub total_calls: u64,
    pub total_exceptions: u64,
    pub max_depth: u32,
}

/// Tracks statistics for all traced calls
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: HashMap<String, CallStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed call
    pub fn record(&mut self, name: &str, threw: bool, depth: u32) {
        let entry = self.stats.entry(name.to_string()).or_default();
        entry.count += 1;
        entry.max_depth = entry.max_depth.max(depth);
        if threw {
            entry.exceptions += 1;
        }
    }

    pub fn get(&self, name: &str) -> Option<&CallStats> {
        self.stats.get(name)
    }

    pub fn totals(&self) -> StatTotals {
        StatTotals {
            total_calls: self.stats.values().map(|s| s.count).sum(),
            total_exceptions: self.stats.values().map(|s| s.exceptions).sum(),
            max_depth: self.stats.values().map(|s| s.max_depth).max().unwrap_or(0),
        }
    }

    /// Count every printed call leaving `events`
    pub fn subscribe(self, events: &Events, print: SelectorSet) -> Rc<RefCell<Self>> {
        let tracker = Rc::new(RefCell::new(self));
        let leave = Rc::clone(&tracker);
        events.on(EventType::Leave, move |event| {
            if print.matches(&event.name) {
                leave.borrow_mut().record(&event.name, event.threw(), event.depth);
            }
        });
        tracker
    }

    /// Write the summary table, busiest callee first
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.stats.is_empty() {
            return writeln!(out, "No calls traced.");
        }

        let totals = self.totals();
        let mut sorted: Vec<_> = self.stats.iter().collect();
        sorted.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));

        writeln!(out, "% calls     calls exceptions max depth name")?;
        writeln!(out, "------- --------- ---------- --------- ----------------")?;
        for (name, stats) in sorted {
            let percent = (stats.count as f64 / totals.total_calls as f64) * 100.0;
            writeln!(
                out,
                "{:7.2} {:>9} {:>10} {:>9} {}",
                percent,
                stats.count,
                if stats.exceptions > 0 {
                    stats.exceptions.to_string()
                } else {
                    String::new()
                },
                stats.max_depth,
                name
            )?;
        }
        writeln!(out, "------- --------- ---------- --------- ----------------")?;
        writeln!(
            out,
            " 100.00 {:>9} {:>10} {:>9} total",
            totals.total_calls,
            if totals.total_exceptions > 0 {
                totals.total_exceptions.to_string()
            } else {
                String::new()
            },
            totals.max_depth
        )
    }

    /// Print statistics summary to stderr
    pub fn print_summary(&self) -> io::Result<()> {
        self.write_summary(&mut io::stderr().lock())
    }
}
