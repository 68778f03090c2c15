//! Compact rendering of traced values
//!
//! Reporters render arguments and return values through these helpers. They
//! only read data properties (no getters, no wrapper traps), so rendering
//! cannot cause traced calls of its own.

use crate::realm::to_json;
use crate::value::{array_like_items, number_to_string, PropertyDescriptor, Value};

/// Longest rendering kept intact
const MAX_WIDTH: usize = 37;
const HEAD: usize = 30;
const TAIL: usize = 7;

/// Render an argument list as `a, b, c`
pub fn format_args(args: &[Value]) -> String {
    args.iter().map(format_value).collect::<Vec<_>>().join(", ")
}

/// Render one value for a trace line
///
/// Objects with a named constructor render as `Name {}`, named functions as
/// `[Function name]`; everything else is inspected, whitespace-collapsed and
/// shortened to `head...tail` when too long.
pub fn format_value(value: &Value) -> String {
    if let Value::Object(object) = value {
        if object.is_callable() {
            if let Some(name) = object.function_name().filter(|n| !n.is_empty()) {
                return format!("[Function {name}]");
            }
        } else if let Some(name) = constructor_name(value) {
            return format!("{name} {{}}");
        }
    }
    truncate(&collapse_whitespace(&inspect(value)))
}

fn constructor_name(value: &Value) -> Option<String> {
    let constructor = value.as_object()?.get_data("constructor")?;
    let name = constructor.as_object()?.function_name()?;
    (!name.is_empty()).then_some(name)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= MAX_WIDTH {
        return text.to_string();
    }
    let head: String = chars[..HEAD].iter().collect();
    let tail: String = chars[chars.len() - TAIL..].iter().collect();
    format!("{head}...{tail}")
}

/// One-level inspection in the style of a REPL
pub fn inspect(value: &Value) -> String {
    inspect_at(value, 0)
}

fn inspect_at(value: &Value, depth: usize) -> String {
    match value {
        Value::Str(s) => format!("'{}'", s.replace('\'', "\\'")),
        Value::Object(object) if object.is_callable() => match object.function_name() {
            Some(name) if !name.is_empty() => format!("[Function: {name}]"),
            _ => "[Function (anonymous)]".to_string(),
        },
        Value::Object(object) => {
            let class = object.class_name().unwrap_or_default();
            let is_array = class == "Array";
            if class.ends_with("Error") {
                return value.to_display_string();
            }
            if depth > 0 {
                return if is_array { "[Array]" } else { "[Object]" }.to_string();
            }
            if is_array {
                let items = array_like_items(object);
                if items.is_empty() {
                    return "[]".to_string();
                }
                let rendered: Vec<String> = items.iter().map(|item| inspect_at(item, depth + 1)).collect();
                return format!("[ {} ]", rendered.join(", "));
            }
            let entries: Vec<String> = object
                .own_keys()
                .into_iter()
                .filter_map(|key| {
                    let name = key.as_str()?.to_string();
                    let descriptor = object.get_own_property(&key)?;
                    if !descriptor.is_enumerable() {
                        return None;
                    }
                    let rendered = match descriptor {
                        PropertyDescriptor::Data { value, .. } => inspect_at(&value, depth + 1),
                        PropertyDescriptor::Accessor { get: Some(_), set: Some(_), .. } => "[Getter/Setter]".to_string(),
                        PropertyDescriptor::Accessor { get: Some(_), .. } => "[Getter]".to_string(),
                        PropertyDescriptor::Accessor { .. } => "[Setter]".to_string(),
                    };
                    Some(format!("{name}: {rendered}"))
                })
                .collect();
            if entries.is_empty() {
                "{}".to_string()
            } else {
                format!("{{ {} }}", entries.join(", "))
            }
        }
        other => other.to_display_string(),
    }
}

/// `util.format`: `%s %d %i %j %o %%` substitution, leftovers appended
///
/// Without a format string every argument is rendered, strings verbatim and
/// everything else inspected.
pub fn format_message(args: &[Value]) -> String {
    let Some((Value::Str(template), rest)) = args.split_first() else {
        return args.iter().map(plain).collect::<Vec<_>>().join(" ");
    };
    let mut rest = rest.iter();
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(spec @ ('s' | 'd' | 'i' | 'j' | 'o')) => {
                chars.next();
                match rest.next() {
                    Some(value) => out.push_str(&substitute(spec, value)),
                    None => {
                        out.push('%');
                        out.push(spec);
                    }
                }
            }
            _ => out.push('%'),
        }
    }
    for value in rest {
        out.push(' ');
        out.push_str(&plain(value));
    }
    out
}

fn plain(value: &Value) -> String {
    match value {
        Value::Str(s) => s.to_string(),
        other => inspect(other),
    }
}

fn substitute(spec: char, value: &Value) -> String {
    match spec {
        's' => match value {
            Value::Object(_) => inspect(value),
            scalar => scalar.to_display_string(),
        },
        'd' => number_to_string(value.to_number()),
        'i' => number_to_string(value.to_number().trunc()),
        'j' => to_json(value, 0)
            .map(|json| json.to_string())
            .unwrap_or_else(|| "undefined".to_string()),
        _ => inspect(value),
    }
}
