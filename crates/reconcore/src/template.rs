//! `{{name}}` placeholder substitution.

use crate::value::{display, get_path};
use serde_json::{Map, Value};

/// Replace every `{{ key }}` in `template` with the first source that knows `key`.
///
/// Sources are consulted in order, so earlier layers win. Keys may be dotted
/// paths into nested objects. Placeholders nobody resolves are left as written.
pub fn render(template: &str, sources: &[&Map<String, Value>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after_open[..end].trim();
        match lookup(key, sources) {
            Some(value) => out.push_str(&display(value)),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after_open[end + 2..];
    }

    out.push_str(rest);
    out
}

/// Keys referenced by placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else { break };
        let key = after_open[..end].trim();
        if is_key(key) {
            keys.push(key.to_string());
        }
        rest = &after_open[end + 2..];
    }
    keys
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn lookup<'a>(key: &str, sources: &[&'a Map<String, Value>]) -> Option<&'a Value> {
    if !is_key(key) {
        return None;
    }
    sources.iter().find_map(|source| {
        source.get(key).or_else(|| {
            let (head, tail) = key.split_once('.')?;
            get_path(source.get(head)?, tail)
        })
    })
}
