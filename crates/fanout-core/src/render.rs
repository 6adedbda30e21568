//! Prompt rendering
//!
//! Child prompts are built from a template and a JSON context object. The
//! rendering engine is pluggable through [`TemplateRenderer`];
//! [`PlaceholderRenderer`] is the built-in `{{path.to.value}}` substitution.

use crate::error::Result;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Pre-compiled regex for `{{ dotted.path }}` placeholders
static PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("PLACEHOLDER_REGEX is a compile-time constant")
});

/// Renders a template string against a context object
pub trait TemplateRenderer: Send + Sync {
    /// Render `template` with `context`
    fn render(&self, template: &str, context: &Value) -> Result<String>;
}

/// Substitutes `{{name}}` and `{{a.b.0.c}}` placeholders.
///
/// Strings are inserted verbatim, other values as compact JSON.
/// Placeholders that do not resolve are left untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderRenderer;

impl PlaceholderRenderer {
    /// Create a renderer
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String> {
        let rendered = PLACEHOLDER_REGEX.replace_all(template, |caps: &regex::Captures<'_>| {
            match lookup(context, &caps[1]) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) => String::new(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        });
        Ok(rendered.into_owned())
    }
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
