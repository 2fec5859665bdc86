//! Trace category composition

use std::collections::HashSet;

/// Categories recorded by every trace
pub const DEFAULT_TRACE_CATEGORIES: &[&str] = &[
    // Exclude the browser's own defaults
    "-*",
    "toplevel",
    "blink.console",
    "blink.user_timing",
    "benchmark",
    "loading",
    "latencyInfo",
    "devtools.timeline",
    "disabled-by-default-devtools.timeline",
    "disabled-by-default-devtools.timeline.frame",
    "disabled-by-default-devtools.timeline.stack",
    "disabled-by-default-devtools.screenshot",
    "disabled-by-default-v8.cpu_profile",
];

/// Caller options for starting a trace
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    /// Comma-separated categories recorded on top of the defaults
    pub additional_trace_categories: Option<String>,
}

impl TraceOptions {
    pub fn with_categories(categories: impl Into<String>) -> Self {
        Self {
            additional_trace_categories: Some(categories.into()),
        }
    }
}

/// Merge `defaults` with the comma-separated `additional` categories
///
/// Defaults come first. Each category appears once, at its first position.
/// Tokens are trimmed and empty tokens dropped.
pub fn compose<S: AsRef<str>>(defaults: &[S], additional: Option<&str>) -> Vec<String> {
    let extra = additional
        .into_iter()
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let mut seen = HashSet::new();
    defaults
        .iter()
        .map(|category| category.as_ref())
        .chain(extra)
        .filter(|token| seen.insert(*token))
        .map(String::from)
        .collect()
}
