//! Metadata filter matching
//!
//! Deployments carry a JSON metadata blob; orchestrators select workers
//! with key/value filters. Keys may be dotted paths into the blob,
//! string values support `*` globs, and list semantics are containment
//! (list-vs-list matches on a non-empty intersection). All filters must
//! match.

use glob::Pattern;
use serde_json::Value;

/// Whether `metadata` satisfies every filter.
pub fn matches_filters(metadata: &Value, filters: &serde_json::Map<String, Value>) -> bool {
    filters.iter().all(|(key, expected)| {
        navigate(metadata, key)
            .map(|actual| value_matches(actual, expected))
            .unwrap_or(false)
    })
}

/// Navigate a dotted path into a JSON object.
fn navigate<'a>(metadata: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = metadata;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Match one actual value against one expected filter value.
fn value_matches(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        // Glob support for string filters
        (Value::String(a), Value::String(e)) if e.contains('*') => Pattern::new(e)
            .map(|p| p.matches(a))
            .unwrap_or(false),
        // Scalar in expected list
        (a, Value::Array(options)) if !a.is_array() => options.contains(a),
        // Expected scalar contained in actual list
        (Value::Array(items), e) if !e.is_array() => items.contains(e),
        // List vs list: any overlap
        (Value::Array(items), Value::Array(options)) => {
            options.iter().any(|o| items.contains(o))
        }
        (a, e) => a == e,
    }
}
