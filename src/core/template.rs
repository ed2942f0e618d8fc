//! Prompt template resolution
//!
//! Substitutes `{name}` and `{a.b.c}` placeholders from two tiers:
//! explicit node inputs shadow workflow state. Unresolvable names produce
//! an error listing the available candidates, with a closest-match
//! suggestion when the typo is within edit distance 2.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::state::StateInstance;
use crate::error::TemplateError;

/// Placeholder pattern: identifier or dotted identifier path. Braces that
/// don't wrap a valid name are left untouched.
fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}")
            .expect("placeholder regex is valid")
    })
}

/// Resolve every placeholder in `template`.
pub fn resolve_prompt(
    template: &str,
    inputs: &BTreeMap<String, Value>,
    state: &StateInstance,
) -> Result<String, TemplateError> {
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;

    for caps in placeholder_regex().captures_iter(template) {
        let whole = caps.get(0).expect("match has group 0");
        let name = &caps[1];

        result.push_str(&template[last_end..whole.start()]);
        let value = resolve_variable(name, inputs, state)?;
        result.push_str(&value_to_text(&value));
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

/// Placeholder names referenced by a template, in order of appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Resolve one variable: inputs first (exact name, dotted or not), then
/// dotted traversal of the state.
pub fn resolve_variable(
    name: &str,
    inputs: &BTreeMap<String, Value>,
    state: &StateInstance,
) -> Result<Value, TemplateError> {
    if let Some(value) = inputs.get(name) {
        return Ok(value.clone());
    }
    if let Some(value) = state.get_path(name) {
        return Ok(value);
    }

    let mut candidates: Vec<String> = inputs.keys().cloned().collect();
    candidates.extend(state.declared_fields().iter().map(|s| s.to_string()));
    candidates.sort();
    candidates.dedup();

    let mut message = format!(
        "Variable '{}' not found. Available inputs and state fields: [{}]",
        name,
        candidates.join(", ")
    );
    if let Some(suggestion) = suggest_variable(name, &candidates) {
        message.push_str(&format!(". Did you mean '{}'?", suggestion));
    }
    Err(TemplateError::new(name, message))
}

/// Canonical text form of a resolved value: strings verbatim, scalars via
/// their display form, containers as compact JSON.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Closest candidate within edit distance 2, if any.
fn suggest_variable(name: &str, candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .map(|c| (edit_distance(name, c), c))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.clone())
}

/// Levenshtein distance.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}
