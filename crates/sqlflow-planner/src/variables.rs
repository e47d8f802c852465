//! Variable Substitution Engine (C3, spec §4.3).
//!
//! Recognized syntax: `${name}` and `${name|default}`. Resolution
//! priority, highest to lowest: CLI > profile > SET-directive > process
//! environment > inline default. Substitution walks arbitrary JSON-shaped
//! values; the engine never raises — `validate_required_variables` is
//! the only way to surface a missing reference, and only the Planner
//! turns that into a hard error.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::env;

use sqlflow_core::errors::PlanningError;

/// `${name}` or `${name|default}`. The default, if present, is either
/// quoted (`'...'`/`"..."`, may contain whitespace) or a bare token with
/// no whitespace.
static VAR_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|([^}]*))?\}").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub default: Option<String>,
    pub start: usize,
    pub end: usize,
    pub raw: String,
}

/// Coerce a SET-directive literal per §4.3: `true`/`false` -> bool,
/// integer literal -> integer, decimal literal -> decimal, otherwise a
/// string with one pair of surrounding quotes stripped if present.
pub fn coerce_set_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if trimmed.contains('.') {
            return Value::from(f);
        }
    }
    Value::String(strip_quotes(trimmed).to_string())
}

fn strip_quotes(s: &str) -> &str {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return &s[1..s.len() - 1];
        }
    }
    s
}

/// Parse the `default` capture of a `${name|default}` reference,
/// validating the unquoted-whitespace rule (§4.3).
fn parse_default(raw_default: &str) -> Result<String, PlanningError> {
    let trimmed = raw_default.trim();
    let is_quoted = trimmed.len() >= 2
        && ((trimmed.starts_with('\'') && trimmed.ends_with('\''))
            || (trimmed.starts_with('"') && trimmed.ends_with('"')));
    if is_quoted {
        return Ok(strip_quotes(trimmed).to_string());
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(PlanningError::InvalidDefaultSyntax(format!(
            "unquoted default '{trimmed}' contains whitespace; quote it with ' or \""
        )));
    }
    Ok(trimmed.to_string())
}

/// Find every `${...}` reference in `s`, left to right.
pub fn find_var_refs(s: &str) -> Result<Vec<VarRef>, PlanningError> {
    let mut refs = Vec::new();
    for caps in VAR_REF_RE.captures_iter(s) {
        let whole = caps.get(0).unwrap();
        let name = caps.get(1).unwrap().as_str().to_string();
        let default = match caps.get(2) {
            Some(m) => Some(parse_default(m.as_str())?),
            None => None,
        };
        refs.push(VarRef {
            name,
            default,
            start: whole.start(),
            end: whole.end(),
            raw: whole.as_str().to_string(),
        });
    }
    Ok(refs)
}

/// Priority-ordered variable bindings (§4.3).
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub cli: HashMap<String, Value>,
    pub profile: HashMap<String, Value>,
    pub set_vars: HashMap<String, Value>,
    /// Snapshot of the process environment; kept explicit (rather than
    /// reading `std::env` at resolution time) so substitution stays a
    /// pure function of its inputs.
    pub env: HashMap<String, String>,
}

impl VariableContext {
    pub fn from_process_env() -> Self {
        Self { env: env::vars().collect(), ..Default::default() }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.set_vars.insert(name.into(), value);
    }

    /// Resolve a name against CLI > profile > SET > env, in that order.
    /// Does not consider inline defaults (those are per-reference).
    pub fn resolve(&self, name: &str) -> Option<Value> {
        self.cli
            .get(name)
            .or_else(|| self.profile.get(name))
            .or_else(|| self.set_vars.get(name))
            .cloned()
            .or_else(|| self.env.get(name).map(|v| Value::String(v.clone())))
    }

    /// Snapshot every name currently bound, respecting priority, as a
    /// flat scope suitable for the Condition Evaluator.
    pub fn all(&self) -> HashMap<String, Value> {
        let mut merged = HashMap::new();
        for (k, v) in &self.env {
            merged.insert(k.clone(), Value::String(v.clone()));
        }
        for (k, v) in &self.set_vars {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.profile {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.cli {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }
}

fn resolve_ref_value(r: &VarRef, ctx: &VariableContext) -> Option<Value> {
    ctx.resolve(&r.name).or_else(|| r.default.clone().map(Value::String))
}

fn value_to_embed_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute_string(s: &str, ctx: &VariableContext) -> Result<Value, PlanningError> {
    let refs = find_var_refs(s)?;
    if refs.is_empty() {
        return Ok(Value::String(s.to_string()));
    }
    if refs.len() == 1 && refs[0].start == 0 && refs[0].end == s.len() {
        return Ok(resolve_ref_value(&refs[0], ctx).unwrap_or_else(|| Value::String(refs[0].raw.clone())));
    }
    let mut out = String::new();
    let mut last = 0;
    for r in &refs {
        out.push_str(&s[last..r.start]);
        match resolve_ref_value(r, ctx) {
            Some(v) => out.push_str(&value_to_embed_string(&v)),
            None => out.push_str(&r.raw),
        }
        last = r.end;
    }
    out.push_str(&s[last..]);
    Ok(Value::String(out))
}

/// Recursively substitute `${...}` references through an arbitrary
/// JSON-shaped value (§4.3 "Substitution walks arbitrary JSON-shaped
/// values").
pub fn substitute_value(value: &Value, ctx: &VariableContext) -> Result<Value, PlanningError> {
    match value {
        Value::String(s) => substitute_string(s, ctx),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute_value(item, ctx)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), substitute_value(v, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// A reference with no resolved value and no default, at a given line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVariable {
    pub name: String,
    pub line_number: usize,
}

/// Scan `s` (from `line_number`) and report references with neither a
/// resolved binding nor an inline default (§4.3, used by the Planner's
/// `validate_required_variables`).
pub fn missing_variables_in(
    s: &str,
    line_number: usize,
    ctx: &VariableContext,
) -> Result<Vec<MissingVariable>, PlanningError> {
    let refs = find_var_refs(s)?;
    Ok(refs
        .into_iter()
        .filter(|r| r.default.is_none() && ctx.resolve(&r.name).is_none())
        .map(|r| MissingVariable { name: r.name, line_number })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_references_unchanged() {
        let ctx = VariableContext::default();
        assert_eq!(substitute_value(&Value::String("plain".into()), &ctx).unwrap(), Value::String("plain".into()));
    }

    #[test]
    fn whole_string_reference_preserves_type() {
        let mut ctx = VariableContext::default();
        ctx.set("n", Value::from(42));
        let v = substitute_value(&Value::String("${n}".into()), &ctx).unwrap();
        assert_eq!(v, Value::from(42));
    }

    #[test]
    fn partial_reference_embeds_as_string() {
        let mut ctx = VariableContext::default();
        ctx.set("env", Value::String("prod".into()));
        let v = substitute_value(&Value::String("table_${env}".into()), &ctx).unwrap();
        assert_eq!(v, Value::String("table_prod".into()));
    }

    #[test]
    fn quoted_default_used_when_unresolved() {
        let ctx = VariableContext::default();
        let v = substitute_value(&Value::String("${missing|'fallback'}".into()), &ctx).unwrap();
        assert_eq!(v, Value::String("fallback".into()));
    }

    #[test]
    fn unquoted_default_with_whitespace_errors() {
        let refs = find_var_refs("${x|hello world}");
        assert!(refs.is_err());
    }

    #[test]
    fn priority_cli_over_profile_over_set_over_env() {
        let mut ctx = VariableContext::default();
        ctx.env.insert("v".into(), "env".into());
        ctx.set_vars.insert("v".into(), Value::String("set".into()));
        ctx.profile.insert("v".into(), Value::String("profile".into()));
        ctx.cli.insert("v".into(), Value::String("cli".into()));
        assert_eq!(ctx.resolve("v"), Some(Value::String("cli".into())));
        ctx.cli.remove("v");
        assert_eq!(ctx.resolve("v"), Some(Value::String("profile".into())));
        ctx.profile.remove("v");
        assert_eq!(ctx.resolve("v"), Some(Value::String("set".into())));
        ctx.set_vars.remove("v");
        assert_eq!(ctx.resolve("v"), Some(Value::String("env".into())));
    }

    #[test]
    fn missing_without_default_is_reported() {
        let ctx = VariableContext::default();
        let missing = missing_variables_in("${undefined}", 7, &ctx).unwrap();
        assert_eq!(missing, vec![MissingVariable { name: "undefined".into(), line_number: 7 }]);
    }

    #[test]
    fn coerce_set_literal_types() {
        assert_eq!(coerce_set_literal("true"), Value::Bool(true));
        assert_eq!(coerce_set_literal("false"), Value::Bool(false));
        assert_eq!(coerce_set_literal("42"), Value::from(42));
        assert_eq!(coerce_set_literal("3.5"), Value::from(3.5));
        assert_eq!(coerce_set_literal("'prod'"), Value::String("prod".into()));
        assert_eq!(coerce_set_literal("prod"), Value::String("prod".into()));
    }
}
