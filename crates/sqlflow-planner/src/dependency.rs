//! Dependency Analyzer (C5, spec §4.5-§4.7).
//!
//! Builds the table -> producing-directive map, extracts every table
//! reference a directive makes (`FROM`/`JOIN`/`PYTHON_FUNC` in SQL text,
//! the named source for a `LOAD`), and flags references that look like
//! typos of a known table rather than a genuinely undefined one. Patterns
//! below port the original Python dependency analyzer's regexes
//! (`dependency_analyzer.py`) directly.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use sqlflow_core::directive::Directive;
use sqlflow_core::errors::{PlanningError, TypoSuggestion, ValidationError};

/// Identifiers that show up in `FROM`/`JOIN` position but never name a
/// pipeline table: DuckDB table functions and system schemas.
static BUILTIN_TABLES: &[&str] =
    &["read_csv_auto", "read_csv", "read_parquet", "read_json", "information_schema", "pg_catalog", "main"];

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfrom\s+([a-zA-Z0-9_]+(?:\s*,\s*[a-zA-Z0-9_]+)*)").unwrap());
static JOIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bjoin\s+([a-zA-Z0-9_]+)").unwrap());
static PYTHON_FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)python_func\s*\(\s*['"][\w.]+['"]\s*,\s*([a-zA-Z0-9_]+)"#).unwrap()
});

/// Extract every table-like identifier referenced by a SQL query's
/// `FROM`, `JOIN`, and `PYTHON_FUNC(...)` clauses, skipping builtins.
pub fn extract_sql_table_refs(sql: &str) -> Vec<String> {
    let mut refs = HashSet::new();
    for caps in FROM_RE.captures_iter(sql) {
        for name in caps[1].split(',') {
            refs.insert(name.trim().to_string());
        }
    }
    for caps in JOIN_RE.captures_iter(sql) {
        refs.insert(caps[1].to_string());
    }
    for caps in PYTHON_FUNC_RE.captures_iter(sql) {
        refs.insert(caps[1].to_string());
    }
    refs.into_iter().filter(|r| !BUILTIN_TABLES.contains(&r.to_lowercase().as_str())).collect()
}

/// A directive and the table(s) it reads from, for dependency-edge
/// construction. `None` producer means the reference is unresolved.
#[derive(Debug, Clone)]
pub struct TableRef {
    pub name: String,
    pub line_number: usize,
}

/// True when two directives are allowed to share a produced table name
/// (§4.5 step 1): multiple Loads into the same table, or an `is_replace`
/// SQLBlock coexisting with a non-replace SQLBlock on the same table.
fn duplicate_is_allowed(a: &Directive, b: &Directive) -> bool {
    match (a, b) {
        (Directive::Load(_), Directive::Load(_)) => true,
        (Directive::SQLBlock(x), Directive::SQLBlock(y)) => x.is_replace || y.is_replace,
        _ => false,
    }
}

/// Maps every produced table name to the index of the directive (in the
/// flattened pipeline) that produces it (the first one, for dependency
/// purposes — later directives sharing the same table are still emitted,
/// just not recorded here).
pub fn build_producer_map(directives: &[Directive]) -> Result<HashMap<String, usize>, PlanningError> {
    let mut map = HashMap::new();
    let mut duplicates = Vec::new();
    for (idx, d) in directives.iter().enumerate() {
        if let Some(table) = d.produced_table() {
            if let Some(&existing) = map.get(table) {
                if duplicate_is_allowed(&directives[existing], d) {
                    continue;
                }
                duplicates.push(format!(
                    "  - '{table}' produced at line {} and again at line {}",
                    directives[existing].line_number(),
                    d.line_number(),
                ));
                continue;
            }
            map.insert(table.to_string(), idx);
        }
    }
    if !duplicates.is_empty() {
        return Err(PlanningError::DuplicateTable(duplicates.join("\n")));
    }
    Ok(map)
}

/// Every table this directive reads from, derived from its shape (Load's
/// named source, SQLBlock/Export's SQL text).
pub fn referenced_tables(d: &Directive) -> Vec<TableRef> {
    match d {
        Directive::Load(l) => vec![TableRef { name: l.source_name.clone(), line_number: l.line_number }],
        Directive::SQLBlock(s) => extract_sql_table_refs(&s.sql_query)
            .into_iter()
            .map(|name| TableRef { name, line_number: s.line_number })
            .collect(),
        Directive::Export(e) => {
            let mut refs = Vec::new();
            if let Some(table) = &e.table_name {
                refs.push(TableRef { name: table.clone(), line_number: e.line_number });
            }
            if let Some(sql) = &e.sql_query {
                refs.extend(
                    extract_sql_table_refs(sql)
                        .into_iter()
                        .map(|name| TableRef { name, line_number: e.line_number }),
                );
            }
            refs
        }
        _ => Vec::new(),
    }
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (n, m) = (a.len(), b.len());
    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=m {
        dp[0][j] = j;
    }
    for i in 1..=n {
        for j in 1..=m {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1).min(dp[i][j - 1] + 1).min(dp[i - 1][j - 1] + cost);
        }
    }
    dp[n][m]
}

/// Known "mistake" suffixes (§4.7 step 5) plus the general rule: any
/// `_…` suffix of length <= 10 also counts.
const TYPO_SUFFIXES: &[&str] =
    &["_failed", "_wrong", "_test", "_old", "_new", "_backup", "_temp", "_copy", "_typo", "_error", "_bad", "_fixed"];

fn has_typo_suffix(longer: &str, shorter: &str) -> bool {
    if !longer.starts_with(shorter) {
        return false;
    }
    let suffix = &longer[shorter.len()..];
    if suffix.is_empty() || !suffix.starts_with('_') {
        return false;
    }
    TYPO_SUFFIXES.contains(&suffix) || suffix.len() <= 10
}

/// Prefix pattern: `temp_users` against known `users`. Mirrors the
/// suffix check but on the front of `longer`, requiring the leftover
/// prefix end in `_` and stay short (<= 10 chars) so it reads like a
/// debugging/staging prefix rather than an unrelated table that merely
/// happens to end with `shorter`.
fn has_typo_prefix(longer: &str, shorter: &str) -> bool {
    if !longer.ends_with(shorter) {
        return false;
    }
    let prefix = &longer[..longer.len() - shorter.len()];
    prefix.ends_with('_') && prefix.len() <= 10
}

fn looks_like_typo(reference: &str, known: &str) -> bool {
    if reference == known {
        return false;
    }
    if edit_distance(reference, known) <= 2 {
        return true;
    }
    let (shorter, longer) = if reference.len() <= known.len() { (reference, known) } else { (known, reference) };
    has_typo_suffix(longer, shorter) || has_typo_prefix(longer, shorter)
}

/// Check every unresolved reference against the set of known producer
/// names and report the ones that look like a typo rather than a clean
/// miss (§4.7 step 5). References of 3 characters or fewer are skipped
/// as common test tokens; everything else that doesn't look like a typo
/// is left to the caller to log as an external-table warning.
pub fn detect_typos(
    unresolved: &[TableRef],
    known_tables: &HashSet<String>,
) -> Result<(), ValidationError> {
    let mut suggestions = Vec::new();
    for r in unresolved {
        if r.name.len() <= 3 {
            continue;
        }
        let mut best: Option<&str> = None;
        let mut best_dist = usize::MAX;
        for known in known_tables {
            if looks_like_typo(&r.name, known) {
                let dist = edit_distance(&r.name, known);
                if dist < best_dist {
                    best_dist = dist;
                    best = Some(known);
                }
            }
        }
        if let Some(suggested) = best {
            suggestions.push(TypoSuggestion {
                referenced: r.name.clone(),
                suggested: suggested.to_string(),
                line_number: r.line_number,
            });
        }
    }
    if suggestions.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(suggestions))
    }
}
