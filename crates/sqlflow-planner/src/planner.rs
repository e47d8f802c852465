//! Planner (C8, spec §4.7 "build_plan").
//!
//! Orchestrates the full compile pipeline in the order §4.7 specifies:
//! 1. variable validation over every directive's raw text (C3);
//! 2. conditional flattening, substituting and evaluating each branch
//!    condition as it's reached and applying `SET` directives along the
//!    way (C4 + C3);
//! 3. id generation (§3 invariants, deferred to step emission here since
//!    ids are computed directly from each directive rather than a
//!    separate identity pass);
//! 4. dependency analysis over the untouched SQL/table text (C5);
//! 5. typo detection for undefined references (C5);
//! 6. order resolution (C6);
//! 7. step emission, including missing-step recovery (C7);
//! 8. a final variable-substitution pass over the emitted plan, with
//!    any still-unresolved reference downgraded to a warning.

use std::collections::{HashMap, HashSet};

use sqlflow_core::directive::{Directive, Pipeline, SyncMode};
use sqlflow_core::errors::{PlanningError, ValidationError};
use sqlflow_core::plan::{ExecutionPlan, PlanEntry};

use crate::condition::evaluate;
use crate::dependency::{build_producer_map, referenced_tables};
use crate::order::{resolve_order, DependencyGraph};
use crate::step_builder::{build_entry, is_buildable};
use crate::variables::{coerce_set_literal, missing_variables_in, substitute_value, VariableContext};

/// Every string field the Variable Substitution Engine should see,
/// tagged with the directive's own line — used both for the upfront
/// required-variable validation and for scanning conditional branches.
fn scan_strings(d: &Directive) -> Vec<(String, usize)> {
    let line = d.line_number();
    match d {
        Directive::SourceDefinition(s) => vec![(s.params.to_string(), line)],
        Directive::Load(_) => vec![],
        Directive::SQLBlock(b) => vec![(b.sql_query.clone(), line)],
        Directive::Export(e) => {
            let mut v = vec![(e.destination_uri.clone(), line)];
            if let Some(sql) = &e.sql_query {
                v.push((sql.clone(), line));
            }
            v
        }
        Directive::Set(s) => vec![(s.variable_value.clone(), line)],
        Directive::ConditionalBlock(block) => {
            let mut v = Vec::new();
            for branch in &block.branches {
                v.push((branch.condition.clone(), block.line_number));
                for inner in &branch.steps {
                    v.extend(scan_strings(inner));
                }
            }
            for inner in &block.else_branch {
                v.extend(scan_strings(inner));
            }
            v
        }
    }
}

fn validate_required_variables(directives: &[Directive], ctx: &VariableContext) -> Result<(), PlanningError> {
    let mut missing = Vec::new();
    for d in directives {
        for (s, line) in scan_strings(d) {
            missing.extend(missing_variables_in(&s, line, ctx)?);
        }
    }
    if missing.is_empty() {
        return Ok(());
    }
    let report = missing
        .iter()
        .map(|m| format!("  - '{}' referenced at line {}", m.name, m.line_number))
        .collect::<Vec<_>>()
        .join("\n");
    Err(PlanningError::MissingVariables(report))
}

fn substitute_condition(condition: &str, ctx: &VariableContext) -> Result<String, PlanningError> {
    match substitute_value(&serde_json::Value::String(condition.to_string()), ctx)? {
        serde_json::Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

/// Walk `directives` in source order, applying `SET` to `ctx` as
/// encountered and resolving `ConditionalBlock`s against `ctx`'s current
/// snapshot (first true branch wins; otherwise the else branch, which
/// may be empty). Conditions are variable-substituted before evaluation,
/// per C4's contract.
fn flatten(directives: &[Directive], ctx: &mut VariableContext) -> Result<Vec<Directive>, PlanningError> {
    let mut out = Vec::new();
    for d in directives {
        match d {
            Directive::Set(s) => {
                ctx.set(s.variable_name.clone(), coerce_set_literal(&s.variable_value));
            }
            Directive::ConditionalBlock(block) => {
                let mut matched = None;
                for branch in &block.branches {
                    let condition = substitute_condition(&branch.condition, ctx)?;
                    let scope = ctx.all();
                    let truth = evaluate(&condition, &scope).map_err(|e| {
                        PlanningError::ConditionEvaluation(format!("line {}: {}", block.line_number, e))
                    })?;
                    if truth {
                        matched = Some(&branch.steps);
                        break;
                    }
                }
                let steps = matched.unwrap_or(&block.else_branch);
                out.extend(flatten(steps, ctx)?);
            }
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

fn substitute_directive(d: &Directive, ctx: &VariableContext) -> Result<Directive, PlanningError> {
    let value = serde_json::to_value(d).map_err(|e| PlanningError::InvalidParams(e.to_string()))?;
    let substituted = substitute_value(&value, ctx)?;
    serde_json::from_value(substituted).map_err(|e| PlanningError::InvalidParams(e.to_string()))
}

/// Combined table/source-name producer map used to resolve both
/// `LOAD ... FROM <source>` and SQL `FROM`/`JOIN` references against a
/// single namespace, with cross-kind duplicate detection.
fn build_name_map(directives: &[Directive]) -> Result<HashMap<String, usize>, PlanningError> {
    let mut map = build_producer_map(directives)?;
    let mut duplicates = Vec::new();
    for (idx, d) in directives.iter().enumerate() {
        if let Directive::SourceDefinition(s) = d {
            if let Some(&existing) = map.get(&s.name) {
                duplicates.push(format!(
                    "  - '{}' defined at line {} and again at line {}",
                    s.name,
                    directives[existing].line_number(),
                    s.line_number,
                ));
                continue;
            }
            map.insert(s.name.clone(), idx);
        }
    }
    if !duplicates.is_empty() {
        return Err(PlanningError::DuplicateTable(duplicates.join("\n")));
    }
    Ok(map)
}

/// `source_name -> (connector_type, sync_mode, cursor_field)` for every
/// `SourceDefinition` in the flattened pipeline, used to patch the Load
/// entries the Step Builder emits (it only sees one directive at a
/// time and can't resolve a Load's producing source itself).
fn source_metadata(directives: &[Directive]) -> HashMap<String, (String, SyncMode, Option<String>)> {
    directives
        .iter()
        .filter_map(|d| match d {
            Directive::SourceDefinition(s) => {
                Some((s.name.clone(), (s.connector_type.clone(), s.sync_mode, s.cursor_field.clone())))
            }
            _ => None,
        })
        .collect()
}

fn patch_load_metadata(
    plan: Vec<PlanEntry>,
    sources: &HashMap<String, (String, SyncMode, Option<String>)>,
) -> Vec<PlanEntry> {
    plan.into_iter()
        .map(|entry| match entry {
            PlanEntry::Load { id, name, source_name, target_table, mode, upsert_keys, query, depends_on, .. } => {
                let (source_connector_type, sync_mode, cursor_field) = sources
                    .get(&source_name)
                    .cloned()
                    .unwrap_or((String::new(), SyncMode::FullRefresh, None));
                PlanEntry::Load {
                    id,
                    name,
                    source_name,
                    target_table,
                    source_connector_type,
                    mode,
                    upsert_keys,
                    query,
                    sync_mode,
                    cursor_field,
                    depends_on,
                }
            }
            other => other,
        })
        .collect()
}

fn build_dependency_graph(
    directives: &[Directive],
    name_map: &HashMap<String, usize>,
) -> Result<DependencyGraph, ValidationError> {
    let mut graph: DependencyGraph = HashMap::new();
    let mut unresolved = Vec::new();
    for (idx, d) in directives.iter().enumerate() {
        let mut deps = HashSet::new();
        for table_ref in referenced_tables(d) {
            match name_map.get(&table_ref.name) {
                Some(&producer_idx) if producer_idx != idx => {
                    deps.insert(producer_idx);
                }
                Some(_) => {}
                None => unresolved.push(table_ref),
            }
        }
        graph.insert(idx, deps);
    }

    let known: HashSet<String> = name_map.keys().cloned().collect();
    crate::dependency::detect_typos(&unresolved, &known)?;
    for r in &unresolved {
        log::warn!("undefined table reference '{}' at line {} treated as external", r.name, r.line_number);
    }
    Ok(graph)
}

/// Compile a full pipeline into a dependency-ordered `ExecutionPlan`.
pub fn build_plan(pipeline: &Pipeline, ctx: &mut VariableContext) -> Result<ExecutionPlan, PlanningError> {
    if let Err(e) = validate_required_variables(pipeline, ctx) {
        log::debug!("variable validation failed: {e}");
        return Err(e);
    }

    let flattened = flatten(pipeline, ctx)?;
    let buildable: Vec<Directive> = flattened.into_iter().filter(is_buildable).collect();

    let name_map = build_name_map(&buildable).map_err(|e| {
        log::debug!("duplicate table detection failed: {e}");
        e
    })?;
    let graph = build_dependency_graph(&buildable, &name_map).map_err(|e| {
        log::debug!("dependency analysis failed: {}", e.message);
        PlanningError::Internal(e.message)
    })?;

    // A cycle report renders each node via the same SOURCE/LOAD/CREATE
    // TABLE/EXPORT forms the rest of the plan uses (spec §4.6), not raw
    // directive indices — build each entry with no dependencies just for
    // its `display_form`.
    let display = |idx: usize| build_entry(&buildable[idx], idx, vec![]).display_form();
    let mut order = resolve_order(buildable.len(), &graph, &display).map_err(|e| {
        log::debug!("order resolution failed: {e}");
        e
    })?;

    // Missing-step recovery: every directive is already a distinct graph
    // node, so Kahn's algorithm only fails to place one if the graph
    // construction above has a bug. Guard it anyway per §4.7 step 7.
    let placed: HashSet<usize> = order.iter().copied().collect();
    for idx in 0..buildable.len() {
        if !placed.contains(&idx) {
            log::warn!("step at index {idx} missing from resolved order, appending");
            order.push(idx);
        }
    }

    let ids: Vec<String> =
        buildable.iter().enumerate().map(|(i, d)| build_entry(d, i, vec![]).id().to_string()).collect();

    let raw_plan: Vec<PlanEntry> = order
        .into_iter()
        .map(|idx| {
            let deps = graph.get(&idx).cloned().unwrap_or_default();
            let mut depends_on: Vec<String> = deps.into_iter().map(|d| ids[d].clone()).collect();
            depends_on.sort();
            build_entry(&buildable[idx], idx, depends_on)
        })
        .collect();
    let raw_plan = patch_load_metadata(raw_plan, &source_metadata(&buildable));

    // Final substitution pass (§4.7 step 8): re-run over the emitted
    // plan's directive-shaped payloads; any reference still unresolved
    // here is only a warning, since step 1 already guaranteed every
    // reference without a default does resolve to something.
    let mut plan = Vec::with_capacity(raw_plan.len());
    for entry in raw_plan {
        let value = serde_json::to_value(&entry).map_err(|e| PlanningError::InvalidParams(e.to_string()))?;
        let substituted = substitute_value(&value, ctx).map_err(|e| {
            log::warn!("final substitution warning on step: {e}");
            e
        })?;
        let entry: PlanEntry =
            serde_json::from_value(substituted).map_err(|e| PlanningError::InvalidParams(e.to_string()))?;
        plan.push(entry);
    }

    Ok(plan)
}
