//! Execution Order Resolver (C6, spec §4.6).
//!
//! Kahn's-algorithm topological sort over the dependency graph built by
//! the Dependency Analyzer, with a DFS cycle-finder used only to build a
//! readable error report when the graph isn't a DAG. Ported from
//! `order_resolver.py`'s `resolve_order`/`_find_cycle` pair.

use std::collections::{HashMap, HashSet, VecDeque};

use sqlflow_core::errors::PlanningError;

/// Maximum number of distinct cycles rendered in an error message; beyond
/// that only a count is shown (§4.6).
const MAX_REPORTED_CYCLES: usize = 3;

/// `edges[i]` lists the indices that directive `i` depends on (must run
/// before it).
pub type DependencyGraph = HashMap<usize, HashSet<usize>>;

/// Topologically order `0..node_count` given `edges` (node -> its
/// dependencies). Returns node indices in an order where every
/// dependency appears before its dependents. `display` renders a node
/// index as the human-readable form spec.md mandates for cycle reports
/// (`SOURCE <name>` / `LOAD <table>` / `CREATE TABLE <table>` / `EXPORT
/// <table> to <connector>`, i.e. `PlanEntry::display_form`) — it's only
/// ever called when a cycle is found.
pub fn resolve_order(
    node_count: usize,
    edges: &DependencyGraph,
    display: &dyn Fn(usize) -> String,
) -> Result<Vec<usize>, PlanningError> {
    let mut in_degree = vec![0usize; node_count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); node_count];

    for node in 0..node_count {
        let deps = edges.get(&node).cloned().unwrap_or_default();
        in_degree[node] = deps.len();
        for dep in deps {
            dependents[dep].push(node);
        }
    }

    let mut queue: VecDeque<usize> =
        (0..node_count).filter(|&n| in_degree[n] == 0).collect();
    let mut order = Vec::with_capacity(node_count);

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() == node_count {
        return Ok(order);
    }

    let remaining: Vec<usize> = (0..node_count).filter(|n| !order.contains(n)).collect();
    let cycles = find_cycles(&remaining, edges);
    Err(PlanningError::CircularDependency(format_cycle_report(&cycles, display)))
}

/// Find distinct cycles among `remaining` nodes via DFS, capped at
/// `MAX_REPORTED_CYCLES + 1` discoveries (the extra one lets the caller
/// know there were more).
fn find_cycles(remaining: &[usize], edges: &DependencyGraph) -> Vec<Vec<usize>> {
    let remaining_set: HashSet<usize> = remaining.iter().copied().collect();
    let mut cycles = Vec::new();
    let mut visited = HashSet::new();

    for &start in remaining {
        if visited.contains(&start) || cycles.len() > MAX_REPORTED_CYCLES {
            continue;
        }
        let mut stack = Vec::new();
        let mut on_stack = HashSet::new();
        if let Some(cycle) = dfs_find_cycle(start, edges, &remaining_set, &mut stack, &mut on_stack, &mut visited) {
            cycles.push(cycle);
        }
    }
    cycles
}

#[allow(clippy::too_many_arguments)]
fn dfs_find_cycle(
    node: usize,
    edges: &DependencyGraph,
    remaining: &HashSet<usize>,
    stack: &mut Vec<usize>,
    on_stack: &mut HashSet<usize>,
    visited: &mut HashSet<usize>,
) -> Option<Vec<usize>> {
    stack.push(node);
    on_stack.insert(node);
    visited.insert(node);

    if let Some(deps) = edges.get(&node) {
        for &dep in deps {
            if !remaining.contains(&dep) {
                continue;
            }
            if on_stack.contains(&dep) {
                let start = stack.iter().position(|&n| n == dep).unwrap();
                return Some(stack[start..].to_vec());
            }
            if !visited.contains(&dep) {
                if let Some(cycle) = dfs_find_cycle(dep, edges, remaining, stack, on_stack, visited) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    on_stack.remove(&node);
    None
}

fn format_cycle_report(cycles: &[Vec<usize>], display: &dyn Fn(usize) -> String) -> String {
    let shown = cycles.iter().take(MAX_REPORTED_CYCLES);
    let mut lines: Vec<String> = shown
        .map(|c| {
            let path: Vec<String> = c.iter().map(|&n| display(n)).collect();
            format!("  - {}", path.join(" -> "))
        })
        .collect();
    if cycles.len() > MAX_REPORTED_CYCLES {
        lines.push(format!("  ...and {} more", cycles.len() - MAX_REPORTED_CYCLES));
    }
    format!("circular dependency detected:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(pairs: &[(usize, usize)]) -> DependencyGraph {
        let mut g: DependencyGraph = HashMap::new();
        for &(node, dep) in pairs {
            g.entry(node).or_default().insert(dep);
        }
        g
    }

    fn index_display(n: usize) -> String {
        n.to_string()
    }

    #[test]
    fn linear_chain_orders_dependencies_first() {
        let edges = graph(&[(1, 0), (2, 1)]);
        let order = resolve_order(3, &edges, &index_display).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn independent_nodes_both_present() {
        let edges: DependencyGraph = HashMap::new();
        let order = resolve_order(2, &edges, &index_display).unwrap();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn direct_cycle_is_rejected() {
        let edges = graph(&[(0, 1), (1, 0)]);
        let err = resolve_order(2, &edges, &index_display).unwrap_err();
        match err {
            PlanningError::CircularDependency(msg) => assert!(msg.contains("circular dependency")),
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn cycle_report_uses_the_supplied_display_form() {
        let edges = graph(&[(0, 1), (1, 0)]);
        let names = ["CREATE TABLE a".to_string(), "CREATE TABLE b".to_string()];
        let err = resolve_order(2, &edges, &|n| names[n].clone()).unwrap_err();
        match err {
            PlanningError::CircularDependency(msg) => {
                assert!(msg.contains("CREATE TABLE a"));
                assert!(msg.contains("CREATE TABLE b"));
                assert!(!msg.contains(" 0 "));
                assert!(!msg.contains(" 1 "));
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn diamond_dependency_resolves() {
        // 3 depends on 1 and 2; 1 and 2 both depend on 0.
        let edges = graph(&[(1, 0), (2, 0), (3, 1), (3, 2)]);
        let order = resolve_order(4, &edges, &index_display).unwrap();
        let pos = |n: usize| order.iter().position(|&x| x == n).unwrap();
        assert!(pos(0) < pos(1));
        assert!(pos(0) < pos(2));
        assert!(pos(1) < pos(3));
        assert!(pos(2) < pos(3));
    }
}
