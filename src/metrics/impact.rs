//! Dependency impact analysis over the task graph.
//!
//! Dependency edges point from a task to its prerequisites. Impact flows the
//! other way: the tasks that list `task_id` as a dependency are blocked by
//! it. All traversals carry a visited set so cyclic graphs terminate.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::tasks::Task;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactReport {
    pub task_id: String,
    /// Tasks listing `task_id` as a direct dependency.
    pub direct_impact: Vec<String>,
    /// Transitive closure of dependents.
    pub total_impact: Vec<String>,
    /// Longest dependent chain rooted at `task_id`, starting with it.
    pub critical_path_tasks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyReport {
    pub valid: bool,
    /// References to task ids that do not exist.
    pub errors: Vec<String>,
    /// Self-references and cycles. Suspicious but not fatal.
    pub warnings: Vec<String>,
}

/// Map each task id to the ids of tasks that depend on it.
fn dependents_index(tasks: &[Task]) -> HashMap<&str, Vec<&str>> {
    let mut index: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        for dep in &task.dependencies {
            index.entry(dep.as_str()).or_default().push(task.id.as_str());
        }
    }
    for dependents in index.values_mut() {
        dependents.sort_unstable();
    }
    index
}

pub fn impact_analysis(tasks: &[Task], task_id: &str) -> ImpactReport {
    let index = dependents_index(tasks);

    let direct_impact: Vec<String> = index
        .get(task_id)
        .map(|deps| deps.iter().map(|d| d.to_string()).collect())
        .unwrap_or_default();

    // Breadth-first closure; the visited set terminates cycles.
    let mut visited: HashSet<&str> = HashSet::new();
    let mut frontier: Vec<&str> = vec![task_id];
    while let Some(current) = frontier.pop() {
        if let Some(dependents) = index.get(current) {
            for dependent in dependents {
                if visited.insert(dependent) {
                    frontier.push(dependent);
                }
            }
        }
    }
    visited.remove(task_id);
    let mut total_impact: Vec<String> = visited.into_iter().map(str::to_string).collect();
    total_impact.sort_unstable();

    ImpactReport {
        task_id: task_id.to_string(),
        direct_impact,
        total_impact,
        critical_path_tasks: longest_chain(&index, task_id),
    }
}

/// Longest chain of dependents reachable from `start`, inclusive.
/// The on-path set stops revisits, so a cycle cannot extend a chain forever.
fn longest_chain<'a>(index: &HashMap<&'a str, Vec<&'a str>>, start: &'a str) -> Vec<String> {
    fn walk<'a>(
        index: &HashMap<&'a str, Vec<&'a str>>,
        node: &'a str,
        on_path: &mut HashSet<&'a str>,
    ) -> Vec<&'a str> {
        let mut best: Vec<&'a str> = Vec::new();
        if let Some(dependents) = index.get(node) {
            for dependent in dependents {
                if on_path.contains(dependent) {
                    continue;
                }
                on_path.insert(dependent);
                let chain = walk(index, dependent, on_path);
                on_path.remove(dependent);
                if chain.len() > best.len() {
                    best = chain;
                }
            }
        }
        let mut path = vec![node];
        path.extend(best);
        path
    }

    let mut on_path = HashSet::from([start]);
    walk(index, start, &mut on_path)
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// Report unknown dependencies, self-references, and cycles without touching
/// the task set.
pub fn validate_dependencies(tasks: &[Task]) -> DependencyReport {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for task in tasks {
        let mut deps: Vec<&str> = task.dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        for dep in deps {
            if dep == task.id {
                warnings.push(format!("task '{}' depends on itself", task.id));
            } else if !known.contains(dep) {
                errors.push(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    task.id
                ));
            }
        }
    }

    warnings.extend(find_cycles(tasks));
    DependencyReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// DFS with an on-stack set; each cycle is reported once, from its smallest
/// member id.
fn find_cycles(tasks: &[Task]) -> Vec<String> {
    let graph: HashMap<&str, Vec<&str>> = tasks
        .iter()
        .map(|t| {
            let mut deps: Vec<&str> = t
                .dependencies
                .iter()
                .map(String::as_str)
                .filter(|d| *d != t.id)
                .collect();
            deps.sort_unstable();
            (t.id.as_str(), deps)
        })
        .collect();

    fn visit<'a>(
        graph: &HashMap<&'a str, Vec<&'a str>>,
        node: &'a str,
        stack: &mut Vec<&'a str>,
        done: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<&'a str>>,
    ) {
        if done.contains(node) {
            return;
        }
        if let Some(pos) = stack.iter().position(|n| *n == node) {
            cycles.push(stack[pos..].to_vec());
            return;
        }
        stack.push(node);
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                visit(graph, dep, stack, done, cycles);
            }
        }
        stack.pop();
        done.insert(node);
    }

    let mut ids: Vec<&str> = graph.keys().copied().collect();
    ids.sort_unstable();
    let mut cycles: Vec<Vec<&str>> = Vec::new();
    let mut done = HashSet::new();
    for id in ids {
        visit(&graph, id, &mut Vec::new(), &mut done, &mut cycles);
    }

    let mut seen: HashSet<Vec<&str>> = HashSet::new();
    let mut warnings = Vec::new();
    for cycle in cycles {
        let mut canonical = cycle.clone();
        canonical.sort_unstable();
        if seen.insert(canonical) {
            warnings.push(format!("dependency cycle: {}", cycle.join(" -> ")));
        }
    }
    warnings
}
