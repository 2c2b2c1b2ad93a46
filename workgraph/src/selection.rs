//! Top-N selection with dependency closure
//!
//! Task X depends on task Y when one of X's `inputs` is exactly one of Y's
//! `outputs`. Selecting the best N tasks pulls in everything they transitively
//! depend on, and the combined set is ordered dependencies-first.
//!
//! Cycles never fail a selection. Each strongly connected component is
//! treated as one unit in the topological sort and its members are emitted
//! in declaration order (phase order, then task order), with a warning naming
//! them.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::{debug, warn};

use crate::schema::{Profile, WorkGraph};
use crate::scoring::{rank, ScoredTask};

/// Why a task is part of a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRole {
    /// Chosen on its own score
    Top,
    /// Pulled in as a dependency of a top task
    Closure,
}

impl fmt::Display for SelectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Top => f.write_str("top"),
            Self::Closure => f.write_str("closure"),
        }
    }
}

/// Non-fatal: tasks that depend on each other in a loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleWarning {
    /// Cycle members in declaration order
    pub members: Vec<String>,
}

impl fmt::Display for CycleWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dependency cycle among [{}]; ordered by declaration",
            self.members.join(", ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub workgraph_id: String,
    pub profile: Profile,
    pub top_n: usize,
    /// Best tasks, in rank order
    pub top_task_ids: Vec<String>,
    /// Dependencies that were not themselves in the top set, in execution order
    pub closure_task_ids: Vec<String>,
    /// Topological order of top ∪ closure
    pub ordered_ids: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<CycleWarning>,
}

impl Selection {
    pub fn role_of(&self, task_id: &str) -> Option<SelectionRole> {
        if self.top_task_ids.iter().any(|id| id == task_id) {
            Some(SelectionRole::Top)
        } else if self.closure_task_ids.iter().any(|id| id == task_id) {
            Some(SelectionRole::Closure)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.ordered_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered_ids.is_empty()
    }
}

/// Data-flow dependencies between the tasks of one WorkGraph.
///
/// Edges point from a dependency to its dependent.
pub struct DependencyGraph {
    graph: DiGraph<String, ()>,
    nodes: HashMap<String, NodeIndex>,
    declaration: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn build(wg: &WorkGraph) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        let mut declaration = HashMap::new();

        for (position, (_, task)) in wg.tasks().enumerate() {
            let idx = graph.add_node(task.id.clone());
            nodes.insert(task.id.clone(), idx);
            declaration.insert(task.id.clone(), position);
        }

        let mut producers: HashMap<&str, Vec<&str>> = HashMap::new();
        for (_, task) in wg.tasks() {
            for output in &task.outputs {
                producers.entry(output.as_str()).or_default().push(&task.id);
            }
        }

        let mut seen = HashSet::new();
        for (_, task) in wg.tasks() {
            for input in &task.inputs {
                for producer in producers.get(input.as_str()).into_iter().flatten() {
                    if *producer == task.id || !seen.insert((producer.to_string(), task.id.clone())) {
                        continue;
                    }
                    graph.add_edge(nodes[*producer], nodes[&task.id], ());
                }
            }
        }

        Self {
            graph,
            nodes,
            declaration,
        }
    }

    /// Direct dependencies of `task_id`, sorted
    pub fn dependencies(&self, task_id: &str) -> Vec<String> {
        self.neighbors(task_id, Direction::Incoming)
    }

    /// Tasks that directly depend on `task_id`, sorted
    pub fn dependents(&self, task_id: &str) -> Vec<String> {
        self.neighbors(task_id, Direction::Outgoing)
    }

    fn neighbors(&self, task_id: &str, direction: Direction) -> Vec<String> {
        let Some(&idx) = self.nodes.get(task_id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// `seeds` plus everything they transitively depend on
    pub fn closure<'a>(&self, seeds: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for seed in seeds {
            if self.nodes.contains_key(seed) && visited.insert(seed.clone()) {
                queue.push_back(seed.clone());
            }
        }
        while let Some(current) = queue.pop_front() {
            for dep in self.dependencies(&current) {
                if visited.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }
        visited
    }

    /// Order `subset` dependencies-first. Ties go to the smaller task id;
    /// cycle members are emitted together in declaration order.
    pub fn order(&self, subset: &BTreeSet<String>) -> (Vec<String>, Vec<CycleWarning>) {
        let mut members: Vec<&String> = subset
            .iter()
            .filter(|id| self.nodes.contains_key(*id))
            .collect();
        members.sort_by_key(|id| self.declaration[*id]);

        let mut sub: DiGraph<&str, ()> = DiGraph::new();
        let mut local: HashMap<&str, NodeIndex> = HashMap::new();
        for id in &members {
            local.insert(id.as_str(), sub.add_node(id.as_str()));
        }
        for id in &members {
            for dep in self.dependencies(id) {
                if let Some(&from) = local.get(dep.as_str()) {
                    sub.add_edge(from, local[id.as_str()], ());
                }
            }
        }

        let components = tarjan_scc(&sub);
        let mut component_of = HashMap::new();
        let mut units: Vec<Vec<String>> = Vec::with_capacity(components.len());
        for (ci, component) in components.iter().enumerate() {
            let mut ids: Vec<String> = component.iter().map(|n| sub[*n].to_string()).collect();
            ids.sort_by_key(|id| self.declaration[id]);
            for n in component {
                component_of.insert(*n, ci);
            }
            units.push(ids);
        }

        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); units.len()];
        for edge in sub.raw_edges() {
            let from = component_of[&edge.source()];
            let to = component_of[&edge.target()];
            if from != to {
                successors[from].insert(to);
            }
        }
        let mut indegree = vec![0usize; units.len()];
        for succ in &successors {
            for &to in succ {
                indegree[to] += 1;
            }
        }

        let key = |ci: usize| -> String { units[ci].iter().min().cloned().unwrap_or_default() };
        let mut ready: BTreeSet<(String, usize)> = (0..units.len())
            .filter(|&ci| indegree[ci] == 0)
            .map(|ci| (key(ci), ci))
            .collect();

        let mut ordered = Vec::with_capacity(members.len());
        let mut warnings = Vec::new();
        while let Some((_, ci)) = ready.pop_first() {
            if units[ci].len() > 1 {
                warnings.push(CycleWarning {
                    members: units[ci].clone(),
                });
            }
            ordered.extend(units[ci].iter().cloned());
            for &to in &successors[ci] {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    ready.insert((key(to), to));
                }
            }
        }

        warnings.sort_by_key(|w| self.declaration[&w.members[0]]);
        (ordered, warnings)
    }
}

/// Rank under `profile`, take the best `top_n`, close over dependencies and
/// order the result.
pub fn select(wg: &WorkGraph, profile: Profile, top_n: usize) -> Selection {
    let ranked = rank(wg, profile);
    select_ranked(wg, &ranked, profile, top_n)
}

/// Like [`select`], reusing an existing ranking
pub fn select_ranked(
    wg: &WorkGraph,
    ranked: &[ScoredTask],
    profile: Profile,
    top_n: usize,
) -> Selection {
    let top_task_ids: Vec<String> = ranked
        .iter()
        .take(top_n)
        .map(|s| s.task_id.clone())
        .collect();

    let graph = DependencyGraph::build(wg);
    let closure = graph.closure(&top_task_ids);
    let (ordered_ids, warnings) = graph.order(&closure);

    let top: HashSet<&String> = top_task_ids.iter().collect();
    let closure_task_ids: Vec<String> = ordered_ids
        .iter()
        .filter(|id| !top.contains(id))
        .cloned()
        .collect();

    for warning in &warnings {
        warn!(workgraph_id = %wg.id, members = ?warning.members, "{warning}");
    }
    debug!(
        workgraph_id = %wg.id,
        profile = %profile,
        top = top_task_ids.len(),
        closure = closure_task_ids.len(),
        "Selection computed"
    );

    Selection {
        workgraph_id: wg.id.clone(),
        profile,
        top_n,
        top_task_ids,
        closure_task_ids,
        ordered_ids,
        warnings,
    }
}

/// Human-readable summary; id lists are cut after `max_ids` entries.
pub fn format_summary(selection: &Selection, max_ids: usize) -> String {
    fn list(ids: &[String], max_ids: usize) -> String {
        if ids.is_empty() {
            return "(none)".to_string();
        }
        let shown = ids.iter().take(max_ids).cloned().collect::<Vec<_>>().join(", ");
        if ids.len() > max_ids {
            format!("{shown} (+{} more)", ids.len() - max_ids)
        } else {
            shown
        }
    }

    let mut lines = vec![
        format!(
            "Top tasks selected ({}): {}",
            selection.profile,
            list(&selection.top_task_ids, max_ids)
        ),
        format!(
            "Dependencies added: {}",
            list(&selection.closure_task_ids, max_ids)
        ),
        format!("Materialized total: {} tasks", selection.len()),
    ];
    for warning in &selection.warnings {
        lines.push(format!("Warning: {warning}"));
    }
    lines.join("\n")
}
