//! Dependency ordering of systems and event handlers.
//!
//! Systems (and, separately for each event id, the handlers subscribed to
//! it) declare `before`/`after` constraints by name. This module turns those
//! constraints into a total execution order.
//!
//! ## Graph model
//!
//! * Each system is a node; `a.before(b)` and `b.after(a)` both add the edge
//!   `a → b`, meaning `a` runs first.
//! * A name may resolve to several nodes (duplicates share a display name);
//!   every one of them receives the edge.
//! * Names that resolve to nothing are reported and add no edge.
//!
//! ## Algorithm
//!
//! Iterative depth-first search with colouring:
//!
//! | Colour | Meaning |
//! |--------|---------|
//! | `Unvisited` | not reached yet |
//! | `InProgress` | on the current DFS path |
//! | `Finished` | all descendants emitted |
//!
//! A back edge onto an `InProgress` node is a cycle: its full path is
//! recorded and the edge is ignored, so the search still completes. The
//! order is the reverse post-order. Roots and neighbours are visited in
//! reverse registration order so that unconstrained nodes keep their
//! registration order.
//!
//! ## Determinism
//! The result depends only on the registration order and the constraints.

use log::{error, warn};

/// One node of the dependency graph.
#[derive(Clone, Copy, Debug)]
pub struct SortNode<'a> {
    /// Display name used to resolve constraints.
    pub name: &'a str,
    /// Names this node must run before.
    pub before: &'a [String],
    /// Names this node must run after.
    pub after: &'a [String],
}

/// Diagnostics gathered by [`topological_sort`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortReport {
    /// Every detected cycle as a name path, first node repeated at the end.
    pub cycles: Vec<Vec<String>>,
    /// `(node, missing name)` for every constraint naming no node.
    pub unresolved: Vec<(String, String)>,
}

impl SortReport {
    /// Returns `true` if at least one cycle was broken.
    pub fn has_cycles(&self) -> bool {
        !self.cycles.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Finished,
}

fn build_edges(nodes: &[SortNode<'_>], report: &mut SortReport) -> Vec<Vec<usize>> {
    let resolve = |name: &str| -> Vec<usize> {
        nodes.iter().enumerate().filter(|(_, n)| n.name == name).map(|(i, _)| i).collect()
    };

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (index, node) in nodes.iter().enumerate() {
        for name in node.before {
            let targets = resolve(name);
            if targets.is_empty() {
                report.unresolved.push((node.name.to_owned(), name.clone()));
            }
            for target in targets {
                edges[index].push(target);
            }
        }
        for name in node.after {
            let sources = resolve(name);
            if sources.is_empty() {
                report.unresolved.push((node.name.to_owned(), name.clone()));
            }
            for source in sources {
                edges[source].push(index);
            }
        }
    }
    for targets in &mut edges {
        targets.sort_unstable();
        targets.dedup();
    }
    edges
}

/// Orders `nodes` so that every satisfiable constraint holds.
///
/// ## Returns
/// A permutation of `0..nodes.len()` (every node exactly once) and a report
/// of broken cycles and unresolved names. Cycles and unresolved names are
/// logged here; deciding whether a cycle is fatal is left to the caller.

pub fn topological_sort(nodes: &[SortNode<'_>]) -> (Vec<usize>, SortReport) {
    let mut report = SortReport::default();
    let edges = build_edges(nodes, &mut report);

    for (node, missing) in &report.unresolved {
        warn!("`{node}` is ordered against `{missing}`, which is not registered; the constraint is ignored");
    }

    let mut color = vec![Color::Unvisited; nodes.len()];
    let mut post_order = Vec::with_capacity(nodes.len());
    // (node, number of neighbours already explored)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in (0..nodes.len()).rev() {
        if color[root] != Color::Unvisited {
            continue;
        }
        color[root] = Color::InProgress;
        stack.push((root, 0));

        while let Some(&mut (node, ref mut explored)) = stack.last_mut() {
            let neighbours = &edges[node];
            if *explored == neighbours.len() {
                color[node] = Color::Finished;
                post_order.push(node);
                stack.pop();
                continue;
            }
            // Visit neighbours from the back so that earlier nodes finish last.
            let next = neighbours[neighbours.len() - 1 - *explored];
            *explored += 1;

            match color[next] {
                Color::Unvisited => {
                    color[next] = Color::InProgress;
                    stack.push((next, 0));
                }
                Color::InProgress => {
                    let start = stack.iter().position(|&(n, _)| n == next).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..].iter().map(|&(n, _)| nodes[n].name.to_owned()).collect();
                    path.push(nodes[next].name.to_owned());
                    error!("Dependency cycle detected: {}; the edge into `{}` is ignored", path.join(" -> "), nodes[next].name);
                    report.cycles.push(path);
                }
                Color::Finished => {}
            }
        }
    }

    post_order.reverse();
    (post_order, report)
}
