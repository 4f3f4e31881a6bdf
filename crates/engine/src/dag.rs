//! Graph queries over a workflow's steps and edges.
//!
//! Ordering is a depth-first search with three-colour marking, run on an
//! explicit stack. The order is the reverse of the DFS post-order; start
//! steps and out-edges are visited in reverse declaration order so that
//! independent steps keep the order they were declared in. The result
//! depends only on the input, never on hashing.

use std::collections::{HashMap, HashSet};

use crate::models::{Edge, Step, Workflow};
use crate::EngineError;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    /// Not yet visited.
    White,
    /// On the current DFS path.
    Grey,
    /// Finished.
    Black,
}

/// Return step IDs in a topological order.
///
/// Duplicate step IDs collapse onto their first declaration.
///
/// # Errors
/// - [`EngineError::UnknownStepReference`] if an edge names a missing step.
/// - [`EngineError::CycleDetected`] naming the target of the first back-edge found.
pub fn topological_order(steps: &[Step], edges: &[Edge]) -> Result<Vec<String>, EngineError> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut ids: Vec<&str> = Vec::with_capacity(steps.len());
    for step in steps {
        if !index.contains_key(step.id.as_str()) {
            index.insert(step.id.as_str(), ids.len());
            ids.push(step.id.as_str());
        }
    }

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
    for edge in edges {
        let lookup = |id: &str| {
            index
                .get(id)
                .copied()
                .ok_or_else(|| EngineError::UnknownStepReference {
                    edge_id: edge.id.clone(),
                    step_id: id.to_string(),
                })
        };
        let from = lookup(&edge.source_step_id)?;
        let to = lookup(&edge.target_step_id)?;
        adjacency[from].push(to);
    }

    let mut colour = vec![Colour::White; ids.len()];
    let mut postorder: Vec<usize> = Vec::with_capacity(ids.len());
    // (step, number of out-edges already explored)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for start in (0..ids.len()).rev() {
        if colour[start] != Colour::White {
            continue;
        }
        colour[start] = Colour::Grey;
        stack.push((start, 0));

        while let Some(&(node, explored)) = stack.last() {
            let children = &adjacency[node];
            if explored == children.len() {
                colour[node] = Colour::Black;
                postorder.push(node);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }
            let child = children[children.len() - 1 - explored];
            match colour[child] {
                Colour::White => {
                    colour[child] = Colour::Grey;
                    stack.push((child, 0));
                }
                Colour::Grey => {
                    return Err(EngineError::CycleDetected {
                        step_id: ids[child].to_string(),
                    });
                }
                Colour::Black => {}
            }
        }
    }

    Ok(postorder.into_iter().rev().map(|i| ids[i].to_string()).collect())
}

/// Steps with no inbound edge, in declaration order.
pub fn roots<'a>(steps: &'a [Step], edges: &[Edge]) -> Vec<&'a str> {
    let targets: HashSet<&str> = edges.iter().map(|e| e.target_step_id.as_str()).collect();
    steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| !targets.contains(id))
        .collect()
}

/// Check a workflow's structure and return its execution order.
///
/// Unlike the validator this stops at the first problem.
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<String>, EngineError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(EngineError::DuplicateStepId(step.id.clone()));
        }
    }
    topological_order(&workflow.steps, &workflow.edges)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReportConfig, StepKind};

    fn step(id: &str) -> Step {
        Step::new(id, id.to_uppercase(), StepKind::Report { config: ReportConfig::default() })
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge::new(format!("{from}-{to}"), from, to)
    }

    fn workflow(steps: Vec<Step>, edges: Vec<Edge>) -> Workflow {
        Workflow::new("test", steps, edges)
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let wf = workflow(
            vec![step("a"), step("b"), step("c")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        assert_eq!(validate_dag(&wf).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn order_respects_edges_not_declaration() {
        // declared backwards: C, B, A with A → B → C
        let wf = workflow(
            vec![step("c"), step("b"), step("a")],
            vec![edge("a", "b"), edge("b", "c")],
        );
        assert_eq!(validate_dag(&wf).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let wf = workflow(
            vec![step("a"), step("b"), step("c"), step("d")],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );
        assert_eq!(validate_dag(&wf).unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn independent_steps_keep_declaration_order() {
        let wf = workflow(vec![step("x"), step("y"), step("z")], vec![]);
        assert_eq!(validate_dag(&wf).unwrap(), vec!["x", "y", "z"]);
    }

    #[test]
    fn order_is_stable_across_calls() {
        let steps = vec![step("s"), step("t"), step("u"), step("v"), step("w")];
        let edges = vec![edge("s", "u"), edge("t", "u"), edge("u", "w"), edge("s", "v")];
        let first = topological_order(&steps, &edges).unwrap();
        for _ in 0..10 {
            assert_eq!(topological_order(&steps, &edges).unwrap(), first);
        }
    }

    #[test]
    fn duplicate_step_id_is_rejected() {
        let wf = workflow(vec![step("a"), step("a")], vec![]);
        assert!(matches!(
            validate_dag(&wf),
            Err(EngineError::DuplicateStepId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_step_is_rejected() {
        let wf = workflow(vec![step("a")], vec![edge("a", "ghost")]);
        assert!(matches!(
            validate_dag(&wf),
            Err(EngineError::UnknownStepReference { step_id, .. }) if step_id == "ghost"
        ));
    }

    #[test]
    fn cycle_names_a_step_on_the_cycle() {
        // A → B → C → A
        let wf = workflow(
            vec![step("a"), step("b"), step("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("c", "a")],
        );
        match validate_dag(&wf) {
            Err(EngineError::CycleDetected { step_id }) => {
                assert!(["a", "b", "c"].contains(&step_id.as_str()))
            }
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let wf = workflow(vec![step("a")], vec![edge("a", "a")]);
        assert!(matches!(
            validate_dag(&wf),
            Err(EngineError::CycleDetected { step_id }) if step_id == "a"
        ));
    }

    #[test]
    fn roots_are_steps_without_inbound_edges() {
        let steps = vec![step("a"), step("b"), step("c")];
        assert_eq!(roots(&steps, &[edge("a", "b")]), vec!["a", "c"]);
    }
}
