//! Dependency Resolver: cycle detection and topological wave grouping
//! over a process tree's `depends_on` edges (§4.5).
//!
//! Grounded in the flat node/edge DAG style used elsewhere in this
//! codebase for graph-shaped data, but the cycle-detection and
//! levelling algorithms themselves are this module's own: three-colour
//! DFS for cycles, then Kahn's algorithm for wave levels.

use std::collections::{HashMap, VecDeque};

use crate::error::Error;
use crate::process::ProcessTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Detects a cycle in `tree`'s `depends_on` graph via three-coloured
/// DFS. Returns the id of a step on a detected cycle, if any.
fn find_cycle(tree: &ProcessTree) -> Option<String> {
    let mut colour: HashMap<&str, Colour> = tree
        .step_ids()
        .map(|id| (id.as_str(), Colour::White))
        .collect();

    fn visit<'a>(
        id: &'a str,
        tree: &'a ProcessTree,
        colour: &mut HashMap<&'a str, Colour>,
    ) -> Option<String> {
        colour.insert(id, Colour::Grey);
        if let Some(step) = tree.get(id) {
            for dep in &step.depends_on {
                match colour.get(dep.as_str()).copied() {
                    Some(Colour::Grey) => return Some(dep.clone()),
                    Some(Colour::White) | None => {
                        if let Some(cycle_id) = visit(dep.as_str(), tree, colour) {
                            return Some(cycle_id);
                        }
                    }
                    Some(Colour::Black) => {}
                }
            }
        }
        colour.insert(id, Colour::Black);
        None
    }

    let mut ids: Vec<&str> = tree.step_ids().map(String::as_str).collect();
    ids.sort();
    for id in ids {
        if colour.get(id).copied() == Some(Colour::White) {
            if let Some(cycle_id) = visit(id, tree, &mut colour) {
                return Some(cycle_id);
            }
        }
    }
    None
}

/// Computes topological waves via Kahn's algorithm: waveᵢ is the set
/// of steps whose longest dependency chain has length i. Each wave is
/// sorted by step id for reproducible tie-breaking (§4.5).
fn levelize(tree: &ProcessTree) -> Vec<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in tree.step_ids() {
        in_degree.entry(id.as_str()).or_insert(0);
    }
    for step in tree.steps.values() {
        *in_degree.entry(step.id.as_str()).or_insert(0) += step.depends_on.len();
        for dep in &step.depends_on {
            dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
        }
    }

    let mut frontier: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut frontier_vec: Vec<&str> = frontier.drain(..).collect();
    frontier_vec.sort();

    let mut waves = Vec::new();
    let mut remaining_in_degree = in_degree.clone();

    while !frontier_vec.is_empty() {
        let wave: Vec<String> = frontier_vec.iter().map(|s| s.to_string()).collect();
        let mut next_frontier: Vec<&str> = Vec::new();
        for id in &frontier_vec {
            if let Some(children) = dependents.get(id) {
                for child in children {
                    let entry = remaining_in_degree.get_mut(child).unwrap();
                    *entry -= 1;
                    if *entry == 0 {
                        next_frontier.push(child);
                    }
                }
            }
        }
        waves.push(wave);
        next_frontier.sort();
        next_frontier.dedup();
        frontier_vec = next_frontier;
    }

    waves
}

/// `plan(tree) -> [wave0, wave1, ...]`. Fails fast with
/// `cycle_detected` or a dangling dependency error before levelling,
/// matching §4.5's "cycle -> plan_failed before any step runs".
pub fn plan(tree: &ProcessTree) -> Result<Vec<Vec<String>>, Error> {
    let missing = tree.missing_dependency_ids();
    if let Some(first) = missing.into_iter().next() {
        return Err(Error::cycle_detected(first));
    }
    if let Some(cycle_id) = find_cycle(tree) {
        return Err(Error::cycle_detected(cycle_id));
    }
    Ok(levelize(tree))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessStep, StepType};
    use proptest::prelude::*;

    fn step(id: &str, deps: &[&str]) -> ProcessStep {
        ProcessStep::new(id, StepType::Search).depends_on(deps.iter().copied())
    }

    #[test]
    fn linear_chain_produces_one_step_per_wave() {
        let mut tree = ProcessTree::new(step("a", &[]));
        tree.add_step(step("b", &["a"]));
        tree.add_step(step("c", &["b"]));
        let waves = plan(&tree).unwrap();
        assert_eq!(waves, vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn independent_steps_share_a_wave() {
        let mut tree = ProcessTree::new(step("root", &[]));
        tree.add_step(step("a", &[]));
        tree.add_step(step("b", &[]));
        let waves = plan(&tree).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 3);
        let mut sorted = waves[0].clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a", "b", "root"]);
    }

    #[test]
    fn direct_cycle_is_detected() {
        let mut tree = ProcessTree::new(step("a", &["b"]));
        tree.add_step(step("b", &["a"]));
        let result = plan(&tree);
        assert!(result.is_err());
    }

    #[test]
    fn self_loop_is_detected() {
        let tree = ProcessTree::new(step("a", &["a"]));
        assert!(plan(&tree).is_err());
    }

    #[test]
    fn missing_dependency_is_a_plan_error() {
        let tree = ProcessTree::new(step("a", &["ghost"]));
        assert!(plan(&tree).is_err());
    }

    #[test]
    fn diamond_dependency_reuse_is_allowed() {
        let mut tree = ProcessTree::new(step("root", &["left", "right"]));
        tree.add_step(step("left", &["base"]));
        tree.add_step(step("right", &["base"]));
        tree.add_step(step("base", &[]));
        let waves = plan(&tree).unwrap();
        assert_eq!(waves[0], vec!["base"]);
        let mut wave1 = waves[1].clone();
        wave1.sort();
        assert_eq!(wave1, vec!["left", "right"]);
        assert_eq!(waves[2], vec!["root"]);
    }

    proptest! {
        #[test]
        fn topological_correctness_holds_for_random_dags(n in 2usize..12) {
            // Build a random DAG by only allowing edges from higher to lower index,
            // which guarantees acyclicity regardless of the sampled edge set.
            let mut tree = ProcessTree::new(step("s0", &[]));
            for i in 1..n {
                let deps: Vec<String> = (0..i).filter(|j| (i + j) % 3 == 0).map(|j| format!("s{j}")).collect();
                let dep_refs: Vec<&str> = deps.iter().map(String::as_str).collect();
                tree.add_step(step(&format!("s{i}"), &dep_refs));
            }
            let waves = plan(&tree).unwrap();
            let mut wave_index = std::collections::HashMap::new();
            for (idx, wave) in waves.iter().enumerate() {
                for id in wave {
                    wave_index.insert(id.clone(), idx);
                }
            }
            for step in tree.steps.values() {
                for dep in &step.depends_on {
                    prop_assert!(wave_index[dep] < wave_index[&step.id]);
                }
            }
        }
    }
}
