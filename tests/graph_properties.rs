//! Property tests for the task graph

use std::collections::HashSet;

use codeforge::domain::Task;
use codeforge::graph::TaskGraph;
use proptest::prelude::*;

/// Random DAGs: each task may depend only on lower-indexed tasks, so the
/// generated graph is acyclic by construction.
fn arb_dag(max_tasks: usize) -> impl Strategy<Value = Vec<Task>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..max_tasks).prop_map(
        |dep_picks| {
            dep_picks
                .into_iter()
                .enumerate()
                .map(|(idx, picks)| {
                    let mut task = Task::new(format!("t{:03}", idx), format!("task {}", idx));
                    if idx > 0 {
                        for pick in picks {
                            task.dependencies.insert(format!("t{:03}", pick.index(idx)));
                        }
                    }
                    task
                })
                .collect()
        },
    )
}

proptest! {
    /// Every generated DAG has a topological order
    #[test]
    fn topological_order_succeeds(tasks in arb_dag(24)) {
        let graph = TaskGraph::from_tasks(tasks).expect("construction");
        prop_assert!(graph.topological_order().is_ok());
    }

    /// Dependencies always precede their dependents in the order
    #[test]
    fn order_respects_dependencies(tasks in arb_dag(24)) {
        let graph = TaskGraph::from_tasks(tasks.clone()).expect("construction");
        let order = graph.topological_order().expect("acyclic");
        let position: std::collections::HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for task in &tasks {
            for dep in &task.dependencies {
                prop_assert!(position[dep.as_str()] < position[task.id.as_str()]);
            }
        }
    }

    /// The order is a permutation of the task set
    #[test]
    fn order_is_permutation(tasks in arb_dag(24)) {
        let graph = TaskGraph::from_tasks(tasks.clone()).expect("construction");
        let order = graph.topological_order().expect("acyclic");
        let ordered: HashSet<&str> = order.iter().map(String::as_str).collect();
        prop_assert_eq!(order.len(), tasks.len());
        prop_assert_eq!(ordered.len(), tasks.len());
    }

    /// Critical-path distance is monotone along dependency edges
    #[test]
    fn critical_distance_monotone(tasks in arb_dag(24)) {
        let graph = TaskGraph::from_tasks(tasks.clone()).expect("construction");
        let distance = graph.critical_distances().expect("acyclic");
        for task in &tasks {
            for dep in &task.dependencies {
                prop_assert!(distance[dep] > distance[&task.id]);
            }
        }
    }

    /// The order is deterministic across repeated calls
    #[test]
    fn order_is_deterministic(tasks in arb_dag(24)) {
        let graph = TaskGraph::from_tasks(tasks).expect("construction");
        let first = graph.topological_order().expect("acyclic");
        let second = graph.topological_order().expect("acyclic");
        prop_assert_eq!(first, second);
    }
}
