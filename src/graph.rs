//! Task graph
//!
//! Stores tasks and their dependency edges, answers readiness and ordering
//! queries, and enforces acyclicity on every mutation. Topological order uses
//! Kahn's algorithm with a lexical tie-break on task id so plans and
//! checkpoints are stable across runs.

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, VecDeque};
use std::cmp::Reverse;

use thiserror::Error;

use crate::domain::{Task, TaskStatus};

/// Graph construction and query errors
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("task '{0}' already exists in the graph")]
    DuplicateTask(String),

    #[error("unknown task '{0}'")]
    UnknownTask(String),

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnresolvedDependency { task: String, dependency: String },

    #[error("dependency cycle detected among tasks: {}", involved.join(", "))]
    Cycle { involved: Vec<String> },
}

/// A DAG of tasks keyed by id
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Task>,
    /// Forward edges: dependency id -> ids of tasks that depend on it
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a decomposition's task set
    ///
    /// Rejects duplicate ids, phantom dependencies, and cycles.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for task in &tasks {
            if graph.tasks.contains_key(&task.id) {
                return Err(GraphError::DuplicateTask(task.id.clone()));
            }
            graph.tasks.insert(task.id.clone(), task.clone());
        }
        for task in graph.tasks.values() {
            for dep in &task.dependencies {
                if !graph.tasks.contains_key(dep) {
                    return Err(GraphError::UnresolvedDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        graph.rebuild_dependents();
        graph.topological_order()?;
        Ok(graph)
    }

    /// Add a single task whose dependencies must already be present
    pub fn add(&mut self, task: Task) -> Result<(), GraphError> {
        if self.tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateTask(task.id));
        }
        for dep in &task.dependencies {
            if !self.tasks.contains_key(dep) {
                return Err(GraphError::UnresolvedDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        for dep in &task.dependencies {
            self.dependents.entry(dep.clone()).or_default().insert(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Add a dependency edge between existing tasks, enforcing acyclicity
    pub fn add_dependency(&mut self, task_id: &str, dep_id: &str) -> Result<(), GraphError> {
        if !self.tasks.contains_key(task_id) {
            return Err(GraphError::UnknownTask(task_id.to_string()));
        }
        if !self.tasks.contains_key(dep_id) {
            return Err(GraphError::UnresolvedDependency {
                task: task_id.to_string(),
                dependency: dep_id.to_string(),
            });
        }
        self.tasks.get_mut(task_id).unwrap().dependencies.insert(dep_id.to_string());
        self.dependents
            .entry(dep_id.to_string())
            .or_default()
            .insert(task_id.to_string());
        if let Err(e) = self.topological_order() {
            // Roll back the edge that introduced the cycle
            self.tasks.get_mut(task_id).unwrap().dependencies.remove(dep_id);
            self.dependents.get_mut(dep_id).unwrap().remove(task_id);
            return Err(e);
        }
        Ok(())
    }

    fn rebuild_dependents(&mut self) {
        self.dependents.clear();
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                self.dependents.entry(dep.clone()).or_default().insert(task.id.clone());
            }
        }
    }

    /// Kahn's algorithm with deterministic id tie-break
    pub fn topological_order(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.tasks.values().map(|t| (t.id.as_str(), t.dependencies.len())).collect();

        // Min-heap on id keeps sibling order lexical
        let mut ready: BinaryHeap<Reverse<&str>> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id.to_string());
            if let Some(deps) = self.dependents.get(id) {
                for dependent in deps {
                    if let Some(deg) = in_degree.get_mut(dependent.as_str()) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.push(Reverse(dependent.as_str()));
                        }
                    }
                }
            }
        }

        if order.len() != self.tasks.len() {
            let involved = in_degree
                .into_iter()
                .filter(|(_, deg)| *deg > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(GraphError::Cycle { involved });
        }
        Ok(order)
    }

    /// Pending tasks whose dependencies are all validated, in id order
    pub fn ready_set(&self) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending || t.status == TaskStatus::Ready)
            .filter(|t| {
                t.dependencies
                    .iter()
                    .all(|dep| self.tasks.get(dep).map(|d| d.status == TaskStatus::Validated).unwrap_or(false))
            })
            .map(|t| t.id.clone())
            .collect()
    }

    /// Transitive dependents of a task, for failure propagation
    pub fn descendants(&self, id: &str) -> Result<BTreeSet<String>, GraphError> {
        if !self.tasks.contains_key(id) {
            return Err(GraphError::UnknownTask(id.to_string()));
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            if let Some(deps) = self.dependents.get(&current) {
                for dependent in deps {
                    if seen.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        Ok(seen)
    }

    /// Longest dependency chain by node count
    pub fn critical_path(&self) -> Result<Vec<String>, GraphError> {
        let order = self.topological_order()?;

        // Longest chain ending at each node, walking in topological order
        let mut best_len: BTreeMap<&str, usize> = BTreeMap::new();
        let mut best_prev: BTreeMap<&str, Option<&str>> = BTreeMap::new();
        for id in &order {
            let task = &self.tasks[id];
            let mut len = 1usize;
            let mut prev = None;
            for dep in &task.dependencies {
                let dep_len = best_len.get(dep.as_str()).copied().unwrap_or(1);
                if dep_len + 1 > len {
                    len = dep_len + 1;
                    prev = Some(self.tasks[dep].id.as_str());
                }
            }
            best_len.insert(task.id.as_str(), len);
            best_prev.insert(task.id.as_str(), prev);
        }

        let Some((&end, _)) = best_len.iter().max_by_key(|(id, len)| (**len, Reverse(*id))) else {
            return Ok(Vec::new());
        };

        let mut path = Vec::new();
        let mut cursor = Some(end);
        while let Some(id) = cursor {
            path.push(id.to_string());
            cursor = best_prev.get(id).copied().flatten();
        }
        path.reverse();
        Ok(path)
    }

    /// Longest chain starting at each task, counted in nodes
    ///
    /// Used by the scheduler to dispatch long-chain tasks first.
    pub fn critical_distances(&self) -> Result<BTreeMap<String, usize>, GraphError> {
        let order = self.topological_order()?;
        let mut distance: BTreeMap<String, usize> = BTreeMap::new();
        for id in order.iter().rev() {
            let downstream = self
                .dependents
                .get(id)
                .map(|deps| deps.iter().map(|d| distance.get(d).copied().unwrap_or(1)).max().unwrap_or(0))
                .unwrap_or(0);
            distance.insert(id.clone(), downstream + 1);
        }
        Ok(distance)
    }

    /// Replace a task with a splitter-produced subgraph
    ///
    /// The original's dependencies enter every source subtask; every
    /// dependent of the original is rerouted to the sink subtasks. Fails
    /// without mutating the graph if the result would not be a DAG.
    pub fn replace_with_subtasks(&mut self, id: &str, subtasks: Vec<Task>) -> Result<(), GraphError> {
        let original = self
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownTask(id.to_string()))?;

        let sub_ids: BTreeSet<String> = subtasks.iter().map(|t| t.id.clone()).collect();
        if sub_ids.len() != subtasks.len() {
            return Err(GraphError::DuplicateTask(id.to_string()));
        }
        for sub in &subtasks {
            if self.tasks.contains_key(&sub.id) {
                return Err(GraphError::DuplicateTask(sub.id.clone()));
            }
            for dep in &sub.dependencies {
                if !sub_ids.contains(dep) && !self.tasks.contains_key(dep) {
                    return Err(GraphError::UnresolvedDependency {
                        task: sub.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        // Sources take the original's dependencies; sinks collect its dependents
        let internally_depended: BTreeSet<&String> = subtasks
            .iter()
            .flat_map(|t| t.dependencies.iter().filter(|d| sub_ids.contains(*d)))
            .collect();
        let sinks: Vec<String> = subtasks
            .iter()
            .filter(|t| !internally_depended.contains(&t.id))
            .map(|t| t.id.clone())
            .collect();

        let mut candidate = self.clone();
        candidate.tasks.remove(id);
        for mut sub in subtasks {
            let is_source = sub.dependencies.iter().all(|d| !sub_ids.contains(d));
            if is_source {
                sub.dependencies.extend(original.dependencies.iter().cloned());
            }
            candidate.tasks.insert(sub.id.clone(), sub);
        }
        let dependents = self.dependents.get(id).cloned().unwrap_or_default();
        for dependent_id in &dependents {
            if let Some(dependent) = candidate.tasks.get_mut(dependent_id) {
                dependent.dependencies.remove(id);
                dependent.dependencies.extend(sinks.iter().cloned());
            }
        }
        candidate.rebuild_dependents();
        candidate.topological_order()?;

        *self = candidate;
        Ok(())
    }

    /// Pending tasks blocked by a terminal, non-validated dependency
    ///
    /// Returned as (task id, blocking dependency ids); the scheduler reports
    /// this set when the run deadlocks.
    pub fn blocked_set(&self) -> Vec<(String, Vec<String>)> {
        self.tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Ready))
            .filter_map(|t| {
                let blocking: Vec<String> = t
                    .dependencies
                    .iter()
                    .filter(|dep| {
                        self.tasks
                            .get(*dep)
                            .map(|d| matches!(d.status, TaskStatus::Failed | TaskStatus::Skipped))
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect();
                if blocking.is_empty() {
                    None
                } else {
                    Some((t.id.clone(), blocking))
                }
            })
            .collect()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    /// Write a mutated task back by id
    pub fn update(&mut self, task: Task) -> Result<(), GraphError> {
        if !self.tasks.contains_key(&task.id) {
            return Err(GraphError::UnknownTask(task.id));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn set_status(&mut self, id: &str, status: TaskStatus) -> Result<(), GraphError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownTask(id.to_string()))?;
        task.status = status;
        Ok(())
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Count of tasks in each status
    pub fn status_counts(&self) -> BTreeMap<TaskStatus, usize> {
        let mut counts = BTreeMap::new();
        for task in self.tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        counts
    }

    /// Ids of tasks currently in the given status
    pub fn ids_in_status(&self, status: TaskStatus) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> TaskGraph {
        TaskGraph::from_tasks(vec![
            Task::new("a", "root"),
            Task::new("b", "left").with_dependency("a"),
            Task::new("c", "right").with_dependency("a"),
            Task::new("d", "join").with_dependency("b").with_dependency("c"),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_tasks_rejects_duplicate() {
        let result = TaskGraph::from_tasks(vec![Task::new("a", "one"), Task::new("a", "two")]);
        assert!(matches!(result, Err(GraphError::DuplicateTask(_))));
    }

    #[test]
    fn test_from_tasks_rejects_phantom_dependency() {
        let result = TaskGraph::from_tasks(vec![Task::new("a", "x").with_dependency("ghost")]);
        assert!(matches!(result, Err(GraphError::UnresolvedDependency { .. })));
    }

    #[test]
    fn test_from_tasks_rejects_cycle() {
        let result = TaskGraph::from_tasks(vec![
            Task::new("a", "x").with_dependency("b"),
            Task::new("b", "y").with_dependency("a"),
        ]);
        assert!(matches!(result, Err(GraphError::Cycle { .. })));
    }

    #[test]
    fn test_topological_order_diamond() {
        let graph = diamond();
        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_topological_order_lexical_tie_break() {
        let graph = TaskGraph::from_tasks(vec![
            Task::new("zeta", "z"),
            Task::new("alpha", "a"),
            Task::new("mid", "m"),
        ])
        .unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_ready_set_roots_first() {
        let graph = diamond();
        assert_eq!(graph.ready_set(), vec!["a"]);
    }

    #[test]
    fn test_ready_set_after_validation() {
        let mut graph = diamond();
        graph.set_status("a", TaskStatus::Validated).unwrap();
        assert_eq!(graph.ready_set(), vec!["b", "c"]);

        graph.set_status("b", TaskStatus::Validated).unwrap();
        // d still waits on c
        assert_eq!(graph.ready_set(), vec!["c"]);

        graph.set_status("c", TaskStatus::Validated).unwrap();
        assert_eq!(graph.ready_set(), vec!["d"]);
    }

    #[test]
    fn test_descendants() {
        let graph = diamond();
        let desc = graph.descendants("a").unwrap();
        assert_eq!(desc, BTreeSet::from(["b".to_string(), "c".to_string(), "d".to_string()]));
        assert!(graph.descendants("d").unwrap().is_empty());
        assert!(graph.descendants("ghost").is_err());
    }

    #[test]
    fn test_critical_path_diamond() {
        let graph = diamond();
        let path = graph.critical_path().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.first().map(String::as_str), Some("a"));
        assert_eq!(path.last().map(String::as_str), Some("d"));
    }

    #[test]
    fn test_critical_distances() {
        let graph = diamond();
        let dist = graph.critical_distances().unwrap();
        assert_eq!(dist["a"], 3);
        assert_eq!(dist["b"], 2);
        assert_eq!(dist["c"], 2);
        assert_eq!(dist["d"], 1);
    }

    #[test]
    fn test_add_dependency_rejects_cycle() {
        let mut graph = diamond();
        let result = graph.add_dependency("a", "d");
        assert!(matches!(result, Err(GraphError::Cycle { .. })));
        // Edge was rolled back
        assert!(!graph.task("a").unwrap().dependencies.contains("d"));
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_replace_with_subtasks_chain() {
        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("up", "upstream"),
            Task::new("big", "oversize").with_dependency("up"),
            Task::new("down", "downstream").with_dependency("big"),
        ])
        .unwrap();

        let subs = vec![
            Task::new("big-1", "part one"),
            Task::new("big-2", "part two").with_dependency("big-1"),
            Task::new("big-3", "part three").with_dependency("big-2"),
        ];
        graph.replace_with_subtasks("big", subs).unwrap();

        assert!(graph.task("big").is_none());
        assert_eq!(graph.len(), 5);
        // Source inherits the original's dependency
        assert!(graph.task("big-1").unwrap().dependencies.contains("up"));
        // Dependent rerouted to the sink
        let down = graph.task("down").unwrap();
        assert!(!down.dependencies.contains("big"));
        assert!(down.dependencies.contains("big-3"));
        assert!(graph.topological_order().is_ok());
    }

    #[test]
    fn test_replace_with_subtasks_preserves_external_edges() {
        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("a", "dep one"),
            Task::new("b", "dep two"),
            Task::new("big", "oversize").with_dependency("a").with_dependency("b"),
            Task::new("x", "user one").with_dependency("big"),
            Task::new("y", "user two").with_dependency("big"),
        ])
        .unwrap();

        graph
            .replace_with_subtasks(
                "big",
                vec![Task::new("s1", "s"), Task::new("s2", "s").with_dependency("s1")],
            )
            .unwrap();

        for dep in ["a", "b"] {
            assert!(graph.task("s1").unwrap().dependencies.contains(dep));
        }
        for user in ["x", "y"] {
            let t = graph.task(user).unwrap();
            assert!(t.dependencies.contains("s2"));
            assert!(!t.dependencies.contains("big"));
        }
    }

    #[test]
    fn test_replace_with_subtasks_rejects_cycle_without_mutation() {
        let mut graph = TaskGraph::from_tasks(vec![
            Task::new("big", "oversize"),
            Task::new("down", "d").with_dependency("big"),
        ])
        .unwrap();

        // Subtask depending on a dependent of the original creates a cycle
        let subs = vec![Task::new("s1", "s").with_dependency("down")];
        assert!(graph.replace_with_subtasks("big", subs).is_err());
        assert!(graph.task("big").is_some());
        assert!(graph.task("s1").is_none());
    }

    #[test]
    fn test_blocked_set() {
        let mut graph = diamond();
        graph.set_status("a", TaskStatus::Validated).unwrap();
        graph.set_status("b", TaskStatus::Failed).unwrap();
        let blocked = graph.blocked_set();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].0, "d");
        assert_eq!(blocked[0].1, vec!["b".to_string()]);
    }

    #[test]
    fn test_status_counts() {
        let mut graph = diamond();
        graph.set_status("a", TaskStatus::Validated).unwrap();
        let counts = graph.status_counts();
        assert_eq!(counts.get(&TaskStatus::Validated), Some(&1));
        assert_eq!(counts.get(&TaskStatus::Pending), Some(&3));
    }

    #[test]
    fn test_empty_dependency_task_always_ready() {
        let graph = TaskGraph::from_tasks(vec![Task::new("solo", "no deps")]).unwrap();
        assert_eq!(graph.ready_set(), vec!["solo"]);
    }
}
