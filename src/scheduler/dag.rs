//! In-memory dependency graph mirroring the queue.
//!
//! The scheduler is a pure data structure: it holds no locks and performs no
//! I/O. The queue serializes all access and rebuilds the graph from disk
//! before every claim, so on-disk state always wins.

use std::collections::{HashMap, HashSet};

use crate::domain::{Task, TaskStatus};

/// DAG over tasks with a reverse dependency index.
#[derive(Debug, Default)]
pub struct DagScheduler {
    tasks: HashMap<String, Task>,
    /// task id -> ids of tasks that depend on it
    dependents: HashMap<String, HashSet<String>>,
}

impl DagScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, rejecting additions that would close a dependency cycle.
    ///
    /// Returns false (and leaves the graph unchanged) when a cycle is
    /// detected. Duplicate ids are the caller's concern.
    pub fn add(&mut self, task: Task) -> bool {
        if self.would_cycle(&task.id, &task.dependencies) {
            return false;
        }

        for dep in &task.dependencies {
            self.dependents.entry(dep.clone()).or_default().insert(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
        true
    }

    /// Remove a task and unlink it from the reverse index.
    pub fn remove(&mut self, id: &str) {
        if let Some(task) = self.tasks.remove(id) {
            for dep in &task.dependencies {
                if let Some(set) = self.dependents.get_mut(dep) {
                    set.remove(id);
                }
            }
        }
        self.dependents.remove(id);
    }

    /// Replace a stored task, rejecting dependency edits that would close a
    /// cycle. The previous version is restored on rejection.
    pub fn update(&mut self, task: Task) -> bool {
        let previous = self.tasks.get(&task.id).cloned();

        if let Some(prev) = &previous {
            for dep in &prev.dependencies {
                if let Some(set) = self.dependents.get_mut(dep) {
                    set.remove(&task.id);
                }
            }
            self.tasks.remove(&task.id);
        }

        if self.would_cycle(&task.id, &task.dependencies) {
            // Roll back to the previous edges
            if let Some(prev) = previous {
                for dep in &prev.dependencies {
                    self.dependents.entry(dep.clone()).or_default().insert(prev.id.clone());
                }
                self.tasks.insert(prev.id.clone(), prev);
            }
            return false;
        }

        for dep in &task.dependencies {
            self.dependents.entry(dep.clone()).or_default().insert(task.id.clone());
        }
        self.tasks.insert(task.id.clone(), task);
        true
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks that are pending, unassigned, and have every dependency present
    /// and completed. Sorted by priority (descending) then creation time
    /// (ascending).
    pub fn ready(&self) -> Vec<Task> {
        let mut ready: Vec<Task> = self
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending && t.assignee.is_empty() && self.dependencies_satisfied(t)
            })
            .cloned()
            .collect();

        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.created_at.cmp(&b.created_at)));
        ready
    }

    /// Pending, unassigned tasks with at least one unsatisfied dependency.
    pub fn blocked(&self) -> Vec<Task> {
        self.tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Pending && t.assignee.is_empty() && !self.dependencies_satisfied(t)
            })
            .cloned()
            .collect()
    }

    /// Tasks that depend on the given id. O(1) via the reverse index.
    pub fn dependents_of(&self, id: &str) -> Vec<Task> {
        self.dependents
            .get(id)
            .map(|ids| ids.iter().filter_map(|i| self.tasks.get(i)).cloned().collect())
            .unwrap_or_default()
    }

    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep| {
            // A missing dependency is unsatisfied, never ignored; a later add
            // can resolve the blockage.
            self.tasks
                .get(dep)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    /// Iterative DFS cycle check for a candidate node whose dependency list
    /// may differ from what the graph currently stores.
    fn would_cycle(&self, candidate_id: &str, candidate_deps: &[String]) -> bool {
        if candidate_id.is_empty() {
            return false;
        }

        // Explicit stack instead of recursion: pathological graphs must not
        // blow the host stack.
        enum Frame<'a> {
            Enter(&'a str),
            Exit(&'a str),
        }

        fn deps_of<'a>(
            tasks: &'a HashMap<String, Task>,
            candidate_id: &str,
            candidate_deps: &'a [String],
            id: &str,
        ) -> &'a [String] {
            if id == candidate_id {
                candidate_deps
            } else {
                tasks.get(id).map(|t| t.dependencies.as_slice()).unwrap_or(&[])
            }
        }

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut stack = vec![Frame::Enter(candidate_id)];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if on_stack.contains(id) {
                        return true;
                    }
                    if !visited.insert(id) {
                        continue;
                    }
                    on_stack.insert(id);
                    stack.push(Frame::Exit(id));
                    for dep in deps_of(&self.tasks, candidate_id, candidate_deps, id) {
                        if on_stack.contains(dep.as_str()) {
                            return true;
                        }
                        if !visited.contains(dep.as_str()) {
                            stack.push(Frame::Enter(dep.as_str()));
                        }
                    }
                }
                Frame::Exit(id) => {
                    on_stack.remove(id);
                }
            }
        }

        false
    }
}
