//! Task list and the "assign one task" selection rule.
//!
//! Tasks are created out of band and only ever change by being marked
//! completed. Selection picks uniformly at random among incomplete tasks;
//! completion is idempotent per ID.
//!
//! The task list is the only state shared between concurrent chat requests,
//! so every [`TaskStore`] must serialize its read-modify-write cycles.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A to-do item that can be handed out by the assign-task special prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub completed: bool,
}

impl Task {
    pub fn new(id: i64, task: impl Into<String>) -> Self {
        Self {
            id,
            task: task.into(),
            completed: false,
        }
    }
}

/// Result of marking a task completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Completed,
    AlreadyCompleted,
    NotFound,
}

/// Pick one incomplete task uniformly at random.
pub fn choose_incomplete<'a, R>(tasks: &'a [Task], rng: &mut R) -> Option<&'a Task>
where
    R: Rng + ?Sized,
{
    let open: Vec<&Task> = tasks.iter().filter(|t| !t.completed).collect();
    open.choose(rng).copied()
}

/// Mark the task with `id` completed in place.
pub fn complete(tasks: &mut [Task], id: i64) -> Completion {
    match tasks.iter_mut().find(|t| t.id == id) {
        Some(task) if task.completed => Completion::AlreadyCompleted,
        Some(task) => {
            task.completed = true;
            Completion::Completed
        }
        None => Completion::NotFound,
    }
}

/// Number of tasks not yet completed.
pub fn remaining(tasks: &[Task]) -> usize {
    tasks.iter().filter(|t| !t.completed).count()
}

/// Persistent task list shared by concurrent requests.
///
/// Implementations must make [`mark_completed`](TaskStore::mark_completed)
/// atomic with respect to every other operation on the same store so that
/// concurrent completions are never lost.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// All tasks, in stored order.
    async fn list(&self) -> Result<Vec<Task>>;

    /// One incomplete task chosen uniformly at random, or `None` when all are done.
    async fn select_incomplete(&self) -> Result<Option<Task>>;

    /// Mark a task completed. Repeating the call is harmless.
    async fn mark_completed(&self, id: i64) -> Result<Completion>;
}

/// Task store held in memory behind a mutex.
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    fn with_tasks<T>(&self, f: impl FnOnce(&mut Vec<Task>) -> T) -> Result<T> {
        let mut guard = self
            .tasks
            .lock()
            .map_err(|_| anyhow!("task list lock poisoned"))?;
        Ok(f(&mut *guard))
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list(&self) -> Result<Vec<Task>> {
        self.with_tasks(|tasks| tasks.clone())
    }

    async fn select_incomplete(&self) -> Result<Option<Task>> {
        self.with_tasks(|tasks| choose_incomplete(tasks, &mut rand::thread_rng()).cloned())
    }

    async fn mark_completed(&self, id: i64) -> Result<Completion> {
        self.with_tasks(|tasks| complete(tasks, id))
    }
}
