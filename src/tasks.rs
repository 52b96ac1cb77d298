//! File-backed task list.
//!
//! [`JsonTaskStore`] keeps the task list in a JSON array on disk. Every
//! operation re-reads the file while holding an exclusive lock on a sidecar
//! `<name>.lock` file, so separate processes (a running `ask` and a
//! `tasks complete`) serialize their read-modify-write cycles. Writes go to a
//! uniquely named temporary file in the same directory that is then renamed
//! over the original, so a crash mid-write leaves the previous list intact.
//!
//! A missing file is an empty list. A file that does not parse is an error
//! and is never overwritten.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use persona_harness_core::tasks::{choose_incomplete, complete, remaining, Completion, Task, TaskStore};

use crate::config::Config;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Exclusive lock on the task file's sidecar. Released on drop.
struct TaskFileLock {
    file: File,
}

impl Drop for TaskFileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

pub struct JsonTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tasks.json".to_string())
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_file_name(format!("{}.lock", self.file_name()))
    }

    async fn acquire_file_lock(&self) -> Result<TaskFileLock> {
        let path = self.lock_path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::task::spawn_blocking(move || -> Result<TaskFileLock> {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("Failed to open task lock: {}", path.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("Failed to acquire task lock: {}", path.display()))?;
            Ok(TaskFileLock { file })
        })
        .await
        .context("task lock thread failed")?
    }

    async fn load(&self) -> Result<Vec<Task>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read tasks file: {}", self.path.display()))
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse tasks file: {}", self.path.display()))
    }

    async fn save(&self, tasks: &[Task]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(tasks)?;

        let tmp = self.path.with_file_name(format!(
            ".{}.tmp-{}-{}",
            self.file_name(),
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e)
                .with_context(|| format!("Failed to replace tasks file: {}", self.path.display()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn list(&self) -> Result<Vec<Task>> {
        let _guard = self.lock.lock().await;
        let _file_lock = self.acquire_file_lock().await?;
        self.load().await
    }

    async fn select_incomplete(&self) -> Result<Option<Task>> {
        let _guard = self.lock.lock().await;
        let _file_lock = self.acquire_file_lock().await?;
        let tasks = self.load().await?;
        Ok(choose_incomplete(&tasks, &mut rand::thread_rng()).cloned())
    }

    async fn mark_completed(&self, id: i64) -> Result<Completion> {
        let _guard = self.lock.lock().await;
        let _file_lock = self.acquire_file_lock().await?;
        let mut tasks = self.load().await?;
        let outcome = complete(&mut tasks, id);
        if outcome == Completion::Completed {
            self.save(&tasks).await?;
        }
        Ok(outcome)
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let store = JsonTaskStore::new(&config.tasks.path);
    let tasks = store.list().await?;

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    for task in &tasks {
        let status = if task.completed { "done" } else { "open" };
        println!("  {:>4}  [{}]  {}", task.id, status, task.task);
    }
    println!();
    println!("{} of {} remaining", remaining(&tasks), tasks.len());
    Ok(())
}

pub async fn run_complete(config: &Config, id: i64) -> Result<()> {
    let store = JsonTaskStore::new(&config.tasks.path);
    match store.mark_completed(id).await? {
        Completion::Completed => println!("Task {} marked completed.", id),
        Completion::AlreadyCompleted => println!("Task {} was already completed.", id),
        Completion::NotFound => anyhow::bail!("No task with id {}", id),
    }
    Ok(())
}
