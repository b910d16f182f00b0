//! # Sync Task Repository
//!
//! Storage for sync task records.
//!
//! ## Overview
//!
//! The coordinator writes every task transition through a
//! [`TaskRepository`] so that callers can poll task state, walk the
//! parent/child tree of a fan-out and find the task running for an entity.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Result, SyncError};
use crate::job::{SyncTask, TaskId};

// ============================================================================
// Repository Trait
// ============================================================================

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a new task.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a task with the same id already exists
    async fn insert(&self, task: &SyncTask) -> Result<()>;

    /// Replace an existing task.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` if the task doesn't exist
    async fn update(&self, task: &SyncTask) -> Result<()>;

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<SyncTask>>;

    /// All tasks of an entity, most recent first.
    async fn find_by_entity(&self, entity_id: &str) -> Result<Vec<SyncTask>>;

    /// The pending or running task of an entity, if any.
    async fn find_active_by_entity(&self, entity_id: &str) -> Result<Option<SyncTask>>;

    /// Tasks spawned by `parent`, oldest first.
    async fn list_children(&self, parent: &TaskId) -> Result<Vec<SyncTask>>;
}

// ============================================================================
// In-memory Implementation
// ============================================================================

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, SyncTask>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, task: &SyncTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(SyncError::InvalidInput {
                field: "task_id".to_string(),
                message: format!("task {} already exists", task.id),
            });
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &SyncTask) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(SyncError::TaskNotFound {
                task_id: task.id.to_string(),
            }),
        }
    }

    async fn find_by_id(&self, id: &TaskId) -> Result<Option<SyncTask>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn find_by_entity(&self, entity_id: &str) -> Result<Vec<SyncTask>> {
        let mut found: Vec<SyncTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.entity_id == entity_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn find_active_by_entity(&self, entity_id: &str) -> Result<Option<SyncTask>> {
        Ok(self
            .find_by_entity(entity_id)
            .await?
            .into_iter()
            .find(|task| task.status.is_active()))
    }

    async fn list_children(&self, parent: &TaskId) -> Result<Vec<SyncTask>> {
        let mut children: Vec<SyncTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.parent_id.as_ref() == Some(parent))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(children)
    }
}
