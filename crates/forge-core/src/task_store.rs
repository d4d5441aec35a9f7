//! Task persistence under `tasks/{id}`.

use std::sync::Arc;

use forge_state::DocumentStore;

use crate::domain::{ForgeError, Result, Task, TaskId};

#[derive(Clone)]
pub struct TaskStore {
    store: Arc<dyn DocumentStore>,
}

fn task_key(id: &TaskId) -> String {
    format!("tasks/{id}")
}

impl TaskStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, task: &Task) -> Result<()> {
        self.store
            .put(&task_key(&task.id), serde_json::to_value(task)?)
            .await?;
        Ok(())
    }

    pub async fn load(&self, id: &TaskId) -> Result<Task> {
        match self.store.get(&task_key(id)).await? {
            Some(doc) => Ok(doc.decode()?),
            None => Err(ForgeError::TaskNotFound(id.to_string())),
        }
    }

    /// Most recently created first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Task>> {
        let mut tasks = self
            .store
            .list_prefix("tasks/")
            .await?
            .iter()
            .map(|doc| doc.decode::<Task>())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskRequest;
    use forge_state::fakes::MemoryDocumentStore;

    #[tokio::test]
    async fn save_load_and_list() {
        let store = TaskStore::new(Arc::new(MemoryDocumentStore::new()));
        let first = Task::new(TaskId::new(), TaskRequest::new("one", "u1"));
        store.save(&first).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = Task::new(TaskId::new(), TaskRequest::new("two", "u1"));
        store.save(&second).await.unwrap();

        assert_eq!(store.load(&first.id).await.unwrap(), first);
        let recent = store.recent(1).await.unwrap();
        assert_eq!(recent[0].id, second.id);
        assert!(matches!(
            store.load(&TaskId::new()).await,
            Err(ForgeError::TaskNotFound(_))
        ));
    }
}
