use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use taskloom_common::{Error, Result, TenantId};
use tracing::info;

use crate::migrations::TASKS_SCHEMA_V1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Low" => Some(Priority::Low),
            "Medium" => Some(Priority::Medium),
            "High" => Some(Priority::High),
            _ => None,
        }
    }
}

/// A persisted task row, always scoped to one tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub tenant_id: TenantId,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape before persistence assigns id and timestamps.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
}

/// Task persistence as seen by the chat core's tools.
///
/// Implementations are synchronous; the orchestration layer treats storage as
/// a reliable local collaborator, not a suspension point.
pub trait TaskStore: Send + Sync {
    fn create(&self, tenant: TenantId, draft: NewTask) -> Result<Task>;
    fn list(&self, tenant: TenantId, filter: &TaskFilter) -> Result<Vec<Task>>;
    fn get(&self, tenant: TenantId, task_id: i64) -> Result<Option<Task>>;
    fn set_completed(&self, tenant: TenantId, task_id: i64, completed: bool)
    -> Result<Option<Task>>;
    fn update(&self, tenant: TenantId, task_id: i64, patch: TaskPatch) -> Result<Option<Task>>;
    fn delete(&self, tenant: TenantId, task_id: i64) -> Result<bool>;
}

/// SQLite-backed task store.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening task store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open task database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(TASKS_SCHEMA_V1.sql)
            .map_err(|e| Error::Database(format!("task migration failed: {e}")))?;
        Ok(())
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let priority: String = row.get("priority")?;
    let tags_json: String = row.get("tags")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Task {
        id: row.get("id")?,
        tenant_id: TenantId(row.get("tenant_id")?),
        title: row.get("title")?,
        description: row.get("description")?,
        due_date: row.get("due_date")?,
        priority: Priority::from_name(&priority).unwrap_or(Priority::Medium),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        completed: row.get::<_, i64>("completed")? != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
    })
}

impl TaskStore for SqliteTaskStore {
    fn create(&self, tenant: TenantId, draft: NewTask) -> Result<Task> {
        let now = Utc::now();
        let priority = draft.priority.unwrap_or(Priority::Medium);
        let tags_json = serde_json::to_string(&draft.tags)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (tenant_id, title, description, due_date, priority, tags, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![
                tenant.as_i64(),
                draft.title,
                draft.description,
                draft.due_date,
                priority.as_str(),
                tags_json,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to insert task: {e}")))?;

        let id = conn.last_insert_rowid();
        drop(conn);

        self.get(tenant, id)?
            .ok_or_else(|| Error::Database("inserted task not found".to_string()))
    }

    fn list(&self, tenant: TenantId, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE tenant_id = ?1");
        if let Some(completed) = filter.completed {
            sql.push_str(if completed { " AND completed = 1" } else { " AND completed = 0" });
        }
        if filter.priority.is_some() {
            sql.push_str(" AND priority = ?2");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::Database(format!("failed to prepare task query: {e}")))?;

        let rows = match filter.priority {
            Some(priority) => {
                stmt.query_map(params![tenant.as_i64(), priority.as_str()], row_to_task)
            }
            None => stmt.query_map(params![tenant.as_i64()], row_to_task),
        }
        .map_err(|e| Error::Database(format!("failed to query tasks: {e}")))?;

        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row.map_err(|e| Error::Database(format!("failed to read task: {e}")))?);
        }

        if let Some(tag) = &filter.tag {
            tasks.retain(|t| t.tags.iter().any(|candidate| candidate == tag));
        }
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    fn get(&self, tenant: TenantId, task_id: i64) -> Result<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT * FROM tasks WHERE tenant_id = ?1 AND id = ?2")
            .map_err(|e| Error::Database(format!("failed to prepare task lookup: {e}")))?;

        let mut rows = stmt
            .query_map(params![tenant.as_i64(), task_id], row_to_task)
            .map_err(|e| Error::Database(format!("failed to query task: {e}")))?;

        match rows.next() {
            Some(row) => Ok(Some(
                row.map_err(|e| Error::Database(format!("failed to read task: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    fn set_completed(
        &self,
        tenant: TenantId,
        task_id: i64,
        completed: bool,
    ) -> Result<Option<Task>> {
        let changed = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE tasks SET completed = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND id = ?2",
                params![
                    tenant.as_i64(),
                    task_id,
                    completed as i64,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to update task: {e}")))?
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get(tenant, task_id)
    }

    fn update(&self, tenant: TenantId, task_id: i64, patch: TaskPatch) -> Result<Option<Task>> {
        let Some(current) = self.get(tenant, task_id)? else {
            return Ok(None);
        };

        let title = patch.title.unwrap_or(current.title);
        let description = patch.description.or(current.description);
        let due_date = patch.due_date.or(current.due_date);
        let priority = patch.priority.unwrap_or(current.priority);
        let tags = patch.tags.unwrap_or(current.tags);
        let tags_json = serde_json::to_string(&tags)?;

        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "UPDATE tasks SET title = ?3, description = ?4, due_date = ?5, priority = ?6, tags = ?7, updated_at = ?8
                 WHERE tenant_id = ?1 AND id = ?2",
                params![
                    tenant.as_i64(),
                    task_id,
                    title,
                    description,
                    due_date,
                    priority.as_str(),
                    tags_json,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| Error::Database(format!("failed to update task: {e}")))?;
        }

        self.get(tenant, task_id)
    }

    fn delete(&self, tenant: TenantId, task_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM tasks WHERE tenant_id = ?1 AND id = ?2",
                params![tenant.as_i64(), task_id],
            )
            .map_err(|e| Error::Database(format!("failed to delete task: {e}")))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteTaskStore {
        SqliteTaskStore::in_memory().expect("failed to create in-memory task store")
    }

    fn draft(title: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            ..NewTask::default()
        }
    }

    #[test]
    fn create_and_get_round_trip() {
        let store = store();
        let tenant = TenantId(1);
        let task = store
            .create(
                tenant,
                NewTask {
                    title: "write report".to_string(),
                    description: Some("quarterly numbers".to_string()),
                    due_date: Some("2026-09-01".to_string()),
                    priority: Some(Priority::High),
                    tags: vec!["work".to_string()],
                },
            )
            .unwrap();

        let fetched = store.get(tenant, task.id).unwrap().unwrap();
        assert_eq!(fetched.title, "write report");
        assert_eq!(fetched.priority, Priority::High);
        assert_eq!(fetched.tags, vec!["work".to_string()]);
        assert!(!fetched.completed);
    }

    #[test]
    fn tenants_never_see_each_others_rows() {
        let store = store();
        let a = TenantId(1);
        let b = TenantId(2);
        let task = store.create(a, draft("a's task")).unwrap();

        assert!(store.get(b, task.id).unwrap().is_none());
        assert!(store.list(b, &TaskFilter::default()).unwrap().is_empty());
        assert!(!store.delete(b, task.id).unwrap());
        // Row is still intact for its owner.
        assert!(store.get(a, task.id).unwrap().is_some());
    }

    #[test]
    fn list_filters_by_completion_and_priority() {
        let store = store();
        let tenant = TenantId(3);
        let done = store.create(tenant, draft("done")).unwrap();
        store.set_completed(tenant, done.id, true).unwrap();
        store
            .create(
                tenant,
                NewTask {
                    title: "urgent".to_string(),
                    priority: Some(Priority::High),
                    ..NewTask::default()
                },
            )
            .unwrap();

        let pending = store
            .list(
                tenant,
                &TaskFilter {
                    completed: Some(false),
                    ..TaskFilter::default()
                },
            )
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].title, "urgent");

        let high = store
            .list(
                tenant,
                &TaskFilter {
                    priority: Some(Priority::High),
                    ..TaskFilter::default()
                },
            )
            .unwrap();
        assert_eq!(high.len(), 1);
    }

    #[test]
    fn update_patches_only_provided_fields() {
        let store = store();
        let tenant = TenantId(4);
        let task = store
            .create(
                tenant,
                NewTask {
                    title: "original".to_string(),
                    description: Some("keep me".to_string()),
                    ..NewTask::default()
                },
            )
            .unwrap();

        let updated = store
            .update(
                tenant,
                task.id,
                TaskPatch {
                    title: Some("renamed".to_string()),
                    ..TaskPatch::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.description.as_deref(), Some("keep me"));
    }

    #[test]
    fn set_completed_on_missing_task_is_none() {
        let store = store();
        assert!(store.set_completed(TenantId(5), 999, true).unwrap().is_none());
    }

    #[test]
    fn reopening_a_disk_store_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let tenant = TenantId(9);

        let id = {
            let store = SqliteTaskStore::open(&path).unwrap();
            store.create(tenant, draft("durable")).unwrap().id
        };

        let reopened = SqliteTaskStore::open(&path).unwrap();
        let task = reopened.get(tenant, id).unwrap().unwrap();
        assert_eq!(task.title, "durable");
    }

    #[test]
    fn delete_removes_the_row() {
        let store = store();
        let tenant = TenantId(6);
        let task = store.create(tenant, draft("ephemeral")).unwrap();
        assert!(store.delete(tenant, task.id).unwrap());
        assert!(store.get(tenant, task.id).unwrap().is_none());
    }
}
