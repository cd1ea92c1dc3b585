use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use taskloom_common::{Error, Result};
use taskloom_db::{NewTask, Priority, Task, TaskFilter, TaskPatch, TaskStore};
use tracing::info;

use super::{Tool, ToolContext, ToolRegistry};

const DEFAULT_LIST_LIMIT: usize = 50;

/// Register the five task-operation tools against one store.
pub fn register_task_tools(registry: &mut ToolRegistry, store: Arc<dyn TaskStore>) {
    registry.register(Box::new(AddTask {
        store: Arc::clone(&store),
    }));
    registry.register(Box::new(ListTasks {
        store: Arc::clone(&store),
    }));
    registry.register(Box::new(CompleteTask {
        store: Arc::clone(&store),
    }));
    registry.register(Box::new(UpdateTask {
        store: Arc::clone(&store),
    }));
    registry.register(Box::new(DeleteTask { store }));
}

fn task_to_json(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "due_date": task.due_date,
        "priority": task.priority.as_str(),
        "tags": task.tags,
        "completed": task.completed,
    })
}

fn require_task_id(args: &Value) -> Result<i64> {
    args["task_id"]
        .as_i64()
        .ok_or_else(|| Error::Tool("missing or invalid 'task_id' argument".to_string()))
}

fn parse_priority(args: &Value) -> Result<Option<Priority>> {
    match args["priority"].as_str() {
        None => Ok(None),
        Some(name) => Priority::from_name(name).map(Some).ok_or_else(|| {
            Error::Tool(format!(
                "invalid priority '{name}': must be Low, Medium, or High"
            ))
        }),
    }
}

fn parse_due_date(args: &Value) -> Result<Option<String>> {
    match args["due_date"].as_str() {
        None => Ok(None),
        Some(raw) => {
            chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                Error::Tool(format!("invalid due_date '{raw}': expected YYYY-MM-DD"))
            })?;
            Ok(Some(raw.to_string()))
        }
    }
}

fn parse_tags(args: &Value) -> Result<Vec<String>> {
    match &args["tags"] {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| Error::Tool("tags must be strings".to_string()))
            })
            .collect(),
        _ => Err(Error::Tool("tags must be an array of strings".to_string())),
    }
}

/// Infer a priority from keywords when the model did not pass one.
fn infer_priority(title: &str) -> Priority {
    let title = title.to_ascii_lowercase();
    if ["urgent", "important", "critical", "asap"]
        .iter()
        .any(|kw| title.contains(kw))
    {
        Priority::High
    } else if ["later", "someday", "eventually", "maybe"]
        .iter()
        .any(|kw| title.contains(kw))
    {
        Priority::Low
    } else {
        Priority::Medium
    }
}

// ---------------------------------------------------------------------------
// AddTask
// ---------------------------------------------------------------------------

struct AddTask {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl Tool for AddTask {
    fn name(&self) -> &'static str {
        "add_task"
    }

    fn description(&self) -> &'static str {
        "Create a new task. Provide a concise title; optionally a description, \
         a due date in YYYY-MM-DD format, a priority (Low, Medium, High), and tags."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Task title (required)"
                },
                "description": {
                    "type": "string",
                    "description": "Longer free-form details"
                },
                "due_date": {
                    "type": "string",
                    "description": "Due date in YYYY-MM-DD format"
                },
                "priority": {
                    "type": "string",
                    "enum": ["Low", "Medium", "High"],
                    "description": "Defaults to Medium, or inferred from urgency words in the title"
                },
                "tags": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Free-form labels"
                }
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<Value> {
        let title = args["title"]
            .as_str()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Tool("task title cannot be empty".to_string()))?;

        let priority = parse_priority(&args)?.unwrap_or_else(|| infer_priority(title));
        let due_date = parse_due_date(&args)?;
        let tags = parse_tags(&args)?;
        let description = args["description"]
            .as_str()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string);

        let task = self.store.create(
            context.tenant_id,
            NewTask {
                title: title.to_string(),
                description,
                due_date,
                priority: Some(priority),
                tags,
            },
        )?;

        info!("created task {} for tenant {}", task.id, context.tenant_id);
        Ok(json!({
            "success": true,
            "task_id": task.id,
            "task": task_to_json(&task),
        }))
    }
}

// ---------------------------------------------------------------------------
// ListTasks
// ---------------------------------------------------------------------------

struct ListTasks {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl Tool for ListTasks {
    fn name(&self) -> &'static str {
        "list_tasks"
    }

    fn description(&self) -> &'static str {
        "List the user's tasks, optionally filtered by status (all, pending, \
         completed), priority, or tag."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["all", "pending", "completed"],
                    "description": "Which tasks to include (default all)"
                },
                "priority": {
                    "type": "string",
                    "enum": ["Low", "Medium", "High"]
                },
                "tag": {
                    "type": "string",
                    "description": "Only tasks carrying this tag"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of tasks to return (default 50)"
                }
            }
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<Value> {
        let completed = match args["status"].as_str() {
            None | Some("all") => None,
            Some("pending") => Some(false),
            Some("completed") => Some(true),
            Some(other) => {
                return Err(Error::Tool(format!(
                    "invalid status '{other}': must be all, pending, or completed"
                )));
            }
        };

        let filter = TaskFilter {
            completed,
            priority: parse_priority(&args)?,
            tag: args["tag"].as_str().map(str::to_string),
            limit: Some(
                args["limit"]
                    .as_u64()
                    .map(|l| l as usize)
                    .unwrap_or(DEFAULT_LIST_LIMIT),
            ),
        };

        let tasks = self.store.list(context.tenant_id, &filter)?;
        Ok(json!({
            "success": true,
            "count": tasks.len(),
            "tasks": tasks.iter().map(task_to_json).collect::<Vec<_>>(),
        }))
    }
}

// ---------------------------------------------------------------------------
// CompleteTask
// ---------------------------------------------------------------------------

struct CompleteTask {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl Tool for CompleteTask {
    fn name(&self) -> &'static str {
        "complete_task"
    }

    fn description(&self) -> &'static str {
        "Mark a task as complete (or incomplete, with completed=false)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "integer",
                    "description": "Id of the task to update"
                },
                "completed": {
                    "type": "boolean",
                    "description": "Defaults to true"
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<Value> {
        let task_id = require_task_id(&args)?;
        let completed = args["completed"].as_bool().unwrap_or(true);

        match self.store.set_completed(context.tenant_id, task_id, completed)? {
            Some(task) => Ok(json!({
                "success": true,
                "task": task_to_json(&task),
            })),
            None => Ok(json!({
                "success": false,
                "error": format!("task {task_id} not found"),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateTask
// ---------------------------------------------------------------------------

struct UpdateTask {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl Tool for UpdateTask {
    fn name(&self) -> &'static str {
        "update_task"
    }

    fn description(&self) -> &'static str {
        "Modify a task's title, description, due date, priority, or tags. \
         Only the provided fields change."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "integer",
                    "description": "Id of the task to modify"
                },
                "title": {"type": "string"},
                "description": {"type": "string"},
                "due_date": {
                    "type": "string",
                    "description": "Due date in YYYY-MM-DD format"
                },
                "priority": {
                    "type": "string",
                    "enum": ["Low", "Medium", "High"]
                },
                "tags": {
                    "type": "array",
                    "items": {"type": "string"}
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<Value> {
        let task_id = require_task_id(&args)?;

        let title = match args["title"].as_str() {
            Some(t) if t.trim().is_empty() => {
                return Err(Error::Tool("task title cannot be empty".to_string()));
            }
            Some(t) => Some(t.trim().to_string()),
            None => None,
        };

        let patch = TaskPatch {
            title,
            description: args["description"].as_str().map(str::to_string),
            due_date: parse_due_date(&args)?,
            priority: parse_priority(&args)?,
            tags: if args["tags"].is_null() {
                None
            } else {
                Some(parse_tags(&args)?)
            },
        };

        if patch.title.is_none()
            && patch.description.is_none()
            && patch.due_date.is_none()
            && patch.priority.is_none()
            && patch.tags.is_none()
        {
            return Err(Error::Tool(
                "update_task requires at least one field to change".to_string(),
            ));
        }

        match self.store.update(context.tenant_id, task_id, patch)? {
            Some(task) => Ok(json!({
                "success": true,
                "task": task_to_json(&task),
            })),
            None => Ok(json!({
                "success": false,
                "error": format!("task {task_id} not found"),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// DeleteTask
// ---------------------------------------------------------------------------

struct DeleteTask {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl Tool for DeleteTask {
    fn name(&self) -> &'static str {
        "delete_task"
    }

    fn description(&self) -> &'static str {
        "Delete a task permanently. Confirm with the user before calling this."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "integer",
                    "description": "Id of the task to delete"
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, context: &ToolContext, args: Value) -> Result<Value> {
        let task_id = require_task_id(&args)?;

        if self.store.delete(context.tenant_id, task_id)? {
            info!("deleted task {task_id} for tenant {}", context.tenant_id);
            Ok(json!({"success": true, "task_id": task_id}))
        } else {
            Ok(json!({
                "success": false,
                "error": format!("task {task_id} not found"),
            }))
        }
    }
}
