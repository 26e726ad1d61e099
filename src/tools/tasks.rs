//! 待办能力工具集（JSON 文件中的单一任务列表）
//!
//! 标题在顶层任务中按不区分大小写匹配；重名创建时追加 " (n)" 后缀。

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::tools::json_store::JsonStore;
use crate::tools::{optional_bool, optional_str, required_str, Tool, ToolRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub subtasks: Vec<TaskItem>,
    pub created_at: DateTime<Local>,
}

impl TaskItem {
    fn new(title: &str) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            title: title.trim().to_string(),
            notes: None,
            due: None,
            completed: false,
            subtasks: Vec::new(),
            created_at: Local::now(),
        }
    }

    fn render(&self, indent: &str) -> String {
        let mark = if self.completed { "x" } else { " " };
        let mut line = format!("{}- [{}] {}", indent, mark, self.title);
        if let Some(ref due) = self.due {
            line.push_str(&format!(" (due {})", due));
        }
        if let Some(ref notes) = self.notes {
            line.push_str(&format!(" - {}", notes));
        }
        for sub in &self.subtasks {
            line.push('\n');
            line.push_str(&sub.render(&format!("{}  ", indent)));
        }
        line
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    pub tasks: Vec<TaskItem>,
}

impl TaskList {
    fn position(&self, title: &str) -> Option<usize> {
        let wanted = title.trim().to_lowercase();
        self.tasks
            .iter()
            .position(|t| t.title.to_lowercase() == wanted)
    }

    fn find_mut(&mut self, title: &str) -> Result<&mut TaskItem, String> {
        let idx = self
            .position(title)
            .ok_or_else(|| format!("Task '{}' not found", title.trim()))?;
        Ok(&mut self.tasks[idx])
    }

    /// 重名时依次尝试 "title (1)"、"title (2)" ...
    fn unique_title(&self, title: &str) -> String {
        let title = title.trim();
        if self.position(title).is_none() {
            return title.to_string();
        }
        (1..)
            .map(|n| format!("{} ({})", title, n))
            .find(|candidate| self.position(candidate).is_none())
            .unwrap_or_else(|| title.to_string())
    }
}

pub type TaskStore = JsonStore<TaskList>;

pub struct CreateTaskTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for CreateTaskTool {
    fn name(&self) -> &str {
        "create_task"
    }

    fn description(&self) -> &str {
        "Create a to-do task. Args: {\"title\": \"task title\", \"notes\": \"optional\", \"due\": \"optional YYYY-MM-DD\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "notes": {"type": "string"},
                "due": {"type": "string"}
            },
            "required": ["title"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let title = required_str(&args, "title")?;
        let notes = optional_str(&args, "notes").map(String::from);
        let due = optional_str(&args, "due").map(String::from);
        tracing::info!(title = %title, "create_task tool execute");
        self.store.update(|list| {
            let mut task = TaskItem::new(&list.unique_title(title));
            task.notes = notes;
            task.due = due;
            let msg = format!("✅ Task '{}' created successfully (id: {}).", task.title, task.id);
            list.tasks.push(task);
            Ok(msg)
        })
    }
}

pub struct ListTasksTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for ListTasksTool {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List pending tasks. Args: {\"show_completed\": false}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let show_completed = optional_bool(&args, "show_completed").unwrap_or(false);
        Ok(self.store.read(|list| {
            let lines: Vec<String> = list
                .tasks
                .iter()
                .filter(|t| show_completed || !t.completed)
                .map(|t| t.render(""))
                .collect();
            if lines.is_empty() {
                "You have no pending tasks.".to_string()
            } else {
                format!("Tasks:\n{}", lines.join("\n"))
            }
        }))
    }
}

pub struct CompleteTaskTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for CompleteTaskTool {
    fn name(&self) -> &str {
        "complete_task"
    }

    fn description(&self) -> &str {
        "Mark a task as completed. Args: {\"title\": \"exact task title\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let title = required_str(&args, "title")?;
        self.store.update(|list| {
            let task = list.find_mut(title)?;
            task.completed = true;
            Ok(format!("✅ Task '{}' marked as completed successfully.", task.title))
        })
    }
}

pub struct DeleteTaskTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for DeleteTaskTool {
    fn name(&self) -> &str {
        "delete_task"
    }

    fn description(&self) -> &str {
        "Delete a task. Args: {\"title\": \"exact task title\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let title = required_str(&args, "title")?;
        self.store.update(|list| {
            let idx = list
                .position(title)
                .ok_or_else(|| format!("Task '{}' not found", title.trim()))?;
            let removed = list.tasks.remove(idx);
            Ok(format!("✅ Task '{}' deleted successfully.", removed.title))
        })
    }
}

pub struct EditTaskTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for EditTaskTool {
    fn name(&self) -> &str {
        "edit_task"
    }

    fn description(&self) -> &str {
        "Edit a task. Args: {\"title\": \"current title\", \"new_title\": \"optional\", \"notes\": \"optional\", \"due\": \"optional\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let title = required_str(&args, "title")?;
        let new_title = optional_str(&args, "new_title");
        let notes = optional_str(&args, "notes");
        let due = optional_str(&args, "due");
        if new_title.is_none() && notes.is_none() && due.is_none() {
            return Err("No new title, notes or due date given".to_string());
        }
        self.store.update(|list| {
            let task = list.find_mut(title)?;
            if let Some(t) = new_title {
                task.title = t.trim().to_string();
            }
            if let Some(n) = notes {
                task.notes = Some(n.to_string());
            }
            if let Some(d) = due {
                task.due = Some(d.to_string());
            }
            Ok(format!("✅ Task '{}' updated successfully.", task.title))
        })
    }
}

pub struct SearchTasksTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for SearchTasksTool {
    fn name(&self) -> &str {
        "search_tasks"
    }

    fn description(&self) -> &str {
        "Search tasks whose title or notes contain a keyword. Args: {\"keyword\": \"text\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let keyword = required_str(&args, "keyword")?.to_lowercase();
        Ok(self.store.read(|list| {
            let hits: Vec<String> = list
                .tasks
                .iter()
                .filter(|t| {
                    t.title.to_lowercase().contains(&keyword)
                        || t
                            .notes
                            .as_deref()
                            .map(|n| n.to_lowercase().contains(&keyword))
                            .unwrap_or(false)
                })
                .map(|t| t.render(""))
                .collect();
            if hits.is_empty() {
                format!("No tasks found containing '{}'.", keyword)
            } else {
                format!("Tasks containing '{}':\n{}", keyword, hits.join("\n"))
            }
        }))
    }
}

pub struct AddSubtaskTool {
    store: Arc<TaskStore>,
}

#[async_trait]
impl Tool for AddSubtaskTool {
    fn name(&self) -> &str {
        "add_subtask"
    }

    fn description(&self) -> &str {
        "Add a subtask under an existing task. Args: {\"parent_title\": \"parent task title\", \"title\": \"subtask title\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let parent = required_str(&args, "parent_title")?;
        let title = required_str(&args, "title")?;
        self.store.update(|list| {
            let task = list.find_mut(parent)?;
            task.subtasks.push(TaskItem::new(title));
            Ok(format!(
                "✅ Subtask '{}' created successfully under '{}'.",
                title.trim(),
                task.title
            ))
        })
    }
}

/// 待办能力的完整工具集
pub fn task_tools(data_file: Option<PathBuf>) -> ToolRegistry {
    let store = Arc::new(TaskStore::open(data_file));
    let mut registry = ToolRegistry::new();
    registry.register(CreateTaskTool { store: store.clone() });
    registry.register(ListTasksTool { store: store.clone() });
    registry.register(CompleteTaskTool { store: store.clone() });
    registry.register(DeleteTaskTool { store: store.clone() });
    registry.register(EditTaskTool { store: store.clone() });
    registry.register(SearchTasksTool { store: store.clone() });
    registry.register(AddSubtaskTool { store });
    registry
}
