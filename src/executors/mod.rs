//! 能力执行器：天气 / 待办 / 文件 / 消息 / 日程
//!
//! 每个执行器是一个只看得到自身工具集的有界工具调用智能体（ToolAgent）。
//! execute 永不失败：所有错误都折叠进 StepOutcome { success: false, message: "Error: ..." }。

pub mod agent;
pub mod instructions;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::llm::LlmClient;
use crate::tools::{calendar_tools, file_tools, messaging_tools, task_tools, weather_tools, MailIdentity, ToolExecutor};

pub use agent::{parse_agent_output, AgentOutput, ToolAgent, ToolCall};
pub use instructions::system_instructions;

/// 失败结果中的错误标记
pub const ERROR_MARKER: &str = "Error:";

/// 能力名（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Weather,
    Tasks,
    Files,
    Messaging,
    Scheduling,
}

impl Capability {
    /// 关键词回退时的优先级顺序
    pub const ALL: [Capability; 5] = [
        Capability::Weather,
        Capability::Tasks,
        Capability::Files,
        Capability::Messaging,
        Capability::Scheduling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Weather => "weather",
            Capability::Tasks => "tasks",
            Capability::Files => "files",
            Capability::Messaging => "messaging",
            Capability::Scheduling => "scheduling",
        }
    }

    /// 解析能力名，接受常见别名（LLM 有时会回答后端名，如 gmail / calendar）
    pub fn parse(name: &str) -> Option<Self> {
        let name = name
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        match name.as_str() {
            "weather" | "clima" => Some(Capability::Weather),
            "tasks" | "task" | "todo" | "tareas" => Some(Capability::Tasks),
            "files" | "file" | "drive" | "storage" => Some(Capability::Files),
            "messaging" | "email" | "gmail" | "mail" => Some(Capability::Messaging),
            "scheduling" | "calendar" | "schedule" => Some(Capability::Scheduling),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 执行器返回的结构化结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub success: bool,
    pub message: String,
}

impl StepOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// 失败结果：消息中保证带有 `Error:` 标记
    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.contains(ERROR_MARKER) {
            message
        } else {
            format!("{} {}", ERROR_MARKER, message)
        };
        Self {
            success: false,
            message,
        }
    }
}

/// 能力执行器 trait：给定任务文本，返回结构化结果，永不返回 Err
#[async_trait]
pub trait Executor: Send + Sync {
    fn capability(&self) -> Capability;

    async fn execute(&self, task: &str) -> StepOutcome;
}

/// 按能力索引的执行器集合
#[derive(Clone, Default)]
pub struct ExecutorSet {
    executors: HashMap<Capability, Arc<dyn Executor>>,
}

impl ExecutorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, executor: Arc<dyn Executor>) {
        self.executors.insert(executor.capability(), executor);
    }

    pub fn with(mut self, executor: Arc<dyn Executor>) -> Self {
        self.insert(executor);
        self
    }

    pub fn get(&self, capability: Capability) -> Option<Arc<dyn Executor>> {
        self.executors.get(&capability).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// 按配置构建五个 ToolAgent，共用同一个 LLM 客户端
    pub fn from_config(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let workspace = cfg.workspace();
        let data_file = |configured: &Option<std::path::PathBuf>, default: &str| {
            Some(configured.clone().unwrap_or_else(|| workspace.join(default)))
        };
        let files_root = cfg
            .tools
            .files_root
            .clone()
            .unwrap_or_else(|| workspace.join("files"));
        let identity = MailIdentity {
            sender: cfg.tools.messaging.sender.clone(),
            contact_domain: cfg.tools.messaging.contact_domain.clone(),
        };
        let tool_timeout = cfg.tools.tool_timeout_secs;

        let registries = [
            (Capability::Weather, weather_tools(&cfg.tools.weather)),
            (
                Capability::Tasks,
                task_tools(data_file(&cfg.tools.tasks.data_file, "tasks.json")),
            ),
            (Capability::Files, file_tools(files_root)),
            (
                Capability::Messaging,
                messaging_tools(data_file(&cfg.tools.messaging.data_file, "mailbox.json"), identity),
            ),
            (
                Capability::Scheduling,
                calendar_tools(data_file(&cfg.tools.calendar.data_file, "calendar.json")),
            ),
        ];

        let mut set = Self::new();
        for (capability, registry) in registries {
            let agent = ToolAgent::new(
                capability,
                llm.clone(),
                ToolExecutor::new(registry, tool_timeout),
            )
            .with_limits(
                cfg.executor.max_iterations,
                Duration::from_secs(cfg.executor.timeout_secs),
            )
            .with_contact_domain(&cfg.tools.messaging.contact_domain);
            set.insert(Arc::new(agent));
        }
        tracing::info!(executors = set.len(), "capability executors ready");
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parse_accepts_aliases() {
        assert_eq!(Capability::parse("weather"), Some(Capability::Weather));
        assert_eq!(Capability::parse(" Scheduling."), Some(Capability::Scheduling));
        assert_eq!(Capability::parse("gmail"), Some(Capability::Messaging));
        assert_eq!(Capability::parse("banking"), None);
    }

    #[test]
    fn test_failed_outcome_always_marked() {
        let out = StepOutcome::failed("backend down");
        assert!(!out.success);
        assert_eq!(out.message, "Error: backend down");
        let already = StepOutcome::failed("❌ Error: timeout");
        assert_eq!(already.message, "❌ Error: timeout");
    }
}
