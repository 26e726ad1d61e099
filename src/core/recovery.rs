//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供能力执行器的工具调用循环决定是重试、反馈观察还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（重试提示 / 反馈观察 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 根据错误类型返回建议的恢复动作；tools 为当前执行器可用的工具名，用于提示 LLM
    pub fn handle(&self, err: &AgentError, tools: &[String]) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not valid tool-call JSON: {raw}. \
                To call a tool, output exactly one JSON object and nothing else: \
                {{\"tool\": \"tool_name\", \"args\": {{...}}}}. \
                To finish, answer in plain text without JSON."
            )),
            AgentError::HallucinatedTool(name) => RecoveryAction::Observe(format!(
                "Error: tool '{name}' does not exist. Available tools: {}",
                tools.join(", ")
            )),
            AgentError::ToolTimeout(name) => {
                RecoveryAction::Observe(format!("Error: tool '{name}' timed out"))
            }
            AgentError::ToolExecutionFailed(msg) | AgentError::PathEscape(msg) => {
                RecoveryAction::Observe(format!("Error: {msg}"))
            }
            AgentError::LlmError(_) | AgentError::EmptyInput => RecoveryAction::Abort,
        }
    }
}
