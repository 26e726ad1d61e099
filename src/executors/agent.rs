//! ToolAgent：单个能力的有界工具调用循环
//!
//! LLM -> 解析输出 -> ToolCall 则执行并把 Observation 写回 -> 纯文本则结束。
//! 上限：max_iterations 次 LLM 调用、timeout 总时长；触顶时返回目前最好的部分结果。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};

use crate::core::{AgentError, RecoveryAction, RecoveryEngine};
use crate::executors::{system_instructions, Capability, Executor, StepOutcome};
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::ToolExecutor;

const DEFAULT_MAX_ITERATIONS: usize = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// 日志中 Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// LLM 返回的 Tool Call（简化 JSON：{"tool": "get_weather", "args": {"location": "..."}}）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 执行器中 LLM 的一次输出
#[derive(Debug, Clone)]
pub enum AgentOutput {
    /// 纯文本：结束本次执行
    Answer(String),
    /// 需要执行工具
    ToolCall(ToolCall),
}

/// 解析 LLM 输出：若含有效 JSON 且 tool 非空则为 ToolCall，否则为 Answer
pub fn parse_agent_output(output: &str) -> Result<AgentOutput, AgentError> {
    let trimmed = output.trim();

    // 尝试提取 JSON 块（```json ... ``` 或纯 JSON）
    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            &trimmed[start..=end]
        } else {
            return Ok(AgentOutput::Answer(trimmed.to_string()));
        }
    } else {
        return Ok(AgentOutput::Answer(trimmed.to_string()));
    };

    // 不像 tool call 的 JSON（例如回答里带了一段数据）按文本处理
    if !json_str.contains("\"tool\"") {
        return Ok(AgentOutput::Answer(trimmed.to_string()));
    }

    let parsed: ToolCall = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if parsed.tool.trim().is_empty() {
        Ok(AgentOutput::Answer(trimmed.to_string()))
    } else {
        Ok(AgentOutput::ToolCall(parsed))
    }
}

/// 有界工具调用智能体：持有 LLM、只含本能力工具的执行器与恢复引擎
pub struct ToolAgent {
    capability: Capability,
    llm: Arc<dyn LlmClient>,
    tools: ToolExecutor,
    recovery: RecoveryEngine,
    max_iterations: usize,
    timeout: Duration,
    contact_domain: String,
}

impl ToolAgent {
    pub fn new(capability: Capability, llm: Arc<dyn LlmClient>, tools: ToolExecutor) -> Self {
        Self {
            capability,
            llm,
            tools,
            recovery: RecoveryEngine::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            contact_domain: "udesa.edu.ar".to_string(),
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, timeout: Duration) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.timeout = timeout;
        self
    }

    pub fn with_contact_domain(mut self, domain: &str) -> Self {
        self.contact_domain = domain.to_string();
        self
    }

    fn instructions(&self) -> String {
        system_instructions(
            self.capability,
            self.tools.registry(),
            Local::now().date_naive(),
            &self.contact_domain,
        )
    }

    async fn run(&self, task: &str) -> StepOutcome {
        let deadline = Instant::now() + self.timeout;
        let tool_names = self.tools.tool_names();
        let mut messages = vec![Message::system(self.instructions()), Message::user(task)];
        // 最近一次工具调用的结果（成功与否 + 文本），用作触顶时的部分结果
        let mut last_tool: Option<StepOutcome> = None;

        for iteration in 0..self.max_iterations {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let reply = match timeout(remaining, self.llm.complete(&messages)).await {
                Err(_) => return self.partial(last_tool, "time limit reached"),
                Ok(Err(e)) => {
                    let err = AgentError::LlmError(e);
                    tracing::warn!(capability = %self.capability, error = %err, "executor LLM call failed");
                    if let RecoveryAction::Abort = self.recovery.handle(&err, &tool_names) {
                        return self.partial(last_tool, &err.to_string());
                    }
                    continue;
                }
                Ok(Ok(r)) => r,
            };

            match parse_agent_output(&reply) {
                Ok(AgentOutput::Answer(text)) => return self.finish(text, last_tool),
                Ok(AgentOutput::ToolCall(call)) => {
                    tracing::info!(
                        capability = %self.capability,
                        iteration,
                        tool = %call.tool,
                        "executor tool call"
                    );
                    messages.push(Message::assistant(reply.clone()));
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let result = match timeout(remaining, self.tools.execute(&call.tool, call.args)).await {
                        Err(_) => return self.partial(last_tool, "time limit reached"),
                        Ok(r) => r,
                    };
                    match result {
                        Ok(observation) => {
                            tracing::debug!(
                                preview = %preview(&observation),
                                "executor observation"
                            );
                            messages.push(Message::user(format!("Observation: {}", observation)));
                            last_tool = Some(StepOutcome::ok(observation));
                        }
                        Err(e) => match self.recovery.handle(&e, &tool_names) {
                            RecoveryAction::Observe(obs) => {
                                messages.push(Message::user(format!("Observation: {}", obs)));
                                last_tool = Some(StepOutcome::failed(obs));
                            }
                            RecoveryAction::RetryWithPrompt(prompt) => {
                                messages.push(Message::user(prompt));
                            }
                            RecoveryAction::Abort => {
                                return self.partial(Some(StepOutcome::failed(e.to_string())), "aborted");
                            }
                        },
                    }
                }
                Err(e) => {
                    tracing::warn!(capability = %self.capability, error = %e, "executor output unparsable");
                    match self.recovery.handle(&e, &tool_names) {
                        RecoveryAction::RetryWithPrompt(prompt) | RecoveryAction::Observe(prompt) => {
                            messages.push(Message::assistant(reply));
                            messages.push(Message::user(prompt));
                        }
                        RecoveryAction::Abort => return self.partial(last_tool, &e.to_string()),
                    }
                }
            }
        }
        self.partial(last_tool, "iteration limit reached")
    }

    /// LLM 给出最终文本：成功与否取决于最后一次工具调用
    fn finish(&self, text: String, last_tool: Option<StepOutcome>) -> StepOutcome {
        match last_tool {
            Some(last) if !last.success => StepOutcome::failed(if text.is_empty() { last.message } else { text }),
            Some(last) if text.is_empty() => last,
            _ if text.is_empty() => StepOutcome::failed(format!("the {} agent returned no answer", self.capability)),
            _ if text.trim_start().starts_with("Error") => StepOutcome::failed(text),
            _ => StepOutcome::ok(text),
        }
    }

    /// 触顶或中止：返回最近一次工具结果，没有则返回带原因的失败
    fn partial(&self, last_tool: Option<StepOutcome>, reason: &str) -> StepOutcome {
        tracing::warn!(capability = %self.capability, reason = %reason, "executor stopped early");
        match last_tool {
            Some(last) => last,
            None => StepOutcome::failed(format!(
                "the {} agent could not complete the task ({})",
                self.capability, reason
            )),
        }
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

#[async_trait]
impl Executor for ToolAgent {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn execute(&self, task: &str) -> StepOutcome {
        let outcome = self.run(task).await;
        tracing::info!(
            capability = %self.capability,
            success = outcome.success,
            "executor finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::llm::{FnLlmClient, MockLlmClient};
    use crate::tools::task_tools;

    fn tasks_agent(llm: Arc<dyn LlmClient>) -> ToolAgent {
        ToolAgent::new(Capability::Tasks, llm, ToolExecutor::new(task_tools(None), 5))
    }

    /// 按调用次序依次返回脚本化回复，用完后重复最后一条
    fn scripted(replies: Vec<&'static str>) -> Arc<dyn LlmClient> {
        let counter = AtomicUsize::new(0);
        Arc::new(FnLlmClient::new(move |_| {
            let i = counter.fetch_add(1, Ordering::SeqCst);
            Ok(replies[i.min(replies.len() - 1)].to_string())
        }))
    }

    #[test]
    fn test_parse_tool_call_and_answer() {
        match parse_agent_output(r#"{"tool": "list_tasks", "args": {}}"#).unwrap() {
            AgentOutput::ToolCall(c) => assert_eq!(c.tool, "list_tasks"),
            other => panic!("expected tool call, got {:?}", other),
        }
        match parse_agent_output("```json\n{\"tool\": \"get_weather\", \"args\": {\"location\": \"Madrid\"}}\n```").unwrap() {
            AgentOutput::ToolCall(c) => assert_eq!(c.args["location"], "Madrid"),
            other => panic!("expected tool call, got {:?}", other),
        }
        assert!(matches!(
            parse_agent_output("All done.").unwrap(),
            AgentOutput::Answer(_)
        ));
        assert!(matches!(
            parse_agent_output(r#"{"tool": "x", "args": "#),
            Err(AgentError::JsonParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_multi_call_then_answer() {
        let llm = scripted(vec![
            r#"{"tool": "create_task", "args": {"title": "A"}}"#,
            r#"{"tool": "create_task", "args": {"title": "B"}}"#,
            "Created tasks A and B.",
        ]);
        let out = tasks_agent(llm).execute("create tasks A and B").await;
        assert!(out.success);
        assert_eq!(out.message, "Created tasks A and B.");
    }

    #[tokio::test]
    async fn test_failing_tool_yields_error_outcome() {
        let llm = scripted(vec![
            r#"{"tool": "complete_task", "args": {"title": "ghost"}}"#,
            "I could not find that task.",
        ]);
        let out = tasks_agent(llm).execute("complete ghost").await;
        assert!(!out.success);
        assert!(out.message.contains("Error:"));
    }

    #[tokio::test]
    async fn test_iteration_ceiling_returns_partial() {
        let llm = scripted(vec![r#"{"tool": "list_tasks", "args": {}}"#]);
        let out = tasks_agent(llm)
            .with_limits(3, Duration::from_secs(5))
            .execute("loop forever")
            .await;
        assert!(out.success);
        assert_eq!(out.message, "You have no pending tasks.");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_observed_not_fatal() {
        let llm = scripted(vec![
            r#"{"tool": "teleport", "args": {}}"#,
            r#"{"tool": "create_task", "args": {"title": "A"}}"#,
            "Done.",
        ]);
        let out = tasks_agent(llm).execute("create A").await;
        assert!(out.success);
    }

    #[tokio::test]
    async fn test_offline_llm_fails_cleanly() {
        let out = tasks_agent(Arc::new(MockLlmClient)).execute("list").await;
        assert!(!out.success);
        assert!(out.message.starts_with("Error:"));
    }
}
