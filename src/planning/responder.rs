//! Responder：把最佳结果整理成最终回复，并写入会话记忆
//!
//! 每次调用都会追加一条 assistant 消息，无论 LLM 是否可用。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::{Message, Role, SessionMemory};
use crate::planning::prompts;

/// LLM 不可用且没有结果时的回复
pub const NO_INFORMATION: &str = "No information could be obtained.";

/// 只收明确的成功短语；"sent"、"created" 之类的裸词会出现在普通数据里
const SUCCESS_MARKERS: &[&str] = &[
    "successfully", "succeeded", "exitosamente", "correctamente", "✅",
];

fn has_success_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    SUCCESS_MARKERS.iter().any(|m| lower.contains(m))
}

/// 结果含成功标记时只保留带标记的行
pub fn preprocess_result(best_result: &str) -> String {
    let trimmed = best_result.trim();
    if !has_success_marker(trimmed) {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .filter(|line| has_success_marker(line))
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Responder {
    llm: Arc<dyn LlmClient>,
    memory: Arc<SessionMemory>,
    context_messages: usize,
}

impl Responder {
    pub fn new(llm: Arc<dyn LlmClient>, memory: Arc<SessionMemory>, context_messages: usize) -> Self {
        Self {
            llm,
            memory,
            context_messages,
        }
    }

    /// 生成最终回复；steps 为步骤历史摘要
    pub async fn respond(&self, session_id: &str, query: &str, best_result: &str, steps: &str) -> String {
        let tool_result = preprocess_result(best_result);
        let context = self.memory.context_summary(session_id, self.context_messages);
        let messages = vec![
            Message::system(prompts::responder_system()),
            Message::user(prompts::responder_user(query, &tool_result, steps, &context)),
        ];

        let response = match self.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("responder LLM returned empty text, using tool result");
                fallback(&tool_result)
            }
            Err(e) => {
                tracing::warn!(error = %e, "responder LLM failed, using tool result");
                fallback(&tool_result)
            }
        };

        self.memory.append(session_id, Role::Assistant, response.clone());
        response
    }
}

fn fallback(tool_result: &str) -> String {
    if tool_result.trim().is_empty() {
        NO_INFORMATION.to_string()
    } else {
        tool_result.to_string()
    }
}
