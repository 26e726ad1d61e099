//! 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：执行器循环内根据 AgentError 决定 RetryWithPrompt / Observe / Abort。
//! 编排层从不向传输层抛出错误，所有错误最终都被文本化。

use thiserror::Error;

/// 运行过程中可能出现的错误（输入、LLM、解析、工具、路径逃逸）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Empty input")]
    EmptyInput,

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("Path escape attempt: {0}")]
    PathEscape(String),
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让 LLM 重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 将错误作为 Observation 反馈给 LLM，由其决定换工具或收尾
    Observe(String),
    /// 终止当前执行，返回已有的部分结果
    Abort,
}
