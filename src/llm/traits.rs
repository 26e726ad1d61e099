//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock / 测试脚本）实现 LlmClient。
//! 编排各组件通过 `Arc<dyn LlmClient>` 注入，不依赖全局实例。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：一次非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成；错误以文本返回，由调用方决定降级路径
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
