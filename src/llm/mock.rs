//! 离线与测试用 LLM 客户端（无需 API）
//!
//! - MockLlmClient：每次调用都失败，各组件走确定性的降级路径（关键词路由、原样回复等）。
//! - FnLlmClient：由闭包决定回复，测试中按系统提示分派脚本化输出。

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;

/// 离线客户端：没有可用后端时使用
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
        Err("no language model configured (offline mode)".to_string())
    }
}

type ReplyFn = dyn Fn(&[Message]) -> Result<String, String> + Send + Sync;

/// 闭包驱动的客户端
pub struct FnLlmClient {
    reply: Box<ReplyFn>,
}

impl FnLlmClient {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&[Message]) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
        }
    }

    /// 按 system 消息前缀分派：返回第一个匹配前缀的回复，都不匹配时返回错误
    pub fn by_system_prefix(routes: Vec<(&'static str, String)>) -> Self {
        Self::new(move |messages| {
            let system = messages
                .iter()
                .find(|m| matches!(m.role, crate::memory::Role::System))
                .map(|m| m.content.as_str())
                .unwrap_or("");
            routes
                .iter()
                .find(|(prefix, _)| system.starts_with(prefix))
                .map(|(_, reply)| reply.clone())
                .ok_or_else(|| "no scripted reply".to_string())
        })
    }
}

impl std::fmt::Debug for FnLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnLlmClient").finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmClient for FnLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        (self.reply)(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_always_fails() {
        let llm = MockLlmClient;
        assert!(llm.complete(&[Message::user("hi")]).await.is_err());
    }

    #[tokio::test]
    async fn test_fn_client_dispatches_on_system_prefix() {
        let llm = FnLlmClient::by_system_prefix(vec![
            ("You are a router", "weather".to_string()),
            ("You are the planning module", "1. Check weather".to_string()),
        ]);
        let out = llm
            .complete(&[Message::system("You are a router."), Message::user("x")])
            .await
            .unwrap();
        assert_eq!(out, "weather");
        assert!(llm
            .complete(&[Message::system("Something else"), Message::user("x")])
            .await
            .is_err());
    }
}
