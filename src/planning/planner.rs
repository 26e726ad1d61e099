//! Planner：把用户请求拆成有序的步骤列表

use std::sync::{Arc, OnceLock};

use chrono::{Local, NaiveDate};
use regex::Regex;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::planning::prompts;

static NUMBERED_LINE_RE: OnceLock<Regex> = OnceLock::new();

fn numbered_line() -> &'static Regex {
    NUMBERED_LINE_RE.get_or_init(|| {
        Regex::new(r"^\s*(?:[-*]\s*)?(?:\*\*)?\d+\s*[.)]\s*(?:\*\*)?\s*(.+?)\s*$").unwrap()
    })
}

/// 解析带编号的步骤；没有编号行时返回空列表
pub fn parse_numbered_steps(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| numbered_line().captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_matches('*').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    today: Option<NaiveDate>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, today: None }
    }

    /// 固定提示中的日期（测试用）
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// 生成计划；LLM 失败时返回 Err，由编排层按空计划处理
    pub async fn plan(&self, request: &str, context: &str) -> Result<Vec<String>, AgentError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(AgentError::EmptyInput);
        }
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let messages = vec![
            Message::system(prompts::planner_system(today)),
            Message::user(prompts::planner_user(request, context)),
        ];
        let reply = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;
        tracing::debug!(reply = %reply, "planner reply");
        let steps = parse_numbered_steps(&reply);
        tracing::info!(steps = steps.len(), "plan generated");
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{FnLlmClient, MockLlmClient};

    #[test]
    fn test_parse_numbered_steps_variants() {
        let text = "Here is the plan:\n1. Get the weather in Madrid\n2) Give clothing advice\n**3.** Create task: buy umbrella\n\nThanks";
        assert_eq!(
            parse_numbered_steps(text),
            vec![
                "Get the weather in Madrid",
                "Give clothing advice",
                "Create task: buy umbrella"
            ]
        );
        assert!(parse_numbered_steps("Nothing to do.").is_empty());
    }

    #[tokio::test]
    async fn test_plan_calls_llm_with_date() {
        let llm = FnLlmClient::new(|messages| {
            assert!(messages[0].content.starts_with(prompts::PLANNER_HEADER));
            assert!(messages[0].content.contains("2025-03-10"));
            Ok("1. Get the current weather in Madrid".to_string())
        });
        let planner = Planner::new(Arc::new(llm))
            .with_today(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        let steps = planner.plan("What's the weather in Madrid?", "").await.unwrap();
        assert_eq!(steps, vec!["Get the current weather in Madrid"]);
    }

    #[tokio::test]
    async fn test_plan_errors() {
        let planner = Planner::new(Arc::new(MockLlmClient));
        assert!(matches!(planner.plan("  ", "").await, Err(AgentError::EmptyInput)));
        assert!(matches!(planner.plan("hola", "").await, Err(AgentError::LlmError(_))));
    }
}
