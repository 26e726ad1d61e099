//! Replanner：根据已执行步骤决定结束还是补充步骤

use std::sync::Arc;

use crate::core::state::step_key;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::planning::planner::parse_numbered_steps;
use crate::planning::prompts;

const FINAL_MARKERS: &[&str] = &["FINAL ANSWER:", "RESPUESTA:"];
const PLAN_MARKER: &str = "PLAN:";

/// 重规划决策
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplanDecision {
    /// 直接给出最终答案
    FinalAnswer(String),
    /// 需要补充的步骤（尚未去重）
    NewSteps(Vec<String>),
    /// 回复没有可识别的标记，或 PLAN 下没有编号步骤
    Unparsable(String),
    /// LLM 调用失败
    Failed(String),
}

/// 按标记解析 replanner 的回复
pub fn parse_replan_reply(reply: &str) -> ReplanDecision {
    let trimmed = reply.trim();
    let upper = trimmed.to_uppercase();
    for marker in FINAL_MARKERS {
        if upper.starts_with(marker) {
            return ReplanDecision::FinalAnswer(trimmed.get(marker.len()..).unwrap_or("").trim().to_string());
        }
    }
    if upper.starts_with(PLAN_MARKER) {
        let steps = parse_numbered_steps(trimmed.get(PLAN_MARKER.len()..).unwrap_or(""));
        if steps.is_empty() {
            return ReplanDecision::Unparsable(trimmed.to_string());
        }
        return ReplanDecision::NewSteps(steps);
    }
    ReplanDecision::Unparsable(trimmed.to_string())
}

fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (step_key(a), step_key(b));
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// 丢弃与已成功步骤或待执行步骤重叠的新步骤（忽略大小写，双向子串），以及新步骤间的重复
pub fn filter_new_steps(new_steps: Vec<String>, succeeded: &[&str], pending: &[String]) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for step in new_steps {
        let dropped = succeeded.iter().any(|s| overlaps(&step, s))
            || pending.iter().any(|p| overlaps(&step, p))
            || kept.iter().any(|k| overlaps(&step, k));
        if dropped {
            tracing::debug!(step = %step, "replanned step dropped as duplicate");
        } else {
            kept.push(step);
        }
    }
    kept
}

pub struct Replanner {
    llm: Arc<dyn LlmClient>,
}

impl Replanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// input_with_context：上下文 + 当前请求；plan：剩余计划；past_steps：已执行步骤摘要
    pub async fn replan(&self, input_with_context: &str, plan: &str, past_steps: &str) -> ReplanDecision {
        let messages = vec![
            Message::system(prompts::replanner_system()),
            Message::user(prompts::replanner_user(
                input_with_context,
                if plan.is_empty() { "None" } else { plan },
                if past_steps.is_empty() { "None" } else { past_steps },
            )),
        ];
        match self.llm.complete(&messages).await {
            Ok(reply) => {
                tracing::debug!(reply = %reply, "replanner reply");
                parse_replan_reply(&reply)
            }
            Err(e) => {
                tracing::warn!(error = %e, "replanner LLM failed");
                ReplanDecision::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    #[test]
    fn test_parse_markers() {
        assert_eq!(
            parse_replan_reply("FINAL ANSWER: It is 21°C in Madrid."),
            ReplanDecision::FinalAnswer("It is 21°C in Madrid.".to_string())
        );
        assert_eq!(
            parse_replan_reply("RESPUESTA: listo"),
            ReplanDecision::FinalAnswer("listo".to_string())
        );
        assert_eq!(
            parse_replan_reply("PLAN:\n1. Send the report\n2. Create task: follow up"),
            ReplanDecision::NewSteps(vec!["Send the report".into(), "Create task: follow up".into()])
        );
        assert!(matches!(parse_replan_reply("PLAN: nothing"), ReplanDecision::Unparsable(_)));
        assert!(matches!(parse_replan_reply("Sure!"), ReplanDecision::Unparsable(_)));
    }

    #[test]
    fn test_filter_drops_succeeded_and_pending_overlaps() {
        let new_steps = vec![
            "Create task: buy milk".to_string(),
            "create task: buy milk today".to_string(),
            "Send email to Ana".to_string(),
            "Delete old files".to_string(),
            "Delete old files".to_string(),
        ];
        let kept = filter_new_steps(new_steps, &["Create task: Buy milk"], &["Send email to Ana".to_string()]);
        assert_eq!(kept, vec!["Delete old files".to_string()]);
    }

    #[tokio::test]
    async fn test_llm_failure_is_reported() {
        let replanner = Replanner::new(Arc::new(MockLlmClient));
        assert!(matches!(replanner.replan("x", "1. a", "").await, ReplanDecision::Failed(_)));
    }
}
