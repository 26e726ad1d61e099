//! 单轮编排状态
//!
//! OrchestrationState 只在一轮对话内存在，通过 session_id 引用会话；
//! 计划只由规划（安装）、执行（弹出）与重规划（插入）三处修改。

use serde::Serialize;

use crate::core::AgentError;
use crate::executors::Capability;

/// 步骤历史摘要中结果的最大字符数
const SUMMARY_RESULT_CHARS: usize = 200;

/// 状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Planning,
    Executing,
    Replanning,
    Done,
}

/// 一次步骤执行的记录；同一步骤文本多次尝试按位置区分
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: String,
    pub result: String,
    /// None 表示无法路由
    pub executor: Option<Capability>,
    pub success: bool,
}

impl StepResult {
    pub fn executor_name(&self) -> &'static str {
        self.executor.map(|c| c.as_str()).unwrap_or("unknown")
    }
}

/// 比较步骤文本时的规范形式
pub fn step_key(step: &str) -> String {
    step.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct OrchestrationState {
    pub input: String,
    pub session_id: String,
    plan: Vec<String>,
    history: Vec<StepResult>,
    response: Option<String>,
    phase: Phase,
}

impl OrchestrationState {
    /// 入口校验：输入与会话 ID 都不能为空
    pub fn new(input: &str, session_id: &str) -> Result<Self, AgentError> {
        let input = input.trim();
        if input.is_empty() || session_id.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        Ok(Self {
            input: input.to_string(),
            session_id: session_id.to_string(),
            plan: Vec::new(),
            history: Vec::new(),
            response: None,
            phase: Phase::Planning,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    pub fn history(&self) -> &[StepResult] {
        &self.history
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// 安装新计划，清空本轮已有的计划与历史
    pub fn install_plan(&mut self, steps: Vec<String>) {
        self.plan = steps;
        self.history.clear();
        self.response = None;
    }

    /// 弹出前 n 个待执行步骤
    pub fn take_steps(&mut self, n: usize) -> Vec<String> {
        let n = n.min(self.plan.len());
        self.plan.drain(..n).collect()
    }

    pub fn record(&mut self, result: StepResult) {
        self.history.push(result);
    }

    /// 重规划新增的步骤插到待执行计划前面
    pub fn prepend_steps(&mut self, steps: Vec<String>) {
        let mut plan = steps;
        plan.append(&mut self.plan);
        self.plan = plan;
    }

    pub fn finish(&mut self, response: String) {
        self.response = Some(response);
        self.phase = Phase::Done;
    }

    pub fn last_success(&self) -> Option<&StepResult> {
        self.history.iter().rev().find(|r| r.success)
    }

    /// 至少成功过一次的步骤文本
    pub fn successful_steps(&self) -> Vec<&str> {
        let mut steps: Vec<&str> = Vec::new();
        for r in self.history.iter().filter(|r| r.success) {
            if !steps.iter().any(|s| step_key(s) == step_key(&r.step)) {
                steps.push(&r.step);
            }
        }
        steps
    }

    /// 最近一次成功的结果，否则最后一个结果，否则通用提示
    pub fn best_result(&self) -> String {
        self.last_success()
            .or_else(|| self.history.last())
            .map(|r| r.result.clone())
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "No information could be obtained from the executed steps.".to_string())
    }

    /// 带编号的完整计划文本
    pub fn numbered_plan(steps: &[String]) -> String {
        steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 步骤历史摘要：`Step i: ... / Result: ...`，结果截断到 200 字符
    pub fn history_summary(&self) -> String {
        if self.history.is_empty() {
            return "No steps executed yet.".to_string();
        }
        let mut parts = Vec::new();
        for (i, r) in self.history.iter().enumerate() {
            let status = if r.success { "ok" } else { "failed" };
            parts.push(format!("Step {}: {} [{}, {}]", i + 1, r.step, r.executor_name(), status));
            let result = if r.result.chars().count() > SUMMARY_RESULT_CHARS {
                format!("{}...", r.result.chars().take(SUMMARY_RESULT_CHARS).collect::<String>())
            } else {
                r.result.clone()
            };
            parts.push(format!("Result: {}", result));
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(step: &str, ok: bool) -> StepResult {
        StepResult {
            step: step.to_string(),
            result: format!("{} -> {}", step, if ok { "done" } else { "Error: failed" }),
            executor: Some(Capability::Tasks),
            success: ok,
        }
    }

    #[test]
    fn test_new_rejects_empty_input() {
        assert!(matches!(
            OrchestrationState::new("   ", "s1"),
            Err(AgentError::EmptyInput)
        ));
        let st = OrchestrationState::new(" hola ", "s1").unwrap();
        assert_eq!(st.input, "hola");
        assert_eq!(st.phase(), Phase::Planning);
    }

    #[test]
    fn test_take_and_prepend() {
        let mut st = OrchestrationState::new("x", "s").unwrap();
        st.install_plan(vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(st.take_steps(2), vec!["a", "b"]);
        st.prepend_steps(vec!["z".into()]);
        assert_eq!(st.plan(), &["z".to_string(), "c".to_string()]);
        assert_eq!(st.take_steps(10).len(), 2);
        assert!(st.plan().is_empty());
    }

    #[test]
    fn test_best_result_prefers_last_success() {
        let mut st = OrchestrationState::new("x", "s").unwrap();
        assert!(st.best_result().contains("No information"));
        st.record(result("a", true));
        st.record(result("b", false));
        assert_eq!(st.best_result(), "a -> done");
        assert_eq!(st.successful_steps(), vec!["a"]);
    }

    #[test]
    fn test_history_summary_truncates() {
        let mut st = OrchestrationState::new("x", "s").unwrap();
        st.record(StepResult {
            step: "long".into(),
            result: "y".repeat(500),
            executor: None,
            success: false,
        });
        let summary = st.history_summary();
        assert!(summary.starts_with("Step 1: long [unknown, failed]"));
        assert!(summary.contains(&format!("Result: {}...", "y".repeat(200))));
    }
}
