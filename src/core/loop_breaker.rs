//! 循环熔断
//!
//! 每次进入 Replanning 时检查步骤历史，满足任一条件即结束本轮：
//! - 「最近两次及以上尝试全部失败」的步骤数达到 max_repeated_failures
//! - 同一步骤累计失败 max_step_failures 次
//! - 同一步骤成功 max_repeated_successes 次（在重复已完成的工作）
//! - 本轮执行尝试总数达到 max_total_attempts

use std::collections::HashMap;

use serde::Serialize;

use crate::config::OrchestratorSection;
use crate::core::state::{step_key, StepResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopTrip {
    RepeatedFailures { steps: usize },
    StepFailures { step: String, failures: usize },
    RepeatedSuccess { step: String, successes: usize },
    AttemptCeiling { attempts: usize },
}

impl LoopTrip {
    /// 是否因失败而熔断（决定回复用失败说明还是最近的成功结果）
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LoopTrip::RepeatedFailures { .. } | LoopTrip::StepFailures { .. }
        )
    }
}

impl std::fmt::Display for LoopTrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopTrip::RepeatedFailures { steps } => {
                write!(f, "{} steps keep failing", steps)
            }
            LoopTrip::StepFailures { step, failures } => {
                write!(f, "step '{}' failed {} times", step, failures)
            }
            LoopTrip::RepeatedSuccess { step, successes } => {
                write!(f, "step '{}' already succeeded {} times", step, successes)
            }
            LoopTrip::AttemptCeiling { attempts } => {
                write!(f, "{} attempts in one turn", attempts)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopBreaker {
    max_repeated_failures: usize,
    max_step_failures: usize,
    max_repeated_successes: usize,
    max_total_attempts: usize,
}

impl Default for LoopBreaker {
    fn default() -> Self {
        Self::from_config(&OrchestratorSection::default())
    }
}

#[derive(Default)]
struct StepStats<'a> {
    first_text: &'a str,
    attempts: Vec<bool>,
}

impl LoopBreaker {
    pub fn from_config(cfg: &OrchestratorSection) -> Self {
        Self {
            max_repeated_failures: cfg.max_repeated_failures.max(1),
            max_step_failures: cfg.max_step_failures.max(1),
            max_repeated_successes: cfg.max_repeated_successes.max(1),
            max_total_attempts: cfg.max_total_attempts.max(1),
        }
    }

    pub fn check(&self, history: &[StepResult]) -> Option<LoopTrip> {
        // 按规范化文本分组，保持首次出现顺序
        let mut order: Vec<String> = Vec::new();
        let mut stats: HashMap<String, StepStats> = HashMap::new();
        for r in history {
            let key = step_key(&r.step);
            let entry = stats.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                StepStats {
                    first_text: &r.step,
                    attempts: Vec::new(),
                }
            });
            entry.attempts.push(r.success);
        }

        for key in &order {
            let s = &stats[key];
            let failures = s.attempts.iter().filter(|ok| !**ok).count();
            if failures >= self.max_step_failures {
                return Some(LoopTrip::StepFailures {
                    step: s.first_text.to_string(),
                    failures,
                });
            }
            let successes = s.attempts.len() - failures;
            if successes >= self.max_repeated_successes {
                return Some(LoopTrip::RepeatedSuccess {
                    step: s.first_text.to_string(),
                    successes,
                });
            }
        }

        let stuck = order
            .iter()
            .filter(|key| {
                let trailing = stats[*key]
                    .attempts
                    .iter()
                    .rev()
                    .take_while(|ok| !**ok)
                    .count();
                trailing >= 2
            })
            .count();
        if stuck >= self.max_repeated_failures {
            return Some(LoopTrip::RepeatedFailures { steps: stuck });
        }

        if history.len() >= self.max_total_attempts {
            return Some(LoopTrip::AttemptCeiling {
                attempts: history.len(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(step: &str, success: bool) -> StepResult {
        StepResult {
            step: step.to_string(),
            result: String::new(),
            executor: None,
            success,
        }
    }

    #[test]
    fn test_single_step_failing_five_times_trips() {
        let lb = LoopBreaker::default();
        let mut h: Vec<StepResult> = (0..4).map(|_| attempt("Send report", false)).collect();
        assert_eq!(lb.check(&h), None);
        h.push(attempt("send report", false));
        assert_eq!(
            lb.check(&h),
            Some(LoopTrip::StepFailures {
                step: "Send report".to_string(),
                failures: 5
            })
        );
    }

    #[test]
    fn test_five_distinct_stuck_steps_trip() {
        let lb = LoopBreaker::default();
        let mut h = Vec::new();
        for s in ["a", "b", "c", "d", "e"] {
            h.push(attempt(s, false));
            h.push(attempt(s, false));
        }
        assert_eq!(lb.check(&h), Some(LoopTrip::RepeatedFailures { steps: 5 }));
    }

    #[test]
    fn test_recovered_step_is_not_stuck() {
        let lb = LoopBreaker::default();
        let mut h = Vec::new();
        for s in ["a", "b", "c", "d"] {
            h.push(attempt(s, false));
            h.push(attempt(s, false));
        }
        h.push(attempt("e", false));
        h.push(attempt("e", true));
        assert_eq!(lb.check(&h), None);
    }

    #[test]
    fn test_repeated_success_trips() {
        let lb = LoopBreaker::default();
        let h: Vec<StepResult> = (0..3).map(|_| attempt("list tasks", true)).collect();
        assert!(matches!(lb.check(&h), Some(LoopTrip::RepeatedSuccess { successes: 3, .. })));
        assert!(!lb.check(&h).unwrap().is_failure());
    }

    #[test]
    fn test_attempt_ceiling() {
        let lb = LoopBreaker::default();
        let h: Vec<StepResult> = (0..25)
            .map(|i| attempt(&format!("step {}", i), i % 2 == 0))
            .collect();
        assert_eq!(lb.check(&h), Some(LoopTrip::AttemptCeiling { attempts: 25 }));
    }
}
