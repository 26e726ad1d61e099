//! 编排器：Planning → Executing → Replanning → (Executing | Done) 状态机
//!
//! 一轮对话对应一次 run_turn。每次执行至少记录一条 StepResult，
//! 尝试总数有上限，因此 Replanning 的进入次数有界，循环必然结束。
//! 任何错误都被文本化为回复，并写入会话记忆。

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::config::OrchestratorSection;
use crate::core::batch::batch_len;
use crate::core::events::{preview, TurnEvent};
use crate::core::loop_breaker::{LoopBreaker, LoopTrip};
use crate::core::state::{step_key, OrchestrationState, Phase, StepResult};
use crate::executors::{ExecutorSet, StepOutcome};
use crate::llm::LlmClient;
use crate::memory::{Role, SessionMemory, NEW_CONVERSATION};
use crate::planning::{filter_new_steps, Planner, ReplanDecision, Replanner, Responder, Route, Router};

/// 空输入时的固定回复
pub const EMPTY_INPUT_HINT: &str =
    "Please tell me what you need. I can help with the weather, your tasks, files, email and calendar.";

const EMPTY_PLAN_APOLOGY: &str =
    "Sorry, I couldn't work out any steps to carry out that request. Could you rephrase it?";

const EVENT_PREVIEW_CHARS: usize = 300;

pub struct Orchestrator {
    memory: Arc<SessionMemory>,
    planner: Planner,
    router: Router,
    replanner: Replanner,
    responder: Responder,
    executors: ExecutorSet,
    breaker: LoopBreaker,
    cfg: OrchestratorSection,
    event_tx: Option<mpsc::UnboundedSender<TurnEvent>>,
}

impl Orchestrator {
    /// 四个规划组件共用同一个 LLM 客户端
    pub fn new(
        llm: Arc<dyn LlmClient>,
        memory: Arc<SessionMemory>,
        executors: ExecutorSet,
        cfg: OrchestratorSection,
    ) -> Self {
        Self {
            planner: Planner::new(llm.clone()),
            router: Router::new(llm.clone()),
            replanner: Replanner::new(llm.clone()),
            responder: Responder::new(llm, memory.clone(), cfg.responder_context_messages),
            breaker: LoopBreaker::from_config(&cfg),
            memory,
            executors,
            cfg,
            event_tx: None,
        }
    }

    /// 过程事件推送到 channel（CLI / 网关展示进度）
    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn memory(&self) -> &Arc<SessionMemory> {
        &self.memory
    }

    fn emit(&self, ev: TurnEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn transition(&self, state: &mut OrchestrationState, phase: Phase) {
        tracing::info!(session = %state.session_id, from = ?state.phase(), to = ?phase, "phase transition");
        state.set_phase(phase);
        self.emit(TurnEvent::PhaseChanged { phase });
    }

    /// 处理一轮用户输入，返回最终回复；从不返回错误
    pub async fn run_turn(&self, session_id: &str, input: &str) -> String {
        let started = Instant::now();
        let mut state = match OrchestrationState::new(input, session_id) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "turn rejected");
                if !session_id.trim().is_empty() {
                    self.memory.append(session_id, Role::Assistant, EMPTY_INPUT_HINT);
                }
                return EMPTY_INPUT_HINT.to_string();
            }
        };
        self.memory.append(&state.session_id, Role::User, state.input.clone());
        tracing::info!(session = %state.session_id, input = %state.input, "turn started");

        loop {
            match state.phase() {
                Phase::Planning => self.plan_phase(&mut state).await,
                Phase::Executing => self.execute_phase(&mut state).await,
                Phase::Replanning => self.replan_phase(&mut state).await,
                Phase::Done => break,
            }
        }

        tracing::info!(
            session = %state.session_id,
            attempts = state.history().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );
        state
            .response()
            .map(str::to_string)
            .unwrap_or_else(|| crate::planning::NO_INFORMATION.to_string())
    }

    async fn plan_phase(&self, state: &mut OrchestrationState) {
        let context = self
            .memory
            .context_summary(&state.session_id, self.cfg.planning_context_messages);
        let steps = match self.planner.plan(&state.input, &context).await {
            Ok(steps) => steps,
            Err(e) => {
                tracing::warn!(session = %state.session_id, error = %e, "planning failed");
                Vec::new()
            }
        };
        if steps.is_empty() {
            tracing::warn!(session = %state.session_id, "empty plan");
            self.finish(state, EMPTY_PLAN_APOLOGY.to_string()).await;
            return;
        }
        self.emit(TurnEvent::PlanInstalled {
            steps: steps.clone(),
        });
        state.install_plan(steps);
        self.transition(state, Phase::Executing);
    }

    async fn execute_phase(&self, state: &mut OrchestrationState) {
        let full_plan = state.plan().to_vec();
        let n = batch_len(&full_plan, self.cfg.max_batch_steps);
        if n == 0 {
            self.transition(state, Phase::Replanning);
            return;
        }
        let steps = state.take_steps(n);

        // 一批步骤只按第一步路由一次
        let routing_context = self
            .memory
            .context_summary(&state.session_id, self.cfg.routing_context_messages);
        let route = self.router.route(&steps[0], &routing_context).await;
        self.emit(TurnEvent::StepRouted {
            steps: steps.clone(),
            executor: route.capability(),
        });

        let outcome = match route {
            Route::Unroutable => StepOutcome::failed(format!(
                "could not determine which capability should handle '{}'",
                steps[0]
            )),
            Route::Capability(cap) => match self.executors.get(cap) {
                Some(executor) => {
                    let context = self
                        .memory
                        .context_summary(&state.session_id, self.cfg.executor_context_messages);
                    let task = executor_task(&full_plan, &steps, &context);
                    tracing::debug!(executor = %cap, task = %task, "dispatching steps");
                    executor.execute(&task).await
                }
                None => StepOutcome::failed(format!("no {} executor is configured", cap)),
            },
        };
        tracing::info!(
            session = %state.session_id,
            steps = steps.len(),
            executor = ?route.capability(),
            success = outcome.success,
            "steps executed"
        );
        self.emit(TurnEvent::StepFinished {
            steps: steps.clone(),
            success: outcome.success,
            preview: preview(&outcome.message, EVENT_PREVIEW_CHARS),
        });

        for step in &steps {
            state.record(StepResult {
                step: step.clone(),
                result: outcome.message.clone(),
                executor: route.capability(),
                success: outcome.success,
            });
        }

        if route == Route::Unroutable {
            let clarify = format!(
                "I'm not sure how to handle \"{}\". Is it about the weather, your tasks, your files, email or your calendar?",
                steps[0]
            );
            self.finish(state, clarify).await;
            return;
        }
        self.transition(state, Phase::Replanning);
    }

    async fn replan_phase(&self, state: &mut OrchestrationState) {
        if state.plan().is_empty() {
            let best = state.best_result();
            self.finish(state, best).await;
            return;
        }

        if let Some(trip) = self.breaker.check(state.history()) {
            tracing::warn!(session = %state.session_id, reason = %trip, "loop breaker tripped");
            self.emit(TurnEvent::LoopBreakerTripped {
                reason: trip.to_string(),
            });
            let best = if trip.is_failure() {
                failure_summary(state, &trip)
            } else {
                state.best_result()
            };
            self.finish(state, best).await;
            return;
        }

        let context = self
            .memory
            .context_summary(&state.session_id, self.cfg.replanning_context_messages);
        let input_with_context = if context == NEW_CONVERSATION {
            state.input.clone()
        } else {
            format!("{}\n\nCurrent request: {}", context, state.input)
        };
        let plan_text = OrchestrationState::numbered_plan(state.plan());
        let decision = self
            .replanner
            .replan(&input_with_context, &plan_text, &state.history_summary())
            .await;

        match decision {
            ReplanDecision::FinalAnswer(answer) => {
                let best = if answer.trim().is_empty() {
                    state.best_result()
                } else {
                    answer
                };
                self.finish(state, best).await;
            }
            ReplanDecision::NewSteps(new_steps) => {
                let kept = {
                    let succeeded = state.successful_steps();
                    filter_new_steps(new_steps, &succeeded, state.plan())
                };
                if !kept.is_empty() {
                    tracing::info!(session = %state.session_id, added = kept.len(), "plan extended");
                    self.emit(TurnEvent::Replanned {
                        steps: kept.clone(),
                    });
                    state.prepend_steps(kept);
                }
                self.transition(state, Phase::Executing);
            }
            ReplanDecision::Unparsable(reply) => {
                tracing::warn!(session = %state.session_id, "replanner reply had no marker");
                let best = if reply.trim().is_empty() || reply.to_uppercase().starts_with("PLAN:") {
                    state.best_result()
                } else {
                    reply
                };
                self.finish(state, best).await;
            }
            ReplanDecision::Failed(_) => {
                let best = state.best_result();
                self.finish(state, best).await;
            }
        }
    }

    async fn finish(&self, state: &mut OrchestrationState, best_result: String) {
        let response = self
            .responder
            .respond(
                &state.session_id,
                &state.input,
                &best_result,
                &state.history_summary(),
            )
            .await;
        self.emit(TurnEvent::PhaseChanged { phase: Phase::Done });
        self.emit(TurnEvent::Finished {
            response: response.clone(),
        });
        state.finish(response);
    }
}

/// 交给执行器的任务文本：完整编号计划 + 本次要执行的步骤 + 会话上下文
pub fn executor_task(plan: &[String], steps: &[String], context: &str) -> String {
    let plan_text = OrchestrationState::numbered_plan(plan);
    let mut task = if steps.len() == 1 {
        format!(
            "For the following plan:\n{}\n\nYour task is to execute step 1: {}.",
            plan_text, steps[0]
        )
    } else {
        let list = steps
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "For the following plan:\n{}\n\nYour task is to execute these related steps:\n{}\n\nCarry them all out in sequence, using several tools if needed.",
            plan_text, list
        )
    };
    if context != NEW_CONVERSATION && !context.trim().is_empty() {
        task.push_str("\n\nConversation context:\n");
        task.push_str(context);
    }
    task
}

/// 失败熔断时交给 Responder 的说明
fn failure_summary(state: &OrchestrationState, trip: &LoopTrip) -> String {
    let last_failure = state.history().iter().rev().find(|r| !r.success);
    let step = match trip {
        LoopTrip::StepFailures { step, .. } => step.clone(),
        _ => last_failure.map(|r| r.step.clone()).unwrap_or_default(),
    };
    let attempts = state
        .history()
        .iter()
        .filter(|r| !r.success && step_key(&r.step) == step_key(&step))
        .count();
    let last_error = state
        .history()
        .iter()
        .rev()
        .find(|r| !r.success && step_key(&r.step) == step_key(&step))
        .or(last_failure)
        .map(|r| r.result.as_str())
        .unwrap_or("unknown error");
    format!(
        "Could not complete the task '{}' after {} repeated attempts. Last error: {}",
        step, attempts, last_error
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_task_single_step() {
        let plan = vec!["Get the weather in Madrid".to_string(), "Give advice".to_string()];
        let task = executor_task(&plan, &plan[..1], NEW_CONVERSATION);
        assert!(task.starts_with("For the following plan:\n1. Get the weather in Madrid\n2. Give advice"));
        assert!(task.ends_with("execute step 1: Get the weather in Madrid."));
        assert!(!task.contains("Conversation context"));
    }

    #[test]
    fn test_executor_task_batch_with_context() {
        let plan = vec!["Create task: a".to_string(), "Create task: b".to_string()];
        let task = executor_task(&plan, &plan, "Recent conversation history:\nUser: hi");
        assert!(task.contains("- Create task: a\n- Create task: b"));
        assert!(task.contains("Conversation context:\nRecent conversation history:"));
    }

    #[test]
    fn test_failure_summary_mentions_step_and_error() {
        let mut state = OrchestrationState::new("send it", "s").unwrap();
        for _ in 0..5 {
            state.record(StepResult {
                step: "Send the report".into(),
                result: "Error: SMTP down".into(),
                executor: None,
                success: false,
            });
        }
        let trip = LoopTrip::StepFailures {
            step: "Send the report".into(),
            failures: 5,
        };
        assert_eq!(
            failure_summary(&state, &trip),
            "Could not complete the task 'Send the report' after 5 repeated attempts. Last error: Error: SMTP down"
        );
    }
}
