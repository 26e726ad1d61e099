//! 编排状态机集成测试：脚本化 LLM + 脚本化执行器

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conductor::config::OrchestratorSection;
use conductor::core::{Orchestrator, TurnEvent, EMPTY_INPUT_HINT};
use conductor::executors::{Capability, Executor, ExecutorSet, StepOutcome, ToolAgent};
use conductor::llm::{FnLlmClient, LlmClient, MockLlmClient};
use conductor::memory::{Role, SessionMemory};
use conductor::planning::prompts::{PLANNER_HEADER, REPLANNER_HEADER, ROUTER_HEADER};
use conductor::planning::{Route, Router};
use conductor::tools::{task_tools, ToolExecutor};
use tokio::sync::mpsc;

/// 固定结果的执行器，记录调用次数与收到的任务文本
struct Scripted {
    capability: Capability,
    outcome: StepOutcome,
    calls: AtomicUsize,
    tasks: std::sync::Mutex<Vec<String>>,
}

impl Scripted {
    fn new(capability: Capability, outcome: StepOutcome) -> Arc<Self> {
        Arc::new(Self {
            capability,
            outcome,
            calls: AtomicUsize::new(0),
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for Scripted {
    fn capability(&self) -> Capability {
        self.capability
    }

    async fn execute(&self, task: &str) -> StepOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push(task.to_string());
        self.outcome.clone()
    }
}

fn scripted_llm(routes: Vec<(&'static str, &str)>) -> Arc<dyn LlmClient> {
    Arc::new(FnLlmClient::by_system_prefix(
        routes.into_iter().map(|(p, r)| (p, r.to_string())).collect(),
    ))
}

fn orchestrator(llm: Arc<dyn LlmClient>, executors: ExecutorSet) -> (Orchestrator, Arc<SessionMemory>) {
    let memory = Arc::new(SessionMemory::in_memory());
    let orch = Orchestrator::new(llm, memory.clone(), executors, OrchestratorSection::default());
    (orch, memory)
}

#[tokio::test]
async fn test_weather_in_madrid_single_step() {
    let llm = scripted_llm(vec![
        (PLANNER_HEADER, "1. Get the current weather in Madrid"),
        (ROUTER_HEADER, "weather"),
    ]);
    let weather = Scripted::new(
        Capability::Weather,
        StepOutcome::ok("Madrid: 21°C, clear sky, humidity 40%"),
    );
    let (orch, memory) = orchestrator(llm, ExecutorSet::new().with(weather.clone()));
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "What's the weather in Madrid?").await;

    assert!(reply.contains("21°C"));
    assert_eq!(weather.calls(), 1);
    let task = weather.tasks.lock().unwrap()[0].clone();
    assert!(task.contains("1. Get the current weather in Madrid"));
    let msgs = memory.recent(&sid, 10);
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0].role, Role::User);
    assert_eq!(msgs[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_repeated_failure_trips_loop_breaker() {
    let llm = scripted_llm(vec![
        (
            PLANNER_HEADER,
            "1. Email the quarterly report to Ana\n2. Create task: follow up with Ana",
        ),
        (REPLANNER_HEADER, "PLAN:\n1. Email the quarterly report to Ana"),
    ]);
    let messaging = Scripted::new(
        Capability::Messaging,
        StepOutcome::failed("mail server unavailable"),
    );
    let tasks = Scripted::new(Capability::Tasks, StepOutcome::ok("✅ Task created successfully"));
    let executors = ExecutorSet::new().with(messaging.clone()).with(tasks.clone());
    let (orch, memory) = orchestrator(llm, executors);
    let sid = memory.create_session();

    let reply = orch
        .run_turn(&sid, "Send Ana the quarterly report and remind me to follow up")
        .await;

    assert_eq!(messaging.calls(), 5);
    assert_eq!(tasks.calls(), 0);
    assert!(reply.contains("Could not complete the task"));
    assert!(reply.contains("mail server unavailable"));
    assert_eq!(memory.len(&sid), 2);
}

#[tokio::test]
async fn test_completed_steps_are_not_resurrected() {
    let llm = scripted_llm(vec![
        (
            PLANNER_HEADER,
            "1. Create task: buy milk\n2. Email Ana the shopping list",
        ),
        (
            REPLANNER_HEADER,
            "PLAN:\n1. Create task: buy milk\n2. Email Ana the shopping list",
        ),
    ]);
    let tasks = Scripted::new(
        Capability::Tasks,
        StepOutcome::ok("✅ Task 'buy milk' created successfully (id: 1a2b3c4d)."),
    );
    let messaging = Scripted::new(Capability::Messaging, StepOutcome::ok("✅ Email sent to ana@udesa.edu.ar"));
    let executors = ExecutorSet::new().with(tasks.clone()).with(messaging.clone());
    let (orch, memory) = orchestrator(llm, executors);
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "Add milk to my list and email Ana").await;

    assert_eq!(tasks.calls(), 1);
    assert_eq!(messaging.calls(), 1);
    assert!(reply.contains("sent"));
}

#[tokio::test]
async fn test_complementary_steps_run_in_one_executor_call() {
    let llm = scripted_llm(vec![
        (
            PLANNER_HEADER,
            "1. Create task: buy milk\n2. Create task: call Bob\n3. Create task: pay rent",
        ),
        (ROUTER_HEADER, "tasks"),
    ]);
    let tasks = Scripted::new(Capability::Tasks, StepOutcome::ok("✅ 3 tasks created successfully"));
    let (orch, memory) = orchestrator(llm, ExecutorSet::new().with(tasks.clone()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orch = orch.with_event_tx(tx);
    let sid = memory.create_session();

    orch.run_turn(&sid, "Create three tasks").await;

    assert_eq!(tasks.calls(), 1);
    let task = tasks.tasks.lock().unwrap()[0].clone();
    assert!(task.contains("- Create task: call Bob"));
    drop(orch);
    let mut finished = Vec::new();
    while let Some(ev) = rx.recv().await {
        if let TurnEvent::StepFinished { steps, .. } = ev {
            finished.push(steps.len());
        }
    }
    assert_eq!(finished, vec![3]);
}

#[tokio::test]
async fn test_unroutable_step_asks_for_clarification() {
    let llm = scripted_llm(vec![(PLANNER_HEADER, "1. Tell me a joke about penguins")]);
    let weather = Scripted::new(Capability::Weather, StepOutcome::ok("sunny"));
    let (orch, memory) = orchestrator(llm, ExecutorSet::new().with(weather.clone()));
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "tell me a joke").await;

    assert_eq!(weather.calls(), 0);
    assert!(reply.contains("not sure how to handle"));
    assert_eq!(memory.len(&sid), 2);
}

#[tokio::test]
async fn test_routing_fallback_without_llm() {
    let router = Router::new(Arc::new(MockLlmClient));
    assert_eq!(
        router.route("¿clima en Roma?", "").await,
        Route::Capability(Capability::Weather)
    );
    assert_eq!(
        router.route("crear tarea X", "").await,
        Route::Capability(Capability::Tasks)
    );
}

#[tokio::test]
async fn test_failing_tool_yields_marked_outcome() {
    // 第一次调用工具，收到 Observation 后给出文本答案
    let llm = Arc::new(FnLlmClient::new(|messages| {
        let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        if last.starts_with("Observation:") {
            Ok("The task could not be completed.".to_string())
        } else {
            Ok(r#"{"tool": "complete_task", "args": {"title": "Nonexistent"}}"#.to_string())
        }
    }));
    let agent = ToolAgent::new(
        Capability::Tasks,
        llm,
        ToolExecutor::new(task_tools(None), 5),
    )
    .with_limits(5, Duration::from_secs(5));

    let outcome = agent.execute("Complete the task 'Nonexistent'").await;

    assert!(!outcome.success);
    assert!(outcome.message.contains("Error:"));
}

#[tokio::test]
async fn test_memory_grows_every_turn_even_offline() {
    let (orch, memory) = orchestrator(Arc::new(MockLlmClient), ExecutorSet::new());
    let sid = memory.create_session();

    let mut previous_assistant = 0;
    for input in ["What's the weather in Madrid?", "   ", "crear tarea X"] {
        let reply = orch.run_turn(&sid, input).await;
        assert!(!reply.is_empty());
        let assistant = memory
            .recent(&sid, 100)
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        assert!(assistant > previous_assistant);
        previous_assistant = assistant;
    }
    let last = memory.recent(&sid, 3);
    assert!(last.iter().any(|m| m.content == EMPTY_INPUT_HINT));
}

const WEATHER_THEN_TASK: &str = "1. Get the weather in Madrid\n2. Create task: pack a coat";

fn weather_and_tasks() -> (Arc<Scripted>, Arc<Scripted>, ExecutorSet) {
    let weather = Scripted::new(Capability::Weather, StepOutcome::ok("Madrid: 21°C, clear sky"));
    let tasks = Scripted::new(Capability::Tasks, StepOutcome::ok("✅ Task created successfully"));
    let executors = ExecutorSet::new().with(weather.clone()).with(tasks.clone());
    (weather, tasks, executors)
}

fn collect_events(mut rx: mpsc::UnboundedReceiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test]
async fn test_replanner_final_answer_ends_turn() {
    let llm = scripted_llm(vec![
        (PLANNER_HEADER, WEATHER_THEN_TASK),
        (REPLANNER_HEADER, "FINAL ANSWER: It is 21°C in Madrid, no coat needed."),
    ]);
    let (weather, tasks, executors) = weather_and_tasks();
    let (orch, memory) = orchestrator(llm, executors);
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "Weather in Madrid, and remind me to pack a coat").await;

    assert_eq!(reply, "It is 21°C in Madrid, no coat needed.");
    assert_eq!(weather.calls(), 1);
    assert_eq!(tasks.calls(), 0);
}

#[tokio::test]
async fn test_replanner_reply_without_marker_reaches_responder() {
    let llm = scripted_llm(vec![
        (PLANNER_HEADER, WEATHER_THEN_TASK),
        (REPLANNER_HEADER, "Madrid is warm today, a coat is not necessary."),
    ]);
    let (weather, tasks, executors) = weather_and_tasks();
    let (orch, memory) = orchestrator(llm, executors);
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "Weather in Madrid, and remind me to pack a coat").await;

    assert_eq!(reply, "Madrid is warm today, a coat is not necessary.");
    assert_eq!(weather.calls(), 1);
    assert_eq!(tasks.calls(), 0);
    assert_eq!(memory.len(&sid), 2);
}

#[tokio::test]
async fn test_failing_replanner_answers_with_best_result() {
    // 没有 replanner 脚本：调用失败
    let llm = scripted_llm(vec![(PLANNER_HEADER, WEATHER_THEN_TASK)]);
    let (weather, tasks, executors) = weather_and_tasks();
    let (orch, memory) = orchestrator(llm, executors);
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "Weather in Madrid, and remind me to pack a coat").await;

    assert_eq!(reply, "Madrid: 21°C, clear sky");
    assert_eq!(weather.calls(), 1);
    assert_eq!(tasks.calls(), 0);
}

#[tokio::test]
async fn test_endless_new_steps_stop_at_attempt_ceiling() {
    let proposals = Arc::new(AtomicUsize::new(0));
    let counter = proposals.clone();
    let llm: Arc<dyn LlmClient> = Arc::new(FnLlmClient::new(move |messages| {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        if system.starts_with(PLANNER_HEADER) {
            Ok("1. Get the weather in Madrid\n2. Email Ana the summary".to_string())
        } else if system.starts_with(REPLANNER_HEADER) {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("PLAN:\n1. Create task: chore {} today", n))
        } else {
            Err("offline".to_string())
        }
    }));
    let (weather, tasks, _) = weather_and_tasks();
    let messaging = Scripted::new(Capability::Messaging, StepOutcome::ok("✅ Email sent successfully"));
    let executors = ExecutorSet::new()
        .with(weather.clone())
        .with(tasks.clone())
        .with(messaging.clone());
    let (orch, memory) = orchestrator(llm, executors);
    let (tx, rx) = mpsc::unbounded_channel();
    let orch = orch.with_event_tx(tx);
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "Check the weather and email Ana").await;

    let ceiling = OrchestratorSection::default().max_total_attempts;
    let total = weather.calls() + tasks.calls() + messaging.calls();
    assert!(total <= ceiling, "{} executor calls", total);
    assert_eq!(messaging.calls(), 0);
    assert!(!reply.is_empty());
    assert!(proposals.load(Ordering::SeqCst) < ceiling);
    let events = collect_events(rx);
    assert!(events.iter().any(|ev| matches!(
        ev,
        TurnEvent::LoopBreakerTripped { reason } if reason.contains("attempts in one turn")
    )));
}

#[tokio::test]
async fn test_repeated_success_trips_loop_breaker() {
    let llm = scripted_llm(vec![
        (
            PLANNER_HEADER,
            "1. Get the weather in Madrid\n2. Get the weather in Madrid\n3. Get the weather in Madrid\n4. Email Ana the forecast",
        ),
        // 与待执行步骤重复，被去重丢弃
        (REPLANNER_HEADER, "PLAN:\n1. Email Ana the forecast"),
    ]);
    let (weather, _, _) = weather_and_tasks();
    let messaging = Scripted::new(Capability::Messaging, StepOutcome::ok("✅ Email sent successfully"));
    let executors = ExecutorSet::new().with(weather.clone()).with(messaging.clone());
    let (orch, memory) = orchestrator(llm, executors);
    let (tx, rx) = mpsc::unbounded_channel();
    let orch = orch.with_event_tx(tx);
    let sid = memory.create_session();

    let reply = orch.run_turn(&sid, "Weather in Madrid, then email Ana").await;

    assert_eq!(weather.calls(), 3);
    assert_eq!(messaging.calls(), 0);
    assert_eq!(reply, "Madrid: 21°C, clear sky");
    let events = collect_events(rx);
    assert!(events.iter().any(|ev| matches!(
        ev,
        TurnEvent::LoopBreakerTripped { reason } if reason.contains("already succeeded 3 times")
    )));
}
