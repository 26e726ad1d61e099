//! 核心编排层：错误与恢复、单轮状态、批量执行、循环熔断、过程事件、状态机

pub mod batch;
pub mod error;
pub mod events;
pub mod loop_breaker;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use batch::{batch_len, complementary};
pub use error::{AgentError, RecoveryAction};
pub use events::TurnEvent;
pub use loop_breaker::{LoopBreaker, LoopTrip};
pub use orchestrator::{executor_task, Orchestrator, EMPTY_INPUT_HINT};
pub use recovery::RecoveryEngine;
pub use state::{OrchestrationState, Phase, StepResult};
