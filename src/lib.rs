//! Conductor - 对话式任务编排器
//!
//! 模块划分：
//! - **agent**: 无头运行时（REPL / WhatsApp 等传输层调用）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 单轮状态机、批量执行、循环熔断、错误与恢复
//! - **executors**: 五个能力执行器（天气 / 待办 / 文件 / 消息 / 日程）
//! - **integrations**: 外部传输（WhatsApp Cloud API）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 按会话的消息日志与持久化
//! - **planning**: Planner、Router、Replanner、Responder
//! - **tools**: 各能力的工具集与工具执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod executors;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;
pub mod tools;

pub use agent::Conductor;
pub use core::Orchestrator;
