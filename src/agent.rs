//! Headless 运行时
//!
//! 供 REPL、WhatsApp 等传输层调用：传输层只提供 (session_key, text)，
//! Conductor 把 key 哈希为稳定的会话 ID，在整轮超时内跑编排状态机并返回回复。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::{Orchestrator, TurnEvent};
use crate::executors::ExecutorSet;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{Role, SessionMemory};

/// 整轮超时后的固定致歉语
pub const TIMEOUT_APOLOGY: &str =
    "Sorry, processing your request took too long. Please try again in a moment.";

/// 传输层 session key -> 稳定的会话 ID（UUID v5）
pub fn session_id_for(session_key: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, session_key.as_bytes()).to_string()
}

pub struct Conductor {
    orchestrator: Orchestrator,
    memory: Arc<SessionMemory>,
    turn_timeout: Duration,
}

impl Conductor {
    pub fn new(orchestrator: Orchestrator, turn_timeout: Duration) -> Self {
        Self {
            memory: orchestrator.memory().clone(),
            orchestrator,
            turn_timeout,
        }
    }

    /// 按配置组装：LLM、会话记忆文件、五个能力执行器
    pub fn from_config(cfg: &AppConfig) -> Self {
        let llm = create_llm_from_config(cfg);
        Self::with_llm(cfg, llm)
    }

    /// 指定 LLM 客户端（测试或自定义后端）
    pub fn with_llm(cfg: &AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        let workspace = cfg.workspace();
        if let Err(e) = std::fs::create_dir_all(&workspace) {
            tracing::warn!(path = %workspace.display(), error = %e, "could not create workspace");
        }
        let memory = Arc::new(SessionMemory::open(&cfg.app.memory_file));
        let executors = ExecutorSet::from_config(cfg, llm.clone());
        let orchestrator = Orchestrator::new(llm, memory, executors, cfg.orchestrator.clone());
        Self::new(
            orchestrator,
            Duration::from_secs(cfg.orchestrator.turn_timeout_secs),
        )
    }

    pub fn with_event_tx(mut self, tx: mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.orchestrator = self.orchestrator.with_event_tx(tx);
        self
    }

    pub fn memory(&self) -> &Arc<SessionMemory> {
        &self.memory
    }

    /// 传输层入口：session_key 为电话号码、用户名等任意字符串
    pub async fn handle_message(&self, session_key: &str, text: &str) -> String {
        let session_id = session_id_for(session_key);
        self.handle_session(&session_id, text).await
    }

    /// 已知会话 ID 时直接处理；超时则记录并返回致歉语
    pub async fn handle_session(&self, session_id: &str, text: &str) -> String {
        let session_id = self.memory.get_or_create(session_id);
        match tokio::time::timeout(self.turn_timeout, self.orchestrator.run_turn(&session_id, text)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(session = %session_id, timeout_secs = self.turn_timeout.as_secs(), "turn timed out");
                self.memory.append(&session_id, Role::Assistant, TIMEOUT_APOLOGY);
                TIMEOUT_APOLOGY.to_string()
            }
        }
    }
}
