//! 会话记忆存储
//!
//! 每个会话一条只追加的消息日志。每次 append 都同步把整个存储写回文件，
//! 写入失败只记录 warn，从不向调用方抛错。

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::memory::persistence::{SessionLogFile, SessionMap};
use crate::memory::{Message, Role};

/// 空会话时 context_summary 返回的哨兵文本
pub const NEW_CONVERSATION: &str = "This is a new conversation.";

/// 会话概要（list / 调试用）
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub message_count: usize,
    pub first_message_at: Option<DateTime<Local>>,
    pub last_message_at: Option<DateTime<Local>>,
    pub first_user_message: Option<String>,
}

/// 按会话 ID 存放消息日志；可选文件持久化
#[derive(Debug)]
pub struct SessionMemory {
    sessions: Mutex<SessionMap>,
    file: Option<SessionLogFile>,
}

impl SessionMemory {
    /// 纯内存存储（测试、一次性运行）
    pub fn in_memory() -> Self {
        Self {
            sessions: Mutex::new(SessionMap::new()),
            file: None,
        }
    }

    /// 打开文件存储；文件缺失或损坏时从空表开始
    pub fn open(path: impl AsRef<Path>) -> Self {
        let file = SessionLogFile::new(path);
        let sessions = match file.load() {
            Ok(s) => {
                tracing::info!(path = %file.path().display(), sessions = s.len(), "session memory loaded");
                s
            }
            Err(e) => {
                tracing::warn!(path = %file.path().display(), error = %e, "session memory unreadable, starting empty");
                SessionMap::new()
            }
        };
        Self {
            sessions: Mutex::new(sessions),
            file: Some(file),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionMap> {
        // 毒化只说明另一个线程在持锁时 panic，数据本身仍可用
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, sessions: &SessionMap) {
        if let Some(ref file) = self.file {
            if let Err(e) = file.save(sessions) {
                tracing::warn!(path = %file.path().display(), error = %e, "failed to persist session memory");
            }
        }
    }

    /// 新建会话，返回随机 ID
    pub fn create_session(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.lock();
        sessions.insert(id.clone(), Vec::new());
        self.persist(&sessions);
        id
    }

    /// 确保会话存在（传输层用哈希后的稳定 ID）
    pub fn get_or_create(&self, id: &str) -> String {
        let mut sessions = self.lock();
        if !sessions.contains_key(id) {
            sessions.insert(id.to_string(), Vec::new());
            self.persist(&sessions);
        }
        id.to_string()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// 追加一条消息；会话不存在时隐式创建
    pub fn append(&self, id: &str, role: Role, content: impl Into<String>) {
        let mut sessions = self.lock();
        sessions
            .entry(id.to_string())
            .or_default()
            .push(Message::new(role, content));
        self.persist(&sessions);
    }

    /// 最近 n 条消息，按时间顺序
    pub fn recent(&self, id: &str, n: usize) -> Vec<Message> {
        let sessions = self.lock();
        match sessions.get(id) {
            Some(msgs) => {
                let start = msgs.len().saturating_sub(n);
                msgs[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// 将最近 n 条消息渲染为带角色前缀的上下文块；无消息时返回哨兵文本
    pub fn context_summary(&self, id: &str, n: usize) -> String {
        let recent = self.recent(id, n);
        if recent.is_empty() {
            return NEW_CONVERSATION.to_string();
        }
        let mut out = String::from("Recent conversation history:\n");
        for m in recent {
            out.push_str(m.role.display_name());
            out.push_str(": ");
            out.push_str(&m.content);
            out.push('\n');
        }
        out.trim_end().to_string()
    }

    pub fn len(&self, id: &str) -> usize {
        self.lock().get(id).map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, id: &str) -> bool {
        self.len(id) == 0
    }

    /// 清空会话消息（保留会话本身）
    pub fn clear_session(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        let cleared = match sessions.get_mut(id) {
            Some(msgs) => {
                msgs.clear();
                true
            }
            None => false,
        };
        if cleared {
            self.persist(&sessions);
        }
        cleared
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn session_summary(&self, id: &str) -> Option<SessionSummary> {
        let sessions = self.lock();
        let msgs = sessions.get(id)?;
        Some(SessionSummary {
            session_id: id.to_string(),
            message_count: msgs.len(),
            first_message_at: msgs.first().map(|m| m.timestamp),
            last_message_at: msgs.last().map(|m| m.timestamp),
            first_user_message: msgs
                .iter()
                .find(|m| m.role == Role::User)
                .map(|m| m.content.clone()),
        })
    }
}
