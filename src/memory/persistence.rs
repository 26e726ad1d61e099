//! 会话日志持久化
//!
//! 整个存储写入单个 JSON 文件：{"sessions": {id: [Message...]}, "last_updated": ...}。
//! 格式只是实现细节，外部不直接读取。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 会话 ID -> 按时间顺序的消息
pub type SessionMap = BTreeMap<String, Vec<Message>>;

/// 简单的文件持久化：每次保存都重写整个文件
#[derive(Debug, Clone)]
pub struct SessionLogFile {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct SessionLog {
    #[serde(default)]
    sessions: SessionMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_updated: Option<DateTime<Local>>,
}

impl SessionLogFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 从 JSON 文件加载全部会话；文件不存在时返回空表
    pub fn load(&self) -> anyhow::Result<SessionMap> {
        if !self.path.exists() {
            return Ok(SessionMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let log: SessionLog = serde_json::from_str(&data)?;
        Ok(log.sessions)
    }

    /// 将全部会话写入 JSON 文件；父目录不存在时自动创建
    pub fn save(&self, sessions: &SessionMap) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let log = SessionLog {
            sessions: sessions.clone(),
            last_updated: Some(Local::now()),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&log)?)?;
        Ok(())
    }
}
