//! 工具后端共用的 JSON 文件存储
//!
//! 待办、日历、邮箱三个能力的数据都是「整份读入内存、修改后整份写回」。
//! 文件缺失或损坏时从默认值开始；写回失败只记录 warn。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug)]
pub struct JsonStore<T> {
    path: Option<PathBuf>,
    data: Mutex<T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// path 为 None 时只在内存中保存
    pub fn open(path: Option<PathBuf>) -> Self {
        let data = path.as_deref().map(load::<T>).unwrap_or_default();
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn in_memory() -> Self {
        Self::open(None)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.lock())
    }

    /// 修改数据；闭包返回 Ok 时写回文件
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> Result<R, String>) -> Result<R, String> {
        let mut data = self.lock();
        let out = f(&mut data)?;
        if let Some(ref path) = self.path {
            if let Err(e) = save(path, &*data) {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist tool data");
            }
        }
        Ok(out)
    }
}

fn load<T: DeserializeOwned + Default>(path: &Path) -> T {
    if !path.exists() {
        return T::default();
    }
    let parsed = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from));
    match parsed {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "tool data unreadable, starting empty");
            T::default()
        }
    }
}

fn save<T: Serialize>(path: &Path, data: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(data)?)?;
    Ok(())
}
