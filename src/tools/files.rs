//! 文件能力工具集（沙箱存储）
//!
//! SafeFs 绑定 root_dir，所有路径必须落在 root 下（禁止 ../ 与绝对路径逃逸）；
//! 工具：search_files / get_file_metadata / read_file / upload_file / move_file / delete_file。

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::core::AgentError;
use crate::tools::{optional_str, required_str, Tool, ToolRegistry};

/// read_file 返回内容的最大字符数
const MAX_READ_CHARS: usize = 4000;
const MAX_SEARCH_RESULTS: usize = 20;

/// 沙箱文件系统：绑定根目录，resolve 校验路径在根下，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        let root = root_dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::warn!(root = %root.display(), error = %e, "could not create files root");
        }
        let root_dir = root.canonicalize().unwrap_or(root);
        Self { root_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析已存在的路径并校验在沙箱内（跟随符号链接后再比较）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, AgentError> {
        let lexical = self.resolve_new(path)?;
        let canonical = lexical
            .canonicalize()
            .map_err(|_| AgentError::ToolExecutionFailed(format!("Path not found: {}", path)))?;
        if canonical.starts_with(&self.root_dir) {
            Ok(canonical)
        } else {
            Err(AgentError::PathEscape(path.to_string()))
        }
    }

    /// 解析可能尚不存在的路径（上传 / 移动目标）：按词法规整，`..` 越过根即拒绝
    pub fn resolve_new(&self, path: &str) -> Result<PathBuf, AgentError> {
        let trimmed = path.trim().trim_start_matches("./");
        let mut out = self.root_dir.clone();
        let mut depth = 0usize;
        for comp in Path::new(trimmed).components() {
            match comp {
                Component::Normal(c) => {
                    out.push(c);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(AgentError::PathEscape(path.to_string())); // 如 ../../etc/passwd
                    }
                    out.pop();
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(AgentError::PathEscape(path.to_string()));
                }
            }
        }
        Ok(out)
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// 按文件名（不区分大小写）搜索，可选扩展名过滤
    pub fn search(&self, query: &str, extension: Option<&str>) -> Vec<String> {
        let query = query.to_lowercase();
        let ext = extension.map(|e| e.trim_start_matches('.').to_lowercase());
        WalkDir::new(&self.root_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_lowercase();
                if name.starts_with('.') {
                    return false;
                }
                let ext_ok = match &ext {
                    Some(want) => e
                        .path()
                        .extension()
                        .map(|x| x.to_string_lossy().to_lowercase() == *want)
                        .unwrap_or(false),
                    None => true,
                };
                ext_ok && (query.is_empty() || name.contains(&query))
            })
            .take(MAX_SEARCH_RESULTS)
            .map(|e| self.relative(e.path()))
            .collect()
    }

    pub fn metadata(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        let meta = std::fs::metadata(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Metadata failed: {}", e)))?;
        let modified = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let kind = if meta.is_dir() { "directory" } else { "file" };
        Ok(format!(
            "Name: {}\nType: {}\nSize: {} bytes\nModified: {}",
            self.relative(&resolved),
            kind,
            meta.len(),
            modified
        ))
    }

    pub fn read_file(&self, path: &str) -> Result<String, AgentError> {
        let resolved = self.resolve(path)?;
        std::fs::read_to_string(&resolved)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Read failed: {}", e)))
    }

    pub fn write_file(&self, path: &str, content: &str) -> Result<PathBuf, AgentError> {
        let target = self.resolve_new(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        }
        std::fs::write(&target, content)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Write failed: {}", e)))?;
        Ok(target)
    }

    pub fn move_file(&self, from: &str, to: &str) -> Result<PathBuf, AgentError> {
        let source = self.resolve(from)?;
        let mut target = self.resolve_new(to)?;
        if target.is_dir() {
            if let Some(name) = source.file_name() {
                target.push(name);
            }
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::ToolExecutionFailed(format!("Move failed: {}", e)))?;
        }
        std::fs::rename(&source, &target)
            .map_err(|e| AgentError::ToolExecutionFailed(format!("Move failed: {}", e)))?;
        Ok(target)
    }

    pub fn delete_file(&self, path: &str) -> Result<(), AgentError> {
        let resolved = self.resolve(path)?;
        if resolved == self.root_dir {
            return Err(AgentError::ToolExecutionFailed(
                "Refusing to delete the storage root".to_string(),
            ));
        }
        if resolved.is_dir() {
            std::fs::remove_dir_all(&resolved)
        } else {
            std::fs::remove_file(&resolved)
        }
        .map_err(|e| AgentError::ToolExecutionFailed(format!("Delete failed: {}", e)))
    }
}

/// 文件名搜索
pub struct SearchFilesTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search stored files by name. Args: {\"query\": \"part of the file name\", \"extension\": \"optional, e.g. pdf\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "extension": {"type": "string"}
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = optional_str(&args, "query").unwrap_or("");
        let extension = optional_str(&args, "extension");
        tracing::info!(query = %query, "search_files tool execute");
        let hits = self.fs.search(query, extension);
        if hits.is_empty() {
            Ok(format!("No files found matching '{}'.", query))
        } else {
            Ok(format!("Found {} file(s):\n{}", hits.len(), hits.join("\n")))
        }
    }
}

pub struct FileMetadataTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for FileMetadataTool {
    fn name(&self) -> &str {
        "get_file_metadata"
    }

    fn description(&self) -> &str {
        "Show size, type and modification time of a stored file. Args: {\"path\": \"file path\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = required_str(&args, "path")?;
        self.fs.metadata(path).map_err(|e| e.to_string())
    }
}

pub struct ReadFileTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Download (read) a stored text file. Args: {\"path\": \"file path\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = required_str(&args, "path")?;
        tracing::info!(path = %path, "read_file tool execute");
        let content = self.fs.read_file(path).map_err(|e| e.to_string())?;
        if content.chars().count() > MAX_READ_CHARS {
            let head: String = content.chars().take(MAX_READ_CHARS).collect();
            Ok(format!("{}\n... (truncated)", head))
        } else {
            Ok(content)
        }
    }
}

pub struct UploadFileTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for UploadFileTool {
    fn name(&self) -> &str {
        "upload_file"
    }

    fn description(&self) -> &str {
        "Upload (create or overwrite) a text file. Args: {\"path\": \"target path\", \"content\": \"text\"}"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = required_str(&args, "path")?;
        let content = optional_str(&args, "content").unwrap_or("");
        let target = self.fs.write_file(path, content).map_err(|e| e.to_string())?;
        Ok(format!(
            "✅ File '{}' uploaded successfully ({} bytes).",
            self.fs.relative(&target),
            content.len()
        ))
    }
}

pub struct MoveFileTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &str {
        "move_file"
    }

    fn description(&self) -> &str {
        "Move or rename a stored file. Args: {\"from\": \"current path\", \"to\": \"new path or folder\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let from = required_str(&args, "from")?;
        let to = required_str(&args, "to")?;
        let target = self.fs.move_file(from, to).map_err(|e| e.to_string())?;
        Ok(format!(
            "✅ File '{}' moved successfully to '{}'.",
            from,
            self.fs.relative(&target)
        ))
    }
}

pub struct DeleteFileTool {
    fs: Arc<SafeFs>,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a stored file or folder. Args: {\"path\": \"file path\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = required_str(&args, "path")?;
        self.fs.delete_file(path).map_err(|e| e.to_string())?;
        Ok(format!("✅ File '{}' deleted successfully.", path))
    }
}

/// 文件能力的完整工具集
pub fn file_tools(root: impl AsRef<Path>) -> ToolRegistry {
    let fs = Arc::new(SafeFs::new(root));
    let mut registry = ToolRegistry::new();
    registry.register(SearchFilesTool { fs: fs.clone() });
    registry.register(FileMetadataTool { fs: fs.clone() });
    registry.register(ReadFileTool { fs: fs.clone() });
    registry.register(UploadFileTool { fs: fs.clone() });
    registry.register(MoveFileTool { fs: fs.clone() });
    registry.register(DeleteFileTool { fs });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let fs = SafeFs::new(dir.path());
        assert!(matches!(
            fs.resolve_new("../../etc/passwd"),
            Err(AgentError::PathEscape(_))
        ));
        assert!(matches!(fs.resolve_new("/etc/passwd"), Err(AgentError::PathEscape(_))));
        assert!(fs.resolve_new("reports/../notes.txt").is_ok());
    }

    #[tokio::test]
    async fn test_upload_search_move_delete() {
        let dir = tempfile::tempdir().unwrap();
        let registry = file_tools(dir.path());

        let out = registry
            .execute("upload_file", json!({"path": "docs/Informe.txt", "content": "hola"}))
            .await
            .unwrap();
        assert!(out.contains("uploaded successfully"));

        let found = registry
            .execute("search_files", json!({"query": "informe"}))
            .await
            .unwrap();
        assert!(found.contains("docs/Informe.txt"));

        registry
            .execute("move_file", json!({"from": "docs/Informe.txt", "to": "archive/informe.txt"}))
            .await
            .unwrap();
        let content = registry
            .execute("read_file", json!({"path": "archive/informe.txt"}))
            .await
            .unwrap();
        assert_eq!(content, "hola");

        let deleted = registry
            .execute("delete_file", json!({"path": "archive/informe.txt"}))
            .await
            .unwrap();
        assert!(deleted.contains("deleted successfully"));
        assert!(registry
            .execute("read_file", json!({"path": "archive/informe.txt"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_metadata_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "12345").unwrap();
        let registry = file_tools(dir.path());
        let out = registry
            .execute("get_file_metadata", json!({"path": "a.txt"}))
            .await
            .unwrap();
        assert!(out.contains("Size: 5 bytes"));
    }
}
