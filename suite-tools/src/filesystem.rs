use async_trait::async_trait;
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use suite_llm::{ParamType, Tool, ToolError, ToolSpec, optional_string, require_string};

type Result<T> = std::result::Result<T, ToolError>;

/// Read-only access to files under a root directory.
pub struct FilesystemTool {
    root_dir: PathBuf,
    search_results_max: usize,
    file_bytes_max: usize,
}

impl FilesystemTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(ToolError::InvalidArguments("root_dir is required".to_string()));
        }
        Ok(Self {
            root_dir,
            search_results_max: 200,
            file_bytes_max: 1_000_000,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn resolve_path(&self, user_path: &str) -> Result<PathBuf> {
        let rel = Path::new(user_path);
        if rel.is_absolute() {
            return Err(ToolError::Unauthorized("absolute paths are not allowed".to_string()));
        }

        for component in rel.components() {
            match component {
                Component::ParentDir => {
                    return Err(ToolError::Unauthorized("path traversal is not allowed".to_string()));
                }
                Component::CurDir | Component::Normal(_) => {}
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::Unauthorized("invalid path".to_string()));
                }
            }
        }

        Ok(self.root_dir.join(rel))
    }

    async fn read_file(&self, path: &Path) -> Result<String> {
        let len = tokio::fs::metadata(path).await?.len();
        if len > self.file_bytes_max as u64 {
            return Err(ToolError::ExecutionFailed(format!(
                "file too large: {len} bytes (max {})",
                self.file_bytes_max
            )));
        }
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(path).await?;
        while let Some(entry) = rd.next_entry().await? {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                name.push('/');
            }
            out.push(name);
            if out.len() >= self.search_results_max {
                break;
            }
        }
        out.sort();
        Ok(out)
    }

    async fn search_files(&self, path: &Path, pattern: &str) -> Result<Vec<String>> {
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("invalid regex: {e}")))?;

        let mut stack = vec![path.to_path_buf()];
        let mut out = Vec::new();
        let mut steps = 0usize;
        let steps_max = 50_000usize;

        'walk: while let Some(dir) = stack.pop() {
            steps += 1;
            if steps >= steps_max {
                tracing::warn!(steps_max, "filesystem search stopped early");
                break;
            }

            let mut rd = match tokio::fs::read_dir(&dir).await {
                Ok(v) => v,
                Err(_) => continue,
            };

            while let Some(entry) = rd.next_entry().await? {
                let p = entry.path();
                let meta = match entry.metadata().await {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if meta.is_dir() {
                    stack.push(p);
                    continue;
                }
                if !meta.is_file() {
                    continue;
                }

                let name = p.file_name().and_then(|s| s.to_str()).unwrap_or("");
                if regex.is_match(name) {
                    if let Ok(rel) = p.strip_prefix(&self.root_dir) {
                        out.push(rel.to_string_lossy().into_owned());
                    }
                    if out.len() >= self.search_results_max {
                        break 'walk;
                    }
                }
            }
        }

        out.sort();
        Ok(out)
    }
}

#[async_trait]
impl Tool for FilesystemTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "filesystem".to_string(),
            description: "Read files, list directories and search file names (regex) within the workspace root. Paths are relative to the root.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": ParamType::String.as_str(),
                        "enum": ["read", "list", "search"],
                        "description": "Operation to perform"
                    },
                    "path": {
                        "type": ParamType::String.as_str(),
                        "description": "Relative path; use \".\" for the root"
                    },
                    "pattern": {
                        "type": ParamType::String.as_str(),
                        "description": "Regex matched against file names (search only)"
                    }
                },
                "required": ["action", "path"]
            }),
        }
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let action = require_string(&arguments, "action")?;
        let path = require_string(&arguments, "path")?;
        let resolved = self.resolve_path(&path)?;
        tracing::debug!(action = %action, path = %path, "filesystem tool invoked");

        match action.as_str() {
            "read" => {
                let content = self.read_file(&resolved).await?;
                Ok(serde_json::json!({ "path": path, "content": content }))
            }
            "list" => {
                let entries = self.list_dir(&resolved).await?;
                Ok(serde_json::json!({ "path": path, "entries": entries }))
            }
            "search" => {
                let pattern = optional_string(&arguments, "pattern")?.unwrap_or_else(|| ".*".to_string());
                let matches = self.search_files(&resolved, &pattern).await?;
                Ok(serde_json::json!({ "path": path, "matches": matches }))
            }
            other => Err(ToolError::InvalidArguments(format!("unknown action: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> (tempfile::TempDir, FilesystemTool) {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join("notes/deep")).expect("mkdir");
        std::fs::write(tmp.path().join("readme.md"), "hello").expect("write");
        std::fs::write(tmp.path().join("notes/todo.md"), "- ship it").expect("write");
        std::fs::write(tmp.path().join("notes/deep/plan.txt"), "plan").expect("write");
        let tool = FilesystemTool::new(tmp.path()).expect("tool");
        (tmp, tool)
    }

    #[tokio::test]
    async fn filesystem_prevents_traversal_and_absolute_paths() {
        let (_tmp, tool) = workspace();
        let err = tool
            .execute(json!({ "action": "read", "path": "../secrets.txt" }))
            .await
            .expect_err("traversal");
        assert!(err.to_string().contains("traversal"));

        let err = tool
            .execute(json!({ "action": "read", "path": "/etc/passwd" }))
            .await
            .expect_err("absolute");
        assert!(matches!(err, ToolError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn reads_and_lists_within_root() {
        let (_tmp, tool) = workspace();
        let out = tool
            .execute(json!({ "action": "read", "path": "readme.md" }))
            .await
            .expect("read");
        assert_eq!(out["content"], "hello");

        let out = tool
            .execute(json!({ "action": "list", "path": "." }))
            .await
            .expect("list");
        assert_eq!(out["entries"], json!(["notes/", "readme.md"]));
    }

    #[tokio::test]
    async fn search_matches_file_names_recursively() {
        let (_tmp, tool) = workspace();
        let out = tool
            .execute(json!({ "action": "search", "path": ".", "pattern": r"\.md$" }))
            .await
            .expect("search");
        let matches: Vec<String> = serde_json::from_value(out["matches"].clone()).expect("strings");
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().any(|m| m.ends_with("todo.md")));

        let err = tool
            .execute(json!({ "action": "search", "path": ".", "pattern": "(" }))
            .await
            .expect_err("bad regex");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn oversized_files_are_rejected() {
        let (tmp, mut tool) = workspace();
        tool.file_bytes_max = 3;
        std::fs::write(tmp.path().join("big.txt"), "0123456789").expect("write");
        let err = tool
            .execute(json!({ "action": "read", "path": "big.txt" }))
            .await
            .expect_err("too large");
        assert!(err.to_string().contains("too large"));
    }
}
