//! Workspace filesystem tools
//!
//! `read_file`, `write_file` and `list_dir` operate on the repository checkout.
//! All paths are validated through `FileSystemGuard` before any I/O.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{ParamSpec, ParamType, ToolInput, ToolOutput, ToolSchema};
use tokio::fs;
use tracing::{debug, info};

use super::ToolHandler;
use crate::fs_guard::FileSystemGuard;

fn param(input: &ToolInput, key: &str) -> Result<String, EngineError> {
    input.param_str(key).map_err(|e| EngineError::InvalidArguments {
        tool: input.tool.clone(),
        reason: e.to_string(),
    })
}

pub struct ReadFileTool {
    guard: FileSystemGuard,
}

impl ReadFileTool {
    pub fn new(guard: FileSystemGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new("read_file", "Read the contents of a file in the workspace.")
            .with_param(ParamSpec::required(
                "path",
                ParamType::String,
                "Path relative to the workspace root",
            ))
    }

    async fn call(&self, input: ToolInput) -> Result<ToolOutput, EngineError> {
        let path = self.guard.resolve(&param(&input, "path")?)?;
        info!("Reading file: {}", path.display());

        let content = fs::read_to_string(&path).await?;
        debug!("Read {} bytes from {}", content.len(), path.display());
        Ok(ToolOutput::text(content))
    }
}

pub struct WriteFileTool {
    guard: FileSystemGuard,
}

impl WriteFileTool {
    pub fn new(guard: FileSystemGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "write_file",
            "Write content to a file in the workspace (creates parent directories if needed).",
        )
        .with_param(ParamSpec::required(
            "path",
            ParamType::String,
            "Path relative to the workspace root",
        ))
        .with_param(ParamSpec::required(
            "content",
            ParamType::String,
            "Full file contents",
        ))
    }

    async fn call(&self, input: ToolInput) -> Result<ToolOutput, EngineError> {
        let target = self.guard.validate_new_path(&param(&input, "path")?)?;
        let content = param(&input, "content")?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Writing {} bytes to: {}", content.len(), target.display());
        fs::write(&target, &content).await?;

        Ok(ToolOutput::text(format!(
            "Wrote {} bytes to {}",
            content.len(),
            target
                .strip_prefix(self.guard.workspace())
                .unwrap_or(&target)
                .display()
        )))
    }
}

pub struct ListDirTool {
    guard: FileSystemGuard,
}

impl ListDirTool {
    pub fn new(guard: FileSystemGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl ToolHandler for ListDirTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "list_dir",
            "List files and directories at a path. Returns entries with type, size, and name.",
        )
        .with_param(ParamSpec::optional(
            "path",
            ParamType::String,
            "Directory relative to the workspace root (default: root)",
        ))
    }

    async fn call(&self, input: ToolInput) -> Result<ToolOutput, EngineError> {
        let requested = input.param_str_opt("path").unwrap_or_else(|| ".".to_string());
        let path = self.guard.resolve(&requested)?;
        info!("Listing directory: {}", path.display());

        let mut entries = fs::read_dir(&path).await?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut links = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                dirs.push(format!("d  {}/", name));
            } else if ft.is_symlink() {
                links.push(format!("l  {}", name));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push(format!("f  {:>8}  {}", format_size(size), name));
            }
        }

        dirs.sort();
        files.sort();
        links.sort();

        let total = dirs.len() + files.len() + links.len();
        let mut out = Vec::with_capacity(total + 1);
        out.push(format!("{}/  ({} entries)", requested.trim_end_matches('/'), total));
        out.extend(dirs);
        out.extend(files);
        out.extend(links);
        Ok(ToolOutput::text(out.join("\n")))
    }
}

/// Format a byte count into a human-readable size string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
