//! Registers the protected, built-in tool set every agent starts with:
//! `read_file`, `write_file`, `list_directory`, and `run_code`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tourney_domain::config::{ExecConfig, SandboxConfig};

use crate::file_ops::{self, check_not_protected, validate_path, FileListRequest, FileReadRequest, FileWriteRequest};
use crate::registry::{Tool, ToolRegistry};
use crate::run_code::{run_code, RunCodeRequest};

/// Populate `registry` with the core filesystem and execution tools,
/// sandboxed to `sandbox.root` and guarded by `sandbox.protected_paths`.
pub async fn register_builtin_tools(registry: &ToolRegistry, sandbox: SandboxConfig, exec: ExecConfig) {
    let sandbox = Arc::new(sandbox);
    let exec = Arc::new(exec);

    {
        let sandbox = sandbox.clone();
        registry
            .register(Tool {
                name: "read_file".into(),
                description: "Read a text file from the workspace, optionally by line range.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the workspace root."},
                        "offset": {"type": "integer", "description": "0-indexed line to start from."},
                        "limit": {"type": "integer", "description": "Maximum number of lines to return."}
                    },
                    "required": ["path"]
                }),
                handler: Arc::new(move |args: Value| {
                    let sandbox = sandbox.clone();
                    async move {
                        let req: FileReadRequest = serde_json::from_value(args).map_err(|e| e.to_string())?;
                        guard_path(&sandbox, &req.path)?;
                        file_ops::file_read(&sandbox.root, req).await
                    }
                }),
                category: "core".into(),
                protected: true,
            })
            .await;
    }

    {
        let sandbox = sandbox.clone();
        registry
            .register(Tool {
                name: "write_file".into(),
                description: "Write (creating or overwriting) a text file in the workspace.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the workspace root."},
                        "content": {"type": "string", "description": "Full file content to write."}
                    },
                    "required": ["path", "content"]
                }),
                handler: Arc::new(move |args: Value| {
                    let sandbox = sandbox.clone();
                    async move {
                        let req: FileWriteRequest = serde_json::from_value(args).map_err(|e| e.to_string())?;
                        guard_path(&sandbox, &req.path)?;
                        file_ops::file_write(&sandbox.root, req).await
                    }
                }),
                category: "core".into(),
                protected: true,
            })
            .await;
    }

    {
        let sandbox = sandbox.clone();
        registry
            .register(Tool {
                name: "list_directory".into(),
                description: "List files and subdirectories under a workspace path.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {"type": "string", "description": "Path relative to the workspace root. Defaults to '.'."}
                    }
                }),
                handler: Arc::new(move |args: Value| {
                    let sandbox = sandbox.clone();
                    async move {
                        let req: FileListRequest = serde_json::from_value(args).map_err(|e| e.to_string())?;
                        guard_path(&sandbox, &req.path)?;
                        file_ops::file_list(&sandbox.root, req).await
                    }
                }),
                category: "core".into(),
                protected: true,
            })
            .await;
    }

    {
        let sandbox = sandbox.clone();
        let exec = exec.clone();
        registry
            .register(Tool {
                name: "run_code".into(),
                description: "Execute a short script (python, bash, or javascript) in the workspace and capture its output.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "code": {"type": "string", "description": "Source code to run."},
                        "language": {"type": "string", "enum": ["python", "bash", "javascript"]},
                        "timeout": {"type": "integer", "description": "Override the default execution timeout, in seconds. 0 fails immediately without running anything."},
                        "working_dir": {"type": "string", "description": "Path relative to the workspace root to run from, instead of the default scratch directory."}
                    },
                    "required": ["code"]
                }),
                handler: Arc::new(move |args: Value| {
                    let sandbox = sandbox.clone();
                    let exec = exec.clone();
                    async move {
                        let req: RunCodeRequest = serde_json::from_value(args).map_err(|e| e.to_string())?;
                        let default_working_dir = sandbox.temp_dir.clone().unwrap_or_else(|| sandbox.root.clone());
                        run_code(&sandbox.root, &default_working_dir, req, Duration::from_secs(exec.timeout_secs), exec.max_output_chars).await
                    }
                }),
                category: "core".into(),
                protected: true,
            })
            .await;
    }
}

fn guard_path(sandbox: &SandboxConfig, requested: &str) -> Result<(), String> {
    let resolved = validate_path(&sandbox.root, requested)?;
    check_not_protected(&resolved, &sandbox.protected_paths)
}
