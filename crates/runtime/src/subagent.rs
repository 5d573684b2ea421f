//! Sub-agents: isolated, one-off task runners with their own workspace.
//! Unlike the main agent, `complete_task` here is terminal — `run()` ends
//! the moment the sub-agent calls it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tourney_domain::config::{AgentConfig, ExecConfig, ToolPolicy};
use tourney_providers::LlmProvider;
use tourney_tools::registry::{Tool, ToolRegistry};
use tourney_tools::run_code::{run_code, RunCodeRequest};

use crate::agent_core::{Agent, AgentStatus};

/// One file the sub-agent explicitly marked as a deliverable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    pub description: Option<String>,
    pub size: usize,
}

/// A sandboxed, single-task agent with its own `workspace/`, `output/`, and
/// `logs/` directories under `root`.
pub struct SubAgent {
    agent: Agent,
    task: String,
    workspace: PathBuf,
    output_path: PathBuf,
    output_files: Arc<Mutex<Vec<OutputFile>>>,
}

/// Sanitize a model-supplied filename to its bare file name, preventing
/// `../` traversal out of the workspace.
fn sanitize_filename(name: &str) -> String {
    Path::new(name).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "untitled.txt".into())
}

impl SubAgent {
    pub async fn new(
        task: impl Into<String>,
        root: impl Into<PathBuf>,
        mut config: AgentConfig,
        provider: Arc<dyn LlmProvider>,
        tool_policy: ToolPolicy,
        enable_code_execution: bool,
    ) -> std::io::Result<Self> {
        if config.max_turns.is_none() {
            config.max_turns = Some(30);
        }

        let root = root.into();
        let workspace = root.join("workspace");
        let output_path = root.join("output");
        let logs_path = root.join("logs");
        std::fs::create_dir_all(&workspace)?;
        std::fs::create_dir_all(&output_path)?;
        std::fs::create_dir_all(&logs_path)?;

        let tools = Arc::new(ToolRegistry::new());
        let output_files: Arc<Mutex<Vec<OutputFile>>> = Arc::new(Mutex::new(Vec::new()));
        register_sub_agent_tools(&tools, &workspace, output_files.clone()).await;
        if enable_code_execution {
            register_code_execution(&tools, &workspace).await;
        }

        let agent = Agent::new(format!("sub-{}", uuid::Uuid::new_v4()), config, provider, tools, tool_policy).await;

        Ok(Self { agent, task: task.into(), workspace, output_path, output_files })
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Run to completion: `complete_task` ends the run, `max_turns` bounds
    /// it otherwise, and any configured `timeout_secs` bounds it overall.
    pub async fn run(&self, system_prompt: impl Into<String>) -> AgentStatus {
        self.agent.set_system_prompt(system_prompt);
        self.agent.run(Some(self.task.clone())).await
    }

    /// Copy every file the sub-agent called `output` on into `output_path`
    /// and return the recorded metadata.
    pub fn collect_outputs(&self) -> std::io::Result<Vec<OutputFile>> {
        let files = self.output_files.lock().clone();
        for file in &files {
            let src = self.workspace.join(&file.filename);
            let dst = self.output_path.join(&file.filename);
            if src.exists() {
                std::fs::copy(&src, &dst)?;
            }
        }
        Ok(files)
    }
}

pub(crate) async fn register_sub_agent_tools(tools: &ToolRegistry, workspace: &Path, output_files: Arc<Mutex<Vec<OutputFile>>>) {
    {
        let workspace = workspace.to_path_buf();
        tools
            .register(Tool {
                name: "write_file".into(),
                description: "Write content to a file in your workspace.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "content": {"type": "string"}
                    },
                    "required": ["filename", "content"]
                }),
                handler: Arc::new(move |args: Value| {
                    let workspace = workspace.clone();
                    async move {
                        let filename = sanitize_filename(args.get("filename").and_then(|v| v.as_str()).unwrap_or("untitled.txt"));
                        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("").to_string();
                        let path = workspace.join(&filename);
                        if let Some(parent) = path.parent() {
                            tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
                        }
                        tokio::fs::write(&path, &content).await.map_err(|e| e.to_string())?;
                        Ok(serde_json::json!({"filename": filename, "size": content.len()}))
                    }
                }),
                category: "file".into(),
                protected: true,
            })
            .await;
    }

    {
        let workspace = workspace.to_path_buf();
        tools
            .register(Tool {
                name: "read_file".into(),
                description: "Read a file from your workspace.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"filename": {"type": "string"}},
                    "required": ["filename"]
                }),
                handler: Arc::new(move |args: Value| {
                    let workspace = workspace.clone();
                    async move {
                        let filename = sanitize_filename(args.get("filename").and_then(|v| v.as_str()).unwrap_or(""));
                        let path = workspace.join(&filename);
                        match tokio::fs::read_to_string(&path).await {
                            Ok(content) => Ok(serde_json::json!({"content": content})),
                            Err(e) => Err(format!("file not found: {filename} ({e})")),
                        }
                    }
                }),
                category: "file".into(),
                protected: true,
            })
            .await;
    }

    {
        let workspace = workspace.to_path_buf();
        tools
            .register(Tool {
                name: "list_files".into(),
                description: "List all files in your workspace.".into(),
                parameter_schema: serde_json::json!({"type": "object", "properties": {}}),
                handler: Arc::new(move |_args: Value| {
                    let workspace = workspace.clone();
                    async move {
                        let mut files = Vec::new();
                        let mut stack = vec![workspace.clone()];
                        while let Some(dir) = stack.pop() {
                            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| e.to_string())?;
                            while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
                                let path = entry.path();
                                if path.is_dir() {
                                    stack.push(path);
                                } else if let Ok(rel) = path.strip_prefix(&workspace) {
                                    let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                                    files.push(serde_json::json!({"path": rel.to_string_lossy(), "size": size}));
                                }
                            }
                        }
                        Ok(serde_json::json!({"files": files}))
                    }
                }),
                category: "file".into(),
                protected: true,
            })
            .await;
    }

    {
        let workspace = workspace.to_path_buf();
        let output_files = output_files.clone();
        tools
            .register(Tool {
                name: "output".into(),
                description: "Mark a file in your workspace as an output to be returned as part of your results.".into(),
                parameter_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "filename": {"type": "string"},
                        "description": {"type": "string"}
                    },
                    "required": ["filename"]
                }),
                handler: Arc::new(move |args: Value| {
                    let workspace = workspace.clone();
                    let output_files = output_files.clone();
                    async move {
                        let filename = sanitize_filename(args.get("filename").and_then(|v| v.as_str()).unwrap_or(""));
                        let description = args.get("description").and_then(|v| v.as_str()).map(String::from);
                        let path = workspace.join(&filename);
                        let metadata = tokio::fs::metadata(&path).await.map_err(|e| format!("file not found: {filename} ({e})"))?;
                        output_files.lock().push(OutputFile { filename: filename.clone(), description: description.clone(), size: metadata.len() as usize });
                        Ok(serde_json::json!({"filename": filename, "marked_as_output": true}))
                    }
                }),
                category: "output".into(),
                protected: true,
            })
            .await;
    }
}

async fn register_code_execution(tools: &ToolRegistry, workspace: &Path) {
    let workspace = workspace.to_path_buf();
    let exec = Arc::new(ExecConfig::default());
    tools
        .register(Tool {
            name: "run_code".into(),
            description: "Execute a short script (python, bash, or javascript) in your workspace and capture its output.".into(),
            parameter_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {"type": "string"},
                    "language": {"type": "string", "enum": ["python", "bash", "javascript"]},
                    "timeout": {"type": "integer", "description": "Override the default execution timeout, in seconds. 0 fails immediately without running anything."},
                    "working_dir": {"type": "string", "description": "Path relative to your workspace root to run from, instead of the workspace root itself."}
                },
                "required": ["code"]
            }),
            handler: Arc::new(move |args: Value| {
                let workspace = workspace.clone();
                let exec = exec.clone();
                async move {
                    let req: RunCodeRequest = serde_json::from_value(args).map_err(|e| e.to_string())?;
                    run_code(&workspace, &workspace, req, Duration::from_secs(exec.timeout_secs), exec.max_output_chars).await
                }
            }),
            category: "core".into(),
            protected: true,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tourney_domain::message::ToolCall;
    use tourney_providers::mock::{MockProvider, ScriptedTurn};

    #[tokio::test]
    async fn write_then_output_collects_into_output_dir() {
        let root = tempfile::TempDir::new().unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new(
            "mock",
            vec![
                ScriptedTurn::ToolCalls(vec![ToolCall {
                    call_id: "c1".into(),
                    tool_name: "write_file".into(),
                    arguments: serde_json::json!({"filename": "result.txt", "content": "hello"}),
                }]),
                ScriptedTurn::ToolCalls(vec![
                    ToolCall {
                        call_id: "c2".into(),
                        tool_name: "output".into(),
                        arguments: serde_json::json!({"filename": "result.txt", "description": "final answer"}),
                    },
                    ToolCall {
                        call_id: "c3".into(),
                        tool_name: "complete_task".into(),
                        arguments: serde_json::json!({"reason": "done", "summary": "wrote result.txt"}),
                    },
                ]),
            ],
        ));

        let sub = SubAgent::new("write a result file", root.path(), AgentConfig::default(), provider, ToolPolicy::default(), false).await.unwrap();
        let status = sub.run("you are a sub-agent").await;
        assert_eq!(status, AgentStatus::Completed);

        let outputs = sub.collect_outputs().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].filename, "result.txt");
        assert!(root.path().join("output/result.txt").exists());
    }

    #[tokio::test]
    async fn sub_agent_defaults_max_turns_to_30() {
        let root = tempfile::TempDir::new().unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::echoing("mock", "still working"));
        let sub = SubAgent::new("loop forever", root.path(), AgentConfig::default(), provider, ToolPolicy::default(), false).await.unwrap();
        let status = sub.run("sys").await;
        assert_eq!(status, AgentStatus::Completed);
        assert_eq!(sub.agent().turn_count(), 30);
    }

    #[tokio::test]
    async fn filename_traversal_is_sanitized_to_basename() {
        let root = tempfile::TempDir::new().unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new(
            "mock",
            vec![ScriptedTurn::ToolCalls(vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "write_file".into(),
                arguments: serde_json::json!({"filename": "../../etc/escape.txt", "content": "x"}),
            }])],
        ));
        let sub = SubAgent::new("task", root.path(), AgentConfig::default(), provider, ToolPolicy::default(), false).await.unwrap();
        let _ = sub.run("sys").await;
        assert!(sub.workspace().join("escape.txt").exists());
        assert!(!root.path().join("etc").exists());
    }
}
