//! Tournament scheduling: run successive rounds of independent agents, each
//! working from the files the previous round revealed, narrowing the field
//! stage by stage until one synthesized result remains.
//!
//! Agents control their own completion via `complete_task`; the per-agent
//! timeout in [`TournamentConfig`](tourney_domain::config::TournamentConfig)
//! is a safety backstop, not the normal way a round ends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use uuid::Uuid;

use tourney_domain::config::{AgentConfig, ToolPolicy, TournamentConfig};
use tourney_providers::LlmProvider;
use tourney_tools::registry::{Tool, ToolRegistry};

use crate::agent_core::{Agent, AgentStatus};
use crate::subagent::register_sub_agent_tools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TournamentStatus {
    Pending,
    Running,
    Synthesis,
    Completed,
    Failed,
}

/// A file an agent explicitly shared for the next round (or, in the final
/// round, for the tournament's output).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealedFile {
    pub filename: String,
    pub content: String,
    pub file_type: String,
    pub agent_id: String,
    pub revealed_at: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRound {
    pub round_number: u32,
    pub agent_count: u32,
    pub agent_ids: Vec<String>,
    pub input_file_count: usize,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: String,
    pub topic: String,
    pub stages: Vec<u32>,
    pub model: String,
    pub base_path: PathBuf,
    pub status: TournamentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub synthesis_rounds: Vec<SynthesisRound>,
    pub final_files: Vec<RevealedFile>,
    pub error: Option<String>,
}

/// One running (or finished) agent container within a round: its `Agent`
/// handle, its workspace, and the files it revealed.
struct Container {
    agent: Agent,
    agent_id: String,
    workspace: PathBuf,
    revealed: Arc<Mutex<Vec<RevealedFile>>>,
}

/// Drives tournaments end to end: creating them, running every stage with
/// bounded parallelism, and persisting the synthesized output.
pub struct TournamentScheduler {
    base_path: PathBuf,
    config: TournamentConfig,
    provider: Arc<dyn LlmProvider>,
    tournaments: Mutex<HashMap<String, Tournament>>,
    containers: Mutex<HashMap<(String, String), PathBuf>>,
}

impl TournamentScheduler {
    pub fn new(base_path: impl Into<PathBuf>, config: TournamentConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self { base_path: base_path.into(), config, provider, tournaments: Mutex::new(HashMap::new()), containers: Mutex::new(HashMap::new()) }
    }

    pub fn create_tournament(&self, topic: impl Into<String>, stages: Option<Vec<u32>>, model: Option<String>) -> std::io::Result<Tournament> {
        let id = format!("tournament_{}", &Uuid::new_v4().simple().to_string()[..12]);
        let base_path = self.base_path.join(&id);
        std::fs::create_dir_all(&base_path)?;

        let tournament = Tournament {
            id: id.clone(),
            topic: topic.into(),
            stages: stages.unwrap_or_else(|| self.config.stages.clone()),
            model: model.unwrap_or_else(|| self.config.model.clone()),
            base_path,
            status: TournamentStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            synthesis_rounds: Vec::new(),
            final_files: Vec::new(),
            error: None,
        };

        self.tournaments.lock().insert(id, tournament.clone());
        Ok(tournament)
    }

    pub fn get_tournament(&self, id: &str) -> Option<Tournament> {
        self.tournaments.lock().get(id).cloned()
    }

    pub fn list_tournaments(&self) -> Vec<Tournament> {
        self.tournaments.lock().values().cloned().collect()
    }

    /// Run every stage of a tournament to completion, feeding each round's
    /// revealed files into the next as working context.
    pub async fn run_tournament(&self, id: &str) -> Result<Tournament, String> {
        let stages = {
            let mut tournaments = self.tournaments.lock();
            let tournament = tournaments.get_mut(id).ok_or_else(|| format!("tournament not found: {id}"))?;
            tournament.status = TournamentStatus::Running;
            tournament.started_at = Some(Utc::now());
            tournament.stages.clone()
        };

        let mut current_files: Vec<RevealedFile> = Vec::new();
        let mut failed: Option<String> = None;

        for (round_idx, &agent_count) in stages.iter().enumerate() {
            let round_number = round_idx as u32 + 1;
            match self.run_round(id, round_number, agent_count, &current_files).await {
                Ok(revealed) => current_files = revealed,
                Err(e) => {
                    failed = Some(e);
                    break;
                }
            }
        }

        let mut tournaments = self.tournaments.lock();
        let tournament = tournaments.get_mut(id).ok_or_else(|| format!("tournament not found: {id}"))?;

        match failed {
            Some(error) => {
                tournament.status = TournamentStatus::Failed;
                tournament.error = Some(error);
            }
            None => {
                tournament.final_files = current_files;
                write_final_output(&tournament.base_path, &tournament.final_files).map_err(|e| e.to_string())?;
                tournament.status = TournamentStatus::Completed;
            }
        }
        tournament.completed_at = Some(Utc::now());
        Ok(tournament.clone())
    }

    async fn run_round(&self, tournament_id: &str, round_number: u32, agent_count: u32, input_files: &[RevealedFile]) -> Result<Vec<RevealedFile>, String> {
        let (topic, model, timeout_secs, base_path) = {
            let tournaments = self.tournaments.lock();
            let t = tournaments.get(tournament_id).ok_or_else(|| format!("tournament not found: {tournament_id}"))?;
            (t.topic.clone(), t.model.clone(), self.config.timeout_per_agent_secs, t.base_path.clone())
        };

        let mut containers = Vec::new();
        for i in 0..agent_count {
            let agent_id = format!("agent_{}", &Uuid::new_v4().simple().to_string()[..8]);
            let container_path = base_path.join(format!("round_{round_number}")).join(&agent_id);
            let container = self.build_container(&agent_id, &container_path, &topic, &model, input_files, round_number == 1).await.map_err(|e| e.to_string())?;
            self.containers.lock().insert((tournament_id.to_string(), agent_id.clone()), container_path);
            containers.push(container);
        }

        {
            let mut tournaments = self.tournaments.lock();
            let t = tournaments.get_mut(tournament_id).ok_or_else(|| format!("tournament not found: {tournament_id}"))?;
            t.synthesis_rounds.push(SynthesisRound {
                round_number,
                agent_count,
                agent_ids: containers.iter().map(|c| c.agent_id.clone()).collect(),
                input_file_count: input_files.len(),
                status: "running".into(),
                started_at: Some(Utc::now()),
                completed_at: None,
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
        let mut handles = Vec::new();
        for container in containers {
            let semaphore = semaphore.clone();
            let timeout_secs = timeout_secs;
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let run_fut = container.agent.run(None);
                let status = match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), run_fut).await {
                    Ok(status) => status,
                    Err(_) => AgentStatus::Completed,
                };
                (status, container)
            }));
        }

        let mut revealed_for_next_round = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((_status, container)) => {
                    revealed_for_next_round.extend(container.revealed.lock().clone());
                    let logs = container.agent.get_logs();
                    if let Ok(json) = serde_json::to_string_pretty(&logs) {
                        let _ = std::fs::write(container.workspace.parent().unwrap_or(&container.workspace).join("logs.json"), json);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "tournament agent task panicked, excluding it from this round's output");
                }
            }
        }

        if let Some(t) = self.tournaments.lock().get_mut(tournament_id) {
            if let Some(round) = t.synthesis_rounds.last_mut() {
                round.status = "completed".into();
                round.completed_at = Some(Utc::now());
            }
        }

        Ok(revealed_for_next_round)
    }

    async fn build_container(
        &self,
        agent_id: &str,
        container_path: &PathBuf,
        topic: &str,
        model: &str,
        input_files: &[RevealedFile],
        is_initial_round: bool,
    ) -> std::io::Result<Container> {
        let workspace = container_path.join("workspace");
        std::fs::create_dir_all(&workspace)?;

        for file in input_files {
            std::fs::write(workspace.join(&file.filename), &file.content)?;
        }

        let tools = Arc::new(ToolRegistry::new());
        let output_files = Arc::new(Mutex::new(Vec::new()));
        register_sub_agent_tools(&tools, &workspace, output_files).await;
        let revealed = Arc::new(Mutex::new(Vec::new()));
        register_reveal_tool(&tools, &workspace, agent_id, revealed.clone()).await;

        let mut config = AgentConfig { model: model.to_string(), ..AgentConfig::default() };
        if config.max_turns.is_none() {
            config.max_turns = Some(40);
        }

        let agent = Agent::new(agent_id.to_string(), config, self.provider.clone(), tools, ToolPolicy::default()).await;
        agent.set_system_prompt(build_agent_prompt(topic, is_initial_round, input_files));

        Ok(Container { agent, agent_id: agent_id.to_string(), workspace, revealed })
    }

    pub fn get_logs(&self, tournament_id: &str, agent_id: &str) -> Option<Vec<Value>> {
        let container_path = self.containers.lock().get(&(tournament_id.to_string(), agent_id.to_string())).cloned()?;
        let contents = std::fs::read_to_string(container_path.join("logs.json")).ok()?;
        serde_json::from_str(&contents).ok()
    }

    pub fn get_files(&self, tournament_id: &str, agent_id: &str) -> std::io::Result<Vec<String>> {
        let path = self.containers.lock().get(&(tournament_id.to_string(), agent_id.to_string())).cloned();
        let Some(path) = path else { return Ok(Vec::new()) };
        let workspace = path.join("workspace");
        if !workspace.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&workspace)? {
            let entry = entry?;
            if entry.path().is_file() {
                files.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        Ok(files)
    }
}

const TOOL_LIST_TEXT: &str = "You have write_file, read_file, list_files, and output for your workspace, \
     reveal to share a file with the next synthesis round, manage_context to inspect or compact your \
     own context, and complete_task to finish.";

fn build_agent_prompt(topic: &str, is_initial_round: bool, input_files: &[RevealedFile]) -> String {
    if is_initial_round {
        format!(
            "You are one of several independent agents exploring the following topic in parallel:\n\n{topic}\n\n\
             Work in your own workspace, use the 'reveal' tool to share any file you want \
             considered in the next synthesis round, then call complete_task when done.\n\n{TOOL_LIST_TEXT}"
        )
    } else {
        let listing: Vec<String> = input_files
            .iter()
            .map(|f| {
                let prefix = &f.agent_id[..f.agent_id.len().min(12)];
                let description = f.description.as_deref().unwrap_or("no description given");
                format!("- {} from {prefix}: {description}", f.filename)
            })
            .collect();

        let bodies: Vec<String> = input_files
            .iter()
            .map(|f| format!("### {}\n```{}\n{}\n```", f.filename, f.file_type, f.content))
            .collect();

        format!(
            "You are synthesizing the work of the previous round on the following topic:\n\n{topic}\n\n\
             The following files were revealed by that round's agents:\n{}\n\n\
             Their full contents, already present in your workspace too:\n\n{}\n\n\
             Read them, combine the best ideas, use 'reveal' to share your synthesized output, \
             then call complete_task when done.\n\n{TOOL_LIST_TEXT}",
            listing.join("\n"),
            bodies.join("\n\n")
        )
    }
}

async fn register_reveal_tool(tools: &ToolRegistry, workspace: &std::path::Path, agent_id: &str, revealed: Arc<Mutex<Vec<RevealedFile>>>) {
    let workspace = workspace.to_path_buf();
    let agent_id = agent_id.to_string();
    tools
        .register(Tool {
            name: "reveal".into(),
            description: "Share a file from your workspace with the next synthesis round.".into(),
            parameter_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "filename": {"type": "string"},
                    "file_type": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["filename"]
            }),
            handler: Arc::new(move |args: Value| {
                let workspace = workspace.clone();
                let agent_id = agent_id.clone();
                let revealed = revealed.clone();
                async move {
                    let filename = args.get("filename").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let file_type = args.get("file_type").and_then(|v| v.as_str()).unwrap_or("text").to_string();
                    let description = args.get("description").and_then(|v| v.as_str()).map(String::from);
                    let path = workspace.join(std::path::Path::new(&filename).file_name().ok_or("invalid filename")?);
                    let content = tokio::fs::read_to_string(&path).await.map_err(|e| format!("file not found: {filename} ({e})"))?;
                    revealed.lock().push(RevealedFile { filename: filename.clone(), content, file_type, agent_id, revealed_at: Utc::now(), description });
                    Ok(serde_json::json!({"revealed": filename}))
                }
            }),
            category: "tournament".into(),
            protected: true,
        })
        .await;
}

/// Write every final file into `base_path/final_output`, suffixing
/// (`name_2.ext`, `name_3.ext`, ...) on a filename collision rather than
/// letting one agent's output silently clobber another's.
fn write_final_output(base_path: &std::path::Path, files: &[RevealedFile]) -> std::io::Result<()> {
    let output_dir = base_path.join("final_output");
    std::fs::create_dir_all(&output_dir)?;

    let mut used = std::collections::HashSet::new();
    for file in files {
        let mut candidate = file.filename.clone();
        let mut suffix = 2;
        while !used.insert(candidate.clone()) {
            let path = std::path::Path::new(&file.filename);
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(&file.filename);
            candidate = match path.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{stem}_{suffix}.{ext}"),
                None => format!("{stem}_{suffix}"),
            };
            suffix += 1;
        }
        std::fs::write(output_dir.join(&candidate), &file.content)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tournament_uses_config_defaults_when_unset() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(tourney_providers::mock::MockProvider::echoing("m", "hi"));
        let scheduler = TournamentScheduler::new(dir.path(), TournamentConfig::default(), provider);
        let t = scheduler.create_tournament("explore widgets", None, None).unwrap();
        assert_eq!(t.stages, vec![4, 3, 2]);
        assert_eq!(t.status, TournamentStatus::Pending);
        assert!(scheduler.get_tournament(&t.id).is_some());
    }

    #[test]
    fn synthesis_prompt_embeds_topic_and_fenced_file_contents() {
        let files = vec![RevealedFile {
            filename: "draft.md".into(),
            content: "the actual synthesized text".into(),
            file_type: "markdown".into(),
            agent_id: "agent_abcdef01".into(),
            revealed_at: Utc::now(),
            description: Some("round 1 proposal".into()),
        }];

        let prompt = build_agent_prompt("pick a color", false, &files);
        assert!(prompt.contains("pick a color"));
        assert!(prompt.contains("draft.md"));
        assert!(prompt.contains("round 1 proposal"));
        assert!(prompt.contains("```markdown\nthe actual synthesized text\n```"));
        assert!(prompt.contains("reveal"));
        assert!(prompt.contains("complete_task"));

        let initial = build_agent_prompt("pick a color", true, &[]);
        assert!(initial.contains("pick a color"));
    }

    #[test]
    fn write_final_output_suffixes_colliding_filenames() {
        let dir = tempfile::TempDir::new().unwrap();
        let files = vec![
            RevealedFile { filename: "result.md".into(), content: "a".into(), file_type: "text".into(), agent_id: "x".into(), revealed_at: Utc::now(), description: None },
            RevealedFile { filename: "result.md".into(), content: "b".into(), file_type: "text".into(), agent_id: "y".into(), revealed_at: Utc::now(), description: None },
        ];
        write_final_output(dir.path(), &files).unwrap();
        let output_dir = dir.path().join("final_output");
        assert!(output_dir.join("result.md").exists());
        assert!(output_dir.join("result_2.md").exists());
    }

    #[tokio::test]
    async fn run_tournament_runs_every_stage_and_writes_final_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let provider: Arc<dyn LlmProvider> = Arc::new(tourney_providers::mock::MockProvider::new(
            "m",
            vec![tourney_providers::mock::ScriptedTurn::ToolCalls(vec![tourney_domain::message::ToolCall {
                call_id: "c1".into(),
                tool_name: "complete_task".into(),
                arguments: serde_json::json!({"reason": "done", "summary": "nothing to reveal"}),
            }])],
        ));
        let mut config = TournamentConfig::default();
        config.stages = vec![2, 1];
        config.timeout_per_agent_secs = 5;
        let scheduler = TournamentScheduler::new(dir.path(), config, provider);
        let t = scheduler.create_tournament("tiny topic", None, None).unwrap();

        let finished = scheduler.run_tournament(&t.id).await.unwrap();
        assert_eq!(finished.status, TournamentStatus::Completed);
        assert_eq!(finished.synthesis_rounds.len(), 2);
    }
}
