//! Configuration types for agents, sandboxing, and the tournament scheduler.
//!
//! Every struct follows the same convention: `#[serde(default = "fn")]` on
//! each field plus a matching `impl Default`, so a config file only needs to
//! name the fields it overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-agent tunables: model selection, context-window limits, and the
/// compaction policy that governs when the context manager summarizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "d_model")]
    pub model: String,
    /// Model used to summarize during compaction. Falls back to `model` when unset.
    #[serde(default)]
    pub summarizer_model: Option<String>,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "d_threshold")]
    pub compaction_threshold: f32,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_response_tokens")]
    pub max_response_tokens: u32,
    /// Hard cap on turns. `None` means unbounded (relies on `complete_task`).
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Wall-clock cap on a single `run()`, in seconds. `None` means unbounded.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "d_preserve_recent")]
    pub preserve_recent_messages: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: d_model(),
            summarizer_model: None,
            max_tokens: d_max_tokens(),
            compaction_threshold: d_threshold(),
            temperature: d_temperature(),
            max_response_tokens: d_max_response_tokens(),
            max_turns: None,
            timeout_secs: None,
            preserve_recent_messages: d_preserve_recent(),
        }
    }
}

fn d_model() -> String {
    "default-model".into()
}
fn d_max_tokens() -> u32 {
    128_000
}
fn d_threshold() -> f32 {
    0.85
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_response_tokens() -> u32 {
    4096
}
fn d_preserve_recent() -> usize {
    5
}

/// Valid range for `compaction_threshold` / `manage_context(set_threshold)`.
pub const THRESHOLD_MIN: f32 = 0.5;
pub const THRESHOLD_MAX: f32 = 0.95;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool allow/deny policy — dotted-prefix matching, deny evaluated first.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicy {
    /// Tool name prefixes this agent may use. `["*"]` or empty = unrestricted.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Tool name prefixes this agent is denied. Checked before `allow`.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    pub fn allows(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();
        for d in &self.deny {
            let d_lower = d.to_ascii_lowercase();
            if d_lower == "*" || name == d_lower || name.starts_with(&format!("{d_lower}.")) {
                return false;
            }
        }
        if self.allow.is_empty() || self.allow.iter().any(|a| a == "*") {
            return true;
        }
        for a in &self.allow {
            let a_lower = a.to_ascii_lowercase();
            if name == a_lower || name.starts_with(&format!("{a_lower}.")) {
                return true;
            }
        }
        false
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sandbox / workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filesystem containment for an agent's built-in file/exec tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Root directory all relative tool paths resolve against; tool access
    /// outside this tree is rejected.
    pub root: PathBuf,
    /// Absolute paths (or ancestors of them) that are off-limits even though
    /// they fall within `root` — e.g. the agent's own state directory.
    #[serde(default)]
    pub protected_paths: Vec<PathBuf>,
    /// Working directory `run_code` writes its temp script into. Defaults to
    /// `root` when unset.
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl SandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            protected_paths: Vec::new(),
            temp_dir: None,
        }
    }
}

/// Wall-clock and interpreter policy for the `run_code` tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    #[serde(default = "d_exec_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "d_max_output_chars")]
    pub max_output_chars: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_exec_timeout(),
            max_output_chars: d_max_output_chars(),
        }
    }
}

fn d_exec_timeout() -> u64 {
    30
}
fn d_max_output_chars() -> usize {
    200_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tournament scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shape of a tournament: how many agents compete in each round, how many
/// rounds, and the concurrency/timeout bounds applied to every container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentConfig {
    /// Agent count per round, first to last. `[4, 3, 2]` means an initial
    /// round of 4 independent agents, synthesized down to 3, then to 2.
    #[serde(default = "d_stages")]
    pub stages: Vec<u32>,
    #[serde(default = "d_model")]
    pub model: String,
    /// Maximum containers running concurrently within a round.
    #[serde(default = "d_max_parallel")]
    pub max_parallel: usize,
    /// Wall-clock cap per agent container, in seconds.
    #[serde(default = "d_timeout_per_agent")]
    pub timeout_per_agent_secs: u64,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            stages: d_stages(),
            model: d_model(),
            max_parallel: d_max_parallel(),
            timeout_per_agent_secs: d_timeout_per_agent(),
        }
    }
}

fn d_stages() -> Vec<u32> {
    vec![4, 3, 2]
}
fn d_max_parallel() -> usize {
    8
}
fn d_timeout_per_agent() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_policy_empty_allows_everything_but_denied() {
        let policy = ToolPolicy {
            allow: vec![],
            deny: vec!["run_code".into()],
        };
        assert!(policy.allows("read_file"));
        assert!(!policy.allows("run_code"));
    }

    #[test]
    fn tool_policy_deny_wins_over_allow() {
        let policy = ToolPolicy {
            allow: vec!["*".into()],
            deny: vec!["run_code".into()],
        };
        assert!(!policy.allows("run_code"));
        assert!(policy.allows("write_file"));
    }

    #[test]
    fn tool_policy_allow_prefix_match() {
        let policy = ToolPolicy {
            allow: vec!["file".into()],
            deny: vec![],
        };
        assert!(policy.allows("file"));
        assert!(policy.allows("file.read"));
        assert!(!policy.allows("filesystem"));
    }

    #[test]
    fn tool_policy_case_insensitive() {
        let policy = ToolPolicy {
            allow: vec!["Read_File".into()],
            deny: vec![],
        };
        assert!(policy.allows("read_file"));
    }

    #[test]
    fn agent_config_default_matches_documented_values() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_tokens, 128_000);
        assert_eq!(cfg.compaction_threshold, 0.85);
        assert_eq!(cfg.preserve_recent_messages, 5);
        assert!(cfg.max_turns.is_none());
    }

    #[test]
    fn tournament_config_default_stages() {
        let cfg = TournamentConfig::default();
        assert_eq!(cfg.stages, vec![4, 3, 2]);
        assert_eq!(cfg.max_parallel, 8);
    }
}
