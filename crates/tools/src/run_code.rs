//! Short-lived code execution: write a script to a temp file inside the
//! sandbox, run it with the matching interpreter, and capture its output.
//!
//! This deliberately does not offer a background/streaming mode — every
//! invocation blocks until the interpreter exits or the timeout fires.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::file_ops::validate_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Python,
    Bash,
    Javascript,
}

impl Language {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "python" => Ok(Language::Python),
            "bash" => Ok(Language::Bash),
            "javascript" => Ok(Language::Javascript),
            other => Err(format!(
                "unsupported language '{other}'; expected one of: python, bash, javascript"
            )),
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Language::Python => ".py",
            Language::Bash => ".sh",
            Language::Javascript => ".js",
        }
    }

    fn interpreter(self) -> &'static str {
        match self {
            Language::Python => "python3",
            Language::Bash => "bash",
            Language::Javascript => "node",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCodeRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Overrides the caller's default timeout, in seconds. `0` returns a
    /// timeout error without spawning the interpreter at all.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// A path, relative to the sandbox root, to run the script from instead
    /// of the caller's default working directory.
    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_language() -> String {
    "python".into()
}

/// Write `req.code` to a temp file under the resolved working directory,
/// execute it with the interpreter matching `req.language`, and return a
/// single formatted string with stdout, stderr, and the exit code. The temp
/// file is always removed, even on timeout or spawn failure.
///
/// `sandbox_root` bounds a model-supplied `req.working_dir`; `default_working_dir`
/// is used when the request doesn't specify one. `default_timeout` is used
/// unless `req.timeout` overrides it.
pub async fn run_code(
    sandbox_root: &Path,
    default_working_dir: &Path,
    req: RunCodeRequest,
    default_timeout: Duration,
    max_output_chars: usize,
) -> Result<Value, String> {
    let language = Language::parse(&req.language)?;

    let working_dir = match &req.working_dir {
        Some(dir) => {
            let resolved = validate_path(sandbox_root, dir)?;
            if !resolved.is_dir() {
                return Err(format!("working_dir '{dir}' is not a directory"));
            }
            resolved
        }
        None => default_working_dir.to_path_buf(),
    };

    let timeout = match req.timeout {
        Some(0) => return Ok(Value::String("ERROR: Execution timed out after 0s".into())),
        Some(secs) => Duration::from_secs(secs),
        None => default_timeout,
    };

    let file_name = format!(".run_code_{}{}", uuid::Uuid::new_v4().as_simple(), language.extension());
    let script_path = working_dir.join(&file_name);

    {
        let mut file = tokio::fs::File::create(&script_path)
            .await
            .map_err(|e| format!("failed to create temp script '{}': {e}", script_path.display()))?;
        file.write_all(req.code.as_bytes())
            .await
            .map_err(|e| format!("failed to write temp script: {e}"))?;
        file.flush().await.map_err(|e| format!("failed to flush temp script: {e}"))?;
    }

    let outcome = execute(&script_path, language, &working_dir, timeout).await;

    let _ = tokio::fs::remove_file(&script_path).await;

    let text = match outcome {
        Ok((stdout, stderr, code)) => {
            let stdout = truncate(&stdout, max_output_chars);
            let stderr = truncate(&stderr, max_output_chars);
            format!("STDOUT:\n{stdout}\nSTDERR:\n{stderr}\nExit code: {code}")
        }
        Err(TimedOut) => format!("ERROR: Execution timed out after {}s", timeout.as_secs()),
    };

    Ok(Value::String(text))
}

struct TimedOut;

async fn execute(
    script_path: &Path,
    language: Language,
    working_dir: &Path,
    timeout: Duration,
) -> Result<(String, String, i32), TimedOut> {
    let mut child = match Command::new(language.interpreter())
        .arg(script_path)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return Ok((String::new(), format!("failed to spawn interpreter: {e}"), -1)),
    };

    tokio::select! {
        status = child.wait() => {
            match status {
                Ok(status) => {
                    let mut stdout = String::new();
                    let mut stderr = String::new();
                    if let Some(mut out) = child.stdout.take() {
                        use tokio::io::AsyncReadExt;
                        let _ = out.read_to_string(&mut stdout).await;
                    }
                    if let Some(mut err) = child.stderr.take() {
                        use tokio::io::AsyncReadExt;
                        let _ = err.read_to_string(&mut stderr).await;
                    }
                    Ok((stdout, stderr, status.code().unwrap_or(-1)))
                }
                Err(e) => Ok((String::new(), format!("failed to wait on interpreter: {e}"), -1)),
            }
        }
        _ = tokio::time::sleep(timeout) => {
            let _ = child.kill().await;
            Err(TimedOut)
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}\n... [truncated]")
    }
}
