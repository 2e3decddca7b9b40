use std::{
    env,
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{anyhow, bail, Context, Result};

mod identity;

pub use identity::{probe_identity, Implementation, InterpreterIdentity};

/// Environment variable naming the interpreter used for compilation.
pub const PYTHON_ENV: &str = "PYC_WHEEL_PYTHON";

/// Detects the Python interpreter used to compile wheels.
///
/// # Errors
///
/// Returns an error when no interpreter can be found or the detected path is
/// not valid UTF-8.
pub fn detect_interpreter() -> Result<String> {
    if let Ok(explicit) = env::var(PYTHON_ENV) {
        if !explicit.is_empty() {
            return Ok(explicit);
        }
    }

    for candidate in ["python3", "python"] {
        if let Ok(path) = which::which(candidate) {
            return path
                .into_os_string()
                .into_string()
                .map_err(|_| anyhow!("non-utf8 path"));
        }
    }

    bail!("no python interpreter found; set {PYTHON_ENV}")
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Captured stdout and stderr, in that order.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Runs `program` to completion with captured output.
///
/// # Errors
///
/// Returns an error when the process cannot be started.
pub fn run_command(program: &str, args: &[String], cwd: Option<&Path>) -> Result<RunOutput> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    tracing::debug!(%program, ?args, "running python");
    let output = command
        .output()
        .with_context(|| format!("failed to start {program}"))?;
    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    Ok(RunOutput {
        code,
        stdout,
        stderr,
    })
}
