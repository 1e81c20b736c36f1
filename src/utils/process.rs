// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// 外部命令执行错误
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{0}` timed out")]
    Timeout(String),
}

/// 外部命令的执行结果
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr 末尾片段，用于错误信息
    pub fn stderr_tail(&self) -> String {
        tail(&self.stderr, 2000)
    }
}

/// 替换参数中的 `{name}` 占位符
pub fn render_args(args: &[String], vars: &[(&str, String)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            vars.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

/// 运行命令并捕获输出
///
/// 超时后子进程会被杀死
pub async fn run_captured(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    debug!(program, ?args, "running command");
    let start = Instant::now();

    let child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?,
        Err(_) => return Err(ProcessError::Timeout(program.to_string())),
    };

    let result = CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration: start.elapsed(),
    };
    debug!(program, code = ?result.code, elapsed_ms = result.duration.as_millis() as u64, "command finished");
    Ok(result)
}

fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_args_replaces_placeholders() {
        let args = vec![
            "install".to_string(),
            "--target={target}".to_string(),
            "-r".to_string(),
            "{manifest}".to_string(),
        ];
        let rendered = render_args(
            &args,
            &[
                ("target", "/tmp/env".to_string()),
                ("manifest", "/tmp/requirements.txt".to_string()),
            ],
        );
        assert_eq!(
            rendered,
            vec!["install", "--target=/tmp/env", "-r", "/tmp/requirements.txt"]
        );
    }

    #[test]
    fn test_tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("  abc \n", 10), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captured_reports_exit_code() {
        let output = run_captured(
            "sh",
            &["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            None,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr_tail(), "err");
    }

    #[tokio::test]
    async fn test_missing_program_is_a_spawn_error() {
        let result = run_captured(
            "crawlship-definitely-missing-program",
            &[],
            None,
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
