use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{GenerationRequest, LanguageModelService, TextSender, TextStream};
use crate::error::{AgentError, BackendFailure};

const STREAM_BUFFER: usize = 32;

/// Backend that shells out to the `claude` CLI and streams its stdout line by line.
#[derive(Debug, Clone)]
pub struct ClaudeCliService {
    name: String,
    model: String,
    program: String,
}

impl ClaudeCliService {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            program: "claude".to_string(),
        }
    }

    /// Use a different executable, e.g. a wrapper script.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the configured executable runs and answers `--version`.
    pub async fn is_available(&self) -> bool {
        match Command::new(&self.program).arg("--version").output().await {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!(program = %self.program, error = %e, "CLI not runnable");
                false
            }
        }
    }

    fn command(&self, request: &GenerationRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args([
            "-p",
            &request.user_prompt,
            "--system-prompt",
            &request.system_prompt,
            "--model",
            &self.model,
            "--output-format",
            "text",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LanguageModelService for ClaudeCliService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: GenerationRequest) -> Result<TextStream, AgentError> {
        debug!(model = %self.model, role = %request.role, "Invoking claude CLI");

        let mut child = self.command(&request).spawn().map_err(|e| {
            AgentError::Config(format!("failed to spawn {}: {e}", self.program))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentError::backend(&self.name, BackendFailure::Transient("no stdout pipe".into()))
        })?;
        let stderr = child.stderr.take();

        let (tx, stream) = TextStream::channel(STREAM_BUFFER);
        let backend = self.name.clone();
        tokio::spawn(async move {
            pump_output(backend, child, stdout, stderr, tx).await;
        });
        Ok(stream)
    }
}

async fn pump_output(
    backend: String,
    mut child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
    stderr: Option<tokio::process::ChildStderr>,
    tx: TextSender,
) {
    // drained alongside stdout so a chatty child cannot fill the pipe and stall
    let stderr = stderr.map(|mut stderr| {
        tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        })
    });
    let mut lines = BufReader::new(stdout).lines();
    let mut produced = false;

    loop {
        let line = tokio::select! {
            _ = tx.stopped() => {
                debug!(backend = %backend, "Stream dropped, killing claude CLI");
                let _ = child.kill().await;
                return;
            }
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                produced |= !line.trim().is_empty();
                if !tx.send(Ok(format!("{line}\n"))).await {
                    let _ = child.kill().await;
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let failure = BackendFailure::Transient(format!("reading stdout: {e}"));
                tx.send(Err(AgentError::backend(&backend, failure))).await;
                let _ = child.kill().await;
                return;
            }
        }
    }

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            let failure = BackendFailure::Transient(format!("waiting for claude: {e}"));
            tx.send(Err(AgentError::backend(&backend, failure))).await;
            return;
        }
    };

    if !status.success() {
        let err_text = match stderr {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        warn!(status = %status, stderr = %err_text.trim(), "Claude CLI failed");
        let failure = BackendFailure::Transient(format!("claude exited {status}: {}", err_text.trim()));
        tx.send(Err(AgentError::backend(&backend, failure))).await;
    } else if !produced {
        let failure = BackendFailure::Malformed("claude returned an empty response".into());
        tx.send(Err(AgentError::backend(&backend, failure))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest {
            role: "narrator".into(),
            system_prompt: "sys".into(),
            user_prompt: "hello".into(),
        }
    }

    #[test]
    fn builds_expected_arguments() {
        let service = ClaudeCliService::new("narrator", "claude-sonnet");
        let cmd = service.command(&request());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "-p",
                "hello",
                "--system-prompt",
                "sys",
                "--model",
                "claude-sonnet",
                "--output-format",
                "text"
            ]
        );
    }

    #[tokio::test]
    async fn missing_program_is_a_config_error() {
        let service = ClaudeCliService::new("narrator", "m").with_program("definitely-not-installed-cli");
        let err = service.invoke(request()).await.err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_stdout_lines() {
        // `echo` prints its arguments, which start with "-p hello"
        let service = ClaudeCliService::new("narrator", "m").with_program("echo");
        let text = service.invoke(request()).await.unwrap().collect_text().await.unwrap();
        assert!(text.contains("hello"));
        assert!(text.ends_with('\n'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_transient() {
        let service = ClaudeCliService::new("narrator", "m").with_program("false");
        let err = service.invoke(request()).await.unwrap().collect_text().await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    #[cfg(unix)]
    fn script(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn noisy_stderr_does_not_stall_stdout() {
        let dir = tempfile::tempdir().unwrap();
        // well past a pipe buffer of stderr before any stdout
        let program = script(&dir, "head -c 262144 /dev/zero | tr '\\0' x >&2\necho steady");
        let service = ClaudeCliService::new("narrator", "m").with_program(program);
        let text = tokio::time::timeout(
            std::time::Duration::from_secs(20),
            async { service.invoke(request()).await.unwrap().collect_text().await },
        )
        .await
        .expect("claude CLI output stalled")
        .unwrap();
        assert_eq!(text, "steady\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let program = script(&dir, "echo 'unknown model m' >&2\nexit 3");
        let service = ClaudeCliService::new("narrator", "m").with_program(program);
        let err = service.invoke(request()).await.unwrap().collect_text().await.unwrap_err();
        assert!(err.to_string().contains("unknown model m"), "{err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn availability_checks_the_configured_program() {
        assert!(ClaudeCliService::new("n", "m").with_program("true").is_available().await);
        assert!(!ClaudeCliService::new("n", "m")
            .with_program("definitely-not-installed-cli")
            .is_available()
            .await);
    }
}
