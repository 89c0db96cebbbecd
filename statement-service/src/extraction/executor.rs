use crate::extraction::error::ExtractionError;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Runs external OCR tooling with a hard timeout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
    ) -> Result<Output, ExtractionError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            program = %program,
            args = ?args,
            timeout_secs = %self.timeout.as_secs(),
            "Executing command"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ExtractionError::Timeout {
                program: program.to_string(),
                seconds: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!(
                program = %program,
                args = ?args,
                stderr = %stderr,
                "Command failed"
            );
            return Err(ExtractionError::CommandFailed {
                program: program.to_string(),
                stderr,
            });
        }

        tracing::debug!(
            program = %program,
            output_size = output.stdout.len(),
            "Command succeeded"
        );

        Ok(output)
    }
}

/// Borrow a path as `&str` for use as a command argument.
pub fn path_arg(path: &Path) -> Result<&str, ExtractionError> {
    path.to_str()
        .ok_or_else(|| ExtractionError::NonUtf8Path(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let output = executor.execute("echo", &["hello"], None).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let err = executor.execute("false", &[], None).await.unwrap_err();
        assert!(matches!(err, ExtractionError::CommandFailed { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let err = executor
            .execute("definitely-not-a-real-binary-4821", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Io(_)));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let executor = CommandExecutor::new(Duration::from_millis(100));
        let err = executor.execute("sleep", &["5"], None).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout { .. }));
    }
}
