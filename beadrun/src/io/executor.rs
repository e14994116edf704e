//! Worker substrate abstraction.
//!
//! The [`Executor`] trait decouples scheduling from whatever actually does the
//! work for a bead. Tests use scripted executors that resolve with
//! predetermined results without spawning processes.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Bead, ExecutionResult};
use crate::io::config::RunConfig;
use crate::io::process::run_command_with_timeout;

/// Abstraction over worker backends.
///
/// An execution never errors: anything that goes wrong while running a bead
/// (spawn failure, timeout, non-zero exit) resolves as a failed
/// [`ExecutionResult`]. Implementations do not retry.
pub trait Executor {
    fn execute(&self, bead: Bead) -> impl Future<Output = ExecutionResult>;
}

/// Executor that runs a configured command once per bead.
///
/// The bead payload is written to the child's stdin; id, title, kind and group
/// are exported as `BEADRUN_BEAD_*` environment variables. The child is not
/// killed when its future is dropped, so a hard stop leaves it running.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl CommandExecutor {
    pub fn from_config(config: &RunConfig, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: config.executor.command.clone(),
            workdir: workdir.into(),
            timeout: config.unit_timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn command_for(&self, bead: &Bead) -> Option<Command> {
        let (program, args) = self.command.split_first()?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("BEADRUN_BEAD_ID", &bead.id)
            .env("BEADRUN_BEAD_TITLE", &bead.title)
            .env("BEADRUN_BEAD_KIND", bead.kind.as_str())
            .env("BEADRUN_BEAD_GROUP", bead.group.as_deref().unwrap_or(""))
            .kill_on_drop(false);
        Some(cmd)
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(bead = %bead.id, timeout_secs = self.timeout.as_secs()))]
    async fn execute(&self, bead: Bead) -> ExecutionResult {
        let Some(cmd) = self.command_for(&bead) else {
            return ExecutionResult::failure("executor command is empty");
        };
        info!(title = %bead.title, "running bead command");

        let payload = bead.payload.into_bytes();
        let limit = self.output_limit_bytes;
        let output = match run_command_with_timeout(cmd, Some(payload), self.timeout, limit).await {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "bead command could not run");
                return ExecutionResult::failure(format!("{err:#}"));
            }
        };

        if output.timed_out {
            return ExecutionResult::failure(format!("timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            let detail = match output.last_stderr_line() {
                Some(line) => format!("exit {code}: {line}"),
                None => format!("exit {code}"),
            };
            debug!(%detail, "bead command failed");
            return ExecutionResult::failure(detail);
        }

        ExecutionResult::success(
            output
                .last_stdout_line()
                .unwrap_or_else(|| "exit 0".to_string()),
        )
    }
}
