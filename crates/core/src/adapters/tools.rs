use std::{ffi::OsStr, process::Output, time::Duration};

use tokio::process::Command;
use tracing::debug;

use crate::{
    error::{AdapterError, PipelineError},
    retry::with_timeout,
};

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Run `tool` with `args`, killing it if it outlives `limit`. A non-zero exit
/// is reported as [`AdapterError::ToolFailed`] with the captured stderr.
pub async fn run_tool<I, S>(
    tool: &'static str,
    args: I,
    limit: Duration,
) -> Result<Output, AdapterError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(tool);
    command.args(args).kill_on_drop(true);

    let output = with_timeout(tool, limit, async {
        command
            .output()
            .await
            .map_err(|source| AdapterError::Spawn { tool, source })
    })
    .await?;

    if !output.status.success() {
        return Err(AdapterError::ToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Setup check: fail the phase unless `tool` starts and reports a version.
pub async fn ensure_tool(tool: &'static str, version_arg: &str) -> Result<(), PipelineError> {
    match run_tool(tool, [version_arg], VERSION_CHECK_TIMEOUT).await {
        Ok(output) => {
            let version = String::from_utf8_lossy(&output.stdout);
            debug!(tool, version = version.lines().next().unwrap_or(""), "tool available");
            Ok(())
        }
        Err(e) => Err(PipelineError::MissingTool {
            tool: tool.to_string(),
            reason: e.to_string(),
        }),
    }
}
