// ABOUTME: Liveness probing for backend executables.
// ABOUTME: Checks PATH presence and runs a bounded version query.

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as ProcessCommand;

/// Upper bound for a version-query subprocess
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Verify that `binary` resolves on the search path and answers a version
/// query with exit status zero within `timeout`.
///
/// Returns a human-readable reason on failure, suitable for a backend's
/// `last_error` field.
pub async fn probe_version(binary: &str, args: &[&str], timeout: Duration) -> Result<(), String> {
    let resolved =
        which::which(binary).map_err(|e| format!("{} not found on PATH: {}", binary, e))?;

    let run = async {
        ProcessCommand::new(&resolved)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
    };

    match tokio::time::timeout(timeout, run).await {
        Err(_) => Err(format!(
            "{} version query timed out after {}s",
            binary,
            timeout.as_secs()
        )),
        Ok(Err(e)) => Err(format!("failed to run {}: {}", binary, e)),
        Ok(Ok(status)) if !status.success() => Err(format!(
            "{} version query exited with {:?}",
            binary,
            status.code()
        )),
        Ok(Ok(_)) => Ok(()),
    }
}
