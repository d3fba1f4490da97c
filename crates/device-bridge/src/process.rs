use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::BridgeError;

/// Spawn `cmd`, polling for completion every `poll_interval` until either
/// the child exits or `cancel` fires. On cancellation the child is sent a
/// termination signal and then waited on to completion — cancellation
/// never abandons a child, it only hastens its exit.
pub(crate) async fn run_cancelable(
    mut cmd: Command,
    step: &'static str,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<std::process::ExitStatus, BridgeError> {
    let mut child = cmd
        .spawn()
        .map_err(|e| BridgeError::Spawn(step.to_string(), e))?;

    loop {
        if cancel.is_cancelled() {
            if let Some(pid) = child.id() {
                terminate_pid(pid);
            }
            break;
        }

        match tokio::time::timeout(poll_interval, child.wait()).await {
            Ok(Ok(status)) => return Ok(status),
            Ok(Err(e)) => return Err(BridgeError::Io { step, source: e }),
            Err(_elapsed) => continue,
        }
    }

    child
        .wait()
        .await
        .map_err(|e| BridgeError::Io { step, source: e })
}

/// Send SIGTERM to `pid` by shelling out to `kill`, mirroring the way a
/// cooperative CLI tool signals a child it doesn't own directly.
pub(crate) fn terminate_pid(pid: u32) {
    let _ = std::process::Command::new("kill")
        .args(["-15", &pid.to_string()])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
}

/// Quote a single token for inclusion in a remote shell command, the way
/// Python's `shlex.quote` does: wrap in single quotes, escaping embedded
/// single quotes.
pub(crate) fn shell_quote(token: &str) -> String {
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric() || "@%_-+=:,./".contains(c)) {
        return token.to_string();
    }
    let escaped = token.replace('\'', r"'\''");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_quote_wraps_tokens_with_special_characters() {
        assert_eq!(shell_quote("hello"), "hello");
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("it's"), r#"'it'\''s'"#);
    }
}
