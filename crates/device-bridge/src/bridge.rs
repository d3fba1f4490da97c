use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use task_core::DeviceInfo;

use crate::config::AdbBridgeConfig;
use crate::error::BridgeError;
use crate::process::{run_cancelable, shell_quote, terminate_pid};

/// The five operations the task lifecycle engine needs from a device
/// bridge. `AdbBridge` is the only implementation; the trait exists so
/// the worker and scheduler can be exercised against a fake in tests.
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    async fn list_devices(&self) -> Vec<String>;

    async fn get_info(&self, device_id: &str) -> DeviceInfo;

    async fn push_data(
        &self,
        device_id: &str,
        local_tar: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError>;

    async fn pull_data(
        &self,
        device_id: &str,
        src_paths: &[String],
        local_tar: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError>;

    async fn run(
        &self,
        device_id: &str,
        stdout_path: &Path,
        stderr_path: &Path,
        remote_cmd: &[String],
        cancel: &CancellationToken,
    ) -> Result<i32, BridgeError>;
}

/// A device bridge backed by the real `adb` CLI.
pub struct AdbBridge {
    config: AdbBridgeConfig,
}

impl AdbBridge {
    pub fn new(config: AdbBridgeConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd
    }

    async fn query_output(&self, args: &[&str]) -> Option<String> {
        let mut cmd = self.command(args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        let fut = cmd.output();
        match tokio::time::timeout(self.config.query_timeout, fut).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            _ => None,
        }
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    async fn list_devices(&self) -> Vec<String> {
        let Some(raw) = self.query_output(&["devices"]).await else {
            return Vec::new();
        };

        let mut devices: Vec<String> = raw
            .lines()
            .filter(|line| line.contains('\t') && line.contains("device"))
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect();
        devices.sort();
        devices
    }

    async fn get_info(&self, device_id: &str) -> DeviceInfo {
        let mut power_on = None;
        if let Some(raw) = self
            .query_output(&["-s", device_id, "shell", "dumpsys", "input_method"])
            .await
        {
            for line in raw.lines() {
                if line.contains("mSystemReady") {
                    if line.contains("mScreenOn") {
                        power_on = Some(line.contains("mScreenOn=true"));
                    } else if line.contains("mInteractive") {
                        power_on = Some(line.contains("mInteractive=true"));
                    }
                }
            }
        }

        if power_on.is_none() {
            if let Some(raw) = self
                .query_output(&["-s", device_id, "shell", "dumpsys", "power"])
                .await
            {
                for line in raw.lines() {
                    if line.contains("Display Power") {
                        power_on = Some(line.contains("ON"));
                    }
                }
            }
        }

        let mut battery = None;
        if let Some(raw) = self
            .query_output(&["-s", device_id, "shell", "dumpsys", "battery"])
            .await
        {
            for line in raw.lines() {
                if line.contains("level") {
                    battery = line.split_whitespace().last().and_then(|v| v.parse().ok());
                }
            }
        }

        let mut hostname = self
            .query_output(&["-s", device_id, "shell", "getprop", "persist.project_name"])
            .await
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if hostname.is_none() {
            hostname = self
                .query_output(&["-s", device_id, "shell", "getprop", "ro.product.model"])
                .await
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
        }

        DeviceInfo {
            device_id: device_id.to_string(),
            power_on,
            battery,
            hostname,
        }
    }

    async fn push_data(
        &self,
        device_id: &str,
        local_tar: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        let workspace = &self.config.device_workspace;

        // Best-effort reset of the device workspace; the original
        // implementation doesn't gate on this step's exit status either.
        let rm_cmd = self.command(&["-s", device_id, "shell", "rm", "-rf", workspace]);
        let _ = run_cancelable(rm_cmd, "push:rm", self.config.poll_interval, cancel).await;

        let remote_input = format!("{workspace}/__input.tar");
        let push_cmd = self.command(&[
            "-s",
            device_id,
            "push",
            "--sync",
            &local_tar.to_string_lossy(),
            &remote_input,
        ]);
        let status = run_cancelable(push_cmd, "push:push", self.config.poll_interval, cancel).await?;
        if !status.success() {
            return Err(BridgeError::NonZeroExit {
                step: "push:push",
                code: status.code().unwrap_or(-1),
            });
        }

        let extract = format!(
            "cd {workspace} && tar xvf __input.tar --no-same-owner --exclude */__empty.txt"
        );
        let extract_cmd = self.command(&["-s", device_id, "shell", &extract]);
        let status =
            run_cancelable(extract_cmd, "push:extract", self.config.poll_interval, cancel).await?;
        if !status.success() {
            return Err(BridgeError::NonZeroExit {
                step: "push:extract",
                code: status.code().unwrap_or(-1),
            });
        }

        Ok(())
    }

    async fn pull_data(
        &self,
        device_id: &str,
        src_paths: &[String],
        local_tar: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        let workspace = &self.config.device_workspace;

        let quoted_paths = src_paths
            .iter()
            .map(|p| format!("'{p}'"))
            .collect::<Vec<_>>()
            .join(" ");
        let remote_cmd = format!(
            "cd {workspace}; touch __empty.txt; paths=(); for p in {quoted_paths} __empty.txt; \
             do if [ -f \"$p\" -o -d \"$p\" ]; then paths+=($p); fi; done; \
             tar cvf __output.tar ${{paths[@]}}"
        );

        let tar_cmd = self.command(&["-s", device_id, "shell", &remote_cmd]);
        let status = run_cancelable(tar_cmd, "pull:tar", self.config.poll_interval, cancel).await?;
        if !status.success() {
            return Err(BridgeError::NonZeroExit {
                step: "pull:tar",
                code: status.code().unwrap_or(-1),
            });
        }

        let remote_output = format!("{workspace}/__output.tar");
        let pull_cmd = self.command(&[
            "-s",
            device_id,
            "pull",
            &remote_output,
            &local_tar.to_string_lossy(),
        ]);
        let status = run_cancelable(pull_cmd, "pull:pull", self.config.poll_interval, cancel).await?;
        if !status.success() {
            return Err(BridgeError::NonZeroExit {
                step: "pull:pull",
                code: status.code().unwrap_or(-1),
            });
        }

        Ok(())
    }

    async fn run(
        &self,
        device_id: &str,
        stdout_path: &Path,
        stderr_path: &Path,
        remote_cmd: &[String],
        cancel: &CancellationToken,
    ) -> Result<i32, BridgeError> {
        let workspace = &self.config.device_workspace;
        let out_file = std::fs::File::create(stdout_path).map_err(|e| BridgeError::Io {
            step: "run:open_stdout",
            source: e,
        })?;
        let err_file = std::fs::File::create(stderr_path).map_err(|e| BridgeError::Io {
            step: "run:open_stderr",
            source: e,
        })?;

        let remote_cmd_str = remote_cmd.join(" ");
        let shell_line = format!("cd {} && {remote_cmd_str}", shell_quote(workspace));

        let mut cmd = Command::new(&self.config.binary);
        cmd.args(["-s", device_id, "shell", "-n", &shell_line]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(out_file));
        cmd.stderr(Stdio::from(err_file));

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| BridgeError::Spawn("run".to_string(), e))?;
        let mut last_diagnostic = Instant::now();

        let status = loop {
            if last_diagnostic.elapsed() >= std::time::Duration::from_secs(1) {
                let stdout_bytes = std::fs::metadata(stdout_path).map(|m| m.len()).unwrap_or(0);
                let stderr_bytes = std::fs::metadata(stderr_path).map(|m| m.len()).unwrap_or(0);
                info!(
                    task_elapsed_secs = start.elapsed().as_secs_f64(),
                    stdout_bytes,
                    stderr_bytes,
                    "device command still running"
                );
                last_diagnostic = Instant::now();
            }

            if cancel.is_cancelled() {
                if let Some(pid) = child.id() {
                    terminate_pid(pid);
                }
                break child.wait().await.map_err(|e| BridgeError::Io {
                    step: "run",
                    source: e,
                })?;
            }

            match tokio::time::timeout(self.config.poll_interval, child.wait()).await {
                Ok(Ok(status)) => break status,
                Ok(Err(e)) => {
                    return Err(BridgeError::Io {
                        step: "run",
                        source: e,
                    })
                }
                Err(_elapsed) => continue,
            }
        };

        match status.code() {
            Some(code) => Ok(code),
            None => {
                warn!("device command terminated without an exit code");
                Ok(-1)
            }
        }
    }
}
