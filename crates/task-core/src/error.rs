use thiserror::Error;

/// Errors raised by the pure task model itself. Store-level and
/// bridge-level failures have their own error types in their own crates;
/// this one is reserved for invariant violations caught before any I/O.
#[derive(Debug, Error)]
pub enum TaskCoreError {
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("hint_device_id must not be empty")]
    MissingHintDeviceId,

    #[error("cmd.shell must contain at least one token")]
    EmptyCmdShell,
}
