use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, #[source] std::io::Error),

    #[error("{step} exited with status {code}")]
    NonZeroExit { step: &'static str, code: i32 },

    #[error("{step} terminated by signal")]
    Terminated { step: &'static str },

    #[error("io error during {step}: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
}
