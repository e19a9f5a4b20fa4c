use thiserror::Error;

/// Failure talking to the execution engine or reading its reply.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Connection, timeout or client construction failure.
    #[error("Execution engine unreachable: {0}")]
    Transport(String),

    #[error("Execution engine returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed execution engine response: {0}")]
    MalformedPayload(String),
}

impl From<reqwest::Error> for ExecutionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExecutionError::Transport(format!("request timed out: {e}"))
        } else {
            ExecutionError::Transport(e.to_string())
        }
    }
}
