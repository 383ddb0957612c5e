/// Failure kinds surfaced by the vendor client, the writer and the backfill cursor.
///
/// Rate limiting that outlives its retry budget is not an error; it comes
/// back as [`crate::api::Reply::Skipped`]. Session expiry is always
/// recovered inside the executor and never shows up here.
#[derive(thiserror::Error, Debug)]
pub enum FusionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error: HTTP {status}: {body}")]
    Transport { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl FusionError {
    /// Network and non-success HTTP failures; the unit of work is skipped and retried on a later run.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Network(_))
    }
}

pub type FusionResult<T> = Result<T, FusionError>;
