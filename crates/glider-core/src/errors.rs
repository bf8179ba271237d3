/// Core error type for ArchiveGlider.
///
/// Adapter crates map their specific errors into this type so startup and
/// plumbing failures are reported the same way. Per-command failures use
/// [`crate::failure::CommandError`] instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
