use std::path::{Path, PathBuf};

use url::Url;

/// One playlist entry that could not be fetched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryFailure {
    pub message: String,
}

/// Outcome of a download that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub files: Vec<PathBuf>,
    pub failures: Vec<EntryFailure>,
}

impl DownloadReport {
    pub fn is_partial(&self) -> bool {
        !self.files.is_empty() && !self.failures.is_empty()
    }

    pub fn total(&self) -> usize {
        self.files.len() + self.failures.len()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("failed to start downloader {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("downloader exited with {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },

    #[error("nothing was downloaded ({} entries failed)", failures.len())]
    NothingDownloaded { failures: Vec<EntryFailure> },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Blocking audio fetch: writes mp3 files for `url` into `out_dir`.
///
/// Implementations block the calling thread and must only be called through
/// [`crate::offload::OffloadBridge`].
pub trait AudioDownloader: Send + Sync + 'static {
    fn download(&self, url: &Url, out_dir: &Path) -> Result<DownloadReport, DownloadError>;
}
