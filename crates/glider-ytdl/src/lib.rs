//! yt-dlp adapter (blocking audio download).
//!
//! Runs the `yt-dlp` binary as a child process and waits for it. Callers must
//! go through the offload bridge; this never runs on the scheduler thread.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use glider_core::download::{AudioDownloader, DownloadError, DownloadReport, EntryFailure};
use url::Url;

#[derive(Clone, Debug)]
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Command-line arguments for one download into `out_dir`.
    pub fn args(url: &Url, out_dir: &Path) -> Vec<String> {
        let template = out_dir.join("%(title)s.%(ext)s");
        vec![
            "--format".into(),
            "bestaudio/best".into(),
            "--extract-audio".into(),
            "--audio-format".into(),
            "mp3".into(),
            "--output".into(),
            template.to_string_lossy().into_owned(),
            "--restrict-filenames".into(),
            "--yes-playlist".into(),
            "--no-check-certificates".into(),
            "--ignore-errors".into(),
            "--no-warnings".into(),
            "--default-search".into(),
            "auto".into(),
            "--source-address".into(),
            "0.0.0.0".into(),
            // Implies --quiet; one final path per line once post-processing is done.
            "--print".into(),
            "after_move:filepath".into(),
            "--".into(),
            url.as_str().to_string(),
        ]
    }
}

impl AudioDownloader for YtDlp {
    fn download(&self, url: &Url, out_dir: &Path) -> Result<DownloadReport, DownloadError> {
        fs::create_dir_all(out_dir)?;

        tracing::debug!(program = %self.program.display(), %url, "running yt-dlp");
        let output = Command::new(&self.program)
            .args(Self::args(url, out_dir))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| DownloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let report = parse_output(&stdout, &stderr);

        // With --ignore-errors a non-zero exit just means some entry failed;
        // only treat it as fatal when nothing came out of the run.
        if report.files.is_empty() {
            if !report.failures.is_empty() {
                return Err(DownloadError::NothingDownloaded {
                    failures: report.failures,
                });
            }
            if !output.status.success() {
                return Err(DownloadError::ExitStatus {
                    code: output.status.code(),
                    stderr: stderr.chars().take(500).collect(),
                });
            }
        }

        Ok(report)
    }
}

/// Split yt-dlp output into written files (stdout) and failed entries (stderr).
pub fn parse_output(stdout: &str, stderr: &str) -> DownloadReport {
    let files = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect();

    let failures = stderr
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("ERROR:"))
        .map(|l| EntryFailure {
            message: l.to_string(),
        })
        .collect();

    DownloadReport { files, failures }
}
