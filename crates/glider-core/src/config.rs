use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{errors::Error, Result};

/// Longest accepted cooldown window (one week).
const MAX_COOLDOWN_WINDOW_SECS: u64 = 7 * 24 * 60 * 60;

/// Typed configuration, loaded once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub owner_ids: Vec<i64>,
    pub download_dir: PathBuf,

    // Downloader
    pub ytdlp_path: PathBuf,
    pub worker_threads: usize,
    pub offload_timeout: Duration,

    // Commands
    pub command_prefix: String,
    pub disabled_commands: Vec<String>,
    pub allowed_chats: Vec<i64>,

    // Cooldown (per user, download only)
    pub cooldown_requests: u32,
    pub cooldown_window: Duration,

    pub presence: String,
}

/// On-disk JSON config (`config/config.json`).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    token: Option<String>,
    #[serde(rename = "mp3-dl-path")]
    mp3_dl_path: Option<PathSpec>,
    #[serde(default)]
    owners: Vec<i64>,
}

/// A path given either as one string or as a list of segments.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PathSpec {
    One(String),
    Parts(Vec<String>),
}

impl PathSpec {
    fn into_path(self) -> PathBuf {
        match self {
            PathSpec::One(s) => PathBuf::from(s),
            PathSpec::Parts(parts) => parts.iter().collect(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let file_path = env_str("GLIDER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config/config.json"));
        let file = read_file_config(&file_path)?;

        Self::from_sources(file, |key| env::var(key).ok())
    }

    fn from_sources(file: FileConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        // Required
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN")
            .or(file.token.and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN (or `token` in config file) is required".into())
            })?;

        let mut owner_ids = parse_csv_i64(get("GLIDER_OWNERS"));
        if owner_ids.is_empty() {
            owner_ids = file.owners;
        }
        if owner_ids.is_empty() {
            return Err(Error::Config(
                "GLIDER_OWNERS (or `owners` in config file) is required".into(),
            ));
        }

        let download_dir = get("GLIDER_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .or_else(|| file.mp3_dl_path.map(PathSpec::into_path))
            .ok_or_else(|| {
                Error::Config(
                    "GLIDER_DOWNLOAD_DIR (or `mp3-dl-path` in config file) is required".into(),
                )
            })?;

        // Downloader
        let ytdlp_path = get("YTDLP_PATH")
            .map(PathBuf::from)
            .or_else(|| get("PATH").and_then(|p| which_in_path(&p, "yt-dlp")))
            .unwrap_or_else(|| PathBuf::from("/usr/local/bin/yt-dlp"));
        let worker_threads = get("GLIDER_WORKERS")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .unwrap_or_else(num_cpus::get)
            .max(1);
        let offload_timeout = Duration::from_secs(
            get("GLIDER_OFFLOAD_TIMEOUT_SECS")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(30 * 60),
        );

        // Commands
        let command_prefix = lookup("GLIDER_COMMAND_PREFIX").unwrap_or_else(|| "archive ".into());
        let disabled_commands = parse_csv_lower(get("GLIDER_DISABLED_COMMANDS"));
        let allowed_chats = parse_csv_i64(get("GLIDER_ALLOWED_CHATS"));

        let cooldown_requests = get("GLIDER_COOLDOWN_REQUESTS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(3);
        let cooldown_window = Duration::from_secs(
            get("GLIDER_COOLDOWN_WINDOW_SECS")
                .and_then(|s| s.trim().parse::<u64>().ok())
                .unwrap_or(60)
                .min(MAX_COOLDOWN_WINDOW_SECS),
        );

        let presence = get("GLIDER_PRESENCE").unwrap_or_else(|| "Listening to Interstellar".into());

        Ok(Self {
            telegram_bot_token,
            owner_ids,
            download_dir,
            ytdlp_path,
            worker_threads,
            offload_timeout,
            command_prefix,
            disabled_commands,
            allowed_chats,
            cooldown_requests,
            cooldown_window,
            presence,
        })
    }

    /// Minimal config for tests and embedding; everything optional gets its default.
    pub fn with_defaults(token: &str, owner_ids: Vec<i64>, download_dir: PathBuf) -> Self {
        Self {
            telegram_bot_token: token.to_string(),
            owner_ids,
            download_dir,
            ytdlp_path: PathBuf::from("/usr/local/bin/yt-dlp"),
            worker_threads: 2,
            offload_timeout: Duration::from_secs(30 * 60),
            command_prefix: "archive ".to_string(),
            disabled_commands: Vec::new(),
            allowed_chats: Vec::new(),
            cooldown_requests: 3,
            cooldown_window: Duration::from_secs(60),
            presence: "Listening to Interstellar".to_string(),
        }
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    match fs::read_to_string(path) {
        Ok(txt) => Ok(serde_json::from_str(&txt)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(Error::Io(e)),
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn parse_csv_lower(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn which_in_path(path: &str, binary: &str) -> Option<PathBuf> {
    env::split_paths(path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
