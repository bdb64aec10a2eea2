use crate::error::{SyncError, SyncResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// Largest asset that will be mirrored: LanZou refuses anything over 100 MiB.
pub const DEFAULT_MAX_ASSET_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_TASKS_FILE: &str = "download_tasks.yaml";
pub const DEFAULT_STATE_FILE: &str = "sync_state.json";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_LANZOU_BASE: &str = "https://up.woozooo.com";
pub const DEFAULT_LOCK_STALE_HOURS: i64 = 6;

pub const ENV_USERNAME: &str = "LANZOU_USERNAME";
pub const ENV_PASSWORD: &str = "LANZOU_PASSWORD";
pub const ENV_UID: &str = "LANZOU_UID";

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

/// LanZou account credentials, read once at startup and handed to the uploader by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
    pub uid: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str, uid: &str) -> Self {
        Self {
            username: username.to_string(),
            password: Secret::new(password),
            uid: uid.to_string(),
        }
    }

    /// Reads `LANZOU_USERNAME`, `LANZOU_PASSWORD` and `LANZOU_UID`.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get_env: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let require = |key: &str, trim: bool| {
            get_env(key)
                .map(|value| if trim { value.trim().to_string() } else { value })
                .filter(|value| !value.is_empty())
                .ok_or_else(|| SyncError::Config(format!("{key} is not set")))
        };
        // The password is sent exactly as given; surrounding spaces may be part of it.
        Ok(Self {
            username: require(ENV_USERNAME, true)?,
            password: Secret::new(require(ENV_PASSWORD, false)?),
            uid: require(ENV_UID, true)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Declarative list of mirror tasks
    pub tasks_file: PathBuf,

    /// JSON store of the last synced release per task
    pub state_file: PathBuf,

    /// Guards the state file against overlapping runs
    pub lock_file: PathBuf,

    pub github_api_base: String,

    pub lanzou_base: String,

    /// Sent as a bearer token to lift the unauthenticated GitHub rate limit.
    pub github_token: Option<Secret>,

    pub max_asset_size: u64,

    /// A lock file older than this is assumed to belong to a crashed run.
    pub lock_stale_after: chrono::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::new_for_paths(
            Path::new(DEFAULT_TASKS_FILE),
            Path::new(DEFAULT_STATE_FILE),
        )
    }
}

impl Config {
    pub fn new_for_paths(tasks_file: &Path, state_file: &Path) -> Self {
        Self {
            tasks_file: tasks_file.to_path_buf(),
            state_file: state_file.to_path_buf(),
            lock_file: lock_file_for(state_file),
            github_api_base: DEFAULT_GITHUB_API.to_string(),
            lanzou_base: DEFAULT_LANZOU_BASE.to_string(),
            github_token: None,
            max_asset_size: DEFAULT_MAX_ASSET_SIZE,
            lock_stale_after: chrono::Duration::hours(DEFAULT_LOCK_STALE_HOURS),
        }
    }

    /// Sets up a Config, making sure the state file's directory exists.
    pub fn setup(tasks_file: Option<&Path>, state_file: Option<&Path>) -> SyncResult<Self> {
        let config = Self::new_for_paths(
            tasks_file.unwrap_or(Path::new(DEFAULT_TASKS_FILE)),
            state_file.unwrap_or(Path::new(DEFAULT_STATE_FILE)),
        );

        if let Some(parent) = config.state_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Config(format!(
                    "Cannot create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_github_token(self, token: Option<String>) -> Self {
        Self {
            github_token: token.filter(|t| !t.is_empty()).map(Secret::new),
            ..self
        }
    }

    pub fn with_endpoints(self, github_api_base: Option<String>, lanzou_base: Option<String>) -> Self {
        Self {
            github_api_base: github_api_base
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(self.github_api_base),
            lanzou_base: lanzou_base
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(self.lanzou_base),
            ..self
        }
    }
}

fn lock_file_for(state_file: &Path) -> PathBuf {
    let mut name = state_file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
    name.push(".lock");
    state_file.with_file_name(name)
}
