use crate::config::{Config, Secret};
use crate::download_client::{DownloadClient, LocalFile};
use crate::error::{SyncError, SyncResult};
use crate::logging::{progress_bar_style, spinner_style};
use crate::tasks::Task;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

static GITHUB_REPO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)").expect("valid regex")
});

/// `owner/repo` of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Extracts the repository from any github.com URL, e.g. a `releases/latest` page.
    pub fn from_url(url: &str) -> SyncResult<Self> {
        let captures = GITHUB_REPO_RE
            .captures(url)
            .ok_or_else(|| SyncError::Config(format!("Not a GitHub repository URL: {url}")))?;
        let owner = &captures[1];
        let repo = captures[2].trim_end_matches(".git");
        if repo.is_empty() {
            return Err(SyncError::Config(format!(
                "Not a GitHub repository URL: {url}"
            )));
        }
        Ok(Self::new(owner, repo))
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRelease {
    pub tag: String,
    pub published_at: Option<DateTime<Utc>>,
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubAsset {
    pub name: String,
    pub download_url: String,
    pub size: u64,
}

/// Matches the GitHub API JSON response for a single release
#[derive(Debug, Clone, Deserialize)]
struct GitHubReleaseJson {
    pub tag_name: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assets: Vec<GitHubAssetJson>,
}

/// Matches the GitHub API JSON response for a single release asset
#[derive(Debug, Clone, Deserialize)]
struct GitHubAssetJson {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

impl GitHubRelease {
    /// The assets worth mirroring for `task`: matching extension, and no source archives
    /// unless the task asks for them.
    pub fn select_assets(&self, task: &Task) -> Vec<&GitHubAsset> {
        self.assets
            .iter()
            .filter(|asset| {
                let name = asset.name.to_lowercase();
                let is_source = name.contains("source") || name.contains("src");
                let has_extension = task
                    .extensions
                    .iter()
                    .any(|ext| name.ends_with(&format!(".{ext}")));

                has_extension && (task.include_source || !is_source)
            })
            .collect()
    }

    fn from_json_struct(json: GitHubReleaseJson) -> Self {
        let assets = json
            .assets
            .into_iter()
            .map(|a| GitHubAsset {
                name: a.name,
                download_url: a.browser_download_url,
                size: a.size,
            })
            .collect();
        GitHubRelease {
            tag: json.tag_name,
            published_at: json.published_at,
            assets,
        }
    }
}

pub struct GitHubClient {
    client: Client,
    api_base: String,
    token: Option<Secret>,
    max_asset_size: u64,
}

impl DownloadClient for GitHubClient {
    #[instrument(skip_all)]
    async fn check(&self, task: &Task) -> SyncResult<GitHubRelease> {
        let current_span = tracing::Span::current();
        if let Ok(style) = spinner_style("{msg}") {
            current_span.pb_set_style(&style);
        }
        current_span.pb_set_message(&format!("Checking {} for a new release...", task.repo));

        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, task.repo.owner, task.repo.repo
        );
        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.expose()));
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound(format!(
                "{} has no published release",
                task.repo
            )));
        }
        if is_rate_limited(status, response.headers()) {
            return Err(SyncError::RateLimit(rate_limit_message(response.headers())));
        }
        if !status.is_success() {
            return Err(SyncError::Network(format!(
                "GitHub API request failed: {status}"
            )));
        }

        let json: GitHubReleaseJson = response.json().await?;
        tracing::debug!(
            "{} latest release: {} ({} assets)",
            task.repo,
            json.tag_name,
            json.assets.len()
        );
        Ok(GitHubRelease::from_json_struct(json))
    }

    #[instrument(skip_all)]
    async fn download_asset(&self, asset: &GitHubAsset, dir: &Path) -> SyncResult<LocalFile> {
        self.ensure_within_limit(&asset.name, asset.size)?;

        let current_span = tracing::Span::current();
        if let Ok(style) = progress_bar_style() {
            current_span.pb_set_style(&style);
        }
        current_span.pb_set_length(asset.size);
        current_span.pb_set_message(&format!("Downloading {}...", asset.name));
        current_span.pb_set_finish_message(&format!("Downloading {}... Complete!", asset.name));

        let response = self.client.get(&asset.download_url).send().await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "Download of {} failed: {}",
                asset.name,
                response.status()
            )));
        }
        if let Some(length) = response.content_length() {
            self.ensure_within_limit(&asset.name, length)?;
        }

        let path = local_path(dir, &asset.name)?;
        match self.stream_to_file(response, &asset.name, &path).await {
            Ok(size_bytes) => Ok(LocalFile {
                name: asset.name.clone(),
                size_bytes,
                local_path: path,
            }),
            Err(e) => {
                // No resume: a failed transfer starts from scratch next run.
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    tracing::debug!("Could not remove {}: {}", path.display(), remove_err);
                }
                Err(e)
            }
        }
    }
}

impl GitHubClient {
    pub fn new(config: &Config) -> SyncResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("lanzou-mirror/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.github_api_base.clone(),
            token: config.github_token.clone(),
            max_asset_size: config.max_asset_size,
        })
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        name: &str,
        path: &Path,
    ) -> SyncResult<u64> {
        let mut file = tokio::fs::File::create(path).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        use futures_util::StreamExt;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            downloaded += chunk.len() as u64;
            self.ensure_within_limit(name, downloaded)?;
            file.write_all(&chunk).await?;

            tracing::Span::current().pb_set_position(downloaded);
        }

        file.flush().await?;
        Ok(downloaded)
    }

    fn ensure_within_limit(&self, name: &str, size: u64) -> SyncResult<()> {
        if size > self.max_asset_size {
            return Err(SyncError::AssetTooLarge {
                name: name.to_string(),
                size,
                limit: self.max_asset_size,
            });
        }
        Ok(())
    }
}

/// Keeps only the final path component so an asset name can never escape the work directory.
fn local_path(dir: &Path, name: &str) -> SyncResult<PathBuf> {
    Path::new(name)
        .file_name()
        .map(|file_name| dir.join(file_name))
        .ok_or_else(|| SyncError::Network(format!("Unusable asset name: {name}")))
}

fn is_rate_limited(status: StatusCode, headers: &HeaderMap) -> bool {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|h| h.to_str().ok())
        .is_some_and(|remaining| remaining.trim() == "0");
    status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && exhausted)
}

fn rate_limit_message(headers: &HeaderMap) -> String {
    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    match reset {
        Some(reset) => format!("quota resets at {}", reset.format("%Y-%m-%d %H:%M:%S UTC")),
        None => "quota exhausted".to_string(),
    }
}
