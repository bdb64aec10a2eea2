use crate::config::DEFAULT_MAX_ASSET_SIZE;
use crate::download_client::{DownloadClient, LocalFile};
use crate::error::{SyncError, SyncResult};
use crate::github::{GitHubAsset, GitHubRelease};
use crate::tasks::Task;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

/// Serves canned releases keyed by `owner/repo` and records every call.
/// Repositories without a release answer like a GitHub 404.
#[derive(Default)]
pub struct MockDownloadClient {
    releases: HashMap<String, GitHubRelease>,
    checked: Mutex<Vec<String>>,
    downloaded: Mutex<Vec<String>>,
}

impl MockDownloadClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_release(mut self, repo: &str, tag: &str, assets: &[(&str, u64)]) -> Self {
        let assets = assets
            .iter()
            .map(|(name, size)| GitHubAsset {
                name: name.to_string(),
                download_url: format!("https://example.com/{repo}/{name}"),
                size: *size,
            })
            .collect();
        self.releases.insert(
            repo.to_string(),
            GitHubRelease {
                tag: tag.to_string(),
                published_at: None,
                assets,
            },
        );
        self
    }

    pub fn checked(&self) -> Vec<String> {
        self.checked.lock().unwrap().clone()
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.downloaded.lock().unwrap().clone()
    }
}

impl DownloadClient for MockDownloadClient {
    async fn check(&self, task: &Task) -> SyncResult<GitHubRelease> {
        let repo = task.repo.to_string();
        self.checked.lock().unwrap().push(repo.clone());
        self.releases
            .get(&repo)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("{repo} has no published release")))
    }

    async fn download_asset(&self, asset: &GitHubAsset, dir: &Path) -> SyncResult<LocalFile> {
        if asset.size > DEFAULT_MAX_ASSET_SIZE {
            return Err(SyncError::AssetTooLarge {
                name: asset.name.clone(),
                size: asset.size,
                limit: DEFAULT_MAX_ASSET_SIZE,
            });
        }
        self.downloaded.lock().unwrap().push(asset.name.clone());

        // The content is a stand-in; only the reported size matters to the callers.
        let local_path = dir.join(&asset.name);
        fs::write(&local_path, asset.name.as_bytes())?;
        Ok(LocalFile {
            name: asset.name.clone(),
            size_bytes: asset.size,
            local_path,
        })
    }
}
