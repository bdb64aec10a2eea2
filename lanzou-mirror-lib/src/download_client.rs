use crate::error::SyncResult;
use crate::github::{GitHubAsset, GitHubRelease};
use crate::tasks::Task;
use std::path::{Path, PathBuf};

/// A release asset that has been downloaded into the run's work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub size_bytes: u64,
    pub local_path: PathBuf,
}

pub trait DownloadClient {
    /// Resolves the latest release of the task's repository.
    fn check(&self, task: &Task) -> impl Future<Output = SyncResult<GitHubRelease>> + Send;

    /// Streams `asset` into `dir`, failing with `AssetTooLarge` once it passes the size limit.
    fn download_asset(
        &self,
        asset: &GitHubAsset,
        dir: &Path,
    ) -> impl Future<Output = SyncResult<LocalFile>> + Send;
}
