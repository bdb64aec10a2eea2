use crate::download_client::LocalFile;
use crate::error::SyncResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadResult {
    Uploaded,
    /// A file with the same name was already in the folder, so nothing was sent.
    AlreadyPresent,
}

pub trait CloudStorage {
    /// Uploads `file` into `folder_name` (a `/`-separated path), creating missing folders.
    fn upload(
        &self,
        file: &LocalFile,
        folder_name: &str,
    ) -> impl Future<Output = SyncResult<UploadResult>> + Send;
}
