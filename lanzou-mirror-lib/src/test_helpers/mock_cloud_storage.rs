use crate::cloud_storage::{CloudStorage, UploadResult};
use crate::download_client::LocalFile;
use crate::error::{SyncError, SyncResult};
use std::collections::HashSet;
use std::sync::Mutex;

/// In-memory stand-in for LanZou. Folders can be set up to reject the login.
#[derive(Default)]
pub struct MockCloudStorage {
    auth_failures: HashSet<String>,
    files: Mutex<HashSet<(String, String)>>,
    uploads: Mutex<Vec<(String, String)>>,
}

impl MockCloudStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth_failure(mut self, folder_name: &str) -> Self {
        self.auth_failures.insert(folder_name.to_string());
        self
    }

    pub fn with_existing(self, folder_name: &str, file_name: &str) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert((folder_name.to_string(), file_name.to_string()));
        self
    }

    /// `(folder, file name)` of every upload actually sent.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

impl CloudStorage for MockCloudStorage {
    async fn upload(&self, file: &LocalFile, folder_name: &str) -> SyncResult<UploadResult> {
        if self.auth_failures.contains(folder_name) {
            return Err(SyncError::Auth("wrong password".to_string()));
        }
        assert!(file.local_path.exists(), "uploading a file that was never downloaded");

        let key = (folder_name.to_string(), file.name.clone());
        if !self.files.lock().unwrap().insert(key.clone()) {
            return Ok(UploadResult::AlreadyPresent);
        }
        self.uploads.lock().unwrap().push(key);
        Ok(UploadResult::Uploaded)
    }
}
