use crate::cloud_storage::{CloudStorage, UploadResult};
use crate::config::{Config, Credentials};
use crate::download_client::LocalFile;
use crate::error::{SyncError, SyncResult};
use crate::logging::progress_bar_style;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::io::ReaderStream;
use tracing::instrument;
use tracing_indicatif::span_ext::IndicatifSpanExt;

// LanZou only serves its upload endpoints to browser-looking clients.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.39 (KHTML, like Gecko) Chrome/89.0.4389.111 Safari/537.39";

const ROOT_FOLDER_ID: &str = "-1";
const FILES_PER_PAGE: usize = 50;
const MAX_FILE_PAGES: u32 = 200;

const TASK_UPLOAD: &str = "1";
const TASK_CREATE_FOLDER: &str = "2";
const TASK_LOGIN: &str = "3";
const TASK_LIST_FILES: &str = "5";
const TASK_LIST_FOLDERS: &str = "47";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub name: String,
    pub folder_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    /// Untruncated name; LanZou shortens long names in `name`.
    pub name_all: String,
}

impl RemoteFile {
    fn matches(&self, file_name: &str) -> bool {
        self.name == file_name || self.name_all == file_name
    }
}

/// Client for the LanZou web upload API. Logs in lazily on first use and keeps the session
/// cookies for the rest of the run.
pub struct LanZouClient<'a> {
    client: Client,
    base_url: String,
    credentials: &'a Credentials,
    logged_in: AtomicBool,
    /// Folder path -> folder id, filled as folders are resolved or created.
    folder_ids: Mutex<HashMap<String, String>>,
}

impl CloudStorage for LanZouClient<'_> {
    async fn upload(&self, file: &LocalFile, folder_name: &str) -> SyncResult<UploadResult> {
        self.ensure_logged_in().await?;
        let folder_id = self.ensure_folder(folder_name).await?;

        let existing = self.list_files(&folder_id).await?;
        if let Some(remote) = existing.iter().find(|f| f.matches(&file.name)) {
            tracing::info!(
                "{} already exists in {} (file id {}), skipping upload",
                file.name,
                folder_name,
                remote.id
            );
            return Ok(UploadResult::AlreadyPresent);
        }

        self.upload_file(file, &folder_id).await?;
        Ok(UploadResult::Uploaded)
    }
}

impl<'a> LanZouClient<'a> {
    pub fn new(config: &Config, credentials: &'a Credentials) -> SyncResult<Self> {
        let client = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .cookie_store(true)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.lanzou_base.clone(),
            credentials,
            logged_in: AtomicBool::new(false),
            folder_ids: Mutex::new(HashMap::new()),
        })
    }

    pub async fn ensure_logged_in(&self) -> SyncResult<()> {
        if self.logged_in.load(Ordering::Acquire) {
            return Ok(());
        }
        self.login().await?;
        self.logged_in.store(true, Ordering::Release);
        Ok(())
    }

    async fn login(&self) -> SyncResult<()> {
        tracing::info!("Logging in to LanZou as {}...", self.credentials.username);

        let form = [
            ("task", TASK_LOGIN),
            ("uid", self.credentials.username.as_str()),
            ("pwd", self.credentials.password.expose()),
            ("setSessionId", ""),
            ("setSig", ""),
            ("setScene", ""),
            ("setTocen", ""),
            ("formhash", ""),
        ];
        let response = self
            .client
            .post(format!("{}/mlogin.php", self.base_url))
            .header(ACCEPT, "application/json, text/javascript, */*")
            .header(REFERER, format!("{}/", self.base_url))
            .header("Origin", self.base_url.as_str())
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "Login request failed: {}",
                response.status()
            )));
        }

        let body = response.text().await?;
        match serde_json::from_str::<Value>(&body) {
            Ok(json) if is_ok(&json) => Ok(()),
            Ok(json) => Err(SyncError::Auth(info_message(&json))),
            // Some login responses are an HTML redirect page; the session decides.
            Err(_) if self.session_is_valid().await? => Ok(()),
            Err(_) => Err(SyncError::Auth("login was not accepted".to_string())),
        }
    }

    /// The disk page shows the login form again when the session cookies are not valid.
    async fn session_is_valid(&self) -> SyncResult<bool> {
        let page = self
            .client
            .get(format!("{}/mydisk.php", self.base_url))
            .send()
            .await?
            .text()
            .await?;
        Ok(!page.contains("登录"))
    }

    /// Resolves a `/`-separated folder path from the root, creating each missing level.
    pub async fn ensure_folder(&self, folder_path: &str) -> SyncResult<String> {
        let path = folder_path.trim_matches('/');
        if let Some(id) = self.cached_folder(path) {
            return Ok(id);
        }

        let mut parent_id = ROOT_FOLDER_ID.to_string();
        let mut resolved = String::new();
        for name in path.split('/').filter(|part| !part.is_empty()) {
            if !resolved.is_empty() {
                resolved.push('/');
            }
            resolved.push_str(name);

            if let Some(id) = self.cached_folder(&resolved) {
                parent_id = id;
                continue;
            }

            let existing = self
                .list_folders(&parent_id)
                .await?
                .into_iter()
                .find(|folder| folder.name == name);
            parent_id = match existing {
                Some(folder) => {
                    tracing::debug!("Folder {} exists (id {})", resolved, folder.folder_id);
                    folder.folder_id
                }
                None => {
                    let id = self.create_folder(&parent_id, name).await?;
                    tracing::info!("Created folder {} (id {})", resolved, id);
                    id
                }
            };
            self.cache_folder(&resolved, &parent_id);
        }

        Ok(parent_id)
    }

    pub async fn list_folders(&self, parent_id: &str) -> SyncResult<Vec<RemoteFolder>> {
        let json = self
            .post_task(&[("task", TASK_LIST_FOLDERS), ("folder_id", parent_id)])
            .await?;

        let folders = text_items(&json)
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?.to_string();
                let folder_id = ["fol_id", "folderid", "folder_id"]
                    .iter()
                    .find_map(|key| item.get(*key).and_then(id_string))?;
                Some(RemoteFolder { name, folder_id })
            })
            .collect();
        Ok(folders)
    }

    /// Lists every file of a folder, following LanZou's 50-per-page pagination.
    ///
    /// Stops early if a page repeats the previous one, or after `MAX_FILE_PAGES` pages.
    pub async fn list_files(&self, folder_id: &str) -> SyncResult<Vec<RemoteFile>> {
        let mut files = Vec::new();
        let mut previous_page: Vec<RemoteFile> = Vec::new();

        for page in 1..=MAX_FILE_PAGES {
            let page_str = page.to_string();
            let json = self
                .post_task(&[
                    ("task", TASK_LIST_FILES),
                    ("folder_id", folder_id),
                    ("pg", page_str.as_str()),
                ])
                .await?;

            let items = text_items(&json);
            let page_files: Vec<RemoteFile> = items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?.to_string();
                    let name_all = item
                        .get("name_all")
                        .and_then(Value::as_str)
                        .unwrap_or(&name)
                        .to_string();
                    let id = item.get("id").and_then(id_string).unwrap_or_default();
                    Some(RemoteFile { id, name, name_all })
                })
                .collect();

            if page > 1 && page_files == previous_page {
                tracing::debug!("Folder {} page {} repeats page {}", folder_id, page, page - 1);
                return Ok(files);
            }
            files.extend(page_files.iter().cloned());

            if items.len() < FILES_PER_PAGE {
                return Ok(files);
            }
            previous_page = page_files;
        }

        tracing::warn!(
            "Folder {} has more than {} pages of files, listing stopped",
            folder_id,
            MAX_FILE_PAGES
        );
        Ok(files)
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> SyncResult<String> {
        let json = self
            .post_task(&[
                ("task", TASK_CREATE_FOLDER),
                ("parent_id", parent_id),
                ("folder_name", name),
                ("folder_description", ""),
            ])
            .await?;

        if !is_ok(&json) {
            return Err(SyncError::Network(format!(
                "Creating folder {name} failed: {}",
                info_message(&json)
            )));
        }
        json.get("text").and_then(id_string).ok_or_else(|| {
            SyncError::Network(format!("Creating folder {name} returned no folder id"))
        })
    }

    #[instrument(skip_all)]
    async fn upload_file(&self, file: &LocalFile, folder_id: &str) -> SyncResult<()> {
        let current_span = tracing::Span::current();
        if let Ok(style) = progress_bar_style() {
            current_span.pb_set_style(&style);
        }
        current_span.pb_set_length(file.size_bytes);
        current_span.pb_set_message(&format!("Uploading {}...", file.name));
        current_span.pb_set_finish_message(&format!("Uploading {}... Complete!", file.name));

        let handle = tokio::fs::File::open(&file.local_path).await?;
        let progress_span = current_span.clone();
        let mut sent = 0u64;
        let stream = ReaderStream::new(handle).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                sent += bytes.len() as u64;
                progress_span.pb_set_position(sent);
            }
        });
        let part = Part::stream_with_length(Body::wrap_stream(stream), file.size_bytes)
            .file_name(file.name.clone())
            .mime_str("application/octet-stream")?;

        let form = Form::new()
            .text("task", TASK_UPLOAD)
            .text("vie", "2")
            .text("ve", "2")
            .text("id", "WU_FILE_0")
            .text("name", file.name.clone())
            .text("folder_id_bb_n", folder_id.to_string())
            .part("upload_file", part);

        let response = self
            .client
            .post(format!("{}/html5up.php", self.base_url))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "Upload of {} failed: {}",
                file.name,
                response.status()
            )));
        }

        let json = parse_json(&response.text().await?)?;
        if !is_ok(&json) {
            return Err(SyncError::Quota(format!(
                "{}: {}",
                file.name,
                info_message(&json)
            )));
        }

        tracing::debug!("Uploaded {} to folder {}", file.name, folder_id);
        Ok(())
    }

    /// POSTs a `doupload.php` task. Every call carries the account uid as a query parameter.
    async fn post_task(&self, form: &[(&str, &str)]) -> SyncResult<Value> {
        let response = self
            .client
            .post(format!("{}/doupload.php", self.base_url))
            .query(&[("uid", self.credentials.uid.as_str())])
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "LanZou request failed: {}",
                response.status()
            )));
        }
        parse_json(&response.text().await?)
    }

    fn cached_folder(&self, path: &str) -> Option<String> {
        self.folder_ids
            .lock()
            .ok()
            .and_then(|ids| ids.get(path).cloned())
    }

    fn cache_folder(&self, path: &str, id: &str) {
        if let Ok(mut ids) = self.folder_ids.lock() {
            ids.insert(path.to_string(), id.to_string());
        }
    }
}

fn parse_json(body: &str) -> SyncResult<Value> {
    serde_json::from_str(body)
        .map_err(|e| SyncError::Network(format!("Unexpected LanZou response: {e}")))
}

/// `zt == 1` marks success in every LanZou response.
fn is_ok(json: &Value) -> bool {
    json.get("zt").and_then(id_string).as_deref() == Some("1")
}

fn info_message(json: &Value) -> String {
    json.get("info")
        .map(|info| match info {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "unknown error".to_string())
}

/// The `text` field is a list for listings and a scalar or empty string otherwise.
fn text_items(json: &Value) -> &[Value] {
    json.get("text")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Ids come back as strings or numbers depending on the endpoint.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
