use crate::error::{SyncError, SyncResult};
use crate::github::RepoRef;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub const DEFAULT_EXTENSIONS: &[&str] = &["apk", "exe", "zip"];

/// One configured pairing of a GitHub release source and a LanZou folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// The GitHub releases URL, also the task's identity in the state file.
    pub source_url: String,
    pub repo: RepoRef,
    /// Destination folder, may be a `/`-separated path.
    pub folder_name: String,
    /// Lower-cased file extensions (without the dot) worth mirroring.
    pub extensions: Vec<String>,
    /// Mirror assets that look like source archives too.
    pub include_source: bool,
}

impl Task {
    pub fn new(source_url: &str, folder_name: &str) -> SyncResult<Self> {
        let source_url = normalize_url(source_url);
        let repo = RepoRef::from_url(&source_url)?;
        Ok(Self {
            source_url,
            repo,
            folder_name: folder_name.trim().to_string(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            include_source: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.source_url
    }
}

/// Task file layout, shared by the YAML and TOML flavours.
#[derive(Deserialize, Debug, Default)]
pub struct TasksFile {
    pub tasks: Option<Vec<TaskEntry>>,
}

/// A single `tasks` entry as written by the user.
#[derive(Deserialize, Debug, Default)]
pub struct TaskEntry {
    pub url: Option<String>,
    pub folder_name: Option<String>,
    pub extensions: Option<Vec<String>>,
    pub include_source: Option<bool>,
}

/// Loads the ordered task list. `.yaml`/`.yml` files are read as YAML, anything else as TOML.
pub fn load_tasks(path: &Path) -> SyncResult<Vec<Task>> {
    let content = fs::read_to_string(path).map_err(|e| {
        SyncError::Config(format!("Cannot read task file {}: {e}", path.display()))
    })?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let file: TasksFile = if is_yaml {
        serde_yaml::from_str::<Option<TasksFile>>(&content)
            .map_err(|e| SyncError::Config(format!("Malformed task file {}: {e}", path.display())))?
            .unwrap_or_default()
    } else {
        toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("Malformed task file {}: {e}", path.display())))?
    };

    parse_entries(file.tasks.unwrap_or_default())
}

fn parse_entries(entries: Vec<TaskEntry>) -> SyncResult<Vec<Task>> {
    if entries.is_empty() {
        return Err(SyncError::Config("No tasks configured".to_string()));
    }

    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        let position = index + 1;
        let url = required(entry.url, "url", position)?;
        let folder_name = required(entry.folder_name, "folder_name", position)?;

        let mut task = Task::new(&url, &folder_name)
            .map_err(|e| SyncError::Config(format!("Task #{position}: {e}")))?;

        if let Some(extensions) = entry.extensions {
            task.extensions = extensions
                .iter()
                .map(|e| e.trim().trim_start_matches('.').to_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }
        task.include_source = entry.include_source.unwrap_or(false);

        if !seen.insert(task.id().to_string()) {
            return Err(SyncError::Config(format!(
                "Task #{position}: duplicate url {}",
                task.source_url
            )));
        }
        tasks.push(task);
    }

    Ok(tasks)
}

fn required(value: Option<String>, key: &str, position: usize) -> SyncResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SyncError::Config(format!("Task #{position} is missing `{key}`")))
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_yaml_tasks() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = write(
            &tmp_dir,
            "download_tasks.yaml",
            r#"
tasks:
  - url: https://github.com/2dust/v2rayNG/releases/latest
    folder_name: v2rayNG
  - url: https://github.com/MetaCubeX/ClashMetaForAndroid/releases/latest/
    folder_name: apps/clash
    extensions: [".APK"]
    include_source: true
"#,
        );

        let tasks = load_tasks(&path)?;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].repo, RepoRef::new("2dust", "v2rayNG"));
        assert_eq!(tasks[0].folder_name, "v2rayNG");
        assert_eq!(tasks[0].extensions, vec!["apk", "exe", "zip"]);
        assert!(!tasks[0].include_source);
        assert_eq!(
            tasks[1].id(),
            "https://github.com/MetaCubeX/ClashMetaForAndroid/releases/latest"
        );
        assert_eq!(tasks[1].folder_name, "apps/clash");
        assert_eq!(tasks[1].extensions, vec!["apk"]);
        assert!(tasks[1].include_source);
        Ok(())
    }

    #[test]
    fn test_load_toml_tasks() -> anyhow::Result<()> {
        let tmp_dir = TempDir::new()?;
        let path = write(
            &tmp_dir,
            "tasks.toml",
            r#"
[[tasks]]
url = "https://github.com/owner/tool/releases/latest"
folder_name = "tool"
"#,
        );

        let tasks = load_tasks(&path)?;
        assert_eq!(tasks, vec![Task::new("https://github.com/owner/tool/releases/latest", "tool")?]);
        Ok(())
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let tmp_dir = TempDir::new().unwrap();
        let err = load_tasks(&tmp_dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write(&tmp_dir, "tasks.yaml", "tasks: [url: {");
        assert!(matches!(load_tasks(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_empty_file_is_config_error() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write(&tmp_dir, "tasks.yaml", "");
        assert!(matches!(load_tasks(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_entry_without_folder_name_is_config_error() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write(
            &tmp_dir,
            "tasks.yaml",
            "tasks:\n  - url: https://github.com/owner/tool/releases/latest\n    folder_name: '  '\n",
        );
        let err = load_tasks(&path).unwrap_err();
        assert!(err.to_string().contains("folder_name"));
    }

    #[test]
    fn test_non_github_url_is_config_error() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write(
            &tmp_dir,
            "tasks.yaml",
            "tasks:\n  - url: https://gitlab.com/owner/tool\n    folder_name: tool\n",
        );
        assert!(matches!(load_tasks(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_duplicate_url_is_config_error() {
        let tmp_dir = TempDir::new().unwrap();
        let path = write(
            &tmp_dir,
            "tasks.yaml",
            r#"
tasks:
  - url: https://github.com/owner/tool/releases/latest
    folder_name: a
  - url: https://github.com/owner/tool/releases/latest/
    folder_name: b
"#,
        );
        let err = load_tasks(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
