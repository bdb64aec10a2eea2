use crate::cloud_storage::{CloudStorage, UploadResult};
use crate::download_client::DownloadClient;
use crate::error::{Stage, SyncError};
use crate::state::StateStore;
use crate::tasks::Task;
use std::fmt;
use std::path::Path;

pub const UP_TO_DATE: &str = "up to date";

/// Where one task ended up after a run.
#[derive(Debug)]
pub enum TaskOutcome {
    Synced {
        tag: String,
        uploaded: Vec<String>,
        already_present: Vec<String>,
        /// Assets passed over for being too large, with the reason.
        skipped: Vec<String>,
    },
    /// Check-only runs stop here instead of downloading.
    UpdateAvailable { tag: String },
    Skipped(String),
    Failed { stage: Stage, error: SyncError },
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Synced {
                tag,
                uploaded,
                already_present,
                skipped,
            } => {
                write!(f, "synced {tag} ({} uploaded", uploaded.len())?;
                if !already_present.is_empty() {
                    write!(f, ", {} already present", already_present.len())?;
                }
                if !skipped.is_empty() {
                    write!(f, ", {} skipped", skipped.len())?;
                }
                write!(f, ")")
            }
            TaskOutcome::UpdateAvailable { tag } => write!(f, "new release {tag} available"),
            TaskOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            TaskOutcome::Failed { stage, error } => write!(f, "failed at {stage}: {error}"),
        }
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub task_id: String,
    pub folder_name: String,
    pub outcome: TaskOutcome,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub tasks: Vec<TaskReport>,
}

impl RunReport {
    pub fn synced(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Synced { .. }))
    }

    pub fn updates_available(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::UpdateAvailable { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, TaskOutcome::Failed { .. }))
    }

    pub fn outcome(&self, task_id: &str) -> Option<&TaskOutcome> {
        self.tasks
            .iter()
            .find(|report| report.task_id == task_id)
            .map(|report| &report.outcome)
    }

    fn count(&self, predicate: impl Fn(&TaskOutcome) -> bool) -> usize {
        self.tasks.iter().filter(|r| predicate(&r.outcome)).count()
    }
}

/// Mirrors every task in order. A failing task is reported and the run moves on; nothing in
/// here aborts the run.
pub async fn mirror_all<D: DownloadClient, S: CloudStorage>(
    tasks: &[Task],
    download_client: &D,
    storage: &S,
    state: &mut StateStore,
    work_dir: &Path,
) -> RunReport {
    let mut report = RunReport::default();
    for (index, task) in tasks.iter().enumerate() {
        tracing::info!(
            "[{}/{}] {} -> {}",
            index + 1,
            tasks.len(),
            task.repo,
            task.folder_name
        );
        let outcome = mirror_task(task, download_client, storage, state, work_dir).await;
        log_outcome(task, &outcome);
        report.tasks.push(TaskReport {
            task_id: task.id().to_string(),
            folder_name: task.folder_name.clone(),
            outcome,
        });
    }
    report
}

/// Reports which tasks have a release newer than their marker, without touching anything.
pub async fn check_all<D: DownloadClient>(
    tasks: &[Task],
    download_client: &D,
    state: &StateStore,
) -> RunReport {
    let mut report = RunReport::default();
    for task in tasks {
        let outcome = match download_client.check(task).await {
            Ok(release) if state.is_new(task.id(), &release.tag) => TaskOutcome::UpdateAvailable {
                tag: release.tag,
            },
            Ok(_) => TaskOutcome::Skipped(UP_TO_DATE.to_string()),
            Err(error) => TaskOutcome::Failed {
                stage: Stage::Check,
                error,
            },
        };
        log_outcome(task, &outcome);
        report.tasks.push(TaskReport {
            task_id: task.id().to_string(),
            folder_name: task.folder_name.clone(),
            outcome,
        });
    }
    report
}

/// CHECK -> (skip if not new) -> DOWNLOAD -> UPLOAD -> RECORD for a single task.
///
/// The marker is only written once every selected asset is either in the remote folder or
/// was skipped for its size, so a failure anywhere leaves the release to be retried next run.
pub async fn mirror_task<D: DownloadClient, S: CloudStorage>(
    task: &Task,
    download_client: &D,
    storage: &S,
    state: &mut StateStore,
    work_dir: &Path,
) -> TaskOutcome {
    let release = match download_client.check(task).await {
        Ok(release) => release,
        Err(error) => {
            return TaskOutcome::Failed {
                stage: Stage::Check,
                error,
            };
        }
    };

    if !state.is_new(task.id(), &release.tag) {
        return TaskOutcome::Skipped(UP_TO_DATE.to_string());
    }
    match release.published_at {
        Some(published_at) => tracing::info!(
            "New release {} for {} (published {})",
            release.tag,
            task.repo,
            published_at.format("%Y-%m-%d")
        ),
        None => tracing::info!("New release {} for {}", release.tag, task.repo),
    }

    let assets = release.select_assets(task);
    if assets.is_empty() {
        return TaskOutcome::Skipped(format!("no matching assets in {}", release.tag));
    }

    let mut uploaded = Vec::new();
    let mut already_present = Vec::new();
    let mut skipped = Vec::new();

    for (index, asset) in assets.iter().enumerate() {
        tracing::debug!("Asset {}/{}: {}", index + 1, assets.len(), asset.name);

        let local_file = match download_client.download_asset(asset, work_dir).await {
            Ok(local_file) => local_file,
            Err(error @ SyncError::AssetTooLarge { .. }) => {
                tracing::warn!("Skipping {}: {}", asset.name, error);
                skipped.push(error.to_string());
                continue;
            }
            Err(error) => {
                return TaskOutcome::Failed {
                    stage: Stage::Download,
                    error,
                };
            }
        };

        let result = storage.upload(&local_file, &task.folder_name).await;
        if let Err(e) = tokio::fs::remove_file(&local_file.local_path).await {
            tracing::debug!("Could not remove {}: {}", local_file.local_path.display(), e);
        }

        match result {
            Ok(UploadResult::Uploaded) => uploaded.push(local_file.name),
            Ok(UploadResult::AlreadyPresent) => already_present.push(local_file.name),
            Err(error) => {
                return TaskOutcome::Failed {
                    stage: Stage::Upload,
                    error,
                };
            }
        }
    }

    let mirrored: Vec<String> = uploaded.iter().chain(&already_present).cloned().collect();
    let nothing_mirrored = mirrored.is_empty();
    if let Err(error) = state.record(task.id(), &release.tag, mirrored) {
        return TaskOutcome::Failed {
            stage: Stage::Record,
            error,
        };
    }

    // Every asset was over the limit: the release is marked done so it is not fetched again.
    if nothing_mirrored {
        return TaskOutcome::Skipped(skipped.join("; "));
    }

    TaskOutcome::Synced {
        tag: release.tag,
        uploaded,
        already_present,
        skipped,
    }
}

fn log_outcome(task: &Task, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Failed { stage, error } => {
            tracing::error!("{} ({}) failed at {}: {}", task.repo, task.id(), stage, error);
        }
        TaskOutcome::Skipped(reason) if reason != UP_TO_DATE => {
            tracing::warn!("{}: skipped, {}", task.repo, reason);
        }
        other => tracing::info!("{}: {}", task.repo, other),
    }
}
