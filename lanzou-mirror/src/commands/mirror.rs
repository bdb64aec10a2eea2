use crate::cli::GlobalArgs;
use crate::ui;
use anyhow::{Context, Result};
use lanzou_mirror_lib::config::Credentials;
use lanzou_mirror_lib::github::GitHubClient;
use lanzou_mirror_lib::lanzou::LanZouClient;
use lanzou_mirror_lib::state::{RunLock, StateStore};
use lanzou_mirror_lib::sync::mirror_all;
use lanzou_mirror_lib::tasks::load_tasks;

pub struct MirrorCommand {}

impl MirrorCommand {
    /// Errors returned from here are fatal and end the process with a non-zero exit code.
    /// Per-task failures are only reported.
    pub async fn run(self, global_args: GlobalArgs) -> Result<()> {
        let config = global_args.config()?;
        let tasks = load_tasks(&config.tasks_file).context("Failed to load the task list")?;
        let credentials =
            Credentials::from_env().context("LanZou credentials are required to upload")?;

        let _lock = RunLock::acquire(&config.lock_file, config.lock_stale_after)?;
        let mut state = StateStore::load(&config.state_file)?;
        if state.is_empty() {
            tracing::info!(
                "No release markers in {} yet, every task counts as new",
                config.state_file.display()
            );
        }

        // Downloads live only as long as the run.
        let work_dir = tempfile::Builder::new()
            .prefix("lanzou-mirror-")
            .tempdir()
            .context("Failed to create a work directory")?;

        let github_client = GitHubClient::new(&config)?;
        let lanzou_client = LanZouClient::new(&config, &credentials)?;

        ui::heading(&format!(
            "Mirroring {} project(s) to LanZou",
            tasks.len()
        ));
        let report = mirror_all(
            &tasks,
            &github_client,
            &lanzou_client,
            &mut state,
            work_dir.path(),
        )
        .await;

        ui::summary(&report);
        Ok(())
    }
}
