use crate::cli::GlobalArgs;
use crate::ui;
use anyhow::{Context, Result};
use lanzou_mirror_lib::github::GitHubClient;
use lanzou_mirror_lib::state::StateStore;
use lanzou_mirror_lib::sync::check_all;
use lanzou_mirror_lib::tasks::load_tasks;

pub struct CheckCommand {}

impl CheckCommand {
    pub async fn run(self, global_args: GlobalArgs) -> Result<()> {
        let config = global_args.config()?;
        let tasks = load_tasks(&config.tasks_file).context("Failed to load the task list")?;
        let state = StateStore::load(&config.state_file)?;
        tracing::debug!(
            "Loaded {} release marker(s) from {}",
            state.len(),
            config.state_file.display()
        );
        let github_client = GitHubClient::new(&config)?;

        ui::heading(&format!("Checking {} project(s) for new releases", tasks.len()));
        let report = check_all(&tasks, &github_client, &state).await;

        ui::summary(&report);
        if report.updates_available() > 0 {
            ui::tip("Run without --check-only to mirror the new releases.");
        }
        Ok(())
    }
}
