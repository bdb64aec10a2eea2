use anyhow::Result;
use clap::Parser;
use lanzou_mirror_lib::config::{Config, DEFAULT_STATE_FILE, DEFAULT_TASKS_FILE};
use std::path::PathBuf;

use crate::commands::{check::CheckCommand, mirror::MirrorCommand};

#[derive(Parser)]
#[command(name = "lanzou-mirror")]
#[command(about = "Mirror the latest GitHub release assets of your projects to LanZou")]
#[command(version)]
pub struct Cli {
    /// Only report which tasks have a new release; download and upload nothing
    #[arg(long)]
    pub check_only: bool,

    #[command(flatten)]
    pub global_args: GlobalArgs,
}

#[derive(clap::Args, Clone)]
pub struct GlobalArgs {
    /// Task list: YAML (`.yaml`/`.yml`) or TOML
    #[arg(short, long, env = "MIRROR_CONFIG", default_value = DEFAULT_TASKS_FILE)]
    pub config: PathBuf,

    /// Where the last synced release of every task is kept between runs
    #[arg(long, env = "MIRROR_STATE", default_value = DEFAULT_STATE_FILE)]
    pub state: PathBuf,

    /// Log every request, not just progress
    #[arg(short, long)]
    pub verbose: bool,

    /// Token for the GitHub API; raises the rate limit from 60 requests an hour
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// Override the GitHub API base URL (useful for testing)
    #[arg(long, env = "MIRROR_GITHUB_API", hide = true)]
    pub github_api: Option<String>,

    /// Override the LanZou base URL (useful for testing)
    #[arg(long, env = "MIRROR_LANZOU_BASE", hide = true)]
    pub lanzou_base: Option<String>,
}

impl GlobalArgs {
    pub fn config(&self) -> Result<Config> {
        let config = Config::setup(Some(&self.config), Some(&self.state))?
            .with_github_token(self.github_token.clone())
            .with_endpoints(self.github_api.clone(), self.lanzou_base.clone());
        Ok(config)
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        if self.check_only {
            CheckCommand {}.run(self.global_args).await
        } else {
            MirrorCommand {}.run(self.global_args).await
        }
    }
}
