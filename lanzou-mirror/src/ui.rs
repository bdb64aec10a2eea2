use colored::*;
use lanzou_mirror_lib::sync::{RunReport, TaskOutcome};

pub fn success(msg: &str) {
    tracing::info!("{} {}", "✓".green(), msg.green());
}

pub fn error(msg: &str) {
    tracing::info!("{} {}", "✗".red(), msg.red());
}

pub fn info(msg: &str) {
    tracing::info!("{}", msg);
}

pub fn warning(msg: &str) {
    tracing::info!("{} {}", "!".yellow(), msg.yellow());
}

pub fn tip(msg: &str) {
    tracing::info!("{} {}", "Tip:".dimmed(), msg.dimmed());
}

pub fn heading(msg: &str) {
    tracing::info!("\n{}", format!("=== {msg} ===").blue().bold());
}

/// One line per task, then the totals. Failures are listed but never change the exit code.
pub fn summary(report: &RunReport) {
    heading("Summary");
    for task in &report.tasks {
        let line = format!("{} -> {}: {}", task.task_id, task.folder_name, task.outcome);
        match &task.outcome {
            TaskOutcome::Synced { .. } | TaskOutcome::UpdateAvailable { .. } => success(&line),
            TaskOutcome::Skipped(_) => info(&line),
            TaskOutcome::Failed { .. } => error(&line),
        }
    }

    let mut totals = vec![
        format!("{} synced", report.synced()),
        format!("{} skipped", report.skipped()),
        format!("{} failed", report.failed()),
    ];
    if report.updates_available() > 0 {
        totals.insert(0, format!("{} with updates", report.updates_available()));
    }
    let totals = totals.join(", ");

    if report.failed() > 0 {
        warning(&totals);
    } else {
        success(&totals);
    }
}
