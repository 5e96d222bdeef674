use std::time::Duration;

use anyhow::{Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::config::load_config;
use crate::database::sqlite::models::JobStatus;
use crate::service::{RepositoryService, StatusReport};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Build the service from the on-disk configuration
#[inline]
pub async fn open_service() -> Result<RepositoryService> {
    let config = load_config()?;
    info!("Using base directory {}", config.get_base_dir().display());
    Ok(RepositoryService::from_config(config).await?)
}

/// Request indexing and follow the job until it finishes
#[inline]
pub async fn index_repository(
    service: &RepositoryService,
    repo_url: &str,
    callback_url: Option<String>,
    user_id: Option<i64>,
    force: bool,
) -> Result<()> {
    let response = service
        .process_index_request(repo_url, callback_url, user_id, force)
        .await?;
    println!("{}", response.message);

    if response.status == JobStatus::Completed && !response.is_new_request {
        println!("Use --force to rebuild the index.");
        return Ok(());
    }

    let bar = if console::user_attended_stderr() {
        let template = ProgressStyle::with_template("{spinner} [{elapsed}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        ProgressBar::new_spinner().with_style(template)
    } else {
        ProgressBar::hidden()
    };
    bar.enable_steady_tick(Duration::from_millis(120));

    let report = loop {
        let report = service.get_repository_status(&response.repo_name).await?;
        bar.set_message(format!(
            "{}% {}",
            report.progress,
            report.current_step.as_deref().unwrap_or("")
        ));
        if report.status.is_terminal() {
            break report;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };
    bar.finish_and_clear();

    print_status(&report);
    if report.status == JobStatus::Failed {
        bail!(
            "Indexing of {} failed ({})",
            report.repo_name,
            report.error_code.as_deref().unwrap_or("UNKNOWN")
        );
    }
    Ok(())
}

#[inline]
pub async fn show_status(service: &RepositoryService, repo_name: &str) -> Result<()> {
    let report = service.get_repository_status(repo_name).await?;
    print_status(&report);
    Ok(())
}

#[inline]
pub async fn list_repositories(service: &RepositoryService) -> Result<()> {
    let reports = service.list_repositories().await?;
    if reports.is_empty() {
        println!("No repositories have been indexed yet.");
        println!("Use 'repo-search index <repo_url>' to add one.");
        return Ok(());
    }

    println!("Repositories ({} total):", reports.len());
    println!();
    for report in &reports {
        print_status(report);
        println!();
    }
    Ok(())
}

#[inline]
pub async fn search_repository(
    service: &RepositoryService,
    repo_name: &str,
    query: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
    search_type: Option<&str>,
) -> Result<()> {
    let results = service
        .search_repository(repo_name, query, top_k, threshold, search_type)
        .await?;

    println!(
        "{} result(s) for {} in {} ({:.3}s)",
        results.total_results,
        style(&results.query).bold(),
        style(&results.repo_name).cyan(),
        results.search_time
    );
    for (rank, item) in results.results.iter().enumerate() {
        println!();
        println!(
            "{}. {} {}",
            rank + 1,
            style(&item.file_path).green(),
            style(format!("(score {:.3})", item.score)).dim()
        );
        for line in item.content.lines().take(12) {
            println!("    {line}");
        }
    }
    Ok(())
}

#[inline]
pub async fn delete_repository(service: &RepositoryService, repo_name: &str) -> Result<()> {
    let outcome = service.delete_repository(repo_name).await?;
    match (outcome.index_removed, outcome.job_removed) {
        (false, false) => {
            warn!("Nothing stored for {}", repo_name);
            println!("Nothing to delete for {repo_name}.");
        }
        (index, job) => {
            println!("Deleted {repo_name}:");
            println!("  Index removed: {index}");
            println!("  Job record removed: {job}");
        }
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    let status = match report.status {
        JobStatus::Completed => style(report.status.as_str()).green(),
        JobStatus::Failed => style(report.status.as_str()).red(),
        JobStatus::Pending | JobStatus::Indexing => style(report.status.as_str()).yellow(),
    };
    println!("{}", style(&report.repo_name).bold());
    println!("   Status: {} ({}%)", status, report.progress);
    if let Some(step) = &report.current_step {
        println!("   Step: {step}");
    }
    if let Some(started) = report.started_at {
        println!("   Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = report.completed_at {
        println!("   Finished: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &report.error {
        println!(
            "   Error [{}]: {}",
            report.error_code.as_deref().unwrap_or("UNKNOWN"),
            style(error).red()
        );
    }
}
