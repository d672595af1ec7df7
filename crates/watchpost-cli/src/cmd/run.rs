use crate::output::{print_json, print_table, when};
use std::path::Path;
use tracing::{info, warn};
use watchpost_core::config::{Config, WarnLevel};
use watchpost_runtime::{build_scheduler, JobStatus, Scheduler};

/// Long-running mode: every job on its own interval until Ctrl-C.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let (config, store) = super::open(root)?;
    ensure_valid(&config)?;
    warn_unresolved(&store)?;

    let rt = tokio::runtime::Runtime::new()?;
    let status = rt.block_on(async move {
        let mut scheduler = build_scheduler(&config, root, &store)?;
        scheduler.start()?;
        info!(jobs = ?scheduler.job_names(), "watching; press Ctrl-C to stop");

        tokio::signal::ctrl_c().await?;
        info!("shutdown requested");
        scheduler.stop().await;
        anyhow::Ok(scheduler.status())
    })?;

    print_status(&status, json)
}

/// Run each job (or just `job`) once, in configuration order.
pub fn once(root: &Path, job: Option<&str>, json: bool) -> anyhow::Result<()> {
    let (config, store) = super::open(root)?;
    ensure_valid(&config)?;
    warn_unresolved(&store)?;

    let rt = tokio::runtime::Runtime::new()?;
    let status = rt.block_on(async move {
        let scheduler = build_scheduler(&config, root, &store)?;
        let names = match job {
            Some(name) => vec![name.to_string()],
            None => scheduler.job_names(),
        };
        for name in &names {
            scheduler.trigger(name).await?;
        }
        anyhow::Ok(selected(&scheduler, &names))
    })?;

    print_status(&status, json)?;

    let failed = status.iter().filter(|s| s.last_error.is_some()).count();
    if failed > 0 {
        anyhow::bail!("{failed} job(s) failed");
    }
    Ok(())
}

fn selected(scheduler: &Scheduler, names: &[String]) -> Vec<JobStatus> {
    scheduler
        .status()
        .into_iter()
        .filter(|s| names.contains(&s.name))
        .collect()
}

/// Refuse to schedule anything from a config with errors; warnings are logged.
fn ensure_valid(config: &Config) -> anyhow::Result<()> {
    let mut errors = Vec::new();
    for w in config.validate() {
        match w.level {
            WarnLevel::Warning => warn!("config: {}", w.message),
            WarnLevel::Error => errors.push(w.message),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!(
            "invalid config: {} (see 'watchpost config validate')",
            errors.join("; ")
        );
    }
    Ok(())
}

/// Claims left unresolved by an earlier process that died between claim and
/// outcome. They are never retried automatically.
fn warn_unresolved(store: &watchpost_core::Store) -> anyhow::Result<()> {
    for entry in store.ledger().unresolved()? {
        warn!(
            kind = %entry.kind,
            id = %entry.id,
            claimed_at = %entry.claimed_at,
            "claim has no recorded outcome; inspect with 'watchpost ledger show'"
        );
    }
    Ok(())
}

fn print_status(status: &[JobStatus], json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&status);
    }
    let rows = status
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.interval_secs.to_string(),
                s.runs.to_string(),
                s.failures.to_string(),
                s.skipped_triggers.to_string(),
                when(s.last_finished_at),
                when(s.next_run_at),
                s.last_error.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(
        &["JOB", "EVERY(s)", "RUNS", "FAILURES", "SKIPPED", "LAST RUN", "NEXT RUN", "LAST ERROR"],
        rows,
    );
    Ok(())
}
