//! Turn a loaded [`Config`] into ready-to-register jobs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use watchpost_core::config::{
    ClassifierConfig, Config, EntitySourceConfig, FeedSourceConfig, PublisherConfig,
};
use watchpost_core::{paths, Store};

use crate::backends::{
    DirectoryEntitySource, FileFeedSource, HttpClassifier, JsonlPublisher, KeywordClassifier,
    WebhookPublisher,
};
use crate::collab::{Classifier, EntitySource, FeedSource, Publisher};
use crate::jobs::{EntityJob, EntityTiming, FeedJob};
use crate::scheduler::{Job, Scheduler};

/// A job paired with its polling interval.
pub struct ScheduledJob {
    pub job: Arc<dyn Job>,
    pub interval: Duration,
}

/// Build every configured job. Backends are constructed once and shared.
pub fn build_jobs(config: &Config, root: &Path, store: &Store) -> anyhow::Result<Vec<ScheduledJob>> {
    anyhow::ensure!(
        config.timeouts.call_secs > 0,
        "timeouts.call_secs must be positive"
    );
    let call_timeout = Duration::from_secs(config.timeouts.call_secs);
    let client = reqwest::Client::builder()
        .timeout(call_timeout)
        .build()
        .context("failed to build http client")?;

    let mut jobs = Vec::new();

    if !config.feeds.is_empty() {
        let classifier = build_classifier(&config.classifier, &client)?;
        let publisher = build_publisher(&config.publisher, root, &client);
        for feed in &config.feeds {
            let source: Arc<dyn FeedSource> = match &feed.source {
                FeedSourceConfig::File { path } => {
                    Arc::new(FileFeedSource::new(paths::resolve(root, path)))
                }
            };
            let mut gate = feed.gate();
            if gate.label.is_none() {
                gate.label = Some(classifier.label().to_string());
            }
            let job = FeedJob::new(
                feed.name.clone(),
                feed.scope(),
                source,
                Arc::clone(&classifier),
                Arc::clone(&publisher),
                gate,
                store.ledger(),
                store.watermarks(),
                call_timeout,
            );
            jobs.push(ScheduledJob {
                job: Arc::new(job),
                interval: Duration::from_secs(feed.interval_secs),
            });
        }
    }

    if !config.entities.is_empty() {
        let publisher = build_publisher(&config.publisher, root, &client);
        for entity in &config.entities {
            let source: Arc<dyn EntitySource> = match &entity.source {
                EntitySourceConfig::Directory { path } => {
                    Arc::new(DirectoryEntitySource::new(paths::resolve(root, path)))
                }
            };
            let timing = EntityTiming {
                cooldown: seconds(entity.cooldown_secs)
                    .with_context(|| format!("entity '{}': cooldown_secs", entity.name))?,
                purge_grace: seconds(entity.purge_grace_secs)
                    .with_context(|| format!("entity '{}': purge_grace_secs", entity.name))?,
                call_timeout,
            };
            let job = EntityJob::new(
                entity.name.clone(),
                source,
                Arc::clone(&publisher),
                entity.weights(),
                entity.floor(),
                timing,
                store.ledger(),
                store.snapshots(),
                store.clock(),
            );
            jobs.push(ScheduledJob {
                job: Arc::new(job),
                interval: Duration::from_secs(entity.interval_secs),
            });
        }
    }

    Ok(jobs)
}

/// Build jobs and register them on a fresh scheduler.
pub fn build_scheduler(config: &Config, root: &Path, store: &Store) -> anyhow::Result<Scheduler> {
    let mut scheduler = Scheduler::new(store.clock())
        .with_stop_timeout(Duration::from_secs(config.timeouts.stop_secs));
    for scheduled in build_jobs(config, root, store)? {
        scheduler.register(scheduled.job, scheduled.interval)?;
    }
    Ok(scheduler)
}

fn seconds(secs: u64) -> anyhow::Result<chrono::Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .with_context(|| format!("{secs} seconds is out of range"))
}

fn build_classifier(
    config: &ClassifierConfig,
    client: &reqwest::Client,
) -> anyhow::Result<Arc<dyn Classifier>> {
    let classifier: Arc<dyn Classifier> = match config {
        ClassifierConfig::Keyword {
            keywords,
            min_hits,
            label,
        } => Arc::new(
            KeywordClassifier::new(keywords, *min_hits, label.clone())
                .context("invalid classifier keyword")?,
        ),
        ClassifierConfig::Http {
            endpoint,
            model,
            api_key_env,
            label,
            instructions,
        } => Arc::new(HttpClassifier::new(
            client.clone(),
            endpoint.clone(),
            model.clone(),
            std::env::var(api_key_env).ok(),
            label.clone(),
            instructions.clone(),
        )),
    };
    Ok(classifier)
}

fn build_publisher(
    config: &PublisherConfig,
    root: &Path,
    client: &reqwest::Client,
) -> Arc<dyn Publisher> {
    match config {
        PublisherConfig::Jsonl { path } => Arc::new(JsonlPublisher::new(paths::resolve(root, path))),
        PublisherConfig::Webhook { url, token_env } => Arc::new(WebhookPublisher::new(
            client.clone(),
            url.clone(),
            token_env.as_ref().and_then(|var| std::env::var(var).ok()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn starter_config_builds_both_jobs() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("store.redb")).unwrap();
        let jobs = build_jobs(&Config::starter(), dir.path(), &store).unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.job.name().to_string()).collect();
        assert_eq!(names, ["injury-watch", "heat-live"]);
        assert_eq!(jobs[0].interval, Duration::from_secs(300));
        assert_eq!(jobs[1].interval, Duration::from_secs(180));
    }

    #[test]
    fn empty_config_builds_nothing() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("store.redb")).unwrap();
        assert!(build_jobs(&Config::default(), dir.path(), &store)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn duplicate_names_fail_registration() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("store.redb")).unwrap();
        let mut config = Config::starter();
        config.entities[0].name = "injury-watch".to_string();
        let err = build_scheduler(&config, dir.path(), &store).err().unwrap();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn out_of_range_entity_durations_are_errors() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("store.redb")).unwrap();

        let mut config = Config::starter();
        config.entities[0].cooldown_secs = u64::MAX;
        let err = build_jobs(&config, dir.path(), &store).err().unwrap();
        assert!(format!("{err:#}").contains("cooldown_secs"), "{err:#}");

        let mut config = Config::starter();
        config.entities[0].purge_grace_secs = 100_000_000_000_000_000;
        let err = build_jobs(&config, dir.path(), &store).err().unwrap();
        assert!(format!("{err:#}").contains("out of range"), "{err:#}");
    }

    #[test]
    fn zero_call_timeout_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("store.redb")).unwrap();
        let mut config = Config::starter();
        config.timeouts.call_secs = 0;
        let err = build_jobs(&config, dir.path(), &store).err().unwrap();
        assert!(err.to_string().contains("call_secs"));
    }

    #[tokio::test]
    async fn starter_jobs_run_against_fixtures() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let fixtures = root.join(paths::FIXTURES_DIR);
        std::fs::create_dir_all(fixtures.join("games")).unwrap();
        std::fs::write(
            fixtures.join("feed.json"),
            r#"[{"id": "1", "payload": {"text": "Herro ankle sprain, will miss two weeks"}},
                {"id": "2", "payload": {"text": "Heat sign guard to a two-way contract"}}]"#,
        )
        .unwrap();
        std::fs::write(
            fixtures.join("games/0022400777.json"),
            r#"{"state": {"Bam Adebayo": {"points": 10}}}"#,
        )
        .unwrap();

        let store = Store::open(&root.join(paths::STORE_FILE)).unwrap();
        let scheduler = build_scheduler(&Config::starter(), root, &store).unwrap();
        assert!(scheduler.trigger("injury-watch").await.unwrap());
        assert!(scheduler.trigger("heat-live").await.unwrap());

        for status in scheduler.status() {
            assert_eq!(status.last_error, None, "{}", status.name);
        }
        let ledger = store.ledger();
        assert!(ledger.get("injury-watch", "1").unwrap().unwrap().action_taken);
        assert!(!ledger.get("injury-watch", "2").unwrap().unwrap().action_taken);
        assert!(store.snapshots().load("0022400777").unwrap().is_some());

        let outbox = std::fs::read_to_string(root.join(paths::OUTBOX_FILE)).unwrap();
        assert_eq!(outbox.lines().count(), 1);
    }
}
