//! Mutable-entity job: diff each active entity against its last snapshot
//! and publish significant changes, at most once per cooldown window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use watchpost_core::{
    decide_deltas, diff, ClaimOutcome, Clock, Cooldown, Decision, DeltaEvent, FieldWeights, Ledger,
    Outcome, SignificanceFloor, SkipReason, SnapshotStore,
};

use crate::collab::{bounded, EntitySource, PublishRequest, Publisher};
use crate::error::JobError;
use crate::scheduler::Job;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntityRunReport {
    pub polled: usize,
    /// First observations; saved without diffing.
    pub baselines: usize,
    pub published: usize,
    /// Polled, but nothing cleared the significance floor.
    pub quiet: usize,
    pub cooling_down: usize,
    pub publish_failures: usize,
    pub unavailable: usize,
    pub purged: usize,
}

/// Timing policy for one entity job.
#[derive(Debug, Clone, Copy)]
pub struct EntityTiming {
    pub cooldown: chrono::Duration,
    pub purge_grace: chrono::Duration,
    pub call_timeout: Duration,
}

pub struct EntityJob {
    name: String,
    source: Arc<dyn EntitySource>,
    publisher: Arc<dyn Publisher>,
    weights: FieldWeights,
    floor: SignificanceFloor,
    timing: EntityTiming,
    ledger: Ledger,
    snapshots: SnapshotStore,
    clock: Arc<dyn Clock>,
}

impl EntityJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn EntitySource>,
        publisher: Arc<dyn Publisher>,
        weights: FieldWeights,
        floor: SignificanceFloor,
        timing: EntityTiming,
        ledger: Ledger,
        snapshots: SnapshotStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            publisher,
            weights,
            floor,
            timing,
            ledger,
            snapshots,
            clock,
        }
    }

    pub async fn poll(&self) -> Result<EntityRunReport, JobError> {
        let ids = bounded(self.timing.call_timeout, self.source.active_entities())
            .await
            .map_err(JobError::SourceUnavailable)?;

        let mut report = EntityRunReport::default();
        for id in &ids {
            self.poll_entity(id, &mut report).await?;
        }

        let cutoff = self.clock.now() - self.timing.purge_grace;
        let purged = self.snapshots.purge_terminal(cutoff)?;
        for id in &purged {
            debug!(job = %self.name, entity = %id, "purged terminal snapshot");
        }
        report.purged = purged.len();
        Ok(report)
    }

    async fn poll_entity(&self, id: &str, report: &mut EntityRunReport) -> Result<(), JobError> {
        let previous = self.snapshots.load(id)?;
        if previous.as_ref().is_some_and(|p| p.terminal_since.is_some()) {
            return Ok(());
        }

        let entity = match bounded(self.timing.call_timeout, self.source.fetch_current(id)).await {
            Ok(entity) => entity,
            Err(e) => {
                warn!(job = %self.name, entity = %id, error = %e, "fetch failed; keeping last snapshot");
                report.unavailable += 1;
                return Ok(());
            }
        };
        report.polled += 1;
        let now = self.clock.now();

        match &previous {
            None => {
                debug!(job = %self.name, entity = %id, "baseline snapshot");
                report.baselines += 1;
            }
            Some(prior) => {
                let deltas = diff(Some(&prior.state), &entity.state, &self.weights);
                let cooldown = Cooldown::new(
                    self.timing.cooldown,
                    self.ledger.last_action_time(&self.name, id)?,
                );
                match decide_deltas(deltas, &self.floor, &cooldown, now) {
                    Decision::Act(survivors) => {
                        self.publish(id, survivors, now, report).await?;
                    }
                    Decision::Skip(reason @ SkipReason::CoolingDown { .. }) => {
                        info!(job = %self.name, entity = %id, %reason, "change suppressed");
                        report.cooling_down += 1;
                    }
                    Decision::Skip(_) => report.quiet += 1,
                }
            }
        }

        // Saved whatever the decision, so the next diff starts from here.
        self.snapshots.save(id, &entity.state, now)?;
        if entity.is_terminal {
            self.snapshots.mark_terminal(id, now)?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        entity_id: &str,
        deltas: Vec<DeltaEvent>,
        now: DateTime<Utc>,
        report: &mut EntityRunReport,
    ) -> Result<(), JobError> {
        let action_id = format!("{entity_id}@{}", now.timestamp_millis());
        if self.ledger.claim(&self.name, entity_id, &action_id)? == ClaimOutcome::AlreadyClaimed {
            debug!(job = %self.name, entity = %entity_id, "action already claimed");
            return Ok(());
        }

        let request = PublishRequest {
            kind: self.name.clone(),
            source_id: action_id.clone(),
            scope: entity_id.to_string(),
            body: json!({ "entity_id": entity_id, "deltas": deltas }),
        };
        match bounded(self.timing.call_timeout, self.publisher.publish(&request)).await {
            Ok(reference) => {
                info!(
                    job = %self.name,
                    entity = %entity_id,
                    deltas = deltas.len(),
                    reference = %reference,
                    "published"
                );
                self.ledger
                    .record_outcome(&self.name, &action_id, Outcome::acted(reference))?;
                report.published += 1;
            }
            Err(e) => {
                warn!(job = %self.name, entity = %entity_id, error = %e, "publish failed");
                self.ledger
                    .record_outcome(&self.name, &action_id, Outcome::failed(&e))?;
                report.publish_failures += 1;
            }
        }
        Ok(())
    }
}

impl Job for EntityJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        async move {
            let report = self.poll().await?;
            info!(
                job = %self.name,
                polled = report.polled,
                published = report.published,
                cooling_down = report.cooling_down,
                unavailable = report.unavailable,
                purged = report.purged,
                "entity run complete"
            );
            Ok(())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingPublisher, ScriptedEntities};
    use chrono::TimeZone;
    use tempfile::TempDir;
    use watchpost_core::{Entity, EntityState, ManualClock, Store};

    const GAME: &str = "0022400777";

    struct Harness {
        _dir: TempDir,
        store: Store,
        clock: ManualClock,
        source: Arc<ScriptedEntities>,
        publisher: Arc<RecordingPublisher>,
        job: EntityJob,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 0, 30, 0).unwrap());
        let store =
            Store::open_with_clock(&dir.path().join("store.redb"), Arc::new(clock.clone()))
                .unwrap();
        let source = Arc::new(ScriptedEntities::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let job = EntityJob::new(
            "heat-live",
            source.clone(),
            publisher.clone(),
            FieldWeights::new().with("points", 1.0, 0.0).with("rebounds", 1.0, 0.0),
            SignificanceFloor::uniform(2.0),
            EntityTiming {
                cooldown: chrono::Duration::seconds(300),
                purge_grace: chrono::Duration::seconds(3600),
                call_timeout: Duration::from_secs(5),
            },
            store.ledger(),
            store.snapshots(),
            store.clock(),
        );
        Harness {
            _dir: dir,
            store,
            clock,
            source,
            publisher,
            job,
        }
    }

    fn game(points: i64, rebounds: i64, terminal: bool) -> Entity {
        Entity {
            entity_id: GAME.to_string(),
            is_terminal: terminal,
            state: EntityState::new()
                .with("Bam Adebayo", "points", points)
                .with("Bam Adebayo", "rebounds", rebounds),
        }
    }

    #[tokio::test]
    async fn baseline_then_act_then_cooldown() {
        let h = harness();
        h.source.push(game(10, 5, false));
        h.source.push(game(16, 5, false));
        h.source.push(game(22, 6, false));

        // Poll 1: baseline only.
        let r1 = h.job.poll().await.unwrap();
        assert_eq!(r1.baselines, 1);
        assert_eq!(h.publisher.count(), 0);
        assert!(h.store.snapshots().load(GAME).unwrap().is_some());

        // Poll 2: +6 points clears the floor of 2.
        h.clock.advance(chrono::Duration::minutes(3));
        let r2 = h.job.poll().await.unwrap();
        assert_eq!(r2.published, 1);
        {
            let published = h.publisher.published.lock().unwrap();
            let deltas = published[0].body["deltas"].as_array().unwrap();
            assert_eq!(deltas.len(), 1);
            assert_eq!(deltas[0]["field"], "points");
            assert_eq!(deltas[0]["magnitude"], 6.0);
        }

        // Poll 3: 30 s later, another qualifying change, still cooling down.
        h.clock.advance(chrono::Duration::seconds(30));
        let r3 = h.job.poll().await.unwrap();
        assert_eq!(r3.cooling_down, 1);
        assert_eq!(h.publisher.count(), 1);
        let snap = h.store.snapshots().load(GAME).unwrap().unwrap();
        assert_eq!(
            snap.state.get("Bam Adebayo", "points").and_then(|v| v.as_number()),
            Some(22.0)
        );
        assert_eq!(snap.captured_at, h.clock.now());
    }

    #[tokio::test]
    async fn cooldown_clears_after_interval() {
        let h = harness();
        h.source.push(game(0, 0, false));
        h.source.push(game(5, 0, false));
        h.source.push(game(10, 0, false));
        h.job.poll().await.unwrap();
        h.job.poll().await.unwrap();
        h.clock.advance(chrono::Duration::seconds(300));
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.published, 1);
        assert_eq!(h.publisher.count(), 2);
        assert_eq!(h.store.ledger().list(Some("heat-live")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn small_changes_are_quiet() {
        let h = harness();
        h.source.push(game(10, 5, false));
        h.source.push(game(12, 6, false));
        h.job.poll().await.unwrap();
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.quiet, 1);
        assert_eq!(h.publisher.count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_snapshot_untouched() {
        let h = harness();
        h.source.push(game(10, 5, false));
        h.job.poll().await.unwrap();
        let before = h.store.snapshots().load(GAME).unwrap();

        h.source.unavailable.lock().unwrap().push(GAME.to_string());
        h.clock.advance(chrono::Duration::minutes(3));
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.unavailable, 1);
        assert_eq!(h.store.snapshots().load(GAME).unwrap(), before);
    }

    #[tokio::test]
    async fn terminal_entity_stops_polling_and_is_purged_after_grace() {
        let h = harness();
        h.source.push(game(10, 5, false));
        h.source.push(game(12, 5, true));
        h.job.poll().await.unwrap();
        h.job.poll().await.unwrap();
        let snap = h.store.snapshots().load(GAME).unwrap().unwrap();
        assert!(snap.terminal_since.is_some());

        let fetches_before = h.source.fetches.lock().unwrap().len();
        h.clock.advance(chrono::Duration::minutes(30));
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.polled, 0);
        assert_eq!(r.purged, 0);
        assert_eq!(h.source.fetches.lock().unwrap().len(), fetches_before);

        h.clock.advance(chrono::Duration::minutes(31));
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.purged, 1);
        assert!(h.store.snapshots().load(GAME).unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_failure_still_counts_for_cooldown() {
        let h = harness();
        h.source.push(game(0, 0, false));
        h.source.push(game(8, 0, false));
        h.source.push(game(16, 0, false));
        *h.publisher.fail.lock().unwrap() = true;
        h.job.poll().await.unwrap();
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.publish_failures, 1);
        let entries = h.store.ledger().list(Some("heat-live")).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].action_taken);

        *h.publisher.fail.lock().unwrap() = false;
        h.clock.advance(chrono::Duration::seconds(10));
        let r = h.job.poll().await.unwrap();
        assert_eq!(r.cooling_down, 1);
    }
}
