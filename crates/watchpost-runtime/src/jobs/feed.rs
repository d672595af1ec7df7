//! Append-only feed job: classify each new item once, publish the ones
//! that clear the gate.
//!
//! Per item, in source order:
//!
//! 1. already in the ledger: skip quietly
//! 2. classifier fails or times out: leave unclaimed, retry next run
//! 3. gate says skip: claim and resolve with `action_taken = false`
//! 4. gate says act: claim, publish, resolve with the outcome
//!
//! The watermark only advances across the leading run of items that ended
//! up in the ledger, so a deferred item is always re-fetched.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use watchpost_core::store::Watermarks;
use watchpost_core::{
    ClaimOutcome, ConfidenceGate, Decision, Ledger, Outcome, SkipReason, SourceEvent,
};

use crate::collab::{bounded, Classifier, FeedSource, PublishRequest, Publisher};
use crate::error::JobError;
use crate::scheduler::Job;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedRunReport {
    pub fetched: usize,
    pub already_handled: usize,
    pub published: usize,
    pub skipped: usize,
    pub publish_failures: usize,
    /// Items left unclaimed because classification failed.
    pub deferred: usize,
    pub watermark: Option<String>,
}

pub struct FeedJob {
    name: String,
    scope: String,
    source: Arc<dyn FeedSource>,
    classifier: Arc<dyn Classifier>,
    publisher: Arc<dyn Publisher>,
    gate: ConfidenceGate,
    ledger: Ledger,
    watermarks: Watermarks,
    call_timeout: Duration,
}

/// What happened to a single item.
enum ItemResult {
    Handled,
    Deferred,
}

impl FeedJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        scope: impl Into<String>,
        source: Arc<dyn FeedSource>,
        classifier: Arc<dyn Classifier>,
        publisher: Arc<dyn Publisher>,
        gate: ConfidenceGate,
        ledger: Ledger,
        watermarks: Watermarks,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            source,
            classifier,
            publisher,
            gate,
            ledger,
            watermarks,
            call_timeout,
        }
    }

    /// One pass over the feed.
    pub async fn poll(&self) -> Result<FeedRunReport, JobError> {
        let since = self.watermarks.get(&self.name)?;
        let events = bounded(self.call_timeout, self.source.fetch_new(since.as_deref()))
            .await
            .map_err(JobError::SourceUnavailable)?;

        let mut report = FeedRunReport {
            fetched: events.len(),
            watermark: since,
            ..FeedRunReport::default()
        };
        let mut contiguous = true;
        let mut advance_to = None;

        for event in &events {
            match self.handle(event, &mut report).await? {
                ItemResult::Handled if contiguous => advance_to = Some(event.id.clone()),
                ItemResult::Handled => {}
                ItemResult::Deferred => contiguous = false,
            }
        }

        if let Some(marker) = advance_to {
            self.watermarks.set(&self.name, &marker)?;
            report.watermark = Some(marker);
        }
        Ok(report)
    }

    async fn handle(
        &self,
        event: &SourceEvent,
        report: &mut FeedRunReport,
    ) -> Result<ItemResult, JobError> {
        if self.ledger.is_claimed(&self.name, &event.id)? {
            debug!(job = %self.name, id = %event.id, "already handled");
            report.already_handled += 1;
            return Ok(ItemResult::Handled);
        }

        let classification =
            match bounded(self.call_timeout, self.classifier.classify(&event.payload)).await {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!(job = %self.name, id = %event.id, error = %e, "classifier failed; will retry");
                    None
                }
            };

        let decision = self.gate.decide(classification.as_ref());
        let verdict = match decision {
            Decision::Skip(SkipReason::ClassifierUnavailable) => {
                report.deferred += 1;
                return Ok(ItemResult::Deferred);
            }
            other => other,
        };

        if self.ledger.claim(&self.name, &self.scope, &event.id)? == ClaimOutcome::AlreadyClaimed {
            debug!(job = %self.name, id = %event.id, "claimed concurrently by another run");
            report.already_handled += 1;
            return Ok(ItemResult::Handled);
        }

        match verdict {
            Decision::Skip(reason) => {
                debug!(job = %self.name, id = %event.id, %reason, "skipped");
                self.ledger
                    .record_outcome(&self.name, &event.id, Outcome::skipped(reason.to_string()))?;
                report.skipped += 1;
            }
            Decision::Act(classification) => {
                let request = PublishRequest {
                    kind: self.name.clone(),
                    source_id: event.id.clone(),
                    scope: self.scope.clone(),
                    body: json!({
                        "event": event.payload,
                        "classification": classification,
                    }),
                };
                match bounded(self.call_timeout, self.publisher.publish(&request)).await {
                    Ok(reference) => {
                        info!(job = %self.name, id = %event.id, reference = %reference, "published");
                        self.ledger.record_outcome(
                            &self.name,
                            &event.id,
                            Outcome::acted(reference),
                        )?;
                        report.published += 1;
                    }
                    Err(e) => {
                        warn!(job = %self.name, id = %event.id, error = %e, "publish failed");
                        self.ledger
                            .record_outcome(&self.name, &event.id, Outcome::failed(&e))?;
                        report.publish_failures += 1;
                    }
                }
            }
        }
        Ok(ItemResult::Handled)
    }
}

impl Job for FeedJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        async move {
            let report = self.poll().await?;
            info!(
                job = %self.name,
                fetched = report.fetched,
                published = report.published,
                skipped = report.skipped,
                deferred = report.deferred,
                publish_failures = report.publish_failures,
                "feed run complete"
            );
            Ok(())
        }
        .boxed()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
