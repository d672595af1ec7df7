//! Act/skip decisions.
//!
//! Two flavours share one result type: classifier-driven feeds compare a
//! confidence against a threshold, diff-driven entities filter deltas by
//! significance and then apply a cooldown.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::DeltaEvent;
use crate::types::Classification;

/// Default minimum classifier confidence.
pub const DEFAULT_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision<T> {
    Act(T),
    Skip(SkipReason),
}

impl<T> Decision<T> {
    pub fn is_act(&self) -> bool {
        matches!(self, Decision::Act(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The classifier failed or timed out; nothing is known about the item.
    ClassifierUnavailable,
    LabelMismatch { label: String },
    BelowThreshold { confidence: f64, threshold: f64 },
    NotSignificant,
    CoolingDown { remaining_secs: i64 },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ClassifierUnavailable => f.write_str("classifier unavailable"),
            SkipReason::LabelMismatch { label } => write!(f, "label '{label}' not acted on"),
            SkipReason::BelowThreshold {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.2} below threshold {threshold:.2}"),
            SkipReason::NotSignificant => f.write_str("no significant change"),
            SkipReason::CoolingDown { remaining_secs } => {
                write!(f, "cooling down ({remaining_secs}s remaining)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier-driven feeds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceGate {
    /// When set, only classifications with exactly this label can act.
    pub label: Option<String>,
    pub threshold: f64,
}

impl Default for ConfidenceGate {
    fn default() -> Self {
        Self {
            label: None,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl ConfidenceGate {
    pub fn new(threshold: f64) -> Self {
        Self {
            label: None,
            threshold,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// `None` is a failed classifier call and never acts. The threshold is
    /// inclusive.
    pub fn decide<'a>(
        &self,
        classification: Option<&'a Classification>,
    ) -> Decision<&'a Classification> {
        let Some(c) = classification else {
            return Decision::Skip(SkipReason::ClassifierUnavailable);
        };
        if let Some(want) = &self.label {
            if &c.label != want {
                return Decision::Skip(SkipReason::LabelMismatch {
                    label: c.label.clone(),
                });
            }
        }
        if c.confidence >= self.threshold {
            Decision::Act(c)
        } else {
            Decision::Skip(SkipReason::BelowThreshold {
                confidence: c.confidence,
                threshold: self.threshold,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Diff-driven entities
// ---------------------------------------------------------------------------

/// Minimum significance a delta must exceed, per field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignificanceFloor {
    pub per_field: BTreeMap<String, f64>,
    pub default: f64,
}

impl SignificanceFloor {
    pub fn uniform(default: f64) -> Self {
        Self {
            per_field: BTreeMap::new(),
            default,
        }
    }

    pub fn with(mut self, field: impl Into<String>, minimum: f64) -> Self {
        self.per_field.insert(field.into(), minimum);
        self
    }

    pub fn minimum_for(&self, field: &str) -> f64 {
        self.per_field.get(field).copied().unwrap_or(self.default)
    }

    pub fn passes(&self, delta: &DeltaEvent) -> bool {
        delta.significance > self.minimum_for(&delta.field)
    }
}

/// Minimum spacing between actions on the same entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cooldown {
    pub interval: Duration,
    /// `None` means nothing was ever published for this scope.
    pub last_action: Option<DateTime<Utc>>,
}

impl Cooldown {
    pub fn new(interval: Duration, last_action: Option<DateTime<Utc>>) -> Self {
        Self {
            interval,
            last_action,
        }
    }

    /// Time left before another action is allowed; zero when clear.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match self.last_action {
            Some(last) => {
                let left = last + self.interval - now;
                left.max(Duration::zero())
            }
            None => Duration::zero(),
        }
    }
}

/// Keep the deltas whose significance clears the floor; act on them unless
/// the entity is cooling down.
pub fn decide_deltas(
    deltas: Vec<DeltaEvent>,
    floor: &SignificanceFloor,
    cooldown: &Cooldown,
    now: DateTime<Utc>,
) -> Decision<Vec<DeltaEvent>> {
    let survivors: Vec<DeltaEvent> = deltas.into_iter().filter(|d| floor.passes(d)).collect();
    if survivors.is_empty() {
        return Decision::Skip(SkipReason::NotSignificant);
    }
    let remaining = cooldown.remaining(now);
    if remaining > Duration::zero() {
        return Decision::Skip(SkipReason::CoolingDown {
            remaining_secs: remaining.num_seconds(),
        });
    }
    Decision::Act(survivors)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
