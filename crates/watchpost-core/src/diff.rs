//! Snapshot diffing for mutable entities.
//!
//! `diff` only detects and quantifies change. What counts as interesting is
//! an injected [`SignificancePolicy`]; the gate decides what to do with it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{EntityState, FieldValue};

// ---------------------------------------------------------------------------
// DeltaEvent
// ---------------------------------------------------------------------------

/// One field change on one actor between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEvent {
    pub actor_key: String,
    pub field: String,
    pub previous_value: FieldValue,
    pub new_value: FieldValue,
    /// Signed numeric change; categorical changes count as 1.
    pub magnitude: f64,
    pub significance: f64,
}

// ---------------------------------------------------------------------------
// Significance policy
// ---------------------------------------------------------------------------

pub trait SignificancePolicy {
    /// Whether changes to `field` are reported at all.
    fn tracks(&self, _field: &str) -> bool {
        true
    }

    fn significance(&self, actor: &str, field: &str, magnitude: f64) -> f64;
}

impl<F> SignificancePolicy for F
where
    F: Fn(&str, &str, f64) -> f64,
{
    fn significance(&self, actor: &str, field: &str, magnitude: f64) -> f64 {
        self(actor, field, magnitude)
    }
}

/// Weight applied to a field's change, split by direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldWeight {
    /// Multiplier for increases.
    pub gain: f64,
    /// Multiplier for the absolute size of decreases.
    pub loss: f64,
}

impl Default for FieldWeight {
    fn default() -> Self {
        Self {
            gain: 1.0,
            loss: 1.0,
        }
    }
}

/// Per-field weighting. An empty table tracks everything at weight 1; a
/// non-empty one tracks only the listed fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldWeights {
    weights: BTreeMap<String, FieldWeight>,
}

impl FieldWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: impl Into<String>, gain: f64, loss: f64) -> Self {
        self.weights.insert(field.into(), FieldWeight { gain, loss });
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, weight: FieldWeight) {
        self.weights.insert(field.into(), weight);
    }

    fn weight(&self, field: &str) -> FieldWeight {
        self.weights.get(field).copied().unwrap_or_default()
    }
}

impl SignificancePolicy for FieldWeights {
    fn tracks(&self, field: &str) -> bool {
        self.weights.is_empty() || self.weights.contains_key(field)
    }

    fn significance(&self, _actor: &str, field: &str, magnitude: f64) -> f64 {
        let w = self.weight(field);
        if magnitude >= 0.0 {
            magnitude * w.gain
        } else {
            -magnitude * w.loss
        }
    }
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Compare two observations of the same entity.
///
/// With no previous observation the result is empty: the first poll only
/// establishes a baseline. An actor new in `current` is diffed against
/// neutral values and reports every tracked field. A field that `current`
/// omits for a known actor is treated as unreported and produces nothing.
/// Output is ordered by actor key, then field name.
pub fn diff<P>(previous: Option<&EntityState>, current: &EntityState, policy: &P) -> Vec<DeltaEvent>
where
    P: SignificancePolicy + ?Sized,
{
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (actor, line) in &current.actors {
        let prior_line = previous.actors.get(actor);
        for (field, new_value) in line {
            if !policy.tracks(field) {
                continue;
            }
            let previous_value = match prior_line {
                Some(prior) => match prior.get(field) {
                    Some(v) => v.clone(),
                    // Known actor, field reported for the first time.
                    None => new_value.neutral_for(),
                },
                None => new_value.neutral_for(),
            };
            if prior_line.is_some() && &previous_value == new_value {
                continue;
            }
            let magnitude = new_value.change_from(&previous_value);
            out.push(DeltaEvent {
                actor_key: actor.clone(),
                field: field.clone(),
                significance: policy.significance(actor, field, magnitude),
                previous_value,
                new_value: new_value.clone(),
                magnitude,
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(_: &str, _: &str, m: f64) -> f64 {
        m.abs()
    }

    fn box_score(points: i64, rebounds: i64) -> EntityState {
        EntityState::new()
            .with("Bam Adebayo", "points", points)
            .with("Bam Adebayo", "rebounds", rebounds)
            .with("Tyler Herro", "points", 11i64)
    }

    #[test]
    fn first_observation_is_baseline_only() {
        let s = box_score(10, 5);
        assert!(diff(None, &s, &unit).is_empty());
        assert!(diff(None, &EntityState::new(), &unit).is_empty());
    }

    #[test]
    fn identical_states_yield_nothing() {
        let s = box_score(10, 5).with("Bam Adebayo", "position", "C");
        assert!(diff(Some(&s), &s, &unit).is_empty());
    }

    #[test]
    fn changed_fields_only_in_stable_order() {
        let a = box_score(10, 5);
        let b = box_score(14, 4);
        let deltas = diff(Some(&a), &b, &unit);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].field, "points");
        assert_eq!(deltas[0].magnitude, 4.0);
        assert_eq!(deltas[0].previous_value, FieldValue::Number(10.0));
        assert_eq!(deltas[1].field, "rebounds");
        assert_eq!(deltas[1].magnitude, -1.0);
        assert_eq!(deltas[1].significance, 1.0);
    }

    #[test]
    fn magnitudes_are_additive_across_polls() {
        let a = box_score(2, 1);
        let b = box_score(9, 3);
        let c = box_score(15, 2);
        let direct = diff(Some(&a), &c, &unit);
        let step1 = diff(Some(&a), &b, &unit);
        let step2 = diff(Some(&b), &c, &unit);
        for field in ["points", "rebounds"] {
            let sum = |ds: &[DeltaEvent]| -> f64 {
                ds.iter()
                    .filter(|d| d.field == field)
                    .map(|d| d.magnitude)
                    .sum()
            };
            assert_eq!(sum(&direct), sum(&step1) + sum(&step2), "field {field}");
        }
    }

    #[test]
    fn new_actor_diffs_against_neutral() {
        let a = box_score(10, 5);
        let b = box_score(10, 5)
            .with("Kel'el Ware", "points", 6i64)
            .with("Kel'el Ware", "blocks", 0i64);
        let deltas = diff(Some(&a), &b, &unit);
        // Every field of a new actor is reported, including zeros.
        assert_eq!(deltas.len(), 2);
        assert!(deltas.iter().all(|d| d.actor_key == "Kel'el Ware"));
        assert_eq!(deltas[0].field, "blocks");
        assert_eq!(deltas[0].significance, 0.0);
        assert_eq!(deltas[1].previous_value, FieldValue::Number(0.0));
        assert_eq!(deltas[1].new_value, FieldValue::Number(6.0));
    }

    #[test]
    fn missing_field_is_not_a_decrease() {
        let a = box_score(10, 5);
        let b = EntityState::new()
            .with("Bam Adebayo", "points", 10i64)
            .with("Tyler Herro", "points", 11i64);
        assert!(diff(Some(&a), &b, &unit).is_empty());
    }

    #[test]
    fn categorical_change_counts_as_one() {
        let a = EntityState::new().with("Jimmy Butler", "status", "active");
        let b = EntityState::new().with("Jimmy Butler", "status", "ejected");
        let deltas = diff(Some(&a), &b, &unit);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].magnitude, 1.0);
    }

    #[test]
    fn field_weights_filter_and_split_direction() {
        let weights = FieldWeights::new()
            .with("points", 1.0, 0.0)
            .with("turnovers", 0.0, 2.0);
        let a = EntityState::new()
            .with("Bam Adebayo", "points", 10i64)
            .with("Bam Adebayo", "turnovers", 3i64)
            .with("Bam Adebayo", "rebounds", 5i64);
        let b = EntityState::new()
            .with("Bam Adebayo", "points", 13i64)
            .with("Bam Adebayo", "turnovers", 2i64)
            .with("Bam Adebayo", "rebounds", 9i64);
        let deltas = diff(Some(&a), &b, &weights);
        assert_eq!(deltas.len(), 2, "rebounds is untracked");
        assert_eq!(deltas[0].field, "points");
        assert_eq!(deltas[0].significance, 3.0);
        assert_eq!(deltas[1].field, "turnovers");
        assert_eq!(deltas[1].significance, 2.0);
    }
}
