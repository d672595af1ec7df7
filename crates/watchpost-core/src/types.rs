use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// SourceEvent
// ---------------------------------------------------------------------------

/// One immutable item from an append-only feed (a post, a headline, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Stable external identifier, unique within the feed.
    pub id: String,
    /// Opaque to the core; handed to the classifier and publisher untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

impl SourceEvent {
    pub fn new(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload,
            observed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// A single stat on a sub-actor's line: numeric (points, rebounds) or
/// categorical (position, status).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Label(String),
}

impl FieldValue {
    /// The value an actor is assumed to have held before it first appeared.
    pub fn neutral_for(&self) -> FieldValue {
        match self {
            FieldValue::Number(_) => FieldValue::Number(0.0),
            FieldValue::Label(_) => FieldValue::Label(String::new()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Label(_) => None,
        }
    }

    /// Signed change from `previous` to `self`.
    ///
    /// Numbers subtract. Any other pairing is a categorical change: `1.0`
    /// when the values differ, `0.0` when they match.
    pub fn change_from(&self, previous: &FieldValue) -> f64 {
        match (previous, self) {
            (FieldValue::Number(a), FieldValue::Number(b)) => b - a,
            (a, b) if a == b => 0.0,
            _ => 1.0,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Number(n as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Label(s.to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Label(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityState / Entity
// ---------------------------------------------------------------------------

pub type StatLine = BTreeMap<String, FieldValue>;

/// Structured snapshot of a mutable entity: actor key → field → value.
///
/// Ordered maps keep diff output stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityState {
    pub actors: BTreeMap<String, StatLine>,
}

impl EntityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by sources and tests: set one field on one actor.
    pub fn with(
        mut self,
        actor: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.set(actor, field, value);
        self
    }

    pub fn set(
        &mut self,
        actor: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
    ) {
        self.actors
            .entry(actor.into())
            .or_default()
            .insert(field.into(), value.into());
    }

    pub fn get(&self, actor: &str, field: &str) -> Option<&FieldValue> {
        self.actors.get(actor).and_then(|line| line.get(field))
    }
}

/// A mutable source record (e.g. a live game) as fetched right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    /// True once the entity has stopped changing (game final).
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default)]
    pub state: EntityState,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Verdict returned by a classifier collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    /// In `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Classification {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence: confidence.clamp(0.0, 1.0),
            summary: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_value_untagged_json() {
        let line: StatLine =
            serde_json::from_str(r#"{"points": 12, "position": "C", "minutes": "21:04"}"#)
                .unwrap();
        assert_eq!(line["points"], FieldValue::Number(12.0));
        assert_eq!(line["position"], FieldValue::Label("C".into()));
    }

    #[test]
    fn change_from_numbers_and_labels() {
        assert_eq!(FieldValue::from(7.0).change_from(&FieldValue::from(4.0)), 3.0);
        assert_eq!(FieldValue::from(2.0).change_from(&FieldValue::from(5.0)), -3.0);
        assert_eq!(FieldValue::from("F").change_from(&FieldValue::from("C")), 1.0);
        assert_eq!(FieldValue::from("C").change_from(&FieldValue::from("C")), 0.0);
    }

    #[test]
    fn entity_state_is_a_plain_map_on_the_wire() {
        let state = EntityState::new()
            .with("Bam Adebayo", "points", 10i64)
            .with("Bam Adebayo", "rebounds", 6i64);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["Bam Adebayo"]["points"], 10.0);

        let entity: Entity = serde_json::from_str(
            r#"{"entity_id": "0022400123", "state": {"Tyler Herro": {"points": 3}}}"#,
        )
        .unwrap();
        assert!(!entity.is_terminal);
        assert_eq!(
            entity.state.get("Tyler Herro", "points"),
            Some(&FieldValue::Number(3.0))
        );
    }

    #[test]
    fn source_event_defaults_observed_at() {
        let ev: SourceEvent =
            serde_json::from_str(r#"{"id": "1870001", "payload": {"text": "hello"}}"#).unwrap();
        assert_eq!(ev.id, "1870001");
        assert_eq!(ev.payload["text"], "hello");
    }

    #[test]
    fn classification_clamps_confidence() {
        assert_eq!(Classification::new("injury", 1.4).confidence, 1.0);
        assert_eq!(Classification::new("none", -0.2).confidence, 0.0);
    }
}
