use futures::future::BoxFuture;
use futures::FutureExt;
use regex::Regex;
use serde_json::Value;
use watchpost_core::Classification;

use crate::collab::{payload_text, Classifier};
use crate::error::CollabResult;

/// Label returned when too few keywords match.
pub const NO_MATCH_LABEL: &str = "none";

/// Offline classifier: counts distinct keywords present as whole words.
///
/// `min_hits` or more distinct keywords yields the configured label;
/// confidence is `min(0.9, 0.5 + 0.15 * hits)` either way.
pub struct KeywordClassifier {
    patterns: Vec<Regex>,
    min_hits: usize,
    label: String,
}

impl KeywordClassifier {
    pub fn new(
        keywords: &[String],
        min_hits: usize,
        label: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let patterns = keywords
            .iter()
            .map(|k| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(k))))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            min_hits,
            label: label.into(),
        })
    }

    pub fn evaluate(&self, text: &str) -> Classification {
        let hits = self.patterns.iter().filter(|p| p.is_match(text)).count();
        let confidence = (0.5 + 0.15 * hits as f64).min(0.9);
        let label = if hits >= self.min_hits {
            self.label.as_str()
        } else {
            NO_MATCH_LABEL
        };
        let mut c = Classification::new(label, confidence);
        c.summary = Some(format!("{hits} keyword hit(s)"));
        c
    }
}

impl Classifier for KeywordClassifier {
    fn label(&self) -> &str {
        &self.label
    }

    fn classify<'a>(&'a self, payload: &'a Value) -> BoxFuture<'a, CollabResult<Classification>> {
        let verdict = self.evaluate(&payload_text(payload));
        async move { Ok(verdict) }.boxed()
    }
}
