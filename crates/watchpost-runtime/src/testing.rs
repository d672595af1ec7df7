//! In-memory collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use watchpost_core::{Classification, Entity, SourceEvent};

use crate::collab::{Classifier, EntitySource, FeedSource, PublishRequest, Publisher};
use crate::error::{CollabResult, CollaboratorError};

/// Feed whose contents tests can replace between polls. Records the marker
/// each call received.
#[derive(Default)]
pub struct ScriptedFeed {
    pub events: Mutex<Vec<SourceEvent>>,
    pub seen_markers: Mutex<Vec<Option<String>>>,
    pub fail: Mutex<bool>,
}

impl ScriptedFeed {
    pub fn with(ids: &[&str]) -> Self {
        let feed = Self::default();
        feed.set(ids);
        feed
    }

    pub fn set(&self, ids: &[&str]) {
        *self.events.lock().unwrap() = ids
            .iter()
            .map(|id| SourceEvent::new(*id, Value::String(format!("post {id}"))))
            .collect();
    }
}

impl FeedSource for ScriptedFeed {
    fn fetch_new<'a>(
        &'a self,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, CollabResult<Vec<SourceEvent>>> {
        self.seen_markers
            .lock()
            .unwrap()
            .push(since.map(String::from));
        let result = if *self.fail.lock().unwrap() {
            Err(CollaboratorError::Unavailable("feed down".into()))
        } else {
            let events = self.events.lock().unwrap().clone();
            let start = since
                .and_then(|m| events.iter().position(|e| e.id == m))
                .map(|i| i + 1)
                .unwrap_or(0);
            Ok(events.into_iter().skip(start).collect())
        };
        async move { result }.boxed()
    }
}

/// Per-id canned verdicts. An id mapped to `None` fails; unknown ids fail.
#[derive(Default)]
pub struct CannedClassifier {
    pub verdicts: Mutex<HashMap<String, Option<Classification>>>,
    pub calls: Mutex<Vec<String>>,
}

impl CannedClassifier {
    pub fn verdict(self, id: &str, label: &str, confidence: f64) -> Self {
        self.verdicts
            .lock()
            .unwrap()
            .insert(id.to_string(), Some(Classification::new(label, confidence)));
        self
    }

    pub fn failing(self, id: &str) -> Self {
        self.verdicts.lock().unwrap().insert(id.to_string(), None);
        self
    }
}

impl Classifier for CannedClassifier {
    fn label(&self) -> &str {
        "injury"
    }

    fn classify<'a>(&'a self, payload: &'a Value) -> BoxFuture<'a, CollabResult<Classification>> {
        // ScriptedFeed payloads are "post <id>".
        let text = payload.as_str().unwrap_or_default();
        let id = text.trim_start_matches("post ").to_string();
        self.calls.lock().unwrap().push(id.clone());
        let result = match self.verdicts.lock().unwrap().get(&id) {
            Some(Some(c)) => Ok(c.clone()),
            _ => Err(CollaboratorError::Unavailable(format!("no verdict for {id}"))),
        };
        async move { result }.boxed()
    }
}

/// Records every publish; fails while `fail` is set.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<PublishRequest>>,
    pub fail: Mutex<bool>,
}

impl RecordingPublisher {
    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

impl Publisher for RecordingPublisher {
    fn publish<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, CollabResult<String>> {
        let result = if *self.fail.lock().unwrap() {
            Err(CollaboratorError::Rejected {
                status: 503,
                body: "unavailable".into(),
            })
        } else {
            let mut published = self.published.lock().unwrap();
            published.push(request.clone());
            Ok(format!("ref-{}", published.len()))
        };
        async move { result }.boxed()
    }
}

/// Entity source that serves queued states per entity; the last state
/// repeats once the queue drains.
#[derive(Default)]
pub struct ScriptedEntities {
    pub queue: Mutex<HashMap<String, VecDeque<Entity>>>,
    pub last: Mutex<HashMap<String, Entity>>,
    pub unavailable: Mutex<Vec<String>>,
    pub fetches: Mutex<Vec<String>>,
}

impl ScriptedEntities {
    pub fn push(&self, entity: Entity) {
        self.queue
            .lock()
            .unwrap()
            .entry(entity.entity_id.clone())
            .or_default()
            .push_back(entity);
    }
}

impl EntitySource for ScriptedEntities {
    fn active_entities(&self) -> BoxFuture<'_, CollabResult<Vec<String>>> {
        let mut ids: Vec<String> = self.queue.lock().unwrap().keys().cloned().collect();
        ids.sort();
        async move { Ok(ids) }.boxed()
    }

    fn fetch_current<'a>(&'a self, entity_id: &'a str) -> BoxFuture<'a, CollabResult<Entity>> {
        self.fetches.lock().unwrap().push(entity_id.to_string());
        let result = if self.unavailable.lock().unwrap().iter().any(|i| i == entity_id) {
            Err(CollaboratorError::Unavailable("stats api down".into()))
        } else {
            let next = self
                .queue
                .lock()
                .unwrap()
                .get_mut(entity_id)
                .and_then(|q| q.pop_front());
            let mut last = self.last.lock().unwrap();
            match next {
                Some(e) => {
                    last.insert(entity_id.to_string(), e.clone());
                    Ok(e)
                }
                None => last
                    .get(entity_id)
                    .cloned()
                    .ok_or_else(|| CollaboratorError::Unavailable("unknown entity".into())),
            }
        };
        async move { result }.boxed()
    }
}
