//! Narrow interfaces to the outside world.
//!
//! Each trait is object-safe so a backend can be chosen from config once at
//! startup and shared as `Arc<dyn ...>` between jobs.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use watchpost_core::{Classification, Entity, SourceEvent};

use crate::error::{CollabResult, CollaboratorError};

/// Append-only feed.
pub trait FeedSource: Send + Sync {
    /// Items newer than `since`, oldest first. `None` means "from the start
    /// of whatever the source still retains".
    fn fetch_new<'a>(&'a self, since: Option<&'a str>)
        -> BoxFuture<'a, CollabResult<Vec<SourceEvent>>>;
}

/// Source of mutable entities such as live games.
pub trait EntitySource: Send + Sync {
    /// Ids of the entities worth polling right now.
    fn active_entities(&self) -> BoxFuture<'_, CollabResult<Vec<String>>>;

    fn fetch_current<'a>(&'a self, entity_id: &'a str) -> BoxFuture<'a, CollabResult<Entity>>;
}

pub trait Classifier: Send + Sync {
    /// The label this classifier emits for items worth acting on.
    fn label(&self) -> &str;

    fn classify<'a>(&'a self, payload: &'a Value) -> BoxFuture<'a, CollabResult<Classification>>;
}

pub trait Publisher: Send + Sync {
    /// Publish once and return the external reference of the result.
    fn publish<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, CollabResult<String>>;
}

/// What a job hands to the publisher. Rendering `body` into a post is the
/// publisher's business.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    pub kind: String,
    pub source_id: String,
    pub scope: String,
    pub body: Value,
}

/// Await a collaborator call for at most `limit`.
pub async fn bounded<T, F>(limit: Duration, fut: F) -> CollabResult<T>
where
    F: Future<Output = CollabResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(limit)),
    }
}

/// Best-effort text of an opaque payload: a bare string, else a `text`
/// field, else the JSON itself.
pub fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(s)) => s.clone(),
            _ => payload.to_string(),
        },
        other => other.to_string(),
    }
}
