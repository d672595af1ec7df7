use std::path::PathBuf;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use uuid::Uuid;
use watchpost_core::io::append_line;
use watchpost_core::WatchpostError;

use crate::collab::{PublishRequest, Publisher};
use crate::error::{CollabResult, CollaboratorError};

/// Publishes by appending one JSON object per line to a local outbox.
pub struct JsonlPublisher {
    path: PathBuf,
}

impl JsonlPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write(&self, request: &PublishRequest) -> CollabResult<String> {
        let reference = Uuid::new_v4().to_string();
        let line = json!({
            "ref": reference,
            "published_at": Utc::now(),
            "kind": request.kind,
            "source_id": request.source_id,
            "scope": request.scope,
            "body": request.body,
        });
        append_line(&self.path, &line.to_string()).map_err(|e| match e {
            WatchpostError::Io(io) => CollaboratorError::Io(io),
            other => CollaboratorError::Unavailable(other.to_string()),
        })?;
        Ok(reference)
    }
}

impl Publisher for JsonlPublisher {
    fn publish<'a>(&'a self, request: &'a PublishRequest) -> BoxFuture<'a, CollabResult<String>> {
        let result = self.write(request);
        async move { result }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[tokio::test]
    async fn appends_one_line_per_publish() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/outbox.jsonl");
        let publisher = JsonlPublisher::new(&path);
        let request = PublishRequest {
            kind: "heat-live".into(),
            source_id: "0022400777@1".into(),
            scope: "0022400777".into(),
            body: json!({"deltas": []}),
        };
        let r1 = publisher.publish(&request).await.unwrap();
        let r2 = publisher.publish(&request).await.unwrap();
        assert_ne!(r1, r2);

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["ref"], r1.as_str());
        assert_eq!(lines[1]["scope"], "0022400777");
    }
}
