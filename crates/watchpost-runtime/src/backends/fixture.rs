//! File-backed sources for test mode and local runs.

use std::path::PathBuf;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use watchpost_core::{Entity, EntityState, SourceEvent};

use crate::collab::{EntitySource, FeedSource};
use crate::error::{CollabResult, CollaboratorError};

// ---------------------------------------------------------------------------
// FileFeedSource
// ---------------------------------------------------------------------------

/// A JSON array of events, oldest first. The file is re-read on every call,
/// so appending to it simulates new posts.
pub struct FileFeedSource {
    path: PathBuf,
}

impl FileFeedSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self, since: Option<&str>) -> CollabResult<Vec<SourceEvent>> {
        let data = tokio::fs::read_to_string(&self.path).await?;
        let events: Vec<SourceEvent> = serde_json::from_str(&data).map_err(|e| {
            CollaboratorError::InvalidResponse(format!("{}: {e}", self.path.display()))
        })?;
        // An unknown marker (e.g. the item aged out of the source) yields
        // everything; the ledger filters what was already handled.
        let start = since
            .and_then(|m| events.iter().position(|e| e.id == m))
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(events.into_iter().skip(start).collect())
    }
}

impl FeedSource for FileFeedSource {
    fn fetch_new<'a>(
        &'a self,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, CollabResult<Vec<SourceEvent>>> {
        self.read(since).boxed()
    }
}

// ---------------------------------------------------------------------------
// DirectoryEntitySource
// ---------------------------------------------------------------------------

/// One `<entity_id>.json` file per active entity. Removing a file takes the
/// entity out of rotation.
pub struct DirectoryEntitySource {
    dir: PathBuf,
}

#[derive(Deserialize)]
struct EntityFile {
    #[serde(default)]
    is_terminal: bool,
    #[serde(default)]
    state: EntityState,
}

impl DirectoryEntitySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn list(&self) -> CollabResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn read(&self, entity_id: &str) -> CollabResult<Entity> {
        let path = self.dir.join(format!("{entity_id}.json"));
        let data = tokio::fs::read_to_string(&path).await?;
        let file: EntityFile = serde_json::from_str(&data)
            .map_err(|e| CollaboratorError::InvalidResponse(format!("{}: {e}", path.display())))?;
        Ok(Entity {
            entity_id: entity_id.to_string(),
            is_terminal: file.is_terminal,
            state: file.state,
        })
    }
}

impl EntitySource for DirectoryEntitySource {
    fn active_entities(&self) -> BoxFuture<'_, CollabResult<Vec<String>>> {
        self.list().boxed()
    }

    fn fetch_current<'a>(&'a self, entity_id: &'a str) -> BoxFuture<'a, CollabResult<Entity>> {
        self.read(entity_id).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FEED: &str = r#"[
        {"id": "a1", "payload": {"text": "first"}},
        {"id": "a2", "payload": {"text": "second"}},
        {"id": "a3", "payload": {"text": "third"}}
    ]"#;

    #[tokio::test]
    async fn feed_returns_items_after_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(&path, FEED).unwrap();
        let source = FileFeedSource::new(&path);

        let all = source.fetch_new(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let newer = source.fetch_new(Some("a1")).await.unwrap();
        let ids: Vec<_> = newer.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a2", "a3"]);

        assert!(source.fetch_new(Some("a3")).await.unwrap().is_empty());
        assert_eq!(source.fetch_new(Some("gone")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn missing_feed_is_an_error() {
        let dir = TempDir::new().unwrap();
        let source = FileFeedSource::new(dir.path().join("absent.json"));
        assert!(matches!(
            source.fetch_new(None).await,
            Err(CollaboratorError::Io(_))
        ));
    }

    #[tokio::test]
    async fn directory_lists_json_files_and_reads_them() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("0022400777.json"),
            r#"{"state": {"Bam Adebayo": {"points": 8}}}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("0022400555.json"),
            r#"{"is_terminal": true, "state": {}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = DirectoryEntitySource::new(dir.path());
        let ids = source.active_entities().await.unwrap();
        assert_eq!(ids, ["0022400555", "0022400777"]);

        let live = source.fetch_current("0022400777").await.unwrap();
        assert_eq!(live.entity_id, "0022400777");
        assert!(!live.is_terminal);
        assert!(live.state.get("Bam Adebayo", "points").is_some());

        assert!(source.fetch_current("0022400555").await.unwrap().is_terminal);
        assert!(source.fetch_current("missing").await.is_err());
    }
}
