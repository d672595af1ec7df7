use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};

use super::SNAPSHOTS;
use crate::error::{store_err, Result};
use crate::types::EntityState;

/// Last observed state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub entity_id: String,
    pub state: EntityState,
    pub captured_at: DateTime<Utc>,
    /// Set the first time the entity was seen terminal; the record becomes
    /// purgeable once the grace period after this instant has passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_since: Option<DateTime<Utc>>,
}

/// Per-entity snapshot storage. One record per entity; `save` overwrites.
#[derive(Clone)]
pub struct SnapshotStore {
    db: Arc<Database>,
}

impl SnapshotStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// `None` means the entity has never been seen, which makes the next
    /// observation a baseline.
    pub fn load(&self, entity_id: &str) -> Result<Option<SnapshotRecord>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(SNAPSHOTS).map_err(store_err)?;
        match table.get(entity_id).map_err(store_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Replace the snapshot for `entity_id`. Clears any terminal marker: a
    /// saved state is by definition a live observation.
    pub fn save(
        &self,
        entity_id: &str,
        state: &EntityState,
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        let record = SnapshotRecord {
            entity_id: entity_id.to_string(),
            state: state.clone(),
            captured_at,
            terminal_since: None,
        };
        self.put(&record)
    }

    /// Record that the entity reached its terminal state. The first call
    /// wins; later calls leave `terminal_since` untouched so the grace
    /// period is measured from the first terminal observation.
    pub fn mark_terminal(&self, entity_id: &str, at: DateTime<Utc>) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(SNAPSHOTS).map_err(store_err)?;
            let current = table
                .get(entity_id)
                .map_err(store_err)?
                .map(|v| v.value().to_vec());
            let Some(current) = current else {
                return Ok(());
            };
            let mut record: SnapshotRecord = serde_json::from_slice(&current)?;
            if record.terminal_since.is_none() {
                record.terminal_since = Some(at);
                let value = serde_json::to_vec(&record)?;
                table
                    .insert(entity_id, value.as_slice())
                    .map_err(store_err)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Delete the snapshot. Returns whether anything was removed.
    pub fn purge(&self, entity_id: &str) -> Result<bool> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let removed = {
            let mut table = wt.open_table(SNAPSHOTS).map_err(store_err)?;
            let previous = table.remove(entity_id).map_err(store_err)?;
            previous.is_some()
        };
        wt.commit().map_err(store_err)?;
        Ok(removed)
    }

    /// Delete every snapshot whose entity went terminal at or before
    /// `cutoff`. Returns the purged entity ids.
    pub fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let expired: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|r| r.terminal_since.is_some_and(|t| t <= cutoff))
            .map(|r| r.entity_id)
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }

        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(SNAPSHOTS).map_err(store_err)?;
            for id in &expired {
                table.remove(id.as_str()).map_err(store_err)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(expired)
    }

    pub fn list(&self) -> Result<Vec<SnapshotRecord>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(SNAPSHOTS).map_err(store_err)?;
        let mut out: Vec<SnapshotRecord> = Vec::new();
        for row in table.iter().map_err(store_err)? {
            let (_, v) = row.map_err(store_err)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }

    fn put(&self, record: &SnapshotRecord) -> Result<()> {
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(SNAPSHOTS).map_err(store_err)?;
            table
                .insert(record.entity_id.as_str(), value.as_slice())
                .map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}
