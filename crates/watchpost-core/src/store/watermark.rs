use std::sync::Arc;

use redb::Database;

use super::WATERMARKS;
use crate::error::{store_err, Result};

/// Per-job "processed everything up to here" marker for append-only feeds.
///
/// Only an optimisation: the ledger alone is enough to prevent duplicates.
/// A lost or stale watermark costs a re-scan, never a repost.
#[derive(Clone)]
pub struct Watermarks {
    db: Arc<Database>,
}

impl Watermarks {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(&self, job: &str) -> Result<Option<String>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(WATERMARKS).map_err(store_err)?;
        let value = table
            .get(job)
            .map_err(store_err)?
            .map(|v| v.value().to_string());
        Ok(value)
    }

    pub fn set(&self, job: &str, marker: &str) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(WATERMARKS).map_err(store_err)?;
            table.insert(job, marker).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    pub fn clear(&self, job: &str) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut table = wt.open_table(WATERMARKS).map_err(store_err)?;
            table.remove(job).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }
}
