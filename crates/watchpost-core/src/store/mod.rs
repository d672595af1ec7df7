//! Durable local state backed by a single redb file.
//!
//! # Table design
//!
//! ```text
//! ledger      "kind \x1f id"  -> JSON LedgerEntry
//! snapshots   entity_id        -> JSON SnapshotRecord
//! watermarks  job name         -> last contiguous processed marker
//! ```
//!
//! Ledger keys put the kind first so all entries of one kind form a
//! contiguous range; `last_action_time` and `list` scan only that range.
//! Kinds are validated names and can never contain the `\x1f` separator.
//!
//! redb admits one write transaction at a time, and a database file can be
//! open in only one process. Both properties are what make `Ledger::claim`
//! a true compare-and-insert.

pub mod ledger;
pub mod snapshot;
pub mod watermark;

use std::path::Path;
use std::sync::Arc;

use redb::{Database, TableDefinition};

use crate::clock::{Clock, SystemClock};
use crate::error::{store_err, Result};

pub use ledger::{ClaimOutcome, Ledger, LedgerEntry, Outcome};
pub use snapshot::{SnapshotRecord, SnapshotStore};
pub use watermark::Watermarks;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

pub(crate) const LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger");
pub(crate) const SNAPSHOTS: TableDefinition<&str, &[u8]> = TableDefinition::new("snapshots");
pub(crate) const WATERMARKS: TableDefinition<&str, &str> = TableDefinition::new("watermarks");

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Handle to the shared database. Cheap to clone; every view it hands out
/// shares the same underlying `Database` and clock.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl Store {
    /// Open or create the store at `path` using the system clock.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    /// Open or create the store at `path`, creating every table up front so
    /// read transactions never hit a missing table.
    pub fn open_with_clock(path: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        wt.open_table(LEDGER).map_err(store_err)?;
        wt.open_table(SNAPSHOTS).map_err(store_err)?;
        wt.open_table(WATERMARKS).map_err(store_err)?;
        wt.commit().map_err(store_err)?;
        Ok(Self {
            db: Arc::new(db),
            clock,
        })
    }

    pub fn ledger(&self) -> Ledger {
        Ledger::new(Arc::clone(&self.db), Arc::clone(&self.clock))
    }

    pub fn snapshots(&self) -> SnapshotStore {
        SnapshotStore::new(Arc::clone(&self.db))
    }

    pub fn watermarks(&self) -> Watermarks {
        Watermarks::new(Arc::clone(&self.db))
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }
}
