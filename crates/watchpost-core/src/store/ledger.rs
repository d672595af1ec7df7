//! The deduplication ledger: "has this source event been handled?"
//!
//! Handling is split in two steps. `claim` reserves the right to act and is
//! the only operation that can race; `record_outcome` fills in what actually
//! happened. A crash between the two leaves the entry claimed but unresolved,
//! which still blocks reprocessing. A lost publish is preferred over a
//! duplicate one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};

use super::LEDGER;
use crate::clock::Clock;
use crate::error::{store_err, Result, WatchpostError};
use crate::paths::validate_name;

const SEP: char = '\u{1f}';

fn entry_key(kind: &str, id: &str) -> String {
    format!("{kind}{SEP}{id}")
}

/// Half-open key range covering every entry of `kind`.
fn kind_range(kind: &str) -> (String, String) {
    let start = format!("{kind}{SEP}");
    // '\x20' is the next code point after the separator.
    let end = format!("{kind}\u{20}");
    (start, end)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// This caller now owns the right to act on the event.
    Claimed,
    /// Someone already claimed it; nothing was written.
    AlreadyClaimed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: String,
    pub id: String,
    /// Grouping used for cooldown lookups (monitored account, entity id).
    pub scope: String,
    pub claimed_at: DateTime<Utc>,
    /// `false` covers both "inspected and skipped" and "tried and failed";
    /// `note` tells them apart.
    #[serde(default)]
    pub action_taken: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl LedgerEntry {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// What happened after a successful claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub action_taken: bool,
    pub external_ref: Option<String>,
    pub note: Option<String>,
}

impl Outcome {
    pub fn acted(external_ref: impl Into<String>) -> Self {
        Self {
            action_taken: true,
            external_ref: Some(external_ref.into()),
            note: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            action_taken: false,
            external_ref: None,
            note: Some(reason.into()),
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            action_taken: false,
            external_ref: None,
            note: Some(format!("publish failed: {error}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    pub(crate) fn new(db: Arc<Database>, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Atomically insert an entry for `(kind, id)` if none exists.
    ///
    /// The existence check and the insert share one write transaction, so of
    /// any number of concurrent callers exactly one sees `Claimed`.
    pub fn claim(&self, kind: &str, scope: &str, id: &str) -> Result<ClaimOutcome> {
        validate_name(kind)?;
        let key = entry_key(kind, id);
        let entry = LedgerEntry {
            kind: kind.to_string(),
            id: id.to_string(),
            scope: scope.to_string(),
            claimed_at: self.clock.now(),
            action_taken: false,
            external_ref: None,
            resolved_at: None,
            note: None,
        };
        let value = serde_json::to_vec(&entry)?;

        let wt = self.db.begin_write().map_err(store_err)?;
        let outcome = {
            let mut table = wt.open_table(LEDGER).map_err(store_err)?;
            let exists = table.get(key.as_str()).map_err(store_err)?.is_some();
            if exists {
                ClaimOutcome::AlreadyClaimed
            } else {
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(store_err)?;
                ClaimOutcome::Claimed
            }
        };
        if outcome == ClaimOutcome::Claimed {
            wt.commit().map_err(store_err)?;
        } else {
            wt.abort().map_err(store_err)?;
        }
        Ok(outcome)
    }

    /// Fill in the outcome on an entry the caller previously claimed.
    pub fn record_outcome(&self, kind: &str, id: &str, outcome: Outcome) -> Result<LedgerEntry> {
        let key = entry_key(kind, id);
        let wt = self.db.begin_write().map_err(store_err)?;
        let updated = {
            let mut table = wt.open_table(LEDGER).map_err(store_err)?;
            let current = table
                .get(key.as_str())
                .map_err(store_err)?
                .map(|v| v.value().to_vec());
            let Some(current) = current else {
                return Err(WatchpostError::NotClaimed {
                    kind: kind.to_string(),
                    id: id.to_string(),
                });
            };
            let mut entry: LedgerEntry = serde_json::from_slice(&current)?;

            entry.action_taken = outcome.action_taken;
            entry.external_ref = outcome.external_ref;
            entry.note = outcome.note;
            entry.resolved_at = Some(self.clock.now());

            let value = serde_json::to_vec(&entry)?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(store_err)?;
            entry
        };
        wt.commit().map_err(store_err)?;
        Ok(updated)
    }

    /// Most recent `claimed_at` among entries of `kind` in `scope`.
    ///
    /// `None` means no prior action, i.e. no cooldown in effect.
    pub fn last_action_time(&self, kind: &str, scope: &str) -> Result<Option<DateTime<Utc>>> {
        let latest = self
            .scan_kind(kind)?
            .into_iter()
            .filter(|e| e.scope == scope)
            .map(|e| e.claimed_at)
            .max();
        Ok(latest)
    }

    /// Non-mutating existence check used to skip classification cost.
    pub fn is_claimed(&self, kind: &str, id: &str) -> Result<bool> {
        Ok(self.get(kind, id)?.is_some())
    }

    pub fn get(&self, kind: &str, id: &str) -> Result<Option<LedgerEntry>> {
        let key = entry_key(kind, id);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(LEDGER).map_err(store_err)?;
        match table.get(key.as_str()).map_err(store_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// All entries (optionally of one kind), newest claim first.
    pub fn list(&self, kind: Option<&str>) -> Result<Vec<LedgerEntry>> {
        let mut entries = match kind {
            Some(kind) => self.scan_kind(kind)?,
            None => {
                let rt = self.db.begin_read().map_err(store_err)?;
                let table = rt.open_table(LEDGER).map_err(store_err)?;
                let mut out: Vec<LedgerEntry> = Vec::new();
                for row in table.iter().map_err(store_err)? {
                    let (_, v) = row.map_err(store_err)?;
                    out.push(serde_json::from_slice(v.value())?);
                }
                out
            }
        };
        entries.sort_by(|a: &LedgerEntry, b: &LedgerEntry| b.claimed_at.cmp(&a.claimed_at));
        Ok(entries)
    }

    /// Entries that were claimed but never resolved (the process died or a
    /// store write failed in between). They are never retried; this exists
    /// so operators can see them.
    pub fn unresolved(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|e| !e.is_resolved())
            .collect())
    }

    fn scan_kind(&self, kind: &str) -> Result<Vec<LedgerEntry>> {
        let (start, end) = kind_range(kind);
        let rt = self.db.begin_read().map_err(store_err)?;
        let table = rt.open_table(LEDGER).map_err(store_err)?;
        let mut out: Vec<LedgerEntry> = Vec::new();
        for row in table
            .range(start.as_str()..end.as_str())
            .map_err(store_err)?
        {
            let (_, v) = row.map_err(store_err)?;
            out.push(serde_json::from_slice(v.value())?);
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
