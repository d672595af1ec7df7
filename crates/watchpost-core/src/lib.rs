pub mod clock;
pub mod config;
pub mod diff;
pub mod error;
pub mod gate;
pub mod io;
pub mod paths;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use diff::{diff, DeltaEvent, FieldWeights, SignificancePolicy};
pub use error::{Result, WatchpostError};
pub use gate::{decide_deltas, ConfidenceGate, Cooldown, Decision, SignificanceFloor, SkipReason};
pub use store::{ClaimOutcome, Ledger, LedgerEntry, Outcome, SnapshotRecord, SnapshotStore, Store};
pub use types::{Classification, Entity, EntityState, FieldValue, SourceEvent};
