//! Asynchronous side of watchpost: collaborator interfaces and backends,
//! the feed and entity job bodies, and the scheduler that drives them.

pub mod backends;
pub mod collab;
pub mod error;
pub mod jobs;
pub mod scheduler;
pub mod wiring;

#[cfg(test)]
pub(crate) mod testing;

pub use collab::{Classifier, EntitySource, FeedSource, PublishRequest, Publisher};
pub use error::{CollaboratorError, JobError, SchedulerError};
pub use scheduler::{Job, JobStatus, Scheduler, SchedulerState};
pub use wiring::{build_jobs, build_scheduler, ScheduledJob};
