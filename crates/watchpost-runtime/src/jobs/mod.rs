pub mod entity;
pub mod feed;

pub use entity::{EntityJob, EntityRunReport, EntityTiming};
pub use feed::{FeedJob, FeedRunReport};
