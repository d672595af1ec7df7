//! Concrete collaborator variants, selected from config at startup.

pub mod fixture;
pub mod http;
pub mod jsonl;
pub mod keyword;

pub use fixture::{DirectoryEntitySource, FileFeedSource};
pub use http::{HttpClassifier, WebhookPublisher};
pub use jsonl::JsonlPublisher;
pub use keyword::KeywordClassifier;
