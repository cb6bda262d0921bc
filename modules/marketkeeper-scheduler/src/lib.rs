pub mod dedup;
pub mod infra;
pub mod orchestrator;
pub mod publisher;
pub mod retry;
pub mod services;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use dedup::{DedupCache, DedupStats};
pub use orchestrator::{PollOrchestrator, PollWindows};
pub use publisher::{EventPublisher, PublishOutcome};
pub use retry::KeyRotator;
pub use services::{Collaborators, Services};
