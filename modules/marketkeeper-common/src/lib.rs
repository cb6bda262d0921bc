pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use config::Config;
pub use error::{MarketKeeperError, Result};
pub use events::{EventEnvelope, LifecycleEvent};
pub use types::*;
