use std::sync::Arc;

use marketkeeper_scheduler::Services;

pub mod rest;
mod routes;

pub use routes::build_router;

pub struct AppState {
    pub services: Arc<Services>,
    /// Bearer token required on the cron trigger. `None` leaves it open.
    pub cron_secret: Option<String>,
}
