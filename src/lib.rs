pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod import;
pub mod routes;

use std::sync::Arc;

use audit::AuditRecorder;
use config::Config;
use db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<Config>,
    pub audit: AuditRecorder,
}
