use config::Config;
use sqlx::PgPool;

pub mod common;
pub mod config;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod utils;

pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
}
