pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod upstream;
pub mod web;

pub use config::Config;
pub use errors::{AppError, AppResult};
