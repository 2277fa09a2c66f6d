//! HTTP request handlers organized by concern

pub mod channels;
pub mod discovery;
pub mod health;
