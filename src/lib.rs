pub mod api;
pub mod auth;
pub mod config;
pub mod hierarchy;
pub mod index;
pub mod ingest;
pub mod metrics;
pub mod reports;
pub mod scope;
