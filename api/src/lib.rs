pub mod analytics;
pub mod auth;
pub mod config;
pub mod db;
pub mod directory;
pub mod errors;
pub mod ingest;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod rest;
pub mod store;
pub mod validate;
