//! Scan job tracking: lifecycle, findings, listing and aggregate metrics.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod models;
pub mod query;
pub mod service;
pub mod store;
pub mod views;

pub use error::{Result, ScanError};
