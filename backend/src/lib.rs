pub mod config;
pub mod db;
pub mod drift;
pub mod freshness;
pub mod metrics;
pub mod odds;
pub mod report;
pub mod store;

pub mod error;
pub mod logger;
pub mod time;
