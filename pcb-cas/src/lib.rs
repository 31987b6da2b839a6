pub mod config;
pub mod http;
pub mod ingest;
pub mod inspect;
pub mod metrics;
pub mod notify;
pub mod retrieve;
pub mod retry;
