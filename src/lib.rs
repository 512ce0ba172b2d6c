pub mod config;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod poller;
pub mod prompt;
pub mod providers;
pub mod rate_limit;
pub mod routes;
pub mod storage;
pub mod types;
