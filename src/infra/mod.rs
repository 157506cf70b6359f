//! Infrastructure adapters and runtime bootstrap.

pub mod chrome;
pub mod db;
pub mod error;
pub mod http;
pub mod notify;
pub mod storage;
pub mod telemetry;
