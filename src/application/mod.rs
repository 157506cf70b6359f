//! Application services: submission, generation workers and delivery of results.

pub mod assembler;
pub mod auth;
pub mod download_tokens;
pub mod error;
pub mod generation;
pub mod jobs;
pub mod notify;
pub mod print_target;
pub mod rate_limit;
pub mod render;
pub mod repos;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
