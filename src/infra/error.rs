use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Phase of database bootstrap that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStage {
    Connect,
    Migrate,
    QueueSetup,
}

impl DatabaseStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DatabaseStage::Connect => "connect",
            DatabaseStage::Migrate => "migrate",
            DatabaseStage::QueueSetup => "queue setup",
        }
    }
}

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to bind listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("object storage root `{}` is unusable", .path.display())]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database {} failed: {message}", .stage.as_str())]
    Database {
        stage: DatabaseStage,
        message: String,
    },
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("job monitor failed: {0}")]
    Worker(String),
}

impl InfraError {
    pub fn database(stage: DatabaseStage, err: impl std::fmt::Display) -> Self {
        Self::Database {
            stage,
            message: err.to_string(),
        }
    }

    /// A setting the running command cannot start without.
    pub fn missing_setting(key: &str) -> Self {
        Self::Configuration(format!("{key} is not configured"))
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
