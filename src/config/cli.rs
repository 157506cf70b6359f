use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Pressroom binary.
#[derive(Debug, Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Pressroom document generation service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PRESSROOM_CONFIG_FILE",
        value_name = "PATH"
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public API, notification gateway, internal print listener and workers.
    Serve(Box<ServeArgs>),
    /// Run only the generation workers and the purge schedule.
    Worker(Box<WorkerArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkerArgs {
    #[command(flatten)]
    pub overrides: WorkerOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ChromeOverrides {
    /// Attach to a running browser's DevTools websocket instead of launching one.
    #[arg(long = "chrome-remote-endpoint", value_name = "WS_URL")]
    pub remote_endpoint: Option<String>,

    /// Override the browser executable used for local launches.
    #[arg(long = "chrome-executable", value_name = "PATH")]
    pub executable: Option<PathBuf>,

    /// Toggle the browser sandbox for local launches.
    #[arg(
        long = "chrome-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub sandbox: Option<bool>,
}

/// Overrides shared by every command that runs generation workers.
#[derive(Debug, Args, Default, Clone)]
pub struct WorkerOverrides {
    #[command(flatten)]
    pub chrome: ChromeOverrides,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the jobs database pool size.
    #[arg(long = "database-jobs-max-connections", value_name = "COUNT")]
    pub database_jobs_max_connections: Option<u32>,

    /// Override the resume PDF worker concurrency.
    #[arg(long = "jobs-resume-pdf-concurrency", value_name = "COUNT")]
    pub jobs_resume_pdf_concurrency: Option<u32>,

    /// Override the resume preview worker concurrency.
    #[arg(long = "jobs-resume-preview-concurrency", value_name = "COUNT")]
    pub jobs_resume_preview_concurrency: Option<u32>,

    /// Override the template preview worker concurrency.
    #[arg(long = "jobs-template-preview-concurrency", value_name = "COUNT")]
    pub jobs_template_preview_concurrency: Option<u32>,

    /// Override the base URL of the print page the browser navigates to.
    #[arg(long = "render-print-base-url", value_name = "URL")]
    pub render_print_base_url: Option<String>,

    /// Override the object storage directory.
    #[arg(long = "storage-directory", value_name = "PATH")]
    pub storage_directory: Option<PathBuf>,

    /// Override the notification backend (postgres|local).
    #[arg(long = "notifications-backend", value_name = "BACKEND")]
    pub notifications_backend: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub worker: WorkerOverrides,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the internal listener host.
    #[arg(long = "server-internal-host", value_name = "HOST")]
    pub server_internal_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the internal listener port.
    #[arg(long = "server-internal-port", value_name = "PORT")]
    pub internal_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the HTTP database pool size.
    #[arg(long = "database-http-max-connections", value_name = "COUNT")]
    pub database_http_max_connections: Option<u32>,

    /// Override the download token lifetime.
    #[arg(long = "downloads-ttl-seconds", value_name = "SECONDS")]
    pub downloads_ttl_seconds: Option<u64>,
}
