//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU8, NonZeroU32},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{ChromeOverrides, CliArgs, Command, ServeArgs, ServeOverrides, WorkerArgs, WorkerOverrides};

use crate::application::jobs::RetryPolicy;
use crate::application::rate_limit::{LockoutPolicy, RateLimits};
use crate::application::render;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const ENV_PREFIX: &str = "PRESSROOM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_INTERNAL_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 8080;
const DEFAULT_INTERNAL_PORT: u16 = 8081;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_HTTP_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_JOBS_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_JOB_RESUME_PDF_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_RESUME_PREVIEW_CONCURRENCY: u32 = 2;
const DEFAULT_JOB_TEMPLATE_PREVIEW_CONCURRENCY: u32 = 1;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 5;
const DEFAULT_RETRY_MAX_DELAY_SECS: u64 = 300;
const DEFAULT_PRINT_BASE_URL: &str = "http://127.0.0.1:3000/print";
const DEFAULT_READY_SELECTOR: &str = "#print-ready";
const DEFAULT_PREVIEW_SELECTOR: &str = "#print-root";
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 20;
const DEFAULT_FONTS_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_CAPTURE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OVERALL_TIMEOUT_SECS: u64 = 90;
const DEFAULT_STORAGE_DIR: &str = "storage";
const DEFAULT_LOGIN_PER_HOUR: u32 = 20;
const DEFAULT_GENERATE_PER_HOUR: u32 = 60;
const DEFAULT_UPLOAD_PER_HOUR: u32 = 100;
const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_COOLDOWN_SECS: u64 = 15 * 60;
const DEFAULT_DOWNLOAD_TTL_SECS: u64 = 60;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub jobs: JobsSettings,
    pub retry: RetrySettings,
    pub render: RenderSettings,
    pub chrome: ChromeSettings,
    pub storage: StorageSettings,
    pub rate_limit: RateLimitSettings,
    pub lockout: LockoutSettings,
    pub downloads: DownloadSettings,
    pub auth: AuthSettings,
    pub notifications: NotificationSettings,
    pub gateway: GatewaySettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    pub internal_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub http_max_connections: NonZeroU32,
    pub jobs_max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub resume_pdf_concurrency: NonZeroU32,
    pub resume_preview_concurrency: NonZeroU32,
    pub template_preview_concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: NonZeroU32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub print_base_url: String,
    pub ready_selector: String,
    pub preview_selector: String,
    pub cleanup_selectors: Vec<String>,
    pub jpeg_quality: NonZeroU8,
    pub navigation_timeout: Duration,
    pub ready_timeout: Duration,
    pub fonts_timeout: Duration,
    pub capture_timeout: Duration,
    pub overall_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChromeSettings {
    pub remote_endpoint: Option<String>,
    pub executable: Option<PathBuf>,
    pub sandbox: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub login_per_hour: NonZeroU32,
    pub generate_per_hour: NonZeroU32,
    pub upload_per_hour: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct LockoutSettings {
    pub threshold: NonZeroU32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub ttl: Duration,
}

/// Secrets stay optional here; each command demands the ones it needs.
#[derive(Clone, Default)]
pub struct AuthSettings {
    pub jwt_secret: Option<String>,
    pub internal_secret: Option<String>,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field(
                "internal_secret",
                &self.internal_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationBackend {
    /// `LISTEN`/`NOTIFY` on the shared database; required when API and workers run apart.
    Postgres,
    /// In-process broadcast channels for single-node deployments.
    Local,
}

impl FromStr for NotificationBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown backend `{other}` (expected postgres|local)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub backend: NotificationBackend,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("render.cleanup_selectors")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Worker(args)) => raw.apply_worker_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    jobs: RawJobsSettings,
    retry: RawRetrySettings,
    render: RawRenderSettings,
    chrome: RawChromeSettings,
    storage: RawStorageSettings,
    rate_limit: RawRateLimitSettings,
    lockout: RawLockoutSettings,
    downloads: RawDownloadSettings,
    auth: RawAuthSettings,
    notifications: RawNotificationSettings,
    gateway: RawGatewaySettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_internal_host.as_ref() {
            self.server.internal_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.internal_port {
            self.server.internal_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(max) = overrides.database_http_max_connections {
            self.database.http_max_connections = Some(max);
        }
        if let Some(ttl) = overrides.downloads_ttl_seconds {
            self.downloads.ttl_seconds = Some(ttl);
        }

        self.apply_worker_overrides(&overrides.worker);
    }

    fn apply_worker_overrides(&mut self, overrides: &WorkerOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_jobs_max_connections {
            self.database.jobs_max_connections = Some(max);
        }
        if let Some(value) = overrides.jobs_resume_pdf_concurrency {
            self.jobs.resume_pdf_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_resume_preview_concurrency {
            self.jobs.resume_preview_concurrency = Some(value);
        }
        if let Some(value) = overrides.jobs_template_preview_concurrency {
            self.jobs.template_preview_concurrency = Some(value);
        }
        if let Some(url) = overrides.render_print_base_url.as_ref() {
            self.render.print_base_url = Some(url.clone());
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(backend) = overrides.notifications_backend.as_ref() {
            self.notifications.backend = Some(backend.clone());
        }

        self.apply_chrome_overrides(&overrides.chrome);
    }

    fn apply_chrome_overrides(&mut self, overrides: &ChromeOverrides) {
        if let Some(endpoint) = overrides.remote_endpoint.as_ref() {
            self.chrome.remote_endpoint = Some(endpoint.clone());
        }
        if let Some(path) = overrides.executable.as_ref() {
            self.chrome.executable = Some(path.clone());
        }
        if let Some(sandbox) = overrides.sandbox {
            self.chrome.sandbox = Some(sandbox);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            jobs,
            retry,
            render,
            chrome,
            storage,
            rate_limit,
            lockout,
            downloads,
            auth,
            notifications,
            gateway,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            jobs: build_jobs_settings(jobs)?,
            retry: build_retry_settings(retry)?,
            render: build_render_settings(render)?,
            chrome: build_chrome_settings(chrome),
            storage: build_storage_settings(storage)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            lockout: build_lockout_settings(lockout)?,
            downloads: build_download_settings(downloads)?,
            auth: build_auth_settings(auth),
            notifications: build_notification_settings(notifications)?,
            gateway: build_gateway_settings(gateway)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let internal_host = server
        .internal_host
        .unwrap_or_else(|| DEFAULT_INTERNAL_HOST.to_string());

    let public_port = server.public_port.unwrap_or(DEFAULT_PUBLIC_PORT);
    if public_port == 0 {
        return Err(LoadError::invalid(
            "server.public_port",
            "port must be greater than zero",
        ));
    }

    let internal_port = server.internal_port.unwrap_or(DEFAULT_INTERNAL_PORT);
    if internal_port == 0 {
        return Err(LoadError::invalid(
            "server.internal_port",
            "port must be greater than zero",
        ));
    }

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let internal_addr = parse_socket_addr(&internal_host, internal_port)
        .map_err(|reason| LoadError::invalid("server.internal_addr", reason))?;
    if public_addr == internal_addr {
        return Err(LoadError::invalid(
            "server.internal_addr",
            "internal listener must not share the public address",
        ));
    }

    let graceful_shutdown = non_zero_secs(
        server
            .graceful_shutdown_seconds
            .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS),
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        public_addr,
        internal_addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);

    let http_value = database
        .http_max_connections
        .unwrap_or(DEFAULT_DB_HTTP_MAX_CONNECTIONS);
    let jobs_value = database
        .jobs_max_connections
        .unwrap_or(DEFAULT_DB_JOBS_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url,
        http_max_connections: non_zero_u32(http_value.into(), "database.http_max_connections")?,
        jobs_max_connections: non_zero_u32(jobs_value.into(), "database.jobs_max_connections")?,
    })
}

fn build_jobs_settings(jobs: RawJobsSettings) -> Result<JobsSettings, LoadError> {
    let resume_pdf = jobs
        .resume_pdf_concurrency
        .unwrap_or(DEFAULT_JOB_RESUME_PDF_CONCURRENCY);
    let resume_preview = jobs
        .resume_preview_concurrency
        .unwrap_or(DEFAULT_JOB_RESUME_PREVIEW_CONCURRENCY);
    let template_preview = jobs
        .template_preview_concurrency
        .unwrap_or(DEFAULT_JOB_TEMPLATE_PREVIEW_CONCURRENCY);

    Ok(JobsSettings {
        resume_pdf_concurrency: non_zero_u32(resume_pdf.into(), "jobs.resume_pdf_concurrency")?,
        resume_preview_concurrency: non_zero_u32(
            resume_preview.into(),
            "jobs.resume_preview_concurrency",
        )?,
        template_preview_concurrency: non_zero_u32(
            template_preview.into(),
            "jobs.template_preview_concurrency",
        )?,
    })
}

fn build_retry_settings(retry: RawRetrySettings) -> Result<RetrySettings, LoadError> {
    let max_attempts = non_zero_u32(
        retry
            .max_attempts
            .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS)
            .into(),
        "retry.max_attempts",
    )?;
    let base_delay = non_zero_secs(
        retry
            .base_delay_seconds
            .unwrap_or(DEFAULT_RETRY_BASE_DELAY_SECS),
        "retry.base_delay_seconds",
    )?;
    let max_delay = non_zero_secs(
        retry
            .max_delay_seconds
            .unwrap_or(DEFAULT_RETRY_MAX_DELAY_SECS),
        "retry.max_delay_seconds",
    )?;
    if max_delay < base_delay {
        return Err(LoadError::invalid(
            "retry.max_delay_seconds",
            "must not be smaller than retry.base_delay_seconds",
        ));
    }

    Ok(RetrySettings {
        max_attempts,
        base_delay,
        max_delay,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let print_base_url = non_blank(render.print_base_url)
        .unwrap_or_else(|| DEFAULT_PRINT_BASE_URL.to_string());
    let parsed = Url::parse(&print_base_url)
        .map_err(|err| LoadError::invalid("render.print_base_url", err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "render.print_base_url",
            "must be an http(s) URL",
        ));
    }

    let ready_selector =
        non_blank(render.ready_selector).unwrap_or_else(|| DEFAULT_READY_SELECTOR.to_string());
    let preview_selector =
        non_blank(render.preview_selector).unwrap_or_else(|| DEFAULT_PREVIEW_SELECTOR.to_string());
    let cleanup_selectors = match render.cleanup_selectors {
        Some(selectors) => selectors
            .into_iter()
            .filter_map(|selector| non_blank(Some(selector)))
            .collect(),
        None => render::RenderSettings::default().cleanup_selectors,
    };

    let quality = render.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
    let jpeg_quality = NonZeroU8::new(quality)
        .filter(|value| value.get() <= 100)
        .ok_or_else(|| LoadError::invalid("render.jpeg_quality", "must be between 1 and 100"))?;

    let overall_timeout = non_zero_secs(
        render
            .overall_timeout_seconds
            .unwrap_or(DEFAULT_OVERALL_TIMEOUT_SECS),
        "render.overall_timeout_seconds",
    )?;

    Ok(RenderSettings {
        print_base_url,
        ready_selector,
        preview_selector,
        cleanup_selectors,
        jpeg_quality,
        navigation_timeout: non_zero_secs(
            render
                .navigation_timeout_seconds
                .unwrap_or(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            "render.navigation_timeout_seconds",
        )?,
        ready_timeout: non_zero_secs(
            render
                .ready_timeout_seconds
                .unwrap_or(DEFAULT_READY_TIMEOUT_SECS),
            "render.ready_timeout_seconds",
        )?,
        fonts_timeout: Duration::from_millis(
            render.fonts_timeout_ms.unwrap_or(DEFAULT_FONTS_TIMEOUT_MS),
        ),
        capture_timeout: non_zero_secs(
            render
                .capture_timeout_seconds
                .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_SECS),
            "render.capture_timeout_seconds",
        )?,
        overall_timeout,
    })
}

fn build_chrome_settings(chrome: RawChromeSettings) -> ChromeSettings {
    ChromeSettings {
        remote_endpoint: non_blank(chrome.remote_endpoint),
        executable: chrome
            .executable
            .filter(|path| !path.as_os_str().is_empty()),
        sandbox: chrome.sandbox.unwrap_or(true),
    }
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let directory = storage
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.directory",
            "path must not be empty",
        ));
    }
    Ok(StorageSettings { directory })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let login = rate_limit
        .login_per_hour
        .unwrap_or(DEFAULT_LOGIN_PER_HOUR);
    let generate = rate_limit
        .generate_per_hour
        .unwrap_or(DEFAULT_GENERATE_PER_HOUR);
    let upload = rate_limit
        .upload_per_hour
        .unwrap_or(DEFAULT_UPLOAD_PER_HOUR);

    Ok(RateLimitSettings {
        login_per_hour: non_zero_u32(login.into(), "rate_limit.login_per_hour")?,
        generate_per_hour: non_zero_u32(generate.into(), "rate_limit.generate_per_hour")?,
        upload_per_hour: non_zero_u32(upload.into(), "rate_limit.upload_per_hour")?,
    })
}

fn build_lockout_settings(lockout: RawLockoutSettings) -> Result<LockoutSettings, LoadError> {
    Ok(LockoutSettings {
        threshold: non_zero_u32(
            lockout
                .threshold
                .unwrap_or(DEFAULT_LOCKOUT_THRESHOLD)
                .into(),
            "lockout.threshold",
        )?,
        cooldown: non_zero_secs(
            lockout
                .cooldown_seconds
                .unwrap_or(DEFAULT_LOCKOUT_COOLDOWN_SECS),
            "lockout.cooldown_seconds",
        )?,
    })
}

fn build_download_settings(downloads: RawDownloadSettings) -> Result<DownloadSettings, LoadError> {
    Ok(DownloadSettings {
        ttl: non_zero_secs(
            downloads.ttl_seconds.unwrap_or(DEFAULT_DOWNLOAD_TTL_SECS),
            "downloads.ttl_seconds",
        )?,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    AuthSettings {
        jwt_secret: non_blank(auth.jwt_secret),
        internal_secret: non_blank(auth.internal_secret),
    }
}

fn build_notification_settings(
    notifications: RawNotificationSettings,
) -> Result<NotificationSettings, LoadError> {
    let backend = match notifications.backend {
        Some(value) => NotificationBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("notifications.backend", reason))?,
        None => NotificationBackend::Postgres,
    };
    Ok(NotificationSettings { backend })
}

fn build_gateway_settings(gateway: RawGatewaySettings) -> Result<GatewaySettings, LoadError> {
    Ok(GatewaySettings {
        handshake_timeout: non_zero_secs(
            gateway
                .handshake_timeout_seconds
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
            "gateway.handshake_timeout_seconds",
        )?,
        ping_interval: non_zero_secs(
            gateway
                .ping_interval_seconds
                .unwrap_or(DEFAULT_PING_INTERVAL_SECS),
            "gateway.ping_interval_seconds",
        )?,
    })
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.get(),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
        }
    }
}

impl From<&RateLimitSettings> for RateLimits {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            login_per_hour: settings.login_per_hour.get(),
            generate_per_hour: settings.generate_per_hour.get(),
            upload_per_hour: settings.upload_per_hour.get(),
        }
    }
}

impl From<&LockoutSettings> for LockoutPolicy {
    fn from(settings: &LockoutSettings) -> Self {
        Self {
            threshold: settings.threshold.get(),
            cooldown: settings.cooldown,
        }
    }
}

impl From<&RenderSettings> for render::RenderSettings {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            ready_selector: settings.ready_selector.clone(),
            preview_selector: settings.preview_selector.clone(),
            cleanup_selectors: settings.cleanup_selectors.clone(),
            jpeg_quality: settings.jpeg_quality.get().into(),
            timeouts: render::RenderTimeouts {
                navigation: settings.navigation_timeout,
                ready_signal: settings.ready_timeout,
                fonts: settings.fonts_timeout,
                capture: settings.capture_timeout,
                overall: settings.overall_timeout,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    internal_host: Option<String>,
    public_port: Option<u16>,
    internal_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    http_max_connections: Option<u32>,
    jobs_max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawJobsSettings {
    resume_pdf_concurrency: Option<u32>,
    resume_preview_concurrency: Option<u32>,
    template_preview_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRetrySettings {
    max_attempts: Option<u32>,
    base_delay_seconds: Option<u64>,
    max_delay_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    print_base_url: Option<String>,
    ready_selector: Option<String>,
    preview_selector: Option<String>,
    cleanup_selectors: Option<Vec<String>>,
    jpeg_quality: Option<u8>,
    navigation_timeout_seconds: Option<u64>,
    ready_timeout_seconds: Option<u64>,
    fonts_timeout_ms: Option<u64>,
    capture_timeout_seconds: Option<u64>,
    overall_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawChromeSettings {
    remote_endpoint: Option<String>,
    executable: Option<PathBuf>,
    sandbox: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    login_per_hour: Option<u32>,
    generate_per_hour: Option<u32>,
    upload_per_hour: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLockoutSettings {
    threshold: Option<u32>,
    cooldown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDownloadSettings {
    ttl_seconds: Option<u64>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    jwt_secret: Option<String>,
    internal_secret: Option<String>,
}

impl std::fmt::Debug for RawAuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawAuthSettings").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNotificationSettings {
    backend: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGatewaySettings {
    handshake_timeout_seconds: Option<u64>,
    ping_interval_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
