use std::{net::SocketAddr, process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use pressroom::{
    application::{
        assembler::PrintDataAssembler,
        auth::SessionVerifier,
        download_tokens::DownloadTokenService,
        error::AppError,
        generation::GenerationService,
        jobs::{
            JobWorkerContext, PurgeContext, RetryPolicy, process_purge_expired_job,
            process_resume_pdf_job, process_resume_preview_job, process_template_preview_job,
            purge_expired_schedule,
        },
        notify::{NotificationPublisher, NotificationSubscriber},
        print_target::PrintTarget,
        rate_limit::{LockoutPolicy, LoginThrottle, RateLimiter, RateLimits},
        render::{RenderOrchestrator, RenderSettings},
        repos::{DocumentsRepo, DownloadTokensRepo, JobsRepo, RateLimitRepo},
        storage::ObjectStore,
    },
    config::{self, NotificationBackend},
    domain::types::JobType,
    infra::{
        chrome::{ChromeEngine, ChromeSettings},
        db::PostgresRepositories,
        error::{DatabaseStage, InfraError},
        http::{self, ApiState, GatewaySettings, InternalState},
        notify::{LocalNotificationBus, PgNotificationBus},
        storage::FilesystemObjectStore,
        telemetry,
    },
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let mut chain = Vec::new();
    let mut source = std::error::Error::source(error);
    while let Some(inner) = source {
        chain.push(inner.to_string());
        source = inner.source();
    }

    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Worker(_) => run_worker(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let jwt_secret = required_secret(&settings.auth.jwt_secret, "auth.jwt_secret")?;
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(
        http_repositories,
        job_repositories.clone(),
        jwt_secret,
        &settings,
    )?;

    let monitor_handle = spawn_job_monitor(
        job_repositories,
        app.job_context,
        app.purge_context,
        &settings,
    )
    .await?;

    let result = serve_http(&settings, app.api_state, app.internal_state).await;

    match monitor_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "job monitor exited with error"),
        Err(err) => warn!(error = %err, "job monitor task panicked"),
    }

    result
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    if settings.notifications.backend == NotificationBackend::Local {
        warn!(
            target = "pressroom::worker",
            "local notifications are not visible to a separate API process"
        );
    }

    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    // Sessions are never verified without a public listener.
    let app = build_application_context(http_repositories, job_repositories.clone(), "", &settings)?;

    info!(target = "pressroom::worker", "Starting generation workers");
    spawn_job_monitor(
        job_repositories,
        app.job_context,
        app.purge_context,
        &settings,
    )
    .await?
    .await
    .map_err(|err| AppError::unexpected(format!("job monitor task failed: {err}")))?
    .map_err(|err| AppError::from(InfraError::Worker(err.to_string())))
}

struct ApplicationContext {
    api_state: ApiState,
    internal_state: InternalState,
    job_context: JobWorkerContext,
    purge_context: PurgeContext,
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| AppError::from(InfraError::missing_setting("database.url")))?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(DatabaseStage::Connect, err)))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(DatabaseStage::Migrate, err)))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(DatabaseStage::Connect, err)))?;

    PostgresStorage::setup(&jobs_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(DatabaseStage::QueueSetup, err)))?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

fn required_secret<'a>(value: &'a Option<String>, key: &str) -> Result<&'a str, AppError> {
    value
        .as_deref()
        .ok_or_else(|| AppError::from(InfraError::missing_setting(key)))
}

fn notification_backend(
    settings: &config::Settings,
    repositories: &PostgresRepositories,
) -> (Arc<dyn NotificationPublisher>, Arc<dyn NotificationSubscriber>) {
    match settings.notifications.backend {
        NotificationBackend::Postgres => {
            let bus = Arc::new(PgNotificationBus::new(repositories.pool().clone()));
            let publisher: Arc<dyn NotificationPublisher> = bus.clone();
            let subscriber: Arc<dyn NotificationSubscriber> = bus;
            (publisher, subscriber)
        }
        NotificationBackend::Local => {
            let bus = Arc::new(LocalNotificationBus::new());
            let publisher: Arc<dyn NotificationPublisher> = bus.clone();
            let subscriber: Arc<dyn NotificationSubscriber> = bus;
            (publisher, subscriber)
        }
    }
}

fn build_application_context(
    http_repositories: Arc<PostgresRepositories>,
    job_repositories: Arc<PostgresRepositories>,
    jwt_secret: &str,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let internal_secret = required_secret(&settings.auth.internal_secret, "auth.internal_secret")?;

    let documents_http: Arc<dyn DocumentsRepo> = http_repositories.clone();
    let jobs_http: Arc<dyn JobsRepo> = http_repositories.clone();
    let tokens_http: Arc<dyn DownloadTokensRepo> = http_repositories.clone();
    let rate_limits_http: Arc<dyn RateLimitRepo> = http_repositories.clone();

    let store: Arc<dyn ObjectStore> = Arc::new(
        FilesystemObjectStore::new(settings.storage.directory.clone())
            .map_err(|source| {
                AppError::from(InfraError::StorageRoot {
                    path: settings.storage.directory.clone(),
                    source,
                })
            })?,
    );
    let assembler = PrintDataAssembler::new(store.clone());
    let print_target = PrintTarget::new(settings.render.print_base_url.clone(), internal_secret);
    let (publisher, subscriber) = notification_backend(settings, &http_repositories);

    let limiter = RateLimiter::new(
        rate_limits_http.clone(),
        RateLimits::from(&settings.rate_limit),
    );
    let login_throttle = Arc::new(LoginThrottle::new(
        rate_limits_http.clone(),
        limiter.clone(),
        LockoutPolicy::from(&settings.lockout),
    ));
    let generation = Arc::new(GenerationService::new(
        documents_http.clone(),
        jobs_http,
        limiter,
    ));
    let downloads = Arc::new(DownloadTokenService::new(
        tokens_http.clone(),
        documents_http.clone(),
        store.clone(),
        settings.downloads.ttl,
    ));

    let api_state = ApiState {
        sessions: Arc::new(SessionVerifier::new(jwt_secret)),
        generation,
        downloads,
        login_throttle,
        notifications: subscriber,
        gateway: GatewaySettings::from(&settings.gateway),
        db: http_repositories.clone(),
    };

    let internal_state = InternalState {
        print_target: print_target.clone(),
        documents: documents_http,
        assembler: assembler.clone(),
        db: http_repositories,
    };

    let engine = Arc::new(ChromeEngine::new(ChromeSettings {
        remote_endpoint: settings.chrome.remote_endpoint.clone(),
        executable: settings.chrome.executable.clone(),
        sandbox: settings.chrome.sandbox,
        ..ChromeSettings::default()
    }));
    let orchestrator = RenderOrchestrator::new(engine, RenderSettings::from(&settings.render));

    let job_context = JobWorkerContext {
        documents: job_repositories.clone(),
        jobs: job_repositories.clone(),
        store,
        assembler,
        orchestrator,
        publisher,
        print_target,
        retry: RetryPolicy::from(&settings.retry),
    };

    let purge_context = PurgeContext {
        tokens: job_repositories.clone(),
        rate_limits: job_repositories,
    };

    Ok(ApplicationContext {
        api_state,
        internal_state,
        job_context,
        purge_context,
    })
}

async fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    purge: PurgeContext,
    settings: &config::Settings,
) -> Result<tokio::task::JoinHandle<std::io::Result<()>>, AppError> {
    let storage_for = |job_type: JobType| {
        PostgresStorage::new_with_config(
            repositories.pool().clone(),
            ApalisSqlConfig::new(job_type.as_str()),
        )
    };

    let jobs = &settings.jobs;
    let resume_pdf_worker = WorkerBuilder::new("resume-pdf-worker")
        .concurrency(jobs.resume_pdf_concurrency.get() as usize)
        .data(context.clone())
        .backend(storage_for(JobType::ResumePdf))
        .build_fn(process_resume_pdf_job);
    let resume_preview_worker = WorkerBuilder::new("resume-preview-worker")
        .concurrency(jobs.resume_preview_concurrency.get() as usize)
        .data(context.clone())
        .backend(storage_for(JobType::ResumePreview))
        .build_fn(process_resume_preview_job);
    let template_preview_worker = WorkerBuilder::new("template-preview-worker")
        .concurrency(jobs.template_preview_concurrency.get() as usize)
        .data(context)
        .backend(storage_for(JobType::TemplatePreview))
        .build_fn(process_template_preview_job);

    let schedule = purge_expired_schedule().map_err(AppError::unexpected)?;
    let purge_worker = WorkerBuilder::new("purge-expired-worker")
        .data(purge)
        .backend(CronStream::new(schedule))
        .build_fn(process_purge_expired_job);

    let monitor = Monitor::new()
        .register(resume_pdf_worker)
        .register(resume_preview_worker)
        .register(template_preview_worker)
        .register(purge_worker)
        .shutdown_timeout(settings.server.graceful_shutdown);

    Ok(tokio::spawn(async move {
        let result = monitor
            .run_with_signal(async {
                tokio::signal::ctrl_c().await?;
                info!("shutdown signal received, draining workers");
                Ok(())
            })
            .await;
        if let Err(err) = &result {
            error!(error = %err, "job monitor stopped");
        }
        result
    }))
}

async fn serve_http(
    settings: &config::Settings,
    api_state: ApiState,
    internal_state: InternalState,
) -> Result<(), AppError> {
    let api_router = http::build_api_router(api_state);
    let internal_router = http::build_internal_router(internal_state);

    let public_listener = bind(settings.server.public_addr).await?;
    let internal_listener = bind(settings.server.internal_addr).await?;

    info!(
        public_addr = %settings.server.public_addr,
        internal_addr = %settings.server.internal_addr,
        "Listening"
    );

    let public_server = axum::serve(
        public_listener,
        api_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    let internal_server = axum::serve(internal_listener, internal_router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    try_join!(public_server, internal_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

async fn bind(addr: SocketAddr) -> Result<tokio::net::TcpListener, AppError> {
    tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::from(InfraError::Bind { addr, source }))
}
