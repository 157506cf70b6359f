use std::sync::Arc;

use crate::application::auth::SessionVerifier;
use crate::application::download_tokens::DownloadTokenService;
use crate::application::generation::GenerationService;
use crate::application::notify::NotificationSubscriber;
use crate::application::rate_limit::LoginThrottle;
use crate::infra::db::PostgresRepositories;
use crate::infra::http::gateway::GatewaySettings;

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionVerifier>,
    pub generation: Arc<GenerationService>,
    pub downloads: Arc<DownloadTokenService>,
    pub login_throttle: Arc<LoginThrottle>,
    pub notifications: Arc<dyn NotificationSubscriber>,
    pub gateway: GatewaySettings,
    pub db: Arc<PostgresRepositories>,
}
