pub mod adapters;
pub mod domain;
pub mod infra;
pub mod services;

use {
    adapters::providers::ProviderRegistry,
    domain::queue::JobQueue,
    secrecy::SecretString,
    services::reconciliation::ReconciliationService,
    std::sync::Arc,
};

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<ReconciliationService>,
    pub providers: Arc<ProviderRegistry>,
    pub queue: Arc<dyn JobQueue>,
    pub client_jwt_secret: Arc<SecretString>,
}
