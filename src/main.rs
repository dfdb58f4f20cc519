use std::sync::Arc;

use thingcerts::{
    api::{build_router, start_api_server},
    clients::{HttpThingDirectoryClient, JwtAuthorizationClient},
    observability::{init_logging, init_metrics, log_config_info},
    pki::build_signing_backend,
    services::IssuancePolicy,
    storage::{create_pool, SqlxCertificateRepository},
    AppConfig, CertificateService, Result, APP_NAME, VERSION,
};
use tracing::{error, info};

fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        // Losing the race to another installer is fine; a provider is set either way.
        let _ = ring::default_provider().install_default();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    install_rustls_provider();

    // Load .env file if it exists; must happen before any config is read
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = AppConfig::from_env()?;
    init_logging(&config.observability)?;
    info!(app_name = APP_NAME, version = VERSION, "Starting thing certificate service");
    log_config_info(&config);

    init_metrics(&config.observability)?;

    // Bad CA material aborts startup before anything listens.
    let backend = build_signing_backend(&config.signing).await.map_err(|e| {
        error!(error = %e, "Failed to initialize signing backend");
        e
    })?;

    let pool = create_pool(&config.database).await?;
    let repository = Arc::new(SqlxCertificateRepository::new(pool));
    let auth = Arc::new(JwtAuthorizationClient::new(&config.auth));
    let things = Arc::new(HttpThingDirectoryClient::new(&config.things)?);

    let service = Arc::new(CertificateService::new(
        auth,
        things,
        backend,
        repository,
        IssuancePolicy::from_config(&config),
    ));

    let router = build_router(service, config.server.request_timeout());
    start_api_server(&config.server, router).await
}
