use {
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    sub_sync::{
        AppState,
        adapters::{self, providers::ProviderRegistry},
        domain::{
            queue::JobQueue, receipt::UnverifiedReceiptValidator,
            state_machine::SubscriptionStateMachine,
        },
        infra::{
            config::AppConfig,
            postgres::{PgJobQueue, PgSubscriptionStore},
        },
        services::{
            reconciliation::ReconciliationService,
            worker::{run_reaper, run_worker},
        },
    },
    tokio::{signal, sync::watch},
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(PgJobQueue::new(pool));
    let reconciler = Arc::new(ReconciliationService::new(
        store,
        Arc::new(UnverifiedReceiptValidator),
        SubscriptionStateMachine::new(config.catalog.clone()),
        config.retry,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::with_capacity(config.worker_concurrency + 1);
    for worker_id in 0..config.worker_concurrency {
        tasks.push(tokio::spawn(run_worker(
            worker_id,
            queue.clone(),
            reconciler.clone(),
            shutdown_rx.clone(),
        )));
    }
    tasks.push(tokio::spawn(run_reaper(queue.clone(), shutdown_rx)));

    let state = AppState {
        reconciler,
        providers: Arc::new(ProviderRegistry::new(config.webhook_secrets())),
        queue,
        client_jwt_secret: Arc::new(config.client_jwt_secret),
    };

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, adapters::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("workers stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
