use actix_web::{App, HttpServer, web};
use paytrack_reconcile::api;
use paytrack_reconcile::capability::{HostFocusSignal, NoopLauncher};
use paytrack_reconcile::config::Settings;
use paytrack_reconcile::context::ReconcileContext;
use paytrack_reconcile::persistence::redb_store::RedbStore;
use paytrack_reconcile::persistence::store::AppDataStore;
use paytrack_reconcile::reconciler::{RecoveryRoute, Reconciler};
use paytrack_reconcile::session::ReconcileEvent;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("PayTrack reconciliation service starting");

    let settings = Settings::new().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let kv = RedbStore::new(&settings.storage.db_path).map_err(|e| {
        error!(path = %settings.storage.db_path, "Failed to open database: {}", e);
        e
    })?;
    info!(path = %settings.storage.db_path, "Database opened");

    let data = AppDataStore::new(Arc::new(kv), settings.storage.key_prefix.clone());
    let reconciler = Arc::new(Reconciler::new(
        ReconcileContext::new_system(),
        data,
        settings.reconcile.clone(),
        Arc::new(NoopLauncher::default()),
        Arc::new(HostFocusSignal),
    ));

    // --- Event log task ---
    let mut events = reconciler.subscribe();
    let events_handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ReconcileEvent::PromptRequested { prompt }) => {
                    info!(intent_id = %prompt.intent_id, message = %prompt.message, "Prompt requested")
                }
                Ok(ReconcileEvent::RecoveryRequired { intents }) => {
                    warn!(count = intents.len(), "Recovery required")
                }
                Ok(ReconcileEvent::LockRequired { away_secs }) => {
                    warn!(away_secs, "App lock required")
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Event log lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    match reconciler.check_recovery_on_startup() {
        RecoveryRoute::Normal => info!("No unresolved payments"),
        RecoveryRoute::Recovery { intents } => {
            info!(count = intents.len(), "Starting in recovery mode")
        }
    }

    // --- API Server Task ---
    let bind_address = format!("0.0.0.0:{}", settings.api.port);
    info!("Starting API server on {}", bind_address);

    let state_for_api = reconciler.clone();
    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header();

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state_for_api.clone()))
            .configure(api::config)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    events_handle.abort();
    Ok(())
}
