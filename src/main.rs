//! VoxBill server
//!
//! Atomic reservation and ledger engine for a multi-tenant voice-agent
//! platform: prepaid call time and provider appointment slots, allocated
//! under concurrency with exactly-once semantics.

mod integrations;

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use voxbill_api::handlers::{
    configure_bookings, configure_health, configure_purchases, configure_sessions,
    configure_wallet,
};
use voxbill_core::traits::{
    BookingStore, IdempotencyStore, LedgerStore, Provisioner, ReservationStore, SagaStore,
};
use voxbill_core::AppConfig;
use voxbill_db::{
    create_pool, PgBookingRepository, PgIdempotencyRepository, PgReservationRepository,
    PgSagaRepository, PgWalletRepository,
};
use voxbill_engine::{
    IdempotencyGuard, KillSwitchMonitor, LedgerService, RefundCoordinator, ReservationManager,
    SessionWatchdog, SlotLockManager, SnapshotCache,
};

use integrations::{AcknowledgingProvisioner, LoggingTerminator};

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_wallet)
            .configure(configure_purchases)
            .configure(configure_sessions)
            .configure(configure_bookings),
    );
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "voxbill={},voxbill_engine={},voxbill_api={},voxbill_db={},actix_web=info,sqlx=warn",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Periodic maintenance: idempotency GC, stranded-purchase recovery,
/// stale-reservation expiry
fn spawn_maintenance(
    guard: Arc<IdempotencyGuard>,
    coordinator: Arc<RefundCoordinator>,
    manager: Arc<ReservationManager>,
    config: &AppConfig,
) {
    let interval = Duration::from_secs(config.billing.sweep_interval_secs);
    let retention_secs = config.billing.idempotency_retention_secs;
    let saga_timeout_secs = config.billing.saga_recovery_timeout_secs;
    let reservation_ttl_secs = config.billing.reservation_ttl_secs;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let cutoff = chrono::Utc::now() - chrono::Duration::seconds(retention_secs);
            match guard.sweep_expired(cutoff).await {
                Ok(swept) if swept > 0 => info!("Swept {} idempotency records", swept),
                Ok(_) => {}
                Err(e) => error!("Idempotency sweep failed: {}", e),
            }

            match coordinator.recover(saga_timeout_secs).await {
                Ok(summary) if summary.refunded > 0 => {
                    info!(
                        "Recovery refunded {} of {} stranded purchases",
                        summary.refunded, summary.examined
                    )
                }
                Ok(_) => {}
                Err(e) => error!("Purchase recovery failed: {}", e),
            }

            match manager.expire_stale(reservation_ttl_secs).await {
                Ok(released) if released > 0 => {
                    info!("Released {} stale reservations", released)
                }
                Ok(_) => {}
                Err(e) => error!("Reservation expiry failed: {}", e),
            }
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting VoxBill v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().expect("Failed to load configuration");

    info!("Connecting to database...");
    let pool = create_pool(&config.database.url, Some(config.database.max_connections))
        .await
        .expect("Failed to create database pool");
    voxbill_db::pool::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    info!("Connecting to Redis...");
    let cache = Arc::new(
        voxbill_cache::RedisCache::new(&config.redis.url)
            .await
            .expect("Failed to connect to Redis"),
    );
    let snapshot_cache: Arc<dyn SnapshotCache> = cache;

    // Stores
    let wallet_repo = Arc::new(PgWalletRepository::new(pool.clone()));
    let ledger_store: Arc<dyn LedgerStore> = wallet_repo;
    let reservation_store: Arc<dyn ReservationStore> =
        Arc::new(PgReservationRepository::new(pool.clone()));
    let booking_store: Arc<dyn BookingStore> = Arc::new(PgBookingRepository::new(pool.clone()));
    let idempotency_store: Arc<dyn IdempotencyStore> =
        Arc::new(PgIdempotencyRepository::new(pool.clone()));
    let saga_store: Arc<dyn SagaStore> = Arc::new(PgSagaRepository::new(pool.clone()));

    // Engine services
    let guard = Arc::new(IdempotencyGuard::new(idempotency_store));
    let ledger = Arc::new(LedgerService::new(
        ledger_store.clone(),
        snapshot_cache.clone(),
        config.billing.overdraft_pence,
    ));
    let manager = Arc::new(ReservationManager::new(
        ledger.clone(),
        reservation_store,
        guard.clone(),
    ));
    let coordinator = Arc::new(RefundCoordinator::new(
        ledger.clone(),
        saga_store,
        guard.clone(),
    ));
    let killswitch = Arc::new(KillSwitchMonitor::new(
        ledger_store,
        snapshot_cache,
        config.billing.balance_cache_ttl_secs,
    ));
    let watchdog = Arc::new(SessionWatchdog::new(
        killswitch.clone(),
        Arc::new(LoggingTerminator),
        Duration::from_secs(voxbill_engine::constants::WATCHDOG_INTERVAL_SECS),
    ));
    let slots = Arc::new(SlotLockManager::new(
        booking_store,
        guard.clone(),
        config.slots.bucket_secs,
        Duration::from_millis(config.slots.lock_wait_ms),
    ));
    let provisioner: Arc<dyn Provisioner> = Arc::new(AcknowledgingProvisioner);

    spawn_maintenance(guard, coordinator.clone(), manager.clone(), &config);

    // CORS configuration
    let cors_origins = std::env::var("CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .allowed_header("X-Tenant-Id")
            .max_age(3600);

        App::new()
            // Engine services
            .app_data(web::Data::from(ledger.clone()))
            .app_data(web::Data::from(manager.clone()))
            .app_data(web::Data::from(coordinator.clone()))
            .app_data(web::Data::from(killswitch.clone()))
            .app_data(web::Data::from(watchdog.clone()))
            .app_data(web::Data::from(slots.clone()))
            .app_data(web::Data::new(provisioner.clone()))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let error_message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_query",
                        "message": error_message
                    })),
                )
                .into()
            }))
            // Middleware
            .wrap(cors)
            .wrap(middleware::Logger::new("%a \"%r\" %s %b %Dms"))
            .wrap(middleware::Compress::default())
            .wrap(middleware::NormalizePath::trim())
            // Configure routes
            .configure(configure_routes)
            // Root redirect to health
            .route(
                "/",
                web::get().to(|| async {
                    HttpResponse::Found()
                        .append_header(("Location", "/api/v1/health"))
                        .finish()
                }),
            )
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await
}
