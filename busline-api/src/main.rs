use anyhow::Context;
use busline_api::{app, metrics::Metrics, worker::start_workers, AppState, AuthConfig};
use busline_booking::{
    CoordinatorConfig, LogNotifier, MockPaymentGateway, NotificationDispatcher, PaymentBridge,
    RefundPolicy, RefundTier, ReservationCoordinator, SeatAvailabilityResolver,
    TripEventBroadcaster, TripTracker,
};
use busline_core::notification::Notifier;
use busline_core::payment::PaymentGateway;
use busline_core::{BookingLedger, Clock, ScheduleRepository, SystemClock};
use busline_store::app_config::{Config, PaymentMode};
use busline_store::{
    DbClient, EventProducer, HttpPaymentGateway, KafkaEventSink, KafkaNotifier, PgBookingLedger,
    PgScheduleRepository, RedisClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "busline_api=debug,busline_booking=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Busline API on port {}", config.server.port);

    // ========================================================================
    // Storage
    // ========================================================================

    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;

    let schedules: Arc<dyn ScheduleRepository> = Arc::new(PgScheduleRepository::new(db.pool.clone()));
    let ledger: Arc<dyn BookingLedger> = Arc::new(PgBookingLedger::new(db.pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ========================================================================
    // Messaging (optional)
    // ========================================================================

    let mut broadcaster = TripEventBroadcaster::new();
    let notifier: Arc<dyn Notifier> = match &config.kafka {
        Some(kafka) => {
            let producer = EventProducer::new(&kafka.brokers).context("Failed to create Kafka producer")?;
            broadcaster = broadcaster.with_sink(Arc::new(KafkaEventSink::new(producer.clone())));
            tracing::info!("Mirroring trip events and receipts to Kafka at {}", kafka.brokers);
            Arc::new(KafkaNotifier::new(producer))
        }
        None => {
            tracing::warn!("Kafka not configured, receipts will only be logged");
            Arc::new(LogNotifier)
        }
    };

    // ========================================================================
    // Payment gateway
    // ========================================================================

    let gateway: Arc<dyn PaymentGateway> = match config.payment.mode {
        PaymentMode::Mock => {
            tracing::warn!("Using mock payment gateway");
            Arc::new(MockPaymentGateway::new())
        }
        PaymentMode::Http => Arc::new(
            HttpPaymentGateway::new(
                &config.payment.base_url,
                &config.payment.key_id,
                &config.payment.key_secret,
            )
            .context("Failed to build payment gateway client")?,
        ),
    };
    let bridge = Arc::new(PaymentBridge::new(
        gateway,
        config.payment.key_secret.as_bytes().to_vec(),
    ));

    // ========================================================================
    // Booking engine
    // ========================================================================

    let refund_policy = RefundPolicy::new(
        rules.cancellation_cutoff_hours,
        rules
            .refund_tiers
            .iter()
            .map(|t| RefundTier { min_hours: t.min_hours, percent: t.percent })
            .collect(),
    );
    let coordinator_config = CoordinatorConfig {
        hold_ttl: chrono::Duration::seconds(rules.booking_ttl_seconds as i64),
        refund_policy,
        currency: config.payment.currency.clone(),
    };

    let (notifications, notification_rx) = NotificationDispatcher::new();
    let coordinator = Arc::new(ReservationCoordinator::new(
        schedules.clone(),
        ledger.clone(),
        bridge,
        broadcaster.clone(),
        notifications,
        clock.clone(),
        coordinator_config,
    ));
    let resolver = Arc::new(SeatAvailabilityResolver::new(
        schedules.clone(),
        ledger.clone(),
        clock.clone(),
    ));
    let tracker = Arc::new(TripTracker::new(schedules, ledger, broadcaster.clone(), clock));

    let metrics = Arc::new(Metrics::new().context("Failed to register metrics")?);

    let mut app_state = AppState::new(
        coordinator,
        resolver,
        tracker,
        broadcaster,
        metrics,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    );

    match &config.redis {
        Some(redis) => {
            let client = RedisClient::new(&redis.url)
                .await
                .context("Failed to create Redis client")?;
            app_state = app_state.with_rate_limit(Arc::new(client), rules.rate_limit_per_minute);
        }
        None => tracing::warn!("Redis not configured, rate limiting disabled"),
    }

    let _workers = start_workers(
        &app_state,
        Duration::from_secs(rules.sweep_interval_seconds.max(1)),
        notification_rx,
        notifier,
    );

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
