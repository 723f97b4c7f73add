use axum::routing::{get, post};
use axum::Router;
use payments_core::config::AppConfig;
use payments_core::ledger::Ledger;
use payments_core::rails::http::HttpRail;
use payments_core::rails::RailClient;
use payments_core::repo::idempotency_repo::IdempotencyRepo;
use payments_core::repo::intents_repo::IntentsRepo;
use payments_core::repo::ledger_repo::LedgerRepo;
use payments_core::repo::outbox_repo::OutboxRepo;
use payments_core::repo::payments_repo::PaymentsRepo;
use payments_core::repo::refunds_repo::RefundsRepo;
use payments_core::repo::saga_repo::SagaRepo;
use payments_core::repo::webhook_repo::WebhookRepo;
use payments_core::risk::RuleBasedRisk;
use payments_core::router::{RailConfig, RailRouter, RouterConfig};
use payments_core::saga::backoff::BackoffPolicy;
use payments_core::saga::orchestrator::Orchestrator;
use payments_core::service::idempotency::IdempotencyStore;
use payments_core::service::outbox_relay::OutboxRelay;
use payments_core::service::webhook_dispatcher::WebhookDispatcher;
use payments_core::AppState;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let redis_client = redis::Client::open(cfg.redis_url.clone())?;

    let intents_repo = IntentsRepo { pool: pool.clone() };
    let payments_repo = PaymentsRepo { pool: pool.clone() };
    let refunds_repo = RefundsRepo { pool: pool.clone() };
    let ledger_repo = LedgerRepo { pool: pool.clone() };
    let outbox_repo = OutboxRepo { pool: pool.clone() };
    let idempotency_repo = IdempotencyRepo { pool: pool.clone() };
    let saga_repo = SagaRepo { pool: pool.clone() };
    let webhook_repo = WebhookRepo { pool: pool.clone() };

    let ledger = Ledger {
        pool: pool.clone(),
        ledger_repo,
        platform_fee_bps: cfg.platform_fee_bps,
    };
    let idempotency = IdempotencyStore::new(idempotency_repo, cfg.idempotency_ttl_hours);

    let rail_configs: Vec<RailConfig> = cfg
        .rails
        .iter()
        .map(|r| RailConfig {
            id: r.id.clone(),
            priority: r.priority,
            weight: r.weight,
        })
        .collect();
    let router_state = Arc::new(RailRouter::new(rail_configs, RouterConfig::default()));

    let mut rail_clients: HashMap<String, Arc<dyn RailClient>> = HashMap::new();
    for r in &cfg.rails {
        rail_clients.insert(
            r.id.clone(),
            Arc::new(HttpRail {
                id: r.id.clone(),
                base_url: r.base_url.clone(),
                api_key: r.api_key.clone(),
                timeout_ms: cfg.rail_timeout_ms,
                client: reqwest::Client::new(),
            }),
        );
    }

    let webhooks = WebhookDispatcher {
        webhook_repo: webhook_repo.clone(),
        http: reqwest::Client::new(),
        max_attempts: cfg.webhook_max_attempts,
        timeout_ms: cfg.webhook_timeout_ms,
    };

    let orchestrator = Orchestrator {
        pool: pool.clone(),
        intents_repo,
        payments_repo,
        refunds_repo,
        saga_repo,
        ledger,
        idempotency: idempotency.clone(),
        router: router_state.clone(),
        rails: Arc::new(rail_clients),
        risk: Arc::new(RuleBasedRisk::default()),
        webhooks: webhooks.clone(),
        backoff: BackoffPolicy {
            base_ms: cfg.retry_base_ms,
            factor: cfg.retry_factor,
            cap_ms: cfg.retry_cap_ms,
        },
        rail_timeout_ms: cfg.rail_timeout_ms,
        rail_max_attempts: cfg.rail_max_attempts,
    };

    let relay = OutboxRelay {
        outbox_repo,
        redis_client,
        stream_key: cfg.stream_key.clone(),
    };
    tokio::spawn(relay.run());
    tokio::spawn(webhooks.clone().run());
    tokio::spawn(idempotency.clone().run_cleanup());

    let sweep_router = router_state.clone();
    tokio::spawn(async move {
        loop {
            sweep_router.sweep();
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });

    let state = AppState {
        orchestrator,
        idempotency,
        router: router_state,
        webhooks,
        webhook_repo,
    };

    use payments_core::http::handlers;
    let app = Router::new()
        .route("/health", get(handlers::payments::health))
        .route("/v1/intents", post(handlers::intents::create_intent))
        .route("/v1/intents/:id", get(handlers::intents::get_intent))
        .route("/v1/intents/:id/cancel", post(handlers::intents::cancel_intent))
        .route("/v1/payments", post(handlers::payments::create_payment))
        .route("/v1/payments/:id", get(handlers::payments::get_payment))
        .route("/v1/refunds", post(handlers::refunds::create_refund))
        .route("/v1/refunds/:id", get(handlers::refunds::get_refund))
        .route("/v1/webhook-endpoints", post(handlers::webhooks::register_endpoint))
        .route(
            "/v1/webhook-endpoints/:id/replay",
            post(handlers::webhooks::replay_endpoint),
        )
        .route(
            "/v1/webhook-events/:id/replay",
            post(handlers::webhooks::replay_event),
        )
        .route("/meta/rails/health", get(handlers::meta::rail_health))
        .route("/meta/ledger/integrity", get(handlers::meta::ledger_integrity))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    tracing::info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
