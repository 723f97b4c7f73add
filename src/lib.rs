pub mod config;
pub mod domain {
    pub mod event;
    pub mod intent;
    pub mod payment;
}
pub mod error;
pub mod http {
    pub mod handlers {
        pub mod idem;
        pub mod intents;
        pub mod meta;
        pub mod payments;
        pub mod refunds;
        pub mod webhooks;
    }
}
pub mod ledger;
pub mod rails;
pub mod repo {
    pub mod idempotency_repo;
    pub mod intents_repo;
    pub mod ledger_repo;
    pub mod outbox_repo;
    pub mod payments_repo;
    pub mod refunds_repo;
    pub mod saga_repo;
    pub mod webhook_repo;
}
pub mod risk;
pub mod router;
pub mod saga;
pub mod service {
    pub mod idempotency;
    pub mod outbox_relay;
    pub mod webhook_dispatcher;
}

use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: saga::orchestrator::Orchestrator,
    pub idempotency: service::idempotency::IdempotencyStore,
    pub router: Arc<router::RailRouter>,
    pub webhooks: service::webhook_dispatcher::WebhookDispatcher,
    pub webhook_repo: repo::webhook_repo::WebhookRepo,
}
