pub mod channels;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod outbox;
pub mod routes;
pub mod state;
pub mod templates;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::models::Pipeline;
use crate::outbox::postgres::{PgEmailOutbox, PgNotificationOutbox, PgTemplates};
use crate::outbox::{Processor, QueueRegistry, RetryPolicy, TemplateStore};
use crate::state::{AppState, SharedState};

/// Postgres-backed processors for every pipeline, with channels taken from config.
pub fn build_queues(pool: &PgPool, config: &Config) -> Result<QueueRegistry, String> {
    let policy = RetryPolicy::from_config(&config.queue);

    let email = Processor::new(
        Pipeline::Email,
        Arc::new(PgEmailOutbox::new(pool.clone())),
        channels::email_chain(config)?,
        policy.clone(),
    );
    let sms = Processor::new(
        Pipeline::Sms,
        Arc::new(PgNotificationOutbox::new(pool.clone(), Pipeline::Sms)?),
        channels::sms_chain(config)?,
        policy.clone(),
    );
    let telegram = Processor::new(
        Pipeline::Telegram,
        Arc::new(PgNotificationOutbox::new(pool.clone(), Pipeline::Telegram)?),
        channels::telegram_chain(config)?,
        policy,
    );

    for processor in [&email, &sms, &telegram] {
        tracing::info!(
            "{} channels: {}",
            processor.pipeline().title(),
            processor.chain().ids().join(" -> ")
        );
    }

    Ok(QueueRegistry::new(email, sms, telegram))
}

pub fn postgres_templates(pool: &PgPool) -> Arc<dyn TemplateStore> {
    Arc::new(PgTemplates::new(pool.clone()))
}

pub fn build_app(
    config: Config,
    queues: QueueRegistry,
    templates: Arc<dyn TemplateStore>,
) -> Router {
    let max_body_size = config.max_body_size;

    let state: SharedState = Arc::new(AppState {
        config,
        queues,
        templates,
    });

    Router::new()
        .merge(routes::api_routes())
        .route("/health", axum::routing::get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(max_body_size))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("x-content-type-options"),
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("cache-control"),
                    HeaderValue::from_static("no-store"),
                )),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
