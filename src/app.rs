use axum::{Router, routing::get};
use std::{panic, process, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api;
use crate::config::Config;
use crate::error::AppError;
use crate::repos::client_repo::MemoryClientRepo;
use crate::repos::session_repo::MemorySessionRepo;
use crate::services::authz::authn::{AuthnBroker, CookieAuthn};
use crate::services::authz::cookie::CookieCodec;
use crate::services::authz::flow::{AuthorizationFlow, ImplicitAuthz};
use crate::services::authz::id_token::IdTokenSigner;
use crate::services::authz::userinfo::StaticClaims;
use crate::services::provider::capabilities;
use crate::state::AppState;

fn init_tracing() {
    // Prefer RUST_LOG if set; otherwise use a sensible default.
    // Ex:
    // RUST_LOG=info,oidc_authz=debug,tower_http=debug cargo run
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn init_panic_hook(abort_on_panic: bool) {
    // Keep the default hook as a fallback (prints to stderr with location/payload).
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |info| {
        // Always surface panics via tracing so they don't get "lost"
        // (stderr can be hidden depending on how the process is launched.)
        tracing::error!(?info, "panic");

        if abort_on_panic {
            process::abort();
        } else {
            default_hook(info);
        }
    }))
}

pub async fn run() -> Result<(), AppError> {
    init_tracing();
    let config = Config::from_env()?;

    let abort_on_panic = !config.app_env.is_production();
    init_panic_hook(abort_on_panic);

    tracing::info!(
        "starting OP in {:?} mode on {}",
        config.app_env,
        config.addr
    );

    let state = build_state(&config).await?;
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .map_err(|_| AppError::Internal)?;
    axum::serve(listener, app)
        .await
        .map_err(|_| AppError::Internal)?;

    Ok(())
}

async fn build_state(config: &Config) -> Result<AppState, AppError> {
    let cookies = Arc::new(CookieCodec::new(&config.cookie_name, &config.cookie_symkey));

    let signer = Arc::new(
        IdTokenSigner::new(
            &config.id_token_private_key_pem,
            &config.issuer,
            config.id_token_ttl_seconds,
        )
        .map_err(|e| AppError::Configuration(e.to_string()))?,
    );

    let clients = MemoryClientRepo::new();
    for record in &config.clients {
        clients.insert(record.clone()).await;
    }

    let mut broker = AuthnBroker::new();
    broker.add(
        Arc::new(CookieAuthn::new(cookies.clone(), &config.login_url)),
        &config.authn_acr,
        1,
    );

    let mut claims = StaticClaims::new();
    for (uid, value) in &config.users {
        if let serde_json::Value::Object(user_claims) = value {
            claims.insert(uid, user_claims.clone());
        }
    }

    // Startup capability conflicts are fatal, the server must not come up
    // advertising things it cannot do.
    let metadata = capabilities::negotiate(
        &config.issuer,
        &config.base_url,
        &[("authorization", "api/v1/authorization")],
        &broker.acr_values(),
        &config.capabilities,
    )
    .map_err(|e| AppError::Configuration(e.to_string()))?;

    let flow = AuthorizationFlow::new(
        Arc::new(clients),
        Arc::new(MemorySessionRepo::new()),
        Arc::new(broker),
        signer,
        Arc::new(claims),
        cookies.clone(),
        Arc::new(ImplicitAuthz),
        &config.issuer,
    );

    Ok(AppState::new(
        Arc::new(flow),
        cookies,
        Arc::new(metadata),
    ))
}

fn build_router(state: AppState) -> Router {
    async fn health() -> &'static str {
        "ok"
    }

    Router::new()
        .route("/health", get(health))
        .route(
            "/.well-known/openid-configuration",
            get(api::v1::handlers::discovery::discovery),
        )
        .nest("/api/v1", api::v1::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
