mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod messages;
mod models;
mod service;
mod users;

use anyhow::Context;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use handlers::AppState;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "msgly_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env().context("invalid configuration")?;

    let pool = db::init_db(&config.database_url, config.db_max_connections)
        .await
        .context("failed to initialize database")?;
    tracing::info!("Database initialized successfully");

    let hasher = auth::PasswordHasher::new(config.bcrypt_work_factor, config.hash_concurrency);
    let tokens = auth::TokenIssuer::new(&config.secret_key, config.token_ttl);
    let users = users::UserStore::new(pool.clone(), hasher);
    let state = AppState {
        auth: service::AuthService::new(users.clone(), tokens.clone()),
        users,
        messages: messages::MessageStore::new(pool),
        tokens,
    };

    let app = app(state, config.request_timeout);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn app(state: AppState, request_timeout: Duration) -> Router {
    // Routes behind a bearer token
    let protected = Router::new()
        .route("/users", get(handlers::list_users))
        .route("/users/:username", get(handlers::get_user))
        .route("/users/:username/to", get(handlers::messages_to_user))
        .route("/users/:username/from", get(handlers::messages_from_user))
        .route("/messages", post(handlers::send_message))
        .route("/messages/:id", get(handlers::get_message))
        .route("/messages/:id/read", post(handlers::mark_message_read))
        .route_layer(middleware::from_fn_with_state(
            state.tokens.clone(),
            auth::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/login", post(handlers::login))
        .route("/register", post(handlers::register))
        .merge(protected)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
