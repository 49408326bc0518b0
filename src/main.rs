use std::sync::Arc;

use anyhow::Context as _;
use axum::Router;
use axum::routing::{get, post};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::catch_panic::CatchPanicLayer;

use issuebell::config::Config;
use issuebell::db::postgres::{self, Postgres};
use issuebell::discord::DiscordClient;
use issuebell::github::{self, GithubClient};
use issuebell::handlers::Context;
use issuebell::{logger, poll};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let config = Config::new_from_env()?;
    if config.webhook_secret.is_none() {
        tracing::warn!(
            "GITHUB_WEBHOOK_SECRET is not set, webhook signature verification is disabled"
        );
    }

    let client = postgres::make_client(&config.database_url).await?;
    postgres::run_migrations(&client)
        .await
        .context("failed to run database migrations")?;

    let port = config.port;
    let ctx = Arc::new(Context {
        github: Arc::new(GithubClient::new_from_env()),
        notifier: Arc::new(DiscordClient::new_from_env()),
        store: Arc::new(Postgres::new(client)),
        config,
    });

    let poller = tokio::spawn(poll::run_scheduled_polls(ctx.clone()));

    let app = Router::new()
        .route("/", get(|| async { "IssueBell is listening for new issues." }))
        .route("/webhook/github", post(github::webhook::webhook))
        .layer(CatchPanicLayer::new())
        .layer(ConcurrencyLimitLayer::new(128))
        .with_state(ctx);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!("listening on port {port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install ctrl-c handler");
        })
        .await?;

    // Stop scheduling cycles. Watermarks already committed stand; anything
    // uncommitted is simply retried on next boot.
    poller.abort();
    Ok(())
}
