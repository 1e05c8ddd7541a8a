use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use genlux_chat::agent::{GeminiAgentService, GenerationClient, ProxyGenerationClient};
use genlux_chat::cli::{self, Cli, Command};
use genlux_chat::config::Config;
use genlux_chat::db::{ChatRepository, InMemoryChatRepository, PgChatRepository};
use genlux_chat::models::User;
use genlux_chat::routes;
use genlux_chat::service::ConversationStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Logs go to stderr so they don't interleave with chat output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genlux_chat=debug,tower_http=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env();
    match Cli::parse().command {
        Command::Serve => serve(&config).await,
        Command::Chat { user, name } => {
            let store = ConversationStore::new(repository(&config).await?, generator(&config));
            let mut user = User::new(user);
            user.display_name = name;
            cli::run_chat(store, user).await
        }
    }
}

async fn serve(config: &Config) -> anyhow::Result<()> {
    let generator: Arc<dyn GenerationClient> = Arc::new(GeminiAgentService::new(config));
    let app = routes::router(generator);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}

// ── Dependency wiring ─────────────────────────────────────────────────────────

async fn repository(config: &Config) -> anyhow::Result<Arc<dyn ChatRepository>> {
    let Some(database_url) = &config.database_url else {
        info!("DATABASE_URL not set, keeping history in memory");
        return Ok(Arc::new(InMemoryChatRepository::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    info!("Database connection established and migrations applied");
    Ok(Arc::new(PgChatRepository::new(pool)))
}

fn generator(config: &Config) -> Arc<dyn GenerationClient> {
    match &config.proxy_url {
        Some(url) => {
            info!(proxy = %url, "Generating through proxy");
            Arc::new(ProxyGenerationClient::new(url))
        }
        None => Arc::new(GeminiAgentService::new(config)),
    }
}
