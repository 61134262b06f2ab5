//! Magistrate entry point.
//!
//! Wires the database, rule catalog, punishment policy, scoring engine,
//! classifier, admin API, and Discord gateway together.

use std::net::SocketAddr;
use std::sync::Arc;

use serenity::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magistrate::catalog::RuleCatalog;
use magistrate::classifier::GeminiClassifier;
use magistrate::config::MagistrateConfig;
use magistrate::connector::GatewayHandler;
use magistrate::context::ContextTracker;
use magistrate::database::Database;
use magistrate::error::{MagistrateError, Result};
use magistrate::executor::{DiscordExecutor, PunishmentExecutor};
use magistrate::pipeline::ModerationPipeline;
use magistrate::policy::PunishmentPolicy;
use magistrate::prompt::PromptStore;
use magistrate::scoring::ScoringEngine;
use magistrate::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        built_at = option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        "Magistrate starting"
    );

    let config = MagistrateConfig::from_env()?;

    let db = Arc::new(Database::new(&config.database_path).await?);
    tracing::info!(path = %config.database_path, "Database initialized");

    let catalog = Arc::new(RuleCatalog::new(db.clone()));
    let policy = Arc::new(PunishmentPolicy::new(db.clone()));
    let prompts = Arc::new(PromptStore::new(db.clone()));
    let engine = Arc::new(ScoringEngine::new(
        db.clone(),
        catalog.clone(),
        policy.clone(),
    ));

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let executor: Arc<dyn PunishmentExecutor> =
        Arc::new(DiscordExecutor::new(http, config.guild_id));

    let classifier = match &config.gemini_api_key {
        Some(key) => {
            tracing::info!(rpm = config.classifier_rpm, "Classifier initialized");
            Some(Arc::new(
                GeminiClassifier::with_rate_limit(key.clone(), config.classifier_rpm)
                    .with_retry(config.classifier_max_attempts, config.classifier_backoff_ms),
            ))
        }
        None => {
            tracing::warn!("GEMINI_API_KEY not set; message classification disabled");
            None
        }
    };

    let pipeline = Arc::new(
        ModerationPipeline::new(
            catalog.clone(),
            prompts.clone(),
            classifier,
            engine.clone(),
            executor.clone(),
        )
        .with_context_tracker(Arc::new(ContextTracker::with_depth(config.context_depth))),
    );

    // Admin API
    let router = web::build_router(AppState {
        db: db.clone(),
        catalog,
        policy,
        prompts,
        engine,
        executor,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.web_port));
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(error = %e, addr = %addr, "Failed to bind admin API");
                return;
            }
        };
        tracing::info!(addr = %addr, "Admin API listening");
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Admin API server failed");
        }
    });

    // Discord gateway
    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(GatewayHandler::new(pipeline))
        .await
        .map_err(|e| MagistrateError::DiscordApi(Box::new(e)))?;

    tracing::info!("Starting Discord client...");

    client
        .start()
        .await
        .map_err(|e| MagistrateError::DiscordApi(Box::new(e)))?;

    Ok(())
}
