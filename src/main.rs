use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tracing::info;

use triage_pipeline::config::{ServiceConfig, ServiceKind};
use triage_pipeline::delivery::{DeliveryAdapter, DeliveryMode};
use triage_pipeline::hub::BroadcastHub;
use triage_pipeline::llm::{LlmProvider, create_provider};
use triage_pipeline::pipeline::{
    ClassificationStage, EnrichmentStage, ExtractionStage, ScreeningStage, Stage,
};
use triage_pipeline::server::{RelayFormat, intake_routes, observer_routes, stage_routes};
use triage_pipeline::store::LibSqlDirectory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServiceConfig::from_env().context("Invalid configuration")?;

    eprintln!("📨 Triage Pipeline v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Service: {}", config.service.as_str());
    eprintln!("   Listening: http://0.0.0.0:{}", config.port);
    match &config.delivery {
        DeliveryMode::Reply => eprintln!("   Delivery: reply"),
        DeliveryMode::Push { sink } => eprintln!("   Delivery: push -> {sink}"),
    }

    let app = build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!(service = config.service.as_str(), port = config.port, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

/// Build the router for the configured service, with its dependencies.
async fn build_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let delivery = || -> anyhow::Result<Arc<DeliveryAdapter>> {
        Ok(Arc::new(DeliveryAdapter::new(
            config.delivery.clone(),
            config.delivery_timeout,
        )?))
    };
    let oracle = || -> anyhow::Result<Arc<dyn LlmProvider>> {
        let llm_config = config
            .llm
            .as_ref()
            .context("LLM configuration missing for an oracle-backed service")?;
        Ok(create_provider(llm_config)?)
    };

    let app = match config.service {
        ServiceKind::Intake => {
            let sink = config.sink.clone().context("K_SINK is required for intake")?;
            let adapter = DeliveryAdapter::new(
                DeliveryMode::Push { sink: sink.clone() },
                config.delivery_timeout,
            )?;
            intake_routes(sink, Arc::new(adapter))
        }
        ServiceKind::Screener => {
            let stage: Arc<dyn Stage> =
                Arc::new(ScreeningStage::new(oracle()?, config.harm_categories.clone()));
            eprintln!("   Harm categories: {}", config.harm_categories.join(", "));
            stage_routes(stage, delivery()?)
        }
        ServiceKind::Extractor => stage_routes(Arc::new(ExtractionStage::new(oracle()?)), delivery()?),
        ServiceKind::Classifier => {
            stage_routes(Arc::new(ClassificationStage::new(oracle()?)), delivery()?)
        }
        ServiceKind::Enricher => {
            let directory = LibSqlDirectory::new_local(&config.db_path)
                .await
                .with_context(|| {
                    format!("Failed to open customer database at {}", config.db_path.display())
                })?;
            eprintln!("   Database: {}", config.db_path.display());
            stage_routes(
                Arc::new(EnrichmentStage::new(Arc::new(directory))),
                delivery()?,
            )
        }
        ServiceKind::Observer | ServiceKind::FinanceInbox => {
            let hub = BroadcastHub::new(config.history_capacity, config.subscriber_queue);
            let format = if config.service == ServiceKind::Observer {
                RelayFormat::Observer
            } else {
                RelayFormat::FinanceInbox
            };
            observer_routes(hub, format)
        }
    };

    Ok(app)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
