use args::Args;
use clap::Parser;
use config::ProviderRegistry;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args.log_level);

    let registry = ProviderRegistry::from_env();

    if registry.is_empty() {
        log::warn!(
            "no providers configured; set <PROVIDER>_API_KEY and <PROVIDER>_MODEL_LIST in the environment"
        );
    } else {
        for provider in registry.providers() {
            log::info!(
                "provider {} with {} model(s)",
                provider.name,
                provider.models.len()
            );
        }
    }

    let router = llm::router(registry);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    log::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("shutdown signal received"),
        Err(e) => log::error!("failed to listen for shutdown signal: {e}"),
    }
}
