use dilemma_chat::{api::start_server, config::ChatConfig, conversational::ChatService};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ChatConfig::from_env()?;

    info!("Dilemma chat backend");
    info!("Variant: {}", config.variant);
    info!("Model: {}", config.model);
    info!("Port: {}", config.port);
    info!("Chat log: {}", config.log_path.display());

    let service = Arc::new(ChatService::from_config(&config)?);

    start_server(service, config.page_path.clone(), config.port).await?;

    Ok(())
}
