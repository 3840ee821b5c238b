pub mod agent;
pub mod cache;
pub mod cli;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use agent::ChatAgent;
use cli::Args;
use history::initialize_conversation_store;
use llm::LlmConfig;
use log::info;
use server::Server;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr());
    info!("CORS Origin: {}", args.cors_origin);
    info!("Conversation Store Type: {}", args.store_type);
    info!("Conversation Store URL: {}", args.store_url);
    info!("Ollama Base URL: {}", args.ollama_base_url);
    info!("Ollama Model: {}", args.ollama_model);
    info!("Cache Host: {}", args.cache_url().as_deref().unwrap_or("disabled"));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let store = initialize_conversation_store(&args)?;
    let chat_client = llm::chat::new_client(&LlmConfig {
        base_url: Some(args.ollama_base_url.clone()),
        completion_model: Some(args.ollama_model.clone()),
    });
    info!(
        "Inference gateway: {} (model {})",
        chat_client.get_base_url().as_deref().unwrap_or("in-process"),
        chat_client.get_model()
    );
    let cache = cache::init(&args).await;
    info!("Cache connected: {}", cache.is_connected());

    let agent = ChatAgent::new(chat_client, store);
    let addr = args.server_addr();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args.clone());
    server.run().await?;

    Ok(())
}
