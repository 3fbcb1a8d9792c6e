use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use novel_rag::chat::ChatService;
use novel_rag::db::Database;
use novel_rag::ollama::OllamaClient;
use novel_rag::qdrant_store::QdrantStore;
use novel_rag::retrieval::Retriever;
use novel_rag::tantivy_store::TantivyStore;
use novel_rag::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();
    let db = Database::new(&config).await?;
    let ollama = OllamaClient::new(config.ollama_base_url.clone());
    let qdrant = QdrantStore::new(
        config.qdrant_base_url.clone(),
        config.qdrant_collection_prefix.clone(),
    );
    let tantivy = TantivyStore::new(config.tantivy_dir());

    let retriever = Retriever::new(
        db.clone(),
        qdrant,
        tantivy,
        ollama.clone(),
        config.models.embedding_model.clone(),
    );

    let generation_limit = Arc::new(Semaphore::new(1));

    let chat = ChatService::new(
        config.clone(),
        db.clone(),
        ollama,
        retriever,
        generation_limit,
    );

    run_server(config, db, chat).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
