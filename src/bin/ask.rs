use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use novel_rag::chat::ChatService;
use novel_rag::config::AppConfig;
use novel_rag::db::Database;
use novel_rag::models::ChatRequest;
use novel_rag::ollama::OllamaClient;
use novel_rag::qdrant_store::QdrantStore;
use novel_rag::retrieval::Retriever;
use novel_rag::tantivy_store::TantivyStore;

#[derive(Parser, Debug)]
#[command(name = "ask")]
#[command(about = "Answer one question about an ingested novel")]
struct Cli {
    #[arg(long)]
    novel: String,
    #[arg(long)]
    question: String,
    /// Only use chapters up to and including this number.
    #[arg(long)]
    spoiler_threshold: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

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
    let chat = ChatService::new(
        config,
        db,
        ollama,
        retriever,
        Arc::new(Semaphore::new(1)),
    );

    let answer = chat
        .answer(ChatRequest {
            novel: cli.novel,
            question: cli.question,
            spoiler_threshold: cli.spoiler_threshold,
        })
        .await?;

    println!("{}\n", answer.answer_markdown);
    for citation in &answer.citations {
        println!(
            "- chapter {} chunk {} (#{}): {}",
            citation.chapter_number, citation.chunk_number, citation.chunk_id, citation.snippet
        );
    }
    println!("\nlatency: {} ms", answer.latency_ms);

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
