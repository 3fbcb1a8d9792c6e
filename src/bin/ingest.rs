use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use novel_rag::chunking::Chunker;
use novel_rag::config::AppConfig;
use novel_rag::db::Database;
use novel_rag::ingest::Ingestor;
use novel_rag::ollama::OllamaClient;
use novel_rag::qdrant_store::QdrantStore;
use novel_rag::tantivy_store::TantivyStore;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Import chapter text files, chunk them, and build the novel's indexes")]
struct Cli {
    /// Novel title; per-novel indexes are named after it.
    #[arg(long)]
    novel: String,
    /// Directory of `*.txt` chapter files.
    #[arg(long)]
    chapters: PathBuf,
    /// Drop existing chunks and rebuild both indexes.
    #[arg(long, default_value_t = false)]
    rebuild: bool,
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
    let chunker = Chunker::from_config(&config.chunking)?;
    let ingestor = Ingestor::new(config, db, ollama, qdrant, tantivy, chunker);

    let report = ingestor
        .prepare_novel(&cli.novel, &cli.chapters, cli.rebuild)
        .await?;

    for (chapter_number, chunks) in &report.chunky_chapters {
        println!("chunky chapter {chapter_number}: {chunks} chunks");
    }
    println!(
        "Ingest complete. novel={} skipped={} new_chapters={} chunks={}",
        report.novel.title, report.skipped, report.chapters_imported, report.chunk_count
    );

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
