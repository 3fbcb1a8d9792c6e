pub mod chat;
pub mod chunking;
pub mod config;
pub mod db;
pub mod fusion;
pub mod ingest;
pub mod models;
pub mod ollama;
pub mod qdrant_store;
pub mod retrieval;
pub mod server;
pub mod tantivy_store;
pub mod tokenizer;

pub use config::AppConfig;
pub use server::run_server;
