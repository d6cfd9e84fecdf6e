mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use deck_search_core::llm::DEFAULT_OPENAI_BASE_URL;
use deck_search_core::{
    CharacterNgramEmbedder, ChatService, DeckRepository, EmbeddingBackfill, EmbeddingGenerator,
    HybridSearch, IngestionOptions, Ingestor, LayeredExtractor, OcrEndpointConfig,
    OpenAiChatModel, OpenAiClient, OpenAiConfig, OpenAiDeckLabeler, OpenAiEmbedder,
    SqliteDeckStore, UnitMatch, DEFAULT_EMBEDDING_DIMENSIONS, OPENAI_EMBEDDING_DIMENSIONS,
};
use server::{AppState, DEFAULT_SEARCH_LIMIT};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "deck-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// SQLite database file.
    #[arg(long, env = "DECK_SEARCH_DATABASE", default_value = "deck-search.db")]
    database: PathBuf,

    /// Embedding backend. Must match the one used at ingestion time.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Openai)]
    embedder: EmbedderKind,

    /// Embedding dimensions (defaults to the backend's native size).
    #[arg(long)]
    embedding_dimensions: Option<usize>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    #[arg(long, env = "OPENAI_CHAT_MODEL", default_value = "gpt-4o-mini")]
    openai_chat_model: String,

    #[arg(long, env = "OPENAI_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    openai_embedding_model: String,

    /// Multimodal OCR endpoint used when local PDF parsing fails.
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// OpenAI-compatible `/embeddings` endpoint.
    Openai,
    /// Offline hashed character trigrams.
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the search, chat and deck HTTP API.
    Serve {
        #[arg(long, env = "DECK_SEARCH_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Ingest one PDF or every PDF under a folder.
    Ingest {
        /// A single PDF file.
        #[arg(long, conflicts_with = "folder", required_unless_present = "folder")]
        file: Option<PathBuf>,
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: Option<PathBuf>,
        #[arg(long, default_value = "100")]
        max_pages: usize,
        #[arg(long, default_value = "25")]
        max_document_mb: usize,
    },
    /// Hybrid keyword and semantic search over topics and slides.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Ask a question answered from ingested decks.
    Chat {
        #[arg(long)]
        message: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a stored deck with its topics and slides as JSON.
    Show {
        #[arg(long)]
        deck_id: String,
    },
    /// Embed units that were stored without an embedding.
    Backfill {
        #[arg(long, default_value = "100")]
        batch: usize,
    },
}

impl Cli {
    fn openai_config(&self) -> anyhow::Result<OpenAiConfig> {
        let api_key = self
            .openai_api_key
            .clone()
            .context("OPENAI_API_KEY is required for this command")?;
        let mut config = OpenAiConfig::new(api_key);
        config.base_url = self.openai_base_url.clone();
        config.chat_model = self.openai_chat_model.clone();
        config.embedding_model = self.openai_embedding_model.clone();
        Ok(config)
    }

    fn embedder(&self) -> anyhow::Result<Arc<dyn EmbeddingGenerator>> {
        Ok(match self.embedder {
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
                dimensions: self
                    .embedding_dimensions
                    .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
            }),
            EmbedderKind::Openai => Arc::new(OpenAiEmbedder::new(
                &self.openai_config()?,
                self.embedding_dimensions
                    .unwrap_or(OPENAI_EMBEDDING_DIMENSIONS),
            )?),
        })
    }

    fn openai_client(&self) -> anyhow::Result<OpenAiClient> {
        Ok(OpenAiClient::new(&self.openai_config()?)?)
    }

    fn ocr(&self) -> Option<OcrEndpointConfig> {
        self.ocr_endpoint.clone().map(|endpoint| OcrEndpointConfig {
            endpoint,
            api_key: self.ocr_api_key.clone(),
        })
    }

    fn chat_service(&self, search: Arc<HybridSearch>) -> anyhow::Result<ChatService> {
        let model = OpenAiChatModel::new(self.openai_client()?);
        Ok(ChatService::new(search, Arc::new(model)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        database = %cli.database.display(),
        "deck-search boot"
    );

    let store = Arc::new(
        SqliteDeckStore::open(&cli.database)
            .await
            .with_context(|| format!("opening database {}", cli.database.display()))?,
    );

    match &cli.command {
        Command::Serve { bind } => {
            let search = Arc::new(HybridSearch::new(store.clone(), cli.embedder()?));
            let chat = Arc::new(cli.chat_service(search.clone())?);
            let app = server::router(Arc::new(AppState {
                search,
                chat,
                decks: store,
            }));

            let listener = tokio::net::TcpListener::bind(bind)
                .await
                .with_context(|| format!("binding {bind}"))?;
            info!(address = %bind, "listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Command::Ingest {
            file,
            folder,
            max_pages,
            max_document_mb,
        } => {
            let ingestor = Ingestor::new(
                Arc::new(LayeredExtractor::new(cli.ocr())),
                Arc::new(OpenAiDeckLabeler::new(cli.openai_client()?)),
                cli.embedder()?,
                store,
                IngestionOptions {
                    max_pages: *max_pages,
                    max_document_bytes: max_document_mb.saturating_mul(1024 * 1024),
                    ..IngestionOptions::default()
                },
            );

            if let Some(file) = file {
                let deck = ingestor.ingest_file(file).await?;
                println!("{}\t{}", deck.id, deck.title);
            } else if let Some(folder) = folder {
                let report = ingestor.ingest_folder(folder).await?;
                for deck in &report.decks {
                    println!("{}\t{}", deck.id, deck.title);
                }
                for skipped in &report.skipped_files {
                    warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                }
                println!(
                    "{} decks ingested, {} skipped at {}",
                    report.decks.len(),
                    report.skipped_files.len(),
                    Utc::now().to_rfc3339()
                );
            }
        }
        Command::Search { query, limit } => {
            let search = HybridSearch::new(store, cli.embedder()?);
            let results = search.search(query, *limit).await?;

            if results.lexical_only {
                warn!("query embedding unavailable, showing keyword matches only");
            }
            println!("query: {}", results.query);
            for result in results.results {
                let location = match &result.unit {
                    UnitMatch::Topic {
                        topic_title,
                        slide_numbers,
                        ..
                    } => format!("topic \"{topic_title}\" slides {slide_numbers:?}"),
                    UnitMatch::Slide { slide_number, .. } => format!("slide {slide_number}"),
                };
                println!(
                    "score={:.4} lexical={:.4} semantic={} deck=\"{}\" {}",
                    result.score,
                    result.lexical_score,
                    result
                        .semantic_score
                        .map(|score| format!("{score:.4}"))
                        .unwrap_or_else(|| "-".to_string()),
                    result.deck_title,
                    location
                );
                println!("  {}", result.summary);
            }
        }
        Command::Chat { message, limit } => {
            let search = Arc::new(HybridSearch::new(store, cli.embedder()?));
            let answer = cli.chat_service(search)?.answer(message, *limit).await?;

            println!("{}", answer.answer);
            for reference in answer.references {
                println!("- {}", serde_json::to_string(&reference)?);
            }
        }
        Command::Show { deck_id } => {
            let record = store
                .deck(deck_id)
                .await?
                .with_context(|| format!("deck {deck_id} not found"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Backfill { batch } => {
            let report = EmbeddingBackfill::new(store, cli.embedder()?)
                .run_once(*batch)
                .await?;
            println!(
                "attempted={} embedded={} still_pending={} superseded={}",
                report.attempted, report.embedded, report.still_pending, report.superseded
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}
