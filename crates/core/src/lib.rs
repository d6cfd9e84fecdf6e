pub mod backfill;
pub mod chat;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod labeler;
pub mod lexical;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod retry;
pub mod search;
pub mod single_flight;
pub mod store;
pub mod stores;
pub mod traits;

pub use backfill::{BackfillReport, EmbeddingBackfill};
pub use chat::{ChatConfig, ChatService, GroundingContext, NO_RESULTS_ANSWER};
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, EmbeddingGenerator, OpenAiEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS, OPENAI_EMBEDDING_DIMENSIONS,
};
pub use error::{
    ChatError, EmbeddingError, GenerationError, IngestError, LabelingError, SearchError,
    StoreError,
};
pub use extractor::{
    Extraction, ExtractionMethod, LayeredExtractor, LopdfExtractor, OcrEndpointConfig, PageText,
    PdfExtractor,
};
pub use ingest::{deck_id_for_source, discover_pdf_files, FolderIngestReport, Ingestor, SkippedPdf};
pub use labeler::{DeckLabeler, DeckLabels, OpenAiDeckLabeler};
pub use llm::{LanguageModel, OpenAiChatModel, OpenAiClient, OpenAiConfig, Prompt};
pub use models::{
    ChatAnswer, ChatReference, Deck, DeckRecord, IngestionOptions, SearchResult, SearchResults,
    Slide, Topic, UnitKind, UnitMatch,
};
pub use retry::RetryPolicy;
pub use search::{HybridSearch, SearchConfig, MAX_SEARCH_LIMIT};
pub use stores::{MemoryDeckStore, SqliteDeckStore};
pub use traits::{DeckRepository, UnitIndex};
