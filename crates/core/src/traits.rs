use crate::models::{Deck, DeckRecord};
use crate::store::{PendingEmbedding, SearchUnit, VectorMatch};
use crate::StoreError;
use async_trait::async_trait;

/// Write side and deck lookups.
#[async_trait]
pub trait DeckRepository: Send + Sync {
    /// Upserts the deck and replaces all of its topics and slides in one transaction.
    /// An existing deck keeps its original `created_at`.
    async fn replace_deck(&self, record: &DeckRecord) -> Result<(), StoreError>;

    /// Deck with topics in creation order and slides in slide-number order.
    async fn deck(&self, deck_id: &str) -> Result<Option<DeckRecord>, StoreError>;

    async fn deck_by_source(&self, source_ref: &str) -> Result<Option<Deck>, StoreError>;

    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>, StoreError>;

    /// Stores the embedding computed for `unit.text` and clears the pending marker.
    /// Returns false without writing when the unit no longer exists, is no longer
    /// pending, or its text changed since it was listed.
    async fn store_embedding(
        &self,
        unit: &PendingEmbedding,
        embedding: &[f32],
    ) -> Result<bool, StoreError>;
}

/// Read side used by hybrid search.
#[async_trait]
pub trait UnitIndex: Send + Sync {
    /// Units with any lexical field containing any of `terms` (case-insensitive).
    async fn lexical_candidates(&self, terms: &[String]) -> Result<Vec<SearchUnit>, StoreError>;

    /// Every topic and slide, for questions about decks as a whole.
    async fn overview_units(&self) -> Result<Vec<SearchUnit>, StoreError>;

    /// Cosine similarity of `query_vector` against every unit with a stored embedding.
    /// Units without an embedding are left out.
    async fn vector_matches(&self, query_vector: &[f32]) -> Result<Vec<VectorMatch>, StoreError>;
}
