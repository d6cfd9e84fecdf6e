use crate::embeddings::cosine_similarity;
use crate::models::{Deck, DeckRecord, UnitKind};
use crate::store::{PendingEmbedding, SearchUnit, VectorMatch};
use crate::traits::{DeckRepository, UnitIndex};
use crate::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local store for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryDeckStore {
    decks: RwLock<HashMap<String, DeckRecord>>,
}

impl MemoryDeckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn deck_count(&self) -> usize {
        self.decks.read().await.len()
    }

    fn units<'a>(
        record: &'a DeckRecord,
    ) -> impl Iterator<Item = (SearchUnit, Option<&'a Vec<f32>>)> + 'a {
        let topics = record.topics.iter().map(|topic| {
            (
                SearchUnit::from_topic(&record.deck, topic),
                topic.embedding.as_ref(),
            )
        });
        let slides = record.slides.iter().map(|slide| {
            (
                SearchUnit::from_slide(&record.deck, slide),
                slide.embedding.as_ref(),
            )
        });
        topics.chain(slides)
    }
}

#[async_trait]
impl DeckRepository for MemoryDeckStore {
    async fn replace_deck(&self, record: &DeckRecord) -> Result<(), StoreError> {
        let mut decks = self.decks.write().await;
        let mut record = record.clone();
        if let Some(existing) = decks.get(&record.deck.id) {
            record.deck.created_at = existing.deck.created_at;
        }
        record.topics.sort_by_key(|topic| topic.position);
        record.slides.sort_by_key(|slide| slide.number);
        decks.insert(record.deck.id.clone(), record);
        Ok(())
    }

    async fn deck(&self, deck_id: &str) -> Result<Option<DeckRecord>, StoreError> {
        Ok(self.decks.read().await.get(deck_id).cloned())
    }

    async fn deck_by_source(&self, source_ref: &str) -> Result<Option<Deck>, StoreError> {
        Ok(self
            .decks
            .read()
            .await
            .values()
            .find(|record| record.deck.source_ref == source_ref)
            .map(|record| record.deck.clone()))
    }

    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>, StoreError> {
        let decks = self.decks.read().await;
        let mut deck_ids: Vec<&String> = decks.keys().collect();
        deck_ids.sort();

        let pending = deck_ids
            .into_iter()
            .filter_map(|id| decks.get(id))
            .flat_map(|record| {
                let topics = record
                    .topics
                    .iter()
                    .filter(|topic| topic.embedding_pending)
                    .map(PendingEmbedding::for_topic);
                let slides = record
                    .slides
                    .iter()
                    .filter(|slide| slide.embedding_pending)
                    .map(PendingEmbedding::for_slide);
                topics.chain(slides).collect::<Vec<_>>()
            })
            .take(limit)
            .collect();
        Ok(pending)
    }

    async fn store_embedding(
        &self,
        unit: &PendingEmbedding,
        embedding: &[f32],
    ) -> Result<bool, StoreError> {
        let mut decks = self.decks.write().await;
        let Some(record) = decks.get_mut(&unit.deck_id) else {
            return Ok(false);
        };

        match unit.kind {
            UnitKind::Topic => {
                if let Some(topic) = record.topics.iter_mut().find(|topic| {
                    topic.id == unit.unit_id
                        && topic.embedding_pending
                        && topic.embedding_text() == unit.text
                }) {
                    topic.embedding = Some(embedding.to_vec());
                    topic.embedding_pending = false;
                    return Ok(true);
                }
            }
            UnitKind::Slide => {
                if let Some(slide) = record.slides.iter_mut().find(|slide| {
                    slide.id == unit.unit_id
                        && slide.embedding_pending
                        && slide.embedding_text() == unit.text
                }) {
                    slide.embedding = Some(embedding.to_vec());
                    slide.embedding_pending = false;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl UnitIndex for MemoryDeckStore {
    async fn lexical_candidates(&self, terms: &[String]) -> Result<Vec<SearchUnit>, StoreError> {
        let decks = self.decks.read().await;
        Ok(decks
            .values()
            .flat_map(Self::units)
            .map(|(unit, _)| unit)
            .filter(|unit| {
                let text = unit.search_text();
                terms.iter().any(|term| text.contains(&term.to_lowercase()))
            })
            .collect())
    }

    async fn overview_units(&self) -> Result<Vec<SearchUnit>, StoreError> {
        let decks = self.decks.read().await;
        Ok(decks
            .values()
            .flat_map(Self::units)
            .map(|(unit, _)| unit)
            .collect())
    }

    async fn vector_matches(&self, query_vector: &[f32]) -> Result<Vec<VectorMatch>, StoreError> {
        let decks = self.decks.read().await;
        Ok(decks
            .values()
            .flat_map(Self::units)
            .filter_map(|(unit, embedding)| {
                let similarity = cosine_similarity(query_vector, embedding?)?;
                Some(VectorMatch { unit, similarity })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Slide, Topic};
    use chrono::{Duration, Utc};

    fn record(deck_id: &str, source: &str) -> DeckRecord {
        let now = Utc::now();
        DeckRecord {
            deck: Deck {
                id: deck_id.to_string(),
                source_ref: source.to_string(),
                title: "Pricing review".to_string(),
                summary: "How we price".to_string(),
                themes: vec!["pricing".to_string()],
                audiences: Vec::new(),
                use_cases: Vec::new(),
                created_at: now,
                updated_at: now,
            },
            topics: vec![Topic {
                id: format!("{deck_id}-t0"),
                deck_id: deck_id.to_string(),
                position: 0,
                title: "Pricing tiers".to_string(),
                summary: "Three tiers".to_string(),
                context: String::new(),
                tags: vec!["pricing".to_string()],
                reuse: Vec::new(),
                slide_numbers: vec![1],
                embedding: Some(vec![1.0, 0.0]),
                embedding_pending: false,
                created_at: now,
            }],
            slides: vec![Slide {
                id: format!("{deck_id}-s1"),
                deck_id: deck_id.to_string(),
                number: 1,
                caption: "Tier overview".to_string(),
                slide_type: Some("table".to_string()),
                tags: Vec::new(),
                reusable: Some("yes".to_string()),
                embedding: None,
                embedding_pending: true,
            }],
        }
    }

    #[tokio::test]
    async fn replace_keeps_creation_time() {
        let store = MemoryDeckStore::new();
        let first = record("d1", "decks/pricing.pdf");
        store.replace_deck(&first).await.unwrap();

        let mut second = record("d1", "decks/pricing.pdf");
        second.deck.created_at = first.deck.created_at + Duration::hours(1);
        second.deck.title = "Pricing review v2".to_string();
        store.replace_deck(&second).await.unwrap();

        let stored = store.deck("d1").await.unwrap().unwrap();
        assert_eq!(stored.deck.created_at, first.deck.created_at);
        assert_eq!(stored.deck.title, "Pricing review v2");
        assert_eq!(store.deck_count().await, 1);
        assert_eq!(
            store
                .deck_by_source("decks/pricing.pdf")
                .await
                .unwrap()
                .map(|deck| deck.id),
            Some("d1".to_string())
        );
    }

    #[tokio::test]
    async fn vector_matches_skip_units_without_embeddings() {
        let store = MemoryDeckStore::new();
        store.replace_deck(&record("d1", "a.pdf")).await.unwrap();

        let matches = store.vector_matches(&[1.0, 0.0]).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].unit.unit_id(), "d1-t0");

        let lexical = store
            .lexical_candidates(&["tier".to_string()])
            .await
            .unwrap();
        assert_eq!(lexical.len(), 2);
    }

    #[tokio::test]
    async fn storing_an_embedding_clears_the_pending_marker() {
        let store = MemoryDeckStore::new();
        store.replace_deck(&record("d1", "a.pdf")).await.unwrap();

        let pending = store.pending_embeddings(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "Tier overview");

        assert!(store.store_embedding(&pending[0], &[0.0, 1.0]).await.unwrap());
        let missing = PendingEmbedding {
            unit_id: "missing".to_string(),
            ..pending[0].clone()
        };
        assert!(!store.store_embedding(&missing, &[0.0, 1.0]).await.unwrap());
        assert!(store.pending_embeddings(10).await.unwrap().is_empty());
        assert!(!store.store_embedding(&pending[0], &[1.0, 1.0]).await.unwrap());
    }

    #[tokio::test]
    async fn stale_backfill_does_not_overwrite_a_reingested_unit() {
        let store = MemoryDeckStore::new();
        let mut first = record("d1", "a.pdf");
        first.topics[0].embedding = None;
        first.topics[0].embedding_pending = true;
        store.replace_deck(&first).await.unwrap();

        let listed = store.pending_embeddings(10).await.unwrap();
        let old_topic = listed
            .iter()
            .find(|unit| unit.kind == UnitKind::Topic)
            .unwrap()
            .clone();

        let mut second = record("d1", "a.pdf");
        second.topics[0].title = "Pricing tiers v2".to_string();
        second.topics[0].embedding = Some(vec![0.0, 1.0]);
        store.replace_deck(&second).await.unwrap();

        assert!(!store.store_embedding(&old_topic, &[1.0, 0.0]).await.unwrap());
        let stored = store.deck("d1").await.unwrap().unwrap();
        assert_eq!(stored.topics[0].embedding, Some(vec![0.0, 1.0]));
        assert!(!stored.topics[0].embedding_pending);

        // Same text, still pending after the re-ingest: the vector still applies.
        let mut third = record("d1", "a.pdf");
        third.slides[0].embedding_pending = true;
        store.replace_deck(&third).await.unwrap();
        let old_slide = listed
            .iter()
            .find(|unit| unit.kind == UnitKind::Slide)
            .unwrap();
        assert!(store.store_embedding(old_slide, &[0.5, 0.5]).await.unwrap());
    }

    #[tokio::test]
    async fn overview_lists_every_unit() {
        let store = MemoryDeckStore::new();
        store.replace_deck(&record("d1", "a.pdf")).await.unwrap();
        store.replace_deck(&record("d2", "b.pdf")).await.unwrap();

        assert_eq!(store.overview_units().await.unwrap().len(), 4);
    }
}
