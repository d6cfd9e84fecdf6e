use crate::llm::{LanguageModel, Prompt};
use crate::models::{ChatAnswer, ChatReference, SearchResult, UnitMatch};
use crate::prompts::CHAT_SYSTEM_PROMPT;
use crate::search::HybridSearch;
use crate::{ChatError, GenerationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

pub const NO_RESULTS_ANSWER: &str = "I couldn't find any relevant decks or slides for your request. Please try rephrasing your question or using different keywords.";

pub const DEFAULT_CHAT_LIMIT: usize = 10;
pub const MAX_CHAT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatConfig {
    pub search_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            search_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(60),
        }
    }
}

/// Retrieved units for one question, ready to be turned into a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingContext {
    pub question: String,
    pub results: Vec<SearchResult>,
}

impl GroundingContext {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn references(&self) -> Vec<ChatReference> {
        self.results.iter().map(ChatReference::from).collect()
    }

    pub fn prompt(&self) -> Prompt {
        let snippets = self
            .results
            .iter()
            .enumerate()
            .map(|(index, result)| render_snippet(index + 1, result))
            .collect::<Vec<_>>()
            .join("\n---\n\n");

        Prompt::with_system(
            CHAT_SYSTEM_PROMPT,
            format!(
                "User request: {}\n\nAvailable snippets:\n{}\n\nProvide a helpful recommendation based on the available snippets.",
                self.question, snippets
            ),
        )
    }
}

fn render_snippet(ordinal: usize, result: &SearchResult) -> String {
    let mut text = format!("Snippet {ordinal}:\nDeck: {}\n", result.deck_title);
    if !result.deck_summary.is_empty() {
        text.push_str(&format!("Deck summary: {}\n", result.deck_summary));
    }
    match &result.unit {
        UnitMatch::Topic {
            topic_title,
            slide_numbers,
            ..
        } => {
            text.push_str(&format!("Topic: {topic_title}\n"));
            if !result.summary.is_empty() && result.summary != *topic_title {
                text.push_str(&format!("Summary: {}\n", result.summary));
            }
            if !slide_numbers.is_empty() {
                let numbers = slide_numbers
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                text.push_str(&format!("Covers slides: {numbers}\n"));
            }
        }
        UnitMatch::Slide { slide_number, .. } => {
            text.push_str(&format!("Slide {slide_number}: {}\n", result.summary));
        }
    }
    text
}

/// Answers questions from retrieved deck content.
pub struct ChatService {
    search: Arc<HybridSearch>,
    model: Arc<dyn LanguageModel>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(search: Arc<HybridSearch>, model: Arc<dyn LanguageModel>) -> Self {
        Self::with_config(search, model, ChatConfig::default())
    }

    pub fn with_config(
        search: Arc<HybridSearch>,
        model: Arc<dyn LanguageModel>,
        config: ChatConfig,
    ) -> Self {
        Self {
            search,
            model,
            config,
        }
    }

    /// `limit` defaults to 10 and is clamped to `1..=20`.
    pub async fn answer(&self, question: &str, limit: Option<usize>) -> Result<ChatAnswer, ChatError> {
        let context = self.retrieve(question, limit).await?;
        if context.is_empty() {
            info!(question = %context.question, "no grounding material found");
            return Ok(ChatAnswer {
                answer: NO_RESULTS_ANSWER.to_string(),
                references: Vec::new(),
            });
        }
        self.generate(&context).await
    }

    pub async fn retrieve(
        &self,
        question: &str,
        limit: Option<usize>,
    ) -> Result<GroundingContext, ChatError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChatError::InvalidQuery("question is empty".to_string()));
        }
        let limit = limit
            .unwrap_or(DEFAULT_CHAT_LIMIT)
            .clamp(1, MAX_CHAT_LIMIT);

        let results = timeout(self.config.search_timeout, self.search.search(question, limit))
            .await
            .map_err(|_| ChatError::SearchTimeout(self.config.search_timeout))??;

        debug!(
            result_count = results.results.len(),
            lexical_only = results.lexical_only,
            "grounding context retrieved"
        );
        Ok(GroundingContext {
            question: question.to_string(),
            results: results.results,
        })
    }

    /// Writes the answer for an already retrieved context. Can be called again
    /// with the same context after a generation failure.
    pub async fn generate(&self, context: &GroundingContext) -> Result<ChatAnswer, ChatError> {
        if context.is_empty() {
            return Ok(ChatAnswer {
                answer: NO_RESULTS_ANSWER.to_string(),
                references: Vec::new(),
            });
        }

        let prompt = context.prompt();
        let answer = timeout(self.config.generation_timeout, self.model.generate(&prompt))
            .await
            .map_err(|_| GenerationError::Timeout(self.config.generation_timeout))??;

        let answer = answer.trim();
        if answer.is_empty() {
            return Err(GenerationError::EmptyResponse.into());
        }

        Ok(ChatAnswer {
            answer: answer.to_string(),
            references: context.references(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{CharacterNgramEmbedder, EmbeddingGenerator};
    use crate::error::{EmbeddingError, LabelingError, StoreError};
    use crate::extractor::tests::build_pdf;
    use crate::extractor::{LopdfExtractor, PageText};
    use crate::ingest::Ingestor;
    use crate::labeler::{DeckLabeler, DeckLabels, DeckMetadata, SlideLabel, TopicLabel};
    use crate::models::IngestionOptions;
    use crate::stores::MemoryDeckStore;
    use std::collections::BTreeMap;
    use crate::store::{SearchUnit, VectorMatch};
    use crate::traits::UnitIndex;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StaticIndex {
        units: Vec<SearchUnit>,
    }

    #[async_trait]
    impl UnitIndex for StaticIndex {
        async fn lexical_candidates(
            &self,
            terms: &[String],
        ) -> Result<Vec<SearchUnit>, StoreError> {
            Ok(self
                .units
                .iter()
                .filter(|unit| {
                    let text = unit.search_text();
                    terms.iter().any(|term| text.contains(term.as_str()))
                })
                .cloned()
                .collect())
        }

        async fn overview_units(&self) -> Result<Vec<SearchUnit>, StoreError> {
            Ok(self.units.clone())
        }

        async fn vector_matches(&self, _query: &[f32]) -> Result<Vec<VectorMatch>, StoreError> {
            Ok(self
                .units
                .iter()
                .map(|unit| VectorMatch {
                    unit: unit.clone(),
                    similarity: 0.9,
                })
                .collect())
        }
    }

    struct SameVector;

    #[async_trait]
    impl EmbeddingGenerator for SameVector {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }
    }

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<Prompt>>,
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn generate(&self, prompt: &Prompt) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.clone());
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(GenerationError::Request("upstream unavailable".to_string()));
            }
            Ok("Use Deck: Q3 Review, Slides: 4".to_string())
        }
    }

    struct SlowModel;

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn generate(&self, _prompt: &Prompt) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    fn revenue_units() -> Vec<SearchUnit> {
        let created = Utc::now();
        vec![
            SearchUnit {
                deck_id: "deck-q3".to_string(),
                deck_title: "Q3 Review".to_string(),
                deck_summary: "Quarterly business review".to_string(),
                deck_created_at: created,
                unit: UnitMatch::Slide {
                    slide_id: "slide-4".to_string(),
                    slide_number: 4,
                },
                heading: "Quarterly revenue by region".to_string(),
                body: Vec::new(),
                tags: vec!["finance".to_string()],
                summary: "Quarterly revenue by region".to_string(),
                has_embedding: true,
            },
            SearchUnit {
                deck_id: "deck-q3".to_string(),
                deck_title: "Q3 Review".to_string(),
                deck_summary: "Quarterly business review".to_string(),
                deck_created_at: created,
                unit: UnitMatch::Topic {
                    topic_id: "topic-1".to_string(),
                    topic_title: "Financial results".to_string(),
                    slide_numbers: vec![3, 4, 5],
                },
                heading: "Financial results".to_string(),
                body: vec!["Revenue and margin for the quarter".to_string()],
                tags: Vec::new(),
                summary: "Revenue and margin for the quarter".to_string(),
                has_embedding: true,
            },
        ]
    }

    fn service(units: Vec<SearchUnit>, model: Arc<dyn LanguageModel>) -> ChatService {
        let search = HybridSearch::new(Arc::new(StaticIndex { units }), Arc::new(SameVector));
        ChatService::new(Arc::new(search), model)
    }

    #[tokio::test]
    async fn answers_with_references_for_every_retrieved_unit() {
        let model = Arc::new(RecordingModel::default());
        let chat = service(revenue_units(), model.clone());

        let answer = chat.answer("quarterly revenue", None).await.unwrap();

        assert!(!answer.answer.is_empty());
        assert_eq!(answer.references.len(), 2);
        assert!(answer
            .references
            .iter()
            .any(|reference| reference.slide_number == Some(4) && reference.deck_title == "Q3 Review"));
        assert!(answer
            .references
            .iter()
            .any(|reference| reference.topic_title.as_deref() == Some("Financial results")));

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].system.as_deref(), Some(CHAT_SYSTEM_PROMPT));
        assert!(prompts[0].user.contains("User request: quarterly revenue"));
        assert!(prompts[0].user.contains("Slide 4: Quarterly revenue by region"));
        assert!(prompts[0].user.contains("Covers slides: 3, 4, 5"));
    }

    #[tokio::test]
    async fn no_results_skip_the_model() {
        let model = Arc::new(RecordingModel::default());
        let chat = service(Vec::new(), model.clone());

        let answer = chat.answer("quarterly revenue", Some(5)).await.unwrap();

        assert_eq!(answer.answer, NO_RESULTS_ANSWER);
        assert!(answer.references.is_empty());
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_question_is_invalid() {
        let chat = service(revenue_units(), Arc::new(RecordingModel::default()));
        assert!(matches!(
            chat.answer("  ", None).await,
            Err(ChatError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let chat = service(revenue_units(), Arc::new(RecordingModel::default()));

        let one = chat.retrieve("revenue", Some(0)).await.unwrap();
        assert_eq!(one.results.len(), 1);

        let many = chat.retrieve("revenue", Some(500)).await.unwrap();
        assert_eq!(many.results.len(), 2);
    }

    #[tokio::test]
    async fn generation_can_be_retried_with_the_same_context() {
        let model = Arc::new(RecordingModel {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let chat = service(revenue_units(), model.clone());

        let context = chat.retrieve("quarterly revenue", None).await.unwrap();
        assert!(matches!(
            chat.generate(&context).await,
            Err(ChatError::Generation(_))
        ));

        let answer = chat.generate(&context).await.unwrap();
        assert_eq!(answer.references, context.references());

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts[0], prompts[1]);
    }

    /// Labels a two-slide board deck whose summary is the only place that
    /// mentions revenue.
    struct BoardDeckLabeler;

    #[async_trait]
    impl DeckLabeler for BoardDeckLabeler {
        async fn label_deck(&self, _slides: &[PageText]) -> Result<DeckLabels, LabelingError> {
            let slide = |caption: &str| SlideLabel {
                slide_type: "chart".to_string(),
                slide_caption: caption.to_string(),
                topics: Vec::new(),
                reusable: "yes".to_string(),
            };
            Ok(DeckLabels {
                deck: DeckMetadata {
                    deck_title: "Board update".to_string(),
                    deck_summary: "Quarterly revenue review for the board".to_string(),
                    main_themes: Vec::new(),
                    primary_audiences: Vec::new(),
                    use_cases_for_other_presentations: Vec::new(),
                },
                topics: vec![TopicLabel {
                    topic_title: "Financial results".to_string(),
                    topic_summary: "Margins and costs".to_string(),
                    story_context: String::new(),
                    topics: Vec::new(),
                    reuse_suggestions: Vec::new(),
                    slide_numbers: vec![1, 2],
                }],
                slides: BTreeMap::from([(1, slide("Margins by region")), (2, slide("Cost outlook"))]),
            })
        }
    }

    #[tokio::test]
    async fn deck_level_questions_are_grounded_in_the_ingested_deck() {
        let store = Arc::new(MemoryDeckStore::new());
        let embedder = Arc::new(CharacterNgramEmbedder::default());
        let ingestor = Ingestor::new(
            Arc::new(LopdfExtractor),
            Arc::new(BoardDeckLabeler),
            embedder.clone(),
            store.clone(),
            IngestionOptions::default(),
        );
        let deck = ingestor
            .ingest(
                "decks/board.pdf",
                build_pdf(&[Some("Margins by region"), Some("Cost outlook")]),
            )
            .await
            .unwrap();

        let model = Arc::new(RecordingModel::default());
        let search = HybridSearch::new(store.clone(), embedder);
        let chat = ChatService::new(Arc::new(search), model.clone());

        for question in ["what is this deck about?", "quarterly revenue"] {
            let answer = chat.answer(question, None).await.unwrap();

            assert_ne!(answer.answer, NO_RESULTS_ANSWER, "{question}");
            assert!(!answer.references.is_empty(), "{question}");
            assert!(
                answer
                    .references
                    .iter()
                    .all(|reference| reference.deck_id == deck.id),
                "{question}"
            );
        }

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0]
            .user
            .contains("Deck summary: Quarterly revenue review for the board"));
        assert!(prompts[0].user.contains("Topic: Financial results"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_generation_times_out() {
        let search = HybridSearch::new(
            Arc::new(StaticIndex {
                units: revenue_units(),
            }),
            Arc::new(SameVector),
        );
        let chat = ChatService::with_config(
            Arc::new(search),
            Arc::new(SlowModel),
            ChatConfig {
                search_timeout: Duration::from_secs(10),
                generation_timeout: Duration::from_secs(1),
            },
        );

        assert!(matches!(
            chat.answer("revenue", None).await,
            Err(ChatError::Generation(GenerationError::Timeout(_)))
        ));
    }
}
