use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deck {
    pub id: String,
    pub source_ref: String,
    pub title: String,
    pub summary: String,
    pub themes: Vec<String>,
    pub audiences: Vec<String>,
    pub use_cases: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Labeler-derived grouping of slides within one deck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub id: String,
    pub deck_id: String,
    /// Ordinal within the deck, used to keep creation order stable.
    pub position: u32,
    pub title: String,
    pub summary: String,
    pub context: String,
    pub tags: Vec<String>,
    pub reuse: Vec<String>,
    pub slide_numbers: Vec<u32>,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_pending: bool,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn embedding_text(&self) -> String {
        [&self.title, &self.summary, &self.context]
            .iter()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One page of a deck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slide {
    pub id: String,
    pub deck_id: String,
    pub number: u32,
    pub caption: String,
    #[serde(rename = "type")]
    pub slide_type: Option<String>,
    pub tags: Vec<String>,
    pub reusable: Option<String>,
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_pending: bool,
}

impl Slide {
    pub fn embedding_text(&self) -> String {
        self.caption.clone()
    }
}

/// A deck together with all of its units, as written by ingestion and read by `GET /decks/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeckRecord {
    #[serde(flatten)]
    pub deck: Deck,
    pub topics: Vec<Topic>,
    pub slides: Vec<Slide>,
}

impl DeckRecord {
    pub fn pending_embeddings(&self) -> usize {
        let topics = self.topics.iter().filter(|topic| topic.embedding_pending).count();
        let slides = self.slides.iter().filter(|slide| slide.embedding_pending).count();
        topics + slides
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Topic,
    Slide,
}

impl UnitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitKind::Topic => "topic",
            UnitKind::Slide => "slide",
        }
    }
}

/// Kind-specific part of a search hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnitMatch {
    Topic {
        topic_id: String,
        topic_title: String,
        slide_numbers: Vec<u32>,
    },
    Slide {
        slide_id: String,
        slide_number: u32,
    },
}

impl UnitMatch {
    pub fn kind(&self) -> UnitKind {
        match self {
            UnitMatch::Topic { .. } => UnitKind::Topic,
            UnitMatch::Slide { .. } => UnitKind::Slide,
        }
    }

    pub fn unit_id(&self) -> &str {
        match self {
            UnitMatch::Topic { topic_id, .. } => topic_id,
            UnitMatch::Slide { slide_id, .. } => slide_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    #[serde(flatten)]
    pub unit: UnitMatch,
    pub deck_id: String,
    pub deck_title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deck_summary: String,
    pub summary: String,
    pub score: f64,
    pub lexical_score: f64,
    pub semantic_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResults {
    pub query: String,
    pub results: Vec<SearchResult>,
    /// Set when the query could not be embedded and only the lexical pass ran.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub lexical_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatReference {
    pub deck_id: String,
    pub deck_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_number: Option<u32>,
}

impl From<&SearchResult> for ChatReference {
    fn from(result: &SearchResult) -> Self {
        let mut reference = ChatReference {
            deck_id: result.deck_id.clone(),
            deck_title: result.deck_title.clone(),
            topic_id: None,
            topic_title: None,
            slide_id: None,
            slide_number: None,
        };
        match &result.unit {
            UnitMatch::Topic {
                topic_id,
                topic_title,
                ..
            } => {
                reference.topic_id = Some(topic_id.clone());
                reference.topic_title = Some(topic_title.clone());
            }
            UnitMatch::Slide {
                slide_id,
                slide_number,
            } => {
                reference.slide_id = Some(slide_id.clone());
                reference.slide_number = Some(*slide_number);
            }
        }
        reference
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatAnswer {
    pub answer: String,
    pub references: Vec<ChatReference>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub max_pages: usize,
    pub max_document_bytes: usize,
    /// Length of the caption derived from slide text when the labeler gives none.
    pub fallback_caption_chars: usize,
    pub labeling_retry: RetryPolicy,
    pub embedding_retry: RetryPolicy,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_document_bytes: 25 * 1024 * 1024,
            fallback_caption_chars: 200,
            labeling_retry: RetryPolicy::default(),
            embedding_retry: RetryPolicy::default(),
        }
    }
}
