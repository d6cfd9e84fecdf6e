use crate::models::{Deck, Slide, Topic, UnitKind, UnitMatch};
use chrono::{DateTime, Utc};

/// A topic or slide flattened into the fields search needs, joined with its deck.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchUnit {
    pub deck_id: String,
    pub deck_title: String,
    pub deck_summary: String,
    pub deck_created_at: DateTime<Utc>,
    pub unit: UnitMatch,
    /// Topic title or slide caption.
    pub heading: String,
    /// Topic summary and narrative context.
    pub body: Vec<String>,
    /// Tag-like fields: topic tags, reuse suggestions, slide type.
    pub tags: Vec<String>,
    /// Snippet shown in results.
    pub summary: String,
    pub has_embedding: bool,
}

impl SearchUnit {
    pub fn from_topic(deck: &Deck, topic: &Topic) -> Self {
        let mut tags = topic.tags.clone();
        tags.extend(topic.reuse.iter().cloned());

        Self {
            deck_id: deck.id.clone(),
            deck_title: deck.title.clone(),
            deck_summary: deck.summary.clone(),
            deck_created_at: deck.created_at,
            unit: UnitMatch::Topic {
                topic_id: topic.id.clone(),
                topic_title: topic.title.clone(),
                slide_numbers: topic.slide_numbers.clone(),
            },
            heading: topic.title.clone(),
            body: vec![topic.summary.clone(), topic.context.clone()],
            tags,
            summary: if topic.summary.trim().is_empty() {
                topic.title.clone()
            } else {
                topic.summary.clone()
            },
            has_embedding: topic.embedding.is_some(),
        }
    }

    pub fn from_slide(deck: &Deck, slide: &Slide) -> Self {
        let mut tags = slide.tags.clone();
        tags.extend(slide.slide_type.iter().cloned());

        Self {
            deck_id: deck.id.clone(),
            deck_title: deck.title.clone(),
            deck_summary: deck.summary.clone(),
            deck_created_at: deck.created_at,
            unit: UnitMatch::Slide {
                slide_id: slide.id.clone(),
                slide_number: slide.number,
            },
            heading: slide.caption.clone(),
            body: Vec::new(),
            tags,
            summary: if slide.caption.trim().is_empty() {
                format!("Slide {}", slide.number)
            } else {
                slide.caption.clone()
            },
            has_embedding: slide.embedding.is_some(),
        }
    }

    pub fn kind(&self) -> UnitKind {
        self.unit.kind()
    }

    pub fn unit_id(&self) -> &str {
        self.unit.unit_id()
    }

    /// Lowercased text of every lexical field, deck title and summary included.
    /// Stores filter candidates on it.
    pub fn search_text(&self) -> String {
        std::iter::once(&self.heading)
            .chain(self.body.iter())
            .chain(self.tags.iter())
            .chain([&self.deck_title, &self.deck_summary])
            .map(|field| field.to_lowercase())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub unit: SearchUnit,
    /// Raw cosine similarity in [-1, 1].
    pub similarity: f32,
}

/// A unit stored without an embedding, waiting for the backfill pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEmbedding {
    pub kind: UnitKind,
    pub unit_id: String,
    pub deck_id: String,
    pub text: String,
}

impl PendingEmbedding {
    pub fn for_topic(topic: &Topic) -> Self {
        Self {
            kind: UnitKind::Topic,
            unit_id: topic.id.clone(),
            deck_id: topic.deck_id.clone(),
            text: topic.embedding_text(),
        }
    }

    pub fn for_slide(slide: &Slide) -> Self {
        Self {
            kind: UnitKind::Slide,
            unit_id: slide.id.clone(),
            deck_id: slide.deck_id.clone(),
            text: slide.embedding_text(),
        }
    }
}
