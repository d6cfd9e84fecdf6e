use crate::error::LabelingError;
use crate::extractor::PageText;
use crate::llm::{CompletionOptions, OpenAiClient, Prompt};
use crate::prompts::{deck_prompt, format_deck_text, slide_prompt, topics_prompt};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeckMetadata {
    pub deck_title: String,
    pub deck_summary: String,
    pub main_themes: Vec<String>,
    pub primary_audiences: Vec<String>,
    pub use_cases_for_other_presentations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicLabel {
    pub topic_title: String,
    pub topic_summary: String,
    pub story_context: String,
    pub topics: Vec<String>,
    pub reuse_suggestions: Vec<String>,
    pub slide_numbers: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideLabel {
    pub slide_type: String,
    pub slide_caption: String,
    pub topics: Vec<String>,
    pub reusable: String,
}

/// Everything the labeler says about one deck.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeckLabels {
    pub deck: DeckMetadata,
    pub topics: Vec<TopicLabel>,
    /// Keyed by slide number.
    pub slides: BTreeMap<u32, SlideLabel>,
}

#[async_trait]
pub trait DeckLabeler: Send + Sync {
    async fn label_deck(&self, slides: &[PageText]) -> Result<DeckLabels, LabelingError>;
}

/// Labels decks with three kinds of JSON-mode completions: deck metadata, topic
/// segmentation, and one label per slide.
pub struct OpenAiDeckLabeler {
    client: OpenAiClient,
}

impl OpenAiDeckLabeler {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }

    async fn complete_json(&self, prompt: String) -> Result<String, LabelingError> {
        self.client
            .complete(
                &Prompt::user(prompt),
                CompletionOptions {
                    json_mode: true,
                    temperature: 0.3,
                    max_tokens: None,
                },
            )
            .await
            .map_err(|error| LabelingError::Request(error.to_string()))
    }
}

#[async_trait]
impl DeckLabeler for OpenAiDeckLabeler {
    async fn label_deck(&self, slides: &[PageText]) -> Result<DeckLabels, LabelingError> {
        let deck_text = format_deck_text(slides);

        let deck = parse_json::<DeckMetadata>(&self.complete_json(deck_prompt(&deck_text)).await?)?;
        let topics = parse_topics(&self.complete_json(topics_prompt(&deck_text)).await?)?;
        debug!(topic_count = topics.len(), "deck topics labeled");

        let mut labels = BTreeMap::new();
        for slide in slides {
            let response = self.complete_json(slide_prompt(&slide.text)).await?;
            labels.insert(slide.number, parse_json::<SlideLabel>(&response)?);
        }

        Ok(DeckLabels {
            deck,
            topics,
            slides: labels,
        })
    }
}

pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LabelingError> {
    serde_json::from_str(strip_code_fence(text))
        .map_err(|error| LabelingError::InvalidResponse(error.to_string()))
}

/// Accepts either a bare topic array or an object wrapping it under `topics`.
pub fn parse_topics(text: &str) -> Result<Vec<TopicLabel>, LabelingError> {
    let value: Value = parse_json(text)?;
    let topics = match value {
        Value::Object(mut object) => object.remove("topics").unwrap_or(Value::Null),
        other => other,
    };
    if !topics.is_array() {
        return Err(LabelingError::InvalidResponse(
            "expected array or object with topics array".to_string(),
        ));
    }

    serde_json::from_value(topics)
        .map_err(|error| LabelingError::InvalidResponse(error.to_string()))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.trim_start_matches("json");
            body.strip_suffix("```").unwrap_or(body).trim()
        }
        None => trimmed,
    }
}
