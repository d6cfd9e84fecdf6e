use crate::embeddings::EmbeddingGenerator;
use crate::lexical::{is_overview_query, lexical_score, query_terms, DECK_WEIGHT};
use crate::models::{SearchResult, SearchResults, UnitKind};
use crate::store::SearchUnit;
use crate::traits::UnitIndex;
use crate::SearchError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    pub semantic_weight: f64,
    pub lexical_weight: f64,
    /// Raw cosine a unit needs to enter the results through the semantic pass alone.
    pub min_semantic_similarity: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.5,
            lexical_weight: 0.5,
            min_semantic_similarity: 0.6,
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<(), SearchError> {
        let sum = self.semantic_weight + self.lexical_weight;
        if self.semantic_weight < 0.0 || self.lexical_weight < 0.0 || (sum - 1.0).abs() > 1e-9 {
            return Err(SearchError::InvalidQuery(format!(
                "search weights must be non-negative and sum to 1, got semantic={} lexical={}",
                self.semantic_weight, self.lexical_weight
            )));
        }
        if self.semantic_weight < self.lexical_weight {
            return Err(SearchError::InvalidQuery(
                "semantic weight must be at least the lexical weight".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.min_semantic_similarity) {
            return Err(SearchError::InvalidQuery(format!(
                "min semantic similarity {} is outside [-1, 1]",
                self.min_semantic_similarity
            )));
        }
        Ok(())
    }
}

/// Keyword + vector search over topics and slides with one blended ranking.
pub struct HybridSearch {
    index: Arc<dyn UnitIndex>,
    embedder: Arc<dyn EmbeddingGenerator>,
    config: SearchConfig,
}

impl HybridSearch {
    pub fn new(index: Arc<dyn UnitIndex>, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            index,
            embedder,
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(
        index: Arc<dyn UnitIndex>,
        embedder: Arc<dyn EmbeddingGenerator>,
        config: SearchConfig,
    ) -> Result<Self, SearchError> {
        config.validate()?;
        Ok(Self {
            index,
            embedder,
            config,
        })
    }

    pub async fn search(&self, query: &str, limit: usize) -> Result<SearchResults, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SearchError::InvalidQuery("query is empty".to_string()));
        }
        if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
            return Err(SearchError::InvalidQuery(format!(
                "limit must be between 1 and {MAX_SEARCH_LIMIT}, got {limit}"
            )));
        }

        let terms = query_terms(query);
        let query_vector = match self.embedder.embed(query).await {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(error = %error, "query embedding failed, falling back to lexical search");
                None
            }
        };

        // A question about the deck itself matches every unit through its deck fields.
        let overview = is_overview_query(query);
        let lexical_hits = if overview {
            self.index.overview_units().await?
        } else if terms.is_empty() {
            Vec::new()
        } else {
            self.index.lexical_candidates(&terms).await?
        };
        let vector_hits = match &query_vector {
            Some(vector) => self.index.vector_matches(vector).await?,
            None => Vec::new(),
        };

        let mut candidates = HashMap::<(UnitKind, String), Candidate>::new();
        for unit in lexical_hits {
            let lexical = if overview {
                DECK_WEIGHT
            } else {
                lexical_score(&terms, &unit)
            };
            if lexical <= 0.0 {
                continue;
            }
            candidates.insert(
                (unit.kind(), unit.unit_id().to_string()),
                Candidate {
                    unit,
                    lexical,
                    semantic: None,
                },
            );
        }

        for hit in vector_hits {
            let key = (hit.unit.kind(), hit.unit.unit_id().to_string());
            let semantic = normalize_similarity(hit.similarity);
            match candidates.get_mut(&key) {
                Some(candidate) => candidate.semantic = Some(semantic),
                None if hit.similarity >= self.config.min_semantic_similarity => {
                    candidates.insert(
                        key,
                        Candidate {
                            unit: hit.unit,
                            lexical: 0.0,
                            semantic: Some(semantic),
                        },
                    );
                }
                None => {}
            }
        }

        let mut ranked: Vec<Ranked> = candidates
            .into_values()
            .map(|candidate| {
                let score = self.blend(&candidate);
                Ranked { candidate, score }
            })
            .collect();
        ranked.sort_by(compare_ranked);
        ranked.truncate(limit);

        debug!(
            query,
            term_count = terms.len(),
            overview,
            result_count = ranked.len(),
            lexical_only = query_vector.is_none(),
            "hybrid search complete"
        );

        Ok(SearchResults {
            query: query.to_string(),
            results: ranked.into_iter().map(Ranked::into_result).collect(),
            lexical_only: query_vector.is_none(),
        })
    }

    /// Units with no semantic signal (no stored embedding, or the query could not be
    /// embedded) rank on their lexical score alone instead of being dragged down by a
    /// missing term.
    fn blend(&self, candidate: &Candidate) -> f64 {
        match candidate.semantic {
            Some(semantic) => {
                self.config.semantic_weight * semantic + self.config.lexical_weight * candidate.lexical
            }
            None => candidate.lexical,
        }
    }
}

/// Maps cosine similarity from [-1, 1] to [0, 1].
pub fn normalize_similarity(similarity: f32) -> f64 {
    ((f64::from(similarity) + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[derive(Debug)]
struct Candidate {
    unit: SearchUnit,
    lexical: f64,
    semantic: Option<f64>,
}

#[derive(Debug)]
struct Ranked {
    candidate: Candidate,
    score: f64,
}

impl Ranked {
    fn into_result(self) -> SearchResult {
        let Candidate {
            unit,
            lexical,
            semantic,
        } = self.candidate;

        SearchResult {
            unit: unit.unit,
            deck_id: unit.deck_id,
            deck_title: unit.deck_title,
            deck_summary: unit.deck_summary,
            summary: unit.summary,
            score: self.score,
            lexical_score: lexical,
            semantic_score: semantic,
        }
    }
}

/// Score descending, then newer deck, then topics before slides, then unit id.
fn compare_ranked(left: &Ranked, right: &Ranked) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| {
            right
                .candidate
                .unit
                .deck_created_at
                .cmp(&left.candidate.unit.deck_created_at)
        })
        .then_with(|| left.candidate.unit.kind().cmp(&right.candidate.unit.kind()))
        .then_with(|| {
            left.candidate
                .unit
                .unit_id()
                .cmp(right.candidate.unit.unit_id())
        })
}
