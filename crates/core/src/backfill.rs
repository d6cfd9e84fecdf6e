use crate::embeddings::EmbeddingGenerator;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::traits::DeckRepository;
use crate::StoreError;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub attempted: usize,
    pub embedded: usize,
    pub still_pending: usize,
    /// Units re-ingested or already embedded while the pass was running.
    pub superseded: usize,
}

/// Embeds units that were stored without a vector.
pub struct EmbeddingBackfill {
    repository: Arc<dyn DeckRepository>,
    embedder: Arc<dyn EmbeddingGenerator>,
    retry: RetryPolicy,
}

impl EmbeddingBackfill {
    pub fn new(repository: Arc<dyn DeckRepository>, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self {
            repository,
            embedder,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Processes up to `batch` pending units. Units that fail again stay pending.
    pub async fn run_once(&self, batch: usize) -> Result<BackfillReport, StoreError> {
        let pending = self.repository.pending_embeddings(batch).await?;
        let mut report = BackfillReport {
            attempted: pending.len(),
            ..BackfillReport::default()
        };

        for unit in pending {
            let embedded = retry_with_backoff(&self.retry, "backfill_embedding", || {
                self.embedder.embed(&unit.text)
            })
            .await;

            match embedded {
                Ok(vector) => {
                    if self.repository.store_embedding(&unit, &vector).await? {
                        report.embedded += 1;
                    } else {
                        debug!(
                            unit_id = %unit.unit_id,
                            deck_id = %unit.deck_id,
                            "unit changed during backfill, vector discarded"
                        );
                        report.superseded += 1;
                    }
                }
                Err(error) => {
                    warn!(
                        unit_id = %unit.unit_id,
                        deck_id = %unit.deck_id,
                        kind = unit.kind.as_str(),
                        error = %error,
                        "backfill embedding failed"
                    );
                    report.still_pending += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            embedded = report.embedded,
            still_pending = report.still_pending,
            superseded = report.superseded,
            "embedding backfill pass finished"
        );
        Ok(report)
    }
}
