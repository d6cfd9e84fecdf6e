//! SQLite-backed deck store.
//!
//! Decks, topics and slides live in three tables. List fields are JSON text and
//! embeddings are little-endian `f32` blobs. Vector search is a brute-force cosine
//! scan over every stored embedding.

use crate::embeddings::cosine_similarity;
use crate::models::{Deck, DeckRecord, Slide, Topic, UnitKind};
use crate::store::{PendingEmbedding, SearchUnit, VectorMatch};
use crate::traits::{DeckRepository, UnitIndex};
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS decks (
        id TEXT PRIMARY KEY,
        source_ref TEXT NOT NULL,
        title TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        themes TEXT NOT NULL DEFAULT '[]',
        audiences TEXT NOT NULL DEFAULT '[]',
        use_cases TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_decks_source ON decks(source_ref)",
    "CREATE TABLE IF NOT EXISTS topics (
        id TEXT PRIMARY KEY,
        deck_id TEXT NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        title TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        context TEXT NOT NULL DEFAULT '',
        tags TEXT NOT NULL DEFAULT '[]',
        reuse TEXT NOT NULL DEFAULT '[]',
        slide_numbers TEXT NOT NULL DEFAULT '[]',
        embedding BLOB,
        embedding_pending INTEGER NOT NULL DEFAULT 0,
        embedding_text TEXT NOT NULL DEFAULT '',
        search_text TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_topics_deck ON topics(deck_id, position)",
    "CREATE TABLE IF NOT EXISTS slides (
        id TEXT PRIMARY KEY,
        deck_id TEXT NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
        number INTEGER NOT NULL,
        caption TEXT NOT NULL,
        slide_type TEXT,
        tags TEXT NOT NULL DEFAULT '[]',
        reusable TEXT,
        embedding BLOB,
        embedding_pending INTEGER NOT NULL DEFAULT 0,
        embedding_text TEXT NOT NULL DEFAULT '',
        search_text TEXT NOT NULL DEFAULT '',
        UNIQUE (deck_id, number)
    )",
];

pub struct SqliteDeckStore {
    pool: SqlitePool,
}

impl SqliteDeckStore {
    /// Opens (creating if needed) a database file in WAL mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Private database that lives as long as the store.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to `:memory:` is a separate database, so pin exactly one.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    async fn decks_by_id(&self) -> Result<HashMap<String, Deck>, StoreError> {
        let rows = sqlx::query("SELECT * FROM decks")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row_to_deck(row).map(|deck| (deck.id.clone(), deck)))
            .collect()
    }

    /// Joins topic and slide rows with their decks.
    async fn units(
        &self,
        topic_filter: &str,
        slide_filter: &str,
        binds: &[String],
    ) -> Result<Vec<(SearchUnit, Option<Vec<f32>>)>, StoreError> {
        let decks = self.decks_by_id().await?;

        let mut topic_query = sqlx::query(topic_filter);
        for value in binds {
            topic_query = topic_query.bind(value);
        }
        let topic_rows = topic_query.fetch_all(&self.pool).await?;

        let mut slide_query = sqlx::query(slide_filter);
        for value in binds {
            slide_query = slide_query.bind(value);
        }
        let slide_rows = slide_query.fetch_all(&self.pool).await?;

        let mut units = Vec::with_capacity(topic_rows.len() + slide_rows.len());
        for row in &topic_rows {
            let topic = row_to_topic(row)?;
            let Some(deck) = decks.get(&topic.deck_id) else {
                continue;
            };
            units.push((SearchUnit::from_topic(deck, &topic), topic.embedding));
        }
        for row in &slide_rows {
            let slide = row_to_slide(row)?;
            let Some(deck) = decks.get(&slide.deck_id) else {
                continue;
            };
            units.push((SearchUnit::from_slide(deck, &slide), slide.embedding));
        }
        Ok(units)
    }
}

#[async_trait]
impl DeckRepository for SqliteDeckStore {
    async fn replace_deck(&self, record: &DeckRecord) -> Result<(), StoreError> {
        let deck = &record.deck;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO decks (id, source_ref, title, summary, themes, audiences, use_cases, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                source_ref = excluded.source_ref,
                title = excluded.title,
                summary = excluded.summary,
                themes = excluded.themes,
                audiences = excluded.audiences,
                use_cases = excluded.use_cases,
                updated_at = excluded.updated_at",
        )
        .bind(&deck.id)
        .bind(&deck.source_ref)
        .bind(&deck.title)
        .bind(&deck.summary)
        .bind(serde_json::to_string(&deck.themes)?)
        .bind(serde_json::to_string(&deck.audiences)?)
        .bind(serde_json::to_string(&deck.use_cases)?)
        .bind(deck.created_at.to_rfc3339())
        .bind(deck.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM topics WHERE deck_id = ?1")
            .bind(&deck.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM slides WHERE deck_id = ?1")
            .bind(&deck.id)
            .execute(&mut *tx)
            .await?;

        for topic in &record.topics {
            sqlx::query(
                "INSERT INTO topics (id, deck_id, position, title, summary, context, tags, reuse,
                    slide_numbers, embedding, embedding_pending, embedding_text, search_text,
                    created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )
            .bind(&topic.id)
            .bind(&deck.id)
            .bind(i64::from(topic.position))
            .bind(&topic.title)
            .bind(&topic.summary)
            .bind(&topic.context)
            .bind(serde_json::to_string(&topic.tags)?)
            .bind(serde_json::to_string(&topic.reuse)?)
            .bind(serde_json::to_string(&topic.slide_numbers)?)
            .bind(topic.embedding.as_deref().map(encode_embedding))
            .bind(topic.embedding_pending)
            .bind(topic.embedding_text())
            .bind(SearchUnit::from_topic(deck, topic).search_text())
            .bind(topic.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        for slide in &record.slides {
            sqlx::query(
                "INSERT INTO slides (id, deck_id, number, caption, slide_type, tags, reusable,
                    embedding, embedding_pending, embedding_text, search_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(&slide.id)
            .bind(&deck.id)
            .bind(i64::from(slide.number))
            .bind(&slide.caption)
            .bind(slide.slide_type.as_deref())
            .bind(serde_json::to_string(&slide.tags)?)
            .bind(slide.reusable.as_deref())
            .bind(slide.embedding.as_deref().map(encode_embedding))
            .bind(slide.embedding_pending)
            .bind(slide.embedding_text())
            .bind(SearchUnit::from_slide(deck, slide).search_text())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            deck_id = %deck.id,
            topics = record.topics.len(),
            slides = record.slides.len(),
            "deck replaced"
        );
        Ok(())
    }

    async fn deck(&self, deck_id: &str) -> Result<Option<DeckRecord>, StoreError> {
        let Some(row) = sqlx::query("SELECT * FROM decks WHERE id = ?1")
            .bind(deck_id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let deck = row_to_deck(&row)?;

        let topics = sqlx::query("SELECT * FROM topics WHERE deck_id = ?1 ORDER BY position")
            .bind(deck_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_topic)
            .collect::<Result<Vec<_>, _>>()?;

        let slides = sqlx::query("SELECT * FROM slides WHERE deck_id = ?1 ORDER BY number")
            .bind(deck_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_slide)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DeckRecord {
            deck,
            topics,
            slides,
        }))
    }

    async fn deck_by_source(&self, source_ref: &str) -> Result<Option<Deck>, StoreError> {
        sqlx::query("SELECT * FROM decks WHERE source_ref = ?1 ORDER BY created_at LIMIT 1")
            .bind(source_ref)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(row_to_deck)
            .transpose()
    }

    async fn pending_embeddings(&self, limit: usize) -> Result<Vec<PendingEmbedding>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut pending: Vec<PendingEmbedding> = sqlx::query(
            "SELECT * FROM topics WHERE embedding_pending = 1 ORDER BY deck_id, position LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row_to_topic(row).map(|topic| PendingEmbedding::for_topic(&topic)))
        .collect::<Result<_, _>>()?;

        let remaining = limit - pending.len() as i64;
        if remaining > 0 {
            let slides = sqlx::query(
                "SELECT * FROM slides WHERE embedding_pending = 1 ORDER BY deck_id, number LIMIT ?1",
            )
            .bind(remaining)
            .fetch_all(&self.pool)
            .await?;
            for row in &slides {
                pending.push(PendingEmbedding::for_slide(&row_to_slide(row)?));
            }
        }
        Ok(pending)
    }

    async fn store_embedding(
        &self,
        unit: &PendingEmbedding,
        embedding: &[f32],
    ) -> Result<bool, StoreError> {
        let statement = match unit.kind {
            UnitKind::Topic => {
                "UPDATE topics SET embedding = ?1, embedding_pending = 0
                 WHERE id = ?2 AND deck_id = ?3 AND embedding_pending = 1 AND embedding_text = ?4"
            }
            UnitKind::Slide => {
                "UPDATE slides SET embedding = ?1, embedding_pending = 0
                 WHERE id = ?2 AND deck_id = ?3 AND embedding_pending = 1 AND embedding_text = ?4"
            }
        };
        let result = sqlx::query(statement)
            .bind(encode_embedding(embedding))
            .bind(&unit.unit_id)
            .bind(&unit.deck_id)
            .bind(&unit.text)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UnitIndex for SqliteDeckStore {
    async fn lexical_candidates(&self, terms: &[String]) -> Result<Vec<SearchUnit>, StoreError> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let filter = (1..=terms.len())
            .map(|index| format!("search_text LIKE ?{index} ESCAPE '\\'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let patterns: Vec<String> = terms
            .iter()
            .map(|term| format!("%{}%", escape_like(&term.to_lowercase())))
            .collect();

        let units = self
            .units(
                &format!("SELECT * FROM topics WHERE {filter}"),
                &format!("SELECT * FROM slides WHERE {filter}"),
                &patterns,
            )
            .await?;
        Ok(units.into_iter().map(|(unit, _)| unit).collect())
    }

    async fn overview_units(&self) -> Result<Vec<SearchUnit>, StoreError> {
        let units = self
            .units("SELECT * FROM topics", "SELECT * FROM slides", &[])
            .await?;
        Ok(units.into_iter().map(|(unit, _)| unit).collect())
    }

    async fn vector_matches(&self, query_vector: &[f32]) -> Result<Vec<VectorMatch>, StoreError> {
        let units = self
            .units(
                "SELECT * FROM topics WHERE embedding IS NOT NULL",
                "SELECT * FROM slides WHERE embedding IS NOT NULL",
                &[],
            )
            .await?;

        Ok(units
            .into_iter()
            .filter_map(|(unit, embedding)| {
                let similarity = cosine_similarity(query_vector, &embedding?)?;
                Some(VectorMatch { unit, similarity })
            })
            .collect())
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn json_list<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Vec<T>, StoreError> {
    let raw: String = row.try_get(column)?;
    Ok(serde_json::from_str(&raw)?)
}

fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| StoreError::Corrupt(format!("{column} {raw:?}: {error}")))
}

fn ordinal(row: &SqliteRow, column: &str) -> Result<u32, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u32::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{column} out of range: {raw}")))
}

fn embedding(row: &SqliteRow) -> Result<Option<Vec<f32>>, StoreError> {
    let raw: Option<Vec<u8>> = row.try_get("embedding")?;
    raw.as_deref().map(decode_embedding).transpose()
}

fn row_to_deck(row: &SqliteRow) -> Result<Deck, StoreError> {
    Ok(Deck {
        id: row.try_get("id")?,
        source_ref: row.try_get("source_ref")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        themes: json_list(row, "themes")?,
        audiences: json_list(row, "audiences")?,
        use_cases: json_list(row, "use_cases")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn row_to_topic(row: &SqliteRow) -> Result<Topic, StoreError> {
    Ok(Topic {
        id: row.try_get("id")?,
        deck_id: row.try_get("deck_id")?,
        position: ordinal(row, "position")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        context: row.try_get("context")?,
        tags: json_list(row, "tags")?,
        reuse: json_list(row, "reuse")?,
        slide_numbers: json_list(row, "slide_numbers")?,
        embedding: embedding(row)?,
        embedding_pending: row.try_get("embedding_pending")?,
        created_at: timestamp(row, "created_at")?,
    })
}

fn row_to_slide(row: &SqliteRow) -> Result<Slide, StoreError> {
    Ok(Slide {
        id: row.try_get("id")?,
        deck_id: row.try_get("deck_id")?,
        number: ordinal(row, "number")?,
        caption: row.try_get("caption")?,
        slide_type: row.try_get("slide_type")?,
        tags: json_list(row, "tags")?,
        reusable: row.try_get("reusable")?,
        embedding: embedding(row)?,
        embedding_pending: row.try_get("embedding_pending")?,
    })
}
