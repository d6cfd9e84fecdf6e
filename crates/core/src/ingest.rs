use crate::embeddings::EmbeddingGenerator;
use crate::extractor::{ExtractionMethod, PageText, PdfExtractor};
use crate::labeler::{DeckLabeler, DeckLabels, TopicLabel};
use crate::lexical::normalize_whitespace;
use crate::models::{Deck, DeckRecord, IngestionOptions, Slide, Topic, UnitKind};
use crate::retry::retry_with_backoff;
use crate::single_flight::SingleFlight;
use crate::traits::DeckRepository;
use crate::IngestError;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable deck id for a source reference.
pub fn deck_id_for_source(source_ref: &str) -> String {
    sha256_hex(source_ref)
}

/// Stable id for the `ordinal`-th unit of `kind` in a deck.
pub fn unit_id(deck_id: &str, kind: UnitKind, ordinal: u32) -> String {
    sha256_hex(&format!("{deck_id}:{}:{ordinal}", kind.as_str()))
}

/// Title used when the labeler gives none: the file stem of the source reference.
pub fn source_title(source_ref: &str) -> String {
    Path::new(source_ref)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.trim().is_empty())
        .unwrap_or(source_ref)
        .to_string()
}

/// Drops slide numbers outside `1..=page_count`, sorts and dedups the rest, and
/// drops topics left without slides.
pub fn normalize_topics(topics: Vec<TopicLabel>, page_count: usize) -> Vec<TopicLabel> {
    topics
        .into_iter()
        .filter_map(|mut topic| {
            let numbers: BTreeSet<u32> = topic
                .slide_numbers
                .iter()
                .copied()
                .filter(|number| (1..=page_count as u32).contains(number))
                .collect();
            if numbers.is_empty() {
                return None;
            }
            topic.slide_numbers = numbers.into_iter().collect();
            Some(topic)
        })
        .collect()
}

/// Caption derived from the slide's own text.
pub fn fallback_caption(text: &str, max_chars: usize) -> String {
    normalize_whitespace(text).chars().take(max_chars).collect()
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FolderIngestReport {
    pub decks: Vec<Deck>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Turns raw decks into persisted, searchable records.
pub struct Ingestor {
    extractor: Arc<dyn PdfExtractor>,
    labeler: Arc<dyn DeckLabeler>,
    embedder: Arc<dyn EmbeddingGenerator>,
    repository: Arc<dyn DeckRepository>,
    options: IngestionOptions,
    in_flight: SingleFlight<Result<Deck, IngestError>>,
}

impl Ingestor {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        labeler: Arc<dyn DeckLabeler>,
        embedder: Arc<dyn EmbeddingGenerator>,
        repository: Arc<dyn DeckRepository>,
        options: IngestionOptions,
    ) -> Self {
        Self {
            extractor,
            labeler,
            embedder,
            repository,
            options,
            in_flight: SingleFlight::new(),
        }
    }

    /// Ingests one document. Concurrent calls for the same source share a single
    /// run and all receive its result.
    pub async fn ingest(&self, source_ref: &str, document: Vec<u8>) -> Result<Deck, IngestError> {
        self.in_flight
            .run(source_ref, || self.run_pipeline(source_ref, document))
            .await
    }

    /// Like [`Ingestor::ingest`] but fails with `IngestionInProgress` instead of
    /// waiting when the source is already being ingested.
    pub async fn try_ingest(
        &self,
        source_ref: &str,
        document: Vec<u8>,
    ) -> Result<Deck, IngestError> {
        self.in_flight
            .try_run(source_ref, || self.run_pipeline(source_ref, document))
            .await
            .unwrap_or_else(|| Err(IngestError::IngestionInProgress(source_ref.to_string())))
    }

    /// Reads a PDF from disk and ingests it with its path as source reference.
    pub async fn ingest_file(&self, path: &Path) -> Result<Deck, IngestError> {
        let document = tokio::fs::read(path).await.map_err(|error| {
            IngestError::InvalidArgument(format!("cannot read {}: {error}", path.display()))
        })?;
        self.ingest(&path.to_string_lossy(), document).await
    }

    /// Ingests every PDF under `folder`. Per-file failures are collected and do
    /// not stop the batch.
    pub async fn ingest_folder(&self, folder: &Path) -> Result<FolderIngestReport, IngestError> {
        let files = discover_pdf_files(folder);
        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        let mut report = FolderIngestReport::default();
        for path in files {
            match self.ingest_file(&path).await {
                Ok(deck) => report.decks.push(deck),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "skipping pdf");
                    report.skipped_files.push(SkippedPdf {
                        path,
                        reason: error.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn run_pipeline(&self, source_ref: &str, document: Vec<u8>) -> Result<Deck, IngestError> {
        if source_ref.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "source reference is empty".to_string(),
            ));
        }
        if document.len() > self.options.max_document_bytes {
            return Err(IngestError::DocumentTooLarge(format!(
                "{} bytes exceeds the {} byte limit",
                document.len(),
                self.options.max_document_bytes
            )));
        }

        let deck_id = deck_id_for_source(source_ref);
        let pages = self.extract(document).await?;
        info!(source_ref, deck_id = %deck_id, page_count = pages.len(), "deck extracted");

        let labels = retry_with_backoff(&self.options.labeling_retry, "label_deck", || {
            self.labeler.label_deck(&pages)
        })
        .await?;

        let now = Utc::now();
        let created_at = self
            .repository
            .deck_by_source(source_ref)
            .await?
            .map(|deck| deck.created_at)
            .unwrap_or(now);

        let mut record = self.build_record(source_ref, &deck_id, &pages, labels, created_at, now);
        self.embed_units(&mut record).await;

        self.repository.replace_deck(&record).await?;
        info!(
            deck_id = %deck_id,
            topic_count = record.topics.len(),
            slide_count = record.slides.len(),
            pending_embeddings = record.pending_embeddings(),
            "deck ingested"
        );

        Ok(record.deck)
    }

    async fn extract(&self, document: Vec<u8>) -> Result<Vec<PageText>, IngestError> {
        let extractor = Arc::clone(&self.extractor);
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&document))
            .await
            .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))??;

        if extraction.pages.is_empty() {
            return Err(IngestError::EmptyDocument);
        }
        if extraction.pages.len() > self.options.max_pages {
            return Err(IngestError::DocumentTooLarge(format!(
                "{} pages exceeds the {} page limit",
                extraction.pages.len(),
                self.options.max_pages
            )));
        }
        if extraction.method == ExtractionMethod::Proportional {
            warn!(
                page_count = extraction.pages.len(),
                "page text split proportionally, slide attribution is approximate"
            );
        }
        Ok(extraction.pages)
    }

    fn build_record(
        &self,
        source_ref: &str,
        deck_id: &str,
        pages: &[PageText],
        labels: DeckLabels,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DeckRecord {
        let DeckLabels {
            deck: metadata,
            topics,
            slides: mut slide_labels,
        } = labels;

        let deck = Deck {
            id: deck_id.to_string(),
            source_ref: source_ref.to_string(),
            title: non_empty(metadata.deck_title).unwrap_or_else(|| source_title(source_ref)),
            summary: metadata.deck_summary.trim().to_string(),
            themes: metadata.main_themes,
            audiences: metadata.primary_audiences,
            use_cases: metadata.use_cases_for_other_presentations,
            created_at,
            updated_at: now,
        };

        let topics = normalize_topics(topics, pages.len())
            .into_iter()
            .enumerate()
            .map(|(position, label)| {
                let position = position as u32;
                Topic {
                    id: unit_id(deck_id, UnitKind::Topic, position),
                    deck_id: deck_id.to_string(),
                    position,
                    title: label.topic_title.trim().to_string(),
                    summary: label.topic_summary.trim().to_string(),
                    context: label.story_context.trim().to_string(),
                    tags: label.topics,
                    reuse: label.reuse_suggestions,
                    slide_numbers: label.slide_numbers,
                    embedding: None,
                    embedding_pending: false,
                    created_at,
                }
            })
            .collect();

        let slides = pages
            .iter()
            .map(|page| {
                let label = slide_labels.remove(&page.number);
                let caption = label
                    .as_ref()
                    .and_then(|label| non_empty(label.slide_caption.clone()))
                    .unwrap_or_else(|| {
                        fallback_caption(&page.text, self.options.fallback_caption_chars)
                    });
                let (slide_type, tags, reusable) = match label {
                    Some(label) => (
                        non_empty(label.slide_type),
                        label.topics,
                        non_empty(label.reusable),
                    ),
                    None => (None, Vec::new(), None),
                };

                Slide {
                    id: unit_id(deck_id, UnitKind::Slide, page.number),
                    deck_id: deck_id.to_string(),
                    number: page.number,
                    caption,
                    slide_type,
                    tags,
                    reusable,
                    embedding: None,
                    embedding_pending: false,
                }
            })
            .collect();

        DeckRecord {
            deck,
            topics,
            slides,
        }
    }

    async fn embed_units(&self, record: &mut DeckRecord) {
        for topic in &mut record.topics {
            topic.embedding = self.embed_unit(&topic.embedding_text(), &topic.id).await;
            topic.embedding_pending = topic.embedding.is_none();
        }
        for slide in &mut record.slides {
            slide.embedding = self.embed_unit(&slide.embedding_text(), &slide.id).await;
            slide.embedding_pending = slide.embedding.is_none();
        }
    }

    async fn embed_unit(&self, text: &str, unit_id: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            warn!(unit_id, "unit has no text to embed");
            return None;
        }

        match retry_with_backoff(&self.options.embedding_retry, "embed_unit", || {
            self.embedder.embed(text)
        })
        .await
        {
            Ok(vector) => Some(vector),
            Err(error) => {
                warn!(unit_id, error = %error, "embedding failed, unit stored as pending");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, LabelingError};
    use crate::extractor::tests::build_pdf;
    use crate::extractor::{Extraction, LopdfExtractor};
    use crate::labeler::{DeckMetadata, SlideLabel};
    use crate::retry::RetryPolicy;
    use crate::stores::MemoryDeckStore;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Notify;

    fn slide_label(caption: &str) -> SlideLabel {
        SlideLabel {
            slide_type: "content".to_string(),
            slide_caption: caption.to_string(),
            topics: vec!["planning".to_string()],
            reusable: "yes".to_string(),
        }
    }

    fn topic_label(title: &str, slides: Vec<u32>) -> TopicLabel {
        TopicLabel {
            topic_title: title.to_string(),
            topic_summary: format!("{title} summary"),
            story_context: "context".to_string(),
            topics: vec!["strategy".to_string()],
            reuse_suggestions: vec!["kickoffs".to_string()],
            slide_numbers: slides,
        }
    }

    /// Labels slides 1 and 3 only, with one valid and one out-of-range topic.
    #[derive(Default)]
    struct ScriptedLabeler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeckLabeler for ScriptedLabeler {
        async fn label_deck(&self, slides: &[PageText]) -> Result<DeckLabels, LabelingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut labels = BTreeMap::new();
            for slide in slides.iter().filter(|slide| slide.number != 2) {
                labels.insert(slide.number, slide_label(&format!("Caption {}", slide.number)));
            }
            Ok(DeckLabels {
                deck: DeckMetadata {
                    deck_title: "Annual plan".to_string(),
                    deck_summary: "Plan for next year".to_string(),
                    main_themes: vec!["growth".to_string()],
                    primary_audiences: vec!["leadership".to_string()],
                    use_cases_for_other_presentations: Vec::new(),
                },
                topics: vec![
                    topic_label("Goals", vec![3, 1, 1, 9]),
                    topic_label("Ghost", vec![0, 42]),
                ],
                slides: labels,
            })
        }
    }

    #[derive(Default)]
    struct FailingLabeler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DeckLabeler for FailingLabeler {
        async fn label_deck(&self, _slides: &[PageText]) -> Result<DeckLabels, LabelingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(LabelingError::Request("rate limited".to_string()))
        }
    }

    /// Blocks its first call until released.
    #[derive(Default)]
    struct GatedLabeler {
        calls: AtomicUsize,
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl DeckLabeler for GatedLabeler {
        async fn label_deck(&self, slides: &[PageText]) -> Result<DeckLabels, LabelingError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.started.notify_one();
                self.release.notified().await;
            }
            ScriptedLabeler::default().label_deck(slides).await
        }
    }

    /// Fails for any text containing `poison`.
    struct PickyEmbedder {
        poison: &'static str,
    }

    #[async_trait]
    impl EmbeddingGenerator for PickyEmbedder {
        fn dimensions(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains(self.poison) {
                return Err(EmbeddingError::Request("timeout".to_string()));
            }
            Ok(vec![text.len() as f32, 1.0, 0.0])
        }
    }

    struct TooManyPages;

    impl PdfExtractor for TooManyPages {
        fn extract(&self, _document: &[u8]) -> Result<Extraction, IngestError> {
            Ok(Extraction {
                pages: (1..=5)
                    .map(|number| PageText {
                        number,
                        text: format!("page {number}"),
                    })
                    .collect(),
                method: ExtractionMethod::PageAccurate,
            })
        }
    }

    fn fast_options() -> IngestionOptions {
        IngestionOptions {
            labeling_retry: RetryPolicy::immediate(3),
            embedding_retry: RetryPolicy::immediate(2),
            ..IngestionOptions::default()
        }
    }

    fn ingestor(
        labeler: Arc<dyn DeckLabeler>,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<MemoryDeckStore>,
    ) -> Ingestor {
        Ingestor::new(
            Arc::new(LopdfExtractor),
            labeler,
            embedder,
            store,
            fast_options(),
        )
    }

    fn three_page_deck() -> Vec<u8> {
        build_pdf(&[Some("Welcome"), None, Some("Closing thoughts")])
    }

    #[tokio::test]
    async fn blank_page_keeps_its_slide_with_a_placeholder() {
        let store = Arc::new(MemoryDeckStore::new());
        let ingestor = ingestor(
            Arc::new(ScriptedLabeler::default()),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        );

        let deck = ingestor
            .ingest("decks/annual-plan.pdf", three_page_deck())
            .await
            .unwrap();

        assert_eq!(deck.id, deck_id_for_source("decks/annual-plan.pdf"));
        assert_eq!(deck.title, "Annual plan");

        let record = store.deck(&deck.id).await.unwrap().unwrap();
        let numbers: Vec<u32> = record.slides.iter().map(|slide| slide.number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(record.slides[1].caption, "Slide 2");
        assert_eq!(record.slides[1].slide_type, None);
        assert_eq!(record.slides[0].caption, "Caption 1");

        assert_eq!(record.topics.len(), 1);
        assert_eq!(record.topics[0].title, "Goals");
        assert_eq!(record.topics[0].slide_numbers, vec![1, 3]);
        assert_eq!(record.pending_embeddings(), 0);
    }

    #[tokio::test]
    async fn reingesting_replaces_instead_of_duplicating() {
        let store = Arc::new(MemoryDeckStore::new());
        let ingestor = ingestor(
            Arc::new(ScriptedLabeler::default()),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        );

        let first = ingestor.ingest("plan.pdf", three_page_deck()).await.unwrap();
        let before = store.deck(&first.id).await.unwrap().unwrap();
        let second = ingestor.ingest("plan.pdf", three_page_deck()).await.unwrap();
        let after = store.deck(&second.id).await.unwrap().unwrap();

        assert_eq!(store.deck_count().await, 1);
        assert_eq!(first.id, second.id);
        assert_eq!(after.deck.created_at, before.deck.created_at);
        assert!(after.deck.updated_at >= before.deck.updated_at);
        assert_eq!(after.topics, before.topics);
        assert_eq!(after.slides, before.slides);
    }

    #[tokio::test]
    async fn labeling_failure_persists_nothing() {
        let store = Arc::new(MemoryDeckStore::new());
        let labeler = Arc::new(FailingLabeler::default());
        let ingestor = ingestor(
            labeler.clone(),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        );

        let result = ingestor.ingest("plan.pdf", three_page_deck()).await;

        assert!(matches!(result, Err(IngestError::Labeling(_))));
        assert_eq!(labeler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.deck_count().await, 0);
    }

    #[tokio::test]
    async fn embedding_failure_marks_unit_pending() {
        let store = Arc::new(MemoryDeckStore::new());
        let ingestor = ingestor(
            Arc::new(ScriptedLabeler::default()),
            Arc::new(PickyEmbedder { poison: "Caption 3" }),
            store.clone(),
        );

        let deck = ingestor.ingest("plan.pdf", three_page_deck()).await.unwrap();
        let record = store.deck(&deck.id).await.unwrap().unwrap();

        let third = &record.slides[2];
        assert!(third.embedding.is_none());
        assert!(third.embedding_pending);
        assert!(record.slides[0].embedding.is_some());
        assert_eq!(record.pending_embeddings(), 1);
    }

    #[tokio::test]
    async fn unreadable_and_oversized_documents_are_rejected() {
        let store = Arc::new(MemoryDeckStore::new());
        let labeler = Arc::new(ScriptedLabeler::default());
        let ingestor = ingestor(
            labeler.clone(),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        );
        assert!(matches!(
            ingestor.ingest("broken.pdf", b"not a pdf".to_vec()).await,
            Err(IngestError::Extraction(_))
        ));

        let limited = Ingestor::new(
            Arc::new(TooManyPages),
            labeler.clone(),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
            IngestionOptions {
                max_pages: 4,
                ..fast_options()
            },
        );
        assert!(matches!(
            limited.ingest("long.pdf", b"%PDF".to_vec()).await,
            Err(IngestError::DocumentTooLarge(_))
        ));

        let tiny = Ingestor::new(
            Arc::new(TooManyPages),
            labeler.clone(),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
            IngestionOptions {
                max_document_bytes: 2,
                ..fast_options()
            },
        );
        assert!(matches!(
            tiny.ingest("big.pdf", b"%PDF".to_vec()).await,
            Err(IngestError::DocumentTooLarge(_))
        ));

        assert_eq!(labeler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.deck_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_ingests_of_one_source_share_a_run() {
        let store = Arc::new(MemoryDeckStore::new());
        let labeler = Arc::new(GatedLabeler::default());
        let ingestor = Arc::new(ingestor(
            labeler.clone(),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        ));

        let leader = tokio::spawn({
            let ingestor = ingestor.clone();
            async move { ingestor.ingest("plan.pdf", three_page_deck()).await }
        });
        labeler.started.notified().await;

        let follower = tokio::spawn({
            let ingestor = ingestor.clone();
            async move { ingestor.ingest("plan.pdf", three_page_deck()).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(matches!(
            ingestor.try_ingest("plan.pdf", three_page_deck()).await,
            Err(IngestError::IngestionInProgress(_))
        ));

        labeler.release.notify_one();
        let leader = leader.await.unwrap().unwrap();
        let follower = follower.await.unwrap().unwrap();

        assert_eq!(leader, follower);
        assert_eq!(labeler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.deck_count().await, 1);
    }

    #[tokio::test]
    async fn aborted_ingest_does_not_block_the_source() {
        let store = Arc::new(MemoryDeckStore::new());
        let labeler = Arc::new(GatedLabeler::default());
        let ingestor = Arc::new(ingestor(
            labeler.clone(),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        ));

        let stuck = tokio::spawn({
            let ingestor = ingestor.clone();
            async move { ingestor.ingest("plan.pdf", three_page_deck()).await }
        });
        labeler.started.notified().await;
        stuck.abort();
        assert!(stuck.await.unwrap_err().is_cancelled());

        let deck = ingestor
            .try_ingest("plan.pdf", three_page_deck())
            .await
            .unwrap();

        assert_eq!(deck.title, "Annual plan");
        assert_eq!(labeler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.deck_count().await, 1);
    }

    #[tokio::test]
    async fn folder_ingestion_skips_bad_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("good.pdf"), three_page_deck())?;
        File::create(nested.join("broken.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%broken"))?;
        fs::write(dir.path().join("notes.txt"), b"not a deck")?;

        let store = Arc::new(MemoryDeckStore::new());
        let ingestor = ingestor(
            Arc::new(ScriptedLabeler::default()),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            store.clone(),
        );

        assert_eq!(discover_pdf_files(dir.path()).len(), 2);
        let report = ingestor.ingest_folder(dir.path()).await?;

        assert_eq!(report.decks.len(), 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("broken.PDF")
        );
        Ok(())
    }

    #[tokio::test]
    async fn empty_folder_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let ingestor = ingestor(
            Arc::new(ScriptedLabeler::default()),
            Arc::new(PickyEmbedder { poison: "\u{0}" }),
            Arc::new(MemoryDeckStore::new()),
        );
        assert!(matches!(
            ingestor.ingest_folder(dir.path()).await,
            Err(IngestError::InvalidArgument(_))
        ));
        Ok(())
    }

    #[test]
    fn ids_and_titles_are_deterministic() {
        let deck_id = deck_id_for_source("decks/q3.pdf");
        assert_eq!(deck_id, deck_id_for_source("decks/q3.pdf"));
        assert_ne!(
            unit_id(&deck_id, UnitKind::Topic, 1),
            unit_id(&deck_id, UnitKind::Slide, 1)
        );
        assert_eq!(source_title("decks/q3 review.pdf"), "q3 review");
    }

    #[test]
    fn fallback_caption_is_trimmed_and_bounded() {
        assert_eq!(fallback_caption("  Revenue\n\n by   region ", 200), "Revenue by region");
        assert_eq!(fallback_caption("abcdef", 3), "abc");
    }
}
