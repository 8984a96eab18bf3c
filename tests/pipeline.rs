//! End-to-end ingestion and retrieval through the library API.
//!
//! Fixtures are generated in-test: PDFs with `lopdf`, DOCX with `zip`,
//! images with `image`. Embeddings come from the deterministic hash
//! embedder, so no model files are needed.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use multimodal_index::audio::{
    DisabledTranscriber, Transcriber, TranscriptSegment, WhisperHttpTranscriber,
};
use multimodal_index::config::TranscriptionConfig;
use multimodal_index::embedding::{Embedder, HashEmbedder};
use multimodal_index::error::{IndexError, Result};
use multimodal_index::filter::MetadataFilter;
use multimodal_index::ingest::{Pipeline, PipelineOptions};
use multimodal_index::models::{
    ContentUnit, MetaValue, RunStatus, SearchHit, UnitContent, UnitMeta,
};
use multimodal_index::retry::RetryPolicy;
use multimodal_index::search::{Query, Retriever};
use multimodal_index::store::{CollectionInfo, InMemoryStore, SqliteStore, VectorStore};

const DIMS: usize = 64;

// ============ fixtures ============

/// A PDF with one line of Helvetica text per page.
fn pdf_bytes(pages: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

fn docx_bytes(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{}</w:t></w:r></w:p>", p))
        .collect();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    );
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(xml.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf.into_inner()
}

fn jpeg_bytes(w: u32, h: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, y| {
        image::Rgb([rgb[0], rgb[1].wrapping_add(x as u8), rgb[2].wrapping_add(y as u8)])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

/// Every page has two words that do not fit one 20-char chunk together.
const REPORT_PAGES: [&str; 3] = [
    "photosynthesis chloroplasts",
    "thermodynamics entropy",
    "stratovolcanoes pyroclastic",
];

fn options() -> PipelineOptions {
    PipelineOptions {
        max_chars: 20,
        overlap_chars: 0,
        retry: RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

fn embedder() -> Arc<dyn Embedder> {
    Arc::new(HashEmbedder::new(DIMS))
}

async fn pipeline_with(
    store: Arc<dyn VectorStore>,
    transcriber: Arc<dyn Transcriber>,
    options: PipelineOptions,
) -> Pipeline {
    Pipeline::new(store, embedder(), transcriber, options)
        .await
        .unwrap()
}

async fn pipeline(store: Arc<dyn VectorStore>) -> Pipeline {
    pipeline_with(store, Arc::new(DisabledTranscriber), options()).await
}

fn write_report_dir(dir: &Path) {
    fs::write(dir.join("report.pdf"), pdf_bytes(&REPORT_PAGES)).unwrap();
    fs::write(dir.join("photo.jpg"), jpeg_bytes(32, 24, [200, 40, 10])).unwrap();
}

async fn all_ids(store: &Arc<dyn VectorStore>) -> Vec<String> {
    let probe = vec![1.0f32; DIMS];
    let hits = store
        .query(&probe, 1000, &MetadataFilter::new())
        .await
        .unwrap();
    let mut ids: Vec<String> = hits.into_iter().map(|h| h.unit.id).collect();
    ids.sort();
    ids
}

fn text_of(unit: &ContentUnit) -> &str {
    unit.document_text.as_str()
}

// ============ scenarios ============

#[tokio::test]
async fn report_and_photo_produce_exact_ids() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;

    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::FullyIndexed);
    assert_eq!(report.files_processed, vec!["photo.jpg", "report.pdf"]);
    assert!(report.files_failed.is_empty());
    assert_eq!(report.total_units_indexed, 7);
    assert_eq!(
        all_ids(&store).await,
        vec![
            "photo.jpg_image_0",
            "report.pdf_chunk_0",
            "report.pdf_chunk_1",
            "report.pdf_chunk_2",
            "report.pdf_chunk_3",
            "report.pdf_chunk_4",
            "report.pdf_chunk_5",
        ]
    );

    let chunk3 = store.get("report.pdf_chunk_3").await.unwrap().unwrap();
    match &chunk3.meta {
        UnitMeta::Text(m) => {
            assert_eq!(m.source_file, "report.pdf");
            assert_eq!(m.page, Some(2));
            assert_eq!(m.chunk_index, 1);
        }
        other => panic!("unexpected meta {:?}", other),
    }
    assert_eq!(text_of(&chunk3), "entropy");

    let photo = store.get("photo.jpg_image_0").await.unwrap().unwrap();
    assert_eq!(photo.document_text, "N/A");
    let meta = photo.metadata();
    assert_eq!(meta["type"], MetaValue::from("image"));
    assert_eq!(meta["format"], MetaValue::from("jpg"));
    assert_eq!(meta["width"], MetaValue::Int(32));
    assert_eq!(meta["height"], MetaValue::Int(24));
}

#[tokio::test]
async fn reingestion_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let db = tmp.path().join("state").join("mmi.sqlite");
    let docs = tmp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    write_report_dir(&docs);

    let store: Arc<dyn VectorStore> =
        Arc::new(SqliteStore::open(&db, "multimodal_collection").await.unwrap());
    let p = pipeline(store.clone()).await;
    p.ingest_path(&docs, &CancellationToken::new()).await.unwrap();
    let first_ids = all_ids(&store).await;
    let first_chunk = store.get("report.pdf_chunk_0").await.unwrap().unwrap();

    let again = p.ingest_path(&docs, &CancellationToken::new()).await.unwrap();
    assert_eq!(again.status, RunStatus::FullyIndexed);
    assert_eq!(store.count().await.unwrap(), 7);
    assert_eq!(all_ids(&store).await, first_ids);
    assert_eq!(
        store.get("report.pdf_chunk_0").await.unwrap().unwrap(),
        first_chunk
    );
}

#[tokio::test]
async fn editing_a_page_replaces_its_units_in_place() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();

    // Pages 1 and 3 hold chunks 0-1 and 4-5.
    let outside_page_2 = [
        "report.pdf_chunk_0",
        "report.pdf_chunk_1",
        "report.pdf_chunk_4",
        "report.pdf_chunk_5",
    ];
    let mut before = Vec::new();
    for id in outside_page_2 {
        before.push(store.get(id).await.unwrap().unwrap());
    }
    let old_chunk3 = store.get("report.pdf_chunk_3").await.unwrap().unwrap();

    fs::write(
        tmp.path().join("report.pdf"),
        pdf_bytes(&[REPORT_PAGES[0], "thermodynamics enthalpy", REPORT_PAGES[2]]),
    )
    .unwrap();
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 7);
    let edited = store.get("report.pdf_chunk_3").await.unwrap().unwrap();
    assert_eq!(text_of(&edited), "enthalpy");
    assert_ne!(edited.vector, old_chunk3.vector);
    for (id, old) in outside_page_2.iter().zip(&before) {
        assert_eq!(&store.get(id).await.unwrap().unwrap(), old, "{} changed", id);
    }
}

#[tokio::test]
async fn corrupt_pdf_does_not_stop_valid_docx() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("broken.pdf"), b"%PDF-1.4 this is not a pdf").unwrap();
    fs::write(
        tmp.path().join("minutes.docx"),
        docx_bytes(&["Budget approved", "Next meeting in May"]),
    )
    .unwrap();
    fs::write(tmp.path().join("archive.tar"), b"ignored").unwrap();

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::PartiallyIndexed);
    assert_eq!(report.files_processed, vec!["minutes.docx"]);
    assert_eq!(report.files_failed.len(), 1);
    assert_eq!(report.files_failed[0].file, "broken.pdf");
    assert_eq!(report.files_skipped, vec!["archive.tar"]);
    assert_eq!(
        all_ids(&store).await,
        vec!["minutes.docx_chunk_0", "minutes.docx_chunk_1"]
    );
    let first = store.get("minutes.docx_chunk_0").await.unwrap().unwrap();
    assert_eq!(text_of(&first), "Budget approved");
}

#[tokio::test]
async fn chunks_reconstruct_from_their_spans() {
    let tmp = TempDir::new().unwrap();
    let text = "The first paragraph talks about rivers.\n\nA second one covers the mountains and the valleys between them.\n\nShort end.";
    fs::write(tmp.path().join("notes.md"), text).unwrap();

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let mut opts = options();
    opts.max_chars = 50;
    opts.overlap_chars = 10;
    let p = pipeline_with(store.clone(), Arc::new(DisabledTranscriber), opts).await;
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();

    let chars: Vec<char> = text.chars().collect();
    let n = store.count().await.unwrap();
    assert!(n >= 3);
    let mut last_start = 0;
    for i in 0..n {
        let unit = store
            .get(&format!("notes.md_chunk_{}", i))
            .await
            .unwrap()
            .unwrap();
        let UnitMeta::Text(m) = &unit.meta else {
            panic!("expected text meta");
        };
        let span: String = chars[m.start_char as usize..m.end_char as usize].iter().collect();
        assert_eq!(span, unit.document_text);
        assert!(unit.document_text.chars().count() <= 50);
        assert!(m.start_char >= last_start);
        last_start = m.start_char;
    }
}

// ============ retrieval ============

#[tokio::test]
async fn every_unit_retrieves_itself_first() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();

    let retriever = Retriever::new(store.clone(), embedder(), 100);
    for (i, page) in REPORT_PAGES.iter().enumerate() {
        let first_word = page.split_whitespace().next().unwrap();
        let hits = retriever
            .search(&Query::Text(first_word.to_string()), 1, &MetadataFilter::new())
            .await
            .unwrap();
        assert_eq!(hits[0].unit.id, format!("report.pdf_chunk_{}", i * 2));
    }

    let photo = fs::read(tmp.path().join("photo.jpg")).unwrap();
    let hits = retriever
        .search(&Query::Image(photo), 1, &MetadataFilter::new())
        .await
        .unwrap();
    assert_eq!(hits[0].unit.id, "photo.jpg_image_0");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn filters_restrict_by_type_and_page() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();
    let retriever = Retriever::new(store, embedder(), 100);

    let images = retriever
        .search(
            &Query::Text("entropy".into()),
            10,
            &MetadataFilter::parse_cli(&["type=image"]).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    assert!(images.iter().all(|h| h.unit.kind().as_str() == "image"));

    let late_pages = retriever
        .search(
            &Query::Text("entropy".into()),
            10,
            &MetadataFilter::parse_cli(&["type=text", "page>=2"]).unwrap(),
        )
        .await
        .unwrap();
    let mut ids: Vec<&str> = late_pages.iter().map(|h| h.unit.id.as_str()).collect();
    ids.sort();
    assert_eq!(
        ids,
        vec![
            "report.pdf_chunk_2",
            "report.pdf_chunk_3",
            "report.pdf_chunk_4",
            "report.pdf_chunk_5"
        ]
    );
    assert_eq!(late_pages[0].unit.id, "report.pdf_chunk_3");
}

// ============ audio ============

struct ScriptedTranscriber {
    segments: Vec<TranscriptSegment>,
    /// Cancelled after the first transcription, when set.
    cancel_after: Option<CancellationToken>,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, _path: &Path) -> Result<Vec<TranscriptSegment>> {
        if let Some(token) = &self.cancel_after {
            token.cancel();
        }
        Ok(self.segments.clone())
    }
}

fn seg(text: &str, start: f64, end: f64) -> TranscriptSegment {
    TranscriptSegment {
        text: text.to_string(),
        start,
        end,
    }
}

#[tokio::test]
async fn audio_segments_are_grouped_and_monotonic() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("talk.mp3"), b"fake audio").unwrap();
    let transcriber = ScriptedTranscriber {
        segments: vec![
            seg("welcome everyone", 0.0, 4.0),
            seg("to the quarterly review", 4.0, 11.0),
            seg("first item is budget", 11.0, 19.5),
            seg("closing remarks", 19.5, 23.0),
        ],
        cancel_after: None,
    };
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline_with(store.clone(), Arc::new(transcriber), options()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::FullyIndexed);

    assert_eq!(
        all_ids(&store).await,
        vec!["talk.mp3_segment_0", "talk.mp3_segment_1"]
    );
    let first = store.get("talk.mp3_segment_0").await.unwrap().unwrap();
    assert_eq!(first.document_text, "welcome everyone to the quarterly review");
    let meta = first.metadata();
    assert_eq!(meta["start_ts"], MetaValue::from("00:00:00"));
    assert_eq!(meta["end_ts"], MetaValue::from("00:00:11"));

    let second = store.get("talk.mp3_segment_1").await.unwrap().unwrap();
    match (&first.meta, &second.meta) {
        (UnitMeta::Audio(a), UnitMeta::Audio(b)) => {
            assert!(a.start < a.end);
            assert!(a.end <= b.start);
            assert!(b.start < b.end);
        }
        other => panic!("unexpected metas {:?}", other),
    }
}

#[tokio::test]
async fn disabled_transcription_fails_audio_only() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), "some notes").unwrap();
    fs::write(tmp.path().join("b.wav"), b"RIFF").unwrap();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::PartiallyIndexed);
    assert_eq!(report.files_processed, vec!["a.txt"]);
    assert_eq!(report.files_failed[0].file, "b.wav");
}

#[tokio::test]
async fn cancellation_keeps_committed_work() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.mp3"), b"fake audio").unwrap();
    fs::write(tmp.path().join("b.txt"), "never reached").unwrap();
    let cancel = CancellationToken::new();
    let transcriber = ScriptedTranscriber {
        segments: vec![seg("short clip", 0.0, 3.0)],
        cancel_after: Some(cancel.clone()),
    };
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline_with(store.clone(), Arc::new(transcriber), options()).await;

    let report = p.ingest_path(tmp.path(), &cancel).await.unwrap();
    assert_eq!(
        report.status,
        RunStatus::Aborted {
            reason: "cancelled".into()
        }
    );
    assert_eq!(report.files_processed, vec!["a.mp3"]);
    assert_eq!(all_ids(&store).await, vec!["a.mp3_segment_0"]);
}

#[tokio::test]
async fn unreachable_transcription_backend_aborts_the_run() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.mp3"), b"fake audio").unwrap();
    fs::write(tmp.path().join("b.txt"), "never reached").unwrap();

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);
    let config = TranscriptionConfig {
        provider: "whisper-http".into(),
        url: Some(format!("http://{}", addr)),
        max_retries: 0,
        ..Default::default()
    };
    let transcriber = WhisperHttpTranscriber::new(&config).unwrap();

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline_with(store.clone(), Arc::new(transcriber), options()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_aborted());
    assert_eq!(report.files_failed.len(), 1);
    assert_eq!(report.files_failed[0].file, "a.mp3");
    assert!(report.files_processed.is_empty());
    assert_eq!(store.count().await.unwrap(), 0);
}

// ============ failure handling ============

/// Delegates to an in-memory store. After `healthy` successful upserts, the
/// next `failures` upserts report the store as unavailable.
struct FlakyStore {
    inner: InMemoryStore,
    healthy: AtomicUsize,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        Self::failing_after(0, failures)
    }

    fn failing_after(healthy: usize, failures: usize) -> Self {
        Self {
            inner: InMemoryStore::default(),
            healthy: AtomicUsize::new(healthy),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    fn collection(&self) -> &str {
        self.inner.collection()
    }
    async fn ensure_collection(&self, dims: usize, model: &str) -> Result<CollectionInfo> {
        self.inner.ensure_collection(dims, model).await
    }
    async fn collection_info(&self) -> Result<Option<CollectionInfo>> {
        self.inner.collection_info().await
    }
    async fn upsert(&self, units: &[ContentUnit]) -> Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let healthy = self.healthy.load(Ordering::SeqCst);
        if healthy > 0 {
            self.healthy.store(healthy - 1, Ordering::SeqCst);
            return self.inner.upsert(units).await;
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(IndexError::StoreUnavailable("database is locked".into()));
        }
        self.inner.upsert(units).await
    }
    async fn get(&self, id: &str) -> Result<Option<ContentUnit>> {
        self.inner.get(id).await
    }
    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<SearchHit>> {
        self.inner.query(vector, k, filter).await
    }
    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let flaky = Arc::new(FlakyStore::new(2));
    let p = pipeline(flaky.clone()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::FullyIndexed);
    assert_eq!(flaky.count().await.unwrap(), 7);
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_store_failure_aborts_uncommitted_files() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let flaky = Arc::new(FlakyStore::new(usize::MAX));
    let p = pipeline(flaky.clone()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_aborted());
    assert!(report.files_processed.is_empty());
    let failed: Vec<&str> = report.files_failed.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(failed, vec!["photo.jpg", "report.pdf"]);
    assert_eq!(flaky.count().await.unwrap(), 0);
}

#[tokio::test]
async fn small_batches_commit_as_they_fill() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let flaky = Arc::new(FlakyStore::new(0));
    let mut opts = options();
    opts.index_batch_size = 1;
    let p = pipeline_with(flaky.clone(), Arc::new(DisabledTranscriber), opts).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.total_units_indexed, 7);
    // photo.jpg flushes alone; report.pdf's 6 units go in sub-batches of 1.
    assert_eq!(flaky.attempts.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn store_failure_mid_flush_reports_committed_units() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.txt"), "lead paragraph").unwrap();
    let sections: Vec<String> = (0..10).map(|i| format!("section {:02} text", i)).collect();
    fs::write(tmp.path().join("big.txt"), sections.join("\n\n")).unwrap();

    let flaky = Arc::new(FlakyStore::failing_after(1, usize::MAX));
    let mut opts = options();
    opts.index_batch_size = 4;
    let p = pipeline_with(flaky.clone(), Arc::new(DisabledTranscriber), opts).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.is_aborted());
    // The first write holds a.txt and big.txt_chunk_0..2.
    assert_eq!(flaky.count().await.unwrap(), 4);
    assert_eq!(report.total_units_indexed, 4);
    assert_eq!(report.files_processed, vec!["a.txt"]);
    assert_eq!(report.files_failed.len(), 1);
    assert_eq!(report.files_failed[0].file, "big.txt");
    assert!(
        report.files_failed[0]
            .reason
            .starts_with("partially committed (3 of 10 units)"),
        "got: {}",
        report.files_failed[0].reason
    );
    assert!(flaky.get("big.txt_chunk_2").await.unwrap().is_some());
    assert!(flaky.get("big.txt_chunk_3").await.unwrap().is_none());
}

/// Fails every call as if the model files were missing.
struct MissingModel;

#[async_trait]
impl Embedder for MissingModel {
    fn model_name(&self) -> &str {
        "clip-vit-b-32"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_batch(&self, _items: &[UnitContent]) -> Result<Vec<Vec<f32>>> {
        Err(IndexError::ModelUnavailable("no cached model files".into()))
    }
}

#[tokio::test]
async fn missing_model_aborts_before_any_write() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = Pipeline::new(
        store.clone(),
        Arc::new(MissingModel),
        Arc::new(DisabledTranscriber),
        options(),
    )
    .await
    .unwrap();
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.is_aborted());
    assert_eq!(report.files_failed.len(), 1);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn dimension_change_is_rejected_up_front() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    pipeline(store.clone()).await;
    let err = Pipeline::new(
        store,
        Arc::new(HashEmbedder::new(DIMS * 2)),
        Arc::new(DisabledTranscriber),
        options(),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, IndexError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn single_file_reingestion_matches_directory_ids() {
    let tmp = TempDir::new().unwrap();
    let nested = tmp.path().join("sub").join("notes.txt");
    fs::create_dir_all(nested.parent().unwrap()).unwrap();
    fs::write(&nested, "ridge field notes").unwrap();

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();
    assert_eq!(all_ids(&store).await, vec!["notes.txt_chunk_0"]);

    let report = p.ingest_path(&nested, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.files_processed, vec!["notes.txt"]);
    assert_eq!(store.count().await.unwrap(), 1);
    assert_eq!(all_ids(&store).await, vec!["notes.txt_chunk_0"]);
}

#[tokio::test]
async fn same_file_name_twice_in_one_run_fails_the_second() {
    let tmp = TempDir::new().unwrap();
    for dir in ["a", "b"] {
        fs::create_dir_all(tmp.path().join(dir)).unwrap();
        fs::write(tmp.path().join(dir).join("notes.txt"), format!("notes from {}", dir)).unwrap();
    }

    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store.clone()).await;
    let report = p
        .ingest_path(tmp.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::PartiallyIndexed);
    assert_eq!(report.files_processed, vec!["notes.txt"]);
    assert_eq!(report.files_failed.len(), 1);
    assert_eq!(report.files_failed[0].file, "b/notes.txt");
    assert!(report.files_failed[0].reason.contains("a/notes.txt"));
    let unit = store.get("notes.txt_chunk_0").await.unwrap().unwrap();
    assert_eq!(text_of(&unit), "notes from a");
}

#[tokio::test]
async fn missing_path_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = pipeline(store).await;
    let err = p
        .ingest_path(&tmp.path().join("absent"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::NotFound(_)));
}

#[tokio::test]
async fn concurrent_searches_see_whole_units() {
    let tmp = TempDir::new().unwrap();
    write_report_dir(tmp.path());
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryStore::default());
    let p = Arc::new(pipeline(store.clone()).await);
    let retriever = Arc::new(Retriever::new(store.clone(), embedder(), 100));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let reader = {
        let retriever = retriever.clone();
        let seen = seen.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                let hits = retriever
                    .search(&Query::Text("entropy".into()), 10, &MetadataFilter::new())
                    .await
                    .unwrap();
                for hit in hits {
                    assert_eq!(hit.unit.vector.len(), DIMS);
                    assert!(!hit.unit.document_text.is_empty());
                    seen.lock().unwrap().push(hit.unit.id);
                }
                tokio::task::yield_now().await;
            }
        })
    };
    p.ingest_path(tmp.path(), &CancellationToken::new()).await.unwrap();
    reader.await.unwrap();
    assert_eq!(store.count().await.unwrap(), 7);
}
