//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for a file or directory: discovery → parse
//! (on a blocking thread) → embed → id assignment → batched upsert. One bad
//! file never stops a run; a fatal error (model, dimension, persistent store
//! failure) aborts it, and units already committed stay committed.
//!
//! Pending units are written in store calls of at most `index_batch_size`
//! units. A file is reported as processed only once all of its units are
//! committed, and `total_units_indexed` counts exactly the committed units.

use globset::GlobSet;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::{audio_units, Transcriber};
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{IndexError, Result};
use crate::extract::{extract_sections, ExtractError, FileKind};
use crate::identity::make_id;
use crate::images;
use crate::indexer::Indexer;
use crate::models::{ContentUnit, ParsedUnit, RunReport, TextUnitMeta, UnitContent, UnitMeta};
use crate::retry::{with_retry, RetryPolicy};
use crate::scan::{build_excludes, scan_path};
use crate::store::VectorStore;

/// Tunables for a [`Pipeline`], usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub segment_secs: f64,
    pub embed_batch_size: usize,
    pub index_batch_size: usize,
    pub retry: RetryPolicy,
    pub exclude_globs: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_chars: config.chunking.max_chars,
            overlap_chars: config.chunking.overlap_chars,
            segment_secs: config.audio.segment_secs,
            embed_batch_size: config.embedding.batch_size.max(1),
            index_batch_size: config.indexing.batch_size.max(1),
            retry: RetryPolicy::from_config(&config.indexing),
            exclude_globs: config.indexing.exclude_globs.clone(),
        }
    }
}

pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    transcriber: Arc<dyn Transcriber>,
    indexer: Indexer,
    options: PipelineOptions,
    excludes: GlobSet,
}

/// Units of files that parsed and embedded but are not yet committed.
#[derive(Default)]
struct Pending {
    units: Vec<ContentUnit>,
    /// Files in unit order, with the number of units each contributed.
    files: Vec<(String, usize)>,
}

impl Pipeline {
    /// Opens (or creates) the collection for the embedder's dimension.
    ///
    /// Fails with `ModelUnavailable` for an embedder without a vector space
    /// and with `DimensionMismatch` when the collection was created with a
    /// different dimension; nothing is written in either case.
    pub async fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        transcriber: Arc<dyn Transcriber>,
        options: PipelineOptions,
    ) -> Result<Self> {
        if embedder.dims() == 0 {
            return Err(IndexError::ModelUnavailable(format!(
                "embedder '{}' has no vector space",
                embedder.model_name()
            )));
        }
        let excludes = build_excludes(&options.exclude_globs)?;
        let indexer = with_retry(&options.retry, "open collection", || {
            Indexer::open(store.clone(), embedder.dims(), embedder.model_name())
        })
        .await?;
        Ok(Self {
            embedder,
            transcriber,
            indexer,
            options,
            excludes,
        })
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Ingests a file or directory tree.
    ///
    /// Only a missing `path` is an error; everything else is reported in the
    /// returned [`RunReport`].
    pub async fn ingest_path(&self, path: &Path, cancel: &CancellationToken) -> Result<RunReport> {
        let scan = scan_path(path, &self.excludes)?;
        info!(path = %path.display(), files = scan.files.len(), "ingestion started");

        let mut report = RunReport::new();
        let mut pending = Pending::default();
        // source_file -> root-relative path of the file that claimed it.
        let mut claimed: HashMap<String, String> = HashMap::new();

        for file in &scan.files {
            if cancel.is_cancelled() {
                warn!("ingestion cancelled");
                report.abort("cancelled");
                break;
            }

            let source_file = scan.source_file(file);
            let Some(kind) = FileKind::from_path(file) else {
                debug!(file = %source_file, "no parser for file, skipping");
                report.files_skipped.push(source_file);
                continue;
            };

            let relative = scan.relative(file);
            if let Some(first) = claimed.get(&source_file) {
                warn!(file = %relative, first = %first, "file name already ingested in this run");
                report.record_failure(
                    relative,
                    format!("file name '{}' clashes with {}", source_file, first),
                );
                continue;
            }
            claimed.insert(source_file.clone(), relative);

            match self.ingest_file(file, &source_file, kind).await {
                Ok(units) => {
                    info!(file = %source_file, units = units.len(), "file parsed");
                    pending.files.push((source_file, units.len()));
                    pending.units.extend(units);
                    if pending.units.len() >= self.options.index_batch_size
                        && !self.flush(&mut pending, &mut report).await
                    {
                        break;
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(file = %source_file, error = %e, "fatal error, aborting ingestion");
                    report.record_failure(&source_file, e.to_string());
                    report.abort(e.to_string());
                    break;
                }
                Err(e) => {
                    warn!(file = %source_file, error = %e, "failed to ingest file");
                    report.record_failure(&source_file, e.to_string());
                }
            }
        }

        // Committed work from files that completed before an abort is kept.
        if !pending.files.is_empty() {
            self.flush(&mut pending, &mut report).await;
        }

        report.finish();
        info!(
            processed = report.files_processed.len(),
            failed = report.files_failed.len(),
            skipped = report.files_skipped.len(),
            units = report.total_units_indexed,
            status = ?report.status,
            "ingestion finished"
        );
        Ok(report)
    }

    /// Writes all pending units in store calls of at most
    /// `index_batch_size` units. Returns false when a write failed for good;
    /// the run is then aborted, files whose units were not all committed are
    /// recorded as failed, and committed units stay counted.
    async fn flush(&self, pending: &mut Pending, report: &mut RunReport) -> bool {
        let units = std::mem::take(&mut pending.units);
        let mut files: VecDeque<(String, usize, usize)> = VecDeque::new();
        let mut offset = 0;
        for (file, n) in pending.files.drain(..) {
            files.push_back((file, offset, offset + n));
            offset += n;
        }

        let mut committed = 0;
        loop {
            while files.front().is_some_and(|(_, _, end)| *end <= committed) {
                if let Some((file, _, _)) = files.pop_front() {
                    report.files_processed.push(file);
                }
            }
            if committed == units.len() {
                break;
            }

            let batch_end = (committed + self.options.index_batch_size).min(units.len());
            let batch = &units[committed..batch_end];
            match with_retry(&self.options.retry, "upsert", || self.indexer.upsert(batch)).await {
                Ok(written) => {
                    debug!(units = written, "sub-batch committed");
                    report.total_units_indexed += written;
                    committed = batch_end;
                }
                Err(e) => {
                    error!(error = %e, files = files.len(), "store write failed, aborting ingestion");
                    for (file, start, end) in files {
                        let reason = if start < committed {
                            format!(
                                "partially committed ({} of {} units): {}",
                                committed - start,
                                end - start,
                                e
                            )
                        } else {
                            format!("not committed: {}", e)
                        };
                        report.record_failure(file, reason);
                    }
                    report.abort(e.to_string());
                    return false;
                }
            }
        }
        info!(units = committed, "batch committed");
        true
    }

    /// Parses, embeds and identifies the units of one file.
    async fn ingest_file(
        &self,
        path: &Path,
        source_file: &str,
        kind: FileKind,
    ) -> Result<Vec<ContentUnit>> {
        let parsed = match kind {
            FileKind::Audio => {
                let segments = self.transcriber.transcribe(path).await?;
                debug!(file = %source_file, segments = segments.len(), "transcribed");
                audio_units(source_file, segments, self.options.segment_secs)
            }
            _ => {
                let bytes = tokio::fs::read(path).await?;
                let sf = source_file.to_string();
                let (max_chars, overlap_chars) =
                    (self.options.max_chars, self.options.overlap_chars);
                tokio::task::spawn_blocking(move || {
                    parse_bytes(&sf, bytes, kind, max_chars, overlap_chars)
                })
                .await
                .map_err(|e| IndexError::parse(source_file, ExtractError::Panicked(e.to_string())))?
                .map_err(|e| IndexError::parse(source_file, e))?
            }
        };

        let units = self.embed_units(source_file, parsed).await?;
        self.indexer.validate(&units)?;
        Ok(units)
    }

    async fn embed_units(
        &self,
        source_file: &str,
        parsed: Vec<ParsedUnit>,
    ) -> Result<Vec<ContentUnit>> {
        let dims = self.embedder.dims();
        let mut units = Vec::with_capacity(parsed.len());

        for batch in parsed.chunks(self.options.embed_batch_size) {
            let contents: Vec<UnitContent> = batch.iter().map(|p| p.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&contents).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            for (unit, vector) in batch.iter().zip(vectors) {
                if vector.len() != dims {
                    return Err(IndexError::DimensionMismatch {
                        collection: self.indexer.store().collection().to_string(),
                        expected: dims,
                        actual: vector.len(),
                    });
                }
                units.push(ContentUnit {
                    id: make_id(source_file, unit.meta.kind(), unit.index),
                    vector,
                    document_text: unit.document_text.clone(),
                    meta: unit.meta.clone(),
                });
            }
        }
        Ok(units)
    }
}

/// Splits a document or image file into parsed units.
///
/// Text chunks are numbered across the whole document; `chunk_index`
/// restarts on every page.
pub fn parse_bytes(
    source_file: &str,
    bytes: Vec<u8>,
    kind: FileKind,
    max_chars: usize,
    overlap_chars: usize,
) -> std::result::Result<Vec<ParsedUnit>, ExtractError> {
    if kind == FileKind::Image {
        return Ok(vec![images::image_unit(source_file, bytes)?]);
    }

    let sections = extract_sections(&bytes, kind)?;
    let mut units = Vec::new();
    for section in sections {
        let chunks = chunk_text(&section.text, max_chars, overlap_chars);
        debug!(file = %source_file, page = ?section.page, chunks = chunks.len(), "section chunked");
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            units.push(ParsedUnit {
                index: units.len(),
                content: UnitContent::Text(chunk.text.clone()),
                document_text: chunk.text,
                meta: UnitMeta::Text(TextUnitMeta {
                    source_file: source_file.to_string(),
                    page: section.page,
                    chunk_index: chunk_index as u32,
                    start_char: chunk.start_char as u64,
                    end_char: chunk.end_char as u64,
                }),
            });
        }
    }
    Ok(units)
}
