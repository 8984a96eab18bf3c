//! Core data models used throughout the pipeline.
//!
//! These types represent the content units, metadata, search hits, and run
//! reports that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Document text stored for image units, which carry no text of their own.
pub const IMAGE_DOCUMENT_TEXT: &str = "N/A";

/// Flat, scalar-only metadata as stored and filtered.
pub type Metadata = BTreeMap<String, MetaValue>;

/// A scalar metadata value. Never nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            MetaValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Int(i) => write!(f, "{}", i),
            MetaValue::Float(x) => write!(f, "{}", x),
            MetaValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<f64> for MetaValue {
    fn from(x: f64) -> Self {
        MetaValue::Float(x)
    }
}

/// The `type` of a content unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Text,
    Image,
    Audio,
}

impl UnitKind {
    /// Value of the `type` metadata field.
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Text => "text",
            UnitKind::Image => "image",
            UnitKind::Audio => "audio",
        }
    }

    /// Kind segment used inside unit ids (`report.pdf_chunk_0`).
    pub fn id_tag(&self) -> &'static str {
        match self {
            UnitKind::Text => "chunk",
            UnitKind::Image => "image",
            UnitKind::Audio => "segment",
        }
    }

    pub fn from_id_tag(tag: &str) -> Option<Self> {
        match tag {
            "chunk" => Some(UnitKind::Text),
            "image" => Some(UnitKind::Image),
            "segment" => Some(UnitKind::Audio),
            _ => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(UnitKind::Text),
            "image" => Some(UnitKind::Image),
            "audio" => Some(UnitKind::Audio),
            _ => None,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a text chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct TextUnitMeta {
    pub source_file: String,
    /// 1-based page (PDF) or page-break section (DOCX); `None` for formats
    /// without pages.
    pub page: Option<u32>,
    /// Index of the chunk within its page or section.
    pub chunk_index: u32,
    /// Char offsets of the chunk within its page text, end exclusive.
    pub start_char: u64,
    pub end_char: u64,
}

/// Metadata of a transcribed audio segment.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUnitMeta {
    pub source_file: String,
    /// Seconds from the start of the recording.
    pub start: f64,
    pub end: f64,
}

/// Metadata of a whole image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUnitMeta {
    pub source_file: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Typed metadata, one variant per unit `type`.
///
/// Serialized as the flat [`Metadata`] map so stored field names stay a
/// stable contract for filters (`source_file`, `type`, plus per-type keys).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Metadata", try_from = "Metadata")]
pub enum UnitMeta {
    Text(TextUnitMeta),
    Image(ImageUnitMeta),
    Audio(AudioUnitMeta),
}

impl UnitMeta {
    pub fn kind(&self) -> UnitKind {
        match self {
            UnitMeta::Text(_) => UnitKind::Text,
            UnitMeta::Image(_) => UnitKind::Image,
            UnitMeta::Audio(_) => UnitKind::Audio,
        }
    }

    pub fn source_file(&self) -> &str {
        match self {
            UnitMeta::Text(m) => &m.source_file,
            UnitMeta::Image(m) => &m.source_file,
            UnitMeta::Audio(m) => &m.source_file,
        }
    }

    /// Checks the per-type invariants. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_file().trim().is_empty() {
            return Err("empty source_file".to_string());
        }
        match self {
            UnitMeta::Text(m) => {
                if m.end_char <= m.start_char {
                    return Err(format!(
                        "empty char span {}..{}",
                        m.start_char, m.end_char
                    ));
                }
                if m.page == Some(0) {
                    return Err("page numbers start at 1".to_string());
                }
            }
            UnitMeta::Audio(m) => {
                if !m.start.is_finite() || !m.end.is_finite() {
                    return Err("non-finite timestamp".to_string());
                }
                if m.start < 0.0 || m.start >= m.end {
                    return Err(format!("invalid time range {}..{}", m.start, m.end));
                }
            }
            UnitMeta::Image(m) => {
                if m.width == 0 || m.height == 0 {
                    return Err(format!("invalid image size {}x{}", m.width, m.height));
                }
            }
        }
        Ok(())
    }

    /// Flattens into the stored metadata map.
    pub fn to_metadata(&self) -> Metadata {
        let mut map = Metadata::new();
        map.insert("source_file".into(), self.source_file().into());
        map.insert("type".into(), self.kind().as_str().into());
        match self {
            UnitMeta::Text(m) => {
                if let Some(page) = m.page {
                    map.insert("page".into(), MetaValue::Int(i64::from(page)));
                }
                map.insert("chunk_index".into(), MetaValue::Int(i64::from(m.chunk_index)));
                map.insert("start_char".into(), MetaValue::Int(m.start_char as i64));
                map.insert("end_char".into(), MetaValue::Int(m.end_char as i64));
            }
            UnitMeta::Audio(m) => {
                map.insert("start".into(), MetaValue::Float(m.start));
                map.insert("end".into(), MetaValue::Float(m.end));
                map.insert("start_ts".into(), format_timestamp(m.start).into());
                map.insert("end_ts".into(), format_timestamp(m.end).into());
            }
            UnitMeta::Image(m) => {
                map.insert("format".into(), m.format.clone().into());
                map.insert("width".into(), MetaValue::Int(i64::from(m.width)));
                map.insert("height".into(), MetaValue::Int(i64::from(m.height)));
            }
        }
        map
    }

    /// Rebuilds typed metadata from a stored map.
    pub fn from_metadata(map: &Metadata) -> Result<Self, String> {
        let source_file = get_str(map, "source_file")?.to_string();
        let kind = get_str(map, "type")?;
        let meta = match UnitKind::parse(kind) {
            Some(UnitKind::Text) => UnitMeta::Text(TextUnitMeta {
                source_file,
                page: match map.get("page") {
                    Some(_) => Some(get_uint(map, "page")? as u32),
                    None => None,
                },
                chunk_index: get_uint(map, "chunk_index")? as u32,
                start_char: get_uint(map, "start_char")?,
                end_char: get_uint(map, "end_char")?,
            }),
            Some(UnitKind::Audio) => UnitMeta::Audio(AudioUnitMeta {
                source_file,
                start: get_f64(map, "start")?,
                end: get_f64(map, "end")?,
            }),
            Some(UnitKind::Image) => UnitMeta::Image(ImageUnitMeta {
                source_file,
                format: get_str(map, "format")?.to_string(),
                width: get_uint(map, "width")? as u32,
                height: get_uint(map, "height")? as u32,
            }),
            None => return Err(format!("unknown unit type '{}'", kind)),
        };
        meta.validate()?;
        Ok(meta)
    }
}

fn get_str<'a>(map: &'a Metadata, key: &str) -> Result<&'a str, String> {
    map.get(key)
        .and_then(MetaValue::as_str)
        .ok_or_else(|| format!("missing string field '{}'", key))
}

fn get_f64(map: &Metadata, key: &str) -> Result<f64, String> {
    map.get(key)
        .and_then(MetaValue::as_f64)
        .ok_or_else(|| format!("missing numeric field '{}'", key))
}

fn get_uint(map: &Metadata, key: &str) -> Result<u64, String> {
    match map.get(key) {
        Some(MetaValue::Int(i)) if *i >= 0 => Ok(*i as u64),
        _ => Err(format!("missing non-negative integer field '{}'", key)),
    }
}

impl From<UnitMeta> for Metadata {
    fn from(meta: UnitMeta) -> Self {
        meta.to_metadata()
    }
}

impl TryFrom<Metadata> for UnitMeta {
    type Error = String;

    fn try_from(map: Metadata) -> Result<Self, Self::Error> {
        UnitMeta::from_metadata(&map)
    }
}

/// Formats seconds as `HH:MM:SS`.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Content handed to the embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitContent {
    Text(String),
    /// Encoded image file bytes.
    Image(Vec<u8>),
}

/// One unit as produced by a parser, before embedding and id assignment.
#[derive(Debug, Clone)]
pub struct ParsedUnit {
    /// Position of the unit within its file, contiguous from 0.
    pub index: usize,
    pub content: UnitContent,
    pub document_text: String,
    pub meta: UnitMeta,
}

/// The atomic indexed item.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentUnit {
    pub id: String,
    pub vector: Vec<f32>,
    pub document_text: String,
    pub meta: UnitMeta,
}

impl ContentUnit {
    pub fn kind(&self) -> UnitKind {
        self.meta.kind()
    }

    pub fn metadata(&self) -> Metadata {
        self.meta.to_metadata()
    }
}

/// Serializable view of a stored unit (vector omitted, dimension kept).
#[derive(Debug, Clone, Serialize)]
pub struct UnitResponse {
    pub id: String,
    pub document_text: String,
    pub metadata: Metadata,
    pub dims: usize,
}

impl From<&ContentUnit> for UnitResponse {
    fn from(unit: &ContentUnit) -> Self {
        Self {
            id: unit.id.clone(),
            document_text: unit.document_text.clone(),
            metadata: unit.metadata(),
            dims: unit.vector.len(),
        }
    }
}

/// A retrieval result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub unit: ContentUnit,
    /// Cosine similarity in `[-1.0, 1.0]`, higher is closer.
    pub score: f32,
}

/// Serializable search result matching the HTTP and `--json` output shape.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    pub score: f32,
    pub document_text: String,
    pub metadata: Metadata,
}

impl From<&SearchHit> for SearchResultItem {
    fn from(hit: &SearchHit) -> Self {
        Self {
            id: hit.unit.id.clone(),
            score: hit.score,
            document_text: hit.unit.document_text.clone(),
            metadata: hit.unit.metadata(),
        }
    }
}

/// A file that could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileFailure {
    pub file: String,
    pub reason: String,
}

/// Overall outcome of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    FullyIndexed,
    PartiallyIndexed,
    Aborted { reason: String },
}

/// Per-invocation summary of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub files_processed: Vec<String>,
    pub files_failed: Vec<FileFailure>,
    /// Files with no parser route (unsupported extension).
    pub files_skipped: Vec<String>,
    pub total_units_indexed: usize,
    #[serde(flatten)]
    pub status: RunStatus,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            files_processed: Vec::new(),
            files_failed: Vec::new(),
            files_skipped: Vec::new(),
            total_units_indexed: 0,
            status: RunStatus::FullyIndexed,
        }
    }

    pub fn record_failure(&mut self, file: impl Into<String>, reason: impl Into<String>) {
        self.files_failed.push(FileFailure {
            file: file.into(),
            reason: reason.into(),
        });
    }

    /// Seals the status from the collected outcomes unless the run was aborted.
    pub fn finish(&mut self) {
        if matches!(self.status, RunStatus::Aborted { .. }) {
            return;
        }
        self.status = if self.files_failed.is_empty() {
            RunStatus::FullyIndexed
        } else {
            RunStatus::PartiallyIndexed
        };
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Aborted {
            reason: reason.into(),
        };
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.status, RunStatus::Aborted { .. })
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
