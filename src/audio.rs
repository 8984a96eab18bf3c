//! Audio units: transcription and time-window grouping.
//!
//! A [`Transcriber`] turns an audio file into timestamped
//! [`TranscriptSegment`]s. [`group_segments`] then merges consecutive
//! segments into windows of at least `segment_secs` seconds; each window
//! becomes one audio unit whose text is embedded.
//!
//! Providers:
//! - **[`WhisperHttpTranscriber`]**: OpenAI-compatible
//!   `POST /v1/audio/transcriptions` with `response_format=verbose_json`.
//! - **[`DisabledTranscriber`]**: fails every file, so audio is reported as
//!   failed while the rest of a run proceeds.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TranscriptionConfig;
use crate::error::{IndexError, Result};
use crate::models::{AudioUnitMeta, ParsedUnit, UnitContent, UnitMeta};

/// One timestamped piece of transcript.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// A window of merged segments.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentGroup {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn model_name(&self) -> &str;

    /// Transcribes one file. Errors are per-file, except `ModelUnavailable`
    /// when the backend itself cannot be reached.
    async fn transcribe(&self, path: &Path) -> Result<Vec<TranscriptSegment>>;
}

/// Build the configured [`Transcriber`].
pub fn create_transcriber(config: &TranscriptionConfig) -> anyhow::Result<Arc<dyn Transcriber>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledTranscriber)),
        "whisper-http" => Ok(Arc::new(WhisperHttpTranscriber::new(config)?)),
        other => anyhow::bail!("Unknown transcription provider: {}", other),
    }
}

pub struct DisabledTranscriber;

#[async_trait]
impl Transcriber for DisabledTranscriber {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn transcribe(&self, path: &Path) -> Result<Vec<TranscriptSegment>> {
        Err(IndexError::Transcription {
            file: path.display().to_string(),
            reason: "transcription provider is disabled".to_string(),
        })
    }
}

/// Transcriber backed by an OpenAI-compatible HTTP endpoint
/// (OpenAI itself, faster-whisper-server, whisper.cpp server, ...).
pub struct WhisperHttpTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    language: Option<String>,
    max_retries: u32,
}

impl WhisperHttpTranscriber {
    pub fn new(config: &TranscriptionConfig) -> anyhow::Result<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("transcription.url required for whisper-http"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/audio/transcriptions", url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: std::env::var(&config.api_key_env).ok(),
            language: config.language.clone(),
            max_retries: config.max_retries,
        })
    }

    fn form(&self, file_name: &str, bytes: Vec<u8>) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json");
        match &self.language {
            Some(lang) => form.text("language", lang.clone()),
            None => form,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Option<Vec<TranscriptSegment>>,
}

impl VerboseTranscription {
    fn into_segments(self) -> Vec<TranscriptSegment> {
        match (self.segments, self.duration) {
            (Some(segments), _) => segments,
            (None, Some(duration)) if !self.text.trim().is_empty() => vec![TranscriptSegment {
                text: self.text,
                start: 0.0,
                end: duration,
            }],
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperHttpTranscriber {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn transcribe(&self, path: &Path) -> Result<Vec<TranscriptSegment>> {
        let file = path.display().to_string();
        let fail = |reason: String| IndexError::Transcription {
            file: file.clone(),
            reason,
        };
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());

        let mut last_err = None;
        // Stays true while no attempt got an HTTP response at all.
        let mut unreachable = true;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(file = %file, attempt, "retrying transcription in {:?}", delay);
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&self.endpoint)
                .multipart(self.form(&file_name, bytes.clone()));
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    unreachable = false;
                    let status = response.status();

                    if status.is_success() {
                        let body: VerboseTranscription = response
                            .json()
                            .await
                            .map_err(|e| fail(format!("invalid response: {}", e)))?;
                        let segments = body.into_segments();
                        debug!(file = %file, segments = segments.len(), "transcription complete");
                        return Ok(segments);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("server error {}: {}", status, body_text));
                        continue;
                    }
                    return Err(fail(format!("server error {}: {}", status, body_text)));
                }
                Err(e) => {
                    if !(e.is_connect() || e.is_timeout()) {
                        unreachable = false;
                    }
                    last_err = Some(format!("request to {} failed: {}", self.endpoint, e));
                    continue;
                }
            }
        }

        if unreachable {
            return Err(IndexError::ModelUnavailable(format!(
                "transcription backend at {} is unreachable: {}",
                self.endpoint,
                last_err.unwrap_or_default()
            )));
        }
        Err(fail(
            last_err.unwrap_or_else(|| "transcription failed after retries".to_string()),
        ))
    }
}

/// Drops empty or inverted segments, sorts by start, and merges them into
/// windows that close once they span at least `segment_secs`.
///
/// Every group has `start < end`; group starts are non-decreasing.
pub fn group_segments(segments: Vec<TranscriptSegment>, segment_secs: f64) -> Vec<SegmentGroup> {
    let mut segments: Vec<TranscriptSegment> = segments
        .into_iter()
        .filter(|s| {
            !s.text.trim().is_empty()
                && s.start.is_finite()
                && s.end.is_finite()
                && s.start >= 0.0
                && s.end > s.start
        })
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));

    let mut groups = Vec::new();
    let mut current: Option<SegmentGroup> = None;

    for seg in segments {
        let group = current.get_or_insert_with(|| SegmentGroup {
            text: String::new(),
            start: seg.start,
            end: seg.end,
        });
        if !group.text.is_empty() {
            group.text.push(' ');
        }
        group.text.push_str(seg.text.trim());
        group.end = group.end.max(seg.end);

        if group.end - group.start >= segment_secs {
            groups.extend(current.take());
        }
    }
    groups.extend(current);
    groups
}

/// Turns transcript segments into parsed audio units.
pub fn audio_units(
    source_file: &str,
    segments: Vec<TranscriptSegment>,
    segment_secs: f64,
) -> Vec<ParsedUnit> {
    group_segments(segments, segment_secs)
        .into_iter()
        .enumerate()
        .map(|(index, group)| ParsedUnit {
            index,
            content: UnitContent::Text(group.text.clone()),
            document_text: group.text,
            meta: UnitMeta::Audio(AudioUnitMeta {
                source_file: source_file.to_string(),
                start: group.start,
                end: group.end,
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(text: &str, start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            text: text.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn groups_close_at_window_length() {
        let groups = group_segments(
            vec![
                seg(" hello ", 0.0, 4.0),
                seg("world", 4.0, 9.0),
                seg("again", 9.0, 12.0),
                seg("tail", 12.0, 13.5),
            ],
            10.0,
        );
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text, "hello world again");
        assert_eq!((groups[0].start, groups[0].end), (0.0, 12.0));
        assert_eq!(groups[1].text, "tail");
        assert_eq!((groups[1].start, groups[1].end), (12.0, 13.5));
    }

    #[test]
    fn drops_bad_segments_and_sorts() {
        let groups = group_segments(
            vec![
                seg("late", 20.0, 25.0),
                seg("", 1.0, 2.0),
                seg("inverted", 8.0, 3.0),
                seg("zero", 5.0, 5.0),
                seg("early", 0.0, 11.0),
                seg("nan", f64::NAN, 4.0),
            ],
            10.0,
        );
        let texts: Vec<&str> = groups.iter().map(|g| g.text.as_str()).collect();
        assert_eq!(texts, vec!["early", "late"]);
    }

    #[test]
    fn groups_are_monotonic_with_positive_duration() {
        let segments: Vec<TranscriptSegment> = (0..50)
            .rev()
            .map(|i| seg(&format!("w{}", i), i as f64 * 1.5, i as f64 * 1.5 + 2.0))
            .collect();
        let groups = group_segments(segments, 7.0);
        assert!(!groups.is_empty());
        for g in &groups {
            assert!(g.start < g.end);
        }
        for pair in groups.windows(2) {
            assert!(pair[0].start <= pair[1].start);
        }
    }

    #[test]
    fn empty_transcript_yields_no_units() {
        assert!(audio_units("silence.wav", Vec::new(), 10.0).is_empty());
    }

    #[test]
    fn audio_units_have_contiguous_indices() {
        let units = audio_units(
            "talk.mp3",
            vec![seg("a", 0.0, 10.0), seg("b", 10.0, 20.0), seg("c", 20.0, 21.0)],
            10.0,
        );
        let indices: Vec<usize> = units.iter().map(|u| u.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(units.iter().all(|u| u.meta.validate().is_ok()));
    }

    #[test]
    fn verbose_json_without_segments_falls_back_to_duration() {
        let body: VerboseTranscription =
            serde_json::from_str(r#"{"text":"hi there","duration":3.2}"#).unwrap();
        assert_eq!(body.into_segments(), vec![seg("hi there", 0.0, 3.2)]);
    }

    #[tokio::test]
    async fn disabled_transcriber_fails_per_file() {
        let err = DisabledTranscriber
            .transcribe(Path::new("a.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Transcription { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn whisper_http_parses_verbose_json() {
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/v1/audio/transcriptions",
            post(|| async {
                axum::Json(serde_json::json!({
                    "text": "one two",
                    "duration": 6.0,
                    "segments": [
                        {"id": 0, "start": 0.0, "end": 3.0, "text": " one"},
                        {"id": 1, "start": 3.0, "end": 6.0, "text": " two"}
                    ]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let dir = tempfile::TempDir::new().unwrap();
        let audio = dir.path().join("clip.wav");
        std::fs::write(&audio, b"RIFF....WAVE").unwrap();

        let config = TranscriptionConfig {
            provider: "whisper-http".into(),
            url: Some(format!("http://{}", addr)),
            api_key_env: "MMI_TEST_UNSET_KEY".into(),
            max_retries: 0,
            ..Default::default()
        };
        let transcriber = WhisperHttpTranscriber::new(&config).unwrap();
        let segments = transcriber.transcribe(&audio).await.unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].text, " two");
        assert_eq!(segments[1].end, 6.0);
    }

    #[tokio::test]
    async fn unreachable_backend_is_model_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dir = tempfile::TempDir::new().unwrap();
        let audio = dir.path().join("clip.wav");
        std::fs::write(&audio, b"RIFF....WAVE").unwrap();

        let config = TranscriptionConfig {
            provider: "whisper-http".into(),
            url: Some(format!("http://{}", addr)),
            max_retries: 0,
            ..Default::default()
        };
        let err = WhisperHttpTranscriber::new(&config)
            .unwrap()
            .transcribe(&audio)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::ModelUnavailable(_)), "{:?}", err);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn whisper_http_client_errors_fail_the_file() {
        use axum::http::StatusCode;
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/v1/audio/transcriptions",
            post(|| async { (StatusCode::BAD_REQUEST, "unsupported audio") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let dir = tempfile::TempDir::new().unwrap();
        let audio = dir.path().join("clip.ogg");
        std::fs::write(&audio, b"OggS").unwrap();

        let config = TranscriptionConfig {
            provider: "whisper-http".into(),
            url: Some(format!("http://{}/", addr)),
            max_retries: 2,
            ..Default::default()
        };
        let err = WhisperHttpTranscriber::new(&config)
            .unwrap()
            .transcribe(&audio)
            .await
            .unwrap_err();
        match err {
            IndexError::Transcription { reason, .. } => assert!(reason.contains("400")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
