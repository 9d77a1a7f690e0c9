//! Batch coordinator: bounded-concurrency dispatch with progress streaming.
//!
//! A batch is partitioned into consecutive groups no larger than the
//! concurrency limit. Each group's model requests run concurrently and settle
//! independently; outcomes and counters are only mutated by the coordinating
//! task between groups, so no locking is needed. One `progress` event is
//! emitted per settled group, and a final `complete` event carries the
//! rendered export text.

use std::path::{Path, PathBuf};

use base64::Engine;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use walkdir::WalkDir;

use crate::ai::{AiService, Constraints, StockMetadata, build_prompt, post_process};
use crate::error::{Error, Result};
use crate::export;

/// Image formats accepted for submission.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// One submitted image: raw bytes plus the display name and MIME type the
/// outcome and export rows are keyed by.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageItem {
    /// Read an image from disk, deriving the MIME type from the extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = std::fs::read(path).map_err(|e| Error::Encoding {
            filename: filename.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            filename,
            mime_type: mime_from_path(path).to_string(),
            bytes,
        })
    }
}

/// Base64 form of an image, ready for a multimodal request payload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: String,
}

/// Encode an image for transmission. Fails only when there is nothing to
/// encode; the failure becomes that item's outcome, not a batch abort.
pub fn encode_image(item: &ImageItem) -> Result<EncodedImage> {
    if item.bytes.is_empty() {
        return Err(Error::Encoding {
            filename: item.filename.clone(),
            reason: "empty file".to_string(),
        });
    }
    Ok(EncodedImage {
        data: base64::engine::general_purpose::STANDARD.encode(&item.bytes),
        mime_type: item.mime_type.clone(),
    })
}

/// Get the MIME type for a file path by extension.
pub fn mime_from_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        _ => "image/jpeg",
    }
}

/// Collect supported image files from the given paths.
///
/// Accepts a mix of file paths and directory paths. Directories are walked
/// recursively (following symlinks); only JPEG and PNG files are included.
pub fn collect_images(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut images = Vec::new();

    for path in paths {
        if path.is_file() {
            if is_supported_image(path) {
                images.push(path.clone());
            } else {
                log::warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let p = entry.path();
                if p.is_file() && is_supported_image(p) {
                    images.push(p.to_path_buf());
                }
            }
        } else {
            log::warn!("Path does not exist: {}", path.display());
        }
    }

    images
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Terminal record for one image: exactly one per submitted item.
/// JSON export goes through `export::render_json`, not a derive here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success {
        filename: String,
        metadata: StockMetadata,
    },
    Failure {
        filename: String,
        error: String,
    },
}

impl Outcome {
    pub fn filename(&self) -> &str {
        match self {
            Self::Success { filename, .. } | Self::Failure { filename, .. } => filename,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Aggregate counters for a batch. Monotone while the batch runs;
/// `optimal + short + failed == total` at every observation point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total: usize,
    pub optimal: usize,
    pub short: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

/// One record on the progress channel. Serialized as a single JSON object
/// per line (NDJSON) on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Event {
    Log {
        message: String,
        level: LogLevel,
    },
    Progress {
        percent: f64,
        counters: Counters,
    },
    Complete {
        #[serde(rename = "exportText")]
        export_text: String,
        counters: Counters,
    },
    FatalError {
        message: String,
    },
}

impl Event {
    /// Serialize as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> String {
        match serde_json::to_string(self) {
            Ok(line) => line + "\n",
            Err(e) => {
                log::error!("Failed to serialize event: {e}");
                String::new()
            }
        }
    }
}

/// What a finished (or cancelled) batch produced.
#[derive(Debug)]
pub struct BatchReport {
    /// One outcome per dispatched item, in submission order.
    pub outcomes: Vec<Outcome>,
    pub counters: Counters,
    /// Rendered export text; `None` when the consumer disconnected before
    /// the batch completed.
    pub export_text: Option<String>,
    pub cancelled: bool,
}

/// Run a batch to completion, streaming events to `events`.
///
/// Items are processed in groups of `min(max_workers, batch_size)` (at least
/// one). Within a group every request is dispatched concurrently and settles
/// independently; a failure never cancels siblings. The next group starts
/// only after the previous one fully settled. If the event receiver is
/// dropped, the in-flight group still settles but no further groups are
/// dispatched.
pub async fn run_batch(
    service: &dyn AiService,
    items: Vec<ImageItem>,
    constraints: &Constraints,
    max_workers: usize,
    batch_size: usize,
    events: &mpsc::Sender<Event>,
) -> BatchReport {
    let total = items.len();
    let group_size = max_workers.min(batch_size).max(1);
    let prompt = build_prompt(constraints);

    let mut outcomes: Vec<Outcome> = Vec::with_capacity(total);
    let mut counters = Counters::default();
    let mut cancelled = false;

    let _ = events
        .send(Event::Log {
            message: format!(
                "Starting processing of {total} images with {} for {}...",
                service.name(),
                constraints.platform.name()
            ),
            level: LogLevel::Info,
        })
        .await;

    let mut remaining = items.into_iter();
    loop {
        let group: Vec<ImageItem> = remaining.by_ref().take(group_size).collect();
        if group.is_empty() {
            break;
        }

        let settled = join_all(
            group
                .iter()
                .map(|item| process_item(service, item, &prompt, constraints)),
        )
        .await;

        for outcome in settled {
            counters.total += 1;
            match &outcome {
                Outcome::Success { filename, metadata } => {
                    if metadata.title_length >= constraints.title_min {
                        counters.optimal += 1;
                    } else {
                        counters.short += 1;
                    }
                    let _ = events
                        .send(Event::Log {
                            message: format!(
                                "✓ Processed: {filename} ({} chars)",
                                metadata.title_length
                            ),
                            level: LogLevel::Success,
                        })
                        .await;
                }
                Outcome::Failure { filename, error } => {
                    counters.failed += 1;
                    let _ = events
                        .send(Event::Log {
                            message: format!("✗ Error: {filename} - {error}"),
                            level: LogLevel::Error,
                        })
                        .await;
                }
            }
            outcomes.push(outcome);
        }

        let percent = outcomes.len() as f64 / total as f64 * 100.0;
        if events
            .send(Event::Progress { percent, counters })
            .await
            .is_err()
        {
            log::warn!("Progress consumer disconnected, skipping remaining groups");
            cancelled = true;
            break;
        }
    }

    if cancelled {
        return BatchReport {
            outcomes,
            counters,
            export_text: None,
            cancelled: true,
        };
    }

    let export_text = export::render_csv(&outcomes, constraints.platform);
    let _ = events
        .send(Event::Complete {
            export_text: export_text.clone(),
            counters,
        })
        .await;

    BatchReport {
        outcomes,
        counters,
        export_text: Some(export_text),
        cancelled: false,
    }
}

/// Process one item end to end; every error becomes a failure outcome.
async fn process_item(
    service: &dyn AiService,
    item: &ImageItem,
    prompt: &str,
    constraints: &Constraints,
) -> Outcome {
    match analyze_item(service, item, prompt, constraints).await {
        Ok(metadata) => Outcome::Success {
            filename: item.filename.clone(),
            metadata,
        },
        Err(err) => Outcome::Failure {
            filename: item.filename.clone(),
            error: err.to_string(),
        },
    }
}

async fn analyze_item(
    service: &dyn AiService,
    item: &ImageItem,
    prompt: &str,
    constraints: &Constraints,
) -> Result<StockMetadata> {
    let encoded = encode_image(item)?;
    let raw = service.analyze(&encoded.data, prompt, &encoded.mime_type).await?;
    Ok(post_process(raw, constraints.keyword_target()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::RawMetadata;
    use crate::error::classify_model_error;
    use crate::export::ExportPreset;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ── scripted service double ──────────────────────────────────────

    struct ScriptedService {
        responses: Mutex<VecDeque<Result<RawMetadata>>>,
    }

    impl ScriptedService {
        fn new(responses: Vec<Result<RawMetadata>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }

        fn always_ok() -> Self {
            Self::new(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl AiService for ScriptedService {
        fn name(&self) -> &str {
            "Scripted"
        }

        async fn analyze(&self, _: &str, _: &str, _: &str) -> Result<RawMetadata> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(sample_raw()))
        }
    }

    fn sample_raw() -> RawMetadata {
        RawMetadata {
            title: "Golden sandy beach with turquoise waves at sunset, tropical vacation and summer travel concept with copy space".to_string(),
            category: "Travel".to_string(),
            tags: vec!["beach".to_string(), "sunset".to_string(), "travel".to_string()],
        }
    }

    fn item(name: &str) -> ImageItem {
        ImageItem {
            filename: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }
    }

    fn constraints() -> Constraints {
        Constraints {
            platform: ExportPreset::AdobeStock,
            title_min: 70,
            title_max: 200,
            keyword_min: 25,
            keyword_max: 49,
        }
    }

    async fn run_and_collect(
        service: &dyn AiService,
        items: Vec<ImageItem>,
        constraints: &Constraints,
        workers: usize,
    ) -> (BatchReport, Vec<Event>) {
        let (tx, mut rx) = mpsc::channel(256);
        let report = run_batch(service, items, constraints, workers, 100, &tx).await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (report, events)
    }

    fn progress_events(events: &[Event]) -> Vec<&Event> {
        events
            .iter()
            .filter(|e| matches!(e, Event::Progress { .. }))
            .collect()
    }

    // ── encoding ─────────────────────────────────────────────────────

    #[test]
    fn encode_image_base64() {
        let encoded = encode_image(&item("a.jpg")).unwrap();
        assert_eq!(encoded.mime_type, "image/jpeg");
        assert_eq!(encoded.data, "/9j/");
    }

    #[test]
    fn encode_empty_image_fails() {
        let empty = ImageItem {
            filename: "empty.png".to_string(),
            mime_type: "image/png".to_string(),
            bytes: Vec::new(),
        };
        let err = encode_image(&empty).unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
        assert!(err.to_string().contains("empty.png"));
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(mime_from_path(Path::new("a.png")), "image/png");
        assert_eq!(mime_from_path(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_from_path(Path::new("a.jpg")), "image/jpeg");
        assert_eq!(mime_from_path(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_from_path(Path::new("noext")), "image/jpeg");
    }

    // ── collect_images ───────────────────────────────────────────────

    #[test]
    fn collect_images_directory_recursive() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();

        fs::write(dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(sub.join("b.png"), b"fake").unwrap();
        fs::write(sub.join("c.txt"), b"fake").unwrap();

        let images = collect_images(&[dir.path().to_path_buf()]);
        assert_eq!(images.len(), 2);
    }

    #[test]
    fn collect_images_skips_unsupported() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("readme.txt");
        fs::write(&txt, b"hello").unwrap();

        assert!(collect_images(&[txt]).is_empty());
        assert!(collect_images(&[PathBuf::from("/nonexistent/path")]).is_empty());
    }

    #[test]
    fn image_item_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.png");
        fs::write(&path, b"fakepng").unwrap();

        let item = ImageItem::from_file(&path).unwrap();
        assert_eq!(item.filename, "photo.png");
        assert_eq!(item.mime_type, "image/png");
        assert_eq!(item.bytes, b"fakepng");
    }

    // ── coordinator scenarios ────────────────────────────────────────

    #[tokio::test]
    async fn three_images_concurrency_one() {
        let service = ScriptedService::always_ok();
        let items = vec![item("a.jpg"), item("b.jpg"), item("c.jpg")];
        let (report, events) = run_and_collect(&service, items, &constraints(), 1).await;

        assert_eq!(progress_events(&events).len(), 3);
        let Some(Event::Complete { export_text, counters }) = events.last() else {
            panic!("expected trailing complete event");
        };
        assert_eq!(counters.total, 3);
        assert_eq!(counters.failed, 0);
        assert_eq!(export_text.lines().count(), 4); // header + 3 rows

        assert_eq!(report.outcomes.len(), 3);
        assert!(report.outcomes.iter().all(Outcome::is_success));
    }

    #[tokio::test]
    async fn start_log_names_service_and_platform() {
        let service = ScriptedService::always_ok();
        let (_, events) = run_and_collect(&service, vec![item("a.jpg")], &constraints(), 1).await;

        assert!(matches!(
            events.first(),
            Some(Event::Log { message, level: LogLevel::Info })
                if message.contains("Scripted") && message.contains("Adobe Stock")
        ));
    }

    #[tokio::test]
    async fn progress_event_count_is_group_count() {
        // 5 items with 2 workers → ceil(5/2) = 3 groups
        let service = ScriptedService::always_ok();
        let items = (0..5).map(|i| item(&format!("{i}.jpg"))).collect();
        let (_, events) = run_and_collect(&service, items, &constraints(), 2).await;

        assert_eq!(progress_events(&events).len(), 3);
        let Some(Event::Progress { percent, .. }) = progress_events(&events).last().copied() else {
            panic!("expected a progress event");
        };
        assert!((percent - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn outcomes_keep_submission_order() {
        let service = ScriptedService::always_ok();
        let items = vec![item("1.jpg"), item("2.jpg"), item("3.jpg"), item("4.jpg")];
        let (report, _) = run_and_collect(&service, items, &constraints(), 2).await;

        let names: Vec<&str> = report.outcomes.iter().map(Outcome::filename).collect();
        assert_eq!(names, vec!["1.jpg", "2.jpg", "3.jpg", "4.jpg"]);
    }

    #[tokio::test]
    async fn quota_failure_is_per_item() {
        let service = ScriptedService::new(vec![
            Ok(sample_raw()),
            Err(classify_model_error("Gemini API error (429): Quota exceeded")),
        ]);
        let items = vec![item("good.jpg"), item("bad.jpg")];
        let (report, events) = run_and_collect(&service, items, &constraints(), 2).await;

        assert_eq!(report.counters.total, 2);
        assert_eq!(report.counters.failed, 1);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Log { message, level: LogLevel::Error }
                if message.contains("bad.jpg") && message.contains("Quota exceeded")
        )));

        // Only the successful item gets an export row
        let export = report.export_text.unwrap();
        assert!(export.contains("good.jpg"));
        assert!(!export.contains("bad.jpg"));
    }

    #[tokio::test]
    async fn encoding_failure_becomes_outcome() {
        let service = ScriptedService::always_ok();
        let empty = ImageItem {
            filename: "empty.jpg".to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: Vec::new(),
        };
        let (report, _) = run_and_collect(&service, vec![empty, item("ok.jpg")], &constraints(), 2).await;

        assert_eq!(report.counters.failed, 1);
        assert!(matches!(
            &report.outcomes[0],
            Outcome::Failure { error, .. } if error.contains("failed to encode")
        ));
        assert!(report.outcomes[1].is_success());
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let service = ScriptedService::always_ok();
        let (report, events) = run_and_collect(&service, Vec::new(), &constraints(), 5).await;

        assert!(progress_events(&events).is_empty());
        let Some(Event::Complete { export_text, counters }) = events.last() else {
            panic!("expected complete event");
        };
        assert_eq!(counters.total, 0);
        assert_eq!(export_text.lines().count(), 1); // header only
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test]
    async fn counters_partition_total() {
        let short_raw = RawMetadata {
            title: "Too short".to_string(),
            category: "People".to_string(),
            tags: vec!["person".to_string()],
        };
        let service = ScriptedService::new(vec![
            Ok(sample_raw()),
            Ok(short_raw),
            Err(Error::ModelRequest("boom".to_string())),
        ]);
        let items = vec![item("a.jpg"), item("b.jpg"), item("c.jpg")];
        let (report, _) = run_and_collect(&service, items, &constraints(), 1).await;

        let c = report.counters;
        assert_eq!(c.total, 3);
        assert_eq!(c.optimal, 1);
        assert_eq!(c.short, 1);
        assert_eq!(c.failed, 1);
        assert_eq!(c.optimal + c.short + c.failed, c.total);
    }

    #[tokio::test]
    async fn keyword_target_applied_per_item() {
        let service = ScriptedService::always_ok(); // returns 3 tags
        let mut cons = constraints();
        cons.keyword_max = 49;
        let (report, _) = run_and_collect(&service, vec![item("a.jpg")], &cons, 1).await;

        let Outcome::Success { metadata, .. } = &report.outcomes[0] else {
            panic!("expected success");
        };
        assert_eq!(metadata.keywords.len(), 49);
        assert_eq!(&metadata.keywords[..3], &["beach", "sunset", "travel"]);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_later_groups() {
        let service = ScriptedService::always_ok();
        let (tx, rx) = mpsc::channel(256);
        drop(rx);

        let items = vec![item("1.jpg"), item("2.jpg"), item("3.jpg"), item("4.jpg")];
        let report = run_batch(&service, items, &constraints(), 2, 100, &tx).await;

        assert!(report.cancelled);
        assert!(report.export_text.is_none());
        // The first group still ran to completion
        assert_eq!(report.outcomes.len(), 2);
    }

    // ── event wire format ────────────────────────────────────────────

    #[test]
    fn events_serialize_with_spec_field_names() {
        let progress = Event::Progress {
            percent: 50.0,
            counters: Counters {
                total: 2,
                optimal: 1,
                short: 0,
                failed: 1,
            },
        };
        let line = progress.to_ndjson();
        assert!(line.ends_with('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "progress");
        assert_eq!(value["percent"], 50.0);
        assert_eq!(value["counters"]["optimal"], 1);

        let complete = Event::Complete {
            export_text: "Filename".to_string(),
            counters: Counters::default(),
        };
        let value: serde_json::Value = serde_json::from_str(&complete.to_ndjson()).unwrap();
        assert_eq!(value["kind"], "complete");
        assert_eq!(value["exportText"], "Filename");

        let fatal = Event::FatalError {
            message: "API key is required".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&fatal.to_ndjson()).unwrap();
        assert_eq!(value["kind"], "fatal-error");

        let log = Event::Log {
            message: "hi".to_string(),
            level: LogLevel::Success,
        };
        let value: serde_json::Value = serde_json::from_str(&log.to_ndjson()).unwrap();
        assert_eq!(value["kind"], "log");
        assert_eq!(value["level"], "success");
    }
}
