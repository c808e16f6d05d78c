//! Live single-face check-in stream
//!
//! Each camera frame is decoded, every face in it is matched against the
//! event's candidates at a high threshold, matches are marked in the ledger,
//! and the frame goes back to the client with status-colored boxes. Frames
//! are written as `multipart/x-mixed-replace` parts so a browser `<img>`
//! renders the stream directly.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn, Instrument};

use super::camera::FrameSource;
use super::{record_outcome, validate_threshold, CheckinContext, LIVE_MIN_CONFIDENCE};
use crate::domain::{
    EventId, IdentityId, MarkOutcome, MarkRequest, RegistrationGating, VerificationMethod,
};
use crate::face::{annotate_jpeg, FaceImage, FaceRegion, FaceStatus};
use crate::infra::{CheckinError, Result, ShutdownSignal, StreamTracker};
use crate::matcher::{best_match, display_confidence, Candidate};
use crate::metrics::metric_names;

/// Multipart boundary of the live stream.
pub const FRAME_BOUNDARY: &str = "frame";

pub const NO_CANDIDATES_NOTICE: &str = "No registered volunteers";

/// What happened to one face in a frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceReport {
    pub region: FaceRegion,
    pub status: FaceStatus,
    pub identity_id: Option<IdentityId>,
    pub display_name: Option<String>,
    pub confidence: Option<f64>,
    pub outcome: Option<MarkOutcome>,
    pub label: String,
}

impl FaceReport {
    fn unknown(region: FaceRegion) -> Self {
        Self {
            region,
            status: FaceStatus::Unknown,
            identity_id: None,
            display_name: None,
            confidence: None,
            outcome: None,
            label: "Unknown".to_string(),
        }
    }
}

/// One processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub faces: Vec<FaceReport>,
    /// Frame-level message, e.g. no candidates or a detection failure.
    pub notice: Option<String>,
    /// Annotated frame.
    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

impl FrameReport {
    pub fn labels(&self) -> Vec<&str> {
        self.faces.iter().map(|f| f.label.as_str()).collect()
    }
}

/// Matching state for one client watching one event.
#[derive(Clone)]
pub struct LiveSession {
    ctx: CheckinContext,
    event_id: EventId,
    gating: RegistrationGating,
    min_confidence: f64,
}

impl LiveSession {
    /// Start a session. The event must exist.
    pub async fn open(
        ctx: CheckinContext,
        event_id: EventId,
        gating: RegistrationGating,
    ) -> Result<Self> {
        ctx.require_event(&event_id).await?;
        Ok(Self {
            ctx,
            event_id,
            gating,
            min_confidence: LIVE_MIN_CONFIDENCE,
        })
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Result<Self> {
        self.min_confidence = validate_threshold(min_confidence)?;
        Ok(self)
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Match, mark and annotate one frame.
    ///
    /// Only an undecodable frame is an error. Store and capability failures
    /// are logged and reflected in the report; the frame is still returned.
    pub async fn process_frame(&self, frame: Bytes) -> Result<FrameReport> {
        let start = Instant::now();
        let metrics = &self.ctx.metrics;
        metrics.inc_counter(metric_names::LIVE_FRAMES).await;

        let image = FaceImage::decode_blocking(frame).await?;
        let (faces, notice) = self.evaluate(&image).await;

        let boxes: Vec<(FaceRegion, FaceStatus)> =
            faces.iter().map(|f| (f.region, f.status)).collect();
        let jpeg = tokio::task::spawn_blocking(move || annotate_jpeg(image.pixels(), &boxes))
            .await
            .map_err(|e| CheckinError::Internal(format!("annotation task failed: {e}")))??;

        metrics
            .observe_histogram(metric_names::FRAME_LATENCY, start.elapsed().as_secs_f64())
            .await;

        Ok(FrameReport {
            faces,
            notice,
            jpeg,
        })
    }

    async fn evaluate(&self, image: &FaceImage) -> (Vec<FaceReport>, Option<String>) {
        let metrics = &self.ctx.metrics;

        let candidates = match self.load_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(event_id = %self.event_id, error = %e, "failed to load candidates");
                metrics.inc_counter(metric_names::LIVE_FRAME_ERRORS).await;
                metrics.inc_counter(metric_names::STORE_ERRORS).await;
                return (Vec::new(), Some(format!("Error: {e}")));
            }
        };
        if candidates.is_empty() {
            return (Vec::new(), Some(NO_CANDIDATES_NOTICE.to_string()));
        }

        let regions = match self.ctx.faces.detect_regions(image).await {
            Ok(regions) => regions,
            Err(e) => {
                warn!(event_id = %self.event_id, error = %e, "face detection failed");
                metrics.inc_counter(metric_names::LIVE_FRAME_ERRORS).await;
                metrics.inc_counter(metric_names::CAPABILITY_ERRORS).await;
                return (Vec::new(), Some(format!("Error: {e}")));
            }
        };
        metrics
            .add_counter(metric_names::FACES_DETECTED, regions.len() as u64)
            .await;

        let mut faces = Vec::with_capacity(regions.len());
        for region in regions {
            faces.push(self.evaluate_face(image, region, &candidates).await);
        }
        (faces, None)
    }

    async fn load_candidates(&self) -> Result<Vec<Candidate>> {
        let event = self.ctx.require_event(&self.event_id).await?;
        self.ctx.candidates_for(&event, self.gating).await
    }

    async fn evaluate_face(
        &self,
        image: &FaceImage,
        region: FaceRegion,
        candidates: &[Candidate],
    ) -> FaceReport {
        let metrics = &self.ctx.metrics;

        let expected = candidates.first().map(|c| c.embedding.dimension());
        let embedding = match self.ctx.embed_face(image, region, expected).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(?region, error = %e, "embedding extraction failed");
                metrics.inc_counter(metric_names::CAPABILITY_ERRORS).await;
                return FaceReport::unknown(region);
            }
        };

        let matched = match best_match(&embedding, candidates, self.min_confidence) {
            Ok(Some(matched)) => matched,
            Ok(None) => {
                metrics.inc_counter(metric_names::FACES_UNKNOWN).await;
                return FaceReport::unknown(region);
            }
            Err(e) => {
                warn!(?region, error = %e, "match failed");
                return FaceReport::unknown(region);
            }
        };
        metrics.inc_counter(metric_names::FACES_MATCHED).await;
        metrics
            .observe_histogram(
                metric_names::MATCH_CONFIDENCE,
                display_confidence(matched.confidence),
            )
            .await;

        let name = match self.ctx.identities.get_profile(&matched.identity_id).await {
            Ok(Some(profile)) => profile.display_name,
            _ => matched.identity_id.to_string(),
        };
        let request = MarkRequest::new(
            self.event_id.clone(),
            matched.identity_id.clone(),
            matched.confidence,
            VerificationMethod::LiveStream,
        )
        .gating(self.gating);

        let (status, outcome, label) = match self.ctx.ledger.mark_present(request).await {
            Ok(result) => {
                record_outcome(metrics, result.outcome).await;
                if result.outcome.is_write() {
                    let shown = display_confidence(matched.confidence);
                    (
                        FaceStatus::Marked,
                        Some(result.outcome),
                        format!("{name} ({shown:.1}%) - Marked!"),
                    )
                } else {
                    (
                        FaceStatus::AlreadyMarked,
                        Some(result.outcome),
                        format!("{name} - Already Marked"),
                    )
                }
            }
            Err(e) => {
                warn!(
                    event_id = %self.event_id,
                    identity_id = %matched.identity_id,
                    error = %e,
                    "attendance write failed"
                );
                metrics
                    .inc_counter(metric_names::ATTENDANCE_WRITE_FAILURES)
                    .await;
                (FaceStatus::SaveFailed, None, format!("{name} - Not Saved"))
            }
        };

        FaceReport {
            region,
            status,
            identity_id: Some(matched.identity_id),
            display_name: Some(name),
            confidence: Some(display_confidence(matched.confidence)),
            outcome,
            label,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LiveStreamConfig {
    /// Encoded parts buffered ahead of a slow client.
    pub channel_capacity: usize,
    /// Stop after this many failed frames in a row.
    pub max_consecutive_errors: u32,
}

impl Default for LiveStreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 2,
            max_consecutive_errors: 10,
        }
    }
}

/// Run a live session over `source` on its own task.
///
/// Frames are processed in capture order. The task ends when the client goes
/// away, the server shuts down, the source is exhausted, or too many frames in
/// a row fail.
pub fn spawn_live_stream(
    session: LiveSession,
    mut source: Box<dyn FrameSource>,
    shutdown: ShutdownSignal,
    streams: Arc<StreamTracker>,
    config: LiveStreamConfig,
) -> ReceiverStream<std::result::Result<Bytes, Infallible>> {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let span = tracing::info_span!("live_stream", event_id = %session.event_id);

    tokio::spawn(
        async move {
            let guard = streams.stream_start();
            let metrics = session.ctx.metrics.clone();
            metrics
                .set_gauge(metric_names::LIVE_STREAMS_ACTIVE, streams.active_count())
                .await;
            info!("live stream started");

            let mut consecutive_errors = 0u32;
            let mut frames = 0u64;
            loop {
                let next = tokio::select! {
                    _ = shutdown.wait() => {
                        debug!("server shutting down");
                        break;
                    }
                    _ = tx.closed() => {
                        debug!("client disconnected");
                        break;
                    }
                    next = source.next_frame() => next,
                };

                let outcome = match next {
                    Ok(Some(frame)) => session.process_frame(frame).await,
                    Ok(None) => {
                        debug!("frame source exhausted");
                        break;
                    }
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(report) => {
                        consecutive_errors = 0;
                        frames += 1;
                        if tx.send(Ok(encode_part(&report))).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        metrics.inc_counter(metric_names::LIVE_FRAME_ERRORS).await;
                        warn!(error = %e, consecutive_errors, "dropping frame");
                        if consecutive_errors >= config.max_consecutive_errors {
                            warn!("too many consecutive frame errors, closing stream");
                            break;
                        }
                    }
                }
            }

            drop(guard);
            metrics
                .set_gauge(metric_names::LIVE_STREAMS_ACTIVE, streams.active_count())
                .await;
            info!(frames, "live stream closed");
        }
        .instrument(span),
    );

    ReceiverStream::new(rx)
}

/// One `multipart/x-mixed-replace` part carrying an annotated JPEG.
pub fn encode_part(report: &FrameReport) -> Bytes {
    let labels = ascii_json(&report.labels());
    let mut part = BytesMut::with_capacity(report.jpeg.len() + labels.len() + 128);
    part.put_slice(format!("--{FRAME_BOUNDARY}\r\n").as_bytes());
    part.put_slice(b"Content-Type: image/jpeg\r\n");
    part.put_slice(format!("Content-Length: {}\r\n", report.jpeg.len()).as_bytes());
    part.put_slice(format!("X-Face-Labels: {labels}\r\n").as_bytes());
    if let Some(notice) = &report.notice {
        part.put_slice(format!("X-Frame-Notice: {}\r\n", ascii_json(notice)).as_bytes());
    }
    part.put_slice(b"\r\n");
    part.put_slice(&report.jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

/// JSON with every non-ASCII character escaped, so it fits in a header line.
fn ascii_json<T: Serialize + ?Sized>(value: &T) -> String {
    let raw = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii() && !c.is_ascii_control() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{unit:04x}"));
            }
        }
    }
    out
}
