//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use volunteer_checkin::auth::{AuthMiddlewareState, Authenticator, JwtValidator, Role};
use volunteer_checkin::domain::Embedding;
use volunteer_checkin::driver::{CameraFactory, FrameSource};
use volunteer_checkin::face::{FaceCapability, FaceImage, FaceRegion};
use volunteer_checkin::infra::{CheckinError, DocumentStore, InMemoryDocumentStore, Result};
use volunteer_checkin::metrics::MetricsRegistry;
use volunteer_checkin::server::{build_router, AppState};

pub const TEST_SECRET: &[u8] = b"integration-test-secret";

/// A small solid-color PNG. Different colors give different byte strings.
pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Face `i` of a scripted image.
pub fn region(i: u32) -> FaceRegion {
    FaceRegion::new(i * 20, 4, 16, 16)
}

/// Face capability that answers from a script keyed by the image bytes.
///
/// Unscripted images have no faces.
#[derive(Default)]
pub struct ScriptedFaceCapability {
    scripts: Mutex<HashMap<Vec<u8>, Vec<(FaceRegion, Embedding)>>>,
    failing: Mutex<bool>,
    pub detect_calls: AtomicUsize,
    pub embed_calls: AtomicUsize,
}

impl ScriptedFaceCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Image `bytes` shows one face per embedding, laid out left to right.
    pub fn script(&self, bytes: &[u8], embeddings: Vec<Vec<f64>>) {
        let faces = embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| (region(i as u32), Embedding::new(e)))
            .collect();
        self.scripts.lock().unwrap().insert(bytes.to_vec(), faces);
    }

    /// Make every call fail as if the sidecar were down.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    fn check(&self) -> Result<()> {
        if *self.failing.lock().unwrap() {
            Err(CheckinError::Capability("face service returned 503".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl FaceCapability for ScriptedFaceCapability {
    async fn detect_regions(&self, image: &FaceImage) -> Result<Vec<FaceRegion>> {
        self.detect_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self
            .scripts
            .lock()
            .unwrap()
            .get(image.encoded().as_ref())
            .map(|faces| faces.iter().map(|(r, _)| *r).collect())
            .unwrap_or_default())
    }

    async fn embed(&self, image: &FaceImage, region: FaceRegion) -> Result<Embedding> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.scripts
            .lock()
            .unwrap()
            .get(image.encoded().as_ref())
            .and_then(|faces| faces.iter().find(|(r, _)| *r == region))
            .map(|(_, e)| e.clone())
            .ok_or_else(|| CheckinError::Capability("unknown region".into()))
    }
}

/// Camera that plays back a fixed list of frames, then ends.
pub struct ScriptedCamera {
    pub frames: Vec<Bytes>,
}

struct Playback(VecDeque<Bytes>);

#[async_trait]
impl FrameSource for Playback {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        Ok(self.0.pop_front())
    }
}

impl CameraFactory for ScriptedCamera {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(Playback(self.frames.iter().cloned().collect())))
    }
}

/// Everything a router test needs.
pub struct TestApp {
    pub state: AppState,
    pub faces: Arc<ScriptedFaceCapability>,
    pub store: Arc<InMemoryDocumentStore>,
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryDocumentStore::new());
        let faces = Arc::new(ScriptedFaceCapability::new());
        let state = AppState::new(
            store.clone() as Arc<dyn DocumentStore>,
            faces.clone(),
            Arc::new(MetricsRegistry::new()),
            None,
            4,
        );
        Self {
            state,
            faces,
            store,
        }
    }

    /// Router with JWT auth required.
    pub fn router(&self) -> axum::Router {
        let auth = AuthMiddlewareState {
            authenticator: Arc::new(Authenticator::new(Some(Arc::new(
                JwtValidator::with_secret(TEST_SECRET),
            )))),
            require_auth: true,
            rate_limiter: None,
        };
        build_router(self.state.clone(), auth, 4 * 1024 * 1024, None).unwrap()
    }
}

pub fn token(subject: &str, role: Role) -> String {
    JwtValidator::with_secret(TEST_SECRET)
        .issue(subject, role, chrono::Duration::hours(1))
        .unwrap()
}

pub fn admin_token() -> String {
    token("ngo-admin", Role::Admin)
}

// ============================================================================
// Request builders
// ============================================================================

pub enum Part<'a> {
    Text(&'a str),
    File(&'a [u8]),
}

const BOUNDARY: &str = "----checkin-test-boundary";

pub fn multipart_request(uri: &str, token: &str, parts: &[(&str, Part<'_>)]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, part) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub fn json_request(
    method: Method,
    uri: &str,
    token: &str,
    body: serde_json::Value,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_request(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
