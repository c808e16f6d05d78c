//! Face capability served by an HTTP sidecar.
//!
//! `POST {base}/detect {"image": <base64>}` returns `{"regions": [...]}` and
//! `POST {base}/embed {"image": <base64>, "region": {...}}` returns
//! `{"embedding": [...]}`. Transient failures are retried with backoff.

use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{FaceCapability, FaceImage, FaceRegion};
use crate::domain::Embedding;
use crate::infra::{CheckinError, Result, Retry, RetryConfig};

#[derive(Debug, Clone)]
pub struct HttpFaceConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
    /// Reject embeddings of any other length.
    pub expected_dimension: Option<usize>,
}

impl HttpFaceConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            retry: RetryConfig::face_service(),
            expected_dimension: None,
        }
    }

    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.expected_dimension = dimension;
        self
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    regions: Vec<FaceRegion>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    image: &'a str,
    region: FaceRegion,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f64>,
}

pub struct HttpFaceCapability {
    client: reqwest::Client,
    base_url: String,
    retry: Retry,
    expected_dimension: Option<usize>,
}

impl HttpFaceCapability {
    pub fn new(config: HttpFaceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CheckinError::Configuration(format!("face client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: Retry::new(config.retry),
            expected_dimension: config.expected_dimension,
        })
    }

    async fn post<B, R>(&self, path: &str, body: B) -> Result<R>
    where
        B: Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_error(path, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, path, text));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| CheckinError::Capability(format!("{path}: malformed response: {e}")))
    }
}

fn request_error(path: &str, e: reqwest::Error) -> CheckinError {
    if e.is_timeout() {
        CheckinError::Timeout(format!("face{}", path.replace('/', ".")))
    } else {
        CheckinError::Capability(format!("{path}: {e}"))
    }
}

fn status_error(status: StatusCode, path: &str, body: String) -> CheckinError {
    if status == StatusCode::UNPROCESSABLE_ENTITY || status == StatusCode::BAD_REQUEST {
        CheckinError::InvalidImage(format!("face service rejected image: {body}"))
    } else {
        CheckinError::Capability(format!("{path}: HTTP {status}: {body}"))
    }
}

#[async_trait]
impl FaceCapability for HttpFaceCapability {
    #[tracing::instrument(skip_all, fields(bytes = image.encoded().len()))]
    async fn detect_regions(&self, image: &FaceImage) -> Result<Vec<FaceRegion>> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image.encoded());
        let response: DetectResponse = self
            .retry
            .run("face.detect", || {
                self.post("/detect", DetectRequest { image: &encoded })
            })
            .await?;

        Ok(response
            .regions
            .into_iter()
            .filter_map(|region| region.clamp_to(image.width(), image.height()))
            .collect())
    }

    #[tracing::instrument(skip_all, fields(region = ?region))]
    async fn embed(&self, image: &FaceImage, region: FaceRegion) -> Result<Embedding> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image.encoded());
        let response: EmbedResponse = self
            .retry
            .run("face.embed", || {
                self.post(
                    "/embed",
                    EmbedRequest {
                        image: &encoded,
                        region,
                    },
                )
            })
            .await?;

        checked_embedding(response.embedding, self.expected_dimension)
    }
}

/// Bad vectors from the sidecar are its fault, never the caller's.
fn checked_embedding(values: Vec<f64>, expected: Option<usize>) -> Result<Embedding> {
    let embedding = Embedding::new(values);
    if !embedding.is_well_formed() {
        return Err(CheckinError::Capability(
            "face service returned an empty or non-finite embedding".into(),
        ));
    }
    match expected {
        Some(expected) if embedding.dimension() != expected => Err(CheckinError::Capability(
            format!(
                "face service returned a {}-dimension embedding, expected {expected}",
                embedding.dimension()
            ),
        )),
        _ => Ok(embedding),
    }
}
