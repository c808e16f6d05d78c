//! Frame sources for the live stream
//!
//! The deployed camera is an HTTP snapshot endpoint (most IP cameras and
//! `mjpg-streamer` expose one) polled at a fixed interval.

use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)]
use mockall::automock;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

use crate::infra::{CheckinError, Result, Retry, RetryConfig};

/// Ordered source of encoded frames.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame in capture order. `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<Bytes>>;
}

/// Opens one frame source per live stream.
pub trait CameraFactory: Send + Sync {
    fn open(&self) -> Result<Box<dyn FrameSource>>;
}

/// Polls a JPEG snapshot URL.
pub struct SnapshotCamera {
    client: reqwest::Client,
    url: String,
    frame_interval: Duration,
    ticker: Option<Interval>,
    retry: Retry,
}

impl SnapshotCamera {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        frame_interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            frame_interval,
            ticker: None,
            retry: Retry::new(retry),
        }
    }

    async fn fetch(&self) -> Result<Bytes> {
        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                CheckinError::Timeout("camera.snapshot".into())
            } else {
                CheckinError::Capability(format!("camera: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CheckinError::Capability(format!("camera: HTTP {status}")));
        }

        response
            .bytes()
            .await
            .map_err(|e| CheckinError::Capability(format!("camera: {e}")))
    }
}

#[async_trait]
impl FrameSource for SnapshotCamera {
    async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        let period = self.frame_interval.max(Duration::from_millis(1));
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;

        let frame = self.retry.run("camera.snapshot", || self.fetch()).await?;
        Ok(Some(frame))
    }
}

/// Builds a [`SnapshotCamera`] per stream, sharing one HTTP client.
#[derive(Clone)]
pub struct SnapshotCameraFactory {
    client: reqwest::Client,
    url: String,
    frame_interval: Duration,
    retry: RetryConfig,
}

impl SnapshotCameraFactory {
    pub fn new(url: impl Into<String>, frame_interval: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckinError::Configuration(format!("camera client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            frame_interval,
            retry: RetryConfig::camera(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl CameraFactory for SnapshotCameraFactory {
    fn open(&self) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(SnapshotCamera::new(
            self.client.clone(),
            self.url.clone(),
            self.frame_interval,
            self.retry.clone(),
        )))
    }
}
