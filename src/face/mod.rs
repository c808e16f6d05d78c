//! Face capability boundary
//!
//! Detection and embedding extraction are an external capability behind
//! [`FaceCapability`]. This module also owns image decoding and the
//! status-colored annotation drawn on live frames and registration previews.

mod annotate;
mod http;

pub use annotate::{annotate_jpeg, encode_jpeg, FaceStatus, JPEG_QUALITY};
pub use http::{HttpFaceCapability, HttpFaceConfig};

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::Embedding;
use crate::infra::{CheckinError, Result};

/// Axis-aligned face bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceRegion {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.left.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.top.saturating_add(self.height)
    }

    /// Region clipped to an image of the given size. `None` if nothing is left.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<FaceRegion> {
        let left = self.left.min(image_width);
        let top = self.top.min(image_height);
        let right = self.right().min(image_width);
        let bottom = self.bottom().min(image_height);
        if right <= left || bottom <= top {
            return None;
        }
        Some(FaceRegion::new(left, top, right - left, bottom - top))
    }
}

/// A decoded image plus its original encoded bytes.
///
/// The encoded bytes are what the capability sidecar receives; the pixels
/// are what annotation draws on.
#[derive(Debug, Clone)]
pub struct FaceImage {
    encoded: Bytes,
    pixels: Arc<DynamicImage>,
}

impl FaceImage {
    /// Decode JPEG or PNG bytes.
    pub fn decode(encoded: Bytes) -> Result<Self> {
        if encoded.is_empty() {
            return Err(CheckinError::InvalidImage("empty image".into()));
        }
        let pixels = image::load_from_memory(&encoded)
            .map_err(|e| CheckinError::InvalidImage(e.to_string()))?;
        Ok(Self {
            encoded,
            pixels: Arc::new(pixels),
        })
    }

    /// Decode on the blocking pool.
    pub async fn decode_blocking(encoded: Bytes) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::decode(encoded))
            .await
            .map_err(|e| CheckinError::Internal(format!("image decode task failed: {e}")))?
    }

    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// External face detection and embedding extraction.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait FaceCapability: Send + Sync {
    /// Bounding boxes of every face in the image. No faces is an empty list.
    async fn detect_regions(&self, image: &FaceImage) -> Result<Vec<FaceRegion>>;

    /// Fixed-length embedding for the face inside `region`.
    async fn embed(&self, image: &FaceImage, region: FaceRegion) -> Result<Embedding>;
}

/// Require exactly one face; the registration path's detection rule.
pub fn single_region(regions: Vec<FaceRegion>) -> Result<FaceRegion> {
    match regions.as_slice() {
        [] => Err(CheckinError::NoFaceDetected),
        [region] => Ok(*region),
        many => Err(CheckinError::MultipleFacesDetected(many.len())),
    }
}
