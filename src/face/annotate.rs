//! Status-colored face boxes on JPEG frames.
//!
//! Each face gets a 2px outline and a filled 35px bar along the bottom edge of
//! the box. Label text is not rasterized; it travels next to the frame.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::FaceRegion;
use crate::infra::{CheckinError, Result};

pub const JPEG_QUALITY: u8 = 80;

const OUTLINE: u32 = 2;
const LABEL_BAR: u32 = 35;

/// What happened to one face in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceStatus {
    /// Record created or confidence raised
    Marked,
    /// Matched, but the ledger already held an equal or higher confidence
    AlreadyMarked,
    /// No enrolled identity cleared the threshold
    Unknown,
    /// Matched, but the ledger write failed
    SaveFailed,
}

impl FaceStatus {
    pub fn color(&self) -> Rgb<u8> {
        match self {
            FaceStatus::Marked => Rgb([0, 255, 0]),
            FaceStatus::AlreadyMarked => Rgb([255, 165, 0]),
            FaceStatus::Unknown | FaceStatus::SaveFailed => Rgb([255, 0, 0]),
        }
    }
}

/// Draw the boxes and encode the result as JPEG.
pub fn annotate_jpeg(image: &DynamicImage, faces: &[(FaceRegion, FaceStatus)]) -> Result<Vec<u8>> {
    let mut canvas = image.to_rgb8();
    for (region, status) in faces {
        draw_face_box(&mut canvas, *region, status.color());
    }
    encode_jpeg(&canvas)
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)
        .map_err(|e| CheckinError::Internal(format!("jpeg encode failed: {e}")))?;
    Ok(out)
}

fn draw_face_box(canvas: &mut RgbImage, region: FaceRegion, color: Rgb<u8>) {
    let Some(region) = region.clamp_to(canvas.width(), canvas.height()) else {
        return;
    };
    let (left, top, right, bottom) = (region.left, region.top, region.right(), region.bottom());

    // outline
    fill_rect(canvas, left, top, right, (top + OUTLINE).min(bottom), color);
    fill_rect(canvas, left, bottom.saturating_sub(OUTLINE).max(top), right, bottom, color);
    fill_rect(canvas, left, top, (left + OUTLINE).min(right), bottom, color);
    fill_rect(canvas, right.saturating_sub(OUTLINE).max(left), top, right, bottom, color);

    // label bar
    fill_rect(canvas, left, bottom.saturating_sub(LABEL_BAR).max(top), right, bottom, color);
}

/// Fill `[x0, x1) x [y0, y1)`; callers keep the bounds inside the canvas.
fn fill_rect(canvas: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32, color: Rgb<u8>) {
    for y in y0..y1 {
        for x in x0..x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}
