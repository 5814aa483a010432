//! Detection backend capability.
//!
//! The model itself is a black box. The core only needs the boxes it
//! found and how confident it was about each.

use firewatch_registry::BoundingBox;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One region the detector flagged as fire or smoke.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// In `[0.0, 1.0]`.
    pub confidence: f64,
}

impl Detection {
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self { bbox, confidence }
    }
}

/// Failure reported by a detection backend.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DetectorError(pub String);

/// Runs fire detection on an encoded image.
///
/// Implementations may block; the orchestrator calls them off the async
/// executor.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &[u8]) -> std::result::Result<Vec<Detection>, DetectorError>;
}

/// Highest confidence among `detections`, `None` when nothing was found.
pub fn max_confidence(detections: &[Detection]) -> Option<f64> {
    detections
        .iter()
        .map(|d| d.confidence)
        .fold(None, |best, c| Some(best.map_or(c, |b: f64| b.max(c))))
}
