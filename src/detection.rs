//! Detection data model and the person-presence predicate.
//!
//! Batches arrive as JSON in the shape published by the upstream YOLO
//! detector: a `header` with the observation stamp and a `detections`
//! array, each detection carrying `class_name`, `score` and a `bbox`
//! with `center` and `size`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Class label a detection must carry to count as a person.
pub const PERSON_LABEL: &str = "person";

/// Scores must be strictly above this to qualify.
pub const MIN_SCORE: f64 = 0.6;

/// Observation stamp of a batch (seconds + nanoseconds).
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Stamp {
    #[serde(default)]
    pub sec: i64,
    #[serde(default)]
    pub nanosec: u32,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BatchHeader {
    #[serde(default)]
    pub stamp: Stamp,
    #[serde(default)]
    pub frame_id: String,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Point2 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BoxCenter {
    #[serde(default)]
    pub position: Point2,
    #[serde(default)]
    pub theta: f64,
}

/// Width (`x`) and height (`y`) of a bounding box, in pixels.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BoxSize {
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BoundingBox {
    #[serde(default)]
    pub center: BoxCenter,
    pub size: BoxSize,
}

impl BoundingBox {
    pub fn area(&self) -> f64 {
        self.size.x * self.size.y
    }
}

/// One observed object instance within a batch.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Detection {
    #[serde(default)]
    pub class_id: Option<i64>,
    /// Class label (person, car, dog, etc.)
    #[serde(rename = "class_name")]
    pub label: String,
    /// Detection confidence (0.0-1.0)
    pub score: f64,
    /// Tracker identifier, when the detector runs with tracking enabled
    #[serde(default)]
    pub id: Option<String>,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f64, width: f64, height: f64) -> Self {
        Self {
            class_id: None,
            label: label.into(),
            score,
            id: None,
            bbox: BoundingBox {
                center: BoxCenter::default(),
                size: BoxSize {
                    x: width,
                    y: height,
                },
            },
        }
    }

    /// True when this detection signals a person close enough to matter.
    ///
    /// All comparisons are strict: a score of exactly [`MIN_SCORE`] or an area
    /// equal to `area_threshold` does not qualify.
    pub fn is_qualifying_person(&self, area_threshold: f64) -> bool {
        self.label == PERSON_LABEL && self.score > MIN_SCORE && self.bbox.area() > area_threshold
    }
}

/// Ordered detections sharing one observation timestamp.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct DetectionBatch {
    #[serde(default)]
    pub header: Option<BatchHeader>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            header: None,
            detections,
        }
    }

    /// Decode a batch from a JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload).context("parse detection batch JSON")
    }

    /// First detection in arrival order that qualifies, if any.
    pub fn first_qualifying(&self, area_threshold: f64) -> Option<&Detection> {
        self.detections
            .iter()
            .find(|d| d.is_qualifying_person(area_threshold))
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
