use std::fmt;

use serde::{Deserialize, Serialize};

/// One classifier label with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    label: String,
    score: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// Score as a percentage with one decimal, e.g. `"87.3%"`.
    pub fn probability_string(&self) -> String {
        format!("{:.1}%", self.score * 100.0)
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.label, self.probability_string())
    }
}

/// Top-K labels of one processed frame, highest score first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub sequence: u64,
    pub items: Vec<Detection>,
}

impl RankedResult {
    /// Rank `scores` in descending order, keeping encounter order among equal
    /// scores, and keep the first `k`.
    pub fn rank(sequence: u64, scores: impl IntoIterator<Item = Detection>, k: usize) -> Self {
        let mut items: Vec<Detection> = scores.into_iter().collect();
        // `sort_by` is stable; NaN scores sink to the end.
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or_else(|| a.score.is_nan().cmp(&b.score.is_nan()))
        });
        items.truncate(k);
        Self { sequence, items }
    }

    /// Highest-scoring entry.
    pub fn top(&self) -> Option<&Detection> {
        self.items.first()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Axis-aligned integer box, edges in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// A labelled region produced by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingRegion {
    pub rect: Rect,
    pub label: String,
    pub score: f32,
}
