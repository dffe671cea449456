//! Render surface abstraction: an ordered list of child visuals.

use crate::inference::{BoundingRegion, Rect};

/// Stroke used for bounding-box visuals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxStyle {
    pub color: [u8; 4],
    pub stroke_width: f32,
}

/// Outline drawn around one detected region.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBoxVisual {
    pub rect: Rect,
    pub label: String,
    pub score: f32,
    pub style: BoxStyle,
}

impl BoundingBoxVisual {
    pub fn new(region: &BoundingRegion, style: BoxStyle) -> Self {
        Self {
            rect: region.rect,
            label: region.label.clone(),
            score: region.score,
            style,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Visual {
    /// Child owned by the host layout (preview, labels). Never touched by the
    /// overlay.
    Base(String),
    BoundingBox(BoundingBoxVisual),
}

impl Visual {
    pub fn as_bounding_box(&self) -> Option<&BoundingBoxVisual> {
        match self {
            Visual::BoundingBox(visual) => Some(visual),
            Visual::Base(_) => None,
        }
    }
}

pub trait RenderSurface: Send {
    fn child_count(&self) -> usize;

    fn insert_child(&mut self, index: usize, visual: Visual);

    fn remove_child(&mut self, index: usize) -> Option<Visual>;

    fn child(&self, _index: usize) -> Option<&Visual> {
        None
    }
}

/// In-memory surface backed by a `Vec`.
#[derive(Debug, Default, Clone)]
pub struct VisualList {
    children: Vec<Visual>,
}

impl VisualList {
    /// Surface pre-populated with `names` as base children.
    pub fn with_base<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            children: names.into_iter().map(|n| Visual::Base(n.into())).collect(),
        }
    }

    pub fn children(&self) -> &[Visual] {
        &self.children
    }

    pub fn bounding_boxes(&self) -> impl Iterator<Item = &BoundingBoxVisual> {
        self.children.iter().filter_map(Visual::as_bounding_box)
    }
}

impl RenderSurface for VisualList {
    fn child_count(&self) -> usize {
        self.children.len()
    }

    fn insert_child(&mut self, index: usize, visual: Visual) {
        let index = index.min(self.children.len());
        self.children.insert(index, visual);
    }

    fn remove_child(&mut self, index: usize) -> Option<Visual> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    fn child(&self, index: usize) -> Option<&Visual> {
        self.children.get(index)
    }
}
