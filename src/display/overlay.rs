//! Bounding-box overlay slot.
//!
//! The slot sits at a fixed child index of the render surface, right after the
//! host's base children, and holds at most one visual. All surface mutations go
//! through one mutex, so results delivered from the detector thread cannot
//! interleave with each other or with a shutdown detach.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace};

use crate::display::surface::{BoundingBoxVisual, BoxStyle, RenderSurface, Visual};
use crate::inference::BoundingRegion;
use crate::OverlayConfig;

/// State of the reserved slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OverlaySlot {
    #[default]
    Empty,
    Occupied(BoundingBoxVisual),
}

/// What happened to a detection result handed to [`OverlayCoordinator::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Regions installed, last one left in the slot.
    Applied(usize),
    /// An equal or newer frame's result was already applied.
    Stale,
    /// The surface is gone.
    Detached,
}

struct OverlayState {
    surface: Option<Box<dyn RenderSurface>>,
    slot: OverlaySlot,
    last_sequence: Option<u64>,
}

pub struct OverlayCoordinator {
    slot_index: usize,
    style: BoxStyle,
    state: Mutex<OverlayState>,
}

impl OverlayCoordinator {
    pub fn new(surface: Box<dyn RenderSurface>, config: &OverlayConfig) -> Self {
        if surface.child_count() < config.base_children {
            debug!(
                "Surface has {} children, fewer than the {} reserved base children",
                surface.child_count(),
                config.base_children
            );
        }
        Self {
            slot_index: config.base_children,
            style: BoxStyle {
                color: config.color,
                stroke_width: config.stroke_width,
            },
            state: Mutex::new(OverlayState {
                surface: Some(surface),
                slot: OverlaySlot::Empty,
                last_sequence: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OverlayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub fn slot(&self) -> OverlaySlot {
        self.lock().slot.clone()
    }

    pub fn is_attached(&self) -> bool {
        self.lock().surface.is_some()
    }

    /// Install each region in order, replacing the previous occupant. The slot
    /// ends up showing the last region.
    pub fn apply(&self, sequence: u64, regions: &[BoundingRegion]) -> ApplyOutcome {
        let mut state = self.lock();
        if state.surface.is_none() {
            trace!("Dropping detection for frame {} after detach", sequence);
            return ApplyOutcome::Detached;
        }
        if state.last_sequence.is_some_and(|last| last >= sequence) {
            debug!("Dropping stale detection for frame {}", sequence);
            return ApplyOutcome::Stale;
        }
        state.last_sequence = Some(sequence);
        for region in regions {
            self.install_locked(&mut state, BoundingBoxVisual::new(region, self.style));
        }
        ApplyOutcome::Applied(regions.len())
    }

    /// Put `region` in the slot, evicting the current occupant first.
    pub fn install(&self, region: &BoundingRegion) -> bool {
        let mut state = self.lock();
        if state.surface.is_none() {
            return false;
        }
        self.install_locked(&mut state, BoundingBoxVisual::new(region, self.style));
        true
    }

    /// Clear the slot. Returns the visual that was showing.
    pub fn evict(&self) -> Option<BoundingBoxVisual> {
        let mut state = self.lock();
        self.evict_locked(&mut state)
    }

    /// Release the surface. Results arriving afterwards are ignored.
    pub fn detach(&self) -> Option<Box<dyn RenderSurface>> {
        let mut state = self.lock();
        state.slot = OverlaySlot::Empty;
        let surface = state.surface.take();
        if surface.is_some() {
            info!("Overlay detached from render surface");
        }
        surface
    }

    /// Run `f` against the attached surface.
    pub fn inspect<R>(&self, f: impl FnOnce(&dyn RenderSurface) -> R) -> Option<R> {
        let state = self.lock();
        state.surface.as_deref().map(|surface| f(surface))
    }

    fn install_locked(&self, state: &mut OverlayState, visual: BoundingBoxVisual) {
        self.evict_locked(state);
        if let Some(surface) = state.surface.as_mut() {
            let index = self.slot_index.min(surface.child_count());
            surface.insert_child(index, Visual::BoundingBox(visual.clone()));
            state.slot = OverlaySlot::Occupied(visual);
        }
    }

    fn evict_locked(&self, state: &mut OverlayState) -> Option<BoundingBoxVisual> {
        let OverlaySlot::Occupied(visual) = std::mem::take(&mut state.slot) else {
            return None;
        };
        if let Some(surface) = state.surface.as_mut() {
            let index = self.slot_index.min(surface.child_count().saturating_sub(1));
            surface.remove_child(index);
        }
        Some(visual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::surface::VisualList;
    use crate::inference::Rect;

    fn region(label: &str, left: i32) -> BoundingRegion {
        BoundingRegion {
            rect: Rect::new(left, 0, left + 10, 10),
            label: label.into(),
            score: 0.9,
        }
    }

    fn coordinator() -> OverlayCoordinator {
        let surface = VisualList::with_base(["preview", "label"]);
        OverlayCoordinator::new(Box::new(surface), &OverlayConfig::default())
    }

    fn boxes(overlay: &OverlayCoordinator) -> Vec<String> {
        overlay
            .inspect(|s| {
                (0..s.child_count())
                    .filter_map(|i| s.child(i).and_then(Visual::as_bounding_box))
                    .map(|v| v.label.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn last_region_wins() {
        let overlay = coordinator();
        let outcome = overlay.apply(1, &[region("r1", 0), region("r2", 20)]);
        assert_eq!(outcome, ApplyOutcome::Applied(2));
        assert_eq!(boxes(&overlay), vec!["r2"]);
        assert_eq!(overlay.inspect(|s| s.child_count()), Some(3));
        assert!(matches!(overlay.slot(), OverlaySlot::Occupied(v) if v.label == "r2"));
    }

    #[test]
    fn base_children_are_untouched() {
        let overlay = coordinator();
        overlay.apply(1, &[region("r1", 0)]);
        overlay.apply(2, &[region("r2", 0)]);
        let base: Vec<_> = overlay
            .inspect(|s| (0..2).map(|i| s.child(i).cloned()).collect::<Vec<_>>())
            .unwrap();
        assert_eq!(
            base,
            vec![
                Some(Visual::Base("preview".into())),
                Some(Visual::Base("label".into()))
            ]
        );
        assert_eq!(boxes(&overlay), vec!["r2"]);
    }

    #[test]
    fn evict_then_install_cycles_state() {
        let overlay = coordinator();
        assert_eq!(overlay.evict(), None);
        assert!(overlay.install(&region("a", 0)));
        assert_eq!(overlay.evict().map(|v| v.label), Some("a".to_string()));
        assert_eq!(overlay.slot(), OverlaySlot::Empty);
        assert_eq!(overlay.inspect(|s| s.child_count()), Some(2));
    }

    #[test]
    fn empty_result_keeps_previous_box() {
        let overlay = coordinator();
        overlay.apply(1, &[region("a", 0)]);
        assert_eq!(overlay.apply(2, &[]), ApplyOutcome::Applied(0));
        assert_eq!(boxes(&overlay), vec!["a"]);
    }

    #[test]
    fn stale_and_detached_results_are_ignored() {
        let overlay = coordinator();
        overlay.apply(5, &[region("new", 0)]);
        assert_eq!(overlay.apply(4, &[region("old", 0)]), ApplyOutcome::Stale);
        assert_eq!(boxes(&overlay), vec!["new"]);

        let surface = overlay.detach();
        assert!(surface.is_some());
        assert_eq!(overlay.apply(6, &[region("late", 0)]), ApplyOutcome::Detached);
        assert!(!overlay.install(&region("late", 0)));
    }
}
