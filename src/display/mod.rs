pub mod mailbox;
pub mod overlay;
pub mod surface;

pub use mailbox::{headline, LabelMailbox, ResultSink};
pub use overlay::{ApplyOutcome, OverlayCoordinator, OverlaySlot};
pub use surface::{BoundingBoxVisual, BoxStyle, RenderSurface, Visual, VisualList};
