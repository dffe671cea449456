pub mod convert;
pub mod frame;
pub mod synthetic;

pub use convert::{ColorSpaceConverter, FrameBuffer};
pub use frame::{Frame, FrameMetadata, PixelFormat, Plane, Rotation};
pub use synthetic::SyntheticSource;
