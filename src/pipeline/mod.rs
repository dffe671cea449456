pub mod frame_pipeline;
pub mod ringbuf;
pub mod stats;
pub mod worker;

pub use self::frame_pipeline::{FrameOutcome, FramePipeline, PipelineParts};
pub use self::ringbuf::LatestFrameQueue;
pub use self::stats::{DropReason, PipelineStats};
pub use self::worker::{FrameSender, FrameWorker};
