mod loop_runner;
mod metrics;

pub use loop_runner::{
    run_peer, run_peer_with_metrics, AppError, FrameLink, LoopConfig, TickReport, TickRunner,
    DEFAULT_MAX_FRAMES_PER_TICK, DEFAULT_TARGET_TPS,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
