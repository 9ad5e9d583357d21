mod framing;
mod transport;

pub use framing::{encode_frame, FrameAssembler, FrameError, FRAME_TERMINATOR, MAX_FRAME_BYTES};
pub use transport::{
    Endpoint, FrameTransport, InboundEvent, LinkState, TransportConfig, TransportError,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_PENDING_OUTBOUND_BYTES, DEFAULT_PORT,
};

pub const DIAG_ENV_VAR: &str = "VOXWIRE_DIAG";

/// Per-frame diagnostics are on only when `VOXWIRE_DIAG=1`.
pub fn diag_enabled() -> bool {
    matches!(std::env::var(DIAG_ENV_VAR).ok().as_deref(), Some("1"))
}
