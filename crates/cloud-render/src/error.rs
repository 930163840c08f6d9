//! Error kinds surfaced by the renderer.

/// Everything that can go wrong between acquiring a GPU context and writing a frame.
///
/// `MissingPoseForFrame` and `InputExhausted` are recoverable: callers turn
/// them into placeholder frames. The rest abort the run.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("could not acquire a GPU context for {width}x{height}: {reason}")]
    ContextAcquisition {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("{what} expects {expected} coefficients, got {got}")]
    InvalidParameterCount {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("GPU allocation failed for {what}: {reason}")]
    ResourceExhaustion { what: String, reason: String },

    #[error("readback failed: {0}")]
    Readback(String),

    #[error("renderer is not ready: {0}")]
    InvalidState(&'static str),

    #[error("no pose available for frame {0}")]
    MissingPoseForFrame(u64),

    #[error("reference input exhausted at frame {0}")]
    InputExhausted(u64),

    #[error("frame sink failed: {0}")]
    Sink(#[from] std::io::Error),
}

impl RenderError {
    /// True for errors that degrade to a placeholder frame instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RenderError::MissingPoseForFrame(_) | RenderError::InputExhausted(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;
