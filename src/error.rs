/// Errors raised while building, loading or evaluating a denoising network.
#[derive(Debug, thiserror::Error)]
pub enum DenoiseError {
    /// Unrecognized model name, size variant, or an invalid combination of both.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Tensor dimensions do not line up (concatenation, alignment, weight shapes).
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A network graph failed its channel bookkeeping.
    #[error("invalid network graph: {0}")]
    InvalidGraph(String),

    /// The requested feature set cannot be mapped to channels.
    #[error("invalid feature set: {0}")]
    Features(String),

    /// A weights blob is malformed.
    #[error("invalid weights blob: {0}")]
    Weights(String),

    /// A layer has no matching tensor in the weights blob.
    #[error("weight tensor not found: {0}")]
    MissingWeight(String),

    /// A burn recorder failed to load a checkpoint.
    #[error("could not load record: {0}")]
    Recorder(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = DenoiseError> = core::result::Result<T, E>;
