/// Errors raised by layers, the model and persistence.
///
/// Functions return [`anyhow::Result`]. Use [`anyhow::Error::downcast_ref`] to recover the
/// typed cause.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PixelCnnError {
    /// The kernel size of a gated layer must be odd.
    #[error("kernel_size cannot be even, found {0}")]
    EvenKernel(usize),
    /// Gated activations split the channels in half.
    #[error("gated activation requires an even number of channels, found {0}")]
    OddChannels(usize),
    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// An input does not have the shape a layer was configured for.
    #[error("{op}: expected shape {expected:?}, found {found:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// The operation is not defined for this configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Loading expected a different number of parameters.
    #[error("expected {expected} parameters, found {found}")]
    ParameterCount { expected: usize, found: usize },
    /// A loaded parameter does not match the shape of the model.
    #[error("parameter {index}: expected shape {expected:?}, found {found:?}")]
    ParameterShape {
        index: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}
