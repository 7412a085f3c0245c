//! Embedded Learning Library model representation
//!
//! This crate provides the in-memory neural network predictor produced by the
//! importers and the saveable map format it is packaged into. A predictor is an
//! ordered list of layers operating on row/column/channel tensors; a map wraps a
//! predictor together with its input and output shapes and can be written to and
//! read back from disk.

pub mod layers;
mod map;
mod predictor;
mod tensor;

pub use map::{MAP_FORMAT, MAP_VERSION, Map};
pub use predictor::NeuralNetworkPredictor;
pub use tensor::{Tensor, TensorShape};

/// Errors produced while building, evaluating or persisting models
#[derive(Debug, thiserror::Error)]
pub enum EllError {
    /// A layer expects a different input shape than the one it is fed
    #[error("layer {index} ({layer}) expects input {expected} but receives {actual}")]
    ShapeMismatch {
        /// Position of the offending layer in the predictor
        index: usize,
        /// Layer kind name
        layer: &'static str,
        /// Shape the layer was built for
        expected: TensorShape,
        /// Shape produced by the preceding layer
        actual: TensorShape,
    },
    /// Input data does not match the size of its declared shape
    #[error("input has {actual} values but shape {shape} requires {expected}")]
    InputSize { shape: TensorShape, expected: usize, actual: usize },
    /// A layer received the wrong number of parameters
    #[error("{layer} layer needs {expected} {what} values, got {actual}")]
    ParameterCount {
        layer: &'static str,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A layer parameter is NaN or infinite
    #[error("{layer} layer has a non-finite {what} value at index {index}")]
    NonFiniteParameter {
        layer: &'static str,
        what: &'static str,
        index: usize,
    },
    /// The number of values in a shape does not fit in `usize`
    #[error("shape {0} is too large")]
    ShapeTooLarge(TensorShape),
    /// A loaded map declares shapes its predictor does not have
    #[error("map declares {what} shape {declared} but its predictor has {actual}")]
    MapShapeMismatch {
        what: &'static str,
        declared: TensorShape,
        actual: TensorShape,
    },
    /// Layer geometry cannot produce a valid output
    #[error("invalid {layer} geometry: {message}")]
    InvalidGeometry { layer: &'static str, message: String },
    /// A map file was read that is not an ELL map of a supported version
    #[error("unsupported map format '{format}' version {version}")]
    UnsupportedMap { format: String, version: u32 },
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
