//! Darknet model importer
//!
//! This crate converts Darknet networks (a `.cfg` layer description plus a
//! `.weights` parameter file) into ELL predictors, and provides the
//! `darknet_import` command that packages the result as an `.ellmodel` file
//! together with a JSON description of its input and output shapes.

use std::{fs, path::Path, path::PathBuf};

use ell::{EllError, NeuralNetworkPredictor, TensorShape};

pub mod cfg;
mod convert;
pub mod importer;
mod logging;
pub mod weights;

pub use convert::predictor_from_network;
pub use logging::init_logging;

/// Errors raised while reading or converting a Darknet model
#[derive(Debug, thiserror::Error)]
pub enum DarknetError {
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A line of the config file is neither a section, an option nor a comment
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    /// The config file does not start with a `[net]` section
    #[error("config must start with a [net] or [network] section")]
    MissingNetSection,
    #[error("line {line}: option '{key}' has invalid value '{value}'")]
    InvalidOption { line: usize, key: String, value: String },
    #[error("line {line}: network input {shape} must have non-zero dimensions")]
    InvalidDimensions { line: usize, shape: TensorShape },
    #[error("line {line}: invalid [{kind}] geometry: {message}")]
    InvalidGeometry { line: usize, kind: String, message: String },
    #[error("line {line}: unsupported layer type [{kind}]")]
    UnsupportedLayer { line: usize, kind: String },
    #[error("line {line}: unsupported activation '{activation}'")]
    UnsupportedActivation { line: usize, activation: String },
    /// The weights file ends before all parameters have been read
    #[error("weights file truncated reading {what}: need {expected} values, {available} available")]
    WeightsTruncated { what: String, expected: usize, available: usize },
    /// A parameter in the weights file is NaN or infinite
    #[error("weights file has a non-finite value in {what} at index {index}")]
    NonFiniteWeight { what: String, index: usize },
    #[error(transparent)]
    Model(#[from] EllError),
}

/// Builds an ELL predictor from a Darknet config file and its trained weights
///
/// # Arguments
/// * `config_path` - Path to the Darknet `.cfg` network description
/// * `weights_path` - Path to the matching Darknet `.weights` file
///
/// # Returns
/// A validated predictor whose input and output shapes follow the network description
pub fn predictor_from_darknet_model(config_path: impl AsRef<Path>, weights_path: impl AsRef<Path>) -> Result<NeuralNetworkPredictor, DarknetError> {
    let config_path = config_path.as_ref();
    let weights_path = weights_path.as_ref();

    let source = fs::read_to_string(config_path).map_err(|source| DarknetError::Io {
        path: config_path.to_path_buf(),
        source,
    })?;
    let network = cfg::DarknetNetwork::parse(&source)?;

    let bytes = fs::read(weights_path).map_err(|source| DarknetError::Io {
        path: weights_path.to_path_buf(),
        source,
    })?;
    let mut reader = weights::WeightsReader::new(&bytes)?;
    let predictor = predictor_from_network(&network, &mut reader)?;

    if reader.remaining() > 0 {
        tracing::warn!(bytes = reader.remaining(), path = %weights_path.display(), "ignoring trailing data in weights file");
    }
    tracing::info!(
        input = %predictor.input_shape(),
        output = %predictor.output_shape(),
        layers = predictor.layers().len(),
        "built predictor from darknet model"
    );

    Ok(predictor)
}
