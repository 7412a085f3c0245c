//! The `darknet_import` command
//!
//! Validates the two input paths, converts the Darknet model into a predictor,
//! saves it as an `.ellmodel` file next to the weights and writes a
//! `<name>_config.json` sidecar describing the model's input and output shapes.
//!
//! The conversion and packaging steps are reached through the
//! [`ModelConversion`] and [`ModelPackaging`] traits so the command can be
//! driven with other collaborators.

use std::{
    ffi::OsString,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use clap::Parser;
use ell::{Map, NeuralNetworkPredictor, TensorShape};
use serde::{Deserialize, Serialize};

use crate::predictor_from_darknet_model;

/// Extension of the saved model file
pub const MODEL_EXTENSION: &str = "ellmodel";
/// Suffix replacing the weights file extension for the metadata sidecar
pub const CONFIG_SUFFIX: &str = "_config.json";

/// Usage text printed for invalid invocations
pub const USAGE: &str = "Usage darknet_import configFile weightsFile
Converts darknet model to ELL model
Example:
    darknet_import darknet.cfg darknet.weights
This outputs 'darknet.ellmodel' and 'darknet_config.json'";

/// Error type at the collaborator seams
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "darknet_import", disable_help_flag = true, disable_version_flag = true)]
struct CommandLine {
    #[arg(allow_hyphen_values = true)]
    config_file: PathBuf,
    #[arg(allow_hyphen_values = true)]
    weights_file: PathBuf,
}

/// Invocation problems detected before any conversion work
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("expected exactly two arguments: configFile weightsFile")]
    ArgumentCount,
    #[error("config file '{}' not found", .0.display())]
    ConfigNotFound(PathBuf),
    /// Worded after the argument (`weightsFile`), not as "model file"
    #[error("weights file '{}' not found", .0.display())]
    WeightsNotFound(PathBuf),
}

impl UsageError {
    /// Prints the error followed by the usage text
    ///
    /// A wrong argument count prints the usage text alone.
    pub fn report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if !matches!(self, UsageError::ArgumentCount) {
            writeln!(out, "{self}")?;
        }
        writeln!(out, "{USAGE}")
    }
}

/// Validated input paths of one import run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportArgs {
    config_file: PathBuf,
    weights_file: PathBuf,
}

impl ImportArgs {
    /// Checks that both inputs exist as regular files, config file first
    pub fn new(config_file: impl Into<PathBuf>, weights_file: impl Into<PathBuf>) -> Result<Self, UsageError> {
        let config_file = config_file.into();
        if !config_file.is_file() {
            return Err(UsageError::ConfigNotFound(config_file));
        }
        let weights_file = weights_file.into();
        if !weights_file.is_file() {
            return Err(UsageError::WeightsNotFound(weights_file));
        }
        Ok(Self { config_file, weights_file })
    }

    /// Parses a full command line, program name included
    pub fn parse_command_line<I, T>(args: I) -> Result<Self, UsageError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let command_line = CommandLine::try_parse_from(args).map_err(|_| UsageError::ArgumentCount)?;
        Self::new(command_line.config_file, command_line.weights_file)
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn weights_file(&self) -> &Path {
        &self.weights_file
    }

    /// `net.weights` becomes `net.ellmodel`
    pub fn model_output_path(&self) -> PathBuf {
        self.weights_file.with_extension(MODEL_EXTENSION)
    }

    /// `net.weights` becomes `net_config.json`
    pub fn config_output_path(&self) -> PathBuf {
        let mut name = self.weights_file.file_stem().unwrap_or_default().to_os_string();
        name.push(CONFIG_SUFFIX);
        self.weights_file.with_file_name(name)
    }
}

/// Metadata sidecar describing a saved model
///
/// Fields are declared in lexicographic order, which is the order they are
/// serialized in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub input_channels: usize,
    pub input_columns: usize,
    pub input_rows: usize,
    /// File name of the saved model, without directories
    pub model: String,
    pub output_channels: usize,
    pub output_columns: usize,
    pub output_rows: usize,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, input: TensorShape, output: TensorShape) -> Self {
        Self {
            input_channels: input.channels,
            input_columns: input.columns,
            input_rows: input.rows,
            model: model.into(),
            output_channels: output.channels,
            output_columns: output.columns,
            output_rows: output.rows,
        }
    }

    /// JSON with two-space indentation and sorted keys
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds a predictor from a config file and a weights file
pub trait ModelConversion {
    fn build_predictor(&self, config_file: &Path, weights_file: &Path) -> Result<NeuralNetworkPredictor, BoxError>;
}

/// A packaged model that can be written to disk
pub trait SaveableModel {
    fn save(&self, path: &Path) -> Result<(), BoxError>;
}

/// Wraps a predictor into a saveable model
pub trait ModelPackaging {
    type Model: SaveableModel;

    fn wrap(&self, predictor: NeuralNetworkPredictor) -> Self::Model;
}

/// Conversion through the Darknet reader of this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct DarknetConversion;

impl ModelConversion for DarknetConversion {
    fn build_predictor(&self, config_file: &Path, weights_file: &Path) -> Result<NeuralNetworkPredictor, BoxError> {
        Ok(predictor_from_darknet_model(config_file, weights_file)?)
    }
}

/// Packaging into ELL maps
#[derive(Debug, Clone, Copy, Default)]
pub struct EllPackaging;

impl ModelPackaging for EllPackaging {
    type Model = Map;

    fn wrap(&self, predictor: NeuralNetworkPredictor) -> Map {
        Map::from_predictor(predictor)
    }
}

impl SaveableModel for Map {
    fn save(&self, path: &Path) -> Result<(), BoxError> {
        Ok(Map::save(self, path)?)
    }
}

/// Failures after the inputs have been validated
///
/// None of these are recovered from; files written before the failure are left
/// in place.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to convert '{}' with '{}'", .config_file.display(), .weights_file.display())]
    Conversion {
        config_file: PathBuf,
        weights_file: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("failed to save model file '{}'", .path.display())]
    SaveModel {
        path: PathBuf,
        #[source]
        source: BoxError,
    },
    #[error("failed to serialize model config")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write config file '{}'", .path.display())]
    WriteConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write progress output")]
    Output(#[source] io::Error),
}

/// Files produced by a successful import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub model_file: PathBuf,
    pub config_file: PathBuf,
    pub config: ModelConfig,
}

/// Runs the import with injected conversion and packaging collaborators
#[derive(Debug, Clone, Default)]
pub struct DarknetImporter<C = DarknetConversion, P = EllPackaging> {
    conversion: C,
    packaging: P,
}

impl DarknetImporter {
    /// An importer using the Darknet reader and ELL maps
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: ModelConversion, P: ModelPackaging> DarknetImporter<C, P> {
    pub fn with_collaborators(conversion: C, packaging: P) -> Self {
        Self { conversion, packaging }
    }

    /// Converts the model and writes the model file and its config sidecar
    ///
    /// Progress lines and the final config JSON are written to `out`.
    ///
    /// # Arguments
    /// * `args` - Validated input paths
    /// * `out` - Destination of the progress output, normally stdout
    ///
    /// # Returns
    /// The paths written and the metadata stored in the config file
    pub fn run<W: Write>(&self, args: &ImportArgs, out: &mut W) -> Result<ImportOutcome, ImportError> {
        let predictor = self
            .conversion
            .build_predictor(args.config_file(), args.weights_file())
            .map_err(|source| ImportError::Conversion {
                config_file: args.config_file().to_path_buf(),
                weights_file: args.weights_file().to_path_buf(),
                source,
            })?;

        let input_shape = predictor.input_shape();
        let output_shape = predictor.output_shape();

        let model_file = args.model_output_path();
        let config_file = args.config_output_path();

        let model = self.packaging.wrap(predictor);
        writeln!(out, "Saving model file: '{}'", model_file.display()).map_err(ImportError::Output)?;
        model.save(&model_file).map_err(|source| ImportError::SaveModel {
            path: model_file.clone(),
            source,
        })?;

        let model_name = model_file.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        let config = ModelConfig::new(model_name, input_shape, output_shape);
        let json = config.to_json()?;

        writeln!(out, "Saving config file: '{}'", config_file.display()).map_err(ImportError::Output)?;
        fs::write(&config_file, &json).map_err(|source| ImportError::WriteConfig {
            path: config_file.clone(),
            source,
        })?;
        writeln!(out, "{json}").map_err(ImportError::Output)?;

        tracing::info!(model = %model_file.display(), config = %config_file.display(), "import finished");
        Ok(ImportOutcome { model_file, config_file, config })
    }
}
