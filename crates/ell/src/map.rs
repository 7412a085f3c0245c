//! Saveable model maps
//!
//! A [`Map`] is the unit that gets written to an `.ellmodel` file: a predictor
//! plus the input and output shapes a host needs to drive it. Files are JSON
//! documents tagged with a format name and version.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::{EllError, NeuralNetworkPredictor, TensorShape};

/// Format tag written into every map file
pub const MAP_FORMAT: &str = "ell.map";
/// Current map file version
pub const MAP_VERSION: u32 = 1;

/// A packaged predictor ready to be saved or evaluated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Map {
    format: String,
    version: u32,
    input_shape: TensorShape,
    output_shape: TensorShape,
    predictor: NeuralNetworkPredictor,
}

impl Map {
    /// Wraps a predictor into a map
    pub fn from_predictor(predictor: NeuralNetworkPredictor) -> Self {
        Self {
            format: MAP_FORMAT.to_string(),
            version: MAP_VERSION,
            input_shape: predictor.input_shape(),
            output_shape: predictor.output_shape(),
            predictor,
        }
    }

    pub fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    pub fn output_shape(&self) -> TensorShape {
        self.output_shape
    }

    pub fn predictor(&self) -> &NeuralNetworkPredictor {
        &self.predictor
    }

    /// Evaluates the wrapped predictor
    pub fn compute(&self, input: &[f32]) -> Result<Vec<f32>, EllError> {
        self.predictor.predict(input)
    }

    /// Serializes the map to its JSON file representation
    pub fn to_json(&self) -> Result<String, EllError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a map from JSON, rejecting unknown formats and versions
    ///
    /// Every layer is validated the way its constructor would, so a map that
    /// loads can be computed.
    pub fn from_json(json: &str) -> Result<Self, EllError> {
        let map: Map = serde_json::from_str(json)?;
        if map.format != MAP_FORMAT || map.version != MAP_VERSION {
            return Err(EllError::UnsupportedMap {
                format: map.format,
                version: map.version,
            });
        }
        map.predictor.validate()?;
        for (what, declared, actual) in [
            ("input", map.input_shape, map.predictor.input_shape()),
            ("output", map.output_shape, map.predictor.output_shape()),
        ] {
            if declared != actual {
                return Err(EllError::MapShapeMismatch { what, declared, actual });
            }
        }
        Ok(map)
    }

    /// Writes the map to `path`, replacing any existing file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), EllError> {
        let path = path.as_ref();
        let json = self.to_json()?;
        fs::write(path, json).map_err(|source| EllError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), layers = self.predictor.layers().len(), "saved map");
        Ok(())
    }

    /// Reads a map previously written by [`Map::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EllError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| EllError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}
