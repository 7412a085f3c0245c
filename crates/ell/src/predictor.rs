use serde::{Deserialize, Serialize};

use crate::{EllError, Tensor, TensorShape, layers::Layer};

/// A feed-forward neural network evaluated layer by layer
///
/// The layer chain is validated on construction: every layer must consume
/// exactly the shape the previous one produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetworkPredictor {
    input_shape: TensorShape,
    layers: Vec<Layer>,
}

impl NeuralNetworkPredictor {
    /// Builds a predictor from its input shape and ordered layers
    ///
    /// # Errors
    /// Returns [`EllError::ShapeMismatch`] for the first layer whose input shape
    /// does not match the output shape of the layer before it.
    pub fn new(input_shape: TensorShape, layers: Vec<Layer>) -> Result<Self, EllError> {
        let predictor = Self { input_shape, layers };
        predictor.validate()?;
        Ok(predictor)
    }

    /// Checks every layer on its own and then the chain between them
    pub fn validate(&self) -> Result<(), EllError> {
        self.input_shape.checked_size().ok_or(EllError::ShapeTooLarge(self.input_shape))?;
        let mut current = self.input_shape;
        for (index, layer) in self.layers.iter().enumerate() {
            layer.validate()?;
            if layer.input_shape() != current {
                return Err(EllError::ShapeMismatch {
                    index,
                    layer: layer.name(),
                    expected: layer.input_shape(),
                    actual: current,
                });
            }
            current = layer.output_shape();
        }
        Ok(())
    }

    pub fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    /// Shape produced by the last layer, or the input shape of an empty network
    pub fn output_shape(&self) -> TensorShape {
        self.layers.last().map_or(self.input_shape, Layer::output_shape)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Runs the network on an input laid out row-major with channels innermost
    pub fn predict(&self, input: &[f32]) -> Result<Vec<f32>, EllError> {
        let mut tensor = Tensor::from_vec(self.input_shape, input.to_vec())?;
        for layer in &self.layers {
            tensor = layer.compute(&tensor)?;
        }
        Ok(tensor.into_vec())
    }
}
