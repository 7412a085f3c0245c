//! Darknet to ELL layer conversion
//!
//! Each Darknet layer expands into one or more ELL layers. A convolutional or
//! connected layer becomes the linear operation followed by its tail:
//! batch normalization and scaling (when batch-normalized), bias, and the
//! activation (unless it is linear).

use ell::{
    NeuralNetworkPredictor, TensorShape,
    layers::{ActivationLayer, BatchNormalizationLayer, BiasLayer, ConvolutionalLayer, FullyConnectedLayer, Layer, PoolingKind, PoolingLayer, ScalingLayer, SoftmaxLayer},
};

use crate::{
    DarknetError,
    cfg::{DarknetActivation, DarknetLayer, DarknetLayerKind, DarknetNetwork},
    weights::WeightsReader,
};

/// Epsilon Darknet adds to the variance when normalizing
const BATCH_NORM_EPSILON: f32 = 0.000001;

/// Learned batch normalization parameters of one layer
struct Normalization {
    scales: Vec<f32>,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

impl Normalization {
    fn read(weights: &mut WeightsReader, count: usize, layer: &str) -> Result<Self, DarknetError> {
        Ok(Self {
            scales: weights.read_floats(count, &format!("{layer} scales"))?,
            mean: weights.read_floats(count, &format!("{layer} rolling mean"))?,
            variance: weights.read_floats(count, &format!("{layer} rolling variance"))?,
        })
    }
}

/// Converts a parsed Darknet network into an ELL predictor
///
/// Parameters are consumed from `weights` in Darknet's storage order, so the
/// reader must be positioned right after the file header.
///
/// # Arguments
/// * `network` - Network description with inferred shapes
/// * `weights` - Reader over the matching weights file
///
/// # Returns
/// A predictor with the same input and output shapes as `network`
pub fn predictor_from_network(network: &DarknetNetwork, weights: &mut WeightsReader) -> Result<NeuralNetworkPredictor, DarknetError> {
    let mut layers: Vec<Layer> = Vec::new();

    for layer in &network.layers {
        let first_new_layer = layers.len();
        match &layer.kind {
            DarknetLayerKind::Convolutional {
                filters,
                size,
                stride,
                padding,
                batch_normalize,
                activation,
            } => {
                let biases = weights.read_floats(*filters, "convolutional biases")?;
                let normalization = if *batch_normalize { Some(Normalization::read(weights, *filters, "convolutional")?) } else { None };
                let count = parameter_count(layer, &[*filters, layer.input_shape.channels, *size, *size])?;
                let kernel = weights.read_floats(count, "convolutional weights")?;

                layers.push(ConvolutionalLayer::new(layer.input_shape, *filters, *size, *stride, *padding, kernel)?.into());
                push_tail(&mut layers, layer.output_shape, biases, normalization, *activation)?;
            }
            DarknetLayerKind::Connected {
                outputs,
                batch_normalize,
                activation,
            } => {
                let inputs = layer.input_shape.size();
                let biases = weights.read_floats(*outputs, "connected biases")?;
                let mut matrix = weights.read_floats(parameter_count(layer, &[*outputs, inputs])?, "connected weights")?;
                if weights.header().transposed() {
                    matrix = transpose(&matrix, inputs, *outputs);
                }
                let normalization = if *batch_normalize { Some(Normalization::read(weights, *outputs, "connected")?) } else { None };

                layers.push(FullyConnectedLayer::new(layer.input_shape, *outputs, matrix)?.into());
                push_tail(&mut layers, layer.output_shape, biases, normalization, *activation)?;
            }
            DarknetLayerKind::MaxPool { size, stride, padding } => {
                layers.push(PoolingLayer::new(layer.input_shape, PoolingKind::Max, *size, *stride, *padding)?.into());
            }
            DarknetLayerKind::AvgPool => {
                let TensorShape { rows, columns, .. } = layer.input_shape;
                if rows != columns {
                    return Err(DarknetError::InvalidGeometry {
                        line: layer.line,
                        kind: layer.kind.name().to_string(),
                        message: format!("global average pooling needs a square input, got {}", layer.input_shape),
                    });
                }
                layers.push(PoolingLayer::new(layer.input_shape, PoolingKind::Mean, rows, 1, 0)?.into());
            }
            DarknetLayerKind::Softmax => layers.push(SoftmaxLayer { shape: layer.input_shape }.into()),
            DarknetLayerKind::Dropout | DarknetLayerKind::Cost => {}
        }

        let converted: Vec<&str> = layers[first_new_layer..].iter().map(Layer::name).collect();
        tracing::debug!(line = layer.line, darknet = layer.kind.name(), ell = ?converted, "converted layer");
    }

    Ok(NeuralNetworkPredictor::new(network.input_shape, layers)?)
}

fn push_tail(layers: &mut Vec<Layer>, shape: TensorShape, biases: Vec<f32>, normalization: Option<Normalization>, activation: DarknetActivation) -> Result<(), DarknetError> {
    if let Some(Normalization { scales, mean, variance }) = normalization {
        layers.push(BatchNormalizationLayer::new(shape, mean, variance, BATCH_NORM_EPSILON)?.into());
        layers.push(ScalingLayer::new(shape, scales)?.into());
    }
    layers.push(BiasLayer::new(shape, biases)?.into());
    if let Some(activation) = activation.to_ell() {
        layers.push(ActivationLayer { shape, activation }.into());
    }
    Ok(())
}

/// Number of weights a layer stores, rejecting counts that overflow
fn parameter_count(layer: &DarknetLayer, factors: &[usize]) -> Result<usize, DarknetError> {
    factors
        .iter()
        .try_fold(1usize, |count, factor| count.checked_mul(*factor))
        .ok_or_else(|| DarknetError::InvalidGeometry {
            line: layer.line,
            kind: layer.kind.name().to_string(),
            message: format!("weight count {factors:?} is too large"),
        })
}

/// Transposes a row-major `rows x columns` matrix
fn transpose(matrix: &[f32], rows: usize, columns: usize) -> Vec<f32> {
    let mut transposed = vec![0.0; matrix.len()];
    for row in 0..rows {
        for column in 0..columns {
            transposed[column * rows + row] = matrix[row * columns + column];
        }
    }
    transposed
}
