//! Neural network layers
//!
//! Every layer records the shape it consumes and the shape it produces, so a
//! predictor can verify that consecutive layers fit together before anything is
//! evaluated. Per-channel parameters (bias, scale, normalization statistics) are
//! indexed by output channel.

use serde::{Deserialize, Serialize};

use crate::{EllError, Tensor, TensorShape};

/// Element-wise non-linearity applied by an [`ActivationLayer`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivationKind {
    /// `max(x, 0)`
    Relu,
    /// `x` for positive inputs, `alpha * x` otherwise
    LeakyRelu { alpha: f32 },
    /// Logistic function `1 / (1 + e^-x)`
    Sigmoid,
}

impl ActivationKind {
    /// Applies the activation to a single value
    pub fn apply(&self, x: f32) -> f32 {
        match self {
            ActivationKind::Relu => x.max(0.0),
            ActivationKind::LeakyRelu { alpha } => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            ActivationKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

/// Reduction used by a [`PoolingLayer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingKind {
    Max,
    Mean,
}

/// 2D convolution over all input channels
///
/// Weights are stored as `[filter][channel][row][column]`. Zero padding of
/// `padding` cells is applied on every side of the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvolutionalLayer {
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    /// Side length of the square receptive field
    pub size: usize,
    pub stride: usize,
    pub padding: usize,
    pub weights: Vec<f32>,
}

impl ConvolutionalLayer {
    /// Creates a convolutional layer and computes its output shape
    ///
    /// # Arguments
    /// * `input_shape` - Shape of the incoming feature map
    /// * `filters` - Number of filters, i.e. output channels
    /// * `size` - Receptive field side length
    /// * `stride` - Step between neighboring receptive fields
    /// * `padding` - Zero padding added on each side
    /// * `weights` - `filters * channels * size * size` filter coefficients
    pub fn new(input_shape: TensorShape, filters: usize, size: usize, stride: usize, padding: usize, weights: Vec<f32>) -> Result<Self, EllError> {
        let layer = Self {
            input_shape,
            output_shape: Self::output_for(input_shape, filters, size, stride, padding)?,
            size,
            stride,
            padding,
            weights,
        };
        layer.validate()?;
        Ok(layer)
    }

    fn output_for(input_shape: TensorShape, filters: usize, size: usize, stride: usize, padding: usize) -> Result<TensorShape, EllError> {
        const LAYER: &str = "convolutional";
        if size == 0 || stride == 0 || filters == 0 {
            return Err(EllError::InvalidGeometry {
                layer: LAYER,
                message: format!("filters ({filters}), size ({size}) and stride ({stride}) must be positive"),
            });
        }
        let total_padding = padding.checked_mul(2).ok_or_else(|| EllError::InvalidGeometry {
            layer: LAYER,
            message: format!("padding {padding} is too large"),
        })?;
        Ok(TensorShape::new(
            window_output(LAYER, input_shape.rows, total_padding, size, stride)?,
            window_output(LAYER, input_shape.columns, total_padding, size, stride)?,
            filters,
        ))
    }

    fn validate(&self) -> Result<(), EllError> {
        let output_shape = Self::output_for(self.input_shape, self.output_shape.channels, self.size, self.stride, self.padding)?;
        check_output_shape("convolutional", self.output_shape, output_shape)?;
        let expected = parameter_count(
            "convolutional",
            &[self.output_shape.channels, self.input_shape.channels, self.size, self.size],
        )?;
        check_parameters("convolutional", "weight", expected, &self.weights)
    }

    fn compute(&self, input: &Tensor) -> Tensor {
        let TensorShape { rows, columns, channels } = self.input_shape;
        let mut output = Tensor::zeros(self.output_shape);

        for filter in 0..self.output_shape.channels {
            for out_row in 0..self.output_shape.rows {
                for out_column in 0..self.output_shape.columns {
                    let mut sum = 0.0;
                    for channel in 0..channels {
                        let kernel = &self.weights[(filter * channels + channel) * self.size * self.size..][..self.size * self.size];
                        for i in 0..self.size {
                            let Some(row) = (out_row * self.stride + i).checked_sub(self.padding).filter(|row| *row < rows) else {
                                continue;
                            };
                            for j in 0..self.size {
                                let Some(column) = (out_column * self.stride + j).checked_sub(self.padding).filter(|column| *column < columns) else {
                                    continue;
                                };
                                sum += input.get(row, column, channel) * kernel[i * self.size + j];
                            }
                        }
                    }
                    output.set(out_row, out_column, filter, sum);
                }
            }
        }

        output
    }
}

/// Normalizes each channel with fixed running statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchNormalizationLayer {
    pub shape: TensorShape,
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
    pub epsilon: f32,
}

impl BatchNormalizationLayer {
    pub fn new(shape: TensorShape, mean: Vec<f32>, variance: Vec<f32>, epsilon: f32) -> Result<Self, EllError> {
        let layer = Self { shape, mean, variance, epsilon };
        layer.validate()?;
        Ok(layer)
    }

    fn validate(&self) -> Result<(), EllError> {
        check_parameters("batch normalization", "mean", self.shape.channels, &self.mean)?;
        check_parameters("batch normalization", "variance", self.shape.channels, &self.variance)?;
        check_parameters("batch normalization", "epsilon", 1, &[self.epsilon])
    }
}

/// Multiplies each channel by a constant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingLayer {
    pub shape: TensorShape,
    pub scales: Vec<f32>,
}

impl ScalingLayer {
    pub fn new(shape: TensorShape, scales: Vec<f32>) -> Result<Self, EllError> {
        let layer = Self { shape, scales };
        layer.validate()?;
        Ok(layer)
    }

    fn validate(&self) -> Result<(), EllError> {
        check_parameters("scaling", "scale", self.shape.channels, &self.scales)
    }
}

/// Adds a constant to each channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasLayer {
    pub shape: TensorShape,
    pub bias: Vec<f32>,
}

impl BiasLayer {
    pub fn new(shape: TensorShape, bias: Vec<f32>) -> Result<Self, EllError> {
        let layer = Self { shape, bias };
        layer.validate()?;
        Ok(layer)
    }

    fn validate(&self) -> Result<(), EllError> {
        check_parameters("bias", "bias", self.shape.channels, &self.bias)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationLayer {
    pub shape: TensorShape,
    pub activation: ActivationKind,
}

impl ActivationLayer {
    fn validate(&self) -> Result<(), EllError> {
        match self.activation {
            ActivationKind::LeakyRelu { alpha } => check_parameters("activation", "alpha", 1, &[alpha]),
            ActivationKind::Relu | ActivationKind::Sigmoid => Ok(()),
        }
    }
}

/// Max or mean pooling over square windows
///
/// `padding` is the total padding per spatial dimension; `padding / 2` cells
/// are placed before the first row and column and the rest after the last.
/// Cells that fall into the padding are skipped, so they neither win a max nor
/// count towards a mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolingLayer {
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    pub kind: PoolingKind,
    pub size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl PoolingLayer {
    pub fn new(input_shape: TensorShape, kind: PoolingKind, size: usize, stride: usize, padding: usize) -> Result<Self, EllError> {
        Ok(Self {
            input_shape,
            output_shape: Self::output_for(input_shape, size, stride, padding)?,
            kind,
            size,
            stride,
            padding,
        })
    }

    fn output_for(input_shape: TensorShape, size: usize, stride: usize, padding: usize) -> Result<TensorShape, EllError> {
        if size == 0 || stride == 0 {
            return Err(EllError::InvalidGeometry {
                layer: "pooling",
                message: format!("size ({size}) and stride ({stride}) must be positive"),
            });
        }
        Ok(TensorShape::new(
            window_output("pooling", input_shape.rows, padding, size, stride)?,
            window_output("pooling", input_shape.columns, padding, size, stride)?,
            input_shape.channels,
        ))
    }

    fn validate(&self) -> Result<(), EllError> {
        let output_shape = Self::output_for(self.input_shape, self.size, self.stride, self.padding)?;
        check_output_shape("pooling", self.output_shape, output_shape)
    }

    fn compute(&self, input: &Tensor) -> Tensor {
        let TensorShape { rows, columns, channels } = self.input_shape;
        let offset = self.padding / 2;
        let mut output = Tensor::zeros(self.output_shape);

        for out_row in 0..self.output_shape.rows {
            for out_column in 0..self.output_shape.columns {
                for channel in 0..channels {
                    let mut max = f32::NEG_INFINITY;
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for i in 0..self.size {
                        let Some(row) = (out_row * self.stride + i).checked_sub(offset).filter(|row| *row < rows) else {
                            continue;
                        };
                        for j in 0..self.size {
                            let Some(column) = (out_column * self.stride + j).checked_sub(offset).filter(|column| *column < columns) else {
                                continue;
                            };
                            let value = input.get(row, column, channel);
                            max = max.max(value);
                            sum += value;
                            count += 1;
                        }
                    }
                    let value = match (self.kind, count) {
                        (_, 0) => 0.0,
                        (PoolingKind::Max, _) => max,
                        (PoolingKind::Mean, _) => sum / count as f32,
                    };
                    output.set(out_row, out_column, channel, value);
                }
            }
        }

        output
    }
}

/// Dense layer producing a `1 x 1 x outputs` tensor
///
/// The input is flattened in planar (channel-major) order before the
/// `outputs x inputs` row-major weight matrix is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullyConnectedLayer {
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
    pub weights: Vec<f32>,
}

impl FullyConnectedLayer {
    pub fn new(input_shape: TensorShape, outputs: usize, weights: Vec<f32>) -> Result<Self, EllError> {
        let layer = Self {
            input_shape,
            output_shape: TensorShape::new(1, 1, outputs),
            weights,
        };
        layer.validate()?;
        Ok(layer)
    }

    fn validate(&self) -> Result<(), EllError> {
        let outputs = self.output_shape.channels;
        check_output_shape("fully connected", self.output_shape, TensorShape::new(1, 1, outputs))?;
        let inputs = self.input_shape.checked_size().ok_or(EllError::ShapeTooLarge(self.input_shape))?;
        let expected = parameter_count("fully connected", &[outputs, inputs])?;
        check_parameters("fully connected", "weight", expected, &self.weights)
    }

    fn compute(&self, input: &Tensor) -> Tensor {
        let planar = input.to_planar();
        let inputs = planar.len();

        let mut output = Tensor::zeros(self.output_shape);
        for (index, value) in output.data_mut().iter_mut().enumerate() {
            let row = &self.weights[index * inputs..(index + 1) * inputs];
            *value = row.iter().zip(&planar).map(|(w, x)| w * x).sum();
        }
        output
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxLayer {
    pub shape: TensorShape,
}

/// A single step of a neural network predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    Convolutional(ConvolutionalLayer),
    BatchNormalization(BatchNormalizationLayer),
    Scaling(ScalingLayer),
    Bias(BiasLayer),
    Activation(ActivationLayer),
    Pooling(PoolingLayer),
    FullyConnected(FullyConnectedLayer),
    Softmax(SoftmaxLayer),
}

impl Layer {
    /// Human-readable layer kind
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Convolutional(_) => "Convolutional",
            Layer::BatchNormalization(_) => "BatchNormalization",
            Layer::Scaling(_) => "Scaling",
            Layer::Bias(_) => "Bias",
            Layer::Activation(_) => "Activation",
            Layer::Pooling(_) => "Pooling",
            Layer::FullyConnected(_) => "FullyConnected",
            Layer::Softmax(_) => "Softmax",
        }
    }

    pub fn input_shape(&self) -> TensorShape {
        match self {
            Layer::Convolutional(layer) => layer.input_shape,
            Layer::BatchNormalization(layer) => layer.shape,
            Layer::Scaling(layer) => layer.shape,
            Layer::Bias(layer) => layer.shape,
            Layer::Activation(layer) => layer.shape,
            Layer::Pooling(layer) => layer.input_shape,
            Layer::FullyConnected(layer) => layer.input_shape,
            Layer::Softmax(layer) => layer.shape,
        }
    }

    pub fn output_shape(&self) -> TensorShape {
        match self {
            Layer::Convolutional(layer) => layer.output_shape,
            Layer::Pooling(layer) => layer.output_shape,
            Layer::FullyConnected(layer) => layer.output_shape,
            _ => self.input_shape(),
        }
    }

    /// Checks the layer's geometry and parameters
    ///
    /// Constructors run the same checks; this covers layers that were
    /// deserialized rather than constructed. A layer that validates can be
    /// evaluated without panicking.
    pub fn validate(&self) -> Result<(), EllError> {
        for shape in [self.input_shape(), self.output_shape()] {
            shape.checked_size().ok_or(EllError::ShapeTooLarge(shape))?;
        }
        match self {
            Layer::Convolutional(layer) => layer.validate(),
            Layer::BatchNormalization(layer) => layer.validate(),
            Layer::Scaling(layer) => layer.validate(),
            Layer::Bias(layer) => layer.validate(),
            Layer::Activation(layer) => layer.validate(),
            Layer::Pooling(layer) => layer.validate(),
            Layer::FullyConnected(layer) => layer.validate(),
            Layer::Softmax(_) => Ok(()),
        }
    }

    /// Evaluates the layer on a tensor of its input shape
    pub fn compute(&self, input: &Tensor) -> Result<Tensor, EllError> {
        if input.shape() != self.input_shape() {
            return Err(EllError::InputSize {
                shape: self.input_shape(),
                expected: self.input_shape().size(),
                actual: input.data().len(),
            });
        }

        let output = match self {
            Layer::Convolutional(layer) => layer.compute(input),
            Layer::Pooling(layer) => layer.compute(input),
            Layer::FullyConnected(layer) => layer.compute(input),
            Layer::BatchNormalization(layer) => map_channels(input, |channel, x| (x - layer.mean[channel]) / (layer.variance[channel] + layer.epsilon).sqrt()),
            Layer::Scaling(layer) => map_channels(input, |channel, x| x * layer.scales[channel]),
            Layer::Bias(layer) => map_channels(input, |channel, x| x + layer.bias[channel]),
            Layer::Activation(layer) => map_channels(input, |_, x| layer.activation.apply(x)),
            Layer::Softmax(_) => softmax(input),
        };
        Ok(output)
    }
}

impl From<ConvolutionalLayer> for Layer {
    fn from(layer: ConvolutionalLayer) -> Self {
        Layer::Convolutional(layer)
    }
}

impl From<BatchNormalizationLayer> for Layer {
    fn from(layer: BatchNormalizationLayer) -> Self {
        Layer::BatchNormalization(layer)
    }
}

impl From<ScalingLayer> for Layer {
    fn from(layer: ScalingLayer) -> Self {
        Layer::Scaling(layer)
    }
}

impl From<BiasLayer> for Layer {
    fn from(layer: BiasLayer) -> Self {
        Layer::Bias(layer)
    }
}

impl From<ActivationLayer> for Layer {
    fn from(layer: ActivationLayer) -> Self {
        Layer::Activation(layer)
    }
}

impl From<PoolingLayer> for Layer {
    fn from(layer: PoolingLayer) -> Self {
        Layer::Pooling(layer)
    }
}

impl From<FullyConnectedLayer> for Layer {
    fn from(layer: FullyConnectedLayer) -> Self {
        Layer::FullyConnected(layer)
    }
}

impl From<SoftmaxLayer> for Layer {
    fn from(layer: SoftmaxLayer) -> Self {
        Layer::Softmax(layer)
    }
}

/// Requires exactly `expected` finite values
///
/// Non-finite values are rejected because JSON has no representation for them.
fn check_parameters(layer: &'static str, what: &'static str, expected: usize, values: &[f32]) -> Result<(), EllError> {
    if values.len() != expected {
        return Err(EllError::ParameterCount {
            layer,
            what,
            expected,
            actual: values.len(),
        });
    }
    match values.iter().position(|value| !value.is_finite()) {
        Some(index) => Err(EllError::NonFiniteParameter { layer, what, index }),
        None => Ok(()),
    }
}

fn parameter_count(layer: &'static str, factors: &[usize]) -> Result<usize, EllError> {
    factors
        .iter()
        .try_fold(1usize, |count, factor| count.checked_mul(*factor))
        .ok_or_else(|| EllError::InvalidGeometry {
            layer,
            message: format!("parameter count {factors:?} overflows"),
        })
}

/// Number of `size` windows, `stride` apart, over `extent` cells plus `padding`
fn window_output(layer: &'static str, extent: usize, padding: usize, size: usize, stride: usize) -> Result<usize, EllError> {
    let padded = extent.checked_add(padding).ok_or_else(|| EllError::InvalidGeometry {
        layer,
        message: format!("padding {padding} is too large for extent {extent}"),
    })?;
    if padded < size {
        return Err(EllError::InvalidGeometry {
            layer,
            message: format!("window {size} does not fit padded extent {padded}"),
        });
    }
    Ok((padded - size) / stride + 1)
}

fn check_output_shape(layer: &'static str, declared: TensorShape, expected: TensorShape) -> Result<(), EllError> {
    if declared != expected {
        return Err(EllError::InvalidGeometry {
            layer,
            message: format!("output shape {declared} does not match the {expected} its geometry produces"),
        });
    }
    Ok(())
}

fn map_channels(input: &Tensor, f: impl Fn(usize, f32) -> f32) -> Tensor {
    let channels = input.shape().channels;
    let mut output = input.clone();
    for (index, value) in output.data_mut().iter_mut().enumerate() {
        *value = f(index % channels, *value);
    }
    output
}

fn softmax(input: &Tensor) -> Tensor {
    let max = input.data().iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut output = input.clone();
    let mut total = 0.0;
    for value in output.data_mut() {
        *value = (*value - max).exp();
        total += *value;
    }
    if total > 0.0 {
        for value in output.data_mut() {
            *value /= total;
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: TensorShape, data: &[f32]) -> Tensor {
        Tensor::from_vec(shape, data.to_vec()).unwrap()
    }

    #[test]
    fn test_convolution_output_shape() {
        let input = TensorShape::new(4, 4, 3);
        let padded = ConvolutionalLayer::new(input, 8, 3, 1, 1, vec![0.0; 8 * 3 * 9]).unwrap();
        assert_eq!(padded.output_shape, TensorShape::new(4, 4, 8));

        let strided = ConvolutionalLayer::new(input, 2, 2, 2, 0, vec![0.0; 2 * 3 * 4]).unwrap();
        assert_eq!(strided.output_shape, TensorShape::new(2, 2, 2));
    }

    #[test]
    fn test_convolution_rejects_bad_parameters() {
        let input = TensorShape::new(2, 2, 1);
        assert!(matches!(
            ConvolutionalLayer::new(input, 1, 3, 1, 0, vec![0.0; 9]),
            Err(EllError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            ConvolutionalLayer::new(input, 1, 1, 1, 0, vec![0.0; 2]),
            Err(EllError::ParameterCount { expected: 1, actual: 2, .. })
        ));
    }

    #[test]
    fn test_convolution_with_padding() {
        // Summing 3x3 kernel over a 2x2 input of ones with one cell of padding:
        // every output sees all four inputs
        let input = tensor(TensorShape::new(2, 2, 1), &[1.0, 1.0, 1.0, 1.0]);
        let layer = Layer::from(ConvolutionalLayer::new(input.shape(), 1, 3, 1, 1, vec![1.0; 9]).unwrap());
        let output = layer.compute(&input).unwrap();
        assert_eq!(output.shape(), TensorShape::new(2, 2, 1));
        assert_eq!(output.data(), &[4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_convolution_kernel_orientation() {
        // Kernel picks the top-left neighbor only
        let input = tensor(TensorShape::new(2, 2, 1), &[1.0, 2.0, 3.0, 4.0]);
        let mut weights = vec![0.0; 9];
        weights[0] = 1.0;
        let layer = Layer::from(ConvolutionalLayer::new(input.shape(), 1, 3, 1, 1, weights).unwrap());
        let output = layer.compute(&input).unwrap();
        assert_eq!(output.data(), &[0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_channel_wise_layers() {
        let shape = TensorShape::new(1, 1, 2);
        let input = tensor(shape, &[3.0, -2.0]);

        let norm = Layer::from(BatchNormalizationLayer::new(shape, vec![1.0, 0.0], vec![4.0, 1.0], 0.0).unwrap());
        assert_eq!(norm.compute(&input).unwrap().data(), &[1.0, -2.0]);

        let scale = Layer::from(ScalingLayer::new(shape, vec![2.0, 0.5]).unwrap());
        assert_eq!(scale.compute(&input).unwrap().data(), &[6.0, -1.0]);

        let bias = Layer::from(BiasLayer::new(shape, vec![1.0, 1.0]).unwrap());
        assert_eq!(bias.compute(&input).unwrap().data(), &[4.0, -1.0]);

        assert!(BiasLayer::new(shape, vec![1.0]).is_err());
    }

    #[test]
    fn test_rejects_non_finite_parameters() {
        let shape = TensorShape::new(1, 1, 2);
        let err = BiasLayer::new(shape, vec![f32::INFINITY, f32::NAN]).unwrap_err();
        assert!(matches!(err, EllError::NonFiniteParameter { layer: "bias", index: 0, .. }));

        let err = BatchNormalizationLayer::new(shape, vec![0.0, 0.0], vec![1.0, 1.0], f32::NAN).unwrap_err();
        assert!(matches!(err, EllError::NonFiniteParameter { what: "epsilon", .. }));

        let err = FullyConnectedLayer::new(shape, 1, vec![1.0, f32::NEG_INFINITY]).unwrap_err();
        assert!(matches!(err, EllError::NonFiniteParameter { index: 1, .. }));

        let leaky = Layer::from(ActivationLayer {
            shape,
            activation: ActivationKind::LeakyRelu { alpha: f32::NAN },
        });
        assert!(matches!(leaky.validate(), Err(EllError::NonFiniteParameter { .. })));
    }

    #[test]
    fn test_oversized_geometry_is_an_error() {
        let input = TensorShape::new(4, 4, 1);
        assert!(matches!(
            ConvolutionalLayer::new(input, 1, 3, 1, usize::MAX / 2 + 1, vec![0.0; 9]),
            Err(EllError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            PoolingLayer::new(input, PoolingKind::Max, 2, 2, usize::MAX),
            Err(EllError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            FullyConnectedLayer::new(TensorShape::new(usize::MAX, 2, 1), 1, Vec::new()),
            Err(EllError::ShapeTooLarge(_))
        ));
    }

    #[test]
    fn test_validate_catches_edited_layers() {
        let shape = TensorShape::new(1, 1, 2);
        let mut bias = BiasLayer::new(shape, vec![1.0, 2.0]).unwrap();
        bias.bias.pop();
        assert!(matches!(
            Layer::from(bias).validate(),
            Err(EllError::ParameterCount { expected: 2, actual: 1, .. })
        ));

        let mut conv = ConvolutionalLayer::new(TensorShape::new(3, 3, 1), 1, 3, 1, 0, vec![0.0; 9]).unwrap();
        conv.output_shape = TensorShape::new(3, 3, 1);
        assert!(matches!(Layer::from(conv).validate(), Err(EllError::InvalidGeometry { .. })));

        let mut dense = FullyConnectedLayer::new(shape, 2, vec![0.0; 4]).unwrap();
        dense.weights.truncate(3);
        assert!(matches!(Layer::from(dense).validate(), Err(EllError::ParameterCount { .. })));
    }

    #[test]
    fn test_activations() {
        assert_eq!(ActivationKind::Relu.apply(-1.0), 0.0);
        assert_eq!(ActivationKind::Relu.apply(2.0), 2.0);
        assert_eq!(ActivationKind::LeakyRelu { alpha: 0.1 }.apply(-2.0), -0.2);
        assert_eq!(ActivationKind::Sigmoid.apply(0.0), 0.5);
    }

    #[test]
    fn test_max_pooling_with_padding() {
        // Darknet style 2x2/2 max pooling over 3x3 with total padding 1
        let input = tensor(TensorShape::new(3, 3, 1), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let layer = PoolingLayer::new(input.shape(), PoolingKind::Max, 2, 2, 1).unwrap();
        assert_eq!(layer.output_shape, TensorShape::new(2, 2, 1));
        let output = Layer::from(layer).compute(&input).unwrap();
        assert_eq!(output.data(), &[5.0, 6.0, 8.0, 9.0]);
    }

    #[test]
    fn test_global_mean_pooling() {
        let input = tensor(TensorShape::new(2, 2, 2), &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        let layer = PoolingLayer::new(input.shape(), PoolingKind::Mean, 2, 1, 0).unwrap();
        assert_eq!(layer.output_shape, TensorShape::new(1, 1, 2));
        let output = Layer::from(layer).compute(&input).unwrap();
        assert_eq!(output.data(), &[2.5, 25.0]);
    }

    #[test]
    fn test_fully_connected_uses_planar_order() {
        // 1x2x2 input, planar order is [1, 3, 2, 4]
        let input = tensor(TensorShape::new(1, 2, 2), &[1.0, 2.0, 3.0, 4.0]);
        let weights = vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let layer = Layer::from(FullyConnectedLayer::new(input.shape(), 2, weights).unwrap());
        assert_eq!(layer.output_shape(), TensorShape::new(1, 1, 2));
        assert_eq!(layer.compute(&input).unwrap().data(), &[1.0, 3.0]);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let input = tensor(TensorShape::new(1, 1, 3), &[1.0, 2.0, 1000.0]);
        let output = Layer::from(SoftmaxLayer { shape: input.shape() }).compute(&input).unwrap();
        let total: f32 = output.data().iter().sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert!(output.data()[2] > 0.99);
    }

    #[test]
    fn test_compute_rejects_wrong_shape() {
        let layer = Layer::from(SoftmaxLayer { shape: TensorShape::new(1, 1, 3) });
        let input = tensor(TensorShape::new(1, 1, 2), &[0.0, 0.0]);
        assert!(layer.compute(&input).is_err());
    }

    #[test]
    fn test_layer_serialization_is_tagged() {
        let layer = Layer::from(ActivationLayer {
            shape: TensorShape::new(1, 1, 1),
            activation: ActivationKind::LeakyRelu { alpha: 0.1 },
        });
        let json = serde_json::to_value(&layer).unwrap();
        assert_eq!(json["type"], "activation");
        assert_eq!(json["activation"]["kind"], "leaky_relu");
    }
}
