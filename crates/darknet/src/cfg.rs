//! Darknet network description parsing
//!
//! Darknet describes a network as an INI-like list of sections. The first
//! section (`[net]`) gives the input dimensions, every following section adds
//! one layer:
//!
//! ```text
//! [net]
//! width=224
//! height=224
//! channels=3
//!
//! [convolutional]
//! filters=16
//! size=3
//! pad=1
//! activation=leaky
//! ```
//!
//! Parsing happens in two steps: [`parse_darknet_config`] splits the text into
//! untyped [`DarknetSection`]s, and [`DarknetNetwork::from_sections`] turns
//! those into typed layers with inferred tensor shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ell::{TensorShape, layers::ActivationKind};
use regex::Regex;

use crate::DarknetError;

/// Slope Darknet uses for its `leaky` activation
const LEAKY_ALPHA: f32 = 0.1;

/// One `[kind]` block of a Darknet config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DarknetSection {
    /// Section name without brackets, e.g. `convolutional`
    pub kind: String,
    /// 1-based line of the section header
    pub line: usize,
    pub options: BTreeMap<String, String>,
}

impl DarknetSection {
    /// Returns a string option, or `default` when absent
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.options.get(key).map(String::as_str).unwrap_or(default)
    }

    /// Returns a non-negative integer option, or `default` when absent
    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize, DarknetError> {
        self.get_parsed(key, default)
    }

    fn get_parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T, DarknetError> {
        match self.options.get(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| DarknetError::InvalidOption {
                line: self.line,
                key: key.to_string(),
                value: value.clone(),
            }),
        }
    }
}

/// Splits Darknet config text into sections
///
/// Blank lines and lines starting with `#` or `;` are ignored. When an option
/// appears twice in a section the first value wins, as in Darknet itself.
///
/// # Errors
/// Returns [`DarknetError::Syntax`] for options outside of any section and for
/// lines that are neither a section header nor a `key=value` pair.
pub fn parse_darknet_config(source: &str) -> Result<Vec<DarknetSection>, DarknetError> {
    let section_re = Regex::new(r"^\[\s*([A-Za-z_][A-Za-z0-9_]*)\s*\]$").unwrap();
    let option_re = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)$").unwrap();

    let mut sections: Vec<DarknetSection> = Vec::new();
    for (index, raw_line) in source.lines().enumerate() {
        let line = index + 1;
        let content = raw_line.trim();
        if content.is_empty() || content.starts_with('#') || content.starts_with(';') {
            continue;
        }

        if let Some(captures) = section_re.captures(content) {
            sections.push(DarknetSection {
                kind: captures[1].to_lowercase(),
                line,
                options: BTreeMap::new(),
            });
        } else if let Some(captures) = option_re.captures(content) {
            let section = sections.last_mut().ok_or_else(|| DarknetError::Syntax {
                line,
                message: format!("option '{}' appears before the first section", &captures[1]),
            })?;
            section.options.entry(captures[1].to_string()).or_insert_with(|| captures[2].trim().to_string());
        } else {
            return Err(DarknetError::Syntax {
                line,
                message: format!("unrecognized line '{content}'"),
            });
        }
    }

    Ok(sections)
}

/// Activation functions understood by the importer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DarknetActivation {
    Linear,
    Relu,
    Leaky,
    Logistic,
}

impl DarknetActivation {
    fn parse(section: &DarknetSection) -> Result<Self, DarknetError> {
        match section.get_str("activation", "logistic") {
            "linear" => Ok(Self::Linear),
            "relu" => Ok(Self::Relu),
            "leaky" => Ok(Self::Leaky),
            "logistic" => Ok(Self::Logistic),
            other => Err(DarknetError::UnsupportedActivation {
                line: section.line,
                activation: other.to_string(),
            }),
        }
    }

    /// The equivalent ELL activation, `None` for `linear`
    pub fn to_ell(self) -> Option<ActivationKind> {
        match self {
            Self::Linear => None,
            Self::Relu => Some(ActivationKind::Relu),
            Self::Leaky => Some(ActivationKind::LeakyRelu { alpha: LEAKY_ALPHA }),
            Self::Logistic => Some(ActivationKind::Sigmoid),
        }
    }
}

/// Typed layer parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DarknetLayerKind {
    Convolutional {
        filters: usize,
        size: usize,
        stride: usize,
        /// Zero padding on each side
        padding: usize,
        batch_normalize: bool,
        activation: DarknetActivation,
    },
    MaxPool {
        size: usize,
        stride: usize,
        /// Total padding per spatial dimension
        padding: usize,
    },
    /// Global average over the spatial dimensions
    AvgPool,
    Connected {
        outputs: usize,
        batch_normalize: bool,
        activation: DarknetActivation,
    },
    Softmax,
    /// Identity at inference time
    Dropout,
    /// Training objective; ignored at inference time
    Cost,
}

impl DarknetLayerKind {
    /// The section name this layer was declared with
    pub fn name(&self) -> &'static str {
        match self {
            Self::Convolutional { .. } => "convolutional",
            Self::MaxPool { .. } => "maxpool",
            Self::AvgPool => "avgpool",
            Self::Connected { .. } => "connected",
            Self::Softmax => "softmax",
            Self::Dropout => "dropout",
            Self::Cost => "cost",
        }
    }
}

/// A layer together with the shapes it consumes and produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DarknetLayer {
    pub kind: DarknetLayerKind,
    /// Line of the section header, for error messages
    pub line: usize,
    pub input_shape: TensorShape,
    pub output_shape: TensorShape,
}

impl fmt::Display for DarknetLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DarknetLayerKind::Convolutional { filters, size, stride, padding, batch_normalize, activation } => write!(
                f,
                "convolutional {filters} {size}x{size}/{stride} pad {padding}{} {activation:?}",
                if *batch_normalize { " bn" } else { "" }
            )?,
            DarknetLayerKind::MaxPool { size, stride, padding } => write!(f, "maxpool {size}x{size}/{stride} pad {padding}")?,
            DarknetLayerKind::Connected { outputs, batch_normalize, activation } => {
                write!(f, "connected {outputs}{} {activation:?}", if *batch_normalize { " bn" } else { "" })?
            }
            other => write!(f, "{}", other.name())?,
        }
        write!(f, ": {} -> {}", self.input_shape, self.output_shape)
    }
}

/// A parsed network: input shape plus layers with inferred shapes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DarknetNetwork {
    pub input_shape: TensorShape,
    pub layers: Vec<DarknetLayer>,
}

impl DarknetNetwork {
    /// Parses config text into a network
    pub fn parse(source: &str) -> Result<Self, DarknetError> {
        Self::from_sections(&parse_darknet_config(source)?)
    }

    /// Builds a network from parsed sections, inferring each layer's shapes
    pub fn from_sections(sections: &[DarknetSection]) -> Result<Self, DarknetError> {
        let (net, rest) = sections.split_first().ok_or(DarknetError::MissingNetSection)?;
        if net.kind != "net" && net.kind != "network" {
            return Err(DarknetError::MissingNetSection);
        }

        let input_shape = TensorShape::new(net.get_usize("height", 0)?, net.get_usize("width", 0)?, net.get_usize("channels", 0)?);
        if matches!(input_shape.checked_size(), None | Some(0)) {
            return Err(DarknetError::InvalidDimensions {
                line: net.line,
                shape: input_shape,
            });
        }

        let mut layers = Vec::with_capacity(rest.len());
        let mut current = input_shape;
        for section in rest {
            let layer = parse_layer(section, current)?;
            tracing::debug!(line = layer.line, layer = %layer, "parsed darknet layer");
            current = layer.output_shape;
            layers.push(layer);
        }

        Ok(Self { input_shape, layers })
    }

    /// Shape produced by the last layer
    pub fn output_shape(&self) -> TensorShape {
        self.layers.last().map_or(self.input_shape, |layer| layer.output_shape)
    }
}

fn parse_layer(section: &DarknetSection, input_shape: TensorShape) -> Result<DarknetLayer, DarknetError> {
    let geometry_error = |message: String| DarknetError::InvalidGeometry {
        line: section.line,
        kind: section.kind.clone(),
        message,
    };

    let (kind, output_shape) = match section.kind.as_str() {
        "convolutional" | "conv" => {
            let filters = section.get_usize("filters", 1)?;
            let size = section.get_usize("size", 1)?;
            let stride = section.get_usize("stride", 1)?;
            let pad = section.get_usize("pad", 0)?;
            let padding = if pad != 0 { size / 2 } else { section.get_usize("padding", 0)? };
            let groups = section.get_usize("groups", 1)?;
            if groups != 1 {
                return Err(geometry_error(format!("grouped convolution (groups={groups}) is not supported")));
            }
            if filters == 0 || size == 0 || stride == 0 {
                return Err(geometry_error("filters, size and stride must be positive".to_string()));
            }
            let total_padding = padding.checked_mul(2).ok_or_else(|| geometry_error(format!("padding {padding} is too large")))?;
            let output_shape = TensorShape::new(
                window_output(input_shape.rows, total_padding, size, stride).map_err(&geometry_error)?,
                window_output(input_shape.columns, total_padding, size, stride).map_err(&geometry_error)?,
                filters,
            );
            let kind = DarknetLayerKind::Convolutional {
                filters,
                size,
                stride,
                padding,
                batch_normalize: section.get_usize("batch_normalize", 0)? != 0,
                activation: DarknetActivation::parse(section)?,
            };
            (kind, output_shape)
        }
        "maxpool" | "max" => {
            let stride = section.get_usize("stride", 1)?;
            let size = section.get_usize("size", stride)?;
            let padding = section.get_usize("padding", size.saturating_sub(1))?;
            if size == 0 || stride == 0 {
                return Err(geometry_error("size and stride must be positive".to_string()));
            }
            let output_shape = TensorShape::new(
                window_output(input_shape.rows, padding, size, stride).map_err(&geometry_error)?,
                window_output(input_shape.columns, padding, size, stride).map_err(&geometry_error)?,
                input_shape.channels,
            );
            (DarknetLayerKind::MaxPool { size, stride, padding }, output_shape)
        }
        "avgpool" | "avg" => (DarknetLayerKind::AvgPool, TensorShape::new(1, 1, input_shape.channels)),
        "connected" | "conn" => {
            let outputs = section.get_usize("output", 1)?;
            let kind = DarknetLayerKind::Connected {
                outputs,
                batch_normalize: section.get_usize("batch_normalize", 0)? != 0,
                activation: DarknetActivation::parse(section)?,
            };
            (kind, TensorShape::new(1, 1, outputs))
        }
        "softmax" | "soft" => (DarknetLayerKind::Softmax, input_shape),
        "dropout" => (DarknetLayerKind::Dropout, input_shape),
        "cost" => (DarknetLayerKind::Cost, input_shape),
        other => {
            return Err(DarknetError::UnsupportedLayer {
                line: section.line,
                kind: other.to_string(),
            });
        }
    };

    if output_shape.checked_size().is_none() {
        return Err(geometry_error(format!("output shape {output_shape} is too large")));
    }

    Ok(DarknetLayer {
        kind,
        line: section.line,
        input_shape,
        output_shape,
    })
}

/// Number of `size` windows, `stride` apart, over `extent` cells plus `padding`
fn window_output(extent: usize, padding: usize, size: usize, stride: usize) -> Result<usize, String> {
    let padded = extent
        .checked_add(padding)
        .ok_or_else(|| format!("padding {padding} is too large for input extent {extent}"))?;
    if padded < size {
        return Err(format!("window {size} exceeds padded input extent {padded}"));
    }
    Ok((padded - size) / stride + 1)
}
