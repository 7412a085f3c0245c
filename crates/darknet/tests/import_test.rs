use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use ell::{Map, TensorShape};
use ell_darknet::{DarknetError, importer::ModelConfig, predictor_from_darknet_model};

const TINY_CFG: &str = "[net]
width=4
height=4
channels=1

[convolutional]
filters=2
size=3
stride=1
pad=1
activation=leaky

[maxpool]
size=2
stride=2

[connected]
output=3
activation=linear

[softmax]
";

/// Header (version 0.2, 64-bit seen) followed by the given parameters
fn weights_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for value in [0i32, 2, 0] {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes.extend_from_slice(&1000u64.to_le_bytes());
    for value in floats {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Parameters for `TINY_CFG`: conv biases (2) and weights (18), connected biases (3) and weights (24)
fn tiny_weights() -> Vec<f32> {
    let mut floats = vec![0.0, 0.5];
    floats.extend((0..18).map(|i| (i % 5) as f32 * 0.1 - 0.2));
    floats.extend([0.1, 0.0, -0.1]);
    floats.extend((0..24).map(|i| (i % 7) as f32 * 0.05 - 0.15));
    floats
}

fn write_tiny_model(dir: &Path) -> (PathBuf, PathBuf) {
    let config = dir.join("tiny.cfg");
    let weights = dir.join("tiny.weights");
    fs::write(&config, TINY_CFG).unwrap();
    fs::write(&weights, weights_bytes(&tiny_weights())).unwrap();
    (config, weights)
}

fn run_import(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_darknet_import"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir).unwrap().map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned()).collect();
    names.sort();
    names
}

#[test]
fn test_predictor_from_darknet_model() {
    let dir = tempfile::tempdir().unwrap();
    let (config, weights) = write_tiny_model(dir.path());

    let predictor = predictor_from_darknet_model(&config, &weights).unwrap();
    assert_eq!(predictor.input_shape(), TensorShape::new(4, 4, 1));
    assert_eq!(predictor.output_shape(), TensorShape::new(1, 1, 3));

    let names: Vec<&str> = predictor.layers().iter().map(|layer| layer.name()).collect();
    assert_eq!(names, vec!["Convolutional", "Bias", "Activation", "Pooling", "FullyConnected", "Bias", "Softmax"]);

    let output = predictor.predict(&[0.25; 16]).unwrap();
    assert_eq!(output.len(), 3);
    assert!((output.iter().sum::<f32>() - 1.0).abs() < 1e-5);
}

#[test]
fn test_truncated_weights_file() {
    let dir = tempfile::tempdir().unwrap();
    let (config, weights) = write_tiny_model(dir.path());
    fs::write(&weights, weights_bytes(&tiny_weights()[..30])).unwrap();

    let err = predictor_from_darknet_model(&config, &weights).unwrap_err();
    assert!(matches!(err, DarknetError::WeightsTruncated { .. }), "{err}");
}

#[test]
fn test_import_writes_model_and_config() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    let output = run_import(dir.path(), &["tiny.cfg", "tiny.weights"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let expected_json = r#"{
  "input_channels": 1,
  "input_columns": 4,
  "input_rows": 4,
  "model": "tiny.ellmodel",
  "output_channels": 3,
  "output_columns": 1,
  "output_rows": 1
}"#;
    assert_eq!(
        String::from_utf8(output.stdout).unwrap(),
        format!("Saving model file: 'tiny.ellmodel'\nSaving config file: 'tiny_config.json'\n{expected_json}\n")
    );
    assert_eq!(fs::read_to_string(dir.path().join("tiny_config.json")).unwrap(), expected_json);
    assert_eq!(file_names(dir.path()), vec!["tiny.cfg", "tiny.ellmodel", "tiny.weights", "tiny_config.json"]);

    let config: ModelConfig = serde_json::from_str(expected_json).unwrap();
    let map = Map::load(dir.path().join(&config.model)).unwrap();
    assert_eq!(map.input_shape(), TensorShape::new(config.input_rows, config.input_columns, config.input_channels));
    assert_eq!(map.output_shape(), TensorShape::new(config.output_rows, config.output_columns, config.output_channels));

    let predictor = predictor_from_darknet_model(dir.path().join("tiny.cfg"), dir.path().join("tiny.weights")).unwrap();
    let input: Vec<f32> = (0..16).map(|i| i as f32 / 16.0).collect();
    let saved = map.compute(&input).unwrap();
    let direct = predictor.predict(&input).unwrap();
    assert_eq!(saved.len(), direct.len());
    for (a, b) in saved.iter().zip(&direct) {
        assert!((a - b).abs() < 1e-6, "{saved:?} != {direct:?}");
    }
}

#[test]
fn test_import_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    assert!(run_import(dir.path(), &["tiny.cfg", "tiny.weights"]).status.success());
    let model = fs::read(dir.path().join("tiny.ellmodel")).unwrap();
    let config = fs::read(dir.path().join("tiny_config.json")).unwrap();

    assert!(run_import(dir.path(), &["tiny.cfg", "tiny.weights"]).status.success());
    assert_eq!(fs::read(dir.path().join("tiny.ellmodel")).unwrap(), model);
    assert_eq!(fs::read(dir.path().join("tiny_config.json")).unwrap(), config);
}

#[test]
fn test_wrong_argument_count_prints_usage() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    for args in [vec![], vec!["tiny.cfg"], vec!["tiny.cfg", "tiny.weights", "extra"]] {
        let output = run_import(dir.path(), &args);
        assert_eq!(output.status.code(), Some(1));
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(stdout.starts_with("Usage darknet_import configFile weightsFile\n"), "{stdout}");
        assert_eq!(file_names(dir.path()), vec!["tiny.cfg", "tiny.weights"]);
    }
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    let output = run_import(dir.path(), &["missing.cfg", "weights.bin"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("config file 'missing.cfg' not found\nUsage darknet_import"), "{stdout}");
    assert_eq!(file_names(dir.path()), vec!["tiny.cfg", "tiny.weights"]);
}

#[test]
fn test_missing_weights_file() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    let output = run_import(dir.path(), &["tiny.cfg", "other.weights"]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("weights file 'other.weights' not found\nUsage darknet_import"), "{stdout}");
    assert_eq!(file_names(dir.path()), vec!["tiny.cfg", "tiny.weights"]);
}

#[test]
fn test_malformed_config_fails_without_output() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());
    fs::write(dir.path().join("tiny.cfg"), "[net]\nwidth=4\nheight=4\nchannels=1\n[yolo]\n").unwrap();

    let output = run_import(dir.path(), &["tiny.cfg", "tiny.weights"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported layer type [yolo]"));
    assert_eq!(file_names(dir.path()), vec!["tiny.cfg", "tiny.weights"]);
}

#[test]
fn test_describe_lists_layers() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    let output = Command::new(env!("CARGO_BIN_EXE_darknet_describe"))
        .args(["tiny.cfg", "tiny.weights"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("input: 4x4x1"));
    assert!(stdout.contains("maxpool 2x2/2 pad 1: 4x4x2 -> 2x2x2"));
    assert!(stdout.contains("output: 1x1x3"));
    assert!(stdout.contains("version 0.2.0, seen 1000"));
    assert!(stdout.contains("FullyConnected: 2x2x2 -> 1x1x3"));
}

#[test]
fn test_describe_reports_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    write_tiny_model(dir.path());

    for (args, path) in [(vec!["missing.cfg"], "missing.cfg"), (vec!["tiny.cfg", "missing.weights"], "missing.weights")] {
        let output = Command::new(env!("CARGO_BIN_EXE_darknet_describe"))
            .args(&args)
            .current_dir(dir.path())
            .output()
            .unwrap();
        assert_eq!(output.status.code(), Some(1));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.starts_with(&format!("Error: I/O error on '{path}': ")), "{stderr}");
    }
}

#[test]
fn test_import_rejects_non_finite_weights() {
    let dir = tempfile::tempdir().unwrap();
    let (_, weights) = write_tiny_model(dir.path());
    let mut floats = tiny_weights();
    floats[5] = f32::NAN;
    fs::write(&weights, weights_bytes(&floats)).unwrap();

    let output = run_import(dir.path(), &["tiny.cfg", "tiny.weights"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("non-finite value in convolutional weights at index 3"));
    assert_eq!(file_names(dir.path()), vec!["tiny.cfg", "tiny.weights"]);
}
