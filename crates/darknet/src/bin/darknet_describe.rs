//! Darknet network description tool
//!
//! Parses a Darknet config file and prints every layer with the shapes it
//! consumes and produces. When a weights file is given as well, the network is
//! converted and the resulting ELL layers are listed too.

use clap::Parser;
use ell_darknet::{DarknetError, cfg::DarknetNetwork, predictor_from_network, weights::WeightsReader};
use std::{fs, path::PathBuf, process};

#[derive(Parser)]
#[command(version, about = "Prints the layer structure of a Darknet network")]
struct Args {
    /// Darknet network config (.cfg)
    config: PathBuf,

    /// Matching Darknet weights; enables conversion to ELL layers
    weights: Option<PathBuf>,
}

fn main() {
    ell_darknet::init_logging();
    let args = Args::parse();

    if let Err(e) = describe(&args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn describe(args: &Args) -> Result<(), DarknetError> {
    let source = fs::read_to_string(&args.config).map_err(|source| DarknetError::Io {
        path: args.config.clone(),
        source,
    })?;
    let network = DarknetNetwork::parse(&source)?;

    println!("Darknet network: {}", args.config.display());
    println!("  input: {}", network.input_shape);
    for (index, layer) in network.layers.iter().enumerate() {
        println!("  {index:>3} (line {}) {layer}", layer.line);
    }
    println!("  output: {}", network.output_shape());

    let Some(weights_path) = &args.weights else {
        return Ok(());
    };

    let bytes = fs::read(weights_path).map_err(|source| DarknetError::Io {
        path: weights_path.clone(),
        source,
    })?;
    let mut reader = WeightsReader::new(&bytes)?;
    let header = *reader.header();
    let predictor = predictor_from_network(&network, &mut reader)?;

    println!();
    println!("Weights: {} (version {}.{}.{}, seen {})", weights_path.display(), header.major, header.minor, header.revision, header.seen);
    if reader.remaining() > 0 {
        println!("  {} trailing bytes not used", reader.remaining());
    }
    println!("ELL predictor:");
    for (index, layer) in predictor.layers().iter().enumerate() {
        println!("  {index:>3} {}: {} -> {}", layer.name(), layer.input_shape(), layer.output_shape());
    }

    Ok(())
}
