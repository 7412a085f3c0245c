//! Darknet model import tool
//!
//! Converts a Darknet config and weights file pair into an ELL model file and a
//! JSON file describing the model's input and output shapes. Both outputs are
//! written next to the weights file.

use ell_darknet::importer::{DarknetImporter, ImportArgs};
use std::{error::Error, io, process};

fn main() {
    ell_darknet::init_logging();

    let args = match ImportArgs::parse_command_line(std::env::args_os()) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.report(&mut io::stdout());
            process::exit(1);
        }
    };

    if let Err(e) = DarknetImporter::new().run(&args, &mut io::stdout().lock()) {
        eprintln!("Error: {e}");
        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        process::exit(1);
    }
}
