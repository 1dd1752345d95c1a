//! Model preview — draw a RON model document from the command line.
//!
//! Usage: model_preview --model <path.ron> [--size <n>] [--seed <n>] [--dot]
//!
//! Prints a table of drawn values, or the dependency graph in Graphviz DOT
//! form when --dot is given.

use paramdag::core::engine::DrawEngine;
use paramdag::core::model::ModelDocument;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut model_path = None;
    let mut size: usize = 10;
    let mut seed: u64 = 42;
    let mut dot = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--model" if i + 1 < args.len() => {
                i += 1;
                model_path = Some(args[i].clone());
            }
            "--size" if i + 1 < args.len() => {
                i += 1;
                size = args[i].parse().unwrap_or(10);
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse().unwrap_or(42);
            }
            "--dot" => {
                dot = true;
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(model_path) = model_path else {
        print_usage();
        std::process::exit(1);
    };

    let document = match ModelDocument::load_from_ron(Path::new(&model_path)) {
        Ok(document) => document,
        Err(e) => {
            eprintln!("Failed to load model: {e}");
            std::process::exit(1);
        }
    };

    let engine = match DrawEngine::builder().model(document).build() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to build engine: {e}");
            std::process::exit(1);
        }
    };

    if dot {
        print!("{}", engine.to_dot());
        return;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let table = match engine.draw(size, &mut rng) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Draw failed: {e}");
            std::process::exit(1);
        }
    };

    let names: Vec<&str> = table.column_names().collect();
    println!("{}", names.join("\t"));
    for row in 0..table.nrows() {
        let line: Vec<String> = names
            .iter()
            .filter_map(|name| table.column(name).and_then(|col| col.get(row)))
            .map(|value| format!("{value:.6}"))
            .collect();
        println!("{}", line.join("\t"));
    }
}

fn print_usage() {
    println!("model_preview --model <path.ron> [--size <n>] [--seed <n>] [--dot]");
    println!();
    println!("Draws a random sampling of the model's parameters and prints one");
    println!("column per output alias, or the dependency graph with --dot.");
}
