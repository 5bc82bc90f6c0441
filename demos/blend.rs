//! Blend the masked region of one image into another.
//!
//! Usage:
//! ```sh
//! cargo run --example blend -- source.png target.png mask.png output.png [DX DY]
//! ```

use std::env;
use std::process;

use poisson_blend::{EditOptions, PoissonEngine};

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 5 && args.len() != 7 {
        eprintln!("Usage: {} <source> <target> <mask> <output> [dx dy]", args[0]);
        process::exit(1);
    }

    let offset = if args.len() == 7 {
        match (args[5].parse::<i32>(), args[6].parse::<i32>()) {
            (Ok(dx), Ok(dy)) => (dx, dy),
            _ => {
                eprintln!("Error: dx and dy must be integers, got '{}' '{}'", args[5], args[6]);
                process::exit(1);
            }
        }
    } else {
        (0, 0)
    };

    let engine = PoissonEngine::new(EditOptions::default());
    let result = engine.process_files(
        args[1].as_ref(),
        args[2].as_ref(),
        args[3].as_ref(),
        args[4].as_ref(),
        offset,
    );

    if result.success {
        println!("Done: {}", result.message);
    } else {
        eprintln!("Error: {}", result.message);
        process::exit(1);
    }
}
