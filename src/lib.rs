//! Seamless image compositing by solving the discrete Poisson equation.
//!
//! Poisson image editing (Pérez et al., 2003) inserts the masked region of a
//! source image into a target so that the inserted region keeps the source's
//! gradients while its boundary agrees with the target. Per color channel the
//! crate builds the 5-point Laplacian over the target grid, pins pixels
//! outside the mask to the target, and solves the resulting sparse system.
//!
//! # Quick Start
//!
//! ```no_run
//! use poisson_blend::{poisson_edit, EditOptions};
//!
//! let source = image::open("object.png").unwrap().to_rgb8();
//! let target = image::open("scene.png").unwrap().to_rgb8();
//! let mask = image::open("mask.png").unwrap().to_luma8();
//!
//! let blended = poisson_edit(&source, &target, &mask, (0, 0), &EditOptions::default())
//!     .expect("blend failed");
//! blended.save("blended.png").unwrap();
//! ```
//!
//! # Reusing operators
//!
//! The Laplacian only depends on the image size. [`PoissonEngine`] caches it,
//! which pays off when many same-sized images are blended:
//!
//! ```no_run
//! use poisson_blend::{EditOptions, PoissonEngine};
//!
//! let engine = PoissonEngine::new(EditOptions::default());
//! let result = engine.process_files(
//!     "object.png".as_ref(),
//!     "scene.png".as_ref(),
//!     "mask.png".as_ref(),
//!     "scene_blended.png".as_ref(),
//!     (12, -4),
//! );
//! println!("{}: {}", result.success, result.message);
//! ```

#![deny(missing_docs)]

mod engine;
pub mod error;
pub mod laplacian;
pub mod raster;
pub mod solver;
pub mod sparse;

pub use engine::{
    default_output_path, is_supported_image, load_triplet, poisson_edit, poisson_edit_in_place,
    save_image, EditOptions, PoissonEngine, ProcessResult, Triplet,
};
pub use error::{Error, Result};
pub use laplacian::{build_laplacian, BorderPolicy, LaplacianCache};
pub use solver::SolverOptions;
