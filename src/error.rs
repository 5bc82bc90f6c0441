//! Error types for the poisson-blend crate.

/// Errors that can occur while building operators, solving, or doing file I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A grid dimension passed to the matrix builder was zero.
    #[error("invalid grid dimension {rows}x{cols}: both must be at least 1")]
    InvalidDimension {
        /// Number of grid rows (image height).
        rows: usize,
        /// Number of grid columns (image width).
        cols: usize,
    },

    /// Two rasters that must share spatial dimensions do not.
    #[error("{what} is {got_width}x{got_height}, expected {width}x{height}")]
    ShapeMismatch {
        /// Which input was rejected.
        what: &'static str,
        /// Expected width in pixels.
        width: u32,
        /// Expected height in pixels.
        height: u32,
        /// Actual width in pixels.
        got_width: u32,
        /// Actual height in pixels.
        got_height: u32,
    },

    /// The linear system lost positive definiteness during the solve.
    #[error("singular system in channel {channel} after {iterations} iterations")]
    SingularSystem {
        /// Color channel being solved.
        channel: usize,
        /// Iterations completed before the breakdown.
        iterations: usize,
    },

    /// The iterative solver hit its iteration cap.
    #[error(
        "solver did not converge in channel {channel}: residual {residual:e} after {iterations} iterations"
    )]
    NotConverged {
        /// Color channel being solved.
        channel: usize,
        /// Iterations performed.
        iterations: usize,
        /// Relative residual norm at the last iteration.
        residual: f64,
    },

    /// The solution contains NaN or infinite values.
    #[error("non-finite value in channel {channel} at pixel index {index}")]
    NonFinite {
        /// Color channel being solved.
        channel: usize,
        /// Linear pixel index `x + y * width`.
        index: usize,
    },

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image decoding or encoding.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Attach a channel index to a solver error raised without one.
    #[must_use]
    pub(crate) fn in_channel(self, channel: usize) -> Self {
        match self {
            Self::SingularSystem { iterations, .. } => Self::SingularSystem {
                channel,
                iterations,
            },
            Self::NotConverged {
                iterations,
                residual,
                ..
            } => Self::NotConverged {
                channel,
                iterations,
                residual,
            },
            Self::NonFinite { index, .. } => Self::NonFinite { channel, index },
            other => other,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
