//! Poisson image editing: the per-channel blend and its file-level wrapper.

use std::path::{Path, PathBuf};
use std::time::Instant;

use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Pixel};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::laplacian::{build_laplacian, BorderPolicy, LaplacianCache, OperatorEdit};
use crate::raster::{binarize_mask, channel_plane, clamp_to_u8, translate};
use crate::solver::{PoissonSystem, SolverOptions};
use crate::sparse::CsrMatrix;

/// Options controlling a Poisson edit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EditOptions {
    /// Scale applied to the source Laplacian inside the mask. Values below 1
    /// soften the imported gradients.
    pub alpha: f64,
    /// Which mask-zero pixels are pinned to the target.
    pub border: BorderPolicy,
    /// Linear solver settings.
    pub solver: SolverOptions,
}

impl Default for EditOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            border: BorderPolicy::default(),
            solver: SolverOptions::default(),
        }
    }
}

/// Blend the masked region of `source` into `target`.
///
/// `source` is translated by `offset = (dx, dy)` onto the target's canvas.
/// Inside the mask the result follows the (alpha-scaled) Laplacian of the
/// translated source; outside it is pinned to `target` (see [`BorderPolicy`]
/// for the image border). Each channel is solved independently.
///
/// Returns a new image; neither input is modified.
///
/// # Errors
///
/// - [`Error::ShapeMismatch`] if `mask` is not the size of `target`.
/// - [`Error::InvalidDimension`] if `target` is empty.
/// - [`Error::SingularSystem`], [`Error::NotConverged`] or [`Error::NonFinite`]
///   if any channel fails to solve; no partial result is produced.
pub fn poisson_edit<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    target: &ImageBuffer<P, Vec<u8>>,
    mask: &GrayImage,
    offset: (i32, i32),
    opts: &EditOptions,
) -> Result<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    check_mask(target, mask)?;
    let laplacian = build_laplacian(target.height() as usize, target.width() as usize)?;
    blend(source, target, mask, offset, opts, &laplacian)
}

/// In-place variant of [`poisson_edit`].
///
/// On error `target` is left exactly as it was: every channel is solved
/// before anything is written.
///
/// # Errors
///
/// Same as [`poisson_edit`].
pub fn poisson_edit_in_place<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    target: &mut ImageBuffer<P, Vec<u8>>,
    mask: &GrayImage,
    offset: (i32, i32),
    opts: &EditOptions,
) -> Result<()>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    *target = poisson_edit(source, target, mask, offset, opts)?;
    Ok(())
}

fn check_mask<P>(target: &ImageBuffer<P, Vec<u8>>, mask: &GrayImage) -> Result<()>
where
    P: Pixel<Subpixel = u8>,
{
    if mask.dimensions() == target.dimensions() {
        return Ok(());
    }
    Err(Error::ShapeMismatch {
        what: "mask",
        width: target.width(),
        height: target.height(),
        got_width: mask.width(),
        got_height: mask.height(),
    })
}

fn blend<P>(
    source: &ImageBuffer<P, Vec<u8>>,
    target: &ImageBuffer<P, Vec<u8>>,
    mask: &GrayImage,
    offset: (i32, i32),
    opts: &EditOptions,
    laplacian: &CsrMatrix,
) -> Result<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8> + Send + Sync,
{
    let (width, height) = target.dimensions();
    let source = translate(source, offset, width, height);
    let mask = binarize_mask(mask);

    let mut edit = OperatorEdit::new(laplacian, width as usize);
    let carved = edit.carve(&mask, opts.border);
    let system = PoissonSystem::new(&edit.finish());
    debug!(width, height, carved, unknowns = system.unknowns(), "prepared poisson system");

    let solve_channel = |channel: usize| -> Result<Vec<u8>> {
        let s = channel_plane(&source, channel);
        let t = channel_plane(target, channel);
        let mut b = laplacian.mul_vec(&s);
        for ((bk, &tk), &m) in b.iter_mut().zip(&t).zip(&mask) {
            *bk = if m == 0 { tk } else { *bk * opts.alpha };
        }
        let solution = system
            .solve(&b, Some(t.as_slice()), &opts.solver)
            .map_err(|e| e.in_channel(channel))?;
        debug!(
            channel,
            iterations = solution.iterations,
            residual = solution.residual,
            "channel solved"
        );
        Ok(solution.values.into_iter().map(clamp_to_u8).collect())
    };

    let channels = usize::from(P::CHANNEL_COUNT);
    #[cfg(feature = "parallel")]
    let planes = (0..channels)
        .into_par_iter()
        .map(solve_channel)
        .collect::<Result<Vec<_>>>()?;
    #[cfg(not(feature = "parallel"))]
    let planes = (0..channels)
        .map(solve_channel)
        .collect::<Result<Vec<_>>>()?;

    let mut out = target.clone();
    for (channel, plane) in planes.iter().enumerate() {
        for (px, &v) in out.pixels_mut().zip(plane) {
            px.channels_mut()[channel] = v;
        }
    }
    Ok(out)
}

/// Result of blending one set of files.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path the result was (or would have been) written to.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Human-readable status message.
    pub message: String,
}

/// Reusable Poisson editor.
///
/// Holds the edit options and caches Laplacians by image size, so repeated
/// edits of same-sized images skip operator construction.
#[derive(Debug, Default)]
pub struct PoissonEngine {
    options: EditOptions,
    cache: LaplacianCache,
}

impl PoissonEngine {
    /// Create an engine with the given options.
    #[must_use]
    pub fn new(options: EditOptions) -> Self {
        Self {
            options,
            cache: LaplacianCache::new(),
        }
    }

    /// The options every edit runs with.
    #[must_use]
    pub fn options(&self) -> &EditOptions {
        &self.options
    }

    /// The operator cache.
    #[must_use]
    pub fn cache(&self) -> &LaplacianCache {
        &self.cache
    }

    /// Same as [`poisson_edit`], reusing cached operators.
    ///
    /// # Errors
    ///
    /// Same as [`poisson_edit`].
    pub fn edit<P>(
        &self,
        source: &ImageBuffer<P, Vec<u8>>,
        target: &ImageBuffer<P, Vec<u8>>,
        mask: &GrayImage,
        offset: (i32, i32),
    ) -> Result<ImageBuffer<P, Vec<u8>>>
    where
        P: Pixel<Subpixel = u8> + Send + Sync,
    {
        check_mask(target, mask)?;
        let laplacian = self
            .cache
            .get_or_build(target.height() as usize, target.width() as usize)?;
        blend(source, target, mask, offset, &self.options, &laplacian)
    }

    /// Same as [`poisson_edit_in_place`], reusing cached operators.
    ///
    /// # Errors
    ///
    /// Same as [`poisson_edit`]; `target` is untouched on error.
    pub fn edit_in_place<P>(
        &self,
        source: &ImageBuffer<P, Vec<u8>>,
        target: &mut ImageBuffer<P, Vec<u8>>,
        mask: &GrayImage,
        offset: (i32, i32),
    ) -> Result<()>
    where
        P: Pixel<Subpixel = u8> + Send + Sync,
    {
        *target = self.edit(source, target, mask, offset)?;
        Ok(())
    }

    /// Edit decoded images of any color type.
    ///
    /// Color targets are blended as RGB, grayscale targets as luma; `source`
    /// is converted to match.
    ///
    /// # Errors
    ///
    /// Same as [`poisson_edit`].
    pub fn edit_dynamic(
        &self,
        source: &DynamicImage,
        target: &DynamicImage,
        mask: &GrayImage,
        offset: (i32, i32),
    ) -> Result<DynamicImage> {
        if target.color().has_color() {
            let out = self.edit(&source.to_rgb8(), &target.to_rgb8(), mask, offset)?;
            Ok(DynamicImage::ImageRgb8(out))
        } else {
            let out = self.edit(&source.to_luma8(), &target.to_luma8(), mask, offset)?;
            Ok(DynamicImage::ImageLuma8(out))
        }
    }

    /// Load source, target and mask files, blend them, and save to `output`.
    #[must_use]
    pub fn process_files(
        &self,
        source: &Path,
        target: &Path,
        mask: &Path,
        output: &Path,
        offset: (i32, i32),
    ) -> ProcessResult {
        let started = Instant::now();
        let mut result = ProcessResult {
            path: output.to_path_buf(),
            success: false,
            message: String::new(),
        };

        if !is_supported_image(output) {
            result.message = format!("Unsupported output format: {}", output.display());
            return result;
        }

        let inputs = match load_triplet(source, target, mask) {
            Ok(inputs) => inputs,
            Err(e) => {
                result.message = format!("Failed to load: {e}");
                return result;
            }
        };

        let blended = match self.edit_dynamic(&inputs.source, &inputs.target, &inputs.mask, offset) {
            Ok(img) => img,
            Err(e) => {
                result.message = format!("Failed to blend: {e}");
                return result;
            }
        };

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    result.message = format!("Failed to create output directory: {e}");
                    return result;
                }
            }
        }

        match save_image(&blended, output) {
            Ok(()) => {
                result.success = true;
                result.message = format!(
                    "Blended {}x{} in {:.2?}",
                    blended.width(),
                    blended.height(),
                    started.elapsed()
                );
                info!(output = %output.display(), elapsed = ?started.elapsed(), "blend written");
            }
            Err(e) => {
                result.message = format!("Failed to save: {e}");
            }
        }

        result
    }
}

/// Decoded inputs of one blend.
#[derive(Debug, Clone)]
pub struct Triplet {
    /// Image whose gradients are imported.
    pub source: DynamicImage,
    /// Image that receives the blend.
    pub target: DynamicImage,
    /// Region mask, read as 8-bit grayscale.
    pub mask: GrayImage,
}

/// Decode source, target and mask images from disk.
///
/// # Errors
///
/// Returns [`Error::Image`] if any file cannot be opened or decoded.
pub fn load_triplet(source: &Path, target: &Path, mask: &Path) -> Result<Triplet> {
    Ok(Triplet {
        source: image::open(source)?,
        target: image::open(target)?,
        mask: image::open(mask)?.to_luma8(),
    })
}

/// Whether `path` names a format [`save_image`] can write.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    matches!(
        ImageFormat::from_path(path),
        Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp | ImageFormat::WebP)
    )
}

/// Save an image with format-specific quality settings.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &DynamicImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png | ImageFormat::Bmp => {
            img.save(path)?;
        }
        ImageFormat::WebP => {
            // The WebP encoder only takes 8-bit RGB(A).
            DynamicImage::ImageRgb8(img.to_rgb8()).save(path)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from a target path.
///
/// Example: `"scene.png"` becomes `"scene_blended.png"`.
#[must_use]
pub fn default_output_path(target: &Path) -> PathBuf {
    let stem = target.file_stem().unwrap_or_default().to_string_lossy();
    let ext = target.extension().unwrap_or_default().to_string_lossy();
    let parent = target.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_blended.{ext}"))
}
