//! Raster helpers: translation, mask binarization and channel planes.

use image::{GrayImage, ImageBuffer, Pixel};

/// Translate `image` by `offset = (dx, dy)` into a `width x height` canvas.
///
/// `out(x, y) = image(x - dx, y - dy)`; pixels that land outside `image`
/// are zero.
#[must_use]
pub fn translate<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    offset: (i32, i32),
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (dx, dy) = (i64::from(offset.0), i64::from(offset.1));
    let mut out = ImageBuffer::new(width, height);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let sx = u32::try_from(i64::from(x) - dx);
        let sy = u32::try_from(i64::from(y) - dy);
        if let (Ok(sx), Ok(sy)) = (sx, sy) {
            if sx < image.width() && sy < image.height() {
                *px = *image.get_pixel(sx, sy);
            }
        }
    }
    out
}

/// Flatten a mask to `{0, 1}` in row-major order; any nonzero sample becomes 1.
#[must_use]
pub fn binarize_mask(mask: &GrayImage) -> Vec<u8> {
    mask.as_raw().iter().map(|&v| u8::from(v != 0)).collect()
}

/// Extract channel `channel` as a row-major `f64` plane, indexed `x + y * width`.
///
/// # Panics
///
/// Panics if `channel >= P::CHANNEL_COUNT`.
#[must_use]
pub fn channel_plane<P>(image: &ImageBuffer<P, Vec<u8>>, channel: usize) -> Vec<f64>
where
    P: Pixel<Subpixel = u8>,
{
    image
        .pixels()
        .map(|px| f64::from(px.channels()[channel]))
        .collect()
}

/// Solved values closer than this to an integer are taken as that integer.
const SNAP_EPSILON: f64 = 1e-3;

/// Clamp a solved value into `[0, 255]` and truncate it to a pixel value.
///
/// Values within [`SNAP_EPSILON`] of an integer snap to it first, so solver
/// round-off just below an exact integer does not truncate one level down.
#[must_use]
pub fn clamp_to_u8(value: f64) -> u8 {
    let rounded = value.round();
    let value = if (value - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        value.clamp(0.0, 255.0) as u8
    }
}
