//! Image decoding into the pixel layout the networks consume.
//!
//! Any raster format the `image` crate understands is decoded, converted to
//! RGB8 and reshaped into a `height × width × 3` array.

use image::ImageReader;
use ndarray::{Array3, ArrayView3};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

/// ITU-R BT.601 luma weights.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Empty,
    #[error("image is too large: {width}x{height} exceeds {max_pixels} pixels")]
    TooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
}

/// Decoded RGB image, `height × width × 3`.
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    data: Array3<u8>,
}

impl PixelBuffer {
    /// Decode an image file. The format is guessed from content, not the extension.
    pub fn open(path: &Path, max_pixels: u64) -> Result<Self, DecodeError> {
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        Self::from_dynamic(image, max_pixels)
    }

    /// Decode an in-memory encoded image.
    pub fn decode(bytes: &[u8], max_pixels: u64) -> Result<Self, DecodeError> {
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?;
        Self::from_dynamic(image, max_pixels)
    }

    fn from_dynamic(image: image::DynamicImage, max_pixels: u64) -> Result<Self, DecodeError> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }
        if u64::from(width) * u64::from(height) > max_pixels {
            return Err(DecodeError::TooLarge {
                width,
                height,
                max_pixels,
            });
        }

        let rgb = image.into_rgb8();
        Self::from_rgb(width, height, rgb.into_raw())
    }

    /// Wrap raw interleaved RGB bytes.
    pub fn from_rgb(width: u32, height: u32, raw: Vec<u8>) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }
        let data = Array3::from_shape_vec((height as usize, width as usize, 3), raw).map_err(
            |e| DecodeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )?;
        Ok(Self { data })
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn view(&self) -> ArrayView3<'_, u8> {
        self.data.view()
    }

    /// RGB pixel at `(x, y)`. Panics when out of bounds.
    pub fn rgb(&self, x: usize, y: usize) -> [u8; 3] {
        [
            self.data[[y, x, 0]],
            self.data[[y, x, 1]],
            self.data[[y, x, 2]],
        ]
    }

    /// Grayscale intensity at `(x, y)`.
    pub fn luma(&self, x: usize, y: usize) -> f32 {
        luma(self.rgb(x, y))
    }
}

/// Grayscale intensity of one RGB pixel.
pub fn luma([r, g, b]: [u8; 3]) -> f32 {
    r as f32 * LUMA_R + g as f32 * LUMA_G + b as f32 * LUMA_B
}
