use embedded_graphics::{pixelcolor::Gray8, prelude::Size};

use crate::buffer::FrameError;

/// A grayscale raster that can be packed for the panel. It is only ever read.
pub trait SourceImage {
    /// Width and height of the image in pixels.
    fn size(&self) -> Size;

    /// Returns the luma of pixel `(x, y)`. Callers stay within [SourceImage::size].
    fn luma(&self, x: u32, y: u32) -> Gray8;
}

/// A borrowed 8-bit grayscale image, stored row by row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrayImage<'a> {
    size: Size,
    data: &'a [u8],
}

impl<'a> GrayImage<'a> {
    /// Wraps `data`, which must hold exactly `size.width * size.height` luma bytes.
    pub fn new(data: &'a [u8], size: Size) -> Result<Self, FrameError> {
        let Some(expected) = (size.width as usize).checked_mul(size.height as usize) else {
            return Err(FrameError::ImageDataLength {
                expected: usize::MAX,
                actual: data.len(),
            });
        };
        if data.len() != expected {
            return Err(FrameError::ImageDataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { size, data })
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl SourceImage for GrayImage<'_> {
    fn size(&self) -> Size {
        self.size
    }

    fn luma(&self, x: u32, y: u32) -> Gray8 {
        Gray8::new(self.data[x as usize + y as usize * self.size.width as usize])
    }
}
