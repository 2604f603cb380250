use core::convert::Infallible;

use embedded_graphics::{
    pixelcolor::{BinaryColor, GrayColor as _},
    prelude::{Dimensions, DrawTarget, OriginDimensions, Size},
    Pixel,
};
use heapless::Vec;
use thiserror::Error as ThisError;

use crate::image::SourceImage;

/// Errors raised while building frame data. These never involve the hardware.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum FrameError {
    /// Width is zero or not a multiple of 8, or height is zero or beyond what the panel can gate.
    #[error("invalid panel geometry {width}x{height}")]
    InvalidGeometry { width: u16, height: u16 },
    /// The geometry needs more bytes than the buffer can hold.
    #[error("frame needs {required} bytes but the buffer holds {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },
    /// The source image is neither the panel size nor the panel size transposed.
    #[error(
        "unsupported image size {image_width}x{image_height} for a {panel_width}x{panel_height} panel"
    )]
    UnsupportedImageSize {
        image_width: u32,
        image_height: u32,
        panel_width: u32,
        panel_height: u32,
    },
    /// The raw image data does not match the declared image size.
    #[error("image data holds {actual} bytes, expected {expected}")]
    ImageDataLength { expected: usize, actual: usize },
    /// A buffer built for a different panel geometry was handed to the driver.
    #[error("buffer geometry does not match the panel")]
    GeometryMismatch,
}

/// Pixel dimensions of a panel. Fixed per panel model.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelGeometry {
    pub width: u16,
    pub height: u16,
}

impl PanelGeometry {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Number of bytes holding one row of pixels.
    pub const fn bytes_per_row(&self) -> usize {
        self.width as usize / 8
    }

    /// Computes the packed buffer length, `(width / 8) * height`.
    pub const fn buffer_length(&self) -> usize {
        self.bytes_per_row() * self.height as usize
    }

    pub const fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }

    /// Checks that the geometry can be packed into a buffer of `capacity` bytes.
    pub fn validate(&self, capacity: usize) -> Result<(), FrameError> {
        if self.width == 0 || self.height == 0 || self.width % 8 != 0 {
            return Err(FrameError::InvalidGeometry {
                width: self.width,
                height: self.height,
            });
        }
        let required = self.buffer_length();
        if required > capacity {
            return Err(FrameError::CapacityExceeded { required, capacity });
        }
        Ok(())
    }
}

/// A packed 1-bit-per-pixel frame, laid out the way the controller RAM expects it.
///
/// Rows are stored one after another, 8 pixels per byte, most significant bit first. A set bit is
/// white and a cleared bit is black, so a fresh buffer is all `0xFF`.
///
/// `N` is the capacity in bytes; the used length is always `geometry.buffer_length()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuffer<const N: usize> {
    geometry: PanelGeometry,
    data: Vec<u8, N>,
}

impl<const N: usize> DeviceBuffer<N> {
    /// Creates an all-white buffer.
    ///
    /// ```
    /// use epd2in9_driver::buffer::{DeviceBuffer, PanelGeometry};
    ///
    /// let buffer = DeviceBuffer::<16>::new(PanelGeometry::new(16, 8)).unwrap();
    /// assert!(buffer.data().iter().all(|b| *b == 0xFF));
    /// ```
    pub fn new(geometry: PanelGeometry) -> Result<Self, FrameError> {
        Self::filled(geometry, 0xFF)
    }

    /// Creates a buffer with every byte set to `byte`.
    pub fn filled(geometry: PanelGeometry, byte: u8) -> Result<Self, FrameError> {
        geometry.validate(N)?;
        let mut data = Vec::new();
        data.resize(geometry.buffer_length(), byte)
            .map_err(|_| FrameError::CapacityExceeded {
                required: geometry.buffer_length(),
                capacity: N,
            })?;
        Ok(Self { geometry, data })
    }

    /// Packs a grayscale source image. Pixels with zero luma become black, everything else stays
    /// white.
    ///
    /// Two orientations are accepted:
    ///
    /// * the panel size: pixel `(x, y)` lands on `(x, y)`.
    /// * the panel size transposed: the image is rotated by 90 degrees, so pixel `(x, y)` lands on
    ///   `(y, height - x - 1)`.
    ///
    /// Any other size is rejected with [FrameError::UnsupportedImageSize]. On square panels the
    /// first case wins.
    pub fn from_image<I>(geometry: PanelGeometry, image: &I) -> Result<Self, FrameError>
    where
        I: SourceImage + ?Sized,
    {
        let mut buffer = Self::new(geometry)?;
        let width = geometry.width as u32;
        let height = geometry.height as u32;
        let image_size = image.size();

        if image_size.width == width && image_size.height == height {
            for y in 0..height {
                for x in 0..width {
                    if image.luma(x, y).luma() == 0 {
                        buffer.paint_black(x, y);
                    }
                }
            }
        } else if image_size.width == height && image_size.height == width {
            for y in 0..image_size.height {
                for x in 0..image_size.width {
                    if image.luma(x, y).luma() == 0 {
                        buffer.paint_black(y, height - x - 1);
                    }
                }
            }
        } else {
            return Err(FrameError::UnsupportedImageSize {
                image_width: image_size.width,
                image_height: image_size.height,
                panel_width: width,
                panel_height: height,
            });
        }

        Ok(buffer)
    }

    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    /// Access the packed buffer data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Iterates over the packed rows, top to bottom.
    pub fn rows(&self) -> core::slice::Chunks<'_, u8> {
        self.data.chunks(self.geometry.bytes_per_row())
    }

    /// Clears the bit for `(x, y)`. The caller keeps the point within the geometry.
    fn paint_black(&mut self, x: u32, y: u32) {
        let (byte_index, mask) = self.bit_position(x, y);
        self.data[byte_index] &= !mask;
    }

    fn bit_position(&self, x: u32, y: u32) -> (usize, u8) {
        let bit = x as usize + y as usize * self.geometry.width as usize;
        (bit / 8, 0x80 >> (bit % 8))
    }
}

impl<const N: usize> OriginDimensions for DeviceBuffer<N> {
    fn size(&self) -> Size {
        self.geometry.size()
    }
}

impl<const N: usize> DrawTarget for DeviceBuffer<N> {
    /// `On` is white and `Off` is black.
    type Color = BinaryColor;

    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let bounds = self.bounding_box();
        for Pixel(point, color) in pixels.into_iter() {
            if point.x < 0
                || point.x >= bounds.size.width as i32
                || point.y < 0
                || point.y >= bounds.size.height as i32
            {
                continue; // Skip out-of-bounds pixels
            }

            let (byte_index, mask) = self.bit_position(point.x as u32, point.y as u32);
            if color == BinaryColor::On {
                self.data[byte_index] |= mask;
            } else {
                self.data[byte_index] &= !mask;
            }
        }
        Ok(())
    }

    fn clear(&mut self, color: Self::Color) -> Result<(), Self::Error> {
        let byte = if color == BinaryColor::On { 0xFF } else { 0x00 };
        self.data.iter_mut().for_each(|b| *b = byte);
        Ok(())
    }
}
