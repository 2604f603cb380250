use embedded_graphics::prelude::Size;
use epd2in9_driver::{
    buffer::{DeviceBuffer, PanelGeometry},
    image::GrayImage,
    session::{AddressingWindow, Cursor},
};
use proptest::prelude::*;

const CAPACITY: usize = 1024;

fn geometry() -> impl Strategy<Value = PanelGeometry> {
    (1u16..=16, 1u16..=48).prop_map(|(columns, height)| PanelGeometry::new(columns * 8, height))
}

fn single_black_pixel(size: Size, x: u32, y: u32) -> Vec<u8> {
    let mut pixels = vec![0xFFu8; (size.width * size.height) as usize];
    pixels[(x + y * size.width) as usize] = 0x00;
    pixels
}

proptest! {
    #[test]
    fn buffer_length_and_fresh_buffer_is_white(geometry in geometry()) {
        let buffer = DeviceBuffer::<CAPACITY>::new(geometry).unwrap();
        prop_assert_eq!(
            buffer.data().len(),
            (geometry.width as usize / 8) * geometry.height as usize
        );
        prop_assert!(buffer.data().iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn single_black_pixel_clears_one_bit(
        (geometry, x, y) in geometry().prop_flat_map(|g| {
            (Just(g), 0..g.width as u32, 0..g.height as u32)
        })
    ) {
        let pixels = single_black_pixel(geometry.size(), x, y);
        let image = GrayImage::new(&pixels, geometry.size()).unwrap();
        let buffer = DeviceBuffer::<CAPACITY>::from_image(geometry, &image).unwrap();

        let w = geometry.width as u32;
        let byte_index = ((x + y * w) / 8) as usize;
        let mask = 0x80u8 >> (x % 8);
        for (i, byte) in buffer.data().iter().enumerate() {
            if i == byte_index {
                prop_assert_eq!(*byte, !mask);
            } else {
                prop_assert_eq!(*byte, 0xFF);
            }
        }
    }

    #[test]
    fn rotated_packing_matches_aligned_packing(
        (geometry, x, y) in geometry().prop_flat_map(|g| {
            // In the transposed source x runs along the panel height.
            (Just(g), 0..g.height as u32, 0..g.width as u32)
        })
    ) {
        let h = geometry.height as u32;
        let rotated_size = Size::new(geometry.height as u32, geometry.width as u32);
        let rotated_pixels = single_black_pixel(rotated_size, x, y);
        let rotated = GrayImage::new(&rotated_pixels, rotated_size).unwrap();

        let aligned_pixels = single_black_pixel(geometry.size(), y, h - x - 1);
        let aligned = GrayImage::new(&aligned_pixels, geometry.size()).unwrap();

        // Square panels always take the aligned path.
        prop_assume!(geometry.width != geometry.height);
        prop_assert_eq!(
            DeviceBuffer::<CAPACITY>::from_image(geometry, &rotated).unwrap(),
            DeviceBuffer::<CAPACITY>::from_image(geometry, &aligned).unwrap()
        );
    }

    #[test]
    fn columns_are_shifted_by_three(x in any::<u16>(), y in any::<u16>()) {
        let expected = ((x >> 3) & 0xFF) as u8;
        prop_assert_eq!(Cursor::new(x, y).x_payload(), [expected]);
        prop_assert_eq!(AddressingWindow::new(x, 0, x, 0).x_payload(), [expected, expected]);
        prop_assert_eq!(Cursor::new(x, y).y_payload(), y.to_le_bytes());
    }
}
