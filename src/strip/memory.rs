use anyhow::Result;

use super::{Rgb, Strip, NUM_PIXELS};

/// In-memory strip, used when the crate is built without hardware support
/// and as the test double for the server's dispatch logic.
///
/// Keeps staged and shown pixel state separately so tests can verify that an
/// operation actually flushed its writes.
pub struct MemoryStrip {
    staged: [Rgb; NUM_PIXELS],
    shown: [Rgb; NUM_PIXELS],
    brightness: f32,
}

impl MemoryStrip {
    pub fn new(brightness_percent: u8) -> Self {
        MemoryStrip {
            staged: [[0, 0, 0]; NUM_PIXELS],
            shown: [[0, 0, 0]; NUM_PIXELS],
            brightness: f32::from(brightness_percent.min(100)) / 100.0,
        }
    }

    /// The color a pixel last showed, i.e. after the most recent `show()`.
    pub fn shown(&self, pixel: usize) -> Rgb {
        self.shown.get(pixel).copied().unwrap_or([0, 0, 0])
    }
}

impl Strip for MemoryStrip {
    fn set_pixel(&mut self, pixel: usize, red: u8, green: u8, blue: u8) {
        if let Some(p) = self.staged.get_mut(pixel) {
            *p = [red, green, blue];
        }
    }

    fn set_all_pixels(&mut self, red: u8, green: u8, blue: u8) {
        self.staged = [[red, green, blue]; NUM_PIXELS];
    }

    fn get_pixel(&self, pixel: usize) -> (Rgb, f32) {
        let color = self.staged.get(pixel).copied().unwrap_or([0, 0, 0]);
        (color, self.brightness)
    }

    fn show(&mut self) -> Result<()> {
        self.shown = self.staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_pixel_is_staged_until_show() {
        let mut strip = MemoryStrip::new(5);
        strip.set_pixel(3, 10, 20, 30);

        let (color, _) = strip.get_pixel(3);
        assert_eq!(color, [10, 20, 30]);
        assert_eq!(strip.shown(3), [0, 0, 0]);

        strip.show().unwrap();
        assert_eq!(strip.shown(3), [10, 20, 30]);
    }

    #[test]
    fn set_all_pixels_stages_every_pixel() {
        let mut strip = MemoryStrip::new(5);
        strip.set_all_pixels(255, 255, 255);
        strip.show().unwrap();

        for pixel in 0..NUM_PIXELS {
            assert_eq!(strip.shown(pixel), [255, 255, 255]);
        }
    }

    #[test]
    fn out_of_range_pixel_is_ignored() {
        let mut strip = MemoryStrip::new(5);
        strip.set_pixel(NUM_PIXELS, 1, 2, 3);
        strip.show().unwrap();

        let (color, _) = strip.get_pixel(NUM_PIXELS);
        assert_eq!(color, [0, 0, 0]);
        for pixel in 0..NUM_PIXELS {
            assert_eq!(strip.shown(pixel), [0, 0, 0]);
        }
    }

    #[test]
    fn brightness_comes_from_the_configured_percentage() {
        let strip = MemoryStrip::new(5);
        let (_, brightness) = strip.get_pixel(0);
        assert!((brightness - 0.05).abs() < f32::EPSILON);

        // Values above 100% are clamped.
        let strip = MemoryStrip::new(120);
        let (_, brightness) = strip.get_pixel(0);
        assert!((brightness - 1.0).abs() < f32::EPSILON);
    }
}
