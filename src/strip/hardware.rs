use anyhow::{Context, Result};
use blinkt::Blinkt;

use super::{Rgb, Strip, NUM_PIXELS};

/// Binding to a Pimoroni Blinkt! strip driven over SPI.
///
/// The `blinkt` crate exposes no pixel getter, so staged colors are shadowed
/// here; the shadow is the source of truth for `get_pixel`.
pub struct BlinktStrip {
    inner: Blinkt,
    staged: [Rgb; NUM_PIXELS],
    brightness: f32,
}

impl BlinktStrip {
    /// Open the strip and apply the global brightness. Fails when the SPI
    /// device is unavailable, e.g. off a Raspberry Pi.
    pub fn new(brightness_percent: u8) -> Result<Self> {
        let mut inner = Blinkt::new().context("Failed to open the Blinkt! strip")?;
        let brightness = f32::from(brightness_percent.min(100)) / 100.0;
        inner.set_all_pixels_brightness(brightness);

        Ok(BlinktStrip {
            inner,
            staged: [[0, 0, 0]; NUM_PIXELS],
            brightness,
        })
    }
}

impl Strip for BlinktStrip {
    fn set_pixel(&mut self, pixel: usize, red: u8, green: u8, blue: u8) {
        if let Some(p) = self.staged.get_mut(pixel) {
            *p = [red, green, blue];
            self.inner.set_pixel(pixel, red, green, blue);
        }
    }

    fn set_all_pixels(&mut self, red: u8, green: u8, blue: u8) {
        self.staged = [[red, green, blue]; NUM_PIXELS];
        self.inner.set_all_pixels(red, green, blue);
    }

    fn get_pixel(&self, pixel: usize) -> (Rgb, f32) {
        let color = self.staged.get(pixel).copied().unwrap_or([0, 0, 0]);
        (color, self.brightness)
    }

    fn show(&mut self) -> Result<()> {
        self.inner
            .show()
            .context("Failed to flush pixel data to the strip")
    }
}
