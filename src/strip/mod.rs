//! LED strip capability interface and the backends that implement it.
//!
//! The server owns exactly one `Strip` and every pixel mutation goes through
//! it. Writes are staged with `set_pixel`/`set_all_pixels` and become visible
//! on `show()`, mirroring how the Blinkt! hardware is driven.

use anyhow::Result;

mod memory;
pub use memory::MemoryStrip;

#[cfg(feature = "hardware")]
mod hardware;
#[cfg(feature = "hardware")]
pub use hardware::BlinktStrip;

/// Number of addressable pixels on the strip.
pub const NUM_PIXELS: usize = 8;

/// A pixel color as RGB channels.
pub type Rgb = [u8; 3];

/// Capability interface to the LED hardware.
///
/// Pixel state is owned by the implementation; `get_pixel` reads the
/// currently staged color, which is what the flash operation captures and
/// restores. Out-of-range pixel indexes are ignored; the protocol layer
/// rejects them before they reach the strip.
pub trait Strip {
    /// Stage a color for one pixel.
    fn set_pixel(&mut self, pixel: usize, red: u8, green: u8, blue: u8);

    /// Stage a color for every pixel.
    fn set_all_pixels(&mut self, red: u8, green: u8, blue: u8);

    /// Read the staged color and brightness of one pixel.
    fn get_pixel(&self, pixel: usize) -> (Rgb, f32);

    /// Flush staged colors to the strip.
    fn show(&mut self) -> Result<()>;
}
