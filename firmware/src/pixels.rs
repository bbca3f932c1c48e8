//! Pixel (RGB LED) control collaborator interface.
//!
//! The firmware core routes pixel commands from the host to this
//! interface; physical LED strip timing lives outside the core.

use crate::types::PixelGroup;

/// Sink for pixel commands.
pub trait PixelControl: Send + Sync {
    /// Number of pixels in a group. Zero when the group is absent.
    fn count(&self, group: PixelGroup) -> u8;

    /// Set one pixel's color. Takes effect on the next [`show`].
    ///
    /// [`show`]: PixelControl::show
    fn set(&self, group: PixelGroup, index: u8, red: u8, green: u8, blue: u8);

    /// Display all pending pixel changes at once.
    fn show(&self);

    /// Turn every pixel off.
    fn reset(&self);
}

/// A device without LEDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPixels;

impl PixelControl for NoPixels {
    fn count(&self, _group: PixelGroup) -> u8 {
        0
    }

    fn set(&self, _group: PixelGroup, _index: u8, _red: u8, _green: u8, _blue: u8) {}

    fn show(&self) {}

    fn reset(&self) {}
}
