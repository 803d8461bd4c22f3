//! Coordinate space marker types.
//!
//! Zero-sized markers that keep pixel and normalized geometry apart at
//! compile time. The model itself is always pixel-space; normalized
//! values only appear inside format plugins that store them.

use std::fmt;

/// Absolute pixel positions, origin at the top-left corner.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pixel {}

/// Positions as fractions (0.0 to 1.0) of the image dimensions.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Normalized {}

impl fmt::Debug for Pixel {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl fmt::Debug for Normalized {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}
