//! Read and write VBF volumetric block images.
//! This library uses no foreign code or unsafe Rust.
//!
//! A vbf file stores one five-dimensional image `(x, y, z, channel, time)`
//! as a grid of independently compressed blocks plus a block offset index,
//! so any axis-aligned region can be read without decompressing the rest
//! of the file. Writing and reading both run the block codec on a pool of
//! worker threads while keeping memory bounded, regardless of image size.
//!
//! Start with [`write::Writer`] and [`read::Reader`].

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,
    missing_copy_implementations,
    missing_debug_implementations,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    trivial_numeric_casts,
    redundant_semicolons
)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod compression;
pub mod error;
pub mod grid;
pub mod meta;
pub mod read;
pub mod write;

mod io;
mod math;
mod pipeline;
mod queue;

pub use crate::math::Coords;

/// Export the most important items from `vbfs`.
/// _Note: This includes a type called `Result`, possibly overwriting the default `std::Result` type usage._
pub mod prelude {
    pub use crate::compression::Compression;
    pub use crate::error::{Error, Result, UnitResult};
    pub use crate::grid::{BlockGrid, Rect, Roi};
    pub use crate::math::Coords;
    pub use crate::meta::{Axis, ImageInfo, PixelType, DIMENSIONS};
    pub use crate::read::Reader;
    pub use crate::write::Writer;
}
