//! Backend adapter implementations.

pub mod client;
pub mod custom;
pub mod magick;
pub mod raster;
pub mod simd;

pub use client::ClientScaler;
pub use custom::CustomScaler;
pub use magick::MagickScaler;
pub use raster::RasterScaler;
pub use simd::SimdScaler;
