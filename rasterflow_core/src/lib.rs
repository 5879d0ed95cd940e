//! Building blocks for streaming raster bands block by block.
//!
//! This crate holds everything the streams in `rasterflow_stream` share:
//!
//! - [`ElementType`], [`Element`] and [`Chunk`]: typed runs of pixel values
//! - [`FragmentQueue`]: turns arbitrarily cut fragments into exact-length slices
//! - [`ChunkStream`]: the boxed, fallible chunk stream passed between stages
//! - [`BlockStorage`]: the seam to the backend that owns a band, with
//!   [`MemoryRaster`] and (feature `gdal`) `GdalBand` as implementations

mod macros;

pub mod types;
pub use types::*;

pub mod storage;
pub use storage::*;

mod concurrency;
pub use concurrency::*;
