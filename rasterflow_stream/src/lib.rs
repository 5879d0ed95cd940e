//! Block-aligned streaming of raster bands.
//!
//! The four stages compose into pipelines such as
//! `RasterReader` -> [`RasterSync`] -> [`RasterTransform`] -> [`RasterWriter`]:
//!
//! - [`RasterReader`] reads a band block row by block row as a chunk stream.
//! - [`RasterWriter`] takes chunks of any length and writes whole block rows.
//! - [`RasterSync`] combines several equally long sources into steps of equal length.
//! - [`RasterTransform`] applies a pixel function across the sources of each step.
//!
//! ```rust
//! use rasterflow_core::{Chunk, ElementType, MemoryRaster, Size};
//! use rasterflow_stream::{RasterReader, RasterWriter, ReaderOptions, WriterOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let source = MemoryRaster::from_chunk(Size::new(4, 4), Size::new(4, 2), Chunk::from(vec![7u16; 16]))?.arc();
//! let target = MemoryRaster::new(Size::new(4, 4), Size::new(4, 2), ElementType::UInt16)?.arc();
//!
//! let mut writer = RasterWriter::new(target.clone(), WriterOptions::default());
//! writer.write_stream(RasterReader::new(source, ReaderOptions::default())).await?;
//! assert_eq!(target.data(), Chunk::from(vec![7u16; 16]));
//! # Ok(())
//! # }
//! ```

mod options;
pub use options::*;

mod reader;
pub use reader::*;

mod sync;
pub use sync::*;

mod transform;
pub use transform::*;

mod writer;
pub use writer::*;
