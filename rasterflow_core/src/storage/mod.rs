//! Block storage collaborators.
//!
//! A collaborator owns one raster band and performs the actual block and line I/O.
//! Streams only ever talk to it through [`BlockStorage`], shared as
//! `Arc<dyn BlockStorage>`, so any backend (GDAL, an in-memory grid, a remote
//! service) can be plugged in without the streams knowing about it.
//!
//! ## Block rows
//!
//! Block row `r` covers the raster rows `r * block.y .. min((r + 1) * block.y, H)`
//! over the **full raster width**. Its buffer always holds `W * block.y` elements:
//! on a read, rows beyond the raster edge are padding; on a write, they are ignored.
//! A line always holds `W` elements.

mod memory;
pub use memory::*;

#[cfg(feature = "gdal")]
mod gdal;
#[cfg(feature = "gdal")]
pub use gdal::*;

use crate::{Chunk, ElementType, Size};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;

#[async_trait]
pub trait BlockStorage: Debug + Send + Sync {
	/// Size of one native block.
	async fn block_size(&self) -> Result<Size>;

	/// Size of the whole raster.
	async fn raster_size(&self) -> Result<Size>;

	/// Native element type of the band.
	async fn element_type(&self) -> Result<ElementType>;

	/// The NoData sentinel, if the band defines one.
	async fn no_data_value(&self) -> Result<Option<f64>>;

	/// Reads block row `row` (`W * block.y` elements, see the module docs).
	async fn read_block_row(&self, row: usize) -> Result<Chunk>;

	/// Writes block row `row` from `W * block.y` elements.
	async fn write_block_row(&self, row: usize, data: Chunk) -> Result<()>;

	/// Reads raster line `row` (`W` elements).
	async fn read_line(&self, row: usize) -> Result<Chunk>;

	/// Writes raster line `row` from `W` elements.
	async fn write_line(&self, row: usize, data: Chunk) -> Result<()>;

	/// Persists everything written so far.
	async fn flush(&self) -> Result<()>;
}
