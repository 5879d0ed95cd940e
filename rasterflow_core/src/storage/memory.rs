//! In-memory block storage.
//!
//! [`MemoryRaster`] keeps a whole band in one [`Chunk`]. It is the reference
//! collaborator for tests and for pipelines that compute small derived rasters.
//! Every operation yields to the scheduler before touching the data, so callers see
//! the same suspension points as with a real backend. It also counts the calls it
//! receives ([`IoStats`]) and can be told to fail at a given point ([`FailurePoint`]).
//!
//! ```rust
//! use rasterflow_core::{BlockStorage, Chunk, ElementType, MemoryRaster, Size};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let raster = MemoryRaster::new(Size::new(4, 3), Size::new(4, 2), ElementType::Int16)?;
//! raster.write_line(2, Chunk::from(vec![1i16, 2, 3, 4])).await?;
//! assert_eq!(raster.read_line(2).await?, Chunk::from(vec![1i16, 2, 3, 4]));
//! # Ok(())
//! # }
//! ```

use super::BlockStorage;
use crate::{Chunk, ElementType, Size};
use anyhow::{Result, bail, ensure};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

/// Number of calls a [`MemoryRaster`] has served, by kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IoStats {
	pub block_reads: usize,
	pub block_writes: usize,
	pub line_reads: usize,
	pub line_writes: usize,
	pub flushes: usize,
}

/// An operation a [`MemoryRaster`] can be told to fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailurePoint {
	ReadBlockRow(usize),
	WriteBlockRow(usize),
	ReadLine(usize),
	WriteLine(usize),
	Flush,
}

#[derive(Debug)]
pub struct MemoryRaster {
	raster_size: Size,
	block_size: Size,
	no_data: Option<f64>,
	data: Mutex<Chunk>,
	stats: Mutex<IoStats>,
	failures: Mutex<Vec<FailurePoint>>,
}

impl MemoryRaster {
	/// A raster of `raster_size` filled with zeros.
	pub fn new(raster_size: Size, block_size: Size, element_type: ElementType) -> Result<Self> {
		Self::from_chunk(raster_size, block_size, Chunk::zeros(element_type, raster_size.area()))
	}

	/// A raster holding `data` in row-major order.
	pub fn from_chunk(raster_size: Size, block_size: Size, data: Chunk) -> Result<Self> {
		ensure!(
			block_size.x > 0 && block_size.y > 0,
			"block size must not be empty, got {block_size}"
		);
		ensure!(
			data.len() == raster_size.area(),
			"raster {raster_size} needs {} elements, got {}",
			raster_size.area(),
			data.len()
		);
		Ok(Self {
			raster_size,
			block_size,
			no_data: None,
			data: Mutex::new(data),
			stats: Mutex::new(IoStats::default()),
			failures: Mutex::new(Vec::new()),
		})
	}

	#[must_use]
	pub fn with_no_data(mut self, value: f64) -> Self {
		self.no_data = Some(value);
		self
	}

	#[must_use]
	pub fn arc(self) -> Arc<Self> {
		Arc::new(self)
	}

	/// Makes the next call matching `point` fail with an I/O error.
	pub fn fail_on(&self, point: FailurePoint) {
		self.failures.lock().push(point);
	}

	/// A copy of the whole band.
	#[must_use]
	pub fn data(&self) -> Chunk {
		self.data.lock().clone()
	}

	#[must_use]
	pub fn stats(&self) -> IoStats {
		*self.stats.lock()
	}

	fn check_failure(&self, point: FailurePoint) -> Result<()> {
		let mut failures = self.failures.lock();
		if let Some(index) = failures.iter().position(|failure| *failure == point) {
			failures.remove(index);
			bail!("I/O error: injected failure at {point:?}");
		}
		Ok(())
	}

	fn block_row_len(&self) -> usize {
		self.raster_size.x * self.block_size.y
	}

	/// First element and number of valid elements of block row `row`.
	fn block_row_span(&self, row: usize) -> Result<(usize, usize)> {
		let first_line = row * self.block_size.y;
		ensure!(
			first_line < self.raster_size.y,
			"block row {row} is outside of raster {}",
			self.raster_size
		);
		let lines = self.block_size.y.min(self.raster_size.y - first_line);
		Ok((first_line * self.raster_size.x, lines * self.raster_size.x))
	}

	fn line_span(&self, row: usize) -> Result<(usize, usize)> {
		ensure!(
			row < self.raster_size.y,
			"line {row} is outside of raster {}",
			self.raster_size
		);
		Ok((row * self.raster_size.x, self.raster_size.x))
	}

	fn read_span(&self, start: usize, len: usize, padded_len: usize) -> Result<Chunk> {
		let data = self.data.lock();
		let mut chunk = Chunk::with_capacity(data.element_type(), padded_len);
		chunk.extend_from_slice_of(&data, start..start + len)?;
		if padded_len > len {
			chunk.append(Chunk::zeros(data.element_type(), padded_len - len))?;
		}
		Ok(chunk)
	}

	fn write_span(&self, start: usize, len: usize, chunk: Chunk) -> Result<()> {
		let mut data = self.data.lock();
		let chunk = chunk.convert(data.element_type());
		data.copy_from(start, &chunk, 0..len)
	}
}

#[async_trait]
impl BlockStorage for MemoryRaster {
	async fn block_size(&self) -> Result<Size> {
		tokio::task::yield_now().await;
		Ok(self.block_size)
	}

	async fn raster_size(&self) -> Result<Size> {
		tokio::task::yield_now().await;
		Ok(self.raster_size)
	}

	async fn element_type(&self) -> Result<ElementType> {
		tokio::task::yield_now().await;
		Ok(self.data.lock().element_type())
	}

	async fn no_data_value(&self) -> Result<Option<f64>> {
		tokio::task::yield_now().await;
		Ok(self.no_data)
	}

	async fn read_block_row(&self, row: usize) -> Result<Chunk> {
		tokio::task::yield_now().await;
		self.check_failure(FailurePoint::ReadBlockRow(row))?;
		let (start, len) = self.block_row_span(row)?;
		let chunk = self.read_span(start, len, self.block_row_len())?;
		self.stats.lock().block_reads += 1;
		Ok(chunk)
	}

	async fn write_block_row(&self, row: usize, data: Chunk) -> Result<()> {
		tokio::task::yield_now().await;
		self.check_failure(FailurePoint::WriteBlockRow(row))?;
		ensure!(
			data.len() == self.block_row_len(),
			"block row {row} needs {} elements, got {}",
			self.block_row_len(),
			data.len()
		);
		let (start, len) = self.block_row_span(row)?;
		self.write_span(start, len, data)?;
		self.stats.lock().block_writes += 1;
		Ok(())
	}

	async fn read_line(&self, row: usize) -> Result<Chunk> {
		tokio::task::yield_now().await;
		self.check_failure(FailurePoint::ReadLine(row))?;
		let (start, len) = self.line_span(row)?;
		let chunk = self.read_span(start, len, len)?;
		self.stats.lock().line_reads += 1;
		Ok(chunk)
	}

	async fn write_line(&self, row: usize, data: Chunk) -> Result<()> {
		tokio::task::yield_now().await;
		self.check_failure(FailurePoint::WriteLine(row))?;
		let (start, len) = self.line_span(row)?;
		ensure!(
			data.len() == len,
			"line {row} needs {len} elements, got {}",
			data.len()
		);
		self.write_span(start, len, data)?;
		self.stats.lock().line_writes += 1;
		Ok(())
	}

	async fn flush(&self) -> Result<()> {
		tokio::task::yield_now().await;
		self.check_failure(FailurePoint::Flush)?;
		self.stats.lock().flushes += 1;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	fn sequence(raster_size: Size, block_size: Size) -> MemoryRaster {
		let data: Vec<u16> = (0..raster_size.area() as u16).collect();
		MemoryRaster::from_chunk(raster_size, block_size, Chunk::from(data)).unwrap()
	}

	#[tokio::test]
	async fn should_report_geometry() -> Result<()> {
		let raster = sequence(Size::new(3, 5), Size::new(3, 2)).with_no_data(-1.0);
		assert_eq!(raster.raster_size().await?, Size::new(3, 5));
		assert_eq!(raster.block_size().await?, Size::new(3, 2));
		assert_eq!(raster.element_type().await?, ElementType::UInt16);
		assert_eq!(raster.no_data_value().await?, Some(-1.0));
		Ok(())
	}

	#[tokio::test]
	async fn should_pad_last_block_row_on_read() -> Result<()> {
		let raster = sequence(Size::new(3, 5), Size::new(3, 2));
		assert_eq!(raster.read_block_row(1).await?, Chunk::from(vec![6u16, 7, 8, 9, 10, 11]));
		assert_eq!(raster.read_block_row(2).await?, Chunk::from(vec![12u16, 13, 14, 0, 0, 0]));
		assert!(raster.read_block_row(3).await.is_err());
		assert_eq!(raster.stats().block_reads, 2);
		Ok(())
	}

	#[tokio::test]
	async fn should_ignore_padding_on_write() -> Result<()> {
		let raster = MemoryRaster::new(Size::new(2, 3), Size::new(2, 2), ElementType::Float32)?;
		raster.write_block_row(0, Chunk::from(vec![1.0f32, 2.0, 3.0, 4.0])).await?;
		raster.write_block_row(1, Chunk::from(vec![5.0f32, 6.0, 99.0, 99.0])).await?;
		assert_eq!(raster.data(), Chunk::from(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]));

		let err = raster.write_block_row(0, Chunk::from(vec![1.0f32])).await.unwrap_err();
		assert_eq!(err.to_string(), "block row 0 needs 4 elements, got 1");
		Ok(())
	}

	#[tokio::test]
	async fn should_convert_written_lines_to_band_type() -> Result<()> {
		let raster = MemoryRaster::new(Size::new(2, 2), Size::new(2, 1), ElementType::UInt8)?;
		raster.write_line(1, Chunk::from(vec![7.9f64, 300.0])).await?;
		assert_eq!(raster.read_line(1).await?, Chunk::from(vec![7u8, 255]));
		assert_eq!(
			raster.stats(),
			IoStats {
				line_reads: 1,
				line_writes: 1,
				..IoStats::default()
			}
		);
		Ok(())
	}

	#[tokio::test]
	async fn injected_failure_fires_once() -> Result<()> {
		let raster = sequence(Size::new(2, 2), Size::new(2, 1));
		raster.fail_on(FailurePoint::ReadLine(1));
		assert!(raster.read_line(0).await.is_ok());
		let err = raster.read_line(1).await.unwrap_err();
		assert_eq!(err.to_string(), "I/O error: injected failure at ReadLine(1)");
		assert!(raster.read_line(1).await.is_ok());
		Ok(())
	}

	#[test]
	fn should_validate_construction() {
		assert!(MemoryRaster::new(Size::new(2, 2), Size::new(0, 1), ElementType::UInt8).is_err());
		let err = MemoryRaster::from_chunk(Size::new(2, 2), Size::new(2, 1), Chunk::from(vec![1u8])).unwrap_err();
		assert_eq!(err.to_string(), "raster 2x2 needs 4 elements, got 1");
	}
}
