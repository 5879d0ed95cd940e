//! Block-aligned raster writer.
//!
//! [`RasterWriter`] accepts chunks of any length and re-slices them into block
//! rows (or lines) for a [`BlockStorage`]. Incoming chunks are queued in a
//! [`FragmentQueue`]; every [`write`](RasterWriter::write) drains as many complete
//! block rows as the queue holds and returns once the storage has written all of
//! them. The final block row of a raster whose height is not a multiple of the
//! block height is written line by line.
//!
//! The first chunk fixes the element type. Writing a chunk of another type, or
//! more elements than the raster holds, fails. Any failure destroys the writer;
//! every later call returns an error.

use crate::WriterOptions;
use anyhow::{Context, Result, anyhow, bail, ensure};
use futures::{Stream, StreamExt, TryStreamExt, stream};
use rasterflow_core::{BlockStorage, Chunk, ElementType, FragmentQueue, Size};
use std::{fmt, pin::pin, sync::Arc};

#[derive(Clone, Copy, Debug, PartialEq)]
enum WriteMode {
	BlockRows,
	Lines,
}

#[derive(Debug)]
struct Layout {
	raster_size: Size,
	block_size: Size,
	mode: WriteMode,
	no_data: Option<f64>,
}

#[derive(Debug)]
enum State {
	Open,
	Finished,
	Destroyed(String),
}

enum PendingWrite {
	BlockRow(usize, Chunk),
	Line(usize, Chunk),
}

struct Drained {
	writes: Vec<PendingWrite>,
	writing_pos: usize,
	block_pos: usize,
}

/// Consumer side of a pipeline: writes a chunk sequence of any granularity to one
/// [`BlockStorage`] in whole block rows.
///
/// The geometry (and, with [`WriterOptions::convert_no_data`], the NoData value) is
/// resolved on the first non-empty chunk. A writer accepts exactly
/// `raster_size.x * raster_size.y` elements and must be closed with
/// [`finish`](Self::finish), which flushes the storage.
///
/// ```rust
/// use rasterflow_core::{Chunk, ElementType, MemoryRaster, Size};
/// use rasterflow_stream::{RasterWriter, WriterOptions};
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let target = MemoryRaster::new(Size::new(3, 2), Size::new(3, 1), ElementType::UInt8)?.arc();
/// let mut writer = RasterWriter::new(target.clone(), WriterOptions::default());
///
/// // chunk boundaries do not need to match the block rows
/// writer.write(Chunk::from(vec![1u8, 2])).await?;
/// writer.write(Chunk::from(vec![3u8, 4, 5, 6])).await?;
/// writer.finish().await?;
///
/// assert_eq!(target.data(), Chunk::from(vec![1u8, 2, 3, 4, 5, 6]));
/// assert_eq!(target.stats().block_writes, 2);
/// # Ok(())
/// # }
/// ```
pub struct RasterWriter {
	storage: Arc<dyn BlockStorage>,
	options: WriterOptions,
	layout: Option<Layout>,
	queue: FragmentQueue,
	writing_pos: usize,
	block_pos: usize,
	written: usize,
	state: State,
}

impl fmt::Debug for RasterWriter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RasterWriter")
			.field("writing_pos", &self.writing_pos)
			.field("block_pos", &self.block_pos)
			.field("buffered", &self.queue.buffered())
			.field("written", &self.written)
			.field("state", &self.state)
			.finish()
	}
}

impl RasterWriter {
	/// Creates a writer for `storage`. Nothing is read from the storage until the
	/// first chunk arrives.
	pub fn new(storage: Arc<dyn BlockStorage>, options: WriterOptions) -> Self {
		Self {
			storage,
			options,
			layout: None,
			queue: FragmentQueue::new(),
			writing_pos: 0,
			block_pos: 0,
			written: 0,
			state: State::Open,
		}
	}

	/// Raster rows the storage has acknowledged. Rows of a failed write are not
	/// counted.
	pub fn writing_pos(&self) -> usize {
		self.writing_pos
	}

	/// Block rows the storage has acknowledged. Rows of the final partial block row
	/// are written as lines and do not advance this.
	pub fn block_pos(&self) -> usize {
		self.block_pos
	}

	/// Elements accepted but not yet written.
	pub fn buffered(&self) -> usize {
		self.queue.buffered()
	}

	/// Elements accepted in total.
	pub fn written(&self) -> usize {
		self.written
	}

	/// The element type fixed by the first non-empty chunk.
	pub fn element_type(&self) -> Option<ElementType> {
		self.queue.element_type()
	}

	/// Queues `chunk` and writes every block row it completes.
	///
	/// Returns after all triggered block writes have finished. Empty chunks are
	/// ignored.
	pub async fn write(&mut self, chunk: Chunk) -> Result<()> {
		self.check_open()?;
		let result = self.write_chunk(chunk).await;
		self.settle(result)
	}

	/// Checks that the raster is complete and flushes the storage.
	pub async fn finish(&mut self) -> Result<()> {
		self.check_open()?;
		let result = self.finish_raster().await;
		if result.is_ok() {
			self.state = State::Finished;
		}
		self.settle(result)
	}

	/// Writes every chunk of `stream`, then finishes. An error of the stream
	/// destroys the writer as well.
	pub async fn write_stream(&mut self, stream: impl Stream<Item = Result<Chunk>>) -> Result<()> {
		let mut stream = pin!(stream);
		loop {
			let next = stream.try_next().await;
			match next {
				Ok(Some(chunk)) => self.write(chunk).await?,
				Ok(None) => break,
				Err(err) => {
					self.check_open()?;
					return self.settle(Err(err));
				}
			}
		}
		self.finish().await
	}

	fn check_open(&self) -> Result<()> {
		match &self.state {
			State::Open => Ok(()),
			State::Finished => bail!("raster writer is already finished"),
			State::Destroyed(reason) => bail!("raster writer was destroyed: {reason}"),
		}
	}

	fn settle(&mut self, result: Result<()>) -> Result<()> {
		if let Err(err) = &result {
			log::debug!("destroying raster writer: {err:#}");
			self.state = State::Destroyed(format!("{err:#}"));
		}
		result
	}

	async fn resolve(&mut self) -> Result<()> {
		if self.layout.is_some() {
			return Ok(());
		}
		let raster_size = self.storage.raster_size().await?;
		let block_size = self.storage.block_size().await?;
		let mode = if self.options.block_optimize && block_size.x == raster_size.x && block_size.y > 0 {
			WriteMode::BlockRows
		} else {
			WriteMode::Lines
		};
		let no_data = if self.options.convert_no_data {
			let no_data = self.storage.no_data_value().await?;
			if no_data.is_none() {
				log::debug!("band defines no NoData value, writing without conversion");
			}
			no_data
		} else {
			None
		};
		log::debug!("writing raster {raster_size} in {mode:?}, blocks of {block_size}");
		self.layout = Some(Layout {
			raster_size,
			block_size,
			mode,
			no_data,
		});
		Ok(())
	}

	async fn write_chunk(&mut self, chunk: Chunk) -> Result<()> {
		if chunk.is_empty() {
			return Ok(());
		}
		self.resolve().await?;
		let total = self.layout.as_ref().map_or(0, |layout| layout.raster_size.area());

		if let Some(expected) = self.queue.element_type() {
			ensure!(
				expected == chunk.element_type(),
				"TypeError: expected {expected} elements, got {}",
				chunk.element_type()
			);
		}
		let len = chunk.len();
		if self.written + len > total {
			bail!(
				"RangeError: write exceeds raster capacity of {total} elements by {} elements",
				self.written + len - total
			);
		}
		self.queue.push(chunk)?;
		self.written += len;

		let Drained {
			writes,
			writing_pos,
			block_pos,
		} = self.drain()?;
		if writes.is_empty() {
			return Ok(());
		}
		log::trace!("writing {} pieces, {} elements still buffered", writes.len(), self.queue.buffered());

		let storage = self.storage.clone();
		stream::iter(writes)
			.map(Ok::<_, anyhow::Error>)
			.try_for_each_concurrent(self.options.max_concurrent_writes.max(1), |write| {
				let storage = storage.clone();
				async move {
					match write {
						PendingWrite::BlockRow(row, data) => storage
							.write_block_row(row, data)
							.await
							.with_context(|| format!("Failed to write block row {row}")),
						PendingWrite::Line(row, data) => storage
							.write_line(row, data)
							.await
							.with_context(|| format!("Failed to write line {row}")),
					}
				}
			})
			.await?;

		self.writing_pos = writing_pos;
		self.block_pos = block_pos;
		Ok(())
	}

	/// Takes every complete block row (or line) off the queue. The returned
	/// positions take effect once all writes have succeeded.
	fn drain(&mut self) -> Result<Drained> {
		let layout = self.layout.as_ref().ok_or_else(|| anyhow!("raster layout was not resolved"))?;
		let width = layout.raster_size.x;
		let height = layout.raster_size.y;
		let block_rows = layout.block_size.y;
		let zero_copy = self.options.block_optimize;

		let mut writing_pos = self.writing_pos;
		let mut block_pos = self.block_pos;
		let mut writes = Vec::new();
		while writing_pos < height {
			let full_block_row = layout.mode == WriteMode::BlockRows && height - writing_pos >= block_rows;
			let rows = if full_block_row { block_rows } else { 1 };
			let len = rows * width;
			if self.queue.buffered() < len {
				break;
			}
			let mut data = self.queue.take(len, zero_copy)?;
			if let Some(no_data) = layout.no_data {
				data.nan_to_value(no_data);
			}
			if full_block_row {
				writes.push(PendingWrite::BlockRow(block_pos, data));
				block_pos += 1;
			} else {
				writes.push(PendingWrite::Line(writing_pos, data));
			}
			writing_pos += rows;
		}
		Ok(Drained {
			writes,
			writing_pos,
			block_pos,
		})
	}

	async fn finish_raster(&mut self) -> Result<()> {
		self.resolve().await?;
		let total = self.layout.as_ref().map_or(0, |layout| layout.raster_size.area());
		ensure!(
			self.written >= total,
			"incomplete raster: {} of {total} elements were written",
			self.written
		);
		ensure!(
			self.queue.is_empty(),
			"unflushed: {} elements are still buffered",
			self.queue.buffered()
		);
		self.storage.flush().await.context("Failed to flush storage")?;
		log::debug!("finished raster after {} rows", self.writing_pos);
		Ok(())
	}
}
