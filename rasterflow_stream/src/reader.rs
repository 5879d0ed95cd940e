//! Block-aligned raster reader.
//!
//! [`RasterReader`] pulls a band from a [`BlockStorage`] and yields it as a stream
//! of chunks in row-major order. The geometry is resolved on the first poll. If the
//! storage blocks span the full raster width, every poll reads one block row and
//! the last one is clamped to the rows that are left. Otherwise (or with
//! `block_optimize` turned off) every poll reads one line.
//!
//! A reader fetches only when it is polled and never has more than one fetch in
//! flight. With [`ReaderOptions::prefetch`] the fetching moves to a background
//! task that stays a bounded number of chunks ahead.
//!
//! ```rust
//! use futures::TryStreamExt;
//! use rasterflow_core::{Chunk, MemoryRaster, Size};
//! use rasterflow_stream::{RasterReader, ReaderOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let data = Chunk::from((0..15u8).collect::<Vec<_>>());
//! let raster = MemoryRaster::from_chunk(Size::new(3, 5), Size::new(3, 2), data)?.arc();
//! let chunks: Vec<Chunk> = RasterReader::new(raster, ReaderOptions::default()).try_collect().await?;
//! assert_eq!(chunks.iter().map(Chunk::len).collect::<Vec<_>>(), [6, 6, 3]);
//! # Ok(())
//! # }
//! ```

use crate::ReaderOptions;
use anyhow::{Context, Result, bail, ensure};
use futures::{
	Stream, StreamExt,
	stream::{self, BoxStream},
};
use rasterflow_core::{BlockStorage, Chunk, ChunkStream, ElementType, Size};
use std::{
	fmt,
	pin::Pin,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	task::{Context as TaskContext, Poll},
};

#[derive(Clone, Copy, Debug, PartialEq)]
enum ReadMode {
	BlockRows,
	Lines,
}

#[derive(Debug)]
struct Layout {
	raster_size: Size,
	block_size: Size,
	mode: ReadMode,
	element_type: ElementType,
	no_data: Option<f64>,
}

struct ReadState {
	storage: Arc<dyn BlockStorage>,
	options: ReaderOptions,
	layout: Option<Layout>,
	reading_pos: Arc<AtomicUsize>,
	block_pos: usize,
}

impl ReadState {
	async fn resolve(&mut self) -> Result<()> {
		if self.layout.is_some() {
			return Ok(());
		}
		let raster_size = self.storage.raster_size().await?;
		let block_size = self.storage.block_size().await?;
		let native_type = self.storage.element_type().await?;
		let element_type = self.options.element_type.unwrap_or(native_type);

		let mode = if self.options.block_optimize && block_size.x == raster_size.x && block_size.y > 0 {
			ReadMode::BlockRows
		} else {
			ReadMode::Lines
		};

		let no_data = if self.options.convert_no_data {
			match self.storage.no_data_value().await? {
				Some(value) => {
					if !element_type.is_float() {
						bail!("TypeError: NoData conversion needs a float element type, got {element_type}");
					}
					Some(value)
				}
				None => {
					log::debug!("band defines no NoData value, reading without conversion");
					None
				}
			}
		} else {
			None
		};

		log::debug!("reading raster {raster_size} ({native_type} as {element_type}) in {mode:?}, blocks of {block_size}");
		self.layout = Some(Layout {
			raster_size,
			block_size,
			mode,
			element_type,
			no_data,
		});
		Ok(())
	}

	async fn fetch(&mut self) -> Result<Option<Chunk>> {
		self.resolve().await?;
		let Some(layout) = &self.layout else {
			bail!("raster layout was not resolved");
		};
		let width = layout.raster_size.x;
		let height = layout.raster_size.y;
		let reading_pos = self.reading_pos.load(Ordering::Acquire);
		if reading_pos >= height {
			log::debug!("read all {height} rows");
			return Ok(None);
		}

		let (mut chunk, rows) = match layout.mode {
			ReadMode::BlockRows => {
				let rows = layout.block_size.y.min(height - reading_pos);
				let chunk = self
					.storage
					.read_block_row(self.block_pos)
					.await
					.with_context(|| format!("Failed to read block row {}", self.block_pos))?;
				log::trace!("read block row {} ({rows} rows)", self.block_pos);
				self.block_pos += 1;
				(chunk, rows)
			}
			ReadMode::Lines => {
				let chunk = self
					.storage
					.read_line(reading_pos)
					.await
					.with_context(|| format!("Failed to read line {reading_pos}"))?;
				log::trace!("read line {reading_pos}");
				(chunk, 1)
			}
		};

		let expected = rows * width;
		ensure!(
			chunk.len() >= expected,
			"storage returned {} elements for rows {reading_pos}..{}, expected {expected}",
			chunk.len(),
			reading_pos + rows
		);
		chunk.truncate(expected);
		let mut chunk = chunk.convert(layout.element_type);
		if let Some(no_data) = layout.no_data {
			chunk.value_to_nan(no_data);
		}

		self.reading_pos.store(reading_pos + rows, Ordering::Release);
		Ok(Some(chunk))
	}
}

/// Producer side of a pipeline: the chunks of one raster band in row-major order.
///
/// Every chunk is one block row (the last one clamped to the remaining rows) or one
/// line, depending on the storage's block layout. In total the reader yields exactly
/// `raster_size.x * raster_size.y` elements. The first error ends the stream; there
/// is no retry.
pub struct RasterReader {
	inner: BoxStream<'static, Result<Chunk>>,
	reading_pos: Arc<AtomicUsize>,
}

impl RasterReader {
	/// Creates a reader for `storage`. The storage is not touched before the first
	/// poll.
	///
	/// With [`ReaderOptions::prefetch`] set, the background task is spawned on the
	/// first poll, so that poll must happen inside a tokio runtime.
	pub fn new(storage: Arc<dyn BlockStorage>, options: ReaderOptions) -> Self {
		let reading_pos = Arc::new(AtomicUsize::new(0));
		let prefetch = options.prefetch;
		let state = ReadState {
			storage,
			options,
			layout: None,
			reading_pos: reading_pos.clone(),
			block_pos: 0,
		};

		let inner = stream::try_unfold(state, |mut state| async move {
			Ok(state.fetch().await?.map(|chunk| (chunk, state)))
		})
		.boxed();

		let inner = if prefetch > 0 {
			// spawned lazily, so the reader can be built outside of a runtime
			stream::once(async move { ChunkStream::from_stream(inner).prefetch(prefetch).inner })
				.flatten()
				.boxed()
		} else {
			inner
		};

		Self { inner, reading_pos }
	}

	/// Rows fetched from the storage so far. With prefetching this runs ahead of
	/// what the consumer has received.
	pub fn reading_pos(&self) -> usize {
		self.reading_pos.load(Ordering::Acquire)
	}

	/// Converts the reader into a [`ChunkStream`] to use its combinators, such as
	/// [`rechunk`](ChunkStream::rechunk) or [`concat`](ChunkStream::concat).
	pub fn into_chunk_stream(self) -> ChunkStream<'static> {
		ChunkStream { inner: self.inner }
	}
}

impl fmt::Debug for RasterReader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RasterReader")
			.field("reading_pos", &self.reading_pos())
			.finish()
	}
}

impl Stream for RasterReader {
	type Item = Result<Chunk>;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
		self.inner.poll_next_unpin(cx)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::TryStreamExt;
	use pretty_assertions::assert_eq;
	use rasterflow_core::{FailurePoint, MemoryRaster};

	fn sequence(raster_size: Size, block_size: Size) -> Arc<MemoryRaster> {
		let data: Vec<f32> = (0..raster_size.area()).map(|i| i as f32).collect();
		MemoryRaster::from_chunk(raster_size, block_size, Chunk::from(data))
			.unwrap()
			.arc()
	}

	async fn lengths(reader: RasterReader) -> Result<Vec<usize>> {
		let chunks: Vec<Chunk> = reader.try_collect().await?;
		Ok(chunks.iter().map(Chunk::len).collect())
	}

	#[tokio::test]
	async fn should_read_block_rows() -> Result<()> {
		let cases = [
			(Size::new(4, 6), Size::new(4, 2), vec![8, 8, 8]),
			(Size::new(4, 7), Size::new(4, 3), vec![12, 12, 4]),
			(Size::new(4, 2), Size::new(4, 8), vec![8]),
		];
		for (raster_size, block_size, expected) in cases {
			let raster = sequence(raster_size, block_size);
			let reader = RasterReader::new(raster.clone(), ReaderOptions::default());
			assert_eq!(lengths(reader).await?, expected);
			assert_eq!(raster.stats().block_reads, expected.len());
			assert_eq!(raster.stats().line_reads, 0);
		}
		Ok(())
	}

	#[tokio::test]
	async fn should_fall_back_to_lines_for_narrow_blocks() -> Result<()> {
		let raster = sequence(Size::new(4, 3), Size::new(2, 2));
		let reader = RasterReader::new(raster.clone(), ReaderOptions::default());
		assert_eq!(lengths(reader).await?, [4, 4, 4]);
		assert_eq!(raster.stats().line_reads, 3);
		assert_eq!(raster.stats().block_reads, 0);
		Ok(())
	}

	#[tokio::test]
	async fn block_optimize_off_reads_lines() -> Result<()> {
		let raster = sequence(Size::new(4, 3), Size::new(4, 3));
		let options = ReaderOptions {
			block_optimize: false,
			..ReaderOptions::default()
		};
		assert_eq!(lengths(RasterReader::new(raster.clone(), options)).await?, [4, 4, 4]);
		assert_eq!(raster.stats().line_reads, 3);
		Ok(())
	}

	#[tokio::test]
	async fn should_track_reading_pos() -> Result<()> {
		let raster = sequence(Size::new(2, 5), Size::new(2, 2));
		let mut reader = RasterReader::new(raster, ReaderOptions::default());
		assert_eq!(reader.reading_pos(), 0);
		reader.try_next().await?;
		assert_eq!(reader.reading_pos(), 2);
		reader.try_next().await?;
		reader.try_next().await?;
		assert_eq!(reader.reading_pos(), 5);
		assert!(reader.try_next().await?.is_none());
		Ok(())
	}

	#[tokio::test]
	async fn should_convert_element_type() -> Result<()> {
		let raster = sequence(Size::new(2, 2), Size::new(2, 1));
		let options = ReaderOptions {
			element_type: Some(ElementType::Int16),
			..ReaderOptions::default()
		};
		let chunks: Vec<Chunk> = RasterReader::new(raster, options).try_collect().await?;
		assert_eq!(chunks, [Chunk::from(vec![0i16, 1]), Chunk::from(vec![2i16, 3])]);
		Ok(())
	}

	#[tokio::test]
	async fn should_turn_no_data_into_nan() -> Result<()> {
		let data = Chunk::from(vec![1.0f64, -9999.0, 3.0, -9999.0]);
		let raster = MemoryRaster::from_chunk(Size::new(2, 2), Size::new(2, 2), data)?
			.with_no_data(-9999.0)
			.arc();
		let options = ReaderOptions {
			convert_no_data: true,
			..ReaderOptions::default()
		};
		let chunk = RasterReader::new(raster, options).into_chunk_stream().concat().await?;
		let values = chunk.into_vec::<f64>()?;
		assert_eq!(values[0], 1.0);
		assert!(values[1].is_nan());
		assert_eq!(values[2], 3.0);
		assert!(values[3].is_nan());
		Ok(())
	}

	#[tokio::test]
	async fn no_data_conversion_needs_float_output() {
		let raster = MemoryRaster::new(Size::new(2, 2), Size::new(2, 1), ElementType::UInt8)
			.unwrap()
			.with_no_data(0.0)
			.arc();
		let options = ReaderOptions {
			convert_no_data: true,
			..ReaderOptions::default()
		};
		let err = RasterReader::new(raster, options).try_next().await.unwrap_err();
		assert_eq!(
			err.to_string(),
			"TypeError: NoData conversion needs a float element type, got Byte"
		);
	}

	#[tokio::test]
	async fn fetch_error_ends_the_stream() -> Result<()> {
		let raster = sequence(Size::new(2, 4), Size::new(2, 1));
		raster.fail_on(FailurePoint::ReadBlockRow(1));
		let mut reader = RasterReader::new(raster, ReaderOptions::default());
		assert!(reader.try_next().await?.is_some());
		let err = reader.try_next().await.unwrap_err();
		assert_eq!(err.to_string(), "Failed to read block row 1");
		assert_eq!(err.root_cause().to_string(), "I/O error: injected failure at ReadBlockRow(1)");
		assert!(reader.next().await.is_none());
		Ok(())
	}

	#[tokio::test]
	async fn prefetch_yields_same_chunks() -> Result<()> {
		let raster = sequence(Size::new(3, 10), Size::new(3, 3));
		let plain: Vec<Chunk> = RasterReader::new(raster.clone(), ReaderOptions::default())
			.try_collect()
			.await?;
		let options = ReaderOptions {
			prefetch: 2,
			..ReaderOptions::default()
		};
		let prefetched: Vec<Chunk> = RasterReader::new(raster, options).try_collect().await?;
		assert_eq!(plain, prefetched);
		Ok(())
	}
}
