use anyhow::Result;
use futures::TryStreamExt;
use pretty_assertions::assert_eq;
use rasterflow_core::{BlockStorage, Chunk, ChunkStream, ElementType, IoStats, MemoryRaster, Size};
use rasterflow_stream::{RasterReader, RasterWriter, ReaderOptions, WriterOptions};
use std::sync::Arc;

fn gradient(raster_size: Size, block_size: Size) -> Arc<MemoryRaster> {
	let data: Vec<f32> = (0..raster_size.area()).map(|i| i as f32).collect();
	MemoryRaster::from_chunk(raster_size, block_size, Chunk::from(data))
		.unwrap()
		.arc()
}

async fn write_in_pieces(target: Arc<MemoryRaster>, data: Chunk, piece: usize) -> Result<RasterWriter> {
	let mut writer = RasterWriter::new(target, WriterOptions::default());
	let stream = ChunkStream::from_items(vec![data]).rechunk(piece);
	writer.write_stream(stream.inner).await?;
	Ok(writer)
}

#[tokio::test]
async fn reader_emits_exactly_the_raster_area() -> Result<()> {
	for (width, height, block_height) in [(5, 9, 2), (5, 9, 3), (1, 1, 4), (7, 10, 10), (3, 11, 4)] {
		let raster = gradient(Size::new(width, height), Size::new(width, block_height));
		let chunks: Vec<Chunk> = RasterReader::new(raster, ReaderOptions::default()).try_collect().await?;
		let lengths: Vec<usize> = chunks.iter().map(Chunk::len).collect();

		assert_eq!(lengths.iter().sum::<usize>(), width * height);
		let last = match height % block_height {
			0 => block_height * width,
			rest => rest * width,
		};
		assert_eq!(lengths.last(), Some(&last), "raster {width}x{height}, block height {block_height}");
	}
	Ok(())
}

#[tokio::test]
async fn round_trip_is_independent_of_chunk_size() -> Result<()> {
	let size = Size::new(13, 11);
	let source = gradient(size, Size::new(13, 3));
	let expected = source.data();

	for piece in [1, 7, 13, 26, 27, 100, 143] {
		let target = MemoryRaster::new(size, Size::new(13, 2), ElementType::Float32)?.arc();
		let mut writer = RasterWriter::new(target.clone(), WriterOptions::default());
		let stream = RasterReader::new(source.clone(), ReaderOptions::default())
			.into_chunk_stream()
			.rechunk(piece);
		writer.write_stream(stream.inner).await?;

		assert_eq!(target.data(), expected, "chunks of {piece} elements");
		assert_eq!(writer.writing_pos(), 11);
		assert_eq!(target.stats().flushes, 1);
	}
	Ok(())
}

#[tokio::test]
async fn round_trip_through_line_mode() -> Result<()> {
	let size = Size::new(6, 4);
	let source = gradient(size, Size::new(3, 3));
	let target = MemoryRaster::new(size, Size::new(2, 2), ElementType::Float32)?.arc();

	let mut writer = RasterWriter::new(target.clone(), WriterOptions::default());
	writer
		.write_stream(RasterReader::new(source.clone(), ReaderOptions::default()))
		.await?;

	assert_eq!(target.data(), source.data());
	assert_eq!(source.stats().line_reads, 4);
	assert_eq!(target.stats().line_writes, 4);
	Ok(())
}

#[tokio::test]
async fn misaligned_chunks_match_aligned_chunks_bit_for_bit() -> Result<()> {
	let size = Size::new(801, 601);
	let block_size = Size::new(801, 2);
	let data = gradient(size, block_size).data();

	let aligned = MemoryRaster::new(size, block_size, ElementType::Float32)?.arc();
	let writer = write_in_pieces(aligned.clone(), data.clone(), 1602).await?;
	assert_eq!(writer.writing_pos(), 601);

	let misaligned = MemoryRaster::new(size, block_size, ElementType::Float32)?.arc();
	let writer = write_in_pieces(misaligned.clone(), data.clone(), 1803).await?;
	assert_eq!(writer.writing_pos(), 601);

	let aligned_bits: Vec<u32> = aligned.data().into_vec::<f32>()?.iter().map(|v| v.to_bits()).collect();
	let misaligned_bits: Vec<u32> = misaligned.data().into_vec::<f32>()?.iter().map(|v| v.to_bits()).collect();
	assert!(aligned_bits == misaligned_bits);
	assert_eq!(misaligned.data(), data);

	// 300 full block rows, then the single trailing row as a line
	assert_eq!(
		misaligned.stats(),
		IoStats {
			block_writes: 300,
			line_writes: 1,
			flushes: 1,
			..IoStats::default()
		}
	);
	Ok(())
}

#[tokio::test]
async fn no_data_conversion_is_deterministic() -> Result<()> {
	let size = Size::new(4, 3);
	let nan_positions = [0, 5, 6, 11];
	let input: Vec<f64> = (0..12)
		.map(|i| if nan_positions.contains(&i) { f64::NAN } else { i as f64 })
		.collect();

	let target = MemoryRaster::new(size, Size::new(4, 2), ElementType::Float64)?
		.with_no_data(-9999.0)
		.arc();
	let options = WriterOptions {
		convert_no_data: true,
		..WriterOptions::default()
	};
	let mut writer = RasterWriter::new(target.clone(), options);
	let stream = ChunkStream::from_items(vec![Chunk::from(input)]).rechunk(5);
	writer.write_stream(stream.inner).await?;

	let written = target.data().into_vec::<f64>()?;
	for (i, value) in written.iter().enumerate() {
		if nan_positions.contains(&i) {
			assert_eq!(*value, -9999.0);
		} else {
			assert_eq!(*value, i as f64);
		}
	}

	let options = ReaderOptions {
		convert_no_data: true,
		..ReaderOptions::default()
	};
	let read = RasterReader::new(target, options)
		.into_chunk_stream()
		.concat()
		.await?
		.into_vec::<f64>()?;
	for (i, value) in read.iter().enumerate() {
		assert_eq!(value.is_nan(), nan_positions.contains(&i), "element {i}");
	}
	Ok(())
}

#[tokio::test]
async fn underflow_fails_with_incomplete_raster() -> Result<()> {
	let size = Size::new(5, 4);
	let target = MemoryRaster::new(size, Size::new(5, 2), ElementType::Float32)?.arc();
	let data = Chunk::from(vec![1.0f32; 19]);
	let err = write_in_pieces(target.clone(), data, 4).await.unwrap_err();
	assert!(err.to_string().starts_with("incomplete raster"), "{err}");
	assert_eq!(target.stats().flushes, 0);
	Ok(())
}

#[tokio::test]
async fn overflow_reports_the_excess() -> Result<()> {
	let size = Size::new(5, 4);
	for excess in [1, 4, 13] {
		let target = MemoryRaster::new(size, Size::new(5, 2), ElementType::Float32)?.arc();
		let data = Chunk::from(vec![1.0f32; 20 + excess]);
		let mut writer = RasterWriter::new(target, WriterOptions::default());
		let err = writer.write(data).await.unwrap_err();
		assert_eq!(
			err.to_string(),
			format!("RangeError: write exceeds raster capacity of 20 elements by {excess} elements")
		);
	}
	Ok(())
}

#[tokio::test]
async fn reader_errors_reach_the_writer() -> Result<()> {
	let size = Size::new(3, 3);
	let source = gradient(size, Size::new(3, 1));
	source.fail_on(rasterflow_core::FailurePoint::ReadBlockRow(2));
	let target = MemoryRaster::new(size, Size::new(3, 1), ElementType::Float32)?.arc();

	let mut writer = RasterWriter::new(target.clone(), WriterOptions::default());
	let err = writer
		.write_stream(RasterReader::new(source, ReaderOptions::default()))
		.await
		.unwrap_err();
	assert_eq!(
		err.root_cause().to_string(),
		"I/O error: injected failure at ReadBlockRow(2)"
	);
	assert_eq!(writer.writing_pos(), 2);
	assert_eq!(target.stats().flushes, 0);
	Ok(())
}

#[tokio::test]
async fn writer_accepts_any_storage_behind_the_trait() -> Result<()> {
	let storage: Arc<dyn BlockStorage> = MemoryRaster::new(Size::new(2, 2), Size::new(2, 2), ElementType::Int8)?.arc();
	let mut writer = RasterWriter::new(storage.clone(), WriterOptions::default());
	writer.write(Chunk::from(vec![1i8, -2, 3, -4])).await?;
	writer.finish().await?;
	assert_eq!(storage.read_block_row(0).await?, Chunk::from(vec![1i8, -2, 3, -4]));
	Ok(())
}
